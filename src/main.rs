// Vulkan "Hello Triangle"
//
// One linear setup pipeline in the canonical order (instance -> surface ->
// device -> swapchain -> render pass -> pipeline -> framebuffers -> command
// buffers -> semaphores), followed by a render loop that replays one
// pre-recorded draw per frame.

mod backend;
mod config;

use anyhow::{Context, Result};
use ash::vk;
use backend::{pipeline, sync::FrameSync, Swapchain, VulkanDevice};
use config::Config;
use std::path::Path;
use std::sync::Arc;
use winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, EventLoop},
    window::{Window, WindowAttributes},
};

/// Fixed shader binary locations, produced by the build script
const VERT_SHADER_PATH: &str = "shaders/triangle.vert.spv";
const FRAG_SHADER_PATH: &str = "shaders/triangle.frag.spv";

fn main() -> Result<()> {
    // Load configuration from config.toml
    let config = Config::load();

    init_logging();
    log::info!("Starting hello-triangle");
    log::info!("Window: {}x{}", config.window.width, config.window.height);

    let event_loop = EventLoop::new()?;
    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;
    Ok(())
}

fn init_logging() {
    use env_logger::Builder;
    use log::LevelFilter;

    let mut builder = Builder::from_default_env();
    builder.filter_level(LevelFilter::Info);
    builder.init();
}

/// Main application struct holding all Vulkan resources.
///
/// Resources must be destroyed in reverse order of creation, see the Drop
/// impl at the bottom.
pub struct App {
    config: Config,

    window: Option<Arc<Window>>,

    device: Option<Arc<VulkanDevice>>,
    swapchain: Option<Swapchain>,

    render_pass: Option<vk::RenderPass>,
    pipeline_layout: Option<vk::PipelineLayout>,
    pipeline: Option<vk::Pipeline>,
    framebuffers: Vec<vk::Framebuffer>,

    command_pool: Option<vk::CommandPool>,
    /// One command buffer per swapchain image, recorded once at startup
    command_buffers: Vec<vk::CommandBuffer>,

    frame_sync: Option<FrameSync>,

    wait_stages: [vk::PipelineStageFlags; 1],
}

impl App {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            window: None,
            device: None,
            swapchain: None,
            render_pass: None,
            pipeline_layout: None,
            pipeline: None,
            framebuffers: Vec::new(),
            command_pool: None,
            command_buffers: Vec::new(),
            frame_sync: None,
            wait_stages: [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT],
        }
    }

    // =========================================================================
    // INITIALIZATION
    // =========================================================================

    /// Initialize all Vulkan resources, in strict dependency order.
    /// Any failure here is fatal; there is no retry.
    fn init_vulkan(&mut self, window: Arc<Window>) -> Result<()> {
        log::info!("Initializing Vulkan...");

        // Step 1: Instance, surface, physical device selection, logical device
        let enable_validation = cfg!(debug_assertions) && self.config.debug.validation_layers;
        let device = VulkanDevice::new(&window, &self.config.window.title, enable_validation)?;

        // Step 2: Swapchain and image views
        let swapchain = Swapchain::new(
            device.clone(),
            self.config.window.width,
            self.config.window.height,
        )?;

        // Step 3: Render pass and graphics pipeline
        let render_pass = pipeline::create_render_pass(&device, swapchain.format)?;
        let (graphics_pipeline, pipeline_layout) = pipeline::create_graphics_pipeline(
            &device,
            render_pass,
            swapchain.extent,
            Path::new(VERT_SHADER_PATH),
            Path::new(FRAG_SHADER_PATH),
        )?;

        // Step 4: Framebuffers, one per swapchain image
        let framebuffers = pipeline::create_framebuffers(
            &device,
            &swapchain.image_views,
            render_pass,
            swapchain.extent,
        )?;

        // Step 5: Command pool and pre-recorded command buffers
        let pool_info = vk::CommandPoolCreateInfo::builder()
            .queue_family_index(device.graphics_queue_family);
        let command_pool = unsafe { device.device.create_command_pool(&pool_info, None) }
            .context("Failed to create command pool")?;

        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(framebuffers.len() as u32);

        let command_buffers = unsafe { device.device.allocate_command_buffers(&alloc_info) }
            .context("Failed to allocate command buffers")?;

        self.record_command_buffers(
            &device.device,
            swapchain.extent,
            render_pass,
            graphics_pipeline,
            &framebuffers,
            &command_buffers,
        )?;

        log::info!("Recorded {} command buffers", command_buffers.len());

        // Step 6: Synchronization primitives
        let frame_sync = FrameSync::new(&device)?;

        self.device = Some(device);
        self.swapchain = Some(swapchain);
        self.render_pass = Some(render_pass);
        self.pipeline_layout = Some(pipeline_layout);
        self.pipeline = Some(graphics_pipeline);
        self.framebuffers = framebuffers;
        self.command_pool = Some(command_pool);
        self.command_buffers = command_buffers;
        self.frame_sync = Some(frame_sync);

        log::info!("Vulkan initialized successfully!");
        Ok(())
    }

    // =========================================================================
    // COMMAND RECORDING
    // =========================================================================

    /// Record the draw commands for every swapchain image.
    ///
    /// The content is static, so recording happens once; SIMULTANEOUS_USE
    /// lets the same buffer be resubmitted while a previous submission is
    /// still on the queue.
    fn record_command_buffers(
        &self,
        device: &ash::Device,
        extent: vk::Extent2D,
        render_pass: vk::RenderPass,
        graphics_pipeline: vk::Pipeline,
        framebuffers: &[vk::Framebuffer],
        command_buffers: &[vk::CommandBuffer],
    ) -> Result<()> {
        let clear_values = [vk::ClearValue {
            color: vk::ClearColorValue {
                float32: self.config.graphics.clear_color,
            },
        }];

        for (i, &cmd) in command_buffers.iter().enumerate() {
            unsafe {
                let begin_info = vk::CommandBufferBeginInfo::builder()
                    .flags(vk::CommandBufferUsageFlags::SIMULTANEOUS_USE);
                device
                    .begin_command_buffer(cmd, &begin_info)
                    .context("Failed to begin recording command buffer")?;

                let render_pass_info = vk::RenderPassBeginInfo::builder()
                    .render_pass(render_pass)
                    .framebuffer(framebuffers[i])
                    .render_area(vk::Rect2D {
                        offset: vk::Offset2D { x: 0, y: 0 },
                        extent,
                    })
                    .clear_values(&clear_values);

                device.cmd_begin_render_pass(cmd, &render_pass_info, vk::SubpassContents::INLINE);
                device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, graphics_pipeline);

                // The triangle's vertices live in the vertex shader
                device.cmd_draw(cmd, 3, 1, 0, 0);

                device.cmd_end_render_pass(cmd);
                device
                    .end_command_buffer(cmd)
                    .context("Failed to record command buffer")?;
            }
        }

        Ok(())
    }

    // =========================================================================
    // RENDER LOOP
    // =========================================================================

    /// Render a single frame: acquire, submit, present.
    fn draw_frame(&self) -> Result<()> {
        let device = self.device.as_ref().context("Device not initialized")?;
        let swapchain = self.swapchain.as_ref().context("Swapchain not initialized")?;
        let sync = self.frame_sync.as_ref().context("Sync objects not initialized")?;

        // Step 1: Acquire next swapchain image
        let (image_index, _suboptimal) =
            swapchain.acquire_next_image(u64::MAX, sync.image_available)?;

        // Step 2: Submit the pre-recorded command buffer for that image
        let wait_semaphores = [sync.image_available];
        let signal_semaphores = [sync.render_finished];
        let command_buffers = [self.command_buffers[image_index as usize]];

        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&self.wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        unsafe {
            device
                .device
                .queue_submit(device.graphics_queue, &[submit_info.build()], vk::Fence::null())
                .context("Failed to submit draw command buffer")?;
        }

        // Step 3: Present the image
        swapchain.present(device.present_queue, image_index, &signal_semaphores)?;

        // One frame at a time: the semaphores can only be reused once the
        // queue has drained.
        // TODO: frames in flight - replace this with per-frame fences
        unsafe {
            device
                .device
                .queue_wait_idle(device.present_queue)
                .context("Failed to wait for present queue")?;
        }

        Ok(())
    }
}

// =============================================================================
// EVENT HANDLING
// =============================================================================

impl ApplicationHandler for App {
    /// Called when the application is ready to create windows.
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        // The swapchain is never recreated, so the window stays fixed-size
        let window_attributes = WindowAttributes::default()
            .with_title(&self.config.window.title)
            .with_inner_size(winit::dpi::PhysicalSize::new(
                self.config.window.width,
                self.config.window.height,
            ))
            .with_resizable(false);

        let window = match event_loop.create_window(window_attributes) {
            Ok(w) => Arc::new(w),
            Err(e) => {
                log::error!("Failed to create window: {:?}", e);
                event_loop.exit();
                return;
            }
        };

        if let Err(e) = self.init_vulkan(window.clone()) {
            log::error!("Failed to initialize Vulkan: {:?}", e);
            event_loop.exit();
            return;
        }

        self.window = Some(window);
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _id: winit::window::WindowId,
        event: WindowEvent,
    ) {
        match event {
            WindowEvent::CloseRequested => {
                log::info!("Close requested, shutting down...");
                if let Some(ref device) = self.device {
                    let _ = device.wait_idle();
                }
                event_loop.exit();
            }

            WindowEvent::RedrawRequested => {
                if let Err(e) = self.draw_frame() {
                    log::error!("Render error: {:?}", e);
                    event_loop.exit();
                }
            }

            WindowEvent::KeyboardInput { event, .. } => {
                use winit::keyboard::{KeyCode, PhysicalKey};

                if event.state.is_pressed() {
                    if let PhysicalKey::Code(KeyCode::Escape) = event.physical_key {
                        log::info!("ESC pressed, exiting...");
                        event_loop.exit();
                    }
                }
            }

            _ => {}
        }
    }

    /// Request a redraw whenever the event queue runs dry, driving the
    /// continuous render loop.
    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(ref window) = self.window {
            window.request_redraw();
        }
    }
}

// =============================================================================
// CLEANUP
// =============================================================================

impl Drop for App {
    fn drop(&mut self) {
        log::info!("Cleaning up Vulkan resources...");

        let Some(device) = self.device.clone() else {
            return;
        };

        // Wait for GPU to finish before destroying anything
        let _ = device.wait_idle();

        unsafe {
            // Destroy in reverse order of creation!
            if let Some(sync) = self.frame_sync.take() {
                sync.destroy(&device.device);
            }

            if let Some(pool) = self.command_pool.take() {
                device.device.destroy_command_pool(pool, None);
            }

            for framebuffer in self.framebuffers.drain(..) {
                device.device.destroy_framebuffer(framebuffer, None);
            }

            if let Some(graphics_pipeline) = self.pipeline.take() {
                device.device.destroy_pipeline(graphics_pipeline, None);
            }

            if let Some(layout) = self.pipeline_layout.take() {
                device.device.destroy_pipeline_layout(layout, None);
            }

            if let Some(render_pass) = self.render_pass.take() {
                device.device.destroy_render_pass(render_pass, None);
            }
        }

        // Swapchain and device clean up after themselves, in that order
        self.swapchain = None;
        self.device = None;

        log::info!("Cleanup complete");
    }
}
