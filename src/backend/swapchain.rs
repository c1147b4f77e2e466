// Swapchain - Window presentation
//
// Queries surface support, picks a format, present mode, and extent, and
// owns the chain of images we render to and present to the screen

use anyhow::{Context, Result};
use ash::vk;
use std::sync::Arc;
use super::VulkanDevice;

/// Surface support reported by a physical device, gathered in one pass.
///
/// Read-only; discarded once the swapchain exists.
pub struct SwapChainSupportDetails {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

pub fn query_swapchain_support(
    device: vk::PhysicalDevice,
    surface_loader: &ash::extensions::khr::Surface,
    surface: vk::SurfaceKHR,
) -> Result<SwapChainSupportDetails> {
    let capabilities = unsafe {
        surface_loader.get_physical_device_surface_capabilities(device, surface)
    }?;

    let formats = unsafe {
        surface_loader.get_physical_device_surface_formats(device, surface)
    }?;

    let present_modes = unsafe {
        surface_loader.get_physical_device_surface_present_modes(device, surface)
    }?;

    Ok(SwapChainSupportDetails {
        capabilities,
        formats,
        present_modes,
    })
}

/// Prefer B8G8R8A8_UNORM with the sRGB color space; otherwise take the first
/// entry the surface reports. `None` only for an empty list.
fn choose_surface_format(available: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    available
        .iter()
        .copied()
        .find(|format| {
            format.format == vk::Format::B8G8R8A8_UNORM
                && format.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .or_else(|| available.first().copied())
}

/// Single pass over the reported modes: MAILBOX returns immediately, a seen
/// IMMEDIATE replaces the FIFO default. FIFO is guaranteed to be available.
fn choose_present_mode(available: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    let mut best_mode = vk::PresentModeKHR::FIFO;

    for &mode in available {
        if mode == vk::PresentModeKHR::MAILBOX {
            return mode;
        } else if mode == vk::PresentModeKHR::IMMEDIATE {
            best_mode = mode;
        }
    }

    best_mode
}

/// A defined current extent is used verbatim; the u32::MAX sentinel means the
/// window manager lets us pick, so clamp the requested size per dimension.
fn choose_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    width: u32,
    height: u32,
) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        capabilities.current_extent
    } else {
        vk::Extent2D {
            width: width.clamp(
                capabilities.min_image_extent.width,
                capabilities.max_image_extent.width,
            ),
            height: height.clamp(
                capabilities.min_image_extent.height,
                capabilities.max_image_extent.height,
            ),
        }
    }
}

pub struct Swapchain {
    pub swapchain: vk::SwapchainKHR,
    pub swapchain_loader: ash::extensions::khr::Swapchain,
    pub image_views: Vec<vk::ImageView>,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
    device: Arc<VulkanDevice>,
}

impl Swapchain {
    pub fn new(device: Arc<VulkanDevice>, width: u32, height: u32) -> Result<Self> {
        let support = query_swapchain_support(
            device.physical_device,
            &device.surface_loader,
            device.surface,
        )?;

        let surface_format =
            choose_surface_format(&support.formats).context("Surface reports no formats")?;
        let present_mode = choose_present_mode(&support.present_modes);
        let extent = choose_extent(&support.capabilities, width, height);

        log::info!("Present mode: {:?}", present_mode);

        // One above the minimum, clamped to the reported maximum (0 = unbounded)
        let mut image_count = support.capabilities.min_image_count + 1;
        if support.capabilities.max_image_count > 0
            && image_count > support.capabilities.max_image_count
        {
            image_count = support.capabilities.max_image_count;
        }

        let swapchain_loader =
            ash::extensions::khr::Swapchain::new(&device.instance, &device.device);

        let family_indices = [device.graphics_queue_family, device.present_queue_family];

        let mut create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(device.surface)
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(support.capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true);

        // Images must be shared when graphics and present queues live in
        // different families
        if device.graphics_queue_family != device.present_queue_family {
            create_info = create_info
                .image_sharing_mode(vk::SharingMode::CONCURRENT)
                .queue_family_indices(&family_indices);
        }

        let swapchain = unsafe { swapchain_loader.create_swapchain(&create_info, None) }
            .context("Failed to create swapchain")?;

        let images = unsafe { swapchain_loader.get_swapchain_images(swapchain) }?;

        log::info!(
            "Created swapchain: {}x{}, {} images",
            extent.width,
            extent.height,
            images.len()
        );

        let image_views: Result<Vec<_>> = images
            .iter()
            .map(|&image| {
                let create_info = vk::ImageViewCreateInfo::builder()
                    .image(image)
                    .view_type(vk::ImageViewType::TYPE_2D)
                    .format(surface_format.format)
                    .components(vk::ComponentMapping {
                        r: vk::ComponentSwizzle::IDENTITY,
                        g: vk::ComponentSwizzle::IDENTITY,
                        b: vk::ComponentSwizzle::IDENTITY,
                        a: vk::ComponentSwizzle::IDENTITY,
                    })
                    .subresource_range(vk::ImageSubresourceRange {
                        aspect_mask: vk::ImageAspectFlags::COLOR,
                        base_mip_level: 0,
                        level_count: 1,
                        base_array_layer: 0,
                        layer_count: 1,
                    });

                unsafe {
                    device
                        .device
                        .create_image_view(&create_info, None)
                        .context("Failed to create image view")
                }
            })
            .collect();

        Ok(Self {
            swapchain,
            swapchain_loader,
            image_views: image_views?,
            format: surface_format.format,
            extent,
            device,
        })
    }

    /// Acquire next image for rendering
    pub fn acquire_next_image(
        &self,
        timeout: u64,
        semaphore: vk::Semaphore,
    ) -> Result<(u32, bool)> {
        unsafe {
            self.swapchain_loader.acquire_next_image(
                self.swapchain,
                timeout,
                semaphore,
                vk::Fence::null(),
            )
        }
        .context("Failed to acquire swapchain image")
    }

    /// Present rendered image to screen
    pub fn present(
        &self,
        queue: vk::Queue,
        image_index: u32,
        wait_semaphores: &[vk::Semaphore],
    ) -> Result<bool> {
        let swapchains = [self.swapchain];
        let image_indices = [image_index];

        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        unsafe { self.swapchain_loader.queue_present(queue, &present_info) }
            .context("Failed to present swapchain image")
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        unsafe {
            for &view in &self.image_views {
                self.device.device.destroy_image_view(view, None);
            }
            self.swapchain_loader.destroy_swapchain(self.swapchain, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn format(format: vk::Format, color_space: vk::ColorSpaceKHR) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space,
        }
    }

    fn capabilities_with_current_extent(width: u32, height: u32) -> vk::SurfaceCapabilitiesKHR {
        let mut capabilities = vk::SurfaceCapabilitiesKHR::default();
        capabilities.current_extent = vk::Extent2D { width, height };
        capabilities
    }

    #[test]
    fn surface_format_prefers_bgra_unorm_with_srgb_color_space() {
        let formats = [
            format(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            format(vk::Format::B8G8R8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
        ];

        let chosen = choose_surface_format(&formats).unwrap();
        assert_eq!(chosen.format, vk::Format::B8G8R8A8_UNORM);
        assert_eq!(chosen.color_space, vk::ColorSpaceKHR::SRGB_NONLINEAR);
    }

    #[test]
    fn surface_format_falls_back_to_first_entry() {
        let formats = [
            format(vk::Format::R8G8B8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            format(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
        ];

        let chosen = choose_surface_format(&formats).unwrap();
        assert_eq!(chosen.format, vk::Format::R8G8B8A8_SRGB);
    }

    #[test]
    fn surface_format_choice_is_idempotent() {
        let formats = [format(
            vk::Format::R8G8B8A8_SRGB,
            vk::ColorSpaceKHR::SRGB_NONLINEAR,
        )];

        let first = choose_surface_format(&formats).unwrap();
        let again = choose_surface_format(&[first]).unwrap();
        assert_eq!(again.format, first.format);
        assert_eq!(again.color_space, first.color_space);
    }

    #[test]
    fn surface_format_is_none_for_empty_list() {
        assert!(choose_surface_format(&[]).is_none());
    }

    #[test]
    fn mailbox_wins_regardless_of_list_order() {
        let modes = [vk::PresentModeKHR::IMMEDIATE, vk::PresentModeKHR::MAILBOX];
        assert_eq!(choose_present_mode(&modes), vk::PresentModeKHR::MAILBOX);

        let reversed = [vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::IMMEDIATE];
        assert_eq!(choose_present_mode(&reversed), vk::PresentModeKHR::MAILBOX);
    }

    #[test]
    fn immediate_overrides_the_fifo_default() {
        let modes = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::IMMEDIATE];
        assert_eq!(choose_present_mode(&modes), vk::PresentModeKHR::IMMEDIATE);
    }

    #[test]
    fn fifo_is_the_default_present_mode() {
        let modes = [vk::PresentModeKHR::FIFO_RELAXED];
        assert_eq!(choose_present_mode(&modes), vk::PresentModeKHR::FIFO);

        assert_eq!(choose_present_mode(&[]), vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn defined_current_extent_is_used_verbatim() {
        let capabilities = capabilities_with_current_extent(1920, 1080);

        let extent = choose_extent(&capabilities, 800, 600);
        assert_eq!(extent.width, 1920);
        assert_eq!(extent.height, 1080);
    }

    #[test]
    fn undefined_extent_returns_requested_size_when_range_straddles_it() {
        let mut capabilities = capabilities_with_current_extent(u32::MAX, u32::MAX);
        capabilities.min_image_extent = vk::Extent2D {
            width: 1,
            height: 1,
        };
        capabilities.max_image_extent = vk::Extent2D {
            width: 4096,
            height: 4096,
        };

        let extent = choose_extent(&capabilities, 800, 600);
        assert_eq!(extent.width, 800);
        assert_eq!(extent.height, 600);
    }

    #[test]
    fn undefined_extent_clamps_each_dimension_independently() {
        let mut capabilities = capabilities_with_current_extent(u32::MAX, u32::MAX);
        capabilities.min_image_extent = vk::Extent2D {
            width: 1024,
            height: 100,
        };
        capabilities.max_image_extent = vk::Extent2D {
            width: 2048,
            height: 400,
        };

        let extent = choose_extent(&capabilities, 800, 600);
        assert_eq!(extent.width, 1024);
        assert_eq!(extent.height, 400);
    }
}
