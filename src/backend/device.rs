// Vulkan Device - Core GPU interface
//
// Responsibilities:
// - Instance creation with validation layers
// - Surface creation through ash-window
// - Physical device scoring and selection
// - Logical device + queue creation

use anyhow::{Context, Result};
use ash::{vk, Entry};
use raw_window_handle::{HasRawDisplayHandle, HasRawWindowHandle};
use std::collections::BTreeSet;
use std::ffi::{CStr, CString};
use std::sync::Arc;
use winit::window::Window;

use super::swapchain::query_swapchain_support;

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Device extensions required for presentation
const DEVICE_EXTENSIONS: [&CStr; 1] = [ash::extensions::khr::Swapchain::name()];

/// Queue family indices discovered for a physical device.
///
/// Built fresh per device query and discarded once the logical device exists.
#[derive(Debug, Default, Clone, Copy)]
pub struct QueueFamilyIndices {
    pub graphics_family: Option<u32>,
    pub present_family: Option<u32>,
}

impl QueueFamilyIndices {
    pub fn is_complete(&self) -> bool {
        self.graphics_family.is_some() && self.present_family.is_some()
    }
}

/// Vulkan device wrapper with automatic cleanup
pub struct VulkanDevice {
    // Vulkan handles (order matters for drop!)
    pub device: ash::Device,
    pub physical_device: vk::PhysicalDevice,
    pub surface: vk::SurfaceKHR,
    pub surface_loader: ash::extensions::khr::Surface,
    pub instance: ash::Instance,
    _entry: Entry,

    // Queue handles
    pub graphics_queue: vk::Queue,
    pub present_queue: vk::Queue,
    pub graphics_queue_family: u32,
    pub present_queue_family: u32,

    // Debug utils (if validation enabled)
    debug_utils: Option<(ash::extensions::ext::DebugUtils, vk::DebugUtilsMessengerEXT)>,
}

impl VulkanDevice {
    /// Create the instance, surface, and logical device for `window`.
    ///
    /// # Arguments
    /// * `window` - window to present to; queue family discovery needs its surface
    /// * `app_name` - application name reported to the driver
    /// * `enable_validation` - enable Vulkan validation layers (debug only)
    pub fn new(window: &Window, app_name: &str, enable_validation: bool) -> Result<Arc<Self>> {
        log::info!("Creating Vulkan device: {}", app_name);

        let display_handle = window.raw_display_handle();
        let window_handle = window.raw_window_handle();

        // Step 1: Load Vulkan library
        let entry = unsafe { Entry::load() }
            .context("Failed to load Vulkan library. Is Vulkan installed?")?;

        // Step 2: Availability checks, before anything is created
        let mut extensions = ash_window::enumerate_required_extensions(display_handle)?.to_vec();
        if enable_validation {
            extensions.push(ash::extensions::ext::DebugUtils::name().as_ptr());
        }

        if !Self::check_required_extensions(&entry, &extensions)? {
            anyhow::bail!("Required instance extensions are not available");
        }

        if enable_validation && !Self::check_validation_layer_support(&entry)? {
            anyhow::bail!("Validation layers requested, but not available");
        }

        // Step 3: Create instance
        let instance = Self::create_instance(&entry, app_name, &extensions, enable_validation)?;

        // Step 4: Setup debug messenger if validation enabled
        let debug_utils = if enable_validation {
            Some(Self::setup_debug_messenger(&entry, &instance)?)
        } else {
            None
        };

        // Step 5: Create surface (needed before device selection)
        let surface_loader = ash::extensions::khr::Surface::new(&entry, &instance);
        let surface = unsafe {
            ash_window::create_surface(&entry, &instance, display_handle, window_handle, None)
        }
        .context("Failed to create window surface")?;

        // Step 6: Pick physical device (GPU)
        let physical_device = Self::pick_physical_device(&instance, &surface_loader, surface)?;

        let indices = find_queue_families(&instance, physical_device, &surface_loader, surface)?;
        let graphics_queue_family = indices
            .graphics_family
            .context("Selected device has no graphics queue family")?;
        let present_queue_family = indices
            .present_family
            .context("Selected device has no present queue family")?;

        // Step 7: Create logical device
        let device = Self::create_logical_device(
            &instance,
            physical_device,
            graphics_queue_family,
            present_queue_family,
        )?;

        let graphics_queue = unsafe { device.get_device_queue(graphics_queue_family, 0) };
        let present_queue = unsafe { device.get_device_queue(present_queue_family, 0) };

        let properties = unsafe { instance.get_physical_device_properties(physical_device) };
        log::info!(
            "Selected GPU: {}",
            unsafe { CStr::from_ptr(properties.device_name.as_ptr()) }.to_string_lossy()
        );
        log::info!(
            "API Version: {}.{}.{}",
            vk::api_version_major(properties.api_version),
            vk::api_version_minor(properties.api_version),
            vk::api_version_patch(properties.api_version)
        );

        Ok(Arc::new(Self {
            device,
            physical_device,
            surface,
            surface_loader,
            instance,
            _entry: entry,
            graphics_queue,
            present_queue,
            graphics_queue_family,
            present_queue_family,
            debug_utils,
        }))
    }

    /// Check that every extension in `required` is reported by the driver.
    fn check_required_extensions(
        entry: &Entry,
        required: &[*const std::os::raw::c_char],
    ) -> Result<bool> {
        let available = entry
            .enumerate_instance_extension_properties(None)
            .context("Failed to enumerate instance extensions")?;

        log::debug!("Available instance extensions ({}):", available.len());
        for extension in &available {
            log::debug!(
                "\t{}",
                unsafe { CStr::from_ptr(extension.extension_name.as_ptr()) }.to_string_lossy()
            );
        }

        for &required_ptr in required {
            let required_name = unsafe { CStr::from_ptr(required_ptr) };
            let found = available.iter().any(|extension| {
                (unsafe { CStr::from_ptr(extension.extension_name.as_ptr()) }) == required_name
            });

            if !found {
                log::error!(
                    "Missing instance extension: {}",
                    required_name.to_string_lossy()
                );
                return Ok(false);
            }
        }

        Ok(true)
    }

    fn check_validation_layer_support(entry: &Entry) -> Result<bool> {
        let available = entry
            .enumerate_instance_layer_properties()
            .context("Failed to enumerate instance layers")?;

        let found = available.iter().any(|layer| {
            (unsafe { CStr::from_ptr(layer.layer_name.as_ptr()) }) == VALIDATION_LAYER
        });

        Ok(found)
    }

    fn create_instance(
        entry: &Entry,
        app_name: &str,
        extensions: &[*const std::os::raw::c_char],
        enable_validation: bool,
    ) -> Result<ash::Instance> {
        let app_name_cstr = CString::new(app_name)?;
        let engine_name = c"No Engine";

        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name_cstr)
            .application_version(vk::make_api_version(0, 1, 0, 0))
            .engine_name(engine_name)
            .engine_version(vk::make_api_version(0, 1, 0, 0))
            .api_version(vk::API_VERSION_1_0);

        let layer_names = if enable_validation {
            vec![VALIDATION_LAYER.as_ptr()]
        } else {
            vec![]
        };

        let create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(extensions)
            .enabled_layer_names(&layer_names);

        let instance = unsafe { entry.create_instance(&create_info, None) }
            .context("Failed to create Vulkan instance")?;

        Ok(instance)
    }

    fn setup_debug_messenger(
        entry: &Entry,
        instance: &ash::Instance,
    ) -> Result<(ash::extensions::ext::DebugUtils, vk::DebugUtilsMessengerEXT)> {
        let debug_utils = ash::extensions::ext::DebugUtils::new(entry, instance);

        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
                    | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_callback));

        let messenger =
            unsafe { debug_utils.create_debug_utils_messenger(&create_info, None) }
                .context("Failed to set up debug messenger")?;

        Ok((debug_utils, messenger))
    }

    fn pick_physical_device(
        instance: &ash::Instance,
        surface_loader: &ash::extensions::khr::Surface,
        surface: vk::SurfaceKHR,
    ) -> Result<vk::PhysicalDevice> {
        let devices = unsafe { instance.enumerate_physical_devices() }
            .context("Failed to enumerate physical devices")?;

        let mut candidates = Vec::with_capacity(devices.len());
        for device in devices {
            let score = rate_device_suitability(instance, device, surface_loader, surface)?;

            let properties = unsafe { instance.get_physical_device_properties(device) };
            log::debug!(
                "Candidate GPU {} scored {}",
                unsafe { CStr::from_ptr(properties.device_name.as_ptr()) }.to_string_lossy(),
                score
            );

            candidates.push((score, device));
        }

        let (_, device) = pick_best_candidate(candidates)?;
        Ok(device)
    }

    fn create_logical_device(
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
        graphics_queue_family: u32,
        present_queue_family: u32,
    ) -> Result<ash::Device> {
        // One queue per unique family; graphics and present may coincide
        let unique_families = BTreeSet::from([graphics_queue_family, present_queue_family]);

        let queue_priorities = [1.0f32];
        let queue_create_infos: Vec<_> = unique_families
            .into_iter()
            .map(|family| {
                vk::DeviceQueueCreateInfo::builder()
                    .queue_family_index(family)
                    .queue_priorities(&queue_priorities)
                    .build()
            })
            .collect();

        let extensions: Vec<_> = DEVICE_EXTENSIONS
            .iter()
            .map(|extension| extension.as_ptr())
            .collect();

        let features = vk::PhysicalDeviceFeatures::default();

        let create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&extensions)
            .enabled_features(&features);

        let device = unsafe { instance.create_device(physical_device, &create_info, None) }
            .context("Failed to create logical device")?;

        Ok(device)
    }

    /// Wait for device to be idle (e.g., before cleanup)
    pub fn wait_idle(&self) -> Result<()> {
        unsafe { self.device.device_wait_idle() }?;
        Ok(())
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        log::info!("Destroying Vulkan device...");

        let _ = self.wait_idle();

        // Cleanup in reverse order
        unsafe {
            self.device.destroy_device(None);

            if let Some((debug_utils, messenger)) = self.debug_utils.take() {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }

            self.surface_loader.destroy_surface(self.surface, None);
            self.instance.destroy_instance(None);
        }
    }
}

/// Find graphics and presentation queue families for `device`.
///
/// Presentation support is a per-family property of the surface, so this
/// query needs the surface handle.
pub fn find_queue_families(
    instance: &ash::Instance,
    device: vk::PhysicalDevice,
    surface_loader: &ash::extensions::khr::Surface,
    surface: vk::SurfaceKHR,
) -> Result<QueueFamilyIndices> {
    let families = unsafe { instance.get_physical_device_queue_family_properties(device) };

    let mut indices = QueueFamilyIndices::default();
    for (index, family) in families.iter().enumerate() {
        let index = index as u32;

        if family.queue_count > 0 && family.queue_flags.contains(vk::QueueFlags::GRAPHICS) {
            indices.graphics_family = Some(index);
        }

        let present_support = unsafe {
            surface_loader.get_physical_device_surface_support(device, index, surface)?
        };
        if family.queue_count > 0 && present_support {
            indices.present_family = Some(index);
        }

        if indices.is_complete() {
            break;
        }
    }

    Ok(indices)
}

fn check_device_extension_support(
    instance: &ash::Instance,
    device: vk::PhysicalDevice,
) -> Result<bool> {
    let available = unsafe { instance.enumerate_device_extension_properties(device) }
        .context("Failed to enumerate device extensions")?;

    let supported = DEVICE_EXTENSIONS.iter().all(|required| {
        available.iter().any(|extension| {
            (unsafe { CStr::from_ptr(extension.extension_name.as_ptr()) }) == *required
        })
    });

    Ok(supported)
}

/// Score a physical device; 0 means unusable.
///
/// Discrete GPUs get a large bonus and the maximum 2D image dimension serves
/// as a headroom proxy. Any missing hard requirement forces the score to 0,
/// bonuses included.
fn score_device(
    properties: &vk::PhysicalDeviceProperties,
    features: &vk::PhysicalDeviceFeatures,
    queues: QueueFamilyIndices,
    extensions_supported: bool,
    swapchain_adequate: bool,
) -> u32 {
    let mut score = 0;

    // Discrete GPUs have a significant performance advantage
    if properties.device_type == vk::PhysicalDeviceType::DISCRETE_GPU {
        score += 1000;
    }

    // Maximum possible size of textures affects graphics quality
    score += properties.limits.max_image_dimension2_d;

    if features.geometry_shader != vk::TRUE
        || !queues.is_complete()
        || !extensions_supported
        || !swapchain_adequate
    {
        return 0;
    }

    score
}

/// Run every suitability query for `device` and combine them into a score.
fn rate_device_suitability(
    instance: &ash::Instance,
    device: vk::PhysicalDevice,
    surface_loader: &ash::extensions::khr::Surface,
    surface: vk::SurfaceKHR,
) -> Result<u32> {
    let properties = unsafe { instance.get_physical_device_properties(device) };
    let features = unsafe { instance.get_physical_device_features(device) };

    let queues = find_queue_families(instance, device, surface_loader, surface)?;
    let extensions_supported = check_device_extension_support(instance, device)?;

    // The swapchain query is only meaningful once the extension is known to exist
    let swapchain_adequate = if extensions_supported {
        let support = query_swapchain_support(device, surface_loader, surface)?;
        !support.formats.is_empty() && !support.present_modes.is_empty()
    } else {
        false
    };

    Ok(score_device(
        &properties,
        &features,
        queues,
        extensions_supported,
        swapchain_adequate,
    ))
}

/// Take the highest-scoring candidate; ties go to the last maximal entry.
fn pick_best_candidate(
    candidates: Vec<(u32, vk::PhysicalDevice)>,
) -> Result<(u32, vk::PhysicalDevice)> {
    let (best_score, best_device) = candidates
        .into_iter()
        .max_by_key(|&(score, _)| score)
        .context("No Vulkan-capable GPU found")?;

    if best_score == 0 {
        anyhow::bail!("No suitable GPU found");
    }

    Ok((best_score, best_device))
}

// Debug callback for validation layers
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _p_user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    let message = CStr::from_ptr((*p_callback_data).p_message);

    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => {
            log::error!("[Vulkan] {}", message.to_string_lossy());
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => {
            log::warn!("[Vulkan] {}", message.to_string_lossy());
        }
        _ => {
            log::debug!("[Vulkan] {}", message.to_string_lossy());
        }
    }

    vk::FALSE
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    fn discrete_properties() -> vk::PhysicalDeviceProperties {
        let mut properties = vk::PhysicalDeviceProperties::default();
        properties.device_type = vk::PhysicalDeviceType::DISCRETE_GPU;
        properties.limits.max_image_dimension2_d = 16384;
        properties
    }

    fn integrated_properties() -> vk::PhysicalDeviceProperties {
        let mut properties = vk::PhysicalDeviceProperties::default();
        properties.device_type = vk::PhysicalDeviceType::INTEGRATED_GPU;
        properties.limits.max_image_dimension2_d = 4096;
        properties
    }

    fn geometry_features() -> vk::PhysicalDeviceFeatures {
        vk::PhysicalDeviceFeatures {
            geometry_shader: vk::TRUE,
            ..Default::default()
        }
    }

    fn complete_queues() -> QueueFamilyIndices {
        QueueFamilyIndices {
            graphics_family: Some(0),
            present_family: Some(0),
        }
    }

    #[test]
    fn indices_complete_only_with_both_families() {
        let mut indices = QueueFamilyIndices::default();
        assert!(!indices.is_complete());

        indices.graphics_family = Some(0);
        assert!(!indices.is_complete());

        indices.present_family = Some(1);
        assert!(indices.is_complete());
    }

    #[test]
    fn missing_geometry_shader_zeroes_the_score() {
        let no_geometry = vk::PhysicalDeviceFeatures::default();
        let score = score_device(
            &discrete_properties(),
            &no_geometry,
            complete_queues(),
            true,
            true,
        );
        assert_eq!(score, 0);
    }

    #[test]
    fn incomplete_queue_families_zero_the_score() {
        let graphics_only = QueueFamilyIndices {
            graphics_family: Some(0),
            present_family: None,
        };
        let score = score_device(
            &discrete_properties(),
            &geometry_features(),
            graphics_only,
            true,
            true,
        );
        assert_eq!(score, 0);
    }

    #[test]
    fn unsupported_extensions_zero_the_score() {
        let score = score_device(
            &discrete_properties(),
            &geometry_features(),
            complete_queues(),
            false,
            false,
        );
        assert_eq!(score, 0);
    }

    #[test]
    fn inadequate_swapchain_zeroes_the_score() {
        let score = score_device(
            &discrete_properties(),
            &geometry_features(),
            complete_queues(),
            true,
            false,
        );
        assert_eq!(score, 0);
    }

    #[test]
    fn capable_discrete_gpu_scores_at_least_1000() {
        let score = score_device(
            &discrete_properties(),
            &geometry_features(),
            complete_queues(),
            true,
            true,
        );
        assert!(score >= 1000);
    }

    #[test]
    fn integrated_gpu_scores_by_image_dimension_alone() {
        let score = score_device(
            &integrated_properties(),
            &geometry_features(),
            complete_queues(),
            true,
            true,
        );
        assert_eq!(score, 4096);
    }

    #[test]
    fn selection_takes_the_highest_score() {
        let integrated = vk::PhysicalDevice::from_raw(1);
        let discrete = vk::PhysicalDevice::from_raw(2);

        let integrated_score = score_device(
            &integrated_properties(),
            &geometry_features(),
            complete_queues(),
            true,
            true,
        );
        let discrete_score = score_device(
            &discrete_properties(),
            &geometry_features(),
            complete_queues(),
            true,
            true,
        );

        let (score, device) =
            pick_best_candidate(vec![(integrated_score, integrated), (discrete_score, discrete)])
                .unwrap();
        assert_eq!(device, discrete);
        assert!(score >= 1000);
    }

    #[test]
    fn selection_fails_on_empty_device_list() {
        assert!(pick_best_candidate(Vec::new()).is_err());
    }

    #[test]
    fn selection_fails_when_every_candidate_is_unusable() {
        let candidates = vec![
            (0, vk::PhysicalDevice::from_raw(1)),
            (0, vk::PhysicalDevice::from_raw(2)),
        ];
        assert!(pick_best_candidate(candidates).is_err());
    }
}
