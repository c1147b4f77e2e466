// Backend module - Vulkan abstraction layer
//
// Thin wrapper around ash, split along the tutorial's setup stages

pub mod device;
pub mod pipeline;
pub mod shader;
pub mod swapchain;
pub mod sync;

pub use device::VulkanDevice;
pub use swapchain::Swapchain;
