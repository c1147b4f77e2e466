// Shader module loading and management
//
// Vulkan consumes SPIR-V bytecode. The build script compiles the GLSL
// sources; this module reads the binaries off disk and wraps them in
// shader modules.

use anyhow::{Context, Result};
use ash::util::read_spv;
use ash::vk;
use std::fs::File;
use std::path::Path;
use super::VulkanDevice;

/// Read a SPIR-V binary from `path` and create a shader module from it.
///
/// A missing or malformed file is fatal to pipeline creation.
pub fn load_shader_module(device: &VulkanDevice, path: &Path) -> Result<vk::ShaderModule> {
    let mut file =
        File::open(path).with_context(|| format!("Failed to open shader binary {:?}", path))?;

    // read_spv checks alignment and converts the byte stream to u32 words
    let code =
        read_spv(&mut file).with_context(|| format!("Failed to read SPIR-V from {:?}", path))?;

    let create_info = vk::ShaderModuleCreateInfo::builder().code(&code);

    unsafe {
        device
            .device
            .create_shader_module(&create_info, None)
            .context("Failed to create shader module")
    }
}
