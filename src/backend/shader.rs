// Shader module loading
//
// Vulkan consumes SPIR-V words. The overlay ships baked words (see build.rs and
// assets.rs); this module turns them into shader modules.

use anyhow::{Context, Result};
use ash::vk;
use std::io::Cursor;

use crate::error::{OverlayError, VkResultExt};

/// SPIR-V magic number, first word of every module
const SPIRV_MAGIC: u32 = 0x0723_0203;

/// Decode SPIR-V bytes into properly aligned words.
///
/// An empty slice means the stage was never baked and is reported as
/// `MissingShader`.
pub fn words_from_bytes(stage: &'static str, bytes: &[u8]) -> Result<Vec<u32>> {
    if bytes.is_empty() {
        return Err(OverlayError::MissingShader { stage }.into());
    }

    let words = ash::util::read_spv(&mut Cursor::new(bytes))
        .with_context(|| format!("Invalid SPIR-V for the {} shader", stage))?;

    if words.first() != Some(&SPIRV_MAGIC) {
        anyhow::bail!("{} shader does not start with the SPIR-V magic number", stage);
    }

    Ok(words)
}

/// Create a shader module from SPIR-V words
pub fn create_shader_module(device: &ash::Device, code: &[u32]) -> Result<vk::ShaderModule> {
    let create_info = vk::ShaderModuleCreateInfo::builder().code(code);

    unsafe { device.create_shader_module(&create_info, None) }
        .resource("vkCreateShaderModule")
        .with_context(|| format!("Failed to create shader module ({} words)", code.len()))
}
