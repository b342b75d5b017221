// Shader module loading
//
// Shaders arrive as pre-compiled SPIR-V files. They are treated as opaque
// blobs: read by path, checked for word alignment, wrapped in a module.

use ash::vk;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use super::VulkanDevice;
use crate::config::ShaderConfig;
use crate::error::{Cause, RenderError};

/// Both pipeline stages, read from disk but not yet handed to the driver
pub struct ShaderBinaries {
    pub vertex: Vec<u32>,
    pub fragment: Vec<u32>,
}

impl ShaderBinaries {
    pub fn load(config: &ShaderConfig) -> Result<Self, RenderError> {
        Ok(Self {
            vertex: load_spirv(&config.vertex)?,
            fragment: load_spirv(&config.fragment)?,
        })
    }
}

/// Read a SPIR-V binary into 32-bit words
pub fn load_spirv(path: &Path) -> Result<Vec<u32>, RenderError> {
    let file = File::open(path).map_err(|e| RenderError::pipeline_build("read shader")(Cause::io(path, e)))?;

    // read_spv rejects lengths that are not a multiple of 4 and fixes endianness
    let words = ash::util::read_spv(&mut BufReader::new(file))
        .map_err(|e| RenderError::pipeline_build("read shader")(Cause::io(path, e)))?;

    log::debug!("Loaded {} ({} bytes)", path.display(), words.len() * 4);
    Ok(words)
}

/// Create a shader module from SPIR-V words
pub fn create_shader_module(device: &VulkanDevice, code: &[u32]) -> Result<vk::ShaderModule, RenderError> {
    let create_info = vk::ShaderModuleCreateInfo::builder().code(code);

    unsafe { device.device.create_shader_module(&create_info, None) }
        .map_err(RenderError::pipeline_build("vkCreateShaderModule"))
}
