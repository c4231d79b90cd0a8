// Shader module loading and management
//
// Vulkan uses SPIR-V bytecode for shaders. The build script compiles the
// GLSL sources; here the binaries are read at runtime, checked and turned
// into shader modules.

use ash::vk;
use std::fs::File;
use std::io::{Cursor, Read};
use std::path::Path;
use std::sync::Arc;

use super::gpu::GpuDevice;
use crate::error::{RenderError, Result, VkResultExt};

pub const SPIRV_MAGIC: u32 = 0x0723_0203;

/// Read a whole file. `None` if it cannot be opened; a short read is only
/// logged.
pub fn read_binary_file(path: &Path) -> Option<Vec<u8>> {
    let mut file = match File::open(path) {
        Ok(file) => file,
        Err(err) => {
            log::warn!("Cannot open file {}: {}", path.display(), err);
            return None;
        }
    };

    let expected = file.metadata().map(|m| m.len() as usize).unwrap_or(0);
    let mut bytes = Vec::with_capacity(expected);
    if let Err(err) = file.read_to_end(&mut bytes) {
        log::warn!("Error while reading {}: {}", path.display(), err);
    }

    if bytes.len() < expected {
        log::warn!(
            "Read {} bytes of {} from {}",
            bytes.len(),
            expected,
            path.display()
        );
    }
    Some(bytes)
}

/// Turn raw bytes into SPIR-V words, rejecting anything that is obviously
/// not a SPIR-V module.
pub fn decode_spirv(origin: &str, bytes: &[u8]) -> Result<Vec<u32>> {
    let invalid = |reason: String| RenderError::InvalidShader {
        origin: origin.to_string(),
        reason,
    };

    if bytes.is_empty() {
        return Err(invalid("file is empty".into()));
    }
    if bytes.len() % 4 != 0 {
        return Err(invalid(format!(
            "length {} is not a multiple of 4",
            bytes.len()
        )));
    }
    let magic = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    if magic != SPIRV_MAGIC {
        return Err(invalid(format!("bad magic number {:#010x}", magic)));
    }

    // Copies into aligned words
    ash::util::read_spv(&mut Cursor::new(bytes)).map_err(|e| invalid(e.to_string()))
}

/// Read and decode a compiled shader.
pub fn load_spirv(path: &Path) -> Result<Vec<u32>> {
    let bytes = read_binary_file(path).ok_or_else(|| RenderError::ShaderMissing {
        path: path.to_path_buf(),
    })?;
    log::debug!("Loaded {} bytes of SPIR-V from {}", bytes.len(), path.display());
    decode_spirv(&path.display().to_string(), &bytes)
}

/// Shader module, destroyed on drop.
pub struct ShaderModule<D: GpuDevice> {
    pub handle: vk::ShaderModule,
    device: Arc<D>,
}

impl<D: GpuDevice> ShaderModule<D> {
    pub fn new(device: Arc<D>, code: &[u32]) -> Result<Self> {
        let handle = device
            .create_shader_module(code)
            .during("create shader module")?;
        Ok(Self { handle, device })
    }
}

impl<D: GpuDevice> Drop for ShaderModule<D> {
    fn drop(&mut self) {
        self.device.destroy_shader_module(self.handle);
    }
}
