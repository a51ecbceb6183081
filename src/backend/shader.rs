// Shader module loading and management
//
// Vulkan consumes SPIR-V bytecode. Precompiled .spv files are read as raw
// bytes; in debug builds a GLSL source path is compiled on the fly by
// invoking glslc, the same tool build.rs uses ahead of time.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;

use ash::vk;

use super::error::{RenderResult, RendererError};
use super::VulkanDevice;

/// Read SPIR-V for the given shader path.
///
/// No validation beyond "opens and is non-empty"; the bytes go straight to
/// module creation.
pub fn load_shader_code(path: &Path) -> RenderResult<Vec<u8>> {
    let binary_path = if path.extension().map_or(false, |ext| ext == "spv") {
        path.to_path_buf()
    } else if cfg!(debug_assertions) {
        compile_with_glslc(path)?
    } else {
        return Err(RendererError::ShaderLoadFailed {
            path: path.to_path_buf(),
            reason: "release builds expect a precompiled .spv file".to_string(),
        });
    };

    let code = std::fs::read(&binary_path).map_err(|e| RendererError::ShaderLoadFailed {
        path: binary_path.clone(),
        reason: e.to_string(),
    })?;
    if code.is_empty() {
        return Err(RendererError::ShaderLoadFailed {
            path: binary_path,
            reason: "shader binary is empty".to_string(),
        });
    }
    Ok(code)
}

// Compile shader source using glslc (part of the Vulkan SDK)
fn compile_with_glslc(source: &Path) -> RenderResult<PathBuf> {
    let file_name = source
        .file_name()
        .ok_or_else(|| RendererError::ShaderLoadFailed {
            path: source.to_path_buf(),
            reason: "not a file path".to_string(),
        })?;
    let mut output = std::env::temp_dir().join(file_name);
    output.set_extension(format!(
        "{}.spv",
        source.extension().unwrap_or_default().to_string_lossy()
    ));

    log::debug!("Compiling shader {:?} -> {:?}", source, output);
    let status = Command::new("glslc")
        .arg(source)
        .arg("-o")
        .arg(&output)
        .status()
        .map_err(|e| RendererError::ShaderLoadFailed {
            path: source.to_path_buf(),
            reason: format!("glslc not found ({}). Install the Vulkan SDK.", e),
        })?;

    if !status.success() {
        return Err(RendererError::ShaderLoadFailed {
            path: source.to_path_buf(),
            reason: format!("glslc exited with {:?}", status.code()),
        });
    }
    Ok(output)
}

/// Shader module handle with RAII release.
pub struct ShaderModule {
    pub module: vk::ShaderModule,
    device: Arc<VulkanDevice>,
}

impl ShaderModule {
    /// Load (or compile, in debug builds) the shader at `path` and wrap it
    /// in a module.
    pub fn from_path(device: Arc<VulkanDevice>, path: &Path) -> RenderResult<Self> {
        let code = load_shader_code(path)?;

        // SPIR-V is consumed as 4-byte words; read_spv handles alignment
        let words = ash::util::read_spv(&mut std::io::Cursor::new(&code)).map_err(|e| {
            RendererError::ShaderLoadFailed {
                path: path.to_path_buf(),
                reason: e.to_string(),
            }
        })?;

        let create_info = vk::ShaderModuleCreateInfo::builder().code(&words);
        let module = unsafe { device.device.create_shader_module(&create_info, None) }?;

        Ok(Self { module, device })
    }
}

impl Drop for ShaderModule {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_shader_module(self.module, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_fails() {
        let err = load_shader_code(Path::new("/nonexistent/shader.spv")).unwrap_err();
        assert!(matches!(err, RendererError::ShaderLoadFailed { .. }));
    }

    #[test]
    fn empty_binary_fails() {
        let path = std::env::temp_dir().join("camview_empty_shader_test.spv");
        std::fs::write(&path, []).unwrap();
        let err = load_shader_code(&path).unwrap_err();
        assert!(matches!(err, RendererError::ShaderLoadFailed { .. }));
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn nonzero_binary_loads_raw() {
        let path = std::env::temp_dir().join("camview_raw_shader_test.spv");
        std::fs::write(&path, [0x03, 0x02, 0x23, 0x07]).unwrap();
        let code = load_shader_code(&path).unwrap();
        assert_eq!(code.len(), 4);
        let _ = std::fs::remove_file(&path);
    }
}
