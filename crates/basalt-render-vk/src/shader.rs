// SPDX-License-Identifier: CEPL-1.0
use std::collections::HashMap;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ash::vk;
use thiserror::Error;
use tracing::debug;

use crate::device::Device;
use crate::error::is_out_of_memory;

#[derive(Debug, Error)]
pub enum ShaderError {
    #[error("shader file {} not found", path.display())]
    FileNotFound {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("reading shader file {} failed", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("shader `{key}` is not valid SPIR-V: {reason}")]
    InvalidBinary { key: String, reason: String },

    #[error("out of memory creating shader `{key}`: {result}")]
    OutOfMemory { key: String, result: vk::Result },

    #[error("shader `{0}` was never loaded")]
    NotLoaded(String),
}

const SPIRV_MAGIC: u32 = 0x0723_0203;

/// Checks length and magic, returning the words. `read_spv` also accepts
/// the byte-swapped magic.
pub fn decode_spirv(key: &str, bytes: &[u8]) -> Result<Vec<u32>, ShaderError> {
    let invalid = |reason: String| ShaderError::InvalidBinary {
        key: key.to_owned(),
        reason,
    };
    if bytes.is_empty() {
        return Err(invalid("empty".into()));
    }
    let words = ash::util::read_spv(&mut Cursor::new(bytes)).map_err(|e| invalid(e.to_string()))?;
    match words.first() {
        Some(&SPIRV_MAGIC) => Ok(words),
        Some(&other) => Err(invalid(format!("bad magic 0x{other:08x}"))),
        None => Err(invalid("no words".into())),
    }
}

fn read_shader_file(path: &Path) -> Result<Vec<u8>, ShaderError> {
    std::fs::read(path).map_err(|source| {
        let path = path.to_owned();
        if source.kind() == std::io::ErrorKind::NotFound {
            ShaderError::FileNotFound { path, source }
        } else {
            ShaderError::Io { path, source }
        }
    })
}

/// Compiled shader modules by logical key, destroyed with the registry.
pub struct ShaderRegistry {
    modules: HashMap<String, vk::ShaderModule>,
    device: Arc<Device>,
}

impl ShaderRegistry {
    pub fn new(device: &Arc<Device>) -> Self {
        Self {
            modules: HashMap::new(),
            device: Arc::clone(device),
        }
    }

    pub fn load_bytes(&mut self, key: &str, bytes: &[u8]) -> Result<(), ShaderError> {
        let words = decode_spirv(key, bytes)?;
        let info = vk::ShaderModuleCreateInfo {
            s_type: vk::StructureType::SHADER_MODULE_CREATE_INFO,
            code_size: words.len() * 4,
            p_code: words.as_ptr(),
            ..Default::default()
        };
        let module = unsafe { self.device.raw().create_shader_module(&info, None) }.map_err(
            |result| {
                if is_out_of_memory(result) {
                    ShaderError::OutOfMemory {
                        key: key.to_owned(),
                        result,
                    }
                } else {
                    ShaderError::InvalidBinary {
                        key: key.to_owned(),
                        reason: result.to_string(),
                    }
                }
            },
        )?;

        if let Some(old) = self.modules.insert(key.to_owned(), module) {
            unsafe { self.device.raw().destroy_shader_module(old, None) };
        }
        debug!(key, words = words.len(), "shader module loaded");
        Ok(())
    }

    pub fn load_file(&mut self, key: &str, path: impl AsRef<Path>) -> Result<(), ShaderError> {
        let bytes = read_shader_file(path.as_ref())?;
        self.load_bytes(key, &bytes)
    }

    pub fn get(&self, key: &str) -> Result<vk::ShaderModule, ShaderError> {
        self.modules
            .get(key)
            .copied()
            .ok_or_else(|| ShaderError::NotLoaded(key.to_owned()))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.modules.contains_key(key)
    }
}

impl Drop for ShaderRegistry {
    fn drop(&mut self) {
        for (_, module) in self.modules.drain() {
            unsafe { self.device.raw().destroy_shader_module(module, None) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words_to_bytes(words: &[u32]) -> Vec<u8> {
        words.iter().flat_map(|w| w.to_le_bytes()).collect()
    }

    #[test]
    fn missing_file_is_not_found() {
        let path = std::env::temp_dir().join("basalt-no-such-shader.spv");
        match read_shader_file(&path) {
            Err(ShaderError::FileNotFound { path: p, .. }) => assert_eq!(p, path),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn unreadable_path_is_an_io_error() {
        let dir = std::env::temp_dir();
        let err = read_shader_file(&dir).unwrap_err();
        assert!(matches!(err, ShaderError::Io { .. }), "got {err:?}");
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn accepts_spirv_header() {
        let bytes = words_to_bytes(&[SPIRV_MAGIC, 0x0001_0000, 0, 1, 0]);
        let words = decode_spirv("tri.vert", &bytes).unwrap();
        assert_eq!(words.len(), 5);
    }

    #[test]
    fn rejects_misaligned_length() {
        let mut bytes = words_to_bytes(&[SPIRV_MAGIC, 0]);
        bytes.push(0);
        assert!(matches!(
            decode_spirv("x", &bytes),
            Err(ShaderError::InvalidBinary { .. })
        ));
    }

    #[test]
    fn rejects_wrong_magic() {
        let bytes = words_to_bytes(&[0xdead_beef, 0]);
        match decode_spirv("frag", &bytes) {
            Err(ShaderError::InvalidBinary { key, reason }) => {
                assert_eq!(key, "frag");
                assert!(reason.contains("deadbeef"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn rejects_empty_input() {
        assert!(decode_spirv("empty", &[]).is_err());
    }
}
