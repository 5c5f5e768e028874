//! Renderer settings loaded from TOML.

use std::path::{Path, PathBuf};

use ash::vk;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::descriptor::DescriptorLimits;
use crate::device::DevicePreference;
use crate::instance::VulkanLogLevel;

#[derive(Debug, Error)]
pub enum LoadConfigError {
    #[error("Failed to read config {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

/// Color formats a backbuffer may be requested in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackbufferFormat {
    Bgra8Unorm,
    Bgra8Srgb,
    Rgba8Unorm,
    Rgba8Srgb,
}

impl BackbufferFormat {
    pub fn to_vk(self) -> vk::Format {
        match self {
            BackbufferFormat::Bgra8Unorm => vk::Format::B8G8R8A8_UNORM,
            BackbufferFormat::Bgra8Srgb => vk::Format::B8G8R8A8_SRGB,
            BackbufferFormat::Rgba8Unorm => vk::Format::R8G8B8A8_UNORM,
            BackbufferFormat::Rgba8Srgb => vk::Format::R8G8B8A8_SRGB,
        }
    }
}

/// Every field is optional in the file; omitted ones take their
/// [`Default`] value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    pub app_name: String,
    pub vsync: bool,
    pub backbuffer_count: u32,
    /// `None` takes whatever the surface reports first.
    pub backbuffer_format: Option<BackbufferFormat>,
    /// Bytes of per-frame uniform storage.
    pub ring_buffer_size: u64,
    pub descriptor_limits: DescriptorLimits,
    pub shader_source_dir: PathBuf,
    pub shader_cache_dir: PathBuf,
    pub shader_compiler: PathBuf,
    /// `None` disables the validation layer.
    pub validation: Option<VulkanLogLevel>,
    pub device_preference: DevicePreference,
    pub clear_color: [f32; 4],
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            app_name: "rgfx".to_owned(),
            vsync: true,
            backbuffer_count: 2,
            backbuffer_format: None,
            ring_buffer_size: 1 << 20,
            descriptor_limits: DescriptorLimits::default(),
            shader_source_dir: PathBuf::from("shaders"),
            shader_cache_dir: PathBuf::from("shaders/cache"),
            shader_compiler: PathBuf::from("glslangValidator"),
            validation: None,
            device_preference: DevicePreference::default(),
            clear_color: [0.0, 0.0, 0.0, 1.0],
        }
    }
}

impl RendererConfig {
    pub fn load(path: &Path) -> Result<Self, LoadConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| LoadConfigError::Io {
            path: path.to_owned(),
            source,
        })?;
        let config: Self = toml::from_str(&text).map_err(|source| LoadConfigError::Parse {
            path: path.to_owned(),
            source,
        })?;
        tracing::debug!("Loaded renderer config from {}", path.display());
        Ok(config)
    }

    /// Relative shader directories resolve against `base`.
    pub fn resolve_paths(&mut self, base: &Path) {
        for dir in [&mut self.shader_source_dir, &mut self.shader_cache_dir] {
            if dir.is_relative() {
                *dir = base.join(&*dir);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn missing_fields_take_defaults() {
        let config: RendererConfig = toml::from_str(
            r#"
            vsync = false
            backbuffer_format = "bgra8_srgb"
            validation = "warning"

            [descriptor_limits]
            combined_image_sampler = 16
            "#,
        )
        .expect("valid config");

        assert!(!config.vsync);
        assert_eq!(config.backbuffer_count, 2);
        assert_eq!(config.ring_buffer_size, 1 << 20);
        assert_eq!(
            config.backbuffer_format.map(BackbufferFormat::to_vk),
            Some(vk::Format::B8G8R8A8_SRGB)
        );
        assert_eq!(config.validation, Some(VulkanLogLevel::Warning));
        assert_eq!(config.descriptor_limits.combined_image_sampler, 16);
        assert_eq!(
            config.descriptor_limits.uniform_buffer,
            DescriptorLimits::default().uniform_buffer
        );
    }

    #[test]
    fn empty_file_is_the_default_config() {
        let config: RendererConfig = toml::from_str("").expect("valid config");
        assert_eq!(config, RendererConfig::default());
    }

    #[test]
    fn load_reports_parse_errors_with_path() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(file, "vsync = \"sometimes\"").expect("write");

        let err = RendererConfig::load(file.path()).expect_err("bad vsync");
        assert!(matches!(err, LoadConfigError::Parse { ref path, .. } if path == file.path()));
    }

    #[test]
    fn load_missing_file_is_io_error() {
        let dir = tempfile::tempdir().expect("temp dir");
        let err = RendererConfig::load(&dir.path().join("absent.toml")).expect_err("missing");
        assert!(matches!(err, LoadConfigError::Io { .. }));
    }

    #[test]
    fn relative_shader_dirs_resolve_against_base() {
        let mut config = RendererConfig {
            shader_cache_dir: PathBuf::from("/abs/cache"),
            ..RendererConfig::default()
        };
        config.resolve_paths(Path::new("/project"));
        assert_eq!(config.shader_source_dir, Path::new("/project/shaders"));
        assert_eq!(config.shader_cache_dir, Path::new("/abs/cache"));
    }
}
