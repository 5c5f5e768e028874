use std::ffi::CString;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use ash::vk;
use thiserror::Error;

use crate::device::Device;

/// Macro names the bundled shaders understand.
pub mod macros {
    pub const HAS_TEXTURE: &str = "HAS_TEXTURE";
    pub const HAS_NORMAL: &str = "HAS_NORMAL";
    pub const HAS_COLOR_MASK: &str = "HAS_COLOR_MASK";
}

#[derive(Debug, Error)]
pub enum CreateShaderModuleError {
    #[error("SPIR-V byte length ({0}) is not a multiple of 4")]
    InvalidLength(usize),
    #[error("Vulkan error creating shader module: {0}")]
    Vulkan(vk::Result),
}

/// A single pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ShaderStage {
    Vertex,
    TessellationControl,
    TessellationEvaluation,
    Geometry,
    Fragment,
    Compute,
}

impl ShaderStage {
    /// Graphics stages in pipeline order.
    pub const GRAPHICS: [ShaderStage; 5] = [
        ShaderStage::Vertex,
        ShaderStage::TessellationControl,
        ShaderStage::TessellationEvaluation,
        ShaderStage::Geometry,
        ShaderStage::Fragment,
    ];

    /// The stage name glslang uses for `-S` and as a file extension.
    pub fn extension(self) -> &'static str {
        match self {
            ShaderStage::Vertex => "vert",
            ShaderStage::TessellationControl => "tesc",
            ShaderStage::TessellationEvaluation => "tese",
            ShaderStage::Geometry => "geom",
            ShaderStage::Fragment => "frag",
            ShaderStage::Compute => "comp",
        }
    }

    /// Infer the stage from a source file extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?;
        [Self::Compute]
            .into_iter()
            .chain(Self::GRAPHICS)
            .find(|stage| stage.extension() == ext)
    }
}

impl From<ShaderStage> for vk::ShaderStageFlags {
    fn from(stage: ShaderStage) -> Self {
        match stage {
            ShaderStage::Vertex => vk::ShaderStageFlags::VERTEX,
            ShaderStage::TessellationControl => {
                vk::ShaderStageFlags::TESSELLATION_CONTROL
            }
            ShaderStage::TessellationEvaluation => {
                vk::ShaderStageFlags::TESSELLATION_EVALUATION
            }
            ShaderStage::Geometry => vk::ShaderStageFlags::GEOMETRY,
            ShaderStage::Fragment => vk::ShaderStageFlags::FRAGMENT,
            ShaderStage::Compute => vk::ShaderStageFlags::COMPUTE,
        }
    }
}

/// One `#define NAME VALUE` passed to the compiler.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ShaderMacro {
    pub name: String,
    pub value: u32,
}

impl ShaderMacro {
    pub fn new(name: impl Into<String>, value: u32) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }
}

impl fmt::Display for ShaderMacro {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.name, self.value)
    }
}

/// A declared macro and the largest value it takes. Values run from 0 to
/// `max_value` inclusive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MacroLimit {
    pub name: String,
    pub max_value: u32,
}

impl MacroLimit {
    pub fn new(name: impl Into<String>, max_value: u32) -> Self {
        Self {
            name: name.into(),
            max_value,
        }
    }
}

/// Reinterpret a SPIR-V byte stream as words.
pub fn spirv_words(bytes: &[u8]) -> Result<Vec<u32>, CreateShaderModuleError> {
    if !bytes.len().is_multiple_of(4) {
        return Err(CreateShaderModuleError::InvalidLength(bytes.len()));
    }
    Ok(bytemuck::pod_collect_to_vec::<u8, u32>(bytes))
}

pub struct ShaderModule {
    parent: Arc<Device>,
    handle: vk::ShaderModule,
    stage: ShaderStage,
}

impl std::fmt::Debug for ShaderModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShaderModule")
            .field("handle", &self.handle)
            .field("stage", &self.stage)
            .finish_non_exhaustive()
    }
}

impl ShaderModule {
    pub fn new(
        device: &Arc<Device>,
        stage: ShaderStage,
        code: &[u32],
        name: Option<&str>,
    ) -> Result<Self, CreateShaderModuleError> {
        let create_info = vk::ShaderModuleCreateInfo::default().code(code);

        // SAFETY: code is a whole number of SPIR-V words.
        let handle = unsafe { device.create_raw_shader_module(&create_info) }
            .map_err(CreateShaderModuleError::Vulkan)?;

        // SAFETY: handle was just created from device.
        if let Err(e) = unsafe { device.set_object_name_str(handle, name) } {
            tracing::warn!("Failed to name shader module {:?}: {e}", handle);
        }

        Ok(Self {
            parent: Arc::clone(device),
            handle,
            stage,
        })
    }

    /// The module's `main` entry point.
    pub fn entry_point(&self) -> EntryPoint<'_> {
        EntryPoint {
            module: self,
            name: c"main".to_owned(),
        }
    }

    pub fn raw_handle(&self) -> vk::ShaderModule {
        self.handle
    }

    pub fn stage(&self) -> ShaderStage {
        self.stage
    }

    pub fn parent(&self) -> &Arc<Device> {
        &self.parent
    }
}

impl Drop for ShaderModule {
    fn drop(&mut self) {
        tracing::debug!("Dropping shader module {:?}", self.handle);
        // SAFETY: handle was created from parent; pipelines built from it
        // do not reference the module after creation.
        unsafe { self.parent.destroy_raw_shader_module(self.handle) };
    }
}

/// A module paired with the entry point a pipeline stage runs.
#[derive(Debug)]
pub struct EntryPoint<'a> {
    module: &'a ShaderModule,
    name: CString,
}

impl EntryPoint<'_> {
    pub fn stage(&self) -> ShaderStage {
        self.module.stage()
    }

    /// The returned struct borrows from `self`.
    pub fn as_pipeline_stage_create_info(
        &self,
    ) -> vk::PipelineShaderStageCreateInfo<'_> {
        vk::PipelineShaderStageCreateInfo::default()
            .stage(self.module.stage().into())
            .module(self.module.raw_handle())
            .name(&self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_from_extension() {
        assert_eq!(
            ShaderStage::from_path(Path::new("shaders/basic.frag")),
            Some(ShaderStage::Fragment)
        );
        assert_eq!(
            ShaderStage::from_path(Path::new("cull.comp")),
            Some(ShaderStage::Compute)
        );
        assert_eq!(ShaderStage::from_path(Path::new("readme.md")), None);
        assert_eq!(ShaderStage::from_path(Path::new("noext")), None);
    }

    #[test]
    fn spirv_words_reinterpret_and_check_length() {
        let bytes = [0x03, 0x02, 0x23, 0x07, 1, 0, 0, 0];
        let words = spirv_words(&bytes).unwrap();
        assert_eq!(words.len(), 2);
        assert_eq!(words[0], u32::from_ne_bytes([0x03, 0x02, 0x23, 0x07]));

        assert!(matches!(
            spirv_words(&bytes[..6]),
            Err(CreateShaderModuleError::InvalidLength(6))
        ));
    }

    #[test]
    fn macro_display() {
        assert_eq!(
            ShaderMacro::new(macros::HAS_TEXTURE, 1).to_string(),
            "HAS_TEXTURE=1"
        );
    }
}
