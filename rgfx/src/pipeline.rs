use std::sync::Arc;

use ash::vk;
use bytemuck::{Pod, Zeroable};
use thiserror::Error;

use crate::descriptor::DescriptorSetLayout;
use crate::device::Device;
use crate::render_pass::RenderPass;
use crate::shader::{EntryPoint, ShaderStage};

/// Anything [`CommandBuffer::bind_pipeline`](crate::command::CommandBuffer::bind_pipeline)
/// can bind.
pub trait PipelineHandle {
    fn raw_pipeline(&self) -> vk::Pipeline;
    fn bind_point(&self) -> vk::PipelineBindPoint;
}

impl<T> PipelineHandle for &T
where
    T: PipelineHandle + ?Sized,
{
    fn raw_pipeline(&self) -> vk::Pipeline {
        (*self).raw_pipeline()
    }

    fn bind_point(&self) -> vk::PipelineBindPoint {
        (*self).bind_point()
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum CreatePipelineLayoutError {
    #[error("Vulkan error creating pipeline layout: {0}")]
    Vulkan(vk::Result),
}

#[derive(Debug, Error)]
pub enum CreatePipelineError {
    #[error("No shader stages provided")]
    NoStages,
    #[error("Stage {0:?} cannot be used in this kind of pipeline")]
    WrongStage(ShaderStage),
    #[error("Vulkan error creating pipeline: {0}")]
    Vulkan(vk::Result),
}

// ---------------------------------------------------------------------------
// PipelineLayout
// ---------------------------------------------------------------------------

/// An owned `VkPipelineLayout`.
///
/// Pipelines that share a descriptor signature hold the layout behind an
/// `Arc<PipelineLayout>`.
pub struct PipelineLayout {
    parent: Arc<Device>,
    handle: vk::PipelineLayout,
}

impl std::fmt::Debug for PipelineLayout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineLayout")
            .field("handle", &self.handle)
            .finish_non_exhaustive()
    }
}

impl PipelineLayout {
    /// Create a layout whose set `i` uses `set_layouts[i]`.
    pub fn new(
        device: &Arc<Device>,
        set_layouts: &[&DescriptorSetLayout],
        push_constants: &[vk::PushConstantRange],
        name: Option<&str>,
    ) -> Result<Self, CreatePipelineLayoutError> {
        let raw_layouts: Vec<vk::DescriptorSetLayout> = set_layouts
            .iter()
            .map(|l| l.raw_descriptor_set_layout())
            .collect();
        let create_info = vk::PipelineLayoutCreateInfo::default()
            .set_layouts(&raw_layouts)
            .push_constant_ranges(push_constants);

        // SAFETY: every set layout is a live wrapper from this device.
        let handle =
            unsafe { device.create_raw_pipeline_layout(&create_info) }
                .map_err(CreatePipelineLayoutError::Vulkan)?;

        // SAFETY: handle was just created from device.
        if let Err(e) = unsafe { device.set_object_name_str(handle, name) } {
            tracing::warn!("Failed to name pipeline layout {:?}: {e}", handle);
        }

        Ok(Self {
            parent: Arc::clone(device),
            handle,
        })
    }

    pub fn raw_pipeline_layout(&self) -> vk::PipelineLayout {
        self.handle
    }
}

impl Drop for PipelineLayout {
    fn drop(&mut self) {
        tracing::debug!("Dropping pipeline layout {:?}", self.handle);
        // SAFETY: handle was created from parent; pipelines using it hold an
        // Arc and have therefore been dropped.
        unsafe { self.parent.destroy_raw_pipeline_layout(self.handle) };
    }
}

// ---------------------------------------------------------------------------
// Vertex input
// ---------------------------------------------------------------------------

/// The interleaved vertex every mesh pipeline consumes.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct StandardVertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub uv: [f32; 2],
    pub tangent: [f32; 3],
}

/// One vertex buffer binding and the attributes read from it.
#[derive(Debug, Clone, Default)]
pub struct VertexLayout {
    pub stride: u32,
    pub attributes: Vec<vk::VertexInputAttributeDescription>,
}

impl VertexLayout {
    /// No vertex buffer; vertices come from `gl_VertexIndex`.
    pub fn none() -> Self {
        Self::default()
    }

    /// [`StandardVertex`]: position, normal, uv and tangent at locations 0..4.
    pub fn standard() -> Self {
        let attribute = |location, format, offset| {
            vk::VertexInputAttributeDescription::default()
                .location(location)
                .binding(0)
                .format(format)
                .offset(offset)
        };
        Self {
            stride: size_of::<StandardVertex>() as u32,
            attributes: vec![
                attribute(0, vk::Format::R32G32B32_SFLOAT, 0),
                attribute(1, vk::Format::R32G32B32_SFLOAT, 12),
                attribute(2, vk::Format::R32G32_SFLOAT, 24),
                attribute(3, vk::Format::R32G32B32_SFLOAT, 32),
            ],
        }
    }

    pub fn binding_descriptions(&self) -> Vec<vk::VertexInputBindingDescription> {
        if self.stride == 0 {
            return Vec::new();
        }
        vec![
            vk::VertexInputBindingDescription::default()
                .binding(0)
                .stride(self.stride)
                .input_rate(vk::VertexInputRate::VERTEX),
        ]
    }
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// How a new pipeline relates to others built from the same shaders.
#[derive(Debug, Clone, Copy)]
pub enum Derivation<'a> {
    Standalone,
    /// Other pipelines may derive from this one.
    Base,
    DerivativeOf(&'a Pipeline),
}

impl Derivation<'_> {
    fn create_flags(&self) -> (vk::PipelineCreateFlags, vk::Pipeline) {
        derivation_flags(match self {
            Derivation::Standalone => None,
            Derivation::Base => Some(vk::Pipeline::null()),
            Derivation::DerivativeOf(base) => Some(base.handle),
        })
    }
}

/// `None` is standalone; `Some(null)` is a base; `Some(handle)` derives
/// from `handle`.
fn derivation_flags(
    base: Option<vk::Pipeline>,
) -> (vk::PipelineCreateFlags, vk::Pipeline) {
    match base {
        None => (vk::PipelineCreateFlags::empty(), vk::Pipeline::null()),
        Some(handle) if handle == vk::Pipeline::null() => {
            (vk::PipelineCreateFlags::ALLOW_DERIVATIVES, handle)
        }
        Some(handle) => (vk::PipelineCreateFlags::DERIVATIVE, handle),
    }
}

/// Fixed-function state for a graphics pipeline.
///
/// Viewport and scissor are always dynamic.
#[derive(Debug, Clone)]
pub struct GraphicsPipelineDesc<'a> {
    pub render_pass: &'a RenderPass,
    pub layout: Arc<PipelineLayout>,
    pub vertex_layout: VertexLayout,
    /// Ignored when the render pass has no depth attachment.
    pub depth_test: bool,
    pub cull_mode: vk::CullModeFlags,
    pub front_face: vk::FrontFace,
    pub polygon_mode: vk::PolygonMode,
    pub alpha_blend: bool,
}

impl<'a> GraphicsPipelineDesc<'a> {
    pub fn new(render_pass: &'a RenderPass, layout: Arc<PipelineLayout>) -> Self {
        Self {
            render_pass,
            layout,
            vertex_layout: VertexLayout::standard(),
            depth_test: true,
            cull_mode: vk::CullModeFlags::BACK,
            front_face: vk::FrontFace::COUNTER_CLOCKWISE,
            polygon_mode: vk::PolygonMode::FILL,
            alpha_blend: false,
        }
    }
}

/// An owned graphics or compute pipeline.
pub struct Pipeline {
    parent: Arc<Device>,
    handle: vk::Pipeline,
    bind_point: vk::PipelineBindPoint,
    layout: Arc<PipelineLayout>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("handle", &self.handle)
            .field("bind_point", &self.bind_point)
            .field("layout", &self.layout)
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    pub fn graphics(
        device: &Arc<Device>,
        desc: &GraphicsPipelineDesc<'_>,
        stages: &[EntryPoint<'_>],
        derivation: Derivation<'_>,
        name: Option<&str>,
    ) -> Result<Self, CreatePipelineError> {
        if stages.is_empty() {
            return Err(CreatePipelineError::NoStages);
        }
        if let Some(stage) = stages
            .iter()
            .map(EntryPoint::stage)
            .find(|s| *s == ShaderStage::Compute)
        {
            return Err(CreatePipelineError::WrongStage(stage));
        }

        let stage_infos: Vec<vk::PipelineShaderStageCreateInfo<'_>> = stages
            .iter()
            .map(|ep| ep.as_pipeline_stage_create_info())
            .collect();

        let bindings = desc.vertex_layout.binding_descriptions();
        let vertex_input_state = vk::PipelineVertexInputStateCreateInfo::default()
            .vertex_binding_descriptions(&bindings)
            .vertex_attribute_descriptions(&desc.vertex_layout.attributes);

        let input_assembly_state =
            vk::PipelineInputAssemblyStateCreateInfo::default()
                .topology(vk::PrimitiveTopology::TRIANGLE_LIST);

        let viewport_state = vk::PipelineViewportStateCreateInfo::default()
            .viewport_count(1)
            .scissor_count(1);

        let rasterization_state =
            vk::PipelineRasterizationStateCreateInfo::default()
                .polygon_mode(desc.polygon_mode)
                .cull_mode(desc.cull_mode)
                .front_face(desc.front_face)
                .line_width(1.0);

        let multisample_state = vk::PipelineMultisampleStateCreateInfo::default()
            .rasterization_samples(vk::SampleCountFlags::TYPE_1);

        let depth = desc.depth_test && desc.render_pass.has_depth();
        let depth_stencil_state =
            vk::PipelineDepthStencilStateCreateInfo::default()
                .depth_test_enable(depth)
                .depth_write_enable(depth)
                .depth_compare_op(vk::CompareOp::LESS_OR_EQUAL);

        let blend_attachment = if desc.alpha_blend {
            vk::PipelineColorBlendAttachmentState::default()
                .blend_enable(true)
                .src_color_blend_factor(vk::BlendFactor::SRC_ALPHA)
                .dst_color_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
                .color_blend_op(vk::BlendOp::ADD)
                .src_alpha_blend_factor(vk::BlendFactor::ONE)
                .dst_alpha_blend_factor(vk::BlendFactor::ZERO)
                .alpha_blend_op(vk::BlendOp::ADD)
                .color_write_mask(vk::ColorComponentFlags::RGBA)
        } else {
            vk::PipelineColorBlendAttachmentState::default()
                .color_write_mask(vk::ColorComponentFlags::RGBA)
        };
        let color_blend_state = vk::PipelineColorBlendStateCreateInfo::default()
            .attachments(std::slice::from_ref(&blend_attachment));

        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state = vk::PipelineDynamicStateCreateInfo::default()
            .dynamic_states(&dynamic_states);

        let (flags, base) = derivation.create_flags();
        let create_info = vk::GraphicsPipelineCreateInfo::default()
            .flags(flags)
            .stages(&stage_infos)
            .vertex_input_state(&vertex_input_state)
            .input_assembly_state(&input_assembly_state)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterization_state)
            .multisample_state(&multisample_state)
            .depth_stencil_state(&depth_stencil_state)
            .color_blend_state(&color_blend_state)
            .dynamic_state(&dynamic_state)
            .layout(desc.layout.raw_pipeline_layout())
            .render_pass(desc.render_pass.raw_render_pass())
            .subpass(0)
            .base_pipeline_handle(base)
            .base_pipeline_index(-1);

        // SAFETY: the stages, layout, render pass and base pipeline are live
        // wrappers from device and every pointer outlives the call.
        let handle = unsafe { device.create_raw_graphics_pipeline(&create_info) }
            .map_err(CreatePipelineError::Vulkan)?;

        Ok(Self::finish(
            device,
            handle,
            vk::PipelineBindPoint::GRAPHICS,
            Arc::clone(&desc.layout),
            name,
        ))
    }

    pub fn compute(
        device: &Arc<Device>,
        layout: Arc<PipelineLayout>,
        stage: &EntryPoint<'_>,
        name: Option<&str>,
    ) -> Result<Self, CreatePipelineError> {
        if stage.stage() != ShaderStage::Compute {
            return Err(CreatePipelineError::WrongStage(stage.stage()));
        }
        let create_info = vk::ComputePipelineCreateInfo::default()
            .stage(stage.as_pipeline_stage_create_info())
            .layout(layout.raw_pipeline_layout())
            .base_pipeline_index(-1);

        // SAFETY: stage and layout are live wrappers from device.
        let handle = unsafe { device.create_raw_compute_pipeline(&create_info) }
            .map_err(CreatePipelineError::Vulkan)?;

        Ok(Self::finish(
            device,
            handle,
            vk::PipelineBindPoint::COMPUTE,
            layout,
            name,
        ))
    }

    fn finish(
        device: &Arc<Device>,
        handle: vk::Pipeline,
        bind_point: vk::PipelineBindPoint,
        layout: Arc<PipelineLayout>,
        name: Option<&str>,
    ) -> Self {
        // SAFETY: handle was just created from device.
        if let Err(e) = unsafe { device.set_object_name_str(handle, name) } {
            tracing::warn!("Failed to name pipeline {:?}: {e}", handle);
        }
        Self {
            parent: Arc::clone(device),
            handle,
            bind_point,
            layout,
        }
    }

    pub fn layout(&self) -> &Arc<PipelineLayout> {
        &self.layout
    }
}

impl PipelineHandle for Pipeline {
    fn raw_pipeline(&self) -> vk::Pipeline {
        self.handle
    }

    fn bind_point(&self) -> vk::PipelineBindPoint {
        self.bind_point
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        tracing::debug!("Dropping pipeline {:?}", self.handle);
        // SAFETY: handle was created from parent and no submission still
        // references it once its owner drops.
        unsafe { self.parent.destroy_raw_pipeline(self.handle) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    #[test]
    fn standard_vertex_is_44_bytes_with_packed_attributes() {
        assert_eq!(size_of::<StandardVertex>(), 44);

        let layout = VertexLayout::standard();
        assert_eq!(layout.stride, 44);
        let offsets: Vec<u32> = layout.attributes.iter().map(|a| a.offset).collect();
        assert_eq!(offsets, [0, 12, 24, 32]);
        assert_eq!(layout.binding_descriptions().len(), 1);
    }

    #[test]
    fn empty_vertex_layout_has_no_bindings() {
        assert!(VertexLayout::none().binding_descriptions().is_empty());
    }

    #[test]
    fn derivation_sets_create_flags() {
        assert_eq!(derivation_flags(None).0, vk::PipelineCreateFlags::empty());
        assert_eq!(
            derivation_flags(Some(vk::Pipeline::null())).0,
            vk::PipelineCreateFlags::ALLOW_DERIVATIVES
        );

        let base = vk::Pipeline::from_raw(7);
        let (flags, handle) = derivation_flags(Some(base));
        assert_eq!(flags, vk::PipelineCreateFlags::DERIVATIVE);
        assert_eq!(handle, base);
    }
}
