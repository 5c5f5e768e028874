//! Single-subpass render passes and the framebuffers they render into.

use std::sync::Arc;

use ash::vk;
use thiserror::Error;

use crate::command::ClearType;
use crate::device::Device;
use crate::texture::Texture;

#[derive(Debug, Error)]
pub enum CreateRenderPassError {
    #[error("Vulkan error creating render pass: {0}")]
    Vulkan(vk::Result),
}

#[derive(Debug, Error)]
pub enum CreateFramebufferError {
    #[error(
        "Depth attachment is {depth:?} but color attachment is {color:?}"
    )]
    ExtentMismatch {
        color: vk::Extent2D,
        depth: vk::Extent2D,
    },
    #[error("Render pass expects a depth attachment")]
    MissingDepth,
    #[error("Render pass has no depth attachment but one was supplied")]
    UnexpectedDepth,
    #[error("Vulkan error creating framebuffer: {0}")]
    Vulkan(vk::Result),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderPassDesc {
    pub color_format: vk::Format,
    pub depth_format: Option<vk::Format>,
    /// Attachments not cleared at load keep their previous contents.
    pub clear: ClearType,
}

/// Color attachment first, then depth if any. Both stay in their attachment
/// layout across the pass; [`CommandBuffer`](crate::command::CommandBuffer)
/// transitions them around it.
pub fn attachment_descriptions(
    desc: &RenderPassDesc,
) -> Vec<vk::AttachmentDescription> {
    let load_op = |clear: bool| {
        if clear {
            vk::AttachmentLoadOp::CLEAR
        } else {
            vk::AttachmentLoadOp::LOAD
        }
    };

    let mut attachments = vec![
        vk::AttachmentDescription::default()
            .format(desc.color_format)
            .samples(vk::SampleCountFlags::TYPE_1)
            .load_op(load_op(desc.clear.contains(ClearType::COLOR)))
            .store_op(vk::AttachmentStoreOp::STORE)
            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            .final_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL),
    ];
    if let Some(depth_format) = desc.depth_format {
        attachments.push(
            vk::AttachmentDescription::default()
                .format(depth_format)
                .samples(vk::SampleCountFlags::TYPE_1)
                .load_op(load_op(desc.clear.contains(ClearType::DEPTH)))
                .store_op(vk::AttachmentStoreOp::DONT_CARE)
                .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
                .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                .initial_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
                .final_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL),
        );
    }
    attachments
}

/// External dependencies into and out of the single subpass.
pub fn subpass_dependencies(has_depth: bool) -> [vk::SubpassDependency; 2] {
    let (mut stages, mut access) = (
        vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        vk::AccessFlags::COLOR_ATTACHMENT_READ
            | vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
    );
    if has_depth {
        stages |= vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS
            | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS;
        access |= vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ
            | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE;
    }

    [
        vk::SubpassDependency::default()
            .src_subpass(vk::SUBPASS_EXTERNAL)
            .dst_subpass(0)
            .src_stage_mask(vk::PipelineStageFlags::BOTTOM_OF_PIPE)
            .dst_stage_mask(stages)
            .src_access_mask(vk::AccessFlags::MEMORY_READ)
            .dst_access_mask(access)
            .dependency_flags(vk::DependencyFlags::BY_REGION),
        vk::SubpassDependency::default()
            .src_subpass(0)
            .dst_subpass(vk::SUBPASS_EXTERNAL)
            .src_stage_mask(stages)
            .dst_stage_mask(vk::PipelineStageFlags::BOTTOM_OF_PIPE)
            .src_access_mask(access)
            .dst_access_mask(vk::AccessFlags::MEMORY_READ)
            .dependency_flags(vk::DependencyFlags::BY_REGION),
    ]
}

pub struct RenderPass {
    parent: Arc<Device>,
    handle: vk::RenderPass,
    desc: RenderPassDesc,
}

impl std::fmt::Debug for RenderPass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderPass")
            .field("handle", &self.handle)
            .field("desc", &self.desc)
            .finish_non_exhaustive()
    }
}

impl RenderPass {
    pub fn new(
        device: &Arc<Device>,
        desc: RenderPassDesc,
        name: Option<&str>,
    ) -> Result<Self, CreateRenderPassError> {
        let attachments = attachment_descriptions(&desc);
        let color_refs = [vk::AttachmentReference::default()
            .attachment(0)
            .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)];
        let depth_ref = vk::AttachmentReference::default()
            .attachment(1)
            .layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL);

        let mut subpass = vk::SubpassDescription::default()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&color_refs);
        if desc.depth_format.is_some() {
            subpass = subpass.depth_stencil_attachment(&depth_ref);
        }
        let subpasses = [subpass];
        let dependencies = subpass_dependencies(desc.depth_format.is_some());

        let create_info = vk::RenderPassCreateInfo::default()
            .attachments(&attachments)
            .subpasses(&subpasses)
            .dependencies(&dependencies);

        // SAFETY: create_info only borrows locals alive for this call.
        let handle = unsafe { device.create_raw_render_pass(&create_info) }
            .map_err(CreateRenderPassError::Vulkan)?;

        // SAFETY: handle was just created from device.
        if let Err(e) = unsafe { device.set_object_name_str(handle, name) } {
            tracing::warn!("Failed to name render pass {:?}: {e}", handle);
        }

        Ok(Self {
            parent: Arc::clone(device),
            handle,
            desc,
        })
    }

    pub fn raw_render_pass(&self) -> vk::RenderPass {
        self.handle
    }

    pub fn has_depth(&self) -> bool {
        self.desc.depth_format.is_some()
    }

    pub fn desc(&self) -> &RenderPassDesc {
        &self.desc
    }
}

impl Drop for RenderPass {
    fn drop(&mut self) {
        tracing::debug!("Dropping render pass {:?}", self.handle);
        // SAFETY: handle was created from parent; framebuffers and pipelines
        // using it are dropped first.
        unsafe { self.parent.destroy_raw_render_pass(self.handle) };
    }
}

/// The color and optional depth textures a render pass draws into.
pub struct Framebuffer {
    parent: Arc<Device>,
    handle: vk::Framebuffer,
    color: Texture,
    depth: Option<Texture>,
    extent: vk::Extent2D,
}

impl std::fmt::Debug for Framebuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Framebuffer")
            .field("handle", &self.handle)
            .field("extent", &self.extent)
            .finish_non_exhaustive()
    }
}

impl Framebuffer {
    pub fn new(
        device: &Arc<Device>,
        render_pass: &RenderPass,
        color: Texture,
        depth: Option<Texture>,
        name: Option<&str>,
    ) -> Result<Self, CreateFramebufferError> {
        let extent = color.extent();
        match (&depth, render_pass.has_depth()) {
            (None, true) => return Err(CreateFramebufferError::MissingDepth),
            (Some(_), false) => {
                return Err(CreateFramebufferError::UnexpectedDepth);
            }
            (Some(depth), true) if depth.extent() != extent => {
                return Err(CreateFramebufferError::ExtentMismatch {
                    color: extent,
                    depth: depth.extent(),
                });
            }
            _ => {}
        }

        let mut views = vec![color.raw_image_view()];
        views.extend(depth.as_ref().map(Texture::raw_image_view));

        let create_info = vk::FramebufferCreateInfo::default()
            .render_pass(render_pass.raw_render_pass())
            .attachments(&views)
            .width(extent.width)
            .height(extent.height)
            .layers(1);

        // SAFETY: the views and render pass are live objects from device.
        let handle = unsafe { device.create_raw_framebuffer(&create_info) }
            .map_err(CreateFramebufferError::Vulkan)?;

        // SAFETY: handle was just created from device.
        if let Err(e) = unsafe { device.set_object_name_str(handle, name) } {
            tracing::warn!("Failed to name framebuffer {:?}: {e}", handle);
        }

        Ok(Self {
            parent: Arc::clone(device),
            handle,
            color,
            depth,
            extent,
        })
    }

    pub fn raw_framebuffer(&self) -> vk::Framebuffer {
        self.handle
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn color(&self) -> &Texture {
        &self.color
    }

    pub fn color_mut(&mut self) -> &mut Texture {
        &mut self.color
    }

    pub fn depth(&self) -> Option<&Texture> {
        self.depth.as_ref()
    }

    pub fn attachments_mut(&mut self) -> (&mut Texture, Option<&mut Texture>) {
        (&mut self.color, self.depth.as_mut())
    }
}

impl Drop for Framebuffer {
    fn drop(&mut self) {
        tracing::debug!("Dropping framebuffer {:?}", self.handle);
        // SAFETY: handle was created from parent and is destroyed before the
        // textures whose views it references.
        unsafe { self.parent.destroy_raw_framebuffer(self.handle) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cleared_color_with_depth() {
        let desc = RenderPassDesc {
            color_format: vk::Format::B8G8R8A8_UNORM,
            depth_format: Some(vk::Format::D32_SFLOAT),
            clear: ClearType::ALL,
        };

        let attachments = attachment_descriptions(&desc);

        assert_eq!(attachments.len(), 2);
        assert_eq!(attachments[0].load_op, vk::AttachmentLoadOp::CLEAR);
        assert_eq!(attachments[0].store_op, vk::AttachmentStoreOp::STORE);
        assert_eq!(
            attachments[0].final_layout,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL
        );
        assert_eq!(attachments[1].format, vk::Format::D32_SFLOAT);
        assert_eq!(attachments[1].load_op, vk::AttachmentLoadOp::CLEAR);
        assert_eq!(attachments[1].store_op, vk::AttachmentStoreOp::DONT_CARE);
    }

    #[test]
    fn uncleared_attachments_load() {
        let desc = RenderPassDesc {
            color_format: vk::Format::R8G8B8A8_UNORM,
            depth_format: Some(vk::Format::D32_SFLOAT),
            clear: ClearType::DEPTH,
        };

        let attachments = attachment_descriptions(&desc);

        assert_eq!(attachments[0].load_op, vk::AttachmentLoadOp::LOAD);
        assert_eq!(attachments[1].load_op, vk::AttachmentLoadOp::CLEAR);
    }

    #[test]
    fn dependencies_cover_depth_tests_only_with_depth() {
        let [into, _] = subpass_dependencies(false);
        assert!(
            !into
                .dst_stage_mask
                .contains(vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS)
        );

        let [into, out] = subpass_dependencies(true);
        assert_eq!(into.src_subpass, vk::SUBPASS_EXTERNAL);
        assert_eq!(out.dst_subpass, vk::SUBPASS_EXTERNAL);
        assert!(
            into.dst_stage_mask
                .contains(vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS)
        );
        assert_eq!(into.dependency_flags, vk::DependencyFlags::BY_REGION);
    }
}
