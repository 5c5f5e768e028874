//! Command recording ([`CommandBuffer`]).
//!
//! A `CommandBuffer` is one recording session drawn from the command pool of
//! a queue family. It moves through
//! [`Initial`](CommandBufferState::Initial) →
//! [`Recording`](CommandBufferState::Recording) →
//! [`Executable`](CommandBufferState::Executable) →
//! [`Submitted`](CommandBufferState::Submitted) and is not reused after
//! submission.
//!
//! Recording methods that take crate wrappers are safe: the wrappers keep
//! their handles alive and valid. Methods taking raw handles are `unsafe`.
//! Recording into a buffer that is not recording is logged and skipped.

use std::ops::{BitOr, BitOrAssign};
use std::sync::Arc;

use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use thiserror::Error;

use crate::backbuffer::Backbuffer;
use crate::buffer::BufferHandle;
use crate::descriptor::DescriptorSet;
use crate::device::Device;
use crate::pipeline::{PipelineHandle, PipelineLayout};
use crate::queue::QueueType;
use crate::render_pass::{Framebuffer, RenderPass};
use crate::texture::{BarrierStages, ImageBarrierRecorder, Texture};

/// Which attachments a clear touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct ClearType(u8);

impl ClearType {
    pub const NONE: Self = Self(0);
    pub const COLOR: Self = Self(1);
    pub const DEPTH: Self = Self(2);
    pub const ALL: Self = Self(3);

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for ClearType {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for ClearType {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// Attachment clears for `clear`. Depth is only cleared when the pass has a
/// depth attachment.
pub fn clear_attachments(
    clear: ClearType,
    color: [f32; 4],
    depth: f32,
    has_depth: bool,
) -> Vec<vk::ClearAttachment> {
    let mut attachments = Vec::with_capacity(2);
    if clear.contains(ClearType::COLOR) {
        attachments.push(vk::ClearAttachment {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            color_attachment: 0,
            clear_value: vk::ClearValue {
                color: vk::ClearColorValue { float32: color },
            },
        });
    }
    if clear.contains(ClearType::DEPTH) && has_depth {
        attachments.push(vk::ClearAttachment {
            aspect_mask: vk::ImageAspectFlags::DEPTH,
            color_attachment: 0,
            clear_value: vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue { depth, stencil: 0 },
            },
        });
    }
    attachments
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandBufferState {
    Initial,
    Recording,
    Executable,
    Submitted,
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum CreateCommandBufferError {
    #[error("Vulkan error allocating command buffer: {0}")]
    Vulkan(vk::Result),
}

#[derive(Debug, Error)]
pub enum BeginCommandBufferError {
    #[error("Command buffer cannot begin from state {0:?}")]
    InvalidState(CommandBufferState),
    #[error("Vulkan error beginning command buffer: {0}")]
    Vulkan(vk::Result),
}

#[derive(Debug, Error)]
pub enum EndCommandBufferError {
    #[error("Command buffer is not recording")]
    NotRecording,
    #[error("A render pass is still active")]
    RenderPassActive,
    #[error("Vulkan error ending command buffer: {0}")]
    Vulkan(vk::Result),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CopyTextureError {
    #[error("Source extent {src:?} differs from destination extent {dst:?}")]
    ExtentMismatch {
        src: vk::Extent2D,
        dst: vk::Extent2D,
    },
    #[error("Source format {src:?} differs from destination format {dst:?}")]
    FormatMismatch { src: vk::Format, dst: vk::Format },
    #[error("Backbuffer has no acquired image")]
    NoAcquiredImage,
}

/// Extent and format checks shared by texture copies.
pub fn check_copy_compatible(
    src: (vk::Extent2D, vk::Format),
    dst: (vk::Extent2D, vk::Format),
) -> Result<(), CopyTextureError> {
    if src.0 != dst.0 {
        return Err(CopyTextureError::ExtentMismatch {
            src: src.0,
            dst: dst.0,
        });
    }
    if src.1 != dst.1 {
        return Err(CopyTextureError::FormatMismatch {
            src: src.1,
            dst: dst.1,
        });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// CommandBuffer
// ---------------------------------------------------------------------------

pub struct CommandBuffer {
    parent: Arc<Device>,
    handle: vk::CommandBuffer,
    queue_type: QueueType,
    queue_family: u32,
    state: CommandBufferState,
    /// Render area of the active render pass.
    render_area: Option<vk::Extent2D>,
    has_depth: bool,
}

impl std::fmt::Debug for CommandBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandBuffer")
            .field("handle", &self.handle)
            .field("queue_type", &self.queue_type)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl CommandBuffer {
    /// Allocate a primary command buffer from `queue_type`'s pool.
    pub fn new(
        device: &Arc<Device>,
        queue_type: QueueType,
        name: Option<&str>,
    ) -> Result<Self, CreateCommandBufferError> {
        let handle = device
            .allocate_raw_command_buffer(queue_type)
            .map_err(CreateCommandBufferError::Vulkan)?;

        // SAFETY: handle was just allocated from device.
        if let Err(e) = unsafe { device.set_object_name_str(handle, name) } {
            tracing::warn!("Failed to name command buffer {:?}: {e}", handle);
        }

        Ok(Self {
            parent: Arc::clone(device),
            handle,
            queue_type,
            queue_family: device.queue_family(queue_type),
            state: CommandBufferState::Initial,
            render_area: None,
            has_depth: false,
        })
    }

    pub fn begin(&mut self) -> Result<(), BeginCommandBufferError> {
        if self.state != CommandBufferState::Initial {
            return Err(BeginCommandBufferError::InvalidState(self.state));
        }
        let begin_info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        // SAFETY: the buffer is in the initial state.
        unsafe { self.parent.begin_raw_command_buffer(self.handle, &begin_info) }
            .map_err(BeginCommandBufferError::Vulkan)?;
        self.state = CommandBufferState::Recording;
        Ok(())
    }

    /// Finish recording. Fails while a render pass is still open.
    pub fn end(&mut self) -> Result<(), EndCommandBufferError> {
        if self.state != CommandBufferState::Recording {
            return Err(EndCommandBufferError::NotRecording);
        }
        if self.render_area.is_some() {
            tracing::error!(
                "Command buffer {:?} ended inside a render pass",
                self.handle
            );
            return Err(EndCommandBufferError::RenderPassActive);
        }
        // SAFETY: the buffer is recording outside a render pass.
        unsafe { self.parent.end_raw_command_buffer(self.handle) }
            .map_err(EndCommandBufferError::Vulkan)?;
        self.state = CommandBufferState::Executable;
        Ok(())
    }

    pub fn state(&self) -> CommandBufferState {
        self.state
    }

    pub fn is_executable(&self) -> bool {
        self.state == CommandBufferState::Executable
    }

    pub fn is_recording(&self) -> bool {
        self.state == CommandBufferState::Recording
    }

    pub fn in_render_pass(&self) -> bool {
        self.render_area.is_some()
    }

    pub fn queue_type(&self) -> QueueType {
        self.queue_type
    }

    pub fn queue_family(&self) -> u32 {
        self.queue_family
    }

    pub fn raw_command_buffer(&self) -> vk::CommandBuffer {
        self.handle
    }

    pub fn parent(&self) -> &Arc<Device> {
        &self.parent
    }

    /// Called by [`Device::execute`] once the buffer is on a queue.
    pub(crate) fn mark_submitted(&mut self) {
        self.state = CommandBufferState::Submitted;
    }

    fn check_recording(&self, op: &str) -> bool {
        if self.state == CommandBufferState::Recording {
            true
        } else {
            tracing::warn!(
                "Ignoring {op} on command buffer {:?} in state {:?}",
                self.handle,
                self.state
            );
            false
        }
    }
}

// Render pass commands
impl CommandBuffer {
    /// Transition the framebuffer's attachments and begin `render_pass`
    /// over the whole framebuffer.
    ///
    /// Beginning a pass while one is active is a usage error: it asserts in
    /// debug builds and is ignored otherwise.
    pub fn begin_render_pass(
        &mut self,
        render_pass: &RenderPass,
        framebuffer: &mut Framebuffer,
        clear_color: [f32; 4],
        clear_depth: f32,
    ) {
        if !self.check_recording("begin_render_pass") {
            return;
        }
        if self.render_area.is_some() {
            tracing::warn!(
                "Render pass already active on command buffer {:?}; ignoring",
                self.handle
            );
            debug_assert!(false, "nested render pass");
            return;
        }

        let extent = framebuffer.extent();
        let (color, depth) = framebuffer.attachments_mut();
        color.transition(self, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
        if let Some(depth) = depth {
            depth.transition(
                self,
                vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
            );
        }

        let clear_values = [
            vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: clear_color,
                },
            },
            vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: clear_depth,
                    stencil: 0,
                },
            },
        ];
        let attachment_count = if render_pass.has_depth() { 2 } else { 1 };
        let begin_info = vk::RenderPassBeginInfo::default()
            .render_pass(render_pass.raw_render_pass())
            .framebuffer(framebuffer.raw_framebuffer())
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent,
            })
            .clear_values(&clear_values[..attachment_count]);

        // SAFETY: recording outside a render pass; render pass and
        // framebuffer are live wrappers from the same device.
        unsafe { self.parent.cmd_begin_render_pass(self.handle, &begin_info) };
        self.render_area = Some(extent);
        self.has_depth = render_pass.has_depth();
    }

    /// End the active render pass and return the attachments to their
    /// default layouts.
    pub fn end_render_pass(&mut self, framebuffer: &mut Framebuffer) {
        if !self.check_recording("end_render_pass") {
            return;
        }
        if self.render_area.take().is_none() {
            tracing::warn!(
                "end_render_pass without an active pass on {:?}",
                self.handle
            );
            return;
        }
        // SAFETY: a render pass is active on this recording buffer.
        unsafe { self.parent.cmd_end_render_pass(self.handle) };

        let (color, depth) = framebuffer.attachments_mut();
        color.transition(self, vk::ImageLayout::UNDEFINED);
        if let Some(depth) = depth {
            depth.transition(self, vk::ImageLayout::UNDEFINED);
        }
    }

    /// Clear attachments of the active render pass over its whole area.
    pub fn clear(&mut self, clear: ClearType, color: [f32; 4], depth: f32) {
        if !self.check_recording("clear") || clear.is_empty() {
            return;
        }
        let Some(extent) = self.render_area else {
            tracing::warn!("clear outside a render pass on {:?}", self.handle);
            return;
        };
        let attachments = clear_attachments(clear, color, depth, self.has_depth);
        let rect = vk::ClearRect {
            rect: vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent,
            },
            base_array_layer: 0,
            layer_count: 1,
        };
        // SAFETY: inside a render pass whose attachments match the clears.
        unsafe {
            self.parent.cmd_clear_attachments(
                self.handle,
                &attachments,
                std::slice::from_ref(&rect),
            )
        };
    }

    pub fn set_viewport(&mut self, viewport: vk::Viewport) {
        if !self.check_recording("set_viewport") {
            return;
        }
        // SAFETY: the buffer is recording.
        unsafe {
            self.parent
                .cmd_set_viewport(self.handle, std::slice::from_ref(&viewport))
        };
    }

    pub fn set_scissor(&mut self, scissor: vk::Rect2D) {
        if !self.check_recording("set_scissor") {
            return;
        }
        // SAFETY: the buffer is recording.
        unsafe {
            self.parent
                .cmd_set_scissor(self.handle, std::slice::from_ref(&scissor))
        };
    }
}

// Bind commands
impl CommandBuffer {
    pub fn bind_vertex_buffer(&mut self, buffer: &impl BufferHandle) {
        if !self.check_recording("bind_vertex_buffer") {
            return;
        }
        // SAFETY: buffer is a live wrapper from this device.
        unsafe {
            self.parent.cmd_bind_vertex_buffers(
                self.handle,
                0,
                &[buffer.raw_buffer()],
                &[0],
            )
        };
    }

    /// Indices are always 32-bit.
    pub fn bind_index_buffer(&mut self, buffer: &impl BufferHandle) {
        if !self.check_recording("bind_index_buffer") {
            return;
        }
        // SAFETY: buffer is a live wrapper from this device.
        unsafe {
            self.parent.cmd_bind_index_buffer(
                self.handle,
                buffer.raw_buffer(),
                0,
                vk::IndexType::UINT32,
            )
        };
    }

    pub fn bind_pipeline(&mut self, pipeline: &impl PipelineHandle) {
        // SAFETY: the wrapper keeps the pipeline alive.
        unsafe {
            self.bind_raw_pipeline(pipeline.bind_point(), pipeline.raw_pipeline())
        };
    }

    /// # Safety
    /// `pipeline` must come from this device, match `bind_point` and stay
    /// alive until the submission completes.
    pub unsafe fn bind_raw_pipeline(
        &mut self,
        bind_point: vk::PipelineBindPoint,
        pipeline: vk::Pipeline,
    ) {
        if !self.check_recording("bind_pipeline") {
            return;
        }
        // SAFETY: caller guarantees pipeline validity and lifetime.
        unsafe {
            self.parent
                .cmd_bind_pipeline(self.handle, bind_point, pipeline)
        };
    }

    /// Bind `set` at `set_index`, with a dynamic offset for sets whose
    /// layout has one dynamic uniform buffer.
    pub fn bind_descriptor_set(
        &mut self,
        bind_point: vk::PipelineBindPoint,
        layout: &PipelineLayout,
        set_index: u32,
        set: &DescriptorSet,
        dynamic_offset: Option<u32>,
    ) {
        if !self.check_recording("bind_descriptor_set") {
            return;
        }
        let offsets = dynamic_offset.as_slice();
        // SAFETY: layout and set are live wrappers from this device.
        unsafe {
            self.parent.cmd_bind_descriptor_sets(
                self.handle,
                bind_point,
                layout.raw_pipeline_layout(),
                set_index,
                &[set.raw_descriptor_set()],
                offsets,
            )
        };
    }
}

// Draw and dispatch commands
impl CommandBuffer {
    pub fn draw(&mut self, vertex_count: u32) {
        if !self.check_recording("draw") {
            return;
        }
        // SAFETY: the buffer is recording.
        unsafe { self.parent.cmd_draw(self.handle, vertex_count, 1, 0, 0) };
    }

    pub fn draw_indexed(&mut self, index_count: u32) {
        if !self.check_recording("draw_indexed") {
            return;
        }
        // SAFETY: the buffer is recording.
        unsafe {
            self.parent
                .cmd_draw_indexed(self.handle, index_count, 1, 0, 0, 0)
        };
    }

    pub fn dispatch(&mut self, x: u32, y: u32, z: u32) {
        if !self.check_recording("dispatch") {
            return;
        }
        // SAFETY: the buffer is recording.
        unsafe { self.parent.cmd_dispatch(self.handle, x, y, z) };
    }
}

// Copy commands
impl CommandBuffer {
    pub fn copy_buffer(
        &mut self,
        src: &impl BufferHandle,
        dst: &impl BufferHandle,
        regions: &[vk::BufferCopy],
    ) {
        if !self.check_recording("copy_buffer") {
            return;
        }
        // SAFETY: both buffers are live wrappers from this device.
        unsafe {
            self.parent.cmd_copy_buffer(
                self.handle,
                src.raw_buffer(),
                dst.raw_buffer(),
                regions,
            )
        };
    }

    /// Copy the first `levels` tightly packed mips from `src` into `dst`,
    /// leaving `dst` in its default layout.
    pub fn copy_buffer_to_texture(
        &mut self,
        src: &impl BufferHandle,
        dst: &mut Texture,
        levels: u32,
    ) {
        if !self.check_recording("copy_buffer_to_texture") {
            return;
        }
        dst.transition(self, vk::ImageLayout::TRANSFER_DST_OPTIMAL);
        let regions = dst.copy_regions(levels);
        // SAFETY: dst was just moved to TRANSFER_DST_OPTIMAL; regions cover
        // mips that exist.
        unsafe {
            self.parent.cmd_copy_buffer_to_image(
                self.handle,
                src.raw_buffer(),
                dst.raw_image(),
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &regions,
            )
        };
        dst.transition(self, vk::ImageLayout::UNDEFINED);
    }

    /// Copy mip 0 of `src` into `dst`. Both must share extent and format.
    pub fn copy_texture(
        &mut self,
        src: &mut Texture,
        dst: &mut Texture,
    ) -> Result<(), CopyTextureError> {
        check_copy_compatible(
            (src.extent(), src.format()),
            (dst.extent(), dst.format()),
        )?;
        if !self.check_recording("copy_texture") {
            return Ok(());
        }
        src.transition(self, vk::ImageLayout::TRANSFER_SRC_OPTIMAL);
        dst.transition(self, vk::ImageLayout::TRANSFER_DST_OPTIMAL);
        let region = image_copy(
            src.extent(),
            src.subresource_range().aspect_mask,
        );
        // SAFETY: both images were just moved to their transfer layouts.
        unsafe {
            self.parent.cmd_copy_image(
                self.handle,
                src.raw_image(),
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                dst.raw_image(),
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                std::slice::from_ref(&region),
            )
        };
        src.transition(self, vk::ImageLayout::UNDEFINED);
        dst.transition(self, vk::ImageLayout::UNDEFINED);
        Ok(())
    }

    /// Copy `src` into the backbuffer's acquired image and leave that image
    /// ready to present.
    pub fn copy_texture_to_backbuffer<T: HasWindowHandle + HasDisplayHandle>(
        &mut self,
        src: &mut Texture,
        dst: &mut Backbuffer<T>,
    ) -> Result<(), CopyTextureError> {
        check_copy_compatible(
            (src.extent(), src.format()),
            (dst.extent(), dst.format()),
        )?;
        if !self.check_recording("copy_texture_to_backbuffer") {
            return Ok(());
        }
        let range = dst.subresource_range();
        let (image, layout) = dst
            .current_image_mut()
            .ok_or(CopyTextureError::NoAcquiredImage)?;

        src.transition(self, vk::ImageLayout::TRANSFER_SRC_OPTIMAL);
        layout.transition(
            self,
            image,
            range,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            BarrierStages::coarse(),
        );
        let region = image_copy(src.extent(), vk::ImageAspectFlags::COLOR);
        // SAFETY: both images were just moved to their transfer layouts; the
        // backbuffer image is the acquired one.
        unsafe {
            self.parent.cmd_copy_image(
                self.handle,
                src.raw_image(),
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                std::slice::from_ref(&region),
            )
        };
        src.transition(self, vk::ImageLayout::UNDEFINED);
        layout.transition(
            self,
            image,
            range,
            vk::ImageLayout::PRESENT_SRC_KHR,
            BarrierStages::coarse(),
        );
        Ok(())
    }
}

fn image_copy(extent: vk::Extent2D, aspect: vk::ImageAspectFlags) -> vk::ImageCopy {
    let layers = vk::ImageSubresourceLayers::default()
        .aspect_mask(aspect)
        .mip_level(0)
        .base_array_layer(0)
        .layer_count(1);
    vk::ImageCopy::default()
        .src_subresource(layers)
        .dst_subresource(layers)
        .extent(vk::Extent3D {
            width: extent.width,
            height: extent.height,
            depth: 1,
        })
}

// Barrier commands
impl CommandBuffer {
    pub fn buffer_barrier(
        &mut self,
        buffer: &impl BufferHandle,
        stages: BarrierStages,
    ) {
        if !self.check_recording("buffer_barrier") {
            return;
        }
        let barrier = vk::BufferMemoryBarrier2::default()
            .src_stage_mask(stages.src_stage)
            .src_access_mask(stages.src_access)
            .dst_stage_mask(stages.dst_stage)
            .dst_access_mask(stages.dst_access)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .buffer(buffer.raw_buffer())
            .offset(0)
            .size(vk::WHOLE_SIZE);
        let dependency = vk::DependencyInfo::default()
            .buffer_memory_barriers(std::slice::from_ref(&barrier));
        // SAFETY: buffer is a live wrapper from this device.
        unsafe { self.parent.cmd_pipeline_barrier2(self.handle, &dependency) };
    }

    /// Record a raw image barrier. Prefer [`Texture::transition`], which
    /// keeps the tracked layout in sync.
    pub fn image_barrier(&mut self, barrier: vk::ImageMemoryBarrier2<'_>) {
        if !self.check_recording("image_barrier") {
            return;
        }
        let dependency = vk::DependencyInfo::default()
            .image_memory_barriers(std::slice::from_ref(&barrier));
        // SAFETY: the buffer is recording; barrier images come from crate
        // wrappers that outlive the submission.
        unsafe { self.parent.cmd_pipeline_barrier2(self.handle, &dependency) };
    }
}

impl ImageBarrierRecorder for CommandBuffer {
    fn record_image_barrier(&mut self, barrier: vk::ImageMemoryBarrier2<'static>) {
        self.image_barrier(barrier);
    }
}

impl Drop for CommandBuffer {
    fn drop(&mut self) {
        tracing::debug!("Dropping command buffer {:?}", self.handle);
        // SAFETY: handle came from queue_type's pool; owners wait for the
        // submission to finish before dropping.
        unsafe {
            self.parent
                .free_raw_command_buffer(self.queue_type, self.handle)
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clear_type_flags() {
        assert_eq!(ClearType::COLOR | ClearType::DEPTH, ClearType::ALL);
        assert!(ClearType::ALL.contains(ClearType::DEPTH));
        assert!(!ClearType::COLOR.contains(ClearType::DEPTH));
        assert!(ClearType::NONE.is_empty());

        let mut clear = ClearType::NONE;
        clear |= ClearType::DEPTH;
        assert_eq!(clear, ClearType::DEPTH);
    }

    #[test]
    fn clear_all_with_depth() {
        let attachments =
            clear_attachments(ClearType::ALL, [0.1, 0.2, 0.3, 1.0], 1.0, true);

        let aspects: Vec<vk::ImageAspectFlags> =
            attachments.iter().map(|a| a.aspect_mask).collect();
        assert_eq!(
            aspects,
            vec![vk::ImageAspectFlags::COLOR, vk::ImageAspectFlags::DEPTH]
        );
        // SAFETY: the color attachment was written through `color`.
        let color = unsafe { attachments[0].clear_value.color.float32 };
        assert_eq!(color, [0.1, 0.2, 0.3, 1.0]);
    }

    #[test]
    fn depth_clear_skipped_without_depth_attachment() {
        assert!(clear_attachments(ClearType::DEPTH, [0.0; 4], 1.0, false)
            .is_empty());
        assert_eq!(
            clear_attachments(ClearType::ALL, [0.0; 4], 1.0, false).len(),
            1
        );
        assert!(clear_attachments(ClearType::NONE, [0.0; 4], 1.0, true)
            .is_empty());
    }

    #[test]
    fn copy_requires_matching_extent_and_format() {
        let small = vk::Extent2D {
            width: 4,
            height: 4,
        };
        let large = vk::Extent2D {
            width: 8,
            height: 4,
        };
        let rgba = vk::Format::R8G8B8A8_UNORM;
        let bgra = vk::Format::B8G8R8A8_UNORM;

        assert_eq!(check_copy_compatible((small, rgba), (small, rgba)), Ok(()));
        assert_eq!(
            check_copy_compatible((small, rgba), (large, rgba)),
            Err(CopyTextureError::ExtentMismatch {
                src: small,
                dst: large
            })
        );
        assert_eq!(
            check_copy_compatible((small, rgba), (small, bgra)),
            Err(CopyTextureError::FormatMismatch {
                src: rgba,
                dst: bgra
            })
        );
    }
}
