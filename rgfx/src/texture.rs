//! 2-D GPU images with tracked layout ([`Texture`]).
//!
//! A texture remembers the layout its image is in. Every layout change goes
//! through [`Texture::transition`], which records a barrier only when the
//! layout actually changes; asking for the layout the image is already in is
//! free. The tracking itself lives in [`LayoutTracker`], which the
//! [`Backbuffer`](crate::backbuffer::Backbuffer) reuses for swapchain images.
//!
//! Passing [`vk::ImageLayout::UNDEFINED`] as a transition target means "the
//! default layout", which is inferred from the usage flags at creation.

use std::sync::Arc;

use ash::vk;
use gpu_allocator::vulkan::Allocation;
use thiserror::Error;

use crate::buffer::{Buffer, BufferDesc, BufferType, CreateBufferError};
use crate::descriptor::{
    AllocateDescriptorSetError, DescriptorAllocator, DescriptorSet,
    DescriptorSetLayout,
};
use crate::device::{AllocateMemoryError, Device, MemoryUsage};
use crate::queue::QueueType;
use crate::upload::{self, UploadError};

/// Sink for image barriers.
///
/// [`CommandBuffer`](crate::command::CommandBuffer) records them into its
/// Vulkan command buffer.
pub trait ImageBarrierRecorder {
    fn record_image_barrier(&mut self, barrier: vk::ImageMemoryBarrier2<'static>);
}

/// Stage and access masks on either side of a layout transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BarrierStages {
    pub src_stage: vk::PipelineStageFlags2,
    pub src_access: vk::AccessFlags2,
    pub dst_stage: vk::PipelineStageFlags2,
    pub dst_access: vk::AccessFlags2,
}

impl BarrierStages {
    /// Full pipeline barrier: everything before finishes and flushes before
    /// anything after starts.
    pub fn coarse() -> Self {
        Self {
            src_stage: vk::PipelineStageFlags2::ALL_COMMANDS,
            src_access: vk::AccessFlags2::MEMORY_WRITE,
            dst_stage: vk::PipelineStageFlags2::ALL_COMMANDS,
            dst_access: vk::AccessFlags2::MEMORY_READ
                | vk::AccessFlags2::MEMORY_WRITE,
        }
    }
}

/// Current and default layout of one image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayoutTracker {
    current: vk::ImageLayout,
    default: vk::ImageLayout,
}

impl LayoutTracker {
    /// A freshly created image: contents undefined.
    pub fn new(default: vk::ImageLayout) -> Self {
        Self {
            current: vk::ImageLayout::UNDEFINED,
            default,
        }
    }

    pub fn current(&self) -> vk::ImageLayout {
        self.current
    }

    pub fn default_layout(&self) -> vk::ImageLayout {
        self.default
    }

    /// `UNDEFINED` stands for the default layout.
    pub fn resolve(&self, target: vk::ImageLayout) -> vk::ImageLayout {
        if target == vk::ImageLayout::UNDEFINED {
            self.default
        } else {
            target
        }
    }

    /// Move the image to `target`, recording at most one barrier.
    ///
    /// Returns whether a barrier was recorded.
    pub fn transition(
        &mut self,
        recorder: &mut impl ImageBarrierRecorder,
        image: vk::Image,
        range: vk::ImageSubresourceRange,
        target: vk::ImageLayout,
        stages: BarrierStages,
    ) -> bool {
        let target = self.resolve(target);
        // Nothing can transition into UNDEFINED.
        if target == self.current || target == vk::ImageLayout::UNDEFINED {
            return false;
        }

        let barrier = vk::ImageMemoryBarrier2::default()
            .src_stage_mask(stages.src_stage)
            .src_access_mask(stages.src_access)
            .dst_stage_mask(stages.dst_stage)
            .dst_access_mask(stages.dst_access)
            .old_layout(self.current)
            .new_layout(target)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(image)
            .subresource_range(range);
        recorder.record_image_barrier(barrier);
        self.current = target;
        true
    }

    /// Overwrite the tracked layout after an operation that changed it
    /// implicitly (render pass final layouts, presentation).
    pub fn assume(&mut self, layout: vk::ImageLayout) {
        self.current = layout;
    }
}

/// Layout a texture rests in between uses.
///
/// Color attachment wins over depth attachment, which wins over sampled.
pub fn default_layout(usage: vk::ImageUsageFlags) -> vk::ImageLayout {
    if usage.contains(vk::ImageUsageFlags::COLOR_ATTACHMENT) {
        vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL
    } else if usage.contains(vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT) {
        vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL
    } else if usage.contains(vk::ImageUsageFlags::SAMPLED) {
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL
    } else {
        vk::ImageLayout::UNDEFINED
    }
}

pub fn aspect_for(usage: vk::ImageUsageFlags) -> vk::ImageAspectFlags {
    if usage.contains(vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT) {
        vk::ImageAspectFlags::DEPTH
    } else {
        vk::ImageAspectFlags::COLOR
    }
}

/// Bytes per texel for the uncompressed formats textures are uploaded in.
pub fn format_size(format: vk::Format) -> Option<u32> {
    use vk::Format as F;
    Some(match format {
        F::R8_UNORM | F::R8_SNORM | F::R8_UINT | F::R8_SRGB => 1,
        F::R8G8_UNORM | F::R8G8_SRGB | F::R16_SFLOAT | F::D16_UNORM => 2,
        F::R8G8B8_UNORM | F::R8G8B8_SRGB | F::B8G8R8_UNORM => 3,
        F::R8G8B8A8_UNORM
        | F::R8G8B8A8_SRGB
        | F::B8G8R8A8_UNORM
        | F::B8G8R8A8_SRGB
        | F::R32_SFLOAT
        | F::R32_UINT
        | F::D32_SFLOAT
        | F::D24_UNORM_S8_UINT => 4,
        F::R16G16B16A16_SFLOAT | F::R32G32_SFLOAT => 8,
        F::R32G32B32_SFLOAT => 12,
        F::R32G32B32A32_SFLOAT => 16,
        _ => return None,
    })
}

/// Extent of every mip level, halving from `width`×`height` and clamping
/// at 1.
pub fn mip_extents(width: u32, height: u32, levels: u32) -> Vec<(u32, u32)> {
    let (mut w, mut h) = (width, height);
    (0..levels)
        .map(|_| {
            let extent = (w, h);
            w = (w / 2).max(1);
            h = (h / 2).max(1);
            extent
        })
        .collect()
}

/// One copy region per level for tightly packed mips laid end to end in a
/// buffer.
pub fn mip_copy_regions(
    width: u32,
    height: u32,
    texel_size: u32,
    levels: u32,
    aspect: vk::ImageAspectFlags,
) -> Vec<vk::BufferImageCopy> {
    let mut offset: vk::DeviceSize = 0;
    mip_extents(width, height, levels)
        .into_iter()
        .enumerate()
        .map(|(level, (w, h))| {
            let region = vk::BufferImageCopy::default()
                .buffer_offset(offset)
                .image_subresource(
                    vk::ImageSubresourceLayers::default()
                        .aspect_mask(aspect)
                        .mip_level(level as u32)
                        .base_array_layer(0)
                        .layer_count(1),
                )
                .image_extent(vk::Extent3D {
                    width: w,
                    height: h,
                    depth: 1,
                });
            offset += vk::DeviceSize::from(w) * vk::DeviceSize::from(h)
                * vk::DeviceSize::from(texel_size);
            region
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum CreateTextureError {
    #[error("Invalid texture dimensions {width}x{height} with {mip_levels} mips")]
    InvalidDimensions {
        width: u32,
        height: u32,
        mip_levels: u32,
    },
    #[error("{supplied} mip levels of data supplied for {mip_levels} levels")]
    TooManyMips { supplied: usize, mip_levels: u32 },
    #[error("Cannot upload pixel data in format {0:?}")]
    UnsupportedFormat(vk::Format),
    #[error(
        "Mip {level} data is {actual_width}x{actual_height} with {actual_bytes} \
         bytes, expected {width}x{height} with {expected_bytes} bytes"
    )]
    MipSizeMismatch {
        level: usize,
        width: u32,
        height: u32,
        expected_bytes: u64,
        actual_width: u32,
        actual_height: u32,
        actual_bytes: usize,
    },
    #[error("Texture data ({data_bytes} bytes) exceeds image memory ({image_bytes} bytes)")]
    DataTooLarge {
        data_bytes: vk::DeviceSize,
        image_bytes: vk::DeviceSize,
    },
    #[error("Vulkan error creating image: {0}")]
    CreateImage(vk::Result),
    #[error("Failed to allocate image memory: {0}")]
    AllocateMemory(#[from] AllocateMemoryError),
    #[error("Vulkan error binding image memory: {0}")]
    BindMemory(vk::Result),
    #[error("Vulkan error creating image view: {0}")]
    CreateView(vk::Result),
    #[error("Failed to create staging buffer: {0}")]
    Staging(#[from] CreateBufferError),
    #[error("Texture upload failed: {0}")]
    Upload(#[from] UploadError),
    #[error("Failed to allocate texture descriptor set: {0}")]
    DescriptorSet(#[from] AllocateDescriptorSetError),
}

// ---------------------------------------------------------------------------
// Texture
// ---------------------------------------------------------------------------

/// Pixel data for one mip level.
#[derive(Debug, Clone, Copy)]
pub struct TextureData<'a> {
    pub data: &'a [u8],
    pub width: u32,
    pub height: u32,
}

/// Where a sampled texture gets its descriptor set from.
#[derive(Debug, Clone, Copy)]
pub struct TextureDescriptor<'a> {
    pub allocator: &'a DescriptorAllocator,
    pub layout: &'a DescriptorSetLayout,
}

#[derive(Debug, Clone, Copy)]
pub struct TextureDesc<'a> {
    pub width: u32,
    pub height: u32,
    pub format: vk::Format,
    pub usage: vk::ImageUsageFlags,
    pub mip_levels: u32,
    /// Per-mip pixel data starting at level 0. May cover fewer levels than
    /// `mip_levels`.
    pub data: &'a [TextureData<'a>],
    pub descriptor: Option<TextureDescriptor<'a>>,
}

impl<'a> TextureDesc<'a> {
    /// A single-level texture with no initial contents.
    pub fn new(
        width: u32,
        height: u32,
        format: vk::Format,
        usage: vk::ImageUsageFlags,
    ) -> Self {
        Self {
            width,
            height,
            format,
            usage,
            mip_levels: 1,
            data: &[],
            descriptor: None,
        }
    }
}

pub struct Texture {
    parent: Arc<Device>,
    handle: vk::Image,
    view: vk::ImageView,
    allocation: Option<Allocation>,
    extent: vk::Extent2D,
    format: vk::Format,
    usage: vk::ImageUsageFlags,
    range: vk::ImageSubresourceRange,
    layout: LayoutTracker,
    descriptor_set: Option<DescriptorSet>,
}

impl std::fmt::Debug for Texture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Texture")
            .field("handle", &self.handle)
            .field("extent", &self.extent)
            .field("format", &self.format)
            .field("layout", &self.layout)
            .finish_non_exhaustive()
    }
}

impl Texture {
    /// Create the image, upload `desc.data` if any and leave the texture in
    /// its default layout.
    ///
    /// Uploading blocks until the graphics queue is idle.
    pub fn new(
        device: &Arc<Device>,
        desc: &TextureDesc<'_>,
        name: Option<&str>,
    ) -> Result<Self, CreateTextureError> {
        if desc.width == 0 || desc.height == 0 || desc.mip_levels == 0 {
            return Err(CreateTextureError::InvalidDimensions {
                width: desc.width,
                height: desc.height,
                mip_levels: desc.mip_levels,
            });
        }
        if desc.data.len() > desc.mip_levels as usize {
            return Err(CreateTextureError::TooManyMips {
                supplied: desc.data.len(),
                mip_levels: desc.mip_levels,
            });
        }
        if !desc.data.is_empty() {
            validate_mip_data(desc)?;
        }

        let mut usage = desc.usage;
        if !desc.data.is_empty() {
            usage |= vk::ImageUsageFlags::TRANSFER_DST;
        }
        let create_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(desc.format)
            .extent(vk::Extent3D {
                width: desc.width,
                height: desc.height,
                depth: 1,
            })
            .mip_levels(desc.mip_levels)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        // SAFETY: create_info has no borrowed pointers.
        let handle = unsafe { device.create_raw_image(&create_info) }
            .map_err(CreateTextureError::CreateImage)?;

        // SAFETY: handle was just created from device.
        if let Err(e) = unsafe { device.set_object_name_str(handle, name) } {
            tracing::warn!("Failed to name image {:?}: {e}", handle);
        }

        // SAFETY: handle was created from device.
        let reqs = unsafe { device.get_raw_image_memory_requirements(handle) };
        let data_bytes: vk::DeviceSize =
            desc.data.iter().map(|d| d.data.len() as vk::DeviceSize).sum();
        if data_bytes > reqs.size {
            // SAFETY: handle is unbound and unused.
            unsafe { device.destroy_raw_image(handle) };
            return Err(CreateTextureError::DataTooLarge {
                data_bytes,
                image_bytes: reqs.size,
            });
        }

        let allocation = match device.allocate_memory(
            name.unwrap_or("texture"),
            reqs,
            MemoryUsage::GpuOnly,
            false,
        ) {
            Ok(allocation) => allocation,
            Err(e) => {
                // SAFETY: handle is unbound and unused.
                unsafe { device.destroy_raw_image(handle) };
                return Err(e.into());
            }
        };

        // SAFETY: allocation was made for handle's requirements and both
        // belong to device.
        if let Err(e) = unsafe {
            device.bind_raw_image_memory(
                handle,
                allocation.memory(),
                allocation.offset(),
            )
        } {
            if let Err(free_err) = device.free_memory(allocation) {
                tracing::error!("Failed to free image allocation: {free_err}");
            }
            // SAFETY: handle is unbound and unused.
            unsafe { device.destroy_raw_image(handle) };
            return Err(CreateTextureError::BindMemory(e));
        }

        let range = vk::ImageSubresourceRange::default()
            .aspect_mask(aspect_for(desc.usage))
            .base_mip_level(0)
            .level_count(desc.mip_levels)
            .base_array_layer(0)
            .layer_count(1);

        // From here on Drop cleans up.
        let mut texture = Self {
            parent: Arc::clone(device),
            handle,
            view: vk::ImageView::null(),
            allocation: Some(allocation),
            extent: vk::Extent2D {
                width: desc.width,
                height: desc.height,
            },
            format: desc.format,
            usage,
            range,
            layout: LayoutTracker::new(default_layout(desc.usage)),
            descriptor_set: None,
        };

        let view_info = vk::ImageViewCreateInfo::default()
            .image(handle)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(desc.format)
            .components(vk::ComponentMapping::default())
            .subresource_range(range);
        // SAFETY: view_info references handle, a live bound image.
        texture.view = unsafe { device.create_raw_image_view(&view_info) }
            .map_err(CreateTextureError::CreateView)?;

        if !desc.data.is_empty() {
            texture.upload(desc.data)?;
        }

        if let Some(descriptor) = desc.descriptor
            && usage.contains(vk::ImageUsageFlags::SAMPLED)
        {
            // Without an upload the image is still UNDEFINED.
            if sampled_descriptor_layout(&texture.layout).is_none() {
                upload::submit_blocking(device, QueueType::Graphics, |cmd| {
                    texture.transition(cmd, vk::ImageLayout::UNDEFINED);
                })?;
            }
            let layout = texture.layout.current();
            let set = descriptor.allocator.allocate(descriptor.layout)?;
            // SAFETY: the view belongs to this texture, which owns the set
            // and drops it first; the image rests in `layout`, its default.
            unsafe { set.write_combined_image_sampler(0, None, texture.view, layout) };
            texture.descriptor_set = Some(set);
        }

        tracing::debug!(
            "Created {}x{} texture {:?} ({:?}, {} mips)",
            desc.width,
            desc.height,
            handle,
            desc.format,
            desc.mip_levels
        );
        Ok(texture)
    }

    fn upload(&mut self, data: &[TextureData<'_>]) -> Result<(), CreateTextureError> {
        let bytes: Vec<u8> = data
            .iter()
            .flat_map(|level| level.data.iter().copied())
            .collect();
        let staging = Buffer::new(
            &self.parent,
            &BufferDesc {
                buffer_type: BufferType::Dynamic,
                usage: vk::BufferUsageFlags::TRANSFER_SRC,
                size: bytes.len() as vk::DeviceSize,
                data: Some(&bytes),
            },
            Some("texture staging"),
        )?;

        let device = Arc::clone(&self.parent);
        let levels = data.len() as u32;
        upload::submit_blocking(&device, QueueType::Graphics, |cmd| {
            cmd.copy_buffer_to_texture(&staging, self, levels);
        })?;
        Ok(())
    }

    /// Move the image to `target` (`UNDEFINED` = default layout) with a full
    /// pipeline barrier. Does nothing when already there.
    pub fn transition(
        &mut self,
        recorder: &mut impl ImageBarrierRecorder,
        target: vk::ImageLayout,
    ) -> bool {
        self.transition_with_stages(recorder, target, BarrierStages::coarse())
    }

    /// [`transition`](Self::transition) with caller-chosen stage and access
    /// masks.
    pub fn transition_with_stages(
        &mut self,
        recorder: &mut impl ImageBarrierRecorder,
        target: vk::ImageLayout,
        stages: BarrierStages,
    ) -> bool {
        self.layout
            .transition(recorder, self.handle, self.range, target, stages)
    }

    /// Copy regions covering the first `levels` mips, tightly packed.
    pub fn copy_regions(&self, levels: u32) -> Vec<vk::BufferImageCopy> {
        mip_copy_regions(
            self.extent.width,
            self.extent.height,
            format_size(self.format).unwrap_or(0),
            levels.min(self.range.level_count),
            self.range.aspect_mask,
        )
    }

    pub fn raw_image(&self) -> vk::Image {
        self.handle
    }

    pub fn raw_image_view(&self) -> vk::ImageView {
        self.view
    }

    pub fn width(&self) -> u32 {
        self.extent.width
    }

    pub fn height(&self) -> u32 {
        self.extent.height
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn format(&self) -> vk::Format {
        self.format
    }

    pub fn usage(&self) -> vk::ImageUsageFlags {
        self.usage
    }

    pub fn subresource_range(&self) -> vk::ImageSubresourceRange {
        self.range
    }

    pub fn current_layout(&self) -> vk::ImageLayout {
        self.layout.current()
    }

    pub fn default_layout(&self) -> vk::ImageLayout {
        self.layout.default_layout()
    }

    /// The sampler descriptor set, for sampled textures created with a
    /// [`TextureDescriptor`].
    pub fn descriptor_set(&self) -> Option<&DescriptorSet> {
        self.descriptor_set.as_ref()
    }

    pub fn parent(&self) -> &Arc<Device> {
        &self.parent
    }
}

/// The layout a descriptor for the image may declare, or `None` while the
/// image is not yet in its default layout.
fn sampled_descriptor_layout(tracker: &LayoutTracker) -> Option<vk::ImageLayout> {
    (tracker.current() == tracker.default_layout()).then_some(tracker.current())
}

fn validate_mip_data(desc: &TextureDesc<'_>) -> Result<(), CreateTextureError> {
    let texel_size = format_size(desc.format)
        .ok_or(CreateTextureError::UnsupportedFormat(desc.format))?;
    let extents = mip_extents(desc.width, desc.height, desc.data.len() as u32);
    for (level, (data, (width, height))) in
        desc.data.iter().zip(extents).enumerate()
    {
        // Saturates on overflow, which no slice length can match.
        let expected_bytes = u64::from(width)
            .checked_mul(u64::from(height))
            .and_then(|texels| texels.checked_mul(u64::from(texel_size)))
            .unwrap_or(u64::MAX);
        if data.width != width
            || data.height != height
            || data.data.len() as u64 != expected_bytes
        {
            return Err(CreateTextureError::MipSizeMismatch {
                level,
                width,
                height,
                expected_bytes,
                actual_width: data.width,
                actual_height: data.height,
                actual_bytes: data.data.len(),
            });
        }
    }
    Ok(())
}

impl Drop for Texture {
    fn drop(&mut self) {
        tracing::debug!("Dropping texture {:?}", self.handle);
        self.descriptor_set = None;
        if self.view != vk::ImageView::null() {
            // SAFETY: view was created from parent; owners wait for the GPU
            // before dropping textures.
            unsafe { self.parent.destroy_raw_image_view(self.view) };
        }
        // SAFETY: handle was created from parent and its view is gone.
        unsafe { self.parent.destroy_raw_image(self.handle) };

        if let Some(allocation) = self.allocation.take()
            && let Err(e) = self.parent.free_memory(allocation)
        {
            tracing::error!("Failed to free GPU image allocation: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct CountingRecorder {
        barriers: Vec<vk::ImageMemoryBarrier2<'static>>,
    }

    impl ImageBarrierRecorder for CountingRecorder {
        fn record_image_barrier(
            &mut self,
            barrier: vk::ImageMemoryBarrier2<'static>,
        ) {
            self.barriers.push(barrier);
        }
    }

    fn color_range() -> vk::ImageSubresourceRange {
        vk::ImageSubresourceRange::default()
            .aspect_mask(vk::ImageAspectFlags::COLOR)
            .level_count(1)
            .layer_count(1)
    }

    #[test]
    fn repeated_transition_records_one_barrier() {
        let mut tracker =
            LayoutTracker::new(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
        let mut recorder = CountingRecorder::default();
        let target = vk::ImageLayout::TRANSFER_DST_OPTIMAL;

        for _ in 0..2 {
            tracker.transition(
                &mut recorder,
                vk::Image::null(),
                color_range(),
                target,
                BarrierStages::coarse(),
            );
        }

        assert_eq!(recorder.barriers.len(), 1);
        assert_eq!(tracker.current(), target);
        let barrier = &recorder.barriers[0];
        assert_eq!(barrier.old_layout, vk::ImageLayout::UNDEFINED);
        assert_eq!(barrier.new_layout, target);
        assert_eq!(barrier.src_queue_family_index, vk::QUEUE_FAMILY_IGNORED);
    }

    #[test]
    fn undefined_target_means_default_layout() {
        let mut tracker =
            LayoutTracker::new(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
        let mut recorder = CountingRecorder::default();

        assert!(tracker.transition(
            &mut recorder,
            vk::Image::null(),
            color_range(),
            vk::ImageLayout::UNDEFINED,
            BarrierStages::coarse(),
        ));
        assert_eq!(
            tracker.current(),
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL
        );
        assert!(!tracker.transition(
            &mut recorder,
            vk::Image::null(),
            color_range(),
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            BarrierStages::coarse(),
        ));
        assert_eq!(recorder.barriers.len(), 1);
    }

    #[test]
    fn usage_without_default_never_transitions_to_undefined() {
        let mut tracker =
            LayoutTracker::new(default_layout(vk::ImageUsageFlags::TRANSFER_SRC));
        let mut recorder = CountingRecorder::default();

        assert!(!tracker.transition(
            &mut recorder,
            vk::Image::null(),
            color_range(),
            vk::ImageLayout::UNDEFINED,
            BarrierStages::coarse(),
        ));
        assert!(recorder.barriers.is_empty());
    }

    #[test]
    fn narrowed_stages_are_recorded() {
        let mut tracker =
            LayoutTracker::new(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
        let mut recorder = CountingRecorder::default();
        let stages = BarrierStages {
            src_stage: vk::PipelineStageFlags2::COPY,
            src_access: vk::AccessFlags2::TRANSFER_WRITE,
            dst_stage: vk::PipelineStageFlags2::FRAGMENT_SHADER,
            dst_access: vk::AccessFlags2::SHADER_SAMPLED_READ,
        };

        tracker.transition(
            &mut recorder,
            vk::Image::null(),
            color_range(),
            vk::ImageLayout::UNDEFINED,
            stages,
        );

        let barrier = &recorder.barriers[0];
        assert_eq!(barrier.src_stage_mask, vk::PipelineStageFlags2::COPY);
        assert_eq!(
            barrier.dst_access_mask,
            vk::AccessFlags2::SHADER_SAMPLED_READ
        );
    }

    #[test]
    fn default_layout_precedence() {
        use vk::ImageUsageFlags as U;
        assert_eq!(
            default_layout(U::COLOR_ATTACHMENT | U::SAMPLED),
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL
        );
        assert_eq!(
            default_layout(U::DEPTH_STENCIL_ATTACHMENT | U::SAMPLED),
            vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL
        );
        assert_eq!(
            default_layout(U::SAMPLED | U::TRANSFER_DST),
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL
        );
        assert_eq!(aspect_for(U::DEPTH_STENCIL_ATTACHMENT), vk::ImageAspectFlags::DEPTH);
        assert_eq!(aspect_for(U::SAMPLED), vk::ImageAspectFlags::COLOR);
    }

    #[test]
    fn mip_regions_advance_and_halve() {
        let regions =
            mip_copy_regions(8, 2, 4, 4, vk::ImageAspectFlags::COLOR);

        let extents: Vec<(u32, u32)> = regions
            .iter()
            .map(|r| (r.image_extent.width, r.image_extent.height))
            .collect();
        assert_eq!(extents, vec![(8, 2), (4, 1), (2, 1), (1, 1)]);

        let offsets: Vec<vk::DeviceSize> =
            regions.iter().map(|r| r.buffer_offset).collect();
        assert_eq!(offsets, vec![0, 64, 80, 88]);

        let levels: Vec<u32> =
            regions.iter().map(|r| r.image_subresource.mip_level).collect();
        assert_eq!(levels, vec![0, 1, 2, 3]);
    }

    #[test]
    fn descriptor_waits_for_default_layout() {
        let mut tracker = LayoutTracker::new(default_layout(vk::ImageUsageFlags::SAMPLED));
        assert_eq!(sampled_descriptor_layout(&tracker), None);

        let mut recorder = CountingRecorder::default();
        tracker.transition(
            &mut recorder,
            vk::Image::null(),
            color_range(),
            vk::ImageLayout::UNDEFINED,
            BarrierStages::coarse(),
        );
        assert_eq!(recorder.barriers.len(), 1);
        assert_eq!(recorder.barriers[0].old_layout, vk::ImageLayout::UNDEFINED);
        assert_eq!(
            sampled_descriptor_layout(&tracker),
            Some(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
        );
    }

    #[test]
    fn huge_mip_size_is_checked_without_overflow() {
        let texels = [0u8; 16];
        let data = [TextureData {
            data: &texels,
            width: 65536,
            height: 65536,
        }];
        let desc = TextureDesc {
            data: &data,
            ..TextureDesc::new(
                65536,
                65536,
                vk::Format::R32G32B32A32_SFLOAT,
                vk::ImageUsageFlags::SAMPLED,
            )
        };
        match validate_mip_data(&desc) {
            Err(CreateTextureError::MipSizeMismatch {
                expected_bytes,
                actual_bytes,
                ..
            }) => {
                assert_eq!(expected_bytes, 65536 * 65536 * 16);
                assert_eq!(actual_bytes, 16);
            }
            other => panic!("expected a size mismatch, got {other:?}"),
        }
    }

    #[test]
    fn format_sizes() {
        assert_eq!(format_size(vk::Format::R8G8B8A8_UNORM), Some(4));
        assert_eq!(format_size(vk::Format::R32G32B32A32_SFLOAT), Some(16));
        assert_eq!(format_size(vk::Format::BC1_RGB_UNORM_BLOCK), None);
    }
}
