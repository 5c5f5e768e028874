//! Swapchain wrapper ([`Backbuffer`]).
//!
//! A backbuffer owns the swapchain, a view per image and one
//! [`LayoutTracker`] per image; every image starts `UNDEFINED` and its
//! default layout is `PRESENT_SRC_KHR`. A frame acquires an image (blocking
//! on an internal fence), renders or copies into it, leaves it in
//! `PRESENT_SRC_KHR` and presents it.

use std::sync::Arc;

use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use thiserror::Error;

use crate::device::{Device, SwapchainCallError};
use crate::surface::{Surface, SurfaceQueryError};
use crate::sync::{CreateFenceError, Fence, Semaphore, WaitFenceError};
use crate::texture::LayoutTracker;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum CreateBackbufferError {
    #[error("Surface and device come from different instances")]
    MismatchedParams,
    #[error("Swapchain support was not enabled on this device")]
    SwapchainNotEnabled,
    #[error("No queue family can present to the surface")]
    NoPresentQueue,
    #[error("Invalid requested backbuffer extent ({width}x{height})")]
    InvalidExtent { width: u32, height: u32 },
    #[error("No supported surface formats were reported")]
    NoSurfaceFormats,
    #[error("No supported present modes were reported")]
    NoPresentModes,
    #[error("Failed while querying surface support details: {0}")]
    SurfaceQuery(#[from] SurfaceQueryError),
    #[error("Swapchain call failed: {0}")]
    Swapchain(#[from] SwapchainCallError),
    #[error("Vulkan error creating backbuffer image view: {0}")]
    CreateImageView(vk::Result),
    #[error("Failed to create acquire fence: {0}")]
    Fence(#[from] CreateFenceError),
}

#[derive(Debug, Error)]
pub enum AcquireImageError {
    #[error("Swapchain is out of date and must be recreated")]
    OutOfDate,
    #[error("Image {0} is acquired and has not been presented")]
    AlreadyAcquired(u32),
    #[error("Failed to acquire swapchain image: {0}")]
    Swapchain(SwapchainCallError),
    #[error("Waiting for acquire fence failed: {0}")]
    Wait(#[from] WaitFenceError),
    #[error("Resetting acquire fence failed: {0}")]
    ResetFence(vk::Result),
}

#[derive(Debug, Error)]
pub enum PresentError {
    #[error("No image has been acquired")]
    NoAcquiredImage,
    #[error("Swapchain is out of date and must be recreated")]
    OutOfDate,
    #[error("Present failed: {0}")]
    Swapchain(SwapchainCallError),
}

// ---------------------------------------------------------------------------
// Selection policy
// ---------------------------------------------------------------------------

/// Clamp `requested` into the surface's supported image count range.
/// A `max_image_count` of 0 means unbounded. Returns whether it moved.
pub fn clamp_image_count(
    requested: u32,
    capabilities: &vk::SurfaceCapabilitiesKHR,
) -> (u32, bool) {
    let mut count = requested.max(capabilities.min_image_count);
    if capabilities.max_image_count > 0 {
        count = count.min(capabilities.max_image_count);
    }
    (count, count != requested)
}

/// FIFO with vsync; otherwise MAILBOX, then IMMEDIATE, then FIFO.
pub fn choose_present_mode(
    present_modes: &[vk::PresentModeKHR],
    vsync: bool,
) -> vk::PresentModeKHR {
    if vsync {
        return vk::PresentModeKHR::FIFO;
    }
    [vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::IMMEDIATE]
        .into_iter()
        .find(|mode| present_modes.contains(mode))
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

fn choose_surface_format(
    formats: &[vk::SurfaceFormatKHR],
    preferred_format: Option<vk::Format>,
) -> Option<vk::SurfaceFormatKHR> {
    if let Some(preferred) = preferred_format
        && let Some(found) = formats.iter().copied().find(|f| f.format == preferred)
    {
        return Some(found);
    }
    formats
        .iter()
        .copied()
        .find(|f| {
            f.format == vk::Format::B8G8R8A8_UNORM
                && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .or_else(|| formats.first().copied())
}

fn choose_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    desired_extent: vk::Extent2D,
) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        capabilities.current_extent
    } else {
        vk::Extent2D {
            width: desired_extent.width.clamp(
                capabilities.min_image_extent.width,
                capabilities.max_image_extent.width,
            ),
            height: desired_extent.height.clamp(
                capabilities.min_image_extent.height,
                capabilities.max_image_extent.height,
            ),
        }
    }
}

fn choose_composite_alpha(
    capabilities: &vk::SurfaceCapabilitiesKHR,
) -> vk::CompositeAlphaFlagsKHR {
    [
        vk::CompositeAlphaFlagsKHR::OPAQUE,
        vk::CompositeAlphaFlagsKHR::PRE_MULTIPLIED,
        vk::CompositeAlphaFlagsKHR::POST_MULTIPLIED,
    ]
    .into_iter()
    .find(|&alpha| capabilities.supported_composite_alpha.contains(alpha))
    .unwrap_or(vk::CompositeAlphaFlagsKHR::INHERIT)
}

fn color_range() -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange::default()
        .aspect_mask(vk::ImageAspectFlags::COLOR)
        .base_mip_level(0)
        .level_count(1)
        .base_array_layer(0)
        .layer_count(1)
}

// ---------------------------------------------------------------------------
// Backbuffer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackbufferDesc {
    pub extent: vk::Extent2D,
    pub image_count: u32,
    pub vsync: bool,
    /// Used when the surface supports it.
    pub preferred_format: Option<vk::Format>,
}

/// Result of a successful [`Backbuffer::acquire_next_image`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcquiredImage {
    pub index: u32,
    /// The image is usable but the swapchain should be recreated.
    pub suboptimal: bool,
}

struct SwapchainImage {
    image: vk::Image,
    view: vk::ImageView,
    layout: LayoutTracker,
}

pub struct Backbuffer<T: HasDisplayHandle + HasWindowHandle> {
    parent: Arc<Device>,
    surface: Arc<Surface<T>>,
    handle: vk::SwapchainKHR,
    desc: BackbufferDesc,
    format: vk::Format,
    extent: vk::Extent2D,
    images: Vec<SwapchainImage>,
    current: Option<u32>,
    acquire_fence: Fence,
}

impl<T: HasDisplayHandle + HasWindowHandle> std::fmt::Debug for Backbuffer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backbuffer")
            .field("handle", &self.handle)
            .field("format", &self.format)
            .field("extent", &self.extent)
            .field("image_count", &self.images.len())
            .field("current", &self.current)
            .finish_non_exhaustive()
    }
}

impl<T: HasDisplayHandle + HasWindowHandle> Backbuffer<T> {
    pub fn new(
        device: &Arc<Device>,
        surface: &Arc<Surface<T>>,
        desc: &BackbufferDesc,
    ) -> Result<Self, CreateBackbufferError> {
        if !Arc::ptr_eq(surface.get_parent(), device.parent()) {
            return Err(CreateBackbufferError::MismatchedParams);
        }
        let acquire_fence = Fence::new(device, false, Some("backbuffer acquire"))?;
        let mut backbuffer = Self {
            parent: Arc::clone(device),
            surface: Arc::clone(surface),
            handle: vk::SwapchainKHR::null(),
            desc: *desc,
            format: vk::Format::UNDEFINED,
            extent: desc.extent,
            images: Vec::new(),
            current: None,
            acquire_fence,
        };
        backbuffer.create_swapchain()?;
        Ok(backbuffer)
    }

    /// Rebuild the swapchain at `extent`, reusing the old one.
    ///
    /// The caller must make sure no submitted work still uses the current
    /// images.
    pub fn resize(&mut self, extent: vk::Extent2D) -> Result<(), CreateBackbufferError> {
        self.desc.extent = extent;
        self.current = None;
        self.create_swapchain()
    }

    fn create_swapchain(&mut self) -> Result<(), CreateBackbufferError> {
        let device = Arc::clone(&self.parent);
        if !device.has_swapchain_support() {
            return Err(CreateBackbufferError::SwapchainNotEnabled);
        }
        let present_family = device
            .present_queue_family()
            .ok_or(CreateBackbufferError::NoPresentQueue)?;
        let desired = self.desc.extent;
        if desired.width == 0 || desired.height == 0 {
            return Err(CreateBackbufferError::InvalidExtent {
                width: desired.width,
                height: desired.height,
            });
        }

        let physical_device = device.physical_device();
        // SAFETY: the surface and device share an instance (checked in new).
        let capabilities = unsafe { self.surface.query_capabilities(physical_device) }?;
        // SAFETY: as above.
        let formats = unsafe { self.surface.query_formats(physical_device) }?;
        // SAFETY: as above.
        let present_modes = unsafe { self.surface.query_present_modes(physical_device) }?;

        let surface_format = choose_surface_format(&formats, self.desc.preferred_format)
            .ok_or(CreateBackbufferError::NoSurfaceFormats)?;
        if present_modes.is_empty() {
            return Err(CreateBackbufferError::NoPresentModes);
        }
        let present_mode = choose_present_mode(&present_modes, self.desc.vsync);
        match (self.desc.vsync, present_mode) {
            (true, _) => tracing::info!("Present mode FIFO: vsync on"),
            (false, vk::PresentModeKHR::MAILBOX) => {
                tracing::info!("Present mode MAILBOX: no tearing, extra latency")
            }
            (false, vk::PresentModeKHR::IMMEDIATE) => {
                tracing::info!("Present mode IMMEDIATE: lowest latency, may tear")
            }
            (false, mode) => tracing::warn!(
                "Vsync off requested but only {:?} is available",
                mode
            ),
        }

        let (image_count, adjusted) = clamp_image_count(self.desc.image_count, &capabilities);
        if adjusted {
            tracing::warn!(
                "Backbuffer count {} unsupported; using {image_count} (min {}, max {})",
                self.desc.image_count,
                capabilities.min_image_count,
                capabilities.max_image_count
            );
        }
        let extent = choose_extent(&capabilities, desired);

        let graphics_family = device.queue_family(crate::queue::QueueType::Graphics);
        let families = [graphics_family, present_family];
        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(self.surface.raw_handle())
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(
                vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST,
            )
            .pre_transform(capabilities.current_transform)
            .composite_alpha(choose_composite_alpha(&capabilities))
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(self.handle);
        let create_info = if graphics_family == present_family {
            create_info.image_sharing_mode(vk::SharingMode::EXCLUSIVE)
        } else {
            create_info
                .image_sharing_mode(vk::SharingMode::CONCURRENT)
                .queue_family_indices(&families)
        };

        // SAFETY: the surface comes from this device's instance and the old
        // swapchain (possibly null) from this device.
        let handle = unsafe { device.create_raw_swapchain(&create_info) }?;
        self.destroy_swapchain();
        self.handle = handle;
        self.format = surface_format.format;
        self.extent = extent;

        // SAFETY: handle was just created from device.
        let images = unsafe { device.get_raw_swapchain_images(handle) }?;
        for (index, image) in images.into_iter().enumerate() {
            let view_info = vk::ImageViewCreateInfo::default()
                .image(image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(self.format)
                .components(vk::ComponentMapping::default())
                .subresource_range(color_range());
            // SAFETY: image belongs to the live swapchain.
            let view = unsafe { device.create_raw_image_view(&view_info) }
                .map_err(CreateBackbufferError::CreateImageView)?;

            let name = format!("backbuffer {index}");
            // SAFETY: image and view are live handles from device.
            if let Err(e) = unsafe { device.set_object_name_str(view, Some(&name)) } {
                tracing::warn!("Failed to name backbuffer view {:?}: {e}", view);
            }

            self.images.push(SwapchainImage {
                image,
                view,
                layout: LayoutTracker::new(vk::ImageLayout::PRESENT_SRC_KHR),
            });
        }

        tracing::info!(
            "Backbuffer {:?}: {} images, {}x{}, {:?}",
            handle,
            self.images.len(),
            extent.width,
            extent.height,
            self.format
        );
        Ok(())
    }

    fn destroy_views(&mut self) {
        for image in self.images.drain(..) {
            // SAFETY: the view came from parent; callers guarantee no
            // submission still references it.
            unsafe { self.parent.destroy_raw_image_view(image.view) };
        }
    }

    fn destroy_swapchain(&mut self) {
        self.destroy_views();
        if self.handle != vk::SwapchainKHR::null() {
            tracing::debug!("Dropping swapchain {:?}", self.handle);
            // SAFETY: the handle came from parent and its views are gone.
            unsafe { self.parent.destroy_raw_swapchain(self.handle) };
            self.handle = vk::SwapchainKHR::null();
        }
    }

    /// Acquire the next image, blocking until it is usable. `signal`, when
    /// given, is signalled as well for submissions that wait on it.
    pub fn acquire_next_image(
        &mut self,
        signal: Option<&Semaphore>,
    ) -> Result<AcquiredImage, AcquireImageError> {
        if let Some(index) = self.current {
            return Err(AcquireImageError::AlreadyAcquired(index));
        }
        let semaphore = signal.map_or(vk::Semaphore::null(), Semaphore::raw_semaphore);

        // SAFETY: the fence is unsignalled (reset after every acquire) and
        // the semaphore, if any, is an unsignalled handle from parent.
        let (index, suboptimal) = unsafe {
            self.parent.acquire_next_raw_swapchain_image(
                self.handle,
                u64::MAX,
                semaphore,
                self.acquire_fence.raw_fence(),
            )
        }
        .map_err(|e| match e {
            SwapchainCallError::Vulkan(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                AcquireImageError::OutOfDate
            }
            e => AcquireImageError::Swapchain(e),
        })?;

        // SAFETY: the acquire above will signal the fence.
        if let Err(e) = unsafe { self.acquire_fence.mark_submitted() } {
            tracing::warn!("Acquire fence state out of sync: {e}");
        }
        {
            let _span = tracing::debug_span!("backbuffer_acquire_wait").entered();
            self.acquire_fence.wait(u64::MAX)?;
        }
        // SAFETY: the wait succeeded so the fence is no longer pending.
        unsafe { self.acquire_fence.reset() }.map_err(AcquireImageError::ResetFence)?;

        self.current = Some(index);
        Ok(AcquiredImage { index, suboptimal })
    }

    /// Present the acquired image after `wait` signals. Returns `Ok(true)`
    /// when the swapchain is suboptimal.
    pub fn present(&mut self, wait: Option<&Semaphore>) -> Result<bool, PresentError> {
        let index = self.current.take().ok_or(PresentError::NoAcquiredImage)?;
        if let Some(image) = self.images.get(index as usize)
            && image.layout.current() != vk::ImageLayout::PRESENT_SRC_KHR
        {
            tracing::warn!(
                "Presenting backbuffer image {index} in {:?}",
                image.layout.current()
            );
        }

        let swapchains = [self.handle];
        let indices = [index];
        let waits: Vec<vk::Semaphore> = wait.map(Semaphore::raw_semaphore).into_iter().collect();
        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&waits)
            .swapchains(&swapchains)
            .image_indices(&indices);

        // SAFETY: the image was acquired from this swapchain and the caller
        // recorded its transition to PRESENT_SRC_KHR.
        unsafe { self.parent.queue_present(&present_info) }.map_err(|e| match e {
            SwapchainCallError::Vulkan(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                PresentError::OutOfDate
            }
            e => PresentError::Swapchain(e),
        })
    }

    /// The acquired image and its layout tracker.
    pub fn current_image_mut(&mut self) -> Option<(vk::Image, &mut LayoutTracker)> {
        let index = self.current? as usize;
        self.images
            .get_mut(index)
            .map(|image| (image.image, &mut image.layout))
    }

    pub fn current_index(&self) -> Option<u32> {
        self.current
    }

    pub fn current_image_view(&self) -> Option<vk::ImageView> {
        self.images.get(self.current? as usize).map(|i| i.view)
    }

    pub fn subresource_range(&self) -> vk::ImageSubresourceRange {
        color_range()
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn format(&self) -> vk::Format {
        self.format
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    pub fn raw_swapchain(&self) -> vk::SwapchainKHR {
        self.handle
    }

    pub fn parent(&self) -> &Arc<Device> {
        &self.parent
    }
}

impl<T: HasDisplayHandle + HasWindowHandle> Drop for Backbuffer<T> {
    fn drop(&mut self) {
        self.destroy_swapchain();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(min: u32, max: u32) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: min,
            max_image_count: max,
            ..Default::default()
        }
    }

    #[test]
    fn image_count_is_clamped_with_flag() {
        assert_eq!(clamp_image_count(3, &caps(2, 8)), (3, false));
        assert_eq!(clamp_image_count(1, &caps(2, 8)), (2, true));
        assert_eq!(clamp_image_count(5, &caps(2, 3)), (3, true));
        // A max of 0 means no upper bound.
        assert_eq!(clamp_image_count(16, &caps(2, 0)), (16, false));
    }

    #[test]
    fn vsync_always_uses_fifo() {
        let modes = [vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::FIFO];
        assert_eq!(choose_present_mode(&modes, true), vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn no_vsync_prefers_mailbox_then_immediate_then_fifo() {
        use vk::PresentModeKHR as M;
        assert_eq!(
            choose_present_mode(&[M::FIFO, M::IMMEDIATE, M::MAILBOX], false),
            M::MAILBOX
        );
        assert_eq!(choose_present_mode(&[M::FIFO, M::IMMEDIATE], false), M::IMMEDIATE);
        assert_eq!(choose_present_mode(&[M::FIFO], false), M::FIFO);
    }

    #[test]
    fn surface_format_prefers_requested_then_bgra_srgb() {
        let rgba = vk::SurfaceFormatKHR {
            format: vk::Format::R8G8B8A8_UNORM,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        };
        let bgra = vk::SurfaceFormatKHR {
            format: vk::Format::B8G8R8A8_UNORM,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        };
        let formats = [rgba, bgra];
        assert_eq!(
            choose_surface_format(&formats, Some(vk::Format::R8G8B8A8_UNORM)),
            Some(rgba)
        );
        assert_eq!(choose_surface_format(&formats, None), Some(bgra));
        assert_eq!(choose_surface_format(&[], None), None);
    }

    #[test]
    fn extent_follows_surface_unless_variable() {
        let fixed = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: 1280,
                height: 720,
            },
            ..Default::default()
        };
        let wanted = vk::Extent2D {
            width: 4000,
            height: 200,
        };
        assert_eq!(choose_extent(&fixed, wanted).width, 1280);

        let variable = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D {
                width: 640,
                height: 480,
            },
            max_image_extent: vk::Extent2D {
                width: 1920,
                height: 1080,
            },
            ..Default::default()
        };
        let chosen = choose_extent(&variable, wanted);
        assert_eq!((chosen.width, chosen.height), (1920, 480));
    }

    #[test]
    fn composite_alpha_prefers_opaque() {
        let capabilities = vk::SurfaceCapabilitiesKHR {
            supported_composite_alpha: vk::CompositeAlphaFlagsKHR::PRE_MULTIPLIED
                | vk::CompositeAlphaFlagsKHR::OPAQUE,
            ..Default::default()
        };
        assert_eq!(
            choose_composite_alpha(&capabilities),
            vk::CompositeAlphaFlagsKHR::OPAQUE
        );
    }
}
