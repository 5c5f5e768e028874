use std::sync::Arc;

use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use thiserror::Error;

use crate::instance::Instance;

#[derive(Debug, Error)]
pub enum CreateSurfaceError {
    #[error("Couldn't get display handle: {0}")]
    InvalidDisplayHandle(raw_window_handle::HandleError),
    #[error("Couldn't get window handle: {0}")]
    InvalidWindowHandle(raw_window_handle::HandleError),
    #[error("Vulkan surface creation failed: {0}")]
    Vulkan(vk::Result),
    #[error("Instance was created without surface extensions")]
    MissingExtension,
}

#[derive(Debug, Error)]
pub enum SurfaceSupportError {
    #[error("Surface extension is not loaded")]
    ExtensionNotLoaded,
    #[error("Vulkan error checking surface support: {0}")]
    Vulkan(vk::Result),
}

#[derive(Debug, Error)]
pub enum SurfaceQueryError {
    #[error("Surface extension is not loaded")]
    ExtensionNotLoaded,
    #[error("Vulkan error querying surface: {0}")]
    Vulkan(vk::Result),
}

/// A presentable window surface.
///
/// Holds the window source alive for as long as the surface exists. The
/// [`Backbuffer`](crate::backbuffer::Backbuffer) built on it keeps an
/// `Arc<Surface<T>>`.
pub struct Surface<T: HasWindowHandle + HasDisplayHandle> {
    parent_instance: Arc<Instance>,
    handle: vk::SurfaceKHR,
    _source: Arc<T>,
}

impl<T: HasWindowHandle + HasDisplayHandle> std::fmt::Debug for Surface<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Surface")
            .field("handle", &self.handle)
            .field("parent", &self.parent_instance)
            .finish_non_exhaustive()
    }
}

impl<T: HasWindowHandle + HasDisplayHandle> Surface<T> {
    /// # Safety
    /// Must be dropped when the window system invalidates the surface (winit
    /// `suspended`), and no in-flight GPU work may reference it at drop.
    pub unsafe fn new(
        instance: &Arc<Instance>,
        source: Arc<T>,
    ) -> Result<Self, CreateSurfaceError> {
        // SAFETY: we hold Arcs to both the instance and the source, so both
        // outlive the surface.
        let handle = unsafe { instance.create_raw_surface(source.as_ref()) }?;
        tracing::debug!("Created surface {:?}", handle);
        Ok(Self {
            parent_instance: Arc::clone(instance),
            handle,
            _source: source,
        })
    }

    pub fn get_parent(&self) -> &Arc<Instance> {
        &self.parent_instance
    }

    pub fn raw_handle(&self) -> vk::SurfaceKHR {
        self.handle
    }

    /// # Safety
    /// `physical_device` must come from the same instance as this surface.
    pub unsafe fn supports_queue_family(
        &self,
        physical_device: vk::PhysicalDevice,
        queue_family_index: u32,
    ) -> Result<bool, SurfaceSupportError> {
        // SAFETY: caller guarantees provenance; self.handle is live.
        unsafe {
            self.parent_instance.get_raw_physical_device_surface_support(
                physical_device,
                queue_family_index,
                self.handle,
            )
        }
    }

    /// # Safety
    /// `physical_device` must come from the same instance as this surface.
    pub unsafe fn query_capabilities(
        &self,
        physical_device: vk::PhysicalDevice,
    ) -> Result<vk::SurfaceCapabilitiesKHR, SurfaceQueryError> {
        // SAFETY: caller guarantees provenance.
        unsafe {
            self.parent_instance
                .get_surface_capabilities(physical_device, self.handle)
        }
    }

    /// # Safety
    /// `physical_device` must come from the same instance as this surface.
    pub unsafe fn query_formats(
        &self,
        physical_device: vk::PhysicalDevice,
    ) -> Result<Vec<vk::SurfaceFormatKHR>, SurfaceQueryError> {
        // SAFETY: caller guarantees provenance.
        unsafe {
            self.parent_instance
                .get_surface_formats(physical_device, self.handle)
        }
    }

    /// # Safety
    /// `physical_device` must come from the same instance as this surface.
    pub unsafe fn query_present_modes(
        &self,
        physical_device: vk::PhysicalDevice,
    ) -> Result<Vec<vk::PresentModeKHR>, SurfaceQueryError> {
        // SAFETY: caller guarantees provenance.
        unsafe {
            self.parent_instance
                .get_surface_present_modes(physical_device, self.handle)
        }
    }
}

impl<T: HasWindowHandle + HasDisplayHandle> Drop for Surface<T> {
    fn drop(&mut self) {
        tracing::debug!("Dropping surface {:?}", self.handle);
        // SAFETY: every swapchain built on this surface holds an Arc to it
        // and is therefore already gone.
        unsafe { self.parent_instance.destroy_raw_surface(self.handle) };
    }
}
