//! GPU synchronisation primitives: [`Fence`], [`Semaphore`] and the
//! per-frame [`FrameSemaphores`] pair.
//!
//! A [`Fence`] tracks whether it has been handed to a submission so that
//! waiting on a fence nothing will ever signal is reported as an error
//! instead of hanging forever.

use std::sync::Arc;

use ash::vk;
use thiserror::Error;

use crate::device::Device;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum CreateFenceError {
    #[error("Vulkan error creating fence: {0}")]
    Vulkan(vk::Result),
}

#[derive(Debug, Error)]
pub enum WaitFenceError {
    #[error("Fence wait timed out")]
    Timeout,
    #[error("Vulkan error waiting for fence: {0}")]
    Vulkan(vk::Result),
    #[error("Asked to wait for a fence that was never submitted")]
    NotSubmitted,
}

#[derive(Debug, Error)]
pub enum MarkSubmittedError {
    #[error("Fence is already marked as submitted")]
    AlreadySubmitted,
}

#[derive(Debug, Error)]
pub enum CreateSemaphoreError {
    #[error("Vulkan error creating semaphore: {0}")]
    Vulkan(vk::Result),
}

// ---------------------------------------------------------------------------
// Fence
// ---------------------------------------------------------------------------

#[derive(Debug, PartialEq, Eq)]
enum FenceStatus {
    Submitted,
    Ready,
}

/// An owned binary fence for CPU to GPU synchronisation.
pub struct Fence {
    parent: Arc<Device>,
    handle: vk::Fence,
    status: FenceStatus,
}

impl std::fmt::Debug for Fence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fence")
            .field("handle", &self.handle)
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

impl Fence {
    /// Create a fence.
    ///
    /// A fence created `signaled` counts as submitted, so the first wait in
    /// a frame loop returns immediately.
    pub fn new(
        device: &Arc<Device>,
        signaled: bool,
        name: Option<&str>,
    ) -> Result<Self, CreateFenceError> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        let create_info = vk::FenceCreateInfo::default().flags(flags);

        // SAFETY: create_info has no borrowed pointers.
        let handle = unsafe { device.create_raw_fence(&create_info) }
            .map_err(CreateFenceError::Vulkan)?;

        // SAFETY: handle was just created from device.
        if let Err(e) = unsafe { device.set_object_name_str(handle, name) } {
            tracing::warn!("Failed to name fence {:?}: {e}", handle);
        }

        Ok(Self {
            parent: Arc::clone(device),
            handle,
            status: if signaled {
                FenceStatus::Submitted
            } else {
                FenceStatus::Ready
            },
        })
    }

    /// Block until the fence signals or `timeout_ns` elapses.
    ///
    /// `u64::MAX` waits indefinitely; smaller values make the wait
    /// cancellable by the caller.
    pub fn wait(&self, timeout_ns: u64) -> Result<(), WaitFenceError> {
        if self.status != FenceStatus::Submitted {
            return Err(WaitFenceError::NotSubmitted);
        }
        // SAFETY: handle is a live fence from parent.
        unsafe {
            self.parent
                .wait_for_raw_fences(&[self.handle], true, timeout_ns)
        }
        .map_err(|e| match e {
            vk::Result::TIMEOUT => WaitFenceError::Timeout,
            e => WaitFenceError::Vulkan(e),
        })
    }

    /// `Ok(true)` when the fence has already signalled.
    pub fn wait_nonblocking(&self) -> Result<bool, WaitFenceError> {
        match self.wait(0) {
            Ok(()) => Ok(true),
            Err(WaitFenceError::Timeout) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Return the fence to the unsignalled state.
    ///
    /// # Safety
    /// The fence must not be pending on any queue submission.
    pub unsafe fn reset(&mut self) -> Result<(), vk::Result> {
        debug_assert!(self.status == FenceStatus::Submitted);
        // SAFETY: caller guarantees the fence is not pending.
        unsafe { self.parent.reset_raw_fences(&[self.handle]) }?;
        self.status = FenceStatus::Ready;
        Ok(())
    }

    /// Wait for the fence, then reset it for the next submission.
    ///
    /// # Safety
    /// No other thread may submit the raw handle between the wait and the
    /// reset.
    pub unsafe fn wait_and_reset(
        &mut self,
        timeout_ns: u64,
    ) -> Result<(), WaitFenceError> {
        self.wait(timeout_ns)?;
        // SAFETY: the wait succeeded, so the fence is signalled and idle.
        unsafe { self.reset() }.map_err(WaitFenceError::Vulkan)
    }

    /// # Safety
    /// The fence must actually have been passed to an operation that will
    /// signal it.
    pub unsafe fn mark_submitted(&mut self) -> Result<(), MarkSubmittedError> {
        if self.status == FenceStatus::Ready {
            self.status = FenceStatus::Submitted;
            Ok(())
        } else {
            Err(MarkSubmittedError::AlreadySubmitted)
        }
    }

    pub fn raw_fence(&self) -> vk::Fence {
        self.handle
    }

    pub fn parent(&self) -> &Arc<Device> {
        &self.parent
    }

    /// Unsignalled and free to hand to a submission.
    pub fn is_ready(&self) -> bool {
        self.status == FenceStatus::Ready
    }

    /// Handed to a submission (or created signalled) and safe to wait on.
    pub fn is_submitted(&self) -> bool {
        self.status == FenceStatus::Submitted
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        tracing::debug!("Dropping fence {:?}", self.handle);
        // SAFETY: handle came from parent; owners wait for pending work
        // before dropping.
        unsafe { self.parent.destroy_raw_fence(self.handle) };
    }
}

// ---------------------------------------------------------------------------
// Semaphore
// ---------------------------------------------------------------------------

/// An owned binary semaphore for GPU to GPU ordering.
pub struct Semaphore {
    parent: Arc<Device>,
    handle: vk::Semaphore,
}

impl std::fmt::Debug for Semaphore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Semaphore")
            .field("handle", &self.handle)
            .finish_non_exhaustive()
    }
}

impl Semaphore {
    pub fn new(
        device: &Arc<Device>,
        name: Option<&str>,
    ) -> Result<Self, CreateSemaphoreError> {
        let create_info = vk::SemaphoreCreateInfo::default();

        // SAFETY: create_info has no borrowed pointers.
        let handle = unsafe { device.create_raw_semaphore(&create_info) }
            .map_err(CreateSemaphoreError::Vulkan)?;

        // SAFETY: handle was just created from device.
        if let Err(e) = unsafe { device.set_object_name_str(handle, name) } {
            tracing::warn!("Failed to name semaphore {:?}: {e}", handle);
        }

        Ok(Self {
            parent: Arc::clone(device),
            handle,
        })
    }

    pub fn raw_semaphore(&self) -> vk::Semaphore {
        self.handle
    }

    pub fn parent(&self) -> &Arc<Device> {
        &self.parent
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        tracing::debug!("Dropping semaphore {:?}", self.handle);
        // SAFETY: handle came from parent and no queue operation still
        // references it once its owner drops.
        unsafe { self.parent.destroy_raw_semaphore(self.handle) };
    }
}

/// The two semaphores a presented frame needs.
#[derive(Debug)]
pub struct FrameSemaphores {
    /// Signalled by acquire, waited on by the frame's submission.
    pub image_acquired: Semaphore,
    /// Signalled by the frame's submission, waited on by present.
    pub render_finished: Semaphore,
}

impl FrameSemaphores {
    pub fn new(device: &Arc<Device>) -> Result<Self, CreateSemaphoreError> {
        Ok(Self {
            image_acquired: Semaphore::new(device, Some("image acquired"))?,
            render_finished: Semaphore::new(device, Some("render finished"))?,
        })
    }
}
