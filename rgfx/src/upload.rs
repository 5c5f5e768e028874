//! Blocking one-shot submissions for resource uploads.
//!
//! Static buffers and textures with initial data record their copies through
//! [`submit_blocking`], which does not return until the queue is idle.

use std::sync::Arc;

use ash::vk;
use thiserror::Error;

use crate::command::{
    BeginCommandBufferError, CommandBuffer, CreateCommandBufferError,
    EndCommandBufferError,
};
use crate::device::{Device, ExecuteError};
use crate::queue::QueueType;

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("Failed to allocate upload command buffer: {0}")]
    Allocate(#[from] CreateCommandBufferError),
    #[error("Failed to begin upload command buffer: {0}")]
    Begin(#[from] BeginCommandBufferError),
    #[error("Failed to end upload command buffer: {0}")]
    End(#[from] EndCommandBufferError),
    #[error("Upload submit failed: {0}")]
    Execute(#[from] ExecuteError),
    #[error("Waiting for upload queue failed: {0}")]
    Wait(vk::Result),
}

/// Record with `record`, submit to `queue_type` and wait for the queue to
/// idle.
pub fn submit_blocking(
    device: &Arc<Device>,
    queue_type: QueueType,
    record: impl FnOnce(&mut CommandBuffer),
) -> Result<(), UploadError> {
    let _span = tracing::debug_span!("submit_blocking", ?queue_type).entered();

    let mut cmd = CommandBuffer::new(device, queue_type, Some("upload"))?;
    cmd.begin()?;
    record(&mut cmd);
    cmd.end()?;

    device.execute(queue_type, &mut cmd, &[], None, None)?;
    device.wait(queue_type).map_err(UploadError::Wait)
}
