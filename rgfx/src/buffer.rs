//! Linear GPU memory ([`Buffer`]).
//!
//! - [`BufferType::Static`]: device-local, filled once at creation through a
//!   staging copy and immutable afterwards.
//! - [`BufferType::Dynamic`]: host-visible and coherent, persistently mapped
//!   and rewritable with [`Buffer::write`].
//!
//! [`BufferHandle`] lets recording helpers take any buffer-like wrapper.

use std::sync::Arc;

use ash::vk;
use bytemuck::Pod;
use gpu_allocator::vulkan::Allocation;
use thiserror::Error;

use crate::device::{AllocateMemoryError, Device, MemoryUsage};
use crate::queue::QueueType;
use crate::upload::{self, UploadError};

/// Types that expose a raw `VkBuffer` handle.
pub trait BufferHandle {
    fn raw_buffer(&self) -> vk::Buffer;
}

impl<T> BufferHandle for &T
where
    T: BufferHandle + ?Sized,
{
    fn raw_buffer(&self) -> vk::Buffer {
        (*self).raw_buffer()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferType {
    /// Device-local, written once at creation.
    Static,
    /// Host-visible, rewritable. Callers synchronise with the GPU.
    Dynamic,
}

impl BufferType {
    fn memory_usage(self) -> MemoryUsage {
        match self {
            BufferType::Static => MemoryUsage::GpuOnly,
            BufferType::Dynamic => MemoryUsage::CpuToGpu,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BufferDesc<'a> {
    pub buffer_type: BufferType,
    pub usage: vk::BufferUsageFlags,
    /// Ignored when smaller than `data`.
    pub size: vk::DeviceSize,
    pub data: Option<&'a [u8]>,
}

impl<'a> BufferDesc<'a> {
    /// A buffer sized to and filled with `data`.
    pub fn from_pod<T: Pod>(
        buffer_type: BufferType,
        usage: vk::BufferUsageFlags,
        data: &'a [T],
    ) -> Self {
        let bytes: &'a [u8] = bytemuck::cast_slice(data);
        Self {
            buffer_type,
            usage,
            size: bytes.len() as vk::DeviceSize,
            data: Some(bytes),
        }
    }

    /// An uninitialised buffer of `size` bytes.
    pub fn empty(
        buffer_type: BufferType,
        usage: vk::BufferUsageFlags,
        size: vk::DeviceSize,
    ) -> Self {
        Self {
            buffer_type,
            usage,
            size,
            data: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum CreateBufferError {
    #[error("Static buffers must be created with initial data")]
    MissingStaticData,
    #[error("Buffer size is zero")]
    ZeroSize,
    #[error("Vulkan error creating buffer: {0}")]
    CreateBuffer(vk::Result),
    #[error("Failed to allocate buffer memory: {0}")]
    AllocateMemory(#[from] AllocateMemoryError),
    #[error("Vulkan error binding buffer memory: {0}")]
    BindMemory(vk::Result),
    #[error("Failed to write initial data: {0}")]
    InitialWrite(#[from] WriteBufferError),
    #[error("Failed to create staging buffer: {0}")]
    Staging(Box<CreateBufferError>),
    #[error("Static buffer upload failed: {0}")]
    Upload(#[from] UploadError),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WriteBufferError {
    #[error("Static buffers cannot be written after creation")]
    StaticBuffer,
    #[error(
        "Write of {data_bytes} bytes at offset {offset} overruns buffer of \
         {buffer_bytes} bytes"
    )]
    OutOfBounds {
        offset: usize,
        data_bytes: usize,
        buffer_bytes: usize,
    },
    #[error("Allocation is not host-mapped")]
    NotMapped,
}

/// Copy `data` into the host view of a buffer at `offset`.
///
/// `mapped` is the persistently mapped allocation for dynamic buffers.
/// Static buffers are always rejected and `mapped` is left untouched.
pub fn write_host_bytes(
    buffer_type: BufferType,
    mapped: Option<&mut [u8]>,
    offset: usize,
    data: &[u8],
) -> Result<(), WriteBufferError> {
    if buffer_type == BufferType::Static {
        return Err(WriteBufferError::StaticBuffer);
    }
    let mapped = mapped.ok_or(WriteBufferError::NotMapped)?;
    let end = offset
        .checked_add(data.len())
        .filter(|&end| end <= mapped.len())
        .ok_or(WriteBufferError::OutOfBounds {
            offset,
            data_bytes: data.len(),
            buffer_bytes: mapped.len(),
        })?;
    mapped[offset..end].copy_from_slice(data);
    Ok(())
}

pub struct Buffer {
    parent: Arc<Device>,
    handle: vk::Buffer,
    allocation: Option<Allocation>,
    size: vk::DeviceSize,
    usage: vk::BufferUsageFlags,
    buffer_type: BufferType,
}

impl std::fmt::Debug for Buffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Buffer")
            .field("handle", &self.handle)
            .field("size", &self.size)
            .field("buffer_type", &self.buffer_type)
            .finish_non_exhaustive()
    }
}

impl Buffer {
    /// Create a buffer and fill it with `desc.data`, if any.
    ///
    /// Static contents go through a staging buffer and a blocking copy on the
    /// graphics queue. Dynamic contents are written straight into the mapped
    /// allocation.
    pub fn new(
        device: &Arc<Device>,
        desc: &BufferDesc<'_>,
        name: Option<&str>,
    ) -> Result<Self, CreateBufferError> {
        let data = desc.data.filter(|data| !data.is_empty());
        if desc.buffer_type == BufferType::Static && data.is_none() {
            tracing::error!("Static buffer {name:?} created without data");
            return Err(CreateBufferError::MissingStaticData);
        }
        let size = desc
            .size
            .max(data.map_or(0, |data| data.len() as vk::DeviceSize));
        if size == 0 {
            return Err(CreateBufferError::ZeroSize);
        }

        let usage = desc.usage | vk::BufferUsageFlags::TRANSFER_DST;
        let create_info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        // SAFETY: create_info has no borrowed pointers.
        let handle = unsafe { device.create_raw_buffer(&create_info) }
            .map_err(CreateBufferError::CreateBuffer)?;

        // SAFETY: handle was just created from device.
        if let Err(e) = unsafe { device.set_object_name_str(handle, name) } {
            tracing::warn!("Failed to name buffer {:?}: {e}", handle);
        }

        // SAFETY: handle was created from device.
        let reqs = unsafe { device.get_raw_buffer_memory_requirements(handle) };
        let allocation = match device.allocate_memory(
            name.unwrap_or("buffer"),
            reqs,
            desc.buffer_type.memory_usage(),
            true,
        ) {
            Ok(allocation) => allocation,
            Err(e) => {
                // SAFETY: handle is unbound and unused.
                unsafe { device.destroy_raw_buffer(handle) };
                return Err(e.into());
            }
        };

        // SAFETY: allocation was made for handle's requirements and both
        // belong to device.
        if let Err(e) = unsafe {
            device.bind_raw_buffer_memory(
                handle,
                allocation.memory(),
                allocation.offset(),
            )
        } {
            if let Err(free_err) = device.free_memory(allocation) {
                tracing::error!("Failed to free buffer allocation: {free_err}");
            }
            // SAFETY: handle is unbound and unused.
            unsafe { device.destroy_raw_buffer(handle) };
            return Err(CreateBufferError::BindMemory(e));
        }

        let mut buffer = Self {
            parent: Arc::clone(device),
            handle,
            allocation: Some(allocation),
            size,
            usage,
            buffer_type: desc.buffer_type,
        };

        match (desc.buffer_type, data) {
            (BufferType::Dynamic, Some(data)) => buffer.write(data, 0)?,
            (BufferType::Static, Some(data)) => buffer.upload_static(data)?,
            (_, None) => {}
        }

        tracing::debug!(
            "Created {size}-byte {:?} buffer {:?}",
            desc.buffer_type,
            handle
        );
        Ok(buffer)
    }

    fn upload_static(&mut self, data: &[u8]) -> Result<(), CreateBufferError> {
        let staging = Buffer::new(
            &self.parent,
            &BufferDesc {
                buffer_type: BufferType::Dynamic,
                usage: vk::BufferUsageFlags::TRANSFER_SRC,
                size: data.len() as vk::DeviceSize,
                data: Some(data),
            },
            Some("buffer staging"),
        )
        .map_err(|e| CreateBufferError::Staging(Box::new(e)))?;

        let region = vk::BufferCopy::default().size(data.len() as vk::DeviceSize);
        let device = Arc::clone(&self.parent);
        upload::submit_blocking(&device, QueueType::Graphics, |cmd| {
            cmd.copy_buffer(&staging, &*self, &[region]);
        })?;
        Ok(())
    }

    /// Copy `data` into a dynamic buffer at `offset`.
    ///
    /// Static buffers reject every write and keep their contents.
    pub fn write(
        &mut self,
        data: &[u8],
        offset: vk::DeviceSize,
    ) -> Result<(), WriteBufferError> {
        let size = self.size as usize;
        let mapped = self
            .allocation
            .as_mut()
            .and_then(|allocation| allocation.mapped_slice_mut())
            .map(|bytes| &mut bytes[..size]);
        let result = match usize::try_from(offset) {
            Ok(offset) => write_host_bytes(self.buffer_type, mapped, offset, data),
            Err(_) => Err(WriteBufferError::OutOfBounds {
                offset: usize::MAX,
                data_bytes: data.len(),
                buffer_bytes: self.size as usize,
            }),
        };
        if let Err(e) = &result {
            tracing::warn!("Rejected write to buffer {:?}: {e}", self.handle);
        }
        result
    }

    pub fn write_pod<T: Pod>(
        &mut self,
        data: &[T],
        offset: vk::DeviceSize,
    ) -> Result<(), WriteBufferError> {
        self.write(bytemuck::cast_slice(data), offset)
    }

    /// Host view of a dynamic buffer's memory. `None` for static buffers.
    pub fn mapped_bytes(&self) -> Option<&[u8]> {
        self.allocation
            .as_ref()
            .and_then(|allocation| allocation.mapped_slice())
            .map(|bytes| &bytes[..self.size as usize])
    }

    pub fn raw_buffer(&self) -> vk::Buffer {
        self.handle
    }

    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    pub fn usage(&self) -> vk::BufferUsageFlags {
        self.usage
    }

    pub fn buffer_type(&self) -> BufferType {
        self.buffer_type
    }

    pub fn parent(&self) -> &Arc<Device> {
        &self.parent
    }
}

impl BufferHandle for Buffer {
    fn raw_buffer(&self) -> vk::Buffer {
        self.handle
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        tracing::debug!("Dropping buffer {:?}", self.handle);
        // SAFETY: handle was created from parent; owners wait for the GPU
        // before dropping buffers.
        unsafe { self.parent.destroy_raw_buffer(self.handle) };

        if let Some(allocation) = self.allocation.take()
            && let Err(e) = self.parent.free_memory(allocation)
        {
            tracing::error!("Failed to free GPU allocation: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_write_is_rejected_and_leaves_contents() {
        let mut memory = vec![0xAB_u8; 64];

        let result = write_host_bytes(
            BufferType::Static,
            Some(&mut memory),
            0,
            &[1, 2, 3, 4],
        );

        assert_eq!(result, Err(WriteBufferError::StaticBuffer));
        assert!(memory.iter().all(|&b| b == 0xAB));
    }

    #[test]
    fn dynamic_write_round_trips() {
        let mut memory = vec![0_u8; 256];
        let pattern: Vec<u8> = (0..64).map(|i| (i * 7 + 3) as u8).collect();

        write_host_bytes(BufferType::Dynamic, Some(&mut memory), 0, &pattern)
            .unwrap();

        assert_eq!(&memory[..64], pattern.as_slice());
        assert!(memory[64..].iter().all(|&b| b == 0));
    }

    #[test]
    fn dynamic_write_at_offset() {
        let mut memory = vec![0_u8; 16];

        write_host_bytes(BufferType::Dynamic, Some(&mut memory), 12, &[9; 4])
            .unwrap();

        assert_eq!(&memory[12..], &[9; 4]);
        assert_eq!(&memory[..12], &[0; 12]);
    }

    #[test]
    fn out_of_bounds_write_is_rejected() {
        let mut memory = vec![0_u8; 16];

        assert_eq!(
            write_host_bytes(BufferType::Dynamic, Some(&mut memory), 13, &[1; 4]),
            Err(WriteBufferError::OutOfBounds {
                offset: 13,
                data_bytes: 4,
                buffer_bytes: 16,
            })
        );
        assert_eq!(
            write_host_bytes(
                BufferType::Dynamic,
                Some(&mut memory),
                usize::MAX,
                &[1]
            ),
            Err(WriteBufferError::OutOfBounds {
                offset: usize::MAX,
                data_bytes: 1,
                buffer_bytes: 16,
            })
        );
        assert!(memory.iter().all(|&b| b == 0));
    }

    #[test]
    fn unmapped_dynamic_write_fails() {
        assert_eq!(
            write_host_bytes(BufferType::Dynamic, None, 0, &[1]),
            Err(WriteBufferError::NotMapped)
        );
    }

    #[test]
    fn desc_from_pod_sizes_to_data() {
        let data = [1.0_f32, 2.0, 3.0];

        let desc = BufferDesc::from_pod(
            BufferType::Static,
            vk::BufferUsageFlags::VERTEX_BUFFER,
            &data,
        );

        assert_eq!(desc.size, 12);
        assert_eq!(desc.data.map(<[u8]>::len), Some(12));
    }
}
