//! Sampler wrapper ([`Sampler`]).
//!
//! A sampler holds filtering and addressing state independently of any
//! image. The layout manager bakes one linear sampler into every texture
//! layout as an immutable sampler.

use std::sync::Arc;

use ash::vk;
use thiserror::Error;

use crate::device::Device;

#[derive(Debug, Error)]
pub enum CreateSamplerError {
    #[error("Vulkan error creating sampler: {0}")]
    Vulkan(vk::Result),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplerDesc {
    pub mag_filter: vk::Filter,
    pub min_filter: vk::Filter,
    pub mipmap_mode: vk::SamplerMipmapMode,
    /// Applied to U, V and W.
    pub address_mode: vk::SamplerAddressMode,
    pub max_lod: f32,
}

impl SamplerDesc {
    /// Trilinear filtering, repeat addressing, every mip level reachable.
    pub fn linear() -> Self {
        Self {
            mag_filter: vk::Filter::LINEAR,
            min_filter: vk::Filter::LINEAR,
            mipmap_mode: vk::SamplerMipmapMode::LINEAR,
            address_mode: vk::SamplerAddressMode::REPEAT,
            max_lod: vk::LOD_CLAMP_NONE,
        }
    }

    pub fn nearest() -> Self {
        Self {
            mag_filter: vk::Filter::NEAREST,
            min_filter: vk::Filter::NEAREST,
            mipmap_mode: vk::SamplerMipmapMode::NEAREST,
            address_mode: vk::SamplerAddressMode::CLAMP_TO_EDGE,
            max_lod: 0.0,
        }
    }
}

/// An owned `VkSampler`.
pub struct Sampler {
    parent: Arc<Device>,
    handle: vk::Sampler,
    desc: SamplerDesc,
}

impl std::fmt::Debug for Sampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sampler")
            .field("handle", &self.handle)
            .field("desc", &self.desc)
            .finish_non_exhaustive()
    }
}

impl Sampler {
    /// Anisotropy and depth comparison are disabled.
    pub fn new(
        device: &Arc<Device>,
        desc: &SamplerDesc,
        name: Option<&str>,
    ) -> Result<Self, CreateSamplerError> {
        let create_info = vk::SamplerCreateInfo::default()
            .mag_filter(desc.mag_filter)
            .min_filter(desc.min_filter)
            .mipmap_mode(desc.mipmap_mode)
            .address_mode_u(desc.address_mode)
            .address_mode_v(desc.address_mode)
            .address_mode_w(desc.address_mode)
            .anisotropy_enable(false)
            .compare_enable(false)
            .unnormalized_coordinates(false)
            .min_lod(0.0)
            .max_lod(desc.max_lod);

        // SAFETY: create_info holds no borrowed data.
        let handle = unsafe { device.create_raw_sampler(&create_info) }
            .map_err(CreateSamplerError::Vulkan)?;

        // SAFETY: handle was just created from device.
        if let Err(e) = unsafe { device.set_object_name_str(handle, name) } {
            tracing::warn!("Failed to name sampler {:?}: {e}", handle);
        }

        Ok(Self {
            parent: Arc::clone(device),
            handle,
            desc: *desc,
        })
    }

    pub fn raw_sampler(&self) -> vk::Sampler {
        self.handle
    }

    pub fn desc(&self) -> &SamplerDesc {
        &self.desc
    }
}

impl Drop for Sampler {
    fn drop(&mut self) {
        tracing::debug!("Dropping sampler {:?}", self.handle);
        // SAFETY: handle was created from parent. Layouts that bake it in
        // hold an Arc to this sampler and have been dropped.
        unsafe { self.parent.destroy_raw_sampler(self.handle) };
    }
}
