//! Fixed descriptor set layouts for the bundled shaders.
//!
//! | layout            | bindings                                          |
//! |-------------------|---------------------------------------------------|
//! | `diffuse`         | b0 combined image sampler, fragment, linear       |
//! | `normal`          | b0 combined image sampler, fragment, linear       |
//! | `mask`            | b0 combined image sampler, fragment, linear       |
//! | `vertex_shader`   | b0 dynamic UBO, b1 UBO, vertex                    |
//! | `fragment_shader` | b0 dynamic UBO, fragment                          |
//! | `all_shaders`     | b0 UBO, all graphics stages                       |

use std::sync::Arc;

use ash::vk;
use thiserror::Error;

use crate::descriptor::{
    CreateDescriptorSetLayoutError, DescriptorBindingDesc, DescriptorSetLayout,
};
use crate::device::Device;
use crate::sampler::{CreateSamplerError, Sampler, SamplerDesc};

#[derive(Debug, Error)]
pub enum CreateLayoutManagerError {
    #[error("Failed to create linear sampler: {0}")]
    Sampler(#[from] CreateSamplerError),
    #[error("Failed to create descriptor set layout: {0}")]
    Layout(#[from] CreateDescriptorSetLayoutError),
}

/// One texture at binding 0 read by the fragment stage through `sampler`.
pub fn texture_bindings(sampler: Option<Arc<Sampler>>) -> Vec<DescriptorBindingDesc> {
    let mut binding = DescriptorBindingDesc::new(
        0,
        vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
        vk::ShaderStageFlags::FRAGMENT,
    );
    binding.immutable_sampler = sampler;
    vec![binding]
}

pub fn vertex_shader_bindings() -> Vec<DescriptorBindingDesc> {
    vec![
        DescriptorBindingDesc::new(
            0,
            vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC,
            vk::ShaderStageFlags::VERTEX,
        ),
        DescriptorBindingDesc::new(
            1,
            vk::DescriptorType::UNIFORM_BUFFER,
            vk::ShaderStageFlags::VERTEX,
        ),
    ]
}

pub fn fragment_shader_bindings() -> Vec<DescriptorBindingDesc> {
    vec![DescriptorBindingDesc::new(
        0,
        vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC,
        vk::ShaderStageFlags::FRAGMENT,
    )]
}

pub fn all_shaders_bindings() -> Vec<DescriptorBindingDesc> {
    vec![DescriptorBindingDesc::new(
        0,
        vk::DescriptorType::UNIFORM_BUFFER,
        vk::ShaderStageFlags::ALL_GRAPHICS,
    )]
}

/// Owns the linear sampler and the layouts built on it.
#[derive(Debug)]
pub struct DescriptorLayoutManager {
    pub diffuse: DescriptorSetLayout,
    pub normal: DescriptorSetLayout,
    pub mask: DescriptorSetLayout,
    pub vertex_shader: DescriptorSetLayout,
    pub fragment_shader: DescriptorSetLayout,
    pub all_shaders: DescriptorSetLayout,
    linear_sampler: Arc<Sampler>,
}

impl DescriptorLayoutManager {
    pub fn new(device: &Arc<Device>) -> Result<Self, CreateLayoutManagerError> {
        let linear_sampler = Arc::new(Sampler::new(
            device,
            &SamplerDesc::linear(),
            Some("linear sampler"),
        )?);
        let texture = |name| {
            DescriptorSetLayout::new(
                device,
                &texture_bindings(Some(Arc::clone(&linear_sampler))),
                Some(name),
            )
        };

        Ok(Self {
            diffuse: texture("diffuse layout")?,
            normal: texture("normal layout")?,
            mask: texture("mask layout")?,
            vertex_shader: DescriptorSetLayout::new(
                device,
                &vertex_shader_bindings(),
                Some("vertex shader layout"),
            )?,
            fragment_shader: DescriptorSetLayout::new(
                device,
                &fragment_shader_bindings(),
                Some("fragment shader layout"),
            )?,
            all_shaders: DescriptorSetLayout::new(
                device,
                &all_shaders_bindings(),
                Some("all shaders layout"),
            )?,
            linear_sampler,
        })
    }

    pub fn linear_sampler(&self) -> &Arc<Sampler> {
        &self.linear_sampler
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::descriptor_counts;

    #[test]
    fn vertex_layout_has_dynamic_then_plain_ubo() {
        let bindings = vertex_shader_bindings();
        let kinds: Vec<_> = bindings
            .iter()
            .map(|b| (b.binding, b.descriptor_type))
            .collect();
        assert_eq!(
            kinds,
            [
                (0, vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC),
                (1, vk::DescriptorType::UNIFORM_BUFFER),
            ]
        );
        assert!(
            bindings
                .iter()
                .all(|b| b.stage_flags == vk::ShaderStageFlags::VERTEX)
        );
    }

    #[test]
    fn texture_layout_uses_one_sampler_descriptor() {
        let bindings = texture_bindings(None);
        assert_eq!(
            descriptor_counts(&bindings),
            [(vk::DescriptorType::COMBINED_IMAGE_SAMPLER, 1)]
        );
        assert_eq!(bindings[0].stage_flags, vk::ShaderStageFlags::FRAGMENT);
    }

    #[test]
    fn shared_layouts_use_one_descriptor_each() {
        assert_eq!(
            descriptor_counts(&fragment_shader_bindings()),
            [(vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC, 1)]
        );
        assert_eq!(
            descriptor_counts(&all_shaders_bindings()),
            [(vk::DescriptorType::UNIFORM_BUFFER, 1)]
        );
    }
}
