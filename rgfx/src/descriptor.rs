//! Descriptor set layouts, pools and sets.
//!
//! [`DescriptorAllocator`] owns fixed-capacity pools sized from
//! [`DescriptorLimits`]. Allocation draws from the most recently added pool
//! and fails with [`AllocateDescriptorSetError::PoolExhausted`] once that
//! pool's budget for a descriptor type runs out; pools never grow on their
//! own. Sets are freed when their pool is destroyed, which happens after the
//! allocator and every [`DescriptorSet`] from the pool have dropped.

use std::sync::{Arc, Mutex};

use ash::vk;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::buffer::BufferHandle;
use crate::device::Device;
use crate::sampler::Sampler;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum CreateDescriptorSetLayoutError {
    #[error("Vulkan error creating descriptor set layout: {0}")]
    Vulkan(vk::Result),
}

#[derive(Debug, Error)]
pub enum CreateDescriptorPoolError {
    #[error("Descriptor limits allow no descriptors at all")]
    Empty,
    #[error("Vulkan error creating descriptor pool: {0}")]
    Vulkan(vk::Result),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AllocateDescriptorSetError {
    #[error(
        "Descriptor pool exhausted for {descriptor_type:?}: requested \
         {requested}, {available} left"
    )]
    PoolExhausted {
        descriptor_type: vk::DescriptorType,
        requested: u32,
        available: u32,
    },
    #[error("Descriptor pool has no sets left")]
    OutOfSets,
    #[error("Vulkan error allocating descriptor set: {0}")]
    Vulkan(vk::Result),
}

// ---------------------------------------------------------------------------
// Limits and budgets
// ---------------------------------------------------------------------------

/// Per-type capacity of one descriptor pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DescriptorLimits {
    pub storage_buffer: u32,
    pub uniform_buffer: u32,
    pub uniform_buffer_dynamic: u32,
    pub combined_image_sampler: u32,
}

impl Default for DescriptorLimits {
    fn default() -> Self {
        Self {
            storage_buffer: 1,
            uniform_buffer: 3,
            uniform_buffer_dynamic: 2,
            combined_image_sampler: 1000,
        }
    }
}

impl DescriptorLimits {
    /// Pool sizes for every type with a non-zero limit.
    pub fn pool_sizes(&self) -> Vec<vk::DescriptorPoolSize> {
        [
            (vk::DescriptorType::STORAGE_BUFFER, self.storage_buffer),
            (vk::DescriptorType::UNIFORM_BUFFER, self.uniform_buffer),
            (
                vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC,
                self.uniform_buffer_dynamic,
            ),
            (
                vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                self.combined_image_sampler,
            ),
        ]
        .into_iter()
        .filter(|&(_, count)| count > 0)
        .map(|(ty, descriptor_count)| vk::DescriptorPoolSize {
            ty,
            descriptor_count,
        })
        .collect()
    }

    /// Every set uses at least one descriptor, so the sum bounds the set
    /// count.
    pub fn max_sets(&self) -> u32 {
        self.pool_sizes()
            .iter()
            .map(|s| s.descriptor_count)
            .fold(0u32, u32::saturating_add)
    }
}

/// What is left in one pool.
///
/// Mirrors the driver's accounting so exhaustion is reported with the
/// offending type instead of a bare `ERROR_OUT_OF_POOL_MEMORY`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolBudget {
    remaining: Vec<(vk::DescriptorType, u32)>,
    sets_remaining: u32,
}

impl PoolBudget {
    pub fn new(pool_sizes: &[vk::DescriptorPoolSize], max_sets: u32) -> Self {
        Self {
            remaining: pool_sizes
                .iter()
                .map(|s| (s.ty, s.descriptor_count))
                .collect(),
            sets_remaining: max_sets,
        }
    }

    pub fn remaining(&self, descriptor_type: vk::DescriptorType) -> u32 {
        self.remaining
            .iter()
            .find(|(ty, _)| *ty == descriptor_type)
            .map_or(0, |&(_, n)| n)
    }

    pub fn sets_remaining(&self) -> u32 {
        self.sets_remaining
    }

    /// Take one set needing `counts`. Nothing is taken on failure.
    pub fn reserve(
        &mut self,
        counts: &[(vk::DescriptorType, u32)],
    ) -> Result<(), AllocateDescriptorSetError> {
        if self.sets_remaining == 0 {
            return Err(AllocateDescriptorSetError::OutOfSets);
        }
        for &(descriptor_type, requested) in counts {
            let available = self.remaining(descriptor_type);
            if requested > available {
                return Err(AllocateDescriptorSetError::PoolExhausted {
                    descriptor_type,
                    requested,
                    available,
                });
            }
        }
        for &(descriptor_type, requested) in counts {
            if let Some((_, n)) = self
                .remaining
                .iter_mut()
                .find(|(ty, _)| *ty == descriptor_type)
            {
                *n -= requested;
            }
        }
        self.sets_remaining -= 1;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// DescriptorSetLayout
// ---------------------------------------------------------------------------

/// A single binding slot.
#[derive(Debug, Clone)]
pub struct DescriptorBindingDesc {
    pub binding: u32,
    pub descriptor_type: vk::DescriptorType,
    pub count: u32,
    pub stage_flags: vk::ShaderStageFlags,
    /// Baked into the layout for every array element of this binding.
    pub immutable_sampler: Option<Arc<Sampler>>,
}

impl DescriptorBindingDesc {
    pub fn new(
        binding: u32,
        descriptor_type: vk::DescriptorType,
        stage_flags: vk::ShaderStageFlags,
    ) -> Self {
        Self {
            binding,
            descriptor_type,
            count: 1,
            stage_flags,
            immutable_sampler: None,
        }
    }

    pub fn with_immutable_sampler(mut self, sampler: Arc<Sampler>) -> Self {
        self.immutable_sampler = Some(sampler);
        self
    }
}

/// Descriptor counts per type, summed over `bindings`.
pub fn descriptor_counts(
    bindings: &[DescriptorBindingDesc],
) -> Vec<(vk::DescriptorType, u32)> {
    let mut counts: Vec<(vk::DescriptorType, u32)> = Vec::new();
    for b in bindings {
        match counts.iter_mut().find(|(ty, _)| *ty == b.descriptor_type) {
            Some((_, n)) => *n += b.count,
            None => counts.push((b.descriptor_type, b.count)),
        }
    }
    counts
}

/// An owned `VkDescriptorSetLayout`.
pub struct DescriptorSetLayout {
    parent: Arc<Device>,
    handle: vk::DescriptorSetLayout,
    counts: Vec<(vk::DescriptorType, u32)>,
    _samplers: Vec<Arc<Sampler>>,
}

impl std::fmt::Debug for DescriptorSetLayout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DescriptorSetLayout")
            .field("handle", &self.handle)
            .field("counts", &self.counts)
            .finish_non_exhaustive()
    }
}

impl DescriptorSetLayout {
    pub fn new(
        device: &Arc<Device>,
        bindings: &[DescriptorBindingDesc],
        name: Option<&str>,
    ) -> Result<Self, CreateDescriptorSetLayoutError> {
        let immutable: Vec<Vec<vk::Sampler>> = bindings
            .iter()
            .map(|b| match &b.immutable_sampler {
                Some(s) => vec![s.raw_sampler(); b.count as usize],
                None => Vec::new(),
            })
            .collect();
        let vk_bindings: Vec<vk::DescriptorSetLayoutBinding<'_>> = bindings
            .iter()
            .zip(&immutable)
            .map(|(b, samplers)| {
                let binding = vk::DescriptorSetLayoutBinding::default()
                    .binding(b.binding)
                    .descriptor_type(b.descriptor_type)
                    .descriptor_count(b.count)
                    .stage_flags(b.stage_flags);
                if samplers.is_empty() {
                    binding
                } else {
                    binding.immutable_samplers(samplers)
                }
            })
            .collect();
        let create_info =
            vk::DescriptorSetLayoutCreateInfo::default().bindings(&vk_bindings);

        // SAFETY: create_info borrows locals that outlive the call; the
        // immutable samplers are live wrappers from device.
        let handle =
            unsafe { device.create_raw_descriptor_set_layout(&create_info) }
                .map_err(CreateDescriptorSetLayoutError::Vulkan)?;

        // SAFETY: handle was just created from device.
        if let Err(e) = unsafe { device.set_object_name_str(handle, name) } {
            tracing::warn!(
                "Failed to name descriptor set layout {:?}: {e}",
                handle
            );
        }

        Ok(Self {
            parent: Arc::clone(device),
            handle,
            counts: descriptor_counts(bindings),
            _samplers: bindings
                .iter()
                .filter_map(|b| b.immutable_sampler.clone())
                .collect(),
        })
    }

    pub fn raw_descriptor_set_layout(&self) -> vk::DescriptorSetLayout {
        self.handle
    }

    /// Descriptors one set of this layout consumes, per type.
    pub fn counts(&self) -> &[(vk::DescriptorType, u32)] {
        &self.counts
    }
}

impl Drop for DescriptorSetLayout {
    fn drop(&mut self) {
        tracing::debug!("Dropping descriptor set layout {:?}", self.handle);
        // SAFETY: handle was created from parent. Sets allocated with it
        // remain valid after the layout is destroyed.
        unsafe { self.parent.destroy_raw_descriptor_set_layout(self.handle) };
    }
}

// ---------------------------------------------------------------------------
// Pools and allocator
// ---------------------------------------------------------------------------

struct RawPool {
    parent: Arc<Device>,
    handle: vk::DescriptorPool,
}

impl Drop for RawPool {
    fn drop(&mut self) {
        tracing::debug!("Dropping descriptor pool {:?}", self.handle);
        // SAFETY: handle was created from parent. Every set from this pool
        // holds an Arc to it, so none remain.
        unsafe { self.parent.destroy_raw_descriptor_pool(self.handle) };
    }
}

struct Pool {
    raw: Arc<RawPool>,
    budget: PoolBudget,
}

/// Allocates [`DescriptorSet`]s from fixed-capacity pools.
pub struct DescriptorAllocator {
    parent: Arc<Device>,
    limits: DescriptorLimits,
    pools: Mutex<Vec<Pool>>,
}

impl std::fmt::Debug for DescriptorAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DescriptorAllocator")
            .field("limits", &self.limits)
            .finish_non_exhaustive()
    }
}

impl DescriptorAllocator {
    /// Create the allocator with one pool sized from `limits`.
    pub fn new(
        device: &Arc<Device>,
        limits: DescriptorLimits,
    ) -> Result<Self, CreateDescriptorPoolError> {
        let allocator = Self {
            parent: Arc::clone(device),
            limits,
            pools: Mutex::new(Vec::new()),
        };
        allocator.add_pool()?;
        Ok(allocator)
    }

    /// Append a fresh pool; later allocations draw from it.
    pub fn add_pool(&self) -> Result<(), CreateDescriptorPoolError> {
        let pool_sizes = self.limits.pool_sizes();
        if pool_sizes.is_empty() {
            return Err(CreateDescriptorPoolError::Empty);
        }
        let max_sets = self.limits.max_sets();
        let create_info = vk::DescriptorPoolCreateInfo::default()
            .max_sets(max_sets)
            .pool_sizes(&pool_sizes);

        // SAFETY: create_info borrows pool_sizes, which outlives the call.
        let handle =
            unsafe { self.parent.create_raw_descriptor_pool(&create_info) }
                .map_err(CreateDescriptorPoolError::Vulkan)?;
        tracing::debug!(
            "Created descriptor pool {:?} for {max_sets} sets",
            handle
        );

        let mut pools = self.pools.lock().expect("descriptor pool lock poisoned");
        pools.push(Pool {
            raw: Arc::new(RawPool {
                parent: Arc::clone(&self.parent),
                handle,
            }),
            budget: PoolBudget::new(&pool_sizes, max_sets),
        });
        Ok(())
    }

    /// Allocate one set of `layout` from the newest pool.
    pub fn allocate(
        &self,
        layout: &DescriptorSetLayout,
    ) -> Result<DescriptorSet, AllocateDescriptorSetError> {
        let mut pools = self.pools.lock().expect("descriptor pool lock poisoned");
        let pool = pools
            .last_mut()
            .ok_or(AllocateDescriptorSetError::OutOfSets)?;

        let mut budget = pool.budget.clone();
        budget.reserve(layout.counts()).inspect_err(|e| {
            tracing::warn!("Descriptor allocation refused: {e}");
        })?;

        let raw_layouts = [layout.raw_descriptor_set_layout()];
        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(pool.raw.handle)
            .set_layouts(&raw_layouts);
        // SAFETY: pool and layout are live and come from the same device.
        let handle = unsafe { self.parent.allocate_raw_descriptor_sets(&alloc_info) }
            .map_err(AllocateDescriptorSetError::Vulkan)?
            .into_iter()
            .next()
            .ok_or(AllocateDescriptorSetError::Vulkan(
                vk::Result::ERROR_UNKNOWN,
            ))?;

        pool.budget = budget;
        Ok(DescriptorSet {
            pool: Arc::clone(&pool.raw),
            handle,
        })
    }

    pub fn limits(&self) -> &DescriptorLimits {
        &self.limits
    }

    pub fn parent(&self) -> &Arc<Device> {
        &self.parent
    }
}

// ---------------------------------------------------------------------------
// DescriptorSet
// ---------------------------------------------------------------------------

/// A set allocated by [`DescriptorAllocator`]. Keeps its pool alive.
pub struct DescriptorSet {
    pool: Arc<RawPool>,
    handle: vk::DescriptorSet,
}

impl std::fmt::Debug for DescriptorSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DescriptorSet")
            .field("handle", &self.handle)
            .field("pool", &self.pool.handle)
            .finish()
    }
}

impl DescriptorSet {
    pub fn raw_descriptor_set(&self) -> vk::DescriptorSet {
        self.handle
    }

    /// Point `binding` at `image_view`. `sampler` is `None` when the layout
    /// bakes in an immutable sampler.
    ///
    /// # Safety
    /// `image_view` must come from this set's device, be in `image_layout`
    /// whenever shaders read it, and outlive every submission that binds
    /// this set.
    pub unsafe fn write_combined_image_sampler(
        &self,
        binding: u32,
        sampler: Option<&Sampler>,
        image_view: vk::ImageView,
        image_layout: vk::ImageLayout,
    ) {
        let image_info = vk::DescriptorImageInfo::default()
            .sampler(sampler.map_or(vk::Sampler::null(), Sampler::raw_sampler))
            .image_view(image_view)
            .image_layout(image_layout);
        let write = vk::WriteDescriptorSet::default()
            .dst_set(self.handle)
            .dst_binding(binding)
            .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
            .image_info(std::slice::from_ref(&image_info));
        // SAFETY: caller guarantees the view; the sampler is a live wrapper.
        unsafe {
            self.pool
                .parent
                .update_raw_descriptor_sets(std::slice::from_ref(&write))
        };
    }

    /// Point `binding` at `range` bytes of `buffer` from `offset`. For
    /// `UNIFORM_BUFFER_DYNAMIC` the offset passed at bind time is added.
    ///
    /// # Safety
    /// `buffer` must come from this set's device, have a usage matching
    /// `descriptor_type`, hold `offset + range` bytes and outlive every
    /// submission that binds this set.
    pub unsafe fn write_buffer(
        &self,
        binding: u32,
        descriptor_type: vk::DescriptorType,
        buffer: &impl BufferHandle,
        offset: vk::DeviceSize,
        range: vk::DeviceSize,
    ) {
        let buffer_info = vk::DescriptorBufferInfo::default()
            .buffer(buffer.raw_buffer())
            .offset(offset)
            .range(range);
        let write = vk::WriteDescriptorSet::default()
            .dst_set(self.handle)
            .dst_binding(binding)
            .descriptor_type(descriptor_type)
            .buffer_info(std::slice::from_ref(&buffer_info));
        // SAFETY: caller guarantees buffer validity and size.
        unsafe {
            self.pool
                .parent
                .update_raw_descriptor_sets(std::slice::from_ref(&write))
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sampler_binding(binding: u32) -> DescriptorBindingDesc {
        DescriptorBindingDesc::new(
            binding,
            vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            vk::ShaderStageFlags::FRAGMENT,
        )
    }

    #[test]
    fn default_limits_match_renderer_pool() {
        let limits = DescriptorLimits::default();
        let sizes = limits.pool_sizes();
        assert_eq!(sizes.len(), 4);
        assert_eq!(limits.max_sets(), 1 + 3 + 2 + 1000);
    }

    #[test]
    fn zero_limits_are_left_out_of_the_pool() {
        let limits = DescriptorLimits {
            storage_buffer: 0,
            uniform_buffer: 0,
            uniform_buffer_dynamic: 0,
            combined_image_sampler: 4,
        };
        let sizes = limits.pool_sizes();
        assert_eq!(sizes.len(), 1);
        assert_eq!(sizes[0].ty, vk::DescriptorType::COMBINED_IMAGE_SAMPLER);
    }

    #[test]
    fn counts_sum_per_type() {
        let bindings = [
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
            sampler_binding(2),
            DescriptorBindingDesc {
                count: 3,
                ..sampler_binding(3)
            },
        ];
        let counts = descriptor_counts(&bindings);
        assert_eq!(
            counts,
            [
                (vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC, 1),
                (vk::DescriptorType::UNIFORM_BUFFER, 1),
                (vk::DescriptorType::COMBINED_IMAGE_SAMPLER, 4),
            ]
        );
    }

    #[test]
    fn second_allocation_fails_when_type_limit_is_one() {
        let limits = DescriptorLimits {
            storage_buffer: 0,
            uniform_buffer: 2,
            uniform_buffer_dynamic: 0,
            combined_image_sampler: 1,
        };
        let mut budget = PoolBudget::new(&limits.pool_sizes(), limits.max_sets());
        let texture_set = descriptor_counts(&[sampler_binding(0)]);

        assert_eq!(budget.reserve(&texture_set), Ok(()));
        assert_eq!(
            budget.reserve(&texture_set),
            Err(AllocateDescriptorSetError::PoolExhausted {
                descriptor_type: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                requested: 1,
                available: 0,
            })
        );
        // The failed request took nothing.
        assert_eq!(budget.sets_remaining(), 2);
        assert_eq!(budget.remaining(vk::DescriptorType::UNIFORM_BUFFER), 2);
    }

    #[test]
    fn type_missing_from_pool_is_exhausted() {
        let sizes = [vk::DescriptorPoolSize {
            ty: vk::DescriptorType::UNIFORM_BUFFER,
            descriptor_count: 8,
        }];
        let mut budget = PoolBudget::new(&sizes, 8);
        let storage = [(vk::DescriptorType::STORAGE_BUFFER, 1)];
        assert!(matches!(
            budget.reserve(&storage),
            Err(AllocateDescriptorSetError::PoolExhausted { available: 0, .. })
        ));
    }

    #[test]
    fn set_count_is_a_budget_too() {
        let sizes = [vk::DescriptorPoolSize {
            ty: vk::DescriptorType::UNIFORM_BUFFER,
            descriptor_count: 8,
        }];
        let mut budget = PoolBudget::new(&sizes, 1);
        let ubo = [(vk::DescriptorType::UNIFORM_BUFFER, 1)];
        assert_eq!(budget.reserve(&ubo), Ok(()));
        assert_eq!(
            budget.reserve(&ubo),
            Err(AllocateDescriptorSetError::OutOfSets)
        );
    }
}
