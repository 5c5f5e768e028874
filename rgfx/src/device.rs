//! Logical device wrapper ([`Device`]).
//!
//! `Device` wraps a `VkDevice` and centralises all per-device state: a
//! `gpu-allocator` allocator (behind a `Mutex`), the swapchain,
//! synchronization2 and debug-utils loaders, one queue per [`QueueType`]
//! and one command pool per distinct queue family.
//!
//! Queue families are classified by [`QueueFamilySelection`]; aliased
//! queues share a single `Arc<Mutex<vk::Queue>>` so that locking any role
//! serialises on the same hardware queue.
//!
//! All raw Vulkan operations on the device handle are surfaced as
//! `unsafe fn` methods (`create_raw_*`, `destroy_raw_*`, `cmd_*`). Higher
//! level wrappers in sibling modules call these rather than touching
//! `ash::Device` directly.

use std::collections::HashMap;
use std::ffi::{CStr, CString};
use std::sync::{Arc, Mutex};

use ash::vk;
use gpu_allocator::{
    AllocationError, MemoryLocation,
    vulkan::{
        Allocation, AllocationCreateDesc, AllocationScheme, Allocator,
        AllocatorCreateDesc,
    },
};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    command::CommandBuffer,
    instance::{FetchPhysicalDeviceError, Instance, VkVersion},
    queue::{ClassifyQueuesError, QueueFamilySelection, QueueMode, QueueType},
    surface::Surface,
    sync::Fence,
};

enum Synchronization2Loader {
    /// Vulkan 1.3+: synchronization2 is core; dispatch through `ash::Device`.
    Core,
    /// Vulkan < 1.3: loaded via `VK_KHR_synchronization2`.
    Extension(ash::khr::synchronization2::Device),
}

/// Which adapter [`Device::new`] picks among the ones that qualify.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum DevicePreference {
    /// The first qualifying adapter in enumeration order.
    #[default]
    FirstEnumerated,
    /// The first qualifying discrete GPU, else the first qualifying adapter.
    Discrete,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DeviceConfig {
    pub swapchain: bool,
    pub queue_mode: QueueMode,
    pub preference: DevicePreference,
}

/// Where an allocation lives and which property flags its memory type
/// must carry.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MemoryUsage {
    /// Device-local, not mappable.
    GpuOnly,
    /// Host-visible and coherent, persistently mapped.
    CpuToGpu,
}

impl MemoryUsage {
    pub fn required_flags(self) -> vk::MemoryPropertyFlags {
        use vk::MemoryPropertyFlags as F;
        match self {
            MemoryUsage::GpuOnly => F::DEVICE_LOCAL,
            MemoryUsage::CpuToGpu => F::HOST_VISIBLE | F::HOST_COHERENT,
        }
    }

    fn location(self) -> MemoryLocation {
        match self {
            MemoryUsage::GpuOnly => MemoryLocation::GpuOnly,
            MemoryUsage::CpuToGpu => MemoryLocation::CpuToGpu,
        }
    }
}

/// First memory type whose bit is set in `type_bits` and whose property
/// flags are a superset of `properties`.
pub fn find_memory_type_index(
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    properties: vk::MemoryPropertyFlags,
) -> Option<u32> {
    memory_properties.memory_types
        [..memory_properties.memory_type_count as usize]
        .iter()
        .enumerate()
        .find(|(i, ty)| {
            type_bits & (1 << i) != 0 && ty.property_flags.contains(properties)
        })
        .map(|(i, _)| i as u32)
}

/// Index into `device_types` of the adapter `preference` selects.
///
/// `device_types` lists only adapters that already qualify, in enumeration
/// order.
pub fn choose_physical_device(
    device_types: &[vk::PhysicalDeviceType],
    preference: DevicePreference,
) -> Option<usize> {
    match preference {
        DevicePreference::FirstEnumerated => {
            (!device_types.is_empty()).then_some(0)
        }
        DevicePreference::Discrete => device_types
            .iter()
            .position(|ty| *ty == vk::PhysicalDeviceType::DISCRETE_GPU)
            .or((!device_types.is_empty()).then_some(0)),
    }
}

type SharedQueue = (Arc<Mutex<vk::Queue>>, u32);

/// A logical Vulkan device and its associated per-device state.
///
/// Constructed via [`Device::new`]. Every resource in this crate holds an
/// `Arc<Device>`, so the device outlives all of its children.
pub struct Device {
    parent: Arc<Instance>,
    allocator: Option<Mutex<Allocator>>,
    handle: ash::Device,
    physical_device: vk::PhysicalDevice,
    properties: vk::PhysicalDeviceProperties,
    memory_properties: vk::PhysicalDeviceMemoryProperties,
    swapchain_device: Option<ash::khr::swapchain::Device>,
    debug_utils_device: Option<ash::ext::debug_utils::Device>,
    synchronization2: Synchronization2Loader,
    families: QueueFamilySelection,
    graphics_queue: SharedQueue,
    transfer_queue: SharedQueue,
    compute_queue: SharedQueue,
    present_queue: Option<SharedQueue>,
    /// Command pools need external synchronisation; one per family.
    command_pools: HashMap<u32, Mutex<vk::CommandPool>>,
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("handle", &self.handle.handle())
            .field("families", &self.families)
            .finish_non_exhaustive()
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        tracing::debug!("Dropping device {:?}", self.handle.handle());
        for (family, pool) in self.command_pools.drain() {
            let pool = pool.into_inner().unwrap_or_else(|e| e.into_inner());
            tracing::debug!("Dropping command pool {:?} (family {family})", pool);
            // SAFETY: every CommandBuffer holds an Arc<Device>, so none are
            // alive and the pool has no outstanding work.
            unsafe { self.handle.destroy_command_pool(pool, None) };
        }
        // Allocator must go before vkDestroyDevice.
        self.allocator = None;
        // SAFETY: all objects derived from this device are gone.
        unsafe { self.handle.destroy_device(None) };
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum CreateDeviceError {
    #[error(
        "Surface passed to Device::new was created from a different instance"
    )]
    MismatchedParams,
    #[error("Host memory exhaustion while enumerating physical devices")]
    MemoryExhaustion,
    #[error("Vulkan error while enumerating physical devices: {0}")]
    UnknownVulkan(vk::Result),
    #[error("No suitable physical device found")]
    NoSuitableDevice,
    #[error("Queue classification failed: {0}")]
    Queues(#[from] ClassifyQueuesError),
    #[error("Failed to create logical device: {0}")]
    DeviceCreationFailed(vk::Result),
    #[error("Failed to create command pool for family {family}: {result}")]
    CommandPoolCreation { family: u32, result: vk::Result },
    #[error("Failed to create GPU allocator: {0}")]
    AllocatorCreation(AllocationError),
}

impl From<FetchPhysicalDeviceError> for CreateDeviceError {
    fn from(value: FetchPhysicalDeviceError) -> Self {
        match value {
            FetchPhysicalDeviceError::MemoryExhaustion => {
                Self::MemoryExhaustion
            }
            FetchPhysicalDeviceError::Vulkan(e) => Self::UnknownVulkan(e),
        }
    }
}

#[derive(Debug, Error)]
pub enum AllocateMemoryError {
    #[error("No memory type in {type_bits:#b} has properties {properties:?}")]
    NoCompatibleMemoryType {
        type_bits: u32,
        properties: vk::MemoryPropertyFlags,
    },
    #[error("GPU allocator error: {0}")]
    Allocator(#[from] AllocationError),
}

#[derive(Debug, Error)]
pub enum NameObjectError {
    #[error("Invalid Vulkan object name (contains interior NUL): {0}")]
    InvalidName(std::ffi::NulError),
    #[error("Vulkan error setting object name: {0}")]
    Vulkan(vk::Result),
}

#[derive(Debug, Error)]
pub enum ExecuteError {
    #[error("Command buffer is not in the executable state")]
    NotExecutable,
    #[error(
        "Command buffer was allocated for family {buffer_family} but \
         submitted to family {queue_family}"
    )]
    QueueFamilyMismatch { buffer_family: u32, queue_family: u32 },
    #[error("Fence is already pending on an earlier submission")]
    FenceNotReady,
    #[error("Queue submit failed: {0}")]
    Vulkan(vk::Result),
}

#[derive(Debug, Error)]
pub enum SwapchainCallError {
    #[error("Device was created without VK_KHR_swapchain")]
    SwapchainNotEnabled,
    #[error("No queue family can present to the surface")]
    NoPresentQueue,
    #[error("Vulkan error: {0}")]
    Vulkan(vk::Result),
}

struct Candidate {
    handle: vk::PhysicalDevice,
    props: vk::PhysicalDeviceProperties,
    queue_families: Vec<vk::QueueFamilyProperties>,
    selection: QueueFamilySelection,
    present_family: Option<u32>,
    use_sync2_ext: bool,
}

impl Device {
    /// Select an adapter, classify its queues and create the logical device.
    ///
    /// With a surface, only adapters with at least one family able to
    /// present to it qualify; the present queue is the first such family.
    pub fn new<T: HasDisplayHandle + HasWindowHandle>(
        instance: &Arc<Instance>,
        surface: Option<&Surface<T>>,
        config: DeviceConfig,
    ) -> Result<Self, CreateDeviceError> {
        if let Some(surface) = surface
            && !Arc::ptr_eq(surface.get_parent(), instance)
        {
            return Err(CreateDeviceError::MismatchedParams);
        }

        let physical_devices = instance.fetch_raw_physical_devices()?;
        let mut candidates: Vec<Candidate> = Vec::new();
        let mut last_queue_error = None;

        'dev: for &dev in &physical_devices {
            // SAFETY: dev was enumerated from instance.
            let props =
                unsafe { instance.get_raw_physical_device_properties(dev) };
            let name = props.device_name_as_c_str().unwrap_or(c"unknown");
            // SAFETY: dev was enumerated from instance.
            let queue_families = unsafe {
                instance.get_raw_physical_device_queue_family_properties(dev)
            };

            let is_pre_1_3 =
                !VkVersion::from_raw(props.api_version).at_least(1, 3);

            // SAFETY: dev was enumerated from instance.
            let device_exts = match unsafe {
                instance.enumerate_raw_device_extension_properties(dev)
            } {
                Ok(exts) => exts,
                Err(e) => {
                    tracing::debug!(
                        "Skipping {name:?}: failed to enumerate extensions: {e}"
                    );
                    continue 'dev;
                }
            };
            let has_ext = |ext: &CStr| {
                device_exts
                    .iter()
                    .any(|e| e.extension_name_as_c_str() == Ok(ext))
            };

            if config.swapchain && !has_ext(ash::khr::swapchain::NAME) {
                tracing::debug!("Skipping {name:?}: missing VK_KHR_swapchain");
                continue 'dev;
            }

            let use_sync2_ext = if is_pre_1_3 {
                if !has_ext(ash::khr::synchronization2::NAME) {
                    tracing::debug!(
                        "Skipping {name:?}: missing VK_KHR_synchronization2"
                    );
                    continue 'dev;
                }
                true
            } else {
                false
            };

            let flags: Vec<vk::QueueFlags> =
                queue_families.iter().map(|qf| qf.queue_flags).collect();
            let selection =
                match QueueFamilySelection::classify(&flags, config.queue_mode)
                {
                    Ok(selection) => selection,
                    Err(e) => {
                        tracing::debug!("Skipping {name:?}: {e}");
                        last_queue_error = Some(e);
                        continue 'dev;
                    }
                };

            let present_family = match surface {
                Some(surface) => {
                    let found = (0..queue_families.len() as u32).find(|&idx| {
                        // SAFETY: dev and surface come from the same
                        // instance (checked above).
                        matches!(
                            unsafe { surface.supports_queue_family(dev, idx) },
                            Ok(true)
                        )
                    });
                    if found.is_none() {
                        tracing::debug!(
                            "Skipping {name:?}: no family can present"
                        );
                        continue 'dev;
                    }
                    found
                }
                None => None,
            };

            candidates.push(Candidate {
                handle: dev,
                props,
                queue_families,
                selection,
                present_family,
                use_sync2_ext,
            });
        }

        let device_types: Vec<vk::PhysicalDeviceType> =
            candidates.iter().map(|c| c.props.device_type).collect();
        let Some(chosen) =
            choose_physical_device(&device_types, config.preference)
        else {
            return Err(match last_queue_error {
                Some(e) if physical_devices.len() == 1 => e.into(),
                _ => CreateDeviceError::NoSuitableDevice,
            });
        };
        let best = candidates.swap_remove(chosen);

        let physical_device = best.handle;
        let selection = best.selection;
        tracing::info!(
            "Selected physical device: {:?} (type: {:?}, api {})",
            best.props.device_name_as_c_str().unwrap_or(c"unknown"),
            best.props.device_type,
            VkVersion::from_raw(best.props.api_version),
        );
        for (idx, qf) in best.queue_families.iter().enumerate() {
            tracing::info!(
                "Queue family {idx}: {:?} x{}",
                qf.queue_flags,
                qf.queue_count
            );
        }
        tracing::info!(
            "Queue families: graphics {}, compute {}, transfer {}, present {:?}",
            selection.graphics,
            selection.compute,
            selection.transfer,
            best.present_family,
        );

        // SAFETY: physical_device was enumerated from instance.
        let memory_properties = unsafe {
            instance.get_raw_physical_device_memory_properties(physical_device)
        };

        let mut families = selection.distinct_families();
        if let Some(present) = best.present_family
            && !families.contains(&present)
        {
            families.push(present);
        }

        let priorities = [1.0_f32];
        let queue_create_infos: Vec<vk::DeviceQueueCreateInfo<'_>> = families
            .iter()
            .map(|&family| {
                vk::DeviceQueueCreateInfo::default()
                    .queue_family_index(family)
                    .queue_priorities(&priorities)
            })
            .collect();

        let mut ext_ptrs: Vec<*const std::ffi::c_char> = Vec::with_capacity(2);
        if config.swapchain {
            ext_ptrs.push(ash::khr::swapchain::NAME.as_ptr());
        }
        if best.use_sync2_ext {
            ext_ptrs.push(ash::khr::synchronization2::NAME.as_ptr());
        }

        let mut sync2_features =
            vk::PhysicalDeviceSynchronization2Features::default()
                .synchronization2(true);
        let device_create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&ext_ptrs)
            .push_next(&mut sync2_features);

        // SAFETY: physical_device was enumerated from instance and
        // device_create_info only borrows locals alive for this call.
        let device = unsafe {
            instance.create_ash_device(physical_device, &device_create_info)
        }
        .map_err(CreateDeviceError::DeviceCreationFailed)?;

        // One queue per family; every role on that family shares its mutex.
        let queues: HashMap<u32, Arc<Mutex<vk::Queue>>> = families
            .iter()
            .map(|&family| {
                // SAFETY: one queue was requested for this family above.
                let queue = unsafe { device.get_device_queue(family, 0) };
                (family, Arc::new(Mutex::new(queue)))
            })
            .collect();
        let shared = |family: u32| -> SharedQueue {
            (Arc::clone(&queues[&family]), family)
        };

        let mut command_pools = HashMap::new();
        for &family in &families {
            let create_info = vk::CommandPoolCreateInfo::default()
                .queue_family_index(family)
                .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
            // SAFETY: family is a queue family enabled on device.
            match unsafe { device.create_command_pool(&create_info, None) } {
                Ok(pool) => {
                    command_pools.insert(family, Mutex::new(pool));
                }
                Err(result) => {
                    for (_, pool) in command_pools.drain() {
                        let pool = pool
                            .into_inner()
                            .unwrap_or_else(|e| e.into_inner());
                        // SAFETY: pool was just created and never used.
                        unsafe { device.destroy_command_pool(pool, None) };
                    }
                    // SAFETY: nothing else was created from device.
                    unsafe { device.destroy_device(None) };
                    return Err(CreateDeviceError::CommandPoolCreation {
                        family,
                        result,
                    });
                }
            }
        }

        let allocator = match Allocator::new(&AllocatorCreateDesc {
            instance: instance.ash_instance().clone(),
            device: device.clone(),
            physical_device,
            debug_settings: Default::default(),
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        }) {
            Ok(allocator) => allocator,
            Err(e) => {
                for (_, pool) in command_pools.drain() {
                    let pool =
                        pool.into_inner().unwrap_or_else(|e| e.into_inner());
                    // SAFETY: pool was just created and never used.
                    unsafe { device.destroy_command_pool(pool, None) };
                }
                // SAFETY: nothing else was created from device.
                unsafe { device.destroy_device(None) };
                return Err(CreateDeviceError::AllocatorCreation(e));
            }
        };

        Ok(Self {
            parent: Arc::clone(instance),
            allocator: Some(Mutex::new(allocator)),
            physical_device,
            properties: best.props,
            memory_properties,
            swapchain_device: config
                .swapchain
                .then(|| instance.create_swapchain_loader(&device)),
            debug_utils_device: instance
                .create_debug_utils_device_loader(&device),
            synchronization2: if best.use_sync2_ext {
                Synchronization2Loader::Extension(
                    instance.create_synchronization2_loader(&device),
                )
            } else {
                Synchronization2Loader::Core
            },
            families: selection,
            graphics_queue: shared(selection.graphics),
            transfer_queue: shared(selection.transfer),
            compute_queue: shared(selection.compute),
            present_queue: best.present_family.map(shared),
            command_pools,
            handle: device,
        })
    }

    pub fn parent(&self) -> &Arc<Instance> {
        &self.parent
    }

    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    pub fn properties(&self) -> &vk::PhysicalDeviceProperties {
        &self.properties
    }

    pub fn memory_properties(&self) -> &vk::PhysicalDeviceMemoryProperties {
        &self.memory_properties
    }

    pub fn min_uniform_buffer_offset_alignment(&self) -> vk::DeviceSize {
        self.properties.limits.min_uniform_buffer_offset_alignment
    }

    pub fn ash_device(&self) -> &ash::Device {
        &self.handle
    }

    pub fn raw_device(&self) -> vk::Device {
        self.handle.handle()
    }

    pub fn queue_family(&self, queue_type: QueueType) -> u32 {
        self.families.family(queue_type)
    }

    pub fn present_queue_family(&self) -> Option<u32> {
        self.present_queue.as_ref().map(|(_, family)| *family)
    }

    fn queue(&self, queue_type: QueueType) -> &SharedQueue {
        match queue_type {
            QueueType::Graphics => &self.graphics_queue,
            QueueType::Transfer => &self.transfer_queue,
            QueueType::Compute => &self.compute_queue,
        }
    }

    /// The command pool serving `queue_type`'s family.
    ///
    /// Locking the returned mutex is required around any use of the pool.
    pub fn command_pool(&self, queue_type: QueueType) -> &Mutex<vk::CommandPool> {
        &self.command_pools[&self.queue_family(queue_type)]
    }

    pub fn get_memory_type_index(
        &self,
        type_bits: u32,
        properties: vk::MemoryPropertyFlags,
    ) -> Option<u32> {
        find_memory_type_index(&self.memory_properties, type_bits, properties)
    }

    /// Allocate device memory for `requirements`.
    ///
    /// The memory type is pinned to the first one carrying
    /// [`MemoryUsage::required_flags`]; host-visible allocations are
    /// persistently mapped by the allocator.
    pub fn allocate_memory(
        &self,
        name: &str,
        requirements: vk::MemoryRequirements,
        usage: MemoryUsage,
        linear: bool,
    ) -> Result<Allocation, AllocateMemoryError> {
        let properties = usage.required_flags();
        let index = self
            .get_memory_type_index(requirements.memory_type_bits, properties)
            .ok_or(AllocateMemoryError::NoCompatibleMemoryType {
                type_bits: requirements.memory_type_bits,
                properties,
            })?;
        let requirements = vk::MemoryRequirements {
            memory_type_bits: 1 << index,
            ..requirements
        };

        let mut allocator = self
            .allocator
            .as_ref()
            .expect("allocator is dropped only during Device::drop")
            .lock()
            .expect("allocator lock poisoned");
        Ok(allocator.allocate(&AllocationCreateDesc {
            name,
            requirements,
            location: usage.location(),
            linear,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        })?)
    }

    pub fn free_memory(
        &self,
        allocation: Allocation,
    ) -> Result<(), AllocationError> {
        let mut allocator = self
            .allocator
            .as_ref()
            .expect("allocator is dropped only during Device::drop")
            .lock()
            .expect("allocator lock poisoned");
        allocator.free(allocation)
    }

    /// Submit `cmd` to the queue for `queue_type`.
    ///
    /// Each wait pairs a semaphore with the stages that must wait for it.
    /// `signal` is signalled once all commands complete. When `fence` is
    /// given it must be unsignalled; it is marked submitted on success.
    pub fn execute(
        &self,
        queue_type: QueueType,
        cmd: &mut CommandBuffer,
        waits: &[(vk::Semaphore, vk::PipelineStageFlags2)],
        signal: Option<vk::Semaphore>,
        fence: Option<&mut Fence>,
    ) -> Result<(), ExecuteError> {
        if !cmd.is_executable() {
            return Err(ExecuteError::NotExecutable);
        }
        let queue_family = self.queue_family(queue_type);
        if cmd.queue_family() != queue_family {
            return Err(ExecuteError::QueueFamilyMismatch {
                buffer_family: cmd.queue_family(),
                queue_family,
            });
        }
        if let Some(fence) = fence.as_ref()
            && !fence.is_ready()
        {
            return Err(ExecuteError::FenceNotReady);
        }

        let wait_infos: Vec<vk::SemaphoreSubmitInfo<'_>> = waits
            .iter()
            .map(|&(semaphore, stage_mask)| {
                vk::SemaphoreSubmitInfo::default()
                    .semaphore(semaphore)
                    .stage_mask(stage_mask)
            })
            .collect();
        let signal_infos: Vec<vk::SemaphoreSubmitInfo<'_>> = signal
            .into_iter()
            .map(|semaphore| {
                vk::SemaphoreSubmitInfo::default()
                    .semaphore(semaphore)
                    .stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS)
            })
            .collect();
        let cmd_infos = [vk::CommandBufferSubmitInfo::default()
            .command_buffer(cmd.raw_command_buffer())];
        let submit = vk::SubmitInfo2::default()
            .wait_semaphore_infos(&wait_infos)
            .command_buffer_infos(&cmd_infos)
            .signal_semaphore_infos(&signal_infos);

        let raw_fence =
            fence.as_ref().map_or(vk::Fence::null(), |f| f.raw_fence());

        // SAFETY: cmd is executable and belongs to this queue's family; the
        // fence (if any) is unsignalled; semaphores are caller-provided
        // handles from this device.
        unsafe {
            self.queue_submit2(
                queue_type,
                std::slice::from_ref(&submit),
                raw_fence,
            )
        }
        .map_err(ExecuteError::Vulkan)?;

        cmd.mark_submitted();
        if let Some(fence) = fence {
            // SAFETY: the fence was passed to the submission above.
            unsafe { fence.mark_submitted() }
                .map_err(|_| ExecuteError::FenceNotReady)?;
        }
        Ok(())
    }

    /// Block until the queue for `queue_type` is idle.
    pub fn wait(&self, queue_type: QueueType) -> Result<(), vk::Result> {
        let _span =
            tracing::debug_span!("queue_wait_idle", ?queue_type).entered();
        let queue = self
            .queue(queue_type)
            .0
            .lock()
            .expect("queue lock poisoned");
        // SAFETY: the queue belongs to this device and we hold its lock.
        unsafe { self.handle.queue_wait_idle(*queue) }
    }

    /// Wait until all submitted work on this device has completed.
    pub fn wait_idle(&self) -> Result<(), vk::Result> {
        let _span = tracing::debug_span!("device_wait_idle").entered();
        // SAFETY: the handle is valid for the lifetime of self.
        unsafe { self.handle.device_wait_idle() }
    }
}

// Debug naming functionality
impl Device {
    /// Set a Vulkan debug name. `None` or a missing debug-utils loader is a
    /// no-op.
    ///
    /// # Safety
    /// `object` must be a valid handle created from this device.
    pub unsafe fn set_object_name<H: vk::Handle>(
        &self,
        object: H,
        name: Option<&CStr>,
    ) -> Result<(), NameObjectError> {
        let Some(debug_utils) = self.debug_utils_device.as_ref() else {
            return Ok(());
        };
        let Some(name) = name else {
            return Ok(());
        };
        let info = vk::DebugUtilsObjectNameInfoEXT::default()
            .object_handle(object)
            .object_name(name);
        // SAFETY: caller guarantees object provenance.
        unsafe { debug_utils.set_debug_utils_object_name(&info) }
            .map_err(NameObjectError::Vulkan)
    }

    /// # Safety
    /// `object` must be a valid handle created from this device.
    pub unsafe fn set_object_name_str<H: vk::Handle>(
        &self,
        object: H,
        name: Option<&str>,
    ) -> Result<(), NameObjectError> {
        if self.debug_utils_device.is_none() {
            return Ok(());
        }
        let name = name
            .map(CString::new)
            .transpose()
            .map_err(NameObjectError::InvalidName)?;
        // SAFETY: same contract as set_object_name.
        unsafe { self.set_object_name(object, name.as_deref()) }
    }
}

// Queue submit functionality
impl Device {
    /// # Safety
    /// All handles in `submits` must be valid and derived from this device;
    /// command buffers must be executable and belong to the queue's family.
    /// `fence`, when not null, must be unsignalled.
    pub unsafe fn queue_submit2(
        &self,
        queue_type: QueueType,
        submits: &[vk::SubmitInfo2<'_>],
        fence: vk::Fence,
    ) -> Result<(), vk::Result> {
        let queue = self
            .queue(queue_type)
            .0
            .lock()
            .expect("queue lock poisoned");
        match &self.synchronization2 {
            // SAFETY: caller guarantees handle validity and sync state.
            Synchronization2Loader::Core => unsafe {
                self.handle.queue_submit2(*queue, submits, fence)
            },
            // SAFETY: caller guarantees handle validity and sync state.
            Synchronization2Loader::Extension(loader) => unsafe {
                loader.queue_submit2(*queue, submits, fence)
            },
        }
    }
}

// Swapchain functionality
impl Device {
    pub fn has_swapchain_support(&self) -> bool {
        self.swapchain_device.is_some()
    }

    /// # Safety
    /// `create_info` must reference a surface from this device's instance.
    /// A non-null `old_swapchain` must come from this device.
    pub unsafe fn create_raw_swapchain(
        &self,
        create_info: &vk::SwapchainCreateInfoKHR<'_>,
    ) -> Result<vk::SwapchainKHR, SwapchainCallError> {
        let loader = self
            .swapchain_device
            .as_ref()
            .ok_or(SwapchainCallError::SwapchainNotEnabled)?;
        // SAFETY: caller guarantees create_info validity.
        unsafe { loader.create_swapchain(create_info, None) }
            .map_err(SwapchainCallError::Vulkan)
    }

    /// # Safety
    /// `swapchain` must be a live swapchain from this device.
    pub unsafe fn get_raw_swapchain_images(
        &self,
        swapchain: vk::SwapchainKHR,
    ) -> Result<Vec<vk::Image>, SwapchainCallError> {
        let loader = self
            .swapchain_device
            .as_ref()
            .ok_or(SwapchainCallError::SwapchainNotEnabled)?;
        // SAFETY: caller guarantees swapchain validity.
        unsafe { loader.get_swapchain_images(swapchain) }
            .map_err(SwapchainCallError::Vulkan)
    }

    /// # Safety
    /// `swapchain` must come from this device; views of its images must be
    /// destroyed first and no GPU work may reference it.
    pub unsafe fn destroy_raw_swapchain(&self, swapchain: vk::SwapchainKHR) {
        if let Some(loader) = self.swapchain_device.as_ref() {
            // SAFETY: caller guarantees provenance and drop ordering.
            unsafe { loader.destroy_swapchain(swapchain, None) };
        }
    }

    /// Returns `(image_index, is_suboptimal)`.
    ///
    /// # Safety
    /// `swapchain` must come from this device. `semaphore` and `fence`, when
    /// not null, must be unsignalled handles from this device.
    pub unsafe fn acquire_next_raw_swapchain_image(
        &self,
        swapchain: vk::SwapchainKHR,
        timeout_ns: u64,
        semaphore: vk::Semaphore,
        fence: vk::Fence,
    ) -> Result<(u32, bool), SwapchainCallError> {
        let loader = self
            .swapchain_device
            .as_ref()
            .ok_or(SwapchainCallError::SwapchainNotEnabled)?;
        // SAFETY: caller guarantees handle validity.
        unsafe {
            loader.acquire_next_image(swapchain, timeout_ns, semaphore, fence)
        }
        .map_err(SwapchainCallError::Vulkan)
    }

    /// Present on the present queue. Returns `Ok(true)` when suboptimal.
    ///
    /// # Safety
    /// All handles in `present_info` must come from this device, and the
    /// presented images must be in `PRESENT_SRC_KHR`.
    pub unsafe fn queue_present(
        &self,
        present_info: &vk::PresentInfoKHR<'_>,
    ) -> Result<bool, SwapchainCallError> {
        let loader = self
            .swapchain_device
            .as_ref()
            .ok_or(SwapchainCallError::SwapchainNotEnabled)?;
        let (queue, _) = self
            .present_queue
            .as_ref()
            .ok_or(SwapchainCallError::NoPresentQueue)?;
        let queue = queue.lock().expect("present queue lock poisoned");
        // SAFETY: caller guarantees handle validity and image layout.
        unsafe { loader.queue_present(*queue, present_info) }
            .map_err(SwapchainCallError::Vulkan)
    }
}

// Buffer and memory functionality
impl Device {
    /// # Safety
    /// `create_info` must be valid; pointers it holds must outlive the call.
    pub unsafe fn create_raw_buffer(
        &self,
        create_info: &vk::BufferCreateInfo<'_>,
    ) -> Result<vk::Buffer, vk::Result> {
        // SAFETY: caller guarantees create_info validity.
        unsafe { self.handle.create_buffer(create_info, None) }
    }

    /// # Safety
    /// `buffer` must come from this device and be unused by the GPU.
    pub unsafe fn destroy_raw_buffer(&self, buffer: vk::Buffer) {
        // SAFETY: caller guarantees provenance and drop ordering.
        unsafe { self.handle.destroy_buffer(buffer, None) };
    }

    /// # Safety
    /// `buffer` must come from this device.
    pub unsafe fn get_raw_buffer_memory_requirements(
        &self,
        buffer: vk::Buffer,
    ) -> vk::MemoryRequirements {
        // SAFETY: caller guarantees provenance.
        unsafe { self.handle.get_buffer_memory_requirements(buffer) }
    }

    /// # Safety
    /// `buffer` and `memory` must come from this device; the buffer must not
    /// already be bound.
    pub unsafe fn bind_raw_buffer_memory(
        &self,
        buffer: vk::Buffer,
        memory: vk::DeviceMemory,
        offset: vk::DeviceSize,
    ) -> Result<(), vk::Result> {
        // SAFETY: caller guarantees provenance and binding rules.
        unsafe { self.handle.bind_buffer_memory(buffer, memory, offset) }
    }
}

// Image functionality
impl Device {
    /// # Safety
    /// `create_info` must be valid; pointers it holds must outlive the call.
    pub unsafe fn create_raw_image(
        &self,
        create_info: &vk::ImageCreateInfo<'_>,
    ) -> Result<vk::Image, vk::Result> {
        // SAFETY: caller guarantees create_info validity.
        unsafe { self.handle.create_image(create_info, None) }
    }

    /// # Safety
    /// `image` must come from this device, its views must be destroyed and
    /// no GPU work may reference it.
    pub unsafe fn destroy_raw_image(&self, image: vk::Image) {
        // SAFETY: caller guarantees provenance and drop ordering.
        unsafe { self.handle.destroy_image(image, None) };
    }

    /// # Safety
    /// `image` must come from this device.
    pub unsafe fn get_raw_image_memory_requirements(
        &self,
        image: vk::Image,
    ) -> vk::MemoryRequirements {
        // SAFETY: caller guarantees provenance.
        unsafe { self.handle.get_image_memory_requirements(image) }
    }

    /// # Safety
    /// `image` and `memory` must come from this device; the image must not
    /// already be bound.
    pub unsafe fn bind_raw_image_memory(
        &self,
        image: vk::Image,
        memory: vk::DeviceMemory,
        offset: vk::DeviceSize,
    ) -> Result<(), vk::Result> {
        // SAFETY: caller guarantees provenance and binding rules.
        unsafe { self.handle.bind_image_memory(image, memory, offset) }
    }

    /// # Safety
    /// `create_info` must reference an image from this device.
    pub unsafe fn create_raw_image_view(
        &self,
        create_info: &vk::ImageViewCreateInfo<'_>,
    ) -> Result<vk::ImageView, vk::Result> {
        // SAFETY: caller guarantees create_info validity.
        unsafe { self.handle.create_image_view(create_info, None) }
    }

    /// # Safety
    /// `image_view` must come from this device and be unused by the GPU.
    pub unsafe fn destroy_raw_image_view(&self, image_view: vk::ImageView) {
        // SAFETY: caller guarantees provenance and drop ordering.
        unsafe { self.handle.destroy_image_view(image_view, None) };
    }

    /// # Safety
    /// `create_info` must be valid.
    pub unsafe fn create_raw_sampler(
        &self,
        create_info: &vk::SamplerCreateInfo<'_>,
    ) -> Result<vk::Sampler, vk::Result> {
        // SAFETY: caller guarantees create_info validity.
        unsafe { self.handle.create_sampler(create_info, None) }
    }

    /// # Safety
    /// `sampler` must come from this device; layouts using it as an
    /// immutable sampler must be destroyed first.
    pub unsafe fn destroy_raw_sampler(&self, sampler: vk::Sampler) {
        // SAFETY: caller guarantees provenance and drop ordering.
        unsafe { self.handle.destroy_sampler(sampler, None) };
    }
}

// Render pass functionality
impl Device {
    /// # Safety
    /// `create_info` must be valid; pointers it holds must outlive the call.
    pub unsafe fn create_raw_render_pass(
        &self,
        create_info: &vk::RenderPassCreateInfo<'_>,
    ) -> Result<vk::RenderPass, vk::Result> {
        // SAFETY: caller guarantees create_info validity.
        unsafe { self.handle.create_render_pass(create_info, None) }
    }

    /// # Safety
    /// `render_pass` must come from this device and be unused by the GPU.
    pub unsafe fn destroy_raw_render_pass(&self, render_pass: vk::RenderPass) {
        // SAFETY: caller guarantees provenance and drop ordering.
        unsafe { self.handle.destroy_render_pass(render_pass, None) };
    }

    /// # Safety
    /// `create_info` must reference a render pass and image views from this
    /// device.
    pub unsafe fn create_raw_framebuffer(
        &self,
        create_info: &vk::FramebufferCreateInfo<'_>,
    ) -> Result<vk::Framebuffer, vk::Result> {
        // SAFETY: caller guarantees create_info validity.
        unsafe { self.handle.create_framebuffer(create_info, None) }
    }

    /// # Safety
    /// `framebuffer` must come from this device and be unused by the GPU.
    pub unsafe fn destroy_raw_framebuffer(&self, framebuffer: vk::Framebuffer) {
        // SAFETY: caller guarantees provenance and drop ordering.
        unsafe { self.handle.destroy_framebuffer(framebuffer, None) };
    }
}

// Shader module functionality
impl Device {
    /// # Safety
    /// `create_info` must contain valid SPIR-V.
    pub unsafe fn create_raw_shader_module(
        &self,
        create_info: &vk::ShaderModuleCreateInfo<'_>,
    ) -> Result<vk::ShaderModule, vk::Result> {
        // SAFETY: caller guarantees create_info validity.
        unsafe { self.handle.create_shader_module(create_info, None) }
    }

    /// # Safety
    /// `shader_module` must come from this device.
    pub unsafe fn destroy_raw_shader_module(
        &self,
        shader_module: vk::ShaderModule,
    ) {
        // SAFETY: caller guarantees provenance.
        unsafe { self.handle.destroy_shader_module(shader_module, None) };
    }
}

// Pipeline functionality
impl Device {
    /// # Safety
    /// All descriptor set layouts referenced by `create_info` must come from
    /// this device.
    pub unsafe fn create_raw_pipeline_layout(
        &self,
        create_info: &vk::PipelineLayoutCreateInfo<'_>,
    ) -> Result<vk::PipelineLayout, vk::Result> {
        // SAFETY: caller guarantees create_info validity.
        unsafe { self.handle.create_pipeline_layout(create_info, None) }
    }

    /// # Safety
    /// `layout` must come from this device.
    pub unsafe fn destroy_raw_pipeline_layout(
        &self,
        layout: vk::PipelineLayout,
    ) {
        // SAFETY: caller guarantees provenance.
        unsafe { self.handle.destroy_pipeline_layout(layout, None) };
    }

    /// Create a single graphics pipeline.
    ///
    /// Any partially created handles are destroyed on failure so callers
    /// never receive a mix of valid and invalid handles.
    ///
    /// # Safety
    /// `create_info` must reference valid shader stages, layout and render
    /// pass from this device; every pointer must outlive the call.
    pub unsafe fn create_raw_graphics_pipeline(
        &self,
        create_info: &vk::GraphicsPipelineCreateInfo<'_>,
    ) -> Result<vk::Pipeline, vk::Result> {
        // SAFETY: caller guarantees create_info validity.
        unsafe {
            self.handle.create_graphics_pipelines(
                vk::PipelineCache::null(),
                std::slice::from_ref(create_info),
                None,
            )
        }
        .map_err(|(partial, result)| {
            for p in partial {
                if p != vk::Pipeline::null() {
                    // SAFETY: p was just created by this device.
                    unsafe { self.handle.destroy_pipeline(p, None) };
                }
            }
            result
        })
        .map(|mut pipelines| pipelines.remove(0))
    }

    /// # Safety
    /// `create_info` must reference a valid compute stage and layout from
    /// this device.
    pub unsafe fn create_raw_compute_pipeline(
        &self,
        create_info: &vk::ComputePipelineCreateInfo<'_>,
    ) -> Result<vk::Pipeline, vk::Result> {
        // SAFETY: caller guarantees create_info validity.
        unsafe {
            self.handle.create_compute_pipelines(
                vk::PipelineCache::null(),
                std::slice::from_ref(create_info),
                None,
            )
        }
        .map_err(|(partial, result)| {
            for p in partial {
                if p != vk::Pipeline::null() {
                    // SAFETY: p was just created by this device.
                    unsafe { self.handle.destroy_pipeline(p, None) };
                }
            }
            result
        })
        .map(|mut pipelines| pipelines.remove(0))
    }

    /// # Safety
    /// `pipeline` must come from this device and be unused by the GPU.
    pub unsafe fn destroy_raw_pipeline(&self, pipeline: vk::Pipeline) {
        // SAFETY: caller guarantees provenance and drop ordering.
        unsafe { self.handle.destroy_pipeline(pipeline, None) };
    }
}

// Command buffer functionality
impl Device {
    /// Allocate one primary command buffer from `queue_type`'s pool.
    pub fn allocate_raw_command_buffer(
        &self,
        queue_type: QueueType,
    ) -> Result<vk::CommandBuffer, vk::Result> {
        let pool = self
            .command_pool(queue_type)
            .lock()
            .expect("command pool lock poisoned");
        let allocate_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(*pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        // SAFETY: the pool belongs to this device and is locked.
        let buffers =
            unsafe { self.handle.allocate_command_buffers(&allocate_info) }?;
        buffers
            .into_iter()
            .next()
            .ok_or(vk::Result::ERROR_OUT_OF_POOL_MEMORY)
    }

    /// # Safety
    /// `command_buffer` must have been allocated from `queue_type`'s pool
    /// and must not be pending execution.
    pub unsafe fn free_raw_command_buffer(
        &self,
        queue_type: QueueType,
        command_buffer: vk::CommandBuffer,
    ) {
        let pool = self
            .command_pool(queue_type)
            .lock()
            .expect("command pool lock poisoned");
        // SAFETY: caller guarantees provenance and idleness; pool is locked.
        unsafe {
            self.handle
                .free_command_buffers(*pool, std::slice::from_ref(&command_buffer))
        };
    }

    /// # Safety
    /// `command_buffer` must come from this device and be in the initial
    /// state.
    pub unsafe fn begin_raw_command_buffer(
        &self,
        command_buffer: vk::CommandBuffer,
        begin_info: &vk::CommandBufferBeginInfo<'_>,
    ) -> Result<(), vk::Result> {
        // SAFETY: caller guarantees command buffer state.
        unsafe { self.handle.begin_command_buffer(command_buffer, begin_info) }
    }

    /// # Safety
    /// `command_buffer` must be recording.
    pub unsafe fn end_raw_command_buffer(
        &self,
        command_buffer: vk::CommandBuffer,
    ) -> Result<(), vk::Result> {
        // SAFETY: caller guarantees command buffer state.
        unsafe { self.handle.end_command_buffer(command_buffer) }
    }
}

// Fence and semaphore functionality
impl Device {
    /// # Safety
    /// `create_info` must be valid.
    pub unsafe fn create_raw_fence(
        &self,
        create_info: &vk::FenceCreateInfo<'_>,
    ) -> Result<vk::Fence, vk::Result> {
        // SAFETY: caller guarantees create_info validity.
        unsafe { self.handle.create_fence(create_info, None) }
    }

    /// # Safety
    /// `fence` must come from this device and not be pending.
    pub unsafe fn destroy_raw_fence(&self, fence: vk::Fence) {
        // SAFETY: caller guarantees provenance and idleness.
        unsafe { self.handle.destroy_fence(fence, None) };
    }

    /// # Safety
    /// Every fence must come from this device.
    pub unsafe fn wait_for_raw_fences(
        &self,
        fences: &[vk::Fence],
        wait_all: bool,
        timeout_ns: u64,
    ) -> Result<(), vk::Result> {
        let _span = tracing::debug_span!("wait_for_fences").entered();
        // SAFETY: caller guarantees provenance.
        unsafe { self.handle.wait_for_fences(fences, wait_all, timeout_ns) }
    }

    /// # Safety
    /// Every fence must come from this device and not be pending.
    pub unsafe fn reset_raw_fences(
        &self,
        fences: &[vk::Fence],
    ) -> Result<(), vk::Result> {
        // SAFETY: caller guarantees provenance and idleness.
        unsafe { self.handle.reset_fences(fences) }
    }

    /// # Safety
    /// `create_info` must be valid.
    pub unsafe fn create_raw_semaphore(
        &self,
        create_info: &vk::SemaphoreCreateInfo<'_>,
    ) -> Result<vk::Semaphore, vk::Result> {
        // SAFETY: caller guarantees create_info validity.
        unsafe { self.handle.create_semaphore(create_info, None) }
    }

    /// # Safety
    /// `semaphore` must come from this device and no queue operation may
    /// still wait on or signal it.
    pub unsafe fn destroy_raw_semaphore(&self, semaphore: vk::Semaphore) {
        // SAFETY: caller guarantees provenance and idleness.
        unsafe { self.handle.destroy_semaphore(semaphore, None) };
    }
}

// Descriptor set functionality
impl Device {
    /// # Safety
    /// `create_info` must be valid; immutable samplers must come from this
    /// device.
    pub unsafe fn create_raw_descriptor_set_layout(
        &self,
        create_info: &vk::DescriptorSetLayoutCreateInfo<'_>,
    ) -> Result<vk::DescriptorSetLayout, vk::Result> {
        // SAFETY: caller guarantees create_info validity.
        unsafe { self.handle.create_descriptor_set_layout(create_info, None) }
    }

    /// # Safety
    /// `layout` must come from this device.
    pub unsafe fn destroy_raw_descriptor_set_layout(
        &self,
        layout: vk::DescriptorSetLayout,
    ) {
        // SAFETY: caller guarantees provenance.
        unsafe { self.handle.destroy_descriptor_set_layout(layout, None) };
    }

    /// # Safety
    /// `create_info` must be valid.
    pub unsafe fn create_raw_descriptor_pool(
        &self,
        create_info: &vk::DescriptorPoolCreateInfo<'_>,
    ) -> Result<vk::DescriptorPool, vk::Result> {
        // SAFETY: caller guarantees create_info validity.
        unsafe { self.handle.create_descriptor_pool(create_info, None) }
    }

    /// # Safety
    /// `pool` must come from this device and none of its sets may be in use
    /// by the GPU.
    pub unsafe fn destroy_raw_descriptor_pool(&self, pool: vk::DescriptorPool) {
        // SAFETY: caller guarantees provenance and drop ordering.
        unsafe { self.handle.destroy_descriptor_pool(pool, None) };
    }

    /// # Safety
    /// The pool and layouts in `alloc_info` must come from this device.
    pub unsafe fn allocate_raw_descriptor_sets(
        &self,
        alloc_info: &vk::DescriptorSetAllocateInfo<'_>,
    ) -> Result<Vec<vk::DescriptorSet>, vk::Result> {
        // SAFETY: caller guarantees alloc_info validity.
        unsafe { self.handle.allocate_descriptor_sets(alloc_info) }
    }

    /// # Safety
    /// All handles in the writes must come from this device and outlive any
    /// submission that binds the sets.
    pub unsafe fn update_raw_descriptor_sets(
        &self,
        descriptor_writes: &[vk::WriteDescriptorSet<'_>],
    ) {
        // SAFETY: caller guarantees write validity.
        unsafe { self.handle.update_descriptor_sets(descriptor_writes, &[]) }
    }
}

// Recording commands
impl Device {
    /// # Safety
    /// `command_buffer` must be recording; every handle in
    /// `dependency_info` must come from this device.
    pub unsafe fn cmd_pipeline_barrier2(
        &self,
        command_buffer: vk::CommandBuffer,
        dependency_info: &vk::DependencyInfo<'_>,
    ) {
        match &self.synchronization2 {
            // SAFETY: caller guarantees command buffer state and handles.
            Synchronization2Loader::Core => unsafe {
                self.handle
                    .cmd_pipeline_barrier2(command_buffer, dependency_info)
            },
            // SAFETY: caller guarantees command buffer state and handles.
            Synchronization2Loader::Extension(loader) => unsafe {
                loader.cmd_pipeline_barrier2(command_buffer, dependency_info)
            },
        }
    }

    /// # Safety
    /// `command_buffer` must be recording outside a render pass;
    /// `begin_info` must reference a render pass and framebuffer from this
    /// device.
    pub unsafe fn cmd_begin_render_pass(
        &self,
        command_buffer: vk::CommandBuffer,
        begin_info: &vk::RenderPassBeginInfo<'_>,
    ) {
        // SAFETY: caller guarantees command buffer state and handles.
        unsafe {
            self.handle.cmd_begin_render_pass(
                command_buffer,
                begin_info,
                vk::SubpassContents::INLINE,
            )
        }
    }

    /// # Safety
    /// `command_buffer` must be recording inside a render pass.
    pub unsafe fn cmd_end_render_pass(&self, command_buffer: vk::CommandBuffer) {
        // SAFETY: caller guarantees command buffer state.
        unsafe { self.handle.cmd_end_render_pass(command_buffer) }
    }

    /// # Safety
    /// `command_buffer` must be recording; `pipeline` must come from this
    /// device and match `bind_point`.
    pub unsafe fn cmd_bind_pipeline(
        &self,
        command_buffer: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        pipeline: vk::Pipeline,
    ) {
        // SAFETY: caller guarantees command buffer state and handles.
        unsafe {
            self.handle
                .cmd_bind_pipeline(command_buffer, bind_point, pipeline)
        }
    }

    /// # Safety
    /// `command_buffer` must be recording; every buffer must come from this
    /// device with VERTEX_BUFFER usage.
    pub unsafe fn cmd_bind_vertex_buffers(
        &self,
        command_buffer: vk::CommandBuffer,
        first_binding: u32,
        buffers: &[vk::Buffer],
        offsets: &[vk::DeviceSize],
    ) {
        // SAFETY: caller guarantees command buffer state and handles.
        unsafe {
            self.handle.cmd_bind_vertex_buffers(
                command_buffer,
                first_binding,
                buffers,
                offsets,
            )
        }
    }

    /// # Safety
    /// `command_buffer` must be recording; `buffer` must come from this
    /// device with INDEX_BUFFER usage.
    pub unsafe fn cmd_bind_index_buffer(
        &self,
        command_buffer: vk::CommandBuffer,
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        index_type: vk::IndexType,
    ) {
        // SAFETY: caller guarantees command buffer state and handles.
        unsafe {
            self.handle.cmd_bind_index_buffer(
                command_buffer,
                buffer,
                offset,
                index_type,
            )
        }
    }

    /// # Safety
    /// `command_buffer` must be recording; `layout` must be compatible with
    /// the bound pipeline and `dynamic_offsets` must match the number of
    /// dynamic descriptors in the sets.
    pub unsafe fn cmd_bind_descriptor_sets(
        &self,
        command_buffer: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        layout: vk::PipelineLayout,
        first_set: u32,
        descriptor_sets: &[vk::DescriptorSet],
        dynamic_offsets: &[u32],
    ) {
        // SAFETY: caller guarantees command buffer state and compatibility.
        unsafe {
            self.handle.cmd_bind_descriptor_sets(
                command_buffer,
                bind_point,
                layout,
                first_set,
                descriptor_sets,
                dynamic_offsets,
            )
        }
    }

    /// # Safety
    /// `command_buffer` must be recording inside a render pass with a
    /// graphics pipeline bound.
    pub unsafe fn cmd_draw(
        &self,
        command_buffer: vk::CommandBuffer,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    ) {
        // SAFETY: caller guarantees command buffer state.
        unsafe {
            self.handle.cmd_draw(
                command_buffer,
                vertex_count,
                instance_count,
                first_vertex,
                first_instance,
            )
        }
    }

    /// # Safety
    /// `command_buffer` must be recording inside a render pass with a
    /// graphics pipeline and an index buffer bound.
    pub unsafe fn cmd_draw_indexed(
        &self,
        command_buffer: vk::CommandBuffer,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    ) {
        // SAFETY: caller guarantees command buffer state.
        unsafe {
            self.handle.cmd_draw_indexed(
                command_buffer,
                index_count,
                instance_count,
                first_index,
                vertex_offset,
                first_instance,
            )
        }
    }

    /// # Safety
    /// `command_buffer` must be recording outside a render pass with a
    /// compute pipeline bound.
    pub unsafe fn cmd_dispatch(
        &self,
        command_buffer: vk::CommandBuffer,
        group_count_x: u32,
        group_count_y: u32,
        group_count_z: u32,
    ) {
        // SAFETY: caller guarantees command buffer state.
        unsafe {
            self.handle.cmd_dispatch(
                command_buffer,
                group_count_x,
                group_count_y,
                group_count_z,
            )
        }
    }

    /// # Safety
    /// `command_buffer` must be recording; both buffers must come from this
    /// device and every region must be in bounds.
    pub unsafe fn cmd_copy_buffer(
        &self,
        command_buffer: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Buffer,
        regions: &[vk::BufferCopy],
    ) {
        // SAFETY: caller guarantees command buffer state and bounds.
        unsafe { self.handle.cmd_copy_buffer(command_buffer, src, dst, regions) }
    }

    /// # Safety
    /// `command_buffer` must be recording; `dst` must be in
    /// `dst_layout` and every region must be in bounds.
    pub unsafe fn cmd_copy_buffer_to_image(
        &self,
        command_buffer: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Image,
        dst_layout: vk::ImageLayout,
        regions: &[vk::BufferImageCopy],
    ) {
        // SAFETY: caller guarantees command buffer state and bounds.
        unsafe {
            self.handle.cmd_copy_buffer_to_image(
                command_buffer,
                src,
                dst,
                dst_layout,
                regions,
            )
        }
    }

    /// # Safety
    /// `command_buffer` must be recording; both images must be in the given
    /// layouts and every region must be in bounds.
    pub unsafe fn cmd_copy_image(
        &self,
        command_buffer: vk::CommandBuffer,
        src: vk::Image,
        src_layout: vk::ImageLayout,
        dst: vk::Image,
        dst_layout: vk::ImageLayout,
        regions: &[vk::ImageCopy],
    ) {
        // SAFETY: caller guarantees command buffer state and bounds.
        unsafe {
            self.handle.cmd_copy_image(
                command_buffer,
                src,
                src_layout,
                dst,
                dst_layout,
                regions,
            )
        }
    }

    /// # Safety
    /// `command_buffer` must be recording inside a render pass whose subpass
    /// has the referenced attachments.
    pub unsafe fn cmd_clear_attachments(
        &self,
        command_buffer: vk::CommandBuffer,
        attachments: &[vk::ClearAttachment],
        rects: &[vk::ClearRect],
    ) {
        // SAFETY: caller guarantees command buffer state.
        unsafe {
            self.handle
                .cmd_clear_attachments(command_buffer, attachments, rects)
        }
    }

    /// # Safety
    /// `command_buffer` must be recording.
    pub unsafe fn cmd_set_viewport(
        &self,
        command_buffer: vk::CommandBuffer,
        viewports: &[vk::Viewport],
    ) {
        // SAFETY: caller guarantees command buffer state.
        unsafe { self.handle.cmd_set_viewport(command_buffer, 0, viewports) }
    }

    /// # Safety
    /// `command_buffer` must be recording.
    pub unsafe fn cmd_set_scissor(
        &self,
        command_buffer: vk::CommandBuffer,
        scissors: &[vk::Rect2D],
    ) {
        // SAFETY: caller guarantees command buffer state.
        unsafe { self.handle.cmd_set_scissor(command_buffer, 0, scissors) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_properties(
        flags: &[vk::MemoryPropertyFlags],
    ) -> vk::PhysicalDeviceMemoryProperties {
        let mut props = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: flags.len() as u32,
            ..Default::default()
        };
        for (i, f) in flags.iter().enumerate() {
            props.memory_types[i] = vk::MemoryType {
                property_flags: *f,
                heap_index: 0,
            };
        }
        props
    }

    #[test]
    fn memory_type_is_first_superset_match() {
        use vk::MemoryPropertyFlags as F;
        let props = memory_properties(&[
            F::DEVICE_LOCAL,
            F::HOST_VISIBLE,
            F::HOST_VISIBLE | F::HOST_COHERENT,
            F::HOST_VISIBLE | F::HOST_COHERENT | F::HOST_CACHED,
        ]);

        assert_eq!(
            find_memory_type_index(&props, 0b1111, F::DEVICE_LOCAL),
            Some(0)
        );
        assert_eq!(
            find_memory_type_index(
                &props,
                0b1111,
                F::HOST_VISIBLE | F::HOST_COHERENT
            ),
            Some(2)
        );
        // Type 2 masked out by type_bits.
        assert_eq!(
            find_memory_type_index(
                &props,
                0b1011,
                F::HOST_VISIBLE | F::HOST_COHERENT
            ),
            Some(3)
        );
    }

    #[test]
    fn memory_type_missing_is_none() {
        use vk::MemoryPropertyFlags as F;
        let props = memory_properties(&[F::HOST_VISIBLE]);

        assert_eq!(find_memory_type_index(&props, 0b1, F::DEVICE_LOCAL), None);
        // Bits past memory_type_count are ignored.
        assert_eq!(
            find_memory_type_index(&props, 0b10, F::HOST_VISIBLE),
            None
        );
    }

    #[test]
    fn memory_usage_flags() {
        use vk::MemoryPropertyFlags as F;
        assert_eq!(MemoryUsage::GpuOnly.required_flags(), F::DEVICE_LOCAL);
        assert!(
            MemoryUsage::CpuToGpu
                .required_flags()
                .contains(F::HOST_COHERENT)
        );
        assert_eq!(MemoryUsage::GpuOnly.location(), MemoryLocation::GpuOnly);
        assert_eq!(MemoryUsage::CpuToGpu.location(), MemoryLocation::CpuToGpu);
    }

    #[test]
    fn first_enumerated_preference() {
        let types = [
            vk::PhysicalDeviceType::INTEGRATED_GPU,
            vk::PhysicalDeviceType::DISCRETE_GPU,
        ];

        assert_eq!(
            choose_physical_device(&types, DevicePreference::FirstEnumerated),
            Some(0)
        );
        assert_eq!(
            choose_physical_device(&types, DevicePreference::Discrete),
            Some(1)
        );
    }

    #[test]
    fn discrete_preference_falls_back_to_first() {
        let types = [
            vk::PhysicalDeviceType::CPU,
            vk::PhysicalDeviceType::INTEGRATED_GPU,
        ];

        assert_eq!(
            choose_physical_device(&types, DevicePreference::Discrete),
            Some(0)
        );
        assert_eq!(
            choose_physical_device(&[], DevicePreference::Discrete),
            None
        );
    }
}
