//! Vulkan loader and instance ([`Instance`]).
//!
//! [`Instance::new`] loads the system Vulkan library, negotiates the API
//! version and enables the surface extensions a window needs. When a
//! [`VulkanLogLevel`] is requested and the Khronos validation layer is
//! installed, validation messages are forwarded to [`tracing`] under the
//! `rgfx-debug-messenger` target.
//!
//! Physical-device and surface queries used by [`crate::device`] and
//! [`crate::backbuffer`] live here as `unsafe fn` accessors.

use std::ffi::{CStr, CString};

use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::surface::{
    CreateSurfaceError, SurfaceQueryError, SurfaceSupportError,
};

const DEBUG_MESSENGER_TARGET: &str = "rgfx-debug-messenger";

/// Minimum severity of validation messages forwarded to `tracing`.
///
/// Ordered least-to-most severe: `Verbose < Info < Warning < Error`.
#[derive(
    Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum VulkanLogLevel {
    Verbose,
    Info,
    Warning,
    Error,
}

impl VulkanLogLevel {
    /// Every severity at or above `self`.
    pub fn severity_flags(self) -> vk::DebugUtilsMessageSeverityFlagsEXT {
        use vk::DebugUtilsMessageSeverityFlagsEXT as S;
        match self {
            VulkanLogLevel::Verbose => {
                S::VERBOSE | S::INFO | S::WARNING | S::ERROR
            }
            VulkanLogLevel::Info => S::INFO | S::WARNING | S::ERROR,
            VulkanLogLevel::Warning => S::WARNING | S::ERROR,
            VulkanLogLevel::Error => S::ERROR,
        }
    }
}

/// A packed Vulkan API version number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct VkVersion(u32);

impl VkVersion {
    pub const V1_3: VkVersion = VkVersion(vk::API_VERSION_1_3);

    pub fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    pub fn new(variant: u32, major: u32, minor: u32, patch: u32) -> Self {
        Self(vk::make_api_version(variant, major, minor, patch))
    }

    pub fn major(&self) -> u32 {
        vk::api_version_major(self.0)
    }

    pub fn minor(&self) -> u32 {
        vk::api_version_minor(self.0)
    }

    pub fn patch(&self) -> u32 {
        vk::api_version_patch(self.0)
    }

    /// Compares major/minor only, ignoring patch and variant.
    pub fn at_least(&self, major: u32, minor: u32) -> bool {
        (self.major(), self.minor()) >= (major, minor)
    }

    pub fn to_raw(&self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for VkVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major(), self.minor(), self.patch())
    }
}

/// Parameters for [`Instance::new`].
#[derive(Debug, Clone, Default)]
pub struct InstanceDesc {
    pub app_name: String,
    /// `None` disables the validation layer and debug messenger.
    pub validation: Option<VulkanLogLevel>,
    /// Enable the platform surface extensions. Requires a display handle
    /// source to be passed to [`Instance::new`].
    pub surface: bool,
}

/// The root Vulkan object.
///
/// Owns the `ash::Entry` loader, the instance handle, the optional debug
/// messenger and the optional surface extension loader. Everything derived
/// from an instance holds an `Arc<Instance>`.
pub struct Instance {
    entry: ash::Entry,
    handle: ash::Instance,
    debug_messenger:
        Option<(vk::DebugUtilsMessengerEXT, ash::ext::debug_utils::Instance)>,
    surface_instance: Option<ash::khr::surface::Instance>,
    ver: VkVersion,
}

impl std::fmt::Debug for Instance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Instance")
            .field("handle", &self.handle.handle())
            .field("version", &self.ver)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Error)]
pub enum InstanceCreationError {
    #[error("Could not load Vulkan: {0}")]
    Loading(ash::LoadingError),
    #[error("Couldn't get display handle from passed value: {0}")]
    InvalidDisplayHandle(crate::RwhHandleError),
    #[error("Missing mandatory instance extensions: {0:?}")]
    MissingExtensions(Vec<String>),
    #[error("Vulkan error creating instance: {0}")]
    Vulkan(vk::Result),
    #[error("Application name contains an interior NUL byte")]
    InvalidAppName,
}

impl From<vk::Result> for InstanceCreationError {
    fn from(value: vk::Result) -> Self {
        InstanceCreationError::Vulkan(value)
    }
}

#[derive(Debug, Error)]
pub enum FetchPhysicalDeviceError {
    #[error("Error fetching physical devices, memory exhaustion")]
    MemoryExhaustion,
    #[error("Error fetching physical devices: {0}")]
    Vulkan(vk::Result),
}

impl Drop for Instance {
    fn drop(&mut self) {
        tracing::debug!("Dropping instance {:?}", self.handle.handle());
        if let Some((messenger, debug_utils)) = self.debug_messenger.take() {
            // SAFETY: the messenger was created from this instance through
            // debug_utils and this is its last use.
            unsafe {
                debug_utils.destroy_debug_utils_messenger(messenger, None)
            };
        }
        // SAFETY: every derived object holds an Arc<Instance>, so all of them
        // are gone by the time the instance drops.
        unsafe { self.handle.destroy_instance(None) };
    }
}

fn message_type_label(message_type: vk::DebugUtilsMessageTypeFlagsEXT) -> &'static str {
    match message_type {
        vk::DebugUtilsMessageTypeFlagsEXT::GENERAL => "GENERAL",
        vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION => "VALIDATION",
        vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE => "PERFORMANCE",
        _ => "UNKNOWN",
    }
}

unsafe extern "system" fn vulkan_debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _p_user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    if p_callback_data.is_null() {
        return vk::FALSE;
    }
    // SAFETY: the loader passes a valid callback data pointer whose message
    // is a NUL-terminated string for the duration of the callback.
    let message = unsafe { CStr::from_ptr((*p_callback_data).p_message) }
        .to_string_lossy();
    let kind = message_type_label(message_type);

    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE => {
            tracing::trace!(target: DEBUG_MESSENGER_TARGET, "[{kind}] {message}")
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::INFO => {
            tracing::info!(target: DEBUG_MESSENGER_TARGET, "[{kind}] {message}")
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => {
            tracing::warn!(target: DEBUG_MESSENGER_TARGET, "[{kind}] {message}")
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => {
            tracing::error!(target: DEBUG_MESSENGER_TARGET, "[{kind}] {message}")
        }
        _ => {
            tracing::debug!(target: DEBUG_MESSENGER_TARGET, "[{kind}] {message}")
        }
    }

    vk::FALSE
}

impl Instance {
    /// Load Vulkan and create an instance.
    ///
    /// # Safety
    /// Loads the Vulkan shared library through `libloading`, which runs
    /// arbitrary initialisation code from the driver.
    pub unsafe fn new(
        desc: &InstanceDesc,
        display_handle_source: Option<&impl HasDisplayHandle>,
    ) -> Result<Self, InstanceCreationError> {
        use InstanceCreationError as Error;

        let app_name = CString::new(desc.app_name.as_str())
            .map_err(|_| Error::InvalidAppName)?;

        // SAFETY: Entry outlives every Vulkan object because Instance owns it
        // and destroys the instance handle before dropping it.
        let entry = unsafe { ash::Entry::load() }.map_err(Error::Loading)?;

        // SAFETY: entry is live; vkEnumerateInstanceVersion has no other
        // preconditions.
        let api_version = unsafe { entry.try_enumerate_instance_version() }
            .ok()
            .flatten()
            .unwrap_or(vk::API_VERSION_1_0);

        let mut required_exts: Vec<&CStr> = Vec::new();
        let mut surface_enabled = false;
        if desc.surface
            && let Some(source) = display_handle_source
        {
            let display = source
                .display_handle()
                .map_err(Error::InvalidDisplayHandle)?;
            let window_exts =
                ash_window::enumerate_required_extensions(display.as_raw())?;
            required_exts.extend(
                window_exts
                    .iter()
                    // SAFETY: ash_window returns pointers to static
                    // NUL-terminated extension names.
                    .map(|ptr| unsafe { CStr::from_ptr(*ptr) }),
            );
            surface_enabled = true;
        }

        // SAFETY: entry is live; None queries the global extension list.
        let available_exts =
            unsafe { entry.enumerate_instance_extension_properties(None) }?;
        // SAFETY: entry is live.
        let available_layers =
            unsafe { entry.enumerate_instance_layer_properties() }
                .unwrap_or_default();

        let missing: Vec<String> = required_exts
            .iter()
            .filter(|required| {
                !available_exts
                    .iter()
                    .any(|e| e.extension_name_as_c_str() == Ok(**required))
            })
            .map(|e| e.to_string_lossy().into_owned())
            .collect();
        if !missing.is_empty() {
            return Err(Error::MissingExtensions(missing));
        }

        let debug_utils_name = ash::ext::debug_utils::NAME;
        let validation_layer = c"VK_LAYER_KHRONOS_validation";
        let has_debug_utils = available_exts
            .iter()
            .any(|e| e.extension_name_as_c_str() == Ok(debug_utils_name));
        let has_validation = available_layers
            .iter()
            .any(|l| l.layer_name_as_c_str() == Ok(validation_layer));

        let mut ext_ptrs: Vec<*const std::ffi::c_char> =
            required_exts.iter().map(|e| e.as_ptr()).collect();
        let mut layer_ptrs: Vec<*const std::ffi::c_char> = Vec::new();

        let mut messenger_info = match desc.validation {
            Some(level) if has_debug_utils && has_validation => {
                ext_ptrs.push(debug_utils_name.as_ptr());
                layer_ptrs.push(validation_layer.as_ptr());
                Some(
                    vk::DebugUtilsMessengerCreateInfoEXT::default()
                        .message_severity(level.severity_flags())
                        .message_type(
                            vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                                | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
                        )
                        .pfn_user_callback(Some(vulkan_debug_callback)),
                )
            }
            Some(level) => {
                tracing::warn!(
                    "Validation at {level:?} requested but the validation \
                     layer or VK_EXT_debug_utils is unavailable"
                );
                None
            }
            None => None,
        };

        let app_info = vk::ApplicationInfo::default()
            .application_name(&app_name)
            .application_version(vk::make_api_version(0, 0, 1, 0))
            .engine_name(c"rgfx")
            .engine_version(vk::make_api_version(0, 0, 1, 0))
            .api_version(api_version);

        let mut create_info = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .enabled_extension_names(&ext_ptrs)
            .enabled_layer_names(&layer_ptrs);
        if let Some(info) = messenger_info.as_mut() {
            create_info = create_info.push_next(info);
        }

        // SAFETY: create_info and everything it points at live until the end
        // of this call.
        let handle = unsafe { entry.create_instance(&create_info, None) }?;

        let debug_messenger = match messenger_info {
            Some(mut info) => {
                info.p_next = std::ptr::null();
                let debug_utils =
                    ash::ext::debug_utils::Instance::new(&entry, &handle);
                // SAFETY: info is a valid messenger create info and
                // debug_utils was loaded from this instance.
                match unsafe {
                    debug_utils.create_debug_utils_messenger(&info, None)
                } {
                    Ok(messenger) => Some((messenger, debug_utils)),
                    Err(e) => {
                        tracing::error!(
                            "Failed to create debug messenger, continuing \
                             without validation output: {e}"
                        );
                        None
                    }
                }
            }
            None => None,
        };

        let surface_instance = surface_enabled
            .then(|| ash::khr::surface::Instance::new(&entry, &handle));

        let ver = VkVersion::from_raw(api_version);
        tracing::info!("Created Vulkan {ver} instance for {:?}", desc.app_name);

        Ok(Self {
            entry,
            handle,
            debug_messenger,
            surface_instance,
            ver,
        })
    }

    /// Physical devices in the order the driver enumerates them.
    pub fn fetch_raw_physical_devices(
        &self,
    ) -> Result<Vec<vk::PhysicalDevice>, FetchPhysicalDeviceError> {
        // SAFETY: the instance handle is valid for the lifetime of self.
        match unsafe { self.handle.enumerate_physical_devices() } {
            Ok(v) => Ok(v),
            Err(
                vk::Result::ERROR_OUT_OF_DEVICE_MEMORY
                | vk::Result::ERROR_OUT_OF_HOST_MEMORY,
            ) => Err(FetchPhysicalDeviceError::MemoryExhaustion),
            Err(e) => Err(FetchPhysicalDeviceError::Vulkan(e)),
        }
    }

    /// # Safety
    /// `physical_device` must be derived from this instance.
    pub unsafe fn get_raw_physical_device_properties(
        &self,
        physical_device: vk::PhysicalDevice,
    ) -> vk::PhysicalDeviceProperties {
        // SAFETY: caller guarantees provenance.
        unsafe { self.handle.get_physical_device_properties(physical_device) }
    }

    /// # Safety
    /// `physical_device` must be derived from this instance.
    pub unsafe fn get_raw_physical_device_queue_family_properties(
        &self,
        physical_device: vk::PhysicalDevice,
    ) -> Vec<vk::QueueFamilyProperties> {
        // SAFETY: caller guarantees provenance.
        unsafe {
            self.handle
                .get_physical_device_queue_family_properties(physical_device)
        }
    }

    /// # Safety
    /// `physical_device` must be derived from this instance.
    pub unsafe fn get_raw_physical_device_memory_properties(
        &self,
        physical_device: vk::PhysicalDevice,
    ) -> vk::PhysicalDeviceMemoryProperties {
        // SAFETY: caller guarantees provenance.
        unsafe {
            self.handle
                .get_physical_device_memory_properties(physical_device)
        }
    }

    /// # Safety
    /// `physical_device` must be derived from this instance.
    pub unsafe fn get_raw_physical_device_format_properties(
        &self,
        physical_device: vk::PhysicalDevice,
        format: vk::Format,
    ) -> vk::FormatProperties {
        // SAFETY: caller guarantees provenance.
        unsafe {
            self.handle
                .get_physical_device_format_properties(physical_device, format)
        }
    }

    /// # Safety
    /// `physical_device` must be derived from this instance.
    pub unsafe fn enumerate_raw_device_extension_properties(
        &self,
        physical_device: vk::PhysicalDevice,
    ) -> Result<Vec<vk::ExtensionProperties>, vk::Result> {
        // SAFETY: caller guarantees provenance.
        unsafe {
            self.handle
                .enumerate_device_extension_properties(physical_device)
        }
    }

    /// # Safety
    /// `physical_device` must be derived from this instance and
    /// `create_info` must be a valid device create info whose pointers stay
    /// alive for the call.
    pub unsafe fn create_ash_device(
        &self,
        physical_device: vk::PhysicalDevice,
        create_info: &vk::DeviceCreateInfo<'_>,
    ) -> Result<ash::Device, vk::Result> {
        // SAFETY: caller guarantees provenance and create info validity.
        unsafe {
            self.handle
                .create_device(physical_device, create_info, None)
        }
    }

    /// The API version reported by `vkEnumerateInstanceVersion`.
    pub fn supported_ver(&self) -> VkVersion {
        self.ver
    }

    pub fn raw_instance(&self) -> vk::Instance {
        self.handle.handle()
    }

    pub fn ash_instance(&self) -> &ash::Instance {
        &self.handle
    }

    pub fn has_surface_support(&self) -> bool {
        self.surface_instance.is_some()
    }
}

// Surface functionality
impl Instance {
    /// # Safety
    /// The returned surface must be destroyed before `source` is dropped and
    /// must only be used with this instance.
    pub unsafe fn create_raw_surface<T: HasDisplayHandle + HasWindowHandle>(
        &self,
        source: &T,
    ) -> Result<vk::SurfaceKHR, CreateSurfaceError> {
        if self.surface_instance.is_none() {
            return Err(CreateSurfaceError::MissingExtension);
        }
        let display = source
            .display_handle()
            .map_err(CreateSurfaceError::InvalidDisplayHandle)?;
        let window = source
            .window_handle()
            .map_err(CreateSurfaceError::InvalidWindowHandle)?;
        // SAFETY: the display and window handles come from a live source
        // and the surface extensions were enabled on this instance.
        unsafe {
            ash_window::create_surface(
                &self.entry,
                &self.handle,
                display.as_raw(),
                window.as_raw(),
                None,
            )
        }
        .map_err(CreateSurfaceError::Vulkan)
    }

    /// # Safety
    /// `surface` must be derived from this instance, every object derived
    /// from it must already be destroyed and no GPU work may reference it.
    pub unsafe fn destroy_raw_surface(&self, surface: vk::SurfaceKHR) {
        if let Some(surface_instance) = self.surface_instance.as_ref() {
            // SAFETY: caller guarantees provenance and drop ordering.
            unsafe { surface_instance.destroy_surface(surface, None) };
        }
    }

    /// # Safety
    /// `physical_device` and `surface` must both be derived from this
    /// instance.
    pub unsafe fn get_raw_physical_device_surface_support(
        &self,
        physical_device: vk::PhysicalDevice,
        queue_family_index: u32,
        surface: vk::SurfaceKHR,
    ) -> Result<bool, SurfaceSupportError> {
        let surface_instance = self
            .surface_instance
            .as_ref()
            .ok_or(SurfaceSupportError::ExtensionNotLoaded)?;
        // SAFETY: caller guarantees provenance.
        unsafe {
            surface_instance.get_physical_device_surface_support(
                physical_device,
                queue_family_index,
                surface,
            )
        }
        .map_err(SurfaceSupportError::Vulkan)
    }

    /// # Safety
    /// `physical_device` and `surface` must both be derived from this
    /// instance.
    pub unsafe fn get_surface_capabilities(
        &self,
        physical_device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
    ) -> Result<vk::SurfaceCapabilitiesKHR, SurfaceQueryError> {
        let surface_instance = self
            .surface_instance
            .as_ref()
            .ok_or(SurfaceQueryError::ExtensionNotLoaded)?;
        // SAFETY: caller guarantees provenance.
        unsafe {
            surface_instance
                .get_physical_device_surface_capabilities(physical_device, surface)
        }
        .map_err(SurfaceQueryError::Vulkan)
    }

    /// # Safety
    /// `physical_device` and `surface` must both be derived from this
    /// instance.
    pub unsafe fn get_surface_formats(
        &self,
        physical_device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
    ) -> Result<Vec<vk::SurfaceFormatKHR>, SurfaceQueryError> {
        let surface_instance = self
            .surface_instance
            .as_ref()
            .ok_or(SurfaceQueryError::ExtensionNotLoaded)?;
        // SAFETY: caller guarantees provenance.
        unsafe {
            surface_instance
                .get_physical_device_surface_formats(physical_device, surface)
        }
        .map_err(SurfaceQueryError::Vulkan)
    }

    /// # Safety
    /// `physical_device` and `surface` must both be derived from this
    /// instance.
    pub unsafe fn get_surface_present_modes(
        &self,
        physical_device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
    ) -> Result<Vec<vk::PresentModeKHR>, SurfaceQueryError> {
        let surface_instance = self
            .surface_instance
            .as_ref()
            .ok_or(SurfaceQueryError::ExtensionNotLoaded)?;
        // SAFETY: caller guarantees provenance.
        unsafe {
            surface_instance.get_physical_device_surface_present_modes(
                physical_device,
                surface,
            )
        }
        .map_err(SurfaceQueryError::Vulkan)
    }
}

// Device extension loaders
impl Instance {
    pub fn create_swapchain_loader(
        &self,
        device: &ash::Device,
    ) -> ash::khr::swapchain::Device {
        ash::khr::swapchain::Device::new(&self.handle, device)
    }

    pub fn create_synchronization2_loader(
        &self,
        device: &ash::Device,
    ) -> ash::khr::synchronization2::Device {
        ash::khr::synchronization2::Device::new(&self.handle, device)
    }

    /// `None` unless validation was enabled at instance creation.
    pub fn create_debug_utils_device_loader(
        &self,
        device: &ash::Device,
    ) -> Option<ash::ext::debug_utils::Device> {
        self.debug_messenger
            .is_some()
            .then(|| ash::ext::debug_utils::Device::new(&self.handle, device))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vk_version_components() {
        let version = VkVersion::from_raw(vk::make_api_version(0, 1, 3, 275));

        assert_eq!(version.major(), 1);
        assert_eq!(version.minor(), 3);
        assert_eq!(version.patch(), 275);
        assert_eq!(version.to_string(), "1.3.275");
    }

    #[test]
    fn vk_version_at_least_ignores_patch() {
        let version = VkVersion::new(0, 1, 2, 999);

        assert!(version.at_least(1, 2));
        assert!(version.at_least(1, 0));
        assert!(!version.at_least(1, 3));
        assert!(VkVersion::V1_3.at_least(1, 3));
    }

    #[test]
    fn severity_flags_include_everything_above_level() {
        use vk::DebugUtilsMessageSeverityFlagsEXT as S;

        assert_eq!(VulkanLogLevel::Error.severity_flags(), S::ERROR);
        assert_eq!(
            VulkanLogLevel::Warning.severity_flags(),
            S::WARNING | S::ERROR
        );
        assert!(VulkanLogLevel::Verbose.severity_flags().contains(S::VERBOSE));
        assert!(!VulkanLogLevel::Info.severity_flags().contains(S::VERBOSE));
    }

    #[test]
    fn message_type_labels() {
        assert_eq!(
            message_type_label(vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION),
            "VALIDATION"
        );
        assert_eq!(
            message_type_label(
                vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE
            ),
            "UNKNOWN"
        );
    }
}
