//! Vulkan instance creation and validation-layer plumbing.

use crate::error::{GpuError, Result};
use ash::vk;
use raw_window_handle::RawDisplayHandle;
use std::ffi::{c_char, c_void, CStr, CString};

/// Validation layers to request when validation is enabled.
pub fn validation_layers() -> Vec<&'static CStr> {
    vec![
        // Standard validation layer
        c"VK_LAYER_KHRONOS_validation",
    ]
}

/// Keep only the requested layers the loader actually provides.
///
/// Missing layers are logged and skipped rather than failing instance creation.
pub fn filter_available_layers<'a>(
    requested: &[&'a CStr],
    available: &[vk::LayerProperties],
) -> Vec<&'a CStr> {
    requested
        .iter()
        .copied()
        .filter(|layer| {
            let found = available.iter().any(|props| {
                props
                    .layer_name_as_c_str()
                    .is_ok_and(|name| name == *layer)
            });
            if !found {
                tracing::warn!("Validation layer {:?} not available", layer);
            }
            found
        })
        .collect()
}

/// Whether `VK_EXT_debug_utils` is enabled for a validation request.
///
/// Only when validation is on and at least one layer survived filtering.
pub fn wants_debug_utils(enable_validation: bool, enabled_layers: &[&CStr]) -> bool {
    enable_validation && !enabled_layers.is_empty()
}

/// A created instance and whether the debug-utils extension is enabled on it.
pub struct CreatedInstance {
    pub instance: ash::Instance,
    pub debug_utils: bool,
}

/// Create a Vulkan instance able to present to windows on `display`.
///
/// # Safety
/// The entry must be a valid Vulkan entry point.
pub unsafe fn create_instance(
    entry: &ash::Entry,
    app_name: &str,
    display: RawDisplayHandle,
    enable_validation: bool,
) -> Result<CreatedInstance> {
    let app_name = CString::new(app_name)
        .map_err(|e| GpuError::InvalidState(format!("Invalid application name: {e}")))?;

    let app_info = vk::ApplicationInfo::default()
        .application_name(&app_name)
        .application_version(vk::make_api_version(0, 1, 0, 0))
        .engine_name(c"vkquad")
        .engine_version(vk::make_api_version(0, 0, 1, 0))
        .api_version(vk::API_VERSION_1_0);

    // Window-system surface extensions for this display
    let mut extension_names: Vec<*const c_char> = ash_window::enumerate_required_extensions(display)
        .map_err(|e| GpuError::ExtensionNotSupported(format!("Surface extensions: {e}")))?
        .to_vec();

    #[cfg(target_os = "macos")]
    extension_names.push(ash::khr::portability_enumeration::NAME.as_ptr());

    let layers = if enable_validation {
        let available = unsafe { entry.enumerate_instance_layer_properties()? };
        filter_available_layers(&validation_layers(), &available)
    } else {
        vec![]
    };

    let debug_utils = wants_debug_utils(enable_validation, &layers);
    if debug_utils {
        extension_names.push(ash::ext::debug_utils::NAME.as_ptr());
    }

    let layer_names: Vec<*const c_char> = layers.iter().map(|l| l.as_ptr()).collect();

    // Required for MoltenVK on macOS
    #[cfg(target_os = "macos")]
    let create_flags = vk::InstanceCreateFlags::ENUMERATE_PORTABILITY_KHR;
    #[cfg(not(target_os = "macos"))]
    let create_flags = vk::InstanceCreateFlags::empty();

    let create_info = vk::InstanceCreateInfo::default()
        .application_info(&app_info)
        .enabled_extension_names(&extension_names)
        .enabled_layer_names(&layer_names)
        .flags(create_flags);

    let instance = unsafe { entry.create_instance(&create_info, None)? };

    tracing::info!(
        "Vulkan instance created ({} extensions, {} layers)",
        extension_names.len(),
        layer_names.len()
    );

    Ok(CreatedInstance {
        instance,
        debug_utils,
    })
}

/// Routes validation-layer messages into `tracing`.
pub struct DebugMessenger {
    loader: ash::ext::debug_utils::Instance,
    messenger: vk::DebugUtilsMessengerEXT,
}

impl DebugMessenger {
    /// Install the messenger.
    ///
    /// # Safety
    /// The instance must have been created with `VK_EXT_debug_utils` enabled.
    pub unsafe fn new(entry: &ash::Entry, instance: &ash::Instance) -> Result<Self> {
        let loader = ash::ext::debug_utils::Instance::new(entry, instance);

        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::default()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
                    | vk::DebugUtilsMessageSeverityFlagsEXT::INFO
                    | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_callback));

        let messenger = unsafe { loader.create_debug_utils_messenger(&create_info, None)? };

        Ok(Self { loader, messenger })
    }

    /// Destroy the messenger.
    ///
    /// # Safety
    /// Must be called before the instance is destroyed.
    pub unsafe fn destroy(&self) {
        unsafe {
            self.loader
                .destroy_debug_utils_messenger(self.messenger, None);
        }
    }
}

unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _user_data: *mut c_void,
) -> vk::Bool32 {
    let message = if callback_data.is_null() {
        std::borrow::Cow::Borrowed("<no message>")
    } else {
        // SAFETY: the loader passes a valid callback data pointer for the call duration
        unsafe { (*callback_data).message_as_c_str() }
            .map_or(std::borrow::Cow::Borrowed("<no message>"), CStr::to_string_lossy)
    };

    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        tracing::error!(target: "vulkan", "[{:?}] {}", message_type, message);
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        tracing::warn!(target: "vulkan", "[{:?}] {}", message_type, message);
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::INFO) {
        tracing::debug!(target: "vulkan", "[{:?}] {}", message_type, message);
    } else {
        tracing::trace!(target: "vulkan", "[{:?}] {}", message_type, message);
    }

    vk::FALSE
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layer(name: &CStr) -> vk::LayerProperties {
        let mut props = vk::LayerProperties::default();
        for (dst, &src) in props.layer_name.iter_mut().zip(name.to_bytes_with_nul()) {
            *dst = src as c_char;
        }
        props
    }

    #[test]
    fn missing_layers_are_skipped() {
        let available = [layer(c"VK_LAYER_OTHER")];
        let enabled = filter_available_layers(&validation_layers(), &available);
        assert!(enabled.is_empty());
    }

    #[test]
    fn missing_validation_layer_disables_debug_utils() {
        let available = [layer(c"VK_LAYER_OTHER")];
        let enabled = filter_available_layers(&validation_layers(), &available);
        assert!(!wants_debug_utils(true, &enabled));
    }

    #[test]
    fn debug_utils_follows_validation_and_layers() {
        let layers = [c"VK_LAYER_KHRONOS_validation"];
        assert!(wants_debug_utils(true, &layers));
        assert!(!wants_debug_utils(false, &layers));
        assert!(!wants_debug_utils(false, &[]));
    }

    #[test]
    fn available_layers_are_kept() {
        let available = [
            layer(c"VK_LAYER_OTHER"),
            layer(c"VK_LAYER_KHRONOS_validation"),
        ];
        let enabled = filter_available_layers(&validation_layers(), &available);
        assert_eq!(enabled, vec![c"VK_LAYER_KHRONOS_validation"]);
    }
}
