//! GPU context management.

use crate::capabilities::GpuCapabilities;
use crate::error::{GpuError, Result};
use crate::instance::{create_instance, CreatedInstance, DebugMessenger};
use crate::memory::GpuAllocator;
use crate::surface::SurfaceContext;
use crate::sync::wait_device_idle;
use ash::vk;
use parking_lot::Mutex;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use std::ffi::CStr;
use std::sync::Arc;

/// Queue families used for drawing and presenting. They may be the same family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    pub graphics: u32,
    pub present: u32,
}

impl QueueFamilyIndices {
    /// Pick queue families from a device's family list.
    ///
    /// A family that does both graphics and presentation is preferred; otherwise
    /// the first graphics family and the first present-capable family are used.
    pub fn select(
        families: &[vk::QueueFamilyProperties],
        mut supports_present: impl FnMut(u32) -> bool,
    ) -> Option<Self> {
        let mut graphics = None;
        let mut present = None;

        for (i, family) in (0u32..).zip(families) {
            let has_graphics =
                family.queue_count > 0 && family.queue_flags.contains(vk::QueueFlags::GRAPHICS);
            let has_present = family.queue_count > 0 && supports_present(i);

            if has_graphics && has_present {
                return Some(Self {
                    graphics: i,
                    present: i,
                });
            }
            if has_graphics && graphics.is_none() {
                graphics = Some(i);
            }
            if has_present && present.is_none() {
                present = Some(i);
            }
        }

        Some(Self {
            graphics: graphics?,
            present: present?,
        })
    }

    /// Distinct family indices, graphics first.
    pub fn unique(&self) -> Vec<u32> {
        if self.graphics == self.present {
            vec![self.graphics]
        } else {
            vec![self.graphics, self.present]
        }
    }
}

/// Main GPU context holding Vulkan resources.
pub struct GpuContext {
    // Entry must be kept alive for the lifetime of the context
    #[allow(dead_code)]
    entry: ash::Entry,
    instance: ash::Instance,
    debug_messenger: Option<DebugMessenger>,
    surface: SurfaceContext,
    physical_device: vk::PhysicalDevice,
    device: Arc<ash::Device>,
    swapchain_loader: ash::khr::swapchain::Device,
    allocator: Mutex<GpuAllocator>,
    queue_families: QueueFamilyIndices,
    graphics_queue: vk::Queue,
    present_queue: vk::Queue,
}

impl GpuContext {
    /// Get the Vulkan device handle.
    pub fn device(&self) -> &ash::Device {
        &self.device
    }

    /// Shared handle to the device.
    pub fn device_arc(&self) -> Arc<ash::Device> {
        Arc::clone(&self.device)
    }

    /// Get the physical device handle.
    pub const fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    /// The window surface.
    pub const fn surface(&self) -> &SurfaceContext {
        &self.surface
    }

    /// Swapchain extension loader.
    pub const fn swapchain_loader(&self) -> &ash::khr::swapchain::Device {
        &self.swapchain_loader
    }

    /// Get access to the GPU allocator.
    pub const fn allocator(&self) -> &Mutex<GpuAllocator> {
        &self.allocator
    }

    pub const fn queue_families(&self) -> QueueFamilyIndices {
        self.queue_families
    }

    /// Get the graphics queue.
    pub const fn graphics_queue(&self) -> vk::Queue {
        self.graphics_queue
    }

    /// Get the present queue. May be the graphics queue.
    pub const fn present_queue(&self) -> vk::Queue {
        self.present_queue
    }

    /// Wait for device to be idle.
    pub fn wait_idle(&self) -> Result<()> {
        unsafe { wait_device_idle(&self.device) }
    }
}

impl Drop for GpuContext {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();

            // Shutdown allocator BEFORE destroying device
            self.allocator.lock().shutdown();

            self.surface.destroy();
            self.device.destroy_device(None);
            release_instance(&self.instance, self.debug_messenger.as_ref());
        }
        tracing::debug!("GPU context destroyed");
    }
}

/// Builder for creating a GPU context.
pub struct GpuContextBuilder {
    app_name: String,
    enable_validation: bool,
}

impl Default for GpuContextBuilder {
    fn default() -> Self {
        Self {
            app_name: "vkquad".to_string(),
            enable_validation: cfg!(debug_assertions),
        }
    }
}

impl GpuContextBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the application name.
    #[must_use]
    pub fn app_name(mut self, name: impl Into<String>) -> Self {
        self.app_name = name.into();
        self
    }

    /// Enable or disable validation layers.
    #[must_use]
    pub fn validation(mut self, enable: bool) -> Self {
        self.enable_validation = enable;
        self
    }

    /// Build a context able to present to `window`.
    pub fn build<W>(self, window: &W) -> Result<GpuContext>
    where
        W: HasDisplayHandle + HasWindowHandle,
    {
        let entry = unsafe { ash::Entry::load() }
            .map_err(|e| GpuError::Loading(e.to_string()))?;

        let display = window
            .display_handle()
            .map_err(|e| GpuError::SurfaceCreation(format!("Failed to get display handle: {e}")))?
            .as_raw();

        let CreatedInstance {
            instance,
            debug_utils,
        } = unsafe { create_instance(&entry, &self.app_name, display, self.enable_validation) }?;

        // The messenger's entry points only exist when debug-utils was enabled
        let debug_messenger = if debug_utils {
            match unsafe { DebugMessenger::new(&entry, &instance) } {
                Ok(messenger) => Some(messenger),
                Err(e) => {
                    tracing::warn!("Debug messenger unavailable: {}", e);
                    None
                }
            }
        } else {
            None
        };

        let surface = unsafe { SurfaceContext::from_window(&entry, &instance, window) }
            .inspect_err(|_| unsafe { release_instance(&instance, debug_messenger.as_ref()) })?;
        let release_surface = || unsafe {
            surface.destroy();
            release_instance(&instance, debug_messenger.as_ref());
        };

        let (physical_device, capabilities, queue_families) =
            unsafe { select_physical_device(&instance, &surface) }.inspect_err(|_| release_surface())?;

        tracing::info!("Selected GPU: {}", capabilities.summary());

        let (device, graphics_queue, present_queue) =
            unsafe { create_device(&instance, physical_device, queue_families) }
                .inspect_err(|_| release_surface())?;

        let device = Arc::new(device);
        let swapchain_loader = ash::khr::swapchain::Device::new(&instance, &device);

        let allocator = unsafe { GpuAllocator::new(&instance, Arc::clone(&device), physical_device) }
            .inspect_err(|_| unsafe {
                device.destroy_device(None);
                release_surface();
            })?;

        Ok(GpuContext {
            entry,
            instance,
            debug_messenger,
            surface,
            physical_device,
            device,
            swapchain_loader,
            allocator: Mutex::new(allocator),
            queue_families,
            graphics_queue,
            present_queue,
        })
    }
}

/// Destroy the debug messenger, if any, then the instance.
///
/// # Safety
/// Every object created from the instance must already be destroyed.
unsafe fn release_instance(instance: &ash::Instance, debug_messenger: Option<&DebugMessenger>) {
    unsafe {
        if let Some(messenger) = debug_messenger {
            messenger.destroy();
        }
        instance.destroy_instance(None);
    }
}

/// Required device extensions.
pub fn required_device_extensions() -> Vec<&'static CStr> {
    vec![ash::khr::swapchain::NAME]
}

/// Pick the most preferred device that can draw and present to `surface`.
///
/// # Safety
/// The instance and surface must be valid.
unsafe fn select_physical_device(
    instance: &ash::Instance,
    surface: &SurfaceContext,
) -> Result<(vk::PhysicalDevice, GpuCapabilities, QueueFamilyIndices)> {
    let devices = unsafe { instance.enumerate_physical_devices() }
        .map_err(|e| GpuError::DeviceCreation(format!("enumerate devices: {e}")))?;

    let required = required_device_extensions();
    let mut best: Option<(vk::PhysicalDevice, GpuCapabilities, QueueFamilyIndices)> = None;

    for physical_device in devices {
        let capabilities = unsafe { GpuCapabilities::query(instance, physical_device) };

        if !capabilities.supports_extensions(&required) {
            tracing::debug!("Skipping {}: no swapchain support", capabilities.device_name);
            continue;
        }

        let families =
            unsafe { instance.get_physical_device_queue_family_properties(physical_device) };
        let Some(queue_families) = QueueFamilyIndices::select(&families, |family| unsafe {
            surface
                .supports_present(physical_device, family)
                .unwrap_or(false)
        }) else {
            tracing::debug!("Skipping {}: missing queue families", capabilities.device_name);
            continue;
        };

        let support = unsafe { surface.support(physical_device) }?;
        if !support.is_adequate() {
            tracing::debug!(
                "Skipping {}: no surface formats or present modes",
                capabilities.device_name
            );
            continue;
        }

        let better = best
            .as_ref()
            .map_or(true, |(_, current, _)| capabilities.preference() > current.preference());
        if better {
            best = Some((physical_device, capabilities, queue_families));
        }
    }

    best.ok_or(GpuError::NoSuitableDevice)
}

/// Create the logical device and retrieve the graphics and present queues.
///
/// # Safety
/// The instance and physical device must be valid.
unsafe fn create_device(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    queue_families: QueueFamilyIndices,
) -> Result<(ash::Device, vk::Queue, vk::Queue)> {
    let queue_priority = 1.0_f32;
    let queue_create_infos: Vec<vk::DeviceQueueCreateInfo> = queue_families
        .unique()
        .into_iter()
        .map(|family| {
            vk::DeviceQueueCreateInfo::default()
                .queue_family_index(family)
                .queue_priorities(std::slice::from_ref(&queue_priority))
        })
        .collect();

    let extension_names: Vec<*const std::ffi::c_char> = required_device_extensions()
        .iter()
        .map(|ext| ext.as_ptr())
        .collect();

    let features = vk::PhysicalDeviceFeatures::default();

    let device_create_info = vk::DeviceCreateInfo::default()
        .queue_create_infos(&queue_create_infos)
        .enabled_extension_names(&extension_names)
        .enabled_features(&features);

    let device = unsafe { instance.create_device(physical_device, &device_create_info, None) }
        .map_err(|e| GpuError::DeviceCreation(e.to_string()))?;

    let (graphics_queue, present_queue) = unsafe {
        (
            device.get_device_queue(queue_families.graphics, 0),
            device.get_device_queue(queue_families.present, 0),
        )
    };

    Ok((device, graphics_queue, present_queue))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: 1,
            ..Default::default()
        }
    }

    #[test]
    fn prefers_family_with_graphics_and_present() {
        let families = [
            family(vk::QueueFlags::GRAPHICS),
            family(vk::QueueFlags::COMPUTE),
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE),
        ];
        let indices = QueueFamilyIndices::select(&families, |i| i != 0).unwrap();
        assert_eq!(
            indices,
            QueueFamilyIndices {
                graphics: 2,
                present: 2
            }
        );
        assert_eq!(indices.unique(), vec![2]);
    }

    #[test]
    fn falls_back_to_separate_families() {
        let families = [
            family(vk::QueueFlags::GRAPHICS),
            family(vk::QueueFlags::TRANSFER),
        ];
        let indices = QueueFamilyIndices::select(&families, |i| i == 1).unwrap();
        assert_eq!(
            indices,
            QueueFamilyIndices {
                graphics: 0,
                present: 1
            }
        );
        assert_eq!(indices.unique(), vec![0, 1]);
    }

    #[test]
    fn missing_families_are_rejected() {
        let compute_only = [family(vk::QueueFlags::COMPUTE)];
        assert!(QueueFamilyIndices::select(&compute_only, |_| true).is_none());

        let no_present = [family(vk::QueueFlags::GRAPHICS)];
        assert!(QueueFamilyIndices::select(&no_present, |_| false).is_none());
    }

    #[test]
    fn empty_families_are_ignored() {
        let families = [vk::QueueFamilyProperties {
            queue_flags: vk::QueueFlags::GRAPHICS,
            queue_count: 0,
            ..Default::default()
        }];
        assert!(QueueFamilyIndices::select(&families, |_| true).is_none());
    }

    #[test]
    fn swapchain_extension_is_required() {
        assert_eq!(required_device_extensions(), vec![ash::khr::swapchain::NAME]);
    }
}
