//! Synchronization primitives and per-slot frame resources.

use crate::command::CommandPool;
use crate::error::{create_all_or_none, GpuError, Result};
use crate::frame::FenceStatus;
use ash::vk;
use std::time::Duration;

/// Create a semaphore.
///
/// # Safety
/// The device must be valid.
pub unsafe fn create_semaphore(device: &ash::Device) -> Result<vk::Semaphore> {
    let create_info = vk::SemaphoreCreateInfo::default();
    unsafe { device.create_semaphore(&create_info, None) }
        .map_err(|e| GpuError::Synchronization(format!("create semaphore: {e}")))
}

/// Create a fence.
///
/// # Safety
/// The device must be valid.
pub unsafe fn create_fence(device: &ash::Device, signaled: bool) -> Result<vk::Fence> {
    let flags = if signaled {
        vk::FenceCreateFlags::SIGNALED
    } else {
        vk::FenceCreateFlags::empty()
    };

    let create_info = vk::FenceCreateInfo::default().flags(flags);
    unsafe { device.create_fence(&create_info, None) }
        .map_err(|e| GpuError::Synchronization(format!("create fence: {e}")))
}

/// Translate the result of a fence wait.
pub fn fence_wait_status(result: ash::prelude::VkResult<()>) -> Result<FenceStatus> {
    match result {
        Ok(()) => Ok(FenceStatus::Signaled),
        Err(vk::Result::TIMEOUT) => Ok(FenceStatus::NotReady),
        Err(vk::Result::ERROR_DEVICE_LOST) => {
            Err(GpuError::DeviceLost("while waiting for a fence".into()))
        }
        Err(e) => Err(GpuError::Synchronization(format!("wait for fence: {e}"))),
    }
}

/// Block until the device has finished all submitted work.
///
/// # Safety
/// The device must be valid.
pub unsafe fn wait_device_idle(device: &ash::Device) -> Result<()> {
    match unsafe { device.device_wait_idle() } {
        Ok(()) => Ok(()),
        Err(vk::Result::ERROR_DEVICE_LOST) => {
            Err(GpuError::DeviceLost("while waiting for idle".into()))
        }
        Err(e) => Err(GpuError::Synchronization(format!("device wait idle: {e}"))),
    }
}

/// Synchronization objects for one frame slot.
pub struct FrameSync {
    /// Semaphore signaled when image is available
    pub image_available: vk::Semaphore,
    /// Semaphore signaled when rendering is complete
    pub render_finished: vk::Semaphore,
    /// Fence signaled when the slot's submission completes. Created signaled.
    pub in_flight: vk::Fence,
}

impl FrameSync {
    /// Create frame synchronization resources.
    ///
    /// # Safety
    /// The device must be valid.
    pub unsafe fn new(device: &ash::Device) -> Result<Self> {
        unsafe {
            let image_available = create_semaphore(device)?;
            let render_finished = create_semaphore(device)
                .inspect_err(|_| device.destroy_semaphore(image_available, None))?;
            let in_flight = create_fence(device, true).inspect_err(|_| {
                device.destroy_semaphore(render_finished, None);
                device.destroy_semaphore(image_available, None);
            })?;

            Ok(Self {
                image_available,
                render_finished,
                in_flight,
            })
        }
    }

    /// Wait up to `timeout` for the slot's previous submission.
    ///
    /// # Safety
    /// The device must be valid.
    pub unsafe fn wait(&self, device: &ash::Device, timeout: Duration) -> Result<FenceStatus> {
        let timeout_ns = u64::try_from(timeout.as_nanos()).unwrap_or(u64::MAX);
        fence_wait_status(unsafe { device.wait_for_fences(&[self.in_flight], true, timeout_ns) })
    }

    /// Reset the fence ahead of a submission.
    ///
    /// # Safety
    /// The device must be valid and the fence must not be pending.
    pub unsafe fn reset(&self, device: &ash::Device) -> Result<()> {
        unsafe { device.reset_fences(&[self.in_flight]) }
            .map_err(|e| GpuError::Synchronization(format!("reset fence: {e}")))
    }

    /// Replace the image-available semaphore with a fresh, unsignaled one.
    ///
    /// # Safety
    /// The device must be idle.
    pub unsafe fn recycle_image_available(&mut self, device: &ash::Device) -> Result<()> {
        unsafe {
            let fresh = create_semaphore(device)?;
            device.destroy_semaphore(self.image_available, None);
            self.image_available = fresh;
        }
        Ok(())
    }

    /// Destroy synchronization resources.
    ///
    /// # Safety
    /// The device must be valid and resources must not be in use.
    pub unsafe fn destroy(&self, device: &ash::Device) {
        unsafe {
            device.destroy_semaphore(self.image_available, None);
            device.destroy_semaphore(self.render_finished, None);
            device.destroy_fence(self.in_flight, None);
        }
    }
}

/// The ring of frame slots: sync objects plus one command buffer each.
///
/// Slots outlive swapchain generations.
pub struct FrameSlots {
    syncs: Vec<FrameSync>,
    command_buffers: Vec<vk::CommandBuffer>,
}

impl FrameSlots {
    /// Create `count` slots, allocating their command buffers from `pool`.
    ///
    /// # Safety
    /// The device must be valid.
    pub unsafe fn new(device: &ash::Device, pool: &CommandPool, count: usize) -> Result<Self> {
        let count_u32 = u32::try_from(count)
            .map_err(|_| GpuError::InvalidState(format!("{count} frame slots")))?;

        let syncs = create_all_or_none(
            0..count,
            |_| unsafe { FrameSync::new(device) },
            |sync| unsafe { sync.destroy(device) },
        )?;
        let command_buffers = unsafe { pool.allocate_command_buffers(device, count_u32) }
            .inspect_err(|_| {
                for sync in &syncs {
                    unsafe { sync.destroy(device) };
                }
            })?;

        tracing::debug!("Created {} frame slots", count);

        Ok(Self {
            syncs,
            command_buffers,
        })
    }

    /// Sync objects for `slot`.
    pub fn sync(&self, slot: usize) -> Result<&FrameSync> {
        self.syncs.get(slot).ok_or_else(|| slot_out_of_range(slot))
    }

    /// Mutable sync objects for `slot`.
    pub fn sync_mut(&mut self, slot: usize) -> Result<&mut FrameSync> {
        self.syncs.get_mut(slot).ok_or_else(|| slot_out_of_range(slot))
    }

    /// Command buffer for `slot`.
    pub fn command_buffer(&self, slot: usize) -> Result<vk::CommandBuffer> {
        self.command_buffers
            .get(slot)
            .copied()
            .ok_or_else(|| slot_out_of_range(slot))
    }

    /// Destroy the sync objects. Command buffers go with their pool.
    ///
    /// # Safety
    /// The device must be valid and all resources must not be in use.
    pub unsafe fn destroy(&self, device: &ash::Device) {
        for sync in &self.syncs {
            unsafe { sync.destroy(device) };
        }
    }
}

fn slot_out_of_range(slot: usize) -> GpuError {
    GpuError::InvalidState(format!("frame slot {slot} out of range"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fence_timeout_is_not_ready() {
        assert_eq!(
            fence_wait_status(Err(vk::Result::TIMEOUT)).unwrap(),
            FenceStatus::NotReady
        );
        assert_eq!(fence_wait_status(Ok(())).unwrap(), FenceStatus::Signaled);
    }

    #[test]
    fn fence_errors_are_classified() {
        assert!(matches!(
            fence_wait_status(Err(vk::Result::ERROR_DEVICE_LOST)),
            Err(GpuError::DeviceLost(_))
        ));
        assert!(matches!(
            fence_wait_status(Err(vk::Result::ERROR_OUT_OF_HOST_MEMORY)),
            Err(GpuError::Synchronization(_))
        ));
    }
}
