//! Command buffer management.

use crate::error::{GpuError, Result};
use ash::vk;

/// Command pool for allocating command buffers.
pub struct CommandPool {
    pool: vk::CommandPool,
}

impl CommandPool {
    /// Create a pool whose buffers can be reset individually.
    ///
    /// # Safety
    /// The device must be valid and the queue family must exist.
    pub unsafe fn new(device: &ash::Device, queue_family: u32) -> Result<Self> {
        let create_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(queue_family)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);

        let pool = unsafe { device.create_command_pool(&create_info, None) }
            .map_err(|e| GpuError::CommandBuffer(format!("create pool: {e}")))?;

        Ok(Self { pool })
    }

    /// Get the raw pool handle.
    pub const fn handle(&self) -> vk::CommandPool {
        self.pool
    }

    /// Allocate `count` primary command buffers.
    ///
    /// # Safety
    /// The device must be valid.
    pub unsafe fn allocate_command_buffers(
        &self,
        device: &ash::Device,
        count: u32,
    ) -> Result<Vec<vk::CommandBuffer>> {
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(count);

        unsafe { device.allocate_command_buffers(&alloc_info) }
            .map_err(|e| GpuError::CommandBuffer(format!("allocate: {e}")))
    }

    /// Destroy the command pool and every buffer allocated from it.
    ///
    /// # Safety
    /// The device must be valid and the pool must not be in use.
    pub unsafe fn destroy(&self, device: &ash::Device) {
        unsafe { device.destroy_command_pool(self.pool, None) };
    }
}

/// Reset a command buffer and begin recording into it.
///
/// # Safety
/// The device and command buffer must be valid and the buffer must not be pending.
pub unsafe fn begin_command_buffer(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    flags: vk::CommandBufferUsageFlags,
) -> Result<()> {
    let begin_info = vk::CommandBufferBeginInfo::default().flags(flags);
    unsafe {
        device
            .reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())
            .map_err(|e| GpuError::CommandBuffer(format!("reset: {e}")))?;
        device
            .begin_command_buffer(cmd, &begin_info)
            .map_err(|e| GpuError::CommandBuffer(format!("begin: {e}")))?;
    }
    Ok(())
}

/// End recording a command buffer.
///
/// # Safety
/// The device and command buffer must be valid.
pub unsafe fn end_command_buffer(device: &ash::Device, cmd: vk::CommandBuffer) -> Result<()> {
    unsafe { device.end_command_buffer(cmd) }
        .map_err(|e| GpuError::CommandBuffer(format!("end: {e}")))
}

/// Submit command buffers to a queue.
///
/// # Safety
/// All handles must be valid.
pub unsafe fn submit_command_buffers(
    device: &ash::Device,
    queue: vk::Queue,
    command_buffers: &[vk::CommandBuffer],
    wait_semaphores: &[vk::Semaphore],
    wait_stages: &[vk::PipelineStageFlags],
    signal_semaphores: &[vk::Semaphore],
    fence: vk::Fence,
) -> Result<()> {
    let submit_info = vk::SubmitInfo::default()
        .command_buffers(command_buffers)
        .wait_semaphores(wait_semaphores)
        .wait_dst_stage_mask(wait_stages)
        .signal_semaphores(signal_semaphores);

    match unsafe { device.queue_submit(queue, &[submit_info], fence) } {
        Ok(()) => Ok(()),
        Err(vk::Result::ERROR_DEVICE_LOST) => {
            Err(GpuError::DeviceLost("during queue submission".into()))
        }
        Err(e) => Err(GpuError::QueueSubmit(e.to_string())),
    }
}

/// Record, submit and wait for a throwaway command buffer.
///
/// # Safety
/// All handles must be valid.
pub unsafe fn execute_single_time_commands<F>(
    device: &ash::Device,
    pool: &CommandPool,
    queue: vk::Queue,
    f: F,
) -> Result<()>
where
    F: FnOnce(vk::CommandBuffer),
{
    let buffers = unsafe { pool.allocate_command_buffers(device, 1)? };
    let cmd = buffers[0];

    let result = unsafe {
        begin_command_buffer(device, cmd, vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT)
            .and_then(|()| {
                f(cmd);
                end_command_buffer(device, cmd)
            })
            .and_then(|()| {
                submit_command_buffers(device, queue, &buffers, &[], &[], &[], vk::Fence::null())
            })
            .and_then(|()| {
                device
                    .queue_wait_idle(queue)
                    .map_err(|e| GpuError::QueueSubmit(format!("wait idle: {e}")))
            })
    };

    unsafe { device.free_command_buffers(pool.handle(), &buffers) };

    result
}
