//! Application context.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use ash::vk;
use vkquad_gpu::command::{submit_command_buffers, CommandPool};
use vkquad_gpu::swapchain::select_surface_format;
use vkquad_gpu::{
    AcquireOutcome, FenceStatus, FrameBackend, FrameSlots, GpuContext, GpuError, PresentOutcome,
    Result, Swapchain, SwapchainManager, VulkanSwapchainBackend,
};
use vkquad_render::QuadRenderer;
use winit::dpi::PhysicalSize;
use winit::window::Window;

use crate::runner::AppConfig;

/// Everything the frame loop touches.
///
/// Implements [`FrameBackend`] on top of the live swapchain generation, the
/// frame slots and the quad renderer.
pub struct AppContext {
    // Declared before `window` so the surface is destroyed while the window still exists
    gpu: GpuContext,
    window: Arc<Window>,
    command_pool: CommandPool,
    slots: FrameSlots,
    renderer: QuadRenderer,
    swapchains: SwapchainManager<VulkanSwapchainBackend>,
}

fn extent_of(size: PhysicalSize<u32>) -> vk::Extent2D {
    vk::Extent2D {
        width: size.width,
        height: size.height,
    }
}

impl AppContext {
    /// Set up the renderer, the first swapchain generation and the frame slots.
    pub(crate) fn new(window: Arc<Window>, gpu: GpuContext, config: &AppConfig) -> anyhow::Result<Self> {
        let device = gpu.device();
        let drawable = extent_of(window.inner_size());

        // The render pass outlives swapchain generations, so fix its format up front
        let support = unsafe { gpu.surface().support(gpu.physical_device()) }
            .context("querying surface support")?;
        let surface_format = select_surface_format(&support.formats)?;

        let command_pool = unsafe { CommandPool::new(device, gpu.queue_families().graphics) }
            .context("creating command pool")?;
        let release_pool = || unsafe { command_pool.destroy(device) };

        let mut renderer = unsafe {
            QuadRenderer::new(
                device,
                &mut gpu.allocator().lock(),
                &command_pool,
                gpu.graphics_queue(),
                surface_format.format,
                config.clear_color,
            )
        }
        .inspect_err(|_| release_pool())
        .context("creating quad renderer")?;

        let backend = VulkanSwapchainBackend::new(&gpu, renderer.render_pass(), drawable);
        let mut swapchains = SwapchainManager::prepare(backend)
            .inspect_err(|_| {
                unsafe { renderer.destroy(device, &mut gpu.allocator().lock()) };
                release_pool();
            })
            .context("creating swapchain")?;

        let frames_in_flight = config.presenter_config().frames_in_flight;
        let slots = unsafe { FrameSlots::new(device, &command_pool, frames_in_flight) }
            .inspect_err(|_| {
                swapchains.teardown();
                unsafe { renderer.destroy(device, &mut gpu.allocator().lock()) };
                release_pool();
            })
            .context("creating frame slots")?;

        tracing::info!("{} frames in flight", frames_in_flight);

        Ok(Self {
            gpu,
            window,
            command_pool,
            slots,
            renderer,
            swapchains,
        })
    }

    pub fn window(&self) -> &Window {
        &self.window
    }

    pub const fn gpu(&self) -> &GpuContext {
        &self.gpu
    }

    /// Generation of the live swapchain.
    pub const fn generation(&self) -> u64 {
        self.swapchains.generation()
    }

    /// Current swapchain extent, if a generation is live.
    pub fn extent(&self) -> Option<vk::Extent2D> {
        self.swapchains.current().map(|swapchain| swapchain.extent)
    }

    /// Whether the window currently has no drawable area.
    pub fn is_minimized(&self) -> bool {
        let size = self.window.inner_size();
        size.width == 0 || size.height == 0
    }

    /// Record the window's new drawable size for the next rebuild.
    pub(crate) fn set_drawable_size(&mut self, size: PhysicalSize<u32>) {
        self.swapchains
            .backend_mut()
            .set_drawable_extent(extent_of(size));
    }

    fn swapchain(&self) -> Result<&Swapchain> {
        self.swapchains
            .current()
            .ok_or_else(|| GpuError::InvalidState("no live swapchain".into()))
    }

    /// Idle the device and release everything. Device, surface and instance go
    /// with the GPU context when `self` drops.
    pub(crate) fn cleanup(mut self) {
        if let Err(e) = self.gpu.wait_idle() {
            tracing::error!("Failed to wait idle: {}", e);
        }

        let device = self.gpu.device();
        self.swapchains.teardown();
        unsafe {
            self.renderer.destroy(device, &mut self.gpu.allocator().lock());
            self.slots.destroy(device);
            self.command_pool.destroy(device);
        }

        tracing::info!("Cleanup complete");
    }
}

impl FrameBackend for AppContext {
    fn wait_for_slot(&mut self, slot: usize, timeout: Duration) -> Result<FenceStatus> {
        unsafe { self.slots.sync(slot)?.wait(self.gpu.device(), timeout) }
    }

    fn reset_slot(&mut self, slot: usize) -> Result<()> {
        unsafe { self.slots.sync(slot)?.reset(self.gpu.device()) }
    }

    fn acquire_image(&mut self, slot: usize) -> Result<AcquireOutcome> {
        let semaphore = self.slots.sync(slot)?.image_available;
        unsafe {
            self.swapchain()?
                .acquire_next_image(self.gpu.swapchain_loader(), semaphore)
        }
    }

    fn record(&mut self, slot: usize, image_index: u32) -> Result<()> {
        let cmd = self.slots.command_buffer(slot)?;
        let swapchain = self.swapchain()?;
        let framebuffer = swapchain.framebuffer(image_index)?;
        unsafe {
            self.renderer
                .record(self.gpu.device(), cmd, framebuffer, swapchain.extent)
        }
    }

    fn submit(&mut self, slot: usize) -> Result<()> {
        let sync = self.slots.sync(slot)?;
        let command_buffers = [self.slots.command_buffer(slot)?];
        let wait_semaphores = [sync.image_available];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let signal_semaphores = [sync.render_finished];

        unsafe {
            submit_command_buffers(
                self.gpu.device(),
                self.gpu.graphics_queue(),
                &command_buffers,
                &wait_semaphores,
                &wait_stages,
                &signal_semaphores,
                sync.in_flight,
            )
        }
    }

    fn present(&mut self, slot: usize, image_index: u32) -> Result<PresentOutcome> {
        let render_finished = self.slots.sync(slot)?.render_finished;
        unsafe {
            self.swapchain()?.present(
                self.gpu.swapchain_loader(),
                self.gpu.present_queue(),
                image_index,
                &[render_finished],
            )
        }
    }

    fn rebuild_swapchain(&mut self) -> Result<()> {
        self.swapchains.rebuild()?;

        let format = self.swapchain()?.format;
        if format != self.renderer.color_format() {
            return Err(GpuError::InvalidState(format!(
                "swapchain format changed from {:?} to {:?}",
                self.renderer.color_format(),
                format
            )));
        }
        Ok(())
    }

    fn recycle_image_semaphore(&mut self, slot: usize) -> Result<()> {
        let device = self.gpu.device();
        unsafe { self.slots.sync_mut(slot)?.recycle_image_available(device) }
    }
}
