//! Swapchain generations: prepare, rebuild, teardown.
//!
//! [`SwapchainManager`] owns at most one live generation at a time. Rebuilds
//! happen behind a device-idle barrier and always destroy the old generation
//! before creating the next one.

use crate::context::{GpuContext, QueueFamilyIndices};
use crate::error::Result;
use crate::swapchain::{SurfaceSupport, Swapchain, SwapchainPlan};
use crate::sync::wait_device_idle;
use ash::vk;
use std::sync::Arc;

/// Device-facing half of the swapchain lifecycle.
pub trait SwapchainBackend {
    /// Everything derived from one generation's images.
    type Resources;

    /// Block until the device has finished all submitted work.
    fn wait_idle(&mut self) -> Result<()>;

    /// Current surface capabilities, formats and present modes.
    fn query_support(&mut self) -> Result<SurfaceSupport>;

    /// The window's drawable size in pixels.
    fn drawable_extent(&self) -> vk::Extent2D;

    fn queue_families(&self) -> QueueFamilyIndices;

    /// Create the resources for `plan`.
    fn create(&mut self, plan: &SwapchainPlan, generation: u64) -> Result<Self::Resources>;

    /// Release a generation's resources.
    fn destroy(&mut self, resources: Self::Resources);
}

/// Owns the live swapchain generation.
pub struct SwapchainManager<B: SwapchainBackend> {
    backend: B,
    current: Option<B::Resources>,
    generation: u64,
}

impl<B: SwapchainBackend> SwapchainManager<B> {
    /// Negotiate and create generation 0.
    pub fn prepare(mut backend: B) -> Result<Self> {
        let plan = Self::negotiate(&mut backend)?;
        let resources = backend.create(&plan, 0)?;

        Ok(Self {
            backend,
            current: Some(resources),
            generation: 0,
        })
    }

    /// Replace the live generation with a freshly negotiated one.
    pub fn rebuild(&mut self) -> Result<()> {
        self.backend.wait_idle()?;
        self.teardown();

        let plan = Self::negotiate(&mut self.backend)?;
        self.generation += 1;
        self.current = Some(self.backend.create(&plan, self.generation)?);

        tracing::info!(
            "Swapchain rebuilt: generation {} at {}x{}",
            self.generation,
            plan.extent.width,
            plan.extent.height
        );
        Ok(())
    }

    /// Release the live generation, if any.
    pub fn teardown(&mut self) {
        if let Some(resources) = self.current.take() {
            self.backend.destroy(resources);
        }
    }

    /// The live generation. `None` only after [`teardown`](Self::teardown) or a failed rebuild.
    pub const fn current(&self) -> Option<&B::Resources> {
        self.current.as_ref()
    }

    /// Number of rebuilds so far.
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    pub const fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    fn negotiate(backend: &mut B) -> Result<SwapchainPlan> {
        let support = backend.query_support()?;
        let families = backend.queue_families();
        SwapchainPlan::negotiate(
            &support,
            backend.drawable_extent(),
            families.graphics,
            families.present,
        )
    }
}

/// [`SwapchainBackend`] creating real swapchains, views and framebuffers.
pub struct VulkanSwapchainBackend {
    device: Arc<ash::Device>,
    surface_loader: ash::khr::surface::Instance,
    swapchain_loader: ash::khr::swapchain::Device,
    surface: vk::SurfaceKHR,
    physical_device: vk::PhysicalDevice,
    queue_families: QueueFamilyIndices,
    render_pass: vk::RenderPass,
    drawable: vk::Extent2D,
}

impl VulkanSwapchainBackend {
    /// Backend for `gpu`'s surface whose framebuffers target `render_pass`.
    pub fn new(gpu: &GpuContext, render_pass: vk::RenderPass, drawable: vk::Extent2D) -> Self {
        Self {
            device: gpu.device_arc(),
            surface_loader: gpu.surface().surface_loader.clone(),
            swapchain_loader: gpu.swapchain_loader().clone(),
            surface: gpu.surface().surface,
            physical_device: gpu.physical_device(),
            queue_families: gpu.queue_families(),
            render_pass,
            drawable,
        }
    }

    /// Update the window size used when the surface leaves the extent to us.
    pub fn set_drawable_extent(&mut self, drawable: vk::Extent2D) {
        self.drawable = drawable;
    }
}

impl SwapchainBackend for VulkanSwapchainBackend {
    type Resources = Swapchain;

    fn wait_idle(&mut self) -> Result<()> {
        unsafe { wait_device_idle(&self.device) }
    }

    fn query_support(&mut self) -> Result<SurfaceSupport> {
        unsafe { SurfaceSupport::query(&self.surface_loader, self.physical_device, self.surface) }
    }

    fn drawable_extent(&self) -> vk::Extent2D {
        self.drawable
    }

    fn queue_families(&self) -> QueueFamilyIndices {
        self.queue_families
    }

    fn create(&mut self, plan: &SwapchainPlan, generation: u64) -> Result<Swapchain> {
        unsafe {
            Swapchain::new(
                &self.device,
                &self.swapchain_loader,
                self.surface,
                plan,
                self.render_pass,
                generation,
            )
        }
    }

    fn destroy(&mut self, resources: Swapchain) {
        unsafe { resources.destroy(&self.device, &self.swapchain_loader) };
    }
}
