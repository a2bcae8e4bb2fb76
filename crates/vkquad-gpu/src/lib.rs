//! Vulkan layer for vkquad.
//!
//! This crate provides:
//! - Vulkan instance, debug messenger and device selection
//! - Surface and swapchain negotiation
//! - Swapchain generations that can be rebuilt when they go stale
//! - Frame slots and the per-frame presentation state machine
//! - Memory allocation via gpu-allocator
//! - Render pass and graphics pipeline creation

pub mod capabilities;
pub mod command;
pub mod context;
pub mod error;
pub mod frame;
pub mod instance;
pub mod lifecycle;
pub mod memory;
pub mod pipeline;
pub mod surface;
pub mod swapchain;
pub mod sync;

pub use capabilities::{GpuCapabilities, GpuVendor};
pub use command::CommandPool;
pub use context::{GpuContext, GpuContextBuilder, QueueFamilyIndices};
pub use error::{GpuError, Result};
pub use frame::{
    AcquireOutcome, FenceStatus, FrameBackend, FrameCursor, FrameOutcome, FramePresenter,
    PresentOutcome, PresenterConfig, StaleCause,
};
pub use lifecycle::{SwapchainBackend, SwapchainManager, VulkanSwapchainBackend};
pub use memory::{GpuAllocator, GpuBuffer};
pub use pipeline::{GraphicsPipeline, GraphicsPipelineConfig, RenderPass};
pub use surface::SurfaceContext;
pub use swapchain::{SurfaceSupport, Swapchain, SwapchainPlan};
pub use sync::{FrameSlots, FrameSync};
