//! GPU error types.

use ash::vk;
use thiserror::Error;

/// GPU-related errors.
///
/// Every variant is a distinct failure class with its own process exit code,
/// see [`GpuError::exit_code`].
#[derive(Error, Debug)]
pub enum GpuError {
    /// Vulkan error not attributed to a more specific class.
    #[error("Vulkan error: {0}")]
    Vulkan(#[from] vk::Result),

    /// The Vulkan loader could not be loaded.
    #[error("Failed to load Vulkan: {0}")]
    Loading(String),

    /// No suitable GPU found.
    #[error("No suitable GPU found")]
    NoSuitableDevice,

    /// Required extension not supported.
    #[error("Required extension not supported: {0}")]
    ExtensionNotSupported(String),

    /// Surface creation failed.
    #[error("Surface creation failed: {0}")]
    SurfaceCreation(String),

    /// Logical device creation failed.
    #[error("Device creation failed: {0}")]
    DeviceCreation(String),

    /// The surface reports no formats or no present modes.
    #[error("Device cannot present to this surface: {0}")]
    PresentationUnsupported(String),

    /// Swapchain creation failed.
    #[error("Swapchain creation failed: {0}")]
    SwapchainCreation(String),

    /// Swapchain image view creation failed.
    #[error("Image view creation failed: {0}")]
    ImageViewCreation(String),

    /// Framebuffer creation failed.
    #[error("Framebuffer creation failed: {0}")]
    FramebufferCreation(String),

    /// Render pass creation failed.
    #[error("Render pass creation failed: {0}")]
    RenderPassCreation(String),

    /// Shader module creation failed.
    #[error("Shader compilation failed: {0}")]
    ShaderCompilation(String),

    /// Pipeline creation failed.
    #[error("Pipeline creation failed: {0}")]
    PipelineCreation(String),

    /// Memory allocation failed.
    #[error("Memory allocation failed: {0}")]
    AllocationFailed(String),

    /// Command pool or command buffer failure (allocation, begin, end, reset).
    #[error("Command buffer failure: {0}")]
    CommandBuffer(String),

    /// Fence or semaphore creation, wait or reset failed.
    #[error("Synchronization failure: {0}")]
    Synchronization(String),

    /// Queue submission failed.
    #[error("Queue submission failed: {0}")]
    QueueSubmit(String),

    /// Acquire or present failed with an unrecognized result.
    #[error("Presentation failed: {0}")]
    Presentation(String),

    /// The device stopped responding (lost, or a bounded fence wait elapsed).
    #[error("Device lost: {0}")]
    DeviceLost(String),

    /// Invalid state.
    #[error("Invalid state: {0}")]
    InvalidState(String),
}

impl GpuError {
    /// Process exit code for this failure class.
    ///
    /// Codes are nonzero and unique per variant.
    #[must_use]
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::Vulkan(_) => 10,
            Self::Loading(_) => 11,
            Self::NoSuitableDevice => 12,
            Self::ExtensionNotSupported(_) => 13,
            Self::SurfaceCreation(_) => 14,
            Self::DeviceCreation(_) => 15,
            Self::PresentationUnsupported(_) => 16,
            Self::SwapchainCreation(_) => 17,
            Self::ImageViewCreation(_) => 18,
            Self::FramebufferCreation(_) => 19,
            Self::RenderPassCreation(_) => 20,
            Self::ShaderCompilation(_) => 21,
            Self::PipelineCreation(_) => 22,
            Self::AllocationFailed(_) => 23,
            Self::CommandBuffer(_) => 24,
            Self::Synchronization(_) => 25,
            Self::QueueSubmit(_) => 26,
            Self::Presentation(_) => 27,
            Self::DeviceLost(_) => 28,
            Self::InvalidState(_) => 29,
        }
    }
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, GpuError>;

/// Create one handle per item, or none at all.
///
/// On the first failure every handle created so far is passed to `release`,
/// newest first, and the error is returned.
pub fn create_all_or_none<I, T, H>(
    items: I,
    mut create: impl FnMut(T) -> Result<H>,
    mut release: impl FnMut(H),
) -> Result<Vec<H>>
where
    I: IntoIterator<Item = T>,
{
    let mut created = Vec::new();
    for item in items {
        match create(item) {
            Ok(handle) => created.push(handle),
            Err(e) => {
                while let Some(handle) = created.pop() {
                    release(handle);
                }
                return Err(e);
            }
        }
    }
    Ok(created)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn one_of_each() -> Vec<GpuError> {
        let s = || "x".to_string();
        vec![
            GpuError::Vulkan(vk::Result::ERROR_UNKNOWN),
            GpuError::Loading(s()),
            GpuError::NoSuitableDevice,
            GpuError::ExtensionNotSupported(s()),
            GpuError::SurfaceCreation(s()),
            GpuError::DeviceCreation(s()),
            GpuError::PresentationUnsupported(s()),
            GpuError::SwapchainCreation(s()),
            GpuError::ImageViewCreation(s()),
            GpuError::FramebufferCreation(s()),
            GpuError::RenderPassCreation(s()),
            GpuError::ShaderCompilation(s()),
            GpuError::PipelineCreation(s()),
            GpuError::AllocationFailed(s()),
            GpuError::CommandBuffer(s()),
            GpuError::Synchronization(s()),
            GpuError::QueueSubmit(s()),
            GpuError::Presentation(s()),
            GpuError::DeviceLost(s()),
            GpuError::InvalidState(s()),
        ]
    }

    #[test]
    fn exit_codes_are_distinct_and_nonzero() {
        let errors = one_of_each();
        let codes: HashSet<u8> = errors.iter().map(GpuError::exit_code).collect();
        assert_eq!(codes.len(), errors.len());
        assert!(!codes.contains(&0));
    }

    #[test]
    fn create_all_or_none_keeps_everything_on_success() {
        let mut released = Vec::new();
        let handles = create_all_or_none(0..3, |i| Ok(i * 10), |h| released.push(h)).unwrap();
        assert_eq!(handles, vec![0, 10, 20]);
        assert!(released.is_empty());
    }

    #[test]
    fn create_all_or_none_releases_partial_work() {
        let mut released = Vec::new();
        let result = create_all_or_none(
            0..5,
            |i| {
                if i == 3 {
                    Err(GpuError::ImageViewCreation("out of memory".into()))
                } else {
                    Ok(i)
                }
            },
            |h| released.push(h),
        );

        assert!(matches!(result, Err(GpuError::ImageViewCreation(_))));
        assert_eq!(released, vec![2, 1, 0]);
    }

    #[test]
    fn vulkan_results_convert() {
        let err: GpuError = vk::Result::ERROR_DEVICE_LOST.into();
        assert!(matches!(err, GpuError::Vulkan(vk::Result::ERROR_DEVICE_LOST)));
    }
}
