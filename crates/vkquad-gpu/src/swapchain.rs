//! Swapchain negotiation and per-generation resources.
//!
//! Selection policies are plain functions over the surface's reported support so
//! they can be tested without a device. [`Swapchain`] owns everything derived from
//! the presentable images: the swapchain object, one image view and one framebuffer
//! per image. All of it is replaced wholesale on rebuild.

use crate::error::{create_all_or_none, GpuError, Result};
use crate::frame::{AcquireOutcome, PresentOutcome};
use ash::vk;

/// Capabilities, formats and present modes a surface reports for a device.
#[derive(Debug, Clone, Default)]
pub struct SurfaceSupport {
    /// Raw surface capabilities.
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    /// Supported surface formats, in driver order.
    pub formats: Vec<vk::SurfaceFormatKHR>,
    /// Supported present modes, in driver order.
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SurfaceSupport {
    /// Query support for `surface` on `physical_device`.
    ///
    /// # Safety
    /// The loader, physical device and surface must be valid.
    pub unsafe fn query(
        loader: &ash::khr::surface::Instance,
        physical_device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
    ) -> Result<Self> {
        unsafe {
            let capabilities =
                loader.get_physical_device_surface_capabilities(physical_device, surface)?;
            let formats = loader.get_physical_device_surface_formats(physical_device, surface)?;
            let present_modes =
                loader.get_physical_device_surface_present_modes(physical_device, surface)?;

            Ok(Self {
                capabilities,
                formats,
                present_modes,
            })
        }
    }

    /// Whether the surface can be presented to at all.
    pub fn is_adequate(&self) -> bool {
        !self.formats.is_empty() && !self.present_modes.is_empty()
    }
}

/// Select the surface format.
///
/// The first BGRA8 sRGB / sRGB-nonlinear entry wins, otherwise the first
/// format the driver reported.
pub fn select_surface_format(available: &[vk::SurfaceFormatKHR]) -> Result<vk::SurfaceFormatKHR> {
    available
        .iter()
        .find(|f| {
            f.format == vk::Format::B8G8R8A8_SRGB
                && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .or_else(|| available.first())
        .copied()
        .ok_or_else(|| GpuError::PresentationUnsupported("surface reports no formats".into()))
}

/// Select the present mode: mailbox when offered, FIFO otherwise.
pub fn select_present_mode(available: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    if available.contains(&vk::PresentModeKHR::MAILBOX) {
        vk::PresentModeKHR::MAILBOX
    } else {
        // FIFO is always supported
        vk::PresentModeKHR::FIFO
    }
}

/// Calculate the swapchain extent.
///
/// When the surface reports the `u32::MAX` sentinel the extent follows the
/// window's drawable size, clamped to the surface limits.
pub fn calculate_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    drawable: vk::Extent2D,
) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        capabilities.current_extent
    } else {
        vk::Extent2D {
            width: drawable.width.clamp(
                capabilities.min_image_extent.width,
                capabilities.max_image_extent.width,
            ),
            height: drawable.height.clamp(
                capabilities.min_image_extent.height,
                capabilities.max_image_extent.height,
            ),
        }
    }
}

/// One more than the minimum image count, clamped to the maximum when it is bounded.
pub fn select_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let desired = capabilities.min_image_count + 1;
    if capabilities.max_image_count > 0 {
        desired.min(capabilities.max_image_count)
    } else {
        desired
    }
}

/// How swapchain images are shared between queue families.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageSharing {
    /// Graphics and present use the same family.
    Exclusive,
    /// Graphics and present families differ.
    Concurrent([u32; 2]),
}

impl ImageSharing {
    /// Pick the sharing mode for the given graphics and present families.
    pub const fn for_families(graphics: u32, present: u32) -> Self {
        if graphics == present {
            Self::Exclusive
        } else {
            Self::Concurrent([graphics, present])
        }
    }

    const fn mode(&self) -> vk::SharingMode {
        match self {
            Self::Exclusive => vk::SharingMode::EXCLUSIVE,
            Self::Concurrent(_) => vk::SharingMode::CONCURRENT,
        }
    }

    fn family_indices(&self) -> &[u32] {
        match self {
            Self::Exclusive => &[],
            Self::Concurrent(families) => families,
        }
    }
}

/// The outcome of negotiating a swapchain against a surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapchainPlan {
    pub surface_format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub extent: vk::Extent2D,
    pub image_count: u32,
    pub pre_transform: vk::SurfaceTransformFlagsKHR,
    pub sharing: ImageSharing,
}

impl SwapchainPlan {
    /// Negotiate a swapchain configuration.
    ///
    /// Fails with [`GpuError::PresentationUnsupported`] when the surface reports
    /// no formats or no present modes.
    pub fn negotiate(
        support: &SurfaceSupport,
        drawable: vk::Extent2D,
        graphics_family: u32,
        present_family: u32,
    ) -> Result<Self> {
        if support.present_modes.is_empty() {
            return Err(GpuError::PresentationUnsupported(
                "surface reports no present modes".into(),
            ));
        }

        Ok(Self {
            surface_format: select_surface_format(&support.formats)?,
            present_mode: select_present_mode(&support.present_modes),
            extent: calculate_extent(&support.capabilities, drawable),
            image_count: select_image_count(&support.capabilities),
            pre_transform: support.capabilities.current_transform,
            sharing: ImageSharing::for_families(graphics_family, present_family),
        })
    }
}

/// Swapchain and its image-derived resources for one generation.
pub struct Swapchain {
    pub swapchain: vk::SwapchainKHR,
    pub images: Vec<vk::Image>,
    pub image_views: Vec<vk::ImageView>,
    pub framebuffers: Vec<vk::Framebuffer>,
    pub format: vk::Format,
    pub color_space: vk::ColorSpaceKHR,
    pub extent: vk::Extent2D,
    pub generation: u64,
}

impl Swapchain {
    /// Create the swapchain described by `plan`, with views and framebuffers
    /// compatible with `render_pass`.
    ///
    /// # Safety
    /// All handles must be valid.
    pub unsafe fn new(
        device: &ash::Device,
        swapchain_loader: &ash::khr::swapchain::Device,
        surface: vk::SurfaceKHR,
        plan: &SwapchainPlan,
        render_pass: vk::RenderPass,
        generation: u64,
    ) -> Result<Self> {
        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(surface)
            .min_image_count(plan.image_count)
            .image_format(plan.surface_format.format)
            .image_color_space(plan.surface_format.color_space)
            .image_extent(plan.extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(plan.sharing.mode())
            .queue_family_indices(plan.sharing.family_indices())
            .pre_transform(plan.pre_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(plan.present_mode)
            .clipped(true);

        let swapchain = unsafe { swapchain_loader.create_swapchain(&create_info, None) }
            .map_err(|e| GpuError::SwapchainCreation(e.to_string()))?;
        let release_swapchain = || unsafe { swapchain_loader.destroy_swapchain(swapchain, None) };

        let images = unsafe { swapchain_loader.get_swapchain_images(swapchain) }
            .map_err(|e| GpuError::SwapchainCreation(e.to_string()))
            .inspect_err(|_| release_swapchain())?;

        let image_views = create_all_or_none(
            images.iter().copied(),
            |image| {
                let view_info = vk::ImageViewCreateInfo::default()
                    .image(image)
                    .view_type(vk::ImageViewType::TYPE_2D)
                    .format(plan.surface_format.format)
                    .components(vk::ComponentMapping::default())
                    .subresource_range(
                        vk::ImageSubresourceRange::default()
                            .aspect_mask(vk::ImageAspectFlags::COLOR)
                            .base_mip_level(0)
                            .level_count(1)
                            .base_array_layer(0)
                            .layer_count(1),
                    );

                unsafe { device.create_image_view(&view_info, None) }
                    .map_err(|e| GpuError::ImageViewCreation(e.to_string()))
            },
            |view| unsafe { device.destroy_image_view(view, None) },
        )
        .inspect_err(|_| release_swapchain())?;

        let framebuffers = create_all_or_none(
            image_views.iter().copied(),
            |view| {
                let attachments = [view];
                let framebuffer_info = vk::FramebufferCreateInfo::default()
                    .render_pass(render_pass)
                    .attachments(&attachments)
                    .width(plan.extent.width)
                    .height(plan.extent.height)
                    .layers(1);

                unsafe { device.create_framebuffer(&framebuffer_info, None) }
                    .map_err(|e| GpuError::FramebufferCreation(e.to_string()))
            },
            |framebuffer| unsafe { device.destroy_framebuffer(framebuffer, None) },
        )
        .inspect_err(|_| {
            for &view in &image_views {
                unsafe { device.destroy_image_view(view, None) };
            }
            release_swapchain();
        })?;

        tracing::info!(
            "Swapchain created: {}x{} ({} images, {:?}, {:?}, generation {})",
            plan.extent.width,
            plan.extent.height,
            images.len(),
            plan.surface_format.format,
            plan.present_mode,
            generation
        );

        Ok(Self {
            swapchain,
            images,
            image_views,
            framebuffers,
            format: plan.surface_format.format,
            color_space: plan.surface_format.color_space,
            extent: plan.extent,
            generation,
        })
    }

    /// Framebuffer for an acquired image index.
    pub fn framebuffer(&self, image_index: u32) -> Result<vk::Framebuffer> {
        self.framebuffers
            .get(image_index as usize)
            .copied()
            .ok_or_else(|| {
                GpuError::InvalidState(format!(
                    "image index {image_index} out of range for generation {}",
                    self.generation
                ))
            })
    }

    /// Acquire the next image, signaling `semaphore` once it is available.
    ///
    /// # Safety
    /// All handles must be valid.
    pub unsafe fn acquire_next_image(
        &self,
        swapchain_loader: &ash::khr::swapchain::Device,
        semaphore: vk::Semaphore,
    ) -> Result<AcquireOutcome> {
        let result = unsafe {
            swapchain_loader.acquire_next_image(
                self.swapchain,
                u64::MAX,
                semaphore,
                vk::Fence::null(),
            )
        };

        match result {
            Ok((index, false)) => Ok(AcquireOutcome::Acquired(index)),
            Ok((index, true)) => Ok(AcquireOutcome::Suboptimal(index)),
            // No image was acquired and the semaphore stays unsignaled
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireOutcome::OutOfDate),
            Err(vk::Result::ERROR_DEVICE_LOST) => {
                Err(GpuError::DeviceLost("during image acquisition".into()))
            }
            Err(e) => Err(GpuError::Presentation(format!("acquire: {e}"))),
        }
    }

    /// Present an image.
    ///
    /// # Safety
    /// All handles must be valid.
    pub unsafe fn present(
        &self,
        swapchain_loader: &ash::khr::swapchain::Device,
        queue: vk::Queue,
        image_index: u32,
        wait_semaphores: &[vk::Semaphore],
    ) -> Result<PresentOutcome> {
        let swapchains = [self.swapchain];
        let image_indices = [image_index];

        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let result = unsafe { swapchain_loader.queue_present(queue, &present_info) };

        match result {
            Ok(false) => Ok(PresentOutcome::Presented),
            Ok(true) | Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentOutcome::Stale),
            Err(vk::Result::ERROR_DEVICE_LOST) => {
                Err(GpuError::DeviceLost("during presentation".into()))
            }
            Err(e) => Err(GpuError::Presentation(format!("present: {e}"))),
        }
    }

    /// Destroy the framebuffers, image views and swapchain.
    ///
    /// # Safety
    /// All handles must be valid and the swapchain must not be in use.
    pub unsafe fn destroy(
        &self,
        device: &ash::Device,
        swapchain_loader: &ash::khr::swapchain::Device,
    ) {
        unsafe {
            for &framebuffer in &self.framebuffers {
                device.destroy_framebuffer(framebuffer, None);
            }
            for &view in &self.image_views {
                device.destroy_image_view(view, None);
            }
            swapchain_loader.destroy_swapchain(self.swapchain, None);
        }
        tracing::debug!("Swapchain generation {} destroyed", self.generation);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn format(format: vk::Format, color_space: vk::ColorSpaceKHR) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space,
        }
    }

    fn extent(width: u32, height: u32) -> vk::Extent2D {
        vk::Extent2D { width, height }
    }

    fn undefined_extent_caps() -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            current_extent: extent(u32::MAX, u32::MAX),
            min_image_extent: extent(1, 1),
            max_image_extent: extent(4096, 4096),
            min_image_count: 2,
            max_image_count: 8,
            ..Default::default()
        }
    }

    fn support() -> SurfaceSupport {
        SurfaceSupport {
            capabilities: undefined_extent_caps(),
            formats: vec![format(
                vk::Format::B8G8R8A8_SRGB,
                vk::ColorSpaceKHR::SRGB_NONLINEAR,
            )],
            present_modes: vec![vk::PresentModeKHR::FIFO],
        }
    }

    #[test]
    fn prefers_bgra8_srgb_format() {
        let formats = [
            format(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            format(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR),
        ];
        assert_eq!(select_surface_format(&formats).unwrap(), formats[1]);
    }

    #[test]
    fn falls_back_to_first_format() {
        let formats = [
            format(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            format(
                vk::Format::B8G8R8A8_SRGB,
                vk::ColorSpaceKHR::EXTENDED_SRGB_LINEAR_EXT,
            ),
        ];
        assert_eq!(select_surface_format(&formats).unwrap(), formats[0]);
    }

    #[test]
    fn empty_format_list_is_unusable() {
        assert!(matches!(
            select_surface_format(&[]),
            Err(GpuError::PresentationUnsupported(_))
        ));
    }

    #[test]
    fn present_mode_policy() {
        assert_eq!(
            select_present_mode(&[vk::PresentModeKHR::FIFO]),
            vk::PresentModeKHR::FIFO
        );
        assert_eq!(
            select_present_mode(&[vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX]),
            vk::PresentModeKHR::MAILBOX
        );
        assert_eq!(
            select_present_mode(&[vk::PresentModeKHR::IMMEDIATE, vk::PresentModeKHR::FIFO]),
            vk::PresentModeKHR::FIFO
        );
    }

    #[test]
    fn undefined_extent_follows_drawable() {
        let caps = undefined_extent_caps();
        assert_eq!(calculate_extent(&caps, extent(800, 600)), extent(800, 600));
    }

    #[test]
    fn undefined_extent_is_clamped() {
        let caps = undefined_extent_caps();
        assert_eq!(
            calculate_extent(&caps, extent(10_000, 10_000)),
            extent(4096, 4096)
        );
        assert_eq!(calculate_extent(&caps, extent(0, 0)), extent(1, 1));
    }

    #[test]
    fn defined_extent_is_used_verbatim() {
        let caps = vk::SurfaceCapabilitiesKHR {
            current_extent: extent(1280, 720),
            ..undefined_extent_caps()
        };
        assert_eq!(calculate_extent(&caps, extent(800, 600)), extent(1280, 720));
    }

    #[test]
    fn image_count_is_min_plus_one_clamped() {
        let mut caps = undefined_extent_caps();
        assert_eq!(select_image_count(&caps), 3);

        caps.max_image_count = 2;
        assert_eq!(select_image_count(&caps), 2);

        // Zero means no upper bound
        caps.max_image_count = 0;
        caps.min_image_count = 9;
        assert_eq!(select_image_count(&caps), 10);
    }

    #[test]
    fn sharing_depends_on_families() {
        assert_eq!(ImageSharing::for_families(0, 0), ImageSharing::Exclusive);
        assert_eq!(
            ImageSharing::for_families(0, 2),
            ImageSharing::Concurrent([0, 2])
        );
        assert_eq!(ImageSharing::Exclusive.family_indices(), &[] as &[u32]);
        assert_eq!(
            ImageSharing::Concurrent([0, 2]).mode(),
            vk::SharingMode::CONCURRENT
        );
    }

    #[test]
    fn negotiate_combines_policies() {
        let plan = SwapchainPlan::negotiate(&support(), extent(800, 600), 0, 1).unwrap();
        assert_eq!(plan.surface_format.format, vk::Format::B8G8R8A8_SRGB);
        assert_eq!(plan.present_mode, vk::PresentModeKHR::FIFO);
        assert_eq!(plan.extent, extent(800, 600));
        assert_eq!(plan.image_count, 3);
        assert_eq!(plan.sharing, ImageSharing::Concurrent([0, 1]));
    }

    #[test]
    fn negotiate_rejects_inadequate_surface() {
        let mut no_modes = support();
        no_modes.present_modes.clear();
        assert!(!no_modes.is_adequate());
        assert!(matches!(
            SwapchainPlan::negotiate(&no_modes, extent(800, 600), 0, 0),
            Err(GpuError::PresentationUnsupported(_))
        ));

        let mut no_formats = support();
        no_formats.formats.clear();
        assert!(matches!(
            SwapchainPlan::negotiate(&no_formats, extent(800, 600), 0, 0),
            Err(GpuError::PresentationUnsupported(_))
        ));
    }
}
