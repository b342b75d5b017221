// Swapchain - Window presentation
//
// Manages the chain of images we render to and present to the screen,
// their views, and the framebuffers that wrap them. The chain is rebuilt
// wholesale (destroy then create) whenever the surface reports it stale.

use ash::prelude::VkResult;
use ash::vk;

use super::device::{QueueFamilies, VulkanDevice};
use super::pipeline;
use super::surface::SurfaceSupport;
use crate::error::RenderError;
use crate::frame::{AcquireOutcome, ChainRebuild, PresentOutcome};

/// Preferred format: 8-bit BGRA with sRGB encoding
pub const PREFERRED_FORMAT: vk::SurfaceFormatKHR = vk::SurfaceFormatKHR {
    format: vk::Format::B8G8R8A8_SRGB,
    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
};

/// Prefer the preferred format wherever it appears, else the first one offered.
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    formats
        .iter()
        .find(|f| f.format == PREFERRED_FORMAT.format && f.color_space == PREFERRED_FORMAT.color_space)
        .or_else(|| formats.first())
        .copied()
}

// MAILBOX: No vsync, no tearing, triple buffered
// FIFO: Vsync enabled, guaranteed available
pub fn choose_present_mode(modes: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    if modes.contains(&vk::PresentModeKHR::MAILBOX) {
        vk::PresentModeKHR::MAILBOX
    } else {
        vk::PresentModeKHR::FIFO
    }
}

/// Surface extent, or the framebuffer size clamped to the surface limits when
/// the surface leaves it to us (width == u32::MAX).
pub fn choose_extent(caps: &vk::SurfaceCapabilitiesKHR, framebuffer: vk::Extent2D) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        caps.current_extent
    } else {
        vk::Extent2D {
            width: framebuffer
                .width
                .clamp(caps.min_image_extent.width, caps.max_image_extent.width),
            height: framebuffer
                .height
                .clamp(caps.min_image_extent.height, caps.max_image_extent.height),
        }
    }
}

/// One more than the minimum, capped by the maximum (0 means "no maximum").
pub fn choose_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let count = caps.min_image_count + 1;
    if caps.max_image_count > 0 && count > caps.max_image_count {
        caps.max_image_count
    } else {
        count
    }
}

/// How chain images are shared between the graphics and present queues
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageSharing {
    Exclusive,
    /// Both families access the images without ownership transfers
    Concurrent([u32; 2]),
}

impl ImageSharing {
    pub fn for_families(families: QueueFamilies) -> Self {
        if families.is_shared() {
            ImageSharing::Exclusive
        } else {
            ImageSharing::Concurrent([families.graphics, families.present])
        }
    }

    pub fn mode(&self) -> vk::SharingMode {
        match self {
            ImageSharing::Exclusive => vk::SharingMode::EXCLUSIVE,
            ImageSharing::Concurrent(_) => vk::SharingMode::CONCURRENT,
        }
    }

    pub fn queue_family_indices(&self) -> &[u32] {
        match self {
            ImageSharing::Exclusive => &[],
            ImageSharing::Concurrent(indices) => indices,
        }
    }
}

/// Everything needed to create a chain, derived from the surface queries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainParameters {
    pub image_count: u32,
    pub surface_format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub extent: vk::Extent2D,
    pub sharing: ImageSharing,
    pub pre_transform: vk::SurfaceTransformFlagsKHR,
}

impl ChainParameters {
    /// `Ok(None)` while the surface has no area (e.g. minimized); nothing
    /// can be built until it grows again.
    pub fn derive(
        support: &SurfaceSupport,
        framebuffer: vk::Extent2D,
        families: QueueFamilies,
    ) -> Result<Option<Self>, RenderError> {
        let caps = &support.capabilities;

        let surface_format = choose_surface_format(&support.formats)
            .ok_or_else(|| RenderError::chain_build("choose surface format")("no surface formats offered"))?;

        let extent = choose_extent(caps, framebuffer);
        if extent.width == 0 || extent.height == 0 {
            return Ok(None);
        }

        Ok(Some(Self {
            image_count: choose_image_count(caps),
            surface_format,
            present_mode: choose_present_mode(&support.present_modes),
            extent,
            sharing: ImageSharing::for_families(families),
            pre_transform: caps.current_transform,
        }))
    }
}

/// Maps the driver's answer to vkAcquireNextImageKHR onto the three outcomes.
pub fn classify_acquire(result: VkResult<(u32, bool)>) -> Result<AcquireOutcome, RenderError> {
    match result {
        Ok((index, false)) => Ok(AcquireOutcome::Ready(index)),
        Ok((index, true)) => Ok(AcquireOutcome::Suboptimal(index)),
        Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireOutcome::OutOfDate),
        Err(e) => Err(RenderError::present("vkAcquireNextImageKHR")(e)),
    }
}

/// Maps the driver's answer to vkQueuePresentKHR onto the three outcomes.
pub fn classify_present(result: VkResult<bool>) -> Result<PresentOutcome, RenderError> {
    match result {
        Ok(false) => Ok(PresentOutcome::Presented),
        Ok(true) => Ok(PresentOutcome::Suboptimal),
        Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentOutcome::OutOfDate),
        Err(e) => Err(RenderError::present("vkQueuePresentKHR")(e)),
    }
}

pub struct Swapchain {
    pub loader: ash::extensions::khr::Swapchain,
    pub handle: vk::SwapchainKHR,
    pub images: Vec<vk::Image>,
    pub image_views: Vec<vk::ImageView>,
    pub framebuffers: Vec<vk::Framebuffer>,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
}

impl Swapchain {
    /// Build the chain and its image views; framebuffers come later, once a
    /// render pass exists (see `create_framebuffers`).
    pub fn new(ctx: &VulkanDevice, framebuffer_size: vk::Extent2D) -> Result<Self, RenderError> {
        let params = Self::parameters(ctx, framebuffer_size)?.ok_or_else(|| {
            RenderError::chain_build("choose extent")("surface reports a zero extent")
        })?;

        let mut swapchain = Self {
            loader: ash::extensions::khr::Swapchain::new(&ctx.instance, &ctx.device),
            handle: vk::SwapchainKHR::null(),
            images: Vec::new(),
            image_views: Vec::new(),
            framebuffers: Vec::new(),
            format: vk::Format::UNDEFINED,
            extent: vk::Extent2D::default(),
        };
        if let Err(e) = swapchain.build(ctx, &params) {
            swapchain.destroy(&ctx.device);
            return Err(e);
        }
        Ok(swapchain)
    }

    fn parameters(ctx: &VulkanDevice, framebuffer_size: vk::Extent2D) -> Result<Option<ChainParameters>, RenderError> {
        let support = ctx.surface.support(ctx.physical_device)?;
        ChainParameters::derive(&support, framebuffer_size, ctx.queue_families)
    }

    fn build(&mut self, ctx: &VulkanDevice, params: &ChainParameters) -> Result<(), RenderError> {
        log::info!(
            "Creating swapchain: {}x{}, {} images, {:?}/{:?}, {:?}, {:?}",
            params.extent.width,
            params.extent.height,
            params.image_count,
            params.surface_format.format,
            params.surface_format.color_space,
            params.present_mode,
            params.sharing.mode()
        );

        let create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(ctx.surface.handle)
            .min_image_count(params.image_count)
            .image_format(params.surface_format.format)
            .image_color_space(params.surface_format.color_space)
            .image_extent(params.extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(params.sharing.mode())
            .queue_family_indices(params.sharing.queue_family_indices())
            .pre_transform(params.pre_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(params.present_mode)
            .clipped(true)
            .old_swapchain(vk::SwapchainKHR::null());

        let handle = unsafe { self.loader.create_swapchain(&create_info, None) }
            .map_err(RenderError::chain_build("vkCreateSwapchainKHR"))?;
        self.handle = handle;
        self.format = params.surface_format.format;
        self.extent = params.extent;

        self.images = unsafe { self.loader.get_swapchain_images(handle) }
            .map_err(RenderError::chain_build("vkGetSwapchainImagesKHR"))?;

        log::debug!("Swapchain has {} images", self.images.len());

        for &image in &self.images {
            let create_info = vk::ImageViewCreateInfo::builder()
                .image(image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(self.format)
                .components(vk::ComponentMapping {
                    r: vk::ComponentSwizzle::IDENTITY,
                    g: vk::ComponentSwizzle::IDENTITY,
                    b: vk::ComponentSwizzle::IDENTITY,
                    a: vk::ComponentSwizzle::IDENTITY,
                })
                .subresource_range(vk::ImageSubresourceRange {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    base_mip_level: 0,
                    level_count: 1,
                    base_array_layer: 0,
                    layer_count: 1,
                });

            let view = unsafe { ctx.device.create_image_view(&create_info, None) }
                .map_err(RenderError::chain_build("vkCreateImageView"))?;
            self.image_views.push(view);
        }

        Ok(())
    }

    /// One framebuffer per image view, all sharing `render_pass`
    pub fn create_framebuffers(
        &mut self,
        ctx: &VulkanDevice,
        render_pass: vk::RenderPass,
    ) -> Result<(), RenderError> {
        for &view in &self.image_views {
            let framebuffer = pipeline::create_framebuffer(ctx, render_pass, view, self.extent)?;
            self.framebuffers.push(framebuffer);
        }
        Ok(())
    }

    /// Destroys framebuffers, then image views, then the chain itself.
    /// Safe to call repeatedly; handles are cleared as they go.
    pub fn destroy(&mut self, device: &ash::Device) {
        unsafe {
            for framebuffer in self.framebuffers.drain(..) {
                device.destroy_framebuffer(framebuffer, None);
            }
            for view in self.image_views.drain(..) {
                device.destroy_image_view(view, None);
            }
            if self.handle != vk::SwapchainKHR::null() {
                self.loader.destroy_swapchain(self.handle, None);
                self.handle = vk::SwapchainKHR::null();
            }
        }
        // Images belong to the chain and die with it.
        self.images.clear();
    }

    /// Rebuild the chain for a new framebuffer size. The render pass is reused,
    /// the surface format is assumed stable across resizes.
    ///
    /// If the surface currently has no area the old chain is left untouched
    /// and `SurfaceNotReady` is returned.
    pub fn recreate(
        &mut self,
        ctx: &VulkanDevice,
        render_pass: vk::RenderPass,
        framebuffer_size: vk::Extent2D,
    ) -> Result<ChainRebuild, RenderError> {
        // No in-flight work may reference what is about to be destroyed.
        ctx.wait_idle()?;

        let Some(params) = Self::parameters(ctx, framebuffer_size)? else {
            log::debug!("Surface reports a zero extent, keeping the old chain");
            return Ok(ChainRebuild::SurfaceNotReady);
        };

        let old_format = self.format;
        self.destroy(&ctx.device);
        self.build(ctx, &params)?;
        if self.format != old_format {
            log::warn!(
                "Surface format changed from {:?} to {:?}; keeping the existing render pass",
                old_format,
                self.format
            );
        }
        self.create_framebuffers(ctx, render_pass)?;
        Ok(ChainRebuild::Rebuilt)
    }

    /// Acquire next image, signalling `semaphore` once the image is usable
    pub fn acquire_next_image(&self, semaphore: vk::Semaphore) -> Result<AcquireOutcome, RenderError> {
        let result = unsafe {
            self.loader
                .acquire_next_image(self.handle, u64::MAX, semaphore, vk::Fence::null())
        };
        classify_acquire(result)
    }

    /// Queue `image_index` for presentation once `wait_semaphore` is signalled
    pub fn present(
        &self,
        queue: vk::Queue,
        image_index: u32,
        wait_semaphore: vk::Semaphore,
    ) -> Result<PresentOutcome, RenderError> {
        let wait_semaphores = [wait_semaphore];
        let swapchains = [self.handle];
        let image_indices = [image_index];

        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        classify_present(unsafe { self.loader.queue_present(queue, &present_info) })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use proptest::prelude::*;

    fn caps(min_count: u32, max_count: u32, current: (u32, u32)) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: min_count,
            max_image_count: max_count,
            current_extent: vk::Extent2D {
                width: current.0,
                height: current.1,
            },
            min_image_extent: vk::Extent2D {
                width: 1,
                height: 1,
            },
            max_image_extent: vk::Extent2D {
                width: 4096,
                height: 4096,
            },
            ..Default::default()
        }
    }

    fn format(format: vk::Format, color_space: vk::ColorSpaceKHR) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR { format, color_space }
    }

    fn extent(width: u32, height: u32) -> vk::Extent2D {
        vk::Extent2D { width, height }
    }

    mod format_selection {
        use super::*;

        #[test]
        fn preferred_pair_wins_regardless_of_position() {
            let formats = [
                format(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
                format(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::EXTENDED_SRGB_LINEAR_EXT),
                format(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            ];
            assert_eq!(choose_surface_format(&formats), Some(PREFERRED_FORMAT));
        }

        #[test]
        fn first_entry_when_preferred_is_absent() {
            let formats = [
                format(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
                format(vk::Format::B8G8R8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            ];
            assert_eq!(choose_surface_format(&formats), Some(formats[0]));
        }

        #[test]
        fn no_formats_no_choice() {
            assert_eq!(choose_surface_format(&[]), None);
        }
    }

    mod present_mode_selection {
        use super::*;

        #[test]
        fn mailbox_is_preferred() {
            let modes = [
                vk::PresentModeKHR::FIFO,
                vk::PresentModeKHR::IMMEDIATE,
                vk::PresentModeKHR::MAILBOX,
            ];
            assert_eq!(choose_present_mode(&modes), vk::PresentModeKHR::MAILBOX);
        }

        #[test]
        fn fifo_is_the_fallback() {
            let modes = [vk::PresentModeKHR::IMMEDIATE, vk::PresentModeKHR::FIFO_RELAXED];
            assert_eq!(choose_present_mode(&modes), vk::PresentModeKHR::FIFO);
        }
    }

    mod sharing {
        use super::*;

        #[test]
        fn same_family_is_exclusive() {
            let sharing = ImageSharing::for_families(QueueFamilies { graphics: 0, present: 0 });
            assert_eq!(sharing, ImageSharing::Exclusive);
            assert_eq!(sharing.mode(), vk::SharingMode::EXCLUSIVE);
            assert!(sharing.queue_family_indices().is_empty());
        }

        #[test]
        fn distinct_families_are_concurrent() {
            let sharing = ImageSharing::for_families(QueueFamilies { graphics: 0, present: 2 });
            assert_eq!(sharing.mode(), vk::SharingMode::CONCURRENT);
            assert_eq!(sharing.queue_family_indices(), &[0, 2]);
        }
    }

    mod parameters {
        use super::*;

        fn support(current: (u32, u32)) -> SurfaceSupport {
            SurfaceSupport {
                capabilities: caps(2, 3, current),
                formats: vec![PREFERRED_FORMAT],
                present_modes: vec![vk::PresentModeKHR::FIFO],
            }
        }

        #[test]
        fn single_family_environment_builds_exclusive_chain() {
            let params = ChainParameters::derive(
                &support((800, 600)),
                extent(800, 600),
                QueueFamilies { graphics: 0, present: 0 },
            )
            .unwrap()
            .unwrap();

            assert_eq!(params.image_count, 3);
            assert_eq!(params.surface_format, PREFERRED_FORMAT);
            assert_eq!(params.present_mode, vk::PresentModeKHR::FIFO);
            assert_eq!(params.extent, extent(800, 600));
            assert_eq!(params.sharing, ImageSharing::Exclusive);
        }

        #[test]
        fn zero_sized_extent_is_not_ready_rather_than_an_error() {
            let params = ChainParameters::derive(
                &support((0, 0)),
                extent(0, 0),
                QueueFamilies { graphics: 0, present: 0 },
            )
            .unwrap();
            assert_eq!(params, None);
        }

        #[test]
        fn surface_extent_of_zero_wins_over_a_visible_framebuffer() {
            // Minimized again between the window check and the surface query
            let params = ChainParameters::derive(
                &support((0, 0)),
                extent(800, 600),
                QueueFamilies { graphics: 0, present: 0 },
            )
            .unwrap();
            assert_eq!(params, None);
        }

        #[test]
        fn empty_format_list_is_a_chain_build_error() {
            let mut support = support((800, 600));
            support.formats.clear();
            let err = ChainParameters::derive(
                &support,
                extent(800, 600),
                QueueFamilies { graphics: 0, present: 0 },
            )
            .unwrap_err();
            assert!(matches!(err, RenderError::ChainBuild { .. }));
        }
    }

    mod driver_outcomes {
        use super::*;

        #[test]
        fn acquire_results_map_to_outcomes() {
            assert_eq!(classify_acquire(Ok((2, false))).unwrap(), AcquireOutcome::Ready(2));
            assert_eq!(classify_acquire(Ok((1, true))).unwrap(), AcquireOutcome::Suboptimal(1));
            assert_eq!(
                classify_acquire(Err(vk::Result::ERROR_OUT_OF_DATE_KHR)).unwrap(),
                AcquireOutcome::OutOfDate
            );
            let err = classify_acquire(Err(vk::Result::ERROR_DEVICE_LOST)).unwrap_err();
            assert_eq!(err.op(), "vkAcquireNextImageKHR");
        }

        #[test]
        fn present_results_map_to_outcomes() {
            assert_eq!(classify_present(Ok(false)).unwrap(), PresentOutcome::Presented);
            assert_eq!(classify_present(Ok(true)).unwrap(), PresentOutcome::Suboptimal);
            assert_eq!(
                classify_present(Err(vk::Result::ERROR_OUT_OF_DATE_KHR)).unwrap(),
                PresentOutcome::OutOfDate
            );
            let err = classify_present(Err(vk::Result::ERROR_SURFACE_LOST_KHR)).unwrap_err();
            assert!(matches!(err, RenderError::Present { op: "vkQueuePresentKHR", .. }));
        }
    }

    #[test]
    fn defined_current_extent_is_used_verbatim() {
        let caps = caps(2, 0, (1920, 1080));
        assert_eq!(choose_extent(&caps, extent(640, 480)), extent(1920, 1080));
    }

    proptest! {
        #[test]
        fn image_count_stays_within_surface_limits(
            min_count in 1u32..16,
            extra in 0u32..16,
            unbounded in any::<bool>(),
        ) {
            let max_count = if unbounded { 0 } else { min_count + extra };
            let count = choose_image_count(&caps(min_count, max_count, (800, 600)));

            if max_count > 0 {
                prop_assert!(min_count <= count && count <= max_count);
            } else {
                prop_assert!(count >= min_count + 1);
            }
        }

        #[test]
        fn undefined_extent_clamps_framebuffer_size(
            width in 0u32..10_000,
            height in 0u32..10_000,
        ) {
            let caps = caps(2, 3, (u32::MAX, u32::MAX));
            let resolved = choose_extent(&caps, extent(width, height));

            prop_assert_eq!(resolved.width, width.clamp(1, 4096));
            prop_assert_eq!(resolved.height, height.clamp(1, 4096));
        }

        #[test]
        fn defined_extent_ignores_framebuffer_size(
            current_width in 1u32..8192,
            current_height in 1u32..8192,
            width in 0u32..10_000,
            height in 0u32..10_000,
        ) {
            let caps = caps(2, 3, (current_width, current_height));
            prop_assert_eq!(
                choose_extent(&caps, extent(width, height)),
                extent(current_width, current_height)
            );
        }
    }
}
