// Renderer - owns every GPU object and drives them through `FrameBackend`
//
// Field order does not decide teardown here: `Drop` destroys the pieces
// explicitly, and `VulkanDevice` is dropped last because it is the last field.
// `new` fills a `Renderer` in place starting from null handles, so a failed
// bootstrap unwinds through the same `Drop`.

use ash::vk;
use winit::window::Window;

use crate::backend::commands::{self, DrawTarget};
use crate::backend::pipeline::{self, GraphicsPipeline};
use crate::backend::shader::ShaderBinaries;
use crate::backend::sync::FrameSlot;
use crate::backend::{Swapchain, VulkanDevice};
use crate::config::Config;
use crate::error::RenderError;
use crate::frame::{AcquireOutcome, ChainRebuild, FrameBackend, PresentOutcome, MAX_FRAMES_IN_FLIGHT};

pub struct Renderer {
    swapchain: Swapchain,
    render_pass: vk::RenderPass,
    pipeline: GraphicsPipeline,
    command_pool: vk::CommandPool,
    frames: Vec<FrameSlot>,
    ctx: VulkanDevice,
}

impl Renderer {
    pub fn new(config: &Config, window: &Window, framebuffer_size: vk::Extent2D) -> Result<Self, RenderError> {
        // Missing shader files fail here, before any chain object exists
        let shaders = ShaderBinaries::load(&config.shaders)?;

        let ctx = VulkanDevice::new(config, window)?;
        let swapchain = Swapchain::new(&ctx, framebuffer_size)?;

        // From here on, dropping `renderer` on error destroys what was built so far.
        let mut renderer = Self {
            swapchain,
            render_pass: vk::RenderPass::null(),
            pipeline: GraphicsPipeline::default(),
            command_pool: vk::CommandPool::null(),
            frames: Vec::new(),
            ctx,
        };

        renderer.render_pass = pipeline::create_render_pass(&renderer.ctx, renderer.swapchain.format)?;
        renderer.pipeline = GraphicsPipeline::new(&renderer.ctx, renderer.render_pass, &shaders)?;
        renderer
            .swapchain
            .create_framebuffers(&renderer.ctx, renderer.render_pass)?;

        renderer.command_pool = create_command_pool(&renderer.ctx)?;
        renderer.frames = FrameSlot::create_all(&renderer.ctx, renderer.command_pool, MAX_FRAMES_IN_FLIGHT)?;

        log::info!(
            "Renderer ready: {} swapchain images, {} frames in flight",
            renderer.swapchain.images.len(),
            renderer.frames.len()
        );

        Ok(renderer)
    }

    pub fn wait_idle(&self) -> Result<(), RenderError> {
        self.ctx.wait_idle()
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.swapchain.extent
    }

    fn slot(&self, slot: usize) -> &FrameSlot {
        &self.frames[slot]
    }
}

/// Command buffers are reset one at a time before each recording.
fn create_command_pool(ctx: &VulkanDevice) -> Result<vk::CommandPool, RenderError> {
    let pool_info = vk::CommandPoolCreateInfo::builder()
        .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
        .queue_family_index(ctx.queue_families.graphics);

    unsafe { ctx.device.create_command_pool(&pool_info, None) }
        .map_err(RenderError::device_init("vkCreateCommandPool"))
}

impl FrameBackend for Renderer {
    fn wait_for_slot(&mut self, slot: usize) -> Result<(), RenderError> {
        let fences = [self.slot(slot).in_flight_fence];
        unsafe { self.ctx.device.wait_for_fences(&fences, true, u64::MAX) }
            .map_err(RenderError::submit("vkWaitForFences"))
    }

    fn acquire_image(&mut self, slot: usize) -> Result<AcquireOutcome, RenderError> {
        self.swapchain.acquire_next_image(self.slot(slot).image_available)
    }

    fn reset_slot(&mut self, slot: usize) -> Result<(), RenderError> {
        let fences = [self.slot(slot).in_flight_fence];
        unsafe { self.ctx.device.reset_fences(&fences) }.map_err(RenderError::submit("vkResetFences"))
    }

    fn record(&mut self, slot: usize, image_index: u32) -> Result<(), RenderError> {
        let framebuffer = *self
            .swapchain
            .framebuffers
            .get(image_index as usize)
            .ok_or_else(|| {
                RenderError::record("select framebuffer")(format!(
                    "image index {} out of range ({} framebuffers)",
                    image_index,
                    self.swapchain.framebuffers.len()
                ))
            })?;

        let cmd = self.slot(slot).command_buffer;
        unsafe {
            self.ctx
                .device
                .reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())
        }
        .map_err(RenderError::record("vkResetCommandBuffer"))?;

        let target = DrawTarget {
            render_pass: self.render_pass,
            framebuffer,
            pipeline: self.pipeline.pipeline,
            extent: self.swapchain.extent,
        };
        commands::record_triangle(&self.ctx.device, cmd, &target)
    }

    fn submit(&mut self, slot: usize) -> Result<(), RenderError> {
        let frame = self.slot(slot);
        let wait_semaphores = [frame.image_available];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let command_buffers = [frame.command_buffer];
        let signal_semaphores = [frame.render_finished];

        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores)
            .build();

        unsafe {
            self.ctx
                .device
                .queue_submit(self.ctx.graphics_queue, &[submit_info], frame.in_flight_fence)
        }
        .map_err(RenderError::submit("vkQueueSubmit"))
    }

    fn present(&mut self, slot: usize, image_index: u32) -> Result<PresentOutcome, RenderError> {
        self.swapchain
            .present(self.ctx.present_queue, image_index, self.slot(slot).render_finished)
    }

    fn recreate_swapchain(&mut self, framebuffer_size: vk::Extent2D) -> Result<ChainRebuild, RenderError> {
        let rebuild = self.swapchain.recreate(&self.ctx, self.render_pass, framebuffer_size)?;
        if rebuild == ChainRebuild::Rebuilt {
            log::info!(
                "Swapchain recreated at {}x{}",
                self.swapchain.extent.width,
                self.swapchain.extent.height
            );
        }
        Ok(rebuild)
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        log::info!("Cleaning up renderer resources...");

        // Nothing below may still be in use by the GPU
        if let Err(e) = self.ctx.wait_idle() {
            log::error!("{}", e);
        }

        // Every step tolerates a handle that was never created.
        let device = &self.ctx.device;
        self.swapchain.destroy(device);
        self.pipeline.destroy(device);
        unsafe {
            if self.render_pass != vk::RenderPass::null() {
                device.destroy_render_pass(self.render_pass, None);
            }
        }
        for frame in self.frames.drain(..) {
            frame.destroy(device);
        }
        unsafe {
            if self.command_pool != vk::CommandPool::null() {
                // Frees the command buffers as well
                device.destroy_command_pool(self.command_pool, None);
            }
        }

        // `ctx` drops next: device, messenger, surface, instance
    }
}
