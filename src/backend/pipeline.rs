// Graphics pipeline creation and management
//
// One render pass with a single colour attachment, and one fixed-function
// pipeline drawing a triangle whose vertices live in the vertex shader.
// Viewport and scissor are dynamic so a resize never needs a new pipeline.

use ash::vk;

use super::shader::{create_shader_module, ShaderBinaries};
use super::VulkanDevice;
use crate::error::RenderError;

/// The swapchain image: cleared on load, kept for presentation
pub fn color_attachment(format: vk::Format) -> vk::AttachmentDescription {
    vk::AttachmentDescription::builder()
        .format(format)
        .samples(vk::SampleCountFlags::TYPE_1)
        .load_op(vk::AttachmentLoadOp::CLEAR)
        .store_op(vk::AttachmentStoreOp::STORE)
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .final_layout(vk::ImageLayout::PRESENT_SRC_KHR)
        .build()
}

/// Colour writes in the subpass wait for the presentation engine to be done
/// reading the image, i.e. for the acquire semaphore wait at the same stage.
pub fn external_dependency() -> vk::SubpassDependency {
    vk::SubpassDependency::builder()
        .src_subpass(vk::SUBPASS_EXTERNAL)
        .dst_subpass(0)
        .src_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
        .src_access_mask(vk::AccessFlags::empty())
        .dst_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
        .dst_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE)
        .build()
}

/// Create a render pass for basic color attachment rendering
pub fn create_render_pass(device: &VulkanDevice, format: vk::Format) -> Result<vk::RenderPass, RenderError> {
    let color_attachment_ref = vk::AttachmentReference::builder()
        .attachment(0)
        .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
        .build();
    let color_attachments = &[color_attachment_ref];

    let subpass = vk::SubpassDescription::builder()
        .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
        .color_attachments(color_attachments)
        .build();

    let attachments = &[color_attachment(format)];
    let subpasses = &[subpass];
    let dependencies = &[external_dependency()];

    let render_pass_info = vk::RenderPassCreateInfo::builder()
        .attachments(attachments)
        .subpasses(subpasses)
        .dependencies(dependencies);

    unsafe { device.device.create_render_pass(&render_pass_info, None) }
        .map_err(RenderError::pipeline_build("vkCreateRenderPass"))
}

/// Create the framebuffer wrapping one swapchain image view
pub fn create_framebuffer(
    device: &VulkanDevice,
    render_pass: vk::RenderPass,
    image_view: vk::ImageView,
    extent: vk::Extent2D,
) -> Result<vk::Framebuffer, RenderError> {
    let attachments = &[image_view];
    let framebuffer_info = vk::FramebufferCreateInfo::builder()
        .render_pass(render_pass)
        .attachments(attachments)
        .width(extent.width)
        .height(extent.height)
        .layers(1);

    unsafe { device.device.create_framebuffer(&framebuffer_info, None) }
        .map_err(RenderError::chain_build("vkCreateFramebuffer"))
}

pub fn rasterization_state() -> vk::PipelineRasterizationStateCreateInfo {
    vk::PipelineRasterizationStateCreateInfo::builder()
        .depth_clamp_enable(false)
        .rasterizer_discard_enable(false)
        .polygon_mode(vk::PolygonMode::FILL)
        .line_width(1.0)
        .cull_mode(vk::CullModeFlags::BACK)
        .front_face(vk::FrontFace::CLOCKWISE)
        .depth_bias_enable(false)
        .build()
}

pub const DYNAMIC_STATES: [vk::DynamicState; 2] = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];

/// Null handles until `new` succeeds; `destroy` skips whatever is still null.
#[derive(Default)]
pub struct GraphicsPipeline {
    pub layout: vk::PipelineLayout,
    pub pipeline: vk::Pipeline,
}

impl GraphicsPipeline {
    /// Build the pipeline against `render_pass` from already loaded shader stages
    pub fn new(
        device: &VulkanDevice,
        render_pass: vk::RenderPass,
        shaders: &ShaderBinaries,
    ) -> Result<Self, RenderError> {
        let vert_shader = create_shader_module(device, &shaders.vertex)?;
        let frag_shader = match create_shader_module(device, &shaders.fragment) {
            Ok(module) => module,
            Err(e) => {
                unsafe { device.device.destroy_shader_module(vert_shader, None) };
                return Err(e);
            }
        };

        let result = Self::create(device, render_pass, vert_shader, frag_shader);

        // Modules are only needed while the pipeline is being compiled
        unsafe {
            device.device.destroy_shader_module(frag_shader, None);
            device.device.destroy_shader_module(vert_shader, None);
        }

        let pipeline = result?;
        log::info!("Graphics pipeline created");
        Ok(pipeline)
    }

    fn create(
        device: &VulkanDevice,
        render_pass: vk::RenderPass,
        vert_shader: vk::ShaderModule,
        frag_shader: vk::ShaderModule,
    ) -> Result<Self, RenderError> {
        let entry_point = c"main";

        let vert_stage = vk::PipelineShaderStageCreateInfo::builder()
            .stage(vk::ShaderStageFlags::VERTEX)
            .module(vert_shader)
            .name(entry_point)
            .build();

        let frag_stage = vk::PipelineShaderStageCreateInfo::builder()
            .stage(vk::ShaderStageFlags::FRAGMENT)
            .module(frag_shader)
            .name(entry_point)
            .build();

        let shader_stages = &[vert_stage, frag_stage];

        // Vertices are generated in the shader
        let vertex_input_info = vk::PipelineVertexInputStateCreateInfo::builder();

        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::builder()
            .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
            .primitive_restart_enable(false);

        // Counts only; the actual rectangles are set while recording
        let viewport_state = vk::PipelineViewportStateCreateInfo {
            viewport_count: 1,
            scissor_count: 1,
            ..Default::default()
        };

        let dynamic_state = vk::PipelineDynamicStateCreateInfo::builder().dynamic_states(&DYNAMIC_STATES);

        let rasterizer = rasterization_state();

        let multisampling = vk::PipelineMultisampleStateCreateInfo::builder()
            .sample_shading_enable(false)
            .rasterization_samples(vk::SampleCountFlags::TYPE_1);

        // Color blending (no blending, opaque)
        let color_blend_attachment = vk::PipelineColorBlendAttachmentState::builder()
            .color_write_mask(vk::ColorComponentFlags::RGBA)
            .blend_enable(false)
            .build();

        let color_blend_attachments = &[color_blend_attachment];
        let color_blending = vk::PipelineColorBlendStateCreateInfo::builder()
            .logic_op_enable(false)
            .attachments(color_blend_attachments);

        // No descriptors, no push constants
        let layout_info = vk::PipelineLayoutCreateInfo::builder();

        let layout = unsafe { device.device.create_pipeline_layout(&layout_info, None) }
            .map_err(RenderError::pipeline_build("vkCreatePipelineLayout"))?;

        let pipeline_info = vk::GraphicsPipelineCreateInfo::builder()
            .stages(shader_stages)
            .vertex_input_state(&vertex_input_info)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterizer)
            .multisample_state(&multisampling)
            .color_blend_state(&color_blending)
            .dynamic_state(&dynamic_state)
            .layout(layout)
            .render_pass(render_pass)
            .subpass(0)
            .build();

        let pipelines = unsafe {
            device
                .device
                .create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
        };

        match pipelines {
            Ok(pipelines) => Ok(Self {
                layout,
                pipeline: pipelines[0],
            }),
            Err((_, e)) => {
                unsafe { device.device.destroy_pipeline_layout(layout, None) };
                Err(RenderError::pipeline_build("vkCreateGraphicsPipelines")(e))
            }
        }
    }

    pub fn destroy(&mut self, device: &ash::Device) {
        unsafe {
            if self.pipeline != vk::Pipeline::null() {
                device.destroy_pipeline(self.pipeline, None);
                self.pipeline = vk::Pipeline::null();
            }
            if self.layout != vk::PipelineLayout::null() {
                device.destroy_pipeline_layout(self.layout, None);
                self.layout = vk::PipelineLayout::null();
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn color_attachment_clears_and_ends_presentable() {
        let attachment = color_attachment(vk::Format::B8G8R8A8_SRGB);
        assert_eq!(attachment.format, vk::Format::B8G8R8A8_SRGB);
        assert_eq!(attachment.load_op, vk::AttachmentLoadOp::CLEAR);
        assert_eq!(attachment.store_op, vk::AttachmentStoreOp::STORE);
        assert_eq!(attachment.initial_layout, vk::ImageLayout::UNDEFINED);
        assert_eq!(attachment.final_layout, vk::ImageLayout::PRESENT_SRC_KHR);
        assert_eq!(attachment.samples, vk::SampleCountFlags::TYPE_1);
    }

    #[test]
    fn external_dependency_orders_color_writes() {
        let dependency = external_dependency();
        assert_eq!(dependency.src_subpass, vk::SUBPASS_EXTERNAL);
        assert_eq!(dependency.dst_subpass, 0);
        assert_eq!(dependency.src_stage_mask, vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT);
        assert_eq!(dependency.dst_stage_mask, vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT);
        assert_eq!(dependency.dst_access_mask, vk::AccessFlags::COLOR_ATTACHMENT_WRITE);
    }

    #[test]
    fn rasterizer_fills_and_culls_back_faces() {
        let rasterizer = rasterization_state();
        assert_eq!(rasterizer.polygon_mode, vk::PolygonMode::FILL);
        assert_eq!(rasterizer.cull_mode, vk::CullModeFlags::BACK);
        assert_eq!(rasterizer.front_face, vk::FrontFace::CLOCKWISE);
        assert_eq!(rasterizer.rasterizer_discard_enable, vk::FALSE);
    }

    #[test]
    fn unbuilt_pipeline_holds_only_null_handles() {
        let pipeline = GraphicsPipeline::default();
        assert_eq!(pipeline.pipeline, vk::Pipeline::null());
        assert_eq!(pipeline.layout, vk::PipelineLayout::null());
    }

    #[test]
    fn viewport_and_scissor_are_dynamic() {
        assert!(DYNAMIC_STATES.contains(&vk::DynamicState::VIEWPORT));
        assert!(DYNAMIC_STATES.contains(&vk::DynamicState::SCISSOR));
    }
}
