// Command recording
//
// The whole frame is one render pass with one draw: the vertex shader
// produces the triangle's three vertices on its own.

use ash::vk;

use crate::error::RenderError;

/// Opaque black
pub const CLEAR_COLOR: [f32; 4] = [0.0, 0.0, 0.0, 1.0];

/// Where and with what a frame is drawn
#[derive(Debug, Clone, Copy)]
pub struct DrawTarget {
    pub render_pass: vk::RenderPass,
    pub framebuffer: vk::Framebuffer,
    pub pipeline: vk::Pipeline,
    pub extent: vk::Extent2D,
}

/// Full-extent viewport with the standard 0..1 depth range
pub fn viewport_for(extent: vk::Extent2D) -> vk::Viewport {
    vk::Viewport {
        x: 0.0,
        y: 0.0,
        width: extent.width as f32,
        height: extent.height as f32,
        min_depth: 0.0,
        max_depth: 1.0,
    }
}

pub fn scissor_for(extent: vk::Extent2D) -> vk::Rect2D {
    vk::Rect2D {
        offset: vk::Offset2D { x: 0, y: 0 },
        extent,
    }
}

/// One clear value per render pass attachment: the colour target only
pub fn clear_values() -> [vk::ClearValue; 1] {
    [vk::ClearValue {
        color: vk::ClearColorValue { float32: CLEAR_COLOR },
    }]
}

/// Record the triangle into `cmd`, which must be freshly reset.
pub fn record_triangle(device: &ash::Device, cmd: vk::CommandBuffer, target: &DrawTarget) -> Result<(), RenderError> {
    let begin_info = vk::CommandBufferBeginInfo::builder().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);

    let clear_values = clear_values();

    let render_pass_begin = vk::RenderPassBeginInfo::builder()
        .render_pass(target.render_pass)
        .framebuffer(target.framebuffer)
        .render_area(scissor_for(target.extent))
        .clear_values(&clear_values);

    unsafe {
        device
            .begin_command_buffer(cmd, &begin_info)
            .map_err(RenderError::record("vkBeginCommandBuffer"))?;

        device.cmd_begin_render_pass(cmd, &render_pass_begin, vk::SubpassContents::INLINE);
        device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, target.pipeline);
        device.cmd_set_viewport(cmd, 0, &[viewport_for(target.extent)]);
        device.cmd_set_scissor(cmd, 0, &[scissor_for(target.extent)]);
        device.cmd_draw(cmd, 3, 1, 0, 0);
        device.cmd_end_render_pass(cmd);

        device
            .end_command_buffer(cmd)
            .map_err(RenderError::record("vkEndCommandBuffer"))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn viewport_covers_the_whole_extent() {
        let viewport = viewport_for(vk::Extent2D {
            width: 1280,
            height: 720,
        });
        assert_eq!((viewport.x, viewport.y), (0.0, 0.0));
        assert_eq!((viewport.width, viewport.height), (1280.0, 720.0));
        assert_eq!((viewport.min_depth, viewport.max_depth), (0.0, 1.0));
    }

    #[test]
    fn scissor_matches_extent_at_origin() {
        let extent = vk::Extent2D {
            width: 640,
            height: 480,
        };
        let scissor = scissor_for(extent);
        assert_eq!(scissor.offset, vk::Offset2D { x: 0, y: 0 });
        assert_eq!(scissor.extent, extent);
    }

    #[test]
    fn single_attachment_is_cleared_to_opaque_black() {
        let values = clear_values();
        assert_eq!(values.len(), 1);
        let color = unsafe { values[0].color.float32 };
        assert_eq!(color, [0.0, 0.0, 0.0, 1.0]);
    }
}
