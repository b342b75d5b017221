// Frame slots - per-frame recording and synchronization resources
//
// One slot per frame in flight. A slot is reused only after its fence says
// the GPU is done with the previous submission through it.

use ash::vk;

use super::VulkanDevice;
use crate::error::RenderError;

pub struct FrameSlot {
    pub command_buffer: vk::CommandBuffer,
    /// Signalled by acquire, waited on by submit
    pub image_available: vk::Semaphore,
    /// Signalled by submit, waited on by present
    pub render_finished: vk::Semaphore,
    /// Signalled by submit completion, waited on by the CPU
    pub in_flight_fence: vk::Fence,
}

impl FrameSlot {
    /// Allocate `count` slots; command buffers come from `pool`
    pub fn create_all(
        device: &VulkanDevice,
        pool: vk::CommandPool,
        count: usize,
    ) -> Result<Vec<Self>, RenderError> {
        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(count as u32);

        let command_buffers = unsafe { device.device.allocate_command_buffers(&alloc_info) }
            .map_err(RenderError::device_init("vkAllocateCommandBuffers"))?;

        let mut slots = Vec::with_capacity(count);
        for command_buffer in command_buffers {
            match Self::new(device, command_buffer) {
                Ok(slot) => slots.push(slot),
                Err(e) => {
                    for slot in &slots {
                        slot.destroy(&device.device);
                    }
                    return Err(e);
                }
            }
        }
        Ok(slots)
    }

    fn new(device: &VulkanDevice, command_buffer: vk::CommandBuffer) -> Result<Self, RenderError> {
        let semaphore_info = vk::SemaphoreCreateInfo::builder();
        // Start signaled so the first wait returns immediately
        let fence_info = vk::FenceCreateInfo::builder().flags(vk::FenceCreateFlags::SIGNALED);

        unsafe {
            let image_available = device
                .device
                .create_semaphore(&semaphore_info, None)
                .map_err(RenderError::device_init("vkCreateSemaphore"))?;
            let render_finished = match device.device.create_semaphore(&semaphore_info, None) {
                Ok(semaphore) => semaphore,
                Err(e) => {
                    device.device.destroy_semaphore(image_available, None);
                    return Err(RenderError::device_init("vkCreateSemaphore")(e));
                }
            };
            let in_flight_fence = match device.device.create_fence(&fence_info, None) {
                Ok(fence) => fence,
                Err(e) => {
                    device.device.destroy_semaphore(render_finished, None);
                    device.device.destroy_semaphore(image_available, None);
                    return Err(RenderError::device_init("vkCreateFence")(e));
                }
            };

            Ok(Self {
                command_buffer,
                image_available,
                render_finished,
                in_flight_fence,
            })
        }
    }

    /// Destroys the semaphores and fence; the command buffer goes with its pool.
    pub fn destroy(&self, device: &ash::Device) {
        unsafe {
            device.destroy_semaphore(self.image_available, None);
            device.destroy_semaphore(self.render_finished, None);
            device.destroy_fence(self.in_flight_fence, None);
        }
    }
}
