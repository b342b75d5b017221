// Backend module - Vulkan abstraction layer
//
// Thin wrappers around ash. Every wrapper borrows the `VulkanDevice`
// context instead of owning a handle to it, so the destruction order is
// spelled out by whoever owns the pieces (see `renderer::Renderer`).

pub mod commands;
pub mod device;
pub mod pipeline;
pub mod shader;
pub mod surface;
pub mod swapchain;
pub mod sync;

pub use device::VulkanDevice;
pub use swapchain::Swapchain;
