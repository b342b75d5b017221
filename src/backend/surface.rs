// Window surface - the connection between Vulkan and the platform window

use ash::{vk, Entry};
use winit::raw_window_handle_05::{HasRawDisplayHandle, HasRawWindowHandle};
use winit::window::Window;

use crate::error::RenderError;

/// Everything the surface reports about a physical device
#[derive(Debug, Clone, Default)]
pub struct SurfaceSupport {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

pub struct Surface {
    pub loader: ash::extensions::khr::Surface,
    pub handle: vk::SurfaceKHR,
}

impl Surface {
    pub fn new(entry: &Entry, instance: &ash::Instance, window: &Window) -> Result<Self, RenderError> {
        let handle = unsafe {
            ash_window::create_surface(
                entry,
                instance,
                window.raw_display_handle(),
                window.raw_window_handle(),
                None,
            )
        }
        .map_err(RenderError::surface("vkCreateSurfaceKHR"))?;

        Ok(Self {
            loader: ash::extensions::khr::Surface::new(entry, instance),
            handle,
        })
    }

    /// Whether queue family `family` of `physical_device` can present to this surface
    pub fn supports_present(
        &self,
        physical_device: vk::PhysicalDevice,
        family: u32,
    ) -> Result<bool, RenderError> {
        unsafe {
            self.loader
                .get_physical_device_surface_support(physical_device, family, self.handle)
        }
        .map_err(RenderError::surface("vkGetPhysicalDeviceSurfaceSupportKHR"))
    }

    pub fn support(&self, physical_device: vk::PhysicalDevice) -> Result<SurfaceSupport, RenderError> {
        unsafe {
            let capabilities = self
                .loader
                .get_physical_device_surface_capabilities(physical_device, self.handle)
                .map_err(RenderError::surface("vkGetPhysicalDeviceSurfaceCapabilitiesKHR"))?;
            let formats = self
                .loader
                .get_physical_device_surface_formats(physical_device, self.handle)
                .map_err(RenderError::surface("vkGetPhysicalDeviceSurfaceFormatsKHR"))?;
            let present_modes = self
                .loader
                .get_physical_device_surface_present_modes(physical_device, self.handle)
                .map_err(RenderError::surface("vkGetPhysicalDeviceSurfacePresentModesKHR"))?;

            Ok(SurfaceSupport {
                capabilities,
                formats,
                present_modes,
            })
        }
    }

    /// # Safety
    /// No swapchain created from this surface may still be alive.
    pub unsafe fn destroy(&self) {
        self.loader.destroy_surface(self.handle, None);
    }
}
