// Vulkan Device - Core GPU interface
//
// Responsibilities:
// - Instance creation (optionally with validation layers + debug messenger)
// - Window surface creation
// - Physical device selection: first device with graphics + present queues,
//   the required extensions and a usable surface
// - Logical device + queue creation
//
// The resulting `VulkanDevice` is the context every other subsystem borrows.

use ash::extensions::{ext::DebugUtils, khr::Swapchain};
use ash::{vk, Entry};
use std::collections::BTreeSet;
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use winit::raw_window_handle_05::HasRawDisplayHandle;
use winit::window::Window;

use super::surface::Surface;
use crate::config::Config;
use crate::error::RenderError;

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Device-level extensions a GPU must offer to be selected.
///
/// Only the swapchain: the pipeline-library extensions are never used by
/// this renderer and would rule out GPUs that draw the triangle just fine.
pub fn required_device_extensions() -> [&'static CStr; 1] {
    [Swapchain::name()]
}

/// Whether `wanted` appears among the reported instance layers
pub fn has_layer(layers: &[vk::LayerProperties], wanted: &CStr) -> bool {
    layers.iter().any(|layer| {
        let name = unsafe { CStr::from_ptr(layer.layer_name.as_ptr()) };
        name == wanted
    })
}

/// Queue family search result; either role may still be unresolved
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    pub graphics: Option<u32>,
    pub present: Option<u32>,
}

/// Both queue roles resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilies {
    pub graphics: u32,
    pub present: u32,
}

impl QueueFamilyIndices {
    pub fn is_complete(&self) -> bool {
        self.resolve().is_some()
    }

    pub fn resolve(self) -> Option<QueueFamilies> {
        Some(QueueFamilies {
            graphics: self.graphics?,
            present: self.present?,
        })
    }
}

impl QueueFamilies {
    /// Distinct family indices, one queue is created per entry
    pub fn unique(&self) -> Vec<u32> {
        let set: BTreeSet<u32> = [self.graphics, self.present].into_iter().collect();
        set.into_iter().collect()
    }

    pub fn is_shared(&self) -> bool {
        self.graphics == self.present
    }
}

/// Scan queue families in index order, recording the first graphics-capable
/// family and the first family that can present, independently.
pub fn find_queue_families(
    families: &[vk::QueueFamilyProperties],
    mut supports_present: impl FnMut(u32) -> bool,
) -> QueueFamilyIndices {
    let mut indices = QueueFamilyIndices::default();

    for (index, family) in (0u32..).zip(families) {
        if indices.graphics.is_none() && family.queue_flags.contains(vk::QueueFlags::GRAPHICS) {
            indices.graphics = Some(index);
        }
        if indices.present.is_none() && supports_present(index) {
            indices.present = Some(index);
        }
        if indices.is_complete() {
            break;
        }
    }

    indices
}

/// What selection needs to know about one enumerated GPU
#[derive(Debug, Clone)]
pub struct DeviceCandidate<D> {
    pub handle: D,
    pub name: String,
    pub queue_families: QueueFamilyIndices,
    pub extensions: Vec<CString>,
    pub surface_format_count: usize,
    pub present_mode_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    IncompleteQueueFamilies(QueueFamilyIndices),
    MissingExtensions(Vec<String>),
    InadequateSurface,
}

impl<D> DeviceCandidate<D> {
    pub fn check(&self, required: &[&CStr]) -> Result<QueueFamilies, Rejection> {
        let families = self
            .queue_families
            .resolve()
            .ok_or(Rejection::IncompleteQueueFamilies(self.queue_families))?;

        let missing: Vec<String> = required
            .iter()
            .filter(|name| !self.extensions.iter().any(|ext| ext.as_c_str() == **name))
            .map(|name| name.to_string_lossy().into_owned())
            .collect();
        if !missing.is_empty() {
            return Err(Rejection::MissingExtensions(missing));
        }

        if self.surface_format_count == 0 || self.present_mode_count == 0 {
            return Err(Rejection::InadequateSurface);
        }

        Ok(families)
    }
}

/// Returns the first suitable candidate in enumeration order.
pub fn select_device<D>(
    candidates: impl IntoIterator<Item = DeviceCandidate<D>>,
    required: &[&CStr],
) -> Result<(DeviceCandidate<D>, QueueFamilies), RenderError> {
    let mut seen = 0usize;

    for candidate in candidates {
        seen += 1;
        match candidate.check(required) {
            Ok(families) => return Ok((candidate, families)),
            Err(rejection) => {
                log::warn!("Skipping GPU {}: {:?}", candidate.name, rejection);
            }
        }
    }

    let reason = if seen == 0 {
        "no Vulkan-capable GPU found"
    } else {
        "no suitable GPU found"
    };
    Err(RenderError::device_init("pick physical device")(reason))
}

/// Vulkan device context with cleanup on drop
pub struct VulkanDevice {
    pub device: ash::Device,
    pub physical_device: vk::PhysicalDevice,
    pub surface: Surface,
    debug_utils: Option<(DebugUtils, vk::DebugUtilsMessengerEXT)>,
    pub instance: ash::Instance,
    _entry: Entry,

    pub graphics_queue: vk::Queue,
    pub present_queue: vk::Queue,
    pub queue_families: QueueFamilies,
}

impl VulkanDevice {
    pub fn new(config: &Config, window: &Window) -> Result<Self, RenderError> {
        log::info!("Creating Vulkan device: {}", config.window.title);

        let entry = unsafe { Entry::load() }.map_err(RenderError::device_init("load Vulkan library"))?;

        if config.debug.list_extensions {
            log_instance_extensions(&entry);
        }

        let validation = config.validation_enabled();
        if validation && !Self::validation_layer_available(&entry)? {
            return Err(RenderError::device_init("check validation layers")(
                "validation layers requested, but not available",
            ));
        }

        let instance = Self::create_instance(&entry, &config.window.title, window, validation)?;

        let debug_utils = if validation {
            Some(Self::setup_debug_messenger(&entry, &instance)?)
        } else {
            None
        };

        let surface = Surface::new(&entry, &instance, window)?;

        let (physical_device, queue_families) = Self::pick_physical_device(&instance, &surface)?;

        let properties = unsafe { instance.get_physical_device_properties(physical_device) };
        log::info!(
            "Selected GPU: {}",
            unsafe { CStr::from_ptr(properties.device_name.as_ptr()) }.to_string_lossy()
        );
        log::info!(
            "API Version: {}.{}.{}",
            vk::api_version_major(properties.api_version),
            vk::api_version_minor(properties.api_version),
            vk::api_version_patch(properties.api_version)
        );

        let device = Self::create_logical_device(&instance, physical_device, queue_families, validation)?;

        let graphics_queue = unsafe { device.get_device_queue(queue_families.graphics, 0) };
        let present_queue = unsafe { device.get_device_queue(queue_families.present, 0) };

        Ok(Self {
            device,
            physical_device,
            surface,
            debug_utils,
            instance,
            _entry: entry,
            graphics_queue,
            present_queue,
            queue_families,
        })
    }

    fn validation_layer_available(entry: &Entry) -> Result<bool, RenderError> {
        let layers = entry
            .enumerate_instance_layer_properties()
            .map_err(RenderError::device_init("vkEnumerateInstanceLayerProperties"))?;

        Ok(has_layer(&layers, VALIDATION_LAYER))
    }

    fn create_instance(
        entry: &Entry,
        app_name: &str,
        window: &Window,
        validation: bool,
    ) -> Result<ash::Instance, RenderError> {
        let app_name_cstr = CString::new(app_name)
            .map_err(|e| RenderError::device_init("create instance")(e.to_string()))?;
        let engine_name = c"No Engine";

        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name_cstr)
            .application_version(vk::make_api_version(0, 1, 0, 0))
            .engine_name(engine_name)
            .engine_version(vk::make_api_version(0, 1, 0, 0))
            .api_version(vk::API_VERSION_1_0);

        // Platform-specific surface extensions
        let mut extensions: Vec<*const c_char> =
            ash_window::enumerate_required_extensions(window.raw_display_handle())
                .map_err(RenderError::device_init("enumerate required surface extensions"))?
                .to_vec();

        let mut layer_names: Vec<*const c_char> = Vec::new();
        if validation {
            extensions.push(DebugUtils::name().as_ptr());
            layer_names.push(VALIDATION_LAYER.as_ptr());
        }

        // Covers vkCreateInstance / vkDestroyInstance, which the standalone
        // messenger cannot observe.
        let mut debug_info = debug_messenger_info();

        let mut create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layer_names);
        if validation {
            create_info = create_info.push_next(&mut debug_info);
        }

        unsafe { entry.create_instance(&create_info, None) }
            .map_err(RenderError::device_init("vkCreateInstance"))
    }

    fn setup_debug_messenger(
        entry: &Entry,
        instance: &ash::Instance,
    ) -> Result<(DebugUtils, vk::DebugUtilsMessengerEXT), RenderError> {
        let debug_utils = DebugUtils::new(entry, instance);
        let create_info = debug_messenger_info();

        let messenger = unsafe { debug_utils.create_debug_utils_messenger(&create_info, None) }
            .map_err(RenderError::device_init("vkCreateDebugUtilsMessengerEXT"))?;

        Ok((debug_utils, messenger))
    }

    fn pick_physical_device(
        instance: &ash::Instance,
        surface: &Surface,
    ) -> Result<(vk::PhysicalDevice, QueueFamilies), RenderError> {
        let devices = unsafe { instance.enumerate_physical_devices() }
            .map_err(RenderError::device_init("vkEnumeratePhysicalDevices"))?;

        log::debug!("{} physical device(s) enumerated", devices.len());

        let candidates = devices
            .into_iter()
            .map(|physical_device| probe_device(instance, surface, physical_device));

        let (chosen, families) = select_device(candidates, &required_device_extensions())?;
        log::debug!("Queue families: {:?}", families);

        Ok((chosen.handle, families))
    }

    fn create_logical_device(
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
        families: QueueFamilies,
        validation: bool,
    ) -> Result<ash::Device, RenderError> {
        let queue_priorities = [1.0_f32];
        let queue_create_infos: Vec<vk::DeviceQueueCreateInfo> = families
            .unique()
            .into_iter()
            .map(|family| {
                vk::DeviceQueueCreateInfo::builder()
                    .queue_family_index(family)
                    .queue_priorities(&queue_priorities)
                    .build()
            })
            .collect();

        let extensions: Vec<*const c_char> = required_device_extensions()
            .iter()
            .map(|name| name.as_ptr())
            .collect();

        // Device layers are ignored by current loaders but older ones still read them.
        let layer_names: Vec<*const c_char> = if validation {
            vec![VALIDATION_LAYER.as_ptr()]
        } else {
            vec![]
        };

        let features = vk::PhysicalDeviceFeatures::default();

        let create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layer_names)
            .enabled_features(&features);

        unsafe { instance.create_device(physical_device, &create_info, None) }
            .map_err(RenderError::device_init("vkCreateDevice"))
    }

    /// Wait for device to be idle (e.g., before cleanup)
    pub fn wait_idle(&self) -> Result<(), RenderError> {
        unsafe { self.device.device_wait_idle() }.map_err(RenderError::submit("vkDeviceWaitIdle"))
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        log::info!("Destroying Vulkan device...");

        if let Err(e) = self.wait_idle() {
            log::error!("{}", e);
        }

        // Cleanup in reverse order
        unsafe {
            self.device.destroy_device(None);

            if let Some((debug_utils, messenger)) = self.debug_utils.take() {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }

            self.surface.destroy();
            self.instance.destroy_instance(None);
        }
    }
}

fn probe_device(
    instance: &ash::Instance,
    surface: &Surface,
    physical_device: vk::PhysicalDevice,
) -> DeviceCandidate<vk::PhysicalDevice> {
    let properties = unsafe { instance.get_physical_device_properties(physical_device) };
    let name = unsafe { CStr::from_ptr(properties.device_name.as_ptr()) }
        .to_string_lossy()
        .into_owned();

    let families = unsafe { instance.get_physical_device_queue_family_properties(physical_device) };
    let queue_families = find_queue_families(&families, |index| {
        surface
            .supports_present(physical_device, index)
            .unwrap_or_else(|e| {
                log::warn!("{}: {}", name, e);
                false
            })
    });

    let extensions = unsafe { instance.enumerate_device_extension_properties(physical_device) }
        .unwrap_or_else(|e| {
            log::warn!("{}: vkEnumerateDeviceExtensionProperties failed: {}", name, e);
            Vec::new()
        })
        .iter()
        .map(|ext| unsafe { CStr::from_ptr(ext.extension_name.as_ptr()) }.to_owned())
        .collect();

    let support = surface.support(physical_device).unwrap_or_else(|e| {
        log::warn!("{}: {}", name, e);
        Default::default()
    });

    DeviceCandidate {
        handle: physical_device,
        name,
        queue_families,
        extensions,
        surface_format_count: support.formats.len(),
        present_mode_count: support.present_modes.len(),
    }
}

fn log_instance_extensions(entry: &Entry) {
    match entry.enumerate_instance_extension_properties(None) {
        Ok(extensions) => {
            log::info!("Available instance extensions:");
            for ext in &extensions {
                log::info!(
                    "\t{}",
                    unsafe { CStr::from_ptr(ext.extension_name.as_ptr()) }.to_string_lossy()
                );
            }
        }
        Err(e) => log::warn!("vkEnumerateInstanceExtensionProperties failed: {}", e),
    }
}

fn debug_messenger_info() -> vk::DebugUtilsMessengerCreateInfoEXT {
    vk::DebugUtilsMessengerCreateInfoEXT::builder()
        .message_severity(
            vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
                | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
        )
        .message_type(
            vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        )
        .pfn_user_callback(Some(debug_callback))
        .build()
}

// Debug callback for validation layers
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _p_user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    if p_callback_data.is_null() || (*p_callback_data).p_message.is_null() {
        return vk::FALSE;
    }
    let message = CStr::from_ptr((*p_callback_data).p_message);

    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => {
            log::error!("[Vulkan] {}", message.to_string_lossy());
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => {
            log::warn!("[Vulkan] {}", message.to_string_lossy());
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::INFO => {
            log::info!("[Vulkan] {}", message.to_string_lossy());
        }
        _ => {
            log::trace!("[Vulkan] {}", message.to_string_lossy());
        }
    }

    vk::FALSE
}

#[cfg(test)]
mod test {
    use super::*;

    fn family(flags: vk::QueueFlags) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: 1,
            ..Default::default()
        }
    }

    fn candidate(id: u32, graphics: Option<u32>, present: Option<u32>) -> DeviceCandidate<u32> {
        DeviceCandidate {
            handle: id,
            name: format!("gpu{}", id),
            queue_families: QueueFamilyIndices { graphics, present },
            extensions: vec![Swapchain::name().to_owned()],
            surface_format_count: 1,
            present_mode_count: 1,
        }
    }

    mod queue_families {
        use super::*;

        #[test]
        fn single_family_serves_both_roles() {
            let families = [family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::TRANSFER)];
            let indices = find_queue_families(&families, |_| true);

            let resolved = indices.resolve().unwrap();
            assert_eq!(resolved, QueueFamilies { graphics: 0, present: 0 });
            assert!(resolved.is_shared());
            assert_eq!(resolved.unique(), vec![0]);
        }

        #[test]
        fn roles_resolve_independently_to_first_match() {
            let families = [
                family(vk::QueueFlags::TRANSFER),
                family(vk::QueueFlags::GRAPHICS),
                family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE),
                family(vk::QueueFlags::COMPUTE),
            ];
            let indices = find_queue_families(&families, |i| i >= 2);

            assert_eq!(indices.graphics, Some(1));
            assert_eq!(indices.present, Some(2));
            assert_eq!(indices.resolve().unwrap().unique(), vec![1, 2]);
        }

        #[test]
        fn search_stops_once_complete() {
            let families = [
                family(vk::QueueFlags::GRAPHICS),
                family(vk::QueueFlags::GRAPHICS),
                family(vk::QueueFlags::GRAPHICS),
            ];
            let mut queried = Vec::new();
            find_queue_families(&families, |i| {
                queried.push(i);
                true
            });
            assert_eq!(queried, vec![0]);
        }

        #[test]
        fn missing_present_support_is_incomplete() {
            let families = [family(vk::QueueFlags::GRAPHICS)];
            let indices = find_queue_families(&families, |_| false);
            assert_eq!(indices.graphics, Some(0));
            assert!(!indices.is_complete());
            assert!(indices.resolve().is_none());
        }

        #[test]
        fn repeated_search_is_idempotent() {
            let families = [
                family(vk::QueueFlags::COMPUTE),
                family(vk::QueueFlags::GRAPHICS),
                family(vk::QueueFlags::TRANSFER),
            ];
            let present = |i: u32| i == 2;
            let first = find_queue_families(&families, present);
            let second = find_queue_families(&families, present);
            assert_eq!(first, second);
        }
    }

    mod selection {
        use super::*;

        #[test]
        fn first_suitable_device_wins() {
            let candidates = vec![
                candidate(0, Some(0), None),
                candidate(1, Some(0), Some(1)),
                candidate(2, Some(0), Some(0)),
            ];
            let (chosen, families) =
                select_device(candidates, &required_device_extensions()).unwrap();
            assert_eq!(chosen.handle, 1);
            assert_eq!(families, QueueFamilies { graphics: 0, present: 1 });
        }

        #[test]
        fn device_without_swapchain_extension_is_skipped() {
            let mut bare = candidate(0, Some(0), Some(0));
            bare.extensions.clear();
            let candidates = vec![bare.clone(), candidate(1, Some(0), Some(0))];

            assert_eq!(
                bare.check(&required_device_extensions()),
                Err(Rejection::MissingExtensions(vec!["VK_KHR_swapchain".to_string()]))
            );
            let (chosen, _) = select_device(candidates, &required_device_extensions()).unwrap();
            assert_eq!(chosen.handle, 1);
        }

        #[test]
        fn device_without_surface_formats_or_modes_is_skipped() {
            let mut no_formats = candidate(0, Some(0), Some(0));
            no_formats.surface_format_count = 0;
            let mut no_modes = candidate(1, Some(0), Some(0));
            no_modes.present_mode_count = 0;

            assert_eq!(
                no_formats.check(&required_device_extensions()),
                Err(Rejection::InadequateSurface)
            );
            let err = select_device(vec![no_formats, no_modes], &required_device_extensions())
                .unwrap_err();
            assert!(matches!(err, RenderError::DeviceInit { .. }));
            assert!(err.to_string().contains("no suitable GPU"));
        }

        #[test]
        fn empty_enumeration_is_fatal() {
            let err = select_device(Vec::<DeviceCandidate<u32>>::new(), &required_device_extensions())
                .unwrap_err();
            assert_eq!(err.op(), "pick physical device");
            assert!(err.to_string().contains("no Vulkan-capable GPU"));
        }

        #[test]
        fn candidates_after_the_chosen_one_are_not_probed() {
            let mut probed = 0;
            let candidates = (0..5).map(|id| {
                probed += 1;
                candidate(id, Some(0), Some(0))
            });
            select_device(candidates, &required_device_extensions()).unwrap();
            assert_eq!(probed, 1);
        }
    }

    #[test]
    fn swapchain_is_the_only_required_extension() {
        assert_eq!(required_device_extensions(), [c"VK_KHR_swapchain"]);
    }

    mod layers {
        use super::*;

        fn layer(name: &CStr) -> vk::LayerProperties {
            let mut props = vk::LayerProperties::default();
            for (dst, &src) in props.layer_name.iter_mut().zip(name.to_bytes_with_nul()) {
                *dst = src as c_char;
            }
            props
        }

        #[test]
        fn validation_layer_is_found_among_others() {
            let layers = [layer(c"VK_LAYER_MESA_overlay"), layer(VALIDATION_LAYER)];
            assert!(has_layer(&layers, VALIDATION_LAYER));
        }

        #[test]
        fn prefix_of_a_layer_name_does_not_match() {
            let layers = [layer(c"VK_LAYER_KHRONOS_validation_extra")];
            assert!(!has_layer(&layers, VALIDATION_LAYER));
            assert!(!has_layer(&[], VALIDATION_LAYER));
        }
    }
}
