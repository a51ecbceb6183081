// Vulkan device - core GPU interface
//
// Responsibilities:
// - Instance creation with validation layers
// - Surface creation from raw window handles
// - Physical device selection (first adapter passing all checks)
// - Logical device + queue creation
// - Memory allocator setup

use std::ffi::{CStr, CString};
use std::mem::ManuallyDrop;
use std::sync::Arc;

use ash::{vk, Entry};
use gpu_allocator::vulkan::{Allocator, AllocatorCreateDesc};
use parking_lot::{Mutex, MutexGuard};
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};

use super::error::{RenderResult, RendererError};

/// Required Vulkan device features for our renderer
const REQUIRED_DEVICE_FEATURES: vk::PhysicalDeviceFeatures = vk::PhysicalDeviceFeatures {
    geometry_shader: vk::TRUE,

    ..unsafe { std::mem::zeroed() }
};

/// Suitability checks for one physical device, extracted so selection
/// stays a pure scan over enumeration order.
#[derive(Debug, Clone, Copy, Default)]
pub struct AdapterProfile {
    pub has_device_extensions: bool,
    pub has_surface_format: bool,
    pub has_present_mode: bool,
    pub has_geometry_support: bool,
}

impl AdapterProfile {
    pub fn is_suitable(&self) -> bool {
        self.has_device_extensions
            && self.has_surface_format
            && self.has_present_mode
            && self.has_geometry_support
    }
}

/// First adapter satisfying every check, in enumeration order. No scoring.
pub fn first_suitable(profiles: &[AdapterProfile]) -> Option<usize> {
    profiles.iter().position(|p| p.is_suitable())
}

/// Resolved queue family indices. `shared` records whether one family
/// serves both roles, which drives the swapchain sharing mode.
#[derive(Debug, Clone, Copy)]
pub struct QueueFamilies {
    pub graphics: u32,
    pub present: u32,
    pub shared: bool,
}

/// Scan families in index order: first with graphics capability and,
/// independently, first able to present to the surface.
pub fn pick_queue_families(capabilities: &[(bool, bool)]) -> Option<QueueFamilies> {
    let graphics = capabilities.iter().position(|&(g, _)| g)?;
    let present = capabilities.iter().position(|&(_, p)| p)?;
    Some(QueueFamilies {
        graphics: graphics as u32,
        present: present as u32,
        shared: graphics == present,
    })
}

/// Vulkan device wrapper with automatic cleanup
pub struct VulkanDevice {
    // Dropped by hand before the logical device goes away
    allocator: ManuallyDrop<Mutex<Allocator>>,
    pub device: ash::Device,
    pub physical_device: vk::PhysicalDevice,
    pub queue_families: QueueFamilies,
    pub graphics_queue: vk::Queue,
    pub present_queue: vk::Queue,
    pub surface: vk::SurfaceKHR,
    pub surface_loader: ash::extensions::khr::Surface,

    // Debug utils (if validation enabled)
    debug_utils: Option<(ash::extensions::ext::DebugUtils, vk::DebugUtilsMessengerEXT)>,

    pub instance: ash::Instance,
    _entry: Entry,
}

impl VulkanDevice {
    /// Create the instance, surface, and logical device in one pass.
    ///
    /// Queue family indices are resolved before logical device creation and
    /// never change afterwards.
    pub fn new(
        display_handle: RawDisplayHandle,
        window_handle: RawWindowHandle,
        app_name: &str,
        enable_validation: bool,
    ) -> RenderResult<Arc<Self>> {
        log::info!("Creating Vulkan device: {}", app_name);

        let entry = unsafe { Entry::load() }?;

        let instance =
            Self::create_instance(&entry, app_name, display_handle, enable_validation)?;

        let debug_utils = if enable_validation {
            Some(Self::setup_debug_messenger(&entry, &instance)?)
        } else {
            None
        };

        let surface_loader = ash::extensions::khr::Surface::new(&entry, &instance);
        let surface = Self::create_surface(&entry, &instance, display_handle, window_handle)?;

        let physical_device =
            Self::select_device(&instance, &surface_loader, surface)?;
        let queue_families =
            Self::resolve_queue_families(&instance, &surface_loader, surface, physical_device)?;

        let device = Self::create_logical_device(&instance, physical_device, queue_families)?;
        let graphics_queue = unsafe { device.get_device_queue(queue_families.graphics, 0) };
        let present_queue = unsafe { device.get_device_queue(queue_families.present, 0) };

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

        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.clone(),
            device: device.clone(),
            physical_device,
            debug_settings: Default::default(),
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        })?;

        Ok(Arc::new(Self {
            allocator: ManuallyDrop::new(Mutex::new(allocator)),
            device,
            physical_device,
            queue_families,
            graphics_queue,
            present_queue,
            surface,
            surface_loader,
            debug_utils,
            instance,
            _entry: entry,
        }))
    }

    pub fn allocator(&self) -> MutexGuard<'_, Allocator> {
        self.allocator.lock()
    }

    fn create_instance(
        entry: &Entry,
        app_name: &str,
        display_handle: RawDisplayHandle,
        enable_validation: bool,
    ) -> RenderResult<ash::Instance> {
        let app_name_cstr = CString::new(app_name).unwrap_or_default();
        let engine_name = c"camview";

        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name_cstr)
            .application_version(vk::make_api_version(0, 0, 1, 0))
            .engine_name(engine_name)
            .engine_version(vk::make_api_version(0, 0, 1, 0))
            .api_version(vk::API_VERSION_1_1);

        let mut extensions = vec![
            ash::extensions::khr::Surface::name().as_ptr(),
            Self::platform_surface_extension(display_handle)?.as_ptr(),
        ];
        if enable_validation {
            extensions.push(ash::extensions::ext::DebugUtils::name().as_ptr());
        }

        // Request the validation layer only when the loader advertises it
        let layer_names = if enable_validation && Self::validation_layer_available(entry) {
            vec![c"VK_LAYER_KHRONOS_validation".as_ptr()]
        } else {
            if enable_validation {
                log::warn!("Validation requested but VK_LAYER_KHRONOS_validation is not installed");
            }
            vec![]
        };

        let create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layer_names);

        let instance = unsafe { entry.create_instance(&create_info, None) }?;

        Ok(instance)
    }

    fn platform_surface_extension(
        display_handle: RawDisplayHandle,
    ) -> RenderResult<&'static CStr> {
        match display_handle {
            RawDisplayHandle::Xlib(_) => Ok(ash::extensions::khr::XlibSurface::name()),
            RawDisplayHandle::Wayland(_) => Ok(ash::extensions::khr::WaylandSurface::name()),
            RawDisplayHandle::Windows(_) => Ok(ash::extensions::khr::Win32Surface::name()),
            _ => Err(RendererError::UnsupportedWindowHandle),
        }
    }

    fn validation_layer_available(entry: &Entry) -> bool {
        let layers = match entry.enumerate_instance_layer_properties() {
            Ok(layers) => layers,
            Err(_) => return false,
        };
        layers.iter().any(|layer| {
            (unsafe { CStr::from_ptr(layer.layer_name.as_ptr()) })
                == c"VK_LAYER_KHRONOS_validation"
        })
    }

    fn setup_debug_messenger(
        entry: &Entry,
        instance: &ash::Instance,
    ) -> RenderResult<(ash::extensions::ext::DebugUtils, vk::DebugUtilsMessengerEXT)> {
        let debug_utils = ash::extensions::ext::DebugUtils::new(entry, instance);

        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_callback));

        let messenger =
            unsafe { debug_utils.create_debug_utils_messenger(&create_info, None) }?;

        Ok((debug_utils, messenger))
    }

    fn create_surface(
        entry: &Entry,
        instance: &ash::Instance,
        display_handle: RawDisplayHandle,
        window_handle: RawWindowHandle,
    ) -> RenderResult<vk::SurfaceKHR> {
        match (display_handle, window_handle) {
            (RawDisplayHandle::Xlib(display), RawWindowHandle::Xlib(window)) => {
                let dpy = display
                    .display
                    .map(|d| d.as_ptr())
                    .unwrap_or(std::ptr::null_mut());
                let create_info = vk::XlibSurfaceCreateInfoKHR::builder()
                    .dpy(dpy as *mut _)
                    .window(window.window as vk::Window);
                let loader = ash::extensions::khr::XlibSurface::new(entry, instance);
                Ok(unsafe { loader.create_xlib_surface(&create_info, None) }?)
            }
            (RawDisplayHandle::Wayland(display), RawWindowHandle::Wayland(window)) => {
                let create_info = vk::WaylandSurfaceCreateInfoKHR::builder()
                    .display(display.display.as_ptr())
                    .surface(window.surface.as_ptr());
                let loader = ash::extensions::khr::WaylandSurface::new(entry, instance);
                Ok(unsafe { loader.create_wayland_surface(&create_info, None) }?)
            }
            (RawDisplayHandle::Windows(_), RawWindowHandle::Win32(window)) => {
                let hinstance = window
                    .hinstance
                    .map(|h| h.get())
                    .unwrap_or(0) as *const std::ffi::c_void;
                let hwnd = window.hwnd.get() as *const std::ffi::c_void;
                let create_info = vk::Win32SurfaceCreateInfoKHR::builder()
                    .hinstance(hinstance)
                    .hwnd(hwnd);
                let loader = ash::extensions::khr::Win32Surface::new(entry, instance);
                Ok(unsafe { loader.create_win32_surface(&create_info, None) }?)
            }
            _ => Err(RendererError::UnsupportedWindowHandle),
        }
    }

    /// First-match device selection over the suitability checks. Enumeration
    /// order is the selection order.
    fn select_device(
        instance: &ash::Instance,
        surface_loader: &ash::extensions::khr::Surface,
        surface: vk::SurfaceKHR,
    ) -> RenderResult<vk::PhysicalDevice> {
        let devices = unsafe { instance.enumerate_physical_devices() }?;
        if devices.is_empty() {
            return Err(RendererError::NoAdapterFound);
        }

        let mut profiles = Vec::with_capacity(devices.len());
        for &device in &devices {
            profiles.push(Self::profile_adapter(instance, surface_loader, surface, device)?);
        }

        let index = first_suitable(&profiles).ok_or(RendererError::NoSuitableAdapter)?;
        Ok(devices[index])
    }

    fn profile_adapter(
        instance: &ash::Instance,
        surface_loader: &ash::extensions::khr::Surface,
        surface: vk::SurfaceKHR,
        device: vk::PhysicalDevice,
    ) -> RenderResult<AdapterProfile> {
        let extensions = unsafe { instance.enumerate_device_extension_properties(device) }?;
        let has_device_extensions = extensions.iter().any(|ext| {
            (unsafe { CStr::from_ptr(ext.extension_name.as_ptr()) })
                == ash::extensions::khr::Swapchain::name()
        });

        let formats = unsafe {
            surface_loader.get_physical_device_surface_formats(device, surface)
        }?;
        let present_modes = unsafe {
            surface_loader.get_physical_device_surface_present_modes(device, surface)
        }?;

        let features = unsafe { instance.get_physical_device_features(device) };

        Ok(AdapterProfile {
            has_device_extensions,
            has_surface_format: !formats.is_empty(),
            has_present_mode: !present_modes.is_empty(),
            has_geometry_support: features.geometry_shader == vk::TRUE,
        })
    }

    fn resolve_queue_families(
        instance: &ash::Instance,
        surface_loader: &ash::extensions::khr::Surface,
        surface: vk::SurfaceKHR,
        device: vk::PhysicalDevice,
    ) -> RenderResult<QueueFamilies> {
        let families = unsafe { instance.get_physical_device_queue_family_properties(device) };

        let mut capabilities = Vec::with_capacity(families.len());
        for (index, family) in families.iter().enumerate() {
            let graphics = family.queue_flags.contains(vk::QueueFlags::GRAPHICS);
            let present = unsafe {
                surface_loader.get_physical_device_surface_support(device, index as u32, surface)
            }?;
            capabilities.push((graphics, present));
        }

        pick_queue_families(&capabilities).ok_or(RendererError::NoQueueFamilies)
    }

    fn create_logical_device(
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
        queue_families: QueueFamilies,
    ) -> RenderResult<ash::Device> {
        // One queue per family; graphics and present collapse to a single
        // entry when they share a family index
        let mut unique_families = vec![queue_families.graphics];
        if !queue_families.shared {
            unique_families.push(queue_families.present);
        }

        let queue_priorities = [1.0];
        let queue_create_infos: Vec<_> = unique_families
            .iter()
            .map(|&family| {
                vk::DeviceQueueCreateInfo::builder()
                    .queue_family_index(family)
                    .queue_priorities(&queue_priorities)
                    .build()
            })
            .collect();

        let extensions = vec![ash::extensions::khr::Swapchain::name().as_ptr()];

        let create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&extensions)
            .enabled_features(&REQUIRED_DEVICE_FEATURES);

        let device =
            unsafe { instance.create_device(physical_device, &create_info, None) }?;

        Ok(device)
    }

    /// Wait for device to be idle (e.g., before cleanup)
    pub fn wait_idle(&self) -> RenderResult<()> {
        unsafe { self.device.device_wait_idle() }?;
        Ok(())
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        log::info!("Destroying Vulkan device...");

        let _ = self.wait_idle();

        unsafe {
            // Allocator frees its memory blocks against the live device
            ManuallyDrop::drop(&mut self.allocator);

            self.device.destroy_device(None);
            self.surface_loader.destroy_surface(self.surface, None);

            if let Some((debug_utils, messenger)) = self.debug_utils.take() {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }

            self.instance.destroy_instance(None);
        }
    }
}

// Debug callback for validation layers
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _p_user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    let message = CStr::from_ptr((*p_callback_data).p_message);

    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => {
            log::error!("[Vulkan] {}", message.to_string_lossy());
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => {
            log::warn!("[Vulkan] {}", message.to_string_lossy());
        }
        _ => {
            log::debug!("[Vulkan] {}", message.to_string_lossy());
        }
    }

    vk::FALSE
}

#[cfg(test)]
mod tests {
    use super::*;

    fn suitable() -> AdapterProfile {
        AdapterProfile {
            has_device_extensions: true,
            has_surface_format: true,
            has_present_mode: true,
            has_geometry_support: true,
        }
    }

    #[test]
    fn selection_takes_first_match_in_order() {
        let profiles = [
            AdapterProfile {
                has_geometry_support: false,
                ..suitable()
            },
            suitable(),
            suitable(),
        ];
        assert_eq!(first_suitable(&profiles), Some(1));
    }

    #[test]
    fn selection_fails_when_no_adapter_qualifies() {
        let profiles = [
            AdapterProfile {
                has_device_extensions: false,
                ..suitable()
            },
            AdapterProfile {
                has_present_mode: false,
                ..suitable()
            },
        ];
        assert_eq!(first_suitable(&profiles), None);
    }

    #[test]
    fn every_check_is_required() {
        let mut profile = suitable();
        assert!(profile.is_suitable());
        profile.has_surface_format = false;
        assert!(!profile.is_suitable());
    }

    #[test]
    fn queue_families_first_index_wins() {
        // family 0: present only, family 1: graphics only, family 2: both
        let families = pick_queue_families(&[(false, true), (true, false), (true, true)])
            .expect("satisfiable");
        assert_eq!(families.graphics, 1);
        assert_eq!(families.present, 0);
        assert!(!families.shared);
    }

    #[test]
    fn queue_families_shared_flag() {
        let families = pick_queue_families(&[(true, true)]).expect("satisfiable");
        assert_eq!(families.graphics, 0);
        assert_eq!(families.present, 0);
        assert!(families.shared);
    }

    #[test]
    fn queue_families_unsatisfiable() {
        assert!(pick_queue_families(&[(true, false)]).is_none());
        assert!(pick_queue_families(&[(false, true)]).is_none());
        assert!(pick_queue_families(&[]).is_none());
    }
}
