use crate::{AppError, AppResult, VALIDATION};
use ash::{
    extensions::{ext::DebugUtils, khr::Swapchain as SwapchainLoader},
    vk, Device, Entry, Instance,
};
use raw_window_handle::RawDisplayHandle;
use std::{
    ffi::{c_char, CStr, CString},
    os::raw::c_void,
};

/// Descriptors of each kind available in the shared descriptor pool.
pub const DESCRIPTORS_PER_KIND: u32 = 1000;

const VALIDATION_LAYER: &[u8] = b"VK_LAYER_KHRONOS_validation\0";

/// Process wide Vulkan objects: instance, device, queue and the descriptor pool shared with the
/// gui renderer.
///
/// Everything is released in reverse creation order on drop. Swapchain resources must be
/// destroyed before.
pub struct VulkanContext {
    pub entry: Entry,
    pub instance: Instance,
    debug: Option<(DebugUtils, vk::DebugUtilsMessengerEXT)>,
    pub physical_device: vk::PhysicalDevice,
    pub queue_family_index: u32,
    pub device: Device,
    pub queue: vk::Queue,
    pub descriptor_pool: vk::DescriptorPool,
}

impl VulkanContext {
    /// Bring up Vulkan for a window living on `display_handle`.
    ///
    /// # Errors
    ///
    /// * [`AppError::Loading`] - If the Vulkan loader is not available.
    /// * [`AppError::NoPhysicalDevice`] - If no physical device is enumerated.
    /// * [`AppError::NoGraphicsQueue`] - If the selected device has no graphics queue family.
    /// * [`AppError::Vulkan`] - If any Vulkan call fails.
    pub fn new(display_handle: RawDisplayHandle, name: &str) -> AppResult<Self> {
        let entry = unsafe { Entry::load()? };

        let extensions = ash_window::enumerate_required_extensions(display_handle)?;
        let (instance, debug) = create_vulkan_instance(&entry, extensions, name)?;

        let (physical_device, queue_family_index) =
            match select_physical_device_and_queue_family(&instance) {
                Ok(selection) => selection,
                Err(error) => {
                    destroy_instance(&instance, debug);
                    return Err(error);
                }
            };

        let device = match create_vulkan_device(&instance, physical_device, queue_family_index)
        {
            Ok(device) => device,
            Err(error) => {
                destroy_instance(&instance, debug);
                return Err(error);
            }
        };
        let queue = unsafe { device.get_device_queue(queue_family_index, 0) };

        let descriptor_pool = match create_vulkan_descriptor_pool(&device) {
            Ok(pool) => pool,
            Err(error) => {
                unsafe { device.destroy_device(None) };
                destroy_instance(&instance, debug);
                return Err(error);
            }
        };

        Ok(Self {
            entry,
            instance,
            debug,
            physical_device,
            queue_family_index,
            device,
            queue,
            descriptor_pool,
        })
    }

    /// Block until the device has finished all submitted work.
    pub fn wait_idle(&self) -> AppResult<()> {
        unsafe { self.device.device_wait_idle()? };
        Ok(())
    }
}

impl Drop for VulkanContext {
    fn drop(&mut self) {
        log::debug!("Destroying Vulkan context");
        unsafe {
            self.device
                .destroy_descriptor_pool(self.descriptor_pool, None);
            self.device.destroy_device(None);
        }
        destroy_instance(&self.instance, self.debug.take());
    }
}

fn destroy_instance(instance: &Instance, debug: Option<(DebugUtils, vk::DebugUtilsMessengerEXT)>) {
    unsafe {
        if let Some((debug_utils, messenger)) = debug {
            debug_utils.destroy_debug_utils_messenger(messenger, None);
        }
        instance.destroy_instance(None);
    }
}

fn create_vulkan_instance(
    entry: &Entry,
    required_extensions: &[*const c_char],
    name: &str,
) -> AppResult<(Instance, Option<(DebugUtils, vk::DebugUtilsMessengerEXT)>)> {
    log::debug!("Creating vulkan instance");
    let app_name = CString::new(name).unwrap_or_default();
    let engine_name = CString::new("No Engine").unwrap_or_default();
    let app_info = vk::ApplicationInfo::builder()
        .application_name(app_name.as_c_str())
        .application_version(vk::make_api_version(0, 0, 1, 0))
        .engine_name(engine_name.as_c_str())
        .engine_version(vk::make_api_version(0, 0, 1, 0))
        .api_version(vk::make_api_version(0, 1, 0, 0));

    let mut extension_names = required_extensions.to_vec();
    let mut layer_names = Vec::new();
    if VALIDATION {
        extension_names.push(DebugUtils::name().as_ptr());
        layer_names.push(VALIDATION_LAYER.as_ptr() as *const c_char);
    }

    let instance_create_info = vk::InstanceCreateInfo::builder()
        .application_info(&app_info)
        .enabled_extension_names(&extension_names)
        .enabled_layer_names(&layer_names);

    let instance = unsafe { entry.create_instance(&instance_create_info, None)? };

    if !VALIDATION {
        return Ok((instance, None));
    }

    let create_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
        .message_severity(
            vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
                | vk::DebugUtilsMessageSeverityFlagsEXT::INFO
                | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
        )
        .message_type(
            vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE
                | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION,
        )
        .pfn_user_callback(Some(vulkan_debug_callback));
    let debug_utils = DebugUtils::new(entry, &instance);
    let messenger = match unsafe { debug_utils.create_debug_utils_messenger(&create_info, None) } {
        Ok(messenger) => messenger,
        Err(error) => {
            unsafe { instance.destroy_instance(None) };
            return Err(error.into());
        }
    };

    Ok((instance, Some((debug_utils, messenger))))
}

unsafe extern "system" fn vulkan_debug_callback(
    flag: vk::DebugUtilsMessageSeverityFlagsEXT,
    typ: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _: *mut c_void,
) -> vk::Bool32 {
    use vk::DebugUtilsMessageSeverityFlagsEXT as Flag;

    if p_callback_data.is_null() {
        return vk::FALSE;
    }
    let data = &*p_callback_data;

    let message = if data.p_message.is_null() {
        Default::default()
    } else {
        CStr::from_ptr(data.p_message).to_string_lossy()
    };
    let object_type = if data.object_count > 0 && !data.p_objects.is_null() {
        (*data.p_objects).object_type
    } else {
        vk::ObjectType::UNKNOWN
    };

    match flag {
        Flag::VERBOSE => log::debug!("[vulkan] {:?} object: {:?} - {}", typ, object_type, message),
        Flag::INFO => log::info!("[vulkan] {:?} object: {:?} - {}", typ, object_type, message),
        Flag::WARNING => log::warn!("[vulkan] {:?} object: {:?} - {}", typ, object_type, message),
        _ => log::error!("[vulkan] {:?} object: {:?} - {}", typ, object_type, message),
    }
    vk::FALSE
}

fn select_physical_device_and_queue_family(
    instance: &Instance,
) -> AppResult<(vk::PhysicalDevice, u32)> {
    log::debug!("Selecting vulkan physical device");
    let devices = unsafe { instance.enumerate_physical_devices()? };
    let device_types = devices
        .iter()
        .map(|device| unsafe { instance.get_physical_device_properties(*device) }.device_type)
        .collect::<Vec<_>>();
    let index = select_physical_device(&device_types).ok_or(AppError::NoPhysicalDevice)?;
    let physical_device = devices[index];

    unsafe {
        let props = instance.get_physical_device_properties(physical_device);
        let device_name = CStr::from_ptr(props.device_name.as_ptr());
        log::debug!(
            "Selected physical device {}: {:?} ({:?})",
            index,
            device_name,
            props.device_type
        );
    }

    let families =
        unsafe { instance.get_physical_device_queue_family_properties(physical_device) };
    let queue_family_index = select_queue_family(&families).ok_or(AppError::NoGraphicsQueue)?;
    log::debug!("Selected queue family {}", queue_family_index);

    Ok((physical_device, queue_family_index))
}

/// Index of the first discrete gpu, or 0 when there is none.
///
/// Returns `None` when there is no device at all.
pub fn select_physical_device(device_types: &[vk::PhysicalDeviceType]) -> Option<usize> {
    if device_types.is_empty() {
        return None;
    }
    Some(
        device_types
            .iter()
            .position(|device_type| *device_type == vk::PhysicalDeviceType::DISCRETE_GPU)
            .unwrap_or(0),
    )
}

/// Index of the first queue family supporting graphics.
pub fn select_queue_family(families: &[vk::QueueFamilyProperties]) -> Option<u32> {
    families
        .iter()
        .position(|family| family.queue_flags.contains(vk::QueueFlags::GRAPHICS))
        .map(|index| index as u32)
}

fn create_vulkan_device(
    instance: &Instance,
    physical_device: vk::PhysicalDevice,
    queue_family_index: u32,
) -> AppResult<Device> {
    log::debug!("Creating vulkan device");
    let queue_priorities = [1.0f32];
    let queue_create_infos = [vk::DeviceQueueCreateInfo::builder()
        .queue_family_index(queue_family_index)
        .queue_priorities(&queue_priorities)
        .build()];

    let device_extensions_ptrs = [SwapchainLoader::name().as_ptr()];

    let device_create_info = vk::DeviceCreateInfo::builder()
        .queue_create_infos(&queue_create_infos)
        .enabled_extension_names(&device_extensions_ptrs);

    Ok(unsafe { instance.create_device(physical_device, &device_create_info, None)? })
}

/// Sizes of the shared descriptor pool: [`DESCRIPTORS_PER_KIND`] of every descriptor kind.
pub fn descriptor_pool_sizes() -> [vk::DescriptorPoolSize; 11] {
    [
        vk::DescriptorType::SAMPLER,
        vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
        vk::DescriptorType::SAMPLED_IMAGE,
        vk::DescriptorType::STORAGE_IMAGE,
        vk::DescriptorType::UNIFORM_TEXEL_BUFFER,
        vk::DescriptorType::STORAGE_TEXEL_BUFFER,
        vk::DescriptorType::UNIFORM_BUFFER,
        vk::DescriptorType::STORAGE_BUFFER,
        vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC,
        vk::DescriptorType::STORAGE_BUFFER_DYNAMIC,
        vk::DescriptorType::INPUT_ATTACHMENT,
    ]
    .map(|ty| vk::DescriptorPoolSize {
        ty,
        descriptor_count: DESCRIPTORS_PER_KIND,
    })
}

fn create_vulkan_descriptor_pool(device: &Device) -> AppResult<vk::DescriptorPool> {
    log::debug!("Creating vulkan descriptor pool");
    let sizes = descriptor_pool_sizes();
    let create_info = vk::DescriptorPoolCreateInfo::builder()
        .flags(vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET)
        .max_sets(DESCRIPTORS_PER_KIND * sizes.len() as u32)
        .pool_sizes(&sizes);
    Ok(unsafe { device.create_descriptor_pool(&create_info, None)? })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: 1,
            ..Default::default()
        }
    }

    #[test]
    fn discrete_gpu_is_preferred() {
        let types = [
            vk::PhysicalDeviceType::INTEGRATED_GPU,
            vk::PhysicalDeviceType::CPU,
            vk::PhysicalDeviceType::DISCRETE_GPU,
            vk::PhysicalDeviceType::DISCRETE_GPU,
        ];
        assert_eq!(select_physical_device(&types), Some(2));
    }

    #[test]
    fn first_device_without_discrete_gpu() {
        let types = [
            vk::PhysicalDeviceType::INTEGRATED_GPU,
            vk::PhysicalDeviceType::INTEGRATED_GPU,
        ];
        assert_eq!(select_physical_device(&types), Some(0));
    }

    #[test]
    fn no_device_is_an_error() {
        assert_eq!(select_physical_device(&[]), None);
    }

    #[test]
    fn first_graphics_family_is_selected() {
        let families = [
            family(vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::COMPUTE),
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE),
            family(vk::QueueFlags::GRAPHICS),
        ];
        assert_eq!(select_queue_family(&families), Some(2));
    }

    #[test]
    fn no_graphics_family() {
        let families = [
            family(vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::COMPUTE),
        ];
        assert_eq!(select_queue_family(&families), None);
    }

    #[test]
    fn descriptor_pool_covers_every_kind() {
        let sizes = descriptor_pool_sizes();
        assert_eq!(sizes.len(), 11);
        assert!(sizes.iter().all(|size| size.descriptor_count == 1000));

        let mut kinds = sizes.iter().map(|size| size.ty.as_raw()).collect::<Vec<_>>();
        kinds.sort_unstable();
        kinds.dedup();
        assert_eq!(kinds.len(), 11);
        assert_eq!(DESCRIPTORS_PER_KIND * sizes.len() as u32, 11_000);
    }
}
