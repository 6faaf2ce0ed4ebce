//! Vulkan instance, adapter and logical device
//!
//! The device is created on the first graphics queue family that can present
//! to GLFW windows, with timeline semaphores and dynamic rendering enabled.

use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::sync::{Mutex, MutexGuard, PoisonError};

#[cfg(debug_assertions)]
use ash::extensions::ext::DebugUtils;
use ash::extensions::khr::{Surface, Swapchain as SwapchainLoader};
use ash::{vk, Device, Entry, Instance};

use crate::gpu::{AdapterInfo, GpuError, GpuResult};

/// Map a failed Vulkan call to a backend error
pub(crate) fn api_error(what: &'static str) -> impl Fn(vk::Result) -> GpuError {
    move |result| match result {
        vk::Result::ERROR_OUT_OF_HOST_MEMORY | vk::Result::ERROR_OUT_OF_DEVICE_MEMORY => {
            GpuError::OutOfMemory { requested: 0 }
        }
        vk::Result::ERROR_DEVICE_LOST => GpuError::DeviceLost,
        other => GpuError::Api(format!("{what} failed: {other:?}")),
    }
}

struct InstanceHandles {
    entry: Entry,
    instance: Instance,
    #[cfg(debug_assertions)]
    debug: Option<(DebugUtils, vk::DebugUtilsMessengerEXT)>,
}

impl InstanceHandles {
    fn new(app_name: &str, glfw: &glfw::Glfw) -> GpuResult<Self> {
        let entry = unsafe { Entry::load() }.map_err(|e| GpuError::Api(format!("Failed to load Vulkan: {e}")))?;

        let app_name = CString::new(app_name).map_err(|e| GpuError::Api(e.to_string()))?;
        let engine_name = CString::new("XR Bridge").map_err(|e| GpuError::Api(e.to_string()))?;
        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name)
            .application_version(vk::make_api_version(0, 1, 0, 0))
            .engine_name(&engine_name)
            .engine_version(vk::make_api_version(0, 0, 1, 0))
            .api_version(vk::API_VERSION_1_3);

        let window_extensions = glfw
            .get_required_instance_extensions()
            .ok_or_else(|| GpuError::Unsupported("GLFW reports no Vulkan presentation support".to_string()))?;
        let window_extensions: Vec<CString> = window_extensions
            .into_iter()
            .map(|name| CString::new(name).map_err(|e| GpuError::Api(e.to_string())))
            .collect::<GpuResult<_>>()?;
        #[allow(unused_mut)]
        let mut extensions: Vec<*const c_char> = window_extensions.iter().map(|name| name.as_ptr()).collect();

        #[cfg(debug_assertions)]
        let validation = Self::validation_available(&entry);
        #[cfg(not(debug_assertions))]
        let validation = false;

        #[cfg(debug_assertions)]
        if validation {
            extensions.push(DebugUtils::name().as_ptr());
        }
        let layer_names = if validation { vec![VALIDATION_LAYER.as_ptr()] } else { Vec::new() };

        let create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layer_names);
        let instance = unsafe { entry.create_instance(&create_info, None) }.map_err(api_error("vkCreateInstance"))?;
        log::info!("Vulkan instance created (validation: {validation})");

        #[cfg(debug_assertions)]
        let debug = if validation {
            let utils = DebugUtils::new(&entry, &instance);
            match Self::create_messenger(&utils) {
                Ok(messenger) => Some((utils, messenger)),
                Err(err) => {
                    log::warn!("Debug messenger unavailable: {err}");
                    None
                }
            }
        } else {
            None
        };

        Ok(Self {
            entry,
            instance,
            #[cfg(debug_assertions)]
            debug,
        })
    }

    #[cfg(debug_assertions)]
    fn validation_available(entry: &Entry) -> bool {
        entry.enumerate_instance_layer_properties().map_or(false, |layers| {
            layers
                .iter()
                .any(|layer| unsafe { CStr::from_ptr(layer.layer_name.as_ptr()) } == VALIDATION_LAYER)
        })
    }

    #[cfg(debug_assertions)]
    fn create_messenger(utils: &DebugUtils) -> GpuResult<vk::DebugUtilsMessengerEXT> {
        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::WARNING | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_callback));
        unsafe { utils.create_debug_utils_messenger(&create_info, None) }.map_err(api_error("vkCreateDebugUtilsMessengerEXT"))
    }
}

impl Drop for InstanceHandles {
    fn drop(&mut self) {
        unsafe {
            #[cfg(debug_assertions)]
            if let Some((utils, messenger)) = self.debug.take() {
                utils.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}

const VALIDATION_LAYER: &CStr = unsafe { CStr::from_bytes_with_nul_unchecked(b"VK_LAYER_KHRONOS_validation\0") };

#[cfg(debug_assertions)]
unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    let message = CStr::from_ptr((*callback_data).p_message).to_string_lossy();
    if severity >= vk::DebugUtilsMessageSeverityFlagsEXT::ERROR {
        log::error!("[Vulkan] {message_type:?} - {message}");
    } else {
        log::warn!("[Vulkan] {message_type:?} - {message}");
    }
    vk::FALSE
}

/// Physical device with the queue family the runtime submits to
struct PhysicalDeviceInfo {
    device: vk::PhysicalDevice,
    adapter: AdapterInfo,
    queue_family: u32,
    memory_properties: vk::PhysicalDeviceMemoryProperties,
}

fn adapter_info(instance: &Instance, device: vk::PhysicalDevice) -> AdapterInfo {
    let properties = unsafe { instance.get_physical_device_properties(device) };
    let memory = unsafe { instance.get_physical_device_memory_properties(device) };
    let device_local: u64 = memory.memory_heaps[..memory.memory_heap_count as usize]
        .iter()
        .filter(|heap| heap.flags.contains(vk::MemoryHeapFlags::DEVICE_LOCAL))
        .map(|heap| heap.size)
        .sum();
    let host: u64 = memory.memory_heaps[..memory.memory_heap_count as usize]
        .iter()
        .filter(|heap| !heap.flags.contains(vk::MemoryHeapFlags::DEVICE_LOCAL))
        .map(|heap| heap.size)
        .sum();

    let discrete = properties.device_type == vk::PhysicalDeviceType::DISCRETE_GPU;
    AdapterInfo {
        name: unsafe { CStr::from_ptr(properties.device_name.as_ptr()) }.to_string_lossy().into_owned(),
        id: (u64::from(properties.vendor_id) << 32) | u64::from(properties.device_id),
        dedicated_video_memory: if discrete { device_local } else { 0 },
        dedicated_system_memory: 0,
        shared_system_memory: if discrete { host } else { device_local + host },
    }
}

fn graphics_family(instance: &Instance, device: vk::PhysicalDevice, glfw: &glfw::Glfw) -> Option<u32> {
    let families = unsafe { instance.get_physical_device_queue_family_properties(device) };
    (0u32..).zip(families.iter()).find_map(|(index, family)| {
        let presents = glfw.get_physical_device_presentation_support_raw(instance.handle(), device, index);
        (family.queue_flags.contains(vk::QueueFlags::GRAPHICS) && presents).then_some(index)
    })
}

fn supports_required_features(instance: &Instance, device: vk::PhysicalDevice) -> bool {
    let properties = unsafe { instance.get_physical_device_properties(device) };
    if properties.api_version < vk::API_VERSION_1_3 {
        return false;
    }
    let Ok(extensions) = (unsafe { instance.enumerate_device_extension_properties(device) }) else {
        return false;
    };
    extensions
        .iter()
        .any(|ext| unsafe { CStr::from_ptr(ext.extension_name.as_ptr()) } == SwapchainLoader::name())
}

/// Adapters usable by the Vulkan backend
pub fn enumerate_adapters() -> GpuResult<Vec<AdapterInfo>> {
    let glfw = init_glfw()?;
    let handles = InstanceHandles::new("XR Bridge adapter query", &glfw)?;
    let devices = unsafe { handles.instance.enumerate_physical_devices() }.map_err(api_error("vkEnumeratePhysicalDevices"))?;
    Ok(devices
        .into_iter()
        .filter(|&device| {
            supports_required_features(&handles.instance, device)
                && graphics_family(&handles.instance, device, &glfw).is_some()
        })
        .map(|device| adapter_info(&handles.instance, device))
        .collect())
}

pub(crate) fn init_glfw() -> GpuResult<glfw::Glfw> {
    let glfw = glfw::init(glfw::fail_on_errors).map_err(|e| GpuError::Api(format!("Failed to initialize GLFW: {e:?}")))?;
    if !glfw.vulkan_supported() {
        return Err(GpuError::Unsupported("GLFW found no Vulkan loader".to_string()));
    }
    Ok(glfw)
}

/// Everything needed to talk to one Vulkan device
///
/// The queue is externally synchronized: every submission goes through
/// [`VulkanContext::lock_queue`].
pub struct VulkanContext {
    handles: InstanceHandles,
    physical: PhysicalDeviceInfo,
    device: Device,
    queue: Mutex<vk::Queue>,
    upload_pool: Mutex<vk::CommandPool>,
    pub(crate) surface_loader: Surface,
    pub(crate) swapchain_loader: SwapchainLoader,
    pub(crate) glfw: glfw::Glfw,
}

// GLFW is only touched from the thread that created the device.
unsafe impl Send for VulkanContext {}
unsafe impl Sync for VulkanContext {}

impl VulkanContext {
    /// Create the instance and a device on the best-scoring adapter
    pub fn new(app_name: &str) -> GpuResult<Self> {
        let glfw = init_glfw()?;
        let handles = InstanceHandles::new(app_name, &glfw)?;
        let physical = Self::select_physical_device(&handles.instance, &glfw)?;
        log::info!("Selected GPU: {} (queue family {})", physical.adapter.name, physical.queue_family);

        let priorities = [1.0];
        let queue_info = [vk::DeviceQueueCreateInfo::builder()
            .queue_family_index(physical.queue_family)
            .queue_priorities(&priorities)
            .build()];
        let extensions = [SwapchainLoader::name().as_ptr()];
        let mut features12 = vk::PhysicalDeviceVulkan12Features::builder().timeline_semaphore(true);
        let mut features13 = vk::PhysicalDeviceVulkan13Features::builder().dynamic_rendering(true);
        let create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_info)
            .enabled_extension_names(&extensions)
            .push_next(&mut features12)
            .push_next(&mut features13);
        let device = unsafe { handles.instance.create_device(physical.device, &create_info, None) }
            .map_err(api_error("vkCreateDevice"))?;
        let queue = unsafe { device.get_device_queue(physical.queue_family, 0) };

        let pool_info = vk::CommandPoolCreateInfo::builder()
            .queue_family_index(physical.queue_family)
            .flags(vk::CommandPoolCreateFlags::TRANSIENT);
        let upload_pool = match unsafe { device.create_command_pool(&pool_info, None) } {
            Ok(pool) => pool,
            Err(err) => {
                unsafe { device.destroy_device(None) };
                return Err(api_error("vkCreateCommandPool")(err));
            }
        };

        let surface_loader = Surface::new(&handles.entry, &handles.instance);
        let swapchain_loader = SwapchainLoader::new(&handles.instance, &device);
        Ok(Self {
            handles,
            physical,
            device,
            queue: Mutex::new(queue),
            upload_pool: Mutex::new(upload_pool),
            surface_loader,
            swapchain_loader,
            glfw,
        })
    }

    fn select_physical_device(instance: &Instance, glfw: &glfw::Glfw) -> GpuResult<PhysicalDeviceInfo> {
        let devices = unsafe { instance.enumerate_physical_devices() }.map_err(api_error("vkEnumeratePhysicalDevices"))?;
        devices
            .into_iter()
            .filter(|&device| supports_required_features(instance, device))
            .filter_map(|device| {
                let queue_family = graphics_family(instance, device, glfw)?;
                Some(PhysicalDeviceInfo {
                    device,
                    adapter: adapter_info(instance, device),
                    queue_family,
                    memory_properties: unsafe { instance.get_physical_device_memory_properties(device) },
                })
            })
            .max_by(|a, b| a.adapter.score().total_cmp(&b.adapter.score()))
            .ok_or_else(|| GpuError::Unsupported("No Vulkan 1.3 GPU with presentation support".to_string()))
    }

    /// Logical device
    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Instance
    pub fn instance(&self) -> &Instance {
        &self.handles.instance
    }

    /// Physical device handle
    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical.device
    }

    /// Description of the selected adapter
    pub fn adapter(&self) -> &AdapterInfo {
        &self.physical.adapter
    }

    /// Queue family every command pool is created for
    pub fn queue_family(&self) -> u32 {
        self.physical.queue_family
    }

    /// Exclusive access to the queue for one submission
    pub fn lock_queue(&self) -> MutexGuard<'_, vk::Queue> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Memory type index for `type_filter` with `properties`
    pub fn find_memory_type(&self, type_filter: u32, properties: vk::MemoryPropertyFlags) -> GpuResult<u32> {
        let memory = &self.physical.memory_properties;
        (0..memory.memory_type_count)
            .find(|&i| {
                type_filter & (1 << i) != 0 && memory.memory_types[i as usize].property_flags.contains(properties)
            })
            .ok_or_else(|| GpuError::Unsupported(format!("No memory type with {properties:?}")))
    }

    /// Record and run one command buffer, waiting for it to finish
    pub fn immediate_submit(&self, record: impl FnOnce(vk::CommandBuffer)) -> GpuResult<()> {
        let pool = self.upload_pool.lock().unwrap_or_else(PoisonError::into_inner);
        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(*pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let buffers = unsafe { self.device.allocate_command_buffers(&alloc_info) }
            .map_err(api_error("vkAllocateCommandBuffers"))?;
        let fence = match unsafe { self.device.create_fence(&vk::FenceCreateInfo::default(), None) } {
            Ok(fence) => fence,
            Err(err) => {
                unsafe { self.device.free_command_buffers(*pool, &buffers) };
                return Err(api_error("vkCreateFence")(err));
            }
        };

        let result = (|| {
            let begin = vk::CommandBufferBeginInfo::builder().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
            unsafe { self.device.begin_command_buffer(buffers[0], &begin) }.map_err(api_error("vkBeginCommandBuffer"))?;
            record(buffers[0]);
            unsafe { self.device.end_command_buffer(buffers[0]) }.map_err(api_error("vkEndCommandBuffer"))?;

            let submit = vk::SubmitInfo::builder().command_buffers(&buffers).build();
            {
                let queue = self.lock_queue();
                unsafe { self.device.queue_submit(*queue, &[submit], fence) }.map_err(api_error("vkQueueSubmit"))?;
            }
            unsafe { self.device.wait_for_fences(&[fence], true, u64::MAX) }.map_err(api_error("vkWaitForFences"))
        })();

        unsafe {
            self.device.destroy_fence(fence, None);
            self.device.free_command_buffers(*pool, &buffers);
        }
        result
    }

    /// Block until the queue has drained
    pub fn wait_queue_idle(&self) -> GpuResult<()> {
        let queue = self.lock_queue();
        unsafe { self.device.queue_wait_idle(*queue) }.map_err(api_error("vkQueueWaitIdle"))
    }
}

impl Drop for VulkanContext {
    fn drop(&mut self) {
        unsafe {
            if let Err(err) = self.device.device_wait_idle() {
                log::warn!("Device teardown without idle: {err:?}");
            }
            let pool = *self.upload_pool.get_mut().unwrap_or_else(PoisonError::into_inner);
            self.device.destroy_command_pool(pool, None);
            self.device.destroy_device(None);
        }
        log::info!("Vulkan device destroyed");
    }
}
