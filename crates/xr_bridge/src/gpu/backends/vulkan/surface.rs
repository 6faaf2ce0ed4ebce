//! Window swap chain
//!
//! The mirror window is a GLFW window without a client API. Back buffers are
//! registered with the device as presentable images so the compositor can
//! bind them like any other render target.

use std::sync::Arc;

use ash::vk;

use crate::gpu::{
    Format, GpuError, GpuImageHandle, GpuResult, ImageDesc, PresentationSwapChain, ResourceFlags, ResourceState,
    SwapChainDesc,
};

use super::context::api_error;
use super::queue::VulkanQueue;
use super::resources::{layout_barrier, vk_format, Shared};

const FALLBACK_FORMATS: [Format; 4] =
    [Format::Bgra8Unorm, Format::Rgba8Unorm, Format::Bgra8UnormSrgb, Format::Rgba8UnormSrgb];

/// [`PresentationSwapChain`] presenting to a GLFW window
pub struct VulkanSwapChain {
    shared: Arc<Shared>,
    queue: Arc<VulkanQueue>,
    glfw: glfw::Glfw,
    window: glfw::PWindow,
    _events: glfw::GlfwReceiver<(f64, glfw::WindowEvent)>,
    surface: vk::SurfaceKHR,
    swapchain: vk::SwapchainKHR,
    buffers: Vec<GpuImageHandle>,
    render_finished: Vec<vk::Semaphore>,
    acquired: vk::Fence,
    current: u32,
    extent: vk::Extent2D,
    format: Format,
}

impl VulkanSwapChain {
    pub(crate) fn new(shared: Arc<Shared>, queue: Arc<VulkanQueue>, desc: &SwapChainDesc) -> GpuResult<Self> {
        let mut glfw = shared.context.glfw.clone();
        glfw.window_hint(glfw::WindowHint::ClientApi(glfw::ClientApiHint::NoApi));
        glfw.window_hint(glfw::WindowHint::Resizable(false));
        let (mut window, events) = glfw
            .create_window(desc.width, desc.height, &desc.title, glfw::WindowMode::Windowed)
            .ok_or_else(|| GpuError::Api(format!("Failed to create window '{}'", desc.title)))?;
        window.set_close_polling(true);

        let mut surface = vk::SurfaceKHR::null();
        let result = window.create_window_surface(shared.context.instance().handle(), std::ptr::null(), &mut surface);
        if result != vk::Result::SUCCESS {
            return Err(api_error("glfwCreateWindowSurface")(result));
        }

        let mut chain = Self {
            shared,
            queue,
            glfw,
            window,
            _events: events,
            surface,
            swapchain: vk::SwapchainKHR::null(),
            buffers: Vec::new(),
            render_finished: Vec::new(),
            acquired: vk::Fence::null(),
            current: 0,
            extent: vk::Extent2D { width: desc.width, height: desc.height },
            format: desc.format,
        };
        // Drop releases whatever was created if a later step fails.
        chain.create_swapchain(desc.buffer_count)?;
        chain.create_sync_objects()?;
        chain.acquire_next()?;
        log::info!(
            "Window swap chain '{}' {}x{} with {} buffers",
            desc.title,
            chain.extent.width,
            chain.extent.height,
            chain.buffers.len()
        );
        Ok(chain)
    }

    fn create_swapchain(&mut self, buffer_count: u32) -> GpuResult<()> {
        let context = &self.shared.context;
        let physical = context.physical_device();
        let loader = &context.surface_loader;

        let supported = unsafe { loader.get_physical_device_surface_support(physical, context.queue_family(), self.surface) }
            .map_err(api_error("vkGetPhysicalDeviceSurfaceSupportKHR"))?;
        if !supported {
            return Err(GpuError::Unsupported("Surface cannot be presented from the graphics queue".to_string()));
        }
        let capabilities = unsafe { loader.get_physical_device_surface_capabilities(physical, self.surface) }
            .map_err(api_error("vkGetPhysicalDeviceSurfaceCapabilitiesKHR"))?;
        let formats = unsafe { loader.get_physical_device_surface_formats(physical, self.surface) }
            .map_err(api_error("vkGetPhysicalDeviceSurfaceFormatsKHR"))?;
        // Fall back to another 8-bit format when the surface lacks the requested one
        let (format, surface_format) = std::iter::once(self.format)
            .chain(FALLBACK_FORMATS)
            .find_map(|format| {
                let wanted = vk_format(format);
                formats
                    .iter()
                    .find(|f| f.format == wanted && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR)
                    .map(|f| (format, *f))
            })
            .ok_or_else(|| GpuError::Unsupported(format!("Window surface does not offer {:?}", self.format)))?;
        if format != self.format {
            log::info!("Window surface lacks {:?}, presenting {format:?}", self.format);
            self.format = format;
        }

        if capabilities.current_extent.width != u32::MAX {
            self.extent = capabilities.current_extent;
        } else {
            self.extent.width = self
                .extent
                .width
                .clamp(capabilities.min_image_extent.width, capabilities.max_image_extent.width);
            self.extent.height = self
                .extent
                .height
                .clamp(capabilities.min_image_extent.height, capabilities.max_image_extent.height);
        }
        let mut image_count = buffer_count.max(capabilities.min_image_count);
        if capabilities.max_image_count > 0 {
            image_count = image_count.min(capabilities.max_image_count);
        }

        let info = vk::SwapchainCreateInfoKHR::builder()
            .surface(self.surface)
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(self.extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(vk::PresentModeKHR::FIFO)
            .clipped(true);
        self.swapchain = unsafe { context.swapchain_loader.create_swapchain(&info, None) }
            .map_err(api_error("vkCreateSwapchainKHR"))?;

        let images = unsafe { context.swapchain_loader.get_swapchain_images(self.swapchain) }
            .map_err(api_error("vkGetSwapchainImagesKHR"))?;
        let device = self.shared.device();
        context.immediate_submit(|cmd| unsafe {
            let barriers: Vec<vk::ImageMemoryBarrier> = images
                .iter()
                .map(|&image| layout_barrier(image, vk::ImageLayout::UNDEFINED, vk::ImageLayout::PRESENT_SRC_KHR))
                .collect();
            device.cmd_pipeline_barrier(
                cmd,
                vk::PipelineStageFlags::TOP_OF_PIPE,
                vk::PipelineStageFlags::BOTTOM_OF_PIPE,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &barriers,
            );
        })?;

        for (index, image) in images.into_iter().enumerate() {
            let desc = ImageDesc {
                width: self.extent.width,
                height: self.extent.height,
                format: self.format,
                flags: ResourceFlags::ALLOW_RENDER_TARGET,
                initial_state: ResourceState::PRESENT,
            };
            let handle = self.shared.register_swap_chain_image(image, desc, format!("back buffer {index}"))?;
            self.buffers.push(handle);
        }
        Ok(())
    }

    fn create_sync_objects(&mut self) -> GpuResult<()> {
        let device = self.shared.device();
        self.acquired = unsafe { device.create_fence(&vk::FenceCreateInfo::default(), None) }
            .map_err(api_error("vkCreateFence"))?;
        for _ in 0..self.buffers.len() {
            let semaphore = unsafe { device.create_semaphore(&vk::SemaphoreCreateInfo::default(), None) }
                .map_err(api_error("vkCreateSemaphore"))?;
            self.render_finished.push(semaphore);
        }
        Ok(())
    }

    /// Acquire the next back buffer and block until it is writable
    fn acquire_next(&mut self) -> GpuResult<()> {
        let device = self.shared.device();
        let (index, suboptimal) = unsafe {
            self.shared.context.swapchain_loader.acquire_next_image(
                self.swapchain,
                u64::MAX,
                vk::Semaphore::null(),
                self.acquired,
            )
        }
        .map_err(api_error("vkAcquireNextImageKHR"))?;
        if suboptimal {
            log::debug!("Window swap chain is suboptimal");
        }
        unsafe {
            device.wait_for_fences(&[self.acquired], true, u64::MAX).map_err(api_error("vkWaitForFences"))?;
            device.reset_fences(&[self.acquired]).map_err(api_error("vkResetFences"))?;
        }
        self.current = index;
        Ok(())
    }

    /// Whether the user asked to close the window
    pub fn should_close(&self) -> bool {
        self.window.should_close()
    }
}

impl PresentationSwapChain for VulkanSwapChain {
    fn back_buffers(&self) -> &[GpuImageHandle] {
        &self.buffers
    }

    fn current_back_buffer_index(&self) -> usize {
        self.current as usize
    }

    fn present(&mut self, sync_interval: u32) -> GpuResult<()> {
        let semaphore = self.render_finished[self.current as usize];
        self.queue.signal_binary(semaphore)?;

        let wait = [semaphore];
        let swapchains = [self.swapchain];
        let indices = [self.current];
        let info = vk::PresentInfoKHR::builder()
            .wait_semaphores(&wait)
            .swapchains(&swapchains)
            .image_indices(&indices);
        let presented = {
            let queue = self.shared.context.lock_queue();
            unsafe { self.shared.context.swapchain_loader.queue_present(*queue, &info) }
        };
        match presented {
            Ok(false) => {}
            Ok(true) => log::debug!("Presented to a suboptimal swap chain"),
            Err(err) => return Err(api_error("vkQueuePresentKHR")(err)),
        }
        log::trace!("Presented back buffer {} (sync interval {sync_interval})", self.current);

        self.glfw.poll_events();
        self.acquire_next()
    }

    fn extent(&self) -> (u32, u32) {
        (self.extent.width, self.extent.height)
    }

    fn format(&self) -> Format {
        self.format
    }
}

impl Drop for VulkanSwapChain {
    fn drop(&mut self) {
        if let Err(err) = self.shared.context.wait_queue_idle() {
            log::warn!("Window swap chain teardown without idle queue: {err}");
        }
        for buffer in self.buffers.drain(..) {
            self.shared.destroy_image(buffer);
        }
        let device = self.shared.device();
        unsafe {
            for semaphore in self.render_finished.drain(..) {
                device.destroy_semaphore(semaphore, None);
            }
            if self.acquired != vk::Fence::null() {
                device.destroy_fence(self.acquired, None);
            }
            if self.swapchain != vk::SwapchainKHR::null() {
                self.shared.context.swapchain_loader.destroy_swapchain(self.swapchain, None);
            }
            self.shared.context.surface_loader.destroy_surface(self.surface, None);
        }
    }
}
