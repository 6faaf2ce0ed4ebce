//! Proxy swapchain ring and its acquire/wait/release state machine

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::core::error::{XrError, XrResult};
use crate::gpu::{
    DescriptorHeapHandle, DescriptorKind, Format, GpuFence, GpuImageHandle, GpuResult, GraphicsDevice, ImageDesc,
    ResourceFlags, ResourceState, SwapchainUsageFlags, Timeout,
};

use super::state::{resource_usage, ImageState};

/// Parameters of a proxy swapchain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxySwapchainDesc {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Pixel format
    pub format: Format,
    /// How the application uses the images
    pub usage: SwapchainUsageFlags,
}

/// Ring of application-visible images
///
/// Slots cycle `Released -> Acquired -> RenderTarget -> Released`, and at
/// most one slot is outside `Released` at a time. Each slot records the fence
/// value the compositor signals after it has read the slot's contents;
/// waiting on a slot blocks until the fence reaches it.
pub struct ProxySwapchain {
    device: Arc<dyn GraphicsDevice>,
    desc: ProxySwapchainDesc,
    label: String,
    images: Vec<GpuImageHandle>,
    rtv_heap: Option<DescriptorHeapHandle>,
    srv_heap: DescriptorHeapHandle,
    fence: Arc<dyn GpuFence>,
    image_states: Vec<ImageState>,
    fence_values: Vec<u64>,
    next_fence_value: u64,
    current_frame_index: usize,
    in_flight: Option<usize>,
    awaited_frame_index: Option<usize>,
    last_released_index: Option<usize>,
    last_signaled_value: AtomicU64,
    resource_state: ResourceState,
    resource_flags: ResourceFlags,
}

impl ProxySwapchain {
    /// Allocate `image_count` images with their views and a fence
    ///
    /// On failure every resource created so far is released.
    pub fn create(
        device: Arc<dyn GraphicsDevice>,
        serial: u64,
        desc: ProxySwapchainDesc,
        image_count: u32,
    ) -> XrResult<Self> {
        if image_count < 2 {
            return Err(XrError::ValidationFailure(format!("Swapchain needs at least 2 images, got {image_count}")));
        }
        let label = format!("Proxy Swapchain {serial}");
        let (resource_state, resource_flags) = resource_usage(desc.usage);

        let mut images = Vec::with_capacity(image_count as usize);
        let mut heaps = Vec::with_capacity(2);
        let result = Self::allocate(device.as_ref(), &label, &desc, image_count, resource_state, resource_flags, &mut images, &mut heaps);
        let (rtv_heap, srv_heap, fence) = match result {
            Ok(parts) => parts,
            Err(err) => {
                log::error!("{label}: resource creation failed: {err}");
                for image in images {
                    device.destroy_image(image);
                }
                for heap in heaps {
                    device.destroy_descriptor_heap(heap);
                }
                return Err(err.into());
            }
        };

        log::info!(
            "{label}: {}x{} {:?}, {} images, usage {:?}",
            desc.width,
            desc.height,
            desc.format,
            image_count,
            desc.usage
        );
        let count = image_count as usize;
        Ok(Self {
            device,
            desc,
            label,
            images,
            rtv_heap,
            srv_heap,
            fence,
            image_states: vec![ImageState::Released; count],
            fence_values: vec![0; count],
            next_fence_value: 1,
            current_frame_index: count - 1,
            in_flight: None,
            awaited_frame_index: None,
            last_released_index: None,
            last_signaled_value: AtomicU64::new(0),
            resource_state,
            resource_flags,
        })
    }

    #[allow(clippy::type_complexity)]
    fn allocate(
        device: &dyn GraphicsDevice,
        label: &str,
        desc: &ProxySwapchainDesc,
        image_count: u32,
        resource_state: ResourceState,
        resource_flags: ResourceFlags,
        images: &mut Vec<GpuImageHandle>,
        heaps: &mut Vec<DescriptorHeapHandle>,
    ) -> GpuResult<(Option<DescriptorHeapHandle>, DescriptorHeapHandle, Arc<dyn GpuFence>)> {
        let image_desc = ImageDesc {
            width: desc.width,
            height: desc.height,
            format: desc.format,
            flags: resource_flags,
            initial_state: resource_state,
        };
        for i in 0..image_count {
            images.push(device.create_image(&image_desc, &format!("{label} Resource {i}"))?);
        }

        // Render target views need the render target allocation flag
        let rtv_heap = if resource_flags.contains(ResourceFlags::ALLOW_RENDER_TARGET) {
            let heap = device.create_descriptor_heap(DescriptorKind::RenderTarget, image_count, false)?;
            heaps.push(heap);
            Some(heap)
        } else {
            None
        };
        let srv_heap = device.create_descriptor_heap(DescriptorKind::ShaderResource, image_count, true)?;
        heaps.push(srv_heap);

        for (slot, image) in (0u32..).zip(images.iter()) {
            if let Some(heap) = rtv_heap {
                device.create_render_target_view(heap, slot, *image)?;
            }
            device.create_shader_resource_view(srv_heap, slot, *image)?;
        }

        let fence = device.create_fence(0)?;
        Ok((rtv_heap, srv_heap, fence))
    }

    /// Advance to the next slot and hand it to the application
    ///
    /// Fails while another slot is acquired or being rendered.
    pub fn acquire(&mut self) -> XrResult<usize> {
        if let Some(index) = self.in_flight {
            log::warn!("{}: acquire while slot {index} is {:?}", self.label, self.image_states[index]);
            return Err(XrError::CallOrderInvalid);
        }
        let next = (self.current_frame_index + 1) % self.images.len();
        if self.image_states[next] != ImageState::Released {
            log::warn!("{}: acquire of slot {next} in state {:?}", self.label, self.image_states[next]);
            return Err(XrError::CallOrderInvalid);
        }
        self.current_frame_index = next;
        self.image_states[next] = ImageState::Acquired;
        self.in_flight = Some(next);
        log::trace!("{}: acquired slot {next}", self.label);
        Ok(next)
    }

    /// Block until the compositor has finished reading the acquired slot
    ///
    /// An expired timeout leaves the slot acquired so the wait can be retried.
    pub fn wait(&mut self, timeout: Timeout) -> XrResult<()> {
        let index = self.current_frame_index;
        if self.image_states[index] != ImageState::Acquired {
            log::warn!("{}: wait on slot {index} in state {:?}", self.label, self.image_states[index]);
            return Err(XrError::CallOrderInvalid);
        }

        let required = self.fence_values[index];
        if self.fence.completed_value() < required && !self.fence.wait(required, timeout)? {
            log::debug!("{}: wait on slot {index} timed out (fence {required})", self.label);
            return Err(XrError::TimeoutExpired);
        }

        self.fence_values[index] = self.next_fence_value;
        self.next_fence_value += 1;
        self.image_states[index] = ImageState::RenderTarget;
        self.awaited_frame_index = Some(index);
        log::trace!("{}: slot {index} ready for rendering", self.label);
        Ok(())
    }

    /// Return the rendered slot to the runtime for composition
    pub fn release(&mut self) -> XrResult<()> {
        let Some(index) = self.awaited_frame_index.filter(|&i| self.image_states[i] == ImageState::RenderTarget) else {
            log::warn!("{}: release without a waited image", self.label);
            return Err(XrError::CallOrderInvalid);
        };
        self.image_states[index] = ImageState::Released;
        self.in_flight = None;
        self.last_released_index = Some(index);
        log::trace!("{}: released slot {index}", self.label);
        Ok(())
    }

    /// Images in ring order
    pub fn images(&self) -> &[GpuImageHandle] {
        &self.images
    }

    /// Number of images in the ring
    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    /// State of slot `index`
    pub fn image_state(&self, index: usize) -> Option<ImageState> {
        self.image_states.get(index).copied()
    }

    /// Slot most recently acquired
    pub const fn current_frame_index(&self) -> usize {
        self.current_frame_index
    }

    /// Slot most recently released, which the compositor samples
    pub const fn last_released_index(&self) -> Option<usize> {
        self.last_released_index
    }

    /// Fence value slot `index` waits for next
    pub fn fence_value(&self, index: usize) -> Option<u64> {
        self.fence_values.get(index).copied()
    }

    /// Fence value the compositor should signal for the released slot
    ///
    /// Returns `None` when that value was already claimed, so the fence is
    /// signalled once per release even when several views share the
    /// swapchain.
    pub fn claim_signal_value(&self) -> Option<u64> {
        let value = self.last_released_index.and_then(|slot| self.fence_value(slot))?;
        let previous = self.last_signaled_value.fetch_max(value, Ordering::AcqRel);
        (value > previous).then_some(value)
    }

    /// Fence the compositor signals
    pub fn fence(&self) -> &Arc<dyn GpuFence> {
        &self.fence
    }

    /// Shader-visible heap with one view per slot
    pub const fn srv_heap(&self) -> DescriptorHeapHandle {
        self.srv_heap
    }

    /// Render target heap, when the images allow render targets
    pub const fn rtv_heap(&self) -> Option<DescriptorHeapHandle> {
        self.rtv_heap
    }

    /// State images rest in between compositions
    pub const fn resource_state(&self) -> ResourceState {
        self.resource_state
    }

    /// Allocation flags of the images
    pub const fn resource_flags(&self) -> ResourceFlags {
        self.resource_flags
    }

    /// Creation parameters
    pub const fn desc(&self) -> &ProxySwapchainDesc {
        &self.desc
    }

    /// Debug label
    pub fn label(&self) -> &str {
        &self.label
    }
}

impl Drop for ProxySwapchain {
    fn drop(&mut self) {
        for image in self.images.drain(..) {
            self.device.destroy_image(image);
        }
        if let Some(heap) = self.rtv_heap.take() {
            self.device.destroy_descriptor_heap(heap);
        }
        self.device.destroy_descriptor_heap(self.srv_heap);
        log::info!("{}: destroyed", self.label);
    }
}
