//! Software GPU backend
//!
//! Images live in host memory as linear float texels. Command lists are
//! interpreted on a queue thread, which makes fence completion genuinely
//! asynchronous with respect to the application thread. Every resource-state
//! mismatch the interpreter sees is kept in a validation log.

mod fence;
mod queue;
mod raster;
mod state;
mod swap_chain;

use std::any::Any;
use std::sync::{Arc, Mutex};

pub use fence::HeadlessFence;
pub use queue::HeadlessQueue;
pub use state::{PresentedFrame, Texel};
pub use swap_chain::HeadlessSwapChain;

use crate::gpu::types::{BuiltinShader, ShaderBytecode};
use crate::gpu::{
    AdapterInfo, CommandQueue, DescriptorHeapHandle, DescriptorKind, Format, GpuError, GpuFence,
    GpuImageHandle, GpuResult, GraphicsApi, GraphicsDevice, ImageDesc, PipelineDesc, PipelineHandle,
    PresentationSwapChain, ResourceFlags, ResourceState, RootSignatureDesc, RootSignatureHandle, SamplerDesc,
    ShaderLanguage, SwapChainDesc,
};

use state::{
    heap_handle, heap_key, image_handle, image_key, lock, pipeline_handle, pipeline_key, root_signature_handle,
    root_signature_key, Descriptor, DescriptorHeap, DeviceState, SoftwareImage,
};

/// The adapter the software backend reports
pub fn software_adapter() -> AdapterInfo {
    AdapterInfo {
        name: "XR Bridge Software Rasterizer".to_string(),
        id: 0x5357_0001,
        dedicated_video_memory: 0,
        dedicated_system_memory: 0,
        shared_system_memory: 1 << 30,
    }
}

/// Software graphics device
pub struct HeadlessDevice {
    state: Arc<Mutex<DeviceState>>,
    queue: Arc<HeadlessQueue>,
}

impl HeadlessDevice {
    /// Create a device with unlimited memory
    pub fn new() -> GpuResult<Self> {
        Self::try_new(None)
    }

    /// Create a device that fails allocations beyond `budget` bytes
    pub fn with_memory_budget(budget: u64) -> GpuResult<Self> {
        Self::try_new(Some(budget))
    }

    /// Create a device, reporting queue thread failures
    pub fn try_new(memory_budget: Option<u64>) -> GpuResult<Self> {
        let state = Arc::new(Mutex::new(DeviceState { memory_budget, ..DeviceState::default() }));
        let queue = Arc::new(HeadlessQueue::new(Arc::clone(&state))?);
        log::info!("Software device created (memory budget: {memory_budget:?})");
        Ok(Self { state, queue })
    }

    /// Concrete queue, for pausing execution
    pub fn headless_queue(&self) -> Arc<HeadlessQueue> {
        Arc::clone(&self.queue)
    }

    /// Overwrite an image's texels, as application rendering would
    pub fn write_texels(&self, image: GpuImageHandle, texels: &[Texel]) -> GpuResult<()> {
        let mut state = lock(&self.state);
        let img = state.image_mut(image)?;
        if texels.len() != img.texels.len() {
            return Err(GpuError::InvalidOperation {
                reason: format!("Expected {} texels, got {}", img.texels.len(), texels.len()),
            });
        }
        img.texels.copy_from_slice(texels);
        Ok(())
    }

    /// Fill an image with one color
    pub fn fill(&self, image: GpuImageHandle, color: Texel) -> GpuResult<()> {
        lock(&self.state).image_mut(image)?.texels.fill(color);
        Ok(())
    }

    /// Copy of an image's texels
    pub fn read_texels(&self, image: GpuImageHandle) -> GpuResult<Vec<Texel>> {
        Ok(lock(&self.state).image(image)?.texels.clone())
    }

    /// Tracked resource state of an image
    pub fn image_state(&self, image: GpuImageHandle) -> GpuResult<ResourceState> {
        Ok(lock(&self.state).image(image)?.state)
    }

    /// Debug label of an image
    pub fn image_label(&self, image: GpuImageHandle) -> GpuResult<String> {
        Ok(lock(&self.state).image(image)?.label.clone())
    }

    /// Number of live images
    pub fn image_count(&self) -> usize {
        lock(&self.state).images.len()
    }

    /// Number of live descriptor heaps
    pub fn descriptor_heap_count(&self) -> usize {
        lock(&self.state).heaps.len()
    }

    /// Bytes currently allocated to images
    pub fn memory_used(&self) -> u64 {
        lock(&self.state).memory_used
    }

    /// Most recently presented frame
    pub fn last_presented(&self) -> Option<PresentedFrame> {
        lock(&self.state).last_presented.clone()
    }

    /// Number of completed presents
    pub fn present_count(&self) -> u64 {
        lock(&self.state).present_count
    }

    /// Resource-state violations seen so far
    pub fn validation_errors(&self) -> Vec<String> {
        lock(&self.state).validation_errors.clone()
    }

    fn allocate_image(state: &mut DeviceState, desc: &ImageDesc, label: &str) -> GpuResult<GpuImageHandle> {
        let size = desc.size_in_bytes();
        if desc.width == 0 || desc.height == 0 {
            return Err(GpuError::InvalidOperation { reason: format!("Image '{label}' has zero size") });
        }
        if let Some(budget) = state.memory_budget {
            if state.memory_used + size > budget {
                log::error!("Allocation of '{label}' ({size} bytes) exceeds budget of {budget} bytes");
                return Err(GpuError::OutOfMemory { requested: size });
            }
        }
        state.memory_used += size;
        let texel_count = desc.width as usize * desc.height as usize;
        let key = state.images.insert(SoftwareImage {
            desc: desc.clone(),
            label: label.to_string(),
            state: desc.initial_state,
            texels: vec![[0.0; 4]; texel_count],
        });
        log::trace!("Created image '{label}' {}x{} {:?}", desc.width, desc.height, desc.format);
        Ok(image_handle(key))
    }

    fn write_descriptor(
        &self,
        heap: DescriptorHeapHandle,
        slot: u32,
        expected: DescriptorKind,
        descriptor: Descriptor,
    ) -> GpuResult<()> {
        let mut state = lock(&self.state);
        if let Descriptor::View(image) = descriptor {
            let img = state.image(image)?;
            if expected == DescriptorKind::RenderTarget && !img.desc.flags.contains(ResourceFlags::ALLOW_RENDER_TARGET) {
                return Err(GpuError::InvalidOperation {
                    reason: format!("Image '{}' does not allow render target views", img.label),
                });
            }
        }
        let target = state.heap_mut(heap)?;
        if target.kind != expected {
            return Err(GpuError::InvalidOperation {
                reason: format!("Heap {:#x} holds {:?} descriptors, not {expected:?}", heap.0, target.kind),
            });
        }
        let entry = target.slots.get_mut(slot as usize).ok_or_else(|| GpuError::InvalidOperation {
            reason: format!("Slot {slot} out of range for heap {:#x}", heap.0),
        })?;
        *entry = Some(descriptor);
        Ok(())
    }
}

impl GraphicsDevice for HeadlessDevice {
    fn api(&self) -> GraphicsApi {
        GraphicsApi::Software
    }

    fn adapter(&self) -> AdapterInfo {
        software_adapter()
    }

    fn shader_language(&self) -> ShaderLanguage {
        ShaderLanguage::Builtin
    }

    fn supported_swapchain_formats(&self) -> Vec<Format> {
        vec![Format::Rgba8Unorm, Format::Rgba8UnormSrgb]
    }

    fn create_image(&self, desc: &ImageDesc, label: &str) -> GpuResult<GpuImageHandle> {
        Self::allocate_image(&mut lock(&self.state), desc, label)
    }

    fn destroy_image(&self, image: GpuImageHandle) {
        let mut state = lock(&self.state);
        match state.images.remove(image_key(image)) {
            Some(removed) => {
                state.memory_used = state.memory_used.saturating_sub(removed.desc.size_in_bytes());
            }
            None => log::warn!("Destroying unknown image {:#x}", image.0),
        }
    }

    fn create_descriptor_heap(
        &self,
        kind: DescriptorKind,
        capacity: u32,
        shader_visible: bool,
    ) -> GpuResult<DescriptorHeapHandle> {
        if shader_visible && kind == DescriptorKind::RenderTarget {
            return Err(GpuError::InvalidOperation {
                reason: "Render target heaps cannot be shader visible".to_string(),
            });
        }
        let key = lock(&self.state).heaps.insert(DescriptorHeap {
            kind,
            shader_visible,
            slots: vec![None; capacity as usize],
        });
        Ok(heap_handle(key))
    }

    fn destroy_descriptor_heap(&self, heap: DescriptorHeapHandle) {
        if lock(&self.state).heaps.remove(heap_key(heap)).is_none() {
            log::warn!("Destroying unknown descriptor heap {:#x}", heap.0);
        }
    }

    fn create_render_target_view(&self, heap: DescriptorHeapHandle, slot: u32, image: GpuImageHandle) -> GpuResult<()> {
        self.write_descriptor(heap, slot, DescriptorKind::RenderTarget, Descriptor::View(image))
    }

    fn create_shader_resource_view(&self, heap: DescriptorHeapHandle, slot: u32, image: GpuImageHandle) -> GpuResult<()> {
        self.write_descriptor(heap, slot, DescriptorKind::ShaderResource, Descriptor::View(image))
    }

    fn create_sampler(&self, heap: DescriptorHeapHandle, slot: u32, desc: &SamplerDesc) -> GpuResult<()> {
        self.write_descriptor(heap, slot, DescriptorKind::Sampler, Descriptor::Sampler(*desc))
    }

    fn create_fence(&self, initial_value: u64) -> GpuResult<Arc<dyn GpuFence>> {
        Ok(Arc::new(HeadlessFence::new(initial_value)))
    }

    fn create_root_signature(&self, desc: &RootSignatureDesc) -> GpuResult<RootSignatureHandle> {
        let key = lock(&self.state).root_signatures.insert(desc.clone());
        Ok(root_signature_handle(key))
    }

    fn destroy_root_signature(&self, root_signature: RootSignatureHandle) {
        lock(&self.state).root_signatures.remove(root_signature_key(root_signature));
    }

    fn create_pipeline(&self, desc: &PipelineDesc) -> GpuResult<PipelineHandle> {
        let builtin = matches!(desc.vertex_shader, ShaderBytecode::Builtin(BuiltinShader::LayeringVertex))
            && matches!(desc.pixel_shader, ShaderBytecode::Builtin(BuiltinShader::LayeringPixel));
        if !builtin {
            return Err(GpuError::Unsupported(
                "Software backend only runs the builtin layering program".to_string(),
            ));
        }
        let mut state = lock(&self.state);
        if !state.root_signatures.contains_key(root_signature_key(desc.root_signature)) {
            return Err(GpuError::InvalidHandle { kind: "root signature", id: desc.root_signature.0 });
        }
        Ok(pipeline_handle(state.pipelines.insert(desc.clone())))
    }

    fn destroy_pipeline(&self, pipeline: PipelineHandle) {
        lock(&self.state).pipelines.remove(pipeline_key(pipeline));
    }

    fn queue(&self) -> Arc<dyn CommandQueue> {
        self.queue.clone()
    }

    fn create_swap_chain(&self, desc: &SwapChainDesc) -> GpuResult<Box<dyn PresentationSwapChain>> {
        if desc.buffer_count == 0 {
            return Err(GpuError::InvalidOperation { reason: "Swap chain needs a back buffer".to_string() });
        }
        let image_desc = ImageDesc {
            width: desc.width,
            height: desc.height,
            format: desc.format,
            flags: ResourceFlags::ALLOW_RENDER_TARGET,
            initial_state: ResourceState::PRESENT,
        };
        let mut state = lock(&self.state);
        let mut buffers = Vec::with_capacity(desc.buffer_count as usize);
        for i in 0..desc.buffer_count {
            match Self::allocate_image(&mut state, &image_desc, &format!("{} Back Buffer {i}", desc.title)) {
                Ok(buffer) => buffers.push(buffer),
                Err(err) => {
                    for buffer in buffers {
                        if let Some(image) = state.images.remove(image_key(buffer)) {
                            state.memory_used = state.memory_used.saturating_sub(image.desc.size_in_bytes());
                        }
                    }
                    return Err(err);
                }
            }
        }
        drop(state);
        log::info!("Created offscreen swap chain {}x{} with {} buffers", desc.width, desc.height, desc.buffer_count);
        Ok(Box::new(HeadlessSwapChain::new(
            Arc::clone(&self.state),
            Arc::clone(&self.queue),
            buffers,
            (desc.width, desc.height),
            desc.format,
        )))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::{CommandList, Timeout};
    use std::time::Duration;

    fn image_desc(width: u32, height: u32) -> ImageDesc {
        ImageDesc {
            width,
            height,
            format: Format::Rgba8Unorm,
            flags: ResourceFlags::ALLOW_RENDER_TARGET,
            initial_state: ResourceState::PIXEL_SHADER_RESOURCE,
        }
    }

    #[test]
    fn test_memory_budget() {
        let device = HeadlessDevice::with_memory_budget(64).unwrap();
        let first = device.create_image(&image_desc(4, 4), "first").unwrap();
        assert_eq!(device.memory_used(), 64);
        assert!(matches!(
            device.create_image(&image_desc(1, 1), "second"),
            Err(GpuError::OutOfMemory { requested: 4 })
        ));
        device.destroy_image(first);
        assert_eq!(device.memory_used(), 0);
        device.create_image(&image_desc(1, 1), "third").unwrap();
    }

    #[test]
    fn test_descriptor_kind_is_checked() {
        let device = HeadlessDevice::new().unwrap();
        let image = device.create_image(&image_desc(2, 2), "img").unwrap();
        let srv_heap = device.create_descriptor_heap(DescriptorKind::ShaderResource, 1, true).unwrap();
        assert!(device.create_render_target_view(srv_heap, 0, image).is_err());
        device.create_shader_resource_view(srv_heap, 0, image).unwrap();
        assert!(device.create_shader_resource_view(srv_heap, 1, image).is_err());
        assert!(device.create_descriptor_heap(DescriptorKind::RenderTarget, 1, true).is_err());
    }

    #[test]
    fn test_signal_is_ordered_after_execution() {
        let device = HeadlessDevice::new().unwrap();
        let queue = device.queue();
        let fence = device.create_fence(0).unwrap();
        device.headless_queue().pause();

        let mut list = CommandList::new("noop");
        list.reset().unwrap();
        list.close().unwrap();
        queue.execute(&list).unwrap();
        queue.signal(&fence, 1).unwrap();

        assert!(!fence.wait(1, Timeout::After(Duration::from_millis(5))).unwrap());
        device.headless_queue().resume();
        assert!(fence.wait(1, Timeout::Infinite).unwrap());
    }

    #[test]
    fn test_open_list_is_rejected() {
        let device = HeadlessDevice::new().unwrap();
        let mut list = CommandList::new("open");
        list.reset().unwrap();
        assert!(device.queue().execute(&list).is_err());
    }

    #[test]
    fn test_barrier_mismatch_is_recorded() {
        let device = HeadlessDevice::new().unwrap();
        let image = device.create_image(&image_desc(1, 1), "img").unwrap();
        let mut list = CommandList::new("barriers");
        list.reset().unwrap();
        list.resource_barrier(image, ResourceState::COPY_DEST, ResourceState::RENDER_TARGET);
        list.close().unwrap();
        device.queue().execute(&list).unwrap();
        device.queue().wait_idle().unwrap();

        assert_eq!(device.validation_errors().len(), 1);
        assert_eq!(device.image_state(image).unwrap(), ResourceState::RENDER_TARGET);
    }

    #[test]
    fn test_swap_chain_present_captures_back_buffer() {
        let device = HeadlessDevice::new().unwrap();
        let mut swap_chain = device
            .create_swap_chain(&SwapChainDesc {
                width: 2,
                height: 2,
                format: Format::Rgba8Unorm,
                buffer_count: 2,
                title: "test".to_string(),
            })
            .unwrap();
        let first = swap_chain.back_buffers()[0];
        device.fill(first, [0.0, 1.0, 0.0, 1.0]).unwrap();

        assert_eq!(swap_chain.current_back_buffer_index(), 0);
        swap_chain.present(1).unwrap();
        assert_eq!(swap_chain.current_back_buffer_index(), 1);
        device.queue().wait_idle().unwrap();

        let frame = device.last_presented().unwrap();
        assert_eq!(frame.image, first);
        assert_eq!(frame.texel(1, 1), [0.0, 1.0, 0.0, 1.0]);
        assert_eq!(device.present_count(), 1);

        drop(swap_chain);
        assert_eq!(device.image_count(), 0);
    }
}
