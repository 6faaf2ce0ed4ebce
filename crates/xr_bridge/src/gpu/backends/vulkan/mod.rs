//! Vulkan GPU backend
//!
//! Maps the device abstraction onto Vulkan 1.3: fences are timeline
//! semaphores, descriptor heaps are descriptor pools, root signatures are
//! pipeline layouts and render passes are dynamic rendering scopes. The
//! mirror window is created through GLFW.

mod context;
mod fence;
mod pipeline;
mod queue;
mod resources;
mod surface;

use std::any::Any;
use std::sync::Arc;

use ash::vk;

pub use context::{enumerate_adapters, VulkanContext};
pub use fence::VulkanFence;
pub use queue::VulkanQueue;
pub use surface::VulkanSwapChain;

use crate::gpu::{
    AdapterInfo, CommandQueue, DescriptorHeapHandle, DescriptorKind, Format, GpuFence, GpuImageHandle, GpuResult,
    GraphicsApi, GraphicsDevice, ImageDesc, PipelineDesc, PipelineHandle, PresentationSwapChain, RootSignatureDesc,
    RootSignatureHandle, SamplerDesc, ShaderLanguage, SwapChainDesc,
};

use resources::{layout_handle, layout_key, pipeline_handle, pipeline_key, vk_format, Shared};

/// Formats offered to applications, in preference order
const CANDIDATE_FORMATS: [Format; 4] =
    [Format::Rgba8Unorm, Format::Rgba8UnormSrgb, Format::Bgra8Unorm, Format::Bgra8UnormSrgb];

/// Vulkan graphics device
pub struct VulkanDevice {
    shared: Arc<Shared>,
    queue: Arc<VulkanQueue>,
}

impl VulkanDevice {
    /// Create a device on the best adapter that can present to a window
    pub fn new(app_name: &str) -> GpuResult<Self> {
        let context = VulkanContext::new(app_name)?;
        let shared = Arc::new(Shared::new(context)?);
        let queue = Arc::new(VulkanQueue::new(Arc::clone(&shared))?);
        Ok(Self { shared, queue })
    }

    /// Context the device was created from
    pub fn context(&self) -> &VulkanContext {
        &self.shared.context
    }

    fn format_usable(&self, format: Format) -> bool {
        let context = &self.shared.context;
        let properties = unsafe {
            context
                .instance()
                .get_physical_device_format_properties(context.physical_device(), vk_format(format))
        };
        properties
            .optimal_tiling_features
            .contains(vk::FormatFeatureFlags::COLOR_ATTACHMENT | vk::FormatFeatureFlags::SAMPLED_IMAGE)
    }
}

impl GraphicsDevice for VulkanDevice {
    fn api(&self) -> GraphicsApi {
        GraphicsApi::Vulkan
    }

    fn adapter(&self) -> AdapterInfo {
        self.shared.context.adapter().clone()
    }

    fn shader_language(&self) -> ShaderLanguage {
        ShaderLanguage::SpirV
    }

    fn supported_swapchain_formats(&self) -> Vec<Format> {
        CANDIDATE_FORMATS.into_iter().filter(|&format| self.format_usable(format)).collect()
    }

    fn create_image(&self, desc: &ImageDesc, label: &str) -> GpuResult<GpuImageHandle> {
        self.shared.create_image(desc, label)
    }

    fn destroy_image(&self, image: GpuImageHandle) {
        self.shared.destroy_image(image);
    }

    fn create_descriptor_heap(
        &self,
        kind: DescriptorKind,
        capacity: u32,
        _shader_visible: bool,
    ) -> GpuResult<DescriptorHeapHandle> {
        self.shared.create_heap(kind, capacity)
    }

    fn destroy_descriptor_heap(&self, heap: DescriptorHeapHandle) {
        self.shared.destroy_heap(heap);
    }

    fn create_render_target_view(&self, heap: DescriptorHeapHandle, slot: u32, image: GpuImageHandle) -> GpuResult<()> {
        self.shared.write_render_target(heap, slot, image)
    }

    fn create_shader_resource_view(&self, heap: DescriptorHeapHandle, slot: u32, image: GpuImageHandle) -> GpuResult<()> {
        self.shared.write_shader_resource(heap, slot, image)
    }

    fn create_sampler(&self, heap: DescriptorHeapHandle, slot: u32, desc: &SamplerDesc) -> GpuResult<()> {
        self.shared.write_sampler(heap, slot, desc)
    }

    fn create_fence(&self, initial_value: u64) -> GpuResult<Arc<dyn GpuFence>> {
        Ok(Arc::new(VulkanFence::new(Arc::clone(&self.shared), initial_value)?))
    }

    fn create_root_signature(&self, desc: &RootSignatureDesc) -> GpuResult<RootSignatureHandle> {
        let layout = pipeline::create_layout(&self.shared, desc)?;
        Ok(layout_handle(self.shared.resources().layouts.insert(layout)))
    }

    fn destroy_root_signature(&self, root_signature: RootSignatureHandle) {
        match self.shared.resources().layouts.remove(layout_key(root_signature)) {
            Some(layout) => unsafe { self.shared.device().destroy_pipeline_layout(layout, None) },
            None => log::warn!("Destroying unknown root signature {:#x}", root_signature.0),
        }
    }

    fn create_pipeline(&self, desc: &PipelineDesc) -> GpuResult<PipelineHandle> {
        let layout = self.shared.resources().layout(desc.root_signature)?;
        let pipeline = pipeline::create_pipeline(&self.shared, desc, layout)?;
        Ok(pipeline_handle(self.shared.resources().pipelines.insert(pipeline)))
    }

    fn destroy_pipeline(&self, pipeline: PipelineHandle) {
        match self.shared.resources().pipelines.remove(pipeline_key(pipeline)) {
            Some(pipeline) => unsafe { self.shared.device().destroy_pipeline(pipeline, None) },
            None => log::warn!("Destroying unknown pipeline {:#x}", pipeline.0),
        }
    }

    fn queue(&self) -> Arc<dyn CommandQueue> {
        Arc::clone(&self.queue) as Arc<dyn CommandQueue>
    }

    fn create_swap_chain(&self, desc: &SwapChainDesc) -> GpuResult<Box<dyn PresentationSwapChain>> {
        let chain = VulkanSwapChain::new(Arc::clone(&self.shared), Arc::clone(&self.queue), desc)?;
        Ok(Box::new(chain))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
