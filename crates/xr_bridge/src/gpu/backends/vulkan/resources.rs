//! Images, descriptor heaps and the tables that own them
//!
//! Descriptor heaps map onto descriptor pools: a shader resource or sampler
//! heap of N slots is N single-binding sets, so binding slot `i` is binding
//! set `i`. Render target heaps only remember which image each slot names.

use std::sync::{Mutex, MutexGuard, PoisonError};

use ash::vk;
use slotmap::{new_key_type, Key, KeyData, SlotMap};

use crate::gpu::types::Filter;
use crate::gpu::{
    DescriptorHeapHandle, DescriptorKind, Format, GpuError, GpuImageHandle, GpuResult, ImageDesc, PipelineHandle,
    ResourceFlags, ResourceState, RootSignatureHandle, SamplerDesc,
};

use super::context::{api_error, VulkanContext};

new_key_type! {
    pub(crate) struct ImageKey;
    pub(crate) struct HeapKey;
    pub(crate) struct LayoutKey;
    pub(crate) struct PipelineKey;
}

macro_rules! handle_conversions {
    ($key:ty, $handle:ident, $to_key:ident, $to_handle:ident) => {
        pub(crate) fn $to_key(handle: $handle) -> $key {
            KeyData::from_ffi(handle.0).into()
        }

        pub(crate) fn $to_handle(key: $key) -> $handle {
            $handle(key.data().as_ffi())
        }
    };
}

handle_conversions!(ImageKey, GpuImageHandle, image_key, image_handle);
handle_conversions!(HeapKey, DescriptorHeapHandle, heap_key, heap_handle);
handle_conversions!(LayoutKey, RootSignatureHandle, layout_key, layout_handle);
handle_conversions!(PipelineKey, PipelineHandle, pipeline_key, pipeline_handle);

/// Vulkan format for a runtime format
pub(crate) const fn vk_format(format: Format) -> vk::Format {
    match format {
        Format::Rgba8Unorm => vk::Format::R8G8B8A8_UNORM,
        Format::Rgba8UnormSrgb => vk::Format::R8G8B8A8_SRGB,
        Format::Bgra8Unorm => vk::Format::B8G8R8A8_UNORM,
        Format::Bgra8UnormSrgb => vk::Format::B8G8R8A8_SRGB,
    }
}

/// Layout an image in `state` is kept in
///
/// The common state doubles as the present state, so it depends on whether
/// the image belongs to a window swap chain.
pub(crate) fn image_layout(state: ResourceState, presentable: bool) -> vk::ImageLayout {
    if state.contains(ResourceState::RENDER_TARGET) {
        vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL
    } else if state.contains(ResourceState::PIXEL_SHADER_RESOURCE) {
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL
    } else if state.contains(ResourceState::COPY_DEST) {
        vk::ImageLayout::TRANSFER_DST_OPTIMAL
    } else if state.contains(ResourceState::COPY_SOURCE) {
        vk::ImageLayout::TRANSFER_SRC_OPTIMAL
    } else if state.contains(ResourceState::DEPTH_WRITE) {
        vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL
    } else if presentable {
        vk::ImageLayout::PRESENT_SRC_KHR
    } else {
        vk::ImageLayout::GENERAL
    }
}

pub(crate) const COLOR_RANGE: vk::ImageSubresourceRange = vk::ImageSubresourceRange {
    aspect_mask: vk::ImageAspectFlags::COLOR,
    base_mip_level: 0,
    level_count: 1,
    base_array_layer: 0,
    layer_count: 1,
};

/// Full barrier between two layouts of a color image
pub(crate) fn layout_barrier(image: vk::Image, old: vk::ImageLayout, new: vk::ImageLayout) -> vk::ImageMemoryBarrier {
    vk::ImageMemoryBarrier::builder()
        .old_layout(old)
        .new_layout(new)
        .src_access_mask(vk::AccessFlags::MEMORY_WRITE)
        .dst_access_mask(vk::AccessFlags::MEMORY_READ | vk::AccessFlags::MEMORY_WRITE)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(COLOR_RANGE)
        .build()
}

pub(crate) struct VulkanImage {
    pub image: vk::Image,
    /// `None` for swap chain images, which the swap chain owns
    pub memory: Option<vk::DeviceMemory>,
    pub view: vk::ImageView,
    pub desc: ImageDesc,
    pub label: String,
    pub presentable: bool,
}

pub(crate) enum HeapSlots {
    RenderTargets(Vec<Option<GpuImageHandle>>),
    Sets {
        pool: vk::DescriptorPool,
        sets: Vec<vk::DescriptorSet>,
        samplers: Vec<Option<vk::Sampler>>,
    },
}

pub(crate) struct VulkanHeap {
    pub kind: DescriptorKind,
    pub slots: HeapSlots,
}

impl VulkanHeap {
    pub fn set(&self, slot: u32) -> GpuResult<vk::DescriptorSet> {
        match &self.slots {
            HeapSlots::Sets { sets, .. } => sets.get(slot as usize).copied().ok_or_else(|| GpuError::InvalidOperation {
                reason: format!("Slot {slot} out of range for {:?} heap", self.kind),
            }),
            HeapSlots::RenderTargets(_) => Err(GpuError::InvalidOperation {
                reason: "Render target heaps hold no descriptor sets".to_string(),
            }),
        }
    }

    pub fn render_target(&self, slot: u32) -> GpuResult<GpuImageHandle> {
        match &self.slots {
            HeapSlots::RenderTargets(slots) => slots.get(slot as usize).copied().flatten().ok_or_else(|| {
                GpuError::InvalidOperation { reason: format!("Render target slot {slot} is empty") }
            }),
            HeapSlots::Sets { .. } => Err(GpuError::InvalidOperation {
                reason: format!("{:?} heap bound as render target", self.kind),
            }),
        }
    }
}

#[derive(Default)]
pub(crate) struct ResourceTables {
    pub images: SlotMap<ImageKey, VulkanImage>,
    pub heaps: SlotMap<HeapKey, VulkanHeap>,
    pub layouts: SlotMap<LayoutKey, vk::PipelineLayout>,
    pub pipelines: SlotMap<PipelineKey, vk::Pipeline>,
}

impl ResourceTables {
    pub fn image(&self, handle: GpuImageHandle) -> GpuResult<&VulkanImage> {
        self.images.get(image_key(handle)).ok_or(GpuError::InvalidHandle { kind: "image", id: handle.0 })
    }

    pub fn heap(&self, handle: DescriptorHeapHandle) -> GpuResult<&VulkanHeap> {
        self.heaps.get(heap_key(handle)).ok_or(GpuError::InvalidHandle { kind: "descriptor heap", id: handle.0 })
    }

    pub fn layout(&self, handle: RootSignatureHandle) -> GpuResult<vk::PipelineLayout> {
        self.layouts
            .get(layout_key(handle))
            .copied()
            .ok_or(GpuError::InvalidHandle { kind: "root signature", id: handle.0 })
    }

    pub fn pipeline(&self, handle: PipelineHandle) -> GpuResult<vk::Pipeline> {
        self.pipelines
            .get(pipeline_key(handle))
            .copied()
            .ok_or(GpuError::InvalidHandle { kind: "pipeline", id: handle.0 })
    }
}

/// Device state shared by the device, its queue, fences and swap chains
///
/// Field order matters on drop: tables and layouts go before the context.
pub(crate) struct Shared {
    resources: Mutex<ResourceTables>,
    pub srv_layout: vk::DescriptorSetLayout,
    pub sampler_layout: vk::DescriptorSetLayout,
    pub context: VulkanContext,
}

impl Shared {
    pub fn new(context: VulkanContext) -> GpuResult<Self> {
        let srv_layout = create_set_layout(&context, vk::DescriptorType::SAMPLED_IMAGE)?;
        let sampler_layout = match create_set_layout(&context, vk::DescriptorType::SAMPLER) {
            Ok(layout) => layout,
            Err(err) => {
                unsafe { context.device().destroy_descriptor_set_layout(srv_layout, None) };
                return Err(err);
            }
        };
        Ok(Self { resources: Mutex::new(ResourceTables::default()), srv_layout, sampler_layout, context })
    }

    pub fn resources(&self) -> MutexGuard<'_, ResourceTables> {
        self.resources.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn device(&self) -> &ash::Device {
        self.context.device()
    }

    /// Allocate, bind and view an image, then move it to its initial layout
    pub fn create_image(&self, desc: &ImageDesc, label: &str) -> GpuResult<GpuImageHandle> {
        if desc.width == 0 || desc.height == 0 {
            return Err(GpuError::InvalidOperation { reason: format!("Image '{label}' has zero size") });
        }
        let device = self.device();
        let mut usage = vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_SRC | vk::ImageUsageFlags::TRANSFER_DST;
        if desc.flags.contains(ResourceFlags::ALLOW_RENDER_TARGET) {
            usage |= vk::ImageUsageFlags::COLOR_ATTACHMENT;
        }
        if desc.flags.contains(ResourceFlags::ALLOW_UNORDERED_ACCESS) {
            usage |= vk::ImageUsageFlags::STORAGE;
        }
        let image_info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::TYPE_2D)
            .format(vk_format(desc.format))
            .extent(vk::Extent3D { width: desc.width, height: desc.height, depth: 1 })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);
        let image = unsafe { device.create_image(&image_info, None) }.map_err(api_error("vkCreateImage"))?;

        let memory = match self.bind_memory(image) {
            Ok(memory) => memory,
            Err(err) => {
                unsafe { device.destroy_image(image, None) };
                return Err(err);
            }
        };
        let view = match create_view(device, image, desc.format) {
            Ok(view) => view,
            Err(err) => unsafe {
                device.destroy_image(image, None);
                device.free_memory(memory, None);
                return Err(err);
            },
        };

        let initial = image_layout(desc.initial_state, false);
        let transitioned = self.context.immediate_submit(|cmd| unsafe {
            device.cmd_pipeline_barrier(
                cmd,
                vk::PipelineStageFlags::TOP_OF_PIPE,
                vk::PipelineStageFlags::ALL_COMMANDS,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[layout_barrier(image, vk::ImageLayout::UNDEFINED, initial)],
            );
        });
        if let Err(err) = transitioned {
            unsafe {
                device.destroy_image_view(view, None);
                device.destroy_image(image, None);
                device.free_memory(memory, None);
            }
            return Err(err);
        }

        let key = self.resources().images.insert(VulkanImage {
            image,
            memory: Some(memory),
            view,
            desc: desc.clone(),
            label: label.to_string(),
            presentable: false,
        });
        log::trace!("Created image '{label}' {}x{} {:?}", desc.width, desc.height, desc.format);
        Ok(image_handle(key))
    }

    fn bind_memory(&self, image: vk::Image) -> GpuResult<vk::DeviceMemory> {
        let device = self.device();
        let requirements = unsafe { device.get_image_memory_requirements(image) };
        let memory_type = self
            .context
            .find_memory_type(requirements.memory_type_bits, vk::MemoryPropertyFlags::DEVICE_LOCAL)?;
        let alloc_info = vk::MemoryAllocateInfo::builder()
            .allocation_size(requirements.size)
            .memory_type_index(memory_type);
        let memory = unsafe { device.allocate_memory(&alloc_info, None) }.map_err(|err| match err {
            vk::Result::ERROR_OUT_OF_DEVICE_MEMORY | vk::Result::ERROR_OUT_OF_HOST_MEMORY => {
                GpuError::OutOfMemory { requested: requirements.size }
            }
            other => api_error("vkAllocateMemory")(other),
        })?;
        if let Err(err) = unsafe { device.bind_image_memory(image, memory, 0) } {
            unsafe { device.free_memory(memory, None) };
            return Err(api_error("vkBindImageMemory")(err));
        }
        Ok(memory)
    }

    /// Register a swap chain image the swap chain itself owns
    pub fn register_swap_chain_image(&self, image: vk::Image, desc: ImageDesc, label: String) -> GpuResult<GpuImageHandle> {
        let view = create_view(self.device(), image, desc.format)?;
        let key = self.resources().images.insert(VulkanImage {
            image,
            memory: None,
            view,
            desc,
            label,
            presentable: true,
        });
        Ok(image_handle(key))
    }

    pub fn destroy_image(&self, handle: GpuImageHandle) {
        let Some(image) = self.resources().images.remove(image_key(handle)) else {
            log::warn!("Destroying unknown image {:#x}", handle.0);
            return;
        };
        release_image(self.device(), &image);
    }

    pub fn create_heap(&self, kind: DescriptorKind, capacity: u32) -> GpuResult<DescriptorHeapHandle> {
        let slots = match kind {
            DescriptorKind::RenderTarget => HeapSlots::RenderTargets(vec![None; capacity as usize]),
            DescriptorKind::ShaderResource | DescriptorKind::Sampler => {
                let (ty, layout) = if kind == DescriptorKind::Sampler {
                    (vk::DescriptorType::SAMPLER, self.sampler_layout)
                } else {
                    (vk::DescriptorType::SAMPLED_IMAGE, self.srv_layout)
                };
                let device = self.device();
                let sizes = [vk::DescriptorPoolSize { ty, descriptor_count: capacity }];
                let pool_info = vk::DescriptorPoolCreateInfo::builder().pool_sizes(&sizes).max_sets(capacity);
                let pool = unsafe { device.create_descriptor_pool(&pool_info, None) }
                    .map_err(api_error("vkCreateDescriptorPool"))?;
                let layouts = vec![layout; capacity as usize];
                let alloc_info = vk::DescriptorSetAllocateInfo::builder().descriptor_pool(pool).set_layouts(&layouts);
                let sets = match unsafe { device.allocate_descriptor_sets(&alloc_info) } {
                    Ok(sets) => sets,
                    Err(err) => {
                        unsafe { device.destroy_descriptor_pool(pool, None) };
                        return Err(api_error("vkAllocateDescriptorSets")(err));
                    }
                };
                HeapSlots::Sets { pool, sets, samplers: vec![None; capacity as usize] }
            }
        };
        let key = self.resources().heaps.insert(VulkanHeap { kind, slots });
        Ok(heap_handle(key))
    }

    pub fn destroy_heap(&self, handle: DescriptorHeapHandle) {
        let Some(heap) = self.resources().heaps.remove(heap_key(handle)) else {
            log::warn!("Destroying unknown descriptor heap {:#x}", handle.0);
            return;
        };
        release_heap(self.device(), heap);
    }

    pub fn write_render_target(&self, heap: DescriptorHeapHandle, slot: u32, image: GpuImageHandle) -> GpuResult<()> {
        let mut resources = self.resources();
        let target = resources.image(image)?;
        if !target.presentable && !target.desc.flags.contains(ResourceFlags::ALLOW_RENDER_TARGET) {
            return Err(GpuError::InvalidOperation {
                reason: format!("Image '{}' does not allow render target views", target.label),
            });
        }
        let heap = resources.heaps.get_mut(heap_key(heap)).ok_or(GpuError::InvalidHandle {
            kind: "descriptor heap",
            id: heap.0,
        })?;
        match &mut heap.slots {
            HeapSlots::RenderTargets(slots) => {
                let entry = slots.get_mut(slot as usize).ok_or_else(|| GpuError::InvalidOperation {
                    reason: format!("Slot {slot} out of range"),
                })?;
                *entry = Some(image);
                Ok(())
            }
            HeapSlots::Sets { .. } => Err(GpuError::InvalidOperation {
                reason: format!("{:?} heap cannot hold render target views", heap.kind),
            }),
        }
    }

    pub fn write_shader_resource(&self, heap: DescriptorHeapHandle, slot: u32, image: GpuImageHandle) -> GpuResult<()> {
        let resources = self.resources();
        let view = resources.image(image)?.view;
        let target = resources.heap(heap)?;
        if target.kind != DescriptorKind::ShaderResource {
            return Err(GpuError::InvalidOperation {
                reason: format!("{:?} heap cannot hold shader resource views", target.kind),
            });
        }
        let image_info = [vk::DescriptorImageInfo {
            sampler: vk::Sampler::null(),
            image_view: view,
            image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        }];
        let write = vk::WriteDescriptorSet::builder()
            .dst_set(target.set(slot)?)
            .dst_binding(0)
            .descriptor_type(vk::DescriptorType::SAMPLED_IMAGE)
            .image_info(&image_info)
            .build();
        unsafe { self.device().update_descriptor_sets(&[write], &[]) };
        Ok(())
    }

    pub fn write_sampler(&self, heap: DescriptorHeapHandle, slot: u32, desc: &SamplerDesc) -> GpuResult<()> {
        let filter = match desc.filter {
            Filter::Point => vk::Filter::NEAREST,
            Filter::Linear => vk::Filter::LINEAR,
        };
        let address_mode = if desc.clamp_to_edge {
            vk::SamplerAddressMode::CLAMP_TO_EDGE
        } else {
            vk::SamplerAddressMode::REPEAT
        };
        let sampler_info = vk::SamplerCreateInfo::builder()
            .mag_filter(filter)
            .min_filter(filter)
            .address_mode_u(address_mode)
            .address_mode_v(address_mode)
            .address_mode_w(address_mode)
            .max_lod(0.0);

        let mut resources = self.resources();
        let heap = resources.heaps.get_mut(heap_key(heap)).ok_or(GpuError::InvalidHandle {
            kind: "descriptor heap",
            id: heap.0,
        })?;
        let (HeapSlots::Sets { sets, samplers, .. }, DescriptorKind::Sampler) = (&mut heap.slots, heap.kind) else {
            return Err(GpuError::InvalidOperation { reason: format!("{:?} heap cannot hold samplers", heap.kind) });
        };
        let (Some(&set), Some(entry)) = (sets.get(slot as usize), samplers.get_mut(slot as usize)) else {
            return Err(GpuError::InvalidOperation { reason: format!("Slot {slot} out of range") });
        };

        let device = self.context.device();
        let sampler = unsafe { device.create_sampler(&sampler_info, None) }.map_err(api_error("vkCreateSampler"))?;
        let image_info = [vk::DescriptorImageInfo {
            sampler,
            image_view: vk::ImageView::null(),
            image_layout: vk::ImageLayout::UNDEFINED,
        }];
        let write = vk::WriteDescriptorSet::builder()
            .dst_set(set)
            .dst_binding(0)
            .descriptor_type(vk::DescriptorType::SAMPLER)
            .image_info(&image_info)
            .build();
        unsafe { device.update_descriptor_sets(&[write], &[]) };
        if let Some(old) = entry.replace(sampler) {
            unsafe { device.destroy_sampler(old, None) };
        }
        Ok(())
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        if let Err(err) = self.context.wait_queue_idle() {
            log::warn!("Releasing Vulkan resources without an idle queue: {err}");
        }
        let resources = std::mem::take(self.resources.get_mut().unwrap_or_else(PoisonError::into_inner));
        let device = self.context.device();
        let leaked = resources.images.len() + resources.heaps.len();
        if leaked > 0 {
            log::warn!("{leaked} Vulkan images and heaps still alive at device teardown");
        }
        for (_, image) in resources.images {
            release_image(device, &image);
        }
        for (_, heap) in resources.heaps {
            release_heap(device, heap);
        }
        unsafe {
            for (_, pipeline) in resources.pipelines {
                device.destroy_pipeline(pipeline, None);
            }
            for (_, layout) in resources.layouts {
                device.destroy_pipeline_layout(layout, None);
            }
            device.destroy_descriptor_set_layout(self.sampler_layout, None);
            device.destroy_descriptor_set_layout(self.srv_layout, None);
        }
    }
}

fn create_set_layout(context: &VulkanContext, ty: vk::DescriptorType) -> GpuResult<vk::DescriptorSetLayout> {
    let bindings = [vk::DescriptorSetLayoutBinding::builder()
        .binding(0)
        .descriptor_type(ty)
        .descriptor_count(1)
        .stage_flags(vk::ShaderStageFlags::FRAGMENT)
        .build()];
    let info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(&bindings);
    unsafe { context.device().create_descriptor_set_layout(&info, None) }.map_err(api_error("vkCreateDescriptorSetLayout"))
}

fn create_view(device: &ash::Device, image: vk::Image, format: Format) -> GpuResult<vk::ImageView> {
    let info = vk::ImageViewCreateInfo::builder()
        .image(image)
        .view_type(vk::ImageViewType::TYPE_2D)
        .format(vk_format(format))
        .subresource_range(COLOR_RANGE);
    unsafe { device.create_image_view(&info, None) }.map_err(api_error("vkCreateImageView"))
}

fn release_image(device: &ash::Device, image: &VulkanImage) {
    unsafe {
        device.destroy_image_view(image.view, None);
        if let Some(memory) = image.memory {
            device.destroy_image(image.image, None);
            device.free_memory(memory, None);
        }
    }
}

fn release_heap(device: &ash::Device, heap: VulkanHeap) {
    if let HeapSlots::Sets { pool, samplers, .. } = heap.slots {
        unsafe {
            for sampler in samplers.into_iter().flatten() {
                device.destroy_sampler(sampler, None);
            }
            device.destroy_descriptor_pool(pool, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_common_state_layout_depends_on_presentability() {
        assert_eq!(image_layout(ResourceState::PRESENT, true), vk::ImageLayout::PRESENT_SRC_KHR);
        assert_eq!(image_layout(ResourceState::PRESENT, false), vk::ImageLayout::GENERAL);
        assert_eq!(image_layout(ResourceState::RENDER_TARGET, true), vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
        assert_eq!(
            image_layout(ResourceState::PIXEL_SHADER_RESOURCE, false),
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL
        );
    }

    #[test]
    fn test_format_mapping_matches_native_codes() {
        use crate::gpu::GraphicsApi;
        for format in [Format::Rgba8Unorm, Format::Rgba8UnormSrgb, Format::Bgra8Unorm, Format::Bgra8UnormSrgb] {
            assert_eq!(i64::from(vk_format(format).as_raw()), format.native_code(GraphicsApi::Vulkan));
        }
    }
}
