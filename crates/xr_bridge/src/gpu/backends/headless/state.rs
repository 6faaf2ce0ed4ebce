//! Resource tables shared by the device, the queue thread and swap chains

use std::sync::{Mutex, MutexGuard, PoisonError};

use slotmap::{Key, KeyData, SlotMap};

use crate::gpu::{
    DescriptorHeapHandle, DescriptorKind, GpuError, GpuImageHandle, GpuResult, ImageDesc, PipelineDesc,
    PipelineHandle, ResourceState, RootSignatureDesc, RootSignatureHandle, SamplerDesc,
};

slotmap::new_key_type! {
    pub(crate) struct ImageKey;
    pub(crate) struct HeapKey;
    pub(crate) struct RootSignatureKey;
    pub(crate) struct PipelineKey;
}

/// RGBA texel in linear float
pub type Texel = [f32; 4];

pub(crate) struct SoftwareImage {
    pub desc: ImageDesc,
    pub label: String,
    pub state: ResourceState,
    pub texels: Vec<Texel>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Descriptor {
    View(GpuImageHandle),
    Sampler(SamplerDesc),
}

pub(crate) struct DescriptorHeap {
    pub kind: DescriptorKind,
    pub shader_visible: bool,
    pub slots: Vec<Option<Descriptor>>,
}

/// A frame captured when a back buffer was presented
#[derive(Debug, Clone, PartialEq)]
pub struct PresentedFrame {
    /// Back buffer that was presented
    pub image: GpuImageHandle,
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Row-major texels
    pub texels: Vec<Texel>,
}

impl PresentedFrame {
    /// Texel at `(x, y)`
    pub fn texel(&self, x: u32, y: u32) -> Texel {
        self.texels[(y * self.width + x) as usize]
    }
}

#[derive(Default)]
pub(crate) struct DeviceState {
    pub images: SlotMap<ImageKey, SoftwareImage>,
    pub heaps: SlotMap<HeapKey, DescriptorHeap>,
    pub root_signatures: SlotMap<RootSignatureKey, RootSignatureDesc>,
    pub pipelines: SlotMap<PipelineKey, PipelineDesc>,
    pub memory_used: u64,
    pub memory_budget: Option<u64>,
    pub validation_errors: Vec<String>,
    pub last_presented: Option<PresentedFrame>,
    pub present_count: u64,
}

pub(crate) fn lock(state: &Mutex<DeviceState>) -> MutexGuard<'_, DeviceState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn image_key(handle: GpuImageHandle) -> ImageKey {
    KeyData::from_ffi(handle.0).into()
}

pub(crate) fn image_handle(key: ImageKey) -> GpuImageHandle {
    GpuImageHandle(key.data().as_ffi())
}

pub(crate) fn heap_key(handle: DescriptorHeapHandle) -> HeapKey {
    KeyData::from_ffi(handle.0).into()
}

pub(crate) fn heap_handle(key: HeapKey) -> DescriptorHeapHandle {
    DescriptorHeapHandle(key.data().as_ffi())
}

pub(crate) fn root_signature_key(handle: RootSignatureHandle) -> RootSignatureKey {
    KeyData::from_ffi(handle.0).into()
}

pub(crate) fn root_signature_handle(key: RootSignatureKey) -> RootSignatureHandle {
    RootSignatureHandle(key.data().as_ffi())
}

pub(crate) fn pipeline_key(handle: PipelineHandle) -> PipelineKey {
    KeyData::from_ffi(handle.0).into()
}

pub(crate) fn pipeline_handle(key: PipelineKey) -> PipelineHandle {
    PipelineHandle(key.data().as_ffi())
}

impl DeviceState {
    pub fn image(&self, handle: GpuImageHandle) -> GpuResult<&SoftwareImage> {
        self.images
            .get(image_key(handle))
            .ok_or(GpuError::InvalidHandle { kind: "image", id: handle.0 })
    }

    pub fn image_mut(&mut self, handle: GpuImageHandle) -> GpuResult<&mut SoftwareImage> {
        self.images
            .get_mut(image_key(handle))
            .ok_or(GpuError::InvalidHandle { kind: "image", id: handle.0 })
    }

    pub fn heap(&self, handle: DescriptorHeapHandle) -> GpuResult<&DescriptorHeap> {
        self.heaps
            .get(heap_key(handle))
            .ok_or(GpuError::InvalidHandle { kind: "descriptor heap", id: handle.0 })
    }

    pub fn heap_mut(&mut self, handle: DescriptorHeapHandle) -> GpuResult<&mut DescriptorHeap> {
        self.heaps
            .get_mut(heap_key(handle))
            .ok_or(GpuError::InvalidHandle { kind: "descriptor heap", id: handle.0 })
    }

    /// Descriptor stored at `heap[slot]`
    pub fn descriptor(&self, heap: DescriptorHeapHandle, slot: u32) -> GpuResult<Descriptor> {
        self.heap(heap)?
            .slots
            .get(slot as usize)
            .copied()
            .flatten()
            .ok_or_else(|| GpuError::InvalidOperation {
                reason: format!("Descriptor heap {:#x} slot {slot} is empty", heap.0),
            })
    }

    /// Image viewed by `heap[slot]`
    pub fn view_image(&self, heap: DescriptorHeapHandle, slot: u32) -> GpuResult<GpuImageHandle> {
        match self.descriptor(heap, slot)? {
            Descriptor::View(image) => Ok(image),
            Descriptor::Sampler(_) => Err(GpuError::InvalidOperation {
                reason: format!("Descriptor heap {:#x} slot {slot} holds a sampler", heap.0),
            }),
        }
    }

    pub fn record_validation_error(&mut self, message: String) {
        log::error!("[SOFTWARE GPU] {message}");
        self.validation_errors.push(message);
    }
}
