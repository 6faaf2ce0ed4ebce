//! GPU abstraction
//!
//! The runtime talks to graphics hardware only through the traits in this
//! module: a [`GraphicsDevice`] that creates resources, a [`CommandQueue`]
//! that executes recorded [`CommandList`]s in submission order, and
//! [`GpuFence`]s whose values the queue signals after prior work completes.
//!
//! Resources are referred to by opaque handles owned by the device.

pub mod backends;
pub mod commands;
pub mod types;

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

pub use commands::{CommandList, CompositionConstants, GpuCommand, Viewport};
pub use types::{
    DescriptorKind, Format, ImageDesc, PipelineDesc, ResourceFlags, ResourceState, RootParameter,
    RootSignatureDesc, SamplerDesc, ShaderBytecode, SwapChainDesc, SwapchainUsageFlags,
};

/// Errors reported by GPU backends
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GpuError {
    /// Memory allocation failed
    #[error("Out of memory: {requested} bytes")]
    OutOfMemory {
        /// Number of bytes that were requested
        requested: u64,
    },

    /// Handle does not name a live resource
    #[error("Invalid {kind} handle {id:#x}")]
    InvalidHandle {
        /// Resource kind
        kind: &'static str,
        /// Raw handle value
        id: u64,
    },

    /// Invalid operation attempted
    #[error("Invalid operation: {reason}")]
    InvalidOperation {
        /// Description of why the operation is invalid
        reason: String,
    },

    /// Native API call failed
    #[error("API error: {0}")]
    Api(String),

    /// Feature not provided by this backend
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// Device was lost or its queue stopped
    #[error("Device lost")]
    DeviceLost,
}

/// Result type for GPU operations
pub type GpuResult<T> = Result<T, GpuError>;

/// Graphics API a device is driven through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GraphicsApi {
    /// CPU backend with an asynchronous queue thread
    Software,
    /// Vulkan backend
    Vulkan,
}

/// Shader form a device consumes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShaderLanguage {
    /// Programs built into the backend
    Builtin,
    /// SPIR-V modules loaded from disk
    SpirV,
}

/// Handle to an image owned by a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GpuImageHandle(pub u64);

/// Handle to a descriptor heap owned by a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DescriptorHeapHandle(pub u64);

/// Handle to a root signature (pipeline layout)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RootSignatureHandle(pub u64);

/// Handle to a graphics pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PipelineHandle(pub u64);

/// Physical adapter description used to choose a device
#[derive(Debug, Clone, PartialEq)]
pub struct AdapterInfo {
    /// Adapter name
    pub name: String,
    /// Stable adapter identifier (LUID or device UUID prefix)
    pub id: u64,
    /// Dedicated video memory in bytes
    pub dedicated_video_memory: u64,
    /// Dedicated system memory in bytes
    pub dedicated_system_memory: u64,
    /// Shared system memory in bytes
    pub shared_system_memory: u64,
}

impl AdapterInfo {
    /// Preference score: dedicated memory counts most, shared memory barely
    pub fn score(&self) -> f64 {
        #[allow(clippy::cast_precision_loss)]
        let (video, system, shared) = (
            self.dedicated_video_memory as f64,
            self.dedicated_system_memory as f64,
            self.shared_system_memory as f64,
        );
        video.mul_add(2.0, system) + shared * 0.1
    }
}

/// Pick the highest-scoring adapter
pub fn select_adapter(adapters: &[AdapterInfo]) -> Option<&AdapterInfo> {
    adapters.iter().max_by(|a, b| a.score().total_cmp(&b.score()))
}

/// Bound on a blocking wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timeout {
    /// Wait until the condition holds
    Infinite,
    /// Give up after this long
    After(Duration),
}

impl Timeout {
    /// Sentinel nanosecond value meaning "wait forever"
    pub const INFINITE_NANOS: i64 = i64::MAX;

    /// Convert an OpenXR duration; non-positive values poll
    pub fn from_nanos(nanos: i64) -> Self {
        if nanos == Self::INFINITE_NANOS {
            Self::Infinite
        } else {
            Self::After(Duration::from_nanos(u64::try_from(nanos).unwrap_or(0)))
        }
    }
}

/// GPU/CPU synchronization primitive with a monotonically increasing value
pub trait GpuFence: Send + Sync {
    /// Highest value the fence has reached
    fn completed_value(&self) -> u64;

    /// Set the fence value from the CPU and wake waiters
    fn signal(&self, value: u64) -> GpuResult<()>;

    /// Block until the fence reaches `value`
    ///
    /// Returns `Ok(false)` if `timeout` expired first.
    fn wait(&self, value: u64, timeout: Timeout) -> GpuResult<bool>;

    /// Downcast to the backend fence type
    fn as_any(&self) -> &dyn Any;
}

/// Ordered command submission
pub trait CommandQueue {
    /// Submit a closed command list for execution
    fn execute(&self, list: &CommandList) -> GpuResult<()>;

    /// Signal `fence` with `value` once all previously submitted work completes
    fn signal(&self, fence: &Arc<dyn GpuFence>, value: u64) -> GpuResult<()>;

    /// Block until every submitted operation has completed
    fn wait_idle(&self) -> GpuResult<()>;
}

/// A physical swap chain bound to a window or offscreen target
pub trait PresentationSwapChain {
    /// Back buffer images, in swap chain order
    fn back_buffers(&self) -> &[GpuImageHandle];

    /// Index of the back buffer to render into next
    fn current_back_buffer_index(&self) -> usize;

    /// Queue the current back buffer for display and advance
    fn present(&mut self, sync_interval: u32) -> GpuResult<()>;

    /// Size in pixels
    fn extent(&self) -> (u32, u32);

    /// Pixel format of the back buffers
    fn format(&self) -> Format;
}

/// Logical graphics device
///
/// All creation calls take `&self`; backends synchronize internally so the
/// queue thread and the application thread can share a device.
pub trait GraphicsDevice {
    /// API this device is driven through
    fn api(&self) -> GraphicsApi;

    /// Adapter the device was created on
    fn adapter(&self) -> AdapterInfo;

    /// Shader form the pipeline factory expects
    fn shader_language(&self) -> ShaderLanguage;

    /// Formats proxy swapchains may use, in preference order
    fn supported_swapchain_formats(&self) -> Vec<Format>;

    /// Allocate an image
    fn create_image(&self, desc: &ImageDesc, label: &str) -> GpuResult<GpuImageHandle>;

    /// Release an image
    fn destroy_image(&self, image: GpuImageHandle);

    /// Allocate a descriptor heap with `capacity` slots
    fn create_descriptor_heap(
        &self,
        kind: DescriptorKind,
        capacity: u32,
        shader_visible: bool,
    ) -> GpuResult<DescriptorHeapHandle>;

    /// Release a descriptor heap
    fn destroy_descriptor_heap(&self, heap: DescriptorHeapHandle);

    /// Write a render target view of `image` into `heap[slot]`
    fn create_render_target_view(&self, heap: DescriptorHeapHandle, slot: u32, image: GpuImageHandle) -> GpuResult<()>;

    /// Write a shader resource view of `image` into `heap[slot]`
    fn create_shader_resource_view(&self, heap: DescriptorHeapHandle, slot: u32, image: GpuImageHandle) -> GpuResult<()>;

    /// Write a sampler into `heap[slot]`
    fn create_sampler(&self, heap: DescriptorHeapHandle, slot: u32, desc: &SamplerDesc) -> GpuResult<()>;

    /// Create a fence starting at `initial_value`
    fn create_fence(&self, initial_value: u64) -> GpuResult<Arc<dyn GpuFence>>;

    /// Create a root signature
    fn create_root_signature(&self, desc: &RootSignatureDesc) -> GpuResult<RootSignatureHandle>;

    /// Release a root signature
    fn destroy_root_signature(&self, root_signature: RootSignatureHandle);

    /// Create a graphics pipeline
    fn create_pipeline(&self, desc: &PipelineDesc) -> GpuResult<PipelineHandle>;

    /// Release a graphics pipeline
    fn destroy_pipeline(&self, pipeline: PipelineHandle);

    /// The device's submission queue
    fn queue(&self) -> Arc<dyn CommandQueue>;

    /// Create the presentation swap chain
    fn create_swap_chain(&self, desc: &SwapChainDesc) -> GpuResult<Box<dyn PresentationSwapChain>>;

    /// Downcast to the concrete backend type
    fn as_any(&self) -> &dyn Any;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adapter(name: &str, video: u64, system: u64, shared: u64) -> AdapterInfo {
        AdapterInfo {
            name: name.to_string(),
            id: 0,
            dedicated_video_memory: video,
            dedicated_system_memory: system,
            shared_system_memory: shared,
        }
    }

    #[test]
    fn test_adapter_selection_prefers_dedicated_memory() {
        let adapters = [
            adapter("integrated", 0, 0, 8 << 30),
            adapter("discrete", 4 << 30, 0, 8 << 30),
        ];
        assert_eq!(select_adapter(&adapters).unwrap().name, "discrete");
        assert!(select_adapter(&[]).is_none());
    }

    #[test]
    fn test_timeout_from_nanos() {
        assert_eq!(Timeout::from_nanos(i64::MAX), Timeout::Infinite);
        assert_eq!(Timeout::from_nanos(0), Timeout::After(Duration::ZERO));
        assert_eq!(Timeout::from_nanos(-5), Timeout::After(Duration::ZERO));
        assert_eq!(Timeout::from_nanos(1_000_000), Timeout::After(Duration::from_millis(1)));
    }
}
