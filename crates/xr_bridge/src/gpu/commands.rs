//! Command list recording
//!
//! A [`CommandList`] is a backend-neutral recording of GPU work. Backends
//! translate it on submission: the software backend interprets it on its
//! queue thread, the Vulkan backend replays it into a command buffer.

use bytemuck::{Pod, Zeroable};

use super::{
    DescriptorHeapHandle, GpuError, GpuImageHandle, GpuResult, PipelineHandle, ResourceState,
    RootSignatureHandle,
};
use crate::foundation::math::Rect2Di;

/// Viewport rectangle in pixels
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    /// Left edge
    pub x: f32,
    /// Top edge
    pub y: f32,
    /// Width
    pub width: f32,
    /// Height
    pub height: f32,
}

impl From<Rect2Di> for Viewport {
    #[allow(clippy::cast_precision_loss)]
    fn from(rect: Rect2Di) -> Self {
        Self {
            x: rect.offset.x as f32,
            y: rect.offset.y as f32,
            width: rect.extent.width as f32,
            height: rect.extent.height as f32,
        }
    }
}

/// Constant block read by the composition shaders
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct CompositionConstants {
    /// Nonzero when the layer ignores source alpha
    pub is_opaque: u32,
    /// Nonzero when color must be multiplied by alpha
    pub multiply_alpha: u32,
    /// Top-left of the sampled region in normalized coordinates
    pub uv_offset: [f32; 2],
    /// Size of the sampled region in normalized coordinates
    pub uv_scale: [f32; 2],
}

impl CompositionConstants {
    /// Number of 32-bit values in the block
    pub const COUNT: u32 = (std::mem::size_of::<Self>() / 4) as u32;

    /// Constants as 32-bit words, the way they are pushed to the GPU
    pub fn as_words(&self) -> &[u32] {
        bytemuck::cast_slice(std::slice::from_ref(self))
    }
}

impl Default for CompositionConstants {
    fn default() -> Self {
        Self { is_opaque: 1, multiply_alpha: 0, uv_offset: [0.0, 0.0], uv_scale: [1.0, 1.0] }
    }
}

/// A single recorded command
#[derive(Debug, Clone, PartialEq)]
pub enum GpuCommand {
    /// Transition an image between states
    ResourceBarrier {
        /// Image to transition
        image: GpuImageHandle,
        /// State the image is in
        before: ResourceState,
        /// State the image moves to
        after: ResourceState,
    },
    /// Bind the render target stored in `heap[slot]`
    SetRenderTarget {
        /// RTV heap
        heap: DescriptorHeapHandle,
        /// Slot in the heap
        slot: u32,
    },
    /// Clear the render target stored in `heap[slot]`
    ClearRenderTarget {
        /// RTV heap
        heap: DescriptorHeapHandle,
        /// Slot in the heap
        slot: u32,
        /// Clear color
        color: [f32; 4],
    },
    /// Set the viewport
    SetViewport(Viewport),
    /// Set the scissor rectangle
    SetScissor(Rect2Di),
    /// Bind the shader-visible heaps
    SetDescriptorHeaps {
        /// SRV heap
        shader_resources: DescriptorHeapHandle,
        /// Sampler heap
        samplers: DescriptorHeapHandle,
    },
    /// Bind the root signature
    SetGraphicsRootSignature(RootSignatureHandle),
    /// Bind the pipeline state
    SetPipelineState(PipelineHandle),
    /// Bind the shader resource view `slot` of the bound SRV heap
    SetShaderResource {
        /// Slot in the bound SRV heap
        slot: u32,
    },
    /// Bind the sampler `slot` of the bound sampler heap
    SetSampler {
        /// Slot in the bound sampler heap
        slot: u32,
    },
    /// Set the inline constants
    SetRootConstants(CompositionConstants),
    /// Draw non-indexed vertices
    DrawInstanced {
        /// Vertices per instance
        vertex_count: u32,
        /// Instances
        instance_count: u32,
    },
}

/// Recorded GPU work awaiting submission
#[derive(Debug, Clone)]
pub struct CommandList {
    label: String,
    commands: Vec<GpuCommand>,
    recording: bool,
}

impl CommandList {
    /// Create a closed, empty list
    pub fn new(label: impl Into<String>) -> Self {
        Self { label: label.into(), commands: Vec::new(), recording: false }
    }

    /// Discard previous contents and start recording
    pub fn reset(&mut self) -> GpuResult<()> {
        if self.recording {
            return Err(GpuError::InvalidOperation {
                reason: format!("Command list '{}' is already recording", self.label),
            });
        }
        self.commands.clear();
        self.recording = true;
        Ok(())
    }

    /// Stop recording
    pub fn close(&mut self) -> GpuResult<()> {
        if !self.recording {
            return Err(GpuError::InvalidOperation {
                reason: format!("Command list '{}' is not recording", self.label),
            });
        }
        self.recording = false;
        Ok(())
    }

    /// Whether the list accepts commands
    pub const fn is_recording(&self) -> bool {
        self.recording
    }

    /// Label used in logs
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Recorded commands
    pub fn commands(&self) -> &[GpuCommand] {
        &self.commands
    }

    /// Fail unless the list is closed and may be submitted
    pub fn ensure_closed(&self) -> GpuResult<()> {
        if self.recording {
            return Err(GpuError::InvalidOperation {
                reason: format!("Command list '{}' submitted while recording", self.label),
            });
        }
        Ok(())
    }

    /// Append a command
    ///
    /// Commands recorded while the list is closed are dropped with a warning.
    pub fn record(&mut self, command: GpuCommand) {
        if self.recording {
            self.commands.push(command);
        } else {
            log::warn!("Dropping {command:?} recorded into closed list '{}'", self.label);
        }
    }

    /// Record a state transition
    pub fn resource_barrier(&mut self, image: GpuImageHandle, before: ResourceState, after: ResourceState) {
        self.record(GpuCommand::ResourceBarrier { image, before, after });
    }

    /// Bind a render target
    pub fn set_render_target(&mut self, heap: DescriptorHeapHandle, slot: u32) {
        self.record(GpuCommand::SetRenderTarget { heap, slot });
    }

    /// Clear a render target
    pub fn clear_render_target(&mut self, heap: DescriptorHeapHandle, slot: u32, color: [f32; 4]) {
        self.record(GpuCommand::ClearRenderTarget { heap, slot, color });
    }

    /// Set viewport and scissor to the same rectangle
    pub fn set_viewport_and_scissor(&mut self, rect: Rect2Di) {
        self.record(GpuCommand::SetViewport(Viewport::from(rect)));
        self.record(GpuCommand::SetScissor(rect));
    }

    /// Record a non-indexed draw
    pub fn draw_instanced(&mut self, vertex_count: u32, instance_count: u32) {
        self.record(GpuCommand::DrawInstanced { vertex_count, instance_count });
    }

    /// Number of draws recorded
    pub fn draw_count(&self) -> usize {
        self.commands.iter().filter(|c| matches!(c, GpuCommand::DrawInstanced { .. })).count()
    }

    /// Barriers recorded, in order
    pub fn barriers(&self) -> impl Iterator<Item = (GpuImageHandle, ResourceState, ResourceState)> + '_ {
        self.commands.iter().filter_map(|c| match c {
            GpuCommand::ResourceBarrier { image, before, after } => Some((*image, *before, *after)),
            _ => None,
        })
    }
}

impl Default for CommandList {
    fn default() -> Self {
        Self::new("")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_lifecycle() {
        let mut list = CommandList::new("test");
        assert!(!list.is_recording());
        assert!(list.close().is_err());

        list.reset().unwrap();
        assert!(list.reset().is_err());
        list.draw_instanced(3, 1);
        assert!(list.ensure_closed().is_err());
        list.close().unwrap();
        list.ensure_closed().unwrap();
        assert_eq!(list.draw_count(), 1);

        list.reset().unwrap();
        assert!(list.commands().is_empty());
    }

    #[test]
    fn test_closed_list_drops_commands() {
        let mut list = CommandList::new("closed");
        list.draw_instanced(3, 1);
        assert!(list.commands().is_empty());
    }

    #[test]
    fn test_constants_layout() {
        assert_eq!(CompositionConstants::COUNT, 6);
        let constants = CompositionConstants { is_opaque: 1, multiply_alpha: 0, ..Default::default() };
        let words = constants.as_words();
        assert_eq!(words.len(), 6);
        assert_eq!(words[0], 1);
        assert_eq!(words[4], 1.0f32.to_bits());
    }

    #[test]
    fn test_viewport_and_scissor_match() {
        let mut list = CommandList::new("vp");
        list.reset().unwrap();
        list.set_viewport_and_scissor(Rect2Di::new(64, 0, 64, 32));
        assert_eq!(
            list.commands(),
            &[
                GpuCommand::SetViewport(Viewport { x: 64.0, y: 0.0, width: 64.0, height: 32.0 }),
                GpuCommand::SetScissor(Rect2Di::new(64, 0, 64, 32)),
            ]
        );
    }
}
