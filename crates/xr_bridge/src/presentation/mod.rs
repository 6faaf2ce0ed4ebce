//! Presentation surface
//!
//! Owns the monitor swap chain a session composites into, together with the
//! render target views of its back buffers.

use std::sync::Arc;

use crate::compositor::CompositionTarget;
use crate::core::error::{XrError, XrResult};
use crate::gpu::{DescriptorHeapHandle, DescriptorKind, Format, GraphicsDevice, PresentationSwapChain, SwapChainDesc};

/// Back buffers presented at the display refresh rate
pub const SYNC_INTERVAL: u32 = 1;

/// A swap chain plus one render target view per back buffer
pub struct PresentationSurface {
    device: Arc<dyn GraphicsDevice>,
    swap_chain: Box<dyn PresentationSwapChain>,
    rtv_heap: DescriptorHeapHandle,
    presented_frames: u64,
}

impl PresentationSurface {
    /// Create the swap chain described by `desc`
    pub fn new(device: Arc<dyn GraphicsDevice>, desc: &SwapChainDesc) -> XrResult<Self> {
        let swap_chain = device.create_swap_chain(desc)?;
        let buffer_count = u32::try_from(swap_chain.back_buffers().len())
            .map_err(|_| XrError::ValidationFailure("Too many back buffers".to_string()))?;
        let rtv_heap = device.create_descriptor_heap(DescriptorKind::RenderTarget, buffer_count, false)?;

        for (slot, image) in (0u32..).zip(swap_chain.back_buffers()) {
            if let Err(err) = device.create_render_target_view(rtv_heap, slot, *image) {
                device.destroy_descriptor_heap(rtv_heap);
                return Err(err.into());
            }
        }

        let (width, height) = swap_chain.extent();
        log::info!(
            "Presentation surface '{}' created: {width}x{height} {:?}, {buffer_count} buffers",
            desc.title,
            swap_chain.format()
        );
        Ok(Self { device, swap_chain, rtv_heap, presented_frames: 0 })
    }

    /// Index of the back buffer the next frame is composed into
    pub fn acquire_next_image(&self) -> usize {
        self.swap_chain.current_back_buffer_index()
    }

    /// Composition target for back buffer `index`
    pub fn target(&self, index: usize) -> XrResult<CompositionTarget> {
        let image = *self
            .swap_chain
            .back_buffers()
            .get(index)
            .ok_or_else(|| XrError::ValidationFailure(format!("Back buffer {index} out of range")))?;
        let rtv_slot = u32::try_from(index).map_err(|_| XrError::ValidationFailure("Back buffer index".to_string()))?;
        Ok(CompositionTarget { image, rtv_heap: self.rtv_heap, rtv_slot })
    }

    /// Present the current back buffer
    pub fn present_frame(&mut self) -> XrResult<()> {
        self.swap_chain.present(SYNC_INTERVAL)?;
        self.presented_frames += 1;
        Ok(())
    }

    /// Number of back buffers
    pub fn buffer_count(&self) -> usize {
        self.swap_chain.back_buffers().len()
    }

    /// Size in pixels
    pub fn extent(&self) -> (u32, u32) {
        self.swap_chain.extent()
    }

    /// Back buffer format
    pub fn format(&self) -> Format {
        self.swap_chain.format()
    }

    /// Frames presented so far
    pub const fn presented_frames(&self) -> u64 {
        self.presented_frames
    }
}

impl Drop for PresentationSurface {
    fn drop(&mut self) {
        if let Err(err) = self.device.queue().wait_idle() {
            log::warn!("Presentation surface dropped with work in flight: {err}");
        }
        self.device.destroy_descriptor_heap(self.rtv_heap);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::backends::headless::HeadlessDevice;

    fn desc() -> SwapChainDesc {
        SwapChainDesc { width: 8, height: 4, format: Format::Rgba8Unorm, buffer_count: 3, title: "Test".to_string() }
    }

    #[test]
    fn test_targets_follow_back_buffers() {
        let device = Arc::new(HeadlessDevice::new().unwrap());
        let mut surface = PresentationSurface::new(device.clone(), &desc()).unwrap();
        assert_eq!(surface.buffer_count(), 3);
        assert_eq!(surface.extent(), (8, 4));

        for expected in [0, 1, 2, 0] {
            let index = surface.acquire_next_image();
            assert_eq!(index, expected);
            assert_eq!(surface.target(index).unwrap().rtv_slot as usize, index);
            surface.present_frame().unwrap();
        }
        device.queue().wait_idle().unwrap();
        assert_eq!(surface.presented_frames(), 4);
        assert_eq!(device.present_count(), 4);
        assert!(surface.target(3).is_err());
    }

    #[test]
    fn test_drop_releases_views_and_buffers() {
        let device = Arc::new(HeadlessDevice::new().unwrap());
        let surface = PresentationSurface::new(device.clone(), &desc()).unwrap();
        assert_eq!(device.descriptor_heap_count(), 1);
        assert_eq!(device.image_count(), 3);
        drop(surface);
        assert_eq!(device.descriptor_heap_count(), 0);
        assert_eq!(device.image_count(), 0);
    }
}
