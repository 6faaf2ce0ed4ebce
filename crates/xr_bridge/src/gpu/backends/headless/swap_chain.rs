//! Offscreen flip-model swap chain

use std::sync::{Arc, Mutex};

use crate::gpu::{CommandQueue, Format, GpuImageHandle, GpuResult, PresentationSwapChain};

use super::queue::HeadlessQueue;
use super::state::{image_key, lock, DeviceState};

/// Ring of back buffers presented through the queue thread
///
/// Presenting enqueues a capture of the current back buffer behind all work
/// already submitted, then advances to the next buffer.
pub struct HeadlessSwapChain {
    state: Arc<Mutex<DeviceState>>,
    queue: Arc<HeadlessQueue>,
    buffers: Vec<GpuImageHandle>,
    current: usize,
    extent: (u32, u32),
    format: Format,
}

impl HeadlessSwapChain {
    pub(crate) fn new(
        state: Arc<Mutex<DeviceState>>,
        queue: Arc<HeadlessQueue>,
        buffers: Vec<GpuImageHandle>,
        extent: (u32, u32),
        format: Format,
    ) -> Self {
        Self { state, queue, buffers, current: 0, extent, format }
    }
}

impl PresentationSwapChain for HeadlessSwapChain {
    fn back_buffers(&self) -> &[GpuImageHandle] {
        &self.buffers
    }

    fn current_back_buffer_index(&self) -> usize {
        self.current
    }

    fn present(&mut self, sync_interval: u32) -> GpuResult<()> {
        log::trace!("Present back buffer {} (sync interval {sync_interval})", self.current);
        self.queue.present(self.buffers[self.current])?;
        self.current = (self.current + 1) % self.buffers.len();
        Ok(())
    }

    fn extent(&self) -> (u32, u32) {
        self.extent
    }

    fn format(&self) -> Format {
        self.format
    }
}

impl Drop for HeadlessSwapChain {
    fn drop(&mut self) {
        if let Err(err) = self.queue.wait_idle() {
            log::warn!("Swap chain teardown without idle queue: {err}");
        }
        let mut state = lock(&self.state);
        for buffer in self.buffers.drain(..) {
            if let Some(image) = state.images.remove(image_key(buffer)) {
                state.memory_used = state.memory_used.saturating_sub(image.desc.size_in_bytes());
            }
        }
    }
}
