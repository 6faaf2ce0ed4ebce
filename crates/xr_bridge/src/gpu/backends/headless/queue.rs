//! Asynchronous submission queue
//!
//! Operations run on a dedicated worker thread strictly in submission order,
//! so a fence signal enqueued after a command list is observed only once that
//! list has executed.

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::JoinHandle;

use crate::gpu::{CommandList, CommandQueue, GpuCommand, GpuError, GpuFence, GpuImageHandle, GpuResult, ResourceState};

use super::raster;
use super::state::{lock, DeviceState, PresentedFrame};

enum QueueOp {
    Execute(Vec<GpuCommand>),
    Signal(Arc<dyn GpuFence>, u64),
    Present(GpuImageHandle),
    Flush(Sender<()>),
}

/// Gate the worker checks before each operation
#[derive(Default)]
struct PauseGate {
    paused: Mutex<bool>,
    resumed: Condvar,
}

impl PauseGate {
    fn set(&self, paused: bool) {
        *self.paused.lock().unwrap_or_else(PoisonError::into_inner) = paused;
        self.resumed.notify_all();
    }

    fn wait_until_open(&self) {
        let guard = self.paused.lock().unwrap_or_else(PoisonError::into_inner);
        let _open = self
            .resumed
            .wait_while(guard, |paused| *paused)
            .unwrap_or_else(PoisonError::into_inner);
    }
}

/// Software command queue backed by a worker thread
pub struct HeadlessQueue {
    sender: Mutex<Option<Sender<QueueOp>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    gate: Arc<PauseGate>,
}

impl HeadlessQueue {
    pub(crate) fn new(state: Arc<Mutex<DeviceState>>) -> GpuResult<Self> {
        let (sender, receiver) = mpsc::channel();
        let gate = Arc::new(PauseGate::default());
        let worker_gate = Arc::clone(&gate);
        let worker = std::thread::Builder::new()
            .name("xr-bridge-queue".to_string())
            .spawn(move || run_worker(&receiver, &state, &worker_gate))
            .map_err(|e| GpuError::Api(format!("Failed to spawn queue thread: {e}")))?;

        log::debug!("Software queue thread started");
        Ok(Self {
            sender: Mutex::new(Some(sender)),
            worker: Mutex::new(Some(worker)),
            gate,
        })
    }

    /// Stop executing queued work until [`HeadlessQueue::resume`]
    ///
    /// Submissions keep queueing while paused, which lets callers observe
    /// work that the GPU has not completed yet.
    pub fn pause(&self) {
        self.gate.set(true);
    }

    /// Continue executing queued work
    pub fn resume(&self) {
        self.gate.set(false);
    }

    pub(crate) fn present(&self, image: GpuImageHandle) -> GpuResult<()> {
        self.send(QueueOp::Present(image))
    }

    fn send(&self, op: QueueOp) -> GpuResult<()> {
        let sender = self.sender.lock().unwrap_or_else(PoisonError::into_inner);
        sender
            .as_ref()
            .ok_or(GpuError::DeviceLost)?
            .send(op)
            .map_err(|_| GpuError::DeviceLost)
    }
}

impl CommandQueue for HeadlessQueue {
    fn execute(&self, list: &CommandList) -> GpuResult<()> {
        list.ensure_closed()?;
        log::trace!("Executing '{}' ({} commands)", list.label(), list.commands().len());
        self.send(QueueOp::Execute(list.commands().to_vec()))
    }

    fn signal(&self, fence: &Arc<dyn GpuFence>, value: u64) -> GpuResult<()> {
        self.send(QueueOp::Signal(Arc::clone(fence), value))
    }

    fn wait_idle(&self) -> GpuResult<()> {
        let (done_tx, done_rx) = mpsc::channel();
        self.send(QueueOp::Flush(done_tx))?;
        done_rx.recv().map_err(|_| GpuError::DeviceLost)
    }
}

impl Drop for HeadlessQueue {
    fn drop(&mut self) {
        self.sender.lock().unwrap_or_else(PoisonError::into_inner).take();
        self.gate.set(false);
        if let Some(worker) = self.worker.lock().unwrap_or_else(PoisonError::into_inner).take() {
            if worker.join().is_err() {
                log::error!("Software queue thread panicked");
            }
        }
        log::debug!("Software queue thread stopped");
    }
}

fn run_worker(receiver: &Receiver<QueueOp>, state: &Mutex<DeviceState>, gate: &PauseGate) {
    while let Ok(op) = receiver.recv() {
        gate.wait_until_open();
        match op {
            QueueOp::Execute(commands) => raster::execute(&mut lock(state), &commands),
            QueueOp::Signal(fence, value) => {
                if let Err(err) = fence.signal(value) {
                    log::error!("Fence signal failed: {err}");
                }
            }
            QueueOp::Present(image) => present(&mut lock(state), image),
            QueueOp::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
}

fn present(state: &mut DeviceState, image: GpuImageHandle) {
    let frame = match state.image(image) {
        Ok(img) if img.state == ResourceState::PRESENT => Ok(PresentedFrame {
            image,
            width: img.desc.width,
            height: img.desc.height,
            texels: img.texels.clone(),
        }),
        Ok(img) => Err(format!("Present of image {:#x} in state {:?}", image.0, img.state)),
        Err(err) => Err(format!("Present of unknown image: {err}")),
    };
    match frame {
        Ok(frame) => {
            state.last_presented = Some(frame);
            state.present_count += 1;
        }
        Err(message) => state.record_validation_error(message),
    }
}
