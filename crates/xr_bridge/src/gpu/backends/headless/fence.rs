//! CPU fence with a condition-variable completion event

use std::any::Any;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Condvar, Mutex, PoisonError};

use crate::gpu::{GpuError, GpuFence, GpuResult, Timeout};

/// Fence whose value is set by the queue thread or the CPU
///
/// Values only move forward; a signal that does not exceed the current value
/// is rejected like a timeline semaphore would reject it.
pub struct HeadlessFence {
    value: Mutex<u64>,
    completed: Condvar,
    signals: AtomicU64,
}

impl HeadlessFence {
    /// Create a fence starting at `initial_value`
    pub fn new(initial_value: u64) -> Self {
        Self { value: Mutex::new(initial_value), completed: Condvar::new(), signals: AtomicU64::new(0) }
    }

    /// Number of signals applied since creation
    pub fn signal_count(&self) -> u64 {
        self.signals.load(Ordering::Acquire)
    }
}

impl GpuFence for HeadlessFence {
    fn completed_value(&self) -> u64 {
        *self.value.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn signal(&self, value: u64) -> GpuResult<()> {
        let mut current = self.value.lock().unwrap_or_else(PoisonError::into_inner);
        if value <= *current {
            log::warn!("Fence signal {value} does not advance past {}", *current);
            return Err(GpuError::InvalidOperation {
                reason: format!("fence value {value} is not greater than {}", *current),
            });
        }
        *current = value;
        self.signals.fetch_add(1, Ordering::AcqRel);
        self.completed.notify_all();
        Ok(())
    }

    fn wait(&self, value: u64, timeout: Timeout) -> GpuResult<bool> {
        let guard = self.value.lock().unwrap_or_else(PoisonError::into_inner);
        match timeout {
            Timeout::Infinite => {
                let _reached = self
                    .completed
                    .wait_while(guard, |current| *current < value)
                    .unwrap_or_else(PoisonError::into_inner);
                Ok(true)
            }
            Timeout::After(duration) => {
                let (current, _) = self
                    .completed
                    .wait_timeout_while(guard, duration, |current| *current < value)
                    .unwrap_or_else(PoisonError::into_inner);
                Ok(*current >= value)
            }
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_wait_on_reached_value_returns_immediately() {
        let fence = HeadlessFence::new(3);
        assert!(fence.wait(3, Timeout::After(Duration::ZERO)).unwrap());
        assert!(fence.wait(1, Timeout::Infinite).unwrap());
    }

    #[test]
    fn test_wait_times_out() {
        let fence = HeadlessFence::new(0);
        assert!(!fence.wait(1, Timeout::After(Duration::from_millis(5))).unwrap());
        assert_eq!(fence.completed_value(), 0);
    }

    #[test]
    fn test_signal_never_moves_backwards() {
        let fence = HeadlessFence::new(0);
        fence.signal(2).unwrap();
        assert!(matches!(fence.signal(2), Err(GpuError::InvalidOperation { .. })));
        assert!(matches!(fence.signal(1), Err(GpuError::InvalidOperation { .. })));
        assert_eq!(fence.completed_value(), 2);
        assert_eq!(fence.signal_count(), 1);
        fence.signal(3).unwrap();
        assert_eq!(fence.signal_count(), 2);
    }

    #[test]
    fn test_signal_from_another_thread_wakes_waiter() {
        let fence = Arc::new(HeadlessFence::new(0));
        let signaller = Arc::clone(&fence);
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(10));
            signaller.signal(2).unwrap();
        });
        assert!(fence.wait(2, Timeout::Infinite).unwrap());
        handle.join().unwrap();
    }
}
