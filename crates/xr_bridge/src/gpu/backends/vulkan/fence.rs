//! Timeline semaphore fences

use std::any::Any;
use std::sync::Arc;

use ash::vk;

use crate::gpu::{GpuFence, GpuResult, Timeout};

use super::context::api_error;
use super::resources::Shared;

/// [`GpuFence`] backed by a timeline semaphore
pub struct VulkanFence {
    shared: Arc<Shared>,
    semaphore: vk::Semaphore,
}

impl VulkanFence {
    pub(crate) fn new(shared: Arc<Shared>, initial_value: u64) -> GpuResult<Self> {
        let mut type_info = vk::SemaphoreTypeCreateInfo::builder()
            .semaphore_type(vk::SemaphoreType::TIMELINE)
            .initial_value(initial_value);
        let info = vk::SemaphoreCreateInfo::builder().push_next(&mut type_info);
        let semaphore = unsafe { shared.device().create_semaphore(&info, None) }.map_err(api_error("vkCreateSemaphore"))?;
        Ok(Self { shared, semaphore })
    }

    /// Semaphore signalled by queue submissions
    pub fn semaphore(&self) -> vk::Semaphore {
        self.semaphore
    }
}

impl GpuFence for VulkanFence {
    fn completed_value(&self) -> u64 {
        unsafe { self.shared.device().get_semaphore_counter_value(self.semaphore) }.unwrap_or_else(|err| {
            log::error!("Failed to read timeline semaphore: {err:?}");
            0
        })
    }

    fn signal(&self, value: u64) -> GpuResult<()> {
        let info = vk::SemaphoreSignalInfo::builder().semaphore(self.semaphore).value(value);
        unsafe { self.shared.device().signal_semaphore(&info) }.map_err(api_error("vkSignalSemaphore"))
    }

    fn wait(&self, value: u64, timeout: Timeout) -> GpuResult<bool> {
        let nanos = match timeout {
            Timeout::Infinite => u64::MAX,
            Timeout::After(duration) => u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX),
        };
        let semaphores = [self.semaphore];
        let values = [value];
        let info = vk::SemaphoreWaitInfo::builder().semaphores(&semaphores).values(&values);
        match unsafe { self.shared.device().wait_semaphores(&info, nanos) } {
            Ok(()) => Ok(true),
            Err(vk::Result::TIMEOUT) => Ok(false),
            Err(err) => Err(api_error("vkWaitSemaphores")(err)),
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Drop for VulkanFence {
    fn drop(&mut self) {
        unsafe { self.shared.device().destroy_semaphore(self.semaphore, None) };
    }
}
