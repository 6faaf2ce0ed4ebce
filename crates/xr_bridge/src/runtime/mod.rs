//! Runtime context
//!
//! [`Runtime`] owns every object the application can name, each in its own
//! generation-checked [`Registry`]. Operations are grouped by concern in the
//! submodules, all as methods on the one context: mutating calls take
//! `&mut self`, so two threads can never drive the same swapchain or session
//! at once.

mod actions;
mod frame;
mod instance;
mod path;
mod session;
mod space;
mod swapchain_api;
mod system;

#[cfg(test)]
mod tests;

use std::time::Instant;

pub use actions::{
    ActionCreateInfo, ActionSetCreateInfo, ActionStateBoolean, ActionStateFloat, ActionStateGetInfo,
    ActionStatePose, ActionStateVector2f, ActionSuggestedBinding, ActionType, ActiveActionSet,
    InteractionProfileSuggestedBinding,
};
pub use frame::{FrameBeginStatus, FrameEndInfo, FrameState};
pub use instance::{
    ExtensionProperties, InstanceCreateInfo, InstanceProperties, Version, CURRENT_API_VERSION, KHR_VULKAN_ENABLE2,
    MND_HEADLESS, RUNTIME_NAME, RUNTIME_VERSION,
};
pub use path::Path;
pub use session::{SessionCreateInfo, SessionEvent, SessionState};
pub use space::{ActionSpaceCreateInfo, ReferenceSpaceCreateInfo, ReferenceSpaceType, SpaceLocation, SpaceLocationFlags};
pub use swapchain_api::SwapchainCreateInfo;
pub use system::{
    EnvironmentBlendMode, FormFactor, GraphicsRequirements, SystemGraphicsProperties, SystemId, SystemProperties,
    SystemTrackingProperties, View, ViewConfigurationProperties, ViewConfigurationType, ViewConfigurationView,
    ViewLocateInfo, ViewState, ViewStateFlags, MAX_LAYER_COUNT,
};

use crate::core::config::RuntimeSettings;
use crate::core::error::{XrError, XrResult};
use crate::foundation::handles::{
    ActionHandle, ActionSetHandle, InstanceHandle, Registry, SessionHandle, SpaceHandle, SwapchainHandle,
};

use actions::{ActionRecord, ActionSetRecord};
use instance::InstanceRecord;
use session::SessionRecord;
use space::SpaceRecord;
use swapchain_api::SwapchainRecord;

/// Point in time in nanoseconds, counted from runtime creation
pub type Time = i64;

/// Span of time in nanoseconds
pub type Duration = i64;

/// The runtime context
pub struct Runtime {
    settings: RuntimeSettings,
    epoch: Instant,
    instances: Registry<InstanceHandle, InstanceRecord>,
    sessions: Registry<SessionHandle, SessionRecord>,
    swapchains: Registry<SwapchainHandle, SwapchainRecord>,
    spaces: Registry<SpaceHandle, SpaceRecord>,
    action_sets: Registry<ActionSetHandle, ActionSetRecord>,
    actions: Registry<ActionHandle, ActionRecord>,
    next_system_id: u64,
    swapchain_serial: u64,
}

impl Runtime {
    /// Create a runtime with validated settings
    pub fn new(settings: RuntimeSettings) -> XrResult<Self> {
        settings.validate().map_err(|e| XrError::InitializationFailed(e.to_string()))?;
        settings.log_summary();

        Ok(Self {
            settings,
            epoch: Instant::now(),
            instances: Registry::new("instance"),
            sessions: Registry::new("session"),
            swapchains: Registry::new("swapchain"),
            spaces: Registry::new("space"),
            action_sets: Registry::new("action set"),
            actions: Registry::new("action"),
            next_system_id: 1,
            swapchain_serial: 0,
        })
    }

    /// Settings the runtime was created with
    pub const fn settings(&self) -> &RuntimeSettings {
        &self.settings
    }

    /// Current runtime time
    pub fn now(&self) -> Time {
        i64::try_from(self.epoch.elapsed().as_nanos()).unwrap_or(i64::MAX)
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        for instance in self.instances.keys_where(|_| true) {
            if let Err(err) = self.destroy_instance(instance) {
                log::warn!("Failed to destroy instance during runtime teardown: {err}");
            }
        }
    }
}
