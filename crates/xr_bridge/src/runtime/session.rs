//! Sessions and their lifecycle
//!
//! State changes are reported through the instance event queue in the order
//! an application observes them:
//!
//! ```text
//! create      -> Idle, Ready
//! begin       -> Synchronized, Visible, Focused
//! request_exit-> Visible, Synchronized, Stopping
//! end         -> Idle, Exiting
//! ```

use std::sync::Arc;

use crate::compositor::Compositor;
use crate::core::error::{XrError, XrResult};
use crate::foundation::handles::{ActionSetHandle, InstanceHandle, SessionHandle};
use crate::gpu::{Format, GraphicsDevice, SwapChainDesc};
use crate::presentation::PresentationSurface;

use super::frame::FrameTiming;
use super::system::{SystemId, ViewConfigurationType};
use super::{Runtime, Time};

/// Lifecycle state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// Not yet reported
    Unknown = 0,
    /// Created, not ready to begin
    Idle = 1,
    /// Ready for `begin_session`
    Ready = 2,
    /// Frame loop synchronized with the display
    Synchronized = 3,
    /// Frames are visible
    Visible = 4,
    /// Frames are visible and input goes to the application
    Focused = 5,
    /// The application should end the session
    Stopping = 6,
    /// The runtime is about to lose the session
    LossPending = 7,
    /// The application should destroy the session
    Exiting = 8,
}

impl SessionState {
    /// Whether frames submitted in this state are shown
    pub const fn is_visible(self) -> bool {
        matches!(self, Self::Visible | Self::Focused)
    }
}

/// A session changed state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionEvent {
    /// Session that changed
    pub session: SessionHandle,
    /// New state
    pub state: SessionState,
    /// When the change happened
    pub time: Time,
}

/// Parameters for [`Runtime::create_session`]
#[derive(Clone)]
pub struct SessionCreateInfo {
    /// System the session runs on
    pub system: SystemId,
    /// Device the application renders with
    pub device: Arc<dyn GraphicsDevice>,
}

pub(crate) struct SessionRecord {
    pub(crate) instance: InstanceHandle,
    pub(crate) device: Arc<dyn GraphicsDevice>,
    pub(crate) state: SessionState,
    pub(crate) running: bool,
    pub(crate) view_configuration: Option<ViewConfigurationType>,
    pub(crate) timing: FrameTiming,
    pub(crate) attached_action_sets: Option<Vec<ActionSetHandle>>,
    pub(crate) compositor: Compositor,
    pub(crate) surface: PresentationSurface,
}

impl Runtime {
    /// Create a session presenting on the system's display
    pub fn create_session(&mut self, instance: InstanceHandle, info: &SessionCreateInfo) -> XrResult<SessionHandle> {
        let application_name = self.instances.get(instance)?.application_name.clone();
        let system = self.system_record(instance, info.system)?;
        let Some(api) = system.graphics_api else {
            return Err(XrError::GraphicsRequirementsCallMissing);
        };
        if info.device.api() != api {
            log::error!("Session device uses {:?} but requirements were queried for {api:?}", info.device.api());
            return Err(XrError::GraphicsDeviceInvalid);
        }
        let form_factor = system.form_factor;

        let display = &self.settings.display;
        let format = info.device.supported_swapchain_formats().first().copied().unwrap_or(Format::Rgba8Unorm);
        let surface = PresentationSurface::new(
            Arc::clone(&info.device),
            &SwapChainDesc {
                width: display.width,
                height: display.height,
                format,
                buffer_count: self.settings.runtime.swapchain_image_count,
                title: application_name,
            },
        )?;
        let compositor = Compositor::new(
            Arc::clone(&info.device),
            &self.settings.compositor,
            surface.buffer_count(),
            surface.format(),
        )?;

        let session = self.sessions.insert(SessionRecord {
            instance,
            device: Arc::clone(&info.device),
            state: SessionState::Unknown,
            running: false,
            view_configuration: None,
            timing: FrameTiming::default(),
            attached_action_sets: None,
            compositor,
            surface,
        });
        log::info!("Session created on {api:?} ({form_factor:?})");

        self.set_session_state(session, SessionState::Idle)?;
        self.set_session_state(session, SessionState::Ready)?;
        Ok(session)
    }

    pub(crate) fn set_session_state(&mut self, session: SessionHandle, state: SessionState) -> XrResult<()> {
        let time = self.now();
        let record = self.sessions.get_mut(session)?;
        log::info!("Session state {:?} -> {state:?}", record.state);
        record.state = state;
        let instance = record.instance;
        self.instances.get_mut(instance)?.events.push_back(SessionEvent { session, state, time });
        Ok(())
    }

    /// Current state of a session
    pub fn session_state(&self, session: SessionHandle) -> XrResult<SessionState> {
        Ok(self.sessions.get(session)?.state)
    }

    /// Start the frame loop with `view_configuration_type`
    pub fn begin_session(
        &mut self,
        session: SessionHandle,
        view_configuration_type: ViewConfigurationType,
    ) -> XrResult<()> {
        let record = self.sessions.get_mut(session)?;
        if record.running {
            return Err(XrError::SessionRunning);
        }
        if record.state != SessionState::Ready {
            return Err(XrError::SessionNotReady);
        }
        record.running = true;
        record.view_configuration = Some(view_configuration_type);
        record.timing = FrameTiming::default();
        log::info!("Session begun with {view_configuration_type:?}");

        for state in [SessionState::Synchronized, SessionState::Visible, SessionState::Focused] {
            self.set_session_state(session, state)?;
        }
        Ok(())
    }

    /// Ask the application to end a running session
    pub fn request_exit_session(&mut self, session: SessionHandle) -> XrResult<()> {
        let record = self.sessions.get(session)?;
        if !record.running {
            return Err(XrError::SessionNotRunning);
        }
        let mut state = record.state;
        if state == SessionState::Focused {
            state = SessionState::Visible;
            self.set_session_state(session, state)?;
        }
        if state == SessionState::Visible {
            self.set_session_state(session, SessionState::Synchronized)?;
        }
        self.set_session_state(session, SessionState::Stopping)
    }

    /// Stop the frame loop of a stopping session
    pub fn end_session(&mut self, session: SessionHandle) -> XrResult<()> {
        let record = self.sessions.get_mut(session)?;
        if !record.running {
            return Err(XrError::SessionNotRunning);
        }
        if record.state != SessionState::Stopping {
            return Err(XrError::SessionNotStopping);
        }
        record.compositor.wait_idle()?;
        record.running = false;
        record.view_configuration = None;
        log::info!("Session ended after {} frames", record.timing.frame_count);

        self.set_session_state(session, SessionState::Idle)?;
        self.set_session_state(session, SessionState::Exiting)
    }

    /// Destroy a session with its swapchains and spaces
    pub fn destroy_session(&mut self, session: SessionHandle) -> XrResult<()> {
        let record = self.sessions.get(session)?;
        record.compositor.wait_idle()?;
        record.device.queue().wait_idle()?;
        let instance = record.instance;

        for swapchain in self.swapchains.keys_where(|s| s.session == session) {
            self.swapchains.remove(swapchain)?;
        }
        for space in self.spaces.keys_where(|s| s.session == session) {
            self.spaces.remove(space)?;
        }
        if let Ok(record) = self.instances.get_mut(instance) {
            record.events.retain(|event| event.session != session);
        }

        self.sessions.remove(session)?;
        log::info!("Session destroyed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::RuntimeSettings;
    use crate::gpu::backends::headless::HeadlessDevice;
    use crate::runtime::{FormFactor, InstanceCreateInfo, MND_HEADLESS};

    fn setup() -> (Runtime, InstanceHandle, SystemId) {
        let settings = RuntimeSettings::default().with_display_size(64, 32);
        let mut runtime = Runtime::new(settings).unwrap();
        let instance = runtime.create_instance(&InstanceCreateInfo::new("test").with_extension(MND_HEADLESS)).unwrap();
        let system = runtime.get_system(instance, FormFactor::HeadMountedDisplay).unwrap();
        (runtime, instance, system)
    }

    fn device() -> Arc<dyn GraphicsDevice> {
        Arc::new(HeadlessDevice::new().unwrap())
    }

    fn drain_states(runtime: &mut Runtime, instance: InstanceHandle) -> Vec<SessionState> {
        std::iter::from_fn(|| runtime.poll_event(instance).unwrap()).map(|e| e.state).collect()
    }

    #[test]
    fn test_requirements_must_be_queried() {
        let (mut runtime, instance, system) = setup();
        let info = SessionCreateInfo { system, device: device() };
        assert!(matches!(
            runtime.create_session(instance, &info),
            Err(XrError::GraphicsRequirementsCallMissing)
        ));
    }

    #[test]
    fn test_unknown_system() {
        let (mut runtime, instance, system) = setup();
        runtime.get_software_graphics_requirements(instance, system).unwrap();
        let info = SessionCreateInfo { system: SystemId(system.0 + 7), device: device() };
        assert!(matches!(runtime.create_session(instance, &info), Err(XrError::SystemInvalid)));
    }

    #[test]
    fn test_lifecycle_events() {
        let (mut runtime, instance, system) = setup();
        runtime.get_software_graphics_requirements(instance, system).unwrap();
        let session = runtime.create_session(instance, &SessionCreateInfo { system, device: device() }).unwrap();
        assert_eq!(drain_states(&mut runtime, instance), vec![SessionState::Idle, SessionState::Ready]);

        assert!(matches!(runtime.end_session(session), Err(XrError::SessionNotRunning)));
        runtime.begin_session(session, ViewConfigurationType::PrimaryStereo).unwrap();
        assert!(matches!(
            runtime.begin_session(session, ViewConfigurationType::PrimaryStereo),
            Err(XrError::SessionRunning)
        ));
        assert_eq!(
            drain_states(&mut runtime, instance),
            vec![SessionState::Synchronized, SessionState::Visible, SessionState::Focused]
        );

        assert!(matches!(runtime.end_session(session), Err(XrError::SessionNotStopping)));
        runtime.request_exit_session(session).unwrap();
        assert_eq!(
            drain_states(&mut runtime, instance),
            vec![SessionState::Visible, SessionState::Synchronized, SessionState::Stopping]
        );

        runtime.end_session(session).unwrap();
        assert_eq!(drain_states(&mut runtime, instance), vec![SessionState::Idle, SessionState::Exiting]);
        assert!(matches!(
            runtime.begin_session(session, ViewConfigurationType::PrimaryStereo),
            Err(XrError::SessionNotReady)
        ));

        runtime.destroy_session(session).unwrap();
        assert!(matches!(runtime.session_state(session), Err(XrError::HandleInvalid)));
    }

    #[test]
    fn test_destroy_releases_presentation_resources() {
        let (mut runtime, instance, system) = setup();
        runtime.get_software_graphics_requirements(instance, system).unwrap();
        let headless = Arc::new(HeadlessDevice::new().unwrap());
        let session = runtime.create_session(instance, &SessionCreateInfo { system, device: headless.clone() }).unwrap();
        assert_eq!(headless.image_count(), 2);

        runtime.destroy_instance(instance).unwrap();
        assert!(matches!(runtime.session_state(session), Err(XrError::HandleInvalid)));
        assert_eq!(headless.image_count(), 0);
        assert_eq!(headless.descriptor_heap_count(), 0);
    }
}
