//! Reference and action spaces
//!
//! The display is untracked, so the view, local and stage origins coincide.
//! A reference space is that common origin moved by its create-time pose.

use bitflags::bitflags;

use crate::core::error::{XrError, XrResult};
use crate::foundation::enumerate::enumerate_two_call;
use crate::foundation::handles::{ActionHandle, SessionHandle, SpaceHandle};
use crate::foundation::math::{identity_pose, relative_pose, Pose};

use super::actions::ActionType;
use super::path::Path;
use super::{Runtime, Time};

/// Well-known coordinate frames
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReferenceSpaceType {
    /// Follows the viewer's head
    View = 1,
    /// World-locked origin near the viewer
    Local = 2,
    /// Floor-level play area origin
    Stage = 3,
}

const REFERENCE_SPACES: [ReferenceSpaceType; 3] =
    [ReferenceSpaceType::View, ReferenceSpaceType::Local, ReferenceSpaceType::Stage];

/// Parameters for [`Runtime::create_reference_space`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReferenceSpaceCreateInfo {
    /// Frame the space is based on
    pub reference_space_type: ReferenceSpaceType,
    /// Origin of the new space within the reference frame
    pub pose_in_reference_space: Pose,
}

/// Parameters for [`Runtime::create_action_space`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ActionSpaceCreateInfo {
    /// Pose action the space follows
    pub action: ActionHandle,
    /// Subaction filter, or [`Path::NULL`]
    pub subaction_path: Path,
    /// Origin of the new space relative to the action pose
    pub pose_in_action_space: Pose,
}

bitflags! {
    /// Validity of a located space
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct SpaceLocationFlags: u64 {
        /// Orientation is valid
        const ORIENTATION_VALID = 0x1;
        /// Position is valid
        const POSITION_VALID = 0x2;
        /// Orientation is actively tracked
        const ORIENTATION_TRACKED = 0x4;
        /// Position is actively tracked
        const POSITION_TRACKED = 0x8;
    }
}

/// Result of [`Runtime::locate_space`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpaceLocation {
    /// Validity flags
    pub location_flags: SpaceLocationFlags,
    /// Pose of the space in the base space
    pub pose: Pose,
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum SpaceKind {
    Reference { space_type: ReferenceSpaceType, pose: Pose },
    Action { action: ActionHandle, pose: Pose },
}

pub(crate) struct SpaceRecord {
    pub(crate) session: SessionHandle,
    pub(crate) kind: SpaceKind,
}

impl Runtime {
    /// Two-call enumeration of the supported reference spaces
    pub fn enumerate_reference_spaces(
        &self,
        session: SessionHandle,
        output: &mut [ReferenceSpaceType],
    ) -> XrResult<usize> {
        self.sessions.get(session)?;
        enumerate_two_call(&REFERENCE_SPACES, output)
    }

    /// Create a reference space
    pub fn create_reference_space(
        &mut self,
        session: SessionHandle,
        info: &ReferenceSpaceCreateInfo,
    ) -> XrResult<SpaceHandle> {
        self.sessions.get(session)?;
        log::debug!("Reference space {:?} created", info.reference_space_type);
        Ok(self.spaces.insert(SpaceRecord {
            session,
            kind: SpaceKind::Reference { space_type: info.reference_space_type, pose: info.pose_in_reference_space },
        }))
    }

    /// Create a space that follows a pose action
    pub fn create_action_space(&mut self, session: SessionHandle, info: &ActionSpaceCreateInfo) -> XrResult<SpaceHandle> {
        let instance = self.sessions.get(session)?.instance;
        let action = self.actions.get(info.action)?;
        if action.instance != instance {
            return Err(XrError::HandleInvalid);
        }
        if action.action_type != ActionType::PoseInput {
            return Err(XrError::ActionTypeMismatch);
        }
        if !info.subaction_path.is_null() && !action.subaction_paths.contains(&info.subaction_path) {
            return Err(XrError::PathUnsupported(format!("subaction path {}", info.subaction_path.0)));
        }
        Ok(self.spaces.insert(SpaceRecord {
            session,
            kind: SpaceKind::Action { action: info.action, pose: info.pose_in_action_space },
        }))
    }

    /// Pose of `space` in the common origin, or `None` while it is untracked
    pub(crate) fn space_pose(&self, session: SessionHandle, space: SpaceHandle) -> XrResult<Option<Pose>> {
        let record = self.spaces.get(space)?;
        if record.session != session {
            return Err(XrError::HandleInvalid);
        }
        match record.kind {
            SpaceKind::Reference { space_type, pose } => {
                log::trace!("Locating {space_type:?} space");
                Ok(Some(pose))
            }
            SpaceKind::Action { action, pose } => {
                let (action_pose, tracked) = self.action_pose(action)?;
                Ok(tracked.then(|| action_pose * pose))
            }
        }
    }

    /// Locate `space` relative to `base` at `time`
    pub fn locate_space(&self, space: SpaceHandle, base: SpaceHandle, time: Time) -> XrResult<SpaceLocation> {
        let session = self.spaces.get(space)?.session;
        if time <= 0 {
            return Err(XrError::ValidationFailure(format!("Time {time} is not positive")));
        }
        let located = self.space_pose(session, space)?;
        let base_pose = self.space_pose(session, base)?;

        Ok(match (located, base_pose) {
            (Some(located), Some(base_pose)) => SpaceLocation {
                location_flags: SpaceLocationFlags::ORIENTATION_VALID | SpaceLocationFlags::POSITION_VALID,
                pose: relative_pose(&base_pose, &located),
            },
            _ => SpaceLocation { location_flags: SpaceLocationFlags::empty(), pose: identity_pose() },
        })
    }

    /// Destroy a space
    pub fn destroy_space(&mut self, space: SpaceHandle) -> XrResult<()> {
        self.spaces.remove(space)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::RuntimeSettings;
    use crate::foundation::math::pose_from_position;
    use crate::gpu::backends::headless::HeadlessDevice;
    use crate::runtime::{ActionCreateInfo, ActionSetCreateInfo, FormFactor, InstanceCreateInfo, SessionCreateInfo, MND_HEADLESS};
    use approx::assert_relative_eq;
    use std::sync::Arc;

    fn setup() -> (Runtime, SessionHandle) {
        let mut runtime = Runtime::new(RuntimeSettings::default().with_display_size(64, 32)).unwrap();
        let instance = runtime.create_instance(&InstanceCreateInfo::new("test").with_extension(MND_HEADLESS)).unwrap();
        let system = runtime.get_system(instance, FormFactor::HeadMountedDisplay).unwrap();
        runtime.get_software_graphics_requirements(instance, system).unwrap();
        let device = Arc::new(HeadlessDevice::new().unwrap());
        let session = runtime.create_session(instance, &SessionCreateInfo { system, device }).unwrap();
        (runtime, session)
    }

    fn reference(runtime: &mut Runtime, session: SessionHandle, pose: Pose) -> SpaceHandle {
        let info = ReferenceSpaceCreateInfo { reference_space_type: ReferenceSpaceType::Local, pose_in_reference_space: pose };
        runtime.create_reference_space(session, &info).unwrap()
    }

    #[test]
    fn test_enumerate_reference_spaces() {
        let (runtime, session) = setup();
        assert_eq!(runtime.enumerate_reference_spaces(session, &mut []).unwrap(), 3);
        let mut spaces = [ReferenceSpaceType::View; 3];
        runtime.enumerate_reference_spaces(session, &mut spaces).unwrap();
        assert_eq!(spaces, REFERENCE_SPACES);
    }

    #[test]
    fn test_locate_reference_space() {
        let (mut runtime, session) = setup();
        let base = reference(&mut runtime, session, pose_from_position(1.0, 0.0, 0.0));
        let space = reference(&mut runtime, session, pose_from_position(1.0, 2.0, 0.0));

        let location = runtime.locate_space(space, base, 1).unwrap();
        assert!(location.location_flags.contains(SpaceLocationFlags::ORIENTATION_VALID | SpaceLocationFlags::POSITION_VALID));
        assert!(!location.location_flags.contains(SpaceLocationFlags::POSITION_TRACKED));
        assert_relative_eq!(location.pose.translation.vector.x, 0.0);
        assert_relative_eq!(location.pose.translation.vector.y, 2.0);

        assert!(matches!(runtime.locate_space(space, base, 0), Err(XrError::ValidationFailure(_))));
    }

    #[test]
    fn test_action_space_is_untracked() {
        let (mut runtime, session) = setup();
        let instance = runtime.sessions.get(session).unwrap().instance;
        let set = runtime
            .create_action_set(instance, &ActionSetCreateInfo {
                action_set_name: "gameplay".to_string(),
                localized_action_set_name: "Gameplay".to_string(),
                priority: 0,
            })
            .unwrap();
        let mut create = |name: &str, action_type| {
            runtime
                .create_action(set, &ActionCreateInfo {
                    action_name: name.to_string(),
                    action_type,
                    subaction_paths: Vec::new(),
                    localized_action_name: name.to_string(),
                })
                .unwrap()
        };
        let grip = create("grip", ActionType::PoseInput);
        let fire = create("fire", ActionType::BooleanInput);

        let info = |action| ActionSpaceCreateInfo { action, subaction_path: Path::NULL, pose_in_action_space: identity_pose() };
        assert!(matches!(runtime.create_action_space(session, &info(fire)), Err(XrError::ActionTypeMismatch)));
        let space = runtime.create_action_space(session, &info(grip)).unwrap();
        let base = reference(&mut runtime, session, identity_pose());

        let location = runtime.locate_space(space, base, 1).unwrap();
        assert!(location.location_flags.is_empty());
    }

    #[test]
    fn test_destroy_space() {
        let (mut runtime, session) = setup();
        let space = reference(&mut runtime, session, identity_pose());
        runtime.destroy_space(space).unwrap();
        assert!(matches!(runtime.destroy_space(space), Err(XrError::HandleInvalid)));
        assert!(matches!(runtime.locate_space(space, space, 1), Err(XrError::HandleInvalid)));
    }
}
