//! Action sets, actions and input state
//!
//! The display has no input devices. Bindings are validated and stored so
//! applications can run their normal setup, and every state query reports
//! an inactive action.

use crate::core::error::{XrError, XrResult};
use crate::foundation::handles::{ActionHandle, ActionSetHandle, InstanceHandle, SessionHandle};
use crate::foundation::math::{identity_pose, Pose};

use super::path::Path;
use super::{Runtime, Time};

/// Top-level user paths actions may be filtered by
const SUBACTION_PATHS: [&str; 4] = ["/user/hand/left", "/user/hand/right", "/user/head", "/user/gamepad"];

/// Interaction profiles bindings may be suggested for
const INTERACTION_PROFILES: [&str; 5] = [
    "/interaction_profiles/khr/simple_controller",
    "/interaction_profiles/microsoft/xbox_controller",
    "/interaction_profiles/oculus/touch_controller",
    "/interaction_profiles/valve/index_controller",
    "/interaction_profiles/htc/vive_controller",
];

/// Longest action or action set name
const MAX_NAME_LENGTH: usize = 63;

/// Kind of value an action produces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionType {
    /// Button
    BooleanInput = 1,
    /// Trigger or axis
    FloatInput = 2,
    /// Thumbstick or trackpad
    Vector2fInput = 3,
    /// Tracked pose
    PoseInput = 4,
    /// Haptic output
    VibrationOutput = 100,
}

/// Parameters for [`Runtime::create_action_set`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionSetCreateInfo {
    /// Well-formed name, unique per instance
    pub action_set_name: String,
    /// Human-readable name
    pub localized_action_set_name: String,
    /// Priority among active sets
    pub priority: u32,
}

/// Parameters for [`Runtime::create_action`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionCreateInfo {
    /// Well-formed name, unique per instance
    pub action_name: String,
    /// Value kind
    pub action_type: ActionType,
    /// Top-level paths the action may be filtered by
    pub subaction_paths: Vec<Path>,
    /// Human-readable name
    pub localized_action_name: String,
}

/// One suggested binding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActionSuggestedBinding {
    /// Bound action
    pub action: ActionHandle,
    /// Input or output path
    pub binding: Path,
}

/// Suggested bindings for one interaction profile
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InteractionProfileSuggestedBinding {
    /// Profile path
    pub interaction_profile: Path,
    /// Bindings replacing any earlier suggestion for the profile
    pub suggested_bindings: Vec<ActionSuggestedBinding>,
}

/// Action set to update in [`Runtime::sync_actions`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActiveActionSet {
    /// Set to update
    pub action_set: ActionSetHandle,
    /// Subaction filter, or [`Path::NULL`]
    pub subaction_path: Path,
}

/// Parameters for the action state queries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActionStateGetInfo {
    /// Queried action
    pub action: ActionHandle,
    /// Subaction filter, or [`Path::NULL`]
    pub subaction_path: Path,
}

/// State of a boolean action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ActionStateBoolean {
    /// Current value
    pub current_state: bool,
    /// Whether the value changed in the last sync
    pub changed_since_last_sync: bool,
    /// When the value last changed
    pub last_change_time: Time,
    /// Whether an input source drives the action
    pub is_active: bool,
}

/// State of a float action
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ActionStateFloat {
    /// Current value
    pub current_state: f32,
    /// Whether the value changed in the last sync
    pub changed_since_last_sync: bool,
    /// When the value last changed
    pub last_change_time: Time,
    /// Whether an input source drives the action
    pub is_active: bool,
}

/// State of a 2D vector action
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ActionStateVector2f {
    /// Current value
    pub current_state: [f32; 2],
    /// Whether the value changed in the last sync
    pub changed_since_last_sync: bool,
    /// When the value last changed
    pub last_change_time: Time,
    /// Whether an input source drives the action
    pub is_active: bool,
}

/// State of a pose action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ActionStatePose {
    /// Whether a tracked source drives the action
    pub is_active: bool,
}

pub(crate) struct ActionSetRecord {
    pub(crate) instance: InstanceHandle,
    pub(crate) name: String,
    pub(crate) localized_name: String,
    pub(crate) priority: u32,
    pub(crate) attached: bool,
}

pub(crate) struct ActionRecord {
    pub(crate) action_set: ActionSetHandle,
    pub(crate) instance: InstanceHandle,
    pub(crate) name: String,
    pub(crate) localized_name: String,
    pub(crate) action_type: ActionType,
    pub(crate) subaction_paths: Vec<Path>,
}

fn validate_name(name: &str, localized_name: &str) -> XrResult<()> {
    if name.is_empty() {
        return Err(XrError::NameInvalid);
    }
    if name.len() > MAX_NAME_LENGTH
        || !name.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '-' | '_' | '.'))
    {
        return Err(XrError::PathFormatInvalid(format!("'{name}' is not a valid name")));
    }
    if localized_name.is_empty() {
        return Err(XrError::LocalizedNameInvalid);
    }
    Ok(())
}

impl Runtime {
    /// Create an action set
    pub fn create_action_set(&mut self, instance: InstanceHandle, info: &ActionSetCreateInfo) -> XrResult<ActionSetHandle> {
        self.instances.get(instance)?;
        validate_name(&info.action_set_name, &info.localized_action_set_name)?;
        if self.action_sets.iter().any(|(_, set)| set.instance == instance && set.name == info.action_set_name) {
            log::warn!("Action set already exists: {}", info.localized_action_set_name);
            return Err(XrError::NameDuplicated(info.action_set_name.clone()));
        }

        log::info!("Registered action set: {}", info.localized_action_set_name);
        Ok(self.action_sets.insert(ActionSetRecord {
            instance,
            name: info.action_set_name.clone(),
            localized_name: info.localized_action_set_name.clone(),
            priority: info.priority,
            attached: false,
        }))
    }

    /// Destroy an action set and its actions
    pub fn destroy_action_set(&mut self, action_set: ActionSetHandle) -> XrResult<()> {
        self.action_sets.get(action_set)?;
        for action in self.actions.keys_where(|a| a.action_set == action_set) {
            self.actions.remove(action)?;
        }
        let record = self.action_sets.remove(action_set)?;
        log::info!("Unregistered action set: {}", record.localized_name);
        Ok(())
    }

    /// Create an action in a set that is not yet attached
    pub fn create_action(&mut self, action_set: ActionSetHandle, info: &ActionCreateInfo) -> XrResult<ActionHandle> {
        let set = self.action_sets.get(action_set)?;
        if set.attached {
            return Err(XrError::ActionSetsAlreadyAttached);
        }
        let instance = set.instance;
        validate_name(&info.action_name, &info.localized_action_name)?;
        if self.actions.iter().any(|(_, action)| action.instance == instance && action.name == info.action_name) {
            return Err(XrError::NameDuplicated(info.action_name.clone()));
        }

        let paths = &self.instances.get(instance)?.paths;
        for path in &info.subaction_paths {
            let value = paths.resolve(*path)?;
            if !SUBACTION_PATHS.contains(&value) {
                return Err(XrError::PathUnsupported(value.to_string()));
            }
        }

        log::debug!("Registered action: {} ({:?})", info.localized_action_name, info.action_type);
        Ok(self.actions.insert(ActionRecord {
            action_set,
            instance,
            name: info.action_name.clone(),
            localized_name: info.localized_action_name.clone(),
            action_type: info.action_type,
            subaction_paths: info.subaction_paths.clone(),
        }))
    }

    /// Destroy an action
    pub fn destroy_action(&mut self, action: ActionHandle) -> XrResult<()> {
        let record = self.actions.remove(action)?;
        log::debug!("Unregistered action: {}", record.localized_name);
        Ok(())
    }

    /// Store suggested bindings for an interaction profile
    pub fn suggest_interaction_profile_bindings(
        &mut self,
        instance: InstanceHandle,
        suggestion: &InteractionProfileSuggestedBinding,
    ) -> XrResult<()> {
        let record = self.instances.get(instance)?;
        let profile = record.paths.resolve(suggestion.interaction_profile)?;
        if !INTERACTION_PROFILES.contains(&profile) {
            return Err(XrError::PathUnsupported(profile.to_string()));
        }
        for binding in &suggestion.suggested_bindings {
            let action = self.actions.get(binding.action)?;
            if action.instance != instance {
                return Err(XrError::HandleInvalid);
            }
            if self.action_sets.get(action.action_set)?.attached {
                return Err(XrError::ActionSetsAlreadyAttached);
            }
            record.paths.resolve(binding.binding)?;
        }

        log::info!("{} bindings suggested for {profile}", suggestion.suggested_bindings.len());
        self.instances
            .get_mut(instance)?
            .suggested_bindings
            .insert(suggestion.interaction_profile, suggestion.suggested_bindings.clone());
        Ok(())
    }

    /// Attach action sets to a session; allowed once per session
    pub fn attach_session_action_sets(&mut self, session: SessionHandle, action_sets: &[ActionSetHandle]) -> XrResult<()> {
        let record = self.sessions.get(session)?;
        if record.attached_action_sets.is_some() {
            return Err(XrError::ActionSetsAlreadyAttached);
        }
        let instance = record.instance;
        for handle in action_sets {
            if self.action_sets.get(*handle)?.instance != instance {
                return Err(XrError::HandleInvalid);
            }
        }

        for handle in action_sets {
            let set = self.action_sets.get_mut(*handle)?;
            set.attached = true;
            log::info!("Attached action set: {} (priority {})", set.localized_name, set.priority);
        }
        self.sessions.get_mut(session)?.attached_action_sets = Some(action_sets.to_vec());
        Ok(())
    }

    fn ensure_attached(&self, session: SessionHandle, action_set: ActionSetHandle) -> XrResult<()> {
        let attached = self.sessions.get(session)?.attached_action_sets.as_deref().unwrap_or_default();
        if attached.contains(&action_set) {
            Ok(())
        } else {
            Err(XrError::ActionSetNotAttached)
        }
    }

    /// Update the state of the active action sets
    pub fn sync_actions(&mut self, session: SessionHandle, active: &[ActiveActionSet]) -> XrResult<()> {
        if !self.sessions.get(session)?.running {
            return Err(XrError::SessionNotRunning);
        }
        for set in active {
            self.ensure_attached(session, set.action_set)?;
        }
        log::trace!("Synced {} action sets", active.len());
        Ok(())
    }

    fn checked_action(&self, session: SessionHandle, info: &ActionStateGetInfo, expected: ActionType) -> XrResult<()> {
        let action = self.actions.get(info.action)?;
        if action.action_type != expected {
            return Err(XrError::ActionTypeMismatch);
        }
        self.ensure_attached(session, action.action_set)?;
        if !info.subaction_path.is_null() && !action.subaction_paths.contains(&info.subaction_path) {
            return Err(XrError::PathUnsupported(format!("subaction path {}", info.subaction_path.0)));
        }
        Ok(())
    }

    /// State of a boolean action
    pub fn get_action_state_boolean(&self, session: SessionHandle, info: &ActionStateGetInfo) -> XrResult<ActionStateBoolean> {
        self.checked_action(session, info, ActionType::BooleanInput)?;
        Ok(ActionStateBoolean::default())
    }

    /// State of a float action
    pub fn get_action_state_float(&self, session: SessionHandle, info: &ActionStateGetInfo) -> XrResult<ActionStateFloat> {
        self.checked_action(session, info, ActionType::FloatInput)?;
        Ok(ActionStateFloat::default())
    }

    /// State of a 2D vector action
    pub fn get_action_state_vector2f(
        &self,
        session: SessionHandle,
        info: &ActionStateGetInfo,
    ) -> XrResult<ActionStateVector2f> {
        self.checked_action(session, info, ActionType::Vector2fInput)?;
        Ok(ActionStateVector2f::default())
    }

    /// State of a pose action
    pub fn get_action_state_pose(&self, session: SessionHandle, info: &ActionStateGetInfo) -> XrResult<ActionStatePose> {
        self.checked_action(session, info, ActionType::PoseInput)?;
        Ok(ActionStatePose::default())
    }

    /// Pose an action space reports; the display tracks nothing
    pub(crate) fn action_pose(&self, action: ActionHandle) -> XrResult<(Pose, bool)> {
        self.actions.get(action)?;
        Ok((identity_pose(), false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::RuntimeSettings;
    use crate::runtime::InstanceCreateInfo;

    fn setup() -> (Runtime, InstanceHandle) {
        let mut runtime = Runtime::new(RuntimeSettings::default()).unwrap();
        let instance = runtime.create_instance(&InstanceCreateInfo::new("test")).unwrap();
        (runtime, instance)
    }

    fn set_info(name: &str) -> ActionSetCreateInfo {
        ActionSetCreateInfo {
            action_set_name: name.to_string(),
            localized_action_set_name: format!("{name} set"),
            priority: 0,
        }
    }

    fn action_info(name: &str, action_type: ActionType) -> ActionCreateInfo {
        ActionCreateInfo {
            action_name: name.to_string(),
            action_type,
            subaction_paths: Vec::new(),
            localized_action_name: format!("{name} action"),
        }
    }

    #[test]
    fn test_action_set_names() {
        let (mut runtime, instance) = setup();
        assert_eq!(runtime.create_action_set(instance, &set_info("")), Err(XrError::NameInvalid));
        assert!(matches!(runtime.create_action_set(instance, &set_info("Game Play")), Err(XrError::PathFormatInvalid(_))));

        let mut unnamed = set_info("gameplay");
        unnamed.localized_action_set_name.clear();
        assert_eq!(runtime.create_action_set(instance, &unnamed), Err(XrError::LocalizedNameInvalid));

        runtime.create_action_set(instance, &set_info("gameplay")).unwrap();
        assert_eq!(
            runtime.create_action_set(instance, &set_info("gameplay")),
            Err(XrError::NameDuplicated("gameplay".to_string()))
        );
    }

    #[test]
    fn test_action_names_are_unique_per_instance() {
        let (mut runtime, instance) = setup();
        let first = runtime.create_action_set(instance, &set_info("first")).unwrap();
        let second = runtime.create_action_set(instance, &set_info("second")).unwrap();
        runtime.create_action(first, &action_info("jump", ActionType::BooleanInput)).unwrap();
        assert_eq!(
            runtime.create_action(second, &action_info("jump", ActionType::BooleanInput)),
            Err(XrError::NameDuplicated("jump".to_string()))
        );
    }

    #[test]
    fn test_subaction_paths() {
        let (mut runtime, instance) = setup();
        let set = runtime.create_action_set(instance, &set_info("input")).unwrap();
        let left = runtime.string_to_path(instance, "/user/hand/left").unwrap();
        let treadmill = runtime.string_to_path(instance, "/user/treadmill").unwrap();

        let mut grab = action_info("grab", ActionType::FloatInput);
        grab.subaction_paths = vec![left];
        runtime.create_action(set, &grab).unwrap();

        let mut walk = action_info("walk", ActionType::Vector2fInput);
        walk.subaction_paths = vec![treadmill];
        assert!(matches!(runtime.create_action(set, &walk), Err(XrError::PathUnsupported(_))));

        let mut unknown = action_info("look", ActionType::Vector2fInput);
        unknown.subaction_paths = vec![Path(999)];
        assert_eq!(runtime.create_action(set, &unknown), Err(XrError::PathInvalid));
    }

    #[test]
    fn test_destroying_a_set_destroys_its_actions() {
        let (mut runtime, instance) = setup();
        let set = runtime.create_action_set(instance, &set_info("input")).unwrap();
        let action = runtime.create_action(set, &action_info("fire", ActionType::BooleanInput)).unwrap();
        runtime.destroy_action_set(set).unwrap();
        assert_eq!(runtime.destroy_action(action), Err(XrError::HandleInvalid));

        let set = runtime.create_action_set(instance, &set_info("input")).unwrap();
        runtime.create_action(set, &action_info("fire", ActionType::BooleanInput)).unwrap();
    }

    #[test]
    fn test_suggested_bindings() {
        let (mut runtime, instance) = setup();
        let set = runtime.create_action_set(instance, &set_info("input")).unwrap();
        let fire = runtime.create_action(set, &action_info("fire", ActionType::BooleanInput)).unwrap();
        let profile = runtime.string_to_path(instance, "/interaction_profiles/khr/simple_controller").unwrap();
        let select = runtime.string_to_path(instance, "/user/hand/right/input/select/click").unwrap();

        let suggestion = InteractionProfileSuggestedBinding {
            interaction_profile: profile,
            suggested_bindings: vec![ActionSuggestedBinding { action: fire, binding: select }],
        };
        runtime.suggest_interaction_profile_bindings(instance, &suggestion).unwrap();
        assert_eq!(runtime.instances.get(instance).unwrap().suggested_bindings[&profile].len(), 1);

        let bogus = runtime.string_to_path(instance, "/interaction_profiles/acme/stick").unwrap();
        let unknown_profile = InteractionProfileSuggestedBinding { interaction_profile: bogus, ..suggestion.clone() };
        assert!(matches!(
            runtime.suggest_interaction_profile_bindings(instance, &unknown_profile),
            Err(XrError::PathUnsupported(_))
        ));

        let unknown_binding = InteractionProfileSuggestedBinding {
            suggested_bindings: vec![ActionSuggestedBinding { action: fire, binding: Path(999) }],
            ..suggestion
        };
        assert_eq!(
            runtime.suggest_interaction_profile_bindings(instance, &unknown_binding),
            Err(XrError::PathInvalid)
        );
    }
}
