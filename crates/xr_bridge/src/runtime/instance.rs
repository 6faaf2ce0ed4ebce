//! Instances and instance-level enumeration

use std::collections::{HashMap, VecDeque};
use std::fmt;

use crate::core::error::{XrError, XrResult};
use crate::foundation::enumerate::enumerate_two_call;
use crate::foundation::handles::InstanceHandle;

use super::actions::ActionSuggestedBinding;
use super::path::{Path, PathTable};
use super::session::SessionEvent;
use super::system::{SystemId, SystemRecord};
use super::Runtime;

/// Name reported in the instance properties
pub const RUNTIME_NAME: &str = "XR Bridge";

/// Version reported in the instance properties
pub const RUNTIME_VERSION: Version = Version::new(0, 1, 0);

/// API version applications must request
pub const CURRENT_API_VERSION: Version = Version::new(1, 0, 0);

/// Vulkan graphics binding extension
pub const KHR_VULKAN_ENABLE2: &str = "XR_KHR_vulkan_enable2";

/// Software graphics binding extension
pub const MND_HEADLESS: &str = "XR_MND_headless";

/// Semantic version packed the way `XR_MAKE_VERSION` packs it
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Version {
    /// Major version
    pub major: u16,
    /// Minor version
    pub minor: u16,
    /// Patch version
    pub patch: u32,
}

impl Version {
    /// Create a version
    pub const fn new(major: u16, minor: u16, patch: u32) -> Self {
        Self { major, minor, patch }
    }

    /// 64-bit packed form: major in the top 16 bits, then minor, then patch
    pub const fn to_packed(self) -> u64 {
        ((self.major as u64) << 48) | ((self.minor as u64) << 32) | self.patch as u64
    }

    /// Unpack a 64-bit version
    #[allow(clippy::cast_possible_truncation)]
    pub const fn from_packed(packed: u64) -> Self {
        Self { major: (packed >> 48) as u16, minor: (packed >> 32) as u16, patch: packed as u32 }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// One supported instance extension
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExtensionProperties {
    /// Extension name
    pub extension_name: &'static str,
    /// Extension revision
    pub extension_version: u32,
}

/// Parameters for [`Runtime::create_instance`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceCreateInfo {
    /// Application name, must not be empty
    pub application_name: String,
    /// Application version
    pub application_version: u32,
    /// Engine name
    pub engine_name: String,
    /// Engine version
    pub engine_version: u32,
    /// Requested API version
    pub api_version: Version,
    /// API layers to enable
    pub enabled_api_layers: Vec<String>,
    /// Extensions to enable
    pub enabled_extensions: Vec<String>,
}

impl InstanceCreateInfo {
    /// Create info for `application_name` at the current API version
    pub fn new(application_name: impl Into<String>) -> Self {
        Self {
            application_name: application_name.into(),
            application_version: 1,
            engine_name: String::new(),
            engine_version: 0,
            api_version: CURRENT_API_VERSION,
            enabled_api_layers: Vec::new(),
            enabled_extensions: Vec::new(),
        }
    }

    /// Enable an extension
    #[must_use]
    pub fn with_extension(mut self, name: impl Into<String>) -> Self {
        self.enabled_extensions.push(name.into());
        self
    }
}

/// Runtime identification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceProperties {
    /// Runtime name
    pub runtime_name: String,
    /// Runtime version
    pub runtime_version: Version,
}

pub(crate) struct InstanceRecord {
    pub(crate) application_name: String,
    pub(crate) enabled_extensions: Vec<String>,
    pub(crate) system: SystemRecord,
    pub(crate) paths: PathTable,
    pub(crate) events: VecDeque<SessionEvent>,
    pub(crate) suggested_bindings: HashMap<Path, Vec<ActionSuggestedBinding>>,
}

impl InstanceRecord {
    pub(crate) fn extension_enabled(&self, name: &str) -> bool {
        self.enabled_extensions.iter().any(|e| e == name)
    }
}

impl Runtime {
    fn supported_extensions(&self) -> Vec<ExtensionProperties> {
        let mut extensions = Vec::new();
        if self.settings.runtime.support_vulkan {
            extensions.push(ExtensionProperties { extension_name: KHR_VULKAN_ENABLE2, extension_version: 2 });
        }
        if self.settings.runtime.support_software {
            extensions.push(ExtensionProperties { extension_name: MND_HEADLESS, extension_version: 2 });
        }
        extensions
    }

    /// Two-call enumeration of the extensions this runtime offers
    ///
    /// Extensions provided by API layers are not supported, so any layer
    /// name fails with [`XrError::ApiLayerNotPresent`].
    pub fn enumerate_instance_extension_properties(
        &self,
        layer_name: Option<&str>,
        output: &mut [ExtensionProperties],
    ) -> XrResult<usize> {
        if let Some(layer) = layer_name {
            log::warn!("Extension query for unknown API layer '{layer}'");
            return Err(XrError::ApiLayerNotPresent);
        }
        enumerate_two_call(&self.supported_extensions(), output)
    }

    /// Create the runtime's instance
    ///
    /// Only one instance may be alive at a time. Every enabled extension
    /// must be offered by the runtime; unknown names are all logged before
    /// the call fails.
    pub fn create_instance(&mut self, info: &InstanceCreateInfo) -> XrResult<InstanceHandle> {
        if !self.instances.is_empty() {
            return Err(XrError::LimitReached);
        }

        log::info!("Application name: {}", info.application_name);
        log::info!("Api version: {}", info.api_version);
        log::info!("Application version: {}", info.application_version);
        log::info!("Engine: {} {}", info.engine_name, info.engine_version);

        if info.application_name.is_empty() {
            return Err(XrError::NameInvalid);
        }
        if info.api_version.major != CURRENT_API_VERSION.major {
            return Err(XrError::ApiVersionUnsupported);
        }
        if let Some(layer) = info.enabled_api_layers.first() {
            log::error!("API layer '{layer}' is not provided by this runtime");
            return Err(XrError::ApiLayerNotPresent);
        }

        let supported = self.supported_extensions();
        let unsupported: Vec<&String> = info
            .enabled_extensions
            .iter()
            .filter(|name| !supported.iter().any(|e| e.extension_name == name.as_str()))
            .collect();
        if !unsupported.is_empty() {
            log::error!("Unsupported extensions:");
            for name in &unsupported {
                log::error!("\t{name}");
            }
            return Err(XrError::ExtensionNotPresent(unsupported[0].clone()));
        }

        let system_id = SystemId(self.next_system_id);
        self.next_system_id += 1;
        let handle = self.instances.insert(InstanceRecord {
            application_name: info.application_name.clone(),
            enabled_extensions: info.enabled_extensions.clone(),
            system: SystemRecord::new(system_id),
            paths: PathTable::default(),
            events: VecDeque::new(),
            suggested_bindings: HashMap::new(),
        });
        log::info!("Instance created for '{}' (system {})", info.application_name, system_id.0);
        Ok(handle)
    }

    /// Runtime name and version
    pub fn instance_properties(&self, instance: InstanceHandle) -> XrResult<InstanceProperties> {
        self.instances.get(instance)?;
        Ok(InstanceProperties { runtime_name: RUNTIME_NAME.to_string(), runtime_version: RUNTIME_VERSION })
    }

    /// Destroy an instance and every object created from it
    pub fn destroy_instance(&mut self, instance: InstanceHandle) -> XrResult<()> {
        self.instances.get(instance)?;

        for session in self.sessions.keys_where(|s| s.instance == instance) {
            self.destroy_session(session)?;
        }
        for action_set in self.action_sets.keys_where(|s| s.instance == instance) {
            self.destroy_action_set(action_set)?;
        }

        let record = self.instances.remove(instance)?;
        log::info!("Instance for '{}' destroyed", record.application_name);
        Ok(())
    }

    /// Next queued event, if any
    pub fn poll_event(&mut self, instance: InstanceHandle) -> XrResult<Option<SessionEvent>> {
        Ok(self.instances.get_mut(instance)?.events.pop_front())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::RuntimeSettings;

    fn runtime() -> Runtime {
        Runtime::new(RuntimeSettings::default()).unwrap()
    }

    #[test]
    fn test_version_packing() {
        let version = Version::new(1, 2, 3);
        assert_eq!(version.to_packed(), (1 << 48) | (2 << 32) | 3);
        assert_eq!(Version::from_packed(version.to_packed()), version);
        assert_eq!(version.to_string(), "1.2.3");
    }

    #[test]
    fn test_extension_enumeration() {
        let runtime = runtime();
        let count = runtime.enumerate_instance_extension_properties(None, &mut []).unwrap();
        let mut extensions = vec![ExtensionProperties::default(); count];
        runtime.enumerate_instance_extension_properties(None, &mut extensions).unwrap();
        assert!(extensions.iter().any(|e| e.extension_name == MND_HEADLESS));
        assert_eq!(
            runtime.enumerate_instance_extension_properties(Some("XR_APILAYER_test"), &mut []),
            Err(XrError::ApiLayerNotPresent)
        );
    }

    #[test]
    fn test_create_instance_validation() {
        let mut runtime = runtime();
        assert_eq!(runtime.create_instance(&InstanceCreateInfo::new("")), Err(XrError::NameInvalid));

        let mut old = InstanceCreateInfo::new("app");
        old.api_version = Version::new(0, 9, 0);
        assert_eq!(runtime.create_instance(&old), Err(XrError::ApiVersionUnsupported));

        let unknown = InstanceCreateInfo::new("app").with_extension("XR_EXT_unknown");
        assert_eq!(
            runtime.create_instance(&unknown),
            Err(XrError::ExtensionNotPresent("XR_EXT_unknown".to_string()))
        );

        let mut layered = InstanceCreateInfo::new("app");
        layered.enabled_api_layers.push("XR_APILAYER_test".to_string());
        assert_eq!(runtime.create_instance(&layered), Err(XrError::ApiLayerNotPresent));
    }

    #[test]
    fn test_single_live_instance() {
        let mut runtime = runtime();
        let info = InstanceCreateInfo::new("app").with_extension(MND_HEADLESS);
        let instance = runtime.create_instance(&info).unwrap();
        assert_eq!(runtime.create_instance(&info), Err(XrError::LimitReached));

        let properties = runtime.instance_properties(instance).unwrap();
        assert_eq!(properties.runtime_name, RUNTIME_NAME);

        runtime.destroy_instance(instance).unwrap();
        assert_eq!(runtime.instance_properties(instance), Err(XrError::HandleInvalid));
        let again = runtime.create_instance(&info).unwrap();
        assert_ne!(again, instance);
    }

    #[test]
    fn test_vulkan_extension_follows_settings() {
        let mut settings = RuntimeSettings::default();
        settings.runtime.support_vulkan = false;
        let mut runtime = Runtime::new(settings).unwrap();
        let info = InstanceCreateInfo::new("app").with_extension(KHR_VULKAN_ENABLE2);
        assert!(matches!(runtime.create_instance(&info), Err(XrError::ExtensionNotPresent(_))));
    }
}
