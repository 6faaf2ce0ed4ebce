//! Systems, view configurations and graphics requirements
//!
//! Each instance owns exactly one system: the monitor described by the
//! display settings. Stereo output is side by side, so each eye is
//! recommended half of the display width.

use std::f32::consts::PI;

use bitflags::bitflags;

use crate::core::error::{XrError, XrResult};
use crate::foundation::enumerate::enumerate_two_call;
use crate::foundation::handles::{InstanceHandle, SessionHandle, SpaceHandle};
use crate::foundation::math::{identity_pose, pose_from_position, relative_pose, Fov, Pose};
use crate::gpu::backends::headless::software_adapter;
use crate::gpu::{select_adapter, AdapterInfo, GraphicsApi};

use super::instance::{Version, KHR_VULKAN_ENABLE2, MND_HEADLESS};
use super::{Runtime, Time};

/// Most composition layers accepted per frame
pub const MAX_LAYER_COUNT: u32 = 16;

const EYE_HALF_FOV: f32 = PI / 3.5;

/// System identifier; zero is never handed out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SystemId(pub u64);

/// Kind of device the application targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FormFactor {
    /// Head-mounted display
    HeadMountedDisplay = 1,
    /// Handheld display
    HandheldDisplay = 2,
}

/// Arrangement of views the application renders
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ViewConfigurationType {
    /// One view
    PrimaryMono = 1,
    /// Two views, left then right
    PrimaryStereo = 2,
}

impl ViewConfigurationType {
    /// Number of views in the configuration
    pub const fn view_count(self) -> usize {
        match self {
            Self::PrimaryMono => 1,
            Self::PrimaryStereo => 2,
        }
    }
}

/// How rendered content combines with the physical world
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EnvironmentBlendMode {
    /// Content replaces what is behind the display
    Opaque = 1,
    /// Content is added to the real world
    Additive = 2,
    /// Content is alpha blended over the real world
    AlphaBlend = 3,
}

/// Graphics limits of a system
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SystemGraphicsProperties {
    /// Widest swapchain image
    pub max_swapchain_image_width: u32,
    /// Tallest swapchain image
    pub max_swapchain_image_height: u32,
    /// Most layers per frame
    pub max_layer_count: u32,
}

/// Tracking capabilities of a system
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SystemTrackingProperties {
    /// Orientation is tracked
    pub orientation_tracking: bool,
    /// Position is tracked
    pub position_tracking: bool,
}

/// Description of a system
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemProperties {
    /// System id
    pub system_id: SystemId,
    /// USB vendor id
    pub vendor_id: u32,
    /// Display name
    pub system_name: String,
    /// Graphics limits
    pub graphics_properties: SystemGraphicsProperties,
    /// Tracking capabilities
    pub tracking_properties: SystemTrackingProperties,
}

/// Properties of a view configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViewConfigurationProperties {
    /// Configuration described
    pub view_configuration_type: ViewConfigurationType,
    /// Whether the application may render with its own field of view
    pub fov_mutable: bool,
}

/// Recommended and maximum image sizes for one view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ViewConfigurationView {
    /// Recommended width
    pub recommended_image_rect_width: u32,
    /// Largest width
    pub max_image_rect_width: u32,
    /// Recommended height
    pub recommended_image_rect_height: u32,
    /// Largest height
    pub max_image_rect_height: u32,
    /// Recommended sample count
    pub recommended_swapchain_sample_count: u32,
    /// Largest sample count
    pub max_swapchain_sample_count: u32,
}

/// Graphics adapter and API versions a session must be created with
#[derive(Debug, Clone, PartialEq)]
pub struct GraphicsRequirements {
    /// Adapter the session's device must be created on
    pub adapter: AdapterInfo,
    /// Oldest supported API version
    pub min_api_version: Version,
    /// Newest tested API version
    pub max_api_version: Version,
}

bitflags! {
    /// Validity of located views
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ViewStateFlags: u64 {
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

/// Parameters for [`Runtime::locate_views`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViewLocateInfo {
    /// Configuration to locate
    pub view_configuration_type: ViewConfigurationType,
    /// Time the views will be displayed
    pub display_time: Time,
    /// Space the poses are expressed in
    pub space: SpaceHandle,
}

/// Validity of a [`Runtime::locate_views`] result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ViewState {
    /// Validity flags
    pub view_state_flags: ViewStateFlags,
}

/// One located eye
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct View {
    /// Eye pose
    pub pose: Pose,
    /// Eye field of view
    pub fov: Fov,
}

impl Default for View {
    fn default() -> Self {
        Self { pose: identity_pose(), fov: Fov::default() }
    }
}

pub(crate) struct SystemRecord {
    pub(crate) id: SystemId,
    pub(crate) form_factor: Option<FormFactor>,
    pub(crate) graphics_api: Option<GraphicsApi>,
}

impl SystemRecord {
    pub(crate) const fn new(id: SystemId) -> Self {
        Self { id, form_factor: None, graphics_api: None }
    }
}

const SUPPORTED_FORM_FACTORS: [FormFactor; 2] = [FormFactor::HeadMountedDisplay, FormFactor::HandheldDisplay];
const VIEW_CONFIGURATIONS: [ViewConfigurationType; 2] =
    [ViewConfigurationType::PrimaryMono, ViewConfigurationType::PrimaryStereo];
const BLEND_MODES: [EnvironmentBlendMode; 1] = [EnvironmentBlendMode::Opaque];

/// Whether end-of-frame may use `mode`
pub(crate) fn blend_mode_supported(mode: EnvironmentBlendMode) -> bool {
    BLEND_MODES.contains(&mode)
}

impl Runtime {
    pub(crate) fn system_record(&self, instance: InstanceHandle, system: SystemId) -> XrResult<&SystemRecord> {
        let record = &self.instances.get(instance)?.system;
        if record.id != system {
            return Err(XrError::SystemInvalid);
        }
        Ok(record)
    }

    fn system_record_mut(&mut self, instance: InstanceHandle, system: SystemId) -> XrResult<&mut SystemRecord> {
        let record = &mut self.instances.get_mut(instance)?.system;
        if record.id != system {
            return Err(XrError::SystemInvalid);
        }
        Ok(record)
    }

    /// System for `form_factor`
    pub fn get_system(&mut self, instance: InstanceHandle, form_factor: FormFactor) -> XrResult<SystemId> {
        if !SUPPORTED_FORM_FACTORS.contains(&form_factor) {
            return Err(XrError::FormFactorUnsupported);
        }
        let available = self.settings.display.available;
        let record = &mut self.instances.get_mut(instance)?.system;
        if !available {
            log::warn!("No display available for {form_factor:?}");
            return Err(XrError::FormFactorUnavailable);
        }
        record.form_factor = Some(form_factor);
        Ok(record.id)
    }

    /// Description of a system
    pub fn system_properties(&self, instance: InstanceHandle, system: SystemId) -> XrResult<SystemProperties> {
        let record = self.system_record(instance, system)?;
        let display = &self.settings.display;
        Ok(SystemProperties {
            system_id: record.id,
            vendor_id: display.vendor_id,
            system_name: display.system_name.clone(),
            graphics_properties: SystemGraphicsProperties {
                max_swapchain_image_width: display.width,
                max_swapchain_image_height: display.height,
                max_layer_count: MAX_LAYER_COUNT,
            },
            tracking_properties: SystemTrackingProperties { orientation_tracking: false, position_tracking: false },
        })
    }

    /// Two-call enumeration of blend modes for a view configuration
    pub fn enumerate_environment_blend_modes(
        &self,
        instance: InstanceHandle,
        system: SystemId,
        view_configuration_type: ViewConfigurationType,
        output: &mut [EnvironmentBlendMode],
    ) -> XrResult<usize> {
        self.system_record(instance, system)?;
        log::debug!("Requested blend modes for {view_configuration_type:?}");
        enumerate_two_call(&BLEND_MODES, output)
    }

    /// Two-call enumeration of supported view configurations
    pub fn enumerate_view_configurations(
        &self,
        instance: InstanceHandle,
        system: SystemId,
        output: &mut [ViewConfigurationType],
    ) -> XrResult<usize> {
        self.system_record(instance, system)?;
        enumerate_two_call(&VIEW_CONFIGURATIONS, output)
    }

    /// Properties of a view configuration
    pub fn view_configuration_properties(
        &self,
        instance: InstanceHandle,
        system: SystemId,
        view_configuration_type: ViewConfigurationType,
    ) -> XrResult<ViewConfigurationProperties> {
        self.system_record(instance, system)?;
        Ok(ViewConfigurationProperties { view_configuration_type, fov_mutable: true })
    }

    /// Two-call enumeration of the views of a configuration
    pub fn enumerate_view_configuration_views(
        &self,
        instance: InstanceHandle,
        system: SystemId,
        view_configuration_type: ViewConfigurationType,
        output: &mut [ViewConfigurationView],
    ) -> XrResult<usize> {
        self.system_record(instance, system)?;
        let views = self.view_configuration_views(view_configuration_type);
        enumerate_two_call(&views, output)
    }

    pub(crate) fn view_configuration_views(&self, view_configuration_type: ViewConfigurationType) -> Vec<ViewConfigurationView> {
        let display = &self.settings.display;
        let count = view_configuration_type.view_count();
        let recommended_width = match view_configuration_type {
            ViewConfigurationType::PrimaryMono => display.width,
            ViewConfigurationType::PrimaryStereo => display.width / 2,
        };
        let view = ViewConfigurationView {
            recommended_image_rect_width: recommended_width,
            max_image_rect_width: display.width,
            recommended_image_rect_height: display.height,
            max_image_rect_height: display.height,
            recommended_swapchain_sample_count: 1,
            max_swapchain_sample_count: 1,
        };
        vec![view; count]
    }

    /// Locate the eyes of a view configuration in `info.space`
    ///
    /// The display is untracked: the head sits at the common origin and the
    /// eyes are offset by half the configured IPD along X. Views located in
    /// an action space have no valid pose.
    pub fn locate_views(
        &self,
        session: SessionHandle,
        info: &ViewLocateInfo,
        output: &mut [View],
    ) -> XrResult<(ViewState, usize)> {
        self.sessions.get(session)?;
        let base = self.space_pose(session, info.space)?;

        let half_ipd = self.settings.display.ipd_meters / 2.0;
        let eye_offsets = match info.view_configuration_type {
            ViewConfigurationType::PrimaryMono => vec![0.0],
            ViewConfigurationType::PrimaryStereo => vec![-half_ipd, half_ipd],
        };
        let fov = Fov::symmetric(EYE_HALF_FOV);

        let (views, flags): (Vec<View>, ViewStateFlags) = match base {
            Some(base) => (
                eye_offsets
                    .iter()
                    .map(|x| View { pose: relative_pose(&base, &pose_from_position(*x, 0.0, 0.0)), fov })
                    .collect(),
                ViewStateFlags::ORIENTATION_VALID | ViewStateFlags::POSITION_VALID,
            ),
            None => (vec![View { pose: identity_pose(), fov }; eye_offsets.len()], ViewStateFlags::empty()),
        };

        let count = enumerate_two_call(&views, output)?;
        Ok((ViewState { view_state_flags: flags }, count))
    }

    /// Graphics requirements for the software backend
    pub fn get_software_graphics_requirements(
        &mut self,
        instance: InstanceHandle,
        system: SystemId,
    ) -> XrResult<GraphicsRequirements> {
        if !self.instances.get(instance)?.extension_enabled(MND_HEADLESS) {
            return Err(XrError::FunctionUnsupported);
        }
        let adapters = [software_adapter()];
        self.record_graphics_requirements(
            instance,
            system,
            GraphicsApi::Software,
            &adapters,
            (Version::new(1, 0, 0), Version::new(1, 0, 0)),
        )
    }

    /// Graphics requirements for the Vulkan backend
    pub fn get_vulkan_graphics_requirements(
        &mut self,
        instance: InstanceHandle,
        system: SystemId,
    ) -> XrResult<GraphicsRequirements> {
        if !self.instances.get(instance)?.extension_enabled(KHR_VULKAN_ENABLE2) {
            return Err(XrError::FunctionUnsupported);
        }
        #[cfg(feature = "vulkan")]
        let adapters = crate::gpu::backends::vulkan::enumerate_adapters()?;
        #[cfg(not(feature = "vulkan"))]
        let adapters: Vec<AdapterInfo> = Vec::new();

        self.record_graphics_requirements(
            instance,
            system,
            GraphicsApi::Vulkan,
            &adapters,
            (Version::new(1, 3, 0), Version::new(1, 3, 0)),
        )
    }

    fn record_graphics_requirements(
        &mut self,
        instance: InstanceHandle,
        system: SystemId,
        api: GraphicsApi,
        adapters: &[AdapterInfo],
        (min_api_version, max_api_version): (Version, Version),
    ) -> XrResult<GraphicsRequirements> {
        let record = self.system_record_mut(instance, system)?;
        let Some(adapter) = select_adapter(adapters) else {
            log::error!("No devices found for {api:?}");
            return Err(XrError::RuntimeFailure(format!("No {api:?} adapters found")));
        };
        log::info!("Selected adapter '{}' for {api:?} (score {:.0})", adapter.name, adapter.score());
        record.graphics_api = Some(api);
        Ok(GraphicsRequirements { adapter: adapter.clone(), min_api_version, max_api_version })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::RuntimeSettings;
    use crate::runtime::InstanceCreateInfo;

    fn setup(settings: RuntimeSettings) -> (Runtime, InstanceHandle) {
        let mut runtime = Runtime::new(settings).unwrap();
        let instance = runtime.create_instance(&InstanceCreateInfo::new("test").with_extension(MND_HEADLESS)).unwrap();
        (runtime, instance)
    }

    #[test]
    fn test_get_system() {
        let (mut runtime, instance) = setup(RuntimeSettings::default());
        let hmd = runtime.get_system(instance, FormFactor::HeadMountedDisplay).unwrap();
        let handheld = runtime.get_system(instance, FormFactor::HandheldDisplay).unwrap();
        assert_eq!(hmd, handheld);
        assert_ne!(hmd, SystemId(0));
        assert_eq!(runtime.system_properties(instance, SystemId(hmd.0 + 1)), Err(XrError::SystemInvalid));
    }

    #[test]
    fn test_unavailable_display() {
        let mut settings = RuntimeSettings::default();
        settings.display.available = false;
        let (mut runtime, instance) = setup(settings);
        assert_eq!(
            runtime.get_system(instance, FormFactor::HeadMountedDisplay),
            Err(XrError::FormFactorUnavailable)
        );
    }

    #[test]
    fn test_system_properties_follow_display() {
        let (mut runtime, instance) = setup(RuntimeSettings::default().with_display_size(2560, 1440));
        let system = runtime.get_system(instance, FormFactor::HeadMountedDisplay).unwrap();
        let properties = runtime.system_properties(instance, system).unwrap();
        assert_eq!(properties.system_name, "SR Monitor");
        assert_eq!(properties.vendor_id, 0x354B);
        assert_eq!(properties.graphics_properties.max_swapchain_image_width, 2560);
        assert_eq!(properties.graphics_properties.max_swapchain_image_height, 1440);
        assert_eq!(properties.graphics_properties.max_layer_count, MAX_LAYER_COUNT);
        assert!(!properties.tracking_properties.position_tracking);
    }

    #[test]
    fn test_view_configuration_views() {
        let (mut runtime, instance) = setup(RuntimeSettings::default().with_display_size(1920, 1080));
        let system = runtime.get_system(instance, FormFactor::HeadMountedDisplay).unwrap();

        let mut configs = [ViewConfigurationType::PrimaryMono; 2];
        assert_eq!(runtime.enumerate_view_configurations(instance, system, &mut configs).unwrap(), 2);
        assert_eq!(configs[1], ViewConfigurationType::PrimaryStereo);

        let stereo = ViewConfigurationType::PrimaryStereo;
        assert_eq!(runtime.enumerate_view_configuration_views(instance, system, stereo, &mut []).unwrap(), 2);
        let mut one = [ViewConfigurationView::default(); 1];
        assert!(matches!(
            runtime.enumerate_view_configuration_views(instance, system, stereo, &mut one),
            Err(XrError::SizeInsufficient { required: 2, capacity: 1 })
        ));
        let mut views = [ViewConfigurationView::default(); 2];
        runtime.enumerate_view_configuration_views(instance, system, stereo, &mut views).unwrap();
        assert_eq!(views[0].recommended_image_rect_width, 960);
        assert_eq!(views[0].max_image_rect_width, 1920);
        assert_eq!(views[1].recommended_image_rect_height, 1080);

        let mut mono = [ViewConfigurationView::default(); 1];
        let mono_config = ViewConfigurationType::PrimaryMono;
        assert_eq!(runtime.enumerate_view_configuration_views(instance, system, mono_config, &mut mono).unwrap(), 1);
        assert_eq!(mono[0].recommended_image_rect_width, 1920);
    }

    #[test]
    fn test_blend_modes() {
        let (mut runtime, instance) = setup(RuntimeSettings::default());
        let system = runtime.get_system(instance, FormFactor::HeadMountedDisplay).unwrap();
        let stereo = ViewConfigurationType::PrimaryStereo;
        let mut modes = [EnvironmentBlendMode::Additive; 1];
        assert_eq!(runtime.enumerate_environment_blend_modes(instance, system, stereo, &mut modes).unwrap(), 1);
        assert_eq!(modes[0], EnvironmentBlendMode::Opaque);
        assert!(!blend_mode_supported(EnvironmentBlendMode::AlphaBlend));
    }

    #[test]
    fn test_software_requirements() {
        let (mut runtime, instance) = setup(RuntimeSettings::default());
        let system = runtime.get_system(instance, FormFactor::HeadMountedDisplay).unwrap();
        let requirements = runtime.get_software_graphics_requirements(instance, system).unwrap();
        assert_eq!(requirements.adapter, software_adapter());
        assert_eq!(runtime.system_record(instance, system).unwrap().graphics_api, Some(GraphicsApi::Software));
    }

    #[test]
    fn test_requirements_need_their_extension() {
        let mut runtime = Runtime::new(RuntimeSettings::default()).unwrap();
        let instance = runtime.create_instance(&InstanceCreateInfo::new("test")).unwrap();
        let system = runtime.get_system(instance, FormFactor::HeadMountedDisplay).unwrap();
        assert_eq!(
            runtime.get_software_graphics_requirements(instance, system),
            Err(XrError::FunctionUnsupported)
        );
        assert_eq!(runtime.get_vulkan_graphics_requirements(instance, system), Err(XrError::FunctionUnsupported));
    }
}
