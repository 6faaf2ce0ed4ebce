//! Runtime error type and its OpenXR result codes

use thiserror::Error;

use crate::gpu::GpuError;

/// Errors returned by runtime operations
///
/// Each variant maps to one OpenXR result through [`XrError::result_code`].
/// [`XrError::TimeoutExpired`] is a qualified success in OpenXR terms: the
/// call may simply be retried.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum XrError {
    /// Parameter validation failed
    #[error("Validation failure: {0}")]
    ValidationFailure(String),

    /// Backend, allocation or GPU failure
    #[error("Runtime failure: {0}")]
    RuntimeFailure(String),

    /// Requested API version is not supported
    #[error("API version unsupported")]
    ApiVersionUnsupported,

    /// Runtime initialization failed
    #[error("Initialization failed: {0}")]
    InitializationFailed(String),

    /// Function is not supported by this runtime
    #[error("Function unsupported")]
    FunctionUnsupported,

    /// Requested extension is not provided
    #[error("Extension not present: {0}")]
    ExtensionNotPresent(String),

    /// An object limit was reached
    #[error("Limit reached")]
    LimitReached,

    /// Two-call output buffer too small
    #[error("Size insufficient: {required} required, {capacity} provided")]
    SizeInsufficient {
        /// Elements needed
        required: usize,
        /// Elements provided
        capacity: usize,
    },

    /// Handle unknown or stale
    #[error("Handle invalid")]
    HandleInvalid,

    /// Session is already running
    #[error("Session running")]
    SessionRunning,

    /// Session is not running
    #[error("Session not running")]
    SessionNotRunning,

    /// Unknown system id
    #[error("System invalid")]
    SystemInvalid,

    /// Path was never interned
    #[error("Path invalid")]
    PathInvalid,

    /// Path is well formed but not usable here
    #[error("Path unsupported: {0}")]
    PathUnsupported(String),

    /// Path string is malformed
    #[error("Path format invalid: {0}")]
    PathFormatInvalid(String),

    /// Composition layer is malformed
    #[error("Layer invalid: {0}")]
    LayerInvalid(String),

    /// Too many composition layers
    #[error("Layer limit exceeded")]
    LayerLimitExceeded,

    /// Image rectangle is empty or outside the swapchain
    #[error("Swapchain rect invalid")]
    SwapchainRectInvalid,

    /// Swapchain format not offered by the device
    #[error("Swapchain format unsupported")]
    SwapchainFormatUnsupported,

    /// Action queried with the wrong type
    #[error("Action type mismatch")]
    ActionTypeMismatch,

    /// Session not in the ready state
    #[error("Session not ready")]
    SessionNotReady,

    /// Session not in the stopping state
    #[error("Session not stopping")]
    SessionNotStopping,

    /// Reference space type unsupported
    #[error("Reference space unsupported")]
    ReferenceSpaceUnsupported,

    /// Form factor unknown to this runtime
    #[error("Form factor unsupported")]
    FormFactorUnsupported,

    /// Form factor known but no display is available
    #[error("Form factor unavailable")]
    FormFactorUnavailable,

    /// API layer not provided by this runtime
    #[error("API layer not present")]
    ApiLayerNotPresent,

    /// A state-machine precondition was violated
    #[error("Call order invalid")]
    CallOrderInvalid,

    /// Graphics device does not match the queried requirements
    #[error("Graphics device invalid")]
    GraphicsDeviceInvalid,

    /// View configuration unsupported
    #[error("View configuration type unsupported")]
    ViewConfigurationTypeUnsupported,

    /// Environment blend mode unsupported
    #[error("Environment blend mode unsupported")]
    EnvironmentBlendModeUnsupported,

    /// Name already in use
    #[error("Name duplicated: {0}")]
    NameDuplicated(String),

    /// Name is empty or malformed
    #[error("Name invalid")]
    NameInvalid,

    /// Action set not attached to the session
    #[error("Action set not attached")]
    ActionSetNotAttached,

    /// Action sets were already attached to the session
    #[error("Action sets already attached")]
    ActionSetsAlreadyAttached,

    /// Localized name is empty
    #[error("Localized name invalid")]
    LocalizedNameInvalid,

    /// Graphics requirements were not queried before session creation
    #[error("Graphics requirements call missing")]
    GraphicsRequirementsCallMissing,

    /// Bounded wait expired
    #[error("Timeout expired")]
    TimeoutExpired,
}

impl XrError {
    /// OpenXR `XrResult` value for this error
    pub const fn result_code(&self) -> i32 {
        match self {
            Self::ValidationFailure(_) => -1,
            Self::RuntimeFailure(_) => -2,
            Self::ApiVersionUnsupported => -4,
            Self::InitializationFailed(_) => -6,
            Self::FunctionUnsupported => -7,
            Self::ExtensionNotPresent(_) => -9,
            Self::LimitReached => -10,
            Self::SizeInsufficient { .. } => -11,
            Self::HandleInvalid => -12,
            Self::SessionRunning => -14,
            Self::SessionNotRunning => -16,
            Self::SystemInvalid => -18,
            Self::PathInvalid => -19,
            Self::PathUnsupported(_) => -20,
            Self::PathFormatInvalid(_) => -21,
            Self::LayerInvalid(_) => -23,
            Self::LayerLimitExceeded => -24,
            Self::SwapchainRectInvalid => -25,
            Self::SwapchainFormatUnsupported => -26,
            Self::ActionTypeMismatch => -27,
            Self::SessionNotReady => -28,
            Self::SessionNotStopping => -29,
            Self::ReferenceSpaceUnsupported => -31,
            Self::FormFactorUnsupported => -34,
            Self::FormFactorUnavailable => -35,
            Self::ApiLayerNotPresent => -36,
            Self::CallOrderInvalid => -37,
            Self::GraphicsDeviceInvalid => -38,
            Self::ViewConfigurationTypeUnsupported => -41,
            Self::EnvironmentBlendModeUnsupported => -42,
            Self::NameDuplicated(_) => -44,
            Self::NameInvalid => -45,
            Self::ActionSetNotAttached => -46,
            Self::ActionSetsAlreadyAttached => -47,
            Self::LocalizedNameInvalid => -49,
            Self::GraphicsRequirementsCallMissing => -50,
            Self::TimeoutExpired => 1,
        }
    }

    /// Whether the result counts as success in OpenXR terms
    pub const fn is_qualified_success(&self) -> bool {
        self.result_code() >= 0
    }
}

impl From<GpuError> for XrError {
    fn from(err: GpuError) -> Self {
        Self::RuntimeFailure(err.to_string())
    }
}

/// Result type for runtime operations
pub type XrResult<T> = Result<T, XrError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_codes() {
        assert_eq!(XrError::HandleInvalid.result_code(), -12);
        assert_eq!(XrError::CallOrderInvalid.result_code(), -37);
        assert_eq!(XrError::SizeInsufficient { required: 2, capacity: 1 }.result_code(), -11);
        assert_eq!(XrError::RuntimeFailure(String::new()).result_code(), -2);
        assert_eq!(XrError::ReferenceSpaceUnsupported.result_code(), -31);
        assert_eq!(XrError::GraphicsRequirementsCallMissing.result_code(), -50);
    }

    #[test]
    fn test_timeout_is_qualified_success() {
        assert!(XrError::TimeoutExpired.is_qualified_success());
        assert!(!XrError::SystemInvalid.is_qualified_success());
    }

    #[test]
    fn test_gpu_error_becomes_runtime_failure() {
        let err: XrError = GpuError::DeviceLost.into();
        assert!(matches!(err, XrError::RuntimeFailure(_)));
    }
}
