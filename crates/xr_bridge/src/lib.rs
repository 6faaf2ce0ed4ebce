//! # XR Bridge
//!
//! An OpenXR-compatible runtime that presents application frames on a
//! conventional monitor.
//!
//! ## Features
//!
//! - **Proxy Swapchains**: runtime-owned image rings with the
//!   acquire/wait/release state machine and fence-based completion
//! - **Compositor**: samples every projection view into a side-by-side
//!   presentation target with paired resource-state transitions
//! - **Backends**: a software backend with an asynchronous queue thread, and
//!   a Vulkan backend behind the `vulkan` feature
//! - **Runtime Context**: instances, systems, sessions, spaces, paths and
//!   actions stored in generation-checked registries
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use xr_bridge::prelude::*;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let settings = RuntimeSettings::default();
//!     let mut runtime = Runtime::new(settings)?;
//!
//!     let instance = runtime.create_instance(&InstanceCreateInfo::new("demo").with_extension(MND_HEADLESS))?;
//!     let system = runtime.get_system(instance, FormFactor::HeadMountedDisplay)?;
//!     runtime.get_software_graphics_requirements(instance, system)?;
//!
//!     let device: Arc<dyn GraphicsDevice> = Arc::new(HeadlessDevice::new()?);
//!     let session = runtime.create_session(instance, &SessionCreateInfo { system, device })?;
//!     runtime.begin_session(session, ViewConfigurationType::PrimaryStereo)?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions, clippy::similar_names, clippy::too_many_arguments)]

pub mod core;
pub mod foundation;
pub mod gpu;
pub mod swapchain;
pub mod compositor;
pub mod presentation;
pub mod runtime;

/// Common imports for runtime users
pub mod prelude {
    pub use crate::{
        core::{
            config::{Config, ConfigError, RuntimeSettings},
            error::{XrError, XrResult},
        },
        compositor::{CompositionLayer, CompositionLayerFlags, CompositionLayerProjection, ProjectionView, SwapchainSubImage},
        foundation::math::{Extent2Di, Fov, Offset2Di, Pose, Rect2Di},
        gpu::{
            backends::headless::HeadlessDevice,
            types::{Format, SwapchainUsageFlags},
            GraphicsApi, GraphicsDevice, Timeout,
        },
        runtime::{
            ActionCreateInfo, ActionSetCreateInfo, ActionType, EnvironmentBlendMode, FormFactor,
            FrameBeginStatus, FrameEndInfo, FrameState, InstanceCreateInfo, ReferenceSpaceCreateInfo,
            ReferenceSpaceType, Runtime, SessionCreateInfo, SessionEvent, SessionState, SwapchainCreateInfo,
            ViewConfigurationType, KHR_VULKAN_ENABLE2, MND_HEADLESS,
        },
        swapchain::ImageState,
    };
}
