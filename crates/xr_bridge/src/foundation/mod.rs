//! Foundation module - Core utilities and types
//!
//! This module provides fundamental utilities used throughout the runtime:
//! - Generation-checked handles and registries
//! - Pose and rectangle math
//! - Two-call enumeration
//! - Logging utilities

pub mod enumerate;
pub mod handles;
pub mod logging;
pub mod math;
