//! GPU backend implementations

pub mod headless;

#[cfg(feature = "vulkan")]
pub mod vulkan;
