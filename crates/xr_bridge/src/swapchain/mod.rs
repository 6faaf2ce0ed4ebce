//! Proxy swapchains
//!
//! A proxy swapchain is a runtime-owned ring of images the application
//! renders into instead of a native presentation surface. The compositor
//! samples the most recently released image at end of frame and signals the
//! swapchain's fence once it has finished reading.

mod proxy;
mod state;

pub use proxy::{ProxySwapchain, ProxySwapchainDesc};
pub use state::{resource_usage, ImageState};
