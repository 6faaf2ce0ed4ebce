//! Frame composition
//!
//! The compositor draws every projection view of every submitted layer into
//! the presentation target, side by side, then signals each source
//! swapchain's fence once the GPU has finished reading it.

#[allow(clippy::module_inception)]
mod compositor;
mod layers;
mod pipeline;

pub use compositor::{transition_image, CompositionTarget, Compositor, SwapchainResolver};
pub use layers::{
    CompositionLayer, CompositionLayerFlags, CompositionLayerProjection, CompositionLayerQuad, EyeVisibility,
    ProjectionView, SwapchainSubImage,
};
pub use pipeline::{load_spirv, CompositionPipeline};
