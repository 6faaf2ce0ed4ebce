//! Composition layers submitted at end of frame

use bitflags::bitflags;

use crate::foundation::handles::{SpaceHandle, SwapchainHandle};
use crate::foundation::math::{Fov, Pose, Rect2Di};
use crate::gpu::CompositionConstants;
use crate::swapchain::ProxySwapchainDesc;

bitflags! {
    /// Layer flags, numbered as in `XrCompositionLayerFlags`
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct CompositionLayerFlags: u64 {
        /// Apply chromatic aberration correction
        const CORRECT_CHROMATIC_ABERRATION = 0x1;
        /// Blend using the texture's alpha channel
        const BLEND_TEXTURE_SOURCE_ALPHA = 0x2;
        /// Color is not premultiplied by alpha
        const UNPREMULTIPLIED_ALPHA = 0x4;
    }
}

/// Region of a swapchain image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapchainSubImage {
    /// Source swapchain
    pub swapchain: SwapchainHandle,
    /// Rectangle within the image
    pub image_rect: Rect2Di,
    /// Array layer
    pub image_array_index: u32,
}

/// One eye of a projection layer
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectionView {
    /// Eye pose the view was rendered with
    pub pose: Pose,
    /// Field of view the view was rendered with
    pub fov: Fov,
    /// Rendered image
    pub sub_image: SwapchainSubImage,
}

/// Multi-view 3D scene layer
#[derive(Debug, Clone, PartialEq)]
pub struct CompositionLayerProjection {
    /// Layer flags
    pub layer_flags: CompositionLayerFlags,
    /// Space the view poses are expressed in
    pub space: SpaceHandle,
    /// One view per eye
    pub views: Vec<ProjectionView>,
}

/// Which eyes see a quad
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EyeVisibility {
    /// Both eyes
    Both,
    /// Left eye only
    Left,
    /// Right eye only
    Right,
}

/// Flat 2D overlay layer
#[derive(Debug, Clone, PartialEq)]
pub struct CompositionLayerQuad {
    /// Layer flags
    pub layer_flags: CompositionLayerFlags,
    /// Space the pose is expressed in
    pub space: SpaceHandle,
    /// Eyes the quad is visible to
    pub eye_visibility: EyeVisibility,
    /// Image shown on the quad
    pub sub_image: SwapchainSubImage,
    /// Center of the quad
    pub pose: Pose,
    /// Width and height in meters
    pub size: (f32, f32),
}

/// One unit of frame content
#[derive(Debug, Clone, PartialEq)]
pub enum CompositionLayer {
    /// Projection layer
    Projection(CompositionLayerProjection),
    /// Quad layer
    Quad(CompositionLayerQuad),
}

impl CompositionLayer {
    /// Layer flags
    pub const fn flags(&self) -> CompositionLayerFlags {
        match self {
            Self::Projection(layer) => layer.layer_flags,
            Self::Quad(layer) => layer.layer_flags,
        }
    }

    /// Space the layer is positioned in
    pub const fn space(&self) -> SpaceHandle {
        match self {
            Self::Projection(layer) => layer.space,
            Self::Quad(layer) => layer.space,
        }
    }

    /// Every sub-image the layer references
    pub fn sub_images(&self) -> Vec<SwapchainSubImage> {
        match self {
            Self::Projection(layer) => layer.views.iter().map(|v| v.sub_image).collect(),
            Self::Quad(layer) => vec![layer.sub_image],
        }
    }
}

/// Shader constants for drawing `rect` of a swapchain with `flags`
#[allow(clippy::cast_precision_loss)]
pub(crate) fn layer_constants(
    flags: CompositionLayerFlags,
    rect: Rect2Di,
    desc: &ProxySwapchainDesc,
) -> CompositionConstants {
    let (width, height) = (desc.width as f32, desc.height as f32);
    CompositionConstants {
        is_opaque: u32::from(!flags.contains(CompositionLayerFlags::BLEND_TEXTURE_SOURCE_ALPHA)),
        multiply_alpha: u32::from(flags.contains(CompositionLayerFlags::UNPREMULTIPLIED_ALPHA)),
        uv_offset: [rect.offset.x as f32 / width, rect.offset.y as f32 / height],
        uv_scale: [rect.extent.width as f32 / width, rect.extent.height as f32 / height],
    }
}
