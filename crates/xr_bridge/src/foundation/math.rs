//! Math utilities and types
//!
//! Poses use nalgebra isometries; rectangles and extents use the integer
//! layout of the OpenXR structures they mirror.

pub use nalgebra::{Isometry3, Translation3, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};

/// Rigid transform: orientation followed by position
pub type Pose = Isometry3<f32>;

/// 3D vector type
pub type Vec3 = Vector3<f32>;

/// Identity pose
pub fn identity_pose() -> Pose {
    Pose::identity()
}

/// Pose with the given position and no rotation
pub fn pose_from_position(x: f32, y: f32, z: f32) -> Pose {
    Pose::translation(x, y, z)
}

/// Pose of `space` expressed in `base`, both given in a common frame
pub fn relative_pose(base: &Pose, space: &Pose) -> Pose {
    base.inverse() * space
}

/// Field of view as four half-angles in radians
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Fov {
    /// Left half-angle, negative to the left
    pub angle_left: f32,
    /// Right half-angle
    pub angle_right: f32,
    /// Up half-angle
    pub angle_up: f32,
    /// Down half-angle, negative downward
    pub angle_down: f32,
}

impl Fov {
    /// Symmetric field of view with the same half-angle in every direction
    pub fn symmetric(half_angle: f32) -> Self {
        Self {
            angle_left: -half_angle,
            angle_right: half_angle,
            angle_up: half_angle,
            angle_down: -half_angle,
        }
    }
}

/// Integer 2D offset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash, Serialize, Deserialize)]
pub struct Offset2Di {
    /// X offset in pixels
    pub x: i32,
    /// Y offset in pixels
    pub y: i32,
}

/// Integer 2D extent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash, Serialize, Deserialize)]
pub struct Extent2Di {
    /// Width in pixels
    pub width: i32,
    /// Height in pixels
    pub height: i32,
}

/// Integer rectangle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash, Serialize, Deserialize)]
pub struct Rect2Di {
    /// Top-left corner
    pub offset: Offset2Di,
    /// Size
    pub extent: Extent2Di,
}

impl Rect2Di {
    /// Rectangle from position and size
    pub const fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            offset: Offset2Di { x, y },
            extent: Extent2Di { width, height },
        }
    }

    /// Whether the rectangle covers no pixels
    pub const fn is_empty(&self) -> bool {
        self.extent.width <= 0 || self.extent.height <= 0
    }

    /// Whether the rectangle lies within an image of `width` x `height`
    pub const fn fits_within(&self, width: u32, height: u32) -> bool {
        self.offset.x >= 0
            && self.offset.y >= 0
            && (self.offset.x as i64 + self.extent.width as i64) <= width as i64
            && (self.offset.y as i64 + self.extent.height as i64) <= height as i64
    }
}
