//! Per-eye field of view.

use glam::{Mat4, Vec4};
use serde::{Deserialize, Serialize};

const DEFAULT_MAX_FOV_DEGREES: f32 = 40.0;

/// Half-angles in degrees from the eye's forward axis, each side measured
/// outward (all non-negative for a frustum that contains the forward axis).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FieldOfView {
    pub left: f32,
    pub right: f32,
    pub bottom: f32,
    pub top: f32,
}

impl Default for FieldOfView {
    fn default() -> Self {
        Self::new(
            DEFAULT_MAX_FOV_DEGREES,
            DEFAULT_MAX_FOV_DEGREES,
            DEFAULT_MAX_FOV_DEGREES,
            DEFAULT_MAX_FOV_DEGREES,
        )
    }
}

impl FieldOfView {
    pub const fn new(left: f32, right: f32, bottom: f32, top: f32) -> Self {
        Self {
            left,
            right,
            bottom,
            top,
        }
    }

    /// Reads the `[left, right, bottom, top]` layout used by calibration files.
    pub fn from_angles(angles: &[f32]) -> Option<Self> {
        match angles {
            [left, right, bottom, top] => Some(Self::new(*left, *right, *bottom, *top)),
            _ => None,
        }
    }

    pub fn to_angles(&self) -> [f32; 4] {
        [self.left, self.right, self.bottom, self.top]
    }

    /// The mirrored FOV of the other eye.
    pub fn mirrored(&self) -> Self {
        Self::new(self.right, self.left, self.bottom, self.top)
    }

    /// Off-axis perspective projection for this FOV (OpenGL clip conventions).
    pub fn to_perspective_matrix(&self, near: f32, far: f32) -> Mat4 {
        let l = -self.left.to_radians().tan() * near;
        let r = self.right.to_radians().tan() * near;
        let b = -self.bottom.to_radians().tan() * near;
        let t = self.top.to_radians().tan() * near;

        let x_scale = 2.0 * near / (r - l);
        let y_scale = 2.0 * near / (t - b);
        let x_offset = (r + l) / (r - l);
        let y_offset = (t + b) / (t - b);
        let z_scale = -(far + near) / (far - near);
        let z_offset = -2.0 * far * near / (far - near);

        Mat4::from_cols(
            Vec4::new(x_scale, 0.0, 0.0, 0.0),
            Vec4::new(0.0, y_scale, 0.0, 0.0),
            Vec4::new(x_offset, y_offset, z_scale, -1.0),
            Vec4::new(0.0, 0.0, z_offset, 0.0),
        )
    }
}
