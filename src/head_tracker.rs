//! Head pose for the current frame.
//!
//! Turns the fused sensor orientation into a view matrix in display space,
//! optionally offset by a simple neck model.

use std::sync::Arc;

use glam::{Mat3, Mat4, Quat, Vec3, Vec4};
use serde::{Deserialize, Serialize};

use crate::sensors::SensorFusion;

const GIMBAL_LOCK_EPSILON: f32 = 0.01;

/// Rotation of the display relative to the device's natural orientation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DisplayRotation {
    #[default]
    Rotation0,
    Rotation90,
    Rotation180,
    Rotation270,
}

impl DisplayRotation {
    pub fn degrees(&self) -> f32 {
        match self {
            DisplayRotation::Rotation0 => 0.0,
            DisplayRotation::Rotation90 => 90.0,
            DisplayRotation::Rotation180 => 180.0,
            DisplayRotation::Rotation270 => 270.0,
        }
    }

    /// Android `Surface.ROTATION_*` index.
    pub fn from_index(index: u32) -> Option<Self> {
        match index {
            0 => Some(DisplayRotation::Rotation0),
            1 => Some(DisplayRotation::Rotation90),
            2 => Some(DisplayRotation::Rotation180),
            3 => Some(DisplayRotation::Rotation270),
            _ => None,
        }
    }
}

/// Offset between the rotation center of the head and the eyes, meters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NeckModel {
    pub enabled: bool,
    pub horizontal_offset: f32,
    pub vertical_offset: f32,
}

impl Default for NeckModel {
    fn default() -> Self {
        Self {
            enabled: false,
            horizontal_offset: 0.08,
            vertical_offset: 0.075,
        }
    }
}

/// Rotation by Euler angles in degrees, x then y then z.
pub fn euler_rotation(x_degrees: f32, y_degrees: f32, z_degrees: f32) -> Mat4 {
    let (sx, cx) = x_degrees.to_radians().sin_cos();
    let (sy, cy) = y_degrees.to_radians().sin_cos();
    let (sz, cz) = z_degrees.to_radians().sin_cos();
    Mat4::from_cols(
        Vec4::new(cy * cz, -cy * sz, sy, 0.0),
        Vec4::new(sx * sy * cz + cx * sz, -sx * sy * sz + cx * cz, -sx * cy, 0.0),
        Vec4::new(-cx * sy * cz + sx * sz, cx * sy * sz + sx * cz, cx * cy, 0.0),
        Vec4::W,
    )
}

/// Produces the head view matrix once per frame.
pub struct HeadPoseIntegrator {
    fusion: Arc<SensorFusion>,
    display_rotation: Option<DisplayRotation>,
    sensor_to_display: Mat4,
    filter_to_head_tracker: Mat4,
    neck_model: NeckModel,
}

impl HeadPoseIntegrator {
    pub fn new(fusion: Arc<SensorFusion>) -> Self {
        Self {
            fusion,
            display_rotation: None,
            sensor_to_display: Mat4::IDENTITY,
            filter_to_head_tracker: Mat4::IDENTITY,
            neck_model: NeckModel::default(),
        }
    }

    pub fn fusion(&self) -> &Arc<SensorFusion> {
        &self.fusion
    }

    pub fn set_neck_model(&mut self, neck_model: NeckModel) {
        self.neck_model = neck_model;
    }

    pub fn set_neck_model_enabled(&mut self, enabled: bool) {
        self.neck_model.enabled = enabled;
    }

    pub fn neck_model(&self) -> NeckModel {
        self.neck_model
    }

    /// Predicted head view for a display in `rotation`.
    pub fn last_head_view(&mut self, rotation: DisplayRotation) -> Mat4 {
        if self.display_rotation != Some(rotation) {
            let degrees = rotation.degrees();
            self.sensor_to_display = euler_rotation(0.0, 0.0, -degrees);
            self.filter_to_head_tracker = euler_rotation(-90.0, 0.0, degrees);
            self.display_rotation = Some(rotation);
        }

        let predicted = self.fusion.predicted_matrix();
        let head_view = self.sensor_to_display * predicted * self.filter_to_head_tracker;
        if !self.neck_model.enabled {
            return head_view;
        }
        let NeckModel {
            horizontal_offset,
            vertical_offset,
            ..
        } = self.neck_model;
        Mat4::from_translation(Vec3::new(0.0, -vertical_offset, horizontal_offset))
            * head_view
            * Mat4::from_translation(Vec3::new(0.0, vertical_offset, 0.0))
    }
}

/// The head view matrix of one frame and values derived from it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HeadTransform {
    head_view: Mat4,
}

impl Default for HeadTransform {
    fn default() -> Self {
        Self::new(Mat4::IDENTITY)
    }
}

impl HeadTransform {
    pub fn new(head_view: Mat4) -> Self {
        Self { head_view }
    }

    pub fn head_view(&self) -> Mat4 {
        self.head_view
    }

    pub fn forward_vector(&self) -> Vec3 {
        -self.head_view.z_axis.truncate()
    }

    pub fn up_vector(&self) -> Vec3 {
        self.head_view.y_axis.truncate()
    }

    pub fn right_vector(&self) -> Vec3 {
        self.head_view.x_axis.truncate()
    }

    /// Orientation of the head in the world, the inverse of the view rotation.
    pub fn quaternion(&self) -> Quat {
        Quat::from_mat3(&Mat3::from_mat4(self.head_view).transpose())
    }

    /// `(pitch, yaw, roll)` in radians.
    pub fn euler_angles(&self) -> Vec3 {
        let m = self.head_view.to_cols_array();
        let pitch = m[6].clamp(-1.0, 1.0).asin();
        let (yaw, roll) = if (1.0 - m[6] * m[6]).sqrt() >= GIMBAL_LOCK_EPSILON {
            ((-m[2]).atan2(m[10]), (-m[4]).atan2(m[5]))
        } else {
            (0.0, m[1].atan2(m[0]))
        };
        Vec3::new(-pitch, -yaw, -roll)
    }
}
