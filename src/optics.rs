//! Field-of-view and viewport derivation from calibration.
//!
//! All geometry here starts from the lens center of the left eye. Distances to
//! the four screen edges are turned into tan-angles by dividing by the
//! screen-to-lens distance; the right eye is always the mirror image.

use crate::fov::FieldOfView;
use crate::profile::{HeadMountedDisplay, ScreenProfile};
use crate::viewport::Viewport;

/// Bottom/top half-angle used when the phone is viewed without a viewer.
pub const MONOCULAR_BOTTOM_FOV_DEGREES: f32 = 22.5;

/// Physical distances, in meters, from the left lens center to the screen edges.
#[derive(Debug, Clone, Copy, PartialEq)]
struct LensToEdge {
    outer: f32,
    inner: f32,
    bottom: f32,
    top: f32,
}

impl LensToEdge {
    fn new(hmd: &HeadMountedDisplay) -> Self {
        let screen = &hmd.screen;
        let device = &hmd.device;
        Self {
            outer: (screen.width_meters() - device.inter_lens_distance) / 2.0,
            inner: device.inter_lens_distance / 2.0,
            bottom: device.vertical_distance_to_lens_center - screen.border_size_meters,
            top: screen.height_meters() + screen.border_size_meters
                - device.vertical_distance_to_lens_center,
        }
    }
}

/// FOVs of both eyes as seen through the lenses, clamped to the viewer's limits.
pub fn distorted_fov(hmd: &HeadMountedDisplay) -> (FieldOfView, FieldOfView) {
    let device = &hmd.device;
    let distortion = &device.distortion;
    let eye_to_screen = device.screen_to_lens_distance;
    let edges = LensToEdge::new(hmd);

    let angle = |dist: f32| distortion.distort(dist / eye_to_screen).atan().to_degrees();
    let max = &device.left_eye_max_fov;

    let left = FieldOfView::new(
        angle(edges.outer).min(max.left),
        angle(edges.inner).min(max.right),
        angle(edges.bottom).min(max.bottom),
        angle(edges.top).min(max.top),
    );
    (left, left.mirrored())
}

/// FOVs of both eyes when distortion correction is off: straight geometry, no clamp.
pub fn undistorted_fov(hmd: &HeadMountedDisplay) -> (FieldOfView, FieldOfView) {
    let eye_to_screen = hmd.device.screen_to_lens_distance;
    let edges = LensToEdge::new(hmd);
    let half_lens_distance = hmd.device.inter_lens_distance / 2.0;

    let angle = |dist: f32| dist.atan2(eye_to_screen).to_degrees();
    let left = FieldOfView::new(
        angle(hmd.screen.width_meters() / 2.0 - half_lens_distance),
        angle(half_lens_distance),
        angle(edges.bottom),
        angle(edges.top),
    );
    (left, left.mirrored())
}

/// Pixel viewports splitting the screen evenly between the eyes.
pub fn undistorted_viewports(screen: &ScreenProfile) -> (Viewport, Viewport) {
    let half_width = (screen.width_px / 2) as i32;
    let height = screen.height_px as i32;
    (
        Viewport::new(0, 0, half_width, height),
        Viewport::new(half_width, 0, half_width, height),
    )
}

/// Symmetric FOV for the whole screen, derived from its aspect ratio.
pub fn monocular_fov(screen: &ScreenProfile) -> FieldOfView {
    let bottom = MONOCULAR_BOTTOM_FOV_DEGREES;
    let side = (bottom.to_radians().tan() * screen.width_meters() / screen.height_meters())
        .atan()
        .to_degrees();
    FieldOfView::new(side, side, bottom, bottom)
}

/// An eye's frustum rectangle inside the shared tan-angle texture.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EyeViewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    /// Optical center of the eye, in the same space.
    pub eye_x: f32,
    pub eye_y: f32,
}

impl EyeViewport {
    pub fn for_eye(fov: &FieldOfView, x_offset: f32) -> Self {
        let left = fov.left.to_radians().tan();
        let right = fov.right.to_radians().tan();
        let bottom = fov.bottom.to_radians().tan();
        let top = fov.top.to_radians().tan();
        Self {
            x: x_offset,
            y: 0.0,
            width: left + right,
            height: bottom + top,
            eye_x: left + x_offset,
            eye_y: bottom,
        }
    }

    /// Pixel rectangle for this viewport at the given density and scale.
    pub fn to_pixels(&self, scale: &PixelScale, resolution_scale: f32) -> Viewport {
        let sx = scale.x_px_per_tan_angle * resolution_scale;
        let sy = scale.y_px_per_tan_angle * resolution_scale;
        Viewport::new(
            (self.x * sx).round() as i32,
            (self.y * sy).round() as i32,
            (self.width * sx).round() as i32,
            (self.height * sy).round() as i32,
        )
    }
}

/// Both eyes packed side by side, left first.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EyeLayout {
    pub left: EyeViewport,
    pub right: EyeViewport,
}

impl EyeLayout {
    pub fn new(left_fov: &FieldOfView, right_fov: &FieldOfView) -> Self {
        let left = EyeViewport::for_eye(left_fov, 0.0);
        let right = EyeViewport::for_eye(right_fov, left.width);
        Self { left, right }
    }

    pub fn texture_width(&self) -> f32 {
        self.left.width + self.right.width
    }

    pub fn texture_height(&self) -> f32 {
        self.left.height.max(self.right.height)
    }
}

/// Screen pixel density expressed per unit of tan-angle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PixelScale {
    pub x_px_per_tan_angle: f32,
    pub y_px_per_tan_angle: f32,
}

impl PixelScale {
    pub fn new(screen: &ScreenProfile, meters_per_tan_angle: f32) -> Self {
        Self {
            x_px_per_tan_angle: screen.width_px as f32
                / (screen.width_meters() / meters_per_tan_angle),
            y_px_per_tan_angle: screen.height_px as f32
                / (screen.height_meters() / meters_per_tan_angle),
        }
    }
}
