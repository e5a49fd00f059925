//! Calibration values for the viewer and the phone screen.
//!
//! Both profiles are plain values: the frame driver replaces them wholesale
//! and compares them by equality to decide whether geometry must be rebuilt.
//! Loading from disk is lenient; anything missing or out of range falls back
//! to the built-in defaults.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::distortion::Distortion;
use crate::error::{VrError, VrResult};
use crate::fov::FieldOfView;

const METERS_PER_INCH: f32 = 0.0254;
const DEFAULT_BORDER_SIZE_METERS: f32 = 0.003;

const DEFAULT_VENDOR: &str = "Google, Inc.";
const DEFAULT_MODEL: &str = "Cardboard v1";
const DEFAULT_INTER_LENS_DISTANCE: f32 = 0.06;
const DEFAULT_VERTICAL_DISTANCE_TO_LENS_CENTER: f32 = 0.035;
const DEFAULT_SCREEN_TO_LENS_DISTANCE: f32 = 0.042;

/// Optical parameters of a viewer (lens spacing, lens height, distortion).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceOpticalProfile {
    pub vendor: String,
    pub model: String,
    /// Distance between the two lens centers, meters.
    pub inter_lens_distance: f32,
    /// Height of the lens centers above the bottom of the screen, meters.
    pub vertical_distance_to_lens_center: f32,
    pub screen_to_lens_distance: f32,
    /// Largest FOV the left lens can show; the right eye mirrors it.
    pub left_eye_max_fov: FieldOfView,
    pub distortion: Distortion,
    pub has_magnet: bool,
}

impl Default for DeviceOpticalProfile {
    fn default() -> Self {
        Self {
            vendor: DEFAULT_VENDOR.to_string(),
            model: DEFAULT_MODEL.to_string(),
            inter_lens_distance: DEFAULT_INTER_LENS_DISTANCE,
            vertical_distance_to_lens_center: DEFAULT_VERTICAL_DISTANCE_TO_LENS_CENTER,
            screen_to_lens_distance: DEFAULT_SCREEN_TO_LENS_DISTANCE,
            left_eye_max_fov: FieldOfView::default(),
            distortion: Distortion::default(),
            has_magnet: false,
        }
    }
}

impl DeviceOpticalProfile {
    pub fn validate(&self) -> VrResult<()> {
        positive("inter_lens_distance", self.inter_lens_distance)?;
        positive("vertical_distance_to_lens_center", self.vertical_distance_to_lens_center)?;
        positive("screen_to_lens_distance", self.screen_to_lens_distance)?;
        for angle in self.left_eye_max_fov.to_angles() {
            if !(0.0..90.0).contains(&angle) {
                return Err(VrError::InvalidCalibration(format!(
                    "max FOV angle {angle} outside [0, 90)"
                )));
            }
        }
        if let Some(k) = self.distortion.coefficients().iter().find(|k| !k.is_finite()) {
            return Err(VrError::InvalidCalibration(format!(
                "non-finite distortion coefficient {k}"
            )));
        }
        Ok(())
    }

    /// Reads a JSON profile. Missing fields take their default value.
    pub fn load(path: &Path) -> VrResult<Self> {
        let reader = BufReader::new(File::open(path)?);
        let profile: Self = serde_json::from_reader(reader)?;
        profile.validate()?;
        Ok(profile)
    }

    /// Like [`load`](Self::load), but any failure yields the stock viewer.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(profile) => {
                info!("Read device params from {}", path.display());
                profile
            }
            Err(e) => {
                warn!(
                    "Device params unavailable at {} ({}); using {} {}",
                    path.display(),
                    e,
                    DEFAULT_VENDOR,
                    DEFAULT_MODEL
                );
                Self::default()
            }
        }
    }
}

/// Physical layout of the phone display, always in landscape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScreenProfile {
    pub width_px: u32,
    pub height_px: u32,
    pub x_meters_per_pixel: f32,
    pub y_meters_per_pixel: f32,
    /// Bezel below the active area, meters.
    #[serde(default = "default_border_size")]
    pub border_size_meters: f32,
}

fn default_border_size() -> f32 {
    DEFAULT_BORDER_SIZE_METERS
}

impl ScreenProfile {
    /// Builds a profile from display metrics, rotating portrait input to landscape.
    pub fn from_display_metrics(width_px: u32, height_px: u32, xdpi: f32, ydpi: f32) -> Self {
        let mut profile = Self {
            width_px,
            height_px,
            x_meters_per_pixel: METERS_PER_INCH / xdpi,
            y_meters_per_pixel: METERS_PER_INCH / ydpi,
            border_size_meters: DEFAULT_BORDER_SIZE_METERS,
        };
        if profile.height_px > profile.width_px {
            std::mem::swap(&mut profile.width_px, &mut profile.height_px);
            std::mem::swap(&mut profile.x_meters_per_pixel, &mut profile.y_meters_per_pixel);
        }
        profile
    }

    pub fn width_meters(&self) -> f32 {
        self.width_px as f32 * self.x_meters_per_pixel
    }

    pub fn height_meters(&self) -> f32 {
        self.height_px as f32 * self.y_meters_per_pixel
    }

    pub fn validate(&self) -> VrResult<()> {
        if self.width_px == 0 || self.height_px == 0 {
            return Err(VrError::InvalidCalibration(format!(
                "screen size {}x{} is empty",
                self.width_px, self.height_px
            )));
        }
        positive("x_meters_per_pixel", self.x_meters_per_pixel)?;
        positive("y_meters_per_pixel", self.y_meters_per_pixel)?;
        if !self.border_size_meters.is_finite() || self.border_size_meters < 0.0 {
            return Err(VrError::InvalidCalibration(format!(
                "border_size_meters {} is negative",
                self.border_size_meters
            )));
        }
        Ok(())
    }

    pub fn load(path: &Path) -> VrResult<Self> {
        let reader = BufReader::new(File::open(path)?);
        let profile: Self = serde_json::from_reader(reader)?;
        profile.validate()?;
        Ok(profile)
    }

    /// Reads a JSON screen profile, falling back to `fallback` (usually the
    /// metrics reported by the display) on any failure.
    pub fn load_or(path: &Path, fallback: ScreenProfile) -> Self {
        match Self::load(path) {
            Ok(profile) => {
                info!("Read screen params from {}", path.display());
                profile
            }
            Err(e) => {
                warn!(
                    "Screen params unavailable at {} ({}); using display metrics",
                    path.display(),
                    e
                );
                fallback
            }
        }
    }
}

fn positive(name: &str, value: f32) -> VrResult<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(VrError::InvalidCalibration(format!("{name} must be positive, got {value}")))
    }
}

/// The viewer and the phone it holds.
#[derive(Debug, Clone, PartialEq)]
pub struct HeadMountedDisplay {
    pub screen: ScreenProfile,
    pub device: DeviceOpticalProfile,
}

impl HeadMountedDisplay {
    pub fn new(screen: ScreenProfile, device: DeviceOpticalProfile) -> Self {
        Self { screen, device }
    }
}
