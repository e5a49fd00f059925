//! Sensor fusion for head tracking.
//!
//! Sensor callbacks arrive on whatever thread the host polls its sensor
//! queue on, while the render thread asks for a predicted orientation once per
//! frame. [`SensorFusion`] is shared between the two behind a short mutex.

use std::sync::Arc;
use std::time::Instant;

use glam::{Mat4, Quat, Vec3};
use log::{debug, info};
use parking_lot::Mutex;

/// Extra look-ahead on top of the sample age, roughly one frame at 30 Hz.
pub const PREDICTION_LOOKAHEAD_SECONDS: f64 = 1.0 / 30.0;

const NANOS_PER_SECOND: f64 = 1e9;

/// Orientation estimator fed with raw accelerometer and gyroscope samples.
///
/// Timestamps are sensor event times in nanoseconds. Vectors are in the
/// device sensor frame (x right, y up, z out of the screen, portrait).
pub trait OrientationFilter {
    fn process_accel(&mut self, accel: Vec3, timestamp_ns: i64);

    /// `gyro` is the bias-corrected angular rate in rad/s.
    fn process_gyro(&mut self, gyro: Vec3, timestamp_ns: i64);

    fn reset(&mut self);

    /// World-to-sensor rotation `seconds` after the latest gyro sample.
    fn predict(&self, seconds: f64) -> Mat4;
}

/// Monotonic nanosecond clock.
pub trait Clock: Send + Sync {
    fn nano_time(&self) -> i64;
}

pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn nano_time(&self) -> i64 {
        self.origin.elapsed().as_nanos() as i64
    }
}

struct FusionState {
    filter: Box<dyn OrientationFilter + Send>,
    tracking: bool,
    gyro_bias: Vec3,
    latest_gyro: Vec3,
    latest_accel: Vec3,
    latest_gyro_clock_ns: i64,
}

/// Shared front end of an [`OrientationFilter`].
///
/// Samples are dropped while tracking is stopped. Starting tracking resets
/// the filter.
pub struct SensorFusion {
    state: Mutex<FusionState>,
    clock: Arc<dyn Clock>,
}

impl SensorFusion {
    pub fn new(filter: Box<dyn OrientationFilter + Send>, clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(FusionState {
                filter,
                tracking: false,
                gyro_bias: Vec3::ZERO,
                latest_gyro: Vec3::ZERO,
                latest_accel: Vec3::ZERO,
                latest_gyro_clock_ns: 0,
            }),
            clock,
        }
    }

    /// Fusion with the built-in [`GyroIntegrationFilter`] and the system clock.
    pub fn with_gyro_integration() -> Arc<Self> {
        Arc::new(Self::new(
            Box::new(GyroIntegrationFilter::new()),
            Arc::new(SystemClock::new()),
        ))
    }

    pub fn start_tracking(&self) {
        let mut state = self.state.lock();
        if state.tracking {
            return;
        }
        state.filter.reset();
        state.tracking = true;
        info!("Head tracking started");
    }

    pub fn stop_tracking(&self) {
        let mut state = self.state.lock();
        if state.tracking {
            state.tracking = false;
            info!("Head tracking stopped");
        }
    }

    pub fn is_tracking(&self) -> bool {
        self.state.lock().tracking
    }

    /// Constant offset subtracted from every gyro sample. `None` clears it.
    pub fn set_gyro_bias(&self, bias: Option<Vec3>) {
        self.state.lock().gyro_bias = bias.unwrap_or(Vec3::ZERO);
    }

    pub fn on_accelerometer(&self, accel: Vec3, timestamp_ns: i64) {
        let mut state = self.state.lock();
        if !state.tracking {
            return;
        }
        state.latest_accel = accel;
        state.filter.process_accel(accel, timestamp_ns);
    }

    pub fn on_gyroscope(&self, gyro: Vec3, timestamp_ns: i64) {
        let now = self.clock.nano_time();
        let mut state = self.state.lock();
        if !state.tracking {
            return;
        }
        state.latest_gyro_clock_ns = now;
        state.latest_gyro = gyro - state.gyro_bias;
        let corrected = state.latest_gyro;
        state.filter.process_gyro(corrected, timestamp_ns);
    }

    /// Latest bias-corrected gyro and raw accelerometer samples.
    pub fn latest_samples(&self) -> (Vec3, Vec3) {
        let state = self.state.lock();
        (state.latest_gyro, state.latest_accel)
    }

    /// Orientation predicted for when the current frame reaches the screen.
    pub fn predicted_matrix(&self) -> Mat4 {
        let now = self.clock.nano_time();
        let state = self.state.lock();
        let age = (now - state.latest_gyro_clock_ns) as f64 / NANOS_PER_SECOND;
        state.filter.predict(age + PREDICTION_LOOKAHEAD_SECONDS)
    }
}

/// Gaps longer than this between gyro samples are not integrated.
const MAX_GYRO_INTERVAL_SECONDS: f32 = 0.5;
/// Longest extrapolation `predict` will perform.
const MAX_PREDICTION_SECONDS: f64 = 0.25;
/// Fraction of the tilt error removed per accelerometer sample.
const ACCEL_CORRECTION_GAIN: f32 = 0.02;
const STANDARD_GRAVITY: f32 = 9.81;

/// Integrates gyro rates into a quaternion, nudged toward the measured
/// gravity direction by the accelerometer.
pub struct GyroIntegrationFilter {
    /// Sensor-to-world rotation.
    orientation: Quat,
    angular_velocity: Vec3,
    last_gyro_timestamp_ns: Option<i64>,
}

impl Default for GyroIntegrationFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl GyroIntegrationFilter {
    pub fn new() -> Self {
        Self {
            orientation: Quat::IDENTITY,
            angular_velocity: Vec3::ZERO,
            last_gyro_timestamp_ns: None,
        }
    }

    pub fn orientation(&self) -> Quat {
        self.orientation
    }
}

impl OrientationFilter for GyroIntegrationFilter {
    fn process_accel(&mut self, accel: Vec3, _timestamp_ns: i64) {
        let magnitude = accel.length();
        // Skip samples dominated by linear acceleration.
        if !(0.5 * STANDARD_GRAVITY..=1.5 * STANDARD_GRAVITY).contains(&magnitude) {
            return;
        }
        let measured = accel / magnitude;
        let expected = self.orientation.inverse() * Vec3::Z;
        let correction = Quat::from_rotation_arc(expected, measured);
        let partial = Quat::IDENTITY.slerp(correction, ACCEL_CORRECTION_GAIN);
        self.orientation = (self.orientation * partial.inverse()).normalize();
    }

    fn process_gyro(&mut self, gyro: Vec3, timestamp_ns: i64) {
        if let Some(last) = self.last_gyro_timestamp_ns {
            let dt = (timestamp_ns - last) as f32 / NANOS_PER_SECOND as f32;
            if dt > 0.0 && dt <= MAX_GYRO_INTERVAL_SECONDS {
                self.orientation = (self.orientation * Quat::from_scaled_axis(gyro * dt)).normalize();
            } else {
                debug!("Skipping gyro interval of {dt}s");
            }
        }
        self.angular_velocity = gyro;
        self.last_gyro_timestamp_ns = Some(timestamp_ns);
    }

    fn reset(&mut self) {
        *self = Self::new();
    }

    fn predict(&self, seconds: f64) -> Mat4 {
        let seconds = seconds.clamp(0.0, MAX_PREDICTION_SECONDS) as f32;
        let predicted = self.orientation * Quat::from_scaled_axis(self.angular_velocity * seconds);
        Mat4::from_quat(predicted.normalize().inverse())
    }
}
