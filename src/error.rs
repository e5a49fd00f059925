//! Error types shared by the optics, warp and frame-driver modules.

use thiserror::Error;

/// Errors raised by the distortion pipeline.
///
/// Variants fall in three groups: programming errors (reconfiguring mid-frame,
/// driving the frame state machine out of order), resource-creation failures
/// (shaders, framebuffers, adapters), and calibration / thread hand-off
/// failures. The first two groups are fatal for the renderer that raised them.
#[derive(Error, Debug)]
pub enum VrError {
    /// FOV, texture format or mesh state was changed while a frame was being drawn.
    #[error("cannot {operation} while a frame is being drawn")]
    DrawingInProgress {
        /// The rejected operation.
        operation: &'static str,
    },

    /// A frame entry point was called in the wrong phase.
    #[error("invalid frame phase: expected {expected}, found {found}")]
    InvalidPhase {
        /// Phase the call requires.
        expected: &'static str,
        /// Phase the renderer was in.
        found: &'static str,
    },

    /// The warp renderer has not received a FOV yet.
    #[error("distortion renderer is not configured; call on_fov_changed first")]
    NotConfigured,

    /// Shader module or pipeline creation failed.
    #[error("could not create {variant} program: {reason}")]
    ShaderCompilation {
        /// Which shader permutation failed.
        variant: &'static str,
        /// Backend-provided message.
        reason: String,
    },

    /// The offscreen render target could not be created.
    #[error("framebuffer is not complete: {0}")]
    IncompleteFramebuffer(String),

    /// No GPU adapter matched the request.
    #[error("no suitable GPU adapter found")]
    NoAdapter,

    /// The GPU device could not be opened.
    #[error("failed to create GPU device: {0}")]
    DeviceRequest(String),

    /// The least-squares solver only handles two unknowns.
    #[error("least-squares fit supports exactly 2 coefficients, {0} given")]
    UnsupportedCoefficientCount(usize),

    /// The normal matrix of the inverse fit has no inverse.
    #[error("inverse distortion fit is singular")]
    SingularFit,

    /// A calibration value is out of range.
    #[error("invalid calibration: {0}")]
    InvalidCalibration(String),

    /// Reading a calibration file failed.
    #[error("calibration i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// A calibration file could not be parsed.
    #[error("calibration parse error: {0}")]
    Json(#[from] serde_json::Error),

    /// The render thread did not answer in time.
    #[error("timed out waiting for the render thread ({0})")]
    TimedOut(&'static str),

    /// The render thread is gone.
    #[error("render thread disconnected ({0})")]
    Disconnected(&'static str),
}

/// Result type for distortion pipeline operations.
pub type VrResult<T> = Result<T, VrError>;
