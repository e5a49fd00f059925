//! VR Lens - stereo lens-distortion pipeline for phone-in-viewer headsets
//!
//! Models the viewer's lenses, derives each eye's field of view from
//! calibration, renders both eyes into an offscreen texture and warps it onto
//! the screen through per-eye distortion meshes. Head pose comes from the
//! fused phone sensors with a short prediction.
//!
//! [`stereo::StereoRenderer`] is the entry point: the host supplies a
//! [`backend::GraphicsBackend`] (usually [`wgpu_backend::WgpuBackend`]), a
//! [`stereo::SceneRenderer`] and a shared [`sensors::SensorFusion`].

pub mod backend;
pub mod compositor;
pub mod distortion;
pub mod error;
pub mod eye;
pub mod fov;
pub mod head_tracker;
pub mod logging;
pub mod mesh;
pub mod optics;
pub mod profile;
pub mod sensors;
pub mod stereo;
pub mod viewport;
pub mod warp;
pub mod wgpu_backend;

pub use backend::{GraphicsBackend, ShaderVariant, StateGuard, TextureFormat};
pub use distortion::{ChannelDistortion, Distortion};
pub use error::{VrError, VrResult};
pub use eye::{Eye, EyeType};
pub use fov::FieldOfView;
pub use head_tracker::{DisplayRotation, HeadPoseIntegrator, HeadTransform, NeckModel};
pub use profile::{DeviceOpticalProfile, HeadMountedDisplay, ScreenProfile};
pub use sensors::{OrientationFilter, SensorFusion};
pub use stereo::{SceneRenderer, StereoConfig, StereoHandle, StereoRenderer};
pub use viewport::Viewport;
pub use warp::{FramePhase, WarpRenderer};
