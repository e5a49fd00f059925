//! Frame driver: ties calibration, head pose, the warp pass and the host's
//! scene together.
//!
//! The renderer lives on the render thread. Other threads talk to it through
//! a [`StereoHandle`], which queues [`ConfigDelta`]s. Deltas are applied only
//! at frame boundaries, so geometry never changes while a frame is drawn.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};
use glam::{Mat4, Vec3};
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};

use crate::backend::{GraphicsBackend, TextureFormat};
use crate::error::{VrError, VrResult};
use crate::eye::{Eye, EyeType};
use crate::head_tracker::{DisplayRotation, HeadPoseIntegrator, HeadTransform, NeckModel};
use crate::optics;
use crate::profile::{DeviceOpticalProfile, HeadMountedDisplay, ScreenProfile};
use crate::sensors::SensorFusion;
use crate::viewport::Viewport;
use crate::warp::WarpRenderer;

/// Callbacks from the frame driver into the host's scene.
///
/// Before each `on_draw_eye` the eye's viewport and scissor rectangle are
/// already set on the backend.
pub trait SceneRenderer<B: GraphicsBackend> {
    fn on_new_frame(&mut self, _head: &HeadTransform) {}

    fn on_draw_eye(&mut self, backend: &mut B, head: &HeadTransform, eye: &Eye);

    /// Called after both eyes are done (and warped), with the full-screen viewport set.
    fn on_finish_frame(&mut self, _backend: &mut B, _viewport: Viewport) {}

    /// Surface size as seen by one eye: half the width in VR mode.
    fn on_surface_changed(&mut self, _width: u32, _height: u32) {}

    fn on_renderer_shutdown(&mut self) {}
}

/// Rendering options. Everything here can be changed later through a
/// [`StereoHandle`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StereoConfig {
    pub vr_mode: bool,
    pub distortion_correction: bool,
    pub restore_state: bool,
    pub chromatic_aberration_correction: bool,
    pub vignette: bool,
    /// Offscreen texture size relative to the screen, 1.0 for full resolution.
    pub resolution_scale: f32,
    pub texture_format: TextureFormat,
    pub neck_model: NeckModel,
    pub display_rotation: DisplayRotation,
}

impl Default for StereoConfig {
    fn default() -> Self {
        Self {
            vr_mode: true,
            distortion_correction: true,
            restore_state: true,
            chromatic_aberration_correction: false,
            vignette: true,
            resolution_scale: 1.0,
            texture_format: TextureFormat::default(),
            neck_model: NeckModel::default(),
            display_rotation: DisplayRotation::default(),
        }
    }
}

impl StereoConfig {
    pub fn validate(&self) -> VrResult<()> {
        if valid_resolution_scale(self.resolution_scale) {
            Ok(())
        } else {
            Err(VrError::InvalidCalibration(format!(
                "resolution_scale must be positive, got {}",
                self.resolution_scale
            )))
        }
    }

    pub fn load(path: &Path) -> VrResult<Self> {
        let reader = BufReader::new(File::open(path)?);
        let config: Self = serde_json::from_reader(reader)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => {
                info!("Read renderer config from {}", path.display());
                config
            }
            Err(e) => {
                warn!("Renderer config unavailable at {} ({}); using defaults", path.display(), e);
                Self::default()
            }
        }
    }
}

fn valid_resolution_scale(scale: f32) -> bool {
    scale.is_finite() && scale > 0.0
}

/// Head pose and eye parameters of one frame.
#[derive(Debug, Clone)]
pub struct FrameParams {
    pub head: HeadTransform,
    pub left: Eye,
    pub right: Eye,
    pub monocular: Eye,
}

/// A change queued for the render thread.
#[derive(Debug)]
pub enum ConfigDelta {
    DeviceProfile(DeviceOpticalProfile),
    ScreenProfile(ScreenProfile),
    VrMode(bool),
    DistortionCorrection(bool),
    ResolutionScale(f32),
    RestoreState(bool),
    ChromaticAberrationCorrection(bool),
    Vignette(bool),
    TextureFormat(TextureFormat),
    NeckModel(NeckModel),
    DisplayRotation(DisplayRotation),
    QueryFrameParams(Sender<FrameParams>),
    Shutdown(Sender<()>),
}

/// Thread-safe front end of a [`StereoRenderer`].
///
/// Setters return as soon as the change is queued. The blocking calls
/// ([`current_frame_params`](Self::current_frame_params),
/// [`shutdown`](Self::shutdown)) wait for the render thread and must not be
/// made from it.
#[derive(Debug, Clone)]
pub struct StereoHandle {
    sender: Sender<ConfigDelta>,
}

impl StereoHandle {
    fn send(&self, delta: ConfigDelta) -> VrResult<()> {
        self.sender
            .send(delta)
            .map_err(|_| VrError::Disconnected("config queue"))
    }

    pub fn set_device_profile(&self, profile: DeviceOpticalProfile) -> VrResult<()> {
        self.send(ConfigDelta::DeviceProfile(profile))
    }

    pub fn set_screen_profile(&self, profile: ScreenProfile) -> VrResult<()> {
        self.send(ConfigDelta::ScreenProfile(profile))
    }

    pub fn set_vr_mode(&self, enabled: bool) -> VrResult<()> {
        self.send(ConfigDelta::VrMode(enabled))
    }

    pub fn set_distortion_correction_enabled(&self, enabled: bool) -> VrResult<()> {
        self.send(ConfigDelta::DistortionCorrection(enabled))
    }

    pub fn set_resolution_scale(&self, scale: f32) -> VrResult<()> {
        self.send(ConfigDelta::ResolutionScale(scale))
    }

    pub fn set_restore_state_enabled(&self, enabled: bool) -> VrResult<()> {
        self.send(ConfigDelta::RestoreState(enabled))
    }

    pub fn set_chromatic_aberration_correction_enabled(&self, enabled: bool) -> VrResult<()> {
        self.send(ConfigDelta::ChromaticAberrationCorrection(enabled))
    }

    pub fn set_vignette_enabled(&self, enabled: bool) -> VrResult<()> {
        self.send(ConfigDelta::Vignette(enabled))
    }

    pub fn set_texture_format(&self, format: TextureFormat) -> VrResult<()> {
        self.send(ConfigDelta::TextureFormat(format))
    }

    pub fn set_neck_model(&self, neck_model: NeckModel) -> VrResult<()> {
        self.send(ConfigDelta::NeckModel(neck_model))
    }

    pub fn set_display_rotation(&self, rotation: DisplayRotation) -> VrResult<()> {
        self.send(ConfigDelta::DisplayRotation(rotation))
    }

    /// Frame parameters computed at the render thread's next boundary.
    pub fn current_frame_params(&self, timeout: Duration) -> VrResult<FrameParams> {
        let (reply, response) = bounded(1);
        self.send(ConfigDelta::QueryFrameParams(reply))?;
        response
            .recv_timeout(timeout)
            .map_err(|e| wait_failed(e, "frame params"))
    }

    /// Tears the renderer down and waits for it to confirm. A timeout is
    /// reported, not retried.
    pub fn shutdown(&self, timeout: Duration) -> VrResult<()> {
        let (reply, response) = bounded(1);
        self.send(ConfigDelta::Shutdown(reply))?;
        response
            .recv_timeout(timeout)
            .map_err(|e| wait_failed(e, "shutdown"))?;
        info!("Renderer shutdown confirmed");
        Ok(())
    }
}

fn wait_failed(err: RecvTimeoutError, what: &'static str) -> VrError {
    match err {
        RecvTimeoutError::Timeout => {
            error!("Timed out waiting for the render thread ({})", what);
            VrError::TimedOut(what)
        }
        RecvTimeoutError::Disconnected => {
            error!("Render thread went away while waiting for {}", what);
            VrError::Disconnected(what)
        }
    }
}

/// Drives one stereo frame at a time on the render thread.
///
/// Head tracking is not started here; the host calls
/// [`SensorFusion::start_tracking`] when the app becomes visible.
pub struct StereoRenderer<B: GraphicsBackend, S: SceneRenderer<B>> {
    hmd: HeadMountedDisplay,
    config: StereoConfig,
    warp: WarpRenderer<B>,
    head_tracker: HeadPoseIntegrator,
    scene: S,

    head: HeadTransform,
    left_eye: Eye,
    right_eye: Eye,
    monocular_eye: Eye,

    projection_changed: bool,
    /// Set by the first `on_surface_changed`.
    surface_created: bool,
    invalid_surface_size: bool,
    shut_down: bool,

    sender: Sender<ConfigDelta>,
    receiver: Receiver<ConfigDelta>,
}

impl<B: GraphicsBackend, S: SceneRenderer<B>> StereoRenderer<B, S> {
    pub fn new(
        hmd: HeadMountedDisplay,
        config: StereoConfig,
        fusion: Arc<SensorFusion>,
        scene: S,
    ) -> VrResult<Self> {
        hmd.screen.validate()?;
        hmd.device.validate()?;
        config.validate()?;

        let mut warp = WarpRenderer::new();
        warp.set_texture_format(config.texture_format)?;
        warp.set_resolution_scale(config.resolution_scale);
        warp.set_restore_state_enabled(config.restore_state);
        warp.set_chromatic_aberration_correction_enabled(config.chromatic_aberration_correction);
        warp.set_vignette_enabled(config.vignette)?;

        let mut head_tracker = HeadPoseIntegrator::new(fusion);
        head_tracker.set_neck_model(config.neck_model);

        let mut left_eye = Eye::new(EyeType::Left);
        let mut right_eye = Eye::new(EyeType::Right);
        let (left_fov, right_fov) = optics::distorted_fov(&hmd);
        left_eye.set_fov(left_fov);
        right_eye.set_fov(right_fov);

        let (sender, receiver) = unbounded();
        info!(
            "Stereo renderer for {} {} on a {}x{} screen",
            hmd.device.vendor, hmd.device.model, hmd.screen.width_px, hmd.screen.height_px
        );

        Ok(Self {
            hmd,
            config,
            warp,
            head_tracker,
            scene,
            head: HeadTransform::default(),
            left_eye,
            right_eye,
            monocular_eye: Eye::new(EyeType::Monocular),
            projection_changed: true,
            surface_created: false,
            invalid_surface_size: false,
            shut_down: false,
            sender,
            receiver,
        })
    }

    pub fn handle(&self) -> StereoHandle {
        StereoHandle {
            sender: self.sender.clone(),
        }
    }

    pub fn hmd(&self) -> &HeadMountedDisplay {
        &self.hmd
    }

    pub fn config(&self) -> &StereoConfig {
        &self.config
    }

    pub fn warp(&self) -> &WarpRenderer<B> {
        &self.warp
    }

    pub fn scene(&self) -> &S {
        &self.scene
    }

    pub fn scene_mut(&mut self) -> &mut S {
        &mut self.scene
    }

    pub fn head_transform(&self) -> &HeadTransform {
        &self.head
    }

    pub fn eye(&self, eye_type: EyeType) -> &Eye {
        match eye_type {
            EyeType::Monocular => &self.monocular_eye,
            EyeType::Left => &self.left_eye,
            EyeType::Right => &self.right_eye,
        }
    }

    pub fn frame_params(&self) -> FrameParams {
        FrameParams {
            head: self.head,
            left: self.left_eye.clone(),
            right: self.right_eye.clone(),
            monocular: self.monocular_eye.clone(),
        }
    }

    pub fn is_surface_size_valid(&self) -> bool {
        self.surface_created && !self.invalid_surface_size
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down
    }

    /// Applies every queued delta. Called at the start of each frame; hosts
    /// that stop drawing keep calling it so queries and shutdown are served.
    ///
    /// A delta that cannot be applied is logged and dropped; the rest of the
    /// queue is still drained.
    pub fn poll(&mut self, backend: &mut B) -> VrResult<()> {
        let mut queries = Vec::new();
        while let Ok(delta) = self.receiver.try_recv() {
            if let Err(e) = self.apply(backend, delta, &mut queries) {
                warn!("Dropping config update: {}", e);
            }
        }

        if !queries.is_empty() {
            if !self.shut_down {
                self.update_frame_params()?;
            }
            let params = self.frame_params();
            for reply in queries {
                let _ = reply.send(params.clone());
            }
        }
        Ok(())
    }

    fn apply(
        &mut self,
        backend: &mut B,
        delta: ConfigDelta,
        queries: &mut Vec<Sender<FrameParams>>,
    ) -> VrResult<()> {
        match delta {
            ConfigDelta::QueryFrameParams(reply) => queries.push(reply),
            ConfigDelta::Shutdown(reply) => {
                self.shutdown(backend);
                // The caller may have timed out already.
                let _ = reply.send(());
            }
            ConfigDelta::DeviceProfile(profile) => {
                let profile = match profile.validate() {
                    Ok(()) => profile,
                    Err(e) => {
                        let fallback = DeviceOpticalProfile::default();
                        warn!(
                            "Rejected device profile {} {} ({}); using {} {}",
                            profile.vendor, profile.model, e, fallback.vendor, fallback.model
                        );
                        fallback
                    }
                };
                if profile == self.hmd.device {
                    debug!("Device profile unchanged, ignoring");
                } else {
                    info!("Device profile set to {} {}", profile.vendor, profile.model);
                    self.hmd.device = profile;
                    self.projection_changed = true;
                }
            }
            ConfigDelta::ScreenProfile(profile) => {
                if let Err(e) = profile.validate() {
                    warn!(
                        "Rejected screen profile {}x{} ({}); keeping {}x{}",
                        profile.width_px,
                        profile.height_px,
                        e,
                        self.hmd.screen.width_px,
                        self.hmd.screen.height_px
                    );
                } else if profile == self.hmd.screen {
                    debug!("Screen profile unchanged, ignoring");
                } else {
                    info!("Screen profile set to {}x{}", profile.width_px, profile.height_px);
                    self.hmd.screen = profile;
                    self.projection_changed = true;
                }
            }
            ConfigDelta::VrMode(enabled) => {
                if self.config.vr_mode != enabled {
                    self.config.vr_mode = enabled;
                    self.projection_changed = true;
                    info!("VR mode {}", if enabled { "enabled" } else { "disabled" });
                    if self.surface_created {
                        let (width, height) = (self.hmd.screen.width_px, self.hmd.screen.height_px);
                        self.on_surface_changed(width, height);
                    }
                }
            }
            ConfigDelta::DistortionCorrection(enabled) => {
                self.config.distortion_correction = enabled;
                self.projection_changed = true;
            }
            ConfigDelta::ResolutionScale(scale) => {
                if valid_resolution_scale(scale) {
                    self.config.resolution_scale = scale;
                    self.warp.set_resolution_scale(scale);
                } else {
                    warn!("Ignoring resolution scale {}", scale);
                }
            }
            ConfigDelta::RestoreState(enabled) => {
                self.config.restore_state = enabled;
                self.warp.set_restore_state_enabled(enabled);
            }
            ConfigDelta::ChromaticAberrationCorrection(enabled) => {
                self.config.chromatic_aberration_correction = enabled;
                self.warp.set_chromatic_aberration_correction_enabled(enabled);
            }
            ConfigDelta::Vignette(enabled) => {
                self.warp.set_vignette_enabled(enabled)?;
                self.config.vignette = enabled;
                self.projection_changed = true;
            }
            ConfigDelta::TextureFormat(format) => {
                self.warp.set_texture_format(format)?;
                self.config.texture_format = format;
            }
            ConfigDelta::NeckModel(neck_model) => {
                self.config.neck_model = neck_model;
                self.head_tracker.set_neck_model(neck_model);
            }
            ConfigDelta::DisplayRotation(rotation) => {
                self.config.display_rotation = rotation;
            }
        }
        Ok(())
    }

    /// Records the new surface size. Rendering stays disabled while it does
    /// not match the screen profile.
    pub fn on_surface_changed(&mut self, width: u32, height: u32) {
        let screen = &self.hmd.screen;
        if width != screen.width_px || height != screen.height_px {
            if !self.invalid_surface_size {
                warn!(
                    "Surface size {}x{} does not match the expected screen size {}x{}. Rendering is disabled.",
                    width, height, screen.width_px, screen.height_px
                );
            }
            self.invalid_surface_size = true;
        } else {
            self.invalid_surface_size = false;
        }
        self.surface_created = true;

        if self.config.vr_mode {
            self.scene.on_surface_changed(width / 2, height);
        } else {
            self.scene.on_surface_changed(width, height);
        }
    }

    /// Computes the head pose and eye parameters of the coming frame.
    fn update_frame_params(&mut self) -> VrResult<()> {
        let head_view = self.head_tracker.last_head_view(self.config.display_rotation);
        self.head = HeadTransform::new(head_view);

        let half_ipd = self.hmd.device.inter_lens_distance * 0.5;
        if self.config.vr_mode {
            self.left_eye
                .set_eye_view(Mat4::from_translation(Vec3::new(half_ipd, 0.0, 0.0)) * head_view);
            self.right_eye
                .set_eye_view(Mat4::from_translation(Vec3::new(-half_ipd, 0.0, 0.0)) * head_view);
        } else {
            self.monocular_eye.set_eye_view(head_view);
        }

        if self.projection_changed {
            let screen = &self.hmd.screen;
            self.monocular_eye.set_viewport(Viewport::full(
                screen.width_px as i32,
                screen.height_px as i32,
            ));

            if !self.config.vr_mode {
                self.monocular_eye.set_fov(optics::monocular_fov(screen));
            } else if self.config.distortion_correction {
                let (left_fov, right_fov) = optics::distorted_fov(&self.hmd);
                self.left_eye.set_fov(left_fov);
                self.right_eye.set_fov(right_fov);
                self.warp.on_fov_changed(
                    &self.hmd,
                    &left_fov,
                    &right_fov,
                    self.hmd.device.screen_to_lens_distance,
                )?;
            } else {
                let (left_fov, right_fov) = optics::undistorted_fov(&self.hmd);
                let (left_viewport, right_viewport) = optics::undistorted_viewports(screen);
                self.left_eye.set_fov(left_fov);
                self.right_eye.set_fov(right_fov);
                self.left_eye.set_viewport(left_viewport);
                self.right_eye.set_viewport(right_viewport);
            }

            self.left_eye.set_projection_changed();
            self.right_eye.set_projection_changed();
            self.monocular_eye.set_projection_changed();
            self.projection_changed = false;
        }

        if self.config.distortion_correction && self.warp.have_viewports_changed() {
            let (left, right) = self.warp.update_viewports()?;
            self.left_eye.set_viewport(left);
            self.right_eye.set_viewport(right);
        }
        Ok(())
    }

    /// Draws one frame. Returns `false` when nothing was drawn because the
    /// surface is missing or mismatched, or the renderer was shut down.
    pub fn draw_frame(&mut self, backend: &mut B) -> VrResult<bool> {
        self.poll(backend)?;
        if self.shut_down || !self.is_surface_size_valid() {
            return Ok(false);
        }
        self.update_frame_params()?;

        if self.config.vr_mode && self.config.distortion_correction {
            self.warp.before_draw_frame(backend)?;
            self.draw_eyes(backend);
            self.warp.after_draw_frame(backend)?;
        } else {
            self.draw_eyes(backend);
        }

        let viewport = self.monocular_eye.viewport();
        backend.set_viewport(viewport);
        backend.set_scissor(Some(viewport));
        self.scene.on_finish_frame(backend, viewport);
        Ok(true)
    }

    fn draw_eyes(&mut self, backend: &mut B) {
        self.scene.on_new_frame(&self.head);
        let (first, second) = if self.config.vr_mode {
            (&self.left_eye, Some(&self.right_eye))
        } else {
            (&self.monocular_eye, None)
        };
        for eye in std::iter::once(first).chain(second) {
            let viewport = eye.viewport();
            backend.set_viewport(viewport);
            backend.set_scissor(Some(viewport));
            self.scene.on_draw_eye(backend, &self.head, eye);
        }
    }

    /// Warps a host texture laid out like the offscreen eye texture.
    pub fn undistort_texture(&mut self, backend: &mut B, texture: &B::Texture) -> VrResult<()> {
        self.warp.undistort_texture(backend, texture)
    }

    /// Releases GPU resources and notifies the scene if it ever saw a
    /// surface. Later calls do nothing.
    pub fn shutdown(&mut self, backend: &mut B) {
        if self.shut_down {
            return;
        }
        self.warp.shutdown(backend);
        if self.surface_created {
            self.scene.on_renderer_shutdown();
        }
        self.shut_down = true;
        info!("Stereo renderer shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_config_keeps_defaults() {
        let config: StereoConfig =
            serde_json::from_str(r#"{ "vr_mode": false, "texture_format": "Rgba16Float" }"#).unwrap();
        assert!(!config.vr_mode);
        assert_eq!(config.texture_format, TextureFormat::Rgba16Float);
        assert!(config.distortion_correction);
        assert!(config.vignette);
        assert_eq!(config.resolution_scale, 1.0);
        assert_eq!(config.neck_model, NeckModel::default());
    }

    #[test]
    fn unreadable_config_falls_back() {
        let missing = Path::new("/nonexistent/vr_lens/renderer.json");
        assert_eq!(StereoConfig::load_or_default(missing), StereoConfig::default());
        let bad = StereoConfig {
            resolution_scale: f32::NAN,
            ..StereoConfig::default()
        };
        assert!(matches!(bad.validate(), Err(VrError::InvalidCalibration(_))));
    }
}
