//! Lens-warp pass: takes the packed eye texture and draws it onto the screen
//! through one distortion mesh per eye.
//!
//! A frame moves through three phases. [`WarpRenderer::before_draw_frame`]
//! redirects drawing into the offscreen texture, the scene renders both eyes
//! into it, and [`WarpRenderer::after_draw_frame`] warps the result onto the
//! caller's framebuffer. Geometry and GPU resources are rebuilt lazily at the
//! start of a frame whenever FOV, vignette or texture format changed.

use log::{debug, info};

use crate::backend::{GraphicsBackend, ShaderVariant, StateGuard, TextureFormat};
use crate::compositor::OffscreenCompositor;
use crate::distortion::ChannelDistortion;
use crate::error::{VrError, VrResult};
use crate::fov::FieldOfView;
use crate::mesh::{DistortionMesh, MeshGeometry};
use crate::optics::{EyeLayout, EyeViewport, PixelScale};
use crate::profile::HeadMountedDisplay;
use crate::viewport::Viewport;

const CLEAR_COLOR: [f32; 4] = [0.0, 0.0, 0.0, 1.0];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramePhase {
    Idle,
    /// Scene is drawing into the offscreen target.
    Compositing,
    /// Offscreen target is being warped onto the screen.
    Warping,
}

impl FramePhase {
    pub fn name(&self) -> &'static str {
        match self {
            FramePhase::Idle => "idle",
            FramePhase::Compositing => "compositing",
            FramePhase::Warping => "warping",
        }
    }
}

/// Calibration snapshot taken at the last FOV change.
#[derive(Debug, Clone)]
struct WarpGeometry {
    hmd: HeadMountedDisplay,
    layout: EyeLayout,
    pixel_scale: PixelScale,
    meters_per_tan_angle: f32,
}

impl WarpGeometry {
    fn mesh_geometry(&self, viewport: EyeViewport, x_eye_offset_screen: f32) -> MeshGeometry {
        let screen = &self.hmd.screen;
        MeshGeometry {
            screen_width: screen.width_meters() / self.meters_per_tan_angle,
            screen_height: screen.height_meters() / self.meters_per_tan_angle,
            x_eye_offset_screen,
            y_eye_offset_screen: (self.hmd.device.vertical_distance_to_lens_center
                - screen.border_size_meters)
                / self.meters_per_tan_angle,
            texture_width: self.layout.texture_width(),
            texture_height: self.layout.texture_height(),
            viewport,
        }
    }

    /// Lens center of the left and right eye on the screen, tan-angle units.
    fn x_eye_offsets_screen(&self) -> (f32, f32) {
        let screen_width = self.hmd.screen.width_meters();
        let left = (screen_width / 2.0 - self.hmd.device.inter_lens_distance / 2.0)
            / self.meters_per_tan_angle;
        let right = screen_width / self.meters_per_tan_angle - left;
        (left, right)
    }
}

struct ProgramSet<P> {
    standard: P,
    aberration: P,
}

struct EyeMeshes<M> {
    left: M,
    right: M,
}

pub struct WarpRenderer<B: GraphicsBackend> {
    compositor: OffscreenCompositor<B>,
    programs: Option<ProgramSet<B::Program>>,
    meshes: Option<EyeMeshes<B::Mesh>>,
    geometry: Option<WarpGeometry>,

    texture_format: TextureFormat,
    resolution_scale: f32,
    restore_state: bool,
    chromatic_aberration_correction: bool,
    vignette: bool,

    fovs_changed: bool,
    viewports_changed: bool,
    texture_format_changed: bool,
    phase: FramePhase,
}

impl<B: GraphicsBackend> Default for WarpRenderer<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: GraphicsBackend> WarpRenderer<B> {
    pub fn new() -> Self {
        Self {
            compositor: OffscreenCompositor::new(),
            programs: None,
            meshes: None,
            geometry: None,
            texture_format: TextureFormat::default(),
            resolution_scale: 1.0,
            restore_state: false,
            chromatic_aberration_correction: false,
            vignette: false,
            fovs_changed: false,
            viewports_changed: false,
            texture_format_changed: false,
            phase: FramePhase::Idle,
        }
    }

    pub fn phase(&self) -> FramePhase {
        self.phase
    }

    fn ensure_idle(&self, operation: &'static str) -> VrResult<()> {
        if self.phase == FramePhase::Idle {
            Ok(())
        } else {
            Err(VrError::DrawingInProgress { operation })
        }
    }

    fn expect_phase(&self, expected: FramePhase) -> VrResult<()> {
        if self.phase == expected {
            Ok(())
        } else {
            Err(VrError::InvalidPhase {
                expected: expected.name(),
                found: self.phase.name(),
            })
        }
    }

    pub fn set_texture_format(&mut self, format: TextureFormat) -> VrResult<()> {
        self.ensure_idle("set_texture_format")?;
        if format != self.texture_format {
            self.texture_format = format;
            self.texture_format_changed = true;
        }
        Ok(())
    }

    pub fn texture_format(&self) -> TextureFormat {
        self.texture_format
    }

    pub fn set_resolution_scale(&mut self, scale: f32) {
        self.resolution_scale = scale;
        self.viewports_changed = true;
    }

    pub fn resolution_scale(&self) -> f32 {
        self.resolution_scale
    }

    pub fn set_restore_state_enabled(&mut self, enabled: bool) {
        self.restore_state = enabled;
    }

    pub fn is_restore_state_enabled(&self) -> bool {
        self.restore_state
    }

    pub fn set_chromatic_aberration_correction_enabled(&mut self, enabled: bool) {
        self.chromatic_aberration_correction = enabled;
    }

    pub fn is_chromatic_aberration_correction_enabled(&self) -> bool {
        self.chromatic_aberration_correction
    }

    /// The vignette is baked into the meshes, so this forces a rebuild.
    pub fn set_vignette_enabled(&mut self, enabled: bool) -> VrResult<()> {
        self.ensure_idle("set_vignette_enabled")?;
        self.vignette = enabled;
        self.fovs_changed = true;
        Ok(())
    }

    pub fn is_vignette_enabled(&self) -> bool {
        self.vignette
    }

    /// Takes a new calibration snapshot and per-eye FOVs. Resources are
    /// rebuilt at the next frame.
    pub fn on_fov_changed(
        &mut self,
        hmd: &HeadMountedDisplay,
        left_fov: &FieldOfView,
        right_fov: &FieldOfView,
        meters_per_tan_angle: f32,
    ) -> VrResult<()> {
        self.ensure_idle("on_fov_changed")?;
        self.geometry = Some(WarpGeometry {
            hmd: hmd.clone(),
            layout: EyeLayout::new(left_fov, right_fov),
            pixel_scale: PixelScale::new(&hmd.screen, meters_per_tan_angle),
            meters_per_tan_angle,
        });
        self.fovs_changed = true;
        self.viewports_changed = true;
        Ok(())
    }

    /// True when [`update_viewports`](Self::update_viewports) has new values.
    /// Always false before the first FOV change.
    pub fn have_viewports_changed(&self) -> bool {
        self.viewports_changed && self.geometry.is_some()
    }

    /// Pixel viewports of both eyes inside the offscreen texture at the
    /// current resolution scale.
    pub fn update_viewports(&mut self) -> VrResult<(Viewport, Viewport)> {
        let geometry = self.geometry.as_ref().ok_or(VrError::NotConfigured)?;
        let scale = &geometry.pixel_scale;
        let viewports = (
            geometry.layout.left.to_pixels(scale, self.resolution_scale),
            geometry.layout.right.to_pixels(scale, self.resolution_scale),
        );
        self.viewports_changed = false;
        Ok(viewports)
    }

    pub fn before_draw_frame(&mut self, backend: &mut B) -> VrResult<()> {
        self.expect_phase(FramePhase::Idle)?;
        self.rebuild_if_dirty(backend)?;
        self.compositor.bind(backend)?;
        self.phase = FramePhase::Compositing;
        Ok(())
    }

    pub fn after_draw_frame(&mut self, backend: &mut B) -> VrResult<()> {
        self.expect_phase(FramePhase::Compositing)?;
        self.phase = FramePhase::Warping;
        self.compositor.unbind(backend);
        let result = match self.compositor.texture() {
            Some(texture) => self.warp(backend, texture),
            None => Err(VrError::NotConfigured),
        };
        self.phase = FramePhase::Idle;
        result
    }

    /// Warps an arbitrary texture laid out like the offscreen target.
    pub fn undistort_texture(&mut self, backend: &mut B, texture: &B::Texture) -> VrResult<()> {
        self.ensure_idle("undistort_texture")?;
        self.rebuild_if_dirty(backend)?;
        self.warp(backend, texture)
    }

    fn warp(&self, backend: &mut B, texture: &B::Texture) -> VrResult<()> {
        let (Some(geometry), Some(programs), Some(meshes)) =
            (&self.geometry, &self.programs, &self.meshes)
        else {
            return Err(VrError::NotConfigured);
        };
        let width = geometry.hmd.screen.width_px as i32;
        let height = geometry.hmd.screen.height_px as i32;
        let program = if self.chromatic_aberration_correction {
            &programs.aberration
        } else {
            &programs.standard
        };

        let mut backend = StateGuard::new(backend, self.restore_state);
        backend.set_viewport(Viewport::full(width, height));
        backend.set_scissor(None);
        backend.clear(CLEAR_COLOR);

        backend.set_scissor(Some(Viewport::new(0, 0, width / 2, height)));
        backend.draw_mesh(program, &meshes.left, texture, self.resolution_scale);
        backend.set_scissor(Some(Viewport::new(width / 2, 0, width / 2, height)));
        backend.draw_mesh(program, &meshes.right, texture, self.resolution_scale);
        Ok(())
    }

    fn rebuild_if_dirty(&mut self, backend: &mut B) -> VrResult<()> {
        if !self.fovs_changed && !self.texture_format_changed {
            return Ok(());
        }
        let geometry = self.geometry.as_ref().ok_or(VrError::NotConfigured)?;

        if self.programs.is_none() {
            let standard = backend.compile_program(ShaderVariant::Standard)?;
            let aberration = match backend.compile_program(ShaderVariant::AberrationCorrected) {
                Ok(program) => program,
                Err(e) => {
                    backend.destroy_program(standard);
                    return Err(e);
                }
            };
            self.programs = Some(ProgramSet {
                standard,
                aberration,
            });
        }

        let channels = ChannelDistortion::uniform(&geometry.hmd.device.distortion);
        let (x_left, x_right) = geometry.x_eye_offsets_screen();
        let left = DistortionMesh::build(
            &channels,
            &geometry.mesh_geometry(geometry.layout.left, x_left),
            self.vignette,
        );
        let right = DistortionMesh::build(
            &channels,
            &geometry.mesh_geometry(geometry.layout.right, x_right),
            self.vignette,
        );
        let (width, height) = OffscreenCompositor::<B>::target_size(
            &geometry.layout,
            &geometry.pixel_scale,
            backend.max_texture_size(),
        );

        if let Some(old) = self.meshes.take() {
            backend.destroy_mesh(old.left);
            backend.destroy_mesh(old.right);
        }
        let left = backend.create_mesh(&left)?;
        let right = match backend.create_mesh(&right) {
            Ok(mesh) => mesh,
            Err(e) => {
                backend.destroy_mesh(left);
                return Err(e);
            }
        };
        self.meshes = Some(EyeMeshes { left, right });
        debug!("Rebuilt distortion meshes (vignette: {})", self.vignette);

        self.compositor
            .rebuild(backend, width, height, self.texture_format)?;
        self.fovs_changed = false;
        self.texture_format_changed = false;
        Ok(())
    }

    /// Size of the offscreen texture, `(0, 0)` before the first frame.
    pub fn target_size(&self) -> (u32, u32) {
        self.compositor.size()
    }

    /// Releases every GPU resource. The next frame rebuilds them.
    pub fn shutdown(&mut self, backend: &mut B) {
        if let Some(meshes) = self.meshes.take() {
            backend.destroy_mesh(meshes.left);
            backend.destroy_mesh(meshes.right);
        }
        self.compositor.destroy(backend);
        if let Some(programs) = self.programs.take() {
            backend.destroy_program(programs.standard);
            backend.destroy_program(programs.aberration);
        }
        self.fovs_changed = true;
        self.phase = FramePhase::Idle;
        info!("Warp renderer resources released");
    }
}
