#![allow(dead_code)]

use std::sync::Arc;

use glam::{Mat4, Vec3};
use vr_lens::backend::{GraphicsBackend, ShaderVariant, TargetTexture, TextureFormat};
use vr_lens::error::{VrError, VrResult};
use vr_lens::eye::{Eye, EyeType};
use vr_lens::fov::FieldOfView;
use vr_lens::head_tracker::HeadTransform;
use vr_lens::mesh::DistortionMesh;
use vr_lens::profile::{DeviceOpticalProfile, HeadMountedDisplay, ScreenProfile};
use vr_lens::sensors::{Clock, OrientationFilter, SensorFusion};
use vr_lens::stereo::SceneRenderer;
use vr_lens::viewport::Viewport;

/// `None` is the screen.
pub type Framebuffer = Option<u32>;

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    CreateRenderTarget {
        id: u32,
        width: u32,
        height: u32,
        format: TextureFormat,
    },
    DestroyRenderTarget(u32),
    CreateMesh {
        id: u32,
        vertices: usize,
        indices: usize,
    },
    DestroyMesh(u32),
    CompileProgram(ShaderVariant),
    DestroyProgram(ShaderVariant),
    BindRenderTarget(u32),
    BindFramebuffer(Framebuffer),
    SetViewport(Viewport),
    SetScissor(Option<Viewport>),
    Clear,
    DrawMesh {
        program: ShaderVariant,
        mesh: u32,
        texture: u32,
        texture_coord_scale: f32,
        framebuffer: Framebuffer,
        scissor: Option<Viewport>,
    },
    SaveState,
    RestoreState,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RecordedState {
    pub framebuffer: Framebuffer,
    pub viewport: Viewport,
    pub scissor: Option<Viewport>,
}

pub struct RecordingTarget {
    pub id: u32,
    pub texture: u32,
}

impl TargetTexture for RecordingTarget {
    type Texture = u32;

    fn texture(&self) -> &u32 {
        &self.texture
    }
}

/// Records every call and tracks the state a real backend would hold.
pub struct RecordingBackend {
    pub calls: Vec<Call>,
    pub max_texture_size: u32,
    pub failing_program: Option<ShaderVariant>,
    pub framebuffer: Framebuffer,
    pub viewport: Viewport,
    pub scissor: Option<Viewport>,
    pub live_targets: usize,
    pub live_meshes: usize,
    pub live_programs: usize,
    next_id: u32,
}

impl Default for RecordingBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self {
            calls: Vec::new(),
            max_texture_size: 4096,
            failing_program: None,
            framebuffer: None,
            viewport: Viewport::default(),
            scissor: None,
            live_targets: 0,
            live_meshes: 0,
            live_programs: 0,
            next_id: 1,
        }
    }

    pub fn state(&self) -> RecordedState {
        RecordedState {
            framebuffer: self.framebuffer,
            viewport: self.viewport,
            scissor: self.scissor,
        }
    }

    pub fn take_calls(&mut self) -> Vec<Call> {
        std::mem::take(&mut self.calls)
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls.iter().filter(|c| pred(c)).count()
    }

    pub fn draws(&self) -> Vec<&Call> {
        self.calls
            .iter()
            .filter(|c| matches!(c, Call::DrawMesh { .. }))
            .collect()
    }

    fn next_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }
}

impl GraphicsBackend for RecordingBackend {
    type Texture = u32;
    type RenderTarget = RecordingTarget;
    type Mesh = u32;
    type Program = ShaderVariant;
    type Framebuffer = Framebuffer;
    type SavedState = RecordedState;

    fn max_texture_size(&self) -> u32 {
        self.max_texture_size
    }

    fn create_render_target(
        &mut self,
        width: u32,
        height: u32,
        format: TextureFormat,
    ) -> VrResult<RecordingTarget> {
        let id = self.next_id();
        self.calls.push(Call::CreateRenderTarget {
            id,
            width,
            height,
            format,
        });
        self.live_targets += 1;
        Ok(RecordingTarget { id, texture: id })
    }

    fn destroy_render_target(&mut self, target: RecordingTarget) {
        self.calls.push(Call::DestroyRenderTarget(target.id));
        self.live_targets -= 1;
    }

    fn create_mesh(&mut self, mesh: &DistortionMesh) -> VrResult<u32> {
        let id = self.next_id();
        self.calls.push(Call::CreateMesh {
            id,
            vertices: mesh.vertices.len(),
            indices: mesh.indices.len(),
        });
        self.live_meshes += 1;
        Ok(id)
    }

    fn destroy_mesh(&mut self, mesh: u32) {
        self.calls.push(Call::DestroyMesh(mesh));
        self.live_meshes -= 1;
    }

    fn compile_program(&mut self, variant: ShaderVariant) -> VrResult<ShaderVariant> {
        if self.failing_program == Some(variant) {
            return Err(VrError::ShaderCompilation {
                variant: variant.label(),
                reason: "rejected by test".to_string(),
            });
        }
        self.calls.push(Call::CompileProgram(variant));
        self.live_programs += 1;
        Ok(variant)
    }

    fn destroy_program(&mut self, program: ShaderVariant) {
        self.calls.push(Call::DestroyProgram(program));
        self.live_programs -= 1;
    }

    fn current_framebuffer(&self) -> Framebuffer {
        self.framebuffer
    }

    fn bind_render_target(&mut self, target: &RecordingTarget) {
        self.calls.push(Call::BindRenderTarget(target.id));
        self.framebuffer = Some(target.id);
    }

    fn bind_framebuffer(&mut self, framebuffer: &Framebuffer) {
        self.calls.push(Call::BindFramebuffer(*framebuffer));
        self.framebuffer = *framebuffer;
    }

    fn set_viewport(&mut self, viewport: Viewport) {
        self.calls.push(Call::SetViewport(viewport));
        self.viewport = viewport;
    }

    fn set_scissor(&mut self, scissor: Option<Viewport>) {
        self.calls.push(Call::SetScissor(scissor));
        self.scissor = scissor;
    }

    fn clear(&mut self, _color: [f32; 4]) {
        self.calls.push(Call::Clear);
    }

    fn draw_mesh(&mut self, program: &ShaderVariant, mesh: &u32, texture: &u32, texture_coord_scale: f32) {
        self.calls.push(Call::DrawMesh {
            program: *program,
            mesh: *mesh,
            texture: *texture,
            texture_coord_scale,
            framebuffer: self.framebuffer,
            scissor: self.scissor,
        });
    }

    fn save_state(&mut self) -> RecordedState {
        self.calls.push(Call::SaveState);
        self.state()
    }

    fn restore_state(&mut self, state: RecordedState) {
        self.calls.push(Call::RestoreState);
        self.framebuffer = state.framebuffer;
        self.viewport = state.viewport;
        self.scissor = state.scissor;
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SceneEvent {
    NewFrame,
    DrawEye {
        eye_type: EyeType,
        eye_view: Mat4,
        fov: FieldOfView,
        viewport: Viewport,
        backend_viewport: Viewport,
        backend_scissor: Option<Viewport>,
        framebuffer: Framebuffer,
    },
    FinishFrame(Viewport),
    SurfaceChanged(u32, u32),
    Shutdown,
}

#[derive(Debug, Default)]
pub struct RecordingScene {
    pub events: Vec<SceneEvent>,
}

impl RecordingScene {
    pub fn eye_draws(&self) -> Vec<&SceneEvent> {
        self.events
            .iter()
            .filter(|e| matches!(e, SceneEvent::DrawEye { .. }))
            .collect()
    }

    pub fn shutdowns(&self) -> usize {
        self.events
            .iter()
            .filter(|e| matches!(e, SceneEvent::Shutdown))
            .count()
    }
}

impl SceneRenderer<RecordingBackend> for RecordingScene {
    fn on_new_frame(&mut self, _head: &HeadTransform) {
        self.events.push(SceneEvent::NewFrame);
    }

    fn on_draw_eye(&mut self, backend: &mut RecordingBackend, _head: &HeadTransform, eye: &Eye) {
        self.events.push(SceneEvent::DrawEye {
            eye_type: eye.eye_type(),
            eye_view: eye.eye_view(),
            fov: eye.fov(),
            viewport: eye.viewport(),
            backend_viewport: backend.viewport,
            backend_scissor: backend.scissor,
            framebuffer: backend.framebuffer,
        });
    }

    fn on_finish_frame(&mut self, _backend: &mut RecordingBackend, viewport: Viewport) {
        self.events.push(SceneEvent::FinishFrame(viewport));
    }

    fn on_surface_changed(&mut self, width: u32, height: u32) {
        self.events.push(SceneEvent::SurfaceChanged(width, height));
    }

    fn on_renderer_shutdown(&mut self) {
        self.events.push(SceneEvent::Shutdown);
    }
}

/// Always reports the same orientation.
pub struct FixedFilter(pub Mat4);

impl OrientationFilter for FixedFilter {
    fn process_accel(&mut self, _: Vec3, _: i64) {}
    fn process_gyro(&mut self, _: Vec3, _: i64) {}
    fn reset(&mut self) {}
    fn predict(&self, _: f64) -> Mat4 {
        self.0
    }
}

pub struct ZeroClock;

impl Clock for ZeroClock {
    fn nano_time(&self) -> i64 {
        0
    }
}

pub fn fixed_fusion(orientation: Mat4) -> Arc<SensorFusion> {
    Arc::new(SensorFusion::new(
        Box::new(FixedFilter(orientation)),
        Arc::new(ZeroClock),
    ))
}

pub fn screen_1080p() -> ScreenProfile {
    ScreenProfile::from_display_metrics(1920, 1080, 400.0, 400.0)
}

/// 1920x1080 phone in the stock viewer.
pub fn stock_hmd() -> HeadMountedDisplay {
    HeadMountedDisplay::new(screen_1080p(), DeviceOpticalProfile::default())
}
