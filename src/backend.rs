//! The seam between the warp renderer and a concrete graphics API.
//!
//! Everything the compositor and warp pass need from the GPU goes through
//! [`GraphicsBackend`]. Handles are associated types so that a backend keeps
//! its own resource representation and the renderer never sees raw API
//! objects. [`crate::wgpu_backend::WgpuBackend`] is the production
//! implementation; tests drive the renderer with a recording double.

use std::ops::{Deref, DerefMut};

use serde::{Deserialize, Serialize};

use crate::error::VrResult;
use crate::mesh::DistortionMesh;
use crate::viewport::Viewport;

/// Which warp shader a draw uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderVariant {
    /// Samples all channels at the blue coordinate.
    Standard,
    /// Samples each color channel at its own coordinate.
    AberrationCorrected,
}

impl ShaderVariant {
    pub fn label(&self) -> &'static str {
        match self {
            ShaderVariant::Standard => "standard",
            ShaderVariant::AberrationCorrected => "aberration_corrected",
        }
    }
}

/// Color format of the offscreen eye texture.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TextureFormat {
    #[default]
    Rgba8Unorm,
    Rgba8UnormSrgb,
    Bgra8Unorm,
    Rgba16Float,
}

/// Access to the sampleable color texture of a render target.
pub trait TargetTexture {
    type Texture;

    fn texture(&self) -> &Self::Texture;
}

/// GPU operations used by the distortion pipeline.
///
/// Viewports and scissor rectangles are in pixels with a bottom-left origin.
/// Draw and clear calls act on whatever framebuffer is currently bound.
pub trait GraphicsBackend {
    type Texture;
    type RenderTarget: TargetTexture<Texture = Self::Texture>;
    type Mesh;
    type Program;
    type Framebuffer: Clone;
    type SavedState;

    /// Largest width or height a render target may have.
    fn max_texture_size(&self) -> u32;

    /// Allocates a color texture with a 16-bit depth attachment.
    fn create_render_target(
        &mut self,
        width: u32,
        height: u32,
        format: TextureFormat,
    ) -> VrResult<Self::RenderTarget>;

    fn destroy_render_target(&mut self, target: Self::RenderTarget);

    /// Uploads vertex and index data of a warp mesh.
    fn create_mesh(&mut self, mesh: &DistortionMesh) -> VrResult<Self::Mesh>;

    fn destroy_mesh(&mut self, mesh: Self::Mesh);

    fn compile_program(&mut self, variant: ShaderVariant) -> VrResult<Self::Program>;

    fn destroy_program(&mut self, program: Self::Program);

    /// The framebuffer draws currently go to.
    fn current_framebuffer(&self) -> Self::Framebuffer;

    fn bind_render_target(&mut self, target: &Self::RenderTarget);

    fn bind_framebuffer(&mut self, framebuffer: &Self::Framebuffer);

    fn set_viewport(&mut self, viewport: Viewport);

    /// `None` disables scissoring.
    fn set_scissor(&mut self, scissor: Option<Viewport>);

    /// Clears color (and depth, if present) within the scissor rectangle.
    fn clear(&mut self, color: [f32; 4]);

    /// Draws a warp mesh sampling `texture`, with texture coordinates
    /// multiplied by `texture_coord_scale`.
    fn draw_mesh(
        &mut self,
        program: &Self::Program,
        mesh: &Self::Mesh,
        texture: &Self::Texture,
        texture_coord_scale: f32,
    );

    /// Captures the pipeline state the warp pass may disturb.
    fn save_state(&mut self) -> Self::SavedState;

    fn restore_state(&mut self, state: Self::SavedState);
}

/// Restores the backend state captured at construction when dropped.
///
/// A disabled guard captures nothing and restores nothing.
pub struct StateGuard<'a, B: GraphicsBackend> {
    backend: &'a mut B,
    saved: Option<B::SavedState>,
}

impl<'a, B: GraphicsBackend> StateGuard<'a, B> {
    pub fn new(backend: &'a mut B, enabled: bool) -> Self {
        let saved = if enabled {
            Some(backend.save_state())
        } else {
            None
        };
        Self { backend, saved }
    }
}

impl<B: GraphicsBackend> Deref for StateGuard<'_, B> {
    type Target = B;

    fn deref(&self) -> &B {
        self.backend
    }
}

impl<B: GraphicsBackend> DerefMut for StateGuard<'_, B> {
    fn deref_mut(&mut self) -> &mut B {
        self.backend
    }
}

impl<B: GraphicsBackend> Drop for StateGuard<'_, B> {
    fn drop(&mut self) {
        if let Some(state) = self.saved.take() {
            self.backend.restore_state(state);
        }
    }
}
