//! Offscreen render target both eyes are drawn into.

use log::info;

use crate::backend::{GraphicsBackend, TargetTexture, TextureFormat};
use crate::error::{VrError, VrResult};
use crate::optics::{EyeLayout, PixelScale};

/// Owns the packed two-eye texture and swaps it in and out as the draw
/// target around scene rendering.
pub struct OffscreenCompositor<B: GraphicsBackend> {
    target: Option<B::RenderTarget>,
    size: (u32, u32),
    format: TextureFormat,
    caller_framebuffer: Option<B::Framebuffer>,
}

impl<B: GraphicsBackend> Default for OffscreenCompositor<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: GraphicsBackend> OffscreenCompositor<B> {
    pub fn new() -> Self {
        Self {
            target: None,
            size: (0, 0),
            format: TextureFormat::default(),
            caller_framebuffer: None,
        }
    }

    /// Pixel size of the texture holding `layout`, capped at `max_size` per axis.
    pub fn target_size(layout: &EyeLayout, scale: &PixelScale, max_size: u32) -> (u32, u32) {
        let px = |tan: f32, px_per_tan: f32| ((tan * px_per_tan).round().max(1.0) as u32).min(max_size);
        (
            px(layout.texture_width(), scale.x_px_per_tan_angle),
            px(layout.texture_height(), scale.y_px_per_tan_angle),
        )
    }

    /// Replaces the render target. The old one is released first.
    pub fn rebuild(
        &mut self,
        backend: &mut B,
        width: u32,
        height: u32,
        format: TextureFormat,
    ) -> VrResult<()> {
        if let Some(old) = self.target.take() {
            backend.destroy_render_target(old);
        }
        self.target = Some(backend.create_render_target(width, height, format)?);
        self.size = (width, height);
        self.format = format;
        info!("Offscreen target is {}x{} {:?}", width, height, format);
        Ok(())
    }

    /// Redirects drawing into the offscreen target, remembering where it went before.
    pub fn bind(&mut self, backend: &mut B) -> VrResult<()> {
        let target = self.target.as_ref().ok_or(VrError::NotConfigured)?;
        self.caller_framebuffer = Some(backend.current_framebuffer());
        backend.bind_render_target(target);
        Ok(())
    }

    /// Rebinds the framebuffer that was current at [`bind`](Self::bind).
    pub fn unbind(&mut self, backend: &mut B) {
        if let Some(framebuffer) = self.caller_framebuffer.take() {
            backend.bind_framebuffer(&framebuffer);
        }
    }

    pub fn texture(&self) -> Option<&B::Texture> {
        self.target.as_ref().map(|target| target.texture())
    }

    pub fn size(&self) -> (u32, u32) {
        self.size
    }

    pub fn format(&self) -> TextureFormat {
        self.format
    }

    pub fn is_allocated(&self) -> bool {
        self.target.is_some()
    }

    pub fn destroy(&mut self, backend: &mut B) {
        if let Some(target) = self.target.take() {
            backend.destroy_render_target(target);
        }
        self.size = (0, 0);
        self.caller_framebuffer = None;
    }
}
