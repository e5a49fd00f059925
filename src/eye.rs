//! Per-eye render parameters handed to the scene each frame.

use std::cell::Cell;

use glam::Mat4;

use crate::fov::FieldOfView;
use crate::viewport::Viewport;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EyeType {
    Monocular,
    Left,
    Right,
}

#[derive(Debug, Clone, Copy)]
struct CachedPerspective {
    z_near: f32,
    z_far: f32,
    matrix: Mat4,
}

#[derive(Debug, Clone)]
pub struct Eye {
    eye_type: EyeType,
    eye_view: Mat4,
    viewport: Viewport,
    fov: FieldOfView,
    perspective: Cell<Option<CachedPerspective>>,
}

impl Eye {
    pub fn new(eye_type: EyeType) -> Self {
        Self {
            eye_type,
            eye_view: Mat4::IDENTITY,
            viewport: Viewport::default(),
            fov: FieldOfView::default(),
            perspective: Cell::new(None),
        }
    }

    pub fn eye_type(&self) -> EyeType {
        self.eye_type
    }

    /// View matrix of this eye (head view plus the eye's offset).
    pub fn eye_view(&self) -> Mat4 {
        self.eye_view
    }

    pub fn set_eye_view(&mut self, eye_view: Mat4) {
        self.eye_view = eye_view;
    }

    /// Where this eye renders, in pixels of the current draw target.
    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    pub fn set_viewport(&mut self, viewport: Viewport) {
        self.viewport = viewport;
    }

    pub fn fov(&self) -> FieldOfView {
        self.fov
    }

    pub fn set_fov(&mut self, fov: FieldOfView) {
        self.fov = fov;
        self.set_projection_changed();
    }

    /// Drops the cached projection; the next [`perspective`](Self::perspective) recomputes it.
    pub fn set_projection_changed(&self) {
        self.perspective.set(None);
    }

    /// Projection for this eye's FOV, cached until the FOV or clip planes change.
    pub fn perspective(&self, z_near: f32, z_far: f32) -> Mat4 {
        if let Some(cached) = self.perspective.get() {
            if cached.z_near == z_near && cached.z_far == z_far {
                return cached.matrix;
            }
        }
        let matrix = self.fov.to_perspective_matrix(z_near, z_far);
        self.perspective.set(Some(CachedPerspective {
            z_near,
            z_far,
            matrix,
        }));
        matrix
    }
}
