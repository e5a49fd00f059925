//! Warp mesh generation.
//!
//! Each eye gets a fixed 40x40 grid laid over its viewport in the offscreen
//! texture. Every vertex is pushed back through the blue-channel lens model to
//! find where on the physical screen it must be drawn, then forward through
//! the red and green models to get per-channel sample positions.

use bytemuck::{Pod, Zeroable};

use crate::distortion::ChannelDistortion;
use crate::optics::EyeViewport;

pub const ROWS: usize = 40;
pub const COLS: usize = 40;
pub const VERTEX_COUNT: usize = ROWS * COLS;
/// 39 strip rows of 80 indices plus one duplicate at each of the 38 row joins.
pub const INDEX_COUNT: usize = (ROWS - 1) * COLS * 2 + (ROWS - 2);
/// Width of the vignette falloff, tan-angle units on screen.
pub const VIGNETTE_SIZE_TAN_ANGLE: f32 = 0.05;

/// One warp mesh vertex, laid out for direct upload (9 floats, 36 bytes).
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct DistortionVertex {
    /// Normalized device coordinates.
    pub position: [f32; 2],
    pub vignette: f32,
    pub red_uv: [f32; 2],
    pub green_uv: [f32; 2],
    pub blue_uv: [f32; 2],
}

impl DistortionVertex {
    pub const STRIDE: usize = std::mem::size_of::<Self>();
    pub const POSITION_OFFSET: usize = 0;
    pub const VIGNETTE_OFFSET: usize = 2 * 4;
    pub const RED_UV_OFFSET: usize = 3 * 4;
    pub const GREEN_UV_OFFSET: usize = 5 * 4;
    pub const BLUE_UV_OFFSET: usize = 7 * 4;
}

/// Geometry of one eye in tan-angle units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeshGeometry {
    pub screen_width: f32,
    pub screen_height: f32,
    /// Lens center on the physical screen.
    pub x_eye_offset_screen: f32,
    pub y_eye_offset_screen: f32,
    /// Size of the whole packed offscreen texture.
    pub texture_width: f32,
    pub texture_height: f32,
    /// This eye's rectangle inside the texture.
    pub viewport: EyeViewport,
}

/// CPU-side warp mesh for one eye.
#[derive(Debug, Clone)]
pub struct DistortionMesh {
    pub vertices: Vec<DistortionVertex>,
    pub indices: Vec<u16>,
}

impl DistortionMesh {
    pub fn build(
        channels: &ChannelDistortion,
        geometry: &MeshGeometry,
        vignette_enabled: bool,
    ) -> Self {
        Self {
            vertices: build_vertices(channels, geometry, vignette_enabled),
            indices: build_indices(),
        }
    }

    pub fn vertex_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.vertices)
    }

    pub fn index_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.indices)
    }
}

fn build_vertices(
    channels: &ChannelDistortion,
    g: &MeshGeometry,
    vignette_enabled: bool,
) -> Vec<DistortionVertex> {
    let vp = &g.viewport;
    let mut vertices = Vec::with_capacity(VERTEX_COUNT);

    for row in 0..ROWS {
        for col in 0..COLS {
            let u_texture_blue = col as f32 / (COLS - 1) as f32 * (vp.width / g.texture_width)
                + vp.x / g.texture_width;
            let v_texture_blue = row as f32 / (ROWS - 1) as f32 * (vp.height / g.texture_height)
                + vp.y / g.texture_height;

            let x_texture = u_texture_blue * g.texture_width - vp.eye_x;
            let y_texture = v_texture_blue * g.texture_height - vp.eye_y;
            let r_texture = (x_texture * x_texture + y_texture * y_texture).sqrt();

            let texture_to_screen_blue = if r_texture > 0.0 {
                channels.blue.distort_inverse(r_texture) / r_texture
            } else {
                1.0
            };
            let x_screen = x_texture * texture_to_screen_blue;
            let y_screen = y_texture * texture_to_screen_blue;
            let u_screen = (x_screen + g.x_eye_offset_screen) / g.screen_width;
            let v_screen = (y_screen + g.y_eye_offset_screen) / g.screen_height;
            let r_screen = r_texture * texture_to_screen_blue;

            let channel_uv = |factor: f32| {
                [
                    (x_screen * factor + vp.eye_x) / g.texture_width,
                    (y_screen * factor + vp.eye_y) / g.texture_height,
                ]
            };
            let green_factor = if r_screen > 0.0 {
                channels.green.distortion_factor(r_screen)
            } else {
                1.0
            };
            let red_factor = if r_screen > 0.0 {
                channels.red.distortion_factor(r_screen)
            } else {
                1.0
            };

            let vignette = if vignette_enabled {
                let size = VIGNETTE_SIZE_TAN_ANGLE / texture_to_screen_blue;
                let x = x_texture + vp.eye_x;
                let y = y_texture + vp.eye_y;
                let dx = x - clamp(x, vp.x + size, vp.x + vp.width - size);
                let dy = y - clamp(y, vp.y + size, vp.y + vp.height - size);
                let dr = (dx * dx + dy * dy).sqrt();
                1.0 - clamp(dr / size, 0.0, 1.0)
            } else {
                1.0
            };

            vertices.push(DistortionVertex {
                position: [2.0 * u_screen - 1.0, 2.0 * v_screen - 1.0],
                vignette,
                red_uv: channel_uv(red_factor),
                green_uv: channel_uv(green_factor),
                blue_uv: [u_texture_blue, v_texture_blue],
            });
        }
    }
    vertices
}

/// Triangle strip over the grid, snaking left-to-right then right-to-left.
/// Repeating the last index of a row joins rows with degenerate triangles.
fn build_indices() -> Vec<u16> {
    let mut indices = Vec::with_capacity(INDEX_COUNT);
    let mut vertex = 0i32;
    for row in 0..ROWS - 1 {
        if row > 0 {
            if let Some(&last) = indices.last() {
                indices.push(last);
            }
        }
        for col in 0..COLS {
            if col > 0 {
                if row % 2 == 0 {
                    vertex += 1;
                } else {
                    vertex -= 1;
                }
            }
            indices.push(vertex as u16);
            indices.push((vertex + COLS as i32) as u16);
        }
        vertex += COLS as i32;
    }
    indices
}

/// Unlike `f32::clamp`, tolerates `min > max` (vignette wider than viewport).
fn clamp(value: f32, min: f32, max: f32) -> f32 {
    min.max(max.min(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distortion::Distortion;
    use crate::fov::FieldOfView;
    use crate::optics::EyeLayout;
    use approx::assert_abs_diff_eq;

    fn geometry(fov: FieldOfView) -> MeshGeometry {
        eye_geometry(fov, false)
    }

    fn eye_geometry(left_fov: FieldOfView, right_eye: bool) -> MeshGeometry {
        let layout = EyeLayout::new(&left_fov, &left_fov.mirrored());
        let (viewport, x_eye_offset_screen) = if right_eye {
            (layout.right, 2.9 - 0.735)
        } else {
            (layout.left, 0.735)
        };
        MeshGeometry {
            screen_width: 2.9,
            screen_height: 1.6,
            x_eye_offset_screen,
            y_eye_offset_screen: 0.76,
            texture_width: layout.texture_width(),
            texture_height: layout.texture_height(),
            viewport,
        }
    }

    /// Values never rise again once past the first maximum.
    fn assert_single_peak(values: &[f32], what: &str) {
        let peak = values
            .iter()
            .enumerate()
            .fold(0, |best, (i, v)| if *v > values[best] { i } else { best });
        for i in 1..=peak {
            assert!(
                values[i - 1] <= values[i] + 1e-4,
                "{what}: rises away from the peak at {i}: {values:?}"
            );
        }
        for i in peak..values.len() - 1 {
            assert!(
                values[i + 1] <= values[i] + 1e-4,
                "{what}: rises away from the peak at {i}: {values:?}"
            );
        }
    }

    fn default_mesh(vignette: bool) -> DistortionMesh {
        let channels = ChannelDistortion::uniform(&Distortion::default());
        DistortionMesh::build(&channels, &geometry(FieldOfView::default()), vignette)
    }

    #[test]
    fn counts_are_fixed() {
        for fov in [
            FieldOfView::default(),
            FieldOfView::new(10.0, 50.0, 20.0, 35.0),
            FieldOfView::new(60.0, 60.0, 60.0, 60.0),
        ] {
            let channels = ChannelDistortion::uniform(&Distortion::new(vec![0.2, 0.1, 0.05]));
            let mesh = DistortionMesh::build(&channels, &geometry(fov), true);
            assert_eq!(mesh.vertices.len(), 1600);
            assert_eq!(mesh.indices.len(), 3158);
        }
        assert_eq!(INDEX_COUNT, 3158);
        assert_eq!(DistortionVertex::STRIDE, 36);
    }

    #[test]
    fn strip_snakes_between_rows() {
        let indices = build_indices();
        assert_eq!(&indices[..4], &[0, 40, 1, 41]);
        // End of row 0 then the duplicated join index.
        assert_eq!(&indices[78..81], &[39, 79, 79]);
        // Row 1 runs right to left.
        assert_eq!(&indices[81..85], &[79, 119, 78, 118]);
        assert_eq!(indices.iter().copied().max(), Some(1599));
        assert_eq!(*indices.last().unwrap(), 1599);
    }

    #[test]
    fn vignette_disabled_is_exactly_one() {
        let mesh = default_mesh(false);
        assert!(mesh.vertices.iter().all(|v| v.vignette == 1.0));
    }

    #[test]
    fn vignette_falls_off_toward_edges() {
        let channels = ChannelDistortion::uniform(&Distortion::default());
        for fov in [FieldOfView::default(), FieldOfView::new(10.0, 50.0, 20.0, 35.0)] {
            for right_eye in [false, true] {
                let mesh = DistortionMesh::build(&channels, &eye_geometry(fov, right_eye), true);
                let vignette = |row: usize, col: usize| mesh.vertices[row * COLS + col].vignette;

                for row in 0..ROWS {
                    let values: Vec<f32> = (0..COLS).map(|col| vignette(row, col)).collect();
                    assert_single_peak(&values, &format!("{fov:?} right={right_eye} row {row}"));
                    assert_abs_diff_eq!(values[0], 0.0, epsilon = 1e-4);
                    assert_abs_diff_eq!(values[COLS - 1], 0.0, epsilon = 1e-4);
                }
                for col in 0..COLS {
                    let values: Vec<f32> = (0..ROWS).map(|row| vignette(row, col)).collect();
                    assert_single_peak(&values, &format!("{fov:?} right={right_eye} col {col}"));
                    assert_abs_diff_eq!(values[0], 0.0, epsilon = 1e-4);
                    assert_abs_diff_eq!(values[ROWS - 1], 0.0, epsilon = 1e-4);
                }
                assert_eq!(vignette(ROWS / 2, COLS / 2), 1.0);
                assert!(mesh.vertices.iter().all(|v| (0.0..=1.0).contains(&v.vignette)));
            }
        }
    }

    #[test]
    fn blue_uv_spans_the_eye_viewport() {
        let g = geometry(FieldOfView::default());
        let mesh = default_mesh(true);
        let first = mesh.vertices[0].blue_uv;
        let last = mesh.vertices[VERTEX_COUNT - 1].blue_uv;
        assert_abs_diff_eq!(first[0], g.viewport.x / g.texture_width, epsilon = 1e-6);
        assert_abs_diff_eq!(first[1], 0.0, epsilon = 1e-6);
        assert_abs_diff_eq!(
            last[0],
            (g.viewport.x + g.viewport.width) / g.texture_width,
            epsilon = 1e-5
        );
        assert_abs_diff_eq!(last[1], 1.0, epsilon = 1e-5);
    }

    #[test]
    fn uniform_channels_sample_the_same_point() {
        let mesh = default_mesh(false);
        for v in &mesh.vertices {
            assert_abs_diff_eq!(v.red_uv[0], v.blue_uv[0], epsilon = 1e-3);
            assert_abs_diff_eq!(v.red_uv[1], v.blue_uv[1], epsilon = 1e-3);
            assert_eq!(v.red_uv, v.green_uv);
        }
    }

    #[test]
    fn stronger_red_lens_samples_further_out() {
        let base = Distortion::default();
        let channels = ChannelDistortion {
            red: Distortion::new(vec![0.5, 0.2]),
            green: base.clone(),
            blue: base,
        };
        let g = geometry(FieldOfView::default());
        let mesh = DistortionMesh::build(&channels, &g, false);
        let corner = mesh.vertices[0];
        let eye_u = g.viewport.eye_x / g.texture_width;
        assert!((corner.red_uv[0] - eye_u).abs() > (corner.green_uv[0] - eye_u).abs());
    }

    #[test]
    fn lens_center_maps_to_itself() {
        // Zero radius skips the lens model entirely.
        let mut g = geometry(FieldOfView::default());
        g.viewport.eye_x = g.viewport.x;
        g.viewport.eye_y = 0.0;
        let channels = ChannelDistortion::uniform(&Distortion::default());
        let v = DistortionMesh::build(&channels, &g, false).vertices[0];
        let expected_x = 2.0 * g.x_eye_offset_screen / g.screen_width - 1.0;
        let expected_y = 2.0 * g.y_eye_offset_screen / g.screen_height - 1.0;
        assert_abs_diff_eq!(v.position[0], expected_x, epsilon = 1e-6);
        assert_abs_diff_eq!(v.position[1], expected_y, epsilon = 1e-6);
        assert_eq!(v.red_uv, v.blue_uv);
    }
}
