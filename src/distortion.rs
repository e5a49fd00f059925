//! Radial lens distortion model.
//!
//! Radii are in tan-angle units (distance on the screen divided by the
//! screen-to-lens distance). The forward model maps an undistorted radius to
//! where the lens makes it appear; the inverse is solved numerically.

use log::warn;
use serde::{Deserialize, Serialize};

use crate::error::{VrError, VrResult};

/// Coefficients of the stock viewer lens.
pub const DEFAULT_COEFFICIENTS: [f32; 2] = [0.441, 0.156];

/// Secant iteration stops once successive estimates are this close.
const INVERSE_TOLERANCE: f32 = 1.0e-4;

/// Upper bound on secant steps before falling back.
const INVERSE_MAX_ITERATIONS: usize = 100;

const FIT_SAMPLES: usize = 10;
const FIT_COEFFICIENTS: usize = 2;

/// Polynomial radial distortion `r' = r * (1 + k1 r^2 + k2 r^4 + ...)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Distortion {
    coefficients: Vec<f32>,
}

impl Default for Distortion {
    fn default() -> Self {
        Self::new(DEFAULT_COEFFICIENTS.to_vec())
    }
}

impl Distortion {
    pub fn new(coefficients: Vec<f32>) -> Self {
        Self { coefficients }
    }

    pub fn coefficients(&self) -> &[f32] {
        &self.coefficients
    }

    /// `1 + sum(k_i * r^(2i))`.
    pub fn distortion_factor(&self, radius: f32) -> f32 {
        let r_squared = radius * radius;
        let mut r_factor = 1.0;
        let mut result = 1.0;
        for k in &self.coefficients {
            r_factor *= r_squared;
            result += k * r_factor;
        }
        result
    }

    pub fn distort(&self, radius: f32) -> f32 {
        radius * self.distortion_factor(radius)
    }

    /// Finds `r` such that `distort(r) == radius` by secant iteration.
    ///
    /// The iteration is seeded at `radius / 0.9` and `radius * 0.9`. It gives
    /// up after a fixed number of steps, or when the secant slope vanishes.
    /// It then returns the last finite estimate, or `radius` itself when the
    /// iteration produced nothing usable.
    pub fn distort_inverse(&self, radius: f32) -> f32 {
        let mut r0 = radius / 0.9;
        let mut r = radius * 0.9;
        let mut dr0 = radius - self.distort(r0);

        for _ in 0..INVERSE_MAX_ITERATIONS {
            if (r - r0).abs() <= INVERSE_TOLERANCE {
                return r;
            }
            let dr = radius - self.distort(r);
            let slope = dr - dr0;
            if slope == 0.0 {
                break;
            }
            let next = r - dr * ((r - r0) / slope);
            if !next.is_finite() {
                break;
            }
            r0 = r;
            r = next;
            dr0 = dr;
        }

        if (r - r0).abs() <= INVERSE_TOLERANCE {
            return r;
        }
        warn!(
            "distort_inverse({}) did not converge with coefficients {:?}",
            radius, self.coefficients
        );
        if r.is_finite() {
            r
        } else {
            radius
        }
    }

    /// Fits a two-coefficient forward polynomial that approximates the
    /// inverse of this distortion over `[0, max_radius]`.
    pub fn approximate_inverse(&self, max_radius: f32) -> VrResult<Distortion> {
        let mut mat_a = vec![vec![0.0f64; FIT_COEFFICIENTS]; FIT_SAMPLES];
        let mut vec_y = vec![0.0f64; FIT_SAMPLES];

        for (i, (row, y)) in mat_a.iter_mut().zip(vec_y.iter_mut()).enumerate() {
            let r = max_radius * (i + 1) as f32 / FIT_SAMPLES as f32;
            let rp = self.distort(r) as f64;
            let mut v = rp;
            for cell in row.iter_mut() {
                v *= rp * rp;
                *cell = v;
            }
            *y = r as f64 - rp;
        }

        let vec_k = solve_least_squares(&mat_a, &vec_y)?;
        Ok(Distortion::new(vec_k.into_iter().map(|k| k as f32).collect()))
    }
}

/// Solves `A x = y` in the least-squares sense via `(A^T A)^-1 A^T y`.
///
/// Only the 2×2 normal matrix has a closed-form inverse here.
fn solve_least_squares(mat_a: &[Vec<f64>], vec_y: &[f64]) -> VrResult<Vec<f64>> {
    let num_coefficients = mat_a.first().map_or(0, Vec::len);
    if num_coefficients != 2 {
        return Err(VrError::UnsupportedCoefficientCount(num_coefficients));
    }

    let mut ata = [[0.0f64; 2]; 2];
    for (j, ata_row) in ata.iter_mut().enumerate() {
        for (k, cell) in ata_row.iter_mut().enumerate() {
            *cell = mat_a.iter().map(|row| row[j] * row[k]).sum();
        }
    }

    let det = ata[0][0] * ata[1][1] - ata[0][1] * ata[1][0];
    if det == 0.0 || !det.is_finite() {
        return Err(VrError::SingularFit);
    }
    let inv = [
        [ata[1][1] / det, -ata[0][1] / det],
        [-ata[1][0] / det, ata[0][0] / det],
    ];

    let mut aty = [0.0f64; 2];
    for (l, cell) in aty.iter_mut().enumerate() {
        *cell = mat_a.iter().zip(vec_y).map(|(row, y)| row[l] * y).sum();
    }

    Ok((0..2)
        .map(|j| (0..2).map(|i| inv[i][j] * aty[i]).sum())
        .collect())
}

/// One distortion per color channel, used for chromatic aberration correction.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelDistortion {
    pub red: Distortion,
    pub green: Distortion,
    pub blue: Distortion,
}

impl ChannelDistortion {
    /// Same lens model for every channel.
    pub fn uniform(distortion: &Distortion) -> Self {
        Self {
            red: distortion.clone(),
            green: distortion.clone(),
            blue: distortion.clone(),
        }
    }
}
