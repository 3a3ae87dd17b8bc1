//! Pixel grids, distortion fields and rigid poses.

use crate::camera::{CameraIntrinsics, CameraModelError};
use crate::projection;
use crate::tensor::PointsTensor;
use log::debug;
use nalgebra::{Isometry3, Rotation3, Translation3, UnitQuaternion, Vector2, Vector3};

/// Grid of pinhole pixels and where the lens moves them.
///
/// Both tensors are shaped `(Nwidth, Nheight, 2)`: entry `[i, j]` is the
/// pixel `(xs[i], ys[j])` and its distorted position.
#[derive(Debug, Clone, PartialEq)]
pub struct DistortionField {
    pub grid: PointsTensor,
    pub distorted: PointsTensor,
}

impl DistortionField {
    pub fn width(&self) -> usize {
        self.grid.shape()[0]
    }

    pub fn height(&self) -> usize {
        self.grid.shape()[1]
    }

    /// Largest pixel displacement across the field.
    pub fn max_displacement(&self) -> f64 {
        self.grid
            .iter_points2()
            .zip(self.distorted.iter_points2())
            .map(|(g, d)| (d - g).norm())
            .fold(0.0, f64::max)
    }
}

/// Evaluates the forward distortion of one camera over regular pixel grids.
#[derive(Debug, Clone)]
pub struct DistortionFieldSampler {
    intrinsics: CameraIntrinsics,
}

impl DistortionFieldSampler {
    pub fn new(intrinsics: CameraIntrinsics) -> Result<Self, CameraModelError> {
        intrinsics.validate_params()?;
        Ok(DistortionFieldSampler { intrinsics })
    }

    /// Samples every integer pixel of a `width x height` image.
    pub fn sample(&self, width: u32, height: u32) -> Result<DistortionField, CameraModelError> {
        let xs: Vec<f64> = (0..width).map(f64::from).collect();
        let ys: Vec<f64> = (0..height).map(f64::from).collect();
        self.sample_with_positions(&xs, &ys)
    }

    /// Samples the pixels `(x, y)` for every `x` in `xs` and `y` in `ys`.
    pub fn sample_with_positions(
        &self,
        xs: &[f64],
        ys: &[f64],
    ) -> Result<DistortionField, CameraModelError> {
        let pixels: Vec<Vector2<f64>> = xs
            .iter()
            .flat_map(|&x| ys.iter().map(move |&y| Vector2::new(x, y)))
            .collect();
        let grid = PointsTensor::from_points2(&[xs.len(), ys.len()], &pixels)?;
        let distorted = projection::distort(&grid, &self.intrinsics)?;
        debug!(
            "sampled {} distortion field on a {}x{} grid",
            self.intrinsics.model,
            xs.len(),
            ys.len()
        );
        Ok(DistortionField { grid, distorted })
    }
}

/// A rigid transform stored as a Rodrigues rotation vector and a translation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RigidTransform {
    pub rotation: Vector3<f64>,
    pub translation: Vector3<f64>,
}

impl RigidTransform {
    pub fn new(rotation: Vector3<f64>, translation: Vector3<f64>) -> Self {
        RigidTransform {
            rotation,
            translation,
        }
    }

    pub fn identity() -> Self {
        RigidTransform::new(Vector3::zeros(), Vector3::zeros())
    }

    pub fn rotation_matrix(&self) -> Rotation3<f64> {
        Rotation3::new(self.rotation)
    }

    pub fn to_isometry(&self) -> Isometry3<f64> {
        Isometry3::from_parts(
            Translation3::from(self.translation),
            UnitQuaternion::from_scaled_axis(self.rotation),
        )
    }

    /// `R p + t`.
    pub fn transform_point(&self, point: &Vector3<f64>) -> Vector3<f64> {
        self.rotation_matrix() * point + self.translation
    }

    /// `self` applied after `first`.
    pub fn compose(&self, first: &RigidTransform) -> RigidTransform {
        let isometry = self.to_isometry() * first.to_isometry();
        RigidTransform::new(
            isometry.rotation.scaled_axis(),
            isometry.translation.vector,
        )
    }
}

impl Default for RigidTransform {
    fn default() -> Self {
        RigidTransform::identity()
    }
}

/// Reference calibration board of `n x n` dots, shaped `(n, n, 3)`.
///
/// Dot `(i, j)` sits at `(j * spacing, i * spacing, 0)`.
pub fn reference_calibration_object(n: usize, spacing: f64) -> Result<PointsTensor, CameraModelError> {
    let points: Vec<Vector3<f64>> = (0..n)
        .flat_map(|i| (0..n).map(move |j| Vector3::new(j as f64 * spacing, i as f64 * spacing, 0.0)))
        .collect();
    PointsTensor::from_points3(&[n, n], &points)
}

/// Generate a grid of sample points that are evenly distributed across the image
///
/// # Arguments
///
/// * `width` - The width of the image in pixels
/// * `height` - The height of the image in pixels
/// * `n` - The approximate number of points to generate
pub fn sample_points(width: f64, height: f64, n: usize) -> Vec<Vector2<f64>> {
    let num_cells_x = (n as f64 * (width / height)).sqrt().round().max(1.0) as usize;
    let num_cells_y = (n as f64 * (height / width)).sqrt().round().max(1.0) as usize;

    let cell_width = width / num_cells_x as f64;
    let cell_height = height / num_cells_y as f64;

    (0..num_cells_y)
        .flat_map(|i| {
            (0..num_cells_x).map(move |j| {
                Vector2::new((j as f64 + 0.5) * cell_width, (i as f64 + 0.5) * cell_height)
            })
        })
        .collect()
}
