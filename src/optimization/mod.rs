//! The `optimization` module inverts the forward distortion of any model.
//!
//! Undistortion has no closed form for most lens models, so it is recovered
//! numerically from the forward map: for an observed pixel `q` we look for the
//! pinhole pixel `p` minimizing `|distort(p) - q|^2`, starting from `p = q`.
//!
//! Every point is solved as its own two-parameter `tiny_solver` problem. The
//! Jacobian of a point cloud is block diagonal, so one coupled problem would
//! only add a large sparse linear solve per iteration; the per-point loop stays
//! linear in the number of points and keeps failures local to one point.
//!
//! This is markedly slower than any closed-form inverse, but it works
//! uniformly for every entry of the [`DistortionModel`] registry.

use crate::camera::{CameraModelError, DistortionModel};
use crate::config::UndistortOptions;
use crate::tensor::PointsTensor;

use log::{debug, trace};
use nalgebra::{DVector, RealField, Vector2};
use std::collections::HashMap;
use tiny_solver::factors::Factor;
use tiny_solver::{LevenbergMarquardtOptimizer, Optimizer as TinySolverOptimizer, OptimizerOptions};

/// Residual returned when the forward map fails (e.g. CAHVORE out of bounds).
const FAILED_RESIDUAL: f64 = 1e6;

/// Cost function for the `tiny_solver` undistortion of a single pixel.
///
/// The residual is `distort(p) - observed`, two values for the two pixel
/// coordinates of the parameter block `p`.
#[derive(Debug, Clone)]
struct UndistortCost {
    model: DistortionModel,
    intrinsics: Vec<f64>,
    observed: Vector2<f64>,
}

impl<T: RealField> Factor<T> for UndistortCost {
    fn residual_func(&self, params: &[DVector<T>]) -> DVector<T> {
        let p = &params[0];
        let point = Vector2::new(p[0].clone(), p[1].clone());
        let intrinsics: Vec<T> = self
            .intrinsics
            .iter()
            .map(|&v| nalgebra::convert(v))
            .collect();

        match self.model.distort(&point, &intrinsics) {
            Ok(distorted) => {
                let u: T = nalgebra::convert(self.observed.x);
                let v: T = nalgebra::convert(self.observed.y);
                DVector::from_vec(vec![distorted.x.clone() - u, distorted.y.clone() - v])
            }
            Err(_) => {
                // Large residuals steer the solver back from invalid regions.
                let big: T = nalgebra::convert(FAILED_RESIDUAL);
                DVector::from_vec(vec![big.clone(), big])
            }
        }
    }
}

/// Model-agnostic inverse of [`DistortionModel::distort`].
#[derive(Debug, Clone)]
pub struct GenericInverseSolver {
    model: DistortionModel,
    intrinsics: Vec<f64>,
    options: UndistortOptions,
}

impl GenericInverseSolver {
    /// # Errors
    ///
    /// [`CameraModelError::ParameterCountMismatch`] if `intrinsics` does not fit `model`.
    pub fn new(
        model: DistortionModel,
        intrinsics: &[f64],
        options: UndistortOptions,
    ) -> Result<Self, CameraModelError> {
        model.check_intrinsic_count(intrinsics.len())?;
        Ok(GenericInverseSolver {
            model,
            intrinsics: intrinsics.to_vec(),
            options,
        })
    }

    fn optimizer_options(&self) -> OptimizerOptions {
        OptimizerOptions {
            max_iteration: self.options.max_iterations,
            verbosity_level: 0,
            min_abs_error_decrease_threshold: self.options.min_abs_decrease,
            min_rel_error_decrease_threshold: self.options.min_rel_decrease,
            ..OptimizerOptions::default()
        }
    }

    /// Recovers the pinhole pixel whose distortion is `observed`.
    ///
    /// `index` only labels the point in errors and logs.
    ///
    /// # Errors
    ///
    /// [`CameraModelError::UndistortDidNotConverge`] if the solver gives up or the
    /// final residual exceeds [`UndistortOptions::tolerance_px`].
    pub fn undistort_point(
        &self,
        observed: &Vector2<f64>,
        index: usize,
    ) -> Result<Vector2<f64>, CameraModelError> {
        if self.model == DistortionModel::None {
            return Ok(*observed);
        }

        let mut problem = tiny_solver::Problem::new();
        let cost_function = UndistortCost {
            model: self.model,
            intrinsics: self.intrinsics.clone(),
            observed: *observed,
        };
        problem.add_residual_block(2, &["p"], Box::new(cost_function), None);

        let mut initial_values = HashMap::new();
        initial_values.insert(
            "p".to_string(),
            DVector::from_vec(vec![observed.x, observed.y]),
        );

        let optimizer = LevenbergMarquardtOptimizer::default();
        let result = optimizer
            .optimize(&problem, &initial_values, Some(self.optimizer_options()))
            .ok_or(CameraModelError::UndistortDidNotConverge {
                index,
                residual: f64::NAN,
            })?;
        let solution = result
            .get("p")
            .filter(|p| p.len() == 2)
            .map(|p| Vector2::new(p[0], p[1]))
            .ok_or(CameraModelError::UndistortDidNotConverge {
                index,
                residual: f64::NAN,
            })?;

        let residual = match self.model.distort(&solution, &self.intrinsics) {
            Ok(distorted) => (distorted - observed).norm(),
            Err(_) => f64::INFINITY,
        };
        trace!("undistort point {index}: {observed:?} -> {solution:?}, residual {residual:e}");

        if !(residual <= self.options.tolerance_px) {
            debug!("undistort point {index} failed with residual {residual}");
            return Err(CameraModelError::UndistortDidNotConverge { index, residual });
        }
        Ok(solution)
    }

    /// Undistorts every pixel of a `[..., 2]` tensor, one independent solve per point.
    pub fn undistort(&self, points: &PointsTensor) -> Result<PointsTensor, CameraModelError> {
        if points.point_dim() != 2 {
            return Err(CameraModelError::ShapeMismatch(format!(
                "undistort expects a [..., 2] tensor, got {:?}",
                points.shape()
            )));
        }
        if self.model == DistortionModel::None || points.is_empty() {
            return Ok(points.clone());
        }

        let undistorted = points
            .iter_points2()
            .enumerate()
            .map(|(index, p)| self.undistort_point(&p, index))
            .collect::<Result<Vec<_>, _>>()?;
        debug!(
            "undistorted {} points with the {} model",
            undistorted.len(),
            self.model
        );
        PointsTensor::from_points2(points.leading_shape(), &undistorted)
    }
}
