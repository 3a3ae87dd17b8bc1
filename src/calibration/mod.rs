//! Reprojection of a chessboard-style calibration rig.
//!
//! A rig is `Ncameras` cameras sharing one lens model, observing a planar
//! board of `n x n` dots over `Nframes` frames. Frames place the board in the
//! coordinate system of camera 0; extrinsics place camera 0 points into every
//! other camera. Projecting the whole rig yields a tensor shaped
//! `(Nframes, Ncameras, n, n, 2)` which is then compared against the
//! observations.

use crate::camera::{CameraModelError, DistortionModel};
use crate::geometry::{reference_calibration_object, RigidTransform};
use crate::projection;
use crate::tensor::PointsTensor;
use log::{debug, info};
use nalgebra::Vector3;
use ndarray::Axis;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Projects the reference board into every camera of every frame.
///
/// * `intrinsics` - shaped `(Ncameras, Nintrinsics)`, or `(Nintrinsics)` for one camera.
/// * `extrinsics` - `Ncameras - 1` transforms from camera 0 to cameras `1..`.
/// * `frames` - board poses, transforms from the board to camera 0.
///
/// # Errors
///
/// [`CameraModelError::ShapeMismatch`] if the camera counts disagree, plus
/// anything [`projection::project`] reports.
pub fn project_calibration_rig(
    model: DistortionModel,
    intrinsics: &PointsTensor,
    extrinsics: &[RigidTransform],
    frames: &[RigidTransform],
    dot_spacing: f64,
    n: usize,
) -> Result<PointsTensor, CameraModelError> {
    let n_cameras = intrinsics.num_points();
    if intrinsics.ndim() > 2 || n_cameras != extrinsics.len() + 1 {
        return Err(CameraModelError::ShapeMismatch(format!(
            "intrinsics shaped {:?} do not describe {} cameras",
            intrinsics.shape(),
            extrinsics.len() + 1
        )));
    }

    let object = reference_calibration_object(n, dot_spacing)?;
    let mut points: Vec<Vector3<f64>> = Vec::with_capacity(frames.len() * n_cameras * n * n);
    for frame in frames {
        let poses = std::iter::once(*frame).chain(extrinsics.iter().map(|e| e.compose(frame)));
        for pose in poses {
            points.extend(object.iter_points3().map(|p| pose.transform_point(&p)));
        }
    }
    let points = PointsTensor::from_points3(&[frames.len(), n_cameras, n, n], &points)?;

    // (C, Nintrinsics) broadcasts along the camera axis of the rig.
    let projected = projection::project(&points, model, intrinsics, false)?.points;
    debug!(
        "projected calibration rig: {} frames, {} cameras, {}x{} board",
        frames.len(),
        n_cameras,
        n,
        n
    );
    Ok(projected)
}

/// Per-point reprojection errors, with and without the flagged outliers.
///
/// Both tensors are shaped `(Nobservations, n, n, 2)`.
#[derive(Debug, Clone, PartialEq)]
pub struct ReprojectionErrors {
    pub all_points: PointsTensor,
    pub ignoring_outliers: PointsTensor,
    outliers: Vec<usize>,
}

impl ReprojectionErrors {
    pub fn outlier_indices(&self) -> &[usize] {
        &self.outliers
    }

    /// Statistics of the per-point error norms.
    ///
    /// With `ignore_outliers`, flagged points are left out entirely rather than
    /// counted as zero.
    pub fn stats(&self, ignore_outliers: bool) -> Result<ReprojectionStats, CameraModelError> {
        let skip: HashSet<usize> = if ignore_outliers {
            self.outliers.iter().copied().collect()
        } else {
            HashSet::new()
        };
        let norms: Vec<f64> = self
            .all_points
            .iter_points2()
            .enumerate()
            .filter(|(i, _)| !skip.contains(i))
            .map(|(_, e)| e.norm())
            .collect();
        ReprojectionStats::from_norms(&norms)
    }
}

/// Compares projected rig points against observations.
///
/// * `projected` - `(Nframes, Ncameras, n, n, 2)` from [`project_calibration_rig`].
/// * `observations` - `(Nobservations, n, n, 2)`.
/// * `indices_frame_camera` - the `(frame, camera)` of every observation.
/// * `outlier_indices` - flattened point indices into `observations`, one per point.
///
/// The error is `projected - observed`. In the `ignoring_outliers` copy both
/// coordinates of every flagged point are zero.
pub fn compute_reprojection_error(
    projected: &PointsTensor,
    observations: &PointsTensor,
    indices_frame_camera: &[(usize, usize)],
    outlier_indices: &[usize],
) -> Result<ReprojectionErrors, CameraModelError> {
    let (n_frames, n_cameras, board) = match projected.shape() {
        [f, c, rows, cols, 2] => (*f, *c, [*rows, *cols]),
        other => {
            return Err(CameraModelError::ShapeMismatch(format!(
                "projected points must be (Nframes, Ncameras, n, n, 2), got {other:?}"
            )))
        }
    };
    let n_observations = indices_frame_camera.len();
    if observations.shape() != [n_observations, board[0], board[1], 2] {
        return Err(CameraModelError::ShapeMismatch(format!(
            "observations shaped {:?} do not match {} observations of a {:?} board",
            observations.shape(),
            n_observations,
            board
        )));
    }

    let projected = projected.view();
    let observed = observations.view();
    let mut all_points = PointsTensor::zeros(observations.shape().to_vec())?;
    {
        let mut errors = all_points.view_mut();
        for (observation, &(frame, camera)) in indices_frame_camera.iter().enumerate() {
            if frame >= n_frames || camera >= n_cameras {
                return Err(CameraModelError::ShapeMismatch(format!(
                    "observation {observation} refers to frame {frame}, camera {camera} outside ({n_frames}, {n_cameras})"
                )));
            }
            let predicted = projected
                .index_axis(Axis(0), frame)
                .index_axis_move(Axis(0), camera);
            errors
                .index_axis_mut(Axis(0), observation)
                .assign(&(&predicted - &observed.index_axis(Axis(0), observation)));
        }
    }

    let n_points = all_points.num_points();
    let mut ignoring_outliers = all_points.clone();
    {
        let mut rows = ignoring_outliers
            .view_mut()
            .into_shape_with_order((n_points, 2))
            .map_err(|e| CameraModelError::ShapeMismatch(e.to_string()))?;
        for &index in outlier_indices {
            if index >= n_points {
                return Err(CameraModelError::ShapeMismatch(format!(
                    "outlier index {index} out of range for {n_points} points"
                )));
            }
            rows.row_mut(index).fill(0.0);
        }
    }

    if !outlier_indices.is_empty() {
        info!(
            "masked {} of {} points as outliers",
            outlier_indices.len(),
            n_points
        );
    }
    Ok(ReprojectionErrors {
        all_points,
        ignoring_outliers,
        outliers: outlier_indices.to_vec(),
    })
}

#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct ReprojectionStats {
    pub rmse: f64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub stddev: f64,
    pub median: f64,
}

impl fmt::Debug for ReprojectionStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Reprojection Error [ rmse: {}, min: {}, max: {}, mean: {}, stddev: {}, median: {} ]",
            self.rmse, self.min, self.max, self.mean, self.stddev, self.median
        )
    }
}

impl ReprojectionStats {
    pub fn from_norms(errors: &[f64]) -> Result<Self, CameraModelError> {
        if errors.is_empty() {
            return Err(CameraModelError::InvalidParams(
                "no reprojection errors to summarize".to_string(),
            ));
        }

        let n = errors.len() as f64;
        let mean = errors.iter().sum::<f64>() / n;

        let variance: f64 = errors.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n;
        let stddev = variance.sqrt();

        let sum_squared: f64 = errors.iter().map(|x| x.powi(2)).sum::<f64>();
        let rmse = (sum_squared / n).sqrt();

        let min = errors.iter().fold(f64::INFINITY, |a, &b| a.min(b));
        let max = errors.iter().fold(f64::NEG_INFINITY, |a, &b| a.max(b));

        let mut sorted_errors = errors.to_vec();
        sorted_errors.sort_by(f64::total_cmp);
        let median = if sorted_errors.len() % 2 == 0 {
            let mid = sorted_errors.len() / 2;
            (sorted_errors[mid - 1] + sorted_errors[mid]) / 2.0
        } else {
            sorted_errors[sorted_errors.len() / 2]
        };

        Ok(ReprojectionStats {
            rmse,
            min,
            max,
            mean,
            stddev,
            median,
        })
    }
}
