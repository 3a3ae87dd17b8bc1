//! Forward projection (3D to pixels) and unprojection (pixels to unit rays).
//!
//! [`project`] accepts a points tensor `[..., 3]` and an intrinsics tensor
//! `[..., Nintrinsics]`. The intrinsics may carry at most one non-singleton
//! leading axis, one set of intrinsics per camera. That axis is matched to a
//! points axis, the points are projected one camera at a time and the results
//! are reassembled in the input axis order.
//!
//! Intrinsics `(C, Nintrinsics)` against a rig tensor `(..., Nframes, C, n, n, 3)`
//! use the camera axis (`-4`). Otherwise the shapes are aligned from the right
//! as in numpy, and if that axis has the wrong extent the only points axis of
//! extent `C` is used.

pub mod native;

use crate::camera::{
    cahvore, validation, CameraIntrinsics, CameraModelError, DistortionModel, Intrinsics,
    PinholeCore,
};
use crate::config::UndistortOptions;
use crate::optimization::GenericInverseSolver;
use crate::tensor::PointsTensor;
use log::debug;
use nalgebra::{Vector2, Vector3};

/// Leading axes of a rig tensor: `(Nframes, Ncameras, n, n)`.
const RIG_LEADING_AXES: usize = 4;

/// `dPixel/dIntrinsics` shaped `[..., 2, Nintrinsics]` and `dPixel/dPoint` shaped `[..., 2, 3]`.
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectionGradients {
    pub d_intrinsics: PointsTensor,
    pub d_points: PointsTensor,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Projection {
    /// Pixels shaped `[..., 2]`.
    pub points: PointsTensor,
    pub gradients: Option<ProjectionGradients>,
}

impl Projection {
    fn stack(parts: Vec<Projection>, axis: usize) -> Result<Projection, CameraModelError> {
        let mut pixels = Vec::with_capacity(parts.len());
        let mut d_intrinsics = Vec::with_capacity(parts.len());
        let mut d_points = Vec::with_capacity(parts.len());
        for part in parts {
            pixels.push(part.points);
            if let Some(g) = part.gradients {
                d_intrinsics.push(g.d_intrinsics);
                d_points.push(g.d_points);
            }
        }
        let points = PointsTensor::stack(&pixels)?.move_axis(0, axis)?;
        let gradients = if d_intrinsics.is_empty() {
            None
        } else {
            Some(ProjectionGradients {
                d_intrinsics: PointsTensor::stack(&d_intrinsics)?.move_axis(0, axis)?,
                d_points: PointsTensor::stack(&d_points)?.move_axis(0, axis)?,
            })
        };
        Ok(Projection { points, gradients })
    }

    fn empty(leading: &[usize], n_intrinsics: usize, want_gradients: bool) -> Result<Projection, CameraModelError> {
        let shaped = |tail: &[usize]| leading.iter().chain(tail).copied().collect::<Vec<_>>();
        let gradients = if want_gradients {
            Some(ProjectionGradients {
                d_intrinsics: PointsTensor::zeros(shaped(&[2, n_intrinsics]))?,
                d_points: PointsTensor::zeros(shaped(&[2, 3]))?,
            })
        } else {
            None
        };
        Ok(Projection {
            points: PointsTensor::zeros(shaped(&[2]))?,
            gradients,
        })
    }
}

/// Projects camera-frame points to distorted pixels.
///
/// # Arguments
///
/// * `points` - Points shaped `[..., 3]`.
/// * `model` - Lens model shared by every camera.
/// * `intrinsics` - `[..., Nintrinsics]` with at most one non-singleton leading axis.
/// * `want_gradients` - Also return `dPixel/dIntrinsics` and `dPixel/dPoint`.
///
/// # Returns
///
/// Pixels shaped `[..., 2]` and, when requested, the gradients.
///
/// # Errors
///
/// * [`CameraModelError::ParameterCountMismatch`] if the trailing intrinsics axis does not fit `model`.
/// * [`CameraModelError::GradientsUnsupported`] for CAHVORE with `want_gradients`.
/// * [`CameraModelError::UnsupportedBroadcast`] if the intrinsics have more than one non-singleton leading axis.
/// * [`CameraModelError::ShapeMismatch`] if no points axis matches that axis.
/// * The CAHVORE angle errors, per point.
pub fn project(
    points: &PointsTensor,
    model: DistortionModel,
    intrinsics: &PointsTensor,
    want_gradients: bool,
) -> Result<Projection, CameraModelError> {
    if points.point_dim() != 3 {
        return Err(CameraModelError::ShapeMismatch(format!(
            "project expects points shaped [..., 3], got {:?}",
            points.shape()
        )));
    }
    let n_intrinsics = intrinsics.point_dim();
    model.check_intrinsic_count(n_intrinsics)?;

    if points.is_empty() {
        return Projection::empty(points.leading_shape(), n_intrinsics, want_gradients);
    }

    if model == DistortionModel::Cahvore && want_gradients {
        return Err(CameraModelError::GradientsUnsupported(model));
    }

    let Some((points_axis, n_cameras)) = broadcast_axis(points, intrinsics)? else {
        return project_one_camera(points, model, intrinsics.as_slice(), want_gradients);
    };
    debug!("projecting {n_cameras} cameras along points axis {points_axis}");

    let split = points.move_axis(points_axis, 0)?;
    // Every other leading axis of the intrinsics is 1, so camera `c` is point `c`.
    let parts = (0..n_cameras)
        .map(|c| project_one_camera(&split.index_axis0(c)?, model, intrinsics.point(c), want_gradients))
        .collect::<Result<Vec<_>, _>>()?;
    Projection::stack(parts, points_axis)
}

/// Finds the points axis that the intrinsics broadcast along, with its extent.
///
/// `None` when the intrinsics hold a single camera.
fn broadcast_axis(
    points: &PointsTensor,
    intrinsics: &PointsTensor,
) -> Result<Option<(usize, usize)>, CameraModelError> {
    let intrinsics_leading = intrinsics.leading_shape();
    let non_singleton: Vec<usize> = intrinsics_leading
        .iter()
        .enumerate()
        .filter(|(_, &extent)| extent != 1)
        .map(|(axis, _)| axis)
        .collect();

    let axis = match non_singleton.as_slice() {
        [] => return Ok(None),
        [axis] => *axis,
        _ => {
            return Err(CameraModelError::UnsupportedBroadcast(format!(
                "intrinsics shaped {:?} broadcast along more than one axis",
                intrinsics.shape()
            )))
        }
    };

    let n_cameras = intrinsics_leading[axis];
    let points_leading = points.leading_shape();
    let has_extent = |a: &usize| points_leading[*a] == n_cameras;

    let rig_axis = (intrinsics_leading.len() == 1 && points_leading.len() >= RIG_LEADING_AXES)
        .then(|| points_leading.len() + 1 - RIG_LEADING_AXES)
        .filter(has_extent);
    let aligned = points_leading
        .len()
        .checked_sub(intrinsics_leading.len() - axis)
        .filter(has_extent);
    let only_match = || {
        let mut matches = (0..points_leading.len()).filter(has_extent);
        match (matches.next(), matches.next()) {
            (Some(a), None) => Some(a),
            _ => None,
        }
    };

    let points_axis = rig_axis.or(aligned).or_else(only_match).ok_or_else(|| {
        CameraModelError::ShapeMismatch(format!(
            "points shaped {:?} do not match intrinsics shaped {:?}",
            points.shape(),
            intrinsics.shape()
        ))
    })?;
    Ok(Some((points_axis, n_cameras)))
}

fn project_one_camera(
    points: &PointsTensor,
    model: DistortionModel,
    intrinsics: &[f64],
    want_gradients: bool,
) -> Result<Projection, CameraModelError> {
    let core = PinholeCore::from_slice(intrinsics, model)?;
    validation::validate_intrinsics(&Intrinsics {
        fx: core.fx,
        fy: core.fy,
        cx: core.cx,
        cy: core.cy,
    })?;

    if model == DistortionModel::Cahvore {
        let pixels = points
            .iter_points3()
            .map(|p| cahvore::distort(&core.project(&p), intrinsics))
            .collect::<Result<Vec<_>, _>>()?;
        return Ok(Projection {
            points: PointsTensor::from_points2(points.leading_shape(), &pixels)?,
            gradients: None,
        });
    }

    let out = native::project(points, model, intrinsics, want_gradients)?;
    let gradients = match (out.d_intrinsics, out.d_points) {
        (Some(d_intrinsics), Some(d_points)) => Some(ProjectionGradients {
            d_intrinsics,
            d_points,
        }),
        _ => None,
    };
    Ok(Projection {
        points: out.pixels,
        gradients,
    })
}

/// Projects a single point with one camera.
pub fn project_point(
    point: &Vector3<f64>,
    intrinsics: &CameraIntrinsics,
) -> Result<Vector2<f64>, CameraModelError> {
    let points = PointsTensor::from_points3(&[], &[*point])?;
    let projection = project(&points, intrinsics.model, &single_camera(intrinsics)?, false)?;
    Ok(projection.points.point2(0))
}

fn single_camera(intrinsics: &CameraIntrinsics) -> Result<PointsTensor, CameraModelError> {
    PointsTensor::new(vec![intrinsics.parameters.len()], intrinsics.parameters.clone())
}

/// Applies the lens distortion to pinhole pixels `[..., 2]`.
///
/// Polynomial models are evaluated as one batch; CAHVOR and CAHVORE point by point.
pub fn distort(
    points: &PointsTensor,
    intrinsics: &CameraIntrinsics,
) -> Result<PointsTensor, CameraModelError> {
    intrinsics.validate_params()?;
    if points.point_dim() != 2 {
        return Err(CameraModelError::ShapeMismatch(format!(
            "distort expects pixels shaped [..., 2], got {:?}",
            points.shape()
        )));
    }
    if points.is_empty() || intrinsics.model == DistortionModel::None {
        return Ok(points.clone());
    }
    if intrinsics.model.is_polynomial() {
        return crate::camera::polynomial::distort_tensor(points, intrinsics.model, &intrinsics.parameters);
    }
    let distorted = points
        .iter_points2()
        .map(|p| intrinsics.distort_point(&p))
        .collect::<Result<Vec<_>, _>>()?;
    PointsTensor::from_points2(points.leading_shape(), &distorted)
}

/// Removes the lens distortion from pixels `[..., 2]` with the generic per-point solver.
pub fn undistort(
    points: &PointsTensor,
    intrinsics: &CameraIntrinsics,
) -> Result<PointsTensor, CameraModelError> {
    undistort_with(points, intrinsics, &UndistortOptions::default())
}

/// Removes the lens distortion with explicit solver options.
///
/// # Arguments
///
/// * `points` - Distorted pixels shaped `[..., 2]`.
/// * `intrinsics` - A single camera.
/// * `options` - Iteration limit and tolerances of the per-point solve.
///
/// # Returns
///
/// Pinhole pixels with the same shape as `points`.
///
/// # Errors
///
/// [`CameraModelError::UndistortDidNotConverge`] naming the first point that
/// stays off by more than `options.tolerance_px`.
pub fn undistort_with(
    points: &PointsTensor,
    intrinsics: &CameraIntrinsics,
    options: &UndistortOptions,
) -> Result<PointsTensor, CameraModelError> {
    intrinsics.validate_params()?;
    GenericInverseSolver::new(intrinsics.model, &intrinsics.parameters, options.clone())?
        .undistort(points)
}

/// Unit rays `[..., 3]` observed at the pixels `[..., 2]`.
///
/// Broadcasts over the points only; `intrinsics` describe a single camera.
pub fn unproject(
    points: &PointsTensor,
    intrinsics: &CameraIntrinsics,
) -> Result<PointsTensor, CameraModelError> {
    unproject_with(points, intrinsics, &UndistortOptions::default())
}

/// Unit rays with explicit solver options.
///
/// # Arguments
///
/// * `points` - Distorted pixels shaped `[..., 2]`.
/// * `intrinsics` - A single camera.
/// * `options` - Options of the undistortion step.
///
/// # Returns
///
/// Unit-norm rays shaped `[..., 3]`. Empty input gives an empty `[..., 3]` tensor.
pub fn unproject_with(
    points: &PointsTensor,
    intrinsics: &CameraIntrinsics,
    options: &UndistortOptions,
) -> Result<PointsTensor, CameraModelError> {
    intrinsics.validate_params()?;
    if points.is_empty() {
        let mut shape = points.leading_shape().to_vec();
        shape.push(3);
        return PointsTensor::zeros(shape);
    }
    let undistorted = undistort_with(points, intrinsics, options)?;
    let core = PinholeCore::from(&intrinsics.core());
    let rays: Vec<Vector3<f64>> = undistorted
        .iter_points2()
        .map(|p| core.lift(&p).normalize())
        .collect();
    PointsTensor::from_points3(undistorted.leading_shape(), &rays)
}
