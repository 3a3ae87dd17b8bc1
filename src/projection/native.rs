//! Fast projection path for every model with a closed-form forward map.
//!
//! Points are projected with the pinhole core and then distorted. When
//! gradients are requested the same generic forward map is evaluated on
//! `num_dual` dual numbers, giving exact derivatives with respect to every
//! intrinsic parameter and every point coordinate.

use crate::camera::{CameraModelError, DistortionModel, PinholeCore};
use crate::tensor::PointsTensor;
use nalgebra::{DMatrix, DVector, Matrix2x3, RealField, Vector2, Vector3};
use num_dual::{try_jacobian, DualDVec64};

/// Projection of a single point with optional gradients.
#[derive(Debug, Clone)]
pub struct PointProjection {
    pub pixel: Vector2<f64>,
    /// `2 x Nintrinsics`.
    pub d_intrinsics: Option<DMatrix<f64>>,
    pub d_point: Option<Matrix2x3<f64>>,
}

fn check_supported(model: DistortionModel) -> Result<(), CameraModelError> {
    if model == DistortionModel::Cahvore {
        return Err(CameraModelError::InvalidParams(
            "the fast projection path does not handle CAHVORE".to_string(),
        ));
    }
    Ok(())
}

fn forward<T: RealField>(
    point: &Vector3<T>,
    model: DistortionModel,
    intrinsics: &[T],
) -> Result<Vector2<T>, CameraModelError> {
    let core = PinholeCore::from_slice(intrinsics, model)?;
    model.distort(&core.project(point), intrinsics)
}

/// Jacobian of the pixel with respect to `[intrinsics..., x, y, z]`, a `2 x (Nintrinsics + 3)` matrix.
fn forward_jacobian(
    point: &Vector3<f64>,
    model: DistortionModel,
    intrinsics: &[f64],
) -> Result<DMatrix<f64>, CameraModelError> {
    let n = intrinsics.len();
    let params = DVector::from_iterator(n + 3, intrinsics.iter().chain(point.iter()).copied());
    let (_, jac) = try_jacobian(
        |p: DVector<DualDVec64>| -> Result<DVector<DualDVec64>, CameraModelError> {
            let values = p.as_slice();
            let point = Vector3::new(values[n].clone(), values[n + 1].clone(), values[n + 2].clone());
            let pixel = forward(&point, model, &values[..n])?;
            Ok(DVector::from_vec(vec![pixel.x.clone(), pixel.y.clone()]))
        },
        params,
    )?;
    Ok(jac)
}

/// Projects one camera-frame point to a distorted pixel.
///
/// # Arguments
///
/// * `point` - Camera-frame point.
/// * `model` - Any model except CAHVORE.
/// * `intrinsics` - `[fx, fy, cx, cy, distortions...]`.
/// * `want_gradients` - Also return `dPixel/dIntrinsics` and `dPixel/dPoint`.
///
/// # Returns
///
/// The distorted pixel and, when requested, its exact derivatives.
pub fn project_point(
    point: &Vector3<f64>,
    model: DistortionModel,
    intrinsics: &[f64],
    want_gradients: bool,
) -> Result<PointProjection, CameraModelError> {
    check_supported(model)?;
    model.check_intrinsic_count(intrinsics.len())?;

    let pixel = forward(point, model, intrinsics)?;
    if !want_gradients {
        return Ok(PointProjection {
            pixel,
            d_intrinsics: None,
            d_point: None,
        });
    }

    let jac = forward_jacobian(point, model, intrinsics)?;
    let n = intrinsics.len();
    Ok(PointProjection {
        pixel,
        d_intrinsics: Some(jac.columns(0, n).into_owned()),
        d_point: Some(jac.fixed_view::<2, 3>(0, n).into_owned()),
    })
}

/// Tensor outputs of the fast path: pixels `[..., 2]` and, when requested,
/// `[..., 2, Nintrinsics]` and `[..., 2, 3]` gradients.
pub struct NativeOutput {
    pub pixels: PointsTensor,
    pub d_intrinsics: Option<PointsTensor>,
    pub d_points: Option<PointsTensor>,
}

/// Projects every point of a `[..., 3]` tensor with one set of intrinsics.
pub fn project(
    points: &PointsTensor,
    model: DistortionModel,
    intrinsics: &[f64],
    want_gradients: bool,
) -> Result<NativeOutput, CameraModelError> {
    check_supported(model)?;
    let n = points.num_points();
    let n_intrinsics = intrinsics.len();

    let mut pixels = Vec::with_capacity(n * 2);
    let mut d_intrinsics = Vec::with_capacity(if want_gradients { n * 2 * n_intrinsics } else { 0 });
    let mut d_points = Vec::with_capacity(if want_gradients { n * 6 } else { 0 });

    for point in points.iter_points3() {
        let projection = project_point(&point, model, intrinsics, want_gradients)?;
        pixels.extend_from_slice(&[projection.pixel.x, projection.pixel.y]);
        if let (Some(di), Some(dp)) = (projection.d_intrinsics, projection.d_point) {
            // Row-major: the x row, then the y row.
            for row in 0..2 {
                d_intrinsics.extend(di.row(row).iter().copied());
                d_points.extend(dp.row(row).iter().copied());
            }
        }
    }

    let leading = points.leading_shape();
    let with_tail = |tail: &[usize]| -> Vec<usize> {
        leading.iter().chain(tail.iter()).copied().collect()
    };

    let pixels = PointsTensor::new(with_tail(&[2]), pixels)?;
    if !want_gradients {
        return Ok(NativeOutput {
            pixels,
            d_intrinsics: None,
            d_points: None,
        });
    }
    Ok(NativeOutput {
        pixels,
        d_intrinsics: Some(PointsTensor::new(with_tail(&[2, n_intrinsics]), d_intrinsics)?),
        d_points: Some(PointsTensor::new(with_tail(&[2, 3]), d_points)?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_pinhole_gradients_match_analytic() {
        let intrinsics = [500.0, 480.0, 320.0, 240.0];
        let point = Vector3::new(0.4, -0.3, 2.0);
        let projection = project_point(&point, DistortionModel::None, &intrinsics, true).unwrap();

        let (x, y, z) = (point.x, point.y, point.z);
        assert_relative_eq!(projection.pixel.x, 500.0 * x / z + 320.0, epsilon = 1e-12);

        let di = projection.d_intrinsics.unwrap();
        assert_relative_eq!(di[(0, 0)], x / z, epsilon = 1e-12);
        assert_relative_eq!(di[(1, 1)], y / z, epsilon = 1e-12);
        assert_relative_eq!(di[(0, 2)], 1.0, epsilon = 1e-12);
        assert_relative_eq!(di[(1, 3)], 1.0, epsilon = 1e-12);
        assert_eq!(di[(0, 1)], 0.0);

        let dp = projection.d_point.unwrap();
        assert_relative_eq!(dp[(0, 0)], 500.0 / z, epsilon = 1e-12);
        assert_relative_eq!(dp[(0, 2)], -500.0 * x / (z * z), epsilon = 1e-12);
        assert_relative_eq!(dp[(1, 1)], 480.0 / z, epsilon = 1e-12);
        assert_eq!(dp[(1, 0)], 0.0);
    }

    #[test]
    fn test_radial_gradient_is_exact() {
        // POLY4 with only k1: u = fx * x (1 + k1 r^2) + cx on the z = 1 plane.
        let intrinsics = [400.0, 400.0, 300.0, 200.0, -0.25, 0.0, 0.0, 0.0];
        let point = Vector3::new(0.3, 0.2, 1.0);
        let projection = project_point(&point, DistortionModel::Poly4, &intrinsics, true).unwrap();

        let r2 = point.x * point.x + point.y * point.y;
        let di = projection.d_intrinsics.unwrap();
        assert_relative_eq!(di[(0, 4)], 400.0 * point.x * r2, epsilon = 1e-10);
        assert_relative_eq!(di[(1, 4)], 400.0 * point.y * r2, epsilon = 1e-10);
        assert_relative_eq!(di[(0, 0)], point.x * (1.0 - 0.25 * r2), epsilon = 1e-12);

        let dp = projection.d_point.unwrap();
        let du_dx = 400.0 * (1.0 - 0.25 * r2 - 0.5 * point.x * point.x);
        assert_relative_eq!(dp[(0, 0)], du_dx, epsilon = 1e-10);
    }

    #[test]
    fn test_tensor_gradient_shapes() {
        let points = PointsTensor::new(vec![2, 2, 3], vec![0.1, 0.2, 1.0, -0.1, 0.0, 2.0, 0.3, 0.3, 1.5, 0.0, 0.0, 1.0])
            .unwrap();
        let intrinsics = [500.0, 500.0, 320.0, 240.0, -0.2, 0.05, 0.0, 0.0, 0.0];
        let out = project(&points, DistortionModel::Poly5, &intrinsics, true).unwrap();
        assert_eq!(out.pixels.shape(), &[2, 2, 2]);
        assert_eq!(out.d_intrinsics.unwrap().shape(), &[2, 2, 2, 9]);
        assert_eq!(out.d_points.unwrap().shape(), &[2, 2, 2, 3]);
    }

    #[test]
    fn test_cahvore_refused() {
        let intrinsics = [500.0, 500.0, 320.0, 240.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 1.0];
        let result = project_point(&Vector3::new(0.0, 0.0, 1.0), DistortionModel::Cahvore, &intrinsics, false);
        assert!(result.is_err());
    }
}
