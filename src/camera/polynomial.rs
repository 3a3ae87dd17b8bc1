//! Polynomial lens models (`POLY4` .. `POLY14`).
//!
//! The evaluator follows the OpenCV `projectPoints` conventions: the
//! coefficient vector is `k1, k2, p1, p2[, k3[, k4, k5, k6[, s1, s2, s3, s4[, tau_x, tau_y]]]]`,
//! i.e. radial terms as a rational polynomial, tangential terms, thin-prism
//! terms and a tilted-sensor correction. Shorter vectors are treated as
//! zero-padded, so the five model sizes differ only in how many coefficients
//! they carry.

use crate::camera::{CameraModelError, DistortionModel, PinholeCore, N_INTRINSICS_CORE};
use crate::tensor::PointsTensor;
use nalgebra::{Matrix3, RealField, Rotation3, Vector2, Vector3};

const N_COEFFICIENTS_MAX: usize = 14;

/// Camera matrix `[[fx, 0, cx], [0, fy, cy], [0, 0, 1]]`.
pub fn camera_matrix<T: RealField>(core: &PinholeCore<T>) -> Matrix3<T> {
    Matrix3::new(
        core.fx.clone(),
        T::zero(),
        core.cx.clone(),
        T::zero(),
        core.fy.clone(),
        core.cy.clone(),
        T::zero(),
        T::zero(),
        T::one(),
    )
}

/// Projects 3D points through a rigid transform and a polynomial lens.
///
/// `rotation` is a Rodrigues vector, `translation` is applied after it.
/// `coefficients` must hold 4, 5, 8, 12 or 14 values.
///
/// # Errors
///
/// [`CameraModelError::InvalidParams`] for any other coefficient count.
pub fn project_points<T: RealField>(
    points: &[Vector3<T>],
    rotation: &Vector3<T>,
    translation: &Vector3<T>,
    camera_matrix: &Matrix3<T>,
    coefficients: &[T],
) -> Result<Vec<Vector2<T>>, CameraModelError> {
    if !matches!(coefficients.len(), 4 | 5 | 8 | 12 | 14) {
        return Err(CameraModelError::InvalidParams(format!(
            "Polynomial lens expects 4, 5, 8, 12 or 14 coefficients, got {}",
            coefficients.len()
        )));
    }
    let mut k: [T; N_COEFFICIENTS_MAX] = std::array::from_fn(|_| T::zero());
    for (slot, value) in k.iter_mut().zip(coefficients) {
        *slot = value.clone();
    }
    let [k1, k2, p1, p2, k3, k4, k5, k6, s1, s2, s3, s4, tau_x, tau_y] = k;

    let rotation = Rotation3::new(rotation.clone());
    let tilt = tilt_projection(&tau_x, &tau_y);

    let fx = camera_matrix[(0, 0)].clone();
    let fy = camera_matrix[(1, 1)].clone();
    let cx = camera_matrix[(0, 2)].clone();
    let cy = camera_matrix[(1, 2)].clone();
    let two = T::one() + T::one();

    let projected = points
        .iter()
        .map(|point| {
            let p = &rotation * point + translation;
            let z_inv = if p.z != T::zero() {
                T::one() / p.z.clone()
            } else {
                T::one()
            };
            let x = p.x.clone() * z_inv.clone();
            let y = p.y.clone() * z_inv;

            let r2 = x.clone() * x.clone() + y.clone() * y.clone();
            let r4 = r2.clone() * r2.clone();
            let r6 = r4.clone() * r2.clone();

            let radial = (T::one() + k1.clone() * r2.clone() + k2.clone() * r4.clone() + k3.clone() * r6.clone())
                / (T::one() + k4.clone() * r2.clone() + k5.clone() * r4.clone() + k6.clone() * r6);
            let xy = x.clone() * y.clone();

            let xd = x.clone() * radial.clone()
                + two.clone() * p1.clone() * xy.clone()
                + p2.clone() * (r2.clone() + two.clone() * x.clone() * x)
                + s1.clone() * r2.clone()
                + s2.clone() * r4.clone();
            let yd = y.clone() * radial
                + p1.clone() * (r2.clone() + two.clone() * y.clone() * y)
                + two.clone() * p2.clone() * xy
                + s3.clone() * r2
                + s4.clone() * r4;

            let tilted = &tilt * Vector3::new(xd, yd, T::one());
            let w_inv = if tilted.z != T::zero() {
                T::one() / tilted.z.clone()
            } else {
                T::one()
            };

            Vector2::new(
                fx.clone() * tilted.x.clone() * w_inv.clone() + cx.clone(),
                fy.clone() * tilted.y.clone() * w_inv + cy.clone(),
            )
        })
        .collect();
    Ok(projected)
}

/// Tilted-sensor projection matrix for the angles `tau_x`, `tau_y`.
fn tilt_projection<T: RealField>(tau_x: &T, tau_y: &T) -> Matrix3<T> {
    let (s_x, c_x) = tau_x.clone().sin_cos();
    let (s_y, c_y) = tau_y.clone().sin_cos();
    let zero = T::zero();
    let one = T::one();

    let rot_x = Matrix3::new(
        one.clone(),
        zero.clone(),
        zero.clone(),
        zero.clone(),
        c_x.clone(),
        s_x.clone(),
        zero.clone(),
        -s_x,
        c_x,
    );
    let rot_y = Matrix3::new(
        c_y.clone(),
        zero.clone(),
        -s_y.clone(),
        zero.clone(),
        one.clone(),
        zero.clone(),
        s_y,
        zero.clone(),
        c_y,
    );
    let rot_xy = rot_y * rot_x;
    let proj_z = Matrix3::new(
        rot_xy[(2, 2)].clone(),
        zero.clone(),
        -rot_xy[(0, 2)].clone(),
        zero.clone(),
        rot_xy[(2, 2)].clone(),
        -rot_xy[(1, 2)].clone(),
        zero.clone(),
        zero,
        one,
    );
    proj_z * rot_xy
}

/// Applies a polynomial lens to one pinhole-projected pixel.
///
/// `intrinsics` is `[fx, fy, cx, cy, coefficients...]`.
pub fn distort<T: RealField>(
    point: &Vector2<T>,
    intrinsics: &[T],
) -> Result<Vector2<T>, CameraModelError> {
    let core = PinholeCore::from_slice(intrinsics, DistortionModel::Poly4)?;
    let lifted = core.lift(point);
    let projected = project_points(
        &[lifted],
        &Vector3::zeros(),
        &Vector3::zeros(),
        &camera_matrix(&core),
        &intrinsics[N_INTRINSICS_CORE..],
    )?;
    projected.into_iter().next().ok_or_else(|| {
        CameraModelError::InvalidParams("Polynomial evaluator returned no point".to_string())
    })
}

/// Distorts a whole tensor of pinhole pixels in one evaluator call.
///
/// The leading axes are flattened, the batch is handed to [`project_points`]
/// with zero rotation and translation, and the result is reshaped back.
pub fn distort_tensor(
    points: &PointsTensor,
    model: DistortionModel,
    intrinsics: &[f64],
) -> Result<PointsTensor, CameraModelError> {
    model.check_intrinsic_count(intrinsics.len())?;
    let core = PinholeCore::from_slice(intrinsics, model)?;
    let lifted: Vec<Vector3<f64>> = points.iter_points2().map(|p| core.lift(&p)).collect();

    let projected = project_points(
        &lifted,
        &Vector3::zeros(),
        &Vector3::zeros(),
        &camera_matrix(&core),
        &intrinsics[N_INTRINSICS_CORE..],
    )?;
    PointsTensor::from_points2(points.leading_shape(), &projected)
}
