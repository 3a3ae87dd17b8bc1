//! CAHVOR closed-form distortion.
//!
//! The distortion is radial about an optical axis `o` that may be tilted away
//! from the camera `z` axis by the angles `theta` (azimuth) and `phi` (polar
//! angle). For a pinhole direction `p`:
//!
//! ```text
//! omega = <p, o>
//! tau   = <p, p> / omega^2 - 1           (tan^2 of the off-axis angle)
//! mu    = r0 + r1 tau + r2 tau^2
//! p'    = p (1 + mu) - mu omega o
//! ```
//!
//! and `p'` is projected with the pinhole core again. Nothing is special-cased
//! near `omega = 0`.

use crate::camera::{CameraModelError, DistortionModel, PinholeCore};
use nalgebra::{RealField, Vector2, Vector3};

/// Unit optical axis for azimuth `theta` and polar angle `phi`.
pub fn optical_axis<T: RealField>(theta: &T, phi: &T) -> Vector3<T> {
    let (sin_theta, cos_theta) = theta.clone().sin_cos();
    let (sin_phi, cos_phi) = phi.clone().sin_cos();
    Vector3::new(sin_phi.clone() * cos_theta, sin_phi * sin_theta, cos_phi)
}

/// Applies the CAHVOR warp to a pinhole-projected pixel.
///
/// `intrinsics` is `[fx, fy, cx, cy, theta, phi, r0, r1, r2]`.
pub fn distort<T: RealField>(
    point: &Vector2<T>,
    intrinsics: &[T],
) -> Result<Vector2<T>, CameraModelError> {
    let [fx, fy, cx, cy, theta, phi, r0, r1, r2] = intrinsics else {
        return Err(CameraModelError::ParameterCountMismatch {
            model: DistortionModel::Cahvor,
            expected: DistortionModel::Cahvor.param_count(),
            actual: intrinsics.len().saturating_sub(4),
        });
    };
    let core = PinholeCore::new(fx.clone(), fy.clone(), cx.clone(), cy.clone());

    let p = core.lift(point);
    let o = optical_axis(theta, phi);

    let omega = p.dot(&o);
    let tau = p.dot(&p) / (omega.clone() * omega.clone()) - T::one();
    let mu = r0.clone() + tau.clone() * r1.clone() + tau.clone() * tau * r2.clone();

    let warped = &p * (mu.clone() + T::one()) - &o * (mu * omega);
    Ok(core.project(&warped))
}
