//! CAHVORE: the generalized wide-field extension of CAHVOR.
//!
//! The forward mapping has no closed form. For every point the incidence angle
//! `theta` satisfying
//!
//! ```text
//! omega sin(theta) - l cos(theta) = (theta - sin(theta)) (e0 + e1 theta^2 + e2 theta^4)
//! ```
//!
//! is found by Newton-Raphson, starting from the geometric angle
//! `atan2(l, omega)`. `omega` is the on-axis and `l` the off-axis magnitude of
//! the pinhole direction. The angle is then generalized by the `linearity`
//! parameter and used to build the radially warped point.
//!
//! The root-find is scalar, so callers apply [`distort`] point by point.

use crate::camera::cahvor::optical_axis;
use crate::camera::{lit, CameraModelError, DistortionModel, PinholeCore};
use nalgebra::{RealField, Vector2};

/// Newton-Raphson stops once the angle update falls below this.
pub const NEWTON_TOLERANCE: f64 = 1e-8;
/// Newton-Raphson gives up after this many updates.
pub const MAX_NEWTON_ITERATIONS: usize = 100;
/// Below this angle the point is left unwarped.
pub const SMALL_THETA: f64 = 1e-8;

const LINEARITY_EPSILON: f64 = 1e-15;

/// Applies the CAHVORE warp to a pinhole-projected pixel.
///
/// `intrinsics` is `[fx, fy, cx, cy, theta, phi, r0, r1, r2, e0, e1, e2, linearity]`.
///
/// # Errors
///
/// * [`CameraModelError::ConvergenceError`] if the angle solve needs more than
///   [`MAX_NEWTON_ITERATIONS`] updates.
/// * [`CameraModelError::OutOfBoundsError`] if `theta * |linearity| > pi/2`.
pub fn distort<T: RealField>(
    point: &Vector2<T>,
    intrinsics: &[T],
) -> Result<Vector2<T>, CameraModelError> {
    let [fx, fy, cx, cy, theta, phi, r0, r1, r2, e0, e1, e2, linearity] = intrinsics else {
        return Err(CameraModelError::ParameterCountMismatch {
            model: DistortionModel::Cahvore,
            expected: DistortionModel::Cahvore.param_count(),
            actual: intrinsics.len().saturating_sub(4),
        });
    };
    let core = PinholeCore::new(fx.clone(), fy.clone(), cx.clone(), cy.clone());

    let p = core.lift(point);
    let o = optical_axis(theta, phi);

    let omega = p.dot(&o);
    let off_axis = &p - &o * omega.clone();
    let l = off_axis.norm();

    let incidence = solve_incidence_angle(&omega, &l, [e0, e1, e2])?;

    if incidence.clone() * linearity.clone().abs() > T::frac_pi_2() {
        return Err(CameraModelError::OutOfBoundsError {
            theta: incidence.to_subset().unwrap_or(f64::NAN),
            linearity: linearity.to_subset().unwrap_or(f64::NAN),
        });
    }

    if incidence < lit(SMALL_THETA) {
        return Ok(core.project(&p));
    }

    let chi = generalized_angle(&incidence, linearity);
    let chi2 = chi.clone() * chi.clone();
    let chi4 = chi2.clone() * chi2.clone();

    let zeta = l / chi;
    let mu = r0.clone() + r1.clone() * chi2 + r2.clone() * chi4;

    let warped = o * zeta + off_axis * (T::one() + mu);
    Ok(core.project(&warped))
}

/// Newton-Raphson solve for the incidence angle.
fn solve_incidence_angle<T: RealField>(
    omega: &T,
    l: &T,
    [e0, e1, e2]: [&T; 3],
) -> Result<T, CameraModelError> {
    let two: T = lit(2.0);
    let four: T = lit(4.0);
    let tolerance: T = lit(NEWTON_TOLERANCE);

    let mut theta = l.clone().atan2(omega.clone());

    for _ in 0..MAX_NEWTON_ITERATIONS {
        let (sin_theta, cos_theta) = theta.clone().sin_cos();
        let theta2 = theta.clone() * theta.clone();
        let theta3 = theta2.clone() * theta.clone();
        let theta4 = theta2.clone() * theta2.clone();

        let e_poly = e0.clone() + e1.clone() * theta2 + e2.clone() * theta4;
        let e_poly_derivative =
            two.clone() * e1.clone() * theta.clone() + four.clone() * e2.clone() * theta3;
        let excess = theta.clone() - sin_theta.clone();

        let residual = omega.clone() * sin_theta.clone()
            - l.clone() * cos_theta.clone()
            - excess.clone() * e_poly.clone();
        let derivative = omega.clone() * cos_theta.clone() + l.clone() * sin_theta
            - (T::one() - cos_theta) * e_poly
            - excess * e_poly_derivative;

        let step = residual / derivative;
        theta -= step.clone();

        if step.abs() < tolerance {
            return Ok(theta);
        }
    }

    log::warn!(
        "CAHVORE angle solve exceeded {} iterations",
        MAX_NEWTON_ITERATIONS
    );
    Err(CameraModelError::ConvergenceError {
        iterations: MAX_NEWTON_ITERATIONS,
    })
}

/// Maps the incidence angle through the linearity parameter.
///
/// Strongly negative linearity uses `sin(L theta)/L`, strongly positive uses
/// `tan(L theta)/L`, and linearity near zero leaves the angle unchanged.
fn generalized_angle<T: RealField>(theta: &T, linearity: &T) -> T {
    let scaled = linearity.clone() * theta.clone();
    if *linearity < lit(-LINEARITY_EPSILON) {
        scaled.sin() / linearity.clone()
    } else if *linearity > lit(LINEARITY_EPSILON) {
        scaled.tan() / linearity.clone()
    } else {
        theta.clone()
    }
}
