//! Pinhole projection core shared by every distortion model.
//!
//! The distortion models all work on pixels that were produced by a plain
//! pinhole projection with the same `fx, fy, cx, cy`. [`PinholeCore`] maps
//! between those pixels and points on the normalized `z = 1` plane.

use crate::camera::{CameraModelError, DistortionModel, Intrinsics};
use nalgebra::{RealField, Vector2, Vector3};

/// The four pinhole parameters over a generic scalar.
#[derive(Debug, Clone, PartialEq)]
pub struct PinholeCore<T> {
    pub fx: T,
    pub fy: T,
    pub cx: T,
    pub cy: T,
}

impl<T: RealField> PinholeCore<T> {
    pub fn new(fx: T, fy: T, cx: T, cy: T) -> Self {
        PinholeCore { fx, fy, cx, cy }
    }

    /// Takes the core from the head of an intrinsic vector.
    ///
    /// # Errors
    ///
    /// [`CameraModelError::ParameterCountMismatch`] if fewer than four values are given.
    pub fn from_slice(intrinsics: &[T], model: DistortionModel) -> Result<Self, CameraModelError> {
        match intrinsics {
            [fx, fy, cx, cy, ..] => Ok(PinholeCore::new(
                fx.clone(),
                fy.clone(),
                cx.clone(),
                cy.clone(),
            )),
            _ => Err(CameraModelError::ParameterCountMismatch {
                model,
                expected: model.param_count(),
                actual: 0,
            }),
        }
    }

    /// Divides by depth, then scales and offsets: `(fx x/z + cx, fy y/z + cy)`.
    pub fn project(&self, point: &Vector3<T>) -> Vector2<T> {
        let x = point.x.clone() / point.z.clone();
        let y = point.y.clone() / point.z.clone();
        Vector2::new(
            self.fx.clone() * x + self.cx.clone(),
            self.fy.clone() * y + self.cy.clone(),
        )
    }

    /// Lifts a pinhole pixel onto the `z = 1` plane: `((u - cx)/fx, (v - cy)/fy, 1)`.
    pub fn lift(&self, pixel: &Vector2<T>) -> Vector3<T> {
        Vector3::new(
            (pixel.x.clone() - self.cx.clone()) / self.fx.clone(),
            (pixel.y.clone() - self.cy.clone()) / self.fy.clone(),
            T::one(),
        )
    }
}

impl From<&Intrinsics> for PinholeCore<f64> {
    fn from(intrinsics: &Intrinsics) -> Self {
        PinholeCore::new(intrinsics.fx, intrinsics.fy, intrinsics.cx, intrinsics.cy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn core() -> PinholeCore<f64> {
        PinholeCore::new(500.0, 480.0, 320.0, 240.0)
    }

    #[test]
    fn test_pinhole_project() {
        let p = core().project(&Vector3::new(1.0, 1.0, 4.0));
        assert_relative_eq!(p.x, 500.0 * 0.25 + 320.0);
        assert_relative_eq!(p.y, 480.0 * 0.25 + 240.0);
    }

    #[test]
    fn test_lift_inverts_project() {
        let point = Vector3::new(0.3, -0.2, 2.0);
        let lifted = core().lift(&core().project(&point));
        assert_relative_eq!(lifted, point / 2.0, epsilon = 1e-12);
    }

    #[test]
    fn test_from_short_slice_fails() {
        let err = PinholeCore::from_slice(&[1.0, 2.0], DistortionModel::None).unwrap_err();
        assert!(matches!(err, CameraModelError::ParameterCountMismatch { .. }));
    }
}
