//! Camera intrinsics and the distortion-model registry.
//!
//! Every supported lens model is a variant of [`DistortionModel`]. A variant
//! fixes the number of distortion parameters that follow the pinhole core
//! `[fx, fy, cx, cy]` in an intrinsic vector, and dispatches the forward
//! distortion of a pinhole-projected pixel through [`DistortionModel::distort`].
//!
//! The forward functions are generic over [`RealField`] so the same code runs on
//! plain `f64` and on the dual numbers used by the `tiny_solver` optimizer when
//! the mapping has to be inverted.

use nalgebra::{RealField, Vector2};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub mod cahvor;
pub mod cahvore;
pub mod pinhole;
pub mod polynomial;

pub use pinhole::PinholeCore;

/// Number of leading pinhole parameters (`fx, fy, cx, cy`) in an intrinsic vector.
pub const N_INTRINSICS_CORE: usize = 4;

/// Pinhole parameters shared by every lens model.
///
/// # Fields
///
/// * `fx`, `fy` - Focal lengths in pixels.
/// * `cx`, `cy` - Principal point in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Intrinsics {
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
}

#[derive(thiserror::Error, Debug)]
pub enum CameraModelError {
    #[error("Unknown distortion model: '{0}'")]
    UnknownModel(String),
    #[error("Model {model} expects {expected} distortion parameters, but got {actual}")]
    ParameterCountMismatch {
        model: DistortionModel,
        expected: usize,
        actual: usize,
    },
    #[error("CAHVORE Newton-Raphson did not converge after {iterations} iterations")]
    ConvergenceError { iterations: usize },
    #[error("CAHVORE angle out of bounds: theta {theta} with linearity {linearity}")]
    OutOfBoundsError { theta: f64, linearity: f64 },
    #[error("Gradients are not available for the {0} model")]
    GradientsUnsupported(DistortionModel),
    #[error("Unsupported broadcast: {0}")]
    UnsupportedBroadcast(String),
    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),
    #[error("Undistortion of point {index} did not converge (residual {residual} px)")]
    UndistortDidNotConverge { index: usize, residual: f64 },
    #[error("Focal length must be non-zero and finite")]
    FocalLengthMustBeNonZero,
    #[error("Principal point must be finite")]
    PrincipalPointMustBeFinite,
    #[error("Invalid camera parameters: {0}")]
    InvalidParams(String),
    #[error("Failed to load YAML: {0}")]
    YamlError(String),
    #[error("Failed to load JSON: {0}")]
    JsonError(String),
    #[error("CSV Error: {0}")]
    CsvError(String),
    #[error("Image Error: {0}")]
    ImageError(String),
    #[error("IO Error: {0}")]
    IOError(String),
}

impl From<std::io::Error> for CameraModelError {
    fn from(err: std::io::Error) -> Self {
        CameraModelError::IOError(err.to_string())
    }
}

impl From<serde_yaml::Error> for CameraModelError {
    fn from(err: serde_yaml::Error) -> Self {
        CameraModelError::YamlError(err.to_string())
    }
}

impl From<serde_json::Error> for CameraModelError {
    fn from(err: serde_json::Error) -> Self {
        CameraModelError::JsonError(err.to_string())
    }
}

impl From<csv::Error> for CameraModelError {
    fn from(err: csv::Error) -> Self {
        CameraModelError::CsvError(err.to_string())
    }
}

impl From<image::ImageError> for CameraModelError {
    fn from(err: image::ImageError) -> Self {
        CameraModelError::ImageError(err.to_string())
    }
}

/// The closed set of lens models understood by this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum DistortionModel {
    /// Plain pinhole, no distortion parameters.
    None,
    /// Polynomial lens: `k1, k2, p1, p2`.
    Poly4,
    /// Polynomial lens: `k1, k2, p1, p2, k3`.
    Poly5,
    /// Rational polynomial lens: adds `k4, k5, k6`.
    Poly8,
    /// Rational polynomial with thin prism terms `s1..s4`.
    Poly12,
    /// Rational polynomial, thin prism and sensor tilt `tau_x, tau_y`.
    Poly14,
    /// `theta, phi, r0, r1, r2`.
    Cahvor,
    /// CAHVOR plus `e0, e1, e2, linearity`.
    Cahvore,
}

impl DistortionModel {
    pub const ALL: [DistortionModel; 8] = [
        DistortionModel::None,
        DistortionModel::Poly4,
        DistortionModel::Poly5,
        DistortionModel::Poly8,
        DistortionModel::Poly12,
        DistortionModel::Poly14,
        DistortionModel::Cahvor,
        DistortionModel::Cahvore,
    ];

    /// Canonical identifier of the model.
    ///
    /// # Returns
    ///
    /// The short name (`NONE`, `POLY4` .. `POLY14`, `CAHVOR`, `CAHVORE`) used by
    /// [`Display`](fmt::Display), serde and [`DistortionModel::from_name`].
    pub fn name(&self) -> &'static str {
        match self {
            DistortionModel::None => "NONE",
            DistortionModel::Poly4 => "POLY4",
            DistortionModel::Poly5 => "POLY5",
            DistortionModel::Poly8 => "POLY8",
            DistortionModel::Poly12 => "POLY12",
            DistortionModel::Poly14 => "POLY14",
            DistortionModel::Cahvor => "CAHVOR",
            DistortionModel::Cahvore => "CAHVORE",
        }
    }

    /// Looks a model up by identifier.
    ///
    /// Both the short names (`POLY8`, `CAHVORE`, ...) and the legacy long names
    /// (`DISTORTION_OPENCV8`, `DISTORTION_CAHVORE`, ...) are accepted.
    ///
    /// # Errors
    ///
    /// [`CameraModelError::UnknownModel`] for any other identifier.
    pub fn from_name(name: &str) -> Result<Self, CameraModelError> {
        let model = match name.trim() {
            "NONE" | "DISTORTION_NONE" => DistortionModel::None,
            "POLY4" | "DISTORTION_OPENCV4" => DistortionModel::Poly4,
            "POLY5" | "DISTORTION_OPENCV5" => DistortionModel::Poly5,
            "POLY8" | "DISTORTION_OPENCV8" => DistortionModel::Poly8,
            "POLY12" | "DISTORTION_OPENCV12" => DistortionModel::Poly12,
            "POLY14" | "DISTORTION_OPENCV14" => DistortionModel::Poly14,
            "CAHVOR" | "DISTORTION_CAHVOR" => DistortionModel::Cahvor,
            "CAHVORE" | "DISTORTION_CAHVORE" => DistortionModel::Cahvore,
            other => return Err(CameraModelError::UnknownModel(other.to_string())),
        };
        Ok(model)
    }

    /// Number of distortion parameters following the pinhole core.
    pub fn param_count(&self) -> usize {
        match self {
            DistortionModel::None => 0,
            DistortionModel::Poly4 => 4,
            DistortionModel::Poly5 => 5,
            DistortionModel::Poly8 => 8,
            DistortionModel::Poly12 => 12,
            DistortionModel::Poly14 => 14,
            DistortionModel::Cahvor => 5,
            DistortionModel::Cahvore => 9,
        }
    }

    /// Full intrinsic vector length: core plus distortion parameters.
    pub fn intrinsic_count(&self) -> usize {
        N_INTRINSICS_CORE + self.param_count()
    }

    pub fn is_polynomial(&self) -> bool {
        matches!(
            self,
            DistortionModel::Poly4
                | DistortionModel::Poly5
                | DistortionModel::Poly8
                | DistortionModel::Poly12
                | DistortionModel::Poly14
        )
    }

    /// Checks that an intrinsic vector of `len` values fits this model.
    pub fn check_intrinsic_count(&self, len: usize) -> Result<(), CameraModelError> {
        if len != self.intrinsic_count() {
            return Err(CameraModelError::ParameterCountMismatch {
                model: *self,
                expected: self.param_count(),
                actual: len.saturating_sub(N_INTRINSICS_CORE),
            });
        }
        Ok(())
    }

    /// Applies the forward distortion of this model to a pinhole-projected pixel.
    ///
    /// `intrinsics` is the full vector `[fx, fy, cx, cy, distortions...]`. The
    /// pixel is assumed to have been projected with the same `fx, fy, cx, cy`.
    ///
    /// # Errors
    ///
    /// * [`CameraModelError::ParameterCountMismatch`] if `intrinsics` has the wrong length.
    /// * [`CameraModelError::ConvergenceError`] and [`CameraModelError::OutOfBoundsError`]
    ///   from the CAHVORE angle solve.
    pub fn distort<T: RealField>(
        &self,
        point: &Vector2<T>,
        intrinsics: &[T],
    ) -> Result<Vector2<T>, CameraModelError> {
        self.check_intrinsic_count(intrinsics.len())?;
        match self {
            DistortionModel::None => Ok(point.clone()),
            DistortionModel::Poly4
            | DistortionModel::Poly5
            | DistortionModel::Poly8
            | DistortionModel::Poly12
            | DistortionModel::Poly14 => polynomial::distort(point, intrinsics),
            DistortionModel::Cahvor => cahvor::distort(point, intrinsics),
            DistortionModel::Cahvore => cahvore::distort(point, intrinsics),
        }
    }
}

impl fmt::Display for DistortionModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DistortionModel {
    type Err = CameraModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DistortionModel::from_name(s)
    }
}

impl TryFrom<String> for DistortionModel {
    type Error = CameraModelError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        DistortionModel::from_name(&value)
    }
}

impl From<DistortionModel> for String {
    fn from(model: DistortionModel) -> Self {
        model.name().to_string()
    }
}

/// Registry lookup: parameter count and the dispatching model for `name`.
pub fn lookup(name: &str) -> Result<(usize, DistortionModel), CameraModelError> {
    let model = DistortionModel::from_name(name)?;
    Ok((model.param_count(), model))
}

/// Distortion-parameter count for `name`.
pub fn param_count(name: &str) -> Result<usize, CameraModelError> {
    Ok(DistortionModel::from_name(name)?.param_count())
}

/// A full intrinsic vector `[fx, fy, cx, cy, distortions...]` tagged with its model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraIntrinsics {
    pub model: DistortionModel,
    pub parameters: Vec<f64>,
}

impl CameraIntrinsics {
    /// Creates a validated intrinsic vector.
    ///
    /// # Errors
    ///
    /// * [`CameraModelError::ParameterCountMismatch`] if the length does not match the model.
    /// * [`CameraModelError::FocalLengthMustBeNonZero`] / [`CameraModelError::PrincipalPointMustBeFinite`]
    ///   for an unusable pinhole core.
    pub fn new(model: DistortionModel, parameters: &[f64]) -> Result<Self, CameraModelError> {
        let intrinsics = CameraIntrinsics {
            model,
            parameters: parameters.to_vec(),
        };
        intrinsics.validate_params()?;
        Ok(intrinsics)
    }

    /// The pinhole part of the intrinsic vector.
    ///
    /// # Returns
    ///
    /// `fx, fy, cx, cy` taken from the first four parameters.
    ///
    /// # Panics
    ///
    /// If `parameters` holds fewer than four values. [`CameraIntrinsics::new`]
    /// never builds such a vector.
    pub fn core(&self) -> Intrinsics {
        Intrinsics {
            fx: self.parameters[0],
            fy: self.parameters[1],
            cx: self.parameters[2],
            cy: self.parameters[3],
        }
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.parameters
    }

    pub fn validate_params(&self) -> Result<(), CameraModelError> {
        self.model.check_intrinsic_count(self.parameters.len())?;
        validation::validate_intrinsics(&self.core())
    }

    /// Forward-distorts a single pinhole-projected pixel.
    pub fn distort_point(&self, point: &Vector2<f64>) -> Result<Vector2<f64>, CameraModelError> {
        self.model.distort(point, &self.parameters)
    }
}

/// Common validation functions for camera parameters
pub mod validation {
    use super::*;

    pub fn validate_intrinsics(intrinsics: &Intrinsics) -> Result<(), CameraModelError> {
        if intrinsics.fx == 0.0
            || intrinsics.fy == 0.0
            || !intrinsics.fx.is_finite()
            || !intrinsics.fy.is_finite()
        {
            return Err(CameraModelError::FocalLengthMustBeNonZero);
        }
        if !intrinsics.cx.is_finite() || !intrinsics.cy.is_finite() {
            return Err(CameraModelError::PrincipalPointMustBeFinite);
        }
        Ok(())
    }
}

/// Lifts an `f64` constant into the scalar type of a generic computation.
#[inline]
pub(crate) fn lit<T: RealField>(value: f64) -> T {
    nalgebra::convert(value)
}
