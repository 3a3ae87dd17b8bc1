//! Distortion Tools Library
//!
//! Projection and unprojection of camera-frame points under several lens
//! distortion models:
//! - Pinhole (no distortion)
//! - Polynomial lenses with 4, 5, 8, 12 or 14 coefficients (radial, tangential,
//!   thin prism and tilted sensor terms)
//! - CAHVOR
//! - CAHVORE, whose forward map solves for the incidence angle per point
//!
//! Every model is inverted by the same per-point least-squares solve built on
//! the tiny-solver optimization framework. Point sets are [`PointsTensor`]s
//! with arbitrary leading axes, and a camera rig can be projected in one call
//! by giving one set of intrinsics per camera.

pub mod calibration;
pub mod camera;
pub mod config;
pub mod geometry;
pub mod optimization;
pub mod projection;
pub mod tensor;
pub mod util;

// Re-export commonly used types
pub use camera::{CameraIntrinsics, CameraModelError, DistortionModel, Intrinsics};
pub use config::{ProjectionConfig, UndistortOptions};
pub use optimization::GenericInverseSolver;
pub use projection::{distort, project, undistort, unproject, Projection, ProjectionGradients};
pub use tensor::PointsTensor;
