//! Image resampling and file export helpers.

use crate::camera::{CameraIntrinsics, CameraModelError};
use crate::geometry::{DistortionField, DistortionFieldSampler};
use image::imageops::{interpolate_bilinear, interpolate_nearest};
use image::{Rgb, RgbImage};
use log::info;
use serde::Serialize;
use std::fs;
use std::path::Path;

/// Ensure the output directory exists
pub fn ensure_output_dir() -> Result<(), CameraModelError> {
    let output_dir = Path::new("output");
    if !output_dir.exists() {
        fs::create_dir_all(output_dir)?;
    }
    Ok(())
}

pub fn load_image(image_path: impl AsRef<Path>) -> Result<RgbImage, CameraModelError> {
    Ok(image::open(image_path)?.to_rgb8())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Interpolation {
    Nearest,
    #[default]
    Linear,
}

/// Samples an image at arbitrary sub-pixel positions.
pub trait ImageResampler {
    /// Output pixel `(x, y)` takes the source value at `(map_x[x, y], map_y[x, y])`.
    ///
    /// Maps are `width * height` long and indexed `x * height + y`, the layout
    /// of a [`DistortionField`]. Positions outside the source are black.
    fn remap(
        &self,
        source: &RgbImage,
        map_x: &[f64],
        map_y: &[f64],
        width: u32,
        height: u32,
    ) -> Result<RgbImage, CameraModelError>;
}

impl ImageResampler for Interpolation {
    fn remap(
        &self,
        source: &RgbImage,
        map_x: &[f64],
        map_y: &[f64],
        width: u32,
        height: u32,
    ) -> Result<RgbImage, CameraModelError> {
        let len = width as usize * height as usize;
        if map_x.len() != len || map_y.len() != len {
            return Err(CameraModelError::ShapeMismatch(format!(
                "remap of a {width}x{height} image needs {len} map entries, got {} and {}",
                map_x.len(),
                map_y.len()
            )));
        }

        let mut output = RgbImage::new(width, height);
        for x in 0..width {
            for y in 0..height {
                let i = x as usize * height as usize + y as usize;
                output.put_pixel(x, y, self.sample(source, map_x[i], map_y[i]));
            }
        }
        Ok(output)
    }
}

impl Interpolation {
    /// Source value at a sub-pixel position, black outside `[0, w-1] x [0, h-1]`.
    fn sample(&self, source: &RgbImage, x: f64, y: f64) -> Rgb<u8> {
        let (x, y) = (x as f32, y as f32);
        let value = match self {
            Interpolation::Nearest => interpolate_nearest(source, x, y),
            Interpolation::Linear => interpolate_bilinear(source, x, y),
        };
        value.unwrap_or(Rgb([0, 0, 0]))
    }
}

/// Removes the lens distortion from a whole image.
///
/// Every output pixel is treated as a pinhole pixel, pushed through the
/// forward distortion and filled from the source at the distorted position.
pub fn undistort_image(
    intrinsics: &CameraIntrinsics,
    image: &RgbImage,
) -> Result<RgbImage, CameraModelError> {
    undistort_image_with(intrinsics, image, Interpolation::Linear)
}

/// [`undistort_image`] with a chosen resampler, e.g. [`Interpolation::Nearest`].
pub fn undistort_image_with(
    intrinsics: &CameraIntrinsics,
    image: &RgbImage,
    resampler: impl ImageResampler,
) -> Result<RgbImage, CameraModelError> {
    let (width, height) = image.dimensions();
    let field = DistortionFieldSampler::new(intrinsics.clone())?.sample(width, height)?;
    let (map_x, map_y): (Vec<f64>, Vec<f64>) =
        field.distorted.iter_points2().map(|p| (p.x, p.y)).unzip();
    let output = resampler.remap(image, &map_x, &map_y, width, height)?;
    info!(
        "Undistorted {}x{} image with the {} model",
        width, height, intrinsics.model
    );
    Ok(output)
}

#[derive(Serialize)]
struct FieldRecord {
    x: f64,
    y: f64,
    distorted_x: f64,
    distorted_y: f64,
    dx: f64,
    dy: f64,
}

/// Writes a distortion field as CSV, one row per grid node.
pub fn export_distortion_field(
    field: &DistortionField,
    path: impl AsRef<Path>,
) -> Result<(), CameraModelError> {
    let path = path.as_ref();
    let mut writer = csv::Writer::from_path(path)?;
    for (grid, distorted) in field.grid.iter_points2().zip(field.distorted.iter_points2()) {
        writer.serialize(FieldRecord {
            x: grid.x,
            y: grid.y,
            distorted_x: distorted.x,
            distorted_y: distorted.y,
            dx: distorted.x - grid.x,
            dy: distorted.y - grid.y,
        })?;
    }
    writer.flush()?;
    info!(
        "Exported {} distortion field nodes to {}",
        field.grid.num_points(),
        path.display()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::DistortionModel;

    fn gradient_image(width: u32, height: u32) -> RgbImage {
        RgbImage::from_fn(width, height, |x, y| Rgb([(x * 10) as u8, (y * 10) as u8, 128]))
    }

    fn identity_maps(width: u32, height: u32) -> (Vec<f64>, Vec<f64>) {
        (0..width)
            .flat_map(|x| (0..height).map(move |y| (f64::from(x), f64::from(y))))
            .unzip()
    }

    #[test]
    fn test_identity_remap() {
        let image = gradient_image(6, 4);
        let (map_x, map_y) = identity_maps(6, 4);
        for interpolation in [Interpolation::Nearest, Interpolation::Linear] {
            let out = interpolation.remap(&image, &map_x, &map_y, 6, 4).unwrap();
            assert_eq!(out, image);
        }
    }

    #[test]
    fn test_bilinear_midpoint() {
        let image = gradient_image(4, 4);
        assert_eq!(Interpolation::Linear.sample(&image, 1.5, 2.0), Rgb([15, 20, 128]));
        assert_eq!(Interpolation::Nearest.sample(&image, 1.4, 2.0), Rgb([10, 20, 128]));
    }

    #[test]
    fn test_outside_is_black() {
        let image = gradient_image(4, 4);
        assert_eq!(Interpolation::Nearest.sample(&image, -3.0, 1.0), Rgb([0, 0, 0]));
        assert_eq!(Interpolation::Linear.sample(&image, 10.0, f64::NAN), Rgb([0, 0, 0]));
        // Past the last pixel centre, even by a fraction.
        assert_eq!(Interpolation::Linear.sample(&image, 3.5, 1.0), Rgb([0, 0, 0]));
    }

    #[test]
    fn test_map_length_checked() {
        let image = gradient_image(4, 4);
        let err = Interpolation::Linear
            .remap(&image, &[0.0; 3], &[0.0; 3], 4, 4)
            .unwrap_err();
        assert!(matches!(err, CameraModelError::ShapeMismatch(_)));
    }

    #[test]
    fn test_undistort_image_none_model_is_identity() {
        let image = gradient_image(8, 5);
        let intrinsics =
            CameraIntrinsics::new(DistortionModel::None, &[100.0, 100.0, 4.0, 2.5]).unwrap();
        assert_eq!(undistort_image(&intrinsics, &image).unwrap(), image);
    }

    #[test]
    fn test_export_distortion_field() {
        ensure_output_dir().unwrap();
        let intrinsics = CameraIntrinsics::new(
            DistortionModel::Cahvor,
            &[100.0, 100.0, 4.0, 3.0, 0.0, 0.0, 0.0, 0.2, 0.0],
        )
        .unwrap();
        let field = DistortionFieldSampler::new(intrinsics)
            .unwrap()
            .sample(3, 2)
            .unwrap();
        let path = "output/distortion_field_test.csv";
        export_distortion_field(&field, path).unwrap();
        let contents = fs::read_to_string(path).unwrap();
        let mut lines = contents.lines();
        assert_eq!(lines.next(), Some("x,y,distorted_x,distorted_y,dx,dy"));
        assert_eq!(lines.count(), 6);
        fs::remove_file(path).unwrap();
    }
}
