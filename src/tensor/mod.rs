//! N-d point arrays backed by `ndarray`.
//!
//! [`PointsTensor`] stores points along its trailing axis (2 for pixels, 3 for
//! camera-frame points) and any number of leading axes: a single point is
//! `[3]`, a calibration rig is `[frames, cameras, rows, cols, 3]`. The array
//! is always kept in standard (row-major) layout so the flat point accessors
//! stay cheap after an axis permutation.

use crate::camera::CameraModelError;
use nalgebra::{Vector2, Vector3};
use ndarray::{ArrayD, ArrayViewD, ArrayViewMutD, Axis, IxDyn};

#[derive(Debug, Clone, PartialEq)]
pub struct PointsTensor {
    data: ArrayD<f64>,
}

fn check_shape(shape: &[usize]) -> Result<(), CameraModelError> {
    if shape.is_empty() {
        return Err(CameraModelError::ShapeMismatch(
            "a points tensor needs at least the trailing axis".to_string(),
        ));
    }
    Ok(())
}

fn standard(array: ArrayD<f64>) -> ArrayD<f64> {
    if array.is_standard_layout() {
        array
    } else {
        array.as_standard_layout().into_owned()
    }
}

impl PointsTensor {
    /// Wraps `data` with the given shape.
    ///
    /// # Errors
    ///
    /// [`CameraModelError::ShapeMismatch`] if the shape is empty or does not
    /// describe `data.len()` elements.
    pub fn new(shape: Vec<usize>, data: Vec<f64>) -> Result<Self, CameraModelError> {
        check_shape(&shape)?;
        let expected: usize = shape.iter().product();
        let len = data.len();
        let data = ArrayD::from_shape_vec(IxDyn(&shape), data).map_err(|e| {
            CameraModelError::ShapeMismatch(format!(
                "shape {shape:?} holds {expected} values, got {len}: {e}"
            ))
        })?;
        Ok(PointsTensor { data })
    }

    /// A tensor of zeros.
    ///
    /// # Errors
    ///
    /// [`CameraModelError::ShapeMismatch`] if `shape` is empty.
    pub fn zeros(shape: Vec<usize>) -> Result<Self, CameraModelError> {
        check_shape(&shape)?;
        Ok(PointsTensor {
            data: ArrayD::zeros(IxDyn(&shape)),
        })
    }

    /// Takes ownership of an `ndarray` array of any layout.
    pub fn from_array(array: ArrayD<f64>) -> Result<Self, CameraModelError> {
        check_shape(array.shape())?;
        Ok(PointsTensor {
            data: standard(array),
        })
    }

    /// Builds a `leading_shape + [2]` tensor from pixels.
    pub fn from_points2(
        leading_shape: &[usize],
        points: &[Vector2<f64>],
    ) -> Result<Self, CameraModelError> {
        let mut shape = leading_shape.to_vec();
        shape.push(2);
        let data = points.iter().flat_map(|p| [p.x, p.y]).collect();
        PointsTensor::new(shape, data)
    }

    /// Builds a `leading_shape + [3]` tensor from 3D points.
    pub fn from_points3(
        leading_shape: &[usize],
        points: &[Vector3<f64>],
    ) -> Result<Self, CameraModelError> {
        let mut shape = leading_shape.to_vec();
        shape.push(3);
        let data = points.iter().flat_map(|p| [p.x, p.y, p.z]).collect();
        PointsTensor::new(shape, data)
    }

    pub fn shape(&self) -> &[usize] {
        self.data.shape()
    }

    pub fn ndim(&self) -> usize {
        self.data.ndim()
    }

    pub fn leading_shape(&self) -> &[usize] {
        let shape = self.data.shape();
        &shape[..shape.len() - 1]
    }

    /// Extent of the trailing axis.
    pub fn point_dim(&self) -> usize {
        let shape = self.data.shape();
        shape[shape.len() - 1]
    }

    pub fn num_points(&self) -> usize {
        self.leading_shape().iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_array(&self) -> &ArrayD<f64> {
        &self.data
    }

    pub fn view(&self) -> ArrayViewD<'_, f64> {
        self.data.view()
    }

    pub fn view_mut(&mut self) -> ArrayViewMutD<'_, f64> {
        self.data.view_mut()
    }

    /// All values in row-major order.
    pub fn as_slice(&self) -> &[f64] {
        // Standard layout is kept by every constructor, so this is always `Some`.
        self.data.as_slice().unwrap_or(&[])
    }

    /// The `index`-th point as a slice of `point_dim()` values.
    pub fn point(&self, index: usize) -> &[f64] {
        let dim = self.point_dim();
        &self.as_slice()[index * dim..(index + 1) * dim]
    }

    pub fn point2(&self, index: usize) -> Vector2<f64> {
        let p = self.point(index);
        Vector2::new(p[0], p[1])
    }

    pub fn point3(&self, index: usize) -> Vector3<f64> {
        let p = self.point(index);
        Vector3::new(p[0], p[1], p[2])
    }

    pub fn iter_points2(&self) -> impl Iterator<Item = Vector2<f64>> + '_ {
        (0..self.num_points()).map(move |i| self.point2(i))
    }

    pub fn iter_points3(&self) -> impl Iterator<Item = Vector3<f64>> + '_ {
        (0..self.num_points()).map(move |i| self.point3(i))
    }

    /// Same data, new shape.
    pub fn reshape(self, shape: Vec<usize>) -> Result<Self, CameraModelError> {
        check_shape(&shape)?;
        let from = self.data.shape().to_vec();
        let data = self
            .data
            .into_shape_with_order(IxDyn(&shape))
            .map_err(|e| {
                CameraModelError::ShapeMismatch(format!("cannot reshape {from:?} to {shape:?}: {e}"))
            })?;
        Ok(PointsTensor { data })
    }

    /// Moves axis `source` to position `destination`, keeping the relative
    /// order of the others (numpy `moveaxis`).
    pub fn move_axis(&self, source: usize, destination: usize) -> Result<Self, CameraModelError> {
        let ndim = self.ndim();
        if source >= ndim || destination >= ndim {
            return Err(CameraModelError::ShapeMismatch(format!(
                "cannot move axis {source} to {destination} in a {ndim}-d tensor"
            )));
        }
        if source == destination {
            return Ok(self.clone());
        }
        let mut order: Vec<usize> = (0..ndim).filter(|&axis| axis != source).collect();
        order.insert(destination, source);
        Ok(PointsTensor {
            data: standard(self.data.clone().permuted_axes(IxDyn(&order))),
        })
    }

    /// The `index`-th sub-tensor along axis 0.
    pub fn index_axis0(&self, index: usize) -> Result<Self, CameraModelError> {
        if self.ndim() < 2 || index >= self.shape()[0] {
            return Err(CameraModelError::ShapeMismatch(format!(
                "index {index} out of range for axis 0 of shape {:?}",
                self.shape()
            )));
        }
        Ok(PointsTensor {
            data: self.data.index_axis(Axis(0), index).to_owned(),
        })
    }

    /// Stacks equally shaped tensors along a new axis 0.
    pub fn stack(parts: &[PointsTensor]) -> Result<Self, CameraModelError> {
        let first = parts.first().ok_or_else(|| {
            CameraModelError::ShapeMismatch("cannot stack zero tensors".to_string())
        })?;
        if let Some(other) = parts.iter().find(|p| p.shape() != first.shape()) {
            return Err(CameraModelError::ShapeMismatch(format!(
                "cannot stack shapes {:?} and {:?}",
                first.shape(),
                other.shape()
            )));
        }
        let views: Vec<ArrayViewD<'_, f64>> = parts.iter().map(PointsTensor::view).collect();
        let data = ndarray::stack(Axis(0), &views)
            .map_err(|e| CameraModelError::ShapeMismatch(format!("cannot stack tensors: {e}")))?;
        Ok(PointsTensor { data })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn arange(shape: Vec<usize>) -> PointsTensor {
        let len = shape.iter().product::<usize>();
        PointsTensor::new(shape, (0..len).map(|v| v as f64).collect()).unwrap()
    }

    #[test]
    fn test_new_rejects_bad_length() {
        assert!(PointsTensor::new(vec![2, 3], vec![0.0; 5]).is_err());
        assert!(PointsTensor::new(vec![], vec![]).is_err());
    }

    #[test]
    fn test_zeros_rejects_scalar_shape() {
        let err = PointsTensor::zeros(vec![]).unwrap_err();
        assert!(matches!(err, CameraModelError::ShapeMismatch(_)));
        assert!(PointsTensor::from_array(ArrayD::zeros(IxDyn(&[]))).is_err());
        assert!(arange(vec![4]).reshape(vec![]).is_err());
    }

    #[test]
    fn test_empty_tensor() {
        let t = PointsTensor::zeros(vec![0, 4, 3]).unwrap();
        assert!(t.is_empty());
        assert_eq!(t.num_points(), 0);
        assert_eq!(t.leading_shape(), &[0, 4]);
        assert_eq!(t.point_dim(), 3);
    }

    #[test]
    fn test_move_axis_matches_numpy() {
        // np.moveaxis(np.arange(24).reshape(2,3,4), 1, 0)
        let t = arange(vec![2, 3, 4]);
        let moved = t.move_axis(1, 0).unwrap();
        assert_eq!(moved.shape(), &[3, 2, 4]);
        assert_eq!(&moved.as_slice()[..8], &[0., 1., 2., 3., 12., 13., 14., 15.]);
        assert_eq!(moved.move_axis(0, 1).unwrap(), t);
    }

    #[test]
    fn test_from_array_keeps_row_major_order() {
        let transposed = arange(vec![2, 3]).as_array().clone().reversed_axes();
        let t = PointsTensor::from_array(transposed).unwrap();
        assert_eq!(t.shape(), &[3, 2]);
        assert_eq!(t.as_slice(), &[0., 3., 1., 4., 2., 5.]);
    }

    #[test]
    fn test_index_and_stack_roundtrip() {
        let t = arange(vec![3, 2, 2]);
        let parts: Vec<_> = (0..3).map(|i| t.index_axis0(i).unwrap()).collect();
        assert_eq!(parts[1].as_slice(), &[4., 5., 6., 7.]);
        assert_eq!(PointsTensor::stack(&parts).unwrap(), t);
        assert!(t.index_axis0(3).is_err());
    }

    #[test]
    fn test_stack_shape_mismatch() {
        let err = PointsTensor::stack(&[arange(vec![2, 2]), arange(vec![3, 2])]).unwrap_err();
        assert!(matches!(err, CameraModelError::ShapeMismatch(_)));
        assert!(PointsTensor::stack(&[]).is_err());
    }

    #[test]
    fn test_reshape() {
        let t = arange(vec![2, 3]).reshape(vec![3, 2]).unwrap();
        assert_eq!(t.point2(2), Vector2::new(4., 5.));
        assert!(t.reshape(vec![4, 2]).is_err());
    }

    #[test]
    fn test_point_accessors() {
        let t = PointsTensor::from_points3(&[2], &[Vector3::new(1., 2., 3.), Vector3::new(4., 5., 6.)])
            .unwrap();
        assert_eq!(t.shape(), &[2, 3]);
        assert_eq!(t.point3(1), Vector3::new(4., 5., 6.));
        assert_eq!(t.iter_points3().count(), 2);
    }
}
