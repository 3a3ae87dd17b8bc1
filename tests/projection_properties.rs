use approx::assert_relative_eq;
use distortion_tools::calibration::{compute_reprojection_error, project_calibration_rig};
use distortion_tools::geometry::RigidTransform;
use distortion_tools::projection::{project, project_point, unproject};
use distortion_tools::{CameraIntrinsics, CameraModelError, DistortionModel, PointsTensor};
use nalgebra::Vector3;

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

const CORE: [f64; 4] = [500.0, 500.0, 320.0, 240.0];

fn with_core(distortions: &[f64]) -> Vec<f64> {
    CORE.iter().chain(distortions).copied().collect()
}

/// A plausible parameter vector for every model.
fn parameters(model: DistortionModel) -> Vec<f64> {
    let distortions: &[f64] = match model {
        DistortionModel::None => &[],
        DistortionModel::Poly4 => &[-0.2, 0.05, 0.001, -0.001],
        DistortionModel::Poly5 => &[-0.2, 0.05, 0.001, -0.001, 0.01],
        DistortionModel::Poly8 => &[-0.2, 0.05, 0.001, -0.001, 0.01, 0.1, 0.01, 0.001],
        DistortionModel::Poly12 => &[
            -0.2, 0.05, 0.001, -0.001, 0.01, 0.1, 0.01, 0.001, 0.001, 0.0, -0.001, 0.0,
        ],
        DistortionModel::Poly14 => &[
            -0.2, 0.05, 0.001, -0.001, 0.01, 0.1, 0.01, 0.001, 0.001, 0.0, -0.001, 0.0, 0.01,
            -0.01,
        ],
        DistortionModel::Cahvor => &[0.01, 0.02, 0.0, 0.1, -0.02],
        DistortionModel::Cahvore => &[0.01, 0.02, 0.0, 0.02, -0.01, 0.01, 0.0, 0.0, 1.0],
    };
    with_core(distortions)
}

fn single(intrinsics: &[f64]) -> PointsTensor {
    PointsTensor::new(vec![intrinsics.len()], intrinsics.to_vec()).unwrap()
}

fn field_of_view_points() -> PointsTensor {
    let points: Vec<Vector3<f64>> = [-0.3_f64, -0.1, 0.0, 0.15, 0.3]
        .iter()
        .flat_map(|&x| {
            [-0.25, 0.0, 0.2]
                .iter()
                .map(move |&y| Vector3::new(x, y, 1.0 + x.abs()))
        })
        .collect();
    PointsTensor::from_points3(&[5, 3], &points).unwrap()
}

#[test]
fn test_round_trip_every_model() {
    init_logger();
    let points = field_of_view_points();
    for model in DistortionModel::ALL {
        let params = parameters(model);
        let pixels = project(&points, model, &single(&params), false).unwrap().points;
        assert_eq!(pixels.shape(), &[5, 3, 2]);

        let intrinsics = CameraIntrinsics::new(model, &params).unwrap();
        let rays = unproject(&pixels, &intrinsics).unwrap();
        assert_eq!(rays.shape(), &[5, 3, 3]);

        for (ray, point) in rays.iter_points3().zip(points.iter_points3()) {
            assert_relative_eq!(ray.norm(), 1.0, epsilon = 1e-12);
            assert!(
                ray.cross(&point.normalize()).norm() < 1e-5,
                "{model}: ray {ray:?} not parallel to {point:?}"
            );
        }
    }
}

#[test]
fn test_cahvore_reduces_to_cahvor() {
    init_logger();
    let points = field_of_view_points();
    let cahvor = parameters(DistortionModel::Cahvor);
    let mut cahvore = cahvor.clone();
    cahvore.extend_from_slice(&[0.0, 0.0, 0.0, 1.0]);

    let a = project(&points, DistortionModel::Cahvor, &single(&cahvor), false).unwrap();
    let b = project(&points, DistortionModel::Cahvore, &single(&cahvore), false).unwrap();
    for (p, q) in a.points.iter_points2().zip(b.points.iter_points2()) {
        assert_relative_eq!(p, q, epsilon = 1e-6);
    }
}

fn rig_points(frames: usize, cameras: usize, n: usize) -> PointsTensor {
    let count = frames * cameras * n * n;
    let points: Vec<Vector3<f64>> = (0..count)
        .map(|i| {
            let t = i as f64 / count as f64;
            Vector3::new(0.4 * t - 0.2, 0.1 - 0.3 * t, 1.5 + t)
        })
        .collect();
    PointsTensor::from_points3(&[frames, cameras, n, n], &points).unwrap()
}

fn rig_intrinsics(model: DistortionModel, cameras: usize, shape: Vec<usize>) -> PointsTensor {
    let values: Vec<f64> = (0..cameras)
        .flat_map(|c| {
            let mut p = parameters(model);
            p[0] += 20.0 * c as f64;
            p
        })
        .collect();
    PointsTensor::new(shape, values).unwrap()
}

#[test]
fn test_rig_broadcasting() {
    init_logger();
    let (frames, cameras, n) = (2, 3, 4);
    let points = rig_points(frames, cameras, n);
    for model in [DistortionModel::Cahvore, DistortionModel::Poly8] {
        let nintr = model.intrinsic_count();
        let intrinsics = rig_intrinsics(model, cameras, vec![cameras, 1, 1, nintr]);
        let projected = project(&points, model, &intrinsics, false).unwrap().points;
        assert_eq!(projected.shape(), &[frames, cameras, n, n, 2]);

        // Frame 1, camera 2, dot (3, 1).
        let flat = ((cameras + 2) * n + 3) * n + 1;
        let camera = CameraIntrinsics::new(model, &intrinsics.as_slice()[2 * nintr..3 * nintr]).unwrap();
        let expected = project_point(&points.point3(flat), &camera).unwrap();
        assert_relative_eq!(projected.point2(flat), expected, epsilon = 1e-9);
    }
}

#[test]
fn test_rig_broadcasting_with_camera_intrinsics() {
    init_logger();
    // (C, Nintrinsics) against (F, C, n, n, 3) projects camera c with intrinsics[c].
    for (model, n) in [(DistortionModel::None, 4), (DistortionModel::Cahvor, 4), (DistortionModel::Poly5, 3)] {
        let nintr = model.intrinsic_count();
        let points = rig_points(2, 3, n);
        let intrinsics = rig_intrinsics(model, 3, vec![3, nintr]);
        let projected = project(&points, model, &intrinsics, false).unwrap().points;
        assert_eq!(projected.shape(), &[2, 3, n, n, 2]);

        for (frame, camera, i, j) in [(0, 0, 0, 0), (1, 2, n - 1, 1), (0, 1, 2, n - 1)] {
            let flat = ((frame * 3 + camera) * n + i) * n + j;
            let expected = project_point(
                &points.point3(flat),
                &CameraIntrinsics::new(model, intrinsics.point(camera)).unwrap(),
            )
            .unwrap();
            assert_relative_eq!(projected.point2(flat), expected, epsilon = 1e-9);
        }
    }
}

#[test]
fn test_two_broadcast_axes_unsupported() {
    init_logger();
    let model = DistortionModel::Cahvore;
    let nintr = model.intrinsic_count();
    let points = rig_points(2, 3, 4);
    let intrinsics = rig_intrinsics(model, 6, vec![2, 3, 1, 1, nintr]);
    let err = project(&points, model, &intrinsics, false).unwrap_err();
    assert!(matches!(err, CameraModelError::UnsupportedBroadcast(_)));
}

#[test]
fn test_empty_input_never_raises() {
    init_logger();
    for model in DistortionModel::ALL {
        let empty = PointsTensor::zeros(vec![0, 5, 3]).unwrap();
        let out = project(&empty, model, &single(&parameters(model)), false).unwrap();
        assert_eq!(out.points.shape(), &[0, 5, 2]);
        assert!(out.gradients.is_none());
    }
}

#[test]
fn test_cahvore_out_of_bounds() {
    init_logger();
    let mut params = parameters(DistortionModel::Cahvore);
    params[4..].copy_from_slice(&[0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 4.0]);
    let points = PointsTensor::from_points3(&[1], &[Vector3::new(0.6, 0.0, 1.0)]).unwrap();
    let err = project(&points, DistortionModel::Cahvore, &single(&params), false).unwrap_err();
    match err {
        CameraModelError::OutOfBoundsError { theta, linearity } => {
            assert_relative_eq!(theta, 0.6f64.atan(), epsilon = 1e-6);
            assert_eq!(linearity, 4.0);
        }
        other => panic!("expected OutOfBoundsError, got {other:?}"),
    }
}

#[test]
fn test_gradients_shapes_and_cahvore_refusal() {
    init_logger();
    let points = field_of_view_points();
    let params = parameters(DistortionModel::Poly14);
    let out = project(&points, DistortionModel::Poly14, &single(&params), true).unwrap();
    let gradients = out.gradients.unwrap();
    assert_eq!(gradients.d_intrinsics.shape(), &[5, 3, 2, 18]);
    assert_eq!(gradients.d_points.shape(), &[5, 3, 2, 3]);

    let err = project(
        &points,
        DistortionModel::Cahvore,
        &single(&parameters(DistortionModel::Cahvore)),
        true,
    )
    .unwrap_err();
    assert!(matches!(err, CameraModelError::GradientsUnsupported(_)));
}

#[test]
fn test_outlier_masking() {
    init_logger();
    let model = DistortionModel::Cahvor;
    let n = 3;
    let intrinsics = rig_intrinsics(model, 2, vec![2, model.intrinsic_count()]);
    let extrinsics = [RigidTransform::new(
        Vector3::new(0.0, 0.02, 0.0),
        Vector3::new(-0.1, 0.0, 0.0),
    )];
    let frames = [
        RigidTransform::new(Vector3::new(0.1, 0.0, 0.0), Vector3::new(-0.05, -0.05, 1.0)),
        RigidTransform::new(Vector3::new(0.0, -0.1, 0.05), Vector3::new(-0.05, -0.05, 1.2)),
    ];
    let projected =
        project_calibration_rig(model, &intrinsics, &extrinsics, &frames, 0.05, n).unwrap();
    assert_eq!(projected.shape(), &[2, 2, n, n, 2]);

    // Observations: (frame 0, cam 0), (frame 1, cam 0), (frame 1, cam 1), each off by 0.5 px in x.
    let indices = [(0, 0), (1, 0), (1, 1)];
    let block = n * n * 2;
    let mut observed = Vec::new();
    for &(frame, camera) in &indices {
        let start = (frame * 2 + camera) * block;
        observed.extend(
            projected.as_slice()[start..start + block]
                .chunks(2)
                .flat_map(|p| [p[0] - 0.5, p[1]]),
        );
    }
    let observations = PointsTensor::new(vec![3, n, n, 2], observed).unwrap();

    let outliers: Vec<usize> = (n * n..2 * n * n).collect();
    let errors = compute_reprojection_error(&projected, &observations, &indices, &outliers).unwrap();

    for i in 0..3 * n * n {
        let raw = errors.all_points.point2(i);
        assert_relative_eq!(raw.x, 0.5, epsilon = 1e-9);
        assert_relative_eq!(raw.y, 0.0, epsilon = 1e-9);

        let masked = errors.ignoring_outliers.point2(i);
        if outliers.contains(&i) {
            assert_eq!(masked.x, 0.0);
            assert_eq!(masked.y, 0.0);
        } else {
            assert_eq!(masked, raw);
        }
    }

    let stats = errors.stats(true).unwrap();
    assert_relative_eq!(stats.rmse, 0.5, epsilon = 1e-9);
}
