//! Levenberg-Marquardt refinement of camera poses and object points.
//!
//! Both solvers work in the inverted flipped convention and re-weight residuals each iteration
//! (IRLS) with the chosen [`EstimatorType`]. Reported errors are average squared pixel errors.

use nalgebra::{Matrix2x6, Matrix6, Vector6};

use super::{EstimatorType, GravityConstraints};
use crate::camera::{is_object_point_in_front_if, CameraTrait};
use crate::global_types::{HomogenousMatrix4, Matrix3, Vector2, Vector3, NUMERIC_EPS};
use crate::utility::Utility;

/// Damping above this value means the solver cannot make progress anymore.
const MAX_LAMBDA: f64 = 1e8;
/// Relative improvement below which the optimization is treated as converged.
const CONVERGENCE_RATIO: f64 = 1e-10;

#[derive(Debug, Clone)]
pub struct PoseOptimization {
    pub flipped_camera_t_world: HomogenousMatrix4,
    pub initial_error: f64,
    pub final_error: f64,
    /// Number of accepted iterations.
    pub iterations: usize,
}

#[derive(Debug, Clone)]
pub struct ObjectPointOptimization {
    pub object_point: Vector3,
    pub initial_error: f64,
    pub final_error: f64,
}

fn average(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::MAX;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

fn robust_sum(estimator: EstimatorType, sqr_errors: &[f64], sigma: f64) -> f64 {
    sqr_errors
        .iter()
        .map(|sqr_error| estimator.robust_error(*sqr_error, sigma))
        .sum()
}

/// Squared projection errors of the selected correspondences, `None` if one point is not in front.
fn pose_sqr_errors<C: CameraTrait + ?Sized>(
    camera: &C,
    flipped_camera_t_world: &HomogenousMatrix4,
    object_points: &[Vector3],
    image_points: &[Vector2],
    indices: &[usize],
) -> Option<Vec<f64>> {
    let mut sqr_errors = Vec::with_capacity(indices.len());
    for &index in indices {
        let camera_point = flipped_camera_t_world.transform_point(&object_points[index].into());
        if camera_point.z <= NUMERIC_EPS {
            return None;
        }
        let projected = camera.project_to_image_if_camera_point(&camera_point.coords);
        sqr_errors.push((projected - image_points[index]).norm_squared());
    }
    Some(sqr_errors)
}

fn gravity_sqr_error(gravity: Option<&GravityConstraints>, flipped_camera_t_world: &HomogenousMatrix4) -> f64 {
    gravity.map_or(0.0, |gravity| {
        let residual = gravity.world_gravity_in_flipped_camera_if(flipped_camera_t_world)
            - gravity.camera_gravity_in_flipped_camera();
        gravity.weight_factor() * residual.norm_squared()
    })
}

/// Optimizes a 6-DOF camera pose given 2D/3D correspondences.
///
/// Correspondences behind the initial pose are ignored, steps moving a used point behind the
/// camera are rejected. Returns `None` if fewer than three correspondences can be used.
#[allow(clippy::too_many_arguments)]
pub fn optimize_pose_if<C: CameraTrait + ?Sized>(
    camera: &C,
    flipped_camera_t_world: &HomogenousMatrix4,
    object_points: &[Vector3],
    image_points: &[Vector2],
    iterations: usize,
    estimator: EstimatorType,
    lambda: f64,
    lambda_factor: f64,
    gravity: Option<&GravityConstraints>,
) -> Option<PoseOptimization> {
    debug_assert_eq!(object_points.len(), image_points.len());
    debug_assert!(lambda_factor > 1.0);

    let indices: Vec<usize> = (0..object_points.len())
        .filter(|&index| is_object_point_in_front_if(flipped_camera_t_world, &object_points[index]))
        .collect();
    if indices.len() < 3 {
        return None;
    }

    let mut pose = *flipped_camera_t_world;
    let mut sqr_errors = pose_sqr_errors(camera, &pose, object_points, image_points, &indices)?;
    let initial_error = average(&sqr_errors);
    if !initial_error.is_finite() {
        return None;
    }

    let mut lambda = lambda;
    let mut accepted = 0;

    for _ in 0..iterations {
        let sigma = estimator.determine_sigma(&sqr_errors);
        let current_error =
            robust_sum(estimator, &sqr_errors, sigma) + gravity_sqr_error(gravity, &pose);

        let mut hessian = Matrix6::zeros();
        let mut gradient = Vector6::zeros();

        for (&index, &sqr_error) in indices.iter().zip(sqr_errors.iter()) {
            let camera_point = pose.transform_point(&object_points[index].into()).coords;
            let residual =
                camera.project_to_image_if_camera_point(&camera_point) - image_points[index];
            let point_jacobian = camera.point_jacobian_2x3_if(&camera_point);

            // left perturbation, parameters are [rotation, translation]
            let mut jacobian = Matrix2x6::zeros();
            jacobian
                .fixed_view_mut::<2, 3>(0, 0)
                .copy_from(&(point_jacobian * -Utility::skew_symmetric(&camera_point)));
            jacobian.fixed_view_mut::<2, 3>(0, 3).copy_from(&point_jacobian);

            let weight = estimator.robust_weight(sqr_error, sigma);
            hessian += jacobian.transpose() * jacobian * weight;
            gradient += jacobian.transpose() * residual * weight;
        }

        if let Some(gravity) = gravity {
            let predicted = gravity.world_gravity_in_flipped_camera_if(&pose);
            let residual = predicted - gravity.camera_gravity_in_flipped_camera();
            let rotation_jacobian = -Utility::skew_symmetric(&predicted);

            let weight = gravity.weight_factor();
            let mut rotation_hessian = hessian.fixed_view_mut::<3, 3>(0, 0);
            rotation_hessian += rotation_jacobian.transpose() * rotation_jacobian * weight;
            let mut rotation_gradient = gradient.fixed_rows_mut::<3>(0);
            rotation_gradient += rotation_jacobian.transpose() * residual * weight;
        }

        let mut improved = None;
        while lambda <= MAX_LAMBDA {
            let mut damped = hessian;
            for d in 0..6 {
                damped[(d, d)] = hessian[(d, d)] * (1.0 + lambda) + NUMERIC_EPS;
            }

            let Some(cholesky) = damped.cholesky() else {
                lambda *= lambda_factor;
                continue;
            };
            let delta = cholesky.solve(&-gradient);

            let update = HomogenousMatrix4::from_parts(
                nalgebra::Translation3::from(delta.fixed_rows::<3>(3).into_owned()),
                Utility::delta_quat(delta.fixed_rows::<3>(0).into_owned()),
            );
            let candidate = update * pose;

            if let Some(candidate_errors) =
                pose_sqr_errors(camera, &candidate, object_points, image_points, &indices)
            {
                let candidate_error = robust_sum(estimator, &candidate_errors, sigma)
                    + gravity_sqr_error(gravity, &candidate);
                if candidate_error < current_error {
                    lambda /= lambda_factor;
                    improved = Some((candidate, candidate_errors, candidate_error));
                    break;
                }
            }
            lambda *= lambda_factor;
        }

        let Some((candidate, candidate_errors, candidate_error)) = improved else {
            break;
        };

        pose = candidate;
        sqr_errors = candidate_errors;
        accepted += 1;

        if current_error - candidate_error <= current_error * CONVERGENCE_RATIO {
            break;
        }
    }

    Some(PoseOptimization {
        flipped_camera_t_world: pose,
        initial_error,
        final_error: average(&sqr_errors),
        iterations: accepted,
    })
}

/// Squared projection errors of one object point in several cameras.
fn object_point_sqr_errors<C: CameraTrait + ?Sized>(
    camera: &C,
    flipped_cameras_t_world: &[HomogenousMatrix4],
    object_point: &Vector3,
    image_points: &[Vector2],
    only_front: bool,
) -> Option<Vec<f64>> {
    let mut sqr_errors = Vec::with_capacity(image_points.len());
    for (pose, image_point) in flipped_cameras_t_world.iter().zip(image_points.iter()) {
        let camera_point = pose.transform_point(&(*object_point).into());
        if (only_front && camera_point.z <= NUMERIC_EPS) || camera_point.z.abs() <= NUMERIC_EPS {
            return None;
        }
        let projected = camera.project_to_image_if_camera_point(&camera_point.coords);
        sqr_errors.push((projected - image_point).norm_squared());
    }
    Some(sqr_errors)
}

/// Optimizes the location of one object point observed by several fixed cameras.
///
/// With `only_front`, the point has to stay in front of every camera; a start position behind
/// one of the cameras fails. Returns `None` for fewer than two observations.
#[allow(clippy::too_many_arguments)]
pub fn optimize_object_point_for_fixed_poses_if<C: CameraTrait + ?Sized>(
    camera: &C,
    flipped_cameras_t_world: &[HomogenousMatrix4],
    object_point: &Vector3,
    image_points: &[Vector2],
    iterations: usize,
    estimator: EstimatorType,
    lambda: f64,
    lambda_factor: f64,
    only_front: bool,
) -> Option<ObjectPointOptimization> {
    debug_assert_eq!(flipped_cameras_t_world.len(), image_points.len());
    debug_assert!(lambda_factor > 1.0);

    if image_points.len() < 2 {
        return None;
    }

    let mut point = *object_point;
    let mut sqr_errors =
        object_point_sqr_errors(camera, flipped_cameras_t_world, &point, image_points, only_front)?;
    let initial_error = average(&sqr_errors);
    if !initial_error.is_finite() {
        return None;
    }

    let mut lambda = lambda;

    for _ in 0..iterations {
        let sigma = estimator.determine_sigma(&sqr_errors);
        let current_error = robust_sum(estimator, &sqr_errors, sigma);

        let mut hessian = Matrix3::zeros();
        let mut gradient = Vector3::zeros();

        for ((pose, image_point), &sqr_error) in flipped_cameras_t_world
            .iter()
            .zip(image_points.iter())
            .zip(sqr_errors.iter())
        {
            let camera_point = pose.transform_point(&point.into()).coords;
            let residual = camera.project_to_image_if_camera_point(&camera_point) - image_point;
            let jacobian =
                camera.point_jacobian_2x3_if(&camera_point) * pose.rotation.to_rotation_matrix().matrix();

            let weight = estimator.robust_weight(sqr_error, sigma);
            hessian += jacobian.transpose() * jacobian * weight;
            gradient += jacobian.transpose() * residual * weight;
        }

        let mut improved = None;
        while lambda <= MAX_LAMBDA {
            let mut damped = hessian;
            for d in 0..3 {
                damped[(d, d)] = hessian[(d, d)] * (1.0 + lambda) + NUMERIC_EPS;
            }

            let Some(cholesky) = damped.cholesky() else {
                lambda *= lambda_factor;
                continue;
            };
            let candidate = point + cholesky.solve(&-gradient);

            if let Some(candidate_errors) = object_point_sqr_errors(
                camera,
                flipped_cameras_t_world,
                &candidate,
                image_points,
                only_front,
            ) {
                let candidate_error = robust_sum(estimator, &candidate_errors, sigma);
                if candidate_error < current_error {
                    lambda /= lambda_factor;
                    improved = Some((candidate, candidate_errors, candidate_error));
                    break;
                }
            }
            lambda *= lambda_factor;
        }

        let Some((candidate, candidate_errors, candidate_error)) = improved else {
            break;
        };

        point = candidate;
        sqr_errors = candidate_errors;

        if current_error - candidate_error <= current_error * CONVERGENCE_RATIO {
            break;
        }
    }

    Some(ObjectPointOptimization {
        object_point: point,
        initial_error,
        final_error: average(&sqr_errors),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::PinholeCamera;
    use crate::geometry::{look_at, standard_to_inverted_flipped};

    fn grid_points() -> Vec<Vector3> {
        let mut points = vec![];
        for x in -2..=2 {
            for y in -2..=2 {
                points.push(Vector3::new(x as f64 * 0.5, y as f64 * 0.4, ((x + y) % 3) as f64 * 0.3));
            }
        }
        points
    }

    #[test]
    fn test_optimize_pose_recovers_disturbed_pose() {
        let camera = PinholeCamera::ideal(640, 480, 500.0, 500.0, 320.0, 240.0);
        let world_t_camera = look_at(&Vector3::new(0.5, 0.3, 6.0), &Vector3::zeros(), &Vector3::y());
        let flipped = standard_to_inverted_flipped(&world_t_camera);

        let object_points = grid_points();
        let image_points: Vec<Vector2> = object_points
            .iter()
            .map(|p| camera.project_to_image_if(&flipped, p))
            .collect();

        let disturbance = HomogenousMatrix4::from_parts(
            nalgebra::Translation3::new(0.05, -0.04, 0.1),
            nalgebra::UnitQuaternion::from_euler_angles(0.02, -0.01, 0.015),
        );
        let initial = disturbance * flipped;

        let result = optimize_pose_if(
            &camera,
            &initial,
            &object_points,
            &image_points,
            50,
            EstimatorType::Square,
            0.001,
            5.0,
            None,
        )
        .unwrap();

        assert!(result.initial_error > 1.0);
        assert!(result.final_error < 1e-8, "final error {}", result.final_error);
        assert!(
            (result.flipped_camera_t_world.to_homogeneous() - flipped.to_homogeneous()).norm() < 1e-5
        );
    }

    #[test]
    fn test_optimize_pose_with_outlier() {
        let camera = PinholeCamera::ideal(640, 480, 500.0, 500.0, 320.0, 240.0);
        let world_t_camera = look_at(&Vector3::new(-0.5, 0.2, 5.0), &Vector3::zeros(), &Vector3::y());
        let flipped = standard_to_inverted_flipped(&world_t_camera);

        let object_points = grid_points();
        let mut image_points: Vec<Vector2> = object_points
            .iter()
            .map(|p| camera.project_to_image_if(&flipped, p))
            .collect();
        image_points[3] += Vector2::new(60.0, -45.0);

        let initial = HomogenousMatrix4::from_parts(
            nalgebra::Translation3::new(0.02, 0.02, -0.05),
            nalgebra::UnitQuaternion::from_euler_angles(-0.01, 0.01, 0.0),
        ) * flipped;

        let result = optimize_pose_if(
            &camera,
            &initial,
            &object_points,
            &image_points,
            50,
            EstimatorType::Tukey,
            0.001,
            5.0,
            None,
        )
        .unwrap();

        for (index, (object_point, image_point)) in
            object_points.iter().zip(image_points.iter()).enumerate()
        {
            if index == 3 {
                continue;
            }
            let projected = camera.project_to_image_if(&result.flipped_camera_t_world, object_point);
            assert!((projected - image_point).norm() < 0.5);
        }
    }

    #[test]
    fn test_optimize_pose_with_gravity() {
        let camera = PinholeCamera::ideal(640, 480, 500.0, 500.0, 320.0, 240.0);
        let world_t_camera = look_at(&Vector3::new(0.0, 0.0, 5.0), &Vector3::zeros(), &Vector3::y());
        let flipped = standard_to_inverted_flipped(&world_t_camera);

        let object_points = grid_points();
        let image_points: Vec<Vector2> = object_points
            .iter()
            .map(|p| camera.project_to_image_if(&flipped, p))
            .collect();

        let gravity =
            GravityConstraints::with_default_world_gravity(-Vector3::y(), 100.0, 0.1).unwrap();
        let initial = HomogenousMatrix4::from_parts(
            nalgebra::Translation3::identity(),
            nalgebra::UnitQuaternion::from_euler_angles(0.0, 0.0, 0.05),
        ) * flipped;

        let result = optimize_pose_if(
            &camera,
            &initial,
            &object_points,
            &image_points,
            50,
            EstimatorType::Huber,
            0.001,
            5.0,
            Some(&gravity),
        )
        .unwrap();

        assert!(gravity.angle_if(&result.flipped_camera_t_world) < 1e-4);
        assert!(result.final_error < 1e-6);
    }

    #[test]
    fn test_optimize_pose_not_enough_points() {
        let camera = PinholeCamera::ideal(640, 480, 500.0, 500.0, 320.0, 240.0);
        let flipped = standard_to_inverted_flipped(&look_at(
            &Vector3::new(0.0, 0.0, 5.0),
            &Vector3::zeros(),
            &Vector3::y(),
        ));
        let object_points = vec![Vector3::zeros(), Vector3::x()];
        let image_points: Vec<Vector2> = object_points
            .iter()
            .map(|p| camera.project_to_image_if(&flipped, p))
            .collect();
        assert!(optimize_pose_if(
            &camera,
            &flipped,
            &object_points,
            &image_points,
            10,
            EstimatorType::Square,
            0.001,
            5.0,
            None
        )
        .is_none());
    }

    #[test]
    fn test_optimize_object_point() {
        let camera = PinholeCamera::ideal(640, 480, 500.0, 500.0, 320.0, 240.0);
        let object_point = Vector3::new(0.2, -0.1, 0.3);

        let poses: Vec<HomogenousMatrix4> = [-1.0, 0.0, 1.0]
            .iter()
            .map(|x| {
                standard_to_inverted_flipped(&look_at(
                    &Vector3::new(*x, 0.2, 4.0),
                    &Vector3::zeros(),
                    &Vector3::y(),
                ))
            })
            .collect();
        let image_points: Vec<Vector2> = poses
            .iter()
            .map(|pose| camera.project_to_image_if(pose, &object_point))
            .collect();

        let result = optimize_object_point_for_fixed_poses_if(
            &camera,
            &poses,
            &(object_point + Vector3::new(0.1, 0.05, -0.2)),
            &image_points,
            30,
            EstimatorType::Square,
            0.001,
            5.0,
            true,
        )
        .unwrap();

        assert!((result.object_point - object_point).norm() < 1e-6);
        assert!(result.final_error < result.initial_error);

        assert!(optimize_object_point_for_fixed_poses_if(
            &camera,
            &poses[..1],
            &object_point,
            &image_points[..1],
            30,
            EstimatorType::Square,
            0.001,
            5.0,
            true,
        )
        .is_none());
    }
}
