//! RANSAC pose estimation on top of the P3P minimal solver.

use rand::Rng;

use super::non_linear_optimization::optimize_pose_if;
use super::{inverted_flipped_to_standard, p3p, EstimatorType, GravityConstraints};
use crate::camera::CameraTrait;
use crate::config::{OPTIMIZATION_LAMBDA, OPTIMIZATION_LAMBDA_FACTOR};
use crate::global_types::{HomogenousMatrix4, Vector2, Vector3, NUMERIC_EPS};

/// Iterations of the least squares refinement on the consensus set.
const REFINEMENT_ITERATIONS: usize = 20;

#[derive(Debug, Clone)]
pub struct RansacResult {
    /// Camera pose in the standard convention.
    pub world_t_camera: HomogenousMatrix4,
    /// Indices of the inlier correspondences, strictly increasing.
    pub used_indices: Vec<usize>,
    /// Average squared projection error of the inliers.
    pub sqr_error: f64,
}

/// Correspondences in front of the camera with a squared projection error within the threshold.
///
/// Returns the sorted inlier indices and their summed squared error.
pub fn determine_inliers<C: CameraTrait + ?Sized>(
    camera: &C,
    flipped_camera_t_world: &HomogenousMatrix4,
    object_points: &[Vector3],
    image_points: &[Vector2],
    sqr_pixel_error_threshold: f64,
) -> (Vec<usize>, f64) {
    let mut indices = Vec::with_capacity(object_points.len());
    let mut sqr_error_sum = 0.0;

    for (index, (object_point, image_point)) in
        object_points.iter().zip(image_points.iter()).enumerate()
    {
        let camera_point = flipped_camera_t_world.transform_point(&(*object_point).into());
        if camera_point.z <= NUMERIC_EPS {
            continue;
        }
        let sqr_error = (camera.project_to_image_if_camera_point(&camera_point.coords)
            - image_point)
            .norm_squared();
        if sqr_error <= sqr_pixel_error_threshold {
            indices.push(index);
            sqr_error_sum += sqr_error;
        }
    }

    (indices, sqr_error_sum)
}

fn is_better(candidate: &(Vec<usize>, f64), best: &(Vec<usize>, f64)) -> bool {
    candidate.0.len() > best.0.len() || (candidate.0.len() == best.0.len() && candidate.1 < best.1)
}

/// Determines a camera pose from 2D/3D correspondences with RANSAC over P3P hypotheses.
///
/// Hypotheses contradicting the optional gravity constraint are discarded. The random generator
/// is owned by the caller so that concurrent estimations do not share state.
#[allow(clippy::too_many_arguments)]
pub fn p3p<C, R>(
    camera: &C,
    object_points: &[Vector3],
    image_points: &[Vector2],
    rng: &mut R,
    minimal_valid_correspondences: usize,
    refine: bool,
    iterations: usize,
    sqr_pixel_error_threshold: f64,
    gravity: Option<&GravityConstraints>,
) -> Option<RansacResult>
where
    C: CameraTrait + ?Sized,
    R: Rng + ?Sized,
{
    debug_assert_eq!(object_points.len(), image_points.len());

    let minimal_valid_correspondences = minimal_valid_correspondences.max(3);
    if object_points.len() < minimal_valid_correspondences {
        return None;
    }

    let bearings: Vec<Vector3> = image_points.iter().map(|p| camera.vector_if(p)).collect();

    let mut best: Option<(HomogenousMatrix4, (Vec<usize>, f64))> = None;

    for _ in 0..iterations {
        let sample = rand::seq::index::sample(rng, object_points.len(), 3);
        let (i0, i1, i2) = (sample.index(0), sample.index(1), sample.index(2));

        let candidates = p3p::poses(
            &[object_points[i0], object_points[i1], object_points[i2]],
            &[bearings[i0], bearings[i1], bearings[i2]],
        );

        for flipped_camera_t_world in candidates {
            if let Some(gravity) = gravity {
                if !gravity.is_satisfied_if(&flipped_camera_t_world) {
                    continue;
                }
            }

            let consensus = determine_inliers(
                camera,
                &flipped_camera_t_world,
                object_points,
                image_points,
                sqr_pixel_error_threshold,
            );
            if best.as_ref().map_or(true, |(_, best)| is_better(&consensus, best)) {
                best = Some((flipped_camera_t_world, consensus));
            }
        }

        if best
            .as_ref()
            .is_some_and(|(_, (indices, _))| indices.len() == object_points.len())
        {
            break;
        }
    }

    let (mut flipped_camera_t_world, (mut indices, mut sqr_error_sum)) = best?;
    if indices.len() < minimal_valid_correspondences {
        log::debug!(
            "RANSAC found {} inliers, {} needed",
            indices.len(),
            minimal_valid_correspondences
        );
        return None;
    }

    if refine {
        let inlier_object_points: Vec<Vector3> = indices.iter().map(|&i| object_points[i]).collect();
        let inlier_image_points: Vec<Vector2> = indices.iter().map(|&i| image_points[i]).collect();

        if let Some(optimization) = optimize_pose_if(
            camera,
            &flipped_camera_t_world,
            &inlier_object_points,
            &inlier_image_points,
            REFINEMENT_ITERATIONS,
            EstimatorType::Square,
            OPTIMIZATION_LAMBDA,
            OPTIMIZATION_LAMBDA_FACTOR,
            gravity,
        ) {
            let (refined_indices, refined_sqr_error_sum) = determine_inliers(
                camera,
                &optimization.flipped_camera_t_world,
                object_points,
                image_points,
                sqr_pixel_error_threshold,
            );
            if refined_indices.len() >= indices.len() {
                flipped_camera_t_world = optimization.flipped_camera_t_world;
                indices = refined_indices;
                sqr_error_sum = refined_sqr_error_sum;
            }
        }
    }

    let sqr_error = sqr_error_sum / indices.len() as f64;

    Some(RansacResult {
        world_t_camera: inverted_flipped_to_standard(&flipped_camera_t_world),
        used_indices: indices,
        sqr_error,
    })
}

#[cfg(test)]
mod tests {
    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    use super::*;
    use crate::camera::PinholeCamera;
    use crate::geometry::{look_at, standard_to_inverted_flipped};

    fn scene(rng: &mut SmallRng, count: usize) -> Vec<Vector3> {
        (0..count)
            .map(|_| {
                Vector3::new(
                    rng.gen_range(-2.0..2.0),
                    rng.gen_range(-1.5..1.5),
                    rng.gen_range(-1.0..1.0),
                )
            })
            .collect()
    }

    #[test]
    fn test_p3p_ransac_with_outliers() {
        let mut rng = SmallRng::seed_from_u64(7);
        let camera = PinholeCamera::ideal(640, 480, 500.0, 500.0, 320.0, 240.0);
        let world_t_camera = look_at(&Vector3::new(1.0, 0.5, 6.0), &Vector3::zeros(), &Vector3::y());
        let flipped = standard_to_inverted_flipped(&world_t_camera);

        let object_points = scene(&mut rng, 60);
        let mut image_points: Vec<Vector2> = object_points
            .iter()
            .map(|p| camera.project_to_image_if(&flipped, p))
            .collect();

        let outliers = [2usize, 11, 17, 23, 31, 42, 55];
        for &index in &outliers {
            image_points[index] += Vector2::new(40.0, -35.0);
        }

        let result = p3p(
            &camera,
            &object_points,
            &image_points,
            &mut rng,
            5,
            true,
            50,
            3.0 * 3.0,
            None,
        )
        .unwrap();

        assert_eq!(result.used_indices.len(), object_points.len() - outliers.len());
        assert!(outliers.iter().all(|i| !result.used_indices.contains(i)));
        assert!(result.used_indices.windows(2).all(|w| w[0] < w[1]));
        assert!(result.sqr_error < 1e-6);
        assert!(
            (result.world_t_camera.to_homogeneous() - world_t_camera.to_homogeneous()).norm() < 1e-4
        );
    }

    #[test]
    fn test_p3p_ransac_too_few_correspondences() {
        let mut rng = SmallRng::seed_from_u64(1);
        let camera = PinholeCamera::ideal(640, 480, 500.0, 500.0, 320.0, 240.0);
        let object_points = vec![Vector3::zeros(), Vector3::x(), Vector3::y(), Vector3::z()];
        let image_points = vec![Vector2::new(320.0, 240.0); 4];

        assert!(p3p(
            &camera,
            &object_points,
            &image_points,
            &mut rng,
            5,
            true,
            50,
            9.0,
            None
        )
        .is_none());
    }

    #[test]
    fn test_p3p_ransac_rejects_wrong_gravity() {
        let mut rng = SmallRng::seed_from_u64(3);
        let camera = PinholeCamera::ideal(640, 480, 500.0, 500.0, 320.0, 240.0);
        let world_t_camera = look_at(&Vector3::new(0.0, 0.0, 6.0), &Vector3::zeros(), &Vector3::y());
        let flipped = standard_to_inverted_flipped(&world_t_camera);

        let object_points = scene(&mut rng, 30);
        let image_points: Vec<Vector2> = object_points
            .iter()
            .map(|p| camera.project_to_image_if(&flipped, p))
            .collect();

        // the camera is upright, a measurement claiming gravity along +x contradicts every hypothesis
        let gravity =
            GravityConstraints::with_default_world_gravity(Vector3::x(), 1.0, 0.2).unwrap();
        assert!(p3p(
            &camera,
            &object_points,
            &image_points,
            &mut rng,
            5,
            true,
            50,
            9.0,
            Some(&gravity)
        )
        .is_none());

        let gravity =
            GravityConstraints::with_default_world_gravity(-Vector3::y(), 1.0, 0.2).unwrap();
        assert!(p3p(
            &camera,
            &object_points,
            &image_points,
            &mut rng,
            5,
            true,
            50,
            9.0,
            Some(&gravity)
        )
        .is_some());
    }
}
