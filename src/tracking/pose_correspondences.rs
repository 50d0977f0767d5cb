use rand::Rng;

use super::camera_pose::{CameraPose, PoseQuality, SharedCameraPose};
use super::localized_object_point::LocalizationPrecision;
use super::pose_quality_calculator::PoseQualityCalculator;
use super::subset::{compact_in_place, CorrespondenceSubset};
use super::tracking_correspondences::TrackingCorrespondences;
use crate::camera::CameraTrait;
use crate::config::{
    OPTIMIZATION_LAMBDA, OPTIMIZATION_LAMBDA_FACTOR, POSE_OPTIMIZATION_ITERATIONS,
    RANSAC_ITERATIONS, RANSAC_MINIMAL_CORRESPONDENCES,
};
use crate::geometry::non_linear_optimization::optimize_pose_if;
use crate::geometry::{
    inverted_flipped_to_standard, ransac, standard_to_inverted_flipped, EstimatorType,
    GravityConstraints,
};
use crate::global_types::{HomogenousMatrix4, MapVersion, ObjectPointId, Vector2, Vector3};

/// 2D/3D correspondences of the current frame, rebuilt for every frame.
#[derive(Debug, Clone)]
pub struct PoseCorrespondences {
    map_version: MapVersion,

    object_points: Vec<Vector3>,
    image_points: Vec<Vector2>,
    object_point_ids: Vec<ObjectPointId>,
    precisions: Vec<LocalizationPrecision>,
    /// Squared distance between the previous and the current image point.
    image_point_sqr_distances: Vec<f64>,

    precise_object_point_ids: Vec<ObjectPointId>,
    imprecise_object_point_ids: Vec<ObjectPointId>,
    outlier_object_point_ids: Vec<ObjectPointId>,

    /// Average squared projection error of the last pose, infinite without inliers.
    robust_error: f64,
}

impl Default for PoseCorrespondences {
    fn default() -> Self {
        Self {
            map_version: 0,
            object_points: vec![],
            image_points: vec![],
            object_point_ids: vec![],
            precisions: vec![],
            image_point_sqr_distances: vec![],
            precise_object_point_ids: vec![],
            imprecise_object_point_ids: vec![],
            outlier_object_point_ids: vec![],
            robust_error: f64::INFINITY,
        }
    }
}

impl CorrespondenceSubset for PoseCorrespondences {
    fn object_point_ids(&self) -> &[ObjectPointId] {
        &self.object_point_ids
    }

    fn compact(&mut self, sorted_indices: &[usize]) {
        compact_in_place(&mut self.object_points, sorted_indices);
        compact_in_place(&mut self.image_points, sorted_indices);
        compact_in_place(&mut self.object_point_ids, sorted_indices);
        compact_in_place(&mut self.precisions, sorted_indices);
        compact_in_place(&mut self.image_point_sqr_distances, sorted_indices);
    }
}

impl PoseCorrespondences {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces all correspondences with the valid ones of the frame to frame tracking.
    pub fn reset(&mut self, tracking_correspondences: &TrackingCorrespondences) {
        self.object_points.clear();
        self.image_points.clear();
        self.object_point_ids.clear();
        self.precisions.clear();
        self.image_point_sqr_distances.clear();
        self.precise_object_point_ids.clear();
        self.imprecise_object_point_ids.clear();
        self.outlier_object_point_ids.clear();
        self.robust_error = f64::INFINITY;

        self.map_version = tracking_correspondences.map_version();

        let valid_correspondences = tracking_correspondences.valid_correspondences();
        for index in 0..tracking_correspondences.len() {
            if !valid_correspondences[index] {
                continue;
            }
            let previous_image_point = tracking_correspondences.previous_image_points()[index];
            let current_image_point = tracking_correspondences.current_image_points()[index];

            self.object_points.push(tracking_correspondences.object_points()[index]);
            self.image_points.push(current_image_point);
            self.object_point_ids.push(tracking_correspondences.object_point_ids()[index]);
            self.precisions.push(tracking_correspondences.object_point_precisions()[index]);
            self.image_point_sqr_distances
                .push((current_image_point - previous_image_point).norm_squared());
        }
    }

    /// Determines the pose of the current frame.
    ///
    /// Without a previous pose, the initial pose is determined with RANSAC. The pose is refined
    /// with a robust estimator afterwards, all correspondences are reduced to the inliers.
    #[allow(clippy::too_many_arguments)]
    pub fn determine_pose<C, R>(
        &mut self,
        camera: &C,
        world_t_previous_camera: Option<&HomogenousMatrix4>,
        min_correspondences: usize,
        rng: &mut R,
        max_projection_error: f64,
        estimator: EstimatorType,
        gravity: Option<&GravityConstraints>,
    ) -> Option<SharedCameraPose>
    where
        C: CameraTrait + ?Sized,
        R: Rng + ?Sized,
    {
        debug_assert!(estimator.is_robust(), "the refinement needs a robust estimator");

        self.precise_object_point_ids.clear();
        self.imprecise_object_point_ids.clear();
        self.outlier_object_point_ids.clear();
        self.robust_error = f64::INFINITY;

        if self.object_points.len() < min_correspondences {
            log::debug!(
                "{} correspondences, {} needed",
                self.object_points.len(),
                min_correspondences
            );
            return None;
        }

        let sqr_max_projection_error = max_projection_error * max_projection_error;

        let world_t_camera = match world_t_previous_camera {
            Some(world_t_previous_camera) => *world_t_previous_camera,
            None => {
                let Some(result) = ransac::p3p(
                    camera,
                    &self.object_points,
                    &self.image_points,
                    rng,
                    RANSAC_MINIMAL_CORRESPONDENCES,
                    true,
                    RANSAC_ITERATIONS,
                    sqr_max_projection_error,
                    gravity,
                ) else {
                    log::debug!("RANSAC failed for {} correspondences", self.object_points.len());
                    return None;
                };
                result.world_t_camera
            }
        };

        let Some(optimization) = optimize_pose_if(
            camera,
            &standard_to_inverted_flipped(&world_t_camera),
            &self.object_points,
            &self.image_points,
            POSE_OPTIMIZATION_ITERATIONS,
            estimator,
            OPTIMIZATION_LAMBDA,
            OPTIMIZATION_LAMBDA_FACTOR,
            gravity,
        ) else {
            log::debug!("Pose refinement failed");
            return None;
        };
        let flipped_camera_t_world = optimization.flipped_camera_t_world;

        let (inlier_indices, sqr_error_sum) = ransac::determine_inliers(
            camera,
            &flipped_camera_t_world,
            &self.object_points,
            &self.image_points,
            sqr_max_projection_error,
        );

        let world_t_camera = inverted_flipped_to_standard(&flipped_camera_t_world);
        if !inlier_indices.is_empty() {
            self.robust_error = sqr_error_sum / inlier_indices.len() as f64;
        }

        if inlier_indices.len() < min_correspondences {
            log::debug!(
                "{} inliers, {} needed",
                inlier_indices.len(),
                min_correspondences
            );
            return None;
        }

        self.precise_object_point_ids = inlier_indices
            .iter()
            .map(|index| self.object_point_ids[*index])
            .collect();
        self.outlier_object_point_ids = self.apply_subset(&inlier_indices);
        // all correspondences are rated by the projection error only
        self.imprecise_object_point_ids = self.outlier_object_point_ids.clone();

        let pose_quality = PoseQualityCalculator::from_precisions(&self.precisions).pose_quality();
        if pose_quality == PoseQuality::Invalid {
            log::debug!("Pose has invalid quality");
            self.precise_object_point_ids.clear();
            self.imprecise_object_point_ids.clear();
            self.outlier_object_point_ids.clear();
            return None;
        }

        let estimated_motion = CameraPose::motion_from_optical_flow(
            &self.image_point_sqr_distances,
            camera.width(),
            camera.height(),
        );

        Some(SharedCameraPose::new(CameraPose::new(
            world_t_camera,
            pose_quality,
            estimated_motion,
        )))
    }

    pub fn map_version(&self) -> MapVersion {
        self.map_version
    }

    pub fn len(&self) -> usize {
        self.object_point_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.object_point_ids.is_empty()
    }

    pub fn object_points(&self) -> &[Vector3] {
        &self.object_points
    }

    pub fn image_points(&self) -> &[Vector2] {
        &self.image_points
    }

    pub fn precisions(&self) -> &[LocalizationPrecision] {
        &self.precisions
    }

    pub fn precise_object_point_ids(&self) -> &[ObjectPointId] {
        &self.precise_object_point_ids
    }

    pub fn imprecise_object_point_ids(&self) -> &[ObjectPointId] {
        &self.imprecise_object_point_ids
    }

    pub fn outlier_object_point_ids(&self) -> &[ObjectPointId] {
        &self.outlier_object_point_ids
    }

    /// Average squared projection error of the inliers of the last pose.
    pub fn robust_error(&self) -> f64 {
        self.robust_error
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    use super::*;
    use crate::camera::PinholeCamera;
    use crate::geometry::look_at;
    use crate::tracking::camera_pose::EstimatedMotion;

    fn camera() -> PinholeCamera {
        PinholeCamera::ideal(640, 480, 500.0, 500.0, 320.0, 240.0)
    }

    /// Tracking result of `count` points between two camera poses, points in `outliers` are
    /// tracked wrongly.
    fn tracking(
        rng: &mut SmallRng,
        count: u32,
        outliers: &[u32],
        precision: LocalizationPrecision,
        world_t_previous_camera: &HomogenousMatrix4,
        world_t_camera: &HomogenousMatrix4,
    ) -> TrackingCorrespondences {
        let camera = camera();
        let previous = standard_to_inverted_flipped(world_t_previous_camera);
        let current = standard_to_inverted_flipped(world_t_camera);

        let mut correspondences = TrackingCorrespondences::new(2);
        for id in 0..count {
            let object_point = Vector3::new(
                rng.gen_range(-1.5..1.5),
                rng.gen_range(-1.0..1.0),
                rng.gen_range(-1.0..1.0),
            );
            let mut image_point = camera.project_to_image_if(&current, &object_point);
            if outliers.contains(&id) {
                image_point += Vector2::new(25.0, -40.0);
            }
            correspondences.add_correspondence(
                100 + id,
                object_point,
                precision,
                camera.project_to_image_if(&previous, &object_point),
                image_point,
            );
        }
        correspondences
    }

    #[test]
    fn test_reset() {
        let mut rng = SmallRng::seed_from_u64(2);
        let pose = look_at(&Vector3::new(0.0, 0.0, 5.0), &Vector3::zeros(), &Vector3::y());
        let mut tracking = tracking(&mut rng, 6, &[], LocalizationPrecision::Low, &pose, &pose);
        tracking.invalidate(1);
        tracking.invalidate(4);

        let mut correspondences = PoseCorrespondences::new();
        correspondences.reset(&tracking);
        assert_eq!(correspondences.map_version(), 2);
        assert_eq!(correspondences.object_point_ids(), &[100, 102, 103, 105]);
        assert_eq!(correspondences.image_points()[1], tracking.current_image_points()[2]);
        assert!(correspondences.precisions().iter().all(|p| *p == LocalizationPrecision::Low));
        assert!(correspondences.robust_error().is_infinite());
    }

    #[test]
    fn test_determine_pose_needs_enough_correspondences() {
        let mut rng = SmallRng::seed_from_u64(4);
        let pose = look_at(&Vector3::new(0.0, 0.0, 5.0), &Vector3::zeros(), &Vector3::y());
        let tracking = tracking(&mut rng, 15, &[], LocalizationPrecision::High, &pose, &pose);

        let mut correspondences = PoseCorrespondences::new();
        correspondences.reset(&tracking);

        let mut state = rng.clone();
        assert!(correspondences
            .determine_pose(&camera(), None, 16, &mut rng, 3.0, EstimatorType::Huber, None)
            .is_none());
        // no random number was drawn, RANSAC did not run
        assert_eq!(state.gen::<u64>(), rng.gen::<u64>());
        assert_eq!(correspondences.len(), 15);
        assert!(correspondences.robust_error().is_infinite());
    }

    #[test]
    fn test_determine_pose_from_scratch() {
        let mut rng = SmallRng::seed_from_u64(11);
        let world_t_previous_camera =
            look_at(&Vector3::new(0.0, 0.2, 5.0), &Vector3::zeros(), &Vector3::y());
        let world_t_camera = look_at(&Vector3::new(0.4, 0.3, 5.2), &Vector3::zeros(), &Vector3::y());
        let outliers = [3, 17, 29];
        let tracking = tracking(
            &mut rng,
            40,
            &outliers,
            LocalizationPrecision::High,
            &world_t_previous_camera,
            &world_t_camera,
        );

        let mut correspondences = PoseCorrespondences::new();
        correspondences.reset(&tracking);
        let camera_pose = correspondences
            .determine_pose(&camera(), None, 20, &mut rng, 3.0, EstimatorType::Tukey, None)
            .unwrap();

        assert!(
            (camera_pose.world_t_camera().to_homogeneous() - world_t_camera.to_homogeneous()).norm()
                < 1e-4
        );
        assert_eq!(camera_pose.pose_quality(), PoseQuality::High);
        assert_ne!(camera_pose.estimated_motion(), EstimatedMotion::Unknown);
        assert!(correspondences.robust_error() < 1e-6);

        let outlier_ids: Vec<ObjectPointId> = outliers.iter().map(|id| 100 + id).collect();
        assert_eq!(correspondences.outlier_object_point_ids(), outlier_ids.as_slice());
        assert_eq!(correspondences.imprecise_object_point_ids(), outlier_ids.as_slice());
        assert_eq!(correspondences.precise_object_point_ids().len(), 37);
        assert_eq!(correspondences.len(), 37);

        let precise: HashSet<ObjectPointId> =
            correspondences.precise_object_point_ids().iter().copied().collect();
        let outlier: HashSet<ObjectPointId> = outlier_ids.iter().copied().collect();
        assert!(precise.is_disjoint(&outlier));
        assert_eq!(precise.len() + outlier.len(), 40);
    }

    #[test]
    fn test_determine_pose_with_gravity() {
        let mut rng = SmallRng::seed_from_u64(14);
        let world_t_previous_camera =
            look_at(&Vector3::new(0.0, 0.2, 5.0), &Vector3::zeros(), &Vector3::y());
        let world_t_camera = look_at(&Vector3::new(0.4, 0.3, 5.2), &Vector3::zeros(), &Vector3::y());
        let tracking = tracking(
            &mut rng,
            40,
            &[3, 17, 29],
            LocalizationPrecision::High,
            &world_t_previous_camera,
            &world_t_camera,
        );

        // world gravity is the negative y axis
        let camera_gravity = world_t_camera.rotation.inverse() * -Vector3::y();
        let gravity = GravityConstraints::with_default_world_gravity(camera_gravity, 1.0, 0.2).unwrap();

        let mut correspondences = PoseCorrespondences::new();
        correspondences.reset(&tracking);
        let camera_pose = correspondences
            .determine_pose(&camera(), None, 20, &mut rng, 3.0, EstimatorType::Tukey, Some(&gravity))
            .unwrap();

        assert!(
            (camera_pose.world_t_camera().to_homogeneous() - world_t_camera.to_homogeneous()).norm()
                < 1e-4
        );
        assert!(gravity.is_satisfied_if(&standard_to_inverted_flipped(camera_pose.world_t_camera())));
        assert_eq!(correspondences.outlier_object_point_ids(), &[103, 117, 129]);

        // gravity along the viewing direction contradicts every pose RANSAC can find
        let wrong_gravity = GravityConstraints::with_default_world_gravity(Vector3::x(), 1.0, 0.2).unwrap();
        correspondences.reset(&tracking);
        assert!(correspondences
            .determine_pose(&camera(), None, 20, &mut rng, 3.0, EstimatorType::Tukey, Some(&wrong_gravity))
            .is_none());
    }

    #[test]
    fn test_determine_pose_from_previous_pose() {
        let mut rng = SmallRng::seed_from_u64(12);
        let world_t_previous_camera =
            look_at(&Vector3::new(0.0, 0.0, 5.0), &Vector3::zeros(), &Vector3::y());
        let world_t_camera = look_at(&Vector3::new(0.1, 0.05, 5.0), &Vector3::zeros(), &Vector3::y());
        let tracking = tracking(
            &mut rng,
            30,
            &[],
            LocalizationPrecision::Medium,
            &world_t_previous_camera,
            &world_t_camera,
        );

        let mut correspondences = PoseCorrespondences::new();
        correspondences.reset(&tracking);
        let camera_pose = correspondences
            .determine_pose(
                &camera(),
                Some(&world_t_previous_camera),
                20,
                &mut rng,
                3.0,
                EstimatorType::Huber,
                None,
            )
            .unwrap();

        assert!(
            (camera_pose.world_t_camera().to_homogeneous() - world_t_camera.to_homogeneous()).norm()
                < 1e-4
        );
        assert_eq!(camera_pose.pose_quality(), PoseQuality::Medium);
        assert!(correspondences.outlier_object_point_ids().is_empty());
    }

    #[test]
    fn test_determine_pose_invalid_quality() {
        let mut rng = SmallRng::seed_from_u64(13);
        let pose = look_at(&Vector3::new(0.0, 0.0, 5.0), &Vector3::zeros(), &Vector3::y());
        let tracking = tracking(&mut rng, 12, &[5, 8], LocalizationPrecision::High, &pose, &pose);

        let mut correspondences = PoseCorrespondences::new();
        correspondences.reset(&tracking);
        assert!(correspondences
            .determine_pose(&camera(), None, 6, &mut rng, 3.0, EstimatorType::Huber, None)
            .is_none());
        assert!(correspondences.precise_object_point_ids().is_empty());
        assert!(correspondences.imprecise_object_point_ids().is_empty());
        assert!(correspondences.outlier_object_point_ids().is_empty());
        // the pose was valid, only its quality was not
        assert!(correspondences.robust_error() < 1.0);
    }
}
