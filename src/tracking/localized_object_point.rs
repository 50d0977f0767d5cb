use std::collections::{BTreeMap, HashMap, HashSet};

use rand::Rng;

use super::camera_pose::{CameraPose, EstimatedMotion, PoseQuality, SharedCameraPose};
use super::camera_poses::CameraPoses;
use super::pose_quality_calculator::PoseQualityCalculator;
use super::subset::{compact_in_place, CorrespondenceSubset};
use super::tracking_correspondences::PointTrack;
use crate::camera::{is_object_point_in_front_if, CameraTrait};
use crate::config::{
    HIGH_PRECISION_EIGEN_RATIO, LOW_PRECISION_POSE_COUNT, MEDIUM_PRECISION_EIGEN_RATIO,
    MIN_POSE_CANDIDATES, OBJECT_POINT_OPTIMIZATION_ITERATIONS, OPTIMIZATION_LAMBDA,
    OPTIMIZATION_LAMBDA_FACTOR, POSE_OPTIMIZATION_ITERATIONS, RANSAC_ITERATIONS,
    RANSAC_MINIMAL_CORRESPONDENCES,
};
use crate::geometry::non_linear_optimization::{
    optimize_object_point_for_fixed_poses_if, optimize_pose_if,
};
use crate::geometry::{
    inverted_flipped_to_standard, ransac, standard_to_inverted_flipped, EstimatorType,
    GravityConstraints,
};
use crate::global_types::{
    FrameIndex, HomogenousMatrix4, MapVersion, Matrix3, ObjectPointId, Vector2, Vector3,
    NUMERIC_EPS,
};
use crate::utility::Utility;

/// Confidence in the location of an object point, based on the geometry of its observations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(u8)]
pub enum LocalizationPrecision {
    Invalid = 0,
    #[default]
    Unknown = 1,
    Low = 2,
    Medium = 3,
    High = 4,
}

impl LocalizationPrecision {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Invalid),
            1 => Some(Self::Unknown),
            2 => Some(Self::Low),
            3 => Some(Self::Medium),
            4 => Some(Self::High),
            _ => None,
        }
    }
}

/// Result of re-optimizing the location of an object point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OptimizationResult {
    Succeeded(Vector3),
    /// The point is behind a camera or does not fit all of its observations.
    Inaccurate,
    NotEnoughObservations,
}

/// Reprojection errors, in pixel, of the object points visible in one frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReprojectionStatistics {
    pub min_error: f64,
    pub average_error: f64,
    pub max_error: f64,
    pub count: usize,
}

/// Pose of a frame determined from the localized object points it observes.
#[derive(Debug, Clone)]
pub struct CameraPoseEstimation {
    pub camera_pose: SharedCameraPose,
    pub used_object_point_ids: Vec<ObjectPointId>,
    pub bad_object_point_ids: Vec<ObjectPointId>,
}

#[derive(Debug, Clone)]
pub struct StandalonePoseEstimation {
    pub world_t_camera: HomogenousMatrix4,
    pub used_object_point_ids: Vec<ObjectPointId>,
    /// Average squared projection error of the used correspondences.
    pub sqr_error: f64,
}

pub type LocalizedObjectPointMap = HashMap<ObjectPointId, LocalizedObjectPoint>;

/// 2D/3D correspondences of one frame, gathered from the localized object points.
#[derive(Debug, Clone, Default)]
pub struct CorrespondenceData {
    object_points: Vec<Vector3>,
    image_points: Vec<Vector2>,
    object_point_ids: Vec<ObjectPointId>,
    precisions: Vec<LocalizationPrecision>,
}

impl CorrespondenceData {
    /// Gathers all localized points observed in a frame, ordered by id.
    pub fn gather(frame_index: FrameIndex, localized_object_points: &LocalizedObjectPointMap) -> Self {
        let mut entries: Vec<(ObjectPointId, Vector3, Vector2, LocalizationPrecision)> =
            localized_object_points
                .iter()
                .filter_map(|(id, point)| {
                    let position = point.position()?;
                    let image_point = point.observation(frame_index)?;
                    Some((*id, *position, *image_point, point.localization_precision()))
                })
                .collect();
        entries.sort_unstable_by_key(|entry| entry.0);

        let mut data = Self::default();
        for (id, object_point, image_point, precision) in entries {
            data.object_point_ids.push(id);
            data.object_points.push(object_point);
            data.image_points.push(image_point);
            data.precisions.push(precision);
        }
        data
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
}

impl CorrespondenceSubset for CorrespondenceData {
    fn object_point_ids(&self) -> &[ObjectPointId] {
        &self.object_point_ids
    }

    fn compact(&mut self, sorted_indices: &[usize]) {
        compact_in_place(&mut self.object_points, sorted_indices);
        compact_in_place(&mut self.image_points, sorted_indices);
        compact_in_place(&mut self.object_point_ids, sorted_indices);
        compact_in_place(&mut self.precisions, sorted_indices);
    }
}

/// Outcome of the pose estimation shared by both pose determination paths.
struct PoseEstimation {
    world_t_camera: HomogenousMatrix4,
    sqr_error: f64,
    bad_object_point_ids: Vec<ObjectPointId>,
}

/// Estimates a pose from the correspondences, either refined from a previous pose or from scratch
/// with RANSAC; reduces the correspondences to the used ones.
#[allow(clippy::too_many_arguments)]
fn estimate_pose<C, R>(
    camera: &C,
    data: &mut CorrespondenceData,
    world_t_previous_camera: Option<&HomogenousMatrix4>,
    rng: &mut R,
    max_projection_error: f64,
    estimator: EstimatorType,
    gravity: Option<&GravityConstraints>,
) -> Option<PoseEstimation>
where
    C: CameraTrait + ?Sized,
    R: Rng + ?Sized,
{
    let sqr_max_projection_error = max_projection_error * max_projection_error;

    let (world_t_camera, used_indices, sqr_error) = match world_t_previous_camera {
        Some(world_t_previous_camera) => {
            let optimization = optimize_pose_if(
                camera,
                &standard_to_inverted_flipped(world_t_previous_camera),
                &data.object_points,
                &data.image_points,
                POSE_OPTIMIZATION_ITERATIONS,
                estimator,
                OPTIMIZATION_LAMBDA,
                OPTIMIZATION_LAMBDA_FACTOR,
                gravity,
            )?;
            let flipped_camera_t_world = optimization.flipped_camera_t_world;

            let (used_indices, sqr_error_sum) = ransac::determine_inliers(
                camera,
                &flipped_camera_t_world,
                &data.object_points,
                &data.image_points,
                sqr_max_projection_error,
            );

            if used_indices.len() < RANSAC_MINIMAL_CORRESPONDENCES {
                return None;
            }
            let sqr_error = sqr_error_sum / used_indices.len() as f64;
            (
                inverted_flipped_to_standard(&flipped_camera_t_world),
                used_indices,
                sqr_error,
            )
        }
        None => {
            let result = ransac::p3p(
                camera,
                &data.object_points,
                &data.image_points,
                rng,
                RANSAC_MINIMAL_CORRESPONDENCES,
                true,
                RANSAC_ITERATIONS,
                sqr_max_projection_error,
                gravity,
            )?;
            (result.world_t_camera, result.used_indices, result.sqr_error)
        }
    };

    let bad_object_point_ids = data.apply_subset(&used_indices);

    Some(PoseEstimation {
        world_t_camera,
        sqr_error,
        bad_object_point_ids,
    })
}

/// A 3D object point of the map together with all of its 2D observations.
#[derive(Debug, Clone)]
pub struct LocalizedObjectPoint {
    /// Location in world, `None` if not yet localized.
    position: Option<Vector3>,
    observations: BTreeMap<FrameIndex, Vector2>,
    last_observation_frame_index: FrameIndex,
    localization_precision: LocalizationPrecision,
}

impl LocalizedObjectPoint {
    /// Creates a point from a 2D track with at least two image points.
    pub fn new(point_track: &PointTrack, position: Option<Vector3>) -> Self {
        debug_assert!(point_track.image_points().len() >= 2);

        let observations: BTreeMap<FrameIndex, Vector2> = point_track
            .observations()
            .map(|(frame_index, image_point)| (frame_index, *image_point))
            .collect();

        Self {
            position,
            observations,
            last_observation_frame_index: point_track.last_frame_index(),
            localization_precision: LocalizationPrecision::default(),
        }
    }

    pub(crate) fn from_parts(
        position: Option<Vector3>,
        observations: BTreeMap<FrameIndex, Vector2>,
        last_observation_frame_index: FrameIndex,
        localization_precision: LocalizationPrecision,
    ) -> Self {
        Self {
            position,
            observations,
            last_observation_frame_index,
            localization_precision,
        }
    }

    #[inline]
    pub fn position(&self) -> Option<&Vector3> {
        self.position.as_ref()
    }

    pub fn set_position(&mut self, position: Vector3) {
        self.position = Some(position);
    }

    #[inline]
    pub fn observations(&self) -> &BTreeMap<FrameIndex, Vector2> {
        &self.observations
    }

    #[inline]
    pub fn last_observation_frame_index(&self) -> FrameIndex {
        self.last_observation_frame_index
    }

    #[inline]
    pub fn localization_precision(&self) -> LocalizationPrecision {
        self.localization_precision
    }

    /// Appends the observations of an extended 2D track, the frames must be new.
    pub fn add_observations(&mut self, point_track: &PointTrack) {
        for (frame_index, image_point) in point_track.observations() {
            self.add_observation(frame_index, *image_point);
        }
    }

    pub fn add_observation(&mut self, frame_index: FrameIndex, image_point: Vector2) {
        let previous = self.observations.insert(frame_index, image_point);
        debug_assert!(previous.is_none(), "frame {} observed twice", frame_index);
        self.last_observation_frame_index = self.last_observation_frame_index.max(frame_index);
    }

    #[inline]
    pub fn has_observation(&self, frame_index: FrameIndex) -> bool {
        self.observations.contains_key(&frame_index)
    }

    #[inline]
    pub fn observation(&self, frame_index: FrameIndex) -> Option<&Vector2> {
        self.observations.get(&frame_index)
    }

    /// Optimizes the location of this point with all observations up to `current_frame_index`
    /// whose camera pose belongs to `map_version`.
    ///
    /// The position of the point itself is not changed.
    #[allow(clippy::too_many_arguments)]
    pub fn optimized_object_point<C: CameraTrait + ?Sized>(
        &self,
        map_version: MapVersion,
        camera: &C,
        camera_poses: &CameraPoses,
        current_frame_index: FrameIndex,
        min_observations: usize,
        max_projection_error: f64,
        estimator: EstimatorType,
    ) -> OptimizationResult {
        if camera_poses.number_poses(map_version) < min_observations {
            return OptimizationResult::NotEnoughObservations;
        }

        let Some(position) = self.position else {
            return OptimizationResult::Inaccurate;
        };

        let mut flipped_cameras_t_world = Vec::with_capacity(self.observations.len());
        let mut image_points = Vec::with_capacity(self.observations.len());

        for (frame_index, image_point) in self.observations.range(..=current_frame_index) {
            let Some(camera_pose) = camera_poses.pose(*frame_index, map_version) else {
                continue;
            };
            let flipped_camera_t_world = camera_pose.flipped_camera_t_world();
            if !is_object_point_in_front_if(flipped_camera_t_world, &position) {
                return OptimizationResult::Inaccurate;
            }
            flipped_cameras_t_world.push(*flipped_camera_t_world);
            image_points.push(*image_point);
        }

        if image_points.len() < min_observations.max(2) {
            return OptimizationResult::NotEnoughObservations;
        }

        let Some(optimization) = optimize_object_point_for_fixed_poses_if(
            camera,
            &flipped_cameras_t_world,
            &position,
            &image_points,
            OBJECT_POINT_OPTIMIZATION_ITERATIONS,
            estimator,
            OPTIMIZATION_LAMBDA,
            OPTIMIZATION_LAMBDA_FACTOR,
            true,
        ) else {
            return OptimizationResult::Inaccurate;
        };

        let optimized = optimization.object_point;
        let sqr_max_projection_error = max_projection_error * max_projection_error;

        for (flipped_camera_t_world, image_point) in
            flipped_cameras_t_world.iter().zip(image_points.iter())
        {
            if !is_object_point_in_front_if(flipped_camera_t_world, &optimized) {
                return OptimizationResult::Inaccurate;
            }
            let sqr_error = (camera.project_to_image_if(flipped_camera_t_world, &optimized)
                - image_point)
                .norm_squared();
            if sqr_error > sqr_max_projection_error {
                return OptimizationResult::Inaccurate;
            }
        }

        OptimizationResult::Succeeded(optimized)
    }

    /// Re-classifies the localization precision, returns whether it changed.
    ///
    /// A high precision is kept without re-evaluation.
    pub fn update_localized_object_point_uncertainty<C: CameraTrait + ?Sized>(
        &mut self,
        camera: &C,
        camera_poses: &CameraPoses,
    ) -> bool {
        if self.localization_precision == LocalizationPrecision::High {
            return false;
        }

        let precision = self.determine_localization_precision(camera, camera_poses);
        let changed = precision != self.localization_precision;
        self.localization_precision = precision;
        changed
    }

    fn determine_localization_precision<C: CameraTrait + ?Sized>(
        &self,
        camera: &C,
        camera_poses: &CameraPoses,
    ) -> LocalizationPrecision {
        let Some(position) = self.position else {
            return LocalizationPrecision::Unknown;
        };

        let mut information = Matrix3::zeros();
        let mut number_poses = 0;

        for frame_index in self.observations.keys() {
            let Some(camera_pose) = camera_poses.has_pose(*frame_index) else {
                continue;
            };
            let flipped_camera_t_world = camera_pose.flipped_camera_t_world();
            let camera_point = flipped_camera_t_world.transform_point(&position.into()).coords;
            if camera_point.z <= NUMERIC_EPS {
                continue;
            }

            // projection jacobian with respect to the world point
            let jacobian = camera.point_jacobian_2x3_if(&camera_point)
                * flipped_camera_t_world.rotation.to_rotation_matrix().matrix();
            information += jacobian.transpose() * jacobian;
            number_poses += 1;
        }

        if number_poses < 2 {
            return LocalizationPrecision::Unknown;
        }
        if number_poses <= LOW_PRECISION_POSE_COUNT {
            return LocalizationPrecision::Low;
        }

        let max_value = information.amax();
        if max_value <= NUMERIC_EPS {
            return LocalizationPrecision::Unknown;
        }
        let information = information / max_value;
        let information = (information + information.transpose()) * 0.5;

        let Some(covariance) = information.try_inverse() else {
            return LocalizationPrecision::Unknown;
        };
        let covariance = (covariance + covariance.transpose()) * 0.5;

        let mut eigenvalues: Vec<f64> = covariance.symmetric_eigenvalues().iter().copied().collect();
        eigenvalues.sort_unstable_by(|a, b| b.total_cmp(a));

        if eigenvalues[1] <= NUMERIC_EPS {
            return LocalizationPrecision::Unknown;
        }

        let ratio = eigenvalues[0] / eigenvalues[1];
        if ratio <= HIGH_PRECISION_EIGEN_RATIO {
            LocalizationPrecision::High
        } else if ratio <= MEDIUM_PRECISION_EIGEN_RATIO {
            LocalizationPrecision::Medium
        } else {
            LocalizationPrecision::Low
        }
    }

    /// Median angle between the individual viewing rays and their mean direction, in radian.
    pub fn determine_median_viewing_angle(&self, camera_poses: &CameraPoses) -> f64 {
        let Some(position) = self.position else {
            return 0.0;
        };

        let rays: Vec<Vector3> = self
            .observations
            .keys()
            .filter_map(|frame_index| camera_poses.has_pose(*frame_index))
            .filter_map(|camera_pose| {
                let ray = camera_pose.world_t_camera().translation.vector - position;
                let length = ray.norm();
                (length > NUMERIC_EPS).then(|| ray / length)
            })
            .collect();

        if rays.len() < 2 {
            return 0.0;
        }

        let mean = rays.iter().sum::<Vector3>();
        let mean_length = mean.norm();
        if mean_length <= NUMERIC_EPS {
            return 0.0;
        }
        let mean = mean / mean_length;

        let mut angles: Vec<f64> = rays
            .iter()
            .map(|ray| ray.dot(&mean).clamp(-1.0, 1.0).acos())
            .collect();
        Utility::median(&mut angles).unwrap_or(0.0)
    }

    /// Projection errors of all localized points observed in `frame_index` for a given pose.
    ///
    /// Returns `None` if no point could be evaluated.
    pub fn determine_camera_pose_quality_if<C: CameraTrait + ?Sized>(
        camera: &C,
        flipped_camera_t_world: &HomogenousMatrix4,
        frame_index: FrameIndex,
        localized_object_points: &LocalizedObjectPointMap,
    ) -> Option<ReprojectionStatistics> {
        let mut min_error = f64::MAX;
        let mut max_error = 0.0f64;
        let mut sum_error = 0.0;
        let mut count = 0;

        for (id, point) in localized_object_points {
            let (Some(position), Some(image_point)) = (point.position(), point.observation(frame_index))
            else {
                continue;
            };
            if !is_object_point_in_front_if(flipped_camera_t_world, position) {
                log::debug!("Object point {} is behind the camera of frame {}", id, frame_index);
                continue;
            }

            let error = (camera.project_to_image_if(flipped_camera_t_world, position) - image_point).norm();
            min_error = min_error.min(error);
            max_error = max_error.max(error);
            sum_error += error;
            count += 1;
        }

        (count > 0).then(|| ReprojectionStatistics {
            min_error,
            average_error: sum_error / count as f64,
            max_error,
            count,
        })
    }

    /// Separates the localized points observed in `frame_index` into points fitting the pose and
    /// points exceeding the squared projection error; points behind the camera do not fit.
    pub fn determine_object_point_quality_if<C: CameraTrait + ?Sized>(
        camera: &C,
        flipped_camera_t_world: &HomogenousMatrix4,
        frame_index: FrameIndex,
        localized_object_points: &LocalizedObjectPointMap,
        max_sqr_projection_error: f64,
    ) -> (HashSet<ObjectPointId>, HashSet<ObjectPointId>) {
        let mut valid_ids = HashSet::new();
        let mut invalid_ids = HashSet::new();

        for (id, point) in localized_object_points {
            let (Some(position), Some(image_point)) = (point.position(), point.observation(frame_index))
            else {
                continue;
            };

            let valid = is_object_point_in_front_if(flipped_camera_t_world, position)
                && (camera.project_to_image_if(flipped_camera_t_world, position) - image_point)
                    .norm_squared()
                    <= max_sqr_projection_error;

            if valid {
                valid_ids.insert(*id);
            } else {
                invalid_ids.insert(*id);
            }
        }

        (valid_ids, invalid_ids)
    }

    /// Determines the pose of a frame during tracking.
    ///
    /// The pose is refined from the pose of the previous frame if available, and determined with
    /// RANSAC otherwise. Fails if too few points are visible or the resulting pose quality is
    /// invalid. The motion of the returned pose is not classified.
    #[allow(clippy::too_many_arguments)]
    pub fn determine_camera_pose<C, R>(
        camera: &C,
        camera_poses: &CameraPoses,
        frame_index: FrameIndex,
        localized_object_points: &LocalizedObjectPointMap,
        rng: &mut R,
        max_projection_error: f64,
        estimator: EstimatorType,
        gravity: Option<&GravityConstraints>,
    ) -> Option<CameraPoseEstimation>
    where
        C: CameraTrait + ?Sized,
        R: Rng + ?Sized,
    {
        let mut data = CorrespondenceData::gather(frame_index, localized_object_points);
        if data.len() < MIN_POSE_CANDIDATES {
            log::debug!(
                "Frame {} observes {} localized points, {} needed",
                frame_index,
                data.len(),
                MIN_POSE_CANDIDATES
            );
            return None;
        }

        let previous_pose = frame_index
            .checked_sub(1)
            .and_then(|previous_frame_index| camera_poses.has_pose(previous_frame_index));

        let estimation = estimate_pose(
            camera,
            &mut data,
            previous_pose.as_ref().map(|pose| pose.world_t_camera()),
            rng,
            max_projection_error,
            estimator,
            gravity,
        )?;

        let pose_quality = PoseQualityCalculator::from_precisions(data.precisions()).pose_quality();
        if pose_quality == PoseQuality::Invalid {
            log::debug!("Pose of frame {} has invalid quality", frame_index);
            return None;
        }

        Some(CameraPoseEstimation {
            camera_pose: SharedCameraPose::new(CameraPose::new(
                estimation.world_t_camera,
                pose_quality,
                EstimatedMotion::Unknown,
            )),
            used_object_point_ids: data.object_point_ids,
            bad_object_point_ids: estimation.bad_object_point_ids,
        })
    }

    /// Determines the pose of a frame from scratch with RANSAC, without rating its quality.
    pub fn determine_camera_pose_standalone<C, R>(
        camera: &C,
        frame_index: FrameIndex,
        localized_object_points: &LocalizedObjectPointMap,
        rng: &mut R,
        max_projection_error: f64,
        gravity: Option<&GravityConstraints>,
    ) -> Option<StandalonePoseEstimation>
    where
        C: CameraTrait + ?Sized,
        R: Rng + ?Sized,
    {
        let mut data = CorrespondenceData::gather(frame_index, localized_object_points);
        if data.len() < MIN_POSE_CANDIDATES {
            return None;
        }

        let estimation = estimate_pose(
            camera,
            &mut data,
            None,
            rng,
            max_projection_error,
            EstimatorType::Square,
            gravity,
        )?;

        Some(StandalonePoseEstimation {
            world_t_camera: estimation.world_t_camera,
            used_object_point_ids: data.object_point_ids,
            sqr_error: estimation.sqr_error,
        })
    }
}
