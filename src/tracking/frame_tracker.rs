use std::sync::Arc;

use rand::rngs::SmallRng;
use rand::SeedableRng;

use super::camera_pose::SharedCameraPose;
use super::camera_poses::CameraPoses;
use super::localized_object_point::{
    LocalizedObjectPoint, LocalizedObjectPointMap, OptimizationResult,
};
use super::pose_correspondences::PoseCorrespondences;
use super::subset::CorrespondenceSubset;
use super::tracking_correspondences::{PointTrack, TrackingCorrespondences};
use crate::camera::CameraTrait;
use crate::config::TrackerConfig;
use crate::global_types::{FrameIndex, ObjectPointId, Vector2, Vector3};

/// Frame to frame tracking against a map of localized object points.
///
/// The tracker owns its random generator, the camera poses are shared with other threads which
/// may advance the map version at any time.
pub struct FrameTracker<C>
where
    C: CameraTrait,
{
    camera: C,
    config: TrackerConfig,
    camera_poses: Arc<CameraPoses>,
    localized_object_points: LocalizedObjectPointMap,
    pose_correspondences: PoseCorrespondences,
    rng: SmallRng,
    /// `None` once every id is taken.
    next_object_point_id: Option<ObjectPointId>,
}

impl<C> FrameTracker<C>
where
    C: CameraTrait,
{
    pub fn new(camera: C, config: TrackerConfig) -> Self {
        Self::with_camera_poses(camera, config, Arc::new(CameraPoses::new()))
    }

    pub fn with_camera_poses(camera: C, config: TrackerConfig, camera_poses: Arc<CameraPoses>) -> Self {
        let rng = SmallRng::seed_from_u64(config.random_seed);
        Self {
            camera,
            config,
            camera_poses,
            localized_object_points: LocalizedObjectPointMap::new(),
            pose_correspondences: PoseCorrespondences::new(),
            rng,
            next_object_point_id: Some(0),
        }
    }

    #[inline]
    pub fn camera(&self) -> &C {
        &self.camera
    }

    #[inline]
    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    #[inline]
    pub fn camera_poses(&self) -> &Arc<CameraPoses> {
        &self.camera_poses
    }

    #[inline]
    pub fn localized_object_points(&self) -> &LocalizedObjectPointMap {
        &self.localized_object_points
    }

    #[inline]
    pub fn pose_correspondences(&self) -> &PoseCorrespondences {
        &self.pose_correspondences
    }

    /// Replaces the map, e.g., with a deserialized one.
    ///
    /// New points get ids above the largest id of the map.
    pub fn set_localized_object_points(&mut self, localized_object_points: LocalizedObjectPointMap) {
        self.next_object_point_id = match localized_object_points.keys().max() {
            Some(id) => id.checked_add(1),
            None => Some(0),
        };
        self.localized_object_points = localized_object_points;
    }

    /// Adds a new object point from a 2D track, returns its id.
    ///
    /// Returns `None` once all ids are in use.
    pub fn add_object_point(
        &mut self,
        point_track: &PointTrack,
        position: Option<Vector3>,
    ) -> Option<ObjectPointId> {
        let Some(id) = self.next_object_point_id else {
            log::warn!("No object point id left, the track is dropped");
            return None;
        };
        self.next_object_point_id = id.checked_add(1);
        self.localized_object_points
            .insert(id, LocalizedObjectPoint::new(point_track, position));
        Some(id)
    }

    /// Pairs the localized points seen in `previous_frame_index` with their current observations.
    pub fn tracking_correspondences(
        &self,
        previous_frame_index: FrameIndex,
        current_image_points: &[(ObjectPointId, Vector2)],
    ) -> TrackingCorrespondences {
        let mut tracking_correspondences = TrackingCorrespondences::new(self.camera_poses.map_version());

        for (id, current_image_point) in current_image_points {
            let Some(object_point) = self.localized_object_points.get(id) else {
                continue;
            };
            let (Some(position), Some(previous_image_point)) = (
                object_point.position(),
                object_point.observation(previous_frame_index),
            ) else {
                continue;
            };
            tracking_correspondences.add_correspondence(
                *id,
                *position,
                object_point.localization_precision(),
                *previous_image_point,
                *current_image_point,
            );
        }

        tracking_correspondences
    }

    /// Determines and stores the pose of `frame_index`.
    ///
    /// The pose of the previous frame is used as initial guess if it exists for the current map
    /// version. Correspondences created for an outdated map version are not used.
    pub fn track_frame(
        &mut self,
        frame_index: FrameIndex,
        tracking_correspondences: &TrackingCorrespondences,
        camera_gravity: Option<&Vector3>,
    ) -> Option<SharedCameraPose> {
        let map_version = self.camera_poses.map_version();
        if tracking_correspondences.map_version() != map_version {
            log::debug!(
                "Correspondences of frame {} belong to map version {}, current is {}",
                frame_index,
                tracking_correspondences.map_version(),
                map_version
            );
            return None;
        }

        let previous_pose = frame_index
            .checked_sub(1)
            .and_then(|previous_frame_index| self.camera_poses.has_pose(previous_frame_index));
        let gravity = camera_gravity.and_then(|g| self.config.gravity_constraints(g));

        self.pose_correspondences.reset(tracking_correspondences);

        let camera_pose = self.pose_correspondences.determine_pose(
            &self.camera,
            previous_pose.as_ref().map(|pose| pose.world_t_camera()),
            self.config.min_correspondences,
            &mut self.rng,
            self.config.max_projection_error,
            self.config.estimator_type,
            gravity.as_ref(),
        );

        let Some(camera_pose) = camera_pose else {
            log::info!("Frame {}: tracking lost", frame_index);
            return None;
        };

        if !self
            .camera_poses
            .set_pose_for_version(frame_index, camera_pose.clone(), map_version)
        {
            return None;
        }

        log::info!(
            "Frame {}: {:?} pose, {:?} motion, {} inliers, {} outliers, robust error {:.3}",
            frame_index,
            camera_pose.pose_quality(),
            camera_pose.estimated_motion(),
            self.pose_correspondences.precise_object_point_ids().len(),
            self.pose_correspondences.outlier_object_point_ids().len(),
            self.pose_correspondences.robust_error()
        );

        Some(camera_pose)
    }

    /// Determines the pose of `frame_index` from the map alone, e.g., after tracking was lost.
    ///
    /// Only the observations of points used for the final pose are added to the map.
    pub fn relocalize(
        &mut self,
        frame_index: FrameIndex,
        image_points: &[(ObjectPointId, Vector2)],
        camera_gravity: Option<&Vector3>,
    ) -> Option<SharedCameraPose> {
        let mut candidates = LocalizedObjectPointMap::with_capacity(image_points.len());
        for (id, image_point) in image_points {
            let Some(object_point) = self.localized_object_points.get(id) else {
                continue;
            };
            if object_point.position().is_none() {
                continue;
            }
            let mut candidate = object_point.clone();
            if !candidate.has_observation(frame_index) {
                candidate.add_observation(frame_index, *image_point);
            }
            candidates.insert(*id, candidate);
        }

        let map_version = self.camera_poses.map_version();
        let gravity = camera_gravity.and_then(|g| self.config.gravity_constraints(g));

        let estimation = LocalizedObjectPoint::determine_camera_pose(
            &self.camera,
            &self.camera_poses,
            frame_index,
            &candidates,
            &mut self.rng,
            self.config.max_projection_error,
            self.config.estimator_type,
            gravity.as_ref(),
        )?;

        if !self
            .camera_poses
            .set_pose_for_version(frame_index, estimation.camera_pose.clone(), map_version)
        {
            return None;
        }

        for id in &estimation.used_object_point_ids {
            let (Some(object_point), Some(candidate)) =
                (self.localized_object_points.get_mut(id), candidates.get(id))
            else {
                continue;
            };
            if let Some(image_point) = candidate.observation(frame_index) {
                if !object_point.has_observation(frame_index) {
                    object_point.add_observation(frame_index, *image_point);
                }
            }
        }

        log::info!(
            "Frame {}: relocalized with {} points, {} rejected",
            frame_index,
            estimation.used_object_point_ids.len(),
            estimation.bad_object_point_ids.len()
        );

        Some(estimation.camera_pose)
    }

    /// Adds the inlier observations of the last tracked frame to the map and updates the
    /// precision of the affected points.
    ///
    /// Returns the number of points whose precision changed.
    pub fn extend_map(&mut self, frame_index: FrameIndex) -> usize {
        if self.pose_correspondences.map_version() != self.camera_poses.map_version()
            || self.camera_poses.has_pose(frame_index).is_none()
        {
            return 0;
        }

        let mut changed = 0;
        for (id, image_point) in self
            .pose_correspondences
            .object_point_ids()
            .iter()
            .zip(self.pose_correspondences.image_points())
        {
            let Some(object_point) = self.localized_object_points.get_mut(id) else {
                continue;
            };
            if !object_point.has_observation(frame_index) {
                object_point.add_observation(frame_index, *image_point);
            }
            if object_point.update_localized_object_point_uncertainty(&self.camera, &self.camera_poses) {
                changed += 1;
            }
        }

        changed
    }

    /// Re-optimizes the positions of all localized points with their observations up to
    /// `current_frame_index`, returns the number of moved points.
    pub fn optimize_map_points(&mut self, current_frame_index: FrameIndex) -> usize {
        let map_version = self.camera_poses.map_version();
        let mut optimized = 0;

        for (id, object_point) in self.localized_object_points.iter_mut() {
            if object_point.position().is_none() {
                continue;
            }
            match object_point.optimized_object_point(
                map_version,
                &self.camera,
                &self.camera_poses,
                current_frame_index,
                self.config.min_object_point_observations,
                self.config.max_projection_error,
                self.config.estimator_type,
            ) {
                OptimizationResult::Succeeded(position) => {
                    object_point.set_position(position);
                    optimized += 1;
                }
                OptimizationResult::Inaccurate => {
                    log::debug!("Object point {} could not be optimized accurately", id);
                }
                OptimizationResult::NotEnoughObservations => {}
            }
        }

        optimized
    }
}
