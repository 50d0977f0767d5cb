use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::geometry::{inverted_flipped_to_standard, standard_to_inverted_flipped};
use crate::global_types::HomogenousMatrix4;
use crate::utility::Utility;

/// Quality of a camera pose, derived from the precision of the supporting object points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PoseQuality {
    #[default]
    Invalid,
    Low,
    Medium,
    High,
}

/// Coarse camera motion between two frames, derived from the optical flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EstimatedMotion {
    #[default]
    Unknown,
    Stationary,
    Small,
    Medium,
    Large,
}

/// Median flow, relative to the image diagonal, up to which the camera counts as stationary.
const STATIONARY_FLOW: f64 = 0.001;
const SMALL_FLOW: f64 = 0.01;
const MEDIUM_FLOW: f64 = 0.05;

/// Immutable camera pose of one frame.
#[derive(Debug, Clone)]
pub struct CameraPose {
    world_t_camera: HomogenousMatrix4,
    flipped_camera_t_world: HomogenousMatrix4,
    pose_quality: PoseQuality,
    estimated_motion: EstimatedMotion,
}

pub type SharedCameraPose = Arc<CameraPose>;

impl CameraPose {
    pub fn new(
        world_t_camera: HomogenousMatrix4,
        pose_quality: PoseQuality,
        estimated_motion: EstimatedMotion,
    ) -> Self {
        Self {
            flipped_camera_t_world: standard_to_inverted_flipped(&world_t_camera),
            world_t_camera,
            pose_quality,
            estimated_motion,
        }
    }

    pub fn from_flipped(
        flipped_camera_t_world: HomogenousMatrix4,
        pose_quality: PoseQuality,
        estimated_motion: EstimatedMotion,
    ) -> Self {
        Self {
            world_t_camera: inverted_flipped_to_standard(&flipped_camera_t_world),
            flipped_camera_t_world,
            pose_quality,
            estimated_motion,
        }
    }

    #[inline]
    pub fn world_t_camera(&self) -> &HomogenousMatrix4 {
        &self.world_t_camera
    }

    #[inline]
    pub fn flipped_camera_t_world(&self) -> &HomogenousMatrix4 {
        &self.flipped_camera_t_world
    }

    #[inline]
    pub fn pose_quality(&self) -> PoseQuality {
        self.pose_quality
    }

    #[inline]
    pub fn estimated_motion(&self) -> EstimatedMotion {
        self.estimated_motion
    }

    /// Classifies the motion from squared image point distances between two frames.
    pub fn motion_from_optical_flow(sqr_distances: &[f64], width: u32, height: u32) -> EstimatedMotion {
        let diagonal = ((width as f64).powi(2) + (height as f64).powi(2)).sqrt();
        if diagonal <= 0.0 {
            return EstimatedMotion::Unknown;
        }

        let mut values = sqr_distances.to_vec();
        let Some(median_sqr_distance) = Utility::median(&mut values) else {
            return EstimatedMotion::Unknown;
        };

        let flow = median_sqr_distance.sqrt() / diagonal;
        if flow <= STATIONARY_FLOW {
            EstimatedMotion::Stationary
        } else if flow <= SMALL_FLOW {
            EstimatedMotion::Small
        } else if flow <= MEDIUM_FLOW {
            EstimatedMotion::Medium
        } else {
            EstimatedMotion::Large
        }
    }
}
