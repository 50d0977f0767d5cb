//! Monocular tracking against a map of localized 3D object points.

pub mod camera_pose;
pub mod camera_poses;
mod frame_tracker;
pub mod localized_object_point;
pub mod pose_correspondences;
pub mod pose_quality_calculator;
pub mod serialization;
pub mod subset;
pub mod tracking_correspondences;

pub use camera_pose::{CameraPose, EstimatedMotion, PoseQuality, SharedCameraPose};
pub use camera_poses::CameraPoses;
pub use frame_tracker::FrameTracker;
pub use localized_object_point::{
    LocalizationPrecision, LocalizedObjectPoint, LocalizedObjectPointMap, OptimizationResult,
};
pub use pose_correspondences::PoseCorrespondences;
pub use pose_quality_calculator::PoseQualityCalculator;
pub use tracking_correspondences::{PointTrack, TrackingCorrespondences};
