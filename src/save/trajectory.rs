use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::global_types::{FrameIndex, HomogenousMatrix4};
use crate::tracking::{CameraPose, CameraPoses, EstimatedMotion, PoseQuality};

/// One `world_T_camera` pose of the exported trajectory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrajectoryRow {
    pub frame: FrameIndex,
    pub tx: f64,
    pub ty: f64,
    pub tz: f64,
    pub qx: f64,
    pub qy: f64,
    pub qz: f64,
    pub qw: f64,
    pub quality: PoseQuality,
    pub motion: EstimatedMotion,
}

impl TrajectoryRow {
    pub fn new(frame: FrameIndex, camera_pose: &CameraPose) -> Self {
        let world_t_camera = camera_pose.world_t_camera();
        let translation = &world_t_camera.translation.vector;
        let rotation = world_t_camera.rotation.quaternion();
        Self {
            frame,
            tx: translation.x,
            ty: translation.y,
            tz: translation.z,
            qx: rotation.i,
            qy: rotation.j,
            qz: rotation.k,
            qw: rotation.w,
            quality: camera_pose.pose_quality(),
            motion: camera_pose.estimated_motion(),
        }
    }

    pub fn world_t_camera(&self) -> HomogenousMatrix4 {
        HomogenousMatrix4::from_parts(
            nalgebra::Translation3::new(self.tx, self.ty, self.tz),
            nalgebra::UnitQuaternion::from_quaternion(nalgebra::Quaternion::new(
                self.qw, self.qx, self.qy, self.qz,
            )),
        )
    }
}

/// Writes all poses of the current map version, ordered by frame, returns the number of rows.
pub fn write_trajectory(path: impl AsRef<Path>, camera_poses: &CameraPoses) -> anyhow::Result<usize> {
    let path = path.as_ref();
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("failed to create trajectory file {}", path.display()))?;

    let map_version = camera_poses.map_version();
    let mut rows = 0;
    for frame in camera_poses.frame_indices(map_version) {
        let Some(camera_pose) = camera_poses.pose(frame, map_version) else {
            continue;
        };
        writer.serialize(TrajectoryRow::new(frame, &camera_pose))?;
        rows += 1;
    }
    writer.flush()?;

    Ok(rows)
}

pub fn read_trajectory(path: impl AsRef<Path>) -> anyhow::Result<Vec<TrajectoryRow>> {
    let path = path.as_ref();
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("failed to open trajectory file {}", path.display()))?;
    reader
        .deserialize()
        .map(|row| row.context("invalid trajectory row"))
        .collect()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::geometry::look_at;
    use crate::global_types::Vector3;

    #[test]
    fn test_trajectory_csv() {
        let camera_poses = CameraPoses::new();
        for frame in [3u32, 1, 2] {
            let eye = Vector3::new(frame as f64, 0.5, 4.0);
            camera_poses.set_pose(
                frame,
                Arc::new(CameraPose::new(
                    look_at(&eye, &Vector3::zeros(), &Vector3::y()),
                    PoseQuality::Medium,
                    EstimatedMotion::Small,
                )),
            );
        }

        let path = std::env::temp_dir().join("mono_slam_rs_trajectory.csv");
        assert_eq!(write_trajectory(&path, &camera_poses).unwrap(), 3);

        let rows = read_trajectory(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(rows.iter().map(|row| row.frame).collect::<Vec<_>>(), vec![1, 2, 3]);
        for row in &rows {
            assert_eq!(row.quality, PoseQuality::Medium);
            assert_eq!(row.motion, EstimatedMotion::Small);
            let expected = camera_poses.has_pose(row.frame).unwrap();
            let difference =
                row.world_t_camera().to_homogeneous() - expected.world_t_camera().to_homogeneous();
            assert!(difference.norm() < 1e-9);
        }
    }
}
