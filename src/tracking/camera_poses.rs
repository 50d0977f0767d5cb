use std::collections::HashMap;

use parking_lot::RwLock;

use super::camera_pose::SharedCameraPose;
use crate::global_types::{FrameIndex, MapVersion, INVALID_INDEX};

#[derive(Debug, Default)]
struct CameraPosesInner {
    map_version: MapVersion,
    /// Pose of each frame, stamped with the map version it was determined with.
    poses: HashMap<FrameIndex, (SharedCameraPose, MapVersion)>,
    /// Most recent frame with a pose, `INVALID_INDEX` if none.
    frame_index: FrameIndex,
}

/// Thread-safe store of the camera poses of all frames.
///
/// Poses are stamped with the map version current when they are stored. Reads ask for a map
/// version and never return a pose belonging to another one.
#[derive(Debug)]
pub struct CameraPoses {
    inner: RwLock<CameraPosesInner>,
}

impl Default for CameraPoses {
    fn default() -> Self {
        Self::new()
    }
}

impl CameraPoses {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(CameraPosesInner {
                frame_index: INVALID_INDEX,
                ..Default::default()
            }),
        }
    }

    /// Stores the pose of a frame for the current map version.
    pub fn set_pose(&self, frame_index: FrameIndex, camera_pose: SharedCameraPose) {
        let mut inner = self.inner.write();
        let map_version = inner.map_version;
        inner.poses.insert(frame_index, (camera_pose, map_version));
        if inner.frame_index == INVALID_INDEX || frame_index > inner.frame_index {
            inner.frame_index = frame_index;
        }
    }

    /// Stores a pose determined for a specific map version, stale poses are dropped.
    pub fn set_pose_for_version(
        &self,
        frame_index: FrameIndex,
        camera_pose: SharedCameraPose,
        map_version: MapVersion,
    ) -> bool {
        let mut inner = self.inner.write();
        if inner.map_version != map_version {
            log::warn!(
                "Dropping pose of frame {} for map version {}, current version is {}",
                frame_index,
                map_version,
                inner.map_version
            );
            return false;
        }
        inner.poses.insert(frame_index, (camera_pose, map_version));
        if inner.frame_index == INVALID_INDEX || frame_index > inner.frame_index {
            inner.frame_index = frame_index;
        }
        true
    }

    /// Pose of a frame belonging to the current map version.
    pub fn has_pose(&self, frame_index: FrameIndex) -> Option<SharedCameraPose> {
        let inner = self.inner.read();
        let map_version = inner.map_version;
        Self::lookup(&inner, frame_index, map_version)
    }

    /// Pose of a frame belonging to the given map version.
    pub fn pose(&self, frame_index: FrameIndex, map_version: MapVersion) -> Option<SharedCameraPose> {
        let inner = self.inner.read();
        Self::lookup(&inner, frame_index, map_version)
    }

    fn lookup(
        inner: &CameraPosesInner,
        frame_index: FrameIndex,
        map_version: MapVersion,
    ) -> Option<SharedCameraPose> {
        inner
            .poses
            .get(&frame_index)
            .filter(|(_, version)| *version == map_version)
            .map(|(pose, _)| pose.clone())
    }

    /// Number of poses belonging to the given map version.
    pub fn number_poses(&self, map_version: MapVersion) -> usize {
        self.inner
            .read()
            .poses
            .values()
            .filter(|(_, version)| *version == map_version)
            .count()
    }

    /// Most recent frame with a pose, `INVALID_INDEX` if none.
    pub fn frame_index(&self) -> FrameIndex {
        self.inner.read().frame_index
    }

    pub fn map_version(&self) -> MapVersion {
        self.inner.read().map_version
    }

    /// Starts a new map generation, existing poses become stale.
    pub fn increment_map_version(&self) -> MapVersion {
        let mut inner = self.inner.write();
        inner.map_version = inner.map_version.wrapping_add(1);
        inner.map_version
    }

    /// Frames with a pose of the given map version, ascending.
    pub fn frame_indices(&self, map_version: MapVersion) -> Vec<FrameIndex> {
        let inner = self.inner.read();
        let mut frame_indices: Vec<FrameIndex> = inner
            .poses
            .iter()
            .filter(|(_, (_, version))| *version == map_version)
            .map(|(frame_index, _)| *frame_index)
            .collect();
        frame_indices.sort_unstable();
        frame_indices
    }

    pub fn clear(&self) {
        let mut inner = self.inner.write();
        inner.poses.clear();
        inner.frame_index = INVALID_INDEX;
    }
}
