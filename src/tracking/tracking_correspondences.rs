use super::localized_object_point::LocalizationPrecision;
use crate::global_types::{FrameIndex, MapVersion, ObjectPointId, Vector2, Vector3};

/// 2D track of one feature over consecutive frames.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PointTrack {
    first_frame_index: FrameIndex,
    image_points: Vec<Vector2>,
}

impl PointTrack {
    pub fn new(first_frame_index: FrameIndex, image_points: Vec<Vector2>) -> Self {
        Self {
            first_frame_index,
            image_points,
        }
    }

    #[inline]
    pub fn first_frame_index(&self) -> FrameIndex {
        self.first_frame_index
    }

    /// Frame of the last image point, the track must not be empty.
    #[inline]
    pub fn last_frame_index(&self) -> FrameIndex {
        debug_assert!(!self.image_points.is_empty());
        self.first_frame_index + self.image_points.len() as FrameIndex - 1
    }

    #[inline]
    pub fn image_points(&self) -> &[Vector2] {
        &self.image_points
    }

    pub fn push(&mut self, image_point: Vector2) {
        self.image_points.push(image_point);
    }

    /// Image points paired with their frame index.
    pub fn observations(&self) -> impl Iterator<Item = (FrameIndex, &Vector2)> + '_ {
        self.image_points
            .iter()
            .enumerate()
            .map(move |(offset, image_point)| (self.first_frame_index + offset as FrameIndex, image_point))
    }
}

/// Result of the frame to frame tracking of localized object points.
///
/// All arrays are parallel, entry `i` describes one tracked object point.
#[derive(Debug, Clone, Default)]
pub struct TrackingCorrespondences {
    map_version: MapVersion,
    object_points: Vec<Vector3>,
    object_point_precisions: Vec<LocalizationPrecision>,
    previous_image_points: Vec<Vector2>,
    current_image_points: Vec<Vector2>,
    object_point_ids: Vec<ObjectPointId>,
    valid_correspondences: Vec<bool>,
}

impl TrackingCorrespondences {
    pub fn new(map_version: MapVersion) -> Self {
        Self {
            map_version,
            ..Default::default()
        }
    }

    pub fn add_correspondence(
        &mut self,
        object_point_id: ObjectPointId,
        object_point: Vector3,
        precision: LocalizationPrecision,
        previous_image_point: Vector2,
        current_image_point: Vector2,
    ) {
        self.object_point_ids.push(object_point_id);
        self.object_points.push(object_point);
        self.object_point_precisions.push(precision);
        self.previous_image_points.push(previous_image_point);
        self.current_image_points.push(current_image_point);
        self.valid_correspondences.push(true);
    }

    /// Marks a correspondence as lost, e.g., because the 2D tracking failed.
    pub fn invalidate(&mut self, index: usize) {
        self.valid_correspondences[index] = false;
    }

    pub fn len(&self) -> usize {
        self.object_point_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.object_point_ids.is_empty()
    }

    pub fn map_version(&self) -> MapVersion {
        self.map_version
    }

    pub fn object_points(&self) -> &[Vector3] {
        &self.object_points
    }

    pub fn object_point_precisions(&self) -> &[LocalizationPrecision] {
        &self.object_point_precisions
    }

    pub fn previous_image_points(&self) -> &[Vector2] {
        &self.previous_image_points
    }

    pub fn current_image_points(&self) -> &[Vector2] {
        &self.current_image_points
    }

    pub fn object_point_ids(&self) -> &[ObjectPointId] {
        &self.object_point_ids
    }

    pub fn valid_correspondences(&self) -> &[bool] {
        &self.valid_correspondences
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_point_track() {
        let mut track = PointTrack::new(4, vec![Vector2::new(1.0, 2.0), Vector2::new(1.5, 2.5)]);
        track.push(Vector2::new(2.0, 3.0));
        assert_eq!(track.last_frame_index(), 6);
        let frames: Vec<FrameIndex> = track.observations().map(|(frame, _)| frame).collect();
        assert_eq!(frames, vec![4, 5, 6]);
    }

    #[test]
    fn test_tracking_correspondences() {
        let mut correspondences = TrackingCorrespondences::new(3);
        for id in 0..4 {
            correspondences.add_correspondence(
                id,
                Vector3::new(id as f64, 0.0, 1.0),
                LocalizationPrecision::Medium,
                Vector2::new(10.0, 10.0),
                Vector2::new(11.0, 10.0),
            );
        }
        correspondences.invalidate(2);

        assert_eq!(correspondences.map_version(), 3);
        assert_eq!(correspondences.len(), 4);
        assert_eq!(correspondences.valid_correspondences(), &[true, true, false, true]);
        assert_eq!(correspondences.object_point_ids(), &[0, 1, 2, 3]);
    }
}
