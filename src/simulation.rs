//! Deterministic synthetic scenes for the demo and the tests.
//!
//! A scene is a cloud of object points around the origin observed by a camera moving along a
//! trajectory, always looking at the origin. Image observations are exact projections with
//! optional uniform noise and gross outliers.

use rand::Rng;

use crate::camera::{is_object_point_in_front_if, CameraTrait};
use crate::geometry::{look_at, standard_to_inverted_flipped};
use crate::global_types::{FrameIndex, HomogenousMatrix4, ObjectPointId, Vector2, Vector3};

/// Path of the synthetic camera.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Trajectory {
    /// Horizontal arc around the origin, spanning the given angle in radian.
    Arc { radius: f64, angle: f64 },
    /// Straight sideways motion in front of the origin.
    Line { distance: f64, length: f64 },
}

impl Trajectory {
    fn eye(&self, t: f64) -> Vector3 {
        match *self {
            Trajectory::Arc { radius, angle } => {
                let a = angle * (t - 0.5);
                Vector3::new(a.sin() * radius, 0.3, a.cos() * radius)
            }
            Trajectory::Line { distance, length } => Vector3::new(length * (t - 0.5), 0.3, distance),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SyntheticScene {
    object_points: Vec<Vector3>,
    world_t_cameras: Vec<HomogenousMatrix4>,
}

impl SyntheticScene {
    /// Creates `number_points` points in a box of the given half extent and `number_frames`
    /// camera poses along the trajectory.
    pub fn new<R: Rng + ?Sized>(
        rng: &mut R,
        number_points: usize,
        half_extent: f64,
        number_frames: usize,
        trajectory: Trajectory,
    ) -> Self {
        let object_points = (0..number_points)
            .map(|_| {
                Vector3::new(
                    rng.gen_range(-half_extent..half_extent),
                    rng.gen_range(-half_extent..half_extent),
                    rng.gen_range(-half_extent..half_extent),
                )
            })
            .collect();

        let world_t_cameras = (0..number_frames)
            .map(|frame| {
                let t = if number_frames > 1 {
                    frame as f64 / (number_frames - 1) as f64
                } else {
                    0.5
                };
                look_at(&trajectory.eye(t), &Vector3::zeros(), &Vector3::y())
            })
            .collect();

        Self {
            object_points,
            world_t_cameras,
        }
    }

    #[inline]
    pub fn object_points(&self) -> &[Vector3] {
        &self.object_points
    }

    #[inline]
    pub fn object_point(&self, id: ObjectPointId) -> &Vector3 {
        &self.object_points[id as usize]
    }

    #[inline]
    pub fn number_frames(&self) -> usize {
        self.world_t_cameras.len()
    }

    #[inline]
    pub fn world_t_camera(&self, frame_index: FrameIndex) -> &HomogenousMatrix4 {
        &self.world_t_cameras[frame_index as usize]
    }

    /// Exact projection of a point, `None` if it is behind the camera or outside the image.
    pub fn observation<C: CameraTrait + ?Sized>(
        &self,
        camera: &C,
        frame_index: FrameIndex,
        id: ObjectPointId,
    ) -> Option<Vector2> {
        let flipped_camera_t_world = standard_to_inverted_flipped(self.world_t_camera(frame_index));
        let object_point = self.object_point(id);
        if !is_object_point_in_front_if(&flipped_camera_t_world, object_point) {
            return None;
        }
        let image_point = camera.project_to_image_if(&flipped_camera_t_world, object_point);
        camera.is_inside(&image_point).then_some(image_point)
    }

    /// All visible points of a frame, with noise of up to `noise` pixel per axis.
    ///
    /// Each observation is replaced by a gross outlier with probability `outlier_ratio`.
    pub fn observations<C, R>(
        &self,
        camera: &C,
        frame_index: FrameIndex,
        rng: &mut R,
        noise: f64,
        outlier_ratio: f64,
    ) -> Vec<(ObjectPointId, Vector2)>
    where
        C: CameraTrait + ?Sized,
        R: Rng + ?Sized,
    {
        (0..self.object_points.len() as ObjectPointId)
            .filter_map(|id| {
                let mut image_point = self.observation(camera, frame_index, id)?;
                if noise > 0.0 {
                    image_point += Vector2::new(rng.gen_range(-noise..=noise), rng.gen_range(-noise..=noise));
                }
                if outlier_ratio > 0.0 && rng.gen_bool(outlier_ratio) {
                    let offset = Vector2::new(rng.gen_range(20.0..60.0), rng.gen_range(20.0..60.0));
                    image_point += if rng.gen_bool(0.5) { offset } else { -offset };
                }
                Some((id, image_point))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    use super::*;
    use crate::camera::PinholeCamera;

    #[test]
    fn test_scene_is_deterministic() {
        let camera = PinholeCamera::ideal(640, 480, 500.0, 500.0, 320.0, 240.0);
        let trajectory = Trajectory::Arc {
            radius: 6.0,
            angle: 0.5,
        };
        let a = SyntheticScene::new(&mut SmallRng::seed_from_u64(4), 50, 1.5, 5, trajectory);
        let b = SyntheticScene::new(&mut SmallRng::seed_from_u64(4), 50, 1.5, 5, trajectory);
        assert_eq!(a.object_points(), b.object_points());

        let mut rng = SmallRng::seed_from_u64(1);
        let observations = a.observations(&camera, 2, &mut rng, 0.0, 0.0);
        // the whole box is inside the view
        assert_eq!(observations.len(), 50);
        for (id, image_point) in observations {
            assert_eq!(Some(image_point), a.observation(&camera, 2, id));
        }
    }

    #[test]
    fn test_line_trajectory() {
        let trajectory = Trajectory::Line {
            distance: 5.0,
            length: 2.0,
        };
        let scene = SyntheticScene::new(&mut SmallRng::seed_from_u64(2), 10, 1.0, 3, trajectory);
        assert_eq!(scene.number_frames(), 3);
        assert!((scene.world_t_camera(0).translation.vector.x + 1.0).abs() < 1e-12);
        assert!((scene.world_t_camera(2).translation.vector.x - 1.0).abs() < 1e-12);
    }
}
