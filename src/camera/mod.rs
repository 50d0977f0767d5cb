//! Camera models.
//!
//! All projection functions with an `_if` suffix expect the inverted and flipped
//! camera pose (`flipped_camera_T_world`), in which a visible point has a
//! positive z coordinate.

mod pinhole_camera;
pub use pinhole_camera::{PinholeCamera, PinholeParameters};

use std::path::Path;

use crate::global_types::{HomogenousMatrix4, Matrix2x3, Vector2, Vector3, NUMERIC_EPS};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CameraType {
    /// Ideal pinhole, intrinsics only.
    Pinhole,
    /// Pinhole with radial and tangential distortion.
    PinholeDistorted,
}

/// Capabilities every camera model offers to the tracking core.
pub trait CameraTrait {
    fn width(&self) -> u32;
    fn height(&self) -> u32;
    fn camera_type(&self) -> CameraType;

    /// Projects a point given in the flipped camera coordinate system.
    fn project_to_image_if_camera_point(&self, camera_point: &Vector3) -> Vector2;

    /// Returns the viewing ray (z == 1) of an image point in the flipped camera coordinate system.
    fn vector_if(&self, image_point: &Vector2) -> Vector3;

    /// Jacobian of the projection with respect to the flipped camera point.
    fn point_jacobian_2x3_if(&self, camera_point: &Vector3) -> Matrix2x3;

    fn project_to_image_if(
        &self,
        flipped_camera_t_world: &HomogenousMatrix4,
        world_point: &Vector3,
    ) -> Vector2 {
        let camera_point = flipped_camera_t_world.transform_point(&(*world_point).into());
        self.project_to_image_if_camera_point(&camera_point.coords)
    }

    fn is_inside(&self, image_point: &Vector2) -> bool {
        image_point.x >= 0.0
            && image_point.y >= 0.0
            && image_point.x < self.width() as f64
            && image_point.y < self.height() as f64
    }
}

/// Returns whether a world point lies in front of a camera, given the flipped camera pose.
#[inline]
pub fn is_object_point_in_front_if(
    flipped_camera_t_world: &HomogenousMatrix4,
    world_point: &Vector3,
) -> bool {
    flipped_camera_t_world
        .transform_point(&(*world_point).into())
        .z
        > NUMERIC_EPS
}

/// Camera parameter files.
pub trait CameraParametersTrait: Sized {
    const CAMERA_TYPE: &'static str;
    fn read_from_json(path: impl AsRef<Path>) -> anyhow::Result<Self>;
    fn write_to_json(&self, path: impl AsRef<Path>) -> anyhow::Result<()>;
}
