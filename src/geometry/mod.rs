//! Geometry primitives used by the tracking core.
//!
//! Camera poses come in two conventions:
//! - standard `world_T_camera`: the camera looks towards its negative z axis, y is up.
//! - inverted flipped `flipped_camera_T_world`: the camera looks towards its positive z axis,
//!   which is the convention all projection math (`*_if` functions) works in.

mod estimator;
mod gravity;
pub mod non_linear_optimization;
pub mod p3p;
pub mod ransac;

pub use estimator::EstimatorType;
pub use gravity::GravityConstraints;

use crate::global_types::{HomogenousMatrix4, Vector3};

/// Rotation of 180 degrees around the x axis.
#[inline]
fn flip_transformation() -> HomogenousMatrix4 {
    HomogenousMatrix4::from_parts(
        nalgebra::Translation3::identity(),
        nalgebra::UnitQuaternion::from_axis_angle(&Vector3::x_axis(), std::f64::consts::PI),
    )
}

/// `world_T_camera` -> `flipped_camera_T_world`.
#[inline]
pub fn standard_to_inverted_flipped(world_t_camera: &HomogenousMatrix4) -> HomogenousMatrix4 {
    (world_t_camera * flip_transformation()).inverse()
}

/// `flipped_camera_T_world` -> `world_T_camera`.
#[inline]
pub fn inverted_flipped_to_standard(flipped_camera_t_world: &HomogenousMatrix4) -> HomogenousMatrix4 {
    flipped_camera_t_world.inverse() * flip_transformation()
}

/// Builds a standard camera pose located at `eye`, looking at `target`.
pub fn look_at(eye: &Vector3, target: &Vector3, up: &Vector3) -> HomogenousMatrix4 {
    // face_towards maps +z onto the viewing direction, the standard camera looks along -z
    let behind = eye + (eye - target);
    HomogenousMatrix4::face_towards(&(*eye).into(), &behind.into(), up)
}
