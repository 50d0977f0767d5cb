//! Tracking core of a monocular visual SLAM system.
//!
//! Camera poses are estimated from correspondences between tracked image points and a map of
//! localized 3D object points, the map points are re-optimized and rated by the geometry of
//! their observations.

pub mod camera;
pub mod config;
pub mod geometry;
pub mod global_types;
pub mod save;
pub mod simulation;
pub mod tracking;
pub mod utility;
