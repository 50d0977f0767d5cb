use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::geometry::{EstimatorType, GravityConstraints};
use crate::global_types::Vector3;

/// Minimal number of localized object points visible in a frame before its pose is estimated.
pub const MIN_POSE_CANDIDATES: usize = 20;
/// Minimal number of RANSAC inliers.
pub const RANSAC_MINIMAL_CORRESPONDENCES: usize = 5;
pub const RANSAC_ITERATIONS: usize = 50;

pub const POSE_OPTIMIZATION_ITERATIONS: usize = 20;
pub const OBJECT_POINT_OPTIMIZATION_ITERATIONS: usize = 20;
/// Initial Levenberg-Marquardt damping.
pub const OPTIMIZATION_LAMBDA: f64 = 0.001;
pub const OPTIMIZATION_LAMBDA_FACTOR: f64 = 5.0;

/// Up to this number of camera poses, a point is classified as low precision without
/// analyzing its covariance.
pub const LOW_PRECISION_POSE_COUNT: usize = 5;
/// Largest ratio of the two major covariance eigenvalues for a high precision point (7^2).
pub const HIGH_PRECISION_EIGEN_RATIO: f64 = 49.0;
/// Largest ratio of the two major covariance eigenvalues for a medium precision point (14^2).
pub const MEDIUM_PRECISION_EIGEN_RATIO: f64 = 196.0;

/// Tunable parameters of the frame tracker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Minimal number of correspondences a pose must be supported by.
    pub min_correspondences: usize,
    /// Maximal projection error of an inlier, in pixel.
    pub max_projection_error: f64,
    pub estimator_type: EstimatorType,
    pub random_seed: u64,
    /// Minimal number of observations to re-optimize an object point.
    pub min_object_point_observations: usize,
    /// Weight of the gravity prior, gravity is not used if unset.
    pub gravity_weight_factor: Option<f64>,
    /// Maximal deviation from the measured gravity, in radian.
    pub gravity_max_angle: Option<f64>,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            min_correspondences: 20,
            max_projection_error: 3.5,
            estimator_type: EstimatorType::Huber,
            random_seed: 0,
            min_object_point_observations: 3,
            gravity_weight_factor: None,
            gravity_max_angle: None,
        }
    }
}

impl TrackerConfig {
    pub fn from_json_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let file = std::fs::File::open(path)
            .with_context(|| format!("failed to open config file {}", path.display()))?;
        let config: Self = serde_json::from_reader(std::io::BufReader::new(file))
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        if config.max_projection_error <= 0.0 {
            anyhow::bail!("max_projection_error must be positive");
        }
        Ok(config)
    }

    pub fn write_json_file(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let file = std::fs::File::create(path.as_ref())?;
        serde_json::to_writer_pretty(std::io::BufWriter::new(file), self)?;
        Ok(())
    }

    /// Gravity prior for a measured camera gravity, if enabled.
    pub fn gravity_constraints(&self, camera_gravity_in_camera: &Vector3) -> Option<GravityConstraints> {
        let weight_factor = self.gravity_weight_factor?;
        let max_angle = self.gravity_max_angle.unwrap_or(std::f64::consts::FRAC_PI_8);
        GravityConstraints::with_default_world_gravity(*camera_gravity_in_camera, weight_factor, max_angle)
    }
}
