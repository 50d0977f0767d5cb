use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use super::{CameraParametersTrait, CameraTrait, CameraType};
use crate::global_types::{Matrix2x3, Vector2, Vector3, NUMERIC_EPS};

/// Number of fixed-point iterations used to undistort an image point.
const UNDISTORTION_ITERATIONS: usize = 30;

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct PinholeParameters {
    pub model_type: String,
    pub camera_name: String,
    // size
    pub image_width: u32,
    pub image_height: u32,
    // intrinsic
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
    // distortion
    #[serde(default)]
    pub k1: f64,
    #[serde(default)]
    pub k2: f64,
    #[serde(default)]
    pub p1: f64,
    #[serde(default)]
    pub p2: f64,
}

impl CameraParametersTrait for PinholeParameters {
    const CAMERA_TYPE: &'static str = "PINHOLE";

    fn read_from_json(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let file = std::fs::File::open(path)
            .with_context(|| format!("failed to open camera file {}", path.display()))?;
        let parameters: Self = serde_json::from_reader(std::io::BufReader::new(file))
            .with_context(|| format!("failed to parse camera file {}", path.display()))?;
        if parameters.model_type != Self::CAMERA_TYPE {
            anyhow::bail!(
                "model type is {}, expected {}",
                parameters.model_type,
                Self::CAMERA_TYPE
            );
        }
        Ok(parameters)
    }

    fn write_to_json(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let file = std::fs::File::create(path.as_ref())?;
        serde_json::to_writer_pretty(std::io::BufWriter::new(file), self)?;
        Ok(())
    }
}

#[derive(Debug, Default, Clone)]
pub struct PinholeCamera {
    pub parameters: PinholeParameters,
    pub has_distortion: bool,
    pub inv_fx: f64,
    pub inv_fy: f64,
}

impl PinholeCamera {
    pub fn new(camera_file: impl AsRef<Path>) -> anyhow::Result<Self> {
        Ok(Self::from_parameters(PinholeParameters::read_from_json(
            camera_file,
        )?))
    }

    pub fn from_parameters(parameters: PinholeParameters) -> Self {
        let has_distortion = parameters.k1 != 0.0
            || parameters.k2 != 0.0
            || parameters.p1 != 0.0
            || parameters.p2 != 0.0;
        Self {
            inv_fx: 1.0 / parameters.fx,
            inv_fy: 1.0 / parameters.fy,
            has_distortion,
            parameters,
        }
    }

    /// Camera without distortion.
    pub fn ideal(width: u32, height: u32, fx: f64, fy: f64, cx: f64, cy: f64) -> Self {
        Self::from_parameters(PinholeParameters {
            model_type: PinholeParameters::CAMERA_TYPE.to_string(),
            camera_name: "ideal".to_string(),
            image_width: width,
            image_height: height,
            fx,
            fy,
            cx,
            cy,
            ..Default::default()
        })
    }

    /// Applies the distortion to a normalized image point.
    fn distort(&self, x: f64, y: f64) -> (f64, f64) {
        if !self.has_distortion {
            return (x, y);
        }
        let p = &self.parameters;
        let r2 = x * x + y * y;
        let radial = 1.0 + p.k1 * r2 + p.k2 * r2 * r2;
        let xd = x * radial + 2.0 * p.p1 * x * y + p.p2 * (r2 + 2.0 * x * x);
        let yd = y * radial + p.p1 * (r2 + 2.0 * y * y) + 2.0 * p.p2 * x * y;
        (xd, yd)
    }

    /// Jacobian of the distortion with respect to the normalized image point.
    fn distortion_jacobian(&self, x: f64, y: f64) -> nalgebra::Matrix2<f64> {
        if !self.has_distortion {
            return nalgebra::Matrix2::identity();
        }
        let p = &self.parameters;
        let r2 = x * x + y * y;
        let radial = 1.0 + p.k1 * r2 + p.k2 * r2 * r2;
        let radial_dr2 = p.k1 + 2.0 * p.k2 * r2;
        let radial_dx = 2.0 * x * radial_dr2;
        let radial_dy = 2.0 * y * radial_dr2;

        let dxd_dx = radial + x * radial_dx + 2.0 * p.p1 * y + 6.0 * p.p2 * x;
        let dxd_dy = x * radial_dy + 2.0 * p.p1 * x + 2.0 * p.p2 * y;
        let dyd_dx = y * radial_dx + 2.0 * p.p1 * x + 2.0 * p.p2 * y;
        let dyd_dy = radial + y * radial_dy + 6.0 * p.p1 * y + 2.0 * p.p2 * x;

        nalgebra::Matrix2::new(dxd_dx, dxd_dy, dyd_dx, dyd_dy)
    }
}

impl CameraTrait for PinholeCamera {
    fn width(&self) -> u32 {
        self.parameters.image_width
    }

    fn height(&self) -> u32 {
        self.parameters.image_height
    }

    fn camera_type(&self) -> CameraType {
        if self.has_distortion {
            CameraType::PinholeDistorted
        } else {
            CameraType::Pinhole
        }
    }

    fn project_to_image_if_camera_point(&self, camera_point: &Vector3) -> Vector2 {
        debug_assert!(camera_point.z.abs() > NUMERIC_EPS);
        let inv_z = 1.0 / camera_point.z;
        let (xd, yd) = self.distort(camera_point.x * inv_z, camera_point.y * inv_z);
        Vector2::new(
            xd * self.parameters.fx + self.parameters.cx,
            yd * self.parameters.fy + self.parameters.cy,
        )
    }

    fn vector_if(&self, image_point: &Vector2) -> Vector3 {
        let xd = (image_point.x - self.parameters.cx) * self.inv_fx;
        let yd = (image_point.y - self.parameters.cy) * self.inv_fy;

        if !self.has_distortion {
            return Vector3::new(xd, yd, 1.0);
        }

        let (mut x, mut y) = (xd, yd);
        for _ in 0..UNDISTORTION_ITERATIONS {
            let (dx, dy) = self.distort(x, y);
            x += xd - dx;
            y += yd - dy;
        }
        Vector3::new(x, y, 1.0)
    }

    fn point_jacobian_2x3_if(&self, camera_point: &Vector3) -> Matrix2x3 {
        debug_assert!(camera_point.z.abs() > NUMERIC_EPS);
        let inv_z = 1.0 / camera_point.z;
        let x = camera_point.x * inv_z;
        let y = camera_point.y * inv_z;

        // d(x, y) / d(X, Y, Z)
        let normalized_jacobian = Matrix2x3::new(inv_z, 0.0, -x * inv_z, 0.0, inv_z, -y * inv_z);
        let focal = nalgebra::Matrix2::new(self.parameters.fx, 0.0, 0.0, self.parameters.fy);

        focal * self.distortion_jacobian(x, y) * normalized_jacobian
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn distorted_camera() -> PinholeCamera {
        PinholeCamera::from_parameters(PinholeParameters {
            model_type: PinholeParameters::CAMERA_TYPE.to_string(),
            camera_name: "cam0".to_string(),
            image_width: 752,
            image_height: 480,
            fx: 458.654,
            fy: 457.296,
            cx: 367.215,
            cy: 248.375,
            k1: -0.28340811,
            k2: 0.07395907,
            p1: 0.00019359,
            p2: 1.76187114e-05,
        })
    }

    #[test]
    fn test_projection_round_trip() {
        let camera = distorted_camera();
        assert_eq!(camera.camera_type(), CameraType::PinholeDistorted);

        let image_point = Vector2::new(200.0, 300.0);
        let ray = camera.vector_if(&image_point);
        let projected = camera.project_to_image_if_camera_point(&(ray * 3.0));
        assert!((projected - image_point).norm() < 1e-6);
    }

    #[test]
    fn test_point_jacobian_matches_finite_differences() {
        for camera in [
            PinholeCamera::ideal(640, 480, 500.0, 510.0, 320.0, 240.0),
            distorted_camera(),
        ] {
            let point = Vector3::new(0.3, -0.2, 2.5);
            let jacobian = camera.point_jacobian_2x3_if(&point);

            let step = 1e-6;
            for axis in 0..3 {
                let mut delta = Vector3::zeros();
                delta[axis] = step;
                let plus = camera.project_to_image_if_camera_point(&(point + delta));
                let minus = camera.project_to_image_if_camera_point(&(point - delta));
                let numeric = (plus - minus) / (2.0 * step);
                assert!((numeric - jacobian.column(axis)).norm() < 1e-3);
            }
        }
    }

    #[test]
    fn test_parameters_json() {
        let parameters = distorted_camera().parameters;
        let path = std::env::temp_dir().join("mono_slam_rs_cam0_pinhole.json");
        parameters.write_to_json(&path).unwrap();
        let read = PinholeParameters::read_from_json(&path).unwrap();
        assert_eq!(parameters, read);
        std::fs::remove_file(&path).ok();
    }
}
