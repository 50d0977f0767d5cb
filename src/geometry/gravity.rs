use crate::global_types::{HomogenousMatrix4, Vector3, NUMERIC_WEAK_EPS};

/// Gravity prior for pose estimation, e.g., measured by an IMU.
#[derive(Debug, Clone, PartialEq)]
pub struct GravityConstraints {
    /// Gravity direction in the standard camera coordinate system, unit length.
    camera_gravity_in_camera: Vector3,
    /// Gravity direction in world, unit length.
    world_gravity_in_world: Vector3,
    /// Weight of the gravity residual relative to one squared pixel error.
    weight_factor: f64,
    /// Maximal angle between measured and estimated gravity, in radian.
    max_angle: f64,
}

impl GravityConstraints {
    pub fn new(
        camera_gravity_in_camera: Vector3,
        world_gravity_in_world: Vector3,
        weight_factor: f64,
        max_angle: f64,
    ) -> Option<Self> {
        if camera_gravity_in_camera.norm() < NUMERIC_WEAK_EPS
            || world_gravity_in_world.norm() < NUMERIC_WEAK_EPS
            || weight_factor < 0.0
            || max_angle <= 0.0
        {
            return None;
        }
        Some(Self {
            camera_gravity_in_camera: camera_gravity_in_camera.normalize(),
            world_gravity_in_world: world_gravity_in_world.normalize(),
            weight_factor,
            max_angle,
        })
    }

    /// Gravity in world is the negative y axis.
    pub fn with_default_world_gravity(
        camera_gravity_in_camera: Vector3,
        weight_factor: f64,
        max_angle: f64,
    ) -> Option<Self> {
        Self::new(
            camera_gravity_in_camera,
            -Vector3::y(),
            weight_factor,
            max_angle,
        )
    }

    pub fn weight_factor(&self) -> f64 {
        self.weight_factor
    }

    pub fn max_angle(&self) -> f64 {
        self.max_angle
    }

    /// Measured gravity in the flipped camera coordinate system.
    pub fn camera_gravity_in_flipped_camera(&self) -> Vector3 {
        Vector3::new(
            self.camera_gravity_in_camera.x,
            -self.camera_gravity_in_camera.y,
            -self.camera_gravity_in_camera.z,
        )
    }

    /// World gravity rotated into the flipped camera coordinate system of a pose.
    pub fn world_gravity_in_flipped_camera_if(&self, flipped_camera_t_world: &HomogenousMatrix4) -> Vector3 {
        flipped_camera_t_world.rotation * self.world_gravity_in_world
    }

    /// Angle between measured gravity and the gravity a pose implies, in radian.
    pub fn angle_if(&self, flipped_camera_t_world: &HomogenousMatrix4) -> f64 {
        let expected = self.world_gravity_in_flipped_camera_if(flipped_camera_t_world);
        let measured = self.camera_gravity_in_flipped_camera();
        expected.dot(&measured).clamp(-1.0, 1.0).acos()
    }

    pub fn is_satisfied_if(&self, flipped_camera_t_world: &HomogenousMatrix4) -> bool {
        self.angle_if(flipped_camera_t_world) <= self.max_angle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::standard_to_inverted_flipped;

    #[test]
    fn test_gravity_angle() {
        // upright camera, gravity points down in camera and world
        let world_t_camera = HomogenousMatrix4::identity();
        let flipped = standard_to_inverted_flipped(&world_t_camera);
        let gravity =
            GravityConstraints::with_default_world_gravity(-Vector3::y(), 1.0, 0.1).unwrap();
        assert!(gravity.angle_if(&flipped) < 1e-9);
        assert!(gravity.is_satisfied_if(&flipped));

        let rolled = HomogenousMatrix4::from_parts(
            nalgebra::Translation3::identity(),
            nalgebra::UnitQuaternion::from_axis_angle(&Vector3::z_axis(), 0.5),
        );
        let flipped = standard_to_inverted_flipped(&rolled);
        assert!((gravity.angle_if(&flipped) - 0.5).abs() < 1e-9);
        assert!(!gravity.is_satisfied_if(&flipped));
    }

    #[test]
    fn test_invalid_constraints() {
        assert!(GravityConstraints::new(Vector3::zeros(), -Vector3::y(), 1.0, 0.1).is_none());
        assert!(GravityConstraints::new(-Vector3::y(), -Vector3::y(), 1.0, 0.0).is_none());
    }
}
