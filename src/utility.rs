use crate::global_types::{Matrix3, Vector3};

pub struct Utility {}

impl Utility {
    /// Small-angle rotation update.
    #[inline]
    pub fn delta_quat(theta: Vector3) -> nalgebra::UnitQuaternion<f64> {
        let half_theta = theta / 2.0;
        let q = nalgebra::Quaternion::new(1.0, half_theta.x, half_theta.y, half_theta.z);
        nalgebra::UnitQuaternion::from_quaternion(q)
    }

    /// Skew-symmetric matrix so that `skew(a) * b == a.cross(&b)`.
    #[inline]
    pub fn skew_symmetric(v: &Vector3) -> Matrix3 {
        Matrix3::new(0.0, -v.z, v.y, v.z, 0.0, -v.x, -v.y, v.x, 0.0)
    }

    /// Median of the given values, the upper median for an even count.
    pub fn median(values: &mut [f64]) -> Option<f64> {
        if values.is_empty() {
            return None;
        }
        let middle = values.len() / 2;
        let (_, median, _) = values.select_nth_unstable_by(middle, |a, b| a.total_cmp(b));
        Some(*median)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_skew_symmetric() {
        let a = Vector3::new(1.0, -2.0, 0.5);
        let b = Vector3::new(0.3, 4.0, -1.0);
        let expected = a.cross(&b);
        let result = Utility::skew_symmetric(&a) * b;
        assert!((expected - result).norm() < 1e-12);
    }

    #[test]
    fn test_delta_quat_small_angle() {
        let theta = Vector3::new(1e-4, -2e-4, 3e-4);
        let q = Utility::delta_quat(theta);
        assert!((q.scaled_axis() - theta).norm() < 1e-10);
    }

    #[test]
    fn test_median() {
        let mut values = vec![5.0, 1.0, 3.0, 2.0];
        assert_eq!(Utility::median(&mut values), Some(3.0));
        let mut empty: Vec<f64> = vec![];
        assert_eq!(Utility::median(&mut empty), None);
    }
}
