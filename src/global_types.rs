//! Shared scalar, index and vector aliases.

pub type Scalar = f64;

/// 32 bit index as used by the binary map format.
pub type Index32 = u32;
/// Index of a video frame.
pub type FrameIndex = Index32;
/// Unique id of a 3D object point.
pub type ObjectPointId = Index32;
/// Generation tag of the 3D point map.
pub type MapVersion = u32;

pub const INVALID_INDEX: Index32 = Index32::MAX;

pub type Vector2 = nalgebra::Vector2<Scalar>;
pub type Vector3 = nalgebra::Vector3<Scalar>;
pub type Matrix3 = nalgebra::Matrix3<Scalar>;
pub type Matrix2x3 = nalgebra::Matrix2x3<Scalar>;
/// Rigid 6-DOF transformation.
pub type HomogenousMatrix4 = nalgebra::Isometry3<Scalar>;

/// Smallest positive value treated as non-zero.
pub const NUMERIC_EPS: Scalar = 1e-12;
/// Tolerance used for geometric comparisons (depth, normalization).
pub const NUMERIC_WEAK_EPS: Scalar = 1e-6;

#[test]
fn test_invalid_index() {
    let frame_index: FrameIndex = INVALID_INDEX;
    assert_eq!(frame_index, u32::MAX);
    assert!(NUMERIC_EPS < NUMERIC_WEAK_EPS);
}
