//! Minimal perspective-three-point solver.
//!
//! Lambda Twist (Persson and Nordberg, ECCV 2018): solves `lambda_i * y_i = R * x_i + t`
//! for three world points `x_i` and their bearing vectors `y_i`, returning up to four
//! `flipped_camera_T_world` candidates.

use arrayvec::ArrayVec;

use crate::global_types::{HomogenousMatrix4, Matrix3, Vector3};

const REFINEMENT_ITERATIONS: usize = 5;
const ROTATION_ITERATIONS: usize = 100;
const ROTATION_EPSILON: f64 = 1e-12;

/// Determines up to four poses from three correspondences.
///
/// `bearings` are the viewing rays of the image points in the flipped camera coordinate system,
/// they do not need to be normalized.
pub fn poses(
    object_points: &[Vector3; 3],
    bearings: &[Vector3; 3],
) -> ArrayVec<HomogenousMatrix4, 4> {
    let mut result = ArrayVec::new();

    let y = [
        bearings[0].normalize(),
        bearings[1].normalize(),
        bearings[2].normalize(),
    ];
    if y.iter().any(|v| !v.iter().all(|c| c.is_finite())) {
        return result;
    }

    let d12 = object_points[0] - object_points[1];
    let d13 = object_points[0] - object_points[2];
    let d23 = object_points[1] - object_points[2];
    let d12xd13 = d12.cross(&d13);

    let a12 = d12.norm_squared();
    let a13 = d13.norm_squared();
    let a23 = d23.norm_squared();

    let c12 = y[0].dot(&y[1]);
    let c23 = y[1].dot(&y[2]);
    let c31 = y[2].dot(&y[0]);
    let blob = c12 * c23 * c31 - 1.0;

    let s12_sqr = 1.0 - c12 * c12;
    let s23_sqr = 1.0 - c23 * c23;
    let s31_sqr = 1.0 - c31 * c31;

    let b12 = -2.0 * c12;
    let b13 = -2.0 * c31;
    let b23 = -2.0 * c23;

    // cubic in the paper's equation (10)
    let p3 = a13 * (a23 * s31_sqr - a13 * s23_sqr);
    let p2 = 2.0 * blob * a23 * a13 + a13 * (2.0 * a12 + a13) * s23_sqr + a23 * (a23 - a12) * s31_sqr;
    let p1 = a23 * (a13 - a23) * s12_sqr - a12 * a12 * s23_sqr - 2.0 * a12 * (blob * a23 + a13 * s23_sqr);
    let p0 = a12 * (a12 * s23_sqr - a23 * s12_sqr);

    if p3.abs() < f64::EPSILON {
        return result;
    }

    let g = cubic_root(p2 / p3, p1 / p3, p0 / p3);

    #[rustfmt::skip]
    let d0 = Matrix3::new(
        a23 * (1.0 - g),   -(a23 * c12),                 a23 * c31 * g,
        -(a23 * c12),      a23 - a12 + a13 * g,          -c23 * (a13 * g - a12),
        a23 * c31 * g,     -c23 * (a13 * g - a12),       g * (a13 - a23) - a12,
    );

    let (eigenvectors, eigenvalues) = eigen_decomposition_singular(&d0);
    if eigenvalues[0].abs() < f64::EPSILON {
        return result;
    }

    let mut lambdas: ArrayVec<Vector3, 4> = ArrayVec::new();
    let eigen_ratio = (0.0f64.max(-eigenvalues[1] / eigenvalues[0])).sqrt();

    for ratio in [eigen_ratio, -eigen_ratio] {
        // equation (15)
        let w2 = 1.0 / (ratio * eigenvectors.m12 - eigenvectors.m11);
        let w0 = w2 * (eigenvectors.m21 - ratio * eigenvectors.m22);
        let w1 = w2 * (eigenvectors.m31 - ratio * eigenvectors.m32);

        let a = 1.0 / ((a13 - a12) * w1 * w1 - a12 * b13 * w1 - a12);
        let b = a * (a13 * b12 * w1 - a12 * b13 * w0 - 2.0 * w0 * w1 * (a12 - a13));
        let c = a * ((a13 - a12) * w0 * w0 + a13 * b12 * w0 + a13);

        if b * b - 4.0 * c < 0.0 {
            continue;
        }

        let (_, tau1, tau2) = quadratic_roots(b, c);
        for tau in [tau1, tau2] {
            if tau <= 0.0 {
                continue;
            }
            // equation (16)
            let d = a23 / (tau * (b23 + tau) + 1.0);
            if d <= 0.0 {
                continue;
            }
            let l2 = d.sqrt();
            let l3 = tau * l2;
            let l1 = w0 * l2 + w1 * l3;
            if l1 >= 0.0 && !lambdas.is_full() {
                lambdas.push(Vector3::new(l1, l2, l3));
            }
        }
    }

    #[rustfmt::skip]
    let x_matrix = Matrix3::new(
        d12.x, d13.x, d12xd13.x,
        d12.y, d13.y, d12xd13.y,
        d12.z, d13.z, d12xd13.z,
    );
    let Some(x_inverse) = x_matrix.try_inverse() else {
        return result;
    };

    for lambda in lambdas {
        let lambda = refine_lambda(lambda, a12, a13, a23, b12, b13, b23);

        let ry1 = y[0] * lambda.x;
        let ry2 = y[1] * lambda.y;
        let ry3 = y[2] * lambda.z;

        let yd1 = ry1 - ry2;
        let yd2 = ry1 - ry3;
        let yd1xd2 = yd1.cross(&yd2);

        #[rustfmt::skip]
        let y_matrix = Matrix3::new(
            yd1.x, yd2.x, yd1xd2.x,
            yd1.y, yd2.y, yd1xd2.y,
            yd1.z, yd2.z, yd1xd2.z,
        );

        let rotation = nalgebra::Rotation3::from_matrix_eps(
            &(y_matrix * x_inverse),
            ROTATION_EPSILON,
            ROTATION_ITERATIONS,
            nalgebra::Rotation3::identity(),
        );
        let translation = ry1 - rotation * object_points[0];

        if translation.iter().all(|v| v.is_finite()) {
            result.push(HomogenousMatrix4::from_parts(
                nalgebra::Translation3::from(translation),
                nalgebra::UnitQuaternion::from_rotation_matrix(&rotation),
            ));
        }
    }

    result
}

/// Gauss-Newton refinement of the three depths.
fn refine_lambda(lambda: Vector3, a12: f64, a13: f64, a23: f64, b12: f64, b13: f64, b23: f64) -> Vector3 {
    let residual = |l: &Vector3| {
        Vector3::new(
            l.x * l.x + l.y * l.y + b12 * l.x * l.y - a12,
            l.x * l.x + l.z * l.z + b13 * l.x * l.z - a13,
            l.y * l.y + l.z * l.z + b23 * l.y * l.z - a23,
        )
    };

    let mut lambda = lambda;
    let mut res = residual(&lambda);

    for _ in 0..REFINEMENT_ITERATIONS {
        if res.abs().sum() < 1e-10 {
            break;
        }

        let (l1, l2, l3) = (lambda.x, lambda.y, lambda.z);
        let dr1dl1 = 2.0 * l1 + b12 * l2;
        let dr1dl2 = 2.0 * l2 + b12 * l1;
        let dr2dl1 = 2.0 * l1 + b13 * l3;
        let dr2dl3 = 2.0 * l3 + b13 * l1;
        let dr3dl2 = 2.0 * l2 + b23 * l3;
        let dr3dl3 = 2.0 * l3 + b23 * l2;
        let det = 1.0 / (-dr1dl1 * dr2dl3 * dr3dl2 - dr1dl2 * dr2dl1 * dr3dl3);

        #[rustfmt::skip]
        let inverse_jacobian = Matrix3::new(
            -dr2dl3 * dr3dl2, -dr1dl2 * dr3dl3,  dr1dl2 * dr2dl3,
            -dr2dl1 * dr3dl3,  dr1dl1 * dr3dl3, -dr1dl1 * dr2dl3,
             dr2dl1 * dr3dl2, -dr1dl1 * dr3dl2, -dr1dl2 * dr2dl1,
        );

        let candidate = lambda - det * (inverse_jacobian * res);
        let candidate_res = residual(&candidate);
        if candidate_res.abs().sum() > res.abs().sum() {
            break;
        }
        lambda = candidate;
        res = candidate_res;
    }

    lambda
}

/// Real roots of `r^2 + b * r + c = 0`, the boolean is false for complex roots.
fn quadratic_roots(b: f64, c: f64) -> (bool, f64, f64) {
    let discriminant = b * b - 4.0 * c;
    if discriminant < 0.0 {
        let root = 0.5 * b;
        (false, root, root)
    } else if b < 0.0 {
        let y = discriminant.sqrt();
        (true, 0.5 * (-b + y), 0.5 * (-b - y))
    } else {
        let y = discriminant.sqrt();
        (true, 2.0 * c / (-b + y), 2.0 * c / (-b - y))
    }
}

/// One real root of `r^3 + b * r^2 + c * r + d = 0`, chosen where the derivative is large.
fn cubic_root(b: f64, c: f64, d: f64) -> f64 {
    let mut r0;
    if b * b >= 3.0 * c {
        // two stationary points
        let v = (b * b - 3.0 * c).sqrt();
        let t1 = (-b - v) / 3.0;
        let k = ((t1 + b) * t1 + c) * t1 + d;

        if k > 0.0 {
            r0 = t1 - (-k / (3.0 * t1 + b)).sqrt();
        } else {
            let t2 = (-b + v) / 3.0;
            let k = ((t2 + b) * t2 + c) * t2 + d;
            r0 = t2 + (-k / (3.0 * t2 + b)).sqrt();
        }
    } else {
        r0 = -b / 3.0;
        if ((3.0 * r0 + 2.0 * b) * r0 + c).abs() < 1e-4 {
            r0 += 1.0;
        }
    }

    for iteration in 0..50 {
        let fx = ((r0 + b) * r0 + c) * r0 + d;
        if iteration >= 7 && fx.abs() <= 1e-13 {
            break;
        }
        let fpx = (3.0 * r0 + 2.0 * b) * r0 + c;
        r0 -= fx / fpx;
    }
    r0
}

/// Eigen decomposition of a symmetric matrix with one zero eigenvalue.
///
/// Returns the eigenvectors as columns and the eigenvalues, the first eigenvalue has the
/// larger magnitude, the last one is zero.
fn eigen_decomposition_singular(x: &Matrix3) -> (Matrix3, Vector3) {
    let mut v3 = Vector3::new(
        x[1] * x[5] - x[2] * x[4],
        x[2] * x[3] - x[5] * x[0],
        x[4] * x[0] - x[1] * x[3],
    );
    v3.normalize_mut();

    let x12_sqr = x.m12 * x.m12;
    let b = -x.m11 - x.m22 - x.m33;
    let c = -x12_sqr - x.m13 * x.m13 - x.m23 * x.m23 + x.m11 * (x.m22 + x.m33) + x.m22 * x.m33;
    let (_, mut e1, mut e2) = quadratic_roots(b, c);
    if e1.abs() < e2.abs() {
        std::mem::swap(&mut e1, &mut e2);
    }

    let mx0011 = -x.m11 * x.m22;
    let prec_0 = x.m12 * x.m23 - x.m13 * x.m22;
    let prec_1 = x.m12 * x.m13 - x.m11 * x.m23;

    let eigenvector = |e: f64| {
        let tmp = 1.0 / (e * (x.m11 + x.m22) + mx0011 - e * e + x12_sqr);
        let a1 = -(e * x.m13 + prec_0) * tmp;
        let a2 = -(e * x.m23 + prec_1) * tmp;
        let rnorm = 1.0 / (a1 * a1 + a2 * a2 + 1.0).sqrt();
        Vector3::new(a1 * rnorm, a2 * rnorm, rnorm)
    };
    let v1 = eigenvector(e1);
    let v2 = eigenvector(e2);

    (
        Matrix3::from_columns(&[v1, v2, v3]),
        Vector3::new(e1, e2, 0.0),
    )
}
