//! Pose and orientation math.
//!
//! Converts the planar `(x, y, yaw)` poses of a trajectory into full 3-D
//! poses and extracts roll/pitch/yaw back out of quaternions.  Angles are
//! radians throughout; quaternions use the (w, x, y, z) convention and the
//! Euler convention is intrinsic Z-Y-X (yaw, then pitch, then roll).
//!
//! # Example
//!
//! ```rust
//! use groundtex_perception::transform::{quaternion_from_yaw, rpy_from_quaternion, wrap_angle};
//! use std::f64::consts::PI;
//!
//! let q = quaternion_from_yaw(3.0 * PI);
//! let (_, _, yaw) = rpy_from_quaternion(&q);
//! assert!(wrap_angle(yaw - PI).abs() < 1e-12);
//! ```

use std::f64::consts::FRAC_PI_2;

use groundtex_types::{Pose2D, Pose3D, Quaternion, Vec3};

/// Below this distance from ±1 the pitch is treated as exactly ±π/2.
const GIMBAL_TOLERANCE: f64 = 1e-15;

// ────────────────────────────────────────────────────────────────────────────
// Quaternion construction
// ────────────────────────────────────────────────────────────────────────────

/// Build a unit quaternion from roll, pitch and yaw.
pub fn quaternion_from_euler(roll: f64, pitch: f64, yaw: f64) -> Quaternion {
    let (sr, cr) = (roll * 0.5).sin_cos();
    let (sp, cp) = (pitch * 0.5).sin_cos();
    let (sy, cy) = (yaw * 0.5).sin_cos();

    Quaternion::new(
        cr * cp * cy + sr * sp * sy,
        sr * cp * cy - cr * sp * sy,
        cr * sp * cy + sr * cp * sy,
        cr * cp * sy - sr * sp * cy,
    )
}

/// Rotation with zero roll, zero pitch and the given yaw.
///
/// `yaw = 0` yields exactly the identity quaternion.  Any yaw is accepted;
/// `yaw` and `yaw + 2π` may come back as `q` and `-q`.
pub fn quaternion_from_yaw(yaw: f64) -> Quaternion {
    quaternion_from_euler(0.0, 0.0, yaw)
}

// ────────────────────────────────────────────────────────────────────────────
// Extraction
// ────────────────────────────────────────────────────────────────────────────

/// Extract `(roll, pitch, yaw)` from a unit quaternion.
///
/// Every angle is in `[-π, π]` (pitch in `[-π/2, π/2]`).  At gimbal lock the
/// yaw is pinned to zero and the whole rotation is reported as roll.
///
/// The identity quaternion extracts as `(0.0, -0.0, 0.0)`: the pitch term is
/// `-2 * 0`, and the negative zero is kept rather than normalised away.
pub fn rpy_from_quaternion(q: &Quaternion) -> (f64, f64, f64) {
    let (w, x, y, z) = (q.w, q.x, q.y, q.z);
    let squ = w * w;
    let sqx = x * x;
    let sqy = y * y;
    let sqz = z * z;

    let sarg = -2.0 * (x * z - w * y);
    let pitch = if sarg <= -1.0 {
        -FRAC_PI_2
    } else if sarg >= 1.0 {
        FRAC_PI_2
    } else {
        sarg.asin()
    };

    if (sarg - 1.0).abs() < GIMBAL_TOLERANCE {
        let roll = (2.0 * (x * y - z * w)).atan2(squ - sqx + sqy - sqz);
        (roll, pitch, 0.0)
    } else if (sarg + 1.0).abs() < GIMBAL_TOLERANCE {
        let roll = (-2.0 * (x * y - z * w)).atan2(squ - sqx + sqy - sqz);
        (roll, pitch, 0.0)
    } else {
        let roll = (2.0 * (y * z + w * x)).atan2(squ - sqx - sqy + sqz);
        let yaw = (2.0 * (x * y + w * z)).atan2(squ + sqx - sqy - sqz);
        (roll, pitch, yaw)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Poses and angles
// ────────────────────────────────────────────────────────────────────────────

/// Lift a planar pose to 3-D with `z = 0`.
pub fn pose_from_pose2d(pose: &Pose2D) -> Pose3D {
    Pose3D::new(
        Vec3::new(pose.x, pose.y, 0.0),
        quaternion_from_yaw(pose.yaw),
    )
}

/// Map any angle to `[-π, π]` via `atan2(sin a, cos a)`.
pub fn wrap_angle(angle: f64) -> f64 {
    angle.sin().atan2(angle.cos())
}

/// Signed shortest rotation from `b` to `a`.
pub fn angle_difference(a: f64, b: f64) -> f64 {
    wrap_angle(a - b)
}

/// `true` when `a` and `b` encode the same rotation within `tolerance`,
/// accepting either sign of the quaternion.
pub fn same_rotation(a: &Quaternion, b: &Quaternion, tolerance: f64) -> bool {
    let close = |s: f64| {
        (a.w - s * b.w).abs() <= tolerance
            && (a.x - s * b.x).abs() <= tolerance
            && (a.y - s * b.y).abs() <= tolerance
            && (a.z - s * b.z).abs() <= tolerance
    };
    close(1.0) || close(-1.0)
}

/// Component-wise comparison of two poses: x, y, z and roll, pitch, yaw must
/// each differ by at most `tolerance` (angles compared after wrapping).
pub fn poses_within_tolerance(a: &Pose3D, b: &Pose3D, tolerance: f64) -> bool {
    let (ar, ap, ay) = rpy_from_quaternion(&a.orientation);
    let (br, bp, by) = rpy_from_quaternion(&b.orientation);

    (a.position.x - b.position.x).abs() <= tolerance
        && (a.position.y - b.position.y).abs() <= tolerance
        && (a.position.z - b.position.z).abs() <= tolerance
        && angle_difference(ar, br).abs() <= tolerance
        && angle_difference(ap, bp).abs() <= tolerance
        && angle_difference(ay, by).abs() <= tolerance
}

// ────────────────────────────────────────────────────────────────────────────
// Composition and homogeneous matrices
// ────────────────────────────────────────────────────────────────────────────

/// Row-major 4×4 homogeneous transform.
///
/// Products accumulate from `+0.0`, so a zero entry never prints as `-0`.
pub type Matrix4 = [[f64; 4]; 4];

pub const IDENTITY_MATRIX: Matrix4 = [
    [1.0, 0.0, 0.0, 0.0],
    [0.0, 1.0, 0.0, 0.0],
    [0.0, 0.0, 1.0, 0.0],
    [0.0, 0.0, 0.0, 1.0],
];

/// Hamilton product `a * b`: rotate by `b`, then by `a`.
pub fn quaternion_multiply(a: &Quaternion, b: &Quaternion) -> Quaternion {
    Quaternion::new(
        a.w * b.w - a.x * b.x - a.y * b.y - a.z * b.z,
        a.w * b.x + a.x * b.w + a.y * b.z - a.z * b.y,
        a.w * b.y - a.x * b.z + a.y * b.w + a.z * b.x,
        a.w * b.z + a.x * b.y - a.y * b.x + a.z * b.w,
    )
}

/// 3×3 rotation matrix of a unit quaternion.
pub fn rotation_matrix(q: &Quaternion) -> [[f64; 3]; 3] {
    let (w, x, y, z) = (q.w, q.x, q.y, q.z);
    [
        [
            1.0 - 2.0 * (y * y + z * z),
            2.0 * (x * y - w * z),
            2.0 * (x * z + w * y),
        ],
        [
            2.0 * (x * y + w * z),
            1.0 - 2.0 * (x * x + z * z),
            2.0 * (y * z - w * x),
        ],
        [
            2.0 * (x * z - w * y),
            2.0 * (y * z + w * x),
            1.0 - 2.0 * (x * x + y * y),
        ],
    ]
}

/// Pose of `child`, given relative to `parent`, expressed in `parent`'s
/// frame of reference.
pub fn compose_poses(parent: &Pose3D, child: &Pose3D) -> Pose3D {
    let r = rotation_matrix(&parent.orientation);
    let c = child.position;
    let p = parent.position;
    Pose3D::new(
        Vec3::new(
            p.x + r[0][0] * c.x + r[0][1] * c.y + r[0][2] * c.z,
            p.y + r[1][0] * c.x + r[1][1] * c.y + r[1][2] * c.z,
            p.z + r[2][0] * c.x + r[2][1] * c.y + r[2][2] * c.z,
        ),
        quaternion_multiply(&parent.orientation, &child.orientation),
    )
}

/// Homogeneous transform of a pose.
pub fn matrix_from_pose(pose: &Pose3D) -> Matrix4 {
    let r = rotation_matrix(&pose.orientation);
    let p = pose.position;
    [
        [r[0][0], r[0][1], r[0][2], p.x],
        [r[1][0], r[1][1], r[1][2], p.y],
        [r[2][0], r[2][1], r[2][2], p.z],
        [0.0, 0.0, 0.0, 1.0],
    ]
}

/// Homogeneous transform from a position and roll/pitch/yaw, composed as
/// `Rx(roll) · Ry(pitch) · Rz(yaw)`.
///
/// For yaw-only poses this agrees with [`matrix_from_pose`] of
/// [`pose_from_pose2d`].
pub fn transform_matrix(x: f64, y: f64, z: f64, roll: f64, pitch: f64, yaw: f64) -> Matrix4 {
    let (sr, cr) = roll.sin_cos();
    let (sp, cp) = pitch.sin_cos();
    let (sy, cy) = yaw.sin_cos();
    let rx = [[1.0, 0.0, 0.0], [0.0, cr, -sr], [0.0, sr, cr]];
    let ry = [[cp, 0.0, sp], [0.0, 1.0, 0.0], [-sp, 0.0, cp]];
    let rz = [[cy, -sy, 0.0], [sy, cy, 0.0], [0.0, 0.0, 1.0]];
    let r = mul3(&mul3(&rx, &ry), &rz);
    [
        [r[0][0], r[0][1], r[0][2], x],
        [r[1][0], r[1][1], r[1][2], y],
        [r[2][0], r[2][1], r[2][2], z],
        [0.0, 0.0, 0.0, 1.0],
    ]
}

pub fn matrix_multiply(a: &Matrix4, b: &Matrix4) -> Matrix4 {
    let mut out = [[0.0; 4]; 4];
    for (i, row) in out.iter_mut().enumerate() {
        for (j, cell) in row.iter_mut().enumerate() {
            *cell = (0..4).fold(0.0, |acc, k| acc + a[i][k] * b[k][j]);
        }
    }
    out
}

/// `m · [x, y, z, w]ᵀ`.
pub fn transform_point(m: &Matrix4, p: [f64; 4]) -> [f64; 4] {
    let mut out = [0.0; 4];
    for (i, cell) in out.iter_mut().enumerate() {
        *cell = (0..4).fold(0.0, |acc, k| acc + m[i][k] * p[k]);
    }
    out
}

/// Inverse of a rigid transform: transposed rotation, back-rotated
/// translation.  Only valid when the upper-left block is a rotation.
pub fn rigid_inverse(m: &Matrix4) -> Matrix4 {
    let mut out = IDENTITY_MATRIX;
    for i in 0..3 {
        for j in 0..3 {
            out[i][j] = m[j][i];
        }
        out[i][3] = -(0..3).fold(0.0, |acc, k| acc + m[k][i] * m[k][3]);
    }
    out
}

fn mul3(a: &[[f64; 3]; 3], b: &[[f64; 3]; 3]) -> [[f64; 3]; 3] {
    let mut out = [[0.0; 3]; 3];
    for (i, row) in out.iter_mut().enumerate() {
        for (j, cell) in row.iter_mut().enumerate() {
            *cell = (0..3).fold(0.0, |acc, k| acc + a[i][k] * b[k][j]);
        }
    }
    out
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::{FRAC_1_SQRT_2, FRAC_PI_4, PI};

    /// Yaw-only quaternions must have zero x/y and match (z, w) up to sign.
    fn assert_yaw_quaternion(q: &Quaternion, z: f64, w: f64) {
        assert!(q.x.abs() < 1e-12, "x should be 0, got {}", q.x);
        assert!(q.y.abs() < 1e-12, "y should be 0, got {}", q.y);
        let expected = Quaternion::new(w, 0.0, 0.0, z);
        assert!(
            same_rotation(q, &expected, 1e-10),
            "{q:?} is not the same rotation as {expected:?}"
        );
    }

    // ── quaternion_from_yaw ────────────────────────────────────────────────

    #[test]
    fn zero_yaw_is_identity() {
        assert_eq!(quaternion_from_yaw(0.0), Quaternion::identity());
    }

    #[test]
    fn yaw_pi_both_directions() {
        assert_yaw_quaternion(&quaternion_from_yaw(PI), 1.0, 0.0);
        assert_yaw_quaternion(&quaternion_from_yaw(-PI), 1.0, 0.0);
    }

    #[test]
    fn yaw_quarter_pi() {
        let yaw = FRAC_PI_4;
        assert_yaw_quaternion(&quaternion_from_yaw(yaw), (yaw / 2.0).sin(), (yaw / 2.0).cos());
        assert_yaw_quaternion(
            &quaternion_from_yaw(-yaw),
            (-yaw / 2.0).sin(),
            (-yaw / 2.0).cos(),
        );
    }

    #[test]
    fn full_turn_is_identity_up_to_sign() {
        assert_yaw_quaternion(&quaternion_from_yaw(2.0 * PI), 0.0, 1.0);
        assert_yaw_quaternion(&quaternion_from_yaw(-2.0 * PI), 0.0, 1.0);
    }

    #[test]
    fn quaternion_is_unit_length() {
        for yaw in [-7.0, -1.3, 0.2, 2.9, 11.0] {
            let q = quaternion_from_yaw(yaw);
            let norm = (q.w * q.w + q.x * q.x + q.y * q.y + q.z * q.z).sqrt();
            assert!((norm - 1.0).abs() < 1e-12);
        }
    }

    // ── rpy_from_quaternion ────────────────────────────────────────────────

    #[test]
    fn identity_extracts_negative_zero_pitch() {
        let (roll, pitch, yaw) = rpy_from_quaternion(&Quaternion::identity());
        assert_eq!(roll, 0.0);
        assert_eq!(pitch, 0.0);
        assert!(pitch.is_sign_negative(), "pitch should be -0.0");
        assert_eq!(yaw, 0.0);
        assert_eq!(format!("{roll},{pitch},{yaw}"), "0,-0,0");
    }

    #[test]
    fn yaw_roundtrips_through_quaternion() {
        let mut yaw = -10.0;
        while yaw <= 10.0 {
            let (roll, pitch, extracted) = rpy_from_quaternion(&quaternion_from_yaw(yaw));
            assert!(roll.abs() < 1e-12);
            assert!(pitch.abs() < 1e-12);
            assert!(
                angle_difference(extracted, wrap_angle(yaw)).abs() < 1e-12,
                "yaw {yaw} extracted as {extracted}"
            );
            assert!((-PI..=PI).contains(&extracted));
            yaw += 0.37;
        }
    }

    #[test]
    fn three_pi_extracts_as_pi() {
        let (_, _, yaw) = rpy_from_quaternion(&quaternion_from_yaw(3.0 * PI));
        assert!((yaw.abs() - PI).abs() < 1e-12, "got {yaw}");
        assert!(yaw.abs() <= PI);
    }

    #[test]
    fn full_euler_roundtrip() {
        let (roll, pitch, yaw) = (0.3, -0.2, 1.1);
        let q = quaternion_from_euler(roll, pitch, yaw);
        let (r, p, y) = rpy_from_quaternion(&q);
        assert!((r - roll).abs() < 1e-12);
        assert!((p - pitch).abs() < 1e-12);
        assert!((y - yaw).abs() < 1e-12);
    }

    #[test]
    fn gimbal_lock_reports_zero_yaw() {
        let q = Quaternion::new(FRAC_1_SQRT_2, 0.0, FRAC_1_SQRT_2, 0.0);
        let (_, pitch, yaw) = rpy_from_quaternion(&q);
        assert!((pitch - FRAC_PI_2).abs() < 1e-6);
        assert_eq!(yaw, 0.0);
    }

    // ── pose_from_pose2d ───────────────────────────────────────────────────

    #[test]
    fn pose2d_lifts_to_ground_plane() {
        for pose in [
            Pose2D::default(),
            Pose2D::new(1.0, 2.5, PI / 2.0),
            Pose2D::new(-4.5, -5.6, -PI / 4.0),
        ] {
            let lifted = pose_from_pose2d(&pose);
            assert_eq!(lifted.position.x, pose.x);
            assert_eq!(lifted.position.y, pose.y);
            assert_eq!(lifted.position.z, 0.0);
            assert_yaw_quaternion(
                &lifted.orientation,
                (pose.yaw / 2.0).sin(),
                (pose.yaw / 2.0).cos(),
            );
        }
    }

    // ── wrap_angle ─────────────────────────────────────────────────────────

    #[test]
    fn wrap_known_values() {
        assert_eq!(wrap_angle(0.0), 0.0);
        assert!((wrap_angle(3.0 * PI) - PI).abs() < 1e-12);
        assert!((wrap_angle(-3.0 * PI) + PI).abs() < 1e-12);
        assert!((wrap_angle(2.0 * PI)).abs() < 1e-12);
        assert!((wrap_angle(PI / 2.0 + 4.0 * PI) - PI / 2.0).abs() < 1e-12);
    }

    #[test]
    fn wrap_is_idempotent_and_bounded() {
        let mut angle = -50.0;
        while angle <= 50.0 {
            let once = wrap_angle(angle);
            assert!((-PI..=PI).contains(&once), "{angle} wrapped to {once}");
            assert_eq!(wrap_angle(once), once);
            angle += 0.731;
        }
    }

    // ── comparisons ────────────────────────────────────────────────────────

    #[test]
    fn same_rotation_accepts_negated_quaternion() {
        let q = quaternion_from_yaw(0.8);
        let neg = Quaternion::new(-q.w, -q.x, -q.y, -q.z);
        assert!(same_rotation(&q, &neg, 1e-12));
        assert!(!same_rotation(&q, &quaternion_from_yaw(0.9), 1e-6));
    }

    #[test]
    fn poses_within_tolerance_wraps_yaw() {
        let a = Pose3D::new(Vec3::new(1.0, 2.0, 0.25), quaternion_from_yaw(PI - 1e-9));
        let b = Pose3D::new(Vec3::new(1.0, 2.0, 0.25), quaternion_from_yaw(-PI + 1e-9));
        assert!(poses_within_tolerance(&a, &b, 1e-6));

        let moved = Pose3D::new(Vec3::new(1.0 + 1e-3, 2.0, 0.25), a.orientation);
        assert!(!poses_within_tolerance(&a, &moved, 1e-6));
    }

    // ── composition and matrices ───────────────────────────────────────────

    fn assert_matrix_close(a: &Matrix4, b: &Matrix4) {
        for i in 0..4 {
            for j in 0..4 {
                assert!(
                    (a[i][j] - b[i][j]).abs() < 1e-12,
                    "[{i}][{j}]: {} vs {}",
                    a[i][j],
                    b[i][j]
                );
            }
        }
    }

    #[test]
    fn compose_with_identity_child_lifts_exactly() {
        let base = pose_from_pose2d(&Pose2D::new(1.5, -2.0, 0.7));
        let mount = Pose3D::new(Vec3::new(0.0, 0.0, 0.25), Quaternion::identity());
        let camera = compose_poses(&base, &mount);

        assert_eq!(camera.position, Vec3::new(1.5, -2.0, 0.25));
        assert_eq!(camera.orientation, base.orientation);
    }

    #[test]
    fn compose_rotates_child_offset() {
        let base = pose_from_pose2d(&Pose2D::new(1.0, 1.0, FRAC_PI_2));
        let forward = Pose3D::new(Vec3::new(0.5, 0.0, 0.0), quaternion_from_yaw(FRAC_PI_2));
        let out = compose_poses(&base, &forward);

        assert!((out.position.x - 1.0).abs() < 1e-12);
        assert!((out.position.y - 1.5).abs() < 1e-12);
        let (_, _, yaw) = rpy_from_quaternion(&out.orientation);
        assert!(angle_difference(yaw, PI).abs() < 1e-12);
    }

    #[test]
    fn yaw_only_matrices_agree() {
        let from_pose = matrix_from_pose(&pose_from_pose2d(&Pose2D::new(3.0, -1.0, -2.2)));
        let direct = transform_matrix(3.0, -1.0, 0.0, 0.0, 0.0, -2.2);
        assert_matrix_close(&from_pose, &direct);
    }

    #[test]
    fn roll_pitch_yaw_order() {
        // Rx(π/2) · Rz(π/2) sends x to z.
        let m = transform_matrix(0.0, 0.0, 0.0, FRAC_PI_2, 0.0, FRAC_PI_2);
        let p = transform_point(&m, [1.0, 0.0, 0.0, 1.0]);
        assert!(p[0].abs() < 1e-12 && p[1].abs() < 1e-12);
        assert!((p[2] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn rigid_inverse_undoes_transform() {
        let m = transform_matrix(0.4, -1.2, 0.3, 0.1, -0.2, 2.5);
        assert_matrix_close(&matrix_multiply(&m, &rigid_inverse(&m)), &IDENTITY_MATRIX);
        assert_matrix_close(&matrix_multiply(&rigid_inverse(&m), &m), &IDENTITY_MATRIX);
    }

    #[test]
    fn quaternion_product_matches_matrix_product() {
        let a = quaternion_from_euler(0.3, -0.4, 1.1);
        let b = quaternion_from_euler(-0.2, 0.5, -2.0);
        let pa = Pose3D::new(Vec3::default(), a);
        let pb = Pose3D::new(Vec3::default(), b);
        let product = Pose3D::new(Vec3::default(), quaternion_multiply(&a, &b));
        assert_matrix_close(
            &matrix_from_pose(&product),
            &matrix_multiply(&matrix_from_pose(&pa), &matrix_from_pose(&pb)),
        );
    }
}
