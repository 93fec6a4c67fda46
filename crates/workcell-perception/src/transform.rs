//! Rigid-body transform primitives.
//!
//! [`Vec3`], [`Quaternion`] and [`Transform3D`] are the math types used by the
//! [`FrameBuffer`][crate::frame_buffer::FrameBuffer] and the
//! [`PoseResolver`][crate::pose_resolver::PoseResolver].  The wire types in
//! `workcell-types` ([`Pose`], [`Point`], [`Orientation`]) convert into and
//! out of them.
//!
//! # Example
//!
//! ```rust
//! use workcell_perception::transform::{Quaternion, Transform3D, Vec3};
//!
//! // camera is 1 m above the world origin, same orientation.
//! let world_camera = Transform3D::new(Vec3::new(0.0, 0.0, 1.0), Quaternion::identity());
//! // an object 0.5 m in front of the camera.
//! let camera_object = Transform3D::new(Vec3::new(0.5, 0.0, 0.0), Quaternion::identity());
//!
//! let world_object = world_camera.compose(camera_object);
//! assert!((world_object.translation.z - 1.0).abs() < 1e-9);
//! assert!((world_object.translation.x - 0.5).abs() < 1e-9);
//! ```

use std::f64::consts::FRAC_PI_2;

use workcell_types::{Orientation, Point, Pose, Rpy};

/// Above this dot product two rotations are interpolated linearly instead of
/// spherically.
const SLERP_LINEAR_THRESHOLD: f64 = 0.9995;

// ────────────────────────────────────────────────────────────────────────────
// Primitive types
// ────────────────────────────────────────────────────────────────────────────

/// A 3-D translation vector.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3 {
    /// Create a new vector.
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// The zero vector.
    pub fn zero() -> Self {
        Self::new(0.0, 0.0, 0.0)
    }

    pub fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }

    pub fn scale(self, k: f64) -> Self {
        Self::new(self.x * k, self.y * k, self.z * k)
    }

    pub fn neg(self) -> Self {
        self.scale(-1.0)
    }

    /// Linear interpolation: `t = 0` gives `self`, `t = 1` gives `rhs`.
    pub fn lerp(self, rhs: Self, t: f64) -> Self {
        self.add(rhs.add(self.neg()).scale(t))
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

impl From<Point> for Vec3 {
    fn from(p: Point) -> Self {
        Self::new(p.x, p.y, p.z)
    }
}

impl From<Vec3> for Point {
    fn from(v: Vec3) -> Self {
        Point::new(v.x, v.y, v.z)
    }
}

/// A unit quaternion representing a 3-D rotation (w, x, y, z convention).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quaternion {
    pub w: f64,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Quaternion {
    /// Create a quaternion.  The caller is responsible for providing a unit
    /// quaternion (|q| = 1); see [`Quaternion::normalized`].
    pub fn new(w: f64, x: f64, y: f64, z: f64) -> Self {
        Self { w, x, y, z }
    }

    /// The identity rotation (no rotation).
    pub fn identity() -> Self {
        Self::new(1.0, 0.0, 0.0, 0.0)
    }

    /// Build a rotation from fixed-axis XYZ angles: roll about X, then pitch
    /// about Y, then yaw about Z (`q = Rz(yaw) · Ry(pitch) · Rx(roll)`).
    pub fn from_rpy(roll: f64, pitch: f64, yaw: f64) -> Self {
        let (sr, cr) = (roll * 0.5).sin_cos();
        let (sp, cp) = (pitch * 0.5).sin_cos();
        let (sy, cy) = (yaw * 0.5).sin_cos();
        Self::new(
            cr * cp * cy + sr * sp * sy,
            sr * cp * cy - cr * sp * sy,
            cr * sp * cy + sr * cp * sy,
            cr * cp * sy - sr * sp * cy,
        )
    }

    /// Decompose into fixed-axis XYZ angles, the inverse of
    /// [`Quaternion::from_rpy`].  At gimbal lock pitch is clamped to ±π/2.
    pub fn to_rpy(self) -> Rpy {
        let Self { w, x, y, z } = self;

        let roll = (2.0 * (w * x + y * z)).atan2(1.0 - 2.0 * (x * x + y * y));

        let sin_pitch = 2.0 * (w * y - z * x);
        let pitch = if sin_pitch.abs() >= 1.0 {
            FRAC_PI_2.copysign(sin_pitch)
        } else {
            sin_pitch.asin()
        };

        let yaw = (2.0 * (w * z + x * y)).atan2(1.0 - 2.0 * (y * y + z * z));

        Rpy { roll, pitch, yaw }
    }

    pub fn norm_squared(self) -> f64 {
        self.w * self.w + self.x * self.x + self.y * self.y + self.z * self.z
    }

    pub fn dot(self, rhs: Self) -> f64 {
        self.w * rhs.w + self.x * rhs.x + self.y * rhs.y + self.z * rhs.z
    }

    /// Scale to unit length.  Returns `None` for a zero or non-finite
    /// quaternion.
    pub fn normalized(self) -> Option<Self> {
        let n = self.norm_squared().sqrt();
        if !n.is_finite() || n == 0.0 {
            return None;
        }
        Some(Self::new(self.w / n, self.x / n, self.y / n, self.z / n))
    }

    /// Hamilton product: compose two rotations.
    pub fn mul(self, rhs: Self) -> Self {
        Self::new(
            self.w * rhs.w - self.x * rhs.x - self.y * rhs.y - self.z * rhs.z,
            self.w * rhs.x + self.x * rhs.w + self.y * rhs.z - self.z * rhs.y,
            self.w * rhs.y - self.x * rhs.z + self.y * rhs.w + self.z * rhs.x,
            self.w * rhs.z + self.x * rhs.y - self.y * rhs.x + self.z * rhs.w,
        )
    }

    /// Conjugate (== inverse for a unit quaternion).
    pub fn conjugate(self) -> Self {
        Self::new(self.w, -self.x, -self.y, -self.z)
    }

    /// Rotate a vector by this quaternion: p' = q * p * q*.
    pub fn rotate(self, v: Vec3) -> Vec3 {
        let p = Self::new(0.0, v.x, v.y, v.z);
        let rotated = self.mul(p).mul(self.conjugate());
        Vec3::new(rotated.x, rotated.y, rotated.z)
    }

    /// Spherical linear interpolation along the shorter arc.
    pub fn slerp(self, rhs: Self, t: f64) -> Self {
        let mut cos_theta = self.dot(rhs);
        let mut rhs = rhs;
        if cos_theta < 0.0 {
            rhs = Self::new(-rhs.w, -rhs.x, -rhs.y, -rhs.z);
            cos_theta = -cos_theta;
        }

        let (wa, wb) = if cos_theta > SLERP_LINEAR_THRESHOLD {
            (1.0 - t, t)
        } else {
            let theta = cos_theta.acos();
            let sin_theta = theta.sin();
            (
                ((1.0 - t) * theta).sin() / sin_theta,
                (t * theta).sin() / sin_theta,
            )
        };

        let blended = Self::new(
            wa * self.w + wb * rhs.w,
            wa * self.x + wb * rhs.x,
            wa * self.y + wb * rhs.y,
            wa * self.z + wb * rhs.z,
        );
        blended.normalized().unwrap_or(self)
    }
}

impl From<Orientation> for Quaternion {
    fn from(o: Orientation) -> Self {
        Self::new(o.w, o.x, o.y, o.z)
    }
}

impl From<Quaternion> for Orientation {
    fn from(q: Quaternion) -> Self {
        Orientation::new(q.x, q.y, q.z, q.w)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Transform3D
// ────────────────────────────────────────────────────────────────────────────

/// A rigid-body 3-D transform: translation followed by rotation.
///
/// Represents the pose of frame B relative to frame A: to convert a point
/// expressed in frame B into frame A, rotate it by `rotation` then add
/// `translation`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform3D {
    pub translation: Vec3,
    pub rotation: Quaternion,
}

impl Transform3D {
    /// Create a transform from a translation and rotation.
    pub fn new(translation: Vec3, rotation: Quaternion) -> Self {
        Self {
            translation,
            rotation,
        }
    }

    /// The identity transform (no translation, no rotation).
    pub fn identity() -> Self {
        Self::new(Vec3::zero(), Quaternion::identity())
    }

    /// Interpret a pose as the transform from its frame to the posed object.
    pub fn from_pose(pose: &Pose) -> Self {
        Self::new(pose.position.into(), pose.orientation.into())
    }

    pub fn to_pose(self) -> Pose {
        Pose {
            position: self.translation.into(),
            orientation: self.rotation.into(),
        }
    }

    /// Compose two transforms: `self` applied first, then `other`.
    ///
    /// If `self` = T_A_B and `other` = T_B_C, the result is T_A_C.
    pub fn compose(self, other: Self) -> Self {
        let translated = self.translation.add(self.rotation.rotate(other.translation));
        let rotated = self.rotation.mul(other.rotation);
        Self::new(translated, rotated)
    }

    /// If `self` = T_A_B, returns T_B_A.
    pub fn inverse(self) -> Self {
        let inv_rotation = self.rotation.conjugate();
        Self::new(inv_rotation.rotate(self.translation).neg(), inv_rotation)
    }

    /// Re-express `pose` (given in frame B) in frame A, where `self` = T_A_B.
    pub fn apply_to_pose(self, pose: &Pose) -> Pose {
        self.compose(Self::from_pose(pose)).to_pose()
    }

    /// Blend between two samples of the same edge: `t = 0` gives `self`,
    /// `t = 1` gives `other`.
    pub fn interpolate(self, other: Self, t: f64) -> Self {
        Self::new(
            self.translation.lerp(other.translation, t),
            self.rotation.slerp(other.rotation, t),
        )
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::{FRAC_1_SQRT_2, FRAC_PI_4};

    const EPS: f64 = 1e-9;

    // ── Quaternion ──────────────────────────────────────────────────────────

    #[test]
    fn quaternion_identity_rotate_is_noop() {
        let r = Quaternion::identity().rotate(Vec3::new(1.0, 2.0, 3.0));
        assert!((r.x - 1.0).abs() < EPS);
        assert!((r.y - 2.0).abs() < EPS);
        assert!((r.z - 3.0).abs() < EPS);
    }

    #[test]
    fn quaternion_90deg_yaw_rotates_x_to_y() {
        let q = Quaternion::new(FRAC_1_SQRT_2, 0.0, 0.0, FRAC_1_SQRT_2);
        let r = q.rotate(Vec3::new(1.0, 0.0, 0.0));
        assert!(r.x.abs() < EPS, "x should be ~0, got {}", r.x);
        assert!((r.y - 1.0).abs() < EPS, "y should be ~1, got {}", r.y);
        assert!(r.z.abs() < EPS);
    }

    #[test]
    fn quaternion_conjugate_is_inverse() {
        let q = Quaternion::new(FRAC_1_SQRT_2, 0.0, 0.0, FRAC_1_SQRT_2);
        let prod = q.mul(q.conjugate());
        assert!((prod.w - 1.0).abs() < EPS);
        assert!(prod.x.abs() < EPS);
        assert!(prod.y.abs() < EPS);
        assert!(prod.z.abs() < EPS);
    }

    #[test]
    fn rpy_roundtrip_through_quaternion() {
        let (roll, pitch, yaw) = (0.3, -0.7, 2.1);
        let rpy = Quaternion::from_rpy(roll, pitch, yaw).to_rpy();
        assert!((rpy.roll - roll).abs() < EPS);
        assert!((rpy.pitch - pitch).abs() < EPS);
        assert!((rpy.yaw - yaw).abs() < EPS);
    }

    #[test]
    fn pure_yaw_quaternion_has_only_yaw() {
        let q = Quaternion::new(FRAC_1_SQRT_2, 0.0, 0.0, FRAC_1_SQRT_2);
        let rpy = q.to_rpy();
        assert!(rpy.roll.abs() < EPS);
        assert!(rpy.pitch.abs() < EPS);
        assert!((rpy.yaw - FRAC_PI_2).abs() < EPS);
    }

    #[test]
    fn gimbal_lock_pitch_is_clamped() {
        let rpy = Quaternion::from_rpy(0.0, FRAC_PI_2, 0.0).to_rpy();
        assert!((rpy.pitch - FRAC_PI_2).abs() < 1e-6);
    }

    #[test]
    fn normalized_rejects_zero() {
        assert!(Quaternion::new(0.0, 0.0, 0.0, 0.0).normalized().is_none());
        let q = Quaternion::new(2.0, 0.0, 0.0, 0.0).normalized().unwrap();
        assert!((q.w - 1.0).abs() < EPS);
    }

    #[test]
    fn slerp_halfway_between_identity_and_90deg_yaw_is_45deg() {
        let q90 = Quaternion::from_rpy(0.0, 0.0, FRAC_PI_2);
        let half = Quaternion::identity().slerp(q90, 0.5);
        assert!((half.to_rpy().yaw - FRAC_PI_4).abs() < 1e-9);
    }

    // ── Transform3D ─────────────────────────────────────────────────────────

    #[test]
    fn transform_compose_translations_add() {
        let t1 = Transform3D::new(Vec3::new(1.0, 0.0, 0.0), Quaternion::identity());
        let t2 = Transform3D::new(Vec3::new(2.0, 0.0, 0.0), Quaternion::identity());
        assert!((t1.compose(t2).translation.x - 3.0).abs() < EPS);
    }

    #[test]
    fn transform_inverse_composes_to_identity() {
        let t = Transform3D::new(
            Vec3::new(1.0, -2.0, 0.5),
            Quaternion::from_rpy(0.1, 0.2, 0.3),
        );
        let id = t.compose(t.inverse());
        assert!(id.translation.x.abs() < EPS);
        assert!(id.translation.y.abs() < EPS);
        assert!(id.translation.z.abs() < EPS);
        assert!((id.rotation.w.abs() - 1.0).abs() < EPS);
    }

    #[test]
    fn apply_to_pose_rotates_and_translates() {
        // camera at (1, 0, 2) in world, yawed 90°.
        let world_camera = Transform3D::new(
            Vec3::new(1.0, 0.0, 2.0),
            Quaternion::from_rpy(0.0, 0.0, FRAC_PI_2),
        );
        // object 1 m along the camera's +X axis.
        let pose = Pose {
            position: Point::new(1.0, 0.0, 0.0),
            orientation: Orientation::identity(),
        };
        let world = world_camera.apply_to_pose(&pose);
        assert!((world.position.x - 1.0).abs() < EPS);
        assert!((world.position.y - 1.0).abs() < EPS);
        assert!((world.position.z - 2.0).abs() < EPS);

        let yaw = Quaternion::from(world.orientation).to_rpy().yaw;
        assert!((yaw - FRAC_PI_2).abs() < EPS);
    }

    #[test]
    fn interpolate_midpoint() {
        let a = Transform3D::new(Vec3::new(0.0, 0.0, 0.0), Quaternion::identity());
        let b = Transform3D::new(Vec3::new(2.0, 4.0, 0.0), Quaternion::identity());
        let mid = a.interpolate(b, 0.5);
        assert!((mid.translation.x - 1.0).abs() < EPS);
        assert!((mid.translation.y - 2.0).abs() < EPS);
    }
}
