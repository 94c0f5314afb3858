//! 3-D math: vectors, quaternions and rigid transforms
//!
//! Axis convention (fixed at build, ambisonics style):
//! - forward = +X
//! - up      = +Z
//! - right   = -Y
//!
//! Azimuth is measured anti-clockwise from forward (so +90 degrees is the
//! listener's left); elevation is measured from the horizontal plane and
//! reported in the [0, 90] U [270, 360) range used by the HRTF tables.

use serde::{Deserialize, Serialize};

use crate::orientation::elevation_to_0_90_270_360;

/// 3-D vector / position
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vector3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vector3 {
    pub const ZERO: Self = Self {
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    /// Unit vector pointing forward (+X)
    pub fn forward() -> Self {
        Self::new(1.0, 0.0, 0.0)
    }

    /// Unit vector pointing up (+Z)
    pub fn up() -> Self {
        Self::new(0.0, 0.0, 1.0)
    }

    /// Unit vector pointing to the right (-Y)
    pub fn right() -> Self {
        Self::new(0.0, -1.0, 0.0)
    }

    pub fn dot(&self, other: &Self) -> f32 {
        self.x * other.x + self.y * other.y + self.z * other.z
    }

    pub fn cross(&self, other: &Self) -> Self {
        Self::new(
            self.y * other.z - self.z * other.y,
            self.z * other.x - self.x * other.z,
            self.x * other.y - self.y * other.x,
        )
    }

    /// Distance from the origin
    pub fn magnitude(&self) -> f32 {
        self.dot(self).sqrt()
    }

    pub fn normalize(&self) -> Self {
        let mag = self.magnitude();
        if mag < 1e-10 {
            return Self::forward();
        }
        Self::new(self.x / mag, self.y / mag, self.z / mag)
    }

    pub fn distance_to(&self, other: &Self) -> f32 {
        (*other - *self).magnitude()
    }

    pub fn lerp(&self, other: &Self, t: f32) -> Self {
        *self + (*other - *self) * t
    }

    /// Azimuth in degrees, anti-clockwise from forward, in [0, 360)
    pub fn azimuth_degrees(&self) -> f32 {
        if self.x == 0.0 && self.y == 0.0 {
            return 0.0;
        }
        let azimuth = self.y.atan2(self.x).to_degrees();
        crate::orientation::azimuth_to_0_360(azimuth)
    }

    /// Elevation in degrees from the horizontal, in [0, 90] U [270, 360)
    pub fn elevation_degrees(&self) -> f32 {
        let horizontal = (self.x * self.x + self.y * self.y).sqrt();
        if horizontal == 0.0 && self.z == 0.0 {
            return 0.0;
        }
        let elevation = self.z.atan2(horizontal).to_degrees();
        elevation_to_0_90_270_360(elevation)
    }

    /// Interaural azimuth in degrees: the angle between this vector and the
    /// median (sagittal) plane, positive towards the right ear.
    pub fn interaural_azimuth_degrees(&self) -> f32 {
        let distance = self.magnitude();
        if distance < 1e-10 {
            return 0.0;
        }
        // Right axis is -Y under the build convention.
        ((-self.y / distance).clamp(-1.0, 1.0)).asin().to_degrees()
    }
}

impl std::ops::Add for Vector3 {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl std::ops::Sub for Vector3 {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        Self::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl std::ops::Mul<f32> for Vector3 {
    type Output = Self;
    fn mul(self, rhs: f32) -> Self {
        Self::new(self.x * rhs, self.y * rhs, self.z * rhs)
    }
}

impl std::ops::Neg for Vector3 {
    type Output = Self;
    fn neg(self) -> Self {
        Self::new(-self.x, -self.y, -self.z)
    }
}

/// Unit quaternion for orientations
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quaternion {
    pub w: f32,
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Quaternion {
    /// Identity rotation
    pub const UNIT: Self = Self {
        w: 1.0,
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    pub fn new(x: f32, y: f32, z: f32, w: f32) -> Self {
        Self { w, x, y, z }
    }

    /// Rotation of `angle_radians` around `axis`
    pub fn from_axis_angle(axis: Vector3, angle_radians: f32) -> Self {
        let axis = axis.normalize();
        let half = angle_radians * 0.5;
        let sin_half = half.sin();
        Self {
            w: half.cos(),
            x: axis.x * sin_half,
            y: axis.y * sin_half,
            z: axis.z * sin_half,
        }
    }

    /// Build from yaw (about up), pitch (about right) and roll (about
    /// forward), all in radians, applied in that order.
    pub fn from_yaw_pitch_roll(yaw: f32, pitch: f32, roll: f32) -> Self {
        let q_yaw = Self::from_axis_angle(Vector3::up(), yaw);
        let q_pitch = Self::from_axis_angle(Vector3::right(), pitch);
        let q_roll = Self::from_axis_angle(Vector3::forward(), roll);
        (q_yaw * q_pitch * q_roll).normalize()
    }

    /// Inverse rotation (conjugate; valid for unit quaternions)
    pub fn inverse(&self) -> Self {
        Self {
            w: self.w,
            x: -self.x,
            y: -self.y,
            z: -self.z,
        }
    }

    pub fn normalize(&self) -> Self {
        let norm =
            (self.w * self.w + self.x * self.x + self.y * self.y + self.z * self.z).sqrt();
        if norm < 1e-10 {
            return Self::UNIT;
        }
        Self {
            w: self.w / norm,
            x: self.x / norm,
            y: self.y / norm,
            z: self.z / norm,
        }
    }

    /// Rotate a vector by this quaternion
    pub fn rotate_vector(&self, v: Vector3) -> Vector3 {
        let u = Vector3::new(self.x, self.y, self.z);
        let s = self.w;
        u * (2.0 * u.dot(&v)) + v * (s * s - u.dot(&u)) + u.cross(&v) * (2.0 * s)
    }
}

impl Default for Quaternion {
    fn default() -> Self {
        Self::UNIT
    }
}

impl std::ops::Mul for Quaternion {
    type Output = Self;

    fn mul(self, rhs: Self) -> Self {
        Self {
            w: self.w * rhs.w - self.x * rhs.x - self.y * rhs.y - self.z * rhs.z,
            x: self.w * rhs.x + self.x * rhs.w + self.y * rhs.z - self.z * rhs.y,
            y: self.w * rhs.y - self.x * rhs.z + self.y * rhs.w + self.z * rhs.x,
            z: self.w * rhs.z + self.x * rhs.y - self.y * rhs.x + self.z * rhs.w,
        }
    }
}

/// Rigid transform: position plus orientation
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Transform {
    position: Vector3,
    orientation: Quaternion,
}

impl Transform {
    pub fn new(position: Vector3, orientation: Quaternion) -> Self {
        Self {
            position,
            orientation,
        }
    }

    pub fn from_position(position: Vector3) -> Self {
        Self {
            position,
            orientation: Quaternion::UNIT,
        }
    }

    pub fn position(&self) -> Vector3 {
        self.position
    }

    pub fn orientation(&self) -> Quaternion {
        self.orientation
    }

    pub fn set_position(&mut self, position: Vector3) {
        self.position = position;
    }

    pub fn set_orientation(&mut self, orientation: Quaternion) {
        self.orientation = orientation;
    }

    pub fn translate(&mut self, translation: Vector3) {
        self.position = self.position + translation;
    }

    pub fn rotate(&mut self, axis: Vector3, angle_radians: f32) {
        self.orientation =
            (Quaternion::from_axis_angle(axis, angle_radians) * self.orientation).normalize();
    }

    /// Vector from this transform to `target`, expressed in this
    /// transform's local frame.
    pub fn vector_to(&self, target: &Transform) -> Vector3 {
        let global = target.position - self.position;
        self.orientation.inverse().rotate_vector(global)
    }

    /// New transform with a translation applied in the local frame
    pub fn local_translation(&self, translation: Vector3) -> Transform {
        Transform {
            position: self.orientation.rotate_vector(translation) + self.position,
            orientation: self.orientation,
        }
    }
}
