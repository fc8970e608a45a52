use approx::AbsDiffEq;
use nalgebra::{Matrix4, Rotation3, Unit, Vector3};
use serde::{Deserialize, Serialize};

use super::vector::Vec3;

/// An oriented point in space: an affine 4x4 placement whose columns are the
/// local X, Y, Z axes and the origin.
///
/// Frames are values. The `*ed` methods return a new frame and leave `self`
/// untouched; the bare-verb methods mutate in place and return `&mut Self` so
/// edits can be chained.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    m: Matrix4<f64>,
}

impl Default for Frame {
    fn default() -> Self {
        Self::identity()
    }
}

impl Frame {
    pub fn identity() -> Self {
        Self {
            m: Matrix4::identity(),
        }
    }

    pub fn from_matrix(m: Matrix4<f64>) -> Self {
        Self { m }
    }

    pub fn matrix(&self) -> &Matrix4<f64> {
        &self.m
    }

    pub fn at(origin: Vec3) -> Self {
        Self::identity().translated(origin)
    }

    /// Frame with the given origin and axes. The Y axis is `z × x`.
    pub fn coord_system_change(origin: Vec3, x_dir: Vec3, z_dir: Vec3) -> Self {
        let y_dir = z_dir.cross(&x_dir);
        #[rustfmt::skip]
        let m = Matrix4::new(
            x_dir.x, y_dir.x, z_dir.x, origin.x,
            x_dir.y, y_dir.y, z_dir.y, origin.y,
            x_dir.z, y_dir.z, z_dir.z, origin.z,
            0.0,     0.0,     0.0,     1.0,
        );
        Self { m }
    }

    /// Rotation of `angle_deg` degrees about the axis `direction` through `position`.
    pub fn rotation(angle_deg: f64, position: Vec3, direction: Vec3) -> Self {
        let axis = Unit::new_normalize(Vector3::new(direction.x, direction.y, direction.z));
        let r = Rotation3::from_axis_angle(&axis, angle_deg.to_radians()).to_homogeneous();
        let to = Matrix4::new_translation(&Vector3::new(position.x, position.y, position.z));
        let from = Matrix4::new_translation(&Vector3::new(-position.x, -position.y, -position.z));
        Self { m: to * r * from }
    }

    /// Frame at `origin` rotated by the given roll, pitch and yaw (radians).
    pub fn from_euler(origin: Vec3, roll: f64, pitch: f64, yaw: f64) -> Self {
        let mut m = Rotation3::from_euler_angles(roll, pitch, yaw).to_homogeneous();
        m[(0, 3)] = origin.x;
        m[(1, 3)] = origin.y;
        m[(2, 3)] = origin.z;
        Self { m }
    }

    // ── Queries ──────────────────────────────────────────────

    pub fn origin(&self) -> Vec3 {
        Vec3::new(self.m[(0, 3)], self.m[(1, 3)], self.m[(2, 3)])
    }

    /// The local direction `(x, y, z)` expressed in world coordinates.
    pub fn axis(&self, x: f64, y: f64, z: f64) -> Vec3 {
        Vec3::new(
            self.m[(0, 0)] * x + self.m[(0, 1)] * y + self.m[(0, 2)] * z,
            self.m[(1, 0)] * x + self.m[(1, 1)] * y + self.m[(1, 2)] * z,
            self.m[(2, 0)] * x + self.m[(2, 1)] * y + self.m[(2, 2)] * z,
        )
    }

    /// Map a local point into world coordinates.
    pub fn apply(&self, v: Vec3) -> Vec3 {
        self.axis(v.x, v.y, v.z) + self.origin()
    }

    pub fn xy(&self) -> [f64; 2] {
        let o = self.origin();
        [o.x, o.y]
    }

    pub fn is_finite(&self) -> bool {
        self.m.iter().all(|v| v.is_finite())
    }

    /// Euler angles (roll, pitch, yaw) of the rotational part.
    pub fn euler_angles(&self) -> (f64, f64, f64) {
        let r = self.m.fixed_view::<3, 3>(0, 0).into_owned();
        Rotation3::from_matrix_unchecked(r).euler_angles()
    }

    // ── Composition ──────────────────────────────────────────

    /// Translate in world coordinates.
    pub fn translate(&mut self, v: Vec3) -> &mut Self {
        self.m = Self::translation_matrix(v) * self.m;
        self
    }

    pub fn translated(&self, v: Vec3) -> Self {
        Self {
            m: Self::translation_matrix(v) * self.m,
        }
    }

    /// Translate along the frame's own axes.
    pub fn pretranslate(&mut self, x: f64, y: f64, z: f64) -> &mut Self {
        self.m *= Self::translation_matrix(Vec3::new(x, y, z));
        self
    }

    pub fn pretranslated(&self, x: f64, y: f64, z: f64) -> Self {
        Self {
            m: self.m * Self::translation_matrix(Vec3::new(x, y, z)),
        }
    }

    /// Rotate in world coordinates about an axis through `position`.
    pub fn rotate(&mut self, angle_deg: f64, position: Vec3, direction: Vec3) -> &mut Self {
        self.m = Self::rotation(angle_deg, position, direction).m * self.m;
        self
    }

    pub fn rotated(&self, angle_deg: f64, position: Vec3, direction: Vec3) -> Self {
        Self {
            m: Self::rotation(angle_deg, position, direction).m * self.m,
        }
    }

    /// `self * other`: apply `other` in this frame's local coordinates.
    pub fn multiplied(&self, other: &Frame) -> Self {
        Self { m: self.m * other.m }
    }

    /// `other * self`: apply `other` in world coordinates after this frame.
    pub fn premultiplied(&self, other: &Frame) -> Self {
        Self { m: other.m * self.m }
    }

    pub fn inverted(&self) -> Option<Self> {
        self.m.try_inverse().map(|m| Self { m })
    }

    /// A fresh identity frame.
    pub fn cleared(&self) -> Self {
        Self::identity()
    }

    fn translation_matrix(v: Vec3) -> Matrix4<f64> {
        Matrix4::new_translation(&Vector3::new(v.x, v.y, v.z))
    }
}

impl AbsDiffEq for Frame {
    type Epsilon = f64;

    fn default_epsilon() -> f64 {
        1e-9
    }

    fn abs_diff_eq(&self, other: &Self, epsilon: f64) -> bool {
        self.m
            .iter()
            .zip(other.m.iter())
            .all(|(a, b)| f64::abs_diff_eq(a, b, epsilon))
    }
}
