//! Planar vector math used throughout the coordinator.

use serde::{Deserialize, Serialize};

/// The scalar type every kinematic quantity is expressed in.
pub type Float = f64;

/// Absolute tolerance under which two scalars are considered equal.
pub const EQUALITY_TOLERANCE: Float = 1e-6;

/// Absolute-tolerance scalar equality.
///
/// The only float equality test permitted in the coordinator; direct `==`
/// comparisons on measured or derived quantities are bugs waiting to happen.
#[inline]
#[must_use]
pub fn are_same(a: Float, b: Float) -> bool {
    (a - b).abs() < EQUALITY_TOLERANCE
}

/// A vector in the ground plane.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Vector2 {
    pub x: Float,
    pub y: Float,
}

impl Vector2 {
    /// The zero vector.
    pub const ZERO: Self = Self { x: 0.0, y: 0.0 };

    #[inline]
    #[must_use]
    pub const fn new(x: Float, y: Float) -> Self {
        Self { x, y }
    }

    /// Unit vector at angle `theta` measured counter-clockwise from +x.
    #[inline]
    #[must_use]
    pub fn from_angle(theta: Float) -> Self {
        Self::new(theta.cos(), theta.sin())
    }

    /// Dot product `a . b`.
    #[inline]
    #[must_use]
    pub fn dot(self, other: Self) -> Float {
        self.x * other.x + self.y * other.y
    }

    /// The z component of the 3-D cross product, `a.x * b.y - a.y * b.x`.
    ///
    /// Positive when `other` lies counter-clockwise of `self`.
    #[inline]
    #[must_use]
    pub fn cross_z(self, other: Self) -> Float {
        self.x * other.y - self.y * other.x
    }

    #[inline]
    #[must_use]
    pub fn length_squared(self) -> Float {
        self.dot(self)
    }

    #[inline]
    #[must_use]
    pub fn length(self) -> Float {
        self.length_squared().sqrt()
    }

    /// Euclidean distance to `other`.
    #[inline]
    #[must_use]
    pub fn distance_to(self, other: Self) -> Float {
        (other - self).length()
    }

    /// Angle of the vector in (-pi, pi], measured from +x.
    #[inline]
    #[must_use]
    pub fn angle(self) -> Float {
        self.y.atan2(self.x)
    }

    /// Whether both components are zero within [`EQUALITY_TOLERANCE`].
    #[inline]
    #[must_use]
    pub fn is_zero(self) -> bool {
        are_same(self.x, 0.0) && are_same(self.y, 0.0)
    }

    /// The unit vector in the same direction, or the zero vector when the
    /// length is zero within tolerance.
    #[must_use]
    pub fn normalized(self) -> Self {
        let length = self.length();
        if are_same(length, 0.0) {
            Self::ZERO
        } else {
            self / length
        }
    }

    /// The same direction clamped to a maximum length.
    #[must_use]
    pub fn clamped(self, max_length: Float) -> Self {
        let length = self.length();
        if length > max_length {
            self * (max_length / length)
        } else {
            self
        }
    }
}

impl std::ops::Add for Vector2 {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl std::ops::Sub for Vector2 {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Self::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl std::ops::Neg for Vector2 {
    type Output = Self;

    fn neg(self) -> Self {
        Self::new(-self.x, -self.y)
    }
}

impl std::ops::Mul<Float> for Vector2 {
    type Output = Self;

    fn mul(self, rhs: Float) -> Self {
        Self::new(self.x * rhs, self.y * rhs)
    }
}

impl std::ops::Div<Float> for Vector2 {
    type Output = Self;

    fn div(self, rhs: Float) -> Self {
        Self::new(self.x / rhs, self.y / rhs)
    }
}

impl std::ops::AddAssign for Vector2 {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl std::ops::SubAssign for Vector2 {
    fn sub_assign(&mut self, rhs: Self) {
        *self = *self - rhs;
    }
}

impl From<(Float, Float)> for Vector2 {
    fn from((x, y): (Float, Float)) -> Self {
        Self::new(x, y)
    }
}

/// A planar rigid transform: position and yaw about +z.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    pub position: Vector2,
    pub yaw: Float,
}

impl Pose {
    #[inline]
    #[must_use]
    pub const fn new(position: Vector2, yaw: Float) -> Self {
        Self { position, yaw }
    }

    /// The unit heading vector `(cos yaw, sin yaw)`.
    #[inline]
    #[must_use]
    pub fn heading(self) -> Vector2 {
        Vector2::from_angle(self.yaw)
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_are_same() {
        assert!(are_same(0.0, 0.0));
        assert!(are_same(1.0, 1.0 + 1e-7));
        assert!(!are_same(1.0, 1.0 + 1e-5));
        assert!(!are_same(-1.0, 1.0));
    }

    #[test]
    fn test_dot_and_cross() {
        let x = Vector2::new(1.0, 0.0);
        let y = Vector2::new(0.0, 1.0);
        assert_abs_diff_eq!(x.dot(y), 0.0);
        assert_abs_diff_eq!(x.dot(x), 1.0);
        // y is counter-clockwise of x
        assert!(x.cross_z(y) > 0.0);
        assert!(y.cross_z(x) < 0.0);
    }

    #[test]
    fn test_normalized() {
        let v = Vector2::new(3.0, 4.0);
        let n = v.normalized();
        assert_abs_diff_eq!(n.length(), 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(n.x, 0.6, epsilon = 1e-12);
        assert_abs_diff_eq!(n.y, 0.8, epsilon = 1e-12);
    }

    #[test]
    fn test_normalized_zero_is_zero() {
        assert_eq!(Vector2::ZERO.normalized(), Vector2::ZERO);
    }

    #[test]
    fn test_clamped() {
        let v = Vector2::new(3.0, 4.0);
        assert_abs_diff_eq!(v.clamped(2.5).length(), 2.5, epsilon = 1e-12);
        assert_eq!(v.clamped(10.0), v);
    }

    #[test]
    fn test_angle() {
        assert_abs_diff_eq!(Vector2::new(1.0, 0.0).angle(), 0.0);
        assert_abs_diff_eq!(
            Vector2::new(0.0, 1.0).angle(),
            std::f64::consts::FRAC_PI_2
        );
        assert_abs_diff_eq!(Vector2::new(-1.0, 0.0).angle(), std::f64::consts::PI);
    }

    #[test]
    fn test_heading() {
        let pose = Pose::new(Vector2::ZERO, std::f64::consts::FRAC_PI_2);
        let heading = pose.heading();
        assert_abs_diff_eq!(heading.x, 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(heading.y, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_distance_to() {
        let a = Vector2::new(1.0, 1.0);
        let b = Vector2::new(4.0, 5.0);
        assert_abs_diff_eq!(a.distance_to(b), 5.0);
    }
}
