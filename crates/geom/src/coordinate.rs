use core::fmt;
use core::ops::{Add, Mul, Neg, Sub};

use libm::{ceil, floor, sqrt};

/// Two coordinates closer than this (in mm) are considered equal.
pub const EPSILON: f64 = 1e-5;

/// A Cartesian position (or vector), in millimeters, together with the pen state.
///
/// The pen state is sticky under addition and subtraction: anything computed
/// from a pen-up operand is also pen-up.
#[derive(Clone, Copy, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Coordinate {
    pub x: f64,
    pub y: f64,
    pub pen_up: bool,
}

impl Coordinate {
    /// A pen-down coordinate.
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y, pen_up: false }
    }

    pub const fn with_pen(x: f64, y: f64, pen_up: bool) -> Self {
        Self { x, y, pen_up }
    }

    pub fn len(&self) -> f64 {
        sqrt(self.x * self.x + self.y * self.y)
    }

    /// A unit vector in the same direction.
    ///
    /// The zero vector has no direction, and normalizing it gives NaNs.
    pub fn normalized(&self) -> Self {
        let len = self.len();
        Self::with_pen(self.x / len, self.y / len, self.pen_up)
    }

    pub fn dot(&self, other: &Coordinate) -> f64 {
        self.x * other.x + self.y * other.y
    }

    pub fn floor(&self) -> Self {
        Self::with_pen(floor(self.x), floor(self.y), self.pen_up)
    }

    pub fn ceil(&self) -> Self {
        Self::with_pen(ceil(self.x), ceil(self.y), self.pen_up)
    }

    /// Clamps both components into `[min, max]`.
    pub fn clamp(&self, min: f64, max: f64) -> Self {
        Self::with_pen(self.x.clamp(min, max), self.y.clamp(min, max), self.pen_up)
    }

    /// Are the two positions within [`EPSILON`] of each other? The pen state is ignored.
    pub fn approx_eq(&self, other: &Coordinate) -> bool {
        (*self - *other).len() < EPSILON
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }

    /// Mirrors the coordinate around the Y axis (`flip_x`) and/or the X axis (`flip_y`).
    pub fn flipped(&self, flip_x: bool, flip_y: bool) -> Self {
        Self::with_pen(
            if flip_x { -self.x } else { self.x },
            if flip_y { -self.y } else { self.y },
            self.pen_up,
        )
    }
}

impl Add for Coordinate {
    type Output = Coordinate;

    fn add(self, rhs: Coordinate) -> Coordinate {
        Coordinate::with_pen(self.x + rhs.x, self.y + rhs.y, self.pen_up || rhs.pen_up)
    }
}

impl Sub for Coordinate {
    type Output = Coordinate;

    fn sub(self, rhs: Coordinate) -> Coordinate {
        Coordinate::with_pen(self.x - rhs.x, self.y - rhs.y, self.pen_up || rhs.pen_up)
    }
}

impl Mul<f64> for Coordinate {
    type Output = Coordinate;

    fn mul(self, factor: f64) -> Coordinate {
        Coordinate::with_pen(self.x * factor, self.y * factor, self.pen_up)
    }
}

impl Neg for Coordinate {
    type Output = Coordinate;

    fn neg(self) -> Coordinate {
        Coordinate::with_pen(-self.x, -self.y, self.pen_up)
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[ {:.2}, {:.2} ]", self.x, self.y)
    }
}

/// Lengths of the two cables, from the pen carriage to the left and right motors.
///
/// Measured in millimeters.
#[derive(Clone, Copy, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct PolarCoordinate {
    pub left_dist: f64,
    pub right_dist: f64,
    pub pen_up: bool,
}

impl PolarCoordinate {
    pub const fn new(left_dist: f64, right_dist: f64) -> Self {
        Self {
            left_dist,
            right_dist,
            pen_up: false,
        }
    }

    pub fn ceil(&self) -> Self {
        Self {
            left_dist: ceil(self.left_dist),
            right_dist: ceil(self.right_dist),
            pen_up: self.pen_up,
        }
    }

    /// Clamps both lengths into `[min, max]`.
    pub fn clamp(&self, min: f64, max: f64) -> Self {
        Self {
            left_dist: self.left_dist.clamp(min, max),
            right_dist: self.right_dist.clamp(min, max),
            pen_up: self.pen_up,
        }
    }

    pub fn is_finite(&self) -> bool {
        self.left_dist.is_finite() && self.right_dist.is_finite()
    }
}

impl Add for PolarCoordinate {
    type Output = PolarCoordinate;

    fn add(self, rhs: PolarCoordinate) -> PolarCoordinate {
        PolarCoordinate {
            left_dist: self.left_dist + rhs.left_dist,
            right_dist: self.right_dist + rhs.right_dist,
            pen_up: self.pen_up || rhs.pen_up,
        }
    }
}

impl Sub for PolarCoordinate {
    type Output = PolarCoordinate;

    fn sub(self, rhs: PolarCoordinate) -> PolarCoordinate {
        PolarCoordinate {
            left_dist: self.left_dist - rhs.left_dist,
            right_dist: self.right_dist - rhs.right_dist,
            pen_up: self.pen_up || rhs.pen_up,
        }
    }
}

impl Mul<f64> for PolarCoordinate {
    type Output = PolarCoordinate;

    fn mul(self, factor: f64) -> PolarCoordinate {
        PolarCoordinate {
            left_dist: self.left_dist * factor,
            right_dist: self.right_dist * factor,
            pen_up: self.pen_up,
        }
    }
}

impl fmt::Display for PolarCoordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "( L {:.2}, R {:.2} )", self.left_dist, self.right_dist)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minus() {
        let lhs = Coordinate::new(2.0, 2.0);
        let rhs = Coordinate::new(1.0, 1.0);
        assert!((lhs - rhs).approx_eq(&rhs));
    }

    #[test]
    fn pen_up_is_sticky() {
        let up = Coordinate::with_pen(1.0, 0.0, true);
        let down = Coordinate::new(0.0, 1.0);
        assert!((up + down).pen_up);
        assert!((down - up).pen_up);
        assert!(!(down + down).pen_up);
        assert!((up * 2.0).pen_up);

        let polar_up = PolarCoordinate {
            pen_up: true,
            ..PolarCoordinate::new(1.0, 1.0)
        };
        assert!((PolarCoordinate::new(2.0, 2.0) - polar_up).pen_up);
    }

    #[test]
    fn normalize_and_dot() {
        let v = Coordinate::new(3.0, 4.0);
        assert_eq!(v.len(), 5.0);
        let n = v.normalized();
        assert!((n.len() - 1.0).abs() < 1e-12);
        assert!((n.dot(&Coordinate::new(1.0, 0.0)) - 0.6).abs() < 1e-12);
        assert!(!Coordinate::default().normalized().is_finite());
    }

    #[test]
    fn rounding_and_clamping() {
        let c = Coordinate::new(1.5, -1.5);
        assert_eq!(c.ceil(), Coordinate::new(2.0, -1.0));
        assert_eq!(c.floor(), Coordinate::new(1.0, -2.0));
        assert_eq!(
            Coordinate::new(10.0, -10.0).clamp(-3.0, 3.0),
            Coordinate::new(3.0, -3.0)
        );

        let p = PolarCoordinate::new(130.2, -140.7);
        assert_eq!(p.ceil(), PolarCoordinate::new(131.0, -140.0));
        assert_eq!(p.clamp(-126.0, 126.0), PolarCoordinate::new(126.0, -126.0));
    }

    #[test]
    fn approx_eq_ignores_pen() {
        let a = Coordinate::new(1.0, 1.0);
        let b = Coordinate::with_pen(1.0 + 1e-6, 1.0, true);
        assert!(a.approx_eq(&b));
        assert!(!a.approx_eq(&Coordinate::new(1.0 + 1e-4, 1.0)));
    }

    #[test]
    fn flip() {
        let c = Coordinate::with_pen(1.0, 2.0, true);
        assert_eq!(c.flipped(true, false), Coordinate::with_pen(-1.0, 2.0, true));
        assert_eq!(c.flipped(false, true), Coordinate::with_pen(1.0, -2.0, true));
        assert_eq!(c.flipped(false, false), c);
    }
}
