use libm::sqrt;

use crate::{Coordinate, PolarCoordinate};

/// The bipolar coordinate system of the machine.
///
/// The left motor sits at the origin of the motor frame and the right motor at
/// `(right_motor_dist, 0)`; y grows downwards. Public Cartesian coordinates are
/// shifted by `(x_offset, y_offset)`, so that the drawing origin can be put at
/// the place where the carriage starts.
///
/// The drawing surface (`x_min..=x_max`, `y_min..=y_max`) is measured in the
/// motor frame.
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct PolarSystem {
    pub x_offset: f64,
    pub y_offset: f64,
    pub x_min: f64,
    pub x_max: f64,
    pub y_min: f64,
    pub y_max: f64,
    pub right_motor_dist: f64,
}

impl PolarSystem {
    /// Returns the same system, but with the public origin moved to `origin`
    /// (given in the motor frame).
    pub fn anchored_at(&self, origin: Coordinate) -> Self {
        Self {
            x_offset: origin.x,
            y_offset: origin.y,
            ..*self
        }
    }

    /// Is `coord` inside the drawing surface?
    pub fn contains(&self, coord: &Coordinate) -> bool {
        let x = coord.x + self.x_offset;
        let y = coord.y + self.y_offset;
        (self.x_min..=self.x_max).contains(&x) && (self.y_min..=self.y_max).contains(&y)
    }

    /// Converts a Cartesian coordinate into cable lengths.
    ///
    /// Coordinates outside the drawing surface are pulled to the nearest point
    /// of the surface; use [`PolarSystem::contains`] to find out whether that
    /// happened.
    pub fn to_polar(&self, coord: &Coordinate) -> PolarCoordinate {
        let x = (coord.x + self.x_offset).clamp(self.x_min, self.x_max);
        let y = (coord.y + self.y_offset).clamp(self.y_min, self.y_max);

        let x_diff = self.right_motor_dist - x;
        PolarCoordinate {
            left_dist: sqrt(x * x + y * y),
            right_dist: sqrt(x_diff * x_diff + y * y),
            pen_up: coord.pen_up,
        }
    }

    /// Converts cable lengths into a Cartesian coordinate.
    ///
    /// If the lengths can't close a triangle with the motor distance, the
    /// result is not finite.
    pub fn to_coord(&self, polar: &PolarCoordinate) -> Coordinate {
        let l = polar.left_dist;
        let r = polar.right_dist;
        let d = self.right_motor_dist;
        let x = (l * l - r * r + d * d) / (2.0 * d);
        let y = sqrt(l * l - x * x);
        Coordinate::with_pen(x - self.x_offset, y - self.y_offset, polar.pen_up)
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Circle {
    pub center: Coordinate,
    pub radius: f64,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LineSegment {
    pub begin: Coordinate,
    pub end: Coordinate,
}

impl LineSegment {
    pub fn new(begin: Coordinate, end: Coordinate) -> Self {
        Self { begin, end }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Intersection {
    None,
    One(Coordinate),
    Two(Coordinate, Coordinate),
}

impl Intersection {
    pub fn first(&self) -> Option<Coordinate> {
        match self {
            Intersection::None => None,
            Intersection::One(p) | Intersection::Two(p, _) => Some(*p),
        }
    }

    pub fn second(&self) -> Option<Coordinate> {
        match self {
            Intersection::Two(_, p) => Some(*p),
            _ => None,
        }
    }
}

impl Circle {
    pub fn new(center: Coordinate, radius: f64) -> Self {
        Self { center, radius }
    }

    /// Where does `line` cross this circle?
    ///
    /// Solves `|begin + t * (end - begin) - center| = radius` for `t` in `[0, 1]`.
    /// A single intersection is always returned as [`Intersection::One`], and
    /// when there are two, the one with the larger `t` comes first.
    pub fn intersection(&self, line: &LineSegment) -> Intersection {
        let dir = line.end - line.begin;
        let from_center = line.begin - self.center;

        let a = dir.dot(&dir);
        let b = 2.0 * from_center.dot(&dir);
        let c = from_center.dot(&from_center) - self.radius * self.radius;

        let discriminant = b * b - 4.0 * a * c;
        if a == 0.0 || discriminant < 0.0 {
            return Intersection::None;
        }
        let discriminant = sqrt(discriminant);

        let at = |t: f64| line.begin + dir * t;
        let on_segment = |t: f64| (0.0..=1.0).contains(&t);
        let t0 = (-b + discriminant) / (2.0 * a);
        let t1 = (-b - discriminant) / (2.0 * a);

        match (on_segment(t0), on_segment(t1) && t0 != t1) {
            (true, true) => Intersection::Two(at(t0), at(t1)),
            (true, false) => Intersection::One(at(t0)),
            (false, true) => Intersection::One(at(t1)),
            (false, false) => Intersection::None,
        }
    }
}
