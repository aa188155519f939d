//! Integer voxel-space geometry: coordinates, displacement classes, regions.
//!
//! Displacements are stratified into the classes the wire encoding admits
//! (near, linear, short/long linear, far). Each class is a newtype over
//! [`Diff`] whose constructor rejects out-of-class values, so a command that
//! holds a `LongLinear` is well-formed by construction and the codec never
//! needs to re-validate. Negation stays within a class.

use std::fmt;
use std::ops::{Add, Deref, Mul, Neg, Sub};
use thiserror::Error;

mod region;
pub use region::Region;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum GeomError {
    #[error("displacement <{dx}, {dy}, {dz}> is not a valid {class}")]
    InvalidDiff {
        class: &'static str,
        dx: i32,
        dy: i32,
        dz: i32,
    },
}

/// A grid coordinate. All components are non-negative inside a matrix of
/// side `r`; arithmetic is unchecked and range checks live at the grid
/// boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Coord {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

/// The single-bot start and end point of every well-formed trace.
pub const ORIGIN: Coord = Coord::new(0, 0, 0);

impl Coord {
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    /// True when all components lie in `[0, r)`.
    pub fn in_matrix(self, r: i32) -> bool {
        self.x >= 0 && self.y >= 0 && self.z >= 0 && self.x < r && self.y < r && self.z < r
    }

    /// Manhattan distance to `other`.
    pub fn mlen_to(self, other: Coord) -> i32 {
        (self - other).mlen()
    }

    /// The 6-neighborhood of this coordinate, clipped to the matrix of side
    /// `r`. Emission order is the fixed [`NEIGHBORS`] order; planners rely
    /// on this for deterministic traversal.
    pub fn adjacent(self, r: i32) -> impl Iterator<Item = Coord> {
        NEIGHBORS
            .iter()
            .map(move |d| self + *d)
            .filter(move |c| c.in_matrix(r))
    }
}

impl Add<Diff> for Coord {
    type Output = Coord;
    fn add(self, d: Diff) -> Coord {
        Coord::new(self.x + d.dx, self.y + d.dy, self.z + d.dz)
    }
}

impl Sub for Coord {
    type Output = Diff;
    fn sub(self, other: Coord) -> Diff {
        Diff::new(self.x - other.x, self.y - other.y, self.z - other.z)
    }
}

impl Sub<Diff> for Coord {
    type Output = Coord;
    fn sub(self, d: Diff) -> Coord {
        self + -d
    }
}

impl fmt::Display for Coord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.z)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Axis {
    X,
    Y,
    Z,
}

impl Axis {
    /// Unit displacement along this axis with the sign of `sign`.
    pub fn unit(self, sign: i32) -> Diff {
        let s = sign.signum();
        match self {
            Axis::X => Diff::new(s, 0, 0),
            Axis::Y => Diff::new(0, s, 0),
            Axis::Z => Diff::new(0, 0, s),
        }
    }
}

/// An unconstrained displacement between two coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Diff {
    pub dx: i32,
    pub dy: i32,
    pub dz: i32,
}

/// Unit directions, named as the planner speaks about them.
pub const UP: Diff = Diff::new(0, 1, 0);
pub const DOWN: Diff = Diff::new(0, -1, 0);
pub const RIGHT: Diff = Diff::new(1, 0, 0);
pub const LEFT: Diff = Diff::new(-1, 0, 0);
pub const FORWARD: Diff = Diff::new(0, 0, 1);
pub const BACK: Diff = Diff::new(0, 0, -1);

/// Fixed 6-neighborhood order used everywhere a traversal must be
/// deterministic.
pub const NEIGHBORS: [Diff; 6] = [RIGHT, LEFT, UP, DOWN, FORWARD, BACK];

impl Diff {
    pub const fn new(dx: i32, dy: i32, dz: i32) -> Self {
        Self { dx, dy, dz }
    }

    /// Manhattan length.
    pub fn mlen(self) -> i32 {
        self.dx.abs() + self.dy.abs() + self.dz.abs()
    }

    /// Chebyshev length.
    pub fn clen(self) -> i32 {
        self.dx.abs().max(self.dy.abs()).max(self.dz.abs())
    }

    /// The axis of a linear displacement, `None` unless exactly one
    /// component is nonzero.
    pub fn axis(self) -> Option<Axis> {
        match (self.dx != 0, self.dy != 0, self.dz != 0) {
            (true, false, false) => Some(Axis::X),
            (false, true, false) => Some(Axis::Y),
            (false, false, true) => Some(Axis::Z),
            _ => None,
        }
    }

    /// The signed magnitude along `axis` (the whole length for a linear
    /// displacement on that axis).
    pub fn along(self, axis: Axis) -> i32 {
        match axis {
            Axis::X => self.dx,
            Axis::Y => self.dy,
            Axis::Z => self.dz,
        }
    }
}

impl Neg for Diff {
    type Output = Diff;
    fn neg(self) -> Diff {
        Diff::new(-self.dx, -self.dy, -self.dz)
    }
}

impl Mul<i32> for Diff {
    type Output = Diff;
    fn mul(self, k: i32) -> Diff {
        Diff::new(self.dx * k, self.dy * k, self.dz * k)
    }
}

impl Add for Diff {
    type Output = Diff;
    fn add(self, other: Diff) -> Diff {
        Diff::new(self.dx + other.dx, self.dy + other.dy, self.dz + other.dz)
    }
}

impl fmt::Display for Diff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}, {}, {}>", self.dx, self.dy, self.dz)
    }
}

macro_rules! constrained_diff {
    ($(#[$doc:meta])* $name:ident, $class:literal, $valid:expr) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub struct $name(Diff);

        impl $name {
            pub fn new(dx: i32, dy: i32, dz: i32) -> Result<Self, GeomError> {
                Self::try_from(Diff::new(dx, dy, dz))
            }

            pub fn get(self) -> Diff {
                self.0
            }
        }

        impl TryFrom<Diff> for $name {
            type Error = GeomError;
            fn try_from(d: Diff) -> Result<Self, GeomError> {
                let valid: fn(Diff) -> bool = $valid;
                if valid(d) {
                    Ok(Self(d))
                } else {
                    Err(GeomError::InvalidDiff {
                        class: $class,
                        dx: d.dx,
                        dy: d.dy,
                        dz: d.dz,
                    })
                }
            }
        }

        impl Deref for $name {
            type Target = Diff;
            fn deref(&self) -> &Diff {
                &self.0
            }
        }

        // Every class is closed under negation.
        impl Neg for $name {
            type Output = $name;
            fn neg(self) -> $name {
                $name(-self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }
    };
}

constrained_diff!(
    /// One or two axes at ±1, the rest zero: the reach of a fill, void,
    /// fission, or fusion.
    NearDiff,
    "near displacement",
    |d| d.clen() == 1 && (1..=2).contains(&d.mlen())
);

constrained_diff!(
    /// Exactly one axis nonzero.
    LinearDiff,
    "linear displacement",
    |d| d.axis().is_some()
);

constrained_diff!(
    /// Linear with Manhattan length 1..=5: one leg of an L-move.
    ShortLinear,
    "short linear displacement",
    |d| d.axis().is_some() && (1..=5).contains(&d.mlen())
);

constrained_diff!(
    /// Linear with Manhattan length 1..=15: a straight move.
    LongLinear,
    "long linear displacement",
    |d| d.axis().is_some() && (1..=15).contains(&d.mlen())
);

constrained_diff!(
    /// Any displacement with Chebyshev length 1..=30: the far corner of a
    /// group region.
    FarDiff,
    "far displacement",
    |d| (1..=30).contains(&d.clen())
);

impl LinearDiff {
    pub fn axis(self) -> Axis {
        self.0.axis().unwrap_or(Axis::X)
    }
}

impl ShortLinear {
    pub fn axis(self) -> Axis {
        self.0.axis().unwrap_or(Axis::X)
    }
}

impl LongLinear {
    pub fn axis(self) -> Axis {
        self.0.axis().unwrap_or(Axis::X)
    }
}

impl From<ShortLinear> for LongLinear {
    fn from(s: ShortLinear) -> LongLinear {
        LongLinear(s.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn coord_add_sub_round_trip() {
        let a = Coord::new(1, 2, 3);
        let b = Coord::new(4, 0, 2);
        assert_eq!(a + (b - a), b);
        assert_eq!(b - (b - a), a);
    }

    #[test]
    fn adjacent_clips_to_matrix() {
        let corner: Vec<_> = ORIGIN.adjacent(3).collect();
        assert_eq!(
            corner,
            vec![Coord::new(1, 0, 0), Coord::new(0, 1, 0), Coord::new(0, 0, 1)]
        );
        let center: Vec<_> = Coord::new(1, 1, 1).adjacent(3).collect();
        assert_eq!(center.len(), 6);
    }

    #[test]
    fn near_diff_accepts_one_and_two_axis_units() {
        assert!(NearDiff::new(1, 0, 0).is_ok());
        assert!(NearDiff::new(0, -1, 1).is_ok());
        assert!(NearDiff::new(1, 1, 1).is_err(), "mlen 3 is out of class");
        assert!(NearDiff::new(2, 0, 0).is_err(), "clen 2 is out of class");
        assert!(NearDiff::new(0, 0, 0).is_err(), "zero is out of class");
    }

    #[test]
    fn linear_classes_enforce_length() {
        assert!(ShortLinear::new(0, 0, 5).is_ok());
        assert!(ShortLinear::new(0, 0, 6).is_err());
        assert!(LongLinear::new(0, 15, 0).is_ok());
        assert!(LongLinear::new(0, 16, 0).is_err());
        assert!(LongLinear::new(1, 1, 0).is_err(), "two axes is not linear");
    }

    #[test]
    fn far_diff_bounds() {
        assert!(FarDiff::new(30, -30, 30).is_ok());
        assert!(FarDiff::new(31, 0, 0).is_err());
        assert!(FarDiff::new(0, 0, 0).is_err());
    }

    #[test]
    fn negation_stays_in_class() {
        let nd = NearDiff::new(1, -1, 0).unwrap();
        assert_eq!((-nd).get(), Diff::new(-1, 1, 0));
        let lld = LongLinear::new(0, 0, 15).unwrap();
        assert_eq!((-lld).get(), Diff::new(0, 0, -15));
    }

    #[test]
    fn axis_of_linear_diff() {
        assert_eq!(LongLinear::new(0, -7, 0).unwrap().axis(), Axis::Y);
        assert_eq!(Diff::new(0, 0, 3).axis(), Some(Axis::Z));
        assert_eq!(Diff::new(1, 0, 3).axis(), None);
    }

    #[test]
    fn short_widens_to_long() {
        let s = ShortLinear::new(3, 0, 0).unwrap();
        let l: LongLinear = s.into();
        assert_eq!(l.get(), Diff::new(3, 0, 0));
    }
}
