//! Integer geometry primitives: points, axis-aligned boxes, polygons and
//! quarter-turn transforms.
//!
//! Every coordinate is an integer database unit. Boxes are closed, so two boxes
//! sharing only an edge or a corner intersect.

use derive_more::{Add, Sub};
use serde::Serialize;
use std::fmt;
use thiserror::Error;

use crate::Coord;

#[derive(Debug, Error)]
pub enum GeometryError {
    #[error("Invalid box: ({0}, {1}) to ({2}, {3})")]
    InvalidBox(Coord, Coord, Coord, Coord),
    #[error("Degenerate polygon with {0} distinct vertices")]
    DegenerateShape(usize),
    #[error("Unsupported transform: {0}")]
    UnsupportedTransform(String),
}

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Add, Sub, Serialize,
)]
pub struct Point {
    pub x: Coord,
    pub y: Coord,
}

impl Point {
    pub fn new(x: Coord, y: Coord) -> Point {
        Point { x, y }
    }

    /// Rotates counter-clockwise by `quarters` multiples of 90 degrees.
    pub fn rotate(self, quarters: u8) -> Point {
        match quarters % 4 {
            0 => self,
            1 => Point::new(-self.y, self.x),
            2 => Point::new(-self.x, -self.y),
            _ => Point::new(self.y, -self.x),
        }
    }

    /// Mirrors across the y axis.
    pub fn flip(self) -> Point {
        Point::new(-self.x, self.y)
    }

    fn cross(self, other: Point) -> i128 {
        self.x as i128 * other.y as i128 - self.y as i128 * other.x as i128
    }
}

impl fmt::Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// Closed axis-aligned box. Field order gives the (left, bottom, right, top)
/// ordering used to keep instance lists sorted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct BBox {
    pub left: Coord,
    pub bottom: Coord,
    pub right: Coord,
    pub top: Coord,
}

impl BBox {
    /// Creates a box, rejecting inverted extents.
    pub fn new(left: Coord, bottom: Coord, right: Coord, top: Coord) -> Result<BBox, GeometryError> {
        if left > right || bottom > top {
            return Err(GeometryError::InvalidBox(left, bottom, right, top));
        }

        Ok(BBox {
            left,
            bottom,
            right,
            top,
        })
    }

    /// Smallest box spanning two corner points given in any order.
    pub fn from_corners(a: Point, b: Point) -> BBox {
        BBox {
            left: a.x.min(b.x),
            bottom: a.y.min(b.y),
            right: a.x.max(b.x),
            top: a.y.max(b.y),
        }
    }

    /// Bounding box of a point set, `None` when empty.
    pub fn bounding<'a, I>(points: I) -> Option<BBox>
    where
        I: IntoIterator<Item = &'a Point>,
    {
        let mut iter = points.into_iter();
        let first = *iter.next()?;
        Some(iter.fold(BBox::from_corners(first, first), |b, p| {
            b.union(&BBox::from_corners(*p, *p))
        }))
    }

    pub fn width(&self) -> Coord {
        self.right - self.left
    }

    pub fn height(&self) -> Coord {
        self.top - self.bottom
    }

    pub fn area(&self) -> i128 {
        self.width() as i128 * self.height() as i128
    }

    pub fn lower_left(&self) -> Point {
        Point::new(self.left, self.bottom)
    }

    /// Center in doubled units, exact for odd extents.
    pub fn center2(&self) -> Point {
        Point::new(self.left + self.right, self.bottom + self.top)
    }

    pub fn union(&self, other: &BBox) -> BBox {
        BBox {
            left: self.left.min(other.left),
            bottom: self.bottom.min(other.bottom),
            right: self.right.max(other.right),
            top: self.top.max(other.top),
        }
    }

    /// True when `other` lies within `self`, boundary included.
    pub fn contains(&self, other: &BBox) -> bool {
        self.left <= other.left
            && self.bottom <= other.bottom
            && self.right >= other.right
            && self.top >= other.top
    }

    /// True when `self` lies within `other`, boundary included.
    pub fn inside(&self, other: &BBox) -> bool {
        other.contains(self)
    }

    /// Closed intersection test; touching boxes intersect.
    pub fn intersects(&self, other: &BBox) -> bool {
        self.left <= other.right
            && other.left <= self.right
            && self.bottom <= other.top
            && other.bottom <= self.top
    }

    /// The four edges as degenerate boxes: left, bottom, right, top.
    pub fn edges(&self) -> [BBox; 4] {
        [
            BBox { right: self.left, ..*self },
            BBox { top: self.bottom, ..*self },
            BBox { left: self.right, ..*self },
            BBox { bottom: self.top, ..*self },
        ]
    }

    /// Squared gap between two boxes, zero when they intersect.
    pub fn gap2(&self, other: &BBox) -> i128 {
        let dx = (other.left - self.right).max(self.left - other.right).max(0) as i128;
        let dy = (other.bottom - self.top).max(self.bottom - other.top).max(0) as i128;
        dx * dx + dy * dy
    }

    pub fn translate(&self, by: Point) -> BBox {
        BBox {
            left: self.left + by.x,
            bottom: self.bottom + by.y,
            right: self.right + by.x,
            top: self.top + by.y,
        }
    }

    pub fn transform(&self, trans: &Trans) -> BBox {
        BBox::from_corners(
            trans.apply(self.lower_left()),
            trans.apply(Point::new(self.right, self.top)),
        )
    }
}

impl fmt::Display for BBox {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "({},{};{},{})",
            self.left, self.bottom, self.right, self.top
        )
    }
}

/// Simple polygon kept in a normalized form: counter-clockwise, starting at its
/// lexicographically smallest vertex, without repeated or collinear vertices.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Polygon {
    points: Vec<Point>,
}

impl Polygon {
    pub fn new(points: Vec<Point>) -> Result<Polygon, GeometryError> {
        let mut points = points;

        // Closing vertex and consecutive repeats
        points.dedup();
        while points.len() > 1 && points.first() == points.last() {
            points.pop();
        }

        // Collinear vertices and spikes, until nothing changes
        loop {
            let n = points.len();
            if n < 3 {
                return Err(GeometryError::DegenerateShape(n));
            }
            let redundant = (0..n).find(|&i| {
                let prev = points[(i + n - 1) % n];
                let next = points[(i + 1) % n];
                (points[i] - prev).cross(next - points[i]) == 0
            });
            match redundant {
                Some(i) => {
                    points.remove(i);
                }
                None => break,
            }
        }

        let area2: i128 = (0..points.len())
            .map(|i| points[i].cross(points[(i + 1) % points.len()]))
            .sum();
        if area2 == 0 {
            return Err(GeometryError::DegenerateShape(points.len()));
        }
        if area2 < 0 {
            points.reverse();
        }

        if let Some(start) = points
            .iter()
            .enumerate()
            .min_by_key(|(_, p)| **p)
            .map(|(i, _)| i)
        {
            points.rotate_left(start);
        }

        Ok(Polygon { points })
    }

    /// Axis-aligned rectangle as a polygon.
    pub fn rect(bbox: &BBox) -> Result<Polygon, GeometryError> {
        Polygon::new(vec![
            Point::new(bbox.left, bbox.bottom),
            Point::new(bbox.right, bbox.bottom),
            Point::new(bbox.right, bbox.top),
            Point::new(bbox.left, bbox.top),
        ])
    }

    pub fn points(&self) -> &[Point] {
        &self.points
    }

    pub fn bbox(&self) -> BBox {
        // Normalized polygons always carry at least three vertices
        BBox::bounding(&self.points).unwrap_or(BBox {
            left: 0,
            bottom: 0,
            right: 0,
            top: 0,
        })
    }

    pub fn transform(&self, trans: &Trans) -> Result<Polygon, GeometryError> {
        Polygon::new(self.points.iter().map(|p| trans.apply(*p)).collect())
    }
}

/// Orthogonal placement transform `p -> disp + F^mirror(R^rot(p))`, where `R` is
/// a counter-clockwise quarter turn and `F` mirrors across the y axis.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
pub struct Trans {
    pub mirror: bool,
    /// Counter-clockwise quarter turns, always in `0..4`.
    pub rot: u8,
    pub disp: Point,
}

impl Trans {
    pub fn new(mirror: bool, rot: u8, disp: Point) -> Trans {
        Trans {
            mirror,
            rot: rot % 4,
            disp,
        }
    }

    /// Transform from a mirror flag and an angle in degrees.
    pub fn from_angle(mirror: bool, angle: i32) -> Result<Trans, GeometryError> {
        if angle % 90 != 0 {
            return Err(GeometryError::UnsupportedTransform(format!(
                "angle {angle} is not a multiple of 90"
            )));
        }

        Ok(Trans::new(mirror, (angle.rem_euclid(360) / 90) as u8, Point::default()))
    }

    pub fn translation(disp: Point) -> Trans {
        Trans::new(false, 0, disp)
    }

    pub fn is_identity(&self) -> bool {
        *self == Trans::default()
    }

    pub fn angle(&self) -> i32 {
        self.rot as i32 * 90
    }

    pub fn apply(&self, p: Point) -> Point {
        let q = p.rotate(self.rot);
        let q = if self.mirror { q.flip() } else { q };
        q + self.disp
    }

    /// Composition applying `other` first, then `self`.
    pub fn compose(&self, other: &Trans) -> Trans {
        let rot = if other.mirror {
            (4 + other.rot - self.rot) % 4
        } else {
            (self.rot + other.rot) % 4
        };
        let linear = Trans {
            disp: Point::default(),
            ..*self
        };

        Trans {
            mirror: self.mirror ^ other.mirror,
            rot,
            disp: self.disp + linear.apply(other.disp),
        }
    }

    pub fn inverse(&self) -> Trans {
        // Mirrored transforms are involutions up to translation
        let rot = if self.mirror { self.rot } else { (4 - self.rot) % 4 };
        let linear = Trans::new(self.mirror, rot, Point::default());
        Trans {
            disp: Point::default() - linear.apply(self.disp),
            ..linear
        }
    }

    pub fn shifted(&self, by: Point) -> Trans {
        Trans {
            disp: self.disp + by,
            ..*self
        }
    }
}
