//! Canonical encoding of flattened shapes.
//!
//! A shape code lists the polygon vertices as offsets from its
//! lexicographically first vertex, the start vertex itself omitted. Two shapes
//! with the same code are translations of each other; the eight orientation
//! images of a code decide the shape's symmetry class.

use std::collections::BTreeMap;

use crate::geometry::{BBox, Point};
use crate::symmetry::{orbit, Oid, Symmetry, Tid};
use crate::HierError;

pub type ShapeCode = Vec<Point>;

/// Offsets of a closed vertex list relative to its smallest vertex.
pub fn shape_code(points: &[Point]) -> ShapeCode {
    let start = match points.iter().enumerate().min_by_key(|(_, p)| **p) {
        Some((i, _)) => i,
        None => return Vec::new(),
    };
    let origin = points[start];

    (1..points.len())
        .map(|k| points[(start + k) % points.len()] - origin)
        .collect()
}

/// Image of a shape code under an orientation, re-anchored at its smallest vertex.
pub fn transform_code(code: &ShapeCode, oid: Oid) -> ShapeCode {
    let mut points: Vec<Point> = std::iter::once(Point::default())
        .chain(code.iter().copied())
        .map(|p| oid.apply(p))
        .collect();
    if oid.is_reflection() {
        points.reverse();
    }

    shape_code(&points)
}

#[derive(Debug, Clone)]
pub struct ShapeInstance {
    pub bbox: BBox,
    pub pattern: usize,
    pub tid: Tid,
    pub symmetry: Symmetry,
    /// Set once the shape can no longer seed new growth.
    pub visited: bool,
}

#[derive(Debug, Clone)]
pub struct ShapePattern {
    pub symmetry: Symmetry,
    /// Code per transform id, `codes[0]` being canonical.
    pub codes: Vec<ShapeCode>,
    pub insts: Vec<usize>,
}

/// Registry of every distinct shape met while parsing a layout.
#[derive(Debug, Default)]
pub struct ShapeLibrary {
    pub patterns: Vec<ShapePattern>,
    pub insts: Vec<ShapeInstance>,
    codes: BTreeMap<ShapeCode, (usize, Tid)>,
}

impl ShapeLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Classifies a shape and records a new instance of it.
    ///
    /// # Arguments
    /// * `bbox` - Bounding box of the shape
    /// * `points` - Normalized boundary of the shape
    ///
    /// # Returns
    /// Index of the new instance in `insts`
    pub fn encode(&mut self, bbox: BBox, points: &[Point]) -> Result<usize, HierError> {
        let code = shape_code(points);

        let (pattern, tid) = match self.codes.get(&code) {
            Some(&hit) => hit,
            None => {
                let (symmetry, codes) = orbit(&code, |c, oid| Ok(transform_code(c, oid)))?;
                let pid = self.patterns.len();
                for (i, c) in codes.iter().enumerate() {
                    let tid = Tid::from_index(i as u8 + 1).ok_or_else(|| {
                        HierError::Inconsistent(format!("shape {pid} has {} codes", codes.len()))
                    })?;
                    self.codes.insert(c.clone(), (pid, tid));
                }
                self.patterns.push(ShapePattern {
                    symmetry,
                    codes,
                    insts: Vec::new(),
                });
                (pid, Tid::T1)
            }
        };

        let id = self.insts.len();
        self.insts.push(ShapeInstance {
            bbox,
            pattern,
            tid,
            symmetry: self.patterns[pattern].symmetry,
            visited: false,
        });
        self.patterns[pattern].insts.push(id);

        Ok(id)
    }

    pub fn reset_visited(&mut self) {
        for inst in self.insts.iter_mut() {
            inst.visited = false;
        }
    }

    pub fn len(&self) -> usize {
        self.insts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.insts.is_empty()
    }
}
