//! Region growth over the flattened shapes.

use std::collections::BTreeSet;

use crate::geometry::{BBox, Point};
use crate::pattern::{ChildRef, ClusterCode, ClusterEntry};
use crate::shape::ShapeLibrary;
use crate::spatial::BoxIndex;
use crate::Coord;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Left,
    Bottom,
    Right,
    Top,
}

impl Direction {
    pub const ALL: [Direction; 4] = [
        Direction::Left,
        Direction::Bottom,
        Direction::Right,
        Direction::Top,
    ];
}

/// A region grown from some instance, ready to be encoded.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub bbox: BBox,
    pub code: ClusterCode,
}

/// Read-only view of the shapes for growth queries.
pub struct ShapeField<'a> {
    pub shapes: &'a ShapeLibrary,
    pub index: &'a BoxIndex<usize>,
    pub working_len: Coord,
}

impl<'a> ShapeField<'a> {
    pub fn new(shapes: &'a ShapeLibrary, index: &'a BoxIndex<usize>, working_len: Coord) -> Self {
        ShapeField {
            shapes,
            index,
            working_len,
        }
    }

    /// Grows `seed` until no shape crosses its boundary.
    ///
    /// # Returns
    /// The stable box and the ids of the shapes it covers, ascending
    pub fn grow(&self, seed: BBox) -> (BBox, Vec<usize>) {
        let mut bbox = seed;
        loop {
            let mut grown = bbox;
            for edge in bbox.edges() {
                for id in self.index.intersecting(&edge) {
                    let b = self.shapes.insts[id].bbox;
                    if !bbox.contains(&b) {
                        grown = grown.union(&b);
                    }
                }
            }
            if grown == bbox {
                break;
            }
            bbox = grown;
        }

        (bbox, self.index.intersecting(&bbox))
    }

    /// Nearest shape strictly beyond one edge of `from`, within the working
    /// length. A visited nearest shape prunes the direction.
    pub fn nearest(&self, from: &BBox, dir: Direction) -> Option<usize> {
        let w = self.working_len;
        let (l, b, r, t) = (from.left, from.bottom, from.right, from.top);
        let (window, bar) = match dir {
            Direction::Left => ((l - w, b, l - 1, t), (l - 1, b, l - 1, t)),
            Direction::Bottom => ((l, b - w, r, b - 1), (l, b, r, b)),
            Direction::Right => ((r + 1, b, r + w, t), (r, b, r, t)),
            Direction::Top => ((l, t + 1, r, t + w), (l, t, r, t)),
        };
        let window = BBox::from_corners(Point::new(window.0, window.1), Point::new(window.2, window.3));
        let bar = BBox::from_corners(Point::new(bar.0, bar.1), Point::new(bar.2, bar.3));

        let id = self
            .index
            .intersecting(&window)
            .into_iter()
            .min_by_key(|id| (bar.gap2(&self.shapes.insts[*id].bbox), *id))?;

        if self.shapes.insts[id].visited {
            None
        } else {
            Some(id)
        }
    }

    /// Cluster entries of the shapes covered by a region.
    ///
    /// With `skip` set, shapes touching that box are left out and a sentinel
    /// entry stands in for it.
    pub fn entries(&self, region: &BBox, ids: &[usize], skip: Option<&BBox>) -> ClusterCode {
        let inner: BTreeSet<usize> = skip
            .map(|b| self.index.intersecting(b).into_iter().collect())
            .unwrap_or_default();

        let mut code: ClusterCode = ids
            .iter()
            .filter(|id| !inner.contains(id))
            .map(|id| {
                let s = &self.shapes.insts[*id];
                ClusterEntry::new(region, &s.bbox, ChildRef::Shape(s.pattern), s.tid, s.symmetry)
            })
            .collect();
        if let Some(b) = skip {
            code.push(ClusterEntry::sentinel(region, b));
        }
        code.sort();

        code
    }

    /// Grows an instance box one neighbor at a time in each direction.
    ///
    /// # Arguments
    /// * `bbox` - Instance box to grow
    /// * `incremental` - Encode only the shapes added around the instance
    ///
    /// # Returns
    /// One candidate per direction that found a neighbor, identical regions
    /// reported once
    pub fn enlarge(&self, bbox: &BBox, incremental: bool) -> Vec<Candidate> {
        let mut out: Vec<Candidate> = Vec::new();

        for dir in Direction::ALL {
            let Some(id) = self.nearest(bbox, dir) else {
                continue;
            };
            let merged = bbox.union(&self.shapes.insts[id].bbox);
            let (region, ids) = self.grow(merged);
            if out.iter().any(|c| c.bbox == region) {
                continue;
            }

            let skip = if incremental { Some(bbox) } else { None };
            out.push(Candidate {
                bbox: region,
                code: self.entries(&region, &ids, skip),
            });
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Polygon;
    use pretty_assertions::assert_eq;

    fn b(l: Coord, bt: Coord, r: Coord, t: Coord) -> BBox {
        BBox::new(l, bt, r, t).unwrap()
    }

    fn library(boxes: &[BBox]) -> (ShapeLibrary, BoxIndex<usize>) {
        let mut lib = ShapeLibrary::new();
        for bb in boxes {
            let p = Polygon::rect(bb).unwrap();
            lib.encode(p.bbox(), p.points()).unwrap();
        }
        let index = BoxIndex::from(lib.insts.iter().enumerate().map(|(i, s)| (s.bbox, i)));
        (lib, index)
    }

    #[test]
    fn growth_absorbs_touching_chain() {
        let (lib, index) = library(&[b(0, 0, 2, 2), b(2, 0, 3, 4), b(3, 3, 5, 4), b(9, 0, 10, 1)]);
        let field = ShapeField::new(&lib, &index, 1000);
        let (region, ids) = field.grow(b(0, 0, 2, 2));
        assert_eq!(region, b(0, 0, 5, 4));
        assert_eq!(ids, vec![0, 1, 2]);
    }

    #[test]
    fn grown_region_never_cuts_a_shape() {
        let (lib, index) = library(&[b(0, 0, 4, 1), b(1, 1, 2, 6), b(-3, 5, 1, 7), b(8, 8, 9, 9)]);
        let field = ShapeField::new(&lib, &index, 1000);
        let (region, _) = field.grow(b(0, 0, 1, 1));
        for s in &lib.insts {
            let crosses = s.bbox.intersects(&region) && !region.contains(&s.bbox);
            assert!(!crosses, "{} crosses {}", s.bbox, region);
        }
    }

    #[test]
    fn nearest_prefers_closest_then_lowest_id() {
        let (mut lib, index) = library(&[b(0, 0, 2, 2), b(12, 0, 14, 2), b(6, 0, 8, 2), b(6, 5, 8, 7)]);
        let field = ShapeField::new(&lib, &index, 1000);
        assert_eq!(field.nearest(&b(0, 0, 2, 2), Direction::Right), Some(2));
        assert_eq!(field.nearest(&b(0, 0, 2, 2), Direction::Left), None);
        assert_eq!(field.nearest(&b(0, 0, 8, 2), Direction::Top), Some(3));

        lib.insts[2].visited = true;
        let field = ShapeField::new(&lib, &index, 1000);
        assert_eq!(field.nearest(&b(0, 0, 2, 2), Direction::Right), None);
    }

    #[test]
    fn working_length_bounds_the_search() {
        let (lib, index) = library(&[b(0, 0, 2, 2), b(50, 0, 52, 2)]);
        assert_eq!(ShapeField::new(&lib, &index, 10).nearest(&b(0, 0, 2, 2), Direction::Right), None);
        assert_eq!(ShapeField::new(&lib, &index, 100).nearest(&b(0, 0, 2, 2), Direction::Right), Some(1));
    }

    #[test]
    fn enlarge_reports_identical_regions_once() {
        let (lib, index) = library(&[b(0, 0, 2, 2), b(10, 0, 12, 2), b(-10, 0, -8, 2)]);
        let field = ShapeField::new(&lib, &index, 1000);
        let cands = field.enlarge(&b(0, 0, 2, 2), false);
        assert_eq!(cands.len(), 2);
        assert_eq!(cands[0].bbox, b(-10, 0, 2, 2));
        assert_eq!(cands[1].bbox, b(0, 0, 12, 2));
        assert_eq!(cands[0].code.len(), 2);

        let inc = field.enlarge(&b(0, 0, 2, 2), true);
        assert!(inc[0].code.iter().any(|e| e.child == ChildRef::Sentinel));
        assert_eq!(inc[0].code.len(), 2);
    }
}
