//! Orientation arithmetic over the dihedral group of the square.
//!
//! An orientation `Oid` is one of the eight group elements. Odd indices are
//! rotations (`O(2r+1)` turns by `90 * r` degrees counter-clockwise), even
//! indices are the same rotation followed by a mirror across the y axis. A
//! transform id `Tid` names the orientations a particular shape or cluster can
//! actually distinguish; which orientations collapse onto the same `Tid` is
//! decided by the shape's [`Symmetry`] class.

use serde::Serialize;
use std::fmt;
use thiserror::Error;

use crate::geometry::{Point, Trans};
use crate::HierError;

#[derive(Debug, Error)]
pub enum SymmetryError {
    #[error("Transform id T{tid} is out of range for symmetry class {class}")]
    TransformOutOfRange { tid: u8, class: Symmetry },
    #[error("No symmetry class matches orientation map {0:?}")]
    NoSymmetryClass([u8; 8]),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Oid {
    O1 = 1,
    O2,
    O3,
    O4,
    O5,
    O6,
    O7,
    O8,
}

impl Oid {
    pub const ALL: [Oid; 8] = [
        Oid::O1,
        Oid::O2,
        Oid::O3,
        Oid::O4,
        Oid::O5,
        Oid::O6,
        Oid::O7,
        Oid::O8,
    ];

    pub fn index(self) -> u8 {
        self as u8
    }

    pub fn from_index(index: u8) -> Option<Oid> {
        Oid::ALL.get((index as usize).checked_sub(1)?).copied()
    }

    pub fn is_reflection(self) -> bool {
        self.index() % 2 == 0
    }

    /// Placement transform realizing this orientation about the origin.
    pub fn trans(self) -> Trans {
        let i = self.index() - 1;
        Trans::new(i % 2 == 1, i / 2, Point::default())
    }

    pub fn apply(self, p: Point) -> Point {
        self.trans().apply(p)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Tid {
    T1 = 1,
    T2,
    T3,
    T4,
    T5,
    T6,
    T7,
    T8,
}

impl Tid {
    pub const ALL: [Tid; 8] = [
        Tid::T1,
        Tid::T2,
        Tid::T3,
        Tid::T4,
        Tid::T5,
        Tid::T6,
        Tid::T7,
        Tid::T8,
    ];

    pub fn index(self) -> u8 {
        self as u8
    }

    pub fn from_index(index: u8) -> Option<Tid> {
        Tid::ALL.get((index as usize).checked_sub(1)?).copied()
    }
}

impl fmt::Display for Tid {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "T{}", self.index())
    }
}

/// Symmetry archetypes, one per subgroup of the dihedral group up to the
/// stabilizer a bounded point set can have.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Symmetry {
    None,
    TwoFoldCentral,
    FourFoldCentral,
    VerticalAxis,
    HorizontalAxis,
    PlusDiagonal,
    MinusDiagonal,
    TwoFoldAxial,
    FourFoldAxial,
    TwoFoldDiagonal,
}

impl Symmetry {
    pub const ALL: [Symmetry; 10] = [
        Symmetry::None,
        Symmetry::TwoFoldCentral,
        Symmetry::FourFoldCentral,
        Symmetry::VerticalAxis,
        Symmetry::HorizontalAxis,
        Symmetry::PlusDiagonal,
        Symmetry::MinusDiagonal,
        Symmetry::TwoFoldAxial,
        Symmetry::FourFoldAxial,
        Symmetry::TwoFoldDiagonal,
    ];

    /// Transform id of `O1..O8`, in order.
    pub fn table(self) -> [u8; 8] {
        match self {
            Symmetry::None => [1, 2, 3, 4, 5, 6, 7, 8],
            Symmetry::TwoFoldCentral => [1, 2, 3, 4, 1, 2, 3, 4],
            Symmetry::FourFoldCentral => [1, 2, 1, 2, 1, 2, 1, 2],
            Symmetry::VerticalAxis => [1, 1, 2, 3, 4, 4, 3, 2],
            Symmetry::HorizontalAxis => [1, 2, 3, 3, 2, 1, 4, 4],
            Symmetry::PlusDiagonal => [1, 2, 2, 1, 3, 4, 4, 3],
            Symmetry::MinusDiagonal => [1, 2, 3, 4, 4, 3, 2, 1],
            Symmetry::TwoFoldAxial => [1, 1, 2, 2, 1, 1, 2, 2],
            Symmetry::FourFoldAxial => [1, 1, 1, 1, 1, 1, 1, 1],
            Symmetry::TwoFoldDiagonal => [1, 2, 2, 1, 1, 2, 2, 1],
        }
    }

    /// Number of distinguishable transform ids.
    pub fn count(self) -> usize {
        self.table().iter().copied().max().unwrap_or(1) as usize
    }

    /// Classifies an orientation map built by first occurrence.
    pub fn from_map(map: &[u8; 8]) -> Result<Symmetry, SymmetryError> {
        Symmetry::ALL
            .into_iter()
            .find(|s| s.table() == *map)
            .ok_or(SymmetryError::NoSymmetryClass(*map))
    }

    pub fn o_to_t(self, oid: Oid) -> Tid {
        // Every table entry lies in 1..=8
        Tid::from_index(self.table()[oid.index() as usize - 1]).unwrap_or(Tid::T1)
    }

    /// Representative orientation of a transform id: the first one mapping to it.
    pub fn t_to_o(self, tid: Tid) -> Result<Oid, SymmetryError> {
        self.table()
            .iter()
            .position(|&t| t == tid.index())
            .and_then(|i| Oid::from_index(i as u8 + 1))
            .ok_or(SymmetryError::TransformOutOfRange {
                tid: tid.index(),
                class: self,
            })
    }

    /// Transform that brings geometry held at `tid` back to the canonical
    /// orientation of this class.
    pub fn extraction(self, tid: Tid) -> Result<Trans, SymmetryError> {
        Ok(self.t_to_o(tid)?.trans().inverse())
    }

    /// Transform id reached by applying `oid` to geometry already held at `old`.
    pub fn tid_update(self, old: Tid, oid: Oid) -> Result<Tid, SymmetryError> {
        if oid == Oid::O1 {
            return Ok(old);
        }

        let old_o = self.t_to_o(old)?.index() as i32;
        let o = oid.index() as i32;
        let mut new_o = if old_o % 2 == 0 {
            old_o - o + 1
        } else {
            old_o + o - 1
        };
        if new_o < 1 {
            new_o += 8;
        } else if new_o > 8 {
            new_o -= 8;
        }

        let new_o = Oid::from_index(new_o as u8).ok_or(SymmetryError::TransformOutOfRange {
            tid: old.index(),
            class: self,
        })?;
        Ok(self.o_to_t(new_o))
    }
}

impl fmt::Display for Symmetry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Symmetry::None => "none",
            Symmetry::TwoFoldCentral => "2-fold central",
            Symmetry::FourFoldCentral => "4-fold central",
            Symmetry::VerticalAxis => "vertical axis",
            Symmetry::HorizontalAxis => "horizontal axis",
            Symmetry::PlusDiagonal => "+45 axis",
            Symmetry::MinusDiagonal => "-45 axis",
            Symmetry::TwoFoldAxial => "2-fold central and axial",
            Symmetry::FourFoldAxial => "4-fold central and axial",
            Symmetry::TwoFoldDiagonal => "2-fold central and diagonal",
        };
        write!(f, "{name}")
    }
}

/// Computes the orbit of a canonical code under all eight orientations.
///
/// # Arguments
/// * `code` - Canonical code, taken as the `O1` image
/// * `transform` - Produces the image of a code under an orientation
///
/// # Returns
/// The symmetry class and the distinct images, where the image at position
/// `i` belongs to transform id `T(i+1)`
pub fn orbit<C, F>(code: &C, mut transform: F) -> Result<(Symmetry, Vec<C>), HierError>
where
    C: Clone + PartialEq,
    F: FnMut(&C, Oid) -> Result<C, HierError>,
{
    let mut distinct: Vec<C> = vec![code.clone()];
    let mut map = [1u8; 8];

    for oid in Oid::ALL.into_iter().skip(1) {
        let image = transform(code, oid)?;
        let t = match distinct.iter().position(|c| *c == image) {
            Some(i) => i + 1,
            None => {
                distinct.push(image);
                distinct.len()
            }
        };
        map[oid.index() as usize - 1] = t as u8;
    }

    let symmetry = Symmetry::from_map(&map)?;
    Ok((symmetry, distinct))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn compose(a: Oid, b: Oid) -> Oid {
        let t = a.trans().compose(&b.trans());
        Oid::ALL.into_iter().find(|o| o.trans() == t).unwrap()
    }

    #[test]
    fn orientation_points() {
        let p = Point::new(2, 5);
        let expected = [(2, 5), (-2, 5), (-5, 2), (5, 2), (-2, -5), (2, -5), (5, -2), (-5, -2)];
        for (oid, (x, y)) in Oid::ALL.into_iter().zip(expected) {
            assert_eq!(oid.apply(p), Point::new(x, y), "{oid:?}");
        }
    }

    #[test]
    fn tables_are_first_occurrence_maps() {
        for s in Symmetry::ALL {
            let table = s.table();
            let mut next = 1;
            for t in table {
                assert!(t <= next, "{s} skips a transform id");
                if t == next {
                    next += 1;
                }
            }
        }
    }

    #[test]
    fn classes_are_exhaustive_and_unique() {
        for s in Symmetry::ALL {
            assert_eq!(Symmetry::from_map(&s.table()).unwrap(), s);
        }
        assert!(Symmetry::from_map(&[1, 2, 3, 4, 5, 6, 7, 1]).is_err());
    }

    #[test]
    fn tid_update_is_group_composition() {
        for old in Oid::ALL {
            for oid in Oid::ALL {
                let got = Symmetry::None.tid_update(Tid::from_index(old.index()).unwrap(), oid);
                assert_eq!(got.unwrap().index(), compose(oid, old).index());
            }
        }
    }

    #[test]
    fn tid_update_respects_symmetry() {
        for s in Symmetry::ALL {
            for t in 1..=s.count() as u8 {
                let tid = Tid::from_index(t).unwrap();
                for oid in Oid::ALL {
                    let rep = s.t_to_o(tid).unwrap();
                    let expected = s.o_to_t(compose(oid, rep));
                    assert_eq!(s.tid_update(tid, oid).unwrap(), expected, "{s} {tid} {oid:?}");
                }
            }
        }
    }

    #[test]
    fn out_of_range_transform_is_fatal() {
        assert!(Symmetry::FourFoldAxial.t_to_o(Tid::T2).is_err());
        assert!(Symmetry::FourFoldAxial.tid_update(Tid::T3, Oid::O2).is_err());
        assert_eq!(Symmetry::VerticalAxis.t_to_o(Tid::T4).unwrap(), Oid::O5);
    }

    #[test]
    fn extraction_undoes_the_representative() {
        for s in Symmetry::ALL {
            assert!(s.extraction(Tid::T1).unwrap().is_identity());
            for t in 1..=s.count() as u8 {
                let tid = Tid::from_index(t).unwrap();
                let back = s.extraction(tid).unwrap().compose(&s.t_to_o(tid).unwrap().trans());
                assert!(back.is_identity(), "{s} {tid}");
            }
        }
        // T2 is a quarter turn in the 2-fold axial class, not a mirror
        assert_eq!(Symmetry::TwoFoldAxial.extraction(Tid::T2).unwrap(), Trans::new(false, 3, Point::default()));
        assert!(Symmetry::FourFoldAxial.extraction(Tid::T2).is_err());
    }
}
