//! Clusters of classified shapes, their placements, and the arena holding them.
//!
//! A cluster code lists the members of a region relative to the region's box
//! center. Centers are kept doubled so odd extents stay integral.

use log::warn;
use slotmap::{new_key_type, SlotMap};
use std::collections::BTreeMap;

use crate::geometry::{BBox, Point};
use crate::layout::CellId;
use crate::spatial::BoxIndex;
use crate::symmetry::{orbit, Oid, Symmetry, Tid};
use crate::{Coord, HierError};

new_key_type! {
    pub struct PatternKey;
    pub struct InstKey;
}

/// Member of a cluster: a shape pattern, or the stand-in for the instance a
/// region grew from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ChildRef {
    Sentinel,
    Shape(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClusterEntry {
    pub dx: Coord,
    pub dy: Coord,
    pub child: ChildRef,
    pub tid: Tid,
    pub symmetry: Symmetry,
}

pub type ClusterCode = Vec<ClusterEntry>;

impl ClusterEntry {
    /// Entry for a member box relative to a region box.
    pub fn new(region: &BBox, member: &BBox, child: ChildRef, tid: Tid, symmetry: Symmetry) -> Self {
        let d = member.center2() - region.center2();
        ClusterEntry {
            dx: d.x,
            dy: d.y,
            child,
            tid,
            symmetry,
        }
    }

    /// Marks where the grown instance sat inside an incrementally encoded region.
    pub fn sentinel(region: &BBox, member: &BBox) -> Self {
        ClusterEntry::new(region, member, ChildRef::Sentinel, Tid::T1, Symmetry::TwoFoldAxial)
    }
}

/// Image of a cluster code under an orientation, members re-oriented too.
pub fn transform_cluster(code: &ClusterCode, oid: Oid) -> Result<ClusterCode, HierError> {
    let mut image = code
        .iter()
        .map(|e| -> Result<ClusterEntry, HierError> {
            let p = oid.apply(Point::new(e.dx, e.dy));
            Ok(ClusterEntry {
                dx: p.x,
                dy: p.y,
                tid: e.symmetry.tid_update(e.tid, oid)?,
                ..*e
            })
        })
        .collect::<Result<ClusterCode, HierError>>()?;
    image.sort();

    Ok(image)
}

#[derive(Debug, Clone)]
pub struct Instance {
    pub bbox: BBox,
    pub tid: Tid,
    pub pattern: PatternKey,
    pub children: Vec<InstKey>,
    pub parent: Option<InstKey>,
}

#[derive(Clone, Default)]
pub struct Pattern {
    pub symmetry: Option<Symmetry>,
    /// Code per transform id, `codes[0]` being canonical.
    pub codes: Vec<ClusterCode>,
    /// Placements, sorted by box.
    pub insts: Vec<InstKey>,
    pub children: Vec<PatternKey>,
    /// Shape instances that seeded this pattern.
    pub shapes: Vec<usize>,
    pub index: BoxIndex<InstKey>,
    pub cell: Option<CellId>,
}

impl Pattern {
    pub fn new(symmetry: Symmetry, codes: Vec<ClusterCode>) -> Self {
        Pattern {
            symmetry: Some(symmetry),
            codes,
            ..Default::default()
        }
    }

    pub fn len(&self) -> usize {
        self.insts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.insts.is_empty()
    }

    pub fn symmetry(&self) -> Symmetry {
        self.symmetry.unwrap_or(Symmetry::None)
    }
}

/// Where one pattern's instances sit relative to another's.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Overlap {
    Outside,
    Inside,
    Partial,
}

/// Owner of every pattern and instance; all cross references are keys.
#[derive(Default)]
pub struct Arena {
    pub patterns: SlotMap<PatternKey, Pattern>,
    pub insts: SlotMap<InstKey, Instance>,
}

impl Arena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, key: PatternKey) -> bool {
        self.patterns.contains_key(key)
    }

    pub fn pattern(&self, key: PatternKey) -> Result<&Pattern, HierError> {
        self.patterns
            .get(key)
            .ok_or_else(|| HierError::Inconsistent(format!("missing pattern {key:?}")))
    }

    pub fn pattern_mut(&mut self, key: PatternKey) -> Result<&mut Pattern, HierError> {
        self.patterns
            .get_mut(key)
            .ok_or_else(|| HierError::Inconsistent(format!("missing pattern {key:?}")))
    }

    pub fn inst(&self, key: InstKey) -> Result<&Instance, HierError> {
        self.insts
            .get(key)
            .ok_or_else(|| HierError::Inconsistent(format!("missing instance {key:?}")))
    }

    pub fn inst_mut(&mut self, key: InstKey) -> Result<&mut Instance, HierError> {
        self.insts
            .get_mut(key)
            .ok_or_else(|| HierError::Inconsistent(format!("missing instance {key:?}")))
    }

    pub fn bbox(&self, key: InstKey) -> Result<BBox, HierError> {
        Ok(self.inst(key)?.bbox)
    }

    /// Boxes of every instance of a pattern, in list order.
    pub fn inst_boxes(&self, key: PatternKey) -> Result<Vec<BBox>, HierError> {
        self.pattern(key)?.insts.iter().map(|k| self.bbox(*k)).collect()
    }

    /// Adds a placement of `pattern`, keeping its list sorted by box.
    ///
    /// # Returns
    /// The new instance, or `None` if an instance with the same box exists
    pub fn attach(&mut self, pattern: PatternKey, bbox: BBox, tid: Tid) -> Result<Option<InstKey>, HierError> {
        let pos = {
            let insts = &self.insts;
            let p = self.pattern(pattern)?;
            match p.insts.binary_search_by(|k| insts[*k].bbox.cmp(&bbox)) {
                Ok(_) => return Ok(None),
                Err(pos) => pos,
            }
        };

        let key = self.insts.insert(Instance {
            bbox,
            tid,
            pattern,
            children: Vec::new(),
            parent: None,
        });
        self.pattern_mut(pattern)?.insts.insert(pos, key);

        Ok(Some(key))
    }

    /// Removes a pattern together with all of its instances.
    pub fn purge(&mut self, key: PatternKey) {
        if let Some(p) = self.patterns.remove(key) {
            for inst in p.insts {
                self.insts.remove(inst);
            }
        }
    }

    /// Removes one instance from its pattern and from the arena.
    pub fn detach(&mut self, key: InstKey) {
        if let Some(inst) = self.insts.remove(key) {
            if let Some(p) = self.patterns.get_mut(inst.pattern) {
                p.insts.retain(|k| *k != key);
                p.index.remove(&inst.bbox, key);
            }
        }
    }

    /// Total area covered by a pattern, taken from its first instance.
    pub fn area(&self, key: PatternKey) -> Result<i128, HierError> {
        let p = self.pattern(key)?;
        match p.insts.first() {
            Some(k) => Ok(self.bbox(*k)?.area() * p.len() as i128),
            None => Ok(0),
        }
    }

    /// Rebuilds the spatial index over a pattern's instances.
    pub fn build_index(&mut self, key: PatternKey) {
        let insts = &self.insts;
        if let Some(p) = self.patterns.get_mut(key) {
            p.index = BoxIndex::from(p.insts.iter().map(|k| (insts[*k].bbox, *k)));
        }
    }

    /// Classifies the instances of `pattern` against those of `upper`.
    ///
    /// Touched instances all within the touching `upper` instance count as
    /// inside; any touched instance sticking out makes the overlap partial.
    pub fn overlap(&self, pattern: PatternKey, upper: PatternKey) -> Result<Overlap, HierError> {
        let p = self.pattern(pattern)?;
        let mut inside = false;

        for b in self.inst_boxes(upper)? {
            for t in p.index.intersecting(&b) {
                if self.bbox(t)?.inside(&b) {
                    inside = true;
                } else {
                    return Ok(Overlap::Partial);
                }
            }
        }

        Ok(if inside {
            Overlap::Inside
        } else {
            Overlap::Outside
        })
    }

    /// Absolute cluster code of an instance, rebuilt from its pattern's code.
    ///
    /// A mismatched pattern is reported and yields `None`.
    pub fn instance_code(&self, pattern: PatternKey, inst: InstKey) -> Option<ClusterCode> {
        let i = self.insts.get(inst)?;
        if i.pattern != pattern {
            warn!("Instance {inst:?} does not belong to pattern {pattern:?}");
            return None;
        }

        let center = i.bbox.center2();
        let code = self.patterns.get(pattern)?.codes.get(i.tid.index() as usize - 1)?;
        Some(
            code.iter()
                .map(|e| ClusterEntry {
                    dx: e.dx + center.x,
                    dy: e.dy + center.y,
                    ..*e
                })
                .collect(),
        )
    }
}

/// Code registry mapping every orientation image of a registered pattern's
/// canonical code to the pattern and the transform id it stands for.
#[derive(Debug, Default)]
pub struct PatternLibrary {
    codes: BTreeMap<ClusterCode, (PatternKey, Tid)>,
    pub patterns: Vec<PatternKey>,
}

impl PatternLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a cluster occurrence, creating its pattern on first sight.
    ///
    /// # Arguments
    /// * `arena` - Storage for new patterns and instances
    /// * `bbox` - Region box of the occurrence
    /// * `code` - Entries relative to the region center, in any order
    ///
    /// # Returns
    /// The pattern and, unless the box was already recorded, the new instance
    pub fn encode(
        &mut self,
        arena: &mut Arena,
        bbox: BBox,
        mut code: ClusterCode,
    ) -> Result<(PatternKey, Option<InstKey>), HierError> {
        code.sort();

        if let Some(&(key, tid)) = self.codes.get(&code) {
            let inst = arena.attach(key, bbox, tid)?;
            return Ok((key, inst));
        }

        let (symmetry, codes) = orbit(&code, transform_cluster)?;
        let key = arena.patterns.insert(Pattern::new(symmetry, codes));
        self.register(arena, key)?;
        let inst = arena.attach(key, bbox, Tid::T1)?;

        Ok((key, inst))
    }

    /// Adds every orientation code of an existing pattern.
    pub fn register(&mut self, arena: &Arena, key: PatternKey) -> Result<(), HierError> {
        let p = arena.pattern(key)?;
        for (i, code) in p.codes.iter().enumerate() {
            let tid = Tid::from_index(i as u8 + 1)
                .ok_or_else(|| HierError::Inconsistent(format!("pattern {key:?} has {} codes", p.codes.len())))?;
            self.codes.insert(code.clone(), (key, tid));
        }
        self.patterns.push(key);

        Ok(())
    }

    /// True when the library already holds a pattern with the same code.
    pub fn any_same(&self, arena: &Arena, key: PatternKey) -> bool {
        arena
            .patterns
            .get(key)
            .and_then(|p| p.codes.first())
            .is_some_and(|c| self.codes.contains_key(c))
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn b(l: Coord, bt: Coord, r: Coord, t: Coord) -> BBox {
        BBox::new(l, bt, r, t).unwrap()
    }

    /// Square shape 0 and upright rectangle shape 1 abutting it on the right.
    fn pair(x: Coord) -> (BBox, ClusterCode) {
        let region = b(x, 0, x + 3, 4);
        let code = vec![
            ClusterEntry::new(&region, &b(x, 0, x + 2, 2), ChildRef::Shape(0), Tid::T1, Symmetry::FourFoldAxial),
            ClusterEntry::new(&region, &b(x + 2, 0, x + 3, 4), ChildRef::Shape(1), Tid::T1, Symmetry::TwoFoldAxial),
        ];
        (region, code)
    }

    #[test]
    fn repeated_cluster_shares_pattern() {
        let mut arena = Arena::new();
        let mut lib = PatternLibrary::new();
        let (r0, c0) = pair(0);
        let (r1, c1) = pair(10);
        let (k0, i0) = lib.encode(&mut arena, r0, c0).unwrap();
        let (k1, i1) = lib.encode(&mut arena, r1, c1).unwrap();

        assert_eq!(k0, k1);
        assert!(i0.is_some() && i1.is_some());
        assert_eq!(arena.patterns[k0].symmetry(), Symmetry::None);
        assert_eq!(arena.patterns[k0].codes.len(), 8);
        assert_eq!(arena.patterns[k0].len(), 2);
    }

    #[test]
    fn duplicate_box_is_not_recorded_twice() {
        let mut arena = Arena::new();
        let mut lib = PatternLibrary::new();
        let (r, c) = pair(0);
        lib.encode(&mut arena, r, c.clone()).unwrap();
        let (k, inst) = lib.encode(&mut arena, r, c).unwrap();
        assert!(inst.is_none());
        assert_eq!(arena.patterns[k].len(), 1);
    }

    #[test]
    fn instances_stay_sorted() {
        let mut arena = Arena::new();
        let mut lib = PatternLibrary::new();
        for x in [20, 0, 10] {
            let (r, c) = pair(x);
            lib.encode(&mut arena, r, c).unwrap();
        }
        let key = lib.patterns[0];
        let lefts: Vec<Coord> = arena.patterns[key].insts.iter().map(|k| arena.bbox(*k).unwrap().left).collect();
        assert_eq!(lefts, vec![0, 10, 20]);
    }

    #[test]
    fn rotated_cluster_gets_matching_transform_id() {
        let mut arena = Arena::new();
        let mut lib = PatternLibrary::new();
        let (r, c) = pair(0);
        let (key, _) = lib.encode(&mut arena, r, c.clone()).unwrap();

        let rotated = transform_cluster(&c, Oid::O3).unwrap();
        let (k2, inst) = lib.encode(&mut arena, b(100, 0, 104, 3), rotated).unwrap();
        assert_eq!(key, k2);
        assert_eq!(arena.insts[inst.unwrap()].tid, Tid::T3);
    }

    #[test]
    fn instance_code_round_trip() {
        let mut arena = Arena::new();
        let mut lib = PatternLibrary::new();
        let (r, c) = pair(10);
        let (key, inst) = lib.encode(&mut arena, r, c).unwrap();
        let code = arena.instance_code(key, inst.unwrap()).unwrap();
        assert_eq!(code[0].dx, 22);
        assert_eq!(code[0].dy, 2);

        let (other, _) = PatternLibrary::new().encode(&mut arena, r, pair(0).1).unwrap();
        assert!(arena.instance_code(other, inst.unwrap()).is_none());
    }

    #[test]
    fn overlap_classification() {
        let mut arena = Arena::new();
        let outer = arena.patterns.insert(Pattern::new(Symmetry::None, Vec::new()));
        let inner = arena.patterns.insert(Pattern::new(Symmetry::None, Vec::new()));
        let far = arena.patterns.insert(Pattern::new(Symmetry::None, Vec::new()));
        arena.attach(outer, b(0, 0, 10, 10), Tid::T1).unwrap();
        arena.attach(inner, b(2, 2, 4, 4), Tid::T1).unwrap();
        arena.attach(far, b(20, 0, 30, 10), Tid::T1).unwrap();
        arena.attach(far, b(8, 8, 12, 12), Tid::T1).unwrap();
        for k in [outer, inner, far] {
            arena.build_index(k);
        }

        assert_eq!(arena.overlap(inner, outer).unwrap(), Overlap::Inside);
        assert_eq!(arena.overlap(far, outer).unwrap(), Overlap::Partial);
        assert_eq!(arena.overlap(outer, inner).unwrap(), Overlap::Partial);
        assert_eq!(arena.area(far).unwrap(), 32);
    }

    #[test]
    fn stale_keys_are_errors() {
        let mut arena = Arena::new();
        let gone = arena.patterns.insert(Pattern::new(Symmetry::None, Vec::new()));
        let live = arena.patterns.insert(Pattern::new(Symmetry::None, Vec::new()));
        let inst = arena.attach(gone, b(0, 0, 2, 2), Tid::T1).unwrap().unwrap();
        arena.attach(live, b(0, 0, 4, 4), Tid::T1).unwrap();
        arena.purge(gone);

        assert!(matches!(arena.bbox(inst), Err(HierError::Inconsistent(_))));
        assert!(arena.area(gone).is_err());
        assert!(arena.overlap(gone, live).is_err());
        assert!(arena.overlap(live, gone).is_err());
        assert!(arena.inst_boxes(gone).is_err());
    }
}
