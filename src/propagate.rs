//! Unit-pattern seeding and propagation of seeds into largest repeating
//! patterns.

use log::{debug, info};
use std::collections::{BTreeMap, BTreeSet};

use crate::pattern::{Arena, PatternKey, PatternLibrary};
use crate::region::ShapeField;
use crate::shape::ShapeLibrary;
use crate::spatial::BoxIndex;
use crate::{Coord, HierError};

/// Partitions the shapes into non-cutting neighborhoods and groups identical
/// ones into unit patterns.
///
/// # Arguments
/// * `shapes` - Classified shapes; visited flags are consumed and reset
/// * `index` - Spatial index over `shapes`
/// * `working_len` - Neighbor search window
/// * `arena` - Storage for the unit patterns
///
/// # Returns
/// Unit patterns occurring more than once, rarest first
pub fn seed_units(
    shapes: &mut ShapeLibrary,
    index: &BoxIndex<usize>,
    working_len: Coord,
    arena: &mut Arena,
) -> Result<Vec<PatternKey>, HierError> {
    let mut units = PatternLibrary::new();
    // Units created while handling earlier shape patterns
    let mut earlier: BTreeSet<PatternKey> = BTreeSet::new();

    for pid in 0..shapes.patterns.len() {
        let first_new = units.len();
        let mut fresh: BTreeMap<PatternKey, Vec<usize>> = BTreeMap::new();
        let mut special: Vec<usize> = Vec::new();

        for sid in shapes.patterns[pid].insts.clone() {
            if shapes.insts[sid].visited {
                continue;
            }
            let field = ShapeField::new(shapes, index, working_len);
            let (bbox, ids) = field.grow(shapes.insts[sid].bbox);
            let code = field.entries(&bbox, &ids, None);
            let (key, _) = units.encode(arena, bbox, code)?;

            if earlier.contains(&key) {
                special.extend(ids);
            } else {
                fresh.entry(key).or_default().extend(ids);
            }
        }
        earlier.extend(units.patterns[first_new..].iter().copied());

        for (key, mut ids) in fresh {
            // Exclusive neighborhoods stay open for a larger unit
            if arena.pattern(key)?.len() == 1 {
                continue;
            }
            ids.sort_unstable();
            ids.dedup();
            for id in &ids {
                shapes.insts[*id].visited = true;
            }
            arena.pattern_mut(key)?.shapes.extend(ids);
        }
        for id in special {
            shapes.insts[id].visited = true;
        }
    }

    let mut seeds = Vec::new();
    for key in units.patterns {
        if arena.pattern(key)?.len() > 1 {
            seeds.push(key);
        } else {
            arena.purge(key);
        }
    }
    seeds.sort_by_key(|k| arena.patterns.get(*k).map_or(0, |p| p.len()));
    shapes.reset_visited();

    info!("Derived {} unit patterns", seeds.len());
    Ok(seeds)
}

/// Shared state of the propagation over all seeds.
pub struct Propagator<'a> {
    pub shapes: &'a mut ShapeLibrary,
    pub index: &'a BoxIndex<usize>,
    pub arena: &'a mut Arena,
    pub global: &'a mut PatternLibrary,
    pub largest: &'a mut Vec<PatternKey>,
    pub root: PatternKey,
    /// Canonical code length above which growth is encoded incrementally.
    pub threshold: usize,
    pub working_len: Coord,
    /// Stop smaller siblings from branching on their own.
    pub reduction: bool,
}

impl Propagator<'_> {
    /// True when a largest pattern with as many instances contains the
    /// candidate's first instance. The candidate's children move over unless
    /// they already did.
    fn any_include(&mut self, key: PatternKey) -> Result<bool, HierError> {
        let cand = self.arena.pattern(key)?;
        let n = cand.len();
        let Some(&first) = cand.insts.first() else {
            return Ok(false);
        };
        let first = self.arena.bbox(first)?;
        let children = cand.children.clone();

        for &lr in self.largest.iter() {
            let p = self.arena.pattern(lr)?;
            if p.len() != n || !self.arena.inst_boxes(lr)?.iter().any(|b| first.inside(b)) {
                continue;
            }
            if children.first().is_some_and(|c| !p.children.contains(c)) {
                self.arena.pattern_mut(lr)?.children.extend(children);
            }
            return Ok(true);
        }

        Ok(false)
    }

    fn known(&mut self, local: &PatternLibrary, key: PatternKey) -> Result<bool, HierError> {
        Ok(local.any_same(self.arena, key)
            || self.global.any_same(self.arena, key)
            || self.any_include(key)?)
    }

    fn register(&mut self, local: &mut PatternLibrary, key: PatternKey) -> Result<(), HierError> {
        local.register(self.arena, key)?;
        self.global.register(self.arena, key)
    }

    /// Grows one seed until every branch reaches its largest repeating pattern.
    pub fn run(&mut self, seed: PatternKey) -> Result<(), HierError> {
        let mut stack = vec![seed];
        let mut local = PatternLibrary::new();
        let mut untouched = true;

        while let Some(top) = stack.pop() {
            debug!("Stack depth: {}", stack.len() + 1);
            let p = self.arena.pattern(top)?;
            let n = p.len();
            let incremental = p.codes.first().map_or(0, |c| c.len()) > self.threshold;
            let boxes = self.arena.inst_boxes(top)?;

            let mut scratch = PatternLibrary::new();
            let field = ShapeField::new(self.shapes, self.index, self.working_len);
            for bbox in &boxes {
                for cand in field.enlarge(bbox, incremental) {
                    scratch.encode(self.arena, cand.bbox, cand.code)?;
                }
            }

            let mut adopted: BTreeSet<PatternKey> = BTreeSet::new();
            let matched = scratch
                .patterns
                .iter()
                .any(|k| self.arena.patterns.get(*k).is_some_and(|p| p.len() == n));

            if !matched {
                // `top` cannot grow without losing an instance
                let mut root_child = true;
                for &k in &scratch.patterns {
                    if self.arena.pattern(k)?.len() <= 1 {
                        continue;
                    }
                    self.arena.pattern_mut(k)?.children.push(top);
                    root_child = false;
                    if self.known(&local, k)? {
                        untouched = false;
                    } else {
                        self.register(&mut local, k)?;
                        stack.push(k);
                        adopted.insert(k);
                    }
                }

                self.largest.push(top);
                if root_child {
                    self.arena.pattern_mut(self.root)?.children.push(top);
                }
            } else {
                let inherited = self.arena.pattern(top)?.children.clone();
                for &k in &scratch.patterns {
                    let len = self.arena.pattern(k)?.len();
                    if len != n && len <= 1 {
                        continue;
                    }
                    if self.known(&local, k)? {
                        untouched = false;
                        continue;
                    }

                    self.register(&mut local, k)?;
                    adopted.insert(k);
                    if len == n || !self.reduction {
                        self.arena.pattern_mut(k)?.children.extend(inherited.iter().copied());
                        stack.push(k);
                    }
                }
            }

            for k in scratch.patterns {
                if !adopted.contains(&k) {
                    self.arena.purge(k);
                }
            }
        }

        if untouched {
            for sid in self.arena.pattern(seed)?.shapes.iter() {
                self.shapes.insts[*sid].visited = true;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{BBox, Polygon};
    use pretty_assertions::assert_eq;

    fn library(boxes: &[BBox]) -> (ShapeLibrary, BoxIndex<usize>) {
        let mut shapes = ShapeLibrary::new();
        for bb in boxes {
            let poly = Polygon::rect(bb).unwrap();
            shapes.encode(poly.bbox(), poly.points()).unwrap();
        }
        let index = BoxIndex::from(shapes.insts.iter().enumerate().map(|(i, s)| (s.bbox, i)));
        (shapes, index)
    }

    fn b(l: Coord, bt: Coord, r: Coord, t: Coord) -> BBox {
        BBox::new(l, bt, r, t).unwrap()
    }

    #[test]
    fn touching_pairs_seed_one_unit() {
        let boxes: Vec<BBox> = (0..3)
            .flat_map(|i| [b(i * 50, 0, i * 50 + 2, 2), b(i * 50 + 2, 0, i * 50 + 3, 4)])
            .collect();
        let (mut shapes, index) = library(&boxes);
        let mut arena = Arena::new();

        let seeds = seed_units(&mut shapes, &index, 1000, &mut arena).unwrap();
        assert_eq!(seeds.len(), 1);
        let unit = &arena.patterns[seeds[0]];
        assert_eq!(unit.len(), 3);
        assert_eq!(unit.shapes, vec![0, 1, 2, 3, 4, 5]);
        assert!(shapes.insts.iter().all(|s| !s.visited));
    }

    #[test]
    fn neighborhood_seen_for_an_earlier_shape_is_not_reseeded() {
        // One square touches a bar, two squares stand alone
        let boxes = [b(0, 0, 2, 2), b(2, 0, 3, 4), b(100, 0, 102, 2), b(200, 0, 202, 2)];
        let (mut shapes, index) = library(&boxes);
        let mut arena = Arena::new();

        let seeds = seed_units(&mut shapes, &index, 1000, &mut arena).unwrap();
        assert_eq!(seeds.len(), 1);
        let unit = &arena.patterns[seeds[0]];
        assert_eq!(unit.len(), 2);
        assert_eq!(unit.shapes, vec![2, 3]);
        // The lone square-and-bar neighborhood was dropped
        assert_eq!(arena.patterns.len(), 1);
    }
}
