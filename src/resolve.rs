//! Turns the propagation graph into a tree of non-overlapping patterns, then
//! links concrete instances along that tree.

use log::{debug, info};
use std::collections::{BTreeSet, VecDeque};

use crate::geometry::BBox;
use crate::pattern::{Arena, InstKey, Overlap, PatternKey};
use crate::spatial::BoxIndex;
use crate::HierError;

/// Patterns reachable from `root` through child links, breadth first.
pub fn reachable(arena: &Arena, root: PatternKey) -> Vec<PatternKey> {
    let mut order = Vec::new();
    let mut seen = BTreeSet::new();
    let mut queue = VecDeque::from([root]);

    while let Some(p) = queue.pop_front() {
        if !arena.contains(p) || !seen.insert(p) {
            continue;
        }
        order.push(p);
        queue.extend(arena.patterns[p].children.iter().copied());
    }

    order
}

/// Replaces deleted children of `key` by their own children until none is
/// left. Without `lift` deleted children are only dropped.
fn splice(arena: &mut Arena, key: PatternKey, delete: &BTreeSet<PatternKey>, lift: bool) {
    let Some(p) = arena.patterns.get(key) else {
        return;
    };
    if !p.children.iter().any(|c| delete.contains(c)) {
        return;
    }

    let mut out: Vec<PatternKey> = Vec::new();
    let mut expanded = BTreeSet::new();
    let mut work: Vec<PatternKey> = p.children.iter().rev().copied().collect();
    while let Some(c) = work.pop() {
        if !delete.contains(&c) {
            if c != key && !out.contains(&c) {
                out.push(c);
            }
        } else if lift && expanded.insert(c) {
            if let Some(cp) = arena.patterns.get(c) {
                work.extend(cp.children.iter().rev().copied());
            }
        }
    }

    if let Some(p) = arena.patterns.get_mut(key) {
        p.children = out;
    }
}

/// Fixed point removing self-overlapping patterns and partial overlaps
/// between siblings.
///
/// # Arguments
/// * `arena` - Pattern storage; deleted patterns are purged
/// * `largest` - Largest repeating patterns, pruned in place
/// * `root` - Synthetic root pattern
/// * `flow_up` - Hand children of deleted patterns to their parents
pub fn resolve_overlaps(
    arena: &mut Arena,
    largest: &mut Vec<PatternKey>,
    root: PatternKey,
    flow_up: bool,
) -> Result<(), HierError> {
    let keys: Vec<PatternKey> = arena.patterns.keys().collect();
    for k in keys {
        arena.build_index(k);
    }

    let mut pass = 0;
    loop {
        pass += 1;
        let mut keep: BTreeSet<PatternKey> = BTreeSet::new();
        let mut delete: BTreeSet<PatternKey> = BTreeSet::new();

        for &p in largest.iter() {
            let index = &arena.pattern(p)?.index;
            if arena
                .inst_boxes(p)?
                .iter()
                .any(|b| index.intersecting(b).len() > 1)
            {
                delete.insert(p);
            }
        }
        debug!("Pass {pass}: {} self-overlapping patterns", delete.len());

        if flow_up {
            for p in reachable(arena, root) {
                splice(arena, p, &delete, true);
            }
        }

        let mut seen = BTreeSet::new();
        let mut queue = VecDeque::from([root]);
        while let Some(parent) = queue.pop_front() {
            if delete.contains(&parent) || !seen.insert(parent) {
                continue;
            }
            let kept = resolve_level(arena, parent, &mut keep, &mut delete)?;
            queue.extend(kept.iter().copied());
            arena.pattern_mut(parent)?.children = kept;
        }

        largest.retain(|k| !delete.contains(k));
        if delete.is_empty() {
            break;
        }

        let keys: Vec<PatternKey> = arena.patterns.keys().collect();
        for k in keys {
            if !delete.contains(&k) {
                splice(arena, k, &delete, flow_up);
            }
        }
        for k in &delete {
            if *k != root {
                arena.purge(*k);
            }
        }
        info!("Overlap pass {pass} removed {} patterns", delete.len());
    }

    Ok(())
}

/// Resolves the children of one parent pattern.
///
/// # Returns
/// The children kept under `parent`, in order of first decision
fn resolve_level(
    arena: &mut Arena,
    parent: PatternKey,
    keep: &mut BTreeSet<PatternKey>,
    delete: &mut BTreeSet<PatternKey>,
) -> Result<Vec<PatternKey>, HierError> {
    let p = arena.pattern(parent)?;
    let Some(&first) = p.insts.first() else {
        return Ok(Vec::new());
    };
    let pbox = arena.bbox(first)?;
    let mut children = p.children.clone();

    // Positions in `children`, restricted to the parent's box
    let mut index: BoxIndex<usize> = BoxIndex::new();
    for (i, c) in children.iter().enumerate() {
        if !delete.contains(c) {
            for b in inside_boxes(arena, *c, &pbox)? {
                index.insert(&b, i);
            }
        }
    }

    let mut kept: Vec<PatternKey> = Vec::new();
    let mut i = 0;
    // `children` grows while grandchildren are promoted
    while i < children.len() {
        let c = children[i];
        i += 1;
        if delete.contains(&c) {
            continue;
        }

        let mut group = BTreeSet::new();
        for b in inside_boxes(arena, c, &pbox)? {
            group.extend(index.intersecting(&b));
        }
        let overlapping: Vec<usize> = group
            .into_iter()
            .filter(|x| !delete.contains(&children[*x]))
            .collect();

        if overlapping.len() <= 1 {
            keep.insert(c);
            if !kept.contains(&c) {
                kept.push(c);
            }
            continue;
        }

        let mut max = overlapping[0];
        for &idx in &overlapping {
            if keep.contains(&children[idx]) {
                max = idx;
                break;
            }
            if arena.area(children[max])? < arena.area(children[idx])? {
                max = idx;
            }
        }
        let main = children[max];
        keep.insert(main);
        if !kept.contains(&main) {
            kept.push(main);
        }

        for &idx in &overlapping {
            let d = children[idx];
            if idx == max || d == main || keep.contains(&d) {
                continue;
            }
            resolve_partial(arena, main, d, &mut children, &mut index, &pbox, delete)?;
        }
    }

    Ok(kept)
}

fn inside_boxes(arena: &Arena, key: PatternKey, pbox: &BBox) -> Result<Vec<BBox>, HierError> {
    let mut boxes = arena.inst_boxes(key)?;
    boxes.retain(|b| b.inside(pbox));
    Ok(boxes)
}

/// Settles a smaller sibling `d` against the kept pattern `main`.
///
/// A sibling lying inside `main` moves under it. Otherwise it is deleted and
/// its descendants are redistributed: those outside `main` move up to the
/// parent, those inside move under `main`, and partially overlapping ones are
/// split further or deleted.
fn resolve_partial(
    arena: &mut Arena,
    main: PatternKey,
    d: PatternKey,
    siblings: &mut Vec<PatternKey>,
    index: &mut BoxIndex<usize>,
    pbox: &BBox,
    delete: &mut BTreeSet<PatternKey>,
) -> Result<(), HierError> {
    if arena.overlap(d, main)? == Overlap::Inside {
        adopt(arena, main, d)?;
        return Ok(());
    }

    let mut work = vec![d];
    while let Some(x) = work.pop() {
        delete.insert(x);

        let grandchildren = arena.pattern(x)?.children.clone();
        for g in grandchildren {
            if g == main || delete.contains(&g) {
                continue;
            }
            match arena.overlap(g, main)? {
                Overlap::Outside => {
                    if !siblings.contains(&g) {
                        let pos = siblings.len();
                        for b in inside_boxes(arena, g, pbox)? {
                            index.insert(&b, pos);
                        }
                        siblings.push(g);
                    }
                }
                Overlap::Inside => adopt(arena, main, g)?,
                Overlap::Partial => {
                    if arena.pattern(g)?.children.is_empty() {
                        delete.insert(g);
                    } else {
                        work.push(g);
                    }
                }
            }
        }
    }

    Ok(())
}

fn adopt(arena: &mut Arena, main: PatternKey, child: PatternKey) -> Result<(), HierError> {
    let m = arena.pattern_mut(main)?;
    if child != main && !m.children.contains(&child) {
        m.children.push(child);
    }
    Ok(())
}

/// Links every instance to the instances of child patterns it contains, then
/// hangs leftovers under the root instance and removes overlapping leftovers.
///
/// # Arguments
/// * `arena` - Pattern storage with resolved child links
/// * `root` - Synthetic root pattern holding a single instance
pub fn build_instance_tree(arena: &mut Arena, root: PatternKey) -> Result<(), HierError> {
    for inst in arena.insts.values_mut() {
        inst.children.clear();
        inst.parent = None;
    }
    let keys: Vec<PatternKey> = arena.patterns.keys().collect();
    for k in keys {
        arena.build_index(k);
    }

    let mut seen = BTreeSet::new();
    let mut queue: VecDeque<PatternKey> = arena.pattern(root)?.children.iter().copied().collect();
    while let Some(p) = queue.pop_front() {
        if !seen.insert(p) {
            continue;
        }
        let kids = arena.pattern(p)?.children.clone();
        let insts = arena.pattern(p)?.insts.clone();
        for inst in insts {
            let ibox = arena.bbox(inst)?;
            for c in &kids {
                let hits = arena.pattern(*c)?.index.intersecting(&ibox);
                for hit in hits {
                    link(arena, inst, hit, &ibox)?;
                }
            }
        }
        queue.extend(kids);
    }

    let root_inst = *arena
        .pattern(root)?
        .insts
        .first()
        .ok_or_else(|| HierError::Inconsistent("root pattern has no instance".into()))?;
    for p in reachable(arena, root).into_iter().skip(1) {
        let insts = arena.pattern(p)?.insts.clone();
        for inst in insts {
            if arena.inst(inst)?.parent.is_none() && inst != root_inst {
                adopt_inst(arena, root_inst, inst)?;
            }
        }
    }

    prune_root(arena, root_inst)
}

fn link(arena: &mut Arena, parent: InstKey, child: InstKey, pbox: &BBox) -> Result<(), HierError> {
    let c = arena.inst(child)?;
    if parent == child || c.parent.is_some() || !c.bbox.inside(pbox) {
        return Ok(());
    }
    adopt_inst(arena, parent, child)
}

fn adopt_inst(arena: &mut Arena, parent: InstKey, child: InstKey) -> Result<(), HierError> {
    arena.inst_mut(child)?.parent = Some(parent);
    arena.inst_mut(parent)?.children.push(child);
    Ok(())
}

/// Among the root's direct children, keeps the largest of every group of
/// intersecting instances and deletes the others with their subtrees.
fn prune_root(arena: &mut Arena, root_inst: InstKey) -> Result<(), HierError> {
    let tops = arena.inst(root_inst)?.children.clone();
    let boxes = tops
        .iter()
        .map(|k| arena.bbox(*k))
        .collect::<Result<Vec<_>, _>>()?;
    let index = BoxIndex::from(boxes.iter().copied().enumerate().map(|(i, b)| (b, i)));

    let mut dead: BTreeSet<usize> = BTreeSet::new();
    for i in 0..tops.len() {
        if dead.contains(&i) {
            continue;
        }
        let touches: Vec<usize> = index
            .intersecting(&boxes[i])
            .into_iter()
            .filter(|t| !dead.contains(t))
            .collect();
        if touches.len() <= 1 {
            continue;
        }

        let mut max = touches[0];
        for &t in &touches[1..] {
            if boxes[max].area() <= boxes[t].area() {
                max = t;
            }
        }
        dead.extend(touches.into_iter().filter(|t| *t != max));
    }

    arena.inst_mut(root_inst)?.children = tops
        .iter()
        .enumerate()
        .filter(|(i, _)| !dead.contains(i))
        .map(|(_, k)| *k)
        .collect();

    for i in dead {
        let mut all = vec![tops[i]];
        let mut n = 0;
        while n < all.len() {
            if let Some(inst) = arena.insts.get(all[n]) {
                for c in &inst.children {
                    if !all.contains(c) {
                        all.push(*c);
                    }
                }
            }
            n += 1;
        }
        debug!("Removing {} overlapping instances", all.len());
        for k in all {
            arena.detach(k);
        }
    }

    Ok(())
}
