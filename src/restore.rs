//! Writes the recovered pattern tree back into the layout as cells.

use log::{debug, info, warn};
use std::collections::BTreeSet;

use crate::layout::{CellId, Layer, LayoutDb, LayoutError};
use crate::pattern::{Arena, InstKey, PatternKey};
use crate::spatial::BoxIndex;
use crate::symmetry::Tid;
use crate::HierError;

/// Patterns below `root`, children before parents.
fn post_order(arena: &Arena, root: PatternKey) -> Vec<PatternKey> {
    let mut order = Vec::new();
    let mut done = BTreeSet::new();
    let mut stack = vec![(root, false)];

    while let Some((key, expanded)) = stack.pop() {
        if expanded {
            if done.insert(key) {
                order.push(key);
            }
            continue;
        }
        if done.contains(&key) {
            continue;
        }
        let Some(p) = arena.patterns.get(key) else {
            continue;
        };

        stack.push((key, true));
        for c in p.children.iter().rev() {
            if !done.contains(c) {
                stack.push((*c, false));
            }
        }
    }

    order
}

/// Creates one cell per pattern, moves each pattern's shapes into it and
/// places child cells where the child instances sit.
///
/// # Arguments
/// * `layout` - Layout holding `top`; shapes on `layer` move out of it
/// * `arena` - Resolved patterns with a built instance tree
/// * `root` - Synthetic root pattern
/// * `top` - Flattened top cell
/// * `layer` - Working layer
/// * `prefix` - Name prefix of the created cells
///
/// # Returns
/// The cell built for the root pattern
pub fn restore_hierarchy<L: LayoutDb>(
    layout: &mut L,
    arena: &mut Arena,
    root: PatternKey,
    top: CellId,
    layer: Layer,
    prefix: &str,
) -> Result<CellId, HierError> {
    let mut n = 0;
    let flat = layout.shapes(top, layer)?;
    let index = BoxIndex::from(flat.iter().enumerate().map(|(i, (_, poly))| (poly.bbox(), i)));
    let mut taken = vec![false; flat.len()];

    for key in post_order(arena, root) {
        let p = arena.pattern(key)?;
        if p.cell.is_some() {
            continue;
        }
        let insts = p.insts.clone();
        let Some(template) = pick_template(arena, &insts) else {
            debug!("Pattern {key:?} lost all instances, no cell built");
            continue;
        };

        n += 1;
        let cell = layout.create_cell(&format!("{prefix}{n}"));
        let boxes = arena.inst_boxes(key)?;

        // A shape under several instances goes to the first of them
        let mut moved = 0;
        for (inst, ibox) in insts.iter().zip(&boxes) {
            for i in index.intersecting(ibox) {
                let (shape, poly) = &flat[i];
                if taken[i] || !poly.bbox().inside(ibox) {
                    continue;
                }
                taken[i] = true;
                if *inst == template {
                    layout.insert_shape(cell, layer, poly.clone())?;
                    moved += 1;
                }
                layout.erase_shape(top, layer, *shape)?;
            }
        }

        // The template may sit in any orientation of the class
        let extraction = arena.pattern(key)?.symmetry().extraction(arena.inst(template)?.tid)?;
        if !extraction.is_identity() {
            layout.transform_shapes(cell, layer, &extraction)?;
        }

        let children = arena.inst(template)?.children.clone();
        for ci in &children {
            let inst = arena.inst(*ci)?;
            let child = arena.pattern(inst.pattern)?;
            let child_cell = child.cell.ok_or_else(|| {
                HierError::Inconsistent(format!("child pattern {:?} has no cell", inst.pattern))
            })?;

            let trans = child.symmetry().t_to_o(inst.tid)?.trans();
            let placed = layout
                .cell_bbox(child_cell)?
                .ok_or_else(|| LayoutError::MissingCell(layout.cell_name(child_cell).unwrap_or("?").to_string()))?
                .transform(&trans);
            let shift = inst.bbox.lower_left() - placed.lower_left();
            layout.insert_instance(cell, child_cell, extraction.compose(&trans.shifted(shift)))?;
        }

        debug!(
            "{}: {moved} shapes, {} placements",
            layout.cell_name(cell)?,
            children.len()
        );
        arena.pattern_mut(key)?.cell = Some(cell);
    }

    let cell = arena
        .pattern(root)?
        .cell
        .ok_or_else(|| HierError::Inconsistent("root pattern was not restored".into()))?;
    info!("Restored {n} cells");
    Ok(cell)
}

/// First instance held in the canonical orientation, else the first one.
fn pick_template(arena: &Arena, insts: &[InstKey]) -> Option<InstKey> {
    let first = *insts.first()?;
    let canonical = insts
        .iter()
        .copied()
        .find(|k| arena.insts.get(*k).is_some_and(|i| i.tid == Tid::T1));

    if canonical.is_none() {
        warn!("No canonical instance among {} placements, using the first", insts.len());
    }
    Some(canonical.unwrap_or(first))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{BBox, Polygon};
    use crate::layout::Layout;
    use crate::pattern::Pattern;
    use crate::resolve::build_instance_tree;
    use crate::symmetry::Symmetry;
    use crate::Coord;
    use pretty_assertions::assert_eq;

    fn b(l: Coord, bt: Coord, r: Coord, t: Coord) -> BBox {
        BBox::new(l, bt, r, t).unwrap()
    }

    fn setup(boxes: &[BBox]) -> (Layout, CellId, Arena, PatternKey) {
        let mut layout = Layout::new();
        let top = layout.create_cell("TOP");
        for bb in boxes {
            layout
                .insert_shape(top, Layer::default(), Polygon::rect(bb).unwrap())
                .unwrap();
        }
        let mut arena = Arena::new();
        let root = arena.patterns.insert(Pattern::default());
        let world = layout.cell_bbox(top).unwrap().unwrap();
        arena.attach(root, world, Tid::T1).unwrap();
        (layout, top, arena, root)
    }

    fn flat(layout: &Layout, cell: CellId) -> Vec<BBox> {
        let mut v: Vec<BBox> = layout
            .flatten_shapes(cell, Layer::default())
            .unwrap()
            .iter()
            .map(|p| p.bbox())
            .collect();
        v.sort();
        v
    }

    #[test]
    fn repeated_squares_share_one_cell() {
        let boxes = [b(0, 0, 2, 2), b(10, 0, 12, 2)];
        let (mut layout, top, mut arena, root) = setup(&boxes);
        let unit = arena.patterns.insert(Pattern::new(Symmetry::FourFoldAxial, Vec::new()));
        for bb in &boxes {
            arena.attach(unit, *bb, Tid::T1).unwrap();
        }
        arena.patterns[root].children = vec![unit];
        build_instance_tree(&mut arena, root).unwrap();

        let cell = restore_hierarchy(&mut layout, &mut arena, root, top, Layer::default(), "P-").unwrap();
        assert_eq!(layout.cell_name(cell).unwrap(), "P-2");
        let unit_cell = arena.patterns[unit].cell.unwrap();
        assert_eq!(layout.shapes(unit_cell, Layer::default()).unwrap().len(), 1);
        assert_eq!(layout.cell(cell).unwrap().insts.len(), 2);
        assert!(layout.shapes(top, Layer::default()).unwrap().is_empty());

        let mut expected = boxes.to_vec();
        expected.sort();
        assert_eq!(flat(&layout, cell), expected);
    }

    #[test]
    fn rotated_instance_is_placed_rotated() {
        let boxes = [b(0, 0, 1, 3), b(10, 0, 13, 1)];
        let (mut layout, top, mut arena, root) = setup(&boxes);
        let unit = arena.patterns.insert(Pattern::new(Symmetry::TwoFoldAxial, Vec::new()));
        arena.attach(unit, boxes[0], Tid::T1).unwrap();
        arena.attach(unit, boxes[1], Tid::T2).unwrap();
        arena.patterns[root].children = vec![unit];
        build_instance_tree(&mut arena, root).unwrap();

        let cell = restore_hierarchy(&mut layout, &mut arena, root, top, Layer::default(), "P-").unwrap();
        let mut expected = boxes.to_vec();
        expected.sort();
        assert_eq!(flat(&layout, cell), expected);
    }

    #[test]
    fn template_off_canonical_orientation_is_normalized() {
        // Square plus bar, twice; the pair pattern only holds T2 placements
        let squares = [b(0, 0, 2, 2), b(10, 0, 12, 2)];
        let bars = [b(2, 0, 3, 4), b(12, 0, 13, 4)];
        let shapes: Vec<BBox> = squares.iter().chain(&bars).copied().collect();
        let (mut layout, top, mut arena, root) = setup(&shapes);

        let unit = arena.patterns.insert(Pattern::new(Symmetry::FourFoldAxial, Vec::new()));
        for bb in &squares {
            arena.attach(unit, *bb, Tid::T1).unwrap();
        }
        let pair = arena.patterns.insert(Pattern::new(Symmetry::TwoFoldAxial, Vec::new()));
        arena.attach(pair, b(0, 0, 3, 4), Tid::T2).unwrap();
        arena.attach(pair, b(10, 0, 13, 4), Tid::T2).unwrap();
        arena.patterns[root].children = vec![pair];
        arena.patterns[pair].children = vec![unit];
        build_instance_tree(&mut arena, root).unwrap();

        let cell = restore_hierarchy(&mut layout, &mut arena, root, top, Layer::default(), "P-").unwrap();
        let pair_cell = arena.patterns[pair].cell.unwrap();
        assert_eq!(layout.shapes(pair_cell, Layer::default()).unwrap().len(), 1);
        assert_eq!(layout.cell(pair_cell).unwrap().insts.len(), 1);
        // Stored a quarter turn back from the template
        assert_eq!(layout.cell_bbox(pair_cell).unwrap(), Some(b(0, -3, 4, 0)));
        assert!(layout.shapes(top, Layer::default()).unwrap().is_empty());

        let mut expected = shapes;
        expected.sort();
        assert_eq!(flat(&layout, cell), expected);
    }

    #[test]
    fn unknown_transform_id_is_fatal() {
        let boxes = [b(0, 0, 2, 2), b(10, 0, 12, 2)];
        let (mut layout, top, mut arena, root) = setup(&boxes);
        let unit = arena.patterns.insert(Pattern::new(Symmetry::FourFoldAxial, Vec::new()));
        arena.attach(unit, boxes[0], Tid::T1).unwrap();
        arena.attach(unit, boxes[1], Tid::T3).unwrap();
        arena.patterns[root].children = vec![unit];
        build_instance_tree(&mut arena, root).unwrap();

        let err = restore_hierarchy(&mut layout, &mut arena, root, top, Layer::default(), "P-");
        assert!(matches!(err, Err(HierError::Symmetry(_))));
    }
}
