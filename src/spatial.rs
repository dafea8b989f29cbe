use rstar::primitives::{GeomWithData, Rectangle};
use rstar::{RTree, AABB};
use std::fmt;

use crate::geometry::BBox;
use crate::Coord;

type Entry<T> = GeomWithData<Rectangle<[Coord; 2]>, T>;

fn rect(bbox: &BBox) -> Rectangle<[Coord; 2]> {
    Rectangle::from_corners([bbox.left, bbox.bottom], [bbox.right, bbox.top])
}

fn envelope(bbox: &BBox) -> AABB<[Coord; 2]> {
    AABB::from_corners([bbox.left, bbox.bottom], [bbox.right, bbox.top])
}

/// R-tree over closed boxes, each tagged with an id.
#[derive(Clone)]
pub struct BoxIndex<T> {
    tree: RTree<Entry<T>>,
}

impl<T> Default for BoxIndex<T> {
    fn default() -> Self {
        BoxIndex { tree: RTree::new() }
    }
}

impl<T: Copy + Ord> BoxIndex<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from<I>(items: I) -> Self
    where
        I: IntoIterator<Item = (BBox, T)>,
    {
        BoxIndex {
            tree: RTree::bulk_load(
                items
                    .into_iter()
                    .map(|(bbox, id)| GeomWithData::new(rect(&bbox), id))
                    .collect(),
            ),
        }
    }

    pub fn insert(&mut self, bbox: &BBox, id: T) {
        self.tree.insert(GeomWithData::new(rect(bbox), id));
    }

    pub fn remove(&mut self, bbox: &BBox, id: T) -> bool {
        self.tree.remove(&GeomWithData::new(rect(bbox), id)).is_some()
    }

    /// Ids of every box touching or overlapping `bbox`, in ascending order.
    pub fn intersecting(&self, bbox: &BBox) -> Vec<T> {
        let mut ids: Vec<T> = self
            .tree
            .locate_in_envelope_intersecting(&envelope(bbox))
            .map(|e| e.data)
            .collect();
        ids.sort();
        ids.dedup();
        ids
    }

    pub fn len(&self) -> usize {
        self.tree.size()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: fmt::Debug> fmt::Display for BoxIndex<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for e in self.tree.iter() {
            let (lo, hi) = (e.geom().lower(), e.geom().upper());
            writeln!(f, "{:?}: [{:?} {:?}]", e.data, lo, hi)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn b(l: Coord, bt: Coord, r: Coord, t: Coord) -> BBox {
        BBox::new(l, bt, r, t).unwrap()
    }

    #[test]
    fn closed_intersection_queries() {
        let index = BoxIndex::from(vec![
            (b(0, 0, 2, 2), 0usize),
            (b(2, 0, 4, 2), 1),
            (b(10, 10, 12, 12), 2),
        ]);
        assert_eq!(index.intersecting(&b(2, 1, 2, 1)), vec![0, 1]);
        assert_eq!(index.intersecting(&b(5, 5, 9, 9)), Vec::<usize>::new());
        assert_eq!(index.len(), 3);
    }

    #[test]
    fn insert_and_remove() {
        let mut index = BoxIndex::new();
        index.insert(&b(0, 0, 1, 1), 7usize);
        index.insert(&b(0, 0, 1, 1), 8);
        assert!(index.remove(&b(0, 0, 1, 1), 7));
        assert!(!index.remove(&b(0, 0, 1, 1), 7));
        assert_eq!(index.intersecting(&b(0, 0, 5, 5)), vec![8]);
    }
}
