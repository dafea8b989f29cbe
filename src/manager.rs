//! Drives the whole recovery: shape encoding, propagation, overlap
//! resolution and restoration.

use itertools::Itertools;
use log::info;

use crate::config::Config;
use crate::geometry::{BBox, Polygon};
use crate::layout::{CellId, Layer, LayoutDb, LayoutError};
use crate::pattern::{Arena, Pattern, PatternKey, PatternLibrary};
use crate::propagate::{seed_units, Propagator};
use crate::resolve;
use crate::restore::restore_hierarchy;
use crate::shape::ShapeLibrary;
use crate::spatial::BoxIndex;
use crate::symmetry::{Symmetry, Tid};
use crate::HierError;

/// Summary of one recovered pattern.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct PatternSummary {
    pub name: String,
    pub symmetry: Symmetry,
    pub instances: usize,
    pub children: usize,
    pub width: i64,
    pub height: i64,
}

pub struct HierarchyManager<L: LayoutDb> {
    pub layout: L,
    pub config: Config,
    pub shapes: ShapeLibrary,
    shape_index: BoxIndex<usize>,
    pub arena: Arena,
    pub root: PatternKey,
    global: PatternLibrary,
    /// Largest repeating patterns found by propagation.
    pub largest: Vec<PatternKey>,
    top: Option<CellId>,
}

impl<L: LayoutDb> HierarchyManager<L> {
    pub fn new(layout: L, config: Config) -> Self {
        let mut arena = Arena::new();
        let root = arena.patterns.insert(Pattern::default());

        HierarchyManager {
            layout,
            config,
            shapes: ShapeLibrary::new(),
            shape_index: BoxIndex::new(),
            arena,
            root,
            global: PatternLibrary::new(),
            largest: Vec::new(),
            top: None,
        }
    }

    fn top(&self) -> Result<CellId, HierError> {
        self.top
            .ok_or_else(|| HierError::Inconsistent("layout has not been parsed".into()))
    }

    /// Encodes every shape of the top cell on the working layer.
    pub fn parse_layout(&mut self) -> Result<(), HierError> {
        let top = self.layout.top_cell()?;
        let layer = self.config.layer;
        if self.config.flatten {
            self.layout.flatten(top)?;
        }

        let polys: Vec<Polygon> = if self.config.merge {
            self.layout.merged_shapes(top, layer)?
        } else {
            self.layout
                .shapes(top, layer)?
                .into_iter()
                .map(|(_, p)| p)
                .collect()
        };
        for poly in &polys {
            self.shapes.encode(poly.bbox(), poly.points())?;
        }
        self.shape_index = BoxIndex::from(self.shapes.insts.iter().enumerate().map(|(i, s)| (s.bbox, i)));

        let world = self
            .layout
            .cell_bbox(top)?
            .ok_or(LayoutError::EmptyLayout)?;
        self.arena.attach(self.root, world, Tid::T1)?;
        self.top = Some(top);

        info!(
            "Encoded {} shapes into {} shape patterns on layer {layer}",
            self.shapes.len(),
            self.shapes.patterns.len()
        );
        Ok(())
    }

    /// Seeds unit patterns and grows each into its largest repeating patterns.
    pub fn propagate_unit_patterns(&mut self) -> Result<(), HierError> {
        let seeds = seed_units(
            &mut self.shapes,
            &self.shape_index,
            self.config.working_len,
            &mut self.arena,
        )?;

        for seed in seeds {
            Propagator {
                shapes: &mut self.shapes,
                index: &self.shape_index,
                arena: &mut self.arena,
                global: &mut self.global,
                largest: &mut self.largest,
                root: self.root,
                threshold: self.config.threshold,
                working_len: self.config.working_len,
                reduction: self.config.reduction,
            }
            .run(seed)?;
        }

        info!("Found {} largest repeating patterns", self.largest.len());
        Ok(())
    }

    /// Turns the propagation graph into a tree and links the instances.
    pub fn resolve_overlaps(&mut self) -> Result<(), HierError> {
        resolve::resolve_overlaps(&mut self.arena, &mut self.largest, self.root, self.config.flow_up)?;
        resolve::build_instance_tree(&mut self.arena, self.root)
    }

    /// Writes the recovered hierarchy into the layout.
    ///
    /// # Returns
    /// The cell standing for the whole top cell
    pub fn restore_hierarchy(&mut self) -> Result<CellId, HierError> {
        let top = self.top()?;
        restore_hierarchy(
            &mut self.layout,
            &mut self.arena,
            self.root,
            top,
            self.config.layer,
            &self.config.cell_prefix,
        )
    }

    /// Runs every phase in order.
    ///
    /// # Returns
    /// The restored root cell, or `None` when restoration is disabled
    pub fn run(&mut self) -> Result<Option<CellId>, HierError> {
        self.parse_layout()?;
        self.propagate_unit_patterns()?;
        self.resolve_overlaps()?;

        if self.config.restore {
            Ok(Some(self.restore_hierarchy()?))
        } else {
            Ok(None)
        }
    }

    /// Patterns of the resolved tree below the root, breadth first.
    pub fn patterns(&self) -> Vec<PatternKey> {
        resolve::reachable(&self.arena, self.root)
            .into_iter()
            .skip(1)
            .collect()
    }

    /// Instance boxes of the largest repeating patterns.
    ///
    /// # Arguments
    /// * `split` - One group per pattern instead of a single group
    pub fn visualize(&self, split: bool) -> Result<Vec<Vec<BBox>>, HierError> {
        let groups = self
            .largest
            .iter()
            .map(|k| self.arena.inst_boxes(*k))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(if split {
            groups
        } else {
            vec![groups.into_iter().flatten().collect()]
        })
    }

    /// Boxes of the child instances of every pattern in the tree, one group
    /// per pattern that has any.
    pub fn visualize_child_insts(&self) -> Result<Vec<Vec<BBox>>, HierError> {
        let mut groups = Vec::new();
        for k in resolve::reachable(&self.arena, self.root) {
            let mut boxes = Vec::new();
            for i in &self.arena.pattern(k)?.insts {
                for c in &self.arena.inst(*i)?.children {
                    boxes.push(self.arena.bbox(*c)?);
                }
            }
            if !boxes.is_empty() {
                groups.push(boxes);
            }
        }
        Ok(groups)
    }

    /// Draws box groups into `cell`, group `i` on layer `base.layer + i`.
    pub fn save_regions(&mut self, cell: CellId, regions: &[Vec<BBox>], base: Layer) -> Result<(), HierError> {
        for (i, group) in regions.iter().enumerate() {
            let layer = i16::try_from(i)
                .ok()
                .and_then(|i| base.layer.checked_add(i))
                .map(|l| Layer::new(l, base.datatype))
                .ok_or_else(|| LayoutError::InvalidLayer(format!("{}+{i}", base.layer)))?;
            for bbox in group {
                self.layout.insert_shape(cell, layer, Polygon::rect(bbox)?)?;
            }
        }
        Ok(())
    }

    /// One row per pattern of the resolved tree, named after its restored
    /// cell when there is one.
    pub fn summary(&self) -> Result<Vec<PatternSummary>, HierError> {
        let mut rows = Vec::new();
        for (i, key) in self.patterns().into_iter().enumerate() {
            let p = self.arena.pattern(key)?;
            let Some(first) = p.insts.first() else {
                continue;
            };
            let bbox = self.arena.bbox(*first)?;
            let name = match p.cell {
                Some(c) => self.layout.cell_name(c)?.to_string(),
                None => format!("#{}", i + 1),
            };

            rows.push(PatternSummary {
                name,
                symmetry: p.symmetry(),
                instances: p.len(),
                children: p.children.len(),
                width: bbox.width(),
                height: bbox.height(),
            });
        }

        Ok(rows
            .into_iter()
            .sorted_by(|a, b| b.instances.cmp(&a.instances).then_with(|| a.name.cmp(&b.name)))
            .collect())
    }
}
