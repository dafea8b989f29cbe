//! Geometry-engine capability consumed by the hierarchy recovery, and a plain
//! in-memory implementation of it.

use log::{debug, warn};
use regex::Regex;
use serde::{Deserialize, Serialize};
use slotmap::{new_key_type, SlotMap};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::geometry::{BBox, Polygon, Trans};
use crate::HierError;

#[derive(Debug, Error)]
pub enum LayoutError {
    #[error("Layout has no cells")]
    EmptyLayout,
    #[error("Cell not found: {0}")]
    MissingCell(String),
    #[error("Invalid layer specification: {0}")]
    InvalidLayer(String),
    #[error("Cell {0} references itself through its instances")]
    RecursiveCell(String),
}

/// GDS layer/datatype pair.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Layer {
    pub layer: i16,
    pub datatype: i16,
}

impl Layer {
    pub fn new(layer: i16, datatype: i16) -> Layer {
        Layer { layer, datatype }
    }
}

impl FromStr for Layer {
    type Err = LayoutError;

    /// Parses `L`, `L/D` or `L:D`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let re = Regex::new(r"^\s*(\d+)\s*(?:[/:]\s*(\d+))?\s*$")
            .map_err(|e| LayoutError::InvalidLayer(e.to_string()))?;
        let caps = re
            .captures(s)
            .ok_or_else(|| LayoutError::InvalidLayer(s.to_string()))?;

        let num = |i: usize| -> Result<i16, LayoutError> {
            match caps.get(i) {
                Some(m) => m
                    .as_str()
                    .parse::<i16>()
                    .map_err(|_| LayoutError::InvalidLayer(s.to_string())),
                None => Ok(0),
            }
        };

        Ok(Layer::new(num(1)?, num(2)?))
    }
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}/{}", self.layer, self.datatype)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct CellId(pub usize);

new_key_type! {
    pub struct ShapeKey;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellInst {
    pub cell: CellId,
    pub trans: Trans,
}

#[derive(Debug, Clone, Default)]
pub struct Cell {
    pub name: String,
    pub shapes: BTreeMap<Layer, SlotMap<ShapeKey, Polygon>>,
    pub insts: Vec<CellInst>,
}

/// Operations the hierarchy recovery needs from a layout database.
pub trait LayoutDb {
    /// The cell nothing else instantiates. Several candidates are reported and
    /// the first one is used.
    fn top_cell(&self) -> Result<CellId, HierError>;

    /// Replaces every instance in `cell` by the shapes it places.
    fn flatten(&mut self, cell: CellId) -> Result<(), HierError>;

    /// Raw shapes of a cell on one layer, with their keys.
    fn shapes(&self, cell: CellId, layer: Layer) -> Result<Vec<(ShapeKey, Polygon)>, HierError>;

    /// Shapes of a cell on one layer after merging touching geometry.
    ///
    /// Engines without a boolean-region engine hand out the raw shapes.
    fn merged_shapes(&self, cell: CellId, layer: Layer) -> Result<Vec<Polygon>, HierError> {
        debug!("No merge support, using raw shapes on layer {layer}");
        Ok(self
            .shapes(cell, layer)?
            .into_iter()
            .map(|(_, p)| p)
            .collect())
    }

    /// Bounding box over every layer and instance, `None` for an empty cell.
    fn cell_bbox(&self, cell: CellId) -> Result<Option<BBox>, HierError>;

    fn create_cell(&mut self, name: &str) -> CellId;

    fn cell_name(&self, cell: CellId) -> Result<&str, HierError>;

    fn insert_shape(&mut self, cell: CellId, layer: Layer, shape: Polygon) -> Result<ShapeKey, HierError>;

    fn erase_shape(&mut self, cell: CellId, layer: Layer, key: ShapeKey) -> Result<Option<Polygon>, HierError>;

    fn transform_shapes(&mut self, cell: CellId, layer: Layer, trans: &Trans) -> Result<(), HierError>;

    fn insert_instance(&mut self, parent: CellId, child: CellId, trans: Trans) -> Result<(), HierError>;
}

/// In-memory cell database.
#[derive(Debug, Clone)]
pub struct Layout {
    pub cells: Vec<Cell>,
    /// Size of one database unit in meters.
    pub dbu: f64,
}

impl Default for Layout {
    fn default() -> Self {
        Layout {
            cells: Vec::new(),
            dbu: 1e-9,
        }
    }
}

impl Layout {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cell(&self, id: CellId) -> Result<&Cell, HierError> {
        self.cells
            .get(id.0)
            .ok_or_else(|| LayoutError::MissingCell(format!("#{}", id.0)).into())
    }

    pub fn cell_mut(&mut self, id: CellId) -> Result<&mut Cell, HierError> {
        self.cells
            .get_mut(id.0)
            .ok_or_else(|| LayoutError::MissingCell(format!("#{}", id.0)).into())
    }

    pub fn find_cell(&self, name: &str) -> Option<CellId> {
        self.cells.iter().position(|c| c.name == name).map(CellId)
    }

    /// Every cell `root` reaches through instances, `root` included, children
    /// before parents.
    pub fn reachable(&self, root: CellId) -> Result<Vec<CellId>, HierError> {
        let mut order = Vec::new();
        let mut done = BTreeSet::new();
        let mut on_path = BTreeSet::new();
        let mut stack = vec![(root, false)];

        while let Some((id, expanded)) = stack.pop() {
            if expanded {
                on_path.remove(&id);
                if done.insert(id) {
                    order.push(id);
                }
                continue;
            }
            if done.contains(&id) {
                continue;
            }
            if !on_path.insert(id) {
                return Err(LayoutError::RecursiveCell(self.cell(id)?.name.clone()).into());
            }

            stack.push((id, true));
            for inst in &self.cell(id)?.insts {
                if !done.contains(&inst.cell) {
                    stack.push((inst.cell, false));
                }
            }
        }

        Ok(order)
    }

    /// Leaf shapes of a cell on one layer, in the cell's coordinates.
    pub fn flatten_shapes(&self, cell: CellId, layer: Layer) -> Result<Vec<Polygon>, HierError> {
        // Cycles are rejected up front so the walk below terminates
        self.reachable(cell)?;

        let mut out = Vec::new();
        let mut stack = vec![(cell, Trans::default())];
        while let Some((id, trans)) = stack.pop() {
            let c = self.cell(id)?;
            if let Some(shapes) = c.shapes.get(&layer) {
                for poly in shapes.values() {
                    out.push(poly.transform(&trans)?);
                }
            }
            for inst in &c.insts {
                stack.push((inst.cell, trans.compose(&inst.trans)));
            }
        }

        Ok(out)
    }

    fn layers(&self, cell: CellId) -> Result<BTreeSet<Layer>, HierError> {
        let mut layers = BTreeSet::new();
        for id in self.reachable(cell)? {
            layers.extend(self.cell(id)?.shapes.keys().copied());
        }
        Ok(layers)
    }
}

impl LayoutDb for Layout {
    fn top_cell(&self) -> Result<CellId, HierError> {
        let used: BTreeSet<CellId> = self
            .cells
            .iter()
            .flat_map(|c| c.insts.iter().map(|i| i.cell))
            .collect();
        let tops: Vec<CellId> = (0..self.cells.len())
            .map(CellId)
            .filter(|id| !used.contains(id))
            .collect();

        match tops.as_slice() {
            [] => Err(LayoutError::EmptyLayout.into()),
            [top] => Ok(*top),
            [top, ..] => {
                warn!(
                    "Layout has {} top cells; using {}",
                    tops.len(),
                    self.cells[top.0].name
                );
                Ok(*top)
            }
        }
    }

    fn flatten(&mut self, cell: CellId) -> Result<(), HierError> {
        let layers = self.layers(cell)?;
        let mut leaves = BTreeMap::new();
        for layer in layers {
            leaves.insert(layer, self.flatten_shapes(cell, layer)?);
        }

        let c = self.cell_mut(cell)?;
        c.insts.clear();
        c.shapes.clear();
        for (layer, polys) in leaves {
            let map = c.shapes.entry(layer).or_default();
            for p in polys {
                map.insert(p);
            }
        }

        Ok(())
    }

    fn shapes(&self, cell: CellId, layer: Layer) -> Result<Vec<(ShapeKey, Polygon)>, HierError> {
        Ok(self
            .cell(cell)?
            .shapes
            .get(&layer)
            .map(|m| m.iter().map(|(k, p)| (k, p.clone())).collect())
            .unwrap_or_default())
    }

    fn cell_bbox(&self, cell: CellId) -> Result<Option<BBox>, HierError> {
        let mut bbox: Option<BBox> = None;
        for layer in self.layers(cell)? {
            for p in self.flatten_shapes(cell, layer)? {
                let b = p.bbox();
                bbox = Some(bbox.map_or(b, |acc| acc.union(&b)));
            }
        }
        Ok(bbox)
    }

    fn create_cell(&mut self, name: &str) -> CellId {
        self.cells.push(Cell {
            name: name.to_string(),
            ..Default::default()
        });
        CellId(self.cells.len() - 1)
    }

    fn cell_name(&self, cell: CellId) -> Result<&str, HierError> {
        Ok(&self.cell(cell)?.name)
    }

    fn insert_shape(&mut self, cell: CellId, layer: Layer, shape: Polygon) -> Result<ShapeKey, HierError> {
        Ok(self.cell_mut(cell)?.shapes.entry(layer).or_default().insert(shape))
    }

    fn erase_shape(&mut self, cell: CellId, layer: Layer, key: ShapeKey) -> Result<Option<Polygon>, HierError> {
        Ok(self
            .cell_mut(cell)?
            .shapes
            .get_mut(&layer)
            .and_then(|m| m.remove(key)))
    }

    fn transform_shapes(&mut self, cell: CellId, layer: Layer, trans: &Trans) -> Result<(), HierError> {
        if let Some(map) = self.cell_mut(cell)?.shapes.get_mut(&layer) {
            for (_, poly) in map.iter_mut() {
                *poly = poly.transform(trans)?;
            }
        }
        Ok(())
    }

    fn insert_instance(&mut self, parent: CellId, child: CellId, trans: Trans) -> Result<(), HierError> {
        self.cell(child)?;
        self.cell_mut(parent)?.insts.push(CellInst { cell: child, trans });
        Ok(())
    }
}
