use gds21::{
    GdsArrayRef, GdsBoundary, GdsElement, GdsLibrary, GdsPoint, GdsStrans, GdsStruct, GdsStructRef,
    GdsUnits,
};
use log::debug;
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

use crate::geometry::{GeometryError, Point, Polygon, Trans};
use crate::layout::{CellId, Layer, Layout, LayoutDb, LayoutError};
use crate::{Coord, HierError};

#[derive(Debug, Error)]
pub enum GdsError {
    #[error("Reference to undefined cell: {0}")]
    InvalidCell(String),
    #[error("Coordinate does not fit in 32 bits: {0}")]
    CoordinateOverflow(Coord),
    #[error("Array of {0} has no rows or columns")]
    EmptyArray(String),
}

impl From<GdsError> for HierError {
    fn from(e: GdsError) -> Self {
        match e {
            GdsError::InvalidCell(name) => LayoutError::MissingCell(name).into(),
            other => HierError::Inconsistent(other.to_string()),
        }
    }
}

fn import_point(p: &GdsPoint) -> Point {
    Point::new(p.x as Coord, p.y as Coord)
}

fn export_point(p: &Point) -> Result<GdsPoint, HierError> {
    let x = i32::try_from(p.x).map_err(|_| GdsError::CoordinateOverflow(p.x))?;
    let y = i32::try_from(p.y).map_err(|_| GdsError::CoordinateOverflow(p.y))?;
    Ok(GdsPoint::new(x, y))
}

/// GDS reflects about the x axis before rotating; `Trans` rotates first and
/// mirrors across the y axis afterwards. Both describe the same eight
/// orientations.
fn import_strans(strans: &Option<GdsStrans>) -> Result<Trans, HierError> {
    let Some(s) = strans else {
        return Ok(Trans::default());
    };
    if s.abs_mag || s.abs_angle {
        return Err(GeometryError::UnsupportedTransform("absolute magnification or angle".into()).into());
    }
    if s.mag.is_some_and(|m| m != 1.0) {
        return Err(GeometryError::UnsupportedTransform(format!("magnification {:?}", s.mag)).into());
    }

    let angle = s.angle.unwrap_or(0.0);
    if angle.fract() != 0.0 {
        return Err(GeometryError::UnsupportedTransform(format!("angle {angle}")).into());
    }
    let t = Trans::from_angle(false, angle as i32)?;

    Ok(if s.reflected {
        Trans::new(true, (6 - t.rot) % 4, Point::default())
    } else {
        t
    })
}

fn export_strans(trans: &Trans) -> Option<GdsStrans> {
    if trans.mirror {
        Some(GdsStrans {
            reflected: true,
            angle: Some((((6 - trans.rot) % 4) as f64) * 90.0),
            ..Default::default()
        })
    } else if trans.rot != 0 {
        Some(GdsStrans {
            angle: Some(trans.angle() as f64),
            ..Default::default()
        })
    } else {
        None
    }
}

/// Reads a GDSII file into an in-memory layout.
///
/// Boundaries become shapes; struct and array references become instances.
/// Other elements are skipped.
///
/// # Arguments
/// * `path` - GDSII file to read
///
/// # Returns
/// The layout, with cells in file order
pub fn load(path: impl AsRef<Path>) -> Result<Layout, HierError> {
    let lib = GdsLibrary::load(path.as_ref())?;

    let mut layout = Layout::new();
    layout.dbu = lib.units.db_unit();

    // First pass: cell names, so references can be resolved in any order
    let ids: HashMap<String, CellId> = lib
        .structs
        .iter()
        .map(|s| (s.name.clone(), layout.create_cell(&s.name)))
        .collect();
    let lookup = |name: &str| -> Result<CellId, HierError> {
        ids.get(name)
            .copied()
            .ok_or_else(|| GdsError::InvalidCell(name.to_string()).into())
    };

    for s in &lib.structs {
        let id = lookup(&s.name)?;
        for elem in &s.elems {
            match elem {
                GdsElement::GdsBoundary(b) => {
                    let points = b.xy.iter().map(import_point).collect();
                    let poly = Polygon::new(points)?;
                    layout.insert_shape(id, Layer::new(b.layer, b.datatype), poly)?;
                }
                GdsElement::GdsStructRef(r) => {
                    let trans = import_strans(&r.strans)?.shifted(import_point(&r.xy));
                    layout.insert_instance(id, lookup(&r.name)?, trans)?;
                }
                GdsElement::GdsArrayRef(a) => {
                    for trans in import_array(a)? {
                        layout.insert_instance(id, lookup(&a.name)?, trans)?;
                    }
                }
                other => debug!("Skipping unsupported element in {}: {:?}", s.name, other),
            }
        }
    }

    Ok(layout)
}

/// Expands an array reference into one placement per lattice site.
fn import_array(a: &GdsArrayRef) -> Result<Vec<Trans>, HierError> {
    if a.cols <= 0 || a.rows <= 0 {
        return Err(GdsError::EmptyArray(a.name.clone()).into());
    }

    let origin = import_point(&a.xy[0]);
    let (cols, rows) = (a.cols as Coord, a.rows as Coord);
    let col_span = import_point(&a.xy[1]) - origin;
    let row_span = import_point(&a.xy[2]) - origin;
    let col_step = Point::new(col_span.x / cols, col_span.y / cols);
    let row_step = Point::new(row_span.x / rows, row_span.y / rows);
    let base = import_strans(&a.strans)?;

    let mut out = Vec::with_capacity((cols * rows) as usize);
    for c in 0..cols {
        for r in 0..rows {
            let at = Point::new(
                origin.x + c * col_step.x + r * row_step.x,
                origin.y + c * col_step.y + r * row_step.y,
            );
            out.push(base.shifted(at));
        }
    }

    Ok(out)
}

/// Writes `root` and every cell it reaches to a GDSII file.
///
/// # Arguments
/// * `layout` - Layout holding the cells
/// * `root` - Top cell of the written hierarchy
/// * `path` - Destination file
pub fn save(layout: &Layout, root: CellId, path: impl AsRef<Path>) -> Result<(), HierError> {
    let mut lib = GdsLibrary::new(layout.cell_name(root)?);
    lib.units = GdsUnits::new(layout.dbu / 1e-6, layout.dbu);

    for id in layout.reachable(root)? {
        let cell = layout.cell(id)?;
        let mut elems: Vec<GdsElement> = Vec::new();

        for inst in &cell.insts {
            elems.push(
                GdsStructRef {
                    name: layout.cell_name(inst.cell)?.to_string(),
                    xy: export_point(&inst.trans.disp)?,
                    strans: export_strans(&inst.trans),
                    ..Default::default()
                }
                .into(),
            );
        }

        for (layer, shapes) in &cell.shapes {
            for poly in shapes.values() {
                let mut xy = poly
                    .points()
                    .iter()
                    .map(export_point)
                    .collect::<Result<Vec<_>, _>>()?;
                // Boundaries repeat their first point to close
                if let Some(first) = xy.first().cloned() {
                    xy.push(first);
                }
                elems.push(
                    GdsBoundary {
                        layer: layer.layer,
                        datatype: layer.datatype,
                        xy,
                        ..Default::default()
                    }
                    .into(),
                );
            }
        }

        let mut strukt = GdsStruct::new(&cell.name);
        strukt.elems = elems;
        lib.structs.push(strukt);
    }

    lib.save(path.as_ref())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::BBox;
    use pretty_assertions::assert_eq;

    #[test]
    fn strans_round_trip() {
        for mirror in [false, true] {
            for rot in 0..4 {
                let t = Trans::new(mirror, rot, Point::default());
                assert_eq!(import_strans(&export_strans(&t)).unwrap(), t);
            }
        }
    }

    #[test]
    fn gds_reflection_is_about_x_axis() {
        let t = import_strans(&Some(GdsStrans {
            reflected: true,
            ..Default::default()
        }))
        .unwrap();
        assert_eq!(t.apply(Point::new(3, 5)), Point::new(3, -5));

        let t = import_strans(&Some(GdsStrans {
            reflected: true,
            angle: Some(90.0),
            ..Default::default()
        }))
        .unwrap();
        // (3, 5) -> (3, -5) -> rotated by 90 -> (5, 3)
        assert_eq!(t.apply(Point::new(3, 5)), Point::new(5, 3));
    }

    #[test]
    fn rejects_odd_angles() {
        let s = Some(GdsStrans {
            angle: Some(45.0),
            ..Default::default()
        });
        assert!(import_strans(&s).is_err());
    }

    #[test]
    fn file_round_trip() {
        let mut layout = Layout::new();
        let l = Layer::new(1, 0);
        let top = layout.create_cell("TOP");
        let leaf = layout.create_cell("LEAF");
        let rect = Polygon::rect(&BBox::new(0, 0, 1, 3).unwrap()).unwrap();
        layout.insert_shape(leaf, l, rect).unwrap();
        layout
            .insert_instance(top, leaf, Trans::new(true, 1, Point::new(20, 4)))
            .unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("round.gds");
        save(&layout, top, &path).unwrap();
        let back = load(&path).unwrap();

        let top2 = back.find_cell("TOP").unwrap();
        let mut a: Vec<BBox> = layout.flatten_shapes(top, l).unwrap().iter().map(|p| p.bbox()).collect();
        let mut b: Vec<BBox> = back.flatten_shapes(top2, l).unwrap().iter().map(|p| p.bbox()).collect();
        a.sort();
        b.sort();
        assert_eq!(a, b);
        assert_eq!(back.cell(top2).unwrap().insts[0].trans, Trans::new(true, 1, Point::new(20, 4)));
    }
}
