use chrono::Local;
use itertools::Itertools;
use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;

use crate::manager::PatternSummary;
use crate::{bar, infoln, query, HierError, QueryDefault, VER};

/// Total number of placed instances over all patterns.
pub fn placements(rows: &[PatternSummary]) -> usize {
    rows.iter().map(|r| r.instances).sum()
}

/// Writes the pattern summary as CSV to `filename`, or as a table to stdout.
///
/// # Arguments
/// * `input` - Name of the layout the summary belongs to
/// * `rows` - Pattern summary rows
/// * `filename` - CSV destination. If None, writes to stdout
/// * `interactive` - Ask before overwriting an existing file
pub fn export(
    input: &str,
    rows: &[PatternSummary],
    filename: &Option<PathBuf>,
    interactive: bool,
) -> Result<(), HierError> {
    match filename {
        Some(path) => {
            if fs::metadata(path).is_ok()
                && !query(
                    &format!("'{}' already exists. Overwrite?", path.to_string_lossy()),
                    interactive,
                    QueryDefault::Yes,
                )?
            {
                infoln!("Aborting...");
                return Ok(());
            }
            let file = fs::File::create(path)?;
            write_csv(rows, file)
        }
        None => {
            io::stdout().write_all(fmt_table(input, rows, None).as_bytes())?;
            Ok(())
        }
    }
}

fn write_csv<W: Write>(rows: &[PatternSummary], wtr: W) -> Result<(), HierError> {
    let mut wtr = csv::Writer::from_writer(wtr);
    for row in rows {
        wtr.serialize(row)?;
    }
    wtr.flush()?;
    Ok(())
}

/// Human-readable summary table.
pub fn fmt_table(input: &str, rows: &[PatternSummary], width: Option<usize>) -> String {
    let mut content = format!(
        "\n{}\nlayhier {VER} | {} | {input}\n{}\n    \
        Name                 | Symmetry                    | Count    | Children | Size\n    \
        ---------------------|-----------------------------|----------|----------|------------\n",
        bar(width, '='),
        Local::now().format("%Y-%m-%d %H:%M:%S"),
        bar(width, '='),
    );

    let body = rows
        .iter()
        .map(|r| {
            format!(
                "    {:<20} | {:<27} | {:<8} | {:<8} | {}x{}",
                r.name,
                r.symmetry.to_string(),
                r.instances,
                r.children,
                r.width,
                r.height
            )
        })
        .join("\n");
    content.push_str(&body);

    content.push_str(&format!(
        "\n{}\nPatterns: {}, placements: {}\n",
        bar(width, '-'),
        rows.len(),
        placements(rows)
    ));
    content
}
