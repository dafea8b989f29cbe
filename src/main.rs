use clap::Parser;
use std::fs;
use std::path::{Path, PathBuf};
use std::process;

use layhier::config::{self, Config};
use layhier::geometry::Trans;
use layhier::layout::{Layer, LayoutDb};
use layhier::manager::HierarchyManager;
use layhier::{errorln, export, gds, infoln, query, vprintln, warnln, HierError, QueryDefault};

#[derive(Parser, Debug)]
#[command(version, about = "Recover cell hierarchy from a flat GDSII layout", long_about = None)]
pub struct Args {
    /// Flat GDSII layout
    input: PathBuf,

    /// Output GDSII file [default: <input>_hier.gds]
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// YAML or JSON run configuration
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Working layer as LAYER or LAYER/DATATYPE, overrides the configuration
    #[arg(short, long)]
    layer: Option<String>,

    /// Write the pattern summary as CSV instead of printing it
    #[arg(short, long)]
    report: Option<PathBuf>,

    /// Draw the instance boxes of the largest patterns starting at this layer
    #[arg(short, long)]
    visualize: Option<String>,

    /// Suppress status output
    #[arg(short, long)]
    quiet: bool,

    /// Overwrite existing files without asking
    #[arg(short, long)]
    yes: bool,
}

fn expand(path: &Path) -> PathBuf {
    shellexpand::path::tilde(path).into_owned()
}

fn run(args: Args) -> Result<(), HierError> {
    let verbose = !args.quiet;
    let input = expand(&args.input);

    let mut config = match &args.config {
        Some(path) => config::read(&expand(path))?,
        None => Config::default(),
    };
    if let Some(spec) = &args.layer {
        config.layer = spec.parse::<Layer>()?;
    }
    config.validate()?;

    let output = match &args.output {
        Some(path) => expand(path),
        None => {
            let stem = input.file_stem().unwrap_or_default().to_string_lossy();
            input.with_file_name(format!("{stem}_hier.gds"))
        }
    };
    if fs::metadata(&output).is_ok()
        && !query(
            &format!("'{}' already exists. Overwrite?", output.to_string_lossy()),
            !args.yes,
            QueryDefault::Yes,
        )?
    {
        infoln!("Aborting...");
        return Ok(());
    }

    vprintln!(verbose, "Reading {}...", input.to_string_lossy());
    let layout = gds::load(&input)?;
    let mut manager = HierarchyManager::new(layout, config);

    vprintln!(verbose, "Encoding shapes on layer {}...", manager.config.layer);
    manager.parse_layout()?;
    if manager.shapes.is_empty() {
        warnln!("No shapes on layer {}", manager.config.layer);
    }

    vprintln!(verbose, "Propagating unit patterns...");
    manager.propagate_unit_patterns()?;

    vprintln!(verbose, "Resolving overlaps...");
    manager.resolve_overlaps()?;

    let top = manager.layout.top_cell()?;
    if manager.config.restore {
        vprintln!(verbose, "Restoring hierarchy...");
        let root = manager.restore_hierarchy()?;
        // Other layers stay in the top cell
        manager.layout.insert_instance(top, root, Trans::default())?;
    }

    if let Some(spec) = &args.visualize {
        let regions = manager.visualize(true)?;
        manager.save_regions(top, &regions, spec.parse::<Layer>()?)?;
    }

    gds::save(&manager.layout, top, &output)?;
    vprintln!(verbose, "Wrote {}", output.to_string_lossy());

    let rows = manager.summary()?;
    let report = args.report.as_deref().map(expand);
    if verbose || report.is_some() {
        export::export(&input.to_string_lossy(), &rows, &report, !args.yes)?;
    }

    Ok(())
}

fn main() {
    pretty_env_logger::init();
    let args = Args::parse();

    if let Err(e) = run(args) {
        errorln!("{}", e);
        process::exit(1);
    }
}
