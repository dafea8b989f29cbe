pub mod config;
pub mod export;
pub mod gds;
pub mod geometry;
pub mod layout;
pub mod manager;
pub mod pattern;
pub mod propagate;
pub mod region;
pub mod resolve;
pub mod restore;
pub mod shape;
pub mod spatial;
pub mod symmetry;

use dialoguer::Confirm;
use terminal_size::{terminal_size, Width};
use thiserror::Error;

use crate::config::ConfigError;
use crate::geometry::GeometryError;
use crate::layout::LayoutError;
use crate::symmetry::SymmetryError;

pub const VER: &str = env!("CARGO_PKG_VERSION");

/// Database units used for every layout coordinate.
pub type Coord = i64;

#[macro_export]
macro_rules! errorln {
    ($literal:literal $(, $args:expr)* $(,)?) => {
        eprintln!(
            concat!("\x1b[31mERROR: ", $literal, "\x1b[0m")
            $(, $args)*
        )
    };
}

#[macro_export]
macro_rules! warnln {
    ($literal:literal $(, $args:expr)* $(,)?) => {
        eprintln!(
            concat!("\x1b[33mWARNING: ", $literal, "\x1b[0m")
            $(, $args)*
        )
    };
}

#[macro_export]
macro_rules! infoln {
    ($literal:literal $(, $args:expr)* $(,)?) => {
        eprintln!(
            concat!("\x1b[32mINFO: ", $literal, "\x1b[0m")
            $(, $args)*
        )
    };
}

#[macro_export]
macro_rules! vprintln {
    ($verbose:expr, $($args:tt)*) => {
        if $verbose {
            println!($($args)*);
        }
    };
}

/// Top-level error for hierarchy recovery.
#[derive(Debug, Error)]
pub enum HierError {
    #[error(transparent)]
    Geometry(#[from] GeometryError),
    #[error(transparent)]
    Symmetry(#[from] SymmetryError),
    #[error(transparent)]
    Layout(#[from] LayoutError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// An internal structure no longer satisfies its invariants.
    #[error("Inconsistent hierarchy state: {0}")]
    Inconsistent(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("GDS error: {0}")]
    Gds(#[from] gds21::GdsError),
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("Prompt error: {0}")]
    Dialog(#[from] dialoguer::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryDefault {
    Yes,
    No,
    Not,
}

/// Asks the user a yes/no question.
///
/// # Arguments
/// * `prompt` - Question shown to the user
/// * `interactive` - When false the default answer is returned without asking
/// * `default` - Answer preselected in the prompt
///
/// # Returns
/// The user's answer
pub fn query(prompt: &str, interactive: bool, default: QueryDefault) -> Result<bool, HierError> {
    if !interactive {
        return Ok(default != QueryDefault::No);
    }

    let confirm = Confirm::new().with_prompt(prompt);
    let answer = match default {
        QueryDefault::Yes => confirm.default(true).interact()?,
        QueryDefault::No => confirm.default(false).interact()?,
        QueryDefault::Not => confirm.interact()?,
    };

    Ok(answer)
}

/// Horizontal rule spanning the terminal.
pub fn bar(width: Option<usize>, ch: char) -> String {
    let width = width.unwrap_or_else(|| match terminal_size() {
        Some((Width(w), _)) => w as usize,
        None => 80,
    });

    std::iter::repeat(ch).take(width).collect()
}
