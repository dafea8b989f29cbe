//! Run configuration for hierarchy recovery.
//!
//! Configurations are stored as YAML or JSON; every field may be left out and
//! falls back to its default.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::{fs, io};
use thiserror::Error;

use crate::layout::Layer;
use crate::{vprintln, Coord, HierError};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Unsupported file extension: {0}")]
    FileType(String),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Parameters of one recovery run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Working layer; shapes on other layers are left alone.
    pub layer: Layer,
    /// Merge touching shapes before encoding.
    pub merge: bool,
    /// Flatten the top cell before encoding.
    pub flatten: bool,
    /// Canonical code length above which growth is encoded incrementally.
    pub threshold: usize,
    /// Neighbor search window in database units.
    pub working_len: Coord,
    /// Stop smaller siblings from branching on their own.
    pub reduction: bool,
    /// Hand children of deleted patterns to their parents.
    pub flow_up: bool,
    /// Write the recovered hierarchy back into the layout.
    pub restore: bool,
    /// Name prefix of restored cells.
    pub cell_prefix: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            layer: Layer::default(),
            merge: false,
            flatten: true,
            threshold: 200,
            working_len: 1000,
            reduction: false,
            flow_up: true,
            restore: true,
            cell_prefix: "Pattern-".to_string(),
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.threshold == 0 {
            return Err(ConfigError::Invalid("threshold must be positive".into()));
        }
        if self.working_len <= 0 {
            return Err(ConfigError::Invalid(format!(
                "working_len must be positive, got {}",
                self.working_len
            )));
        }
        if self.cell_prefix.is_empty() {
            return Err(ConfigError::Invalid("cell_prefix is empty".into()));
        }
        Ok(())
    }

    /// Saves the configuration as YAML or JSON, chosen by extension.
    pub fn save(&self, filename: &Path, verbose: bool) -> Result<(), HierError> {
        let ext = extension(filename);
        let mut file = fs::File::create(filename)?;

        match ext.as_str() {
            "yaml" | "yml" => serde_yaml::to_writer(&mut file, self)?,
            "json" => serde_json::to_writer_pretty(&mut file, self)?,
            other => {
                return Err(ConfigError::FileType(other.to_string()).into());
            }
        }

        vprintln!(verbose, "Wrote configuration to {:?}", filename);
        Ok(())
    }
}

fn extension(path: &Path) -> String {
    path.extension()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_lowercase()
}

/// Reads and validates a configuration file.
///
/// # Arguments
/// * `filename` - `.yaml`, `.yml` or `.json` file
///
/// # Returns
/// * `Ok(Config)` - Parsed configuration with defaults filled in
/// * `Err(HierError)` - I/O, parse, extension or validation failure
pub fn read(filename: &Path) -> Result<Config, HierError> {
    let file = fs::File::open(filename)?;
    let rdr = io::BufReader::new(file);

    let config: Config = match extension(filename).as_str() {
        "yaml" | "yml" => serde_yaml::from_reader(rdr)?,
        "json" => serde_json::from_reader(rdr)?,
        other => {
            return Err(ConfigError::FileType(other.to_string()).into());
        }
    };

    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn partial_yaml_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.yaml");
        let mut f = fs::File::create(&path).unwrap();
        writeln!(f, "layer:\n  layer: 3\n  datatype: 1\nreduction: true").unwrap();

        let config = read(&path).unwrap();
        assert_eq!(config.layer, Layer::new(3, 1));
        assert!(config.reduction);
        assert_eq!(config.threshold, 200);
        assert_eq!(config.cell_prefix, "Pattern-");
    }

    #[test]
    fn json_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.json");
        let config = Config {
            working_len: 42,
            flow_up: false,
            ..Default::default()
        };
        config.save(&path, false).unwrap();
        assert_eq!(read(&path).unwrap(), config);
    }

    #[test]
    fn rejects_unknown_extension_and_bad_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.toml");
        fs::write(&path, "").unwrap();
        assert!(matches!(
            read(&path),
            Err(HierError::Config(ConfigError::FileType(_)))
        ));

        let path = dir.path().join("bad.yaml");
        fs::write(&path, "working_len: 0\n").unwrap();
        assert!(matches!(
            read(&path),
            Err(HierError::Config(ConfigError::Invalid(_)))
        ));
    }
}
