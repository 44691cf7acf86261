//! Pipeline configuration.
//!
//! # Responsibility
//! - Describe one derivation run: input dataset names, output base name,
//!   optional prior output, tolerance inputs and snap options.
//! - Load that description from TOML.
//!
//! # Invariants
//! - Every field has a default, so an empty file is a valid config.
//! - Unknown keys are rejected.
//!
//! # Example
//! ```toml
//! contacts = "Contacts"
//! boundary = "Map_boundary"
//! units = "Units"
//! prior = "Units3"
//! map_scale = 25000.0
//!
//! [snap]
//! boundary_priority = true
//! ```

use crate::topology::snap::SnapOptions;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file '{path}': {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid config value: {0}")]
    InvalidValue(String),
}

/// Snap behaviour knobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SnapConfig {
    /// Prefer the map boundary when a vertex is within tolerance of both the
    /// boundary and another contact.
    pub boundary_priority: bool,
    /// Upper bound on snap passes before giving up on convergence.
    pub max_passes: usize,
}

impl Default for SnapConfig {
    fn default() -> Self {
        let options = SnapOptions::default();
        Self {
            boundary_priority: options.boundary_priority,
            max_passes: options.max_passes,
        }
    }
}

impl From<&SnapConfig> for SnapOptions {
    fn from(value: &SnapConfig) -> Self {
        SnapOptions {
            boundary_priority: value.boundary_priority,
            max_passes: value.max_passes,
        }
    }
}

/// One derivation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    /// Line dataset holding geological contacts.
    pub contacts: String,
    /// Line or polygon dataset holding the closed map boundary.
    pub boundary: String,
    /// Base name of the output polygon dataset.
    pub units: String,
    /// Previous output polygon dataset to inherit unit codes from.
    pub prior: Option<String>,
    /// Explicit snap tolerance in map units.
    pub tolerance: Option<f64>,
    /// Field map scale denominator, used when `tolerance` is absent.
    pub map_scale: Option<f64>,
    /// Coordinate reference recorded on the output dataset.
    pub crs: Option<String>,
    /// Persist snapped contacts back over the contacts dataset.
    pub write_snapped_contacts: bool,
    pub snap: SnapConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            contacts: "Contacts".to_string(),
            boundary: "Map_boundary".to_string(),
            units: "Units".to_string(),
            prior: None,
            tolerance: None,
            map_scale: None,
            crs: None,
            write_snapped_contacts: false,
            snap: SnapConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Parses a config from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Loads and validates a config file.
    ///
    /// # Errors
    /// - `Read` when the file cannot be read.
    /// - `Parse` when the TOML is malformed or has unknown keys.
    /// - `InvalidValue` when a field fails validation.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Dataset names are used verbatim, so padding is rejected rather than
    /// trimmed.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let names = [
            ("contacts", Some(&self.contacts)),
            ("boundary", Some(&self.boundary)),
            ("units", Some(&self.units)),
            ("prior", self.prior.as_ref()),
        ];
        for (key, value) in names {
            let Some(value) = value else {
                continue;
            };
            if value.trim().is_empty() {
                return Err(ConfigError::InvalidValue(format!("{key} must not be blank")));
            }
            if value.trim() != value.as_str() {
                return Err(ConfigError::InvalidValue(format!(
                    "{key} `{value}` has leading or trailing whitespace"
                )));
            }
        }
        if self.snap.max_passes == 0 {
            return Err(ConfigError::InvalidValue(
                "snap.max_passes must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{ConfigError, PipelineConfig};
    use std::error::Error as _;
    use std::io::Write;

    #[test]
    fn empty_file_uses_legacy_names() {
        let config = PipelineConfig::from_toml_str("").unwrap();
        assert_eq!(config, PipelineConfig::default());
        assert_eq!(config.contacts, "Contacts");
        assert_eq!(config.boundary, "Map_boundary");
        assert_eq!(config.units, "Units");
        assert!(config.snap.boundary_priority);
        assert_eq!(config.snap.max_passes, 16);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let config = PipelineConfig::from_toml_str(
            "prior = \"Units3\"\nmap_scale = 25000.0\n[snap]\nboundary_priority = false\n",
        )
        .unwrap();
        assert_eq!(config.prior.as_deref(), Some("Units3"));
        assert_eq!(config.map_scale, Some(25_000.0));
        assert!(!config.snap.boundary_priority);
        assert_eq!(config.snap.max_passes, 16);
        assert_eq!(config.units, "Units");
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(PipelineConfig::from_toml_str("tolerence = 1.0").is_err());
    }

    #[test]
    fn load_reports_path_on_parse_failure() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "units = [").unwrap();
        let err = PipelineConfig::load(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains(&file.path().display().to_string()));
        let source = err.source().expect("parse error keeps its toml source");
        assert!(source.downcast_ref::<toml::de::Error>().is_some());
    }

    #[test]
    fn blank_names_fail_validation() {
        let config = PipelineConfig {
            units: "  ".to_string(),
            ..PipelineConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue(_))
        ));
    }

    #[test]
    fn padded_names_fail_validation() {
        let units = PipelineConfig {
            units: "Units ".to_string(),
            ..PipelineConfig::default()
        };
        assert!(matches!(units.validate(), Err(ConfigError::InvalidValue(_))));

        let prior = PipelineConfig {
            prior: Some(" Units2".to_string()),
            ..PipelineConfig::default()
        };
        assert!(matches!(prior.validate(), Err(ConfigError::InvalidValue(_))));
        assert!(PipelineConfig::default().validate().is_ok());
    }
}
