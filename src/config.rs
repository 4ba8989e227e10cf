//! Configuration loaded with Figment.
//!
//! Configuration is merged from:
//! 1. built-in defaults,
//! 2. an optional TOML file,
//! 3. environment variables prefixed with `DAQ_NEXUS_` (sections split on `__`).
//!
//! # Example
//! ```no_run
//! use daq_nexus::config::ExportConfig;
//!
//! let config = ExportConfig::load_from("config/daq-nexus.toml")?;
//! config.validate()?;
//! println!("Writing to {}", config.output.directory.display());
//! # Ok::<(), daq_nexus::error::ExportError>(())
//! ```

use crate::container::OpenMode;
use crate::error::{ExportError, ExportResult};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExportConfig {
    /// Where and how files are produced.
    pub output: OutputConfig,
    /// Layout conventions of the produced entries.
    pub nexus: NexusConfig,
    /// Options forwarded to the file layer.
    pub file: FileOptions,
    /// Logging settings.
    pub logging: LoggingConfig,
}

/// Output file settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OutputConfig {
    /// Directory files are created in.
    pub directory: PathBuf,
    /// File name template filled from the start document, e.g. `{uid}-`.
    pub name_template: String,
    /// Never append a run to an existing file; pick a new name instead.
    pub one_file_per_entry: bool,
    /// File extension appended to rendered names.
    pub extension: String,
    /// Mode used to open container files.
    pub open_mode: OpenMode,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("."),
            name_template: "{uid}-".to_string(),
            one_file_per_entry: true,
            extension: "nxs".to_string(),
            open_mode: OpenMode::Append,
        }
    }
}

/// Naming conventions of the entry layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NexusConfig {
    /// Value of the entry's `definition` field.
    pub definition: String,
    /// Producer name written to `process/program`.
    pub program_name: String,
    /// Producer version, written as attribute of `process/program`.
    pub program_version: String,
    /// Producer URL, written as attribute of `process/program`.
    pub program_url: String,
    /// Stream written directly into the `data` group.
    pub primary_stream: String,
    /// Streams whose name contains this marker are ignored.
    pub readying_marker: String,
}

impl Default for NexusConfig {
    fn default() -> Self {
        Self {
            definition: "NXsensor_scan".to_string(),
            program_name: env!("CARGO_PKG_NAME").to_string(),
            program_version: env!("CARGO_PKG_VERSION").to_string(),
            program_url: "https://github.com/FAU-LAP/NOMAD-CAMELS".to_string(),
            primary_stream: "primary".to_string(),
            readying_marker: "_fits_readying_".to_string(),
        }
    }
}

/// Options understood by the file layer. Unknown keys are rejected.
///
/// | key              | effect                                                   |
/// |------------------|----------------------------------------------------------|
/// | `libver_latest`  | write with the newest HDF5 file format version           |
/// | `userblock_size` | reserve a user block of this many bytes (power of 2, ≥ 512) |
/// | `compression`    | deflate level 0–9 for growable datasets                  |
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileOptions {
    /// Use the latest file format version.
    pub libver_latest: bool,
    /// User block size in bytes.
    pub userblock_size: Option<u64>,
    /// Deflate level for growable datasets.
    pub compression: Option<u8>,
}

impl FileOptions {
    /// Override options from string key/value pairs, rejecting unknown keys.
    pub fn with_pairs<'a>(mut self, pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> ExportResult<Self> {
        for (key, value) in pairs {
            let invalid = |reason: String| {
                ExportError::Configuration(format!("invalid value '{value}' for '{key}': {reason}"))
            };
            match key {
                "libver_latest" => {
                    self.libver_latest = value.parse().map_err(|e: std::str::ParseBoolError| invalid(e.to_string()))?
                }
                "userblock_size" => {
                    self.userblock_size =
                        Some(value.parse().map_err(|e: std::num::ParseIntError| invalid(e.to_string()))?)
                }
                "compression" => {
                    self.compression =
                        Some(value.parse().map_err(|e: std::num::ParseIntError| invalid(e.to_string()))?)
                }
                other => return Err(ExportError::UnknownOption(other.to_string())),
            }
        }
        self.validate()?;
        Ok(self)
    }

    /// Check value ranges.
    pub fn validate(&self) -> ExportResult<()> {
        if let Some(size) = self.userblock_size {
            if size < 512 || !size.is_power_of_two() {
                return Err(ExportError::Configuration(format!(
                    "userblock_size must be a power of two >= 512, got {size}"
                )));
            }
        }
        if let Some(level) = self.compression {
            if level > 9 {
                return Err(ExportError::Configuration(format!(
                    "compression level must be 0-9, got {level}"
                )));
            }
        }
        Ok(())
    }
}

/// Logging settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    pub level: String,
    /// Output format (pretty, compact, json).
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "compact".to_string(),
        }
    }
}

impl ExportConfig {
    /// Load defaults merged with environment variables.
    pub fn load() -> ExportResult<Self> {
        Ok(Self::figment()
            .merge(Env::prefixed("DAQ_NEXUS_").split("__"))
            .extract()?)
    }

    /// Load from a specific TOML file merged with environment variables.
    pub fn load_from<P: AsRef<Path>>(path: P) -> ExportResult<Self> {
        Ok(Self::figment()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("DAQ_NEXUS_").split("__"))
            .extract()?)
    }

    fn figment() -> Figment {
        Figment::from(Serialized::defaults(ExportConfig::default()))
    }

    /// Validate configuration after loading.
    pub fn validate(&self) -> ExportResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(ExportError::Configuration(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.logging.level,
                valid_levels.join(", ")
            )));
        }

        let valid_formats = ["pretty", "compact", "json"];
        if !valid_formats.contains(&self.logging.format.as_str()) {
            return Err(ExportError::Configuration(format!(
                "Invalid log format '{}'. Must be one of: {}",
                self.logging.format,
                valid_formats.join(", ")
            )));
        }

        if self.output.extension.trim_matches('.').is_empty() {
            return Err(ExportError::Configuration(
                "File extension must not be empty".to_string(),
            ));
        }

        let opens = self.output.name_template.matches('{').count();
        let closes = self.output.name_template.matches('}').count();
        if opens != closes {
            return Err(ExportError::Configuration(format!(
                "Unbalanced braces in name template '{}'",
                self.output.name_template
            )));
        }

        self.file.validate()
    }

    /// Render the configuration as TOML.
    pub fn to_toml(&self) -> ExportResult<String> {
        toml::to_string_pretty(self).map_err(|e| ExportError::Configuration(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn defaults_are_valid() {
        let config = ExportConfig::default();
        config.validate().unwrap();
        assert_eq!(config.output.name_template, "{uid}-");
        assert!(config.output.one_file_per_entry);
        assert_eq!(config.nexus.primary_stream, "primary");
    }

    #[test]
    fn loads_toml_over_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[output]
name_template = "{{session_name}}-"
one_file_per_entry = false

[file]
compression = 4
"#
        )
        .unwrap();

        let config = ExportConfig::load_from(file.path()).unwrap();
        assert_eq!(config.output.name_template, "{session_name}-");
        assert!(!config.output.one_file_per_entry);
        assert_eq!(config.output.extension, "nxs");
        assert_eq!(config.file.compression, Some(4));
    }

    #[test]
    fn unknown_file_option_in_toml_is_rejected() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[file]\nswmr = true").unwrap();
        assert!(ExportConfig::load_from(file.path()).is_err());
    }

    #[test]
    fn file_option_pairs_override_loaded_values() {
        let loaded = FileOptions {
            libver_latest: true,
            userblock_size: Some(512),
            compression: None,
        };
        let options = loaded.with_pairs([("compression", "4")]).unwrap();
        assert!(options.libver_latest);
        assert_eq!(options.userblock_size, Some(512));
        assert_eq!(options.compression, Some(4));
    }

    #[test]
    fn file_options_from_pairs() {
        let options =
            FileOptions::default().with_pairs([("libver_latest", "true"), ("userblock_size", "1024")]).unwrap();
        assert!(options.libver_latest);
        assert_eq!(options.userblock_size, Some(1024));

        assert!(matches!(
            FileOptions::default().with_pairs([("driver", "core")]),
            Err(ExportError::UnknownOption(key)) if key == "driver"
        ));
        assert!(FileOptions::default().with_pairs([("userblock_size", "100")]).is_err());
    }

    #[test]
    fn validation_catches_bad_values() {
        let mut config = ExportConfig::default();
        config.logging.level = "verbose".to_string();
        assert!(config.validate().is_err());

        let mut config = ExportConfig::default();
        config.output.name_template = "{uid".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn round_trips_through_toml_text() {
        let text = ExportConfig::default().to_toml().unwrap();
        assert!(text.contains("name_template"));
    }
}
