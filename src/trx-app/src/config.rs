// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Log levels accepted in `[general].log_level` and on the command line.
pub const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {0}: {1}")]
    ReadError(PathBuf, String),

    #[error("Failed to parse config file {0}: {1}")]
    ParseError(PathBuf, String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Returns the default search paths for `trx-rs.toml`
/// (current directory → XDG config → /etc).
pub fn config_search_paths() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from("trx-rs.toml")];
    if let Some(config_dir) = dirs::config_dir() {
        paths.push(config_dir.join("trx-rs").join("trx-rs.toml"));
    }
    paths.push(PathBuf::from("/etc/trx-rs/trx-rs.toml"));
    paths
}

/// Extract and deserialize a named section from a TOML file.
///
/// Returns `Ok(Some(cfg))` when the section is present and parses cleanly,
/// `Ok(None)` when the section is absent, or `Err` on I/O / parse failure.
fn load_section_from_file<T: DeserializeOwned>(
    path: &Path,
    key: &str,
) -> Result<Option<T>, ConfigError> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::ReadError(path.to_path_buf(), e.to_string()))?;
    parse_section(&content, key).map_err(|e| ConfigError::ParseError(path.to_path_buf(), e))
}

fn parse_section<T: DeserializeOwned>(content: &str, key: &str) -> Result<Option<T>, String> {
    let table: toml::Table = toml::from_str(content).map_err(|e| e.to_string())?;
    let Some(section) = table.get(key) else {
        return Ok(None);
    };

    // Re-serialize the section then parse as T so all serde defaults apply.
    let section_toml = toml::to_string(section).map_err(|e| e.to_string())?;
    toml::from_str::<T>(&section_toml)
        .map(Some)
        .map_err(|e| e.to_string())
}

/// Check an optional `[general].log_level` value.
pub fn validate_log_level(level: Option<&str>) -> Result<(), String> {
    match level {
        Some(level) if !LOG_LEVELS.contains(&level) => Err(format!(
            "[general].log_level '{}' is invalid (expected one of: {})",
            level,
            LOG_LEVELS.join(", ")
        )),
        _ => Ok(()),
    }
}

/// Trait for loading configuration from a `trx-rs.toml` section.
pub trait ConfigFile: Sized + Default + DeserializeOwned + Serialize {
    /// Section key in `trx-rs.toml` (e.g. `"trx-multichannel"`).
    fn section_key() -> &'static str;

    /// Semantic checks run after parsing. Messages name the offending
    /// `[section].field`.
    fn validate(&self) -> Result<(), String> {
        Ok(())
    }

    /// Load the section from a specific file path.
    ///
    /// Returns an error if the file cannot be read, is not valid TOML, or
    /// does not contain the expected `[<section_key>]` header.
    fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        load_section_from_file::<Self>(path, Self::section_key())?.ok_or_else(|| {
            ConfigError::ParseError(
                path.to_path_buf(),
                format!("missing [{}] section", Self::section_key()),
            )
        })
    }

    /// Search default paths (`trx-rs.toml` in CWD → XDG → /etc) and load
    /// the first file that contains the expected section.
    ///
    /// Returns `(config, path_where_found)` or `(Default::default(), None)`
    /// when no config file is found.
    fn load_from_default_paths() -> Result<(Self, Option<PathBuf>), ConfigError> {
        for path in config_search_paths() {
            if path.exists() {
                if let Some(cfg) = load_section_from_file::<Self>(&path, Self::section_key())? {
                    return Ok((cfg, Some(path)));
                }
            }
        }
        Ok((Self::default(), None))
    }

    /// Load from `explicit` when given, else from the default paths, then
    /// validate.
    fn load(explicit: Option<&Path>) -> Result<(Self, Option<PathBuf>), ConfigError> {
        let (cfg, path) = match explicit {
            Some(path) => (Self::load_from_file(path)?, Some(path.to_path_buf())),
            None => Self::load_from_default_paths()?,
        };
        cfg.validate().map_err(ConfigError::Invalid)?;
        Ok((cfg, path))
    }

    /// Render `self` wrapped under its section header, suitable for a
    /// combined `trx-rs.toml`.
    fn to_combined_toml(&self) -> Result<String, ConfigError> {
        let section = toml::Value::try_from(self)
            .map_err(|e| ConfigError::Invalid(format!("cannot serialise config: {}", e)))?;
        let mut root = toml::Table::new();
        root.insert(Self::section_key().to_string(), section);
        toml::to_string_pretty(&root)
            .map_err(|e| ConfigError::Invalid(format!("cannot serialise config: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::io::Write;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    #[serde(default)]
    struct Demo {
        name: String,
        rate: u32,
    }

    impl Default for Demo {
        fn default() -> Self {
            Self {
                name: "demo".to_string(),
                rate: 48_000,
            }
        }
    }

    impl ConfigFile for Demo {
        fn section_key() -> &'static str {
            "demo"
        }

        fn validate(&self) -> Result<(), String> {
            if self.rate == 0 {
                return Err("[demo].rate must be > 0".to_string());
            }
            Ok(())
        }
    }

    fn write_config(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn section_defaults_apply() {
        let file = write_config("[other]\nx = 1\n\n[demo]\nname = \"custom\"\n");
        let cfg = Demo::load_from_file(file.path()).unwrap();
        assert_eq!(cfg.name, "custom");
        assert_eq!(cfg.rate, 48_000);
    }

    #[test]
    fn missing_section_is_an_error() {
        let file = write_config("[other]\nx = 1\n");
        let err = Demo::load_from_file(file.path()).unwrap_err();
        assert!(err.to_string().contains("missing [demo] section"));
    }

    #[test]
    fn load_runs_validation() {
        let file = write_config("[demo]\nrate = 0\n");
        let err = Demo::load(Some(file.path())).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(ref m) if m.contains("[demo].rate")));

        let file = write_config("[demo]\nrate = 96000\n");
        let (cfg, path) = Demo::load(Some(file.path())).unwrap();
        assert_eq!(cfg.rate, 96_000);
        assert_eq!(path.as_deref(), Some(file.path()));
    }

    #[test]
    fn combined_toml_parses_back() {
        let cfg = Demo {
            name: "roundtrip".to_string(),
            rate: 8_000,
        };
        let text = cfg.to_combined_toml().unwrap();
        assert!(text.contains("[demo]"));
        let parsed: Option<Demo> = parse_section(&text, "demo").unwrap();
        assert_eq!(parsed, Some(cfg));
    }

    #[test]
    fn log_levels() {
        assert!(validate_log_level(None).is_ok());
        assert!(validate_log_level(Some("debug")).is_ok());
        assert!(validate_log_level(Some("verbose")).is_err());
    }
}
