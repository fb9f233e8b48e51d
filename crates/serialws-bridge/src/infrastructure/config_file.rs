//! TOML configuration file loading and saving.
//!
//! # File format
//!
//! ```toml
//! baud_rate = 115200
//! data_bits = 8
//! stop_bits = "1"
//! parity = "none"
//! local_only = false
//! port = 8080
//! port_index = 0
//! strip_newline = true
//! ```
//!
//! Every key is optional; missing keys take their built-in default.

use std::path::{Path, PathBuf};

use serialws_core::BridgeConfig;
use thiserror::Error;
use tracing::debug;

/// Errors from reading or writing a configuration file.
#[derive(Debug, Error)]
pub enum ConfigFileError {
    /// File-system error reading or writing the file.
    #[error("I/O error accessing config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// TOML parse error.
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    /// TOML serialization error.
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Loads a configuration from `path`.
///
/// Unlike the built-in defaults, an explicitly named file must exist.
///
/// # Errors
///
/// [`ConfigFileError::Io`] if the file cannot be read, or
/// [`ConfigFileError::Parse`] if it is not valid TOML for [`BridgeConfig`].
pub fn load_config(path: &Path) -> Result<BridgeConfig, ConfigFileError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigFileError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let config: BridgeConfig = toml::from_str(&content).map_err(|source| ConfigFileError::Parse {
        path: path.to_path_buf(),
        source,
    })?;

    debug!("loaded config from {}", path.display());
    Ok(config)
}

/// Renders `config` as TOML.
pub fn render_config(config: &BridgeConfig) -> Result<String, ConfigFileError> {
    Ok(toml::to_string_pretty(config)?)
}

/// Writes `config` to `path`, creating parent directories as needed.
///
/// # Errors
///
/// [`ConfigFileError::Io`] for file-system failures.
pub fn save_config(path: &Path, config: &BridgeConfig) -> Result<(), ConfigFileError> {
    if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).map_err(|source| ConfigFileError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }

    let content = render_config(config)?;
    std::fs::write(path, content).map_err(|source| ConfigFileError::Io {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serialws_core::Parity;

    fn scratch_path(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("serialws-config-test-{}", std::process::id()))
            .join(name)
    }

    #[test]
    fn test_save_then_load_preserves_values() {
        let path = scratch_path("roundtrip.toml");
        let config = BridgeConfig {
            baud_rate: 9600,
            parity: Parity::Odd,
            local_only: true,
            port: 9000,
            ..BridgeConfig::default()
        };

        save_config(&path, &config).unwrap();
        let loaded = load_config(&path).unwrap();

        assert_eq!(loaded, config);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_missing_file_is_an_io_error() {
        let path = scratch_path("does-not-exist.toml");

        let err = load_config(&path).unwrap_err();

        assert!(matches!(err, ConfigFileError::Io { .. }));
        assert!(err.to_string().contains("does-not-exist.toml"));
    }

    #[test]
    fn test_malformed_file_is_a_parse_error() {
        let path = scratch_path("malformed.toml");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "baud_rate = \"fast\"\n").unwrap();

        let err = load_config(&path).unwrap_err();

        assert!(matches!(err, ConfigFileError::Parse { .. }));
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_render_contains_every_key() {
        let rendered = render_config(&BridgeConfig::default()).unwrap();

        for key in [
            "baud_rate",
            "data_bits",
            "stop_bits",
            "parity",
            "local_only",
            "port",
            "port_index",
            "strip_newline",
        ] {
            assert!(rendered.contains(key), "missing {key} in:\n{rendered}");
        }
    }
}
