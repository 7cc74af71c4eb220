//! Configuration file handling for ~/.tierkeeper/config.ini.
//!
//! Settings structs live in [`super::settings`], defaults in [`super::defaults`],
//! parsing in [`super::parser`] and serialization in [`super::writer`].

use ini::Ini;
use std::path::{Path, PathBuf};
use thiserror::Error;

use super::settings::ConfigFile;

/// Configuration file errors.
#[derive(Debug, Error)]
pub enum ConfigFileError {
    /// The file exists but is not valid INI
    #[error("Failed to read config file: {0}")]
    Read(#[from] ini::Error),

    #[error("Failed to write config file {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A value that does not fit its key
    #[error("Invalid configuration: {section}.{key} = '{value}' - {reason}")]
    InvalidValue {
        section: String,
        key: String,
        value: String,
        reason: String,
    },

    #[error("Failed to create config directory {}: {source}", .path.display())]
    Directory {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl ConfigFile {
    /// Load `~/.tierkeeper/config.ini`, or defaults if it is missing.
    pub fn load() -> Result<Self, ConfigFileError> {
        Self::load_from(&config_file_path())
    }

    /// Load configuration from `path`, or defaults if it is missing.
    pub fn load_from(path: &Path) -> Result<Self, ConfigFileError> {
        let config = if path.exists() {
            super::parser::parse_ini(&Ini::load_from_file(path)?)?
        } else {
            Self::default()
        };
        config.validate()?;
        Ok(config)
    }

    /// Save to `~/.tierkeeper/config.ini`.
    pub fn save(&self) -> Result<(), ConfigFileError> {
        self.save_to(&config_file_path())
    }

    /// Save to `path`, creating its directory.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigFileError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| ConfigFileError::Directory {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        std::fs::write(path, super::writer::to_config_string(self)).map_err(|source| {
            ConfigFileError::Write {
                path: path.to_path_buf(),
                source,
            }
        })
    }

    /// Write a default config file unless one exists. Returns its path.
    pub fn ensure_exists() -> Result<PathBuf, ConfigFileError> {
        let path = config_file_path();
        if !path.exists() {
            Self::default().save_to(&path)?;
        }
        Ok(path)
    }

    /// Checks constraints spanning several keys.
    pub fn validate(&self) -> Result<(), ConfigFileError> {
        if let Some(archive_dir) = &self.storage.archive_dir {
            if *archive_dir == self.storage.main_dir {
                return Err(ConfigFileError::InvalidValue {
                    section: "storage".to_string(),
                    key: "archive_dir".to_string(),
                    value: archive_dir.display().to_string(),
                    reason: "must differ from main_dir".to_string(),
                });
            }
        }
        Ok(())
    }
}

/// Get the path to the config directory (~/.tierkeeper).
pub fn config_directory() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".tierkeeper")
}

/// Get the path to the config file (~/.tierkeeper/config.ini).
pub fn config_file_path() -> PathBuf {
    config_directory().join("config.ini")
}
