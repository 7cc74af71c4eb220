//! INI configuration for the storage service.
//!
//! The configuration lives in `~/.tierkeeper/config.ini`. A missing file
//! yields defaults: a single-level deployment rooted in `~/.tierkeeper/main`.
//!
//! # Example
//!
//! ```no_run
//! use tierkeeper::config::ConfigFile;
//!
//! let config = ConfigFile::load().expect("config.ini is invalid");
//! if config.storage.archive_dir.is_some() {
//!     println!("two-level mode, unit = {}", config.storage.storage_unit);
//! }
//! ```

mod defaults;
mod file;
mod parser;
mod settings;
mod writer;

pub use defaults::DEFAULT_LOG_FILE;
pub use file::{config_directory, config_file_path, ConfigFileError};
pub use settings::{
    ConfigFile, FsmSettings, LoggingSettings, RetentionSettings, SelectionSettings,
    ServiceSettings, StorageSettings,
};
