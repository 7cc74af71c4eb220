//! Settings structs, one per INI section.
//!
//! Each struct maps to a section of `config.ini`. Defaults live in
//! [`super::defaults`].

use std::path::PathBuf;

use crate::model::StorageUnit;

/// User configuration loaded from `config.ini`.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    /// Tier directories
    pub storage: StorageSettings,
    /// Deferred-operation dispatcher
    pub fsm: FsmSettings,
    /// Selection resolution against the catalog
    pub selection: SelectionSettings,
    /// Request lifetime and reaping
    pub retention: RetentionSettings,
    /// Access control and catalog identity
    pub service: ServiceSettings,
    /// Log output
    pub logging: LoggingSettings,
}

/// `[storage]` section.
#[derive(Debug, Clone)]
pub struct StorageSettings {
    /// Root of the fast tier
    pub main_dir: PathBuf,
    /// Root of the slow tier. Unset means single-level operation.
    pub archive_dir: Option<PathBuf>,
    /// Granularity of archive units
    pub storage_unit: StorageUnit,
    /// Directory holding the deletion markers
    pub cache_dir: PathBuf,
    /// Directory holding persisted requests
    pub data_dir: PathBuf,
}

/// `[fsm]` section.
#[derive(Debug, Clone)]
pub struct FsmSettings {
    /// Seconds a WRITE waits before it may be dispatched
    pub write_delay_secs: u64,
    /// Seconds between queue scans
    pub process_queue_interval_secs: u64,
    /// Concurrent tier workers
    pub max_workers: usize,
}

/// `[selection]` section.
#[derive(Debug, Clone)]
pub struct SelectionSettings {
    /// Largest id range resolved in a single catalog query
    pub max_entities: usize,
}

/// `[retention]` section.
#[derive(Debug, Clone)]
pub struct RetentionSettings {
    pub days_to_expire: u32,
    pub tidy_interval_secs: u64,
}

/// `[service]` section.
#[derive(Debug, Clone)]
pub struct ServiceSettings {
    /// Users allowed to read the service status
    pub root_users: Vec<String>,
    /// Reject put and delete
    pub read_only: bool,
    /// Catalog session used for background lookups
    pub reader_session: String,
}

/// `[logging]` section.
#[derive(Debug, Clone)]
pub struct LoggingSettings {
    /// Log file path
    pub file: PathBuf,
}
