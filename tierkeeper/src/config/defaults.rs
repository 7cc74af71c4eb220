//! Default values for all configuration settings.

use super::file::config_directory;
use super::settings::*;
use crate::fsm::{default_max_workers, DEFAULT_PROCESS_INTERVAL_SECS, DEFAULT_WRITE_DELAY_SECS};
use crate::model::StorageUnit;
use crate::selection::DEFAULT_MAX_ENTITIES;
use crate::service::{DEFAULT_DAYS_TO_EXPIRE, DEFAULT_READER_SESSION};
use crate::tidier::DEFAULT_TIDY_INTERVAL_SECS;

/// Default log file name.
pub const DEFAULT_LOG_FILE: &str = "tierkeeper.log";

impl Default for ConfigFile {
    fn default() -> Self {
        let base = config_directory();
        Self {
            storage: StorageSettings {
                main_dir: base.join("main"),
                archive_dir: None,
                storage_unit: StorageUnit::Dataset,
                cache_dir: base.join("cache"),
                data_dir: base.join("requests"),
            },
            fsm: FsmSettings {
                write_delay_secs: DEFAULT_WRITE_DELAY_SECS,
                process_queue_interval_secs: DEFAULT_PROCESS_INTERVAL_SECS,
                max_workers: default_max_workers(),
            },
            selection: SelectionSettings {
                max_entities: DEFAULT_MAX_ENTITIES,
            },
            retention: RetentionSettings {
                days_to_expire: DEFAULT_DAYS_TO_EXPIRE,
                tidy_interval_secs: DEFAULT_TIDY_INTERVAL_SECS,
            },
            service: ServiceSettings {
                root_users: Vec::new(),
                read_only: false,
                reader_session: DEFAULT_READER_SESSION.to_string(),
            },
            logging: LoggingSettings {
                file: base.join("logs").join(DEFAULT_LOG_FILE),
            },
        }
    }
}
