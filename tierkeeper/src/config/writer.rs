//! INI serialization logic for converting `ConfigFile` → INI string.

use std::path::Path;

use super::settings::ConfigFile;

/// Convert a `ConfigFile` to a commented INI string for saving.
pub(super) fn to_config_string(config: &ConfigFile) -> String {
    let archive_dir = config
        .storage
        .archive_dir
        .as_deref()
        .map(path_to_string)
        .unwrap_or_default();
    let read_only = if config.service.read_only {
        "true"
    } else {
        "false"
    };

    format!(
        r#"[storage]
; Fast tier served to clients
main_dir = {}
; Slow tier. Leave empty to run without an archive (single-level mode)
archive_dir = {}
; Archive granularity: dataset (one tar per dataset) or datafile (one object per file)
storage_unit = {}
; Deletion markers for datafile units
cache_dir = {}
; Persisted prepare and migration requests
data_dir = {}

[fsm]
; Seconds a pending write-to-archive waits for further changes
write_delay = {}
; Seconds between scans of the deferred queue
process_queue_interval = {}
; Concurrent archive/restore workers
max_workers = {}

[selection]
; Largest id range resolved in one catalog query
max_entities = {}

[retention]
; Days a finished request stays available
days_to_expire = {}
; Seconds between removals of expired requests
tidy_interval = {}

[service]
; Comma-separated users allowed to read the service status
root_users = {}
; Reject put and delete
read_only = {}
; Catalog session used for background lookups
reader_session = {}

[logging]
file = {}
"#,
        path_to_string(&config.storage.main_dir),
        archive_dir,
        config.storage.storage_unit,
        path_to_string(&config.storage.cache_dir),
        path_to_string(&config.storage.data_dir),
        config.fsm.write_delay_secs,
        config.fsm.process_queue_interval_secs,
        config.fsm.max_workers,
        config.selection.max_entities,
        config.retention.days_to_expire,
        config.retention.tidy_interval_secs,
        config.service.root_users.join(", "),
        read_only,
        config.service.reader_session,
        path_to_string(&config.logging.file),
    )
}

/// Convert a path to a string, using ~ for home directory.
fn path_to_string(path: &Path) -> String {
    if let Some(home) = dirs::home_dir() {
        if let Ok(stripped) = path.strip_prefix(&home) {
            return format!("~/{}", stripped.display());
        }
    }
    path.display().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::StorageUnit;
    use std::path::PathBuf;
    use tempfile::TempDir;

    #[test]
    fn test_save_then_load_keeps_values() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.ini");

        let mut config = ConfigFile::default();
        config.storage.archive_dir = Some(PathBuf::from("/srv/archive"));
        config.storage.storage_unit = StorageUnit::Datafile;
        config.fsm.write_delay_secs = 5;
        config.service.root_users = vec!["root".into(), "ops".into()];
        config.service.read_only = true;
        config.save_to(&config_path).unwrap();

        let loaded = ConfigFile::load_from(&config_path).unwrap();
        assert_eq!(loaded.storage.archive_dir, config.storage.archive_dir);
        assert_eq!(loaded.storage.storage_unit, StorageUnit::Datafile);
        assert_eq!(loaded.storage.main_dir, config.storage.main_dir);
        assert_eq!(loaded.fsm.write_delay_secs, 5);
        assert_eq!(loaded.service.root_users, config.service.root_users);
        assert!(loaded.service.read_only);
        assert_eq!(loaded.logging.file, config.logging.file);
    }

    #[test]
    fn test_single_level_writes_empty_archive_dir() {
        let content = to_config_string(&ConfigFile::default());
        assert!(content.contains("archive_dir = \n"));
        assert!(content.contains("storage_unit = dataset"));
    }
}
