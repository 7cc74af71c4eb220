//! INI parsing logic for converting an INI document into a `ConfigFile`.
//!
//! Every key is optional. Values found in the file overlay the defaults;
//! malformed values are reported as [`ConfigFileError::InvalidValue`].

use std::path::PathBuf;
use std::str::FromStr;

use ini::Ini;

use super::file::ConfigFileError;
use super::settings::ConfigFile;
use crate::model::StorageUnit;

/// Parse an INI document into a `ConfigFile`.
pub(super) fn parse_ini(ini: &Ini) -> Result<ConfigFile, ConfigFileError> {
    let mut config = ConfigFile::default();

    // [storage]
    if let Some(section) = ini.section(Some("storage")) {
        if let Some(v) = section.get("main_dir") {
            config.storage.main_dir = expand_tilde(v);
        }
        if let Some(v) = section.get("archive_dir") {
            let v = v.trim();
            config.storage.archive_dir = if v.is_empty() {
                None
            } else {
                Some(expand_tilde(v))
            };
        }
        if let Some(v) = section.get("storage_unit") {
            config.storage.storage_unit = StorageUnit::from_str(v).map_err(|reason| {
                invalid("storage", "storage_unit", v, &format!("{reason}, must be dataset or datafile"))
            })?;
        }
        if let Some(v) = section.get("cache_dir") {
            config.storage.cache_dir = expand_tilde(v);
        }
        if let Some(v) = section.get("data_dir") {
            config.storage.data_dir = expand_tilde(v);
        }
    }

    // [fsm]
    if let Some(section) = ini.section(Some("fsm")) {
        if let Some(v) = section.get("write_delay") {
            config.fsm.write_delay_secs = parse_number("fsm", "write_delay", v)?;
        }
        if let Some(v) = section.get("process_queue_interval") {
            let secs: u64 = parse_number("fsm", "process_queue_interval", v)?;
            if secs == 0 {
                return Err(invalid("fsm", "process_queue_interval", v, "must be at least 1"));
            }
            config.fsm.process_queue_interval_secs = secs;
        }
        if let Some(v) = section.get("max_workers") {
            let workers: usize = parse_number("fsm", "max_workers", v)?;
            if workers == 0 {
                return Err(invalid("fsm", "max_workers", v, "must be at least 1"));
            }
            config.fsm.max_workers = workers;
        }
    }

    // [selection]
    if let Some(section) = ini.section(Some("selection")) {
        if let Some(v) = section.get("max_entities") {
            let max: usize = parse_number("selection", "max_entities", v)?;
            if max == 0 {
                return Err(invalid("selection", "max_entities", v, "must be at least 1"));
            }
            config.selection.max_entities = max;
        }
    }

    // [retention]
    if let Some(section) = ini.section(Some("retention")) {
        if let Some(v) = section.get("days_to_expire") {
            config.retention.days_to_expire = parse_number("retention", "days_to_expire", v)?;
        }
        if let Some(v) = section.get("tidy_interval") {
            let secs: u64 = parse_number("retention", "tidy_interval", v)?;
            if secs == 0 {
                return Err(invalid("retention", "tidy_interval", v, "must be at least 1"));
            }
            config.retention.tidy_interval_secs = secs;
        }
    }

    // [service]
    if let Some(section) = ini.section(Some("service")) {
        if let Some(v) = section.get("root_users") {
            config.service.root_users = v
                .split(|c: char| c == ',' || c.is_whitespace())
                .filter(|u| !u.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(v) = section.get("read_only") {
            config.service.read_only = parse_bool(v)
                .ok_or_else(|| invalid("service", "read_only", v, "must be true or false"))?;
        }
        if let Some(v) = section.get("reader_session") {
            let v = v.trim();
            if v.is_empty() {
                return Err(invalid("service", "reader_session", v, "must not be empty"));
            }
            config.service.reader_session = v.to_string();
        }
    }

    // [logging]
    if let Some(section) = ini.section(Some("logging")) {
        if let Some(v) = section.get("file") {
            config.logging.file = expand_tilde(v);
        }
    }

    Ok(config)
}

/// Parse a boolean value from a config string.
/// Accepts: true/false, yes/no, 1/0, on/off (case-insensitive)
pub(super) fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "true" | "yes" | "1" | "on" => Some(true),
        "false" | "no" | "0" | "off" => Some(false),
        _ => None,
    }
}

/// Expand ~ to home directory in paths.
pub(super) fn expand_tilde(path: &str) -> PathBuf {
    let path = path.trim();
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

fn parse_number<T: FromStr>(section: &str, key: &str, value: &str) -> Result<T, ConfigFileError> {
    value
        .trim()
        .parse()
        .map_err(|_| invalid(section, key, value, "must be a non-negative integer"))
}

fn invalid(section: &str, key: &str, value: &str, reason: &str) -> ConfigFileError {
    ConfigFileError::InvalidValue {
        section: section.to_string(),
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}
