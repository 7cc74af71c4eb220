//! Service configuration types.

use std::collections::BTreeSet;
use std::time::Duration;

use crate::fsm::FsmConfig;
use crate::model::StorageUnit;
use crate::selection::DEFAULT_MAX_ENTITIES;
use crate::tidier::DEFAULT_TIDY_INTERVAL_SECS;

/// Default lifetime of a prepared request in days.
pub const DEFAULT_DAYS_TO_EXPIRE: u32 = 7;

/// Default catalog session used by tier workers and anonymous status calls.
pub const DEFAULT_READER_SESSION: &str = "reader";

/// Configuration for [`IdsService`](super::IdsService).
///
/// # Example
///
/// ```
/// use tierkeeper::service::ServiceConfig;
/// use tierkeeper::model::StorageUnit;
///
/// let config = ServiceConfig::builder()
///     .root_users(["root"])
///     .storage_unit(StorageUnit::Datafile)
///     .read_only(true)
///     .build();
///
/// assert!(config.is_root("root"));
/// assert!(config.read_only());
/// ```
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Users allowed to read the service status
    root_users: BTreeSet<String>,
    /// Whether put and delete are disabled
    read_only: bool,
    /// Lifetime of persisted requests
    days_to_expire: u32,
    /// Granularity of slow-storage units
    storage_unit: StorageUnit,
    /// Catalog session for background lookups
    reader_session: String,
    /// Range-splitting threshold of the selection resolver
    max_entities: usize,
    /// Interval between tidier passes
    tidy_interval: Duration,
    /// Dispatcher settings, used by two-level deployments
    fsm: FsmConfig,
}

impl ServiceConfig {
    /// Create a new configuration builder.
    pub fn builder() -> ServiceConfigBuilder {
        ServiceConfigBuilder::default()
    }

    pub fn is_root(&self, user: &str) -> bool {
        self.root_users.contains(user)
    }

    pub fn root_users(&self) -> impl Iterator<Item = &str> {
        self.root_users.iter().map(String::as_str)
    }

    pub fn read_only(&self) -> bool {
        self.read_only
    }

    pub fn days_to_expire(&self) -> u32 {
        self.days_to_expire
    }

    /// Lifetime given to new requests.
    pub fn request_lifetime(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.days_to_expire))
    }

    pub fn storage_unit(&self) -> StorageUnit {
        self.storage_unit
    }

    pub fn reader_session(&self) -> &str {
        &self.reader_session
    }

    pub fn max_entities(&self) -> usize {
        self.max_entities
    }

    pub fn tidy_interval(&self) -> Duration {
        self.tidy_interval
    }

    pub fn fsm(&self) -> &FsmConfig {
        &self.fsm
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        ServiceConfigBuilder::default().build()
    }
}

/// Builder for ServiceConfig.
#[derive(Debug, Clone, Default)]
pub struct ServiceConfigBuilder {
    root_users: BTreeSet<String>,
    read_only: Option<bool>,
    days_to_expire: Option<u32>,
    storage_unit: Option<StorageUnit>,
    reader_session: Option<String>,
    max_entities: Option<usize>,
    tidy_interval: Option<Duration>,
    fsm: Option<FsmConfig>,
}

impl ServiceConfigBuilder {
    /// Set the users allowed to read the service status.
    pub fn root_users<I, S>(mut self, users: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.root_users = users.into_iter().map(Into::into).collect();
        self
    }

    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = Some(read_only);
        self
    }

    pub fn days_to_expire(mut self, days: u32) -> Self {
        self.days_to_expire = Some(days);
        self
    }

    pub fn storage_unit(mut self, unit: StorageUnit) -> Self {
        self.storage_unit = Some(unit);
        self
    }

    pub fn reader_session(mut self, session: impl Into<String>) -> Self {
        self.reader_session = Some(session.into());
        self
    }

    /// Set the range-splitting threshold (minimum 1).
    pub fn max_entities(mut self, max: usize) -> Self {
        self.max_entities = Some(max.max(1));
        self
    }

    pub fn tidy_interval(mut self, interval: Duration) -> Self {
        self.tidy_interval = Some(interval);
        self
    }

    pub fn fsm(mut self, config: FsmConfig) -> Self {
        self.fsm = Some(config);
        self
    }

    /// Build the configuration with defaults for unset values.
    pub fn build(self) -> ServiceConfig {
        ServiceConfig {
            root_users: self.root_users,
            read_only: self.read_only.unwrap_or(false),
            days_to_expire: self.days_to_expire.unwrap_or(DEFAULT_DAYS_TO_EXPIRE),
            storage_unit: self.storage_unit.unwrap_or(StorageUnit::Dataset),
            reader_session: self
                .reader_session
                .unwrap_or_else(|| DEFAULT_READER_SESSION.to_string()),
            max_entities: self.max_entities.unwrap_or(DEFAULT_MAX_ENTITIES),
            tidy_interval: self
                .tidy_interval
                .unwrap_or(Duration::from_secs(DEFAULT_TIDY_INTERVAL_SECS)),
            fsm: self.fsm.unwrap_or_default(),
        }
    }
}
