//! The request-facing service.
//!
//! [`IdsService`] is the single entry point for clients: it resolves
//! selections against the catalog, takes dataset locks, streams downloads
//! from main storage and, in two-level deployments, queues migrations for
//! the deferred-operation dispatcher.
//!
//! # Example
//!
//! ```ignore
//! use tierkeeper::config::ConfigFile;
//! use tierkeeper::service::create_service;
//!
//! let config = ConfigFile::load()?;
//! let service = create_service(&config, catalog)?;
//! let handles = service.start(shutdown.clone())?;
//! ```

mod builder;
mod config;
mod facade;
mod stream;

pub use builder::{create_service, service_config_from};
pub use config::{
    ServiceConfig, ServiceConfigBuilder, DEFAULT_DAYS_TO_EXPIRE, DEFAULT_READER_SESSION,
};
pub use facade::{ArchiveTier, IdsService};
pub use stream::{output_name, parse_range, DataStream};
