//! Tierkeeper - two-level storage for catalogued scientific data
//!
//! Clients address data through catalog selections of investigations,
//! datasets and datafiles. Files are served from a fast main tier; in a
//! two-level deployment the authoritative copy lives on a slow archive tier
//! and the service moves data between the two on demand.
//!
//! # High-Level API
//!
//! The [`service`] module provides the facade:
//!
//! ```ignore
//! use tierkeeper::config::ConfigFile;
//! use tierkeeper::service::create_service;
//!
//! let config = ConfigFile::load()?;
//! let _guard = tierkeeper::logging::init_from_settings(&config.logging)?;
//! let service = create_service(&config, catalog)?;
//! service.start(shutdown.clone())?;
//!
//! let id = service.prepare_data(session, &query, false, false)?;
//! ```

pub mod catalog;
pub mod config;
pub mod error;
pub mod fsm;
pub mod lock;
pub mod logging;
pub mod model;
pub mod packing;
pub mod persistence;
pub mod selection;
pub mod service;
pub mod storage;
pub mod tidier;
pub mod workers;

/// Version of the Tierkeeper library.
///
/// Reported by `getApiVersion`. Defined in `Cargo.toml` and injected at
/// compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
