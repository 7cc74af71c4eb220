//! Requested operations and status values.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The state an entity has been asked to reach.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestedState {
    Prepare,
    Archive,
    Restore,
    Write,
    WriteThenArchive,
}

impl RequestedState {
    /// Operations to queue when replaying this state after a restart.
    pub fn replay_ops(self) -> &'static [DeferredOp] {
        match self {
            Self::Prepare => &[DeferredOp::Prepare],
            Self::Archive => &[DeferredOp::Archive],
            Self::Restore => &[DeferredOp::Restore],
            Self::Write => &[DeferredOp::Write],
            Self::WriteThenArchive => &[DeferredOp::Write, DeferredOp::Archive],
        }
    }
}

impl fmt::Display for RequestedState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Prepare => "PREPARE",
            Self::Archive => "ARCHIVE",
            Self::Restore => "RESTORE",
            Self::Write => "WRITE",
            Self::WriteThenArchive => "WRITE_THEN_ARCHIVE",
        };
        f.write_str(s)
    }
}

/// An operation submitted to the deferred queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeferredOp {
    Prepare,
    Archive,
    Restore,
    Write,
}

impl fmt::Display for DeferredOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Prepare => "PREPARE",
            Self::Archive => "ARCHIVE",
            Self::Restore => "RESTORE",
            Self::Write => "WRITE",
        };
        f.write_str(s)
    }
}

/// Status of a request or of one of its entities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StatusInfo {
    Submitted,
    Retrieving,
    Completed,
    Incomplete,
    Error,
    Denied,
    NotFound,
}

impl StatusInfo {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Submitted | Self::Retrieving)
    }
}

impl fmt::Display for StatusInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Submitted => "SUBMITTED",
            Self::Retrieving => "RETRIEVING",
            Self::Completed => "COMPLETED",
            Self::Incomplete => "INCOMPLETE",
            Self::Error => "ERROR",
            Self::Denied => "DENIED",
            Self::NotFound => "NOT_FOUND",
        };
        f.write_str(s)
    }
}

/// Availability of a selection as reported by `get_status`.
///
/// Variants are ordered so that the aggregate over several entities is the
/// maximum of the individual values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    Online,
    Restoring,
    Archived,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Online => "ONLINE",
            Self::Restoring => "RESTORING",
            Self::Archived => "ARCHIVED",
        };
        f.write_str(s)
    }
}
