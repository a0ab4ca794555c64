//! Error types for lease reconciliation.
//!
//! All fallible operations in this crate return [`Result<T>`], which uses
//! the [`Error`] enum for error variants. [`Error::is_fatal`] separates the
//! errors that abort a run from those isolated to a single address.

use std::net::IpAddr;
use std::path::PathBuf;

/// Errors that can occur while reading leases, touching the snapshot, or
/// talking to the inventory.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// File system I/O error outside of the lease source and snapshot paths.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error (config or report output).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The lease source could not be read or parsed.
    ///
    /// Fatal: no actions are computed and the snapshot is never touched.
    #[error("Failed to read leases from {path}: {reason}")]
    SourceRead { path: PathBuf, reason: String },

    /// The snapshot could not be loaded.
    ///
    /// Fatal: diffing without a baseline would classify everything as new.
    #[error("Failed to load snapshot: {0}")]
    StoreRead(String),

    /// The snapshot could not record an action that the inventory accepted.
    ///
    /// The inventory and the snapshot now disagree for this address until
    /// the next run re-applies the (idempotent) change.
    #[error("Failed to write snapshot entry for {address}: {reason}")]
    StoreWrite { address: IpAddr, reason: String },

    /// The inventory rejected or failed an upsert or retire call.
    #[error("Inventory call for {address} failed: {reason}")]
    Inventory { address: IpAddr, reason: String },

    /// Transport-level HTTP error from the inventory client.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Invalid configuration.
    ///
    /// Returned by [`Config::validate`](crate::Config::validate) when the
    /// configuration contains unusable values (e.g., an empty API token).
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// Returns true for errors that must stop a run before any action is
    /// applied.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::SourceRead { .. } | Error::StoreRead(_) | Error::InvalidConfig(_)
        )
    }
}

/// A specialized Result type for reconciliation operations.
pub type Result<T> = std::result::Result<T, Error>;
