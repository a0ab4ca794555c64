//! # leasesync
//!
//! Reconciles DHCP leases against a persisted snapshot and mirrors the
//! changes into an inventory system (NetBox IPAM).
//!
//! ## Features
//!
//! - ISC `dhcpd.leases` parsing
//! - Per-address classification: create, reassignment, hostname change,
//!   expiry
//! - Idempotent inventory upsert and retire
//! - Crash-consistent snapshot: only confirmed changes are recorded
//! - Dry-run, new-only and expired-only run modes
//!
//! ## Quick Start
//!
//! ```no_run
//! use leasesync::{Config, LeaseSync};
//!
//! #[tokio::main]
//! async fn main() -> leasesync::Result<()> {
//!     let config = Config::load_or_create("leasesync.json")?;
//!     let sync = LeaseSync::from_config(&config).await?;
//!     let report = sync.run().await?;
//!     println!("{}", report.summary());
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! - [`LeaseSource`] - Produces current lease records ([`IscLeasesFile`])
//! - [`SnapshotStore`] - Last pushed state per address ([`JsonSnapshotStore`])
//! - [`InventoryClient`] - Idempotent upsert/retire ([`NetBoxClient`])
//! - [`Reconciler`] - Classifies and applies actions
//! - [`LeaseSync`] - Wires the pieces together for one run
//! - [`RunReport`] - What happened, per address

pub mod config;
pub mod error;
pub mod inventory;
pub mod lease;
pub mod reconcile;
pub mod report;
pub mod snapshot;
pub mod source;
pub mod sync;

pub use config::{Config, NetBoxConfig, RunMode};
pub use error::{Error, Result};
pub use inventory::{InventoryClient, MemoryInventory, NetBoxClient};
pub use lease::{LeaseRecord, LeaseSet, SnapshotEntry};
pub use reconcile::{Action, ReconcileOptions, Reconciler, classify};
pub use report::{ActionKind, ActionReport, ApplyFailure, Outcome, RunReport};
pub use snapshot::{JsonSnapshotStore, MemorySnapshotStore, Snapshot, SnapshotStore};
pub use source::{IscLeasesFile, LeaseSource};
pub use sync::LeaseSync;
