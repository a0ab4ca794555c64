//! Inventory clients.
//!
//! The engine drives the external inventory through two idempotent calls:
//!
//! - [`InventoryClient::upsert`] makes the external record for an address
//!   match a lease record, creating it if absent
//! - [`InventoryClient::retire`] moves the external record to an inactive
//!   state; an absent or already retired record counts as success
//!
//! Both are awaited one at a time. Timeouts and transport retries belong to
//! the client implementation.

mod memory;
mod netbox;

use std::net::IpAddr;

use async_trait::async_trait;

use crate::error::Result;
use crate::lease::LeaseRecord;

pub use memory::{InventoryRecord, InventoryStatus, MemoryInventory};
pub use netbox::NetBoxClient;

/// External system that mirrors the lease state.
#[async_trait]
pub trait InventoryClient: Send + Sync {
    /// Creates or updates the external record for `record.address`.
    ///
    /// Calling this twice with the same record leaves the same external
    /// state as calling it once.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Inventory`](crate::Error::Inventory) if the external
    /// system did not confirm the change.
    async fn upsert(&self, record: &LeaseRecord) -> Result<()>;

    /// Marks the external record for `address` as no longer active.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Inventory`](crate::Error::Inventory) only if the
    /// address may still be active externally.
    async fn retire(&self, address: IpAddr) -> Result<()>;
}
