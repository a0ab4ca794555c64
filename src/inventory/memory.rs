use std::collections::{BTreeMap, HashSet};
use std::net::IpAddr;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::InventoryClient;
use crate::error::{Error, Result};
use crate::lease::LeaseRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InventoryStatus {
    Active,
    Retired,
}

/// One external record as held by [`MemoryInventory`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InventoryRecord {
    pub lease: LeaseRecord,
    pub status: InventoryStatus,
}

#[derive(Debug, Default)]
struct InventoryState {
    records: BTreeMap<IpAddr, InventoryRecord>,
    failing: HashSet<IpAddr>,
    calls: usize,
}

/// In-process inventory with per-address failure injection.
///
/// Keeps one record per address, so repeated upserts collapse into a
/// single record exactly like a well-behaved remote inventory.
#[derive(Debug, Default)]
pub struct MemoryInventory {
    state: Mutex<InventoryState>,
}

impl MemoryInventory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent call for `address` fail.
    pub async fn fail_address(&self, address: IpAddr) {
        self.state.lock().await.failing.insert(address);
    }

    pub async fn record(&self, address: &IpAddr) -> Option<InventoryRecord> {
        self.state.lock().await.records.get(address).cloned()
    }

    pub async fn records(&self) -> Vec<InventoryRecord> {
        self.state.lock().await.records.values().cloned().collect()
    }

    /// Number of upsert and retire calls received, failed ones included.
    pub async fn calls(&self) -> usize {
        self.state.lock().await.calls
    }
}

#[async_trait]
impl InventoryClient for MemoryInventory {
    async fn upsert(&self, record: &LeaseRecord) -> Result<()> {
        let mut state = self.state.lock().await;
        state.calls += 1;

        if state.failing.contains(&record.address) {
            return Err(Error::Inventory {
                address: record.address,
                reason: "injected failure".to_string(),
            });
        }

        state.records.insert(
            record.address,
            InventoryRecord {
                lease: record.clone(),
                status: InventoryStatus::Active,
            },
        );
        Ok(())
    }

    async fn retire(&self, address: IpAddr) -> Result<()> {
        let mut state = self.state.lock().await;
        state.calls += 1;

        if state.failing.contains(&address) {
            return Err(Error::Inventory {
                address,
                reason: "injected failure".to_string(),
            });
        }

        if let Some(record) = state.records.get_mut(&address) {
            record.status = InventoryStatus::Retired;
        }
        Ok(())
    }
}
