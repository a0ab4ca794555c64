//! Lease records and the per-run lease set.
//!
//! A [`LeaseRecord`] is the unit being reconciled: an address bound to a
//! hardware identifier, with an optional hostname label and expiry. The
//! persisted snapshot stores the same shape as [`SnapshotEntry`].
//!
//! # Duplicate Addresses
//!
//! Lease sources may emit more than one record for an address (ISC lease
//! files are append-only). [`LeaseSet`] keeps exactly one record per
//! address: the last one emitted wins, while the address keeps the position
//! where it was first seen so iteration order stays stable.

use std::collections::HashMap;
use std::net::IpAddr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// An observed lease: a binding between an address and a hardware id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseRecord {
    /// The leased address. Unique within one [`LeaseSet`].
    pub address: IpAddr,

    /// Identifier of the binding owner, usually a MAC address.
    pub hardware_id: String,

    /// Client hostname, empty when the client did not send one.
    #[serde(default)]
    pub label: String,

    /// When the lease ends (UTC). `None` means no expiry is tracked.
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

/// The last record successfully pushed to the inventory for an address.
pub type SnapshotEntry = LeaseRecord;

impl LeaseRecord {
    pub fn new(address: IpAddr, hardware_id: impl Into<String>) -> Self {
        Self {
            address,
            hardware_id: hardware_id.into(),
            label: String::new(),
            expires_at: None,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Returns true if the lease has a known expiry strictly before `now`.
    ///
    /// Leases without an expiry never expire.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at < now)
    }

    /// Returns seconds remaining until expiration at `now`, or `None` if no
    /// expiry is tracked. Expired leases report 0.
    pub fn remaining_seconds(&self, now: DateTime<Utc>) -> Option<i64> {
        self.expires_at
            .map(|expires_at| (expires_at - now).num_seconds().max(0))
    }

    /// Returns true if both records carry the same hardware id and label.
    ///
    /// Expiry is deliberately not part of the binding.
    pub fn same_binding(&self, other: &LeaseRecord) -> bool {
        self.hardware_id == other.hardware_id && self.label == other.label
    }
}

/// Address-unique, insertion-ordered set of current lease records.
#[derive(Debug, Clone, Default)]
pub struct LeaseSet {
    records: Vec<LeaseRecord>,
    index: HashMap<IpAddr, usize>,
    duplicates: usize,
}

impl LeaseSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a record, replacing any earlier record for the same address
    /// in place.
    ///
    /// Returns the replaced record, if any.
    pub fn insert(&mut self, record: LeaseRecord) -> Option<LeaseRecord> {
        if let Some(&position) = self.index.get(&record.address) {
            self.duplicates += 1;
            debug!(
                "Duplicate lease for {}, keeping the later record ({})",
                record.address, record.hardware_id
            );
            return Some(std::mem::replace(&mut self.records[position], record));
        }

        self.index.insert(record.address, self.records.len());
        self.records.push(record);
        None
    }

    pub fn get(&self, address: &IpAddr) -> Option<&LeaseRecord> {
        self.index
            .get(address)
            .map(|&position| &self.records[position])
    }

    pub fn contains(&self, address: &IpAddr) -> bool {
        self.index.contains_key(address)
    }

    /// Iterates records in first-seen address order.
    pub fn iter(&self) -> impl Iterator<Item = &LeaseRecord> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Number of records that were superseded by a later record for the
    /// same address.
    pub fn duplicates(&self) -> usize {
        self.duplicates
    }
}

impl FromIterator<LeaseRecord> for LeaseSet {
    fn from_iter<I: IntoIterator<Item = LeaseRecord>>(iter: I) -> Self {
        let mut set = LeaseSet::new();
        for record in iter {
            set.insert(record);
        }
        set
    }
}

impl<'a> IntoIterator for &'a LeaseSet {
    type Item = &'a LeaseRecord;
    type IntoIter = std::slice::Iter<'a, LeaseRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}
