//! The reconciliation engine.
//!
//! A run has two phases:
//!
//! 1. [`classify`] diffs the current lease set against the snapshot and
//!    produces one [`Action`] per address in `current ∪ previous`
//! 2. [`Reconciler::reconcile`] walks those actions in order and applies
//!    each one that the run mode allows
//!
//! # Classification Precedence
//!
//! For each address, the first matching rule wins:
//!
//! 1. Current only: [`Action::Create`]
//! 2. Both, hardware id differs: [`Action::UpdateBinding`] (even if the
//!    label also changed)
//! 3. Both, label differs: [`Action::UpdateLabel`]
//! 4. Both, otherwise: [`Action::NoOp`]
//! 5. Previous only, expiry strictly before `now`: [`Action::Expire`]
//! 6. Previous only, otherwise: [`Action::NoOp`]
//!
//! # Snapshot Consistency
//!
//! The snapshot is written only after the inventory confirms a change, one
//! address at a time, so at any point it reflects every action applied so
//! far and nothing that was merely attempted. All writes, to the inventory
//! and to the snapshot, go through a single applier; a dry run swaps in one
//! that cannot write at all.

use std::net::IpAddr;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use crate::config::RunMode;
use crate::error::Error;
use crate::inventory::InventoryClient;
use crate::lease::{LeaseRecord, LeaseSet, SnapshotEntry};
use crate::report::{ActionKind, ActionReport, ApplyFailure, Outcome, RunReport};
use crate::snapshot::{Snapshot, SnapshotStore};

/// What to do for one address. Derived per run, never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    NoOp(IpAddr),
    Create(LeaseRecord),
    /// New record, previous snapshot entry.
    UpdateBinding(LeaseRecord, SnapshotEntry),
    /// New record, previous snapshot entry.
    UpdateLabel(LeaseRecord, SnapshotEntry),
    /// Address, previous snapshot entry.
    Expire(IpAddr, SnapshotEntry),
}

impl Action {
    pub fn kind(&self) -> ActionKind {
        match self {
            Action::NoOp(_) => ActionKind::NoOp,
            Action::Create(_) => ActionKind::Create,
            Action::UpdateBinding(..) => ActionKind::UpdateBinding,
            Action::UpdateLabel(..) => ActionKind::UpdateLabel,
            Action::Expire(..) => ActionKind::Expire,
        }
    }

    pub fn address(&self) -> IpAddr {
        match self {
            Action::NoOp(address) | Action::Expire(address, _) => *address,
            Action::Create(record)
            | Action::UpdateBinding(record, _)
            | Action::UpdateLabel(record, _) => record.address,
        }
    }

    /// Human-readable description of the change.
    pub fn detail(&self) -> String {
        match self {
            Action::NoOp(_) => String::new(),
            Action::Create(record) => format!("{} {:?}", record.hardware_id, record.label),
            Action::UpdateBinding(record, previous) => {
                format!("{} -> {}", previous.hardware_id, record.hardware_id)
            }
            Action::UpdateLabel(record, previous) => {
                format!("{:?} -> {:?}", previous.label, record.label)
            }
            Action::Expire(_, previous) => match previous.expires_at {
                Some(expires_at) => format!("expired {}", expires_at.to_rfc3339()),
                None => "expired".to_string(),
            },
        }
    }

    /// Returns true if `mode` forbids applying this action.
    pub fn is_suppressed_by(&self, mode: RunMode) -> bool {
        match (mode, self.kind()) {
            (_, ActionKind::NoOp) | (RunMode::Full, _) => false,
            (RunMode::NewOnly, kind) => kind == ActionKind::Expire,
            (RunMode::ExpiredOnly, kind) => kind != ActionKind::Expire,
        }
    }
}

/// Classifies every address in `current ∪ previous`.
///
/// Actions come back in current-set order followed by the addresses only
/// present in the snapshot, in ascending address order. `now` is the one
/// instant used for every expiry decision in the run.
pub fn classify(current: &LeaseSet, previous: &Snapshot, now: DateTime<Utc>) -> Vec<Action> {
    let mut actions = Vec::with_capacity(current.len() + previous.len());

    for record in current {
        let action = match previous.get(&record.address) {
            None => Action::Create(record.clone()),
            Some(old) if old.same_binding(record) => Action::NoOp(record.address),
            Some(old) if old.hardware_id != record.hardware_id => {
                Action::UpdateBinding(record.clone(), old.clone())
            }
            Some(old) => Action::UpdateLabel(record.clone(), old.clone()),
        };
        actions.push(action);
    }

    for (address, old) in previous {
        if current.contains(address) {
            continue;
        }

        if old.is_expired_at(now) {
            actions.push(Action::Expire(*address, old.clone()));
        } else {
            actions.push(Action::NoOp(*address));
        }
    }

    actions
}

/// Flags that shape a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileOptions {
    pub mode: RunMode,
    pub dry_run: bool,
}

/// The only path by which a run can touch the inventory or the snapshot.
enum Applier<'a> {
    Live {
        store: &'a dyn SnapshotStore,
        client: &'a dyn InventoryClient,
    },
    DryRun,
}

impl Applier<'_> {
    async fn apply(&self, action: &Action) -> Outcome {
        let Applier::Live { store, client } = self else {
            return Outcome::Planned;
        };

        match action {
            Action::NoOp(_) => Outcome::Unchanged,
            Action::Create(record)
            | Action::UpdateBinding(record, _)
            | Action::UpdateLabel(record, _) => {
                if let Err(error) = client.upsert(record).await {
                    error!("Failed to push {}: {}", record.address, error);
                    return Outcome::Failed {
                        failure: ApplyFailure::Inventory(error.to_string()),
                    };
                }
                Self::record_write(store.upsert(record).await, record.address)
            }
            Action::Expire(address, _) => {
                if let Err(error) = client.retire(*address).await {
                    error!("Failed to retire {}: {}", address, error);
                    return Outcome::Failed {
                        failure: ApplyFailure::Inventory(error.to_string()),
                    };
                }
                Self::record_write(store.delete(*address).await, *address)
            }
        }
    }

    /// Records a renewed expiry for an address whose binding is unchanged.
    ///
    /// No inventory call is made.
    async fn refresh_expiry(&self, record: &LeaseRecord) -> Outcome {
        let Applier::Live { store, .. } = self else {
            return Outcome::Unchanged;
        };

        match store.upsert(record).await {
            Ok(()) => {
                debug!("Refreshed expiry for {}", record.address);
                Outcome::Unchanged
            }
            Err(error) => {
                error!("Failed to refresh expiry for {}: {}", record.address, error);
                Outcome::Failed {
                    failure: ApplyFailure::SnapshotWrite(error.to_string()),
                }
            }
        }
    }

    fn record_write(result: crate::Result<()>, address: IpAddr) -> Outcome {
        match result {
            Ok(()) => Outcome::Applied,
            Err(error) => {
                let reason = match error {
                    Error::StoreWrite { reason, .. } => reason,
                    other => other.to_string(),
                };
                error!(
                    "Inventory updated for {} but the snapshot write failed, they now disagree: {}",
                    address, reason
                );
                Outcome::Failed {
                    failure: ApplyFailure::SnapshotWrite(reason),
                }
            }
        }
    }
}

/// Applies classified actions against an inventory and a snapshot store.
pub struct Reconciler<'a> {
    options: ReconcileOptions,
    applier: Applier<'a>,
}

impl<'a> Reconciler<'a> {
    /// Creates an engine for one run.
    ///
    /// With `options.dry_run` set, `store` and `client` are never used.
    pub fn new(
        options: ReconcileOptions,
        store: &'a dyn SnapshotStore,
        client: &'a dyn InventoryClient,
    ) -> Self {
        let applier = if options.dry_run {
            Applier::DryRun
        } else {
            Applier::Live { store, client }
        };

        Self { options, applier }
    }

    /// Classifies and applies, returning the run report.
    pub async fn reconcile(
        &self,
        current: &LeaseSet,
        previous: &Snapshot,
        now: DateTime<Utc>,
    ) -> RunReport {
        self.reconcile_with(current, previous, now, |_| {}).await
    }

    /// Like [`Reconciler::reconcile`], handing each action report to
    /// `on_action` as soon as its address is done.
    pub async fn reconcile_with<F>(
        &self,
        current: &LeaseSet,
        previous: &Snapshot,
        now: DateTime<Utc>,
        mut on_action: F,
    ) -> RunReport
    where
        F: FnMut(&ActionReport),
    {
        let mut report = RunReport::new(now, self.options.mode, self.options.dry_run);
        report.duplicate_records = current.duplicates();

        for action in classify(current, previous, now) {
            log_action(&action);

            let outcome = if action.is_suppressed_by(self.options.mode) {
                debug!(
                    "{} for {} suppressed by {} mode",
                    action.kind(),
                    action.address(),
                    self.options.mode
                );
                Outcome::Skipped
            } else if let Action::NoOp(address) = action {
                self.noop_outcome(current, previous, address).await
            } else {
                self.applier.apply(&action).await
            };

            let entry = ActionReport {
                address: action.address(),
                kind: action.kind(),
                detail: action.detail(),
                outcome,
            };
            on_action(&entry);
            report.actions.push(entry);
        }

        report
    }

    /// A no-op still carries a renewed expiry into the snapshot, except in
    /// expired-only runs, which never write current addresses.
    async fn noop_outcome(
        &self,
        current: &LeaseSet,
        previous: &Snapshot,
        address: IpAddr,
    ) -> Outcome {
        if self.options.mode == RunMode::ExpiredOnly {
            return Outcome::Unchanged;
        }

        match (current.get(&address), previous.get(&address)) {
            (Some(record), Some(old)) if record.expires_at != old.expires_at => {
                self.applier.refresh_expiry(record).await
            }
            _ => Outcome::Unchanged,
        }
    }
}

fn log_action(action: &Action) {
    match action {
        Action::NoOp(address) => debug!("Unchanged: {}", address),
        Action::Create(record) => info!("New lease: {} -> {}", record.address, record.hardware_id),
        Action::UpdateBinding(record, previous) => info!(
            "Reassigned: {} {} -> {}",
            record.address, previous.hardware_id, record.hardware_id
        ),
        Action::UpdateLabel(record, previous) => info!(
            "Hostname changed: {} {:?} -> {:?}",
            record.address, previous.label, record.label
        ),
        Action::Expire(address, _) => warn!("Expired: {}", address),
    }
}
