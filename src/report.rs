//! Per-run summary of what the engine decided and what happened.

use std::collections::BTreeMap;
use std::net::IpAddr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::RunMode;

/// Classification of one address, without its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    NoOp,
    Create,
    UpdateBinding,
    UpdateLabel,
    Expire,
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ActionKind::NoOp => "no-op",
            ActionKind::Create => "create",
            ActionKind::UpdateBinding => "update-binding",
            ActionKind::UpdateLabel => "update-label",
            ActionKind::Expire => "expire",
        };
        f.write_str(name)
    }
}

/// Why an action did not fully apply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "stage", content = "reason", rename_all = "snake_case")]
pub enum ApplyFailure {
    /// The inventory call failed; the snapshot was left untouched.
    Inventory(String),
    /// The inventory call succeeded but the snapshot write did not, so the
    /// two disagree until the next run.
    SnapshotWrite(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    /// Nothing to do for this address.
    Unchanged,
    /// Inventory and snapshot both updated.
    Applied,
    /// Dry run: would have been applied.
    Planned,
    /// Suppressed by the run mode.
    Skipped,
    Failed { failure: ApplyFailure },
}

impl Outcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, Outcome::Failed { .. })
    }
}

/// One address's classification and outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionReport {
    pub address: IpAddr,
    pub kind: ActionKind,
    /// Human-readable description of the change, e.g. `aa -> bb`.
    pub detail: String,
    pub outcome: Outcome,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    /// The single instant every expiry decision in the run was made against.
    pub now: DateTime<Utc>,
    pub mode: RunMode,
    pub dry_run: bool,
    /// Current records superseded by a later record for the same address.
    pub duplicate_records: usize,
    pub actions: Vec<ActionReport>,
}

impl RunReport {
    pub fn new(now: DateTime<Utc>, mode: RunMode, dry_run: bool) -> Self {
        Self {
            now,
            mode,
            dry_run,
            duplicate_records: 0,
            actions: Vec::new(),
        }
    }

    pub fn count(&self, kind: ActionKind) -> usize {
        self.actions
            .iter()
            .filter(|action| action.kind == kind)
            .count()
    }

    /// Number of addresses per classification, every kind included.
    pub fn counts(&self) -> BTreeMap<ActionKind, usize> {
        let mut counts: BTreeMap<ActionKind, usize> = [
            ActionKind::NoOp,
            ActionKind::Create,
            ActionKind::UpdateBinding,
            ActionKind::UpdateLabel,
            ActionKind::Expire,
        ]
        .into_iter()
        .map(|kind| (kind, 0))
        .collect();

        for action in &self.actions {
            *counts.entry(action.kind).or_default() += 1;
        }
        counts
    }

    pub fn failures(&self) -> impl Iterator<Item = &ActionReport> {
        self.actions
            .iter()
            .filter(|action| action.outcome.is_failure())
    }

    pub fn has_failures(&self) -> bool {
        self.failures().next().is_some()
    }

    pub fn outcome_count(&self, outcome: &Outcome) -> usize {
        self.actions
            .iter()
            .filter(|action| &action.outcome == outcome)
            .count()
    }

    /// The classification part of the report: address, kind and detail in
    /// run order, without outcomes.
    pub fn classification(&self) -> Vec<(IpAddr, ActionKind, &str)> {
        self.actions
            .iter()
            .map(|action| (action.address, action.kind, action.detail.as_str()))
            .collect()
    }

    /// One-line summary suitable for a log sink.
    pub fn summary(&self) -> String {
        let counts = self.counts();
        format!(
            "{} {}run: {} create, {} update-binding, {} update-label, {} expire, {} no-op; {} applied, {} planned, {} skipped, {} failed",
            self.mode,
            if self.dry_run { "dry " } else { "" },
            counts[&ActionKind::Create],
            counts[&ActionKind::UpdateBinding],
            counts[&ActionKind::UpdateLabel],
            counts[&ActionKind::Expire],
            counts[&ActionKind::NoOp],
            self.outcome_count(&Outcome::Applied),
            self.outcome_count(&Outcome::Planned),
            self.outcome_count(&Outcome::Skipped),
            self.failures().count(),
        )
    }
}
