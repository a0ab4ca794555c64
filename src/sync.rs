//! Run orchestration: read leases, load the snapshot, reconcile, report.
//!
//! Reading the lease source and loading the snapshot both happen before any
//! action is classified; a failure in either aborts the run with nothing
//! applied.

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::config::Config;
use crate::error::Result;
use crate::inventory::{InventoryClient, NetBoxClient};
use crate::lease::LeaseSet;
use crate::reconcile::{ReconcileOptions, Reconciler};
use crate::report::{ActionReport, RunReport};
use crate::snapshot::{JsonSnapshotStore, SnapshotStore};
use crate::source::{IscLeasesFile, LeaseSource};

/// One configured sync pipeline: a lease source, a snapshot store and an
/// inventory client.
pub struct LeaseSync {
    source: Box<dyn LeaseSource>,
    store: Box<dyn SnapshotStore>,
    client: Box<dyn InventoryClient>,
    options: ReconcileOptions,
}

impl LeaseSync {
    pub fn new(
        source: Box<dyn LeaseSource>,
        store: Box<dyn SnapshotStore>,
        client: Box<dyn InventoryClient>,
        options: ReconcileOptions,
    ) -> Self {
        Self {
            source,
            store,
            client,
            options,
        }
    }

    /// Builds the ISC lease file / JSON snapshot / NetBox pipeline described
    /// by `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid, the snapshot cannot
    /// be opened, or the NetBox client cannot be built.
    pub async fn from_config(config: &Config) -> Result<Self> {
        config.validate()?;

        let source = IscLeasesFile::new(&config.leases_file);
        let store = JsonSnapshotStore::open(&config.snapshot_file).await?;
        let client = NetBoxClient::new(&config.netbox)?;

        let options = ReconcileOptions {
            mode: config.mode,
            dry_run: config.dry_run,
        };

        Ok(Self::new(
            Box::new(source),
            Box::new(store),
            Box::new(client),
            options,
        ))
    }

    pub fn store(&self) -> &dyn SnapshotStore {
        self.store.as_ref()
    }

    /// Runs one reconciliation against the current time.
    pub async fn run(&self) -> Result<RunReport> {
        self.run_at(Utc::now(), |_| {}).await
    }

    /// Runs one reconciliation with every expiry decision made against
    /// `now`, handing each action report to `on_action` as it completes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SourceRead`](crate::Error::SourceRead) or
    /// [`Error::StoreRead`](crate::Error::StoreRead); per-address failures
    /// are recorded in the report instead.
    pub async fn run_at<F>(&self, now: DateTime<Utc>, on_action: F) -> Result<RunReport>
    where
        F: FnMut(&ActionReport),
    {
        info!(
            "Starting lease sync ({} mode{})",
            self.options.mode,
            if self.options.dry_run { ", dry run" } else { "" }
        );

        let current: LeaseSet = self.source.read().await?.into_iter().collect();
        let previous = self.store.load_all().await?;

        info!(
            "{} current lease(s), {} snapshot entries",
            current.len(),
            previous.len()
        );
        if current.duplicates() > 0 {
            warn!(
                "{} duplicate lease record(s) superseded by later records",
                current.duplicates()
            );
        }

        let reconciler = Reconciler::new(self.options, self.store.as_ref(), self.client.as_ref());
        let report = reconciler
            .reconcile_with(&current, &previous, now, on_action)
            .await;

        if report.has_failures() {
            warn!("Finished lease sync with failures: {}", report.summary());
        } else {
            info!("Finished lease sync: {}", report.summary());
        }

        Ok(report)
    }
}
