use std::net::IpAddr;

use chrono::{DateTime, TimeDelta, TimeZone, Utc};

use leasesync::{
    ActionKind, ApplyFailure, InventoryClient, IscLeasesFile, JsonSnapshotStore, LeaseRecord,
    LeaseSync, MemoryInventory, MemorySnapshotStore, Outcome, ReconcileOptions, Result, RunMode,
    SnapshotEntry, SnapshotStore,
};
use leasesync::inventory::InventoryStatus;

struct TestGuard(Vec<String>);

impl Drop for TestGuard {
    fn drop(&mut self) {
        for path in &self.0 {
            let _ = std::fs::remove_file(path);
            let _ = std::fs::remove_file(format!("{}.tmp", path));
        }
    }
}

/// Inventory that shares state with a [`MemoryInventory`] owned by the test.
struct SharedInventory(std::sync::Arc<MemoryInventory>);

#[async_trait::async_trait]
impl InventoryClient for SharedInventory {
    async fn upsert(&self, record: &LeaseRecord) -> Result<()> {
        self.0.upsert(record).await
    }

    async fn retire(&self, address: IpAddr) -> Result<()> {
        self.0.retire(address).await
    }
}

fn ip(text: &str) -> IpAddr {
    text.parse().unwrap()
}

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()
}

fn sync_with(
    current: Vec<LeaseRecord>,
    previous: Vec<SnapshotEntry>,
    inventory: std::sync::Arc<MemoryInventory>,
    options: ReconcileOptions,
) -> LeaseSync {
    LeaseSync::new(
        Box::new(current),
        Box::new(MemorySnapshotStore::with_entries(previous)),
        Box::new(SharedInventory(inventory)),
        options,
    )
}

#[tokio::test]
async fn reassigned_address_updates_binding() {
    let previous = LeaseRecord::new(ip("10.0.0.5"), "AA")
        .with_label("h1")
        .with_expiry(t0());
    let current = LeaseRecord::new(ip("10.0.0.5"), "BB").with_label("h1");
    let inventory = std::sync::Arc::new(MemoryInventory::new());
    let sync = sync_with(
        vec![current],
        vec![previous],
        inventory.clone(),
        ReconcileOptions::default(),
    );

    let report = sync.run_at(t0() + TimeDelta::hours(1), |_| {}).await.unwrap();

    assert_eq!(report.actions.len(), 1);
    assert_eq!(report.actions[0].kind, ActionKind::UpdateBinding);
    assert_eq!(report.actions[0].outcome, Outcome::Applied);

    let snapshot = sync.store().load_all().await.unwrap();
    assert_eq!(snapshot[&ip("10.0.0.5")].hardware_id, "BB");
    assert_eq!(
        inventory.record(&ip("10.0.0.5")).await.unwrap().lease.hardware_id,
        "BB"
    );
}

#[tokio::test]
async fn new_address_is_created() {
    let inventory = std::sync::Arc::new(MemoryInventory::new());
    let sync = sync_with(
        vec![LeaseRecord::new(ip("10.0.0.9"), "CC").with_label("printer")],
        Vec::new(),
        inventory.clone(),
        ReconcileOptions::default(),
    );

    let report = sync.run_at(t0(), |_| {}).await.unwrap();

    assert_eq!(report.count(ActionKind::Create), 1);
    let snapshot = sync.store().load_all().await.unwrap();
    assert_eq!(snapshot[&ip("10.0.0.9")].label, "printer");
}

#[tokio::test]
async fn expired_address_is_retired_and_removed() {
    let expires_at = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
    let previous = LeaseRecord::new(ip("10.0.0.2"), "DD").with_expiry(expires_at);
    let inventory = std::sync::Arc::new(MemoryInventory::new());
    inventory.upsert(&previous).await.unwrap();

    let sync = sync_with(
        Vec::new(),
        vec![previous],
        inventory.clone(),
        ReconcileOptions::default(),
    );
    let report = sync.run_at(t0(), |_| {}).await.unwrap();

    assert_eq!(report.count(ActionKind::Expire), 1);
    assert_eq!(report.actions[0].outcome, Outcome::Applied);
    assert!(sync.store().load_all().await.unwrap().is_empty());
    assert_eq!(
        inventory.record(&ip("10.0.0.2")).await.unwrap().status,
        InventoryStatus::Retired
    );
}

#[tokio::test]
async fn unexpired_vanished_address_is_kept() {
    let previous = LeaseRecord::new(ip("10.0.0.3"), "EE").with_expiry(t0() + TimeDelta::hours(2));
    let inventory = std::sync::Arc::new(MemoryInventory::new());
    let sync = sync_with(
        Vec::new(),
        vec![previous.clone()],
        inventory.clone(),
        ReconcileOptions::default(),
    );

    let report = sync.run_at(t0(), |_| {}).await.unwrap();

    assert_eq!(report.count(ActionKind::NoOp), 1);
    assert_eq!(inventory.calls().await, 0);
    assert_eq!(
        sync.store().load_all().await.unwrap()[&ip("10.0.0.3")],
        previous
    );
}

#[tokio::test]
async fn failed_update_is_isolated() {
    let previous = vec![
        LeaseRecord::new(ip("10.0.0.5"), "AA").with_label("h1"),
        LeaseRecord::new(ip("10.0.0.6"), "FF").with_label("h6"),
    ];
    let current = vec![
        LeaseRecord::new(ip("10.0.0.5"), "BB").with_label("h1"),
        LeaseRecord::new(ip("10.0.0.6"), "FF").with_label("renamed"),
        LeaseRecord::new(ip("10.0.0.7"), "GG"),
    ];
    let inventory = std::sync::Arc::new(MemoryInventory::new());
    inventory.fail_address(ip("10.0.0.5")).await;
    let sync = sync_with(
        current,
        previous,
        inventory.clone(),
        ReconcileOptions::default(),
    );

    let report = sync.run_at(t0(), |_| {}).await.unwrap();

    assert_eq!(report.actions[0].kind, ActionKind::UpdateBinding);
    assert!(matches!(
        report.actions[0].outcome,
        Outcome::Failed {
            failure: ApplyFailure::Inventory(_)
        }
    ));
    assert_eq!(report.actions[1].outcome, Outcome::Applied);
    assert_eq!(report.actions[2].outcome, Outcome::Applied);
    assert!(report.has_failures());

    let snapshot = sync.store().load_all().await.unwrap();
    assert_eq!(snapshot[&ip("10.0.0.5")].hardware_id, "AA");
    assert_eq!(snapshot[&ip("10.0.0.6")].label, "renamed");
    assert!(snapshot.contains_key(&ip("10.0.0.7")));
}

#[tokio::test]
async fn failed_update_is_retried_next_run() {
    let previous = vec![LeaseRecord::new(ip("10.0.0.5"), "AA")];
    let current = vec![LeaseRecord::new(ip("10.0.0.5"), "BB")];
    let store = MemorySnapshotStore::with_entries(previous);
    let failing = MemoryInventory::new();
    failing.fail_address(ip("10.0.0.5")).await;

    let first = leasesync::Reconciler::new(ReconcileOptions::default(), &store, &failing);
    let current_set: leasesync::LeaseSet = current.into_iter().collect();
    let report = first
        .reconcile(&current_set, &store.load_all().await.unwrap(), t0())
        .await;
    assert!(report.has_failures());

    let healthy = MemoryInventory::new();
    let second = leasesync::Reconciler::new(ReconcileOptions::default(), &store, &healthy);
    let report = second
        .reconcile(&current_set, &store.load_all().await.unwrap(), t0())
        .await;
    assert_eq!(report.actions[0].kind, ActionKind::UpdateBinding);
    assert_eq!(report.actions[0].outcome, Outcome::Applied);
    assert_eq!(store.get(&ip("10.0.0.5")).await.unwrap().hardware_id, "BB");
}

#[tokio::test]
async fn snapshot_write_failure_is_reported_distinctly() {
    struct ReadOnlyStore;

    #[async_trait::async_trait]
    impl SnapshotStore for ReadOnlyStore {
        async fn load_all(&self) -> Result<leasesync::Snapshot> {
            Ok(leasesync::Snapshot::new())
        }

        async fn upsert(&self, entry: &SnapshotEntry) -> Result<()> {
            Err(leasesync::Error::StoreWrite {
                address: entry.address,
                reason: "read-only".to_string(),
            })
        }

        async fn delete(&self, address: IpAddr) -> Result<()> {
            Err(leasesync::Error::StoreWrite {
                address,
                reason: "read-only".to_string(),
            })
        }
    }

    let inventory = std::sync::Arc::new(MemoryInventory::new());
    let sync = LeaseSync::new(
        Box::new(vec![LeaseRecord::new(ip("10.0.0.8"), "HH")]),
        Box::new(ReadOnlyStore),
        Box::new(SharedInventory(inventory.clone())),
        ReconcileOptions::default(),
    );

    let report = sync.run_at(t0(), |_| {}).await.unwrap();

    assert_eq!(
        report.actions[0].outcome,
        Outcome::Failed {
            failure: ApplyFailure::SnapshotWrite("read-only".to_string())
        }
    );
    assert!(inventory.record(&ip("10.0.0.8")).await.is_some());
}

#[tokio::test]
async fn new_only_mode_never_expires() {
    let stale = LeaseRecord::new(ip("10.0.0.2"), "DD").with_expiry(t0() - TimeDelta::days(3));
    let inventory = std::sync::Arc::new(MemoryInventory::new());
    let sync = sync_with(
        vec![LeaseRecord::new(ip("10.0.0.9"), "CC")],
        vec![stale],
        inventory.clone(),
        ReconcileOptions {
            mode: RunMode::NewOnly,
            dry_run: false,
        },
    );

    let report = sync.run_at(t0(), |_| {}).await.unwrap();

    assert_eq!(report.actions[0].outcome, Outcome::Applied);
    assert_eq!(report.actions[1].kind, ActionKind::Expire);
    assert_eq!(report.actions[1].outcome, Outcome::Skipped);
    assert_eq!(sync.store().load_all().await.unwrap().len(), 2);
    assert_eq!(inventory.calls().await, 1);
}

#[tokio::test]
async fn dry_run_touches_nothing() {
    let stale = LeaseRecord::new(ip("10.0.0.2"), "DD").with_expiry(t0() - TimeDelta::days(3));
    let inventory = std::sync::Arc::new(MemoryInventory::new());
    let sync = sync_with(
        vec![LeaseRecord::new(ip("10.0.0.9"), "CC")],
        vec![stale.clone()],
        inventory.clone(),
        ReconcileOptions {
            mode: RunMode::Full,
            dry_run: true,
        },
    );

    let mut streamed = 0;
    let report = sync.run_at(t0(), |_| streamed += 1).await.unwrap();

    assert_eq!(streamed, 2);
    assert_eq!(report.count(ActionKind::Create), 1);
    assert_eq!(report.count(ActionKind::Expire), 1);
    assert!(report.actions.iter().all(|action| action.outcome == Outcome::Planned));
    assert_eq!(inventory.calls().await, 0);

    let snapshot = sync.store().load_all().await.unwrap();
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot[&ip("10.0.0.2")], stale);
}

#[tokio::test]
async fn isc_file_to_json_snapshot_end_to_end() {
    let leases_path = "test_e2e_dhcpd.leases".to_string();
    let snapshot_path = "test_e2e_snapshot.json".to_string();
    let _guard = TestGuard(vec![leases_path.clone(), snapshot_path.clone()]);

    std::fs::write(
        &leases_path,
        r#"
lease 10.0.0.9 {
  ends 3 2024/06/01 12:00:00;
  hardware ethernet CC:CC:CC:CC:CC:CC;
  client-hostname "printer";
}
lease 10.0.0.9 {
  ends 3 2024/06/01 18:00:00;
  hardware ethernet cc:cc:cc:cc:cc:cc;
  client-hostname "printer-2";
}
"#,
    )
    .unwrap();

    let inventory = std::sync::Arc::new(MemoryInventory::new());
    let build = |inventory: std::sync::Arc<MemoryInventory>| {
        let leases_path = leases_path.clone();
        let snapshot_path = snapshot_path.clone();
        async move {
            LeaseSync::new(
                Box::new(IscLeasesFile::new(&leases_path)),
                Box::new(JsonSnapshotStore::open(&snapshot_path).await.unwrap()),
                Box::new(SharedInventory(inventory)),
                ReconcileOptions::default(),
            )
        }
    };

    let report = build(inventory.clone())
        .await
        .run_at(t0(), |_| {})
        .await
        .unwrap();
    assert_eq!(report.duplicate_records, 1);
    assert_eq!(report.count(ActionKind::Create), 1);

    let reopened = JsonSnapshotStore::open(&snapshot_path).await.unwrap();
    let snapshot = reopened.load_all().await.unwrap();
    assert_eq!(snapshot[&ip("10.0.0.9")].label, "printer-2");
    assert_eq!(snapshot[&ip("10.0.0.9")].hardware_id, "cc:cc:cc:cc:cc:cc");

    let report = build(inventory.clone())
        .await
        .run_at(t0(), |_| {})
        .await
        .unwrap();
    assert_eq!(report.count(ActionKind::NoOp), 1);
    assert_eq!(inventory.calls().await, 1);
}
