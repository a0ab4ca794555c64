use std::collections::BTreeSet;
use std::net::{IpAddr, Ipv4Addr};

use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use proptest::prelude::*;

use leasesync::{
    Action, ActionKind, InventoryClient, LeaseRecord, LeaseSet, MemoryInventory,
    MemorySnapshotStore, Outcome, ReconcileOptions, Reconciler, RunMode, Snapshot,
    SnapshotStore, classify,
};

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
}

fn block_on<F: std::future::Future>(future: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
        .block_on(future)
}

/// Records drawn from a small address pool so current and previous overlap.
fn lease_record() -> impl Strategy<Value = LeaseRecord> {
    (
        0u8..24,
        prop::sample::select(vec!["aa:aa", "bb:bb", "cc:cc"]),
        prop::sample::select(vec!["", "h1", "h2"]),
        prop::option::of(-48i64..48),
    )
        .prop_map(|(host, hardware_id, label, expiry_hours)| LeaseRecord {
            address: IpAddr::V4(Ipv4Addr::new(10, 0, 0, host)),
            hardware_id: hardware_id.to_string(),
            label: label.to_string(),
            expires_at: expiry_hours.map(|hours| now() + TimeDelta::hours(hours)),
        })
}

fn lease_set() -> impl Strategy<Value = LeaseSet> {
    prop::collection::vec(lease_record(), 0..20).prop_map(|records| records.into_iter().collect())
}

fn snapshot() -> impl Strategy<Value = Snapshot> {
    prop::collection::vec(lease_record(), 0..20).prop_map(|records| {
        records
            .into_iter()
            .map(|record| (record.address, record))
            .collect()
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(512))]

    #[test]
    fn one_action_per_address_in_union(current in lease_set(), previous in snapshot()) {
        let actions = classify(&current, &previous, now());

        let expected: BTreeSet<IpAddr> = current
            .iter()
            .map(|record| record.address)
            .chain(previous.keys().copied())
            .collect();
        let seen: BTreeSet<IpAddr> = actions.iter().map(Action::address).collect();

        prop_assert_eq!(actions.len(), expected.len());
        prop_assert_eq!(seen, expected);
    }

    #[test]
    fn new_addresses_always_create(current in lease_set(), previous in snapshot()) {
        for action in classify(&current, &previous, now()) {
            let address = action.address();
            if current.contains(&address) && !previous.contains_key(&address) {
                prop_assert_eq!(action.kind(), ActionKind::Create);
            }
        }
    }

    #[test]
    fn changed_hardware_always_updates_binding(current in lease_set(), previous in snapshot()) {
        for action in classify(&current, &previous, now()) {
            let address = action.address();
            if let (Some(record), Some(old)) = (current.get(&address), previous.get(&address))
                && record.hardware_id != old.hardware_id
            {
                prop_assert_eq!(action.kind(), ActionKind::UpdateBinding);
            }
        }
    }

    #[test]
    fn expire_only_for_vanished_and_expired(current in lease_set(), previous in snapshot()) {
        for action in classify(&current, &previous, now()) {
            let address = action.address();
            let vanished_and_expired = !current.contains(&address)
                && previous.get(&address).is_some_and(|old| old.is_expired_at(now()));
            prop_assert_eq!(action.kind() == ActionKind::Expire, vanished_and_expired);
        }
    }

    #[test]
    fn unchanged_bindings_make_no_external_calls(records in prop::collection::vec(lease_record(), 0..20)) {
        let current: LeaseSet = records.into_iter().collect();
        let previous: Snapshot = current
            .iter()
            .map(|record| (record.address, record.clone()))
            .collect();

        let inventory = MemoryInventory::new();
        let store = MemorySnapshotStore::new();
        let reconciler = Reconciler::new(ReconcileOptions::default(), &store, &inventory);
        let report = block_on(reconciler.reconcile(&current, &previous, now()));

        prop_assert_eq!(report.count(ActionKind::NoOp), current.len());
        prop_assert_eq!(block_on(inventory.calls()), 0);
    }

    #[test]
    fn dry_run_writes_nothing_and_matches_live_classification(
        current in lease_set(),
        previous in snapshot(),
        mode in prop::sample::select(vec![RunMode::Full, RunMode::NewOnly, RunMode::ExpiredOnly]),
    ) {
        let dry_store = MemorySnapshotStore::with_entries(previous.values().cloned());
        let dry_inventory = MemoryInventory::new();
        let dry = Reconciler::new(ReconcileOptions { mode, dry_run: true }, &dry_store, &dry_inventory);
        let dry_report = block_on(dry.reconcile(&current, &previous, now()));

        let live_store = MemorySnapshotStore::with_entries(previous.values().cloned());
        let live_inventory = MemoryInventory::new();
        let live = Reconciler::new(ReconcileOptions { mode, dry_run: false }, &live_store, &live_inventory);
        let live_report = block_on(live.reconcile(&current, &previous, now()));

        prop_assert_eq!(block_on(dry_inventory.calls()), 0);
        prop_assert_eq!(block_on(dry_store.load_all()).unwrap(), previous);
        prop_assert_eq!(dry_report.classification(), live_report.classification());
        prop_assert!(!dry_report.actions.iter().any(|action| action.outcome == Outcome::Applied));
    }

    #[test]
    fn live_run_snapshot_matches_inventory(current in lease_set(), previous in snapshot()) {
        let store = MemorySnapshotStore::with_entries(previous.values().cloned());
        let inventory = MemoryInventory::new();
        let reconciler = Reconciler::new(ReconcileOptions::default(), &store, &inventory);
        let report = block_on(reconciler.reconcile(&current, &previous, now()));
        prop_assert!(!report.has_failures());

        let snapshot = block_on(store.load_all()).unwrap();
        for action in &report.actions {
            let address = action.address;
            match action.kind {
                ActionKind::Create | ActionKind::UpdateBinding | ActionKind::UpdateLabel => {
                    let pushed = block_on(inventory.record(&address)).unwrap();
                    prop_assert_eq!(snapshot.get(&address), Some(&pushed.lease));
                }
                ActionKind::Expire => prop_assert!(!snapshot.contains_key(&address)),
                ActionKind::NoOp => {}
            }
        }
    }

    #[test]
    fn upsert_twice_leaves_one_record(record in lease_record()) {
        let inventory = MemoryInventory::new();
        block_on(inventory.upsert(&record)).unwrap();
        block_on(inventory.upsert(&record)).unwrap();

        let records = block_on(inventory.records());
        prop_assert_eq!(records.len(), 1);
        prop_assert_eq!(&records[0].lease, &record);
    }
}
