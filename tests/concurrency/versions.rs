//! Version cache behavior

use proptest::prelude::*;

use crate::common::*;
use tailordb::concurrency::{validate_versions, LockRequest};

fn table() -> LockTable {
    LockTable::new(["stock"], LockTableConfig::default()).unwrap()
}

fn exclusive(key: u64) -> Vec<LockRequest> {
    vec![LockRequest {
        relation: "stock".to_string(),
        key,
        kind: LockKind::Exclusive,
    }]
}

#[test]
fn each_exclusive_commit_advances_version_by_one() {
    let locks = table();
    let stock = locks.relation("stock").unwrap();
    stock.update_version(3, 10);

    for txn in 1..=25u64 {
        let (held, result) =
            HeldLocks::acquire(&locks, &exclusive(3), txn, ValidationProtocol::SiTailor).unwrap();
        assert!(result.is_valid());
        held.release_committed().unwrap();
    }

    assert_eq!(stock.read_version(3), Some(35));
    assert_eq!(stock.snapshot(3).unwrap().count(), 0);
}

#[test]
fn aborted_and_shared_releases_leave_version_alone() {
    let locks = table();
    let stock = locks.relation("stock").unwrap();
    stock.update_version(1, 4);

    let (held, _) = HeldLocks::acquire(&locks, &exclusive(1), 1, ValidationProtocol::RcTailor).unwrap();
    held.release_aborted().unwrap();

    let shared = vec![LockRequest {
        relation: "stock".to_string(),
        key: 1,
        kind: LockKind::Shared,
    }];
    let (held, _) = HeldLocks::acquire(&locks, &shared, 2, ValidationProtocol::RcTailor).unwrap();
    held.release_committed().unwrap();

    // dropped guard releases without advancing
    {
        let _held = HeldLocks::acquire(&locks, &exclusive(1), 3, ValidationProtocol::RcTailor).unwrap();
    }

    assert_eq!(stock.read_version(1), Some(4));
    assert_eq!(stock.snapshot(1).unwrap().count(), 0);
}

#[test]
fn unknown_version_is_not_invented() {
    let locks = table();
    let (held, _) = HeldLocks::acquire(&locks, &exclusive(8), 1, ValidationProtocol::SiTailor).unwrap();
    held.release_committed().unwrap();
    assert_eq!(locks.relation("stock").unwrap().read_version(8), None);
}

#[test]
fn fetch_fills_cold_cache_once() {
    let locks = table();
    let stock = locks.relation("stock").unwrap();
    let mut fetches = 0;

    for _ in 0..3 {
        let v = stock
            .fetch_and_cache_version(2, || {
                fetches += 1;
                Ok(Some(6))
            })
            .unwrap();
        assert_eq!(v, Some(6));
    }
    assert_eq!(fetches, 1);

    // missing rows are not cached
    let missing = stock.fetch_and_cache_version(99, || Ok(None)).unwrap();
    assert_eq!(missing, None);
    assert_eq!(stock.read_version(99), None);
}

#[test]
fn crowded_bucket_keeps_latest_commit_for_validation() {
    let config = LockTableConfig {
        bucket_count: 1,
        prune_threshold: 4,
        wait: LockWaitConfig::no_wait(),
    };
    let locks = LockTable::new(["stock"], config).unwrap();
    let stock = locks.relation("stock").unwrap();

    // reader saw version 1, a writer has since committed version 2
    stock.observe_version(7, 1);
    stock.update_version(7, 2);

    for key in 100..110u64 {
        stock.try_lock(key, key, LockKind::Shared, ValidationProtocol::SiTailor);
        stock.release(key, LockKind::Shared).unwrap();
    }
    stock.observe_version(7, 1);
    assert_eq!(stock.read_version(7), Some(2));

    let stale_read = ValidationObligation {
        statement: StatementRef::new(TemplateId(0), 0),
        relation: "stock".to_string(),
        key: 7,
        kind: OperationKind::Read,
        observed_version: Some(1),
    };
    let result = validate_versions(&locks, &[stale_read], |_, _| {
        panic!("cached key must not be fetched")
    })
    .unwrap();
    assert!(!result.is_valid());
    assert_eq!(result.version_mismatches(), 1);
}

proptest! {
    /// The cached version only moves forward
    #[test]
    fn prop_update_version_is_monotonic(
        updates in proptest::collection::vec(0u64..1_000, 1..50),
        observed in 0u64..1_000,
    ) {
        let locks = table();
        let stock = locks.relation("stock").unwrap();
        let mut expected = None;
        for v in updates {
            stock.update_version(7, v);
            // observe never overrides a warm entry
            stock.observe_version(7, observed);
            expected = Some(expected.map_or(v, |e: u64| e.max(v)));
            prop_assert_eq!(stock.read_version(7), expected);
        }
    }
}
