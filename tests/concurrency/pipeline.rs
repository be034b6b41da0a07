//! Obligations through lock plan, locking and version validation

use crate::common::*;
use tailordb::concurrency::{validate_versions, ConflictType};

fn obligation(relation: &str, key: u64, kind: OperationKind, observed: Option<u64>) -> ValidationObligation {
    ValidationObligation {
        statement: StatementRef::new(TemplateId(0), 0),
        relation: relation.to_string(),
        key,
        kind,
        observed_version: observed,
    }
}

fn locks() -> LockTable {
    LockTable::new(["orders", "stock"], LockTableConfig::default()).unwrap()
}

#[test]
fn read_then_write_of_one_key_locks_once_exclusively() {
    let mut set = ObligationSet::new();
    set.record(obligation("stock", 1, OperationKind::Read, Some(2)), true, true);
    set.record(obligation("stock", 1, OperationKind::Write, Some(2)), true, true);
    set.record(obligation("orders", 4, OperationKind::Read, None), true, false);

    let si = set.lock_plan(ValidationProtocol::SiTailor);
    assert_eq!(si.len(), 1);
    assert_eq!(si[0].kind, LockKind::Exclusive);

    let rc = set.lock_plan(ValidationProtocol::RcTailor);
    assert_eq!(
        rc.iter().map(|r| (r.relation.as_str(), r.key, r.kind)).collect::<Vec<_>>(),
        vec![("orders", 4, LockKind::Shared), ("stock", 1, LockKind::Exclusive)]
    );
}

#[test]
fn read_of_own_write_is_not_recorded_again() {
    let mut set = ObligationSet::new();
    set.record(obligation("stock", 1, OperationKind::Write, Some(2)), false, true);
    set.record(obligation("stock", 1, OperationKind::Read, Some(3)), false, true);
    assert_eq!(set.for_protocol(ValidationProtocol::SiTailor).len(), 1);
}

#[test]
fn unchanged_versions_validate() {
    let locks = locks();
    locks.relation("stock").unwrap().update_version(1, 2);

    let mut set = ObligationSet::new();
    set.record(obligation("stock", 1, OperationKind::Read, Some(2)), false, true);
    // never-existing row: nothing to compare
    set.record(obligation("orders", 9, OperationKind::Read, None), false, true);

    let plan = set.lock_plan(ValidationProtocol::SiTailor);
    let (held, locked) = HeldLocks::acquire(&locks, &plan, 1, ValidationProtocol::SiTailor).unwrap();
    assert!(locked.is_valid());
    assert_eq!(held.len(), 2);

    let checked = validate_versions(&locks, set.for_protocol(ValidationProtocol::SiTailor), |_, _| {
        panic!("warm cache must not hit the store")
    })
    .unwrap();
    assert!(checked.is_valid());
    held.release_committed().unwrap();
}

#[test]
fn changed_version_is_a_mismatch() {
    let locks = locks();
    let stock = locks.relation("stock").unwrap();
    stock.update_version(1, 2);

    let mut set = ObligationSet::new();
    set.record(obligation("stock", 1, OperationKind::Read, Some(2)), true, true);

    // a concurrent writer commits in between
    stock.update_version(1, 3);

    let checked = validate_versions(&locks, set.for_protocol(ValidationProtocol::RcTailor), |_, _| Ok(None)).unwrap();
    assert_eq!(checked.version_mismatches(), 1);
    assert_eq!(
        checked.conflicts[0],
        ConflictType::VersionMismatch {
            relation: "stock".to_string(),
            key: 1,
            observed: 2,
            current: 3,
        }
    );
    let err = checked.into_result().unwrap_err();
    assert!(err.is_conflict());
    assert!(err.to_string().contains("observed 2, current 3"));
}

#[test]
fn cold_cache_falls_back_to_store() {
    let locks = locks();
    let mut set = ObligationSet::new();
    set.record(obligation("orders", 5, OperationKind::Read, Some(1)), true, false);

    let mut asked = Vec::new();
    let checked = validate_versions(&locks, set.for_protocol(ValidationProtocol::RcTailor), |relation, key| {
        asked.push((relation.to_string(), key));
        Ok(Some(4))
    })
    .unwrap();

    assert_eq!(asked, vec![("orders".to_string(), 5)]);
    assert_eq!(checked.version_mismatches(), 1);
    assert_eq!(locks.relation("orders").unwrap().read_version(5), Some(4));
}

#[test]
fn refused_lock_releases_what_was_taken() {
    let locks = locks();
    // another transaction holds stock/1 exclusively
    locks
        .relation("stock")
        .unwrap()
        .try_lock(1, 50, LockKind::Exclusive, ValidationProtocol::SiTailor);

    let mut set = ObligationSet::new();
    set.record(obligation("orders", 2, OperationKind::Write, Some(1)), false, true);
    set.record(obligation("stock", 1, OperationKind::Read, Some(1)), false, true);

    let plan = set.lock_plan(ValidationProtocol::SiTailor);
    let (held, result) = HeldLocks::acquire(&locks, &plan, 60, ValidationProtocol::SiTailor).unwrap();
    assert!(held.is_empty());
    assert_eq!(result.lock_conflicts(), 1);
    assert!(result.conflicts[0].is_lock_conflict());
    assert_eq!(locks.relation("orders").unwrap().snapshot(2).unwrap().count(), 0);
}
