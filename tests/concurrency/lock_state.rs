//! Lock state machine behavior through the lock table

use proptest::prelude::*;

use crate::common::*;
use tailordb::concurrency::{AcquireOutcome, HolderKind, RelationLockTable};

fn table() -> RelationLockTable {
    RelationLockTable::new("accounts", LockTableConfig::default()).unwrap()
}

#[test]
fn exclusive_holder_turns_reader_away_under_si() {
    let accounts = table();
    assert_eq!(
        accounts.try_lock(5, 1, LockKind::Exclusive, ValidationProtocol::SiTailor),
        LockOutcome::Granted
    );
    // must be ABORT, never WAIT
    assert_eq!(
        accounts.try_lock(5, 2, LockKind::Shared, ValidationProtocol::SiTailor),
        LockOutcome::Abort
    );
    assert_eq!(
        accounts.acquire(5, 2, LockKind::Shared, ValidationProtocol::SiTailor),
        AcquireOutcome::Aborted
    );

    let entry = accounts.snapshot(5).unwrap();
    assert_eq!(entry.holder(), HolderKind::Exclusive);
    assert_eq!(entry.count(), 1);
    assert!(entry.is_contended());
}

#[test]
fn exclusive_holder_turns_reader_away_under_rc() {
    let accounts = table();
    accounts.try_lock(5, 3, LockKind::Exclusive, ValidationProtocol::RcTailor);
    assert_eq!(
        accounts.try_lock(5, 2, LockKind::Shared, ValidationProtocol::RcTailor),
        LockOutcome::Abort
    );
    assert_eq!(accounts.snapshot(5).unwrap().min_read_wait(), Some(2));
}

#[test]
fn writers_share_under_rc_only() {
    let accounts = table();
    accounts.try_lock(1, 1, LockKind::Exclusive, ValidationProtocol::RcTailor);
    assert_eq!(
        accounts.try_lock(1, 2, LockKind::Exclusive, ValidationProtocol::RcTailor),
        LockOutcome::Granted
    );
    assert_eq!(accounts.snapshot(1).unwrap().count(), 2);

    accounts.try_lock(2, 1, LockKind::Exclusive, ValidationProtocol::SiTailor);
    assert_eq!(
        accounts.try_lock(2, 2, LockKind::Exclusive, ValidationProtocol::SiTailor),
        LockOutcome::Abort
    );
}

#[test]
fn younger_writer_waits_for_older_readers() {
    let accounts = table();
    accounts.try_lock(9, 4, LockKind::Shared, ValidationProtocol::SiTailor);
    assert_eq!(
        accounts.try_lock(9, 7, LockKind::Exclusive, ValidationProtocol::SiTailor),
        LockOutcome::Wait
    );
    // an older writer than the youngest reader must abort
    assert_eq!(
        accounts.try_lock(9, 2, LockKind::Exclusive, ValidationProtocol::SiTailor),
        LockOutcome::Abort
    );
    // a reader younger than the pending writer yields to it
    assert_eq!(
        accounts.try_lock(9, 8, LockKind::Shared, ValidationProtocol::SiTailor),
        LockOutcome::Abort
    );
    // an older one may still join
    assert_eq!(
        accounts.try_lock(9, 3, LockKind::Shared, ValidationProtocol::SiTailor),
        LockOutcome::Granted
    );
}

#[test]
fn release_of_unheld_lock_is_internal_error() {
    let accounts = table();
    assert!(matches!(
        accounts.release(1, LockKind::Shared),
        Err(TailorError::Internal { .. })
    ));
    accounts.try_lock(1, 1, LockKind::Shared, ValidationProtocol::SiTailor);
    assert!(matches!(
        accounts.release(1, LockKind::Exclusive),
        Err(TailorError::Internal { .. })
    ));
    accounts.release(1, LockKind::Shared).unwrap();
    assert_eq!(accounts.snapshot(1).unwrap().holder(), HolderKind::None);
}

#[derive(Debug, Clone)]
enum Step {
    Lock { requester: u64, exclusive: bool },
    Release { pick: usize },
}

fn step() -> impl Strategy<Value = Step> {
    prop_oneof![
        3 => (1u64..32, any::<bool>()).prop_map(|(requester, exclusive)| Step::Lock { requester, exclusive }),
        2 => any::<usize>().prop_map(|pick| Step::Release { pick }),
    ]
}

proptest! {
    /// Holder kind and count stay coupled under any sequence of attempts
    #[test]
    fn prop_holder_and_count_stay_coupled(
        steps in proptest::collection::vec(step(), 1..64),
        rc in any::<bool>(),
    ) {
        let protocol = if rc { ValidationProtocol::RcTailor } else { ValidationProtocol::SiTailor };
        let mut lock = ValidationLock::default();
        let mut held: Vec<(u64, LockKind)> = Vec::new();

        for step in steps {
            match step {
                Step::Lock { requester, exclusive } => {
                    let kind = if exclusive { LockKind::Exclusive } else { LockKind::Shared };
                    if lock.try_lock(requester, kind, protocol) == LockOutcome::Granted {
                        held.push((requester, kind));
                    }
                }
                Step::Release { pick } => {
                    if held.is_empty() {
                        prop_assert!(lock.release(LockKind::Shared).is_err());
                        prop_assert!(lock.release(LockKind::Exclusive).is_err());
                    } else {
                        let (_, kind) = held.remove(pick % held.len());
                        prop_assert!(lock.release(kind).is_ok());
                    }
                }
            }

            prop_assert_eq!(lock.count() as usize, held.len());
            match lock.holder() {
                HolderKind::None => {
                    prop_assert!(held.is_empty());
                    prop_assert_eq!(lock.max_holder(), 0);
                }
                HolderKind::Shared => {
                    prop_assert!(held.iter().all(|(_, k)| *k == LockKind::Shared));
                }
                HolderKind::Exclusive => {
                    prop_assert!(held.iter().all(|(_, k)| *k == LockKind::Exclusive));
                    if protocol == ValidationProtocol::SiTailor {
                        prop_assert_eq!(lock.count(), 1);
                    }
                }
            }
            if let Some(youngest) = held.iter().map(|(r, _)| *r).max() {
                prop_assert!(lock.max_holder() >= youngest);
            }
        }
    }
}
