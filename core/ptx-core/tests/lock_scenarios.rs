// 단일 노드 잠금 시나리오: No-Wait, Wait-Die, 용량 초과

mod common;

use common::{Cluster, shared_clock};
use ptx_core::storage::Partitioner;
use ptx_core::{CcScheme, Key, NodeId, PartitionKind, PtxError, PtxResult, Table, TxnOutcome};
use std::sync::Arc;
use std::time::Duration;

fn setup(scheme: CcScheme) -> PtxResult<(Cluster, Arc<Table<u64>>)> {
    let cluster = Cluster::new(1, 2, scheme)?;
    let table = cluster
        .node(0)
        .make_table::<u64>("items", 8, PartitionKind::Replicated)?;
    table.populate(8, |k| k.0 * 10)?;
    Ok((cluster, table))
}

#[test]
fn test_no_wait_second_writer_rolls_back() -> PtxResult<()> {
    let (cluster, table) = setup(CcScheme::NoWait)?;
    let db = cluster.node(0);
    let mut t1 = db.transaction(0)?;
    let mut t2 = db.transaction(1)?;

    t1.begin()?;
    t2.begin()?;
    let held = t1.write(&table, Key(3))?.expect("first writer wins");
    held.set(99)?;

    // 두 번째 writer는 즉시 실패
    assert!(t2.write(&table, Key(3))?.is_none());
    assert_eq!(t2.rollback()?, TxnOutcome::RolledBack);

    assert_eq!(t1.commit()?, TxnOutcome::Committed);
    assert_eq!(table.peek(Key(3)), Some(99));
    assert_eq!(cluster.verify(), 0);
    Ok(())
}

#[test]
fn test_no_wait_readers_share() -> PtxResult<()> {
    let (cluster, table) = setup(CcScheme::NoWait)?;
    let db = cluster.node(0);
    let mut t1 = db.transaction(0)?;
    let mut t2 = db.transaction(1)?;

    t1.begin()?;
    t2.begin()?;
    assert_eq!(t1.read(&table, Key(1))?.map(|f| f.get()).transpose()?, Some(10));
    assert_eq!(t2.read(&table, Key(1))?.map(|f| f.get()).transpose()?, Some(10));
    assert!(t2.write(&table, Key(1))?.is_none());

    let _ = t1.commit()?;
    let _ = t2.rollback()?;
    assert_eq!(cluster.verify(), 0);
    Ok(())
}

#[test]
fn test_wait_die_older_waits_for_younger() -> PtxResult<()> {
    let (cluster, table) = setup(CcScheme::WaitDie)?;
    let db = cluster.node(0);
    let source = shared_clock();
    let mut older = db.transaction_with(1, source.clone())?;
    let mut younger = db.transaction_with(0, source)?;

    let ts_old = older.begin()?;
    let ts_young = younger.begin()?;
    assert!(ts_old < ts_young);

    let held = younger.write(&table, Key(0))?.expect("row is free");
    held.set(7)?;

    std::thread::scope(|s| -> PtxResult<()> {
        let waiter = s.spawn(|| -> PtxResult<Option<u64>> {
            let value = older.write(&table, Key(0))?.map(|f| f.get()).transpose()?;
            let _ = older.commit()?;
            Ok(value)
        });

        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(younger.commit()?, TxnOutcome::Committed);

        // 더 오래된 트랜잭션은 대기 후 승인
        let seen = waiter.join().expect("waiter panicked")?;
        assert_eq!(seen, Some(7));
        Ok(())
    })?;

    assert_eq!(cluster.verify(), 0);
    Ok(())
}

#[test]
fn test_wait_die_younger_dies() -> PtxResult<()> {
    let (cluster, table) = setup(CcScheme::WaitDie)?;
    let db = cluster.node(0);
    let source = shared_clock();
    let mut older = db.transaction_with(0, source.clone())?;
    let mut younger = db.transaction_with(1, source)?;

    older.begin()?;
    younger.begin()?;
    assert!(older.write(&table, Key(5))?.is_some());

    assert!(younger.write(&table, Key(5))?.is_none());
    assert_eq!(younger.rollback()?, TxnOutcome::RolledBack);
    assert_eq!(older.commit()?, TxnOutcome::Committed);
    assert_eq!(cluster.verify(), 0);
    Ok(())
}

#[test]
fn test_wait_die_queued_waiter_killed_by_older_arrival() -> PtxResult<()> {
    let cluster = Cluster::new(1, 3, CcScheme::WaitDie)?;
    let db = cluster.node(0);
    let table = db.make_table::<u64>("items", 8, PartitionKind::Replicated)?;
    table.populate(8, |k| k.0 * 10)?;
    let source = shared_clock();
    let mut oldest = db.transaction_with(0, source.clone())?;
    let mut middle = db.transaction_with(2, source.clone())?;
    let mut youngest = db.transaction_with(1, source)?;

    oldest.begin()?;
    middle.begin()?;
    youngest.begin()?;
    let held = youngest.write(&table, Key(4))?.expect("row is free");
    held.set(1)?;

    std::thread::scope(|s| -> PtxResult<()> {
        let queued = s.spawn(|| -> PtxResult<(bool, usize)> {
            let granted = middle.write(&table, Key(4))?.is_some();
            let _ = middle.rollback()?;
            Ok((granted, middle.undo_len()))
        });
        std::thread::sleep(Duration::from_millis(50));
        let survivor = s.spawn(|| -> PtxResult<Option<u64>> {
            let value = oldest.write(&table, Key(4))?.map(|f| f.get()).transpose()?;
            let _ = oldest.commit()?;
            Ok(value)
        });
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(youngest.commit()?, TxnOutcome::Committed);

        // 새 소유자보다 젊은 대기자는 해제 시점에 중단
        let (granted, undo_left) = queued.join().expect("waiter panicked")?;
        assert!(!granted);
        assert_eq!(undo_left, 0);
        assert_eq!(survivor.join().expect("waiter panicked")?, Some(1));
        Ok(())
    })?;

    assert_eq!(table.peek(Key(4)), Some(1));
    assert_eq!(cluster.verify(), 0);
    Ok(())
}

#[test]
fn test_none_scheme_never_blocks() -> PtxResult<()> {
    let (cluster, table) = setup(CcScheme::None)?;
    let db = cluster.node(0);
    let mut t1 = db.transaction(0)?;
    let mut t2 = db.transaction(1)?;

    t1.begin()?;
    t2.begin()?;
    assert!(t1.write(&table, Key(2))?.is_some());
    assert!(t2.write(&table, Key(2))?.is_some());
    let _ = t1.commit()?;
    let _ = t2.commit()?;
    assert_eq!(cluster.verify(), 0);
    Ok(())
}

#[test]
fn test_insert_into_full_table() -> PtxResult<()> {
    let (cluster, table) = setup(CcScheme::NoWait)?;
    let db = cluster.node(0);
    let mut txn = db.transaction(0)?;

    txn.begin()?;
    let err = txn.insert(&table).unwrap_err();
    assert!(matches!(err, PtxError::TableFull { capacity: 8, .. }));
    assert_eq!(table.len(), 8);
    let _ = txn.rollback()?;
    assert_eq!(cluster.verify(), 0);
    Ok(())
}

#[test]
fn test_missing_row_is_refused() -> PtxResult<()> {
    let cluster = Cluster::new(1, 1, CcScheme::NoWait)?;
    let db = cluster.node(0);
    let table = db.make_table::<u64>("sparse", 8, PartitionKind::Replicated)?;
    table.populate(2, |_| 0)?;

    let mut txn = db.transaction(0)?;
    txn.begin()?;
    assert!(txn.read(&table, Key(6))?.is_none());
    let _ = txn.rollback()?;
    Ok(())
}

#[test]
fn test_range_key_outside_table_is_refused() -> PtxResult<()> {
    assert!(matches!(
        Partitioner::range(0, NodeId(0), 2, NodeId(2), 0),
        Err(PtxError::Partition(_))
    ));

    let cluster = Cluster::new(2, 1, CcScheme::NoWait)?;
    let db = cluster.node(0);
    assert!(db.make_table::<u64>("empty", 0, PartitionKind::Range).is_err());
    let table = db.make_table::<u64>("ranged", 8, PartitionKind::Range)?;
    table.populate(8, |k| k.0)?;
    assert!(!table.contains(Key(8)));
    assert!(table.row(Key(8)).is_none());

    // 범위 밖 키는 스위치로 보내지 않고 거절
    let mut txn = db.transaction(0)?;
    txn.begin()?;
    assert!(txn.read(&table, Key(8))?.is_none());
    assert!(txn.write(&table, Key(u64::MAX))?.is_none());
    assert_eq!(txn.undo_len(), 0);
    assert_eq!(txn.rollback()?, TxnOutcome::RolledBack);
    assert_eq!(db.handler().open_futures(), 0);
    assert_eq!(cluster.verify(), 0);
    Ok(())
}
