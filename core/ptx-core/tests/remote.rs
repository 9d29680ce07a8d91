// 원격 잠금: TupleGetReq/Res 와 TuplePutReq/Res 왕복

mod common;

use common::{Cluster, Outbox, eventually, shared_clock};
use ptx_core::comm::{MsgType, TupleMsgHeader};
use ptx_core::{
    AccessMode, CcScheme, Communicator, Database, EngineConfig, Key, NodeAddr, NodeId, Packet,
    PartitionKind, PtxError, PtxResult, Table, TableId, Timestamp, TxnOutcome,
};
use std::sync::Arc;
use std::time::Duration;

/// Two nodes, keys 0..4 on node 0 and 4..8 on node 1.
fn setup(scheme: CcScheme) -> PtxResult<(Cluster, Vec<Arc<Table<u64>>>)> {
    let cluster = Cluster::new(2, 2, scheme)?;
    let mut tables = Vec::new();
    for db in &cluster.nodes {
        let t = db.make_table::<u64>("stock", 8, PartitionKind::Range)?;
        t.populate(8, |k| 1000 + k.0)?;
        tables.push(t);
    }
    Ok((cluster, tables))
}

#[test]
fn test_remote_write_applied_on_owner() -> PtxResult<()> {
    let (cluster, tables) = setup(CcScheme::NoWait)?;
    let mut txn = cluster.node(0).transaction(0)?;

    txn.begin()?;
    let loc = tables[0].location(Key(5));
    assert!(!loc.is_local);
    assert_eq!(loc.target, NodeId(1));

    let remote = txn.write(&tables[0], Key(5))?.expect("row 5 is free");
    assert!(remote.is_remote());
    assert_eq!(remote.get()?, 1005);
    remote.update(|v| *v += 1)?;

    // 원격 쓰기는 commit 전에는 소유 노드에 보이지 않음
    assert_eq!(tables[1].peek(Key(5)), Some(1005));
    assert_eq!(tables[1].verify(), 1);

    assert_eq!(txn.commit()?, TxnOutcome::Committed);
    assert_eq!(tables[1].peek(Key(5)), Some(1006));
    assert_eq!(cluster.outstanding(), 0);
    assert_eq!(cluster.verify(), 0);
    assert_eq!(cluster.node(0).handler().open_futures(), 0);
    Ok(())
}

#[test]
fn test_remote_read_leaves_owner_unchanged() -> PtxResult<()> {
    let (cluster, tables) = setup(CcScheme::NoWait)?;
    let mut txn = cluster.node(1).transaction(1)?;

    txn.begin()?;
    let local = txn.write(&tables[1], Key(6))?.expect("local row is free");
    let remote = txn.read(&tables[1], Key(2))?.expect("remote row is free");
    local.set(remote.get()?)?;
    assert_eq!(txn.commit()?, TxnOutcome::Committed);

    assert_eq!(tables[1].peek(Key(6)), Some(1002));
    assert_eq!(tables[0].peek(Key(2)), Some(1002));
    assert_eq!(cluster.outstanding(), 0);
    assert_eq!(cluster.verify(), 0);
    Ok(())
}

#[test]
fn test_remote_conflict_rolls_back() -> PtxResult<()> {
    let (cluster, tables) = setup(CcScheme::NoWait)?;
    let mut owner = cluster.node(1).transaction(0)?;
    let mut requester = cluster.node(0).transaction(0)?;

    owner.begin()?;
    requester.begin()?;
    assert!(owner.write(&tables[1], Key(7))?.is_some());

    let _first = requester.write(&tables[0], Key(0))?.expect("local row is free");
    assert!(requester.write(&tables[0], Key(7))?.is_none());
    assert_eq!(requester.rollback()?, TxnOutcome::RolledBack);
    assert!(tables[0].row(Key(0)).is_some_and(|row| row.check()));

    assert_eq!(owner.commit()?, TxnOutcome::Committed);
    assert_eq!(cluster.outstanding(), 0);
    assert_eq!(cluster.verify(), 0);
    Ok(())
}

#[test]
fn test_remote_wait_die_queued_then_granted() -> PtxResult<()> {
    let (cluster, tables) = setup(CcScheme::WaitDie)?;
    let source = shared_clock();
    let mut older = cluster.node(0).transaction_with(0, source.clone())?;
    let mut younger = cluster.node(1).transaction_with(0, source)?;

    older.begin()?;
    younger.begin()?;
    let held = younger.write(&tables[1], Key(4))?.expect("row is free");
    held.set(1)?;

    std::thread::scope(|s| -> PtxResult<()> {
        let waiter = s.spawn(|| -> PtxResult<TxnOutcome> {
            let Some(row) = older.write(&tables[0], Key(4))? else {
                return older.rollback();
            };
            row.update(|v| *v += 41)?;
            older.commit()
        });

        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(younger.commit()?, TxnOutcome::Committed);
        assert_eq!(waiter.join().expect("waiter panicked")?, TxnOutcome::Committed);
        Ok(())
    })?;

    assert_eq!(tables[1].peek(Key(4)), Some(42));
    assert_eq!(cluster.outstanding(), 0);
    assert_eq!(cluster.verify(), 0);
    Ok(())
}

#[test]
fn test_remote_wait_die_younger_dies() -> PtxResult<()> {
    let (cluster, tables) = setup(CcScheme::WaitDie)?;
    let source = shared_clock();
    let mut older = cluster.node(1).transaction_with(1, source.clone())?;
    let mut younger = cluster.node(0).transaction_with(1, source)?;

    older.begin()?;
    younger.begin()?;
    assert!(older.read(&tables[1], Key(5))?.is_some());

    // 공유 잠금이어도 더 젊은 writer는 포기
    assert!(younger.write(&tables[0], Key(5))?.is_none());
    let _ = younger.rollback()?;
    let _ = older.commit()?;
    assert_eq!(cluster.outstanding(), 0);
    assert_eq!(cluster.verify(), 0);
    Ok(())
}

#[test]
fn test_transfers_across_nodes() -> PtxResult<()> {
    let (cluster, tables) = setup(CcScheme::NoWait)?;
    let mut txn = cluster.node(0).transaction(1)?;

    for (src, dst) in [(0u64, 7u64), (6, 1), (5, 4)] {
        txn.begin()?;
        let from = txn.write(&tables[0], Key(src))?.expect("free");
        let to = txn.write(&tables[0], Key(dst))?.expect("free");
        from.update(|v| *v -= 10)?;
        to.update(|v| *v += 10)?;
        let _ = txn.commit()?;
    }

    let total: u64 = (0..8)
        .map(|k| {
            let owner = if k < 4 { &tables[0] } else { &tables[1] };
            owner.peek(Key(k)).unwrap_or(0)
        })
        .sum();
    assert_eq!(total, (0..8).map(|k| 1000 + k).sum::<u64>());
    assert_eq!(tables[1].peek(Key(7)), Some(1017));
    assert_eq!(cluster.verify(), 0);
    Ok(())
}

fn get_req(sender: NodeAddr, table: TableId, key: u64, mode: AccessMode) -> PtxResult<Packet> {
    Packet::tuple_get_req(
        sender,
        TupleMsgHeader {
            ts: Timestamp(1),
            table,
            key: Key(key),
            mode,
        },
    )
}

#[test]
fn test_short_write_image_answered_and_released() -> PtxResult<()> {
    ptx_core::logging::init_test();
    let outbox = Outbox::new(1, 2);
    let db = Database::new(EngineConfig::cluster(1, 2, 1, CcScheme::NoWait), outbox.clone())?;
    let table = db.make_table::<u64>("stock", 8, PartitionKind::Range)?;
    table.populate(8, |k| 1000 + k.0)?;
    let requester = NodeAddr::new(NodeId(0), 0);

    db.sink()
        .handle(get_req(requester, table.id(), 5, AccessMode::WRITE)?)?;
    let (target, mut put) = outbox.take().pop().expect("get answered");
    assert_eq!(target, NodeId(0));
    assert_eq!(put.msg_type()?, MsgType::TupleGetRes);
    assert_eq!(table.verify(), 1);

    // u64 행에 3바이트 이미지
    put.convert(MsgType::TuplePutReq)?;
    put.set_tuple_payload(&[0xde, 0xad, 0x01])?;
    assert!(matches!(
        db.sink().handle(put),
        Err(PtxError::ProtocolViolation(_))
    ));

    let sent = outbox.take();
    assert_eq!(sent.len(), 1);
    let (target, ack) = &sent[0];
    assert_eq!(*target, NodeId(0));
    assert_eq!(ack.msg_type()?, MsgType::TuplePutRes);
    assert!(ack.tuple_header()?.mode.is_invalid());

    assert_eq!(table.peek(Key(5)), Some(1005));
    assert_eq!(table.verify(), 0);
    Ok(())
}

#[test]
fn test_get_for_unknown_table_is_answered() -> PtxResult<()> {
    ptx_core::logging::init_test();
    let outbox = Outbox::new(1, 2);
    let db = Database::new(EngineConfig::cluster(1, 2, 1, CcScheme::NoWait), outbox.clone())?;
    let requester = NodeAddr::new(NodeId(0), 1);

    let result = db
        .sink()
        .handle(get_req(requester, TableId(42), 5, AccessMode::READ)?);
    assert!(matches!(result, Err(PtxError::UnknownTable(42))));

    let sent = outbox.take();
    assert_eq!(sent.len(), 1);
    let (target, reply) = &sent[0];
    assert_eq!(*target, NodeId(0));
    assert_eq!(reply.msg_type()?, MsgType::TupleGetRes);
    assert!(reply.tuple_header()?.mode.is_invalid());
    Ok(())
}

#[test]
fn test_bad_request_stops_node_dispatch() -> PtxResult<()> {
    let (cluster, tables) = setup(CcScheme::NoWait)?;
    let switch_id = cluster.net.switch_id();
    let bogus = get_req(NodeAddr::new(switch_id, 0), TableId(42), 5, AccessMode::READ)?;
    cluster.net.endpoint(switch_id).send(NodeId(1), bogus)?;

    let db = cluster.node(1);
    assert!(eventually(|| db.fatal_error().is_some()));

    // 디스패치가 멈춘 노드의 원격 접근은 기다리지 않고 실패
    let mut txn = db.transaction(0)?;
    txn.begin()?;
    assert!(matches!(
        txn.read(&tables[1], Key(1)),
        Err(PtxError::ProtocolViolation(_))
    ));
    assert_eq!(txn.rollback()?, TxnOutcome::RolledBack);
    assert_eq!(db.handler().open_futures(), 0);
    assert!(cluster.node(0).fatal_error().is_none());
    Ok(())
}

#[test]
fn test_failed_send_leaves_no_open_future() -> PtxResult<()> {
    ptx_core::logging::init_test();
    let outbox = Outbox::new(0, 2);
    let db = Database::new(EngineConfig::cluster(0, 2, 1, CcScheme::NoWait), outbox.clone())?;
    let table = db.make_table::<u64>("stock", 8, PartitionKind::Range)?;
    table.populate(8, |k| 1000 + k.0)?;

    let mut txn = db.transaction(0)?;
    txn.begin()?;
    let local = txn.write(&table, Key(1))?.expect("local row is free");
    local.set(7)?;

    outbox.cut();
    assert!(matches!(
        txn.write(&table, Key(6)),
        Err(PtxError::Transport(_))
    ));
    assert_eq!(db.handler().open_futures(), 0);

    assert_eq!(txn.rollback()?, TxnOutcome::RolledBack);
    assert_eq!(table.peek(Key(1)), Some(1001));
    assert_eq!(table.verify(), 0);
    Ok(())
}
