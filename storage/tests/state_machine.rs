use raft::raft::Entry;
use raft::raft::EntryNormal;
use raft::raft::EntryPayload;
use raft::LogId;
use raft::RaftStorage;
use storage::ProposeMessage;
use storage::Store;

fn propose(user_id: u64, value: &str) -> ProposeMessage {
    ProposeMessage {
        user_id,
        create_time: "2026-01-01T00:00:00Z".into(),
        value: value.as_bytes().to_vec(),
        file_name: String::new(),
        file_id: String::new(),
    }
}

fn normal_entry(index: u64, term: u64, data: ProposeMessage) -> Entry<ProposeMessage> {
    Entry {
        log_id: LogId::new(term, index),
        payload: EntryPayload::Normal(EntryNormal { data }),
    }
}

#[tokio::test]
async fn apply_stores_a_message_and_is_idempotent_on_replay() {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(1, dir.path()).await.unwrap();

    let entry = normal_entry(1, 1, propose(7, "hi"));
    let responses = store.apply_to_state_machine(&[&entry]).await.unwrap();
    assert_eq!(responses.len(), 1);
    assert_ne!(responses[0].message.id, 0);
    assert_eq!(responses[0].message.user_id, 7);

    // Re-applying the same (log_index, log_term) must be a no-op, not a duplicate row.
    let replay = store.apply_to_state_machine(&[&entry]).await.unwrap();
    assert_eq!(replay.len(), 1);

    let initial = store.get_initial_state().await.unwrap();
    assert_eq!(initial.last_applied_log, LogId::new(1, 1));
}

#[tokio::test]
async fn snapshot_then_restore_round_trips_messages() {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(1, dir.path()).await.unwrap();

    for i in 1..=5u64 {
        let entry = normal_entry(i, 1, propose(7, &format!("msg-{}", i)));
        store.append_to_log(&[&entry]).await.unwrap();
        store.apply_to_state_machine(&[&entry]).await.unwrap();
    }

    let snapshot = store.do_log_compaction().await.unwrap();
    assert_eq!(snapshot.meta.last_log_id, LogId::new(1, 5));

    // The log prefix through the snapshotted index is gone.
    assert!(store.try_get_log_entry(3).await.unwrap().is_none());

    // A fresh store, simulating a new node, installs the snapshot.
    let dir2 = tempfile::tempdir().unwrap();
    let follower = Store::open(2, dir2.path()).await.unwrap();
    let sink = follower.begin_receiving_snapshot().await.unwrap();
    // Feed the leader's snapshot bytes into the follower's sink, as InstallSnapshot chunks would.
    let mut sink = sink;
    {
        use std::io::Write;
        let meta = snapshot.meta.clone();
        let mut leader_reader = snapshot.snapshot;
        let mut buf = Vec::new();
        std::io::Read::read_to_end(&mut leader_reader, &mut buf).unwrap();
        sink.write_all(&buf).unwrap();
        follower.finalize_snapshot_installation(&meta, sink).await.unwrap();
    }

    let restored = follower.get_current_snapshot().await.unwrap().unwrap();
    assert_eq!(restored.meta.last_log_id, LogId::new(1, 5));
}

#[tokio::test]
async fn bootstrap_refused_on_existing_state() {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(1, dir.path()).await.unwrap();
    assert!(!store.has_existing_state().await.unwrap());

    let entry = normal_entry(1, 1, propose(7, "hi"));
    store.append_to_log(&[&entry]).await.unwrap();

    assert!(store.has_existing_state().await.unwrap());
}
