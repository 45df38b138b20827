//! End-to-end room scenarios: several connections, one registry, a memory
//! store, and the frames each connection would have written to its socket.

use crate::error::SyncError;
use crate::merge::Operation;
use crate::protocol::{
    parse_client_event, ClientEvent, DocumentChange, JoinDocument, LeaveDocument, SectionRequest,
    ServerEvent,
};
use crate::server::{Connection, LockReleasePolicy, Room, RoomRegistry, ServerConfig};
use crate::store::{MemoryStore, StoredDocument};
use crate::types::{ConnectionId, LockRange, Permission, SectionRange};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

type Inbox = mpsc::UnboundedReceiver<Arc<str>>;

fn store_with(text: &str) -> MemoryStore {
    let store = MemoryStore::new();
    store.insert(
        "doc",
        StoredDocument::new("Shared", "alice")
            .with_text(text)
            .with_collaborator("bob", Permission::Edit)
            .with_collaborator("carol", Permission::View),
    );
    store
}

fn registry_with(store: &MemoryStore, config: ServerConfig) -> Arc<RoomRegistry> {
    let shared = Arc::new(store.clone());
    Arc::new(RoomRegistry::new(shared.clone(), shared, config))
}

/// Frames queued for a connection so far, decoded.
fn drain(inbox: &mut Inbox) -> Vec<ServerEvent> {
    let mut events = Vec::new();
    while let Ok(frame) = inbox.try_recv() {
        events.push(serde_json::from_str(&frame).unwrap());
    }
    events
}

async fn join(
    registry: &RoomRegistry,
    user: &str,
) -> (Arc<Room>, ConnectionId, Inbox) {
    let (tx, rx) = mpsc::unbounded_channel();
    let id = ConnectionId::new();
    let (room, _) = registry
        .join(&"doc".into(), &user.into(), id, tx)
        .await
        .unwrap();
    (room, id, rx)
}

fn section(index: usize, length: usize) -> SectionRange {
    SectionRange::new(index, length)
}

#[tokio::test]
async fn test_hello_world_session() {
    let store = store_with("");
    let registry = registry_with(&store, ServerConfig::default());
    let (room, alice, mut alice_rx) = join(&registry, "alice").await;
    let (_, bob, mut bob_rx) = join(&registry, "bob").await;

    assert!(matches!(
        drain(&mut alice_rx).as_slice(),
        [ServerEvent::DocumentContent(snapshot)] if snapshot.content.is_empty()
    ));
    drain(&mut bob_rx);

    let hello = Operation::new().insert("Hello");
    room.submit_operation(alice, hello.clone()).unwrap();
    assert_eq!(drain(&mut bob_rx), vec![ServerEvent::document_updated(hello)]);
    assert!(drain(&mut alice_rx).is_empty());

    let world = Operation::new().retain(5).insert(" World");
    room.submit_operation(bob, world.clone()).unwrap();
    assert_eq!(drain(&mut alice_rx), vec![ServerEvent::document_updated(world)]);
    assert_eq!(room.snapshot().content, "Hello World");
}

#[tokio::test]
async fn test_insert_at_lock_start_is_allowed() {
    let store = store_with("Hello World");
    let registry = registry_with(&store, ServerConfig::default());
    let (room, alice, _alice_rx) = join(&registry, "alice").await;
    let (_, bob, mut bob_rx) = join(&registry, "bob").await;

    room.submit_lock(alice, section(0, 5), &"alice".into())
        .unwrap();
    drain(&mut bob_rx);

    let greeting = Operation::new().retain(0).insert("Hi ").retain(11);
    room.submit_operation(bob, greeting).unwrap();
    assert_eq!(room.snapshot().content, "Hi Hello World");

    // The lock moved with the text it covers.
    assert_eq!(room.snapshot().locks, vec![LockRange::new(3, 5, "alice")]);
}

#[tokio::test]
async fn test_delete_inside_foreign_lock_is_rejected_silently() {
    let store = store_with("Hello World");
    let registry = registry_with(&store, ServerConfig::default());
    let (room, alice, mut alice_rx) = join(&registry, "alice").await;
    let (_, bob, _bob_rx) = join(&registry, "bob").await;

    room.submit_lock(alice, section(0, 5), &"alice".into())
        .unwrap();
    drain(&mut alice_rx);

    let result = room.submit_operation(bob, Operation::new().retain(2).delete(3).retain(6));
    assert!(matches!(
        result,
        Err(SyncError::ConflictingEdit { index: 0, .. })
    ));
    assert_eq!(room.snapshot().content, "Hello World");
    assert!(drain(&mut alice_rx).is_empty());
}

#[tokio::test]
async fn test_lock_transform_is_broadcast() {
    let store = store_with("abc");
    let registry = registry_with(&store, ServerConfig::default());
    let (room, alice, mut alice_rx) = join(&registry, "alice").await;
    let (_, bob, mut bob_rx) = join(&registry, "bob").await;

    room.submit_lock(alice, section(1, 1), &"alice".into())
        .unwrap();
    let locked = ServerEvent::lock_update(&[LockRange::new(1, 1, "alice")]);
    assert_eq!(drain(&mut alice_rx).last(), Some(&locked));
    assert_eq!(drain(&mut bob_rx).last(), Some(&locked));

    let insert = Operation::new().retain(0).insert("X").retain(3);
    room.submit_operation(bob, insert.clone()).unwrap();

    let moved = ServerEvent::lock_update(&[LockRange::new(2, 1, "alice")]);
    assert_eq!(
        drain(&mut alice_rx),
        vec![ServerEvent::document_updated(insert), moved.clone()]
    );
    assert_eq!(drain(&mut bob_rx), vec![moved]);
    assert_eq!(room.snapshot().content, "Xabc");
}

#[tokio::test]
async fn test_overlapping_lock_is_rejected() {
    let store = store_with("Hello World");
    let registry = registry_with(&store, ServerConfig::default());
    let (room, alice, _alice_rx) = join(&registry, "alice").await;
    let (_, bob, _bob_rx) = join(&registry, "bob").await;

    room.submit_lock(alice, section(0, 5), &"alice".into())
        .unwrap();
    assert!(matches!(
        room.submit_lock(bob, section(4, 3), &"bob".into()),
        Err(SyncError::LockOverlap)
    ));
    room.submit_lock(bob, section(5, 3), &"bob".into()).unwrap();

    // Lock then unlock restores the previous table.
    assert!(room.submit_unlock(bob, section(5, 3), &"bob".into()).unwrap());
    assert_eq!(room.snapshot().locks, vec![LockRange::new(0, 5, "alice")]);
}

#[tokio::test]
async fn test_lock_owner_must_match_member() {
    let store = store_with("Hello");
    let registry = registry_with(&store, ServerConfig::default());
    let (room, _, _rx) = join(&registry, "alice").await;
    let (_, bob, _bob_rx) = join(&registry, "bob").await;

    assert!(matches!(
        room.submit_lock(bob, section(0, 2), &"alice".into()),
        Err(SyncError::AccessDenied)
    ));
    assert!(room.snapshot().locks.is_empty());
}

#[tokio::test]
async fn test_viewer_receives_updates_but_cannot_lock() {
    let store = store_with("");
    let registry = registry_with(&store, ServerConfig::default());
    let (room, alice, _alice_rx) = join(&registry, "alice").await;
    let (_, carol, mut carol_rx) = join(&registry, "carol").await;
    drain(&mut carol_rx);

    room.submit_operation(alice, Operation::new().insert("hi"))
        .unwrap();
    assert_eq!(drain(&mut carol_rx).len(), 1);
    assert!(matches!(
        room.submit_lock(carol, section(0, 1), &"carol".into()),
        Err(SyncError::AccessDenied)
    ));
}

#[tokio::test]
async fn test_flush_scenario() {
    let store = store_with("foo");
    let config = ServerConfig {
        flush_delay: Duration::from_millis(10),
        ..ServerConfig::default()
    };
    let registry = registry_with(&store, config);
    let (room, alice, _rx) = join(&registry, "alice").await;

    room.submit_operation(alice, Operation::new().retain(3).insert("bar"))
        .unwrap();
    room.submit_operation(alice, Operation::new().delete(3))
        .unwrap();
    assert_eq!(room.stats().pending_ops, 2);

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(store.text(&"doc".into()).as_deref(), Some("bar"));
    assert_eq!(room.stats().pending_ops, 0);
}

#[tokio::test]
async fn test_concurrent_first_joins_share_one_room() {
    let store = store_with("shared");
    let registry = registry_with(&store, ServerConfig::default());

    let joins = (0..8).map(|i| {
        let registry = Arc::clone(&registry);
        let user = if i % 2 == 0 { "alice" } else { "bob" };
        tokio::spawn(async move { join(&registry, user).await.0 })
    });
    let rooms: Vec<Arc<Room>> = futures::future::join_all(joins)
        .await
        .into_iter()
        .map(|joined| joined.unwrap())
        .collect();

    assert!(rooms.iter().all(|room| Arc::ptr_eq(room, &rooms[0])));
    assert_eq!(rooms[0].member_count(), 8);
}

#[tokio::test]
async fn test_room_full() {
    let store = store_with("");
    let config = ServerConfig {
        max_members_per_document: 1,
        ..ServerConfig::default()
    };
    let registry = registry_with(&store, config);
    join(&registry, "alice").await;

    let (tx, _rx) = mpsc::unbounded_channel();
    let result = registry
        .join(&"doc".into(), &"bob".into(), ConnectionId::new(), tx)
        .await;
    assert!(matches!(result, Err(SyncError::RoomFull)));
}

#[tokio::test]
async fn test_locks_retained_after_leave_by_default() {
    let store = store_with("Hello");
    let registry = registry_with(&store, ServerConfig::default());
    let (room, alice, _rx) = join(&registry, "alice").await;
    room.submit_lock(alice, section(0, 2), &"alice".into())
        .unwrap();

    registry.leave(&"doc".into(), alice);
    assert_eq!(room.snapshot().locks.len(), 1);
}

#[tokio::test]
async fn test_locks_released_on_last_leave() {
    let store = store_with("Hello");
    let config = ServerConfig {
        lock_release: LockReleasePolicy::OnLeave,
        ..ServerConfig::default()
    };
    let registry = registry_with(&store, config);
    let (room, alice, _rx) = join(&registry, "alice").await;
    let (_, alice_tab, _tab_rx) = join(&registry, "alice").await;
    let (_, _, mut bob_rx) = join(&registry, "bob").await;
    room.submit_lock(alice, section(0, 2), &"alice".into())
        .unwrap();
    drain(&mut bob_rx);

    registry.leave(&"doc".into(), alice);
    assert_eq!(room.snapshot().locks.len(), 1);
    assert!(drain(&mut bob_rx).is_empty());

    registry.leave(&"doc".into(), alice_tab);
    assert!(room.snapshot().locks.is_empty());
    assert_eq!(drain(&mut bob_rx), vec![ServerEvent::lock_update(&[])]);
}

// ========== Connection dispatch ==========

fn change(delta: Operation, op_id: Option<&str>) -> ClientEvent {
    ClientEvent::DocumentChange(DocumentChange {
        document_id: "doc".into(),
        delta,
        op_id: op_id.map(str::to_string),
    })
}

async fn connect(registry: &RoomRegistry, user: &str) -> (Connection, Inbox) {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut connection = Connection::new(tx);
    connection
        .handle(
            registry,
            ClientEvent::JoinDocument(JoinDocument {
                document_id: "doc".into(),
                user_id: user.into(),
            }),
        )
        .await;
    assert!(matches!(
        drain(&mut rx).as_slice(),
        [ServerEvent::DocumentContent(_)]
    ));
    (connection, rx)
}

#[tokio::test]
async fn test_ack_and_reject_by_op_id() {
    let store = store_with("Hello World");
    let registry = registry_with(&store, ServerConfig::default());
    let (mut alice, mut alice_rx) = connect(&registry, "alice").await;
    let (mut bob, mut bob_rx) = connect(&registry, "bob").await;

    alice
        .handle(
            &registry,
            ClientEvent::LockSection(SectionRequest {
                document_id: "doc".into(),
                range: section(0, 5),
                user_id: "alice".into(),
            }),
        )
        .await;
    drain(&mut alice_rx);
    drain(&mut bob_rx);

    bob.handle(&registry, change(Operation::new().retain(6).insert("big "), Some("b-1")))
        .await;
    assert_eq!(
        drain(&mut bob_rx),
        vec![ServerEvent::operation_ack("b-1".into())]
    );
    assert_eq!(drain(&mut alice_rx).len(), 1);

    bob.handle(&registry, change(Operation::new().retain(1).delete(1), Some("b-2")))
        .await;
    assert!(matches!(
        drain(&mut bob_rx).as_slice(),
        [ServerEvent::OperationRejected(rejected)] if rejected.op_id == "b-2"
    ));

    bob.handle(&registry, change(Operation::new().retain(1).delete(1), None))
        .await;
    assert!(drain(&mut bob_rx).is_empty());
    assert!(drain(&mut alice_rx).is_empty());
}

#[tokio::test]
async fn test_rejected_lock_resends_lock_set() {
    let store = store_with("Hello World");
    let registry = registry_with(&store, ServerConfig::default());
    let (mut alice, _alice_rx) = connect(&registry, "alice").await;
    let (mut bob, mut bob_rx) = connect(&registry, "bob").await;

    let lock = |user: &str, index| {
        ClientEvent::LockSection(SectionRequest {
            document_id: "doc".into(),
            range: section(index, 3),
            user_id: user.into(),
        })
    };
    alice.handle(&registry, lock("alice", 0)).await;
    drain(&mut bob_rx);

    bob.handle(&registry, lock("bob", 2)).await;
    assert_eq!(
        drain(&mut bob_rx),
        vec![
            ServerEvent::error(&SyncError::LockOverlap),
            ServerEvent::lock_update(&[LockRange::new(0, 3, "alice")]),
        ]
    );
}

#[tokio::test]
async fn test_events_for_unjoined_document_are_refused() {
    let store = store_with("");
    let registry = registry_with(&store, ServerConfig::default());
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut stranger = Connection::new(tx);

    stranger
        .handle(&registry, change(Operation::new().insert("x"), None))
        .await;
    assert_eq!(
        drain(&mut rx),
        vec![ServerEvent::error(&SyncError::AccessDenied)]
    );
}

#[tokio::test]
async fn test_join_errors_are_reported() {
    let store = store_with("");
    let registry = registry_with(&store, ServerConfig::default());
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut connection = Connection::new(tx);

    connection
        .handle(
            &registry,
            ClientEvent::JoinDocument(JoinDocument {
                document_id: "doc".into(),
                user_id: "mallory".into(),
            }),
        )
        .await;
    connection
        .handle(
            &registry,
            ClientEvent::JoinDocument(JoinDocument {
                document_id: "missing".into(),
                user_id: "alice".into(),
            }),
        )
        .await;

    let events = drain(&mut rx);
    assert_eq!(
        events,
        vec![
            ServerEvent::Error("Access denied".into()),
            ServerEvent::Error("Document not found".into()),
        ]
    );
    assert_eq!(connection.joined().count(), 0);
}

#[tokio::test]
async fn test_leave_and_close_detach() {
    let store = store_with("");
    let registry = registry_with(&store, ServerConfig::default());
    let (mut alice, _alice_rx) = connect(&registry, "alice").await;
    let (mut bob, _bob_rx) = connect(&registry, "bob").await;
    let room = registry.get(&"doc".into()).unwrap();
    assert_eq!(room.member_count(), 2);

    alice
        .handle(
            &registry,
            ClientEvent::LeaveDocument(LeaveDocument {
                document_id: "doc".into(),
            }),
        )
        .await;
    assert_eq!(room.member_count(), 1);

    bob.close();
    assert_eq!(room.member_count(), 0);
}

#[tokio::test]
async fn test_malformed_frame_gets_error() {
    let store = store_with("");
    let registry = registry_with(&store, ServerConfig::default());
    let (alice, mut rx) = connect(&registry, "alice").await;

    let err = parse_client_event(r#"{"event":"documentChange","data":{"documentId":"doc"}}"#)
        .unwrap_err();
    alice.reject_frame(&err);
    assert!(matches!(drain(&mut rx).as_slice(), [ServerEvent::Error(message)] if message.starts_with("Malformed message")));
}

#[tokio::test]
async fn test_invalid_operation_leaves_room_untouched() {
    let store = store_with("Hello");
    let registry = registry_with(&store, ServerConfig::default());
    let (room, alice, mut alice_rx) = join(&registry, "alice").await;
    let (_, _, mut bob_rx) = join(&registry, "bob").await;
    room.submit_lock(alice, section(1, 2), &"alice".into())
        .unwrap();
    drain(&mut alice_rx);
    drain(&mut bob_rx);
    let before = room.snapshot();

    for op in [
        Operation::new().retain(20),
        Operation::new().retain(3).delete(5),
        Operation::new().insert("x").retain(6),
    ] {
        assert!(matches!(
            room.submit_operation(alice, op),
            Err(SyncError::InvalidOperation(_))
        ));
    }

    assert_eq!(room.snapshot(), before);
    assert_eq!(room.stats().pending_ops, 0);
    assert!(!room.is_dirty());
    assert!(drain(&mut bob_rx).is_empty());
    assert!(drain(&mut alice_rx).is_empty());
}

#[tokio::test]
async fn test_eviction_ends_old_membership() {
    let store = store_with("base");
    let registry = registry_with(&store, ServerConfig::default());
    let (mut alice, mut alice_rx) = connect(&registry, "alice").await;

    alice
        .handle(&registry, change(Operation::new().insert("alice "), None))
        .await;
    assert!(registry.evict(&"doc".into()).await.unwrap());
    assert_eq!(store.text(&"doc".into()).as_deref(), Some("alice base"));
    assert_eq!(
        drain(&mut alice_rx),
        vec![ServerEvent::error(&SyncError::RoomClosed)]
    );

    let (mut bob, mut bob_rx) = connect(&registry, "bob").await;
    bob.handle(&registry, change(Operation::new().retain(10).insert(" bob"), None))
        .await;

    // The old membership is gone: the edit is refused, not applied to a
    // second copy of the document.
    alice
        .handle(&registry, change(Operation::new().insert(">> "), Some("a-1")))
        .await;
    assert!(matches!(
        drain(&mut alice_rx).as_slice(),
        [ServerEvent::OperationRejected(rejected)] if rejected.op_id == "a-1"
    ));
    assert_eq!(alice.joined().count(), 0);
    assert!(drain(&mut bob_rx).is_empty());

    let room = registry.get(&"doc".into()).unwrap();
    assert_eq!(room.snapshot().content, "alice base bob");
    assert_eq!(room.member_count(), 1);

    // Rejoining lands in the live room and sees bob's edit.
    alice
        .handle(
            &registry,
            ClientEvent::JoinDocument(JoinDocument {
                document_id: "doc".into(),
                user_id: "alice".into(),
            }),
        )
        .await;
    assert!(matches!(
        drain(&mut alice_rx).as_slice(),
        [ServerEvent::DocumentContent(snapshot)] if snapshot.content == "alice base bob"
    ));

    room.cancel_flush();
    room.flush().await.unwrap();
    assert_eq!(store.text(&"doc".into()).as_deref(), Some("alice base bob"));
}
