//! Connection registry behaviour: lookups, groups, broadcast and cleanup.

use std::{collections::HashSet, sync::Arc};

use bytes::Bytes;
use otpgate_core::{ALL_GROUP, ConnectionRegistry, OutboundTransform, Transport};
use otpgate_harness::MemoryTransport;
use otpgate_proto::ConnectionIdentity;
use proptest::prelude::*;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Key {
    Identity(u64),
    User(&'static str),
}

fn registry() -> ConnectionRegistry<Key, MemoryTransport> {
    ConnectionRegistry::new("test")
}

#[test]
fn put_get_remove() {
    let registry = registry();
    let conn = MemoryTransport::clear(1);

    assert!(registry.put(Key::Identity(1), Arc::clone(&conn)).is_none());
    assert_eq!(registry.get(&Key::Identity(1)).unwrap().id(), conn.id());

    assert!(registry.remove(&Key::Identity(1)).is_some());
    assert!(registry.get(&Key::Identity(1)).is_none());
    assert!(registry.keys_for_connection(conn.id()).is_empty());
}

#[test]
fn reverse_lookup_lists_every_key() {
    let registry = registry();
    let conn = MemoryTransport::clear(1);

    registry.put(Key::Identity(1), Arc::clone(&conn));
    registry.put(Key::User("alice"), Arc::clone(&conn));

    let keys = registry.keys_for_connection(conn.id());
    assert_eq!(keys, HashSet::from([Key::Identity(1), Key::User("alice")]));
}

#[test]
fn rebinding_key_moves_reverse_entry() {
    let registry = registry();
    let old = MemoryTransport::clear(1);
    let new = MemoryTransport::clear(2);

    registry.put(Key::User("alice"), Arc::clone(&old));
    let previous = registry.put(Key::User("alice"), Arc::clone(&new)).unwrap();

    assert_eq!(previous.id(), old.id());
    assert!(registry.keys_for_connection(old.id()).is_empty());

    // Closing the old connection must not evict the new binding
    old.peer_close();
    assert_eq!(registry.get(&Key::User("alice")).unwrap().id(), new.id());
}

#[test]
fn close_removes_all_keys_and_groups() {
    let registry = registry();
    let conn = MemoryTransport::clear(1);
    let other = MemoryTransport::clear(2);

    registry.put(Key::Identity(1), Arc::clone(&conn));
    registry.put(Key::User("alice"), Arc::clone(&conn));
    registry.join_group(ALL_GROUP, Arc::clone(&conn));
    registry.join_group("lobby", Arc::clone(&conn));
    registry.put(Key::Identity(2), Arc::clone(&other));
    registry.join_group(ALL_GROUP, Arc::clone(&other));

    conn.peer_close();

    assert!(registry.get(&Key::Identity(1)).is_none());
    assert!(registry.get(&Key::User("alice")).is_none());
    assert!(!registry.is_member(ALL_GROUP, conn.id()));
    assert_eq!(registry.group_len("lobby"), 0);

    assert!(registry.get(&Key::Identity(2)).is_some());
    assert!(registry.is_member(ALL_GROUP, other.id()));
}

#[test]
fn registering_closed_connection_leaves_nothing() {
    let registry = registry();
    let conn = MemoryTransport::clear(1);
    conn.close();

    registry.put(Key::Identity(1), Arc::clone(&conn));
    registry.join_group(ALL_GROUP, conn);

    assert!(registry.is_empty());
    assert_eq!(registry.group_len(ALL_GROUP), 0);
}

#[test]
fn group_join_is_idempotent() {
    let registry = registry();
    let conn = MemoryTransport::clear(1);

    assert!(registry.join_group(ALL_GROUP, Arc::clone(&conn)));
    assert!(!registry.join_group(ALL_GROUP, Arc::clone(&conn)));
    assert_eq!(registry.group_len(ALL_GROUP), 1);

    assert!(registry.leave_group(ALL_GROUP, conn.id()));
    assert!(!registry.leave_group(ALL_GROUP, conn.id()));
}

#[test]
fn broadcast_excludes_listed_keys() {
    let registry = registry();
    let conns: Vec<_> = (1u64..=4).map(MemoryTransport::clear).collect();
    for conn in &conns {
        registry.put(Key::Identity(conn.id().value()), Arc::clone(conn));
        registry.join_group(ALL_GROUP, Arc::clone(conn));
    }

    let delivered =
        registry.send_to_group(ALL_GROUP, Bytes::from_static(b"tick"), &[Key::Identity(2)]);

    assert_eq!(delivered, 3);
    for conn in &conns {
        let expected = if conn.id().value() == 2 { 0 } else { 1 };
        assert_eq!(conn.sent().len(), expected, "connection {}", conn.id());
    }
}

#[test]
fn sends_skip_closed_connections() {
    let registry = registry();
    let live = MemoryTransport::clear(1);
    let dead = MemoryTransport::clear(2);
    registry.join_group(ALL_GROUP, Arc::clone(&live));
    registry.join_group(ALL_GROUP, Arc::clone(&dead));
    registry.put(Key::Identity(2), Arc::clone(&dead));

    dead.close();

    assert!(!registry.send_to(&Key::Identity(2), Bytes::from_static(b"x")));
    assert_eq!(registry.send_to_group(ALL_GROUP, Bytes::from_static(b"x"), &[]), 1);
    assert!(!registry.send_to(&Key::User("nobody"), Bytes::from_static(b"x")));
}

struct Tag;

impl OutboundTransform for Tag {
    fn apply(&self, recipient: ConnectionIdentity, payload: &Bytes) -> Bytes {
        let mut tagged = payload.to_vec();
        tagged.extend_from_slice(format!("@{recipient}").as_bytes());
        Bytes::from(tagged)
    }
}

#[test]
fn transform_applies_per_recipient() {
    let registry: ConnectionRegistry<Key, MemoryTransport> =
        ConnectionRegistry::with_transform("test", Arc::new(Tag));
    let a = MemoryTransport::clear(1);
    let b = MemoryTransport::clear(2);
    registry.join_group(ALL_GROUP, Arc::clone(&a));
    registry.join_group(ALL_GROUP, Arc::clone(&b));

    registry.send_to_group(ALL_GROUP, Bytes::from_static(b"hi"), &[]);

    assert_eq!(a.sent(), vec![Bytes::from_static(b"hi@1")]);
    assert_eq!(b.sent(), vec![Bytes::from_static(b"hi@2")]);
}

#[test]
fn close_all_closes_every_connection() {
    let registry = registry();
    let keyed = MemoryTransport::clear(1);
    let grouped = MemoryTransport::clear(2);
    registry.put(Key::Identity(1), Arc::clone(&keyed));
    registry.join_group(ALL_GROUP, Arc::clone(&grouped));

    registry.close_all();

    assert!(!keyed.is_open());
    assert!(!grouped.is_open());
    assert!(registry.is_empty());
}

#[test]
fn concurrent_churn_leaves_no_closed_connection_behind() {
    const GROUPS: [&str; 2] = [ALL_GROUP, "lobby"];
    const MUTED: [Key; 2] = [Key::User("muted-a"), Key::User("muted-b")];

    fn doomed(conn: &MemoryTransport) -> bool {
        conn.id().value() % 2 == 0
    }

    let registry = registry();
    let muted: Vec<_> = (1..=2).map(MemoryTransport::clear).collect();
    for (key, conn) in MUTED.iter().zip(&muted) {
        registry.put(key.clone(), Arc::clone(conn));
        registry.join_group(ALL_GROUP, Arc::clone(conn));
    }

    let churn: Vec<_> = (10..42).map(MemoryTransport::clear).collect();
    for conn in &churn {
        registry.put(Key::Identity(conn.id().value()), Arc::clone(conn));
    }

    std::thread::scope(|scope| {
        for _ in 0..2 {
            scope.spawn(|| {
                for round in 0..500 {
                    let group = GROUPS[round % GROUPS.len()];
                    registry.send_to_group(group, Bytes::from_static(b"tick"), &MUTED);
                }
            });
        }
        for offset in 0..2 {
            let churn = &churn;
            let registry = &registry;
            scope.spawn(move || {
                for round in 0..200 {
                    for conn in churn.iter().skip(offset).step_by(2) {
                        let group = GROUPS[round % GROUPS.len()];
                        registry.join_group(group, Arc::clone(conn));
                        registry.join_group(ALL_GROUP, Arc::clone(conn));
                        if round % 3 == 0 {
                            registry.leave_group(group, conn.id());
                        }
                    }
                }
            });
        }
        scope.spawn(|| {
            for conn in churn.iter().filter(|conn| doomed(conn)) {
                conn.peer_close();
                std::thread::yield_now();
            }
        });
    });

    for conn in churn.iter().filter(|conn| doomed(conn)) {
        let id = conn.id();
        assert!(!conn.is_open());
        for group in GROUPS {
            assert!(!registry.is_member(group, id), "{id} still in {group}");
        }
        assert!(registry.keys_for_connection(id).is_empty());
        assert!(registry.get(&Key::Identity(id.value())).is_none());
    }
    for group in GROUPS {
        assert!(registry.members(group).iter().all(|conn| conn.is_open()));
    }
    for conn in churn.iter().filter(|conn| !doomed(conn)) {
        assert!(registry.get(&Key::Identity(conn.id().value())).is_some());
    }
    for conn in &muted {
        assert!(conn.sent().is_empty(), "excluded connection received a broadcast");
        assert!(registry.is_member(ALL_GROUP, conn.id()));
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Property: after closing any subset of connections, exactly the keys of
    /// the survivors remain and no closed connection is in any group.
    #[test]
    fn prop_close_cleans_up(
        assignments in prop::collection::vec((0u64..8, 0u32..32), 1..64),
        closed in prop::collection::hash_set(0u64..8, 0..8),
    ) {
        let registry: ConnectionRegistry<u32, MemoryTransport> = ConnectionRegistry::new("prop");
        let conns: Vec<_> = (0u64..8).map(MemoryTransport::clear).collect();

        let mut expected = std::collections::HashMap::new();
        for (conn, key) in &assignments {
            let conn_index = usize::try_from(*conn)?;
            registry.put(*key, Arc::clone(&conns[conn_index]));
            registry.join_group(ALL_GROUP, Arc::clone(&conns[conn_index]));
            expected.insert(*key, *conn);
        }

        for id in &closed {
            conns[usize::try_from(*id)?].peer_close();
        }

        for (key, conn) in &expected {
            let found = registry.get(key).map(|c| c.id().value());
            if closed.contains(conn) {
                prop_assert_eq!(found, None);
            } else {
                prop_assert_eq!(found, Some(*conn));
            }
        }
        for id in &closed {
            prop_assert!(!registry.is_member(ALL_GROUP, ConnectionIdentity::new(*id)));
            prop_assert!(registry.keys_for_connection(ConnectionIdentity::new(*id)).is_empty());
        }
    }
}
