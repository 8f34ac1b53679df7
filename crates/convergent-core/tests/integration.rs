//! Integration tests for the Merkle-history anti-entropy substrate:
//! two independently-produced envelope streams, diffed by their leaf
//! ids, converge once the missing envelopes have been exchanged.

use convergent_core::{get_merkle_history, resolve_merkle_histories, Payload, ScalarClock, StateUpdate, Value};

fn envelope(uuid: [u8; 16], ts: i64, member: i32) -> StateUpdate {
    StateUpdate::new(uuid, ts, Payload::Value(Value::Int(member)))
}

#[test]
fn resolve_reports_exactly_the_missing_leaves() {
    let uuid = [1; 16];
    let local = vec![envelope(uuid, 1, 1), envelope(uuid, 2, 2)];
    let peer = vec![envelope(uuid, 1, 1), envelope(uuid, 2, 2), envelope(uuid, 3, 3)];

    let local_packed: Vec<Vec<u8>> = local.iter().map(|su| su.pack()).collect();
    let peer_packed: Vec<Vec<u8>> = peer.iter().map(|su| su.pack()).collect();

    let local_history = get_merkle_history(local_packed.iter().map(|v| v.as_slice()));
    let peer_history = get_merkle_history(peer_packed.iter().map(|v| v.as_slice()));

    let missing = resolve_merkle_histories(&local_history, peer_history.root, &peer_history.leaf_ids);
    assert_eq!(missing.len(), 1);

    let missing_packed = peer_history.leaves.get(&missing[0]).unwrap();
    let missing_su = StateUpdate::unpack(missing_packed, &convergent_core::empty_registry()).unwrap();
    assert_eq!(missing_su.data, Payload::Value(Value::Int(3)));
}

#[test]
fn identical_histories_resolve_to_nothing_missing() {
    let uuid = [2; 16];
    let a = vec![envelope(uuid, 1, 1), envelope(uuid, 2, 2)];
    let b = vec![envelope(uuid, 2, 2), envelope(uuid, 1, 1)];

    let a_packed: Vec<Vec<u8>> = a.iter().map(|su| su.pack()).collect();
    let b_packed: Vec<Vec<u8>> = b.iter().map(|su| su.pack()).collect();

    let a_history = get_merkle_history(a_packed.iter().map(|v| v.as_slice()));
    let b_history = get_merkle_history(b_packed.iter().map(|v| v.as_slice()));

    assert_eq!(a_history.root, b_history.root);
    assert!(resolve_merkle_histories(&a_history, b_history.root, &b_history.leaf_ids).is_empty());
}

#[test]
fn envelope_pack_unpack_round_trips_through_the_type_registry() {
    let su = envelope([3; 16], 7, 42);
    let packed = su.pack();
    let restored = StateUpdate::unpack(&packed, &convergent_core::empty_registry()).unwrap();
    assert_eq!(restored, su);
}

#[test]
fn clock_counter_strictly_exceeds_the_last_applied_timestamp() {
    let mut clock = ScalarClock::new([4; 16]);
    let su = envelope([4; 16], 9, 1);
    clock.update(su.ts).unwrap();
    assert!(clock.read() > su.ts);
}
