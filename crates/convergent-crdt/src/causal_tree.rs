//! `CausalTree`: an ordered tree of [`WrappedValue::CtDatum`] nodes
//! backed by an [`LwwMap`] keyed by each node's own uuid. Children of a
//! node are ordered by their own uuid, and the tree reads out as a
//! pre-order depth-first walk from the virtual root `[0u8; 16]`.
//!
//! Deletion goes through the map's `set` path rather than `unset`: a
//! deleted node stays keyed in the map with `visible = false` so its
//! position under its parent (and any children still parented to it)
//! survives. Routing deletes through `unset` instead -- which is what
//! a literal reading of the op codes might suggest -- would evict the
//! key entirely and strand every descendant with a parent_uuid that no
//! longer resolves to anything in the tree.

use crate::lww_map::LwwMap;
use crate::merkle_crdt::MerkleCrdt;
use convergent_core::{CrdtError, ScalarClock, StateUpdate, Timestamp, TypeRegistry, Value, WrappedValue};
use std::collections::{BTreeMap, BTreeSet};

/// The parent_uuid of a node put at the top level of the tree.
pub const ROOT: [u8; 16] = [0u8; 16];

#[derive(Clone, PartialEq)]
pub struct CausalTree {
    clock: ScalarClock,
    positions: LwwMap,
}

impl std::fmt::Debug for CausalTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CausalTree").field("clock", &self.clock).field("len", &self.read().len()).finish()
    }
}

impl CausalTree {
    pub fn new(clock: ScalarClock) -> Self {
        CausalTree {
            positions: LwwMap::new(clock.clone()),
            clock,
        }
    }

    pub fn clock(&self) -> &ScalarClock {
        &self.clock
    }

    fn decode_nodes(&self) -> BTreeMap<[u8; 16], (WrappedValue, [u8; 16], bool)> {
        self.positions
            .read()
            .into_iter()
            .filter_map(|(key, value)| {
                let uuid = match key {
                    Value::Bytes(b) if b.len() == 16 => {
                        let mut u = [0u8; 16];
                        u.copy_from_slice(&b);
                        u
                    }
                    _ => return None,
                };
                match value {
                    WrappedValue::CtDatum { value, parent_uuid, visible, .. } => Some((uuid, (*value, parent_uuid, visible))),
                    _ => None,
                }
            })
            .collect()
    }

    fn children_of(nodes: &BTreeMap<[u8; 16], (WrappedValue, [u8; 16], bool)>) -> BTreeMap<[u8; 16], BTreeSet<[u8; 16]>> {
        let mut children: BTreeMap<[u8; 16], BTreeSet<[u8; 16]>> = BTreeMap::new();
        for (uuid, (_, parent_uuid, _)) in nodes {
            children.entry(*parent_uuid).or_default().insert(*uuid);
        }
        children
    }

    fn traversal_order(&self) -> Vec<[u8; 16]> {
        let nodes = self.decode_nodes();
        let children = Self::children_of(&nodes);
        let mut out = Vec::new();
        fn walk(parent: [u8; 16], children: &BTreeMap<[u8; 16], BTreeSet<[u8; 16]>>, out: &mut Vec<[u8; 16]>) {
            if let Some(kids) = children.get(&parent) {
                for child in kids {
                    out.push(*child);
                    walk(*child, children, out);
                }
            }
        }
        walk(ROOT, &children, &mut out);
        out
    }

    /// The tree in pre-order, including tombstoned nodes, as full
    /// `CtDatum` wrapped values. Use this to find a node to delete or
    /// to attach a new child to, since those operations need the
    /// node's uuid and parent_uuid.
    pub fn read_full(&self) -> Vec<WrappedValue> {
        let nodes = self.decode_nodes();
        self.traversal_order()
            .into_iter()
            .filter_map(|uuid| {
                let (value, parent_uuid, visible) = nodes.get(&uuid)?;
                Some(WrappedValue::CtDatum {
                    value: Box::new(value.clone()),
                    uuid,
                    parent_uuid: *parent_uuid,
                    visible: *visible,
                })
            })
            .collect()
    }

    /// The visible values in tree order, unwrapped from their nodes.
    pub fn read(&self) -> Vec<WrappedValue> {
        self.read_full()
            .into_iter()
            .filter_map(|datum| match datum {
                WrappedValue::CtDatum { value, visible: true, .. } => Some(*value),
                _ => None,
            })
            .collect()
    }

    fn produce(&mut self, op_visible: bool, uuid: [u8; 16], parent_uuid: [u8; 16], value: WrappedValue, writer: i64) -> Result<StateUpdate, CrdtError> {
        let key = Value::Bytes(uuid.to_vec());
        let datum = WrappedValue::CtDatum {
            value: Box::new(value),
            uuid,
            parent_uuid,
            visible: op_visible,
        };
        self.positions.set(key, datum, writer)
    }

    /// Creates, applies, and returns the update that puts `item` as a
    /// node with the given `uuid`, parented to `parent_uuid` (`ROOT`
    /// for a top-level node).
    pub fn put(&mut self, item: WrappedValue, writer: i64, uuid: [u8; 16], parent_uuid: [u8; 16]) -> Result<StateUpdate, CrdtError> {
        self.produce(true, uuid, parent_uuid, item, writer)
    }

    /// Puts `item` as a new last child of `parent`, which must be a
    /// `CtDatum` already present in [`Self::read_full`].
    pub fn put_after(&mut self, item: WrappedValue, writer: i64, parent: &WrappedValue) -> Result<StateUpdate, CrdtError> {
        let parent_uuid = match parent {
            WrappedValue::CtDatum { uuid, .. } => *uuid,
            _ => return Err(CrdtError::value_invalid("parent must be a CtDatum")),
        };
        if !self.read_full().iter().any(|d| matches!(d, WrappedValue::CtDatum { uuid, .. } if *uuid == parent_uuid)) {
            return Err(CrdtError::value_invalid("parent must already be assigned a position"));
        }
        let uuid = ulid::Ulid::new().to_bytes();
        self.put(item, writer, uuid, parent_uuid)
    }

    /// Puts `item` as a new top-level node.
    pub fn put_first(&mut self, item: WrappedValue, writer: i64) -> Result<StateUpdate, CrdtError> {
        let uuid = ulid::Ulid::new().to_bytes();
        self.put(item, writer, uuid, ROOT)
    }

    /// Tombstones the node identified by `ctdw`, a `CtDatum` from
    /// [`Self::read_full`]. The node's position and parent linkage are
    /// retained so its children, if any, remain reachable.
    pub fn delete(&mut self, ctdw: &WrappedValue, writer: i64) -> Result<StateUpdate, CrdtError> {
        let (uuid, parent_uuid) = match ctdw {
            WrappedValue::CtDatum { uuid, parent_uuid, .. } => (*uuid, *parent_uuid),
            _ => return Err(CrdtError::value_invalid("ctdw must be a CtDatum")),
        };
        self.produce(false, uuid, parent_uuid, WrappedValue::None, writer)
    }

    /// Re-parents `ctdw` under `new_parent_uuid` (`ROOT` to make it
    /// top-level again) by writing a new `CtDatum` at the same uuid.
    /// Concurrent moves of two nodes under each other form a cycle;
    /// such nodes drop out of [`Self::read`]/[`Self::read_full`] and
    /// surface only via [`Self::read_excluded`].
    pub fn move_item(&mut self, ctdw: &WrappedValue, writer: i64, new_parent_uuid: [u8; 16]) -> Result<StateUpdate, CrdtError> {
        let (uuid, value, visible) = match ctdw {
            WrappedValue::CtDatum { uuid, value, visible, .. } => (*uuid, (**value).clone(), *visible),
            _ => return Err(CrdtError::value_invalid("ctdw must be a CtDatum")),
        };
        self.produce(visible, uuid, new_parent_uuid, value, writer)
    }

    /// The nodes present in the map but excluded from
    /// [`Self::read_full`] because no path connects them back to the
    /// root -- i.e. nodes stranded in a cycle by concurrent
    /// [`Self::move_item`] calls.
    pub fn read_excluded(&self) -> Vec<WrappedValue> {
        let nodes = self.decode_nodes();
        let reachable: std::collections::HashSet<[u8; 16]> = self.traversal_order().into_iter().collect();
        nodes
            .into_iter()
            .filter(|(uuid, _)| !reachable.contains(uuid))
            .map(|(uuid, (value, parent_uuid, visible))| WrappedValue::CtDatum {
                value: Box::new(value),
                uuid,
                parent_uuid,
                visible,
            })
            .collect()
    }

    pub fn update(&mut self, su: StateUpdate) -> Result<&mut Self, CrdtError> {
        self.positions.update(su)?;
        self.clock = self.positions.clock().clone();
        Ok(self)
    }

    pub fn checksums(&self) -> (usize, u32) {
        self.positions.checksums()
    }

    pub fn history(&self, from_ts: Option<Timestamp>, until_ts: Option<Timestamp>) -> Vec<StateUpdate> {
        self.positions.history(from_ts, until_ts)
    }

    pub fn pack(&self) -> Vec<u8> {
        self.positions.pack()
    }

    pub fn unpack(data: &[u8], registry: &TypeRegistry) -> Result<Self, CrdtError> {
        let positions = LwwMap::unpack(data, registry)?;
        let clock = positions.clock().clone();
        Ok(CausalTree { clock, positions })
    }
}

impl MerkleCrdt for CausalTree {
    fn history(&self, from_ts: Option<Timestamp>, until_ts: Option<Timestamp>) -> Vec<StateUpdate> {
        CausalTree::history(self, from_ts, until_ts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use convergent_core::empty_registry;

    #[test]
    fn put_first_then_put_after_orders_as_parent_then_child() {
        let mut t = CausalTree::new(ScalarClock::new([1; 16]));
        t.put_first(WrappedValue::Str("root".into()), 1).unwrap();
        let root = t.read_full().into_iter().next().unwrap();
        t.put_after(WrappedValue::Str("child".into()), 1, &root).unwrap();
        assert_eq!(t.read(), vec![WrappedValue::Str("root".into()), WrappedValue::Str("child".into())]);
    }

    #[test]
    fn siblings_order_by_uuid() {
        let mut t = CausalTree::new(ScalarClock::new([2; 16]));
        t.put(WrappedValue::Str("b".into()), 1, [9; 16], ROOT).unwrap();
        t.put(WrappedValue::Str("a".into()), 1, [1; 16], ROOT).unwrap();
        assert_eq!(t.read(), vec![WrappedValue::Str("a".into()), WrappedValue::Str("b".into())]);
    }

    #[test]
    fn delete_hides_the_value_but_keeps_children_reachable() {
        let mut t = CausalTree::new(ScalarClock::new([3; 16]));
        t.put(WrappedValue::Str("parent".into()), 1, [1; 16], ROOT).unwrap();
        let parent = t.read_full().into_iter().next().unwrap();
        t.put_after(WrappedValue::Str("child".into()), 1, &parent).unwrap();
        t.delete(&parent, 1).unwrap();
        assert_eq!(t.read(), vec![WrappedValue::Str("child".into())]);
        assert_eq!(t.read_full().len(), 2);
    }

    #[test]
    fn orphan_with_missing_parent_is_not_traversed() {
        let mut t = CausalTree::new(ScalarClock::new([4; 16]));
        t.put(WrappedValue::Str("orphan".into()), 1, [7; 16], [5; 16]).unwrap();
        assert_eq!(t.read(), Vec::<WrappedValue>::new());
    }

    #[test]
    fn concurrent_cross_moves_strand_both_nodes_as_excluded() {
        let mut t = CausalTree::new(ScalarClock::new([6; 16]));
        t.put(WrappedValue::Str("a".into()), 1, [1; 16], ROOT).unwrap();
        t.put(WrappedValue::Str("b".into()), 1, [2; 16], [1; 16]).unwrap();
        let a = t.read_full().into_iter().find(|d| matches!(d, WrappedValue::CtDatum { uuid, .. } if *uuid == [1; 16])).unwrap();
        t.move_item(&a, 1, [2; 16]).unwrap();
        assert_eq!(t.read(), Vec::<WrappedValue>::new());
        assert_eq!(t.read_excluded().len(), 2);
    }

    #[test]
    fn pack_round_trips() {
        let mut t = CausalTree::new(ScalarClock::new([5; 16]));
        t.put_first(WrappedValue::Int(1), 1).unwrap();
        let packed = t.pack();
        let restored = CausalTree::unpack(&packed, &empty_registry()).unwrap();
        assert_eq!(restored.read(), t.read());
    }
}
