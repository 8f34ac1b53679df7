//! `RgArray`: a replicated growable array. Built on an [`ORSet`] whose
//! members are packed `RGATupleWrapper` bytes -- each item carries the
//! `(ts, writer)` stamp that gives concurrent appends a deterministic
//! total order.
//!
//! `ORSet` members are opaque, ordered, hashable `Value`s; a wrapped
//! item is represented as `Value::Bytes(item.pack())` so the set only
//! ever needs to compare and hash bytes, never to understand the
//! item's internal shape.

use crate::merkle_crdt::MerkleCrdt;
use crate::orset::ORSet;
use convergent_core::{CrdtError, Payload, ScalarClock, StateUpdate, Timestamp, TypeRegistry, Value, WrappedValue};

const OP_OBSERVE: &str = "o";
const OP_REMOVE: &str = "r";

#[derive(Clone, PartialEq)]
pub struct RgArray {
    clock: ScalarClock,
    items: ORSet,
}

impl std::fmt::Debug for RgArray {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RgArray").field("clock", &self.clock).field("len", &self.read().len()).finish()
    }
}

/// `((ts, writer), class_name, wrapped_bytes)` -- the total order used
/// for both reading the array and incrementally positioning a new item.
fn sort_key(item: &WrappedValue) -> (i64, i64, &'static str, Vec<u8>) {
    match item {
        WrappedValue::RgaItem { value, ts, writer } => (*ts, *writer, value.class_name(), value.pack()),
        other => (0, 0, other.class_name(), other.pack()),
    }
}

impl RgArray {
    pub fn new(clock: ScalarClock) -> Self {
        RgArray {
            items: ORSet::new(clock.clone()),
            clock,
        }
    }

    pub fn clock(&self) -> &ScalarClock {
        &self.clock
    }

    fn decode_items(&self) -> Vec<WrappedValue> {
        let registry = convergent_core::empty_registry();
        let mut items: Vec<WrappedValue> = self
            .items
            .read()
            .into_iter()
            .filter_map(|v| match v {
                Value::Bytes(packed) => WrappedValue::unpack(&packed, &registry).ok(),
                _ => None,
            })
            .collect();
        items.sort_by(|a, b| sort_key(a).cmp(&sort_key(b)));
        items
    }

    /// The visible values in array order.
    pub fn read(&self) -> Vec<WrappedValue> {
        self.decode_items()
            .into_iter()
            .map(|item| match item {
                WrappedValue::RgaItem { value, .. } => *value,
                other => other,
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn index_of(&self, value: &WrappedValue) -> Option<usize> {
        self.read().iter().position(|v| v == value)
    }

    pub fn append(&mut self, value: WrappedValue, writer: i64) -> Result<StateUpdate, CrdtError> {
        let ts = self.clock.read();
        let item = WrappedValue::RgaItem {
            value: Box::new(value),
            ts,
            writer,
        };
        let su = StateUpdate::new(
            self.clock.uuid,
            ts,
            Payload::tuple(vec![
                Payload::Value(Value::Str(OP_OBSERVE.to_string())),
                Payload::Value(Value::Bytes(item.pack())),
            ]),
        );
        self.apply(&su)?;
        Ok(su)
    }

    /// Deletes the item at `index` in the current read-order view.
    pub fn remove_at(&mut self, index: usize) -> Result<StateUpdate, CrdtError> {
        let items = self.decode_items();
        let item = items
            .get(index)
            .ok_or_else(|| CrdtError::value_invalid(format!("index {index} out of bounds")))?;
        let ts = self.clock.read();
        let su = StateUpdate::new(
            self.clock.uuid,
            ts,
            Payload::tuple(vec![
                Payload::Value(Value::Str(OP_REMOVE.to_string())),
                Payload::Value(Value::Bytes(item.pack())),
            ]),
        );
        self.apply(&su)?;
        Ok(su)
    }

    pub fn update(&mut self, su: StateUpdate) -> Result<&mut Self, CrdtError> {
        self.apply(&su)?;
        Ok(self)
    }

    fn apply(&mut self, su: &StateUpdate) -> Result<(), CrdtError> {
        if su.clock_uuid != self.clock.uuid {
            return Err(CrdtError::type_invalid("update clock_uuid does not match array's clock"));
        }
        self.items.update(su.clone())?;
        self.clock.update(su.ts)?;
        Ok(())
    }

    pub fn checksums(&self, from_ts: Option<Timestamp>, until_ts: Option<Timestamp>) -> (Timestamp, usize, usize) {
        self.items.checksums(from_ts, until_ts)
    }

    pub fn history(&self, from_ts: Option<Timestamp>, until_ts: Option<Timestamp>) -> Vec<StateUpdate> {
        self.items.history(from_ts, until_ts)
    }

    pub fn pack(&self) -> Vec<u8> {
        let mut out = self.clock.pack();
        out.extend_from_slice(&self.items.pack());
        out
    }

    pub fn unpack(data: &[u8], registry: &TypeRegistry) -> Result<Self, CrdtError> {
        if data.len() < 20 {
            return Err(CrdtError::type_invalid("packed rga too short"));
        }
        let clock = ScalarClock::unpack(&data[..20])?;
        let items = ORSet::unpack(&data[20..], registry)?;
        Ok(RgArray { clock, items })
    }
}

impl MerkleCrdt for RgArray {
    fn history(&self, from_ts: Option<Timestamp>, until_ts: Option<Timestamp>) -> Vec<StateUpdate> {
        RgArray::history(self, from_ts, until_ts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use convergent_core::empty_registry;

    #[test]
    fn appends_stay_in_stamp_order() {
        let mut a = RgArray::new(ScalarClock::new([1; 16]));
        a.append(WrappedValue::Str("x".into()), 1).unwrap();
        a.append(WrappedValue::Str("y".into()), 1).unwrap();
        assert_eq!(a.read(), vec![WrappedValue::Str("x".into()), WrappedValue::Str("y".into())]);
    }

    #[test]
    fn concurrent_appends_by_different_writers_order_by_writer_id() {
        let uuid = [2; 16];
        let item_a = WrappedValue::RgaItem {
            value: Box::new(WrappedValue::Str("a".into())),
            ts: 5,
            writer: 1,
        };
        let item_b = WrappedValue::RgaItem {
            value: Box::new(WrappedValue::Str("b".into())),
            ts: 5,
            writer: 2,
        };
        let su_a = StateUpdate::new(
            uuid,
            5,
            Payload::tuple(vec![
                Payload::Value(Value::Str("o".into())),
                Payload::Value(Value::Bytes(item_a.pack())),
            ]),
        );
        let su_b = StateUpdate::new(
            uuid,
            5,
            Payload::tuple(vec![
                Payload::Value(Value::Str("o".into())),
                Payload::Value(Value::Bytes(item_b.pack())),
            ]),
        );

        let mut r1 = RgArray::new(ScalarClock::new(uuid));
        r1.update(su_a.clone()).unwrap();
        r1.update(su_b.clone()).unwrap();

        let mut r2 = RgArray::new(ScalarClock::new(uuid));
        r2.update(su_b).unwrap();
        r2.update(su_a).unwrap();

        assert_eq!(r1.read(), r2.read());
        assert_eq!(r1.read(), vec![WrappedValue::Str("a".into()), WrappedValue::Str("b".into())]);
    }

    #[test]
    fn remove_at_deletes_the_item() {
        let mut a = RgArray::new(ScalarClock::new([3; 16]));
        a.append(WrappedValue::Str("x".into()), 1).unwrap();
        a.append(WrappedValue::Str("y".into()), 1).unwrap();
        a.remove_at(0).unwrap();
        assert_eq!(a.read(), vec![WrappedValue::Str("y".into())]);
    }

    #[test]
    fn pack_round_trips() {
        let mut a = RgArray::new(ScalarClock::new([4; 16]));
        a.append(WrappedValue::Int(1), 1).unwrap();
        a.append(WrappedValue::Int(2), 1).unwrap();
        let packed = a.pack();
        let restored = RgArray::unpack(&packed, &empty_registry()).unwrap();
        assert_eq!(restored.read(), a.read());
    }
}
