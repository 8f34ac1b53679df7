//! `FiArray`: a fractionally-indexed array. Every item is keyed by its
//! own packed bytes in an [`LwwMap`] whose register value is the
//! item's `Decimal` position; reading sorts that map by
//! `(position, item class name, item bytes)`.
//!
//! Unlike [`crate::rga::RgArray`], insertion order is not determined by
//! timestamps but by indices the caller picks between -- concurrent
//! inserts at "the same place" land at different random offsets of the
//! midpoint, so they rarely collide, and when they do the deterministic
//! sort order still converges every replica on the same sequence.

use crate::lww_map::LwwMap;
use crate::merkle_crdt::MerkleCrdt;
use convergent_core::{CrdtError, ScalarClock, StateUpdate, Timestamp, TypeRegistry, Value, WrappedValue};
use rand::Rng;
use rust_decimal::Decimal;
use std::str::FromStr;

#[derive(Clone, PartialEq)]
pub struct FiArray {
    clock: ScalarClock,
    positions: LwwMap,
}

impl std::fmt::Debug for FiArray {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FiArray").field("clock", &self.clock).field("len", &self.read().len()).finish()
    }
}

/// `(position, item class name, item bytes)` -- the read order, and the
/// insertion point a new item's position is picked to land between.
fn sort_key(position: &Decimal, item: &WrappedValue) -> (Decimal, &'static str, Vec<u8>) {
    (*position, item.class_name(), item.pack())
}

impl FiArray {
    pub fn new(clock: ScalarClock) -> Self {
        FiArray {
            positions: LwwMap::new(clock.clone()),
            clock,
        }
    }

    pub fn clock(&self) -> &ScalarClock {
        &self.clock
    }

    fn decode_items(&self) -> Vec<(WrappedValue, Decimal)> {
        let registry = convergent_core::empty_registry();
        let mut items: Vec<(WrappedValue, Decimal)> = self
            .positions
            .read()
            .into_iter()
            .filter_map(|(key, value)| {
                let item = match key {
                    Value::Bytes(packed) => WrappedValue::unpack(&packed, &registry).ok()?,
                    _ => return None,
                };
                let position = match value {
                    WrappedValue::Decimal(d) => d,
                    _ => return None,
                };
                Some((item, position))
            })
            .collect();
        items.sort_by(|(a_item, a_pos), (b_item, b_pos)| sort_key(a_pos, a_item).cmp(&sort_key(b_pos, b_item)));
        items
    }

    /// The visible items in array order, without their positions.
    pub fn read(&self) -> Vec<WrappedValue> {
        self.decode_items().into_iter().map(|(item, _)| item).collect()
    }

    /// The visible items in array order, paired with the `Decimal`
    /// position each currently holds. Needed to compute a new index
    /// relative to an existing item.
    pub fn read_full(&self) -> Vec<(WrappedValue, Decimal)> {
        self.decode_items()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns a least-significant-digit-perturbed offset of `index`,
    /// so concurrent inserts that compute the same midpoint rarely land
    /// on exactly the same position.
    fn index_offset(index: Decimal) -> Decimal {
        let exponent = least_significant_exponent(index) - 1;
        let digit: i64 = rand::thread_rng().gen_range(1..9);
        let offset = Decimal::new(digit, 0) * pow10(exponent);
        index + offset
    }

    fn index_between(first: Decimal, second: Decimal) -> Decimal {
        Self::index_offset((first + second) / Decimal::from(2))
    }

    fn position_of(&self, item: &WrappedValue) -> Result<Decimal, CrdtError> {
        self.decode_items()
            .into_iter()
            .find(|(i, _)| i == item)
            .map(|(_, pos)| pos)
            .ok_or_else(|| CrdtError::value_invalid("item must already be assigned a position"))
    }

    fn produce(&mut self, item: WrappedValue, writer: i64, position: Decimal) -> Result<StateUpdate, CrdtError> {
        let key = Value::Bytes(item.pack());
        self.positions.set(key, WrappedValue::Decimal(position), writer)
    }

    pub fn put(&mut self, item: WrappedValue, writer: i64, index: Decimal) -> Result<StateUpdate, CrdtError> {
        self.produce(item, writer, index)
    }

    pub fn put_between(
        &mut self,
        item: WrappedValue,
        writer: i64,
        first: &WrappedValue,
        second: &WrappedValue,
    ) -> Result<StateUpdate, CrdtError> {
        let first_index = self.position_of(first)?;
        let second_index = self.position_of(second)?;
        let index = Self::index_between(first_index, second_index);
        self.put(item, writer, index)
    }

    pub fn put_before(&mut self, item: WrappedValue, writer: i64, other: &WrappedValue) -> Result<StateUpdate, CrdtError> {
        let items = self.read_full();
        let other_index = self.position_of(other)?;
        let position = items.iter().position(|(i, _)| i == other).unwrap();
        let prior_index = if position > 0 { items[position - 1].1 } else { Decimal::ZERO };
        let index = Self::index_between(other_index, prior_index);
        self.put(item, writer, index)
    }

    pub fn put_after(&mut self, item: WrappedValue, writer: i64, other: &WrappedValue) -> Result<StateUpdate, CrdtError> {
        let items = self.read_full();
        let other_index = self.position_of(other)?;
        let position = items.iter().position(|(i, _)| i == other).unwrap();
        let next_index = if items.len() > position + 1 { items[position + 1].1 } else { Decimal::from(1) };
        let index = Self::index_between(other_index, next_index);
        self.put(item, writer, index)
    }

    pub fn put_first(&mut self, item: WrappedValue, writer: i64) -> Result<StateUpdate, CrdtError> {
        let items = self.read_full();
        let index = if let Some((_, first_index)) = items.first() {
            (Decimal::ZERO + *first_index) / Decimal::from(2)
        } else {
            Decimal::from_str("0.5").unwrap()
        };
        self.put(item, writer, Self::index_offset(index))
    }

    pub fn put_last(&mut self, item: WrappedValue, writer: i64) -> Result<StateUpdate, CrdtError> {
        let items = self.read_full();
        let index = if let Some((_, last_index)) = items.last() {
            (*last_index + Decimal::from(1)) / Decimal::from(2)
        } else {
            Decimal::from_str("0.5").unwrap()
        };
        self.put(item, writer, Self::index_offset(index))
    }

    pub fn delete(&mut self, item: &WrappedValue, writer: i64) -> Result<StateUpdate, CrdtError> {
        let key = Value::Bytes(item.pack());
        self.positions.unset(key, writer)
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
        Ok(FiArray { clock, positions })
    }
}

/// The least-significant decimal digit's place, as a power-of-ten
/// exponent, e.g. `0.201 -> -3`.
fn least_significant_exponent(number: Decimal) -> i32 {
    let text = number.normalize().to_string();
    if let Some(dot) = text.find('.') {
        -((text.len() - dot - 1) as i32)
    } else {
        0
    }
}

fn pow10(exponent: i32) -> Decimal {
    if exponent >= 0 {
        Decimal::from(10i64.pow(exponent as u32))
    } else {
        Decimal::new(1, (-exponent) as u32)
    }
}

impl MerkleCrdt for FiArray {
    fn history(&self, from_ts: Option<Timestamp>, until_ts: Option<Timestamp>) -> Vec<StateUpdate> {
        FiArray::history(self, from_ts, until_ts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use convergent_core::empty_registry;

    #[test]
    fn put_first_then_put_last_orders_items() {
        let mut a = FiArray::new(ScalarClock::new([1; 16]));
        a.put_first(WrappedValue::Str("a".into()), 1).unwrap();
        a.put_last(WrappedValue::Str("b".into()), 1).unwrap();
        assert_eq!(a.read(), vec![WrappedValue::Str("a".into()), WrappedValue::Str("b".into())]);
    }

    #[test]
    fn put_between_lands_in_the_middle() {
        let mut a = FiArray::new(ScalarClock::new([2; 16]));
        let first = WrappedValue::Str("first".into());
        let last = WrappedValue::Str("last".into());
        a.put(first.clone(), 1, Decimal::ZERO).unwrap();
        a.put(last.clone(), 1, Decimal::from(1)).unwrap();
        let middle = WrappedValue::Str("middle".into());
        a.put_between(middle.clone(), 1, &first, &last).unwrap();
        assert_eq!(a.read(), vec![first, middle, last]);
    }

    #[test]
    fn delete_removes_the_item() {
        let mut a = FiArray::new(ScalarClock::new([3; 16]));
        a.put_first(WrappedValue::Str("x".into()), 1).unwrap();
        let x = WrappedValue::Str("x".into());
        a.delete(&x, 1).unwrap();
        assert_eq!(a.read(), Vec::<WrappedValue>::new());
    }

    #[test]
    fn concurrent_puts_converge_by_position_then_bytes() {
        let uuid = [4; 16];
        let mut r1 = FiArray::new(ScalarClock::new(uuid));
        let su1 = r1.put(WrappedValue::Str("a".into()), 1, Decimal::from_str("0.5").unwrap()).unwrap();
        let su2 = r1.put(WrappedValue::Str("b".into()), 1, Decimal::from_str("0.5").unwrap()).unwrap();

        let mut r2 = FiArray::new(ScalarClock::new(uuid));
        r2.update(su2).unwrap();
        r2.update(su1).unwrap();

        assert_eq!(r1.read(), r2.read());
    }

    #[test]
    fn pack_round_trips() {
        let mut a = FiArray::new(ScalarClock::new([5; 16]));
        a.put_first(WrappedValue::Int(1), 1).unwrap();
        a.put_last(WrappedValue::Int(2), 1).unwrap();
        let packed = a.pack();
        let restored = FiArray::unpack(&packed, &empty_registry()).unwrap();
        assert_eq!(restored.read(), a.read());
    }
}
