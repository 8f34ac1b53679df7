//! `CounterSet`: the recommended strongly multi-writer counter. A
//! [`GSet`] of counter ids paired with one independent
//! [`PnCounter`] per id.

use crate::gset::GSet;
use crate::merkle_crdt::MerkleCrdt;
use crate::pncounter::PnCounter;
use convergent_core::{CrdtError, Payload, ScalarClock, StateUpdate, Timestamp, TypeRegistry, Value};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq)]
pub struct CounterSet {
    clock: ScalarClock,
    ids: GSet,
    counters: BTreeMap<Value, PnCounter>,
}

impl CounterSet {
    pub fn new(clock: ScalarClock) -> Self {
        CounterSet {
            ids: GSet::new(clock.clone()),
            counters: BTreeMap::new(),
            clock,
        }
    }

    pub fn clock(&self) -> &ScalarClock {
        &self.clock
    }

    pub fn read(&self) -> i64 {
        self.counters.values().map(|c| c.read()).sum()
    }

    pub fn read_full(&self) -> BTreeMap<Value, i64> {
        self.counters.iter().map(|(id, c)| (id.clone(), c.read())).collect()
    }

    fn counter_mut(&mut self, counter_id: &Value) -> &mut PnCounter {
        self.counters
            .entry(counter_id.clone())
            .or_insert_with(|| PnCounter::new(self.clock.clone()))
    }

    pub fn increase(&mut self, counter_id: Value, amount: u32) -> Result<(StateUpdate, StateUpdate), CrdtError> {
        let id_su = self.ids.add(counter_id.clone())?;
        let amount_su = self.counter_mut(&counter_id).increase(amount)?;
        Ok((id_su, amount_su))
    }

    pub fn decrease(&mut self, counter_id: Value, amount: u32) -> Result<(StateUpdate, StateUpdate), CrdtError> {
        let id_su = self.ids.add(counter_id.clone())?;
        let amount_su = self.counter_mut(&counter_id).decrease(amount)?;
        Ok((id_su, amount_su))
    }

    /// Applies an id-registration envelope produced by [`GSet::add`].
    ///
    /// `ids` and each per-id counter keep independent clocks cloned
    /// from this set's clock at construction time; each then advances
    /// deterministically from the same `(counter, uuid)` starting
    /// point via its own stream of updates, which is enough for every
    /// child's internal causal comparisons to stay correct without
    /// giving every child shared mutable access to one clock instance.
    pub fn update_id(&mut self, su: StateUpdate) -> Result<&mut Self, CrdtError> {
        self.ids.update(su)?;
        Ok(self)
    }

    /// Applies a counter-amount envelope for `counter_id`, previously
    /// produced by [`PnCounter::increase`]/[`PnCounter::decrease`].
    pub fn update_counter(&mut self, counter_id: Value, su: StateUpdate) -> Result<&mut Self, CrdtError> {
        if !self.ids.contains(&counter_id) {
            return Err(CrdtError::usage("counter id has not been registered via update_id"));
        }
        self.counter_mut(&counter_id).update(su)?;
        Ok(self)
    }

    pub fn checksums(&self) -> (usize, i64) {
        (self.counters.len(), self.read())
    }

    pub fn pack(&self) -> Vec<u8> {
        let mut out = self.clock.pack();
        let ids_packed = self.ids.pack();
        out.extend_from_slice(&(ids_packed.len() as u32).to_be_bytes());
        out.extend_from_slice(&ids_packed);
        out.extend_from_slice(&(self.counters.len() as u32).to_be_bytes());
        for (id, counter) in &self.counters {
            let id_packed = id.pack();
            out.extend_from_slice(&(id_packed.len() as u32).to_be_bytes());
            out.extend_from_slice(&id_packed);
            let counter_packed = counter.pack();
            out.extend_from_slice(&(counter_packed.len() as u32).to_be_bytes());
            out.extend_from_slice(&counter_packed);
        }
        out
    }

    pub fn unpack(data: &[u8], registry: &TypeRegistry) -> Result<Self, CrdtError> {
        if data.len() < 24 {
            return Err(CrdtError::type_invalid("packed counterset too short"));
        }
        let clock = ScalarClock::unpack(&data[..20])?;
        let mut rest = &data[20..];
        let ids_len = read_u32(&mut rest)?;
        if rest.len() < ids_len {
            return Err(CrdtError::type_invalid("truncated counterset ids"));
        }
        let ids = GSet::unpack(&rest[..ids_len], registry)?;
        rest = &rest[ids_len..];
        let count = read_u32(&mut rest)?;
        let mut counters = BTreeMap::new();
        for _ in 0..count {
            let id_len = read_u32(&mut rest)?;
            if rest.len() < id_len {
                return Err(CrdtError::type_invalid("truncated counterset id"));
            }
            let id = Value::unpack(&rest[..id_len])?;
            rest = &rest[id_len..];
            let counter_len = read_u32(&mut rest)?;
            if rest.len() < counter_len {
                return Err(CrdtError::type_invalid("truncated counterset counter"));
            }
            let counter = PnCounter::unpack(&rest[..counter_len])?;
            rest = &rest[counter_len..];
            counters.insert(id, counter);
        }
        Ok(CounterSet { clock, ids, counters })
    }
}

fn read_u32(rest: &mut &[u8]) -> Result<usize, CrdtError> {
    if rest.len() < 4 {
        return Err(CrdtError::type_invalid("truncated length prefix"));
    }
    let len = u32::from_be_bytes(rest[..4].try_into().unwrap()) as usize;
    *rest = &rest[4..];
    Ok(len)
}

impl MerkleCrdt for CounterSet {
    fn history(&self, from_ts: Option<Timestamp>, until_ts: Option<Timestamp>) -> Vec<StateUpdate> {
        let mut out = self.ids.history(from_ts, until_ts);
        for counter in self.counters.values() {
            out.extend(counter.history(from_ts, until_ts));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use convergent_core::empty_registry;

    #[test]
    fn independent_counters_sum_together() {
        let mut cs = CounterSet::new(ScalarClock::new([1; 16]));
        cs.increase(Value::Str("a".into()), 3).unwrap();
        cs.increase(Value::Str("b".into()), 4).unwrap();
        assert_eq!(cs.read(), 7);
    }

    #[test]
    fn each_counter_id_merges_independently() {
        let mut r1 = CounterSet::new(ScalarClock::new([1; 16]));
        let (id_su, amt_su) = r1.increase(Value::Str("x".into()), 5).unwrap();

        let mut r2 = CounterSet::new(ScalarClock::new([1; 16]));
        r2.update_id(id_su).unwrap();
        r2.update_counter(Value::Str("x".into()), amt_su).unwrap();

        assert_eq!(r2.read(), 5);
    }

    #[test]
    fn pack_round_trips() {
        let mut cs = CounterSet::new(ScalarClock::new([5; 16]));
        cs.increase(Value::Str("p".into()), 2).unwrap();
        cs.decrease(Value::Str("p".into()), 1).unwrap();
        let packed = cs.pack();
        let restored = CounterSet::unpack(&packed, &empty_registry()).unwrap();
        assert_eq!(restored, cs);
    }
}
