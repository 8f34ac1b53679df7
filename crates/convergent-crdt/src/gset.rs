//! `GSet`: a grow-only set. The simplest CRDT in this workspace --
//! merge is union, and nothing is ever removed.

use crate::merkle_crdt::MerkleCrdt;
use convergent_core::{CrdtError, Payload, ScalarClock, StateUpdate, Timestamp, Value};
use std::collections::BTreeMap;

/// Keeps, alongside the member set itself, the envelope that last
/// touched each member -- the richer of the two variants the source
/// shows, chosen because it is the only one that lets `checksums` and
/// `history` be bounded by a timestamp window.
#[derive(Debug, Clone, PartialEq)]
pub struct GSet {
    clock: ScalarClock,
    update_history: BTreeMap<Value, StateUpdate>,
}

impl GSet {
    pub fn new(clock: ScalarClock) -> Self {
        GSet {
            clock,
            update_history: BTreeMap::new(),
        }
    }

    pub fn clock(&self) -> &ScalarClock {
        &self.clock
    }

    pub fn read(&self) -> Vec<Value> {
        self.update_history.keys().cloned().collect()
    }

    pub fn contains(&self, member: &Value) -> bool {
        self.update_history.contains_key(member)
    }

    pub fn add(&mut self, member: Value) -> Result<StateUpdate, CrdtError> {
        let ts = self.clock.read();
        let su = StateUpdate::new(self.clock.uuid, ts, Payload::Value(member));
        self.apply(&su)?;
        Ok(su)
    }

    pub fn update(&mut self, su: StateUpdate) -> Result<&mut Self, CrdtError> {
        self.apply(&su)?;
        Ok(self)
    }

    fn apply(&mut self, su: &StateUpdate) -> Result<(), CrdtError> {
        if su.clock_uuid != self.clock.uuid {
            return Err(CrdtError::type_invalid("update clock_uuid does not match gset's clock"));
        }
        let member = match &su.data {
            Payload::Value(v) => v.clone(),
            _ => return Err(CrdtError::type_invalid("gset payload must be a plain value")),
        };
        self.clock.update(su.ts)?;
        self.update_history
            .entry(member)
            .or_insert_with(|| su.clone());
        Ok(())
    }

    /// `(upper_ts_bound, count, crc32_sum)` over members whose stored
    /// ts falls in `[from_ts, until_ts]`. The upper bound is
    /// `until_ts` if given, else the clock's current read -- not the
    /// max of the members' own stored timestamps, which two replicas
    /// that agree on membership can still disagree on (a member's
    /// stored envelope is whichever one first observed it, and that
    /// first-observer ts differs by replica).
    pub fn checksums(&self, from_ts: Option<Timestamp>, until_ts: Option<Timestamp>) -> (Timestamp, usize, u32) {
        let mut count = 0;
        let mut crc = crc32fast::Hasher::new();
        for su in self.update_history.values() {
            if from_ts.map_or(false, |f| su.ts < f) || until_ts.map_or(false, |u| su.ts > u) {
                continue;
            }
            count += 1;
            crc.update(&su.data.pack());
        }
        let upper = until_ts.unwrap_or_else(|| self.clock.read());
        (upper, count, crc.finalize())
    }

    pub fn history(&self, from_ts: Option<Timestamp>, until_ts: Option<Timestamp>) -> Vec<StateUpdate> {
        self.update_history
            .values()
            .filter(|su| !from_ts.map_or(false, |f| su.ts < f) && !until_ts.map_or(false, |u| su.ts > u))
            .cloned()
            .collect()
    }

    pub fn pack(&self) -> Vec<u8> {
        let mut out = self.clock.pack();
        out.extend_from_slice(&(self.update_history.len() as u32).to_be_bytes());
        for su in self.update_history.values() {
            let packed = su.pack();
            out.extend_from_slice(&(packed.len() as u32).to_be_bytes());
            out.extend_from_slice(&packed);
        }
        out
    }

    pub fn unpack(data: &[u8], registry: &convergent_core::TypeRegistry) -> Result<Self, CrdtError> {
        if data.len() < 24 {
            return Err(CrdtError::type_invalid("packed gset too short"));
        }
        let clock = ScalarClock::unpack(&data[..20])?;
        let count = u32::from_be_bytes(data[20..24].try_into().unwrap()) as usize;
        let mut rest = &data[24..];
        let mut update_history = BTreeMap::new();
        for _ in 0..count {
            if rest.len() < 4 {
                return Err(CrdtError::type_invalid("truncated gset entry length"));
            }
            let len = u32::from_be_bytes(rest[..4].try_into().unwrap()) as usize;
            rest = &rest[4..];
            if rest.len() < len {
                return Err(CrdtError::type_invalid("truncated gset entry"));
            }
            let su = StateUpdate::unpack(&rest[..len], registry)?;
            rest = &rest[len..];
            let member = match &su.data {
                Payload::Value(v) => v.clone(),
                _ => return Err(CrdtError::type_invalid("gset payload must be a plain value")),
            };
            update_history.insert(member, su);
        }
        Ok(GSet { clock, update_history })
    }
}

impl MerkleCrdt for GSet {
    fn history(&self, from_ts: Option<Timestamp>, until_ts: Option<Timestamp>) -> Vec<StateUpdate> {
        GSet::history(self, from_ts, until_ts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use convergent_core::empty_registry;

    #[test]
    fn add_grows_membership() {
        let mut s = GSet::new(ScalarClock::new([1; 16]));
        s.add(Value::Int(1)).unwrap();
        s.add(Value::Int(2)).unwrap();
        let mut members = s.read();
        members.sort();
        assert_eq!(members, vec![Value::Int(1), Value::Int(2)]);
    }

    #[test]
    fn converges_regardless_of_application_order() {
        let mut r1 = GSet::new(ScalarClock::new([1; 16]));
        let su1 = r1.add(Value::Int(1)).unwrap();
        let su2 = r1.add(Value::Int(2)).unwrap();

        let mut r2 = GSet::new(ScalarClock::new([1; 16]));
        r2.update(su2).unwrap();
        r2.update(su1).unwrap();

        let mut a = r1.read();
        let mut b = r2.read();
        a.sort();
        b.sort();
        assert_eq!(a, b);
        assert_eq!(r1.checksums(None, None), r2.checksums(None, None));
    }

    #[test]
    fn duplicate_add_is_idempotent() {
        let mut s = GSet::new(ScalarClock::new([1; 16]));
        let su = s.add(Value::Int(7)).unwrap();
        let before = s.read();
        s.update(su).unwrap();
        assert_eq!(s.read(), before);
    }

    #[test]
    fn checksums_respect_the_ts_window() {
        let mut s = GSet::new(ScalarClock::new([1; 16]));
        s.add(Value::Int(1)).unwrap();
        s.add(Value::Int(2)).unwrap();
        let (_, count_all, _) = s.checksums(None, None);
        assert_eq!(count_all, 2);
        let (_, count_none, _) = s.checksums(Some(1000), None);
        assert_eq!(count_none, 0);
    }

    #[test]
    fn pack_round_trips() {
        let mut s = GSet::new(ScalarClock::new([3; 16]));
        s.add(Value::Str("a".into())).unwrap();
        s.add(Value::Str("b".into())).unwrap();
        let packed = s.pack();
        let restored = GSet::unpack(&packed, &empty_registry()).unwrap();
        assert_eq!(restored, s);
    }
}
