//! `ORSet`: an observed-remove set with add-bias on concurrent
//! add/remove of the same member.
//!
//! Both `observed` and `removed` are per-member last-timestamp maps
//! that only ever move forward (pointwise max on merge); nothing is
//! ever deleted from either map, which is what lets a late-arriving,
//! stale remove never resurrect a member and a late-arriving, stale
//! add never un-remove one -- only the relative order of the two
//! timestamps at read time matters.

use crate::listener::{Listener, Listeners};
use crate::merkle_crdt::MerkleCrdt;
use convergent_core::{CrdtError, Payload, ScalarClock, StateUpdate, Timestamp, TypeRegistry, Value};
use std::collections::BTreeMap;

const OP_OBSERVE: &str = "o";
const OP_REMOVE: &str = "r";

#[derive(Clone)]
pub struct ORSet {
    clock: ScalarClock,
    observed: BTreeMap<Value, Timestamp>,
    removed: BTreeMap<Value, Timestamp>,
    listeners: std::rc::Rc<std::cell::RefCell<Listeners<Vec<Value>>>>,
}

impl PartialEq for ORSet {
    fn eq(&self, other: &Self) -> bool {
        self.clock == other.clock && self.observed == other.observed && self.removed == other.removed
    }
}

impl std::fmt::Debug for ORSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ORSet")
            .field("clock", &self.clock)
            .field("observed", &self.observed)
            .field("removed", &self.removed)
            .finish()
    }
}

impl ORSet {
    pub fn new(clock: ScalarClock) -> Self {
        ORSet {
            clock,
            observed: BTreeMap::new(),
            removed: BTreeMap::new(),
            listeners: std::rc::Rc::new(std::cell::RefCell::new(Listeners::new())),
        }
    }

    pub fn clock(&self) -> &ScalarClock {
        &self.clock
    }

    pub fn add_listener(&self, f: Listener<Vec<Value>>) -> crate::listener::ListenerHandle {
        self.listeners.borrow_mut().add_listener(f)
    }

    pub fn remove_listener(&self, handle: crate::listener::ListenerHandle) {
        self.listeners.borrow_mut().remove_listener(handle)
    }

    pub fn read(&self) -> Vec<Value> {
        self.observed
            .iter()
            .filter(|(m, &ts)| self.removed.get(*m).map_or(true, |&rts| ts >= rts))
            .map(|(m, _)| m.clone())
            .collect()
    }

    pub fn contains(&self, member: &Value) -> bool {
        match self.observed.get(member) {
            Some(&ts) => self.removed.get(member).map_or(true, |&rts| ts >= rts),
            None => false,
        }
    }

    pub fn observe(&mut self, member: Value) -> Result<StateUpdate, CrdtError> {
        self.produce(OP_OBSERVE, member)
    }

    pub fn remove(&mut self, member: Value) -> Result<StateUpdate, CrdtError> {
        self.produce(OP_REMOVE, member)
    }

    fn produce(&mut self, op: &str, member: Value) -> Result<StateUpdate, CrdtError> {
        let ts = self.clock.read();
        let su = StateUpdate::new(
            self.clock.uuid,
            ts,
            Payload::tuple(vec![Payload::Value(Value::Str(op.to_string())), Payload::Value(member)]),
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
            return Err(CrdtError::type_invalid("update clock_uuid does not match orset's clock"));
        }
        let (op, member) = match &su.data {
            Payload::Tuple(items) if items.len() == 2 => {
                let op = match &items[0] {
                    Payload::Value(Value::Str(s)) => s.clone(),
                    _ => return Err(CrdtError::type_invalid("orset op must be a string")),
                };
                let member = match &items[1] {
                    Payload::Value(v) => v.clone(),
                    _ => return Err(CrdtError::type_invalid("orset member must be a plain value")),
                };
                (op, member)
            }
            _ => return Err(CrdtError::type_invalid("orset payload must be an (op, member) pair")),
        };

        match op.as_str() {
            OP_OBSERVE => {
                let entry = self.observed.entry(member).or_insert(0);
                *entry = (*entry).max(su.ts);
            }
            OP_REMOVE => {
                let entry = self.removed.entry(member).or_insert(0);
                *entry = (*entry).max(su.ts);
            }
            other => return Err(CrdtError::type_invalid(format!("unknown orset op: {other}"))),
        }
        self.clock.update(su.ts)?;
        let view = self.read();
        self.listeners.borrow_mut().invoke(&view, su)?;
        Ok(())
    }

    pub fn checksums(&self, from_ts: Option<Timestamp>, until_ts: Option<Timestamp>) -> (Timestamp, usize, usize) {
        let in_window = |ts: Timestamp| !from_ts.map_or(false, |f| ts < f) && !until_ts.map_or(false, |u| ts > u);
        let mut upper = 0;
        let mut observed_count = 0;
        let mut removed_count = 0;
        for &ts in self.observed.values() {
            if in_window(ts) {
                upper = upper.max(ts);
                observed_count += 1;
            }
        }
        for &ts in self.removed.values() {
            if in_window(ts) {
                upper = upper.max(ts);
                removed_count += 1;
            }
        }
        (upper, observed_count, removed_count)
    }

    pub fn history(&self, from_ts: Option<Timestamp>, until_ts: Option<Timestamp>) -> Vec<StateUpdate> {
        let in_window = |ts: Timestamp| !from_ts.map_or(false, |f| ts < f) && !until_ts.map_or(false, |u| ts > u);
        let mut out = Vec::new();
        for (m, &ts) in &self.observed {
            if in_window(ts) {
                out.push(StateUpdate::new(
                    self.clock.uuid,
                    ts,
                    Payload::tuple(vec![
                        Payload::Value(Value::Str(OP_OBSERVE.to_string())),
                        Payload::Value(m.clone()),
                    ]),
                ));
            }
        }
        for (m, &ts) in &self.removed {
            if in_window(ts) {
                out.push(StateUpdate::new(
                    self.clock.uuid,
                    ts,
                    Payload::tuple(vec![
                        Payload::Value(Value::Str(OP_REMOVE.to_string())),
                        Payload::Value(m.clone()),
                    ]),
                ));
            }
        }
        out
    }

    pub fn pack(&self) -> Vec<u8> {
        let mut out = self.clock.pack();
        write_map(&self.observed, &mut out);
        write_map(&self.removed, &mut out);
        out
    }

    pub fn unpack(data: &[u8], _registry: &TypeRegistry) -> Result<Self, CrdtError> {
        if data.len() < 20 {
            return Err(CrdtError::type_invalid("packed orset too short"));
        }
        let clock = ScalarClock::unpack(&data[..20])?;
        let mut rest = &data[20..];
        let observed = read_map(&mut rest)?;
        let removed = read_map(&mut rest)?;
        Ok(ORSet {
            clock,
            observed,
            removed,
            listeners: std::rc::Rc::new(std::cell::RefCell::new(Listeners::new())),
        })
    }
}

fn write_map(map: &BTreeMap<Value, Timestamp>, out: &mut Vec<u8>) {
    out.extend_from_slice(&(map.len() as u32).to_be_bytes());
    for (member, ts) in map {
        let packed = member.pack();
        out.extend_from_slice(&(packed.len() as u32).to_be_bytes());
        out.extend_from_slice(&packed);
        out.extend_from_slice(&ts.to_be_bytes());
    }
}

fn read_map(rest: &mut &[u8]) -> Result<BTreeMap<Value, Timestamp>, CrdtError> {
    if rest.len() < 4 {
        return Err(CrdtError::type_invalid("truncated map length"));
    }
    let count = u32::from_be_bytes(rest[..4].try_into().unwrap()) as usize;
    *rest = &rest[4..];
    let mut map = BTreeMap::new();
    for _ in 0..count {
        if rest.len() < 4 {
            return Err(CrdtError::type_invalid("truncated map entry length"));
        }
        let len = u32::from_be_bytes(rest[..4].try_into().unwrap()) as usize;
        *rest = &rest[4..];
        if rest.len() < len + 8 {
            return Err(CrdtError::type_invalid("truncated map entry"));
        }
        let member = Value::unpack(&rest[..len])?;
        *rest = &rest[len..];
        let ts = Timestamp::from_be_bytes(rest[..8].try_into().unwrap());
        *rest = &rest[8..];
        map.insert(member, ts);
    }
    Ok(map)
}

impl MerkleCrdt for ORSet {
    fn history(&self, from_ts: Option<Timestamp>, until_ts: Option<Timestamp>) -> Vec<StateUpdate> {
        ORSet::history(self, from_ts, until_ts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use convergent_core::empty_registry;

    #[test]
    fn observe_then_contains() {
        let mut s = ORSet::new(ScalarClock::new([1; 16]));
        s.observe(Value::Int(1)).unwrap();
        assert!(s.contains(&Value::Int(1)));
    }

    #[test]
    fn remove_after_later_observe_keeps_member() {
        let mut s = ORSet::new(ScalarClock::new([1; 16]));
        let su_remove = StateUpdate::new(
            s.clock().uuid,
            2,
            Payload::tuple(vec![
                Payload::Value(Value::Str("r".into())),
                Payload::Value(Value::Int(1)),
            ]),
        );
        s.update(su_remove).unwrap();
        let su_observe = StateUpdate::new(
            s.clock().uuid,
            5,
            Payload::tuple(vec![
                Payload::Value(Value::Str("o".into())),
                Payload::Value(Value::Int(1)),
            ]),
        );
        s.update(su_observe).unwrap();
        assert!(s.contains(&Value::Int(1)));
    }

    #[test]
    fn stale_observe_cannot_resurrect_after_later_remove() {
        let mut s = ORSet::new(ScalarClock::new([1; 16]));
        let su_observe = StateUpdate::new(
            s.clock().uuid,
            1,
            Payload::tuple(vec![
                Payload::Value(Value::Str("o".into())),
                Payload::Value(Value::Int(1)),
            ]),
        );
        s.update(su_observe).unwrap();
        let su_remove = StateUpdate::new(
            s.clock().uuid,
            5,
            Payload::tuple(vec![
                Payload::Value(Value::Str("r".into())),
                Payload::Value(Value::Int(1)),
            ]),
        );
        s.update(su_remove).unwrap();

        let stale_observe = StateUpdate::new(
            s.clock().uuid,
            3,
            Payload::tuple(vec![
                Payload::Value(Value::Str("o".into())),
                Payload::Value(Value::Int(1)),
            ]),
        );
        s.update(stale_observe).unwrap();
        assert!(!s.contains(&Value::Int(1)));
    }

    #[test]
    fn concurrent_add_remove_resolves_add_biased() {
        let uuid = [9; 16];
        let su_observe = StateUpdate::new(
            uuid,
            4,
            Payload::tuple(vec![
                Payload::Value(Value::Str("o".into())),
                Payload::Value(Value::Int(1)),
            ]),
        );
        let su_remove = StateUpdate::new(
            uuid,
            4,
            Payload::tuple(vec![
                Payload::Value(Value::Str("r".into())),
                Payload::Value(Value::Int(1)),
            ]),
        );

        let mut s = ORSet::new(ScalarClock::new(uuid));
        s.update(su_observe).unwrap();
        s.update(su_remove).unwrap();
        assert!(s.contains(&Value::Int(1)));
    }

    #[test]
    fn pack_round_trips() {
        let mut s = ORSet::new(ScalarClock::new([2; 16]));
        s.observe(Value::Int(1)).unwrap();
        s.observe(Value::Int(2)).unwrap();
        s.remove(Value::Int(2)).unwrap();
        let packed = s.pack();
        let restored = ORSet::unpack(&packed, &empty_registry()).unwrap();
        assert_eq!(restored.read(), s.read());
    }

    #[test]
    fn listeners_fire_with_the_post_apply_view() {
        use std::cell::RefCell;
        use std::rc::Rc;

        let seen: Rc<RefCell<Vec<Value>>> = Rc::new(RefCell::new(Vec::new()));
        let mut s = ORSet::new(ScalarClock::new([1; 16]));
        let seen_clone = seen.clone();
        s.add_listener(Box::new(move |view, _su| {
            *seen_clone.borrow_mut() = view.clone();
            Ok(())
        }));
        s.observe(Value::Int(42)).unwrap();
        assert_eq!(*seen.borrow(), vec![Value::Int(42)]);
    }
}
