//! `MvRegister`: a multi-value register. Unlike [`crate::lww_register::LwwRegister`],
//! concurrent writes are never discarded -- they all survive until a
//! strictly later write supersedes them.

use crate::listener::{Listener, Listeners};
use crate::merkle_crdt::MerkleCrdt;
use convergent_core::{CrdtError, Payload, ScalarClock, StateUpdate, Timestamp, TypeRegistry, WrappedValue};

#[derive(Clone)]
pub struct MvRegister {
    clock: ScalarClock,
    values: Vec<WrappedValue>,
    last_update_ts: Timestamp,
    listeners: std::rc::Rc<std::cell::RefCell<Listeners<Vec<WrappedValue>>>>,
}

impl PartialEq for MvRegister {
    fn eq(&self, other: &Self) -> bool {
        self.clock == other.clock && self.values == other.values && self.last_update_ts == other.last_update_ts
    }
}

impl std::fmt::Debug for MvRegister {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MvRegister")
            .field("clock", &self.clock)
            .field("values", &self.values)
            .field("last_update_ts", &self.last_update_ts)
            .finish()
    }
}

impl MvRegister {
    pub fn new(clock: ScalarClock, initial: WrappedValue) -> Self {
        MvRegister {
            clock,
            values: vec![initial],
            last_update_ts: ScalarClock::default_ts(),
            listeners: std::rc::Rc::new(std::cell::RefCell::new(Listeners::new())),
        }
    }

    pub fn clock(&self) -> &ScalarClock {
        &self.clock
    }

    pub fn read(&self) -> &[WrappedValue] {
        &self.values
    }

    pub fn add_listener(&self, f: Listener<Vec<WrappedValue>>) -> crate::listener::ListenerHandle {
        self.listeners.borrow_mut().add_listener(f)
    }

    pub fn remove_listener(&self, handle: crate::listener::ListenerHandle) {
        self.listeners.borrow_mut().remove_listener(handle)
    }

    pub fn write(&mut self, value: WrappedValue) -> Result<StateUpdate, CrdtError> {
        let ts = self.clock.read();
        let su = StateUpdate::new(self.clock.uuid, ts, Payload::Wrapped(value));
        self.apply(&su)?;
        Ok(su)
    }

    pub fn update(&mut self, su: StateUpdate) -> Result<&mut Self, CrdtError> {
        self.apply(&su)?;
        Ok(self)
    }

    fn apply(&mut self, su: &StateUpdate) -> Result<(), CrdtError> {
        if su.clock_uuid != self.clock.uuid {
            return Err(CrdtError::type_invalid("update clock_uuid does not match register's clock"));
        }
        let value = match &su.data {
            Payload::Wrapped(w) => w.clone(),
            _ => return Err(CrdtError::type_invalid("register payload must be a wrapped value")),
        };

        if ScalarClock::is_later(su.ts, self.last_update_ts) {
            self.values = vec![value];
            self.last_update_ts = su.ts;
        } else if ScalarClock::are_concurrent(su.ts, self.last_update_ts) {
            if !self.values.contains(&value) {
                self.values.push(value);
            }
            self.values.sort();
        }
        self.clock.update(su.ts)?;
        let view = self.values.clone();
        self.listeners.borrow_mut().invoke(&view, su)?;
        Ok(())
    }

    pub fn checksums(&self) -> (Timestamp, usize, Vec<u8>) {
        let mut combined = Vec::new();
        for v in &self.values {
            combined.extend_from_slice(&v.pack());
        }
        (self.last_update_ts, self.values.len(), combined)
    }

    pub fn pack(&self) -> Vec<u8> {
        let mut out = self.clock.pack();
        out.extend_from_slice(&self.last_update_ts.to_be_bytes());
        out.extend_from_slice(&(self.values.len() as u32).to_be_bytes());
        for v in &self.values {
            let packed = v.pack();
            out.extend_from_slice(&(packed.len() as u32).to_be_bytes());
            out.extend_from_slice(&packed);
        }
        out
    }

    pub fn unpack(data: &[u8], registry: &TypeRegistry) -> Result<Self, CrdtError> {
        if data.len() < 32 {
            return Err(CrdtError::type_invalid("packed mv-register too short"));
        }
        let clock = ScalarClock::unpack(&data[..20])?;
        let last_update_ts = Timestamp::from_be_bytes(data[20..28].try_into().unwrap());
        let count = u32::from_be_bytes(data[28..32].try_into().unwrap()) as usize;
        let mut rest = &data[32..];
        let mut values = Vec::with_capacity(count);
        for _ in 0..count {
            if rest.len() < 4 {
                return Err(CrdtError::type_invalid("truncated mv-register value length"));
            }
            let len = u32::from_be_bytes(rest[..4].try_into().unwrap()) as usize;
            rest = &rest[4..];
            if rest.len() < len {
                return Err(CrdtError::type_invalid("truncated mv-register value"));
            }
            values.push(WrappedValue::unpack(&rest[..len], registry)?);
            rest = &rest[len..];
        }
        Ok(MvRegister {
            clock,
            values,
            last_update_ts,
            listeners: std::rc::Rc::new(std::cell::RefCell::new(Listeners::new())),
        })
    }
}

impl MerkleCrdt for MvRegister {
    fn history(&self, from_ts: Option<Timestamp>, until_ts: Option<Timestamp>) -> Vec<StateUpdate> {
        let ts = self.last_update_ts;
        if from_ts.map_or(false, |f| ts < f) || until_ts.map_or(false, |u| ts > u) {
            return Vec::new();
        }
        self.values
            .iter()
            .map(|v| StateUpdate::new(self.clock.uuid, ts, Payload::Wrapped(v.clone())))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use convergent_core::empty_registry;

    #[test]
    fn later_write_replaces_all_values() {
        let mut r = MvRegister::new(ScalarClock::new([1; 16]), WrappedValue::None);
        r.write(WrappedValue::Str("a".into())).unwrap();
        r.write(WrappedValue::Str("b".into())).unwrap();
        assert_eq!(r.read(), &[WrappedValue::Str("b".into())]);
    }

    #[test]
    fn concurrent_writes_all_survive() {
        let uuid = [3; 16];
        let su1 = StateUpdate::new(uuid, 5, Payload::Wrapped(WrappedValue::Str("a".into())));
        let su2 = StateUpdate::new(uuid, 5, Payload::Wrapped(WrappedValue::Str("b".into())));
        let mut r = MvRegister::new(ScalarClock::new(uuid), WrappedValue::None);
        r.update(su1).unwrap();
        r.update(su2).unwrap();
        assert_eq!(r.read().len(), 2);
    }

    #[test]
    fn pack_round_trips() {
        let mut r = MvRegister::new(ScalarClock::new([4; 16]), WrappedValue::None);
        r.write(WrappedValue::Int(9)).unwrap();
        let packed = r.pack();
        let restored = MvRegister::unpack(&packed, &empty_registry()).unwrap();
        assert_eq!(restored, r);
    }
}
