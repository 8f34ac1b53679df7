//! `LwwRegister`: a single last-writer-wins slot. Concurrent writes
//! (equal timestamps) are broken first by writer id, then by the
//! packed bytes of the competing values.

use crate::listener::{Listener, Listeners};
use crate::merkle_crdt::MerkleCrdt;
use convergent_core::{CrdtError, Payload, ScalarClock, StateUpdate, Timestamp, TypeRegistry, Value, WrappedValue};

#[derive(Clone)]
pub struct LwwRegister {
    clock: ScalarClock,
    value: WrappedValue,
    last_update_ts: Timestamp,
    last_writer_id: i64,
    listeners: std::rc::Rc<std::cell::RefCell<Listeners<WrappedValue>>>,
}

impl PartialEq for LwwRegister {
    fn eq(&self, other: &Self) -> bool {
        self.clock == other.clock
            && self.value == other.value
            && self.last_update_ts == other.last_update_ts
            && self.last_writer_id == other.last_writer_id
    }
}

impl std::fmt::Debug for LwwRegister {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LwwRegister")
            .field("clock", &self.clock)
            .field("value", &self.value)
            .field("last_update_ts", &self.last_update_ts)
            .field("last_writer_id", &self.last_writer_id)
            .finish()
    }
}

impl LwwRegister {
    pub fn new(clock: ScalarClock, initial: WrappedValue) -> Self {
        LwwRegister {
            clock,
            value: initial,
            last_update_ts: ScalarClock::default_ts(),
            last_writer_id: i64::MIN,
            listeners: std::rc::Rc::new(std::cell::RefCell::new(Listeners::new())),
        }
    }

    pub fn clock(&self) -> &ScalarClock {
        &self.clock
    }

    pub fn read(&self) -> &WrappedValue {
        &self.value
    }

    pub fn writer_id(&self) -> i64 {
        self.last_writer_id
    }

    pub fn add_listener(&self, f: Listener<WrappedValue>) -> crate::listener::ListenerHandle {
        self.listeners.borrow_mut().add_listener(f)
    }

    pub fn remove_listener(&self, handle: crate::listener::ListenerHandle) {
        self.listeners.borrow_mut().remove_listener(handle)
    }

    pub fn write(&mut self, value: WrappedValue, writer_id: i64) -> Result<StateUpdate, CrdtError> {
        let ts = self.clock.read();
        let su = StateUpdate::new(
            self.clock.uuid,
            ts,
            Payload::tuple(vec![
                Payload::Value(Value::Int(i32::try_from(writer_id).map_err(|_| {
                    CrdtError::value_invalid("writer id exceeds representable range")
                })?)),
                Payload::Wrapped(value),
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
            return Err(CrdtError::type_invalid("update clock_uuid does not match register's clock"));
        }
        let (writer_id, value) = match &su.data {
            Payload::Tuple(items) if items.len() == 2 => {
                let writer_id = match &items[0] {
                    Payload::Value(Value::Int(i)) => *i as i64,
                    _ => return Err(CrdtError::type_invalid("writer id must be an int")),
                };
                let value = match &items[1] {
                    Payload::Wrapped(w) => w.clone(),
                    _ => return Err(CrdtError::type_invalid("register value must be a wrapped value")),
                };
                (writer_id, value)
            }
            _ => return Err(CrdtError::type_invalid("register payload must be a (writer_id, value) pair")),
        };

        let should_overwrite = if ScalarClock::is_later(su.ts, self.last_update_ts) {
            true
        } else if ScalarClock::are_concurrent(su.ts, self.last_update_ts) {
            match writer_id.cmp(&self.last_writer_id) {
                std::cmp::Ordering::Greater => true,
                std::cmp::Ordering::Less => false,
                std::cmp::Ordering::Equal => value.pack() > self.value.pack(),
            }
        } else {
            false
        };

        if should_overwrite {
            self.value = value;
            self.last_update_ts = su.ts;
            self.last_writer_id = writer_id;
        }
        self.clock.update(su.ts)?;
        let view = self.value.clone();
        self.listeners.borrow_mut().invoke(&view, su)?;
        Ok(())
    }

    pub fn checksums(&self) -> (Timestamp, i64, Vec<u8>) {
        (self.last_update_ts, self.last_writer_id, self.value.pack())
    }

    pub fn pack(&self) -> Vec<u8> {
        let mut out = self.clock.pack();
        out.extend_from_slice(&self.last_update_ts.to_be_bytes());
        out.extend_from_slice(&self.last_writer_id.to_be_bytes());
        let value_packed = self.value.pack();
        out.extend_from_slice(&(value_packed.len() as u32).to_be_bytes());
        out.extend_from_slice(&value_packed);
        out
    }

    pub fn unpack(data: &[u8], registry: &TypeRegistry) -> Result<Self, CrdtError> {
        if data.len() < 36 {
            return Err(CrdtError::type_invalid("packed lww-register too short"));
        }
        let clock = ScalarClock::unpack(&data[..20])?;
        let last_update_ts = Timestamp::from_be_bytes(data[20..28].try_into().unwrap());
        let last_writer_id = i64::from_be_bytes(data[28..36].try_into().unwrap());
        let len = u32::from_be_bytes(data[36..40].try_into().unwrap()) as usize;
        if data.len() != 40 + len {
            return Err(CrdtError::type_invalid("packed lww-register length mismatch"));
        }
        let value = WrappedValue::unpack(&data[40..40 + len], registry)?;
        Ok(LwwRegister {
            clock,
            value,
            last_update_ts,
            last_writer_id,
            listeners: std::rc::Rc::new(std::cell::RefCell::new(Listeners::new())),
        })
    }
}

impl MerkleCrdt for LwwRegister {
    fn history(&self, from_ts: Option<Timestamp>, until_ts: Option<Timestamp>) -> Vec<StateUpdate> {
        let ts = self.last_update_ts;
        if from_ts.map_or(false, |f| ts < f) || until_ts.map_or(false, |u| ts > u) {
            return Vec::new();
        }
        vec![StateUpdate::new(
            self.clock.uuid,
            ts,
            Payload::tuple(vec![
                Payload::Value(Value::Int(self.last_writer_id as i32)),
                Payload::Wrapped(self.value.clone()),
            ]),
        )]
    }
}
