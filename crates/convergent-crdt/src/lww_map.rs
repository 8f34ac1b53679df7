//! `LwwMap`: an observed-remove set of keys, each backed by an
//! independent [`LwwRegister`]. A single envelope carries both the
//! key's presence bit and the register's write in one `(op, name,
//! writer_id, value)` tuple.

use crate::lww_register::LwwRegister;
use crate::merkle_crdt::MerkleCrdt;
use crate::orset::ORSet;
use convergent_core::{CrdtError, Payload, ScalarClock, StateUpdate, Timestamp, TypeRegistry, Value, WrappedValue};
use std::collections::BTreeMap;

const OP_SET: &str = "o";
const OP_UNSET: &str = "r";

#[derive(Clone, PartialEq)]
pub struct LwwMap {
    clock: ScalarClock,
    names: ORSet,
    registers: BTreeMap<Value, LwwRegister>,
}

impl std::fmt::Debug for LwwMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LwwMap").field("clock", &self.clock).field("registers", &self.registers.len()).finish()
    }
}

impl LwwMap {
    pub fn new(clock: ScalarClock) -> Self {
        LwwMap {
            names: ORSet::new(clock.clone()),
            registers: BTreeMap::new(),
            clock,
        }
    }

    pub fn clock(&self) -> &ScalarClock {
        &self.clock
    }

    pub fn read(&self) -> BTreeMap<Value, WrappedValue> {
        self.names
            .read()
            .into_iter()
            .filter_map(|name| self.registers.get(&name).map(|r| (name, r.read().clone())))
            .collect()
    }

    pub fn get(&self, name: &Value) -> Option<&WrappedValue> {
        if self.names.contains(name) {
            self.registers.get(name).map(|r| r.read())
        } else {
            None
        }
    }

    pub fn set(&mut self, name: Value, value: WrappedValue, writer_id: i64) -> Result<StateUpdate, CrdtError> {
        self.produce(OP_SET, name, writer_id, value)
    }

    pub fn unset(&mut self, name: Value, writer_id: i64) -> Result<StateUpdate, CrdtError> {
        self.produce(OP_UNSET, name, writer_id, WrappedValue::None)
    }

    fn produce(&mut self, op: &str, name: Value, writer_id: i64, value: WrappedValue) -> Result<StateUpdate, CrdtError> {
        let ts = self.clock.read();
        let su = StateUpdate::new(
            self.clock.uuid,
            ts,
            Payload::tuple(vec![
                Payload::Value(Value::Str(op.to_string())),
                Payload::Value(name),
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
            return Err(CrdtError::type_invalid("update clock_uuid does not match map's clock"));
        }
        let (op, name, writer_id, value) = match &su.data {
            Payload::Tuple(items) if items.len() == 4 => {
                let op = match &items[0] {
                    Payload::Value(Value::Str(s)) => s.clone(),
                    _ => return Err(CrdtError::type_invalid("map op must be a string")),
                };
                let name = match &items[1] {
                    Payload::Value(v) => v.clone(),
                    _ => return Err(CrdtError::type_invalid("map name must be a plain value")),
                };
                let writer_id = match &items[2] {
                    Payload::Value(Value::Int(i)) => *i as i64,
                    _ => return Err(CrdtError::type_invalid("writer id must be an int")),
                };
                let value = match &items[3] {
                    Payload::Wrapped(w) => w.clone(),
                    _ => return Err(CrdtError::type_invalid("map value must be a wrapped value")),
                };
                (op, name, writer_id, value)
            }
            _ => return Err(CrdtError::type_invalid("map payload must be an (op, name, writer_id, value) tuple")),
        };

        let orset_su = StateUpdate::new(
            su.clock_uuid,
            su.ts,
            Payload::tuple(vec![Payload::Value(Value::Str(op.clone())), Payload::Value(name.clone())]),
        );
        self.names.update(orset_su)?;

        match op.as_str() {
            OP_SET => {
                let clock = self.clock.clone();
                let reg = self
                    .registers
                    .entry(name.clone())
                    .or_insert_with(|| LwwRegister::new(clock, WrappedValue::None));
                let reg_su = StateUpdate::new(
                    su.clock_uuid,
                    su.ts,
                    Payload::tuple(vec![Payload::Value(Value::Int(writer_id as i32)), Payload::Wrapped(value)]),
                );
                reg.update(reg_su)?;
            }
            OP_UNSET => {
                if !self.names.contains(&name) {
                    self.registers.remove(&name);
                }
            }
            other => return Err(CrdtError::type_invalid(format!("unknown map op: {other}"))),
        }
        self.clock.update(su.ts)?;
        Ok(())
    }

    pub fn checksums(&self) -> (usize, u32) {
        let mut crc = crc32fast::Hasher::new();
        for (name, reg) in &self.registers {
            if !self.names.contains(name) {
                continue;
            }
            crc.update(&name.pack());
            crc.update(&reg.read().pack());
        }
        (self.read().len(), crc.finalize())
    }

    /// Flattens the names-ORSet history with each register's *current*
    /// writer/value, rather than replaying each register's own
    /// internal history -- matching the source's `LWWMap.history`.
    pub fn history(&self, from_ts: Option<Timestamp>, until_ts: Option<Timestamp>) -> Vec<StateUpdate> {
        self.names
            .history(from_ts, until_ts)
            .into_iter()
            .filter_map(|orset_su| {
                let (op, name) = match &orset_su.data {
                    Payload::Tuple(items) if items.len() == 2 => {
                        let op = match &items[0] {
                            Payload::Value(Value::Str(s)) => s.clone(),
                            _ => return None,
                        };
                        let name = match &items[1] {
                            Payload::Value(v) => v.clone(),
                            _ => return None,
                        };
                        (op, name)
                    }
                    _ => return None,
                };
                let (writer_id, value) = match self.registers.get(&name) {
                    Some(reg) => (reg.writer_id(), reg.read().clone()),
                    None => (0, WrappedValue::None),
                };
                Some(StateUpdate::new(
                    self.clock.uuid,
                    orset_su.ts,
                    Payload::tuple(vec![
                        Payload::Value(Value::Str(op)),
                        Payload::Value(name),
                        Payload::Value(Value::Int(writer_id as i32)),
                        Payload::Wrapped(value),
                    ]),
                ))
            })
            .collect()
    }

    pub fn pack(&self) -> Vec<u8> {
        let mut out = self.clock.pack();
        let names_packed = self.names.pack();
        out.extend_from_slice(&(names_packed.len() as u32).to_be_bytes());
        out.extend_from_slice(&names_packed);
        out.extend_from_slice(&(self.registers.len() as u32).to_be_bytes());
        for (name, reg) in &self.registers {
            let name_packed = name.pack();
            out.extend_from_slice(&(name_packed.len() as u32).to_be_bytes());
            out.extend_from_slice(&name_packed);
            let reg_packed = reg.pack();
            out.extend_from_slice(&(reg_packed.len() as u32).to_be_bytes());
            out.extend_from_slice(&reg_packed);
        }
        out
    }

    pub fn unpack(data: &[u8], registry: &TypeRegistry) -> Result<Self, CrdtError> {
        if data.len() < 24 {
            return Err(CrdtError::type_invalid("packed lww-map too short"));
        }
        let clock = ScalarClock::unpack(&data[..20])?;
        let mut rest = &data[20..];
        let names_len = read_u32(&mut rest)?;
        if rest.len() < names_len {
            return Err(CrdtError::type_invalid("truncated lww-map names"));
        }
        let names = ORSet::unpack(&rest[..names_len], registry)?;
        rest = &rest[names_len..];
        let count = read_u32(&mut rest)?;
        let mut registers = BTreeMap::new();
        for _ in 0..count {
            let name_len = read_u32(&mut rest)?;
            if rest.len() < name_len {
                return Err(CrdtError::type_invalid("truncated lww-map name"));
            }
            let name = Value::unpack(&rest[..name_len])?;
            rest = &rest[name_len..];
            let reg_len = read_u32(&mut rest)?;
            if rest.len() < reg_len {
                return Err(CrdtError::type_invalid("truncated lww-map register"));
            }
            let reg = LwwRegister::unpack(&rest[..reg_len], registry)?;
            rest = &rest[reg_len..];
            registers.insert(name, reg);
        }
        Ok(LwwMap { clock, names, registers })
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

impl MerkleCrdt for LwwMap {
    fn history(&self, from_ts: Option<Timestamp>, until_ts: Option<Timestamp>) -> Vec<StateUpdate> {
        LwwMap::history(self, from_ts, until_ts)
    }
}
