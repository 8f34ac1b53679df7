//! `MvMap`: the same key-presence structure as [`crate::lww_map::LwwMap`]
//! but backed by [`crate::mv_register::MvRegister`]s, so concurrent
//! `set` calls on the same key keep every concurrent value.

use crate::merkle_crdt::MerkleCrdt;
use crate::mv_register::MvRegister;
use crate::orset::ORSet;
use convergent_core::{CrdtError, Payload, ScalarClock, StateUpdate, Timestamp, TypeRegistry, Value, WrappedValue};
use std::collections::BTreeMap;

const OP_SET: &str = "o";
const OP_UNSET: &str = "r";

#[derive(Clone, PartialEq)]
pub struct MvMap {
    clock: ScalarClock,
    names: ORSet,
    registers: BTreeMap<Value, MvRegister>,
}

impl std::fmt::Debug for MvMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MvMap").field("clock", &self.clock).field("registers", &self.registers.len()).finish()
    }
}

impl MvMap {
    pub fn new(clock: ScalarClock) -> Self {
        MvMap {
            names: ORSet::new(clock.clone()),
            registers: BTreeMap::new(),
            clock,
        }
    }

    pub fn clock(&self) -> &ScalarClock {
        &self.clock
    }

    pub fn read(&self) -> BTreeMap<Value, Vec<WrappedValue>> {
        self.names
            .read()
            .into_iter()
            .filter_map(|name| self.registers.get(&name).map(|r| (name, r.read().to_vec())))
            .collect()
    }

    pub fn get(&self, name: &Value) -> Option<&[WrappedValue]> {
        if self.names.contains(name) {
            self.registers.get(name).map(|r| r.read())
        } else {
            None
        }
    }

    pub fn set(&mut self, name: Value, value: WrappedValue) -> Result<StateUpdate, CrdtError> {
        self.produce(OP_SET, name, value)
    }

    pub fn unset(&mut self, name: Value) -> Result<StateUpdate, CrdtError> {
        self.produce(OP_UNSET, name, WrappedValue::None)
    }

    fn produce(&mut self, op: &str, name: Value, value: WrappedValue) -> Result<StateUpdate, CrdtError> {
        let ts = self.clock.read();
        let su = StateUpdate::new(
            self.clock.uuid,
            ts,
            Payload::tuple(vec![
                Payload::Value(Value::Str(op.to_string())),
                Payload::Value(name),
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
        let (op, name, value) = match &su.data {
            Payload::Tuple(items) if items.len() == 3 => {
                let op = match &items[0] {
                    Payload::Value(Value::Str(s)) => s.clone(),
                    _ => return Err(CrdtError::type_invalid("map op must be a string")),
                };
                let name = match &items[1] {
                    Payload::Value(v) => v.clone(),
                    _ => return Err(CrdtError::type_invalid("map name must be a plain value")),
                };
                let value = match &items[2] {
                    Payload::Wrapped(w) => w.clone(),
                    _ => return Err(CrdtError::type_invalid("map value must be a wrapped value")),
                };
                (op, name, value)
            }
            _ => return Err(CrdtError::type_invalid("map payload must be an (op, name, value) tuple")),
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
                    .or_insert_with(|| MvRegister::new(clock, WrappedValue::None));
                let reg_su = StateUpdate::new(su.clock_uuid, su.ts, Payload::Wrapped(value));
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
            for v in reg.read() {
                crc.update(&v.pack());
            }
        }
        (self.read().len(), crc.finalize())
    }

    pub fn history(&self, from_ts: Option<Timestamp>, until_ts: Option<Timestamp>) -> Vec<StateUpdate> {
        self.names
            .history(from_ts, until_ts)
            .into_iter()
            .flat_map(|orset_su| {
                let (op, name) = match &orset_su.data {
                    Payload::Tuple(items) if items.len() == 2 => {
                        let op = match &items[0] {
                            Payload::Value(Value::Str(s)) => s.clone(),
                            _ => return Vec::new(),
                        };
                        let name = match &items[1] {
                            Payload::Value(v) => v.clone(),
                            _ => return Vec::new(),
                        };
                        (op, name)
                    }
                    _ => return Vec::new(),
                };
                let values = match self.registers.get(&name) {
                    Some(reg) => reg.read().to_vec(),
                    None => vec![WrappedValue::None],
                };
                values
                    .into_iter()
                    .map(|value| {
                        StateUpdate::new(
                            self.clock.uuid,
                            orset_su.ts,
                            Payload::tuple(vec![
                                Payload::Value(Value::Str(op.clone())),
                                Payload::Value(name.clone()),
                                Payload::Wrapped(value),
                            ]),
                        )
                    })
                    .collect()
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
            return Err(CrdtError::type_invalid("packed mv-map too short"));
        }
        let clock = ScalarClock::unpack(&data[..20])?;
        let mut rest = &data[20..];
        let names_len = read_u32(&mut rest)?;
        if rest.len() < names_len {
            return Err(CrdtError::type_invalid("truncated mv-map names"));
        }
        let names = ORSet::unpack(&rest[..names_len], registry)?;
        rest = &rest[names_len..];
        let count = read_u32(&mut rest)?;
        let mut registers = BTreeMap::new();
        for _ in 0..count {
            let name_len = read_u32(&mut rest)?;
            if rest.len() < name_len {
                return Err(CrdtError::type_invalid("truncated mv-map name"));
            }
            let name = Value::unpack(&rest[..name_len])?;
            rest = &rest[name_len..];
            let reg_len = read_u32(&mut rest)?;
            if rest.len() < reg_len {
                return Err(CrdtError::type_invalid("truncated mv-map register"));
            }
            let reg = MvRegister::unpack(&rest[..reg_len], registry)?;
            rest = &rest[reg_len..];
            registers.insert(name, reg);
        }
        Ok(MvMap { clock, names, registers })
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

impl MerkleCrdt for MvMap {
    fn history(&self, from_ts: Option<Timestamp>, until_ts: Option<Timestamp>) -> Vec<StateUpdate> {
        MvMap::history(self, from_ts, until_ts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use convergent_core::empty_registry;

    #[test]
    fn concurrent_sets_on_the_same_key_both_survive() {
        let uuid = [1; 16];
        let su1 = StateUpdate::new(
            uuid,
            5,
            Payload::tuple(vec![
                Payload::Value(Value::Str("o".into())),
                Payload::Value(Value::Str("k".into())),
                Payload::Wrapped(WrappedValue::Str("a".into())),
            ]),
        );
        let su2 = StateUpdate::new(
            uuid,
            5,
            Payload::tuple(vec![
                Payload::Value(Value::Str("o".into())),
                Payload::Value(Value::Str("k".into())),
                Payload::Wrapped(WrappedValue::Str("b".into())),
            ]),
        );
        let mut m = MvMap::new(ScalarClock::new(uuid));
        m.update(su1).unwrap();
        m.update(su2).unwrap();
        assert_eq!(m.get(&Value::Str("k".into())).unwrap().len(), 2);
    }

    #[test]
    fn pack_round_trips() {
        let mut m = MvMap::new(ScalarClock::new([9; 16]));
        m.set(Value::Str("k".into()), WrappedValue::Int(1)).unwrap();
        let packed = m.pack();
        let restored = MvMap::unpack(&packed, &empty_registry()).unwrap();
        assert_eq!(restored.read(), m.read());
    }
}
