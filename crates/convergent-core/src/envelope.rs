//! The state-update envelope: the unit of transport between replicas.

use crate::clock::Timestamp;
use crate::error::CrdtError;
use crate::value::{TypeRegistry, Value, WrappedValue};
use crate::wire::{read_tagged, tag, write_tagged};

/// Either a single wrapped value or a tuple of them. CRDT payloads are
/// almost always small fixed-arity tuples (`(member,)`, `(writer, value)`,
/// `('o', name, value)`, ...); this is the shape every `StateUpdate::data`
/// takes.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Value(Value),
    Wrapped(WrappedValue),
    Tuple(Vec<Payload>),
}

impl Payload {
    pub fn pack(&self) -> Vec<u8> {
        match self {
            Payload::Value(v) => v.pack(),
            Payload::Wrapped(w) => w.pack(),
            Payload::Tuple(items) => {
                let mut body = Vec::new();
                for item in items {
                    body.extend_from_slice(&item.pack());
                }
                let mut out = Vec::new();
                write_tagged(tag::TUPLE, &body, &mut out);
                out
            }
        }
    }

    pub fn unpack(data: &[u8], registry: &TypeRegistry) -> Result<Self, CrdtError> {
        let (t, payload, consumed) = read_tagged(data)?;
        if consumed != data.len() {
            return Err(CrdtError::type_invalid("trailing bytes after payload"));
        }
        match t {
            tag::TUPLE | tag::LIST | tag::SET => {
                let mut items = Vec::new();
                let mut rest = payload;
                while !rest.is_empty() {
                    let (_, _, item_consumed) = read_tagged(rest)?;
                    items.push(Payload::unpack(&rest[..item_consumed], registry)?);
                    rest = &rest[item_consumed..];
                }
                Ok(Payload::Tuple(items))
            }
            tag::PACKABLE => Ok(Payload::Wrapped(WrappedValue::unpack(data, registry)?)),
            _ => Ok(Payload::Value(Value::unpack(data)?)),
        }
    }

    pub fn tuple(items: Vec<Payload>) -> Self {
        Payload::Tuple(items)
    }
}

/// `{clock_uuid, ts, data}`: a self-contained, transport-ready record of
/// one applied mutation.
#[derive(Debug, Clone, PartialEq)]
pub struct StateUpdate {
    pub clock_uuid: [u8; 16],
    pub ts: Timestamp,
    pub data: Payload,
}

impl StateUpdate {
    pub fn new(clock_uuid: [u8; 16], ts: Timestamp, data: Payload) -> Self {
        StateUpdate { clock_uuid, ts, data }
    }

    /// `pack(clock_uuid) || pack(ts) || pack(data)`, each through the
    /// tagged value codec.
    pub fn pack(&self) -> Vec<u8> {
        let mut out = Vec::new();
        write_tagged(tag::BYTES, &self.clock_uuid, &mut out);
        write_tagged(tag::INT, &(self.ts as i32).to_be_bytes(), &mut out);
        out.extend_from_slice(&self.data.pack());
        out
    }

    pub fn unpack(data: &[u8], registry: &TypeRegistry) -> Result<Self, CrdtError> {
        let (uuid_tag, uuid_payload, consumed1) = read_tagged(data)?;
        if uuid_tag != tag::BYTES || uuid_payload.len() != 16 {
            return Err(CrdtError::type_invalid("envelope clock_uuid must be 16 bytes"));
        }
        let mut clock_uuid = [0u8; 16];
        clock_uuid.copy_from_slice(uuid_payload);

        let rest = &data[consumed1..];
        let (ts_tag, ts_payload, consumed2) = read_tagged(rest)?;
        if ts_tag != tag::INT || ts_payload.len() != 4 {
            return Err(CrdtError::type_invalid("envelope ts must be a 4-byte int"));
        }
        let ts = i32::from_be_bytes([ts_payload[0], ts_payload[1], ts_payload[2], ts_payload[3]])
            as Timestamp;

        let payload_bytes = &rest[consumed2..];
        let payload = Payload::unpack(payload_bytes, registry)?;

        Ok(StateUpdate {
            clock_uuid,
            ts,
            data: payload,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::empty_registry;

    #[test]
    fn envelope_round_trips_a_scalar_payload() {
        let su = StateUpdate::new([3; 16], 9, Payload::Value(Value::Int(42)));
        let packed = su.pack();
        let restored = StateUpdate::unpack(&packed, &empty_registry()).unwrap();
        assert_eq!(restored, su);
    }

    #[test]
    fn envelope_round_trips_a_tuple_payload() {
        let su = StateUpdate::new(
            [1; 16],
            2,
            Payload::tuple(vec![
                Payload::Value(Value::Str("o".into())),
                Payload::Value(Value::Str("name".into())),
                Payload::Value(Value::Int(7)),
            ]),
        );
        let packed = su.pack();
        let restored = StateUpdate::unpack(&packed, &empty_registry()).unwrap();
        assert_eq!(restored, su);
    }

    #[test]
    fn envelope_round_trips_a_wrapped_payload() {
        let su = StateUpdate::new(
            [9; 16],
            4,
            Payload::Wrapped(WrappedValue::RgaItem {
                value: Box::new(WrappedValue::Str("x".into())),
                ts: 4,
                writer: 1,
            }),
        );
        let packed = su.pack();
        let restored = StateUpdate::unpack(&packed, &empty_registry()).unwrap();
        assert_eq!(restored, su);
    }
}
