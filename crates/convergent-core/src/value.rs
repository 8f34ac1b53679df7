//! The value codec: primitive serializable values and the richer
//! "wrapped value" tagged sum used by registers, sets, sequences and
//! the causal tree.
//!
//! Two layers exist because they serve different callers. [`Value`] is
//! the plain payload a `GSet`/`ORSet` member or a map key holds -- a
//! string, some bytes, an integer, a float, or none of those. A
//! [`WrappedValue`] additionally carries the metadata some CRDTs must
//! thread through merges (an RGA item's `(ts, writer)` stamp, a causal
//! tree node's own uuid and parent uuid). Both encode through the same
//! tagged-length-payload wire format in [`crate::wire`].

use crate::error::CrdtError;
use crate::wire::{hex_decode, hex_encode, read_tagged, tag, write_tagged};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;

/// A primitive, directly-serializable value: the kind of thing a
/// `GSet`/`ORSet` member or a map key is made of.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Str(String),
    Bytes(Vec<u8>),
    Int(i32),
    Float(f64),
    None,
}

impl Value {
    /// Packs via the raw codec tags (`s`/`b`/`i`/`f`), except `None`
    /// which packs as the zero-length `NoneWrapper` packable object so
    /// it round-trips through the same `p`-tag dispatch as every other
    /// wrapper.
    pub fn pack(&self) -> Vec<u8> {
        let mut out = Vec::new();
        match self {
            Value::Str(s) => write_tagged(tag::STR, s.as_bytes(), &mut out),
            Value::Bytes(b) => write_tagged(tag::BYTES, b, &mut out),
            Value::Int(i) => write_tagged(tag::INT, &i.to_be_bytes(), &mut out),
            Value::Float(f) => write_tagged(tag::FLOAT, &f.to_be_bytes(), &mut out),
            Value::None => {
                let class_hex = hex_encode(b"NoneWrapper");
                let mut inner = class_hex.into_bytes();
                inner.push(b'_');
                write_tagged(tag::PACKABLE, &inner, &mut out);
            }
        }
        out
    }

    pub fn unpack(data: &[u8]) -> Result<Self, CrdtError> {
        let (t, payload, consumed) = read_tagged(data)?;
        if consumed != data.len() {
            return Err(CrdtError::type_invalid("trailing bytes after value"));
        }
        match t {
            tag::STR => Ok(Value::Str(
                String::from_utf8(payload.to_vec())
                    .map_err(|e| CrdtError::type_invalid(format!("invalid utf-8: {e}")))?,
            )),
            tag::BYTES | tag::BYTEARRAY => Ok(Value::Bytes(payload.to_vec())),
            tag::INT => {
                if payload.len() != 4 {
                    return Err(CrdtError::type_invalid("int payload must be 4 bytes"));
                }
                Ok(Value::Int(i32::from_be_bytes([
                    payload[0], payload[1], payload[2], payload[3],
                ])))
            }
            tag::FLOAT => {
                if payload.len() != 8 {
                    return Err(CrdtError::type_invalid("float payload must be 8 bytes"));
                }
                let mut buf = [0u8; 8];
                buf.copy_from_slice(payload);
                Ok(Value::Float(f64::from_be_bytes(buf)))
            }
            tag::PACKABLE => {
                let (class_name, _body) = split_class(payload)?;
                if class_name == "NoneWrapper" {
                    Ok(Value::None)
                } else {
                    Err(CrdtError::unknown_class(class_name))
                }
            }
            other => Err(CrdtError::type_invalid(format!("unexpected value tag: {other}"))),
        }
    }
}

impl Eq for Value {}

impl std::hash::Hash for Value {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.pack().hash(state)
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.pack().cmp(&other.pack())
    }
}

/// Splits a packable-object payload (`hex(class_name) + '_' + body`)
/// into `(class_name, body)`.
fn split_class(payload: &[u8]) -> Result<(String, &[u8]), CrdtError> {
    let underscore = payload
        .iter()
        .position(|&b| b == b'_')
        .ok_or_else(|| CrdtError::type_invalid("packable object missing class separator"))?;
    let class_hex = std::str::from_utf8(&payload[..underscore])
        .map_err(|e| CrdtError::type_invalid(format!("invalid class name hex: {e}")))?;
    let class_bytes = hex_decode(class_hex)?;
    let class_name = String::from_utf8(class_bytes)
        .map_err(|e| CrdtError::type_invalid(format!("invalid class name utf-8: {e}")))?;
    Ok((class_name, &payload[underscore + 1..]))
}

/// A polymorphic wrapped value. Every variant is a "packable object" on
/// the wire: a `p`-tagged unit carrying its hex-encoded class name
/// followed by a variant-specific body.
#[derive(Debug, Clone, PartialEq)]
pub enum WrappedValue {
    Str(String),
    Bytes(Vec<u8>),
    Int(i64),
    Decimal(Decimal),
    None,
    /// An RGA item: the stored value plus the `(ts, writer)` stamp that
    /// orders it relative to concurrent appends.
    RgaItem {
        value: Box<WrappedValue>,
        ts: i64,
        writer: i64,
    },
    /// A causal-tree node: the stored value plus its own uuid, its
    /// parent's uuid, and whether it has been tombstoned.
    CtDatum {
        value: Box<WrappedValue>,
        uuid: [u8; 16],
        parent_uuid: [u8; 16],
        visible: bool,
    },
}

impl WrappedValue {
    pub fn class_name(&self) -> &'static str {
        match self {
            WrappedValue::Str(_) => "StrWrapper",
            WrappedValue::Bytes(_) => "BytesWrapper",
            WrappedValue::Int(_) => "IntWrapper",
            WrappedValue::Decimal(_) => "DecimalWrapper",
            WrappedValue::None => "NoneWrapper",
            WrappedValue::RgaItem { .. } => "RGATupleWrapper",
            WrappedValue::CtDatum { .. } => "CTDataWrapper",
        }
    }

    fn pack_body(&self) -> Vec<u8> {
        match self {
            WrappedValue::Str(s) => s.as_bytes().to_vec(),
            WrappedValue::Bytes(b) => b.clone(),
            WrappedValue::Int(i) => i.to_be_bytes().to_vec(),
            WrappedValue::Decimal(d) => d.to_string().into_bytes(),
            WrappedValue::None => Vec::new(),
            WrappedValue::RgaItem { value, ts, writer } => {
                let mut body = value.pack();
                body.extend_from_slice(&ts.to_be_bytes());
                body.extend_from_slice(&writer.to_be_bytes());
                body
            }
            WrappedValue::CtDatum {
                value,
                uuid,
                parent_uuid,
                visible,
            } => {
                let mut body = value.pack();
                body.extend_from_slice(uuid);
                body.extend_from_slice(parent_uuid);
                body.push(if *visible { 1 } else { 0 });
                body
            }
        }
    }

    /// Packs as a `p`-tagged `hex(class_name) + '_' + body` unit.
    pub fn pack(&self) -> Vec<u8> {
        let class_hex = hex_encode(self.class_name().as_bytes());
        let body = self.pack_body();
        let mut inner = Vec::with_capacity(class_hex.len() + 1 + body.len());
        inner.extend_from_slice(class_hex.as_bytes());
        inner.push(b'_');
        inner.extend_from_slice(&body);
        let mut out = Vec::new();
        write_tagged(tag::PACKABLE, &inner, &mut out);
        out
    }

    /// Unpacks using the built-in class names, falling back to
    /// `registry` for caller-supplied wrapper classes.
    pub fn unpack(data: &[u8], registry: &TypeRegistry) -> Result<Self, CrdtError> {
        let (t, payload, consumed) = read_tagged(data)?;
        if t != tag::PACKABLE {
            return Err(CrdtError::type_invalid("wrapped value must be a packable object"));
        }
        if consumed != data.len() {
            return Err(CrdtError::type_invalid("trailing bytes after wrapped value"));
        }
        let (class_name, body) = split_class(payload)?;
        match class_name.as_str() {
            "StrWrapper" => Ok(WrappedValue::Str(
                String::from_utf8(body.to_vec())
                    .map_err(|e| CrdtError::type_invalid(format!("invalid utf-8: {e}")))?,
            )),
            "BytesWrapper" => Ok(WrappedValue::Bytes(body.to_vec())),
            "IntWrapper" => {
                if body.len() != 8 {
                    return Err(CrdtError::type_invalid("IntWrapper body must be 8 bytes"));
                }
                let mut buf = [0u8; 8];
                buf.copy_from_slice(body);
                Ok(WrappedValue::Int(i64::from_be_bytes(buf)))
            }
            "DecimalWrapper" => {
                let text = std::str::from_utf8(body)
                    .map_err(|e| CrdtError::type_invalid(format!("invalid utf-8: {e}")))?;
                let d = Decimal::from_str(text)
                    .map_err(|e| CrdtError::type_invalid(format!("invalid decimal: {e}")))?;
                Ok(WrappedValue::Decimal(d))
            }
            "NoneWrapper" => Ok(WrappedValue::None),
            "RGATupleWrapper" => {
                let (_, inner_payload, inner_consumed) = read_tagged(body)?;
                let _ = inner_payload;
                let inner_value = WrappedValue::unpack(&body[..inner_consumed], registry)?;
                let rest = &body[inner_consumed..];
                if rest.len() != 16 {
                    return Err(CrdtError::type_invalid("RGATupleWrapper trailer must be 16 bytes"));
                }
                let ts = i64::from_be_bytes(rest[0..8].try_into().unwrap());
                let writer = i64::from_be_bytes(rest[8..16].try_into().unwrap());
                Ok(WrappedValue::RgaItem {
                    value: Box::new(inner_value),
                    ts,
                    writer,
                })
            }
            "CTDataWrapper" => {
                let (_, inner_payload, inner_consumed) = read_tagged(body)?;
                let _ = inner_payload;
                let inner_value = WrappedValue::unpack(&body[..inner_consumed], registry)?;
                let rest = &body[inner_consumed..];
                if rest.len() != 33 {
                    return Err(CrdtError::type_invalid("CTDataWrapper trailer must be 33 bytes"));
                }
                let mut uuid = [0u8; 16];
                uuid.copy_from_slice(&rest[0..16]);
                let mut parent_uuid = [0u8; 16];
                parent_uuid.copy_from_slice(&rest[16..32]);
                let visible = rest[32] != 0;
                Ok(WrappedValue::CtDatum {
                    value: Box::new(inner_value),
                    uuid,
                    parent_uuid,
                    visible,
                })
            }
            other => match registry.get(other) {
                Some(ctor) => ctor(body),
                None => Err(CrdtError::unknown_class(other)),
            },
        }
    }
}

impl Eq for WrappedValue {}

impl PartialOrd for WrappedValue {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for WrappedValue {
    /// Total order by packed bytes. Since `pack()` embeds the
    /// hex-encoded class name ahead of the body, this sorts first by
    /// class name and then by body bytes, matching the tie-break rule
    /// used throughout this workspace (`(class_name, bytes)`).
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.pack().cmp(&other.pack())
    }
}

/// A caller-extensible map from class name to a constructor for
/// wrapped value classes not built into this crate. Used by
/// [`WrappedValue::unpack`] when a class name is not one of the
/// built-ins.
pub type TypeRegistry = HashMap<String, fn(&[u8]) -> Result<WrappedValue, CrdtError>>;

pub fn empty_registry() -> TypeRegistry {
    HashMap::new()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_round_trips() {
        for v in [
            Value::Str("hello".into()),
            Value::Bytes(vec![1, 2, 3]),
            Value::Int(-42),
            Value::Float(3.25),
            Value::None,
        ] {
            let packed = v.pack();
            assert_eq!(Value::unpack(&packed).unwrap(), v);
        }
    }

    #[test]
    fn value_ordering_is_deterministic() {
        let mut values = vec![Value::Int(3), Value::Int(1), Value::Int(2)];
        values.sort();
        assert_eq!(values, vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
    }

    #[test]
    fn wrapped_value_round_trips_scalars() {
        let registry = empty_registry();
        for v in [
            WrappedValue::Str("hi".into()),
            WrappedValue::Bytes(vec![9, 8, 7]),
            WrappedValue::Int(-7),
            WrappedValue::Decimal(Decimal::from_str("0.125").unwrap()),
            WrappedValue::None,
        ] {
            let packed = v.pack();
            assert_eq!(WrappedValue::unpack(&packed, &registry).unwrap(), v);
        }
    }

    #[test]
    fn wrapped_value_round_trips_rga_item() {
        let registry = empty_registry();
        let item = WrappedValue::RgaItem {
            value: Box::new(WrappedValue::Str("x".into())),
            ts: 12,
            writer: 7,
        };
        let packed = item.pack();
        assert_eq!(WrappedValue::unpack(&packed, &registry).unwrap(), item);
    }

    #[test]
    fn wrapped_value_round_trips_ct_datum() {
        let registry = empty_registry();
        let datum = WrappedValue::CtDatum {
            value: Box::new(WrappedValue::Str("node".into())),
            uuid: [1; 16],
            parent_uuid: [0; 16],
            visible: true,
        };
        let packed = datum.pack();
        assert_eq!(WrappedValue::unpack(&packed, &registry).unwrap(), datum);
    }

    #[test]
    fn unknown_class_is_rejected() {
        let registry = empty_registry();
        let class_hex = hex_encode(b"SomeUnknownWrapper");
        let mut inner = class_hex.into_bytes();
        inner.push(b'_');
        let mut out = Vec::new();
        write_tagged(tag::PACKABLE, &inner, &mut out);
        assert_eq!(
            WrappedValue::unpack(&out, &registry),
            Err(CrdtError::unknown_class("SomeUnknownWrapper"))
        );
    }
}
