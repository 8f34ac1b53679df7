//! `Document`: a shared clock, an [`ORSet`] of part [`Identifier`]s, and
//! a `parts: {Identifier -> Part}` map -- the same "ORSet of names plus
//! a dict of children" shape [`LwwMap`] uses for its registers,
//! generalized so the children can be any CRDT in this workspace
//! rather than just a register.
//!
//! `update_part` wraps a child's own `StateUpdate` inside a
//! `(identifier, packed sub-update)` envelope stamped with the
//! document's clock, so a receiving replica's `update` can recover
//! which part the sub-update belongs to and hand it off.

use convergent_core::{CrdtError, Payload, ScalarClock, StateUpdate, Timestamp, TypeRegistry, Value, WrappedValue};
use convergent_crdt::{
    CausalTree, Counter, CounterSet, FiArray, GSet, LwwMap, LwwRegister, MerkleCrdt, MvMap, MvRegister, ORSet, PnCounter, RgArray,
};
use std::collections::BTreeMap;

const OP_OBSERVE: &str = "o";
const OP_FORGET: &str = "r";

/// Which concrete CRDT a [`Part`] wraps. The one-byte tag doubles as
/// the wire discriminant for `Identifier.type_id` and `Part::pack`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum PartKind {
    Counter = b'c',
    PnCounter = b'C',
    GSet = b's',
    ORSet = b'S',
    CounterSet = b'k',
    LwwRegister = b'l',
    LwwMap = b'L',
    MvRegister = b'm',
    MvMap = b'M',
    RgArray = b'R',
    FiArray = b'F',
    CausalTree = b'T',
}

impl PartKind {
    fn from_byte(b: u8) -> Result<Self, CrdtError> {
        Ok(match b {
            b'c' => PartKind::Counter,
            b'C' => PartKind::PnCounter,
            b's' => PartKind::GSet,
            b'S' => PartKind::ORSet,
            b'k' => PartKind::CounterSet,
            b'l' => PartKind::LwwRegister,
            b'L' => PartKind::LwwMap,
            b'm' => PartKind::MvRegister,
            b'M' => PartKind::MvMap,
            b'R' => PartKind::RgArray,
            b'F' => PartKind::FiArray,
            b'T' => PartKind::CausalTree,
            other => return Err(CrdtError::unknown_class(format!("part kind byte {other:#04x}"))),
        })
    }
}

/// Identifies one part of a [`Document`]: its own uuid, the kind of
/// CRDT it is, and optionally the identifier of a logical predecessor
/// (e.g. the part it was split or renamed from).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identifier {
    pub uuid: [u8; 16],
    pub kind: PartKind,
    pub previous: Option<Box<Identifier>>,
}

impl Identifier {
    pub fn new(uuid: [u8; 16], kind: PartKind) -> Self {
        Identifier { uuid, kind, previous: None }
    }

    pub fn with_previous(uuid: [u8; 16], kind: PartKind, previous: Identifier) -> Self {
        Identifier { uuid, kind, previous: Some(Box::new(previous)) }
    }

    pub fn pack(&self) -> Vec<u8> {
        let mut out = vec![self.kind as u8];
        out.extend_from_slice(&self.uuid);
        match &self.previous {
            Some(prev) => {
                out.push(1);
                let packed = prev.pack();
                out.extend_from_slice(&(packed.len() as u32).to_be_bytes());
                out.extend_from_slice(&packed);
            }
            None => out.push(0),
        }
        out
    }

    pub fn unpack(data: &[u8]) -> Result<Self, CrdtError> {
        if data.len() < 18 {
            return Err(CrdtError::type_invalid("packed identifier too short"));
        }
        let kind = PartKind::from_byte(data[0])?;
        let mut uuid = [0u8; 16];
        uuid.copy_from_slice(&data[1..17]);
        let has_previous = data[17];
        let previous = if has_previous == 1 {
            if data.len() < 22 {
                return Err(CrdtError::type_invalid("truncated identifier previous length"));
            }
            let len = u32::from_be_bytes(data[18..22].try_into().unwrap()) as usize;
            if data.len() != 22 + len {
                return Err(CrdtError::type_invalid("truncated identifier previous"));
            }
            Some(Box::new(Identifier::unpack(&data[22..22 + len])?))
        } else {
            if data.len() != 18 {
                return Err(CrdtError::type_invalid("trailing bytes after identifier"));
            }
            None
        };
        Ok(Identifier { uuid, kind, previous })
    }
}

impl PartialOrd for Identifier {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Identifier {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.pack().cmp(&other.pack())
    }
}

/// One named child CRDT of a [`Document`].
#[derive(Clone, PartialEq)]
pub enum Part {
    Counter(Counter),
    PnCounter(PnCounter),
    GSet(GSet),
    ORSet(ORSet),
    CounterSet(CounterSet),
    LwwRegister(LwwRegister),
    LwwMap(LwwMap),
    MvRegister(MvRegister),
    MvMap(MvMap),
    RgArray(RgArray),
    FiArray(FiArray),
    CausalTree(CausalTree),
}

impl Part {
    fn new(kind: PartKind, clock: ScalarClock) -> Self {
        match kind {
            PartKind::Counter => Part::Counter(Counter::new(clock)),
            PartKind::PnCounter => Part::PnCounter(PnCounter::new(clock)),
            PartKind::GSet => Part::GSet(GSet::new(clock)),
            PartKind::ORSet => Part::ORSet(ORSet::new(clock)),
            PartKind::CounterSet => Part::CounterSet(CounterSet::new(clock)),
            PartKind::LwwRegister => Part::LwwRegister(LwwRegister::new(clock, WrappedValue::None)),
            PartKind::LwwMap => Part::LwwMap(LwwMap::new(clock)),
            PartKind::MvRegister => Part::MvRegister(MvRegister::new(clock, WrappedValue::None)),
            PartKind::MvMap => Part::MvMap(MvMap::new(clock)),
            PartKind::RgArray => Part::RgArray(RgArray::new(clock)),
            PartKind::FiArray => Part::FiArray(FiArray::new(clock)),
            PartKind::CausalTree => Part::CausalTree(CausalTree::new(clock)),
        }
    }

    fn update(&mut self, su: StateUpdate) -> Result<(), CrdtError> {
        match self {
            Part::Counter(c) => c.update(su).map(|_| ()),
            Part::PnCounter(c) => c.update(su).map(|_| ()),
            Part::GSet(s) => s.update(su).map(|_| ()),
            Part::ORSet(s) => s.update(su).map(|_| ()),
            Part::CounterSet(s) => update_counterset(s, su),
            Part::LwwRegister(r) => r.update(su).map(|_| ()),
            Part::LwwMap(m) => m.update(su).map(|_| ()),
            Part::MvRegister(r) => r.update(su).map(|_| ()),
            Part::MvMap(m) => m.update(su).map(|_| ()),
            Part::RgArray(a) => a.update(su).map(|_| ()),
            Part::FiArray(a) => a.update(su).map(|_| ()),
            Part::CausalTree(t) => t.update(su).map(|_| ()),
        }
    }

    fn history(&self, from_ts: Option<Timestamp>, until_ts: Option<Timestamp>) -> Vec<StateUpdate> {
        match self {
            Part::Counter(c) => c.history(from_ts, until_ts),
            Part::PnCounter(c) => c.history(from_ts, until_ts),
            Part::GSet(s) => MerkleCrdt::history(s, from_ts, until_ts),
            Part::ORSet(s) => MerkleCrdt::history(s, from_ts, until_ts),
            Part::CounterSet(s) => MerkleCrdt::history(s, from_ts, until_ts),
            Part::LwwRegister(r) => MerkleCrdt::history(r, from_ts, until_ts),
            Part::LwwMap(m) => MerkleCrdt::history(m, from_ts, until_ts),
            Part::MvRegister(r) => MerkleCrdt::history(r, from_ts, until_ts),
            Part::MvMap(m) => MerkleCrdt::history(m, from_ts, until_ts),
            Part::RgArray(a) => MerkleCrdt::history(a, from_ts, until_ts),
            Part::FiArray(a) => MerkleCrdt::history(a, from_ts, until_ts),
            Part::CausalTree(t) => MerkleCrdt::history(t, from_ts, until_ts),
        }
    }

    fn pack(&self) -> Vec<u8> {
        match self {
            Part::Counter(c) => c.pack(),
            Part::PnCounter(c) => c.pack(),
            Part::GSet(s) => s.pack(),
            Part::ORSet(s) => s.pack(),
            Part::CounterSet(s) => s.pack(),
            Part::LwwRegister(r) => r.pack(),
            Part::LwwMap(m) => m.pack(),
            Part::MvRegister(r) => r.pack(),
            Part::MvMap(m) => m.pack(),
            Part::RgArray(a) => a.pack(),
            Part::FiArray(a) => a.pack(),
            Part::CausalTree(t) => t.pack(),
        }
    }

    fn unpack(kind: PartKind, data: &[u8], registry: &TypeRegistry) -> Result<Self, CrdtError> {
        Ok(match kind {
            PartKind::Counter => Part::Counter(Counter::unpack(data)?),
            PartKind::PnCounter => Part::PnCounter(PnCounter::unpack(data)?),
            PartKind::GSet => Part::GSet(GSet::unpack(data, registry)?),
            PartKind::ORSet => Part::ORSet(ORSet::unpack(data, registry)?),
            PartKind::CounterSet => Part::CounterSet(CounterSet::unpack(data, registry)?),
            PartKind::LwwRegister => Part::LwwRegister(LwwRegister::unpack(data, registry)?),
            PartKind::LwwMap => Part::LwwMap(LwwMap::unpack(data, registry)?),
            PartKind::MvRegister => Part::MvRegister(MvRegister::unpack(data, registry)?),
            PartKind::MvMap => Part::MvMap(MvMap::unpack(data, registry)?),
            PartKind::RgArray => Part::RgArray(RgArray::unpack(data, registry)?),
            PartKind::FiArray => Part::FiArray(FiArray::unpack(data, registry)?),
            PartKind::CausalTree => Part::CausalTree(CausalTree::unpack(data, registry)?),
        })
    }
}

/// `CounterSet` has no single `update` entry point of its own -- an id
/// registration and a counter amount arrive as two independent
/// `StateUpdate`s. A document-level update for a `CounterSet` part
/// bundles both, each packed whole so their own timestamps survive,
/// into a 2-item tuple; this unpacks and replays them against the
/// right counter id.
fn update_counterset(s: &mut CounterSet, su: StateUpdate) -> Result<(), CrdtError> {
    let registry = convergent_core::empty_registry();
    let (id_bytes, amount_bytes) = match &su.data {
        Payload::Tuple(items) if items.len() == 2 => {
            let id_bytes = match &items[0] {
                Payload::Value(Value::Bytes(b)) => b.clone(),
                _ => return Err(CrdtError::type_invalid("counterset id update must be bytes")),
            };
            let amount_bytes = match &items[1] {
                Payload::Value(Value::Bytes(b)) => b.clone(),
                _ => return Err(CrdtError::type_invalid("counterset amount update must be bytes")),
            };
            (id_bytes, amount_bytes)
        }
        _ => return Err(CrdtError::type_invalid("counterset payload must be an (id_update, amount_update) pair")),
    };
    let id_su = StateUpdate::unpack(&id_bytes, &registry)?;
    let amount_su = StateUpdate::unpack(&amount_bytes, &registry)?;
    let counter_id = match &id_su.data {
        Payload::Value(v) => v.clone(),
        _ => return Err(CrdtError::type_invalid("counterset id update payload must be a plain value")),
    };
    s.update_id(id_su)?;
    s.update_counter(counter_id, amount_su)?;
    Ok(())
}

fn pack_counterset_update(id_su: &StateUpdate, amount_su: &StateUpdate) -> Payload {
    Payload::tuple(vec![
        Payload::Value(Value::Bytes(id_su.pack())),
        Payload::Value(Value::Bytes(amount_su.pack())),
    ])
}

/// A shared clock, an [`ORSet`] of part identifiers, and the parts
/// themselves. Mutating a part produces a plain `StateUpdate` from
/// that part's own API; `update_part` wraps it for transport and
/// applies it locally in one step.
#[derive(Clone, PartialEq)]
pub struct Document {
    clock: ScalarClock,
    elements: ORSet,
    parts: BTreeMap<Identifier, Part>,
}

impl std::fmt::Debug for Document {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Document").field("clock", &self.clock).field("parts", &self.parts.len()).finish()
    }
}

impl Document {
    pub fn new(clock: ScalarClock) -> Self {
        Document {
            elements: ORSet::new(clock.clone()),
            parts: BTreeMap::new(),
            clock,
        }
    }

    pub fn clock(&self) -> &ScalarClock {
        &self.clock
    }

    /// Registers a new part of the given kind under `id` if one is not
    /// already present, and returns a mutable handle to it.
    pub fn part_mut(&mut self, id: &Identifier) -> &mut Part {
        let clock = self.clock.clone();
        self.parts.entry(id.clone()).or_insert_with(|| Part::new(id.kind, clock))
    }

    pub fn part(&self, id: &Identifier) -> Option<&Part> {
        self.parts.get(id)
    }

    pub fn ids(&self) -> Vec<Identifier> {
        self.elements
            .read()
            .into_iter()
            .filter_map(|member| match member {
                Value::Bytes(packed) => Identifier::unpack(&packed).ok(),
                _ => None,
            })
            .collect()
    }

    /// Wraps `sub`, a `StateUpdate` already produced against this
    /// document's shared clock by the part identified by `id`, into a
    /// document-level envelope; applies it locally and returns it for
    /// transport.
    pub fn update_part(&mut self, id: Identifier, sub: StateUpdate) -> Result<StateUpdate, CrdtError> {
        self.wrap_and_apply(id, sub)
    }

    /// The `CounterSet` equivalent of [`Self::update_part`]: bundles the
    /// id-registration update and the counter-amount update produced by
    /// [`CounterSet::increase`]/[`CounterSet::decrease`] into one
    /// document-level envelope.
    pub fn update_counterset_part(&mut self, id: Identifier, id_su: StateUpdate, amount_su: StateUpdate) -> Result<StateUpdate, CrdtError> {
        let ts = id_su.ts.max(amount_su.ts);
        let sub = StateUpdate::new(self.clock.uuid, ts, pack_counterset_update(&id_su, &amount_su));
        self.wrap_and_apply(id, sub)
    }

    fn wrap_and_apply(&mut self, id: Identifier, sub: StateUpdate) -> Result<StateUpdate, CrdtError> {
        let wrapped = StateUpdate::new(
            self.clock.uuid,
            sub.ts,
            Payload::tuple(vec![
                Payload::Value(Value::Str(OP_OBSERVE.to_string())),
                Payload::Value(Value::Bytes(id.pack())),
                Payload::Value(Value::Bytes(sub.pack())),
            ]),
        );
        self.update(wrapped.clone())?;
        Ok(wrapped)
    }

    pub fn update(&mut self, su: StateUpdate) -> Result<&mut Self, CrdtError> {
        if su.clock_uuid != self.clock.uuid {
            return Err(CrdtError::type_invalid("update clock_uuid does not match document's clock"));
        }
        let items = match &su.data {
            Payload::Tuple(items) if items.len() == 2 || items.len() == 3 => items,
            _ => return Err(CrdtError::type_invalid("document payload must be an (op, id[, sub-update]) tuple")),
        };
        let op = match &items[0] {
            Payload::Value(Value::Str(s)) => s.clone(),
            _ => return Err(CrdtError::type_invalid("document op must be a string")),
        };
        let id_bytes = match &items[1] {
            Payload::Value(Value::Bytes(b)) => b.clone(),
            _ => return Err(CrdtError::type_invalid("document identifier must be bytes")),
        };
        let id = Identifier::unpack(&id_bytes)?;

        let elements_su = StateUpdate::new(
            su.clock_uuid,
            su.ts,
            Payload::tuple(vec![Payload::Value(Value::Str(op.clone())), Payload::Value(Value::Bytes(id.pack()))]),
        );
        self.elements.update(elements_su)?;

        if op == OP_OBSERVE && items.len() == 3 {
            let sub_bytes = match &items[2] {
                Payload::Value(Value::Bytes(b)) => b.clone(),
                _ => return Err(CrdtError::type_invalid("document sub-update must be bytes")),
            };
            let registry = convergent_core::empty_registry();
            let sub = StateUpdate::unpack(&sub_bytes, &registry)?;
            self.part_mut(&id).update(sub)?;
        }
        self.clock.update(su.ts)?;
        Ok(self)
    }

    /// Removes `id` from the set of known parts. The part's own state
    /// is retained in memory (so a concurrent `update_part` for it
    /// still has somewhere to land, per add-bias) but it no longer
    /// appears in [`Self::ids`]. Returns the envelope to replay on
    /// other replicas via [`Self::update`].
    pub fn forget_part(&mut self, id: &Identifier) -> Result<StateUpdate, CrdtError> {
        let ts = self.clock.read();
        let su = StateUpdate::new(
            self.clock.uuid,
            ts,
            Payload::tuple(vec![Payload::Value(Value::Str(OP_FORGET.to_string())), Payload::Value(Value::Bytes(id.pack()))]),
        );
        self.update(su.clone())?;
        Ok(su)
    }

    pub fn checksums(&self) -> (usize, u32) {
        let mut crc = crc32fast::Hasher::new();
        for id in self.ids() {
            if let Some(part) = self.parts.get(&id) {
                crc.update(&id.pack());
                crc.update(&part.pack());
            }
        }
        (self.ids().len(), crc.finalize())
    }

    /// Flattens every known part's history into one sequence, each
    /// re-wrapped in this document's own envelope shape.
    pub fn history(&self, from_ts: Option<Timestamp>, until_ts: Option<Timestamp>) -> Vec<StateUpdate> {
        self.parts
            .iter()
            .flat_map(|(id, part)| {
                part.history(from_ts, until_ts).into_iter().map(|sub| {
                    StateUpdate::new(
                        self.clock.uuid,
                        sub.ts,
                        Payload::tuple(vec![
                            Payload::Value(Value::Str(OP_OBSERVE.to_string())),
                            Payload::Value(Value::Bytes(id.pack())),
                            Payload::Value(Value::Bytes(sub.pack())),
                        ]),
                    )
                })
            })
            .collect()
    }

    pub fn pack(&self) -> Vec<u8> {
        let mut out = self.clock.pack();
        let elements_packed = self.elements.pack();
        out.extend_from_slice(&(elements_packed.len() as u32).to_be_bytes());
        out.extend_from_slice(&elements_packed);
        out.extend_from_slice(&(self.parts.len() as u32).to_be_bytes());
        for (id, part) in &self.parts {
            let id_packed = id.pack();
            out.extend_from_slice(&(id_packed.len() as u32).to_be_bytes());
            out.extend_from_slice(&id_packed);
            let part_packed = part.pack();
            out.extend_from_slice(&(part_packed.len() as u32).to_be_bytes());
            out.extend_from_slice(&part_packed);
        }
        out
    }

    pub fn unpack(data: &[u8], registry: &TypeRegistry) -> Result<Self, CrdtError> {
        if data.len() < 24 {
            return Err(CrdtError::type_invalid("packed document too short"));
        }
        let clock = ScalarClock::unpack(&data[..20])?;
        let mut rest = &data[20..];
        let elements_len = read_u32(&mut rest)?;
        if rest.len() < elements_len {
            return Err(CrdtError::type_invalid("truncated document elements"));
        }
        let elements = ORSet::unpack(&rest[..elements_len], registry)?;
        rest = &rest[elements_len..];
        let count = read_u32(&mut rest)?;
        let mut parts = BTreeMap::new();
        for _ in 0..count {
            let id_len = read_u32(&mut rest)?;
            if rest.len() < id_len {
                return Err(CrdtError::type_invalid("truncated document part id"));
            }
            let id = Identifier::unpack(&rest[..id_len])?;
            rest = &rest[id_len..];
            let part_len = read_u32(&mut rest)?;
            if rest.len() < part_len {
                return Err(CrdtError::type_invalid("truncated document part"));
            }
            let part = Part::unpack(id.kind, &rest[..part_len], registry)?;
            rest = &rest[part_len..];
            parts.insert(id, part);
        }
        Ok(Document { clock, elements, parts })
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

#[cfg(test)]
mod tests {
    use super::*;
    use convergent_core::empty_registry;

    #[test]
    fn update_part_registers_and_applies_to_the_right_child() {
        let mut doc = Document::new(ScalarClock::new([1; 16]));
        let id = Identifier::new([1; 16], PartKind::Counter);
        let sub = match doc.part_mut(&id) {
            Part::Counter(c) => c.increase(3).unwrap(),
            _ => unreachable!(),
        };
        doc.update_part(id.clone(), sub).unwrap();
        match doc.part(&id).unwrap() {
            Part::Counter(c) => assert_eq!(c.read(), 3),
            _ => unreachable!(),
        }
        assert_eq!(doc.ids(), vec![id]);
    }

    #[test]
    fn two_replicas_converge_after_exchanging_part_updates() {
        let uuid = [2; 16];
        let id_a = Identifier::new([1; 16], PartKind::Counter);
        let id_b = Identifier::new([2; 16], PartKind::GSet);

        let mut r1 = Document::new(ScalarClock::new(uuid));
        let su_a = match r1.part_mut(&id_a) {
            Part::Counter(c) => c.increase(5).unwrap(),
            _ => unreachable!(),
        };
        let wrapped_a = r1.update_part(id_a.clone(), su_a).unwrap();

        let mut r2 = Document::new(ScalarClock::new(uuid));
        let su_b = match r2.part_mut(&id_b) {
            Part::GSet(s) => s.add(Value::Int(9)).unwrap(),
            _ => unreachable!(),
        };
        let wrapped_b = r2.update_part(id_b.clone(), su_b).unwrap();

        r1.update(wrapped_b).unwrap();
        r2.update(wrapped_a).unwrap();

        assert_eq!(r1.checksums(), r2.checksums());
        assert_eq!(r1.ids().len(), 2);
    }

    #[test]
    fn pack_round_trips() {
        let mut doc = Document::new(ScalarClock::new([3; 16]));
        let id = Identifier::new([9; 16], PartKind::Counter);
        let sub = match doc.part_mut(&id) {
            Part::Counter(c) => c.increase(1).unwrap(),
            _ => unreachable!(),
        };
        doc.update_part(id.clone(), sub).unwrap();
        let packed = doc.pack();
        let restored = Document::unpack(&packed, &empty_registry()).unwrap();
        assert_eq!(restored.checksums(), doc.checksums());
    }

    #[test]
    fn identifier_round_trips_with_previous() {
        let prev = Identifier::new([1; 16], PartKind::GSet);
        let id = Identifier::with_previous([2; 16], PartKind::LwwMap, prev.clone());
        let packed = id.pack();
        let restored = Identifier::unpack(&packed).unwrap();
        assert_eq!(restored, id);
        assert_eq!(*restored.previous.unwrap(), prev);
    }
}
