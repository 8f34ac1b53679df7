//! Integration tests for the composite document: multiple heterogeneous
//! parts sharing one clock, converging across two simulated replicas.

use convergent_core::{ScalarClock, Value};
use convergent_doc::{Document, Identifier, Part, PartKind};

#[test]
fn two_replicas_converge_across_a_counter_and_a_gset_part() {
    let uuid = [1; 16];
    let counter_id = Identifier::new([1; 16], PartKind::Counter);
    let set_id = Identifier::new([2; 16], PartKind::GSet);

    let mut r1 = Document::new(ScalarClock::new(uuid));
    let su_counter = match r1.part_mut(&counter_id) {
        Part::Counter(c) => c.increase(4).unwrap(),
        _ => unreachable!(),
    };
    let wrapped_counter = r1.update_part(counter_id.clone(), su_counter).unwrap();

    let mut r2 = Document::new(ScalarClock::new(uuid));
    let su_set = match r2.part_mut(&set_id) {
        Part::GSet(s) => s.add(Value::Str("hello".into())).unwrap(),
        _ => unreachable!(),
    };
    let wrapped_set = r2.update_part(set_id.clone(), su_set).unwrap();

    r1.update(wrapped_set).unwrap();
    r2.update(wrapped_counter).unwrap();

    assert_eq!(r1.ids().len(), 2);
    assert_eq!(r2.ids().len(), 2);
    assert_eq!(r1.checksums(), r2.checksums());

    match r1.part(&counter_id).unwrap() {
        Part::Counter(c) => assert_eq!(c.read(), 4),
        _ => unreachable!(),
    }
    match r2.part(&set_id).unwrap() {
        Part::GSet(s) => assert!(s.contains(&Value::Str("hello".into()))),
        _ => unreachable!(),
    }
}

#[test]
fn forgetting_a_part_drops_it_from_ids_but_preserves_its_state() {
    let uuid = [2; 16];
    let mut doc = Document::new(ScalarClock::new(uuid));
    let id = Identifier::new([9; 16], PartKind::Counter);
    let sub = match doc.part_mut(&id) {
        Part::Counter(c) => c.increase(2).unwrap(),
        _ => unreachable!(),
    };
    doc.update_part(id.clone(), sub).unwrap();
    assert_eq!(doc.ids(), vec![id.clone()]);

    doc.forget_part(&id).unwrap();
    assert!(doc.ids().is_empty());
    match doc.part(&id).unwrap() {
        Part::Counter(c) => assert_eq!(c.read(), 2),
        _ => unreachable!(),
    }
}

#[test]
fn pack_unpack_round_trips_a_multi_part_document() {
    let uuid = [3; 16];
    let mut doc = Document::new(ScalarClock::new(uuid));
    let counter_id = Identifier::new([1; 16], PartKind::Counter);
    let sub = match doc.part_mut(&counter_id) {
        Part::Counter(c) => c.increase(7).unwrap(),
        _ => unreachable!(),
    };
    doc.update_part(counter_id, sub).unwrap();

    let packed = doc.pack();
    let restored = Document::unpack(&packed, &convergent_core::empty_registry()).unwrap();
    assert_eq!(restored.checksums(), doc.checksums());
    assert_eq!(restored.ids(), doc.ids());
}
