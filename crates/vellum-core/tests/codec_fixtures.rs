//! Wire-format fixtures: exact shapes, round-trips, legacy imports.

use serde_json::Value;
use vellum_core::wire::{decode_op, decode_serialized, encode_op};
use vellum_core::{DeleteOp, Doc, Id, InsertOp, Op, RewindOp, ShowOp, Side};

#[test]
fn op_rows_have_the_canonical_shapes() {
    let rows = [
        (
            Op::Insert(InsertOp {
                id: Id::new("8cd8-dk", 3),
                text: "H".to_string(),
                parent_id: Id::new("q", 1),
                side: Side::Right,
            }),
            r#"[0,["8cd8-dk",3],"H",["q",1],1]"#,
        ),
        (
            Op::Delete(DeleteOp {
                id: Id::new("a", 9),
                target_id: Id::new("b", 2),
                span: 4,
            }),
            r#"[1,["a",9],["b",2],4]"#,
        ),
        (
            Op::Show(ShowOp {
                id: Id::new("a", 12),
                target_id: Id::new("b", 2),
                span: 4,
            }),
            r#"[8,["a",12],["b",2],4]"#,
        ),
    ];

    for (op, fixture) in rows {
        assert_eq!(encode_op(&op).to_string(), fixture);
        let parsed: Value = serde_json::from_str(fixture).unwrap();
        assert_eq!(decode_op(&parsed).unwrap(), Some(op));
    }
}

#[test]
fn multi_rows_nest_and_skip_dead_tags() {
    let raw = r#"[6,["a",5],[[1,["a",5],["b",0],1],[4,["a",6]],[8,["a",7],["b",0],1]]]"#;
    let parsed: Value = serde_json::from_str(raw).unwrap();
    let Some(Op::Multi(m)) = decode_op(&parsed).unwrap() else {
        panic!("expected a bundle");
    };
    // The deprecated tag-4 member disappears; the others survive.
    assert_eq!(m.ops.len(), 2);
    assert!(matches!(m.ops[0], Op::Delete(_)));
    assert!(matches!(m.ops[1], Op::Show(_)));
}

#[test]
fn rewind_rows_carry_both_addresses() {
    let mut doc = Doc::new_seeded("a");
    doc.insert(0, "hi").unwrap();
    let addr = doc
        .get_address(&doc.first_tot_id().unwrap(), &doc.last_tot_id().unwrap())
        .unwrap();
    doc.delete(0, 2).unwrap();
    let op = doc
        .rewind(
            &doc.first_tot_id().unwrap(),
            &doc.last_tot_id().unwrap(),
            &addr,
        )
        .unwrap();

    let encoded = encode_op(&op);
    let decoded = decode_op(&encoded).unwrap().expect("rewind survives");
    assert_eq!(decoded, op);
    let Op::Rewind(RewindOp {
        address,
        undo_address,
        ..
    }) = decoded
    else {
        panic!("expected a rewind");
    };
    assert_ne!(address.max_ids, undo_address.max_ids);
}

#[test]
fn document_round_trips_through_json() {
    let mut doc = Doc::new_seeded("a");
    doc.insert(0, "héllo 🙂").unwrap();
    doc.delete(1, 4).unwrap();

    let json = doc.to_json();
    let value: Value = serde_json::from_str(&json).unwrap();
    assert_eq!(value["version"], Value::String("v0".to_string()));
    assert!(value["ops"].is_array());

    let copy = Doc::from_json("b", &json).unwrap();
    assert_eq!(copy.text(), doc.text());
    assert_eq!(copy.tot_text(), doc.tot_text());
    assert_eq!(copy.tombstones(), doc.tombstones());
}

#[test]
fn versionless_documents_still_load() {
    let mut doc = Doc::new_seeded("a");
    doc.insert(0, "legacy").unwrap();

    // Strip the version field the way old exports looked.
    let mut value: Value = serde_json::from_str(&doc.to_json()).unwrap();
    value.as_object_mut().unwrap().remove("version");
    let legacy = decode_serialized(&value).unwrap();
    assert_eq!(legacy.version, None);

    let raw = value.to_string();
    let loaded = Doc::from_json("b", &raw).unwrap();
    assert_eq!(loaded.text(), "legacy\n");
}

#[test]
fn deep_copy_is_independent() {
    let mut doc = Doc::new_seeded("a");
    doc.insert(0, "shared").unwrap();

    let mut copy = doc.deep_copy();
    assert_eq!(copy.text(), doc.text());

    copy.insert(0, "only here ").unwrap();
    assert_eq!(doc.text(), "shared\n");
    assert_eq!(copy.text(), "only here shared\n");
}

#[test]
fn snapshot_rows_embed_a_document() {
    let mut doc = Doc::new_seeded("a");
    doc.insert(0, "snap").unwrap();
    let snap = Op::Snapshot(doc.new_snapshot_op());

    let encoded = encode_op(&snap);
    let arr = encoded.as_array().unwrap();
    assert_eq!(arr[0], Value::from(3));
    assert_eq!(arr.len(), 2);

    let decoded = decode_op(&encoded).unwrap().expect("snapshot survives");
    let mut fresh = Doc::new("x");
    fresh.merge_op(&decoded).unwrap();
    assert_eq!(fresh.text(), "snap\n");
}
