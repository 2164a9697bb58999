use vellum_core::{DeleteOp, Doc, FormatOp, Id, InsertOp, MultiOp, Op, Side};

#[test]
fn seeded_doc_exports_exactly_the_seed_ops() {
    let doc = Doc::new_seeded("0");

    assert_eq!(doc.text(), "\n");
    assert_eq!(
        doc.to_ops(),
        vec![
            Op::Insert(InsertOp {
                id: Id::root(),
                text: "x".to_string(),
                parent_id: Id::new("", 0),
                side: Side::Root,
            }),
            Op::Insert(InsertOp {
                id: Id::new("q", 1),
                text: "\n".to_string(),
                parent_id: Id::root(),
                side: Side::Right,
            }),
            Op::Delete(DeleteOp {
                id: Id::new("q", 2),
                target_id: Id::root(),
                span: 1,
            }),
        ]
    );
}

#[test]
fn insert_delete_insert_keeps_attachment_point() {
    let mut doc = Doc::new_seeded("0");
    doc.insert(0, "Hello World!").unwrap();
    doc.delete(6, 6).unwrap();
    doc.insert(6, "Friends!").unwrap();

    assert_eq!(doc.text(), "Hello Friends!\n");
    doc.validate().unwrap();
}

#[test]
fn merge_is_idempotent_for_every_op_kind() {
    let mut source = Doc::new_seeded("a");
    source.insert(0, "hello").unwrap();
    source.delete(1, 2).unwrap();
    let addr = source
        .get_address(
            &source.first_tot_id().unwrap(),
            &source.last_tot_id().unwrap(),
        )
        .unwrap();
    source.insert(0, "x").unwrap();
    source
        .rewind(
            &source.first_tot_id().unwrap(),
            &source.last_tot_id().unwrap(),
            &addr,
        )
        .unwrap();

    let ops = source.to_ops();
    let mut once = Doc::new("b");
    let mut twice = Doc::new("b");
    for op in &ops {
        once.merge_op(op).unwrap();
        twice.merge_op(op).unwrap();
        twice.merge_op(op).unwrap();
    }

    assert_eq!(once.text(), twice.text());
    assert_eq!(once.tot_text(), twice.tot_text());
    assert_eq!(once.tombstones(), twice.tombstones());
    assert_eq!(once.to_ops().len(), twice.to_ops().len());
}

#[test]
fn ops_with_missing_dependencies_are_quarantined() {
    let mut doc = Doc::new_seeded("0");
    doc.insert(0, "Hello, world!").unwrap();
    doc.delete(0, 5).unwrap();

    let bad_ops = vec![
        Op::Insert(InsertOp {
            id: Id::new("1", 100),
            text: "I'm a bad op".to_string(),
            parent_id: Id::new("1", 98),
            side: Side::Left,
        }),
        Op::Multi(MultiOp {
            ops: vec![
                Op::Insert(InsertOp {
                    id: Id::new("1", 112),
                    text: "So bad".to_string(),
                    parent_id: Id::new("1", 99),
                    side: Side::Right,
                }),
                Op::Delete(DeleteOp {
                    id: Id::new("1", 115),
                    target_id: Id::new("1", 98),
                    span: 5,
                }),
            ],
        }),
    ];

    for op in &bad_ops {
        assert!(doc.merge_op(op).is_err());
    }

    // The whole bundle is quarantined, not its individual members.
    assert_eq!(doc.failed_ops(), bad_ops);
    // Exports carry the quarantine so no op is lost.
    let logged = doc.to_ops();
    assert!(bad_ops.iter().all(|op| logged.contains(op)));
    assert_eq!(doc.text(), ", world!\n");
}

#[test]
fn reload_retries_quarantined_ops_once_dependencies_arrive() {
    let mut source = Doc::new_seeded("a");
    let ins = source.insert(0, "hi").unwrap();
    let del = source.delete(0, 1).unwrap();

    // Deliver the delete before the insert it depends on.
    let mut doc = Doc::new_seeded("b");
    assert!(doc.merge_op(&del).is_err());
    assert_eq!(doc.failed_ops().len(), 1);
    assert_eq!(doc.text(), "\n");

    doc.merge_op(&Op::Insert(ins)).unwrap();
    assert_eq!(doc.text(), "hi\n");

    doc.reload();
    assert!(doc.failed_ops().is_empty());
    assert_eq!(doc.text(), "i\n");
    assert_eq!(doc.text(), source.text());
    doc.validate().unwrap();
}

#[test]
fn format_ops_are_logged_and_clock_advances() {
    let mut doc = Doc::new_seeded("a");
    doc.insert(0, "bold me").unwrap();

    let start = doc.get_vis_id(0).unwrap();
    let end = doc.get_vis_id(3).unwrap();
    let mut payload = serde_json::Map::new();
    payload.insert("b".to_string(), serde_json::Value::String("true".into()));

    let clock_before = doc.clock();
    let fop = Op::Format(FormatOp {
        id: Id::new("z", 50),
        start_id: start,
        end_id: end,
        payload,
    });
    doc.merge_op(&fop).unwrap();

    assert!(doc.clock() > clock_before);
    assert!(doc.contains_id(&Id::new("z", 50)));
    // Format payloads never change visible text.
    assert_eq!(doc.text(), "bold me\n");
}

#[test]
fn snapshot_replaces_state() {
    let mut a = Doc::new_seeded("a");
    a.insert(0, "snapshot me").unwrap();

    let snap = Op::Snapshot(a.new_snapshot_op());
    let mut b = Doc::new_seeded("b");
    b.insert(0, "junk to be replaced").unwrap();
    b.merge_op(&snap).unwrap();

    assert_eq!(b.text(), "snapshot me\n");
    assert_eq!(b.tot_text(), a.tot_text());
}

#[test]
fn insert_right_of_targets_tombstoned_units() {
    let mut doc = Doc::new_seeded("a");
    doc.insert(0, "abc").unwrap();
    doc.delete(1, 1).unwrap();
    assert_eq!(doc.text(), "ac\n");

    // Id of the tombstoned "b".
    let b_id = doc.get_vis_id(0).unwrap().offset(1);
    assert!(doc.is_deleted(&b_id).unwrap());

    doc.insert_right_of(&b_id, "X").unwrap();
    assert_eq!(doc.text(), "aXc\n");
    doc.validate().unwrap();
}

#[test]
fn sequential_typing_extends_one_run() {
    let mut doc = Doc::new_seeded("a");
    doc.insert(0, "a").unwrap();
    doc.insert(1, "b").unwrap();
    doc.insert(2, "c").unwrap();

    // Three keystrokes, three log entries, but one run: remote replay
    // takes the append fast-path and positions still resolve.
    assert_eq!(doc.text(), "abc\n");

    let mut remote = Doc::new("r");
    for op in doc.to_ops() {
        remote.merge_op(&op).unwrap();
    }
    assert_eq!(remote.text(), "abc\n");
    remote.validate().unwrap();
}

#[test]
fn deletes_widen_to_surrogate_pairs() {
    let mut doc = Doc::new_seeded("a");
    doc.insert(0, "x🙂y").unwrap();
    assert_eq!(doc.vis_size(), 5); // x + two units + y + newline

    // Deleting just the high half takes the whole pair.
    doc.delete(1, 1).unwrap();
    assert_eq!(doc.text(), "xy\n");
    doc.validate().unwrap();
}

#[test]
fn position_bijection_holds() {
    let mut doc = Doc::new_seeded("a");
    doc.insert(0, "the quick brown fox").unwrap();
    doc.delete(4, 6).unwrap();
    doc.insert(4, "slow ").unwrap();

    for vis_ix in 0..doc.vis_size() {
        let id = doc.get_vis_id(vis_ix).unwrap();
        let (vis, _) = doc.get_index(&id).unwrap();
        assert_eq!(vis, Some(vis_ix));
    }
}

#[test]
fn sibling_navigation_skips_tombstones() {
    let mut doc = Doc::new_seeded("a");
    doc.insert(0, "abcdef").unwrap();
    doc.delete(2, 2).unwrap(); // tombstone "cd"
    assert_eq!(doc.text(), "abef\n");

    let b = doc.get_vis_id(1).unwrap();
    let e = doc.vis_right_of(&b).unwrap();
    assert_eq!(doc.get_char_by_id(&e).unwrap(), u16::from(b'e'));
    assert_eq!(doc.vis_left_of(&e).unwrap(), b);

    // Total stepping sees the tombstones.
    let c = doc.tot_right_of(&b).unwrap();
    assert!(doc.is_deleted(&c).unwrap());

    // Scanning for the newline from the left edge crosses the gap.
    let first = doc.first_id().unwrap();
    let nl = doc
        .vis_scan_right_of(&first, |c| c == u16::from(b'\n'))
        .unwrap();
    assert!(nl.is_some());
}
