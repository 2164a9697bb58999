use copse::{merge_visit, AvlMap};

#[test]
fn avl_map_smoke_matrix() {
    let mut map = AvlMap::<i64, i32>::new();
    map.insert(1, 1);
    map.insert(3, 5);
    map.insert(4, 5);
    map.insert(3, 15);
    map.insert(41, 0);
    map.insert(44, 123);

    assert_eq!(map.get(&44), Some(&123));
    assert_eq!(map.get(&3), Some(&15));
    assert_eq!(map.len(), 5);

    let keys: Vec<i64> = map.iter().map(|(k, _)| *k).collect();
    assert_eq!(keys, vec![1, 3, 4, 41, 44]);
    map.assert_valid().unwrap();
}

#[test]
fn avl_map_stepping_matrix() {
    let mut map = AvlMap::<String, i32>::new();
    assert_eq!(map.first(), None);

    map.insert("a".to_string(), 1);
    map.insert("b".to_string(), 2);
    map.insert("c".to_string(), 3);

    let mut list = Vec::new();
    let mut entry = map.first();
    while let Some(i) = entry {
        list.push((map.key(i).clone(), *map.value(i)));
        entry = map.next(i);
    }
    assert_eq!(
        list,
        vec![
            ("a".to_string(), 1),
            ("b".to_string(), 2),
            ("c".to_string(), 3)
        ]
    );

    let mut rev = Vec::new();
    let mut entry = map.last();
    while let Some(i) = entry {
        rev.push(map.key(i).clone());
        entry = map.prev(i);
    }
    assert_eq!(rev, vec!["c", "b", "a"]);
}

#[test]
fn avl_map_ladder_insert_delete_matrix() {
    let mut map = AvlMap::<i32, i32>::new();

    for i in 0..300 {
        map.insert(i, i * 2);
        map.assert_valid().unwrap();
    }
    assert_eq!(map.len(), 300);

    for i in (0..300).step_by(3) {
        assert_eq!(map.remove(&i), Some(i * 2));
        map.assert_valid().unwrap();
    }
    assert_eq!(map.len(), 200);

    for i in 0..300 {
        let expected = if i % 3 == 0 { None } else { Some(&(i * 2)) };
        assert_eq!(map.get(&i), expected);
    }

    // Freed slots get recycled.
    for i in (0..300).step_by(3) {
        map.insert(i, -i);
        map.assert_valid().unwrap();
    }
    assert_eq!(map.len(), 300);
    assert_eq!(map.get(&3), Some(&-3));
}

#[test]
fn avl_map_reverse_and_zigzag_insert_matrix() {
    let mut map = AvlMap::<i32, ()>::new();
    for i in (0..200).rev() {
        map.insert(i, ());
        map.assert_valid().unwrap();
    }

    let mut map = AvlMap::<i32, ()>::new();
    for i in 0..100 {
        map.insert(i, ());
        map.insert(1000 - i, ());
        map.assert_valid().unwrap();
    }
    assert_eq!(map.len(), 200);
}

#[test]
fn avl_map_floor_ceiling_matrix() {
    let mut map = AvlMap::<i64, &str>::new();
    for k in [10, 20, 30, 40] {
        map.insert(k, "x");
    }

    assert_eq!(map.left_sib(&25).map(|h| *map.key(h)), Some(20));
    assert_eq!(map.left_sib(&20).map(|h| *map.key(h)), Some(20));
    assert_eq!(map.left_sib(&9), None);
    assert_eq!(map.right_sib(&25).map(|h| *map.key(h)), Some(30));
    assert_eq!(map.right_sib(&30).map(|h| *map.key(h)), Some(30));
    assert_eq!(map.right_sib(&41), None);
}

#[test]
fn avl_map_visit_between_matrix() {
    let mut map = AvlMap::<i32, i32>::new();
    for i in 0..50 {
        map.insert(i, i);
    }

    let mut seen = Vec::new();
    map.visit_between(&10, &15, |k, _| {
        seen.push(*k);
        true
    });
    assert_eq!(seen, vec![10, 11, 12, 13, 14, 15]);

    let mut seen = Vec::new();
    map.visit_between(&10, &15, |k, _| {
        seen.push(*k);
        *k < 12
    });
    assert_eq!(seen, vec![10, 11, 12]);
}

#[test]
fn merge_visit_interleaves_maps_matrix() {
    let mut a = AvlMap::<i32, &str>::new();
    let mut b = AvlMap::<i32, &str>::new();
    let mut c = AvlMap::<i32, &str>::new();
    for k in [1, 4, 7] {
        a.insert(k, "a");
    }
    for k in [2, 5, 8] {
        b.insert(k, "b");
    }
    for k in [3, 6, 9] {
        c.insert(k, "c");
    }

    let mut keys = Vec::new();
    merge_visit(&[&a, &b, &c], |k, _| {
        keys.push(*k);
        true
    });
    assert_eq!(keys, vec![1, 2, 3, 4, 5, 6, 7, 8, 9]);

    let mut keys = Vec::new();
    merge_visit(&[&a, &b, &c], |k, _| {
        keys.push(*k);
        keys.len() < 4
    });
    assert_eq!(keys, vec![1, 2, 3, 4]);
}

#[test]
fn avl_map_random_churn_matrix() {
    // Deterministic LCG so failures reproduce.
    let mut state = 0x5eed_c0de_u64;
    let mut rng = move || {
        state = state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        state
    };

    let mut map = AvlMap::<u16, u64>::new();
    let mut shadow = std::collections::BTreeMap::new();

    for _ in 0..4000 {
        let k = (rng() % 500) as u16;
        if rng() % 3 == 0 {
            assert_eq!(map.remove(&k), shadow.remove(&k));
        } else {
            let v = rng();
            assert_eq!(map.insert(k, v), shadow.insert(k, v));
        }
    }

    map.assert_valid().unwrap();
    assert_eq!(map.len(), shadow.len());
    let got: Vec<(u16, u64)> = map.iter().map(|(k, v)| (*k, *v)).collect();
    let want: Vec<(u16, u64)> = shadow.into_iter().collect();
    assert_eq!(got, want);
}
