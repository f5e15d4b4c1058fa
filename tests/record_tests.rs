use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use relstore::{
    decode_tuple, encode_tuple, error_kind, AttrType, Attribute, CompOp, ErrorKind, RecordStore,
    Rid, Value,
};
use std::collections::HashMap;

use std::sync::Once;
static INIT: Once = Once::new();
fn setup() {
    INIT.call_once(|| {
        env_logger::init();
    });
}

fn employee_attrs() -> Vec<Attribute> {
    vec![
        Attribute::new("emp_name", AttrType::VarChar, 200),
        Attribute::new("age", AttrType::Int, 4),
        Attribute::new("height", AttrType::Real, 4),
        Attribute::new("salary", AttrType::Int, 4),
    ]
}

fn employee(name: &str, age: Option<i32>, height: f32, salary: i32) -> Vec<u8> {
    encode_tuple(
        &employee_attrs(),
        &[
            Some(Value::from(name)),
            age.map(Value::Int),
            Some(Value::Real(height)),
            Some(Value::Int(salary)),
        ],
    )
    .unwrap()
}

fn new_store(dir: &tempfile::TempDir, name: &str) -> RecordStore {
    let path = dir.path().join(name);
    RecordStore::create_file(&path).unwrap();
    RecordStore::open(&path).unwrap()
}

#[test]
fn test_record_happy_path() {
    setup();

    let dir = tempfile::tempdir().unwrap();
    let store = new_store(&dir, "employee.t");
    let attrs = employee_attrs();

    let tuple = employee("Anteater", Some(25), 177.8, 6200);
    let rid = store.insert_record(&attrs, &tuple).unwrap();
    assert_eq!(Rid::new(0, 0), rid);
    assert_eq!(tuple, store.read_record(&attrs, rid).unwrap());
    assert_eq!(Value::Int(25), store.read_attribute(&attrs, rid, "age").unwrap());
    assert_eq!(
        "emp_name: Anteater    age: 25    height: 177.8    salary: 6200",
        RecordStore::print_record(&attrs, &tuple).unwrap()
    );

    let tuple = employee("Anteater", None, 177.8, 6200);
    let rid = store.insert_record(&attrs, &tuple).unwrap();
    assert_eq!(tuple, store.read_record(&attrs, rid).unwrap());
    let err = store.read_attribute(&attrs, rid, "age").unwrap_err();
    assert_eq!(Some(ErrorKind::NotFound), error_kind(&err));
    let err = store.read_attribute(&attrs, rid, "missing").unwrap_err();
    assert_eq!(Some(ErrorKind::NotFound), error_kind(&err));

    store.close().unwrap();

    let store = RecordStore::open(&dir.path().join("employee.t")).unwrap();
    assert_eq!(tuple, store.read_record(&attrs, rid).unwrap());

    let err = RecordStore::create_file(&dir.path().join("employee.t")).unwrap_err();
    assert_eq!(Some(ErrorKind::AlreadyExists), error_kind(&err));
    store.close().unwrap();

    RecordStore::destroy_file(&dir.path().join("employee.t")).unwrap();
    let err = RecordStore::open(&dir.path().join("employee.t")).unwrap_err();
    assert_eq!(Some(ErrorKind::NotFound), error_kind(&err));
}

#[test]
fn test_rid_survives_updates() {
    setup();

    let dir = tempfile::tempdir().unwrap();
    let store = new_store(&dir, "updates.t");
    let attrs = employee_attrs();
    let mut rng = rand::rngs::StdRng::seed_from_u64(0);

    let mut expected = HashMap::new();
    for i in 0..300 {
        let name = "x".repeat(rng.gen_range(1..200));
        let tuple = employee(&name, Some(i), 1.5, i * 10);
        let rid = store.insert_record(&attrs, &tuple).unwrap();
        expected.insert(rid, tuple);
    }

    let rids: Vec<Rid> = expected.keys().copied().collect();
    for round in 0..5 {
        for rid in &rids {
            let name = "y".repeat(rng.gen_range(1..200));
            let tuple = employee(&name, Some(round), 2.5, round * 7);
            store.update_record(&attrs, &tuple, *rid).unwrap();
            expected.insert(*rid, tuple);
        }
        for (rid, tuple) in &expected {
            assert_eq!(*tuple, store.read_record(&attrs, *rid).unwrap());
        }
    }
    store.close().unwrap();
}

#[test]
fn test_forwarding_update() {
    setup();

    let dir = tempfile::tempdir().unwrap();
    let store = new_store(&dir, "forward.t");
    let attrs = vec![Attribute::new("payload", AttrType::VarChar, 4000)];
    let tuple = |len: usize| {
        encode_tuple(&attrs, &[Some(Value::VarChar(vec![b'p'; len]))]).unwrap()
    };

    // a single varchar stores as 2 + 1 + 2 + len bytes
    let rid = store.insert_record(&attrs, &tuple(45)).unwrap();
    let free = store.free_space(0).unwrap();
    let filler = free - 8 - 5 - 40;
    store.insert_record(&attrs, &tuple(filler)).unwrap();
    assert_eq!(40, store.free_space(0).unwrap());

    let updated = tuple(195);
    store.update_record(&attrs, &updated, rid).unwrap();
    assert_eq!(updated, store.read_record(&attrs, rid).unwrap());
    assert_eq!(2, store.file().page_count().unwrap());
    assert_eq!(90, store.free_space(0).unwrap());

    // the scan reports the moved record once, under its own rid
    let scanned: Vec<Rid> = store
        .scan(&attrs, "", CompOp::NoOp, None, &["payload"])
        .unwrap()
        .map(|item| item.unwrap().0)
        .collect();
    assert_eq!(2, scanned.len());
    assert!(scanned.contains(&rid));
    assert!(scanned.contains(&Rid::new(0, 1)));
    store.close().unwrap();
}

#[test]
fn test_delete_frees_space() {
    setup();

    let dir = tempfile::tempdir().unwrap();
    let store = new_store(&dir, "delete.t");
    let attrs = employee_attrs();

    let rids: Vec<Rid> = (0..10)
        .map(|i| {
            let tuple = employee(&"n".repeat(10 + i), Some(i as i32), 1.0, 0);
            store.insert_record(&attrs, &tuple).unwrap()
        })
        .collect();

    // stored size: count 2, bitmap 1, four offsets 8, data 4 * 3 + name
    let victim = rids[3];
    let before = store.free_space(victim.page).unwrap();
    store.delete_record(victim).unwrap();
    assert_eq!(before + 2 + 1 + 8 + 12 + 13, store.free_space(victim.page).unwrap());

    let err = store.read_record(&attrs, victim).unwrap_err();
    assert_eq!(Some(ErrorKind::NotFound), error_kind(&err));
    let err = store.delete_record(victim).unwrap_err();
    assert_eq!(Some(ErrorKind::NotFound), error_kind(&err));
    let err = store.read_record(&attrs, Rid::new(0, 100)).unwrap_err();
    assert_eq!(Some(ErrorKind::NotFound), error_kind(&err));
    let err = store.read_record(&attrs, Rid::new(7, 0)).unwrap_err();
    assert_eq!(Some(ErrorKind::Io), error_kind(&err));

    // the freed slot is handed out again
    let rid = store
        .insert_record(&attrs, &employee("again", Some(1), 1.0, 1))
        .unwrap();
    assert_eq!(victim, rid);
    store.close().unwrap();
}

#[test]
fn test_record_too_large() {
    setup();

    let dir = tempfile::tempdir().unwrap();
    let store = new_store(&dir, "large.t");
    let attrs = vec![Attribute::new("payload", AttrType::VarChar, 8000)];
    let tuple = encode_tuple(&attrs, &[Some(Value::VarChar(vec![1; 5000]))]).unwrap();

    let err = store.insert_record(&attrs, &tuple).unwrap_err();
    assert_eq!(Some(ErrorKind::InvalidArgument), error_kind(&err));
    assert_eq!(1, store.file().page_count().unwrap());
}

#[test]
fn test_scan_completeness() {
    setup();

    let dir = tempfile::tempdir().unwrap();
    let store = new_store(&dir, "scan.t");
    let attrs = employee_attrs();
    let mut rng = rand::rngs::StdRng::seed_from_u64(42);

    let mut live = HashMap::new();
    for i in 0..2000 {
        let name = format!("emp{i:04}{}", "z".repeat(rng.gen_range(0..100)));
        let tuple = employee(&name, Some(i % 90), 1.0 + i as f32, i);
        let rid = store.insert_record(&attrs, &tuple).unwrap();
        live.insert(rid, i);
    }

    let mut rids: Vec<Rid> = live.keys().copied().collect();
    rids.sort();
    rids.shuffle(&mut rng);
    for rid in &rids[..500] {
        store.delete_record(*rid).unwrap();
        live.remove(rid);
    }
    for rid in &rids[500..700] {
        let i = live[rid];
        let tuple = employee(&"w".repeat(190), Some(i % 90), 1.0 + i as f32, i);
        store.update_record(&attrs, &tuple, *rid).unwrap();
    }

    let mut scan = store
        .scan(&attrs, "age", CompOp::Lt, Some(&Value::Int(30)), &["salary", "age"])
        .unwrap();
    assert_eq!(
        vec![
            Attribute::new("salary", AttrType::Int, 4),
            Attribute::new("age", AttrType::Int, 4),
        ],
        scan.attributes()
    );

    let mut found = HashMap::new();
    while let Some((rid, tuple)) = scan.next_record().unwrap() {
        let values = decode_tuple(scan.attributes(), &tuple).unwrap();
        let Some(Value::Int(salary)) = values[0] else {
            panic!("salary is never null");
        };
        assert_eq!(Some(Value::Int(salary % 90)), values[1]);
        assert!(found.insert(rid, salary).is_none(), "{rid} scanned twice");
    }
    scan.close();

    let expected: HashMap<Rid, i32> = live
        .iter()
        .filter(|(_, i)| **i % 90 < 30)
        .map(|(rid, i)| (*rid, *i))
        .collect();
    assert_eq!(expected, found);
    store.close().unwrap();
}

#[test]
fn test_scan_null_and_varchar_predicates() {
    setup();

    let dir = tempfile::tempdir().unwrap();
    let store = new_store(&dir, "predicate.t");
    let attrs = employee_attrs();

    for (name, age) in [("bob", Some(30)), ("alice", None), ("carol", Some(41)), ("al", Some(19))] {
        store
            .insert_record(&attrs, &employee(name, age, 1.0, 0))
            .unwrap();
    }

    let names = |op: CompOp, attr: &str, value: Option<&Value>| -> Vec<String> {
        store
            .scan(&attrs, attr, op, value, &["emp_name"])
            .unwrap()
            .map(|item| {
                let (_, tuple) = item.unwrap();
                let values = decode_tuple(&attrs[..1], &tuple).unwrap();
                match &values[0] {
                    Some(Value::VarChar(name)) => String::from_utf8(name.clone()).unwrap(),
                    other => panic!("unexpected {other:?}"),
                }
            })
            .collect()
    };

    // a null attribute never satisfies a comparison
    assert_eq!(vec!["bob", "carol", "al"], names(CompOp::Ne, "age", Some(&Value::Int(0))));
    assert_eq!(vec!["bob", "alice", "carol", "al"], names(CompOp::NoOp, "", None));
    assert_eq!(vec!["alice", "al"], names(CompOp::Lt, "emp_name", Some(&Value::from("b"))));
    assert_eq!(vec!["carol"], names(CompOp::Ge, "emp_name", Some(&Value::from("c"))));

    let err = store
        .scan(&attrs, "age", CompOp::Eq, Some(&Value::from("thirty")), &["age"])
        .err()
        .unwrap();
    assert_eq!(Some(ErrorKind::InvalidArgument), error_kind(&err));
    let err = store
        .scan(&attrs, "age", CompOp::Eq, None, &["age"])
        .err()
        .unwrap();
    assert_eq!(Some(ErrorKind::InvalidArgument), error_kind(&err));
}
