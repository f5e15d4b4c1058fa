use relstore::{
    decode_tuple, encode_tuple, error_kind, AttrType, Attribute, CompOp, ErrorKind,
    RelationManager, Rid, Setting, Value,
};
use std::path::Path;

use std::sync::Once;
static INIT: Once = Once::new();
fn setup() {
    INIT.call_once(|| {
        env_logger::init();
    });
}

fn open_catalog(dir: &Path) -> RelationManager {
    let manager = RelationManager::open(dir, Setting::default()).unwrap();
    manager.create_catalog().unwrap();
    manager
}

fn employee_attrs() -> Vec<Attribute> {
    vec![
        Attribute::new("emp_name", AttrType::VarChar, 50),
        Attribute::new("age", AttrType::Int, 4),
        Attribute::new("height", AttrType::Real, 4),
    ]
}

fn employee(name: &str, age: Option<i32>, height: f32) -> Vec<u8> {
    encode_tuple(
        &employee_attrs(),
        &[Some(Value::from(name)), age.map(Value::Int), Some(Value::Real(height))],
    )
    .unwrap()
}

fn index_rids(manager: &RelationManager, table: &str, attr: &str, key: &Value) -> Vec<Rid> {
    let mut rids: Vec<Rid> = manager
        .index_scan(table, attr, Some(key), Some(key), true, true)
        .unwrap()
        .map(|item| item.unwrap().0)
        .collect();
    rids.sort();
    rids
}

#[test]
fn test_table_lifecycle() {
    setup();

    let dir = tempfile::tempdir().unwrap();
    let manager = open_catalog(dir.path());

    manager.create_table("employee", &employee_attrs()).unwrap();
    assert!(dir.path().join("employee.t").exists());
    assert_eq!(employee_attrs(), manager.get_attributes("employee").unwrap());

    let err = manager.create_table("employee", &employee_attrs()).unwrap_err();
    assert_eq!(Some(ErrorKind::AlreadyExists), error_kind(&err));
    let err = manager.create_table("empty", &[]).unwrap_err();
    assert_eq!(Some(ErrorKind::InvalidArgument), error_kind(&err));

    // the catalog is readable through its own tables
    let names: Vec<Vec<Option<Value>>> = {
        let scan = manager
            .scan("Tables", "system", CompOp::Eq, Some(&Value::Int(0)), &["table-id", "table-name"])
            .unwrap();
        let attrs = scan.attributes().to_vec();
        scan.map(|item| decode_tuple(&attrs, &item.unwrap().1).unwrap())
            .collect()
    };
    assert_eq!(
        vec![vec![Some(Value::Int(4)), Some(Value::from("employee"))]],
        names
    );

    let rid = manager
        .insert_tuple("employee", &employee("Peter", Some(24), 170.1))
        .unwrap();
    assert_eq!(
        employee("Peter", Some(24), 170.1),
        manager.read_tuple("employee", rid).unwrap()
    );
    assert_eq!(
        Value::Real(170.1),
        manager.read_attribute("employee", rid, "height").unwrap()
    );
    assert_eq!(
        "emp_name: Peter    age: 24    height: 170.1",
        manager
            .print_tuple(&employee_attrs(), &manager.read_tuple("employee", rid).unwrap())
            .unwrap()
    );

    manager
        .update_tuple("employee", &employee("Peter Anteater", None, 171.0), rid)
        .unwrap();
    assert_eq!(
        employee("Peter Anteater", None, 171.0),
        manager.read_tuple("employee", rid).unwrap()
    );

    manager.delete_tuple("employee", rid).unwrap();
    let err = manager.read_tuple("employee", rid).unwrap_err();
    assert_eq!(Some(ErrorKind::NotFound), error_kind(&err));

    manager.delete_table("employee").unwrap();
    assert!(!dir.path().join("employee.t").exists());
    let err = manager.get_attributes("employee").unwrap_err();
    assert_eq!(Some(ErrorKind::NotFound), error_kind(&err));

    // no column rows are left behind
    let columns = manager
        .scan("Columns", "table-id", CompOp::Eq, Some(&Value::Int(4)), &["column-name"])
        .unwrap();
    assert_eq!(0, columns.count());

    manager.delete_catalog().unwrap();
    assert!(!dir.path().join("Tables.t").exists());
}

#[test]
fn test_system_tables_are_protected() {
    setup();

    let dir = tempfile::tempdir().unwrap();
    let manager = open_catalog(dir.path());

    for table in ["Tables", "Columns", "Indexes"] {
        let err = manager.delete_table(table).unwrap_err();
        assert_eq!(Some(ErrorKind::Protected), error_kind(&err));
        let err = manager.create_index(table, "table-id").unwrap_err();
        assert_eq!(Some(ErrorKind::Protected), error_kind(&err));
        let err = manager.delete_tuple(table, Rid::new(0, 0)).unwrap_err();
        assert_eq!(Some(ErrorKind::Protected), error_kind(&err));
    }
    let err = manager.create_table("Tables", &employee_attrs()).unwrap_err();
    assert_eq!(Some(ErrorKind::AlreadyExists), error_kind(&err));
}

#[test]
fn test_missing_catalog() {
    setup();

    let dir = tempfile::tempdir().unwrap();
    let manager = RelationManager::open(dir.path(), Setting::default()).unwrap();
    let err = manager.get_attributes("employee").unwrap_err();
    assert_eq!(Some(ErrorKind::NotFound), error_kind(&err));
    let err = manager.delete_catalog().unwrap_err();
    assert_eq!(Some(ErrorKind::NotFound), error_kind(&err));
}

#[test]
fn test_indexes_follow_tuples() {
    setup();

    let dir = tempfile::tempdir().unwrap();
    let setting = Setting {
        table_extension: "tbl".to_string(),
        index_extension: "bt".to_string(),
    };
    let manager = RelationManager::open(dir.path(), setting).unwrap();
    manager.create_catalog().unwrap();
    manager.create_table("employee", &employee_attrs()).unwrap();
    assert!(dir.path().join("employee.tbl").exists());

    // rows inserted before the index exists are loaded when it is created
    let mut rids = vec![];
    for i in 0..200 {
        let age = if i % 10 == 0 { None } else { Some(i % 20) };
        let rid = manager
            .insert_tuple("employee", &employee(&format!("e{i}"), age, i as f32))
            .unwrap();
        rids.push(rid);
    }
    manager.create_index("employee", "age").unwrap();
    assert!(dir.path().join("employee.age.bt").exists());
    let err = manager.create_index("employee", "age").unwrap_err();
    assert_eq!(Some(ErrorKind::AlreadyExists), error_kind(&err));
    let err = manager.create_index("employee", "salary").unwrap_err();
    assert_eq!(Some(ErrorKind::NotFound), error_kind(&err));
    assert_eq!(
        vec![Attribute::new("age", AttrType::Int, 4)],
        manager.get_indexes("employee").unwrap()
    );

    // null ages are not indexed
    let all = manager
        .index_scan("employee", "age", None, None, true, true)
        .unwrap()
        .count();
    assert_eq!(180, all);
    let sevens: Vec<Rid> = [7, 27, 47, 67, 87, 107, 127, 147, 167, 187]
        .iter()
        .map(|i| rids[*i])
        .collect();
    assert_eq!(sevens, index_rids(&manager, "employee", "age", &Value::Int(7)));

    manager.create_index("employee", "emp_name").unwrap();
    let rid = manager
        .insert_tuple("employee", &employee("newcomer", Some(7), 1.0))
        .unwrap();
    assert_eq!(vec![rid], index_rids(&manager, "employee", "emp_name", &Value::from("newcomer")));
    assert!(index_rids(&manager, "employee", "age", &Value::Int(7)).contains(&rid));

    // a large update moves the record but its rid stays in every index
    let long_name = "n".repeat(50);
    manager
        .update_tuple("employee", &employee(&long_name, Some(99), 2.0), rid)
        .unwrap();
    assert!(!index_rids(&manager, "employee", "age", &Value::Int(7)).contains(&rid));
    assert_eq!(vec![rid], index_rids(&manager, "employee", "age", &Value::Int(99)));
    let long_key = Value::from(long_name.as_str());
    assert_eq!(vec![rid], index_rids(&manager, "employee", "emp_name", &long_key));
    assert!(index_rids(&manager, "employee", "emp_name", &Value::from("newcomer")).is_empty());

    manager.delete_tuple("employee", rid).unwrap();
    assert!(index_rids(&manager, "employee", "age", &Value::Int(99)).is_empty());

    manager.destroy_index("employee", "emp_name").unwrap();
    assert!(!dir.path().join("employee.emp_name.bt").exists());
    let err = manager
        .index_scan("employee", "emp_name", None, None, true, true)
        .err()
        .unwrap();
    assert_eq!(Some(ErrorKind::NotFound), error_kind(&err));
    let err = manager.destroy_index("employee", "emp_name").unwrap_err();
    assert_eq!(Some(ErrorKind::NotFound), error_kind(&err));

    manager.delete_table("employee").unwrap();
    assert!(!dir.path().join("employee.age.bt").exists());
    let indexes = manager
        .scan("Indexes", "", CompOp::NoOp, None, &["column-name"])
        .unwrap();
    assert_eq!(0, indexes.count());
}

#[test]
fn test_oversized_index_key_leaves_table_untouched() {
    setup();

    let dir = tempfile::tempdir().unwrap();
    let manager = open_catalog(dir.path());
    let attrs = vec![
        Attribute::new("id", AttrType::Int, 4),
        Attribute::new("name", AttrType::VarChar, 2000),
    ];
    manager.create_table("notes", &attrs).unwrap();
    let tuple = |id: i32, len: usize| {
        let name = Value::VarChar(vec![b'n'; len]);
        encode_tuple(&attrs, &[Some(Value::Int(id)), Some(name)]).unwrap()
    };
    let count_rows = || {
        manager
            .scan("notes", "", CompOp::NoOp, None, &["id"])
            .unwrap()
            .count()
    };

    // an index over a column that already holds a long value is never registered
    let long_rid = manager.insert_tuple("notes", &tuple(0, 1500)).unwrap();
    let err = manager.create_index("notes", "name").unwrap_err();
    assert_eq!(Some(ErrorKind::InvalidArgument), error_kind(&err));
    assert!(manager.get_indexes("notes").unwrap().is_empty());
    assert!(!dir.path().join("notes.name.idx").exists());

    manager.delete_tuple("notes", long_rid).unwrap();
    manager.create_index("notes", "name").unwrap();
    let rid = manager.insert_tuple("notes", &tuple(1, 10)).unwrap();

    let err = manager.insert_tuple("notes", &tuple(2, 1500)).unwrap_err();
    assert_eq!(Some(ErrorKind::InvalidArgument), error_kind(&err));
    assert_eq!(1, count_rows());

    let err = manager.update_tuple("notes", &tuple(1, 1500), rid).unwrap_err();
    assert_eq!(Some(ErrorKind::InvalidArgument), error_kind(&err));
    assert_eq!(tuple(1, 10), manager.read_tuple("notes", rid).unwrap());

    let short_key = Value::VarChar(vec![b'n'; 10]);
    assert_eq!(vec![rid], index_rids(&manager, "notes", "name", &short_key));
    let entries = manager
        .index_scan("notes", "name", None, None, true, true)
        .unwrap()
        .count();
    assert_eq!(1, entries);
}

#[test]
fn test_index_created_after_forwarding_updates() {
    setup();

    let dir = tempfile::tempdir().unwrap();
    let manager = open_catalog(dir.path());
    let attrs = vec![
        Attribute::new("id", AttrType::Int, 4),
        Attribute::new("payload", AttrType::VarChar, 3000),
    ];
    manager.create_table("blobs", &attrs).unwrap();

    let tuple = |id: i32, len: usize| {
        let payload = Value::VarChar(vec![b'b'; len]);
        encode_tuple(&attrs, &[Some(Value::Int(id)), Some(payload)]).unwrap()
    };
    let rids: Vec<Rid> = (0..8)
        .map(|i| manager.insert_tuple("blobs", &tuple(i, 900)).unwrap())
        .collect();
    for (i, rid) in rids.iter().enumerate().step_by(2) {
        manager.update_tuple("blobs", &tuple(i as i32, 2500), *rid).unwrap();
    }

    manager.create_index("blobs", "id").unwrap();
    for (i, rid) in rids.iter().enumerate() {
        assert_eq!(vec![*rid], index_rids(&manager, "blobs", "id", &Value::Int(i as i32)));
    }
    for rid in &rids {
        manager.delete_tuple("blobs", *rid).unwrap();
    }
    assert_eq!(
        0,
        manager
            .index_scan("blobs", "id", None, None, true, true)
            .unwrap()
            .count()
    );
}
