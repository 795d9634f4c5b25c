//! Entity CRUD through the entity set
//!
//! - Every field kind survives a write and a read unchanged
//! - Updates never change identity values
//! - Rows the codec has to escape come back byte-exact
//! - Unparsable rows fail strict reads but are kept on disk

use std::fs;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use shardcsv::schema::SchemaErrorCode;
use shardcsv::storage::StoreErrorCode;
use shardcsv::{Entity, EntitySet, FieldDef, FieldType, StoreConfig, Value};
use tempfile::TempDir;

// =============================================================================
// Test Utilities
// =============================================================================

fn open(temp: &TempDir) -> EntitySet {
    let config = StoreConfig {
        sync_on_close: false,
        ..StoreConfig::default()
    };
    EntitySet::open(temp.path(), config).expect("open store")
}

fn add_events(set: &mut EntitySet) {
    set.add_entity_type(
        "events",
        vec![
            FieldDef::string("source"),
            FieldDef::i64("seq"),
            FieldDef::new("level", FieldType::enumeration(["LOW", "HIGH"])),
            FieldDef::new("score", FieldType::F64),
            FieldDef::new("took", FieldType::Duration),
            FieldDef::new("at", FieldType::Instant),
            FieldDef::bool("acked"),
            FieldDef::new("notes", FieldType::list(FieldType::String)),
            FieldDef::new("small", FieldType::I8),
        ],
        &["source", "seq"],
    )
    .unwrap();
}

fn event(source: &str, seq: i64) -> Entity {
    Entity::new(vec![
        Value::from(source),
        Value::I64(seq),
        Value::Enum("HIGH".to_string()),
        Value::F64(-2.5),
        Value::Duration(Duration::from_millis(1500)),
        Value::Instant(Utc.with_ymd_and_hms(2024, 2, 29, 23, 59, 1).unwrap()),
        Value::Bool(true),
        Value::List(vec![
            Value::from("plain"),
            Value::from("with, comma"),
            Value::from("line\nbreak"),
            Value::from("back\\slash \"quoted\""),
        ]),
        Value::I8(-128),
    ])
}

fn id(source: &str, seq: i64) -> Vec<Value> {
    vec![Value::from(source), Value::I64(seq)]
}

// =============================================================================
// Round Trip
// =============================================================================

#[test]
fn test_every_field_kind_round_trips() {
    let temp = TempDir::new().unwrap();
    let mut set = open(&temp);
    add_events(&mut set);

    let stored = event("sensor,1", 42);
    assert!(!set.update("events", &stored, true).unwrap());
    assert_eq!(set.get("events", &id("sensor,1", 42)).unwrap(), Some(stored));
}

#[test]
fn test_round_trip_survives_reopen() {
    let temp = TempDir::new().unwrap();
    let stored = event("a", 1);
    {
        let mut set = open(&temp);
        add_events(&mut set);
        set.update("events", &stored, true).unwrap();
    }
    let set = open(&temp);
    let schema = set.entity_type("events").unwrap();
    assert_eq!(schema.identity_count(), 2);
    assert_eq!(set.get("events", &id("a", 1)).unwrap(), Some(stored));
}

#[test]
fn test_nulls_and_empty_strings_stay_distinct() {
    let temp = TempDir::new().unwrap();
    let mut set = open(&temp);
    add_events(&mut set);

    let mut sparse = Entity::empty(9);
    sparse.set(0, Value::from(""));
    sparse.set(1, Value::I64(0));
    sparse.set(7, Value::List(Vec::new()));
    set.update("events", &sparse, true).unwrap();

    let back = set.get("events", &id("", 0)).unwrap().unwrap();
    assert_eq!(back.get(0), Some(&Value::from("")));
    assert_eq!(back.get(3), Some(&Value::Null));
    assert_eq!(back.get(7), Some(&Value::List(Vec::new())));
}

#[test]
fn test_list_of_one_empty_string_is_not_the_empty_list() {
    let temp = TempDir::new().unwrap();
    let mut set = open(&temp);
    add_events(&mut set);

    let one_empty = event("a", 1).with(7, Value::List(vec![Value::from("")]));
    let two_empty = event("a", 2).with(7, Value::List(vec![Value::from(""), Value::from("")]));
    let none = event("a", 3).with(7, Value::List(Vec::new()));
    for entity in [&one_empty, &two_empty, &none] {
        set.update("events", entity, true).unwrap();
    }

    assert_eq!(set.get("events", &id("a", 1)).unwrap(), Some(one_empty));
    assert_eq!(set.get("events", &id("a", 2)).unwrap(), Some(two_empty));
    assert_eq!(set.get("events", &id("a", 3)).unwrap(), Some(none));
}

// =============================================================================
// Update And Delete
// =============================================================================

#[test]
fn test_update_replaces_non_identity_fields() {
    let temp = TempDir::new().unwrap();
    let mut set = open(&temp);
    add_events(&mut set);
    set.update("events", &event("a", 1), true).unwrap();

    let changed = event("a", 1).with(3, Value::F64(9.75)).with(6, Value::Bool(false));
    assert!(set.update("events", &changed, false).unwrap());
    assert_eq!(set.get("events", &id("a", 1)).unwrap(), Some(changed));
    assert_eq!(set.count("events").unwrap(), 1);
}

#[test]
fn test_delete_only_touches_its_entity() {
    let temp = TempDir::new().unwrap();
    let mut set = open(&temp);
    add_events(&mut set);
    for seq in 0..20 {
        set.update("events", &event("a", seq), true).unwrap();
    }
    for seq in (0..20).step_by(2) {
        assert!(set.delete("events", &id("a", seq)).unwrap());
    }
    for seq in 0..20 {
        let found = set.get("events", &id("a", seq)).unwrap();
        assert_eq!(found.is_some(), seq % 2 == 1, "seq {}", seq);
    }
    assert!(!set.delete("events", &id("a", 0)).unwrap());
}

#[test]
fn test_wrong_value_type_is_rejected() {
    let temp = TempDir::new().unwrap();
    let mut set = open(&temp);
    add_events(&mut set);
    let bad = event("a", 1).with(8, Value::I64(1));
    let err = set.update("events", &bad, true).unwrap_err();
    assert_eq!(
        err.schema_error().map(|e| e.code()),
        Some(SchemaErrorCode::BadEntity)
    );
    assert_eq!(set.count("events").unwrap(), 0);
}

// =============================================================================
// Damaged Rows
// =============================================================================

#[test]
fn test_bad_row_is_kept_and_reported() {
    let temp = TempDir::new().unwrap();
    let mut set = open(&temp);
    set.add_entity_type("t", vec![FieldDef::i64("id"), FieldDef::string("v")], &["id"])
        .unwrap();
    let path = temp.path().join("t").join("t.csv");
    fs::write(&path, "*id:i64,v:string\n1,a\nnot-a-number,b\n3,c\n").unwrap();

    // Tolerant lookups step over the damaged row.
    assert!(set.get("t", &[Value::I64(3)]).unwrap().is_some());
    assert_eq!(set.count("t").unwrap(), 2);

    // A write through the shard keeps it verbatim.
    set.update("t", &Entity::new(vec![Value::I64(3), Value::from("z")]), false)
        .unwrap();
    assert_eq!(
        fs::read_to_string(&path).unwrap(),
        "*id:i64,v:string\n1,a\nnot-a-number,b\n3,z\n"
    );

    // A strict scan stops at it with its position.
    let mut cursor = set.scan("t").unwrap();
    assert!(cursor.next().unwrap().is_some());
    let err = cursor.next().unwrap_err();
    assert_eq!(err.code(), StoreErrorCode::ParseError);
    let position = err.position().unwrap();
    assert_eq!(position.line, 3);
    assert_eq!(position.column, 0);
}
