//! Schema evolution through the entity set
//!
//! - Adding then removing a field restores every shard byte for byte
//! - Renames touch headers and file names only
//! - Identity changes re-sort and re-place every row
//! - Rejected changes leave the type as it was

use std::fs;

use shardcsv::schema::SchemaErrorCode;
use shardcsv::storage::{shard_index, StoreError};
use shardcsv::{Entity, EntitySet, FieldDef, FieldType, StoreConfig, Value};
use tempfile::TempDir;

// =============================================================================
// Test Utilities
// =============================================================================

fn open(temp: &TempDir, target: u64) -> EntitySet {
    let config = StoreConfig {
        target_shard_size_bytes: target,
        sync_on_close: false,
        ..StoreConfig::default()
    };
    EntitySet::open(temp.path(), config).expect("open store")
}

fn seeded(temp: &TempDir, target: u64, rows: i64) -> EntitySet {
    let mut set = open(temp, target);
    set.add_entity_type(
        "items",
        vec![
            FieldDef::i64("id"),
            FieldDef::i32("group"),
            FieldDef::string("note"),
        ],
        &["id"],
    )
    .unwrap();
    for id in 0..rows {
        set.update("items", &item(id), true).unwrap();
    }
    set
}

fn item(id: i64) -> Entity {
    Entity::new(vec![
        Value::I64(id),
        Value::I32((id % 5) as i32),
        Value::from(format!("note \"{}\", with comma", id)),
    ])
}

fn snapshot(set: &EntitySet, type_name: &str) -> Vec<String> {
    set.shard_paths(type_name)
        .unwrap()
        .iter()
        .map(|p| fs::read_to_string(p).unwrap())
        .collect()
}

fn schema_code(err: &StoreError) -> Option<SchemaErrorCode> {
    err.schema_error().map(|e| e.code())
}

// =============================================================================
// Add And Remove
// =============================================================================

#[test]
fn test_add_then_remove_restores_bytes() {
    let temp = TempDir::new().unwrap();
    let mut set = seeded(&temp, 1024, 120);
    assert!(set.shard_count("items").unwrap() > 1);
    let before = snapshot(&set, "items");

    set.add_field(
        "items",
        FieldDef::new("tags", FieldType::list(FieldType::I32)),
        None,
        false,
        Value::List(vec![Value::I32(1), Value::I32(2)]),
    )
    .unwrap();
    let stored = set.get("items", &[Value::I64(7)]).unwrap().unwrap();
    assert_eq!(
        stored.get(3),
        Some(&Value::List(vec![Value::I32(1), Value::I32(2)]))
    );
    assert!(snapshot(&set, "items")[0].starts_with("*id:i64,group:i32,note:string,tags:list<i32>\n"));

    set.remove_field("items", "tags").unwrap();
    assert_eq!(snapshot(&set, "items"), before);
}

#[test]
fn test_added_field_defaults_to_null() {
    let temp = TempDir::new().unwrap();
    let mut set = seeded(&temp, 1 << 20, 3);
    set.add_field("items", FieldDef::bool("done"), None, false, Value::Null)
        .unwrap();
    let stored = set.get("items", &[Value::I64(1)]).unwrap().unwrap();
    assert_eq!(stored.get(3), Some(&Value::Null));

    // New rows must carry the new column.
    let err = set.update("items", &item(9), true).unwrap_err();
    assert_eq!(schema_code(&err), Some(SchemaErrorCode::BadEntity));
    let full = Entity::new(vec![
        Value::I64(9),
        Value::I32(4),
        Value::from("n"),
        Value::Bool(true),
    ]);
    set.update("items", &full, true).unwrap();
    assert_eq!(set.get("items", &[Value::I64(9)]).unwrap(), Some(full));
}

// =============================================================================
// Renames
// =============================================================================

#[test]
fn test_rename_field_keeps_rows() {
    let temp = TempDir::new().unwrap();
    let mut set = seeded(&temp, 1 << 20, 10);
    let before = snapshot(&set, "items");

    set.rename_field("items", "note", "comment").unwrap();
    let after = snapshot(&set, "items");
    assert_eq!(
        after[0].lines().next(),
        Some("*id:i64,group:i32,comment:string")
    );
    let rows = |shards: &[String]| -> Vec<String> {
        shards
            .iter()
            .flat_map(|s| s.lines().skip(1).map(str::to_string).collect::<Vec<_>>())
            .collect()
    };
    assert_eq!(rows(&after), rows(&before));

    let schema = set.entity_type("items").unwrap();
    assert_eq!(schema.field_index("comment"), Some(2));
    assert_eq!(set.get("items", &[Value::I64(3)]).unwrap(), Some(item(3)));
}

#[test]
fn test_rename_type_renames_every_shard() {
    let temp = TempDir::new().unwrap();
    let mut set = seeded(&temp, 1024, 120);
    let shards = set.shard_count("items").unwrap();
    assert!(shards > 1);

    set.rename_entity_type("items", "goods").unwrap();
    assert_eq!(set.shard_count("goods").unwrap(), shards);
    assert!(temp.path().join("goods").join("goods 1.csv").is_file());
    assert_eq!(set.get("goods", &[Value::I64(99)]).unwrap(), Some(item(99)));

    let reopened = open(&temp, 1024);
    assert_eq!(reopened.entity_types().collect::<Vec<_>>(), vec!["goods"]);
}

// =============================================================================
// Identity Changes
// =============================================================================

#[test]
fn test_promote_and_demote_identity_field() {
    let temp = TempDir::new().unwrap();
    let mut set = seeded(&temp, 1024, 120);

    set.change_field_identity("items", "group", true).unwrap();
    let count = set.shard_count("items").unwrap();
    for path in set.shard_paths("items").unwrap() {
        assert!(fs::read_to_string(&path)
            .unwrap()
            .starts_with("*id:i64,*group:i32,note:string\n"));
    }
    for id in 0..120 {
        let key = [Value::I64(id), Value::I32((id % 5) as i32)];
        let index = shard_index(&key, count);
        let found = set.get("items", &key).unwrap();
        assert_eq!(found, Some(item(id)), "id {} expected in shard {}", id, index);
    }
    assert!(set.get("items", &[Value::I64(1)]).is_err());

    set.change_field_identity("items", "group", false).unwrap();
    assert_eq!(set.entity_type("items").unwrap().identity_count(), 1);
    for id in 0..120 {
        assert_eq!(set.get("items", &[Value::I64(id)]).unwrap(), Some(item(id)));
    }
}

#[test]
fn test_demotion_that_reorders_rows() {
    let temp = TempDir::new().unwrap();
    let mut set = seeded(&temp, 1 << 20, 0);
    for (id, group) in [(1, 3), (2, 1), (3, 2)] {
        let row = item(id).with(1, Value::I32(group));
        set.update("items", &row, true).unwrap();
    }
    set.change_field_identity("items", "group", true).unwrap();
    set.change_field_identity("items", "id", false).unwrap();

    let text = &snapshot(&set, "items")[0];
    let groups: Vec<&str> = text.lines().skip(1).map(|l| &l[..1]).collect();
    assert_eq!(groups, vec!["1", "2", "3"]);
    assert!(text.starts_with("*group:i32,id:i64,note:string\n"));
}

#[test]
fn test_add_identity_field_with_constant() {
    let temp = TempDir::new().unwrap();
    let mut set = seeded(&temp, 1024, 60);
    set.add_field("items", FieldDef::string("region"), None, true, Value::from("eu"))
        .unwrap();
    let schema = set.entity_type("items").unwrap();
    assert_eq!(schema.identity_count(), 2);
    assert_eq!(schema.field_index("region"), Some(1));
    for id in 0..60 {
        let found = set
            .get("items", &[Value::I64(id), Value::from("eu")])
            .unwrap()
            .unwrap();
        assert_eq!(found.get(3), Some(&item(id).values()[2]));
    }
}

// =============================================================================
// Misuse
// =============================================================================

#[test]
fn test_rejected_changes_leave_type_untouched() {
    let temp = TempDir::new().unwrap();
    let mut set = seeded(&temp, 1 << 20, 5);
    let before = snapshot(&set, "items");

    let err = set.remove_field("items", "id").unwrap_err();
    assert_eq!(schema_code(&err), Some(SchemaErrorCode::SoleIdentity));
    let err = set.rename_field("items", "note", "group").unwrap_err();
    assert_eq!(schema_code(&err), Some(SchemaErrorCode::DuplicateField));
    let err = set
        .add_field("items", FieldDef::string("note"), None, false, Value::Null)
        .unwrap_err();
    assert_eq!(schema_code(&err), Some(SchemaErrorCode::DuplicateField));
    let err = set.change_field_identity("items", "ghost", true).unwrap_err();
    assert_eq!(schema_code(&err), Some(SchemaErrorCode::UnknownField));
    let err = set
        .add_field("items", FieldDef::bool("done"), None, false, Value::from("no"))
        .unwrap_err();
    assert_eq!(schema_code(&err), Some(SchemaErrorCode::BadEntity));

    assert_eq!(snapshot(&set, "items"), before);
    assert_eq!(set.entity_type("items").unwrap().column_count(), 3);
}
