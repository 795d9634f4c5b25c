//! Row migration after a structural schema change
//!
//! One tolerant pass over every shard of a type: each shard header is
//! replaced by the new schema's header and each row is rebuilt from the
//! column mapping of the [`SchemaChange`]. Rows that fail to parse are
//! left as they are.

use std::path::PathBuf;
use std::sync::Arc;

use crate::format::{FormatRegistry, ValueFormat};
use crate::observability::ObservationScope;
use crate::schema::{Entity, EntitySchema, SchemaChange, SchemaError, Value};
use crate::storage::{Cursor, CursorOptions, StoreError, StoreResult};

/// Value written into a column that did not exist before
pub(crate) enum NewColumn<'a> {
    /// Empty cell
    Null,
    /// Same value in every row
    Constant(Value),
    /// Derived from the row as read with the old schema; rows that cannot
    /// be parsed in full get null
    Computed(&'a mut dyn FnMut(&Entity) -> Value),
}

struct Filler<'s, 'a> {
    schema: &'s EntitySchema,
    formats: Vec<Arc<dyn ValueFormat>>,
    source: NewColumn<'a>,
    constant: Option<Option<String>>,
}

impl Filler<'_, '_> {
    fn encode(&self, column: usize, value: &Value) -> StoreResult<Option<String>> {
        if value.is_null() {
            return Ok(None);
        }
        let field = &self.schema.fields()[column];
        if !field.field_type.accepts(value) {
            return Err(SchemaError::bad_entity(
                self.schema.name(),
                format!(
                    "field {} is {}, got a {} value",
                    field.name,
                    field.field_type,
                    value.kind()
                ),
            )
            .into());
        }
        self.formats[column]
            .encode(value)
            .map(Some)
            .map_err(|e| StoreError::from(SchemaError::bad_entity(self.schema.name(), e.to_string())))
    }

    /// Encodes a fixed value once, before any shard is touched.
    fn prepare(&mut self, column: usize) -> StoreResult<()> {
        let cell = match &self.source {
            NewColumn::Null => None,
            NewColumn::Constant(value) => self.encode(column, value)?,
            NewColumn::Computed(_) => return Ok(()),
        };
        self.constant = Some(cell);
        Ok(())
    }

    fn cell(&mut self, column: usize, cursor: &mut Cursor) -> StoreResult<Option<String>> {
        if let Some(cell) = &self.constant {
            return Ok(cell.clone());
        }
        let value = match &mut self.source {
            NewColumn::Computed(compute) => match cursor.materialize() {
                Ok(entity) => compute(&entity),
                Err(_) => Value::Null,
            },
            NewColumn::Null | NewColumn::Constant(_) => Value::Null,
        };
        self.encode(column, &value)
    }
}

/// Rewrites every row of `shards` from `old` to `change.schema`.
///
/// Returns the number of rows rewritten. A computed value of the wrong
/// type fails the pass part-way; shards already rewritten stay rewritten.
pub(crate) fn migrate_rows(
    old: &EntitySchema,
    change: &SchemaChange,
    registry: &FormatRegistry,
    shards: Vec<PathBuf>,
    sync_on_close: bool,
    source: NewColumn<'_>,
) -> StoreResult<u64> {
    let reshaped = change.columns.len() != old.column_count()
        || change
            .columns
            .iter()
            .enumerate()
            .any(|(column, from)| *from != Some(column));
    // Resolve on a copy so the new descriptor keeps its formats open.
    let formats = change.schema.clone().formats(registry).to_vec();
    let mut filler = Filler {
        schema: &change.schema,
        formats,
        source,
        constant: None,
    };
    if let Some(column) = change.columns.iter().position(Option::is_none) {
        filler.prepare(column)?;
    }

    let scope = ObservationScope::with_fields("MIGRATE", &[("type", old.name())]);
    let options =
        CursorOptions::new(sync_on_close).with_replacement_header(change.schema.header_tokens());
    let mut cursor = Cursor::open(old, registry, shards, options);
    let outcome = rewrite(&mut cursor, change, reshaped, &mut filler);
    let closed = cursor.close();

    match outcome.and_then(|rows| closed.map(|_| rows)) {
        Ok(rows) => {
            let rows_text = rows.to_string();
            scope.complete_with_fields(&[("rows", rows_text.as_str())]);
            Ok(rows)
        }
        Err(err) => {
            scope.fail(&err.to_string());
            Err(err)
        }
    }
}

fn rewrite(
    cursor: &mut Cursor,
    change: &SchemaChange,
    reshaped: bool,
    filler: &mut Filler<'_, '_>,
) -> StoreResult<u64> {
    let mut rows = 0;
    while cursor.next_identity(true)?.is_some() {
        rows += 1;
        if !reshaped {
            continue;
        }
        let old_cells = cursor.raw_cells()?.to_vec();
        let mut cells = Vec::with_capacity(change.columns.len());
        for (column, from) in change.columns.iter().enumerate() {
            match from {
                Some(old) => cells.push(old_cells[*old].clone()),
                None => cells.push(filler.cell(column, cursor)?),
            }
        }
        cursor.replace_cells(cells)?;
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::FieldDef;
    use std::fs;
    use tempfile::TempDir;

    fn schema() -> EntitySchema {
        EntitySchema::new("t", vec![FieldDef::i64("id"), FieldDef::string("name")], &["id"]).unwrap()
    }

    fn shard(temp: &TempDir, rows: &str) -> PathBuf {
        let path = temp.path().join("t.csv");
        fs::write(&path, format!("*id:i64,name:string\n{}", rows)).unwrap();
        path
    }

    #[test]
    fn test_adds_constant_column() {
        let temp = TempDir::new().unwrap();
        let path = shard(&temp, "1,a\n2,b\n");
        let old = schema();
        let change = old.add_field(FieldDef::bool("active"), None, false).unwrap();
        let rows = migrate_rows(
            &old,
            &change,
            &FormatRegistry::new(),
            vec![path.clone()],
            false,
            NewColumn::Constant(Value::Bool(true)),
        )
        .unwrap();
        assert_eq!(rows, 2);
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "*id:i64,name:string,active:bool\n1,a,true\n2,b,true\n"
        );
        assert!(!change.schema.formats_locked());
    }

    #[test]
    fn test_computed_column_sees_old_row() {
        let temp = TempDir::new().unwrap();
        let path = shard(&temp, "1,ab\n2,abcd\n");
        let old = schema();
        let change = old.add_field(FieldDef::i64("len"), None, false).unwrap();
        let mut compute = |e: &Entity| match e.get(1) {
            Some(Value::String(s)) => Value::I64(s.len() as i64),
            _ => Value::Null,
        };
        migrate_rows(
            &old,
            &change,
            &FormatRegistry::new(),
            vec![path.clone()],
            false,
            NewColumn::Computed(&mut compute),
        )
        .unwrap();
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "*id:i64,name:string,len:i64\n1,ab,2\n2,abcd,4\n"
        );
    }

    #[test]
    fn test_rejects_value_of_wrong_type() {
        let temp = TempDir::new().unwrap();
        let path = shard(&temp, "1,a\n");
        let old = schema();
        let change = old.add_field(FieldDef::bool("active"), None, false).unwrap();
        let result = migrate_rows(
            &old,
            &change,
            &FormatRegistry::new(),
            vec![path],
            false,
            NewColumn::Constant(Value::from("yes")),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_rename_only_touches_header() {
        let temp = TempDir::new().unwrap();
        let path = shard(&temp, "1,\"a,b\"\n");
        let old = schema();
        let change = old.rename_field("name", "label").unwrap();
        migrate_rows(
            &old,
            &change,
            &FormatRegistry::new(),
            vec![path.clone()],
            false,
            NewColumn::Null,
        )
        .unwrap();
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "*id:i64,label:string\n1,\"a,b\"\n"
        );
    }
}
