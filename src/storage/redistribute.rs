//! Redistribution of a type's rows over its shards
//!
//! A K-way merge over one tolerant cursor per shard. An ordered map from
//! identity to origin shard holds the head row of every cursor; popping
//! its minimum visits all rows in global identity order exactly once.
//! Rows already in their placement shard are never rewritten; the rest
//! are inserted into the target cursor (in front of its head row, which
//! keeps every shard sorted) and deleted from the origin.
//!
//! A row whose identity is already held in the map, or equals the last
//! visited identity, is a duplicate and is deleted where it was read.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use super::cursor::{Cursor, CursorOptions};
use super::errors::{StoreError, StoreResult};
use super::placement::shard_index;
use crate::format::FormatRegistry;
use crate::observability::ObservationScope;
use crate::schema::{EntitySchema, IdentityKey};

/// Counts from one redistribution pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RedistributionReport {
    /// Rows visited
    pub visited: u64,
    /// Rows moved to another shard
    pub moved: u64,
    /// Duplicate rows deleted
    pub duplicates_removed: u64,
}

struct Merge {
    heads: BTreeMap<IdentityKey, usize>,
    last: Option<IdentityKey>,
    report: RedistributionReport,
}

impl Merge {
    /// Reads the next non-duplicate row of `cursor` into the map.
    fn pull(&mut self, cursor: &mut Cursor, origin: usize) -> StoreResult<()> {
        while let Some(key) = cursor.next_identity(true)? {
            if self.heads.contains_key(&key) || self.last.as_ref() == Some(&key) {
                cursor.delete()?;
                self.report.duplicates_removed += 1;
                continue;
            }
            self.heads.insert(key, origin);
            break;
        }
        Ok(())
    }
}

/// Moves every row of `shards` to the shard its identity places it in
/// among the first `target_count` shards.
///
/// Shards at positions `target_count..` end up with no rows. Every shard
/// must already be sorted by identity.
pub fn redistribute(
    schema: &EntitySchema,
    registry: &FormatRegistry,
    shards: &[PathBuf],
    target_count: usize,
    options: &CursorOptions,
) -> StoreResult<RedistributionReport> {
    if target_count == 0 || target_count > shards.len() {
        return Err(StoreError::cursor_state(format!(
            "Cannot redistribute {} shards into {}",
            shards.len(),
            target_count
        )));
    }
    let shard_count = shards.len().to_string();
    let target = target_count.to_string();
    let scope = ObservationScope::with_fields(
        "REDISTRIBUTE",
        &[
            ("type", schema.name()),
            ("shards", shard_count.as_str()),
            ("target", target.as_str()),
        ],
    );

    let mut cursors: Vec<Cursor> = shards
        .iter()
        .map(|path| Cursor::open(schema, registry, vec![path.clone()], options.clone()))
        .collect();

    let result = merge(&mut cursors, target_count);
    let mut first_error = result.as_ref().err().map(|e| e.to_string());
    let mut close_error = None;
    for cursor in &mut cursors {
        if let Err(err) = cursor.close() {
            first_error.get_or_insert_with(|| err.to_string());
            close_error.get_or_insert(err);
        }
    }

    match (result, close_error) {
        (Ok(report), None) => {
            let visited = report.visited.to_string();
            let moved = report.moved.to_string();
            let duplicates = report.duplicates_removed.to_string();
            scope.complete_with_fields(&[
                ("visited", visited.as_str()),
                ("moved", moved.as_str()),
                ("duplicates_removed", duplicates.as_str()),
            ]);
            Ok(report)
        }
        (Err(err), _) | (Ok(_), Some(err)) => {
            scope.fail(first_error.as_deref().unwrap_or("unknown"));
            Err(err)
        }
    }
}

fn merge(cursors: &mut [Cursor], target_count: usize) -> StoreResult<RedistributionReport> {
    let mut merge = Merge {
        heads: BTreeMap::new(),
        last: None,
        report: RedistributionReport::default(),
    };
    for (origin, cursor) in cursors.iter_mut().enumerate() {
        merge.pull(cursor, origin)?;
    }

    while let Some((key, origin)) = merge.heads.pop_first() {
        merge.report.visited += 1;
        let target = shard_index(key.values(), target_count);
        if target != origin {
            let cells = cursors[origin].raw_cells()?.to_vec();
            cursors[target].insert_raw(&cells)?;
            cursors[origin].delete()?;
            merge.report.moved += 1;
        }
        merge.last = Some(key);
        merge.pull(&mut cursors[origin], origin)?;
    }
    Ok(merge.report)
}

/// Sorts one shard by identity, dropping rows with repeated identities.
///
/// A shard that is already strictly ascending is left untouched. Returns
/// the number of duplicates dropped.
pub fn sort_shard(
    schema: &EntitySchema,
    registry: &FormatRegistry,
    shard: &Path,
    options: &CursorOptions,
) -> StoreResult<u64> {
    let mut check = Cursor::open(schema, registry, vec![shard.to_path_buf()], options.clone());
    let mut previous: Option<IdentityKey> = None;
    let mut ascending = true;
    while let Some(key) = check.next_identity(true)? {
        if previous.as_ref().is_some_and(|p| *p >= key) {
            ascending = false;
            break;
        }
        previous = Some(key);
    }
    check.close()?;
    if ascending {
        return Ok(0);
    }

    let file = shard.display().to_string();
    let scope = ObservationScope::with_fields(
        "SORT_SHARD",
        &[("type", schema.name()), ("file", file.as_str())],
    );
    let mut cursor = Cursor::open(schema, registry, vec![shard.to_path_buf()], options.clone());
    let outcome = rewrite_sorted(&mut cursor);

    match outcome {
        Ok(removed) => {
            let removed_text = removed.to_string();
            scope.complete_with_fields(&[("duplicates_removed", removed_text.as_str())]);
            Ok(removed)
        }
        Err(err) => {
            scope.fail(&err.to_string());
            Err(err)
        }
    }
}

fn rewrite_sorted(cursor: &mut Cursor) -> StoreResult<u64> {
    let mut rows: Vec<(IdentityKey, Vec<Option<String>>)> = Vec::new();
    while let Some(key) = cursor.next_identity(true)? {
        rows.push((key, cursor.raw_cells()?.to_vec()));
        cursor.delete()?;
    }
    rows.sort_by(|a, b| a.0.cmp(&b.0));
    let before = rows.len();
    rows.dedup_by(|later, earlier| later.0 == earlier.0);
    for (_, cells) in &rows {
        cursor.insert_raw(cells)?;
    }
    cursor.close()?;
    Ok((before - rows.len()) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{FieldDef, Value};
    use std::fs;
    use tempfile::TempDir;

    const HEADER: &str = "*id:i64,name:string\n";

    fn schema() -> EntitySchema {
        EntitySchema::new("t", vec![FieldDef::i64("id"), FieldDef::string("name")], &["id"]).unwrap()
    }

    fn write_shard(temp: &TempDir, name: &str, ids: &[i64]) -> PathBuf {
        let mut text = String::from(HEADER);
        for id in ids {
            text.push_str(&format!("{},n{}\n", id, id));
        }
        let path = temp.path().join(name);
        fs::write(&path, text).unwrap();
        path
    }

    fn ids_in(path: &PathBuf) -> Vec<i64> {
        fs::read_to_string(path)
            .unwrap()
            .lines()
            .skip(1)
            .map(|l| l.split(',').next().unwrap().parse().unwrap())
            .collect()
    }

    #[test]
    fn test_places_every_row_and_keeps_order() {
        let temp = TempDir::new().unwrap();
        let a = write_shard(&temp, "t.csv", &(0..60).collect::<Vec<_>>());
        let b = write_shard(&temp, "t 1.csv", &[]);
        let c = write_shard(&temp, "t 2.csv", &[]);
        let shards = vec![a, b, c];

        let report = redistribute(
            &schema(),
            &FormatRegistry::new(),
            &shards,
            3,
            &CursorOptions::new(false),
        )
        .unwrap();
        assert_eq!(report.visited, 60);
        assert!(report.moved > 0);

        let mut all = Vec::new();
        for (index, shard) in shards.iter().enumerate() {
            let ids = ids_in(shard);
            assert!(ids.windows(2).all(|w| w[0] < w[1]));
            for id in &ids {
                assert_eq!(shard_index(&[Value::I64(*id)], 3), index);
            }
            all.extend(ids);
        }
        all.sort();
        assert_eq!(all, (0..60).collect::<Vec<_>>());
    }

    #[test]
    fn test_second_pass_changes_nothing() {
        let temp = TempDir::new().unwrap();
        let shards = vec![
            write_shard(&temp, "t.csv", &[1, 4, 9, 16]),
            write_shard(&temp, "t 1.csv", &[2, 3, 5, 7, 11]),
        ];
        let options = CursorOptions::new(false);
        let registry = FormatRegistry::new();
        redistribute(&schema(), &registry, &shards, 2, &options).unwrap();
        let first: Vec<String> = shards.iter().map(|s| fs::read_to_string(s).unwrap()).collect();
        let report = redistribute(&schema(), &registry, &shards, 2, &options).unwrap();
        assert_eq!(report.moved, 0);
        let second: Vec<String> = shards.iter().map(|s| fs::read_to_string(s).unwrap()).collect();
        assert_eq!(first, second);
    }

    #[test]
    fn test_duplicates_across_shards_are_removed() {
        let temp = TempDir::new().unwrap();
        let shards = vec![
            write_shard(&temp, "t.csv", &[1, 2, 3]),
            write_shard(&temp, "t 1.csv", &[2, 3, 4]),
        ];
        let report = redistribute(
            &schema(),
            &FormatRegistry::new(),
            &shards,
            2,
            &CursorOptions::new(false),
        )
        .unwrap();
        assert_eq!(report.duplicates_removed, 2);
        let mut all: Vec<i64> = shards.iter().flat_map(ids_in).collect();
        all.sort();
        assert_eq!(all, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_drains_trailing_shards() {
        let temp = TempDir::new().unwrap();
        let shards = vec![
            write_shard(&temp, "t.csv", &[1, 2]),
            write_shard(&temp, "t 1.csv", &[3, 4, 5]),
            write_shard(&temp, "t 2.csv", &[6, 7, 8]),
        ];
        redistribute(
            &schema(),
            &FormatRegistry::new(),
            &shards,
            2,
            &CursorOptions::new(false),
        )
        .unwrap();
        assert!(ids_in(&shards[2]).is_empty());
        let mut all: Vec<i64> = shards[..2].iter().flat_map(ids_in).collect();
        all.sort();
        assert_eq!(all, (1..=8).collect::<Vec<_>>());
    }

    #[test]
    fn test_rejects_bad_target() {
        let temp = TempDir::new().unwrap();
        let shards = vec![write_shard(&temp, "t.csv", &[1])];
        let options = CursorOptions::new(false);
        let registry = FormatRegistry::new();
        assert!(redistribute(&schema(), &registry, &shards, 0, &options).is_err());
        assert!(redistribute(&schema(), &registry, &shards, 2, &options).is_err());
    }

    #[test]
    fn test_sort_shard() {
        let temp = TempDir::new().unwrap();
        let path = write_shard(&temp, "t.csv", &[5, 1, 3, 1]);
        let removed = sort_shard(
            &schema(),
            &FormatRegistry::new(),
            &path,
            &CursorOptions::new(false),
        )
        .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(ids_in(&path), vec![1, 3, 5]);

        let untouched = sort_shard(
            &schema(),
            &FormatRegistry::new(),
            &path,
            &CursorOptions::new(false),
        )
        .unwrap();
        assert_eq!(untouched, 0);
    }
}
