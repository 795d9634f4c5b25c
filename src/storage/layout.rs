//! On-disk layout
//!
//! `<root>/<type>/<type>.csv`, `<root>/<type>/<type> 1.csv`, ... Shards are
//! ordered by their numeric suffix (none counts as 0); the suffixes need
//! not be contiguous.

use std::fs;
use std::path::{Path, PathBuf};

use regex::Regex;

use super::errors::{StoreError, StoreResult};

/// File extension of shard files
pub const SHARD_EXTENSION: &str = "csv";

/// One shard file of a type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardFile {
    /// Numeric suffix of the file name
    pub number: u32,
    /// Full path
    pub path: PathBuf,
}

/// Directory holding the shards of `type_name`
pub fn type_dir(root: &Path, type_name: &str) -> PathBuf {
    root.join(type_name)
}

/// File name of shard `number` of `type_name`
pub fn shard_file_name(type_name: &str, number: u32) -> String {
    if number == 0 {
        format!("{}.{}", type_name, SHARD_EXTENSION)
    } else {
        format!("{} {}.{}", type_name, number, SHARD_EXTENSION)
    }
}

fn shard_pattern(type_name: &str) -> StoreResult<Regex> {
    let pattern = format!(
        r"^{}(?: ([0-9]{{1,9}}))?\.{}$",
        regex::escape(type_name),
        SHARD_EXTENSION
    );
    Regex::new(&pattern).map_err(|e| {
        StoreError::config_invalid(format!("Cannot match shards of type {}", type_name))
            .with_details(e.to_string())
    })
}

/// Lists the shards of a type in shard order. A missing directory has no shards.
pub fn discover_shards(root: &Path, type_name: &str) -> StoreResult<Vec<ShardFile>> {
    let dir = type_dir(root, type_name);
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let pattern = shard_pattern(type_name)?;
    let entries = fs::read_dir(&dir).map_err(|e| StoreError::io(&dir, "list", e))?;

    let mut shards = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| StoreError::io(&dir, "list", e))?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        let Some(captures) = pattern.captures(name) else {
            continue;
        };
        let number = match captures.get(1) {
            Some(m) => match m.as_str().parse::<u32>() {
                Ok(n) => n,
                Err(_) => continue,
            },
            None => 0,
        };
        if entry.path().is_file() {
            shards.push(ShardFile {
                number,
                path: entry.path(),
            });
        }
    }
    shards.sort_by_key(|s| s.number);
    Ok(shards)
}

/// Suffix for a new shard: one past the highest in use.
pub fn next_shard_number(shards: &[ShardFile]) -> u32 {
    shards.iter().map(|s| s.number + 1).max().unwrap_or(0)
}

/// Names of the sub-directories of `root`, sorted
pub fn list_type_dirs(root: &Path) -> StoreResult<Vec<String>> {
    let entries = fs::read_dir(root).map_err(|e| StoreError::io(root, "list", e))?;
    let mut names = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| StoreError::io(root, "list", e))?;
        if entry.path().is_dir() {
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
    }
    names.sort();
    Ok(names)
}

/// Total size in bytes of the given shards
pub fn total_size(shards: &[ShardFile]) -> StoreResult<u64> {
    let mut total = 0;
    for shard in shards {
        let meta = fs::metadata(&shard.path).map_err(|e| StoreError::io(&shard.path, "stat", e))?;
        total += meta.len();
    }
    Ok(total)
}
