//! The entity store
//!
//! Owns the store root, the configuration, the format registry and one
//! descriptor per entity type. Every operation opens its own cursors and
//! closes them before it returns; nothing is cached between calls except
//! the descriptors.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::config::StoreConfig;
use super::migration::{migrate_rows, NewColumn};
use crate::format::{FormatRegistry, ValueFormat};
use crate::observability::{log_event, Event, Logger};
use crate::schema::{Entity, EntitySchema, FieldDef, SchemaChange, SchemaError, Value};
use crate::storage::{
    self, decode_line, discover_shards, encode_line, list_type_dirs, next_shard_number,
    shard_file_name, shard_index, sort_shard, total_size, type_dir, Cursor, CursorOptions,
    RedistributionReport, ShardFile, StoreError, StoreResult,
};

/// A directory of entity types, each stored as sorted CSV shards.
#[derive(Debug)]
pub struct EntitySet {
    root: PathBuf,
    config: StoreConfig,
    registry: FormatRegistry,
    types: BTreeMap<String, EntitySchema>,
}

impl EntitySet {
    /// Opens (or creates) a store at `root` with the default formats.
    pub fn open(root: impl AsRef<Path>, config: StoreConfig) -> StoreResult<Self> {
        Self::open_with_registry(root, config, FormatRegistry::new())
    }

    /// Opens (or creates) a store at `root`.
    ///
    /// Each sub-directory holding shards is a type; its schema is read from
    /// the header of its first non-empty shard. Types with an unreadable
    /// header are logged and left out.
    pub fn open_with_registry(
        root: impl AsRef<Path>,
        config: StoreConfig,
        registry: FormatRegistry,
    ) -> StoreResult<Self> {
        config.validate()?;
        Logger::set_min_severity(config.log_level);

        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).map_err(|e| StoreError::io(&root, "create", e))?;

        let mut types = BTreeMap::new();
        for name in list_type_dirs(&root)? {
            if let Some(schema) = load_type(&root, &name)? {
                types.insert(name, schema);
            }
        }

        let root_text = root.display().to_string();
        let type_count = types.len().to_string();
        log_event(
            Event::StoreOpened,
            &[("root", root_text.as_str()), ("types", type_count.as_str())],
        );

        Ok(Self {
            root,
            config,
            registry,
            types,
        })
    }

    /// Store directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Active configuration
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Type-wide format registry
    pub fn registry(&self) -> &FormatRegistry {
        &self.registry
    }

    /// Mutable registry. Types that already resolved their formats keep them.
    pub fn registry_mut(&mut self) -> &mut FormatRegistry {
        &mut self.registry
    }

    /// Names of all known types, sorted
    pub fn entity_types(&self) -> impl Iterator<Item = &str> + '_ {
        self.types.keys().map(String::as_str)
    }

    /// Descriptor of a type
    pub fn entity_type(&self, name: &str) -> Option<&EntitySchema> {
        self.types.get(name)
    }

    fn schema(&self, name: &str) -> StoreResult<&EntitySchema> {
        self.types
            .get(name)
            .ok_or_else(|| SchemaError::unknown_type(name).into())
    }

    fn options(&self) -> CursorOptions {
        CursorOptions::new(self.config.sync_on_close)
    }

    fn shards(&self, type_name: &str) -> StoreResult<Vec<ShardFile>> {
        self.schema(type_name)?;
        discover_shards(&self.root, type_name)
    }

    /// Shard files of a type, in shard order
    pub fn shard_paths(&self, type_name: &str) -> StoreResult<Vec<PathBuf>> {
        Ok(self
            .shards(type_name)?
            .into_iter()
            .map(|s| s.path)
            .collect())
    }

    /// Number of shard files of a type
    pub fn shard_count(&self, type_name: &str) -> StoreResult<usize> {
        Ok(self.shards(type_name)?.len())
    }

    /// Shard count that keeps the average shard near the target size
    pub fn ideal_shard_count(&self, type_name: &str) -> StoreResult<usize> {
        let total = total_size(&self.shards(type_name)?)?;
        Ok(storage::ideal_shard_count(
            total,
            self.config.target_shard_size_bytes,
        ))
    }

    /// Number of parsable rows of a type
    pub fn count(&self, type_name: &str) -> StoreResult<u64> {
        let mut cursor = self.scan(type_name)?;
        let mut rows = 0;
        while cursor.next_identity(true)?.is_some() {
            rows += 1;
        }
        cursor.close()?;
        Ok(rows)
    }

    // =========================================================================
    // Types
    // =========================================================================

    /// Creates a type with one empty shard.
    pub fn add_entity_type(
        &mut self,
        name: &str,
        fields: Vec<FieldDef>,
        identity: &[&str],
    ) -> StoreResult<&EntitySchema> {
        let schema = EntitySchema::new(name, fields, identity)?;
        if self.types.contains_key(name) || !discover_shards(&self.root, name)?.is_empty() {
            return Err(SchemaError::duplicate_type(name).into());
        }
        let dir = type_dir(&self.root, name);
        fs::create_dir_all(&dir).map_err(|e| StoreError::io(&dir, "create", e))?;
        self.create_shard(&schema, 0)?;

        let field_count = schema.column_count().to_string();
        log_event(
            Event::TypeAdded,
            &[("type", name), ("fields", field_count.as_str())],
        );
        Ok(self.types.entry(name.to_string()).or_insert(schema))
    }

    /// Deletes a type's directory with all of its shards.
    pub fn remove_entity_type(&mut self, name: &str) -> StoreResult<()> {
        self.schema(name)?;
        let dir = type_dir(&self.root, name);
        fs::remove_dir_all(&dir).map_err(|e| StoreError::io(&dir, "remove", e))?;
        self.types.remove(name);
        log_event(Event::TypeRemoved, &[("type", name)]);
        Ok(())
    }

    /// Renames a type: its directory, every shard file and its descriptor.
    /// Field formats carry over.
    pub fn rename_entity_type(&mut self, old: &str, new: &str) -> StoreResult<()> {
        let current = self.schema(old)?;
        let renamed = current.rename(new)?;
        if old == new {
            return Ok(());
        }
        if current.formats_locked() {
            renamed.formats(&self.registry);
        }
        if self.types.contains_key(new) || type_dir(&self.root, new).exists() {
            return Err(SchemaError::duplicate_type(new).into());
        }
        let shards = discover_shards(&self.root, old)?;
        let from = type_dir(&self.root, old);
        let to = type_dir(&self.root, new);
        fs::rename(&from, &to).map_err(|e| StoreError::io(&from, "rename", e))?;
        for shard in shards {
            let Some(file_name) = shard.path.file_name() else {
                continue;
            };
            let source = to.join(file_name);
            let target = to.join(shard_file_name(new, shard.number));
            fs::rename(&source, &target).map_err(|e| StoreError::io(&source, "rename", e))?;
        }

        self.types.remove(old);
        self.types.insert(new.to_string(), renamed);
        log_event(Event::TypeRenamed, &[("from", old), ("to", new)]);
        Ok(())
    }

    /// Overrides the format of one field of a type. Fails once the type's
    /// formats were fixed by a read or write.
    pub fn set_field_format(
        &mut self,
        type_name: &str,
        field: &str,
        format: Arc<dyn ValueFormat>,
    ) -> StoreResult<()> {
        let schema = self
            .types
            .get_mut(type_name)
            .ok_or_else(|| SchemaError::unknown_type(type_name))?;
        schema.with_format(field, format)?;
        log_event(
            Event::FormatOverridden,
            &[("type", type_name), ("field", field)],
        );
        Ok(())
    }

    fn create_shard(&self, schema: &EntitySchema, number: u32) -> StoreResult<PathBuf> {
        let path = type_dir(&self.root, schema.name()).join(shard_file_name(schema.name(), number));
        let tokens = schema.header_tokens();
        let header = encode_line(&tokens.iter().map(Some).collect::<Vec<_>>());

        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| StoreError::io(&path, "create", e))?;
        file.write_all(header.as_bytes())
            .map_err(|e| StoreError::io(&path, "write", e))?;
        if self.config.sync_on_close {
            file.sync_all()
                .map_err(|e| StoreError::io(&path, "sync", e))?;
        }

        let file_text = path.display().to_string();
        log_event(
            Event::ShardAdded,
            &[("type", schema.name()), ("file", file_text.as_str())],
        );
        Ok(path)
    }

    fn remove_shard(&self, type_name: &str, path: &Path) -> StoreResult<()> {
        fs::remove_file(path).map_err(|e| StoreError::io(path, "remove", e))?;
        let file_text = path.display().to_string();
        log_event(
            Event::ShardRemoved,
            &[("type", type_name), ("file", file_text.as_str())],
        );
        Ok(())
    }

    // =========================================================================
    // Rows
    // =========================================================================

    /// Cursor over every shard of a type, in shard order.
    pub fn scan(&self, type_name: &str) -> StoreResult<Cursor> {
        let schema = self.schema(type_name)?;
        let paths = self.shard_paths(type_name)?;
        Ok(Cursor::open(schema, &self.registry, paths, self.options()))
    }

    /// Opens a cursor on the shard `id` is placed in. `None` if the type
    /// has no shards.
    fn placed_cursor(&self, type_name: &str, id: &[Value]) -> StoreResult<Option<(Cursor, usize)>> {
        let schema = self.schema(type_name)?;
        schema.check_identity(id)?;
        let paths = self.shard_paths(type_name)?;
        if paths.is_empty() {
            return Ok(None);
        }
        let index = shard_index(id, paths.len());
        let cursor = Cursor::open(
            schema,
            &self.registry,
            vec![paths[index].clone()],
            self.options(),
        );
        Ok(Some((cursor, index)))
    }

    /// Looks up one entity by its identity values.
    pub fn get(&self, type_name: &str, id: &[Value]) -> StoreResult<Option<Entity>> {
        let Some((mut cursor, _)) = self.placed_cursor(type_name, id)? else {
            return Ok(None);
        };
        let found = if cursor.seek(id, true)? {
            Some(cursor.materialize()?)
        } else {
            None
        };
        cursor.close()?;
        Ok(found)
    }

    /// Deletes one entity. Returns whether it existed.
    ///
    /// Once the type has more shards than its size warrants, one shard is
    /// given up: the emptied shard if this delete emptied it, otherwise the
    /// last one after draining it.
    pub fn delete(&mut self, type_name: &str, id: &[Value]) -> StoreResult<bool> {
        let Some((mut cursor, index)) = self.placed_cursor(type_name, id)? else {
            return Ok(false);
        };
        if !cursor.seek(id, true)? {
            cursor.close()?;
            return Ok(false);
        }
        cursor.delete()?;
        let emptied = cursor.rows_read() == 1
            && cursor.next_identity(true)?.is_none()
            && cursor.rows_skipped() == 0;
        cursor.close()?;

        self.shrink(type_name, index, emptied)?;
        Ok(true)
    }

    fn shrink(&mut self, type_name: &str, index: usize, emptied: bool) -> StoreResult<()> {
        let paths = self.shard_paths(type_name)?;
        let count = paths.len();
        if count <= 1 || self.ideal_shard_count(type_name)? >= count {
            return Ok(());
        }
        let schema = self.schema(type_name)?;
        let options = self.options();
        if emptied {
            self.remove_shard(type_name, &paths[index])?;
            let remaining: Vec<PathBuf> = paths
                .into_iter()
                .enumerate()
                .filter(|(i, _)| *i != index)
                .map(|(_, p)| p)
                .collect();
            storage::redistribute(schema, &self.registry, &remaining, remaining.len(), &options)?;
        } else {
            if self.holds_unreadable(schema, &paths[count - 1])? {
                return Ok(());
            }
            storage::redistribute(schema, &self.registry, &paths, count - 1, &options)?;
            self.remove_shard(type_name, &paths[count - 1])?;
        }
        Ok(())
    }

    /// Whether a tolerant pass over `path` would step over any content.
    fn holds_unreadable(&self, schema: &EntitySchema, path: &Path) -> StoreResult<bool> {
        let mut cursor = Cursor::open(
            schema,
            &self.registry,
            vec![path.to_path_buf()],
            self.options(),
        );
        while cursor.next_identity(true)?.is_some() {}
        cursor.close()?;
        Ok(cursor.rows_skipped() > 0 || cursor.shards_rejected() > 0)
    }

    /// Writes `entity` over the stored entity with the same identity.
    /// Returns true if one existed.
    ///
    /// An absent entity is inserted only when `insert_if_absent`. If the
    /// type has fewer shards than its size warrants, a shard is added and
    /// the type redistributed first.
    pub fn update(
        &mut self,
        type_name: &str,
        entity: &Entity,
        insert_if_absent: bool,
    ) -> StoreResult<bool> {
        let schema = self.schema(type_name)?;
        schema.check_entity(entity)?;
        let id = entity.identity(schema.identity_count()).to_vec();

        if self.shard_count(type_name)? == 0 {
            let schema = self.schema(type_name)?;
            self.create_shard(schema, 0)?;
        }
        let Some((mut cursor, _)) = self.placed_cursor(type_name, &id)? else {
            return Ok(false);
        };
        if cursor.seek(&id, true)? {
            cursor.update(entity)?;
            cursor.close()?;
            return Ok(true);
        }
        if !insert_if_absent {
            cursor.close()?;
            return Ok(false);
        }
        let count = self.shard_count(type_name)?;
        if count >= self.ideal_shard_count(type_name)? {
            cursor.insert(entity)?;
            cursor.close()?;
            return Ok(false);
        }
        cursor.close()?;

        self.grow(type_name)?;
        let Some((mut cursor, _)) = self.placed_cursor(type_name, &id)? else {
            return Ok(false);
        };
        let existed = cursor.seek(&id, true)?;
        if existed {
            cursor.update(entity)?;
        } else {
            cursor.insert(entity)?;
        }
        cursor.close()?;
        Ok(existed)
    }

    fn grow(&self, type_name: &str) -> StoreResult<RedistributionReport> {
        let schema = self.schema(type_name)?;
        let shards = self.shards(type_name)?;
        let added = self.create_shard(schema, next_shard_number(&shards))?;
        let mut paths: Vec<PathBuf> = shards.into_iter().map(|s| s.path).collect();
        paths.push(added);
        storage::redistribute(schema, &self.registry, &paths, paths.len(), &self.options())
    }

    // =========================================================================
    // Shard count
    // =========================================================================

    /// Re-runs placement at the current shard count.
    pub fn redistribute(&self, type_name: &str) -> StoreResult<RedistributionReport> {
        let schema = self.schema(type_name)?;
        let paths = self.shard_paths(type_name)?;
        if paths.is_empty() {
            return Ok(RedistributionReport::default());
        }
        storage::redistribute(schema, &self.registry, &paths, paths.len(), &self.options())
    }

    /// Brings the shard count to the ideal count and redistributes.
    ///
    /// A surplus shard holding unparsable rows is kept, along with every
    /// shard before it.
    pub fn rebalance(&self, type_name: &str) -> StoreResult<RedistributionReport> {
        let schema = self.schema(type_name)?;
        let shards = self.shards(type_name)?;
        let ideal = self.ideal_shard_count(type_name)?;

        let mut number = next_shard_number(&shards);
        let mut paths: Vec<PathBuf> = shards.into_iter().map(|s| s.path).collect();
        while paths.len() < ideal {
            paths.push(self.create_shard(schema, number)?);
            number += 1;
        }
        let mut target = ideal;
        for (index, path) in paths.iter().enumerate().skip(ideal) {
            if self.holds_unreadable(schema, path)? {
                target = index + 1;
            }
        }
        let report =
            storage::redistribute(schema, &self.registry, &paths, target, &self.options())?;
        for path in &paths[target..] {
            self.remove_shard(type_name, path)?;
        }
        Ok(report)
    }

    // =========================================================================
    // Schema evolution
    // =========================================================================

    /// Adds a field, writing `initial` into every existing row.
    pub fn add_field(
        &mut self,
        type_name: &str,
        field: FieldDef,
        format: Option<Arc<dyn ValueFormat>>,
        identity: bool,
        initial: Value,
    ) -> StoreResult<()> {
        let name = field.name.clone();
        let change = self.schema(type_name)?.add_field(field, format, identity)?;
        self.apply_change(
            type_name,
            change,
            NewColumn::Constant(initial),
            Event::FieldAdded,
            &name,
        )
    }

    /// Adds a field, computing its value for every existing row from the
    /// row as stored. Rows that cannot be read in full get null.
    pub fn add_field_with<F>(
        &mut self,
        type_name: &str,
        field: FieldDef,
        format: Option<Arc<dyn ValueFormat>>,
        identity: bool,
        mut compute: F,
    ) -> StoreResult<()>
    where
        F: FnMut(&Entity) -> Value,
    {
        let name = field.name.clone();
        let change = self.schema(type_name)?.add_field(field, format, identity)?;
        self.apply_change(
            type_name,
            change,
            NewColumn::Computed(&mut compute),
            Event::FieldAdded,
            &name,
        )
    }

    /// Removes a field and its column from every row.
    pub fn remove_field(&mut self, type_name: &str, field: &str) -> StoreResult<()> {
        let change = self.schema(type_name)?.remove_field(field)?;
        self.apply_change(type_name, change, NewColumn::Null, Event::FieldRemoved, field)
    }

    /// Renames a field. Only shard headers change.
    pub fn rename_field(&mut self, type_name: &str, old: &str, new: &str) -> StoreResult<()> {
        let change = self.schema(type_name)?.rename_field(old, new)?;
        self.apply_change(type_name, change, NewColumn::Null, Event::FieldRenamed, new)
    }

    /// Moves a field into or out of the identity prefix.
    pub fn change_field_identity(
        &mut self,
        type_name: &str,
        field: &str,
        identity: bool,
    ) -> StoreResult<()> {
        let change = self
            .schema(type_name)?
            .change_field_identity(field, identity)?;
        self.apply_change(type_name, change, NewColumn::Null, Event::IdentityChanged, field)
    }

    fn apply_change(
        &mut self,
        type_name: &str,
        change: SchemaChange,
        source: NewColumn<'_>,
        event: Event,
        field: &str,
    ) -> StoreResult<()> {
        let old = self.schema(type_name)?;
        let locked = old.formats_locked();
        if !change.identity_changed && change.schema.header_tokens() == old.header_tokens() {
            return Ok(());
        }
        let paths = self.shard_paths(type_name)?;
        let options = self.options();
        migrate_rows(
            old,
            &change,
            &self.registry,
            paths.clone(),
            self.config.sync_on_close,
            source,
        )?;

        if change.identity_changed && !paths.is_empty() {
            let probe = change.schema.clone();
            for path in &paths {
                sort_shard(&probe, &self.registry, path, &options)?;
            }
            storage::redistribute(&probe, &self.registry, &paths, paths.len(), &options)?;
        }

        let identity = change
            .schema
            .fields()
            .iter()
            .take(change.schema.identity_count())
            .map(|f| f.name.as_str())
            .collect::<Vec<_>>()
            .join("|");
        log_event(event, &[("type", type_name), ("field", field)]);
        if change.identity_changed && event != Event::IdentityChanged {
            log_event(
                Event::IdentityChanged,
                &[("type", type_name), ("identity", identity.as_str())],
            );
        }
        if locked {
            change.schema.formats(&self.registry);
        }
        self.types.insert(type_name.to_string(), change.schema);
        Ok(())
    }
}

fn load_type(root: &Path, name: &str) -> StoreResult<Option<EntitySchema>> {
    for shard in discover_shards(root, name)? {
        let parsed = read_header(&shard.path).and_then(|cells| match cells {
            Some(cells) => EntitySchema::from_header(name, &cells)
                .map(Some)
                .map_err(StoreError::from),
            None => Ok(None),
        });
        match parsed {
            Ok(Some(schema)) => return Ok(Some(schema)),
            Ok(None) => continue,
            Err(err) => {
                let file = shard.path.display().to_string();
                log_event(
                    Event::HeaderRejected,
                    &[
                        ("type", name),
                        ("file", file.as_str()),
                        ("reason", err.message()),
                    ],
                );
                return Ok(None);
            }
        }
    }
    Ok(None)
}

fn read_header(path: &Path) -> StoreResult<Option<Vec<Option<String>>>> {
    let file = File::open(path).map_err(|e| StoreError::io(path, "open", e))?;
    let mut line = String::new();
    let n = BufReader::new(file)
        .read_line(&mut line)
        .map_err(|e| StoreError::io(path, "read", e))?;
    if n == 0 {
        return Ok(None);
    }
    decode_line(&line)
        .map(Some)
        .map_err(|e| StoreError::parse(path, 1, e.column, e.to_string()))
}
