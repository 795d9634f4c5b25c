//! Cursor over the shards of one entity type
//!
//! The cursor is the only owner of shard file handles. It reads rows in
//! shard order, parsing identity columns eagerly and the rest on demand,
//! and rewrites a shard in place only once a row is updated, deleted or
//! inserted. A scan that changes nothing never writes.
//!
//! States: `BeforeFirst` -> `Positioned` <-> `Positioned` -> `Exhausted`,
//! any -> `Closed`. When exhausted the last shard stays open so rows can
//! be appended to it.

use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::codec::{decode_line, encode_line};
use super::errors::{StoreError, StoreResult};
use super::stream::ShardStream;
use crate::format::{FormatRegistry, ValueFormat};
use crate::observability::{log_event, Event, Logger};
use crate::schema::{
    compare_identity_values, Entity, EntitySchema, IdentityKey, SchemaError, Value,
};

/// Cursor lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorState {
    /// Opened, no row read yet
    BeforeFirst,
    /// On a row
    Positioned,
    /// Past the last row of the last shard
    Exhausted,
    /// All handles released
    Closed,
}

/// Options for opening a cursor
#[derive(Debug, Clone, Default)]
pub struct CursorOptions {
    /// fsync each rewritten shard when it is finished
    pub sync_on_close: bool,
    /// Header written in place of each shard's header as it is opened
    pub replacement_header: Option<Vec<String>>,
}

impl CursorOptions {
    pub fn new(sync_on_close: bool) -> Self {
        Self {
            sync_on_close,
            replacement_header: None,
        }
    }

    pub fn with_replacement_header(mut self, tokens: Vec<String>) -> Self {
        self.replacement_header = Some(tokens);
        self
    }
}

#[derive(Debug)]
enum Disposition {
    Keep,
    Replace(String),
    Delete,
}

#[derive(Debug)]
struct CurrentRow {
    raw: Vec<u8>,
    start: u64,
    line: usize,
    cells: Vec<Option<String>>,
    identity: IdentityKey,
    entity: Option<Entity>,
    disposition: Disposition,
}

/// Sequential reader and rewriter over shard files.
pub struct Cursor {
    schema: EntitySchema,
    formats: Vec<Arc<dyn ValueFormat>>,
    shards: Vec<PathBuf>,
    next_shard: usize,
    stream: Option<ShardStream>,
    stream_index: Option<usize>,
    current: Option<CurrentRow>,
    state: CursorState,
    options: CursorOptions,
    rows_read: u64,
    rows_skipped: u64,
    shards_rejected: u64,
}

impl Cursor {
    /// Opens a cursor over `shards`, in the given order.
    ///
    /// Resolves the formats of `schema`, which fixes them from then on.
    pub fn open(
        schema: &EntitySchema,
        registry: &FormatRegistry,
        shards: Vec<PathBuf>,
        options: CursorOptions,
    ) -> Self {
        let formats = schema.formats(registry).to_vec();
        Self {
            schema: schema.clone(),
            formats,
            shards,
            next_shard: 0,
            stream: None,
            stream_index: None,
            current: None,
            state: CursorState::BeforeFirst,
            options,
            rows_read: 0,
            rows_skipped: 0,
            shards_rejected: 0,
        }
    }

    /// Current state
    pub fn state(&self) -> CursorState {
        self.state
    }

    /// Schema rows are read with
    pub fn schema(&self) -> &EntitySchema {
        &self.schema
    }

    /// Shard files in cursor order
    pub fn shard_paths(&self) -> &[PathBuf] {
        &self.shards
    }

    /// Index (into [`Cursor::shard_paths`]) of the open shard
    pub fn shard_position(&self) -> Option<usize> {
        self.stream_index
    }

    /// Rows parsed so far, skipped rows excluded
    pub fn rows_read(&self) -> u64 {
        self.rows_read
    }

    /// Unparsable rows stepped over by tolerant moves
    pub fn rows_skipped(&self) -> u64 {
        self.rows_skipped
    }

    /// Shards stepped over whole because their header did not match
    pub fn shards_rejected(&self) -> u64 {
        self.shards_rejected
    }

    /// Identity of the current row
    pub fn current_identity(&self) -> Option<&IdentityKey> {
        match self.state {
            CursorState::Positioned => self.current.as_ref().map(|c| &c.identity),
            _ => None,
        }
    }

    /// 1-based line of the current row in its shard
    pub fn current_line(&self) -> Option<usize> {
        self.current.as_ref().map(|c| c.line)
    }

    fn current_path(&self) -> &Path {
        self.stream
            .as_ref()
            .map(|s| s.path())
            .unwrap_or_else(|| Path::new(""))
    }

    /// Advances to the next row, parsing only its identity columns.
    ///
    /// Unparsable rows fail the call unless `tolerant`, in which case they
    /// are logged, kept in the file as they are, and stepped over.
    pub fn next_identity(&mut self, tolerant: bool) -> StoreResult<Option<IdentityKey>> {
        match self.state {
            CursorState::Closed => return Err(StoreError::cursor_state("Cursor is closed")),
            CursorState::Exhausted => return Ok(None),
            CursorState::BeforeFirst | CursorState::Positioned => {}
        }
        let result = self.advance(tolerant);
        self.guard(result)
    }

    fn advance(&mut self, tolerant: bool) -> StoreResult<Option<IdentityKey>> {
        self.release_current()?;
        let mut raw = Vec::new();
        loop {
            if self.stream.is_none() {
                if self.next_shard >= self.shards.len() {
                    self.state = CursorState::Exhausted;
                    return Ok(None);
                }
                let index = self.next_shard;
                self.next_shard += 1;
                if !self.open_shard(index, tolerant)? {
                    continue;
                }
            }
            let Some(stream) = self.stream.as_mut() else {
                continue;
            };

            let start = stream.read_pos();
            if !stream.read_line(&mut raw)? {
                if self.next_shard < self.shards.len() {
                    self.finish_stream()?;
                    continue;
                }
                self.state = CursorState::Exhausted;
                return Ok(None);
            }
            let line = stream.line_number();
            if raw.iter().all(|b| *b == b'\n' || *b == b'\r') {
                stream.emit_line(&raw)?;
                continue;
            }

            match self.parse_identity(&raw, line) {
                Ok((cells, identity)) => {
                    self.current = Some(CurrentRow {
                        raw: std::mem::take(&mut raw),
                        start,
                        line,
                        cells,
                        identity: identity.clone(),
                        entity: None,
                        disposition: Disposition::Keep,
                    });
                    self.state = CursorState::Positioned;
                    self.rows_read += 1;
                    return Ok(Some(identity));
                }
                Err(err) => {
                    if let Some(stream) = self.stream.as_mut() {
                        stream.emit_line(&raw)?;
                    }
                    if !tolerant {
                        return Err(err);
                    }
                    self.rows_skipped += 1;
                    let file = self.current_path().display().to_string();
                    let line = line.to_string();
                    log_event(
                        Event::RowSkipped,
                        &[
                            ("file", file.as_str()),
                            ("line", line.as_str()),
                            ("reason", err.message()),
                        ],
                    );
                }
            }
        }
    }

    fn open_shard(&mut self, index: usize, tolerant: bool) -> StoreResult<bool> {
        let path = &self.shards[index];
        let mut stream = ShardStream::open(path)?;
        let mut header = Vec::new();
        if stream.read_line(&mut header)? {
            let cells = std::str::from_utf8(&header)
                .ok()
                .and_then(|text| decode_line(text).ok());
            let matches = cells.map_or(false, |c| self.schema.matches_header(&c));
            if !matches {
                if tolerant {
                    let file = path.display().to_string();
                    log_event(
                        Event::HeaderRejected,
                        &[("file", file.as_str()), ("type", self.schema.name())],
                    );
                    self.shards_rejected += 1;
                    return Ok(false);
                }
                return Err(StoreError::parse(
                    path,
                    1,
                    0,
                    format!("Header does not match entity type {}", self.schema.name()),
                ));
            }
        } else {
            stream.needs_header = true;
        }

        if let Some(tokens) = &self.options.replacement_header {
            let line = encode_line(&tokens.iter().map(Some).collect::<Vec<_>>());
            stream.start_rewrite(0)?;
            stream.emit(line.as_bytes())?;
            stream.needs_header = false;
        }
        self.stream = Some(stream);
        self.stream_index = Some(index);
        Ok(true)
    }

    fn parse_identity(
        &self,
        raw: &[u8],
        line: usize,
    ) -> StoreResult<(Vec<Option<String>>, IdentityKey)> {
        let path = self.current_path();
        let text = std::str::from_utf8(raw)
            .map_err(|_| StoreError::parse(path, line, 0, "Row is not valid UTF-8"))?;
        let cells = decode_line(text)
            .map_err(|e| StoreError::parse(path, line, e.column, e.to_string()))?;
        let columns = self.schema.column_count();
        if cells.len() != columns {
            return Err(StoreError::parse(
                path,
                line,
                cells.len().min(columns),
                format!("Expected {} columns, found {}", columns, cells.len()),
            ));
        }
        let mut identity = Vec::with_capacity(self.schema.identity_count());
        for column in 0..self.schema.identity_count() {
            identity.push(self.decode_cell(&cells, column, line)?);
        }
        Ok((cells, IdentityKey::new(identity)))
    }

    fn decode_cell(&self, cells: &[Option<String>], column: usize, line: usize) -> StoreResult<Value> {
        match &cells[column] {
            None => Ok(Value::Null),
            Some(text) => self.formats[column]
                .decode(text)
                .map_err(|e| StoreError::format(self.current_path(), line, column, e)),
        }
    }

    /// Advances and parses the whole row.
    pub fn next(&mut self) -> StoreResult<Option<Entity>> {
        if self.next_identity(false)?.is_none() {
            return Ok(None);
        }
        self.materialize().map(Some)
    }

    /// Advances to the first row whose identity is not below `key`.
    /// Returns whether that row's identity equals `key`.
    pub fn seek(&mut self, key: &[Value], tolerant: bool) -> StoreResult<bool> {
        loop {
            let ordering = match self.state {
                CursorState::Positioned => self
                    .current
                    .as_ref()
                    .map(|c| compare_identity_values(c.identity.values(), key)),
                CursorState::Exhausted => return Ok(false),
                CursorState::BeforeFirst => None,
                CursorState::Closed => {
                    return Err(StoreError::cursor_state("Cursor is closed"))
                }
            };
            match ordering {
                Some(Ordering::Equal) => return Ok(true),
                Some(Ordering::Greater) => return Ok(false),
                Some(Ordering::Less) | None => {}
            }
            if self.next_identity(tolerant)?.is_none() {
                return Ok(false);
            }
        }
    }

    fn positioned(&self) -> StoreResult<&CurrentRow> {
        if self.state != CursorState::Positioned {
            return Err(StoreError::cursor_state(format!(
                "Cursor is {:?}, not on a row",
                self.state
            )));
        }
        match &self.current {
            Some(current) if !matches!(current.disposition, Disposition::Delete) => Ok(current),
            Some(_) => Err(StoreError::cursor_state("Current row was deleted")),
            None => Err(StoreError::cursor_state("Cursor is not on a row")),
        }
    }

    /// Parses the full current row. The result is cached until the cursor moves.
    ///
    /// A cell that fails to decode fails the call but leaves the cursor on
    /// the row.
    pub fn materialize(&mut self) -> StoreResult<Entity> {
        let current = self.positioned()?;
        if let Some(entity) = &current.entity {
            return Ok(entity.clone());
        }
        self.check_schema_width(current)?;
        let line = current.line;
        let mut values = current.identity.values().to_vec();
        let mut failure = None;
        for column in self.schema.identity_count()..self.schema.column_count() {
            match self.decode_cell(&current.cells, column, line) {
                Ok(value) => values.push(value),
                Err(err) => {
                    failure = Some(err);
                    break;
                }
            }
        }
        if let Some(err) = failure {
            return Err(err);
        }
        let entity = Entity::new(values);
        if let Some(current) = self.current.as_mut() {
            current.entity = Some(entity.clone());
        }
        Ok(entity)
    }

    /// Cells of the current row as read (or as last replaced)
    pub fn raw_cells(&self) -> StoreResult<&[Option<String>]> {
        self.positioned().map(|c| c.cells.as_slice())
    }

    fn encode_cells(&self, entity: &Entity) -> StoreResult<Vec<Option<String>>> {
        entity
            .values()
            .iter()
            .zip(&self.formats)
            .map(|(value, format)| match value {
                Value::Null => Ok(None),
                value => format.encode(value).map(Some).map_err(|e| {
                    StoreError::from(SchemaError::bad_entity(self.schema.name(), e.to_string()))
                }),
            })
            .collect()
    }

    /// Rewrites the non-identity columns of the current row.
    ///
    /// The identity values of `entity` must equal the current row's.
    pub fn update(&mut self, entity: &Entity) -> StoreResult<()> {
        self.schema.check_entity(entity)?;
        let current = self.positioned()?;
        self.check_schema_width(current)?;
        let k = self.schema.identity_count();
        if compare_identity_values(entity.identity(k), current.identity.values()) != Ordering::Equal
        {
            return Err(SchemaError::bad_entity(
                self.schema.name(),
                "identity values cannot be changed by an update",
            )
            .into());
        }
        let mut cells = self.encode_cells(entity)?;
        cells[..k].clone_from_slice(&current.cells[..k]);
        let mut merged = current.identity.values().to_vec();
        merged.extend_from_slice(&entity.values()[k..]);
        let line = encode_line(&cells);

        let result = self.begin_rewrite();
        self.guard(result)?;
        if let Some(current) = self.current.as_mut() {
            current.disposition = Disposition::Replace(line);
            current.cells = cells;
            current.entity = Some(Entity::new(merged));
        }
        Ok(())
    }

    /// Replaces every cell of the current row, identity included.
    pub fn replace_cells(&mut self, cells: Vec<Option<String>>) -> StoreResult<()> {
        self.positioned()?;
        self.check_width(&cells)?;
        let line = encode_line(&cells);
        let result = self.begin_rewrite();
        self.guard(result)?;
        if let Some(current) = self.current.as_mut() {
            current.disposition = Disposition::Replace(line);
            current.cells = cells;
            current.entity = None;
        }
        Ok(())
    }

    /// Drops the current row from its shard.
    pub fn delete(&mut self) -> StoreResult<()> {
        self.positioned()?;
        let result = self.begin_rewrite();
        self.guard(result)?;
        if let Some(current) = self.current.as_mut() {
            current.disposition = Disposition::Delete;
        }
        Ok(())
    }

    /// Writes `entity` before the current row, or at the end of the last
    /// shard once the cursor is exhausted.
    pub fn insert(&mut self, entity: &Entity) -> StoreResult<()> {
        self.schema.check_entity(entity)?;
        let cells = self.encode_cells(entity)?;
        self.insert_raw(&cells)
    }

    /// Writes pre-encoded cells as a new row; see [`Cursor::insert`].
    pub fn insert_raw(&mut self, cells: &[Option<String>]) -> StoreResult<()> {
        match self.state {
            CursorState::Positioned | CursorState::Exhausted if self.stream.is_some() => {}
            state => {
                return Err(StoreError::cursor_state(format!(
                    "Cannot insert while cursor is {:?}",
                    state
                )))
            }
        }
        self.check_width(cells)?;
        let line = encode_line(cells);
        let result = self.begin_rewrite().and_then(|_| match self.stream.as_mut() {
            Some(stream) => stream.emit(line.as_bytes()),
            None => Ok(()),
        });
        self.guard(result)
    }

    /// Rows written under a replacement header take its width.
    fn output_width(&self) -> usize {
        self.options
            .replacement_header
            .as_ref()
            .map_or(self.schema.column_count(), Vec::len)
    }

    fn check_width(&self, cells: &[Option<String>]) -> StoreResult<()> {
        let width = self.output_width();
        if cells.len() != width {
            return Err(SchemaError::bad_entity(
                self.schema.name(),
                format!("expected {} cells, got {}", width, cells.len()),
            )
            .into());
        }
        Ok(())
    }

    fn check_schema_width(&self, current: &CurrentRow) -> StoreResult<()> {
        if current.cells.len() != self.schema.column_count() {
            return Err(StoreError::cursor_state(format!(
                "Current row has {} cells, {} has {} columns",
                current.cells.len(),
                self.schema.name(),
                self.schema.column_count()
            )));
        }
        Ok(())
    }

    fn header_line(&self) -> String {
        let tokens = self
            .options
            .replacement_header
            .clone()
            .unwrap_or_else(|| self.schema.header_tokens());
        encode_line(&tokens.iter().map(Some).collect::<Vec<_>>())
    }

    fn begin_rewrite(&mut self) -> StoreResult<()> {
        let start = match (&self.current, self.state) {
            (Some(current), CursorState::Positioned) => Some(current.start),
            _ => None,
        };
        let header = self.header_line();
        let Some(stream) = self.stream.as_mut() else {
            return Err(StoreError::cursor_state("No shard is open"));
        };
        if stream.is_rewriting() {
            return Ok(());
        }
        let at = start.unwrap_or(stream.read_pos());
        stream.start_rewrite(at)?;
        if stream.needs_header {
            stream.emit(header.as_bytes())?;
            stream.needs_header = false;
        } else if start.is_none() && stream.unterminated() {
            stream.emit(b"\n")?;
        }
        Ok(())
    }

    fn release_current(&mut self) -> StoreResult<()> {
        let Some(current) = self.current.take() else {
            return Ok(());
        };
        let Some(stream) = self.stream.as_mut() else {
            return Ok(());
        };
        match current.disposition {
            Disposition::Keep => stream.emit_line(&current.raw),
            Disposition::Replace(line) => stream.emit_line(line.as_bytes()),
            Disposition::Delete => Ok(()),
        }
    }

    fn finish_stream(&mut self) -> StoreResult<()> {
        self.stream_index = None;
        match self.stream.take() {
            Some(stream) => stream.finish(self.options.sync_on_close),
            None => Ok(()),
        }
    }

    /// Flushes pending rewrites and releases every handle.
    pub fn close(&mut self) -> StoreResult<()> {
        if self.state == CursorState::Closed {
            return Ok(());
        }
        let result = self.release_current().and_then(|_| self.finish_stream());
        self.stream = None;
        self.state = CursorState::Closed;
        result
    }

    fn guard<T>(&mut self, result: StoreResult<T>) -> StoreResult<T> {
        if result.is_err() && self.state != CursorState::Closed {
            if let Err(err) = self.close() {
                let error = err.to_string();
                Logger::error(
                    "CURSOR_CLOSE_FAILED",
                    &[("type", self.schema.name()), ("error", error.as_str())],
                );
            }
        }
        result
    }
}

impl Drop for Cursor {
    fn drop(&mut self) {
        if self.state != CursorState::Closed {
            if let Err(err) = self.close() {
                let error = err.to_string();
                Logger::error(
                    "CURSOR_CLOSE_FAILED",
                    &[("type", self.schema.name()), ("error", error.as_str())],
                );
            }
        }
    }
}

impl std::fmt::Debug for Cursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cursor")
            .field("type", &self.schema.name())
            .field("state", &self.state)
            .field("shard", &self.stream_index)
            .field("rows_read", &self.rows_read)
            .finish()
    }
}
