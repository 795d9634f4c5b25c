//! Entity type descriptors
//!
//! An `EntitySchema` is immutable once built: every structural change
//! returns a new descriptor in a [`SchemaChange`] together with the column
//! mapping needed to migrate existing rows.

use std::cell::OnceCell;
use std::cmp::Ordering;
use std::sync::Arc;

use super::errors::{SchemaError, SchemaResult};
use super::types::{validate_name, FieldDef, FieldType};
use super::value::{compare_identity_values, Entity, IdentityKey, Value};
use crate::format::{FormatRegistry, ValueFormat};

/// Marks identity columns in header tokens
pub const IDENTITY_MARKER: char = '*';

/// Result of a structural schema change
#[derive(Debug, Clone)]
pub struct SchemaChange {
    /// The new descriptor
    pub schema: EntitySchema,
    /// For each column of the new schema, the column of the old schema it
    /// is taken from, or `None` for a new column
    pub columns: Vec<Option<usize>>,
    /// Whether the set or order of identity fields changed
    pub identity_changed: bool,
}

/// Descriptor of one entity type: fields, identity prefix, formats.
#[derive(Debug, Clone)]
pub struct EntitySchema {
    name: String,
    fields: Vec<FieldDef>,
    identity_count: usize,
    overrides: Vec<Option<Arc<dyn ValueFormat>>>,
    resolved: OnceCell<Vec<Arc<dyn ValueFormat>>>,
}

impl EntitySchema {
    /// Create a descriptor.
    ///
    /// Fields named in `identity` are moved to the front, keeping their
    /// relative declaration order.
    pub fn new(name: &str, fields: Vec<FieldDef>, identity: &[&str]) -> SchemaResult<Self> {
        validate_name(name)?;
        for (i, field) in fields.iter().enumerate() {
            validate_name(&field.name)?;
            field.field_type.validate()?;
            if fields[..i].iter().any(|f| f.name == field.name) {
                return Err(SchemaError::duplicate_field(name, &field.name));
            }
        }
        for id in identity {
            if !fields.iter().any(|f| f.name == *id) {
                return Err(SchemaError::unknown_field(name, id));
            }
        }
        let (mut ordered, rest): (Vec<FieldDef>, Vec<FieldDef>) = fields
            .into_iter()
            .partition(|f| identity.contains(&f.name.as_str()));
        if ordered.is_empty() {
            return Err(SchemaError::no_identity(name));
        }
        let identity_count = ordered.len();
        ordered.extend(rest);
        Ok(Self::build(name.to_string(), ordered, identity_count, None))
    }

    fn build(
        name: String,
        fields: Vec<FieldDef>,
        identity_count: usize,
        overrides: Option<Vec<Option<Arc<dyn ValueFormat>>>>,
    ) -> Self {
        let overrides = overrides.unwrap_or_else(|| vec![None; fields.len()]);
        Self {
            name,
            fields,
            identity_count,
            overrides,
            resolved: OnceCell::new(),
        }
    }

    /// Parses a schema from the cells of a shard header line.
    ///
    /// Every column must be `[*]name:type`, identity columns contiguous at
    /// the start, and the first column must be an identity column.
    pub fn from_header(type_name: &str, cells: &[Option<String>]) -> SchemaResult<Self> {
        validate_name(type_name)?;
        let mut fields = Vec::with_capacity(cells.len());
        let mut identity_count = 0;
        for (column, cell) in cells.iter().enumerate() {
            let token = cell.as_deref().unwrap_or("").trim();
            if token.is_empty() {
                return Err(SchemaError::bad_header(type_name, column, "empty column"));
            }
            let (is_identity, token) = match token.strip_prefix(IDENTITY_MARKER) {
                Some(rest) => (true, rest),
                None => (false, token),
            };
            if is_identity && identity_count < column {
                return Err(SchemaError::bad_header(
                    type_name,
                    column,
                    "identity columns must come first",
                ));
            }
            if !is_identity && column == 0 {
                return Err(SchemaError::bad_header(
                    type_name,
                    column,
                    "first column must be an identity column",
                ));
            }
            let (name, ty) = token.split_once(':').ok_or_else(|| {
                SchemaError::bad_header(type_name, column, "expected name:type")
            })?;
            let name = name.trim();
            validate_name(name)
                .map_err(|e| SchemaError::bad_header(type_name, column, e.message()))?;
            let field_type = FieldType::parse(ty)
                .map_err(|e| SchemaError::bad_header(type_name, column, e.message()))?;
            if fields.iter().any(|f: &FieldDef| f.name == name) {
                return Err(SchemaError::bad_header(
                    type_name,
                    column,
                    format!("duplicate field {}", name),
                ));
            }
            if is_identity {
                identity_count += 1;
            }
            fields.push(FieldDef::new(name, field_type));
        }
        if identity_count == 0 {
            return Err(SchemaError::no_identity(type_name));
        }
        Ok(Self::build(type_name.to_string(), fields, identity_count, None))
    }

    /// Type name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Fields in column order
    pub fn fields(&self) -> &[FieldDef] {
        &self.fields
    }

    /// Number of columns
    pub fn column_count(&self) -> usize {
        self.fields.len()
    }

    /// Number of leading identity columns
    pub fn identity_count(&self) -> usize {
        self.identity_count
    }

    /// Returns whether `column` is an identity column
    pub fn is_identity(&self, column: usize) -> bool {
        column < self.identity_count
    }

    /// Column index of the field named `name`
    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    fn require_field(&self, name: &str) -> SchemaResult<usize> {
        self.field_index(name)
            .ok_or_else(|| SchemaError::unknown_field(&self.name, name))
    }

    /// Header tokens, one per column: `*name:type` or `name:type`
    pub fn header_tokens(&self) -> Vec<String> {
        self.fields
            .iter()
            .enumerate()
            .map(|(i, f)| {
                if self.is_identity(i) {
                    format!("{}{}:{}", IDENTITY_MARKER, f.name, f.field_type)
                } else {
                    format!("{}:{}", f.name, f.field_type)
                }
            })
            .collect()
    }

    /// Checks header cells against this schema, ignoring spaces and ASCII case.
    pub fn matches_header(&self, cells: &[Option<String>]) -> bool {
        fn normalize(s: &str) -> String {
            s.chars()
                .filter(|c| *c != ' ')
                .flat_map(|c| c.to_lowercase())
                .collect()
        }
        let tokens = self.header_tokens();
        tokens.len() == cells.len()
            && tokens
                .iter()
                .zip(cells)
                .all(|(t, c)| normalize(t) == normalize(c.as_deref().unwrap_or("")))
    }

    /// Overrides the format of one field.
    ///
    /// Fails once the formats were resolved by a cursor.
    pub fn with_format(&mut self, field: &str, format: Arc<dyn ValueFormat>) -> SchemaResult<()> {
        let column = self.require_field(field)?;
        if self.resolved.get().is_some() {
            return Err(SchemaError::format_locked(&self.name, field));
        }
        self.overrides[column] = Some(format);
        Ok(())
    }

    /// Returns whether the formats were resolved and are now fixed
    pub fn formats_locked(&self) -> bool {
        self.resolved.get().is_some()
    }

    /// Per-column formats; resolved from `registry` on first call.
    pub fn formats(&self, registry: &FormatRegistry) -> &[Arc<dyn ValueFormat>] {
        self.resolved.get_or_init(|| {
            self.fields
                .iter()
                .zip(&self.overrides)
                .map(|(field, custom)| match custom {
                    Some(format) => Arc::clone(format),
                    None => registry.format_for(&field.field_type),
                })
                .collect()
        })
    }

    /// Compares the identity prefixes of two entities.
    pub fn compare_identities(&self, a: &Entity, b: &Entity) -> Ordering {
        compare_identity_values(a.identity(self.identity_count), b.identity(self.identity_count))
    }

    /// Identity key of an entity
    pub fn identity_of(&self, entity: &Entity) -> IdentityKey {
        IdentityKey::new(entity.identity(self.identity_count).to_vec())
    }

    /// Checks the column count and value types of an entity.
    pub fn check_entity(&self, entity: &Entity) -> SchemaResult<()> {
        if entity.len() != self.fields.len() {
            return Err(SchemaError::bad_entity(
                &self.name,
                format!(
                    "expected {} values, got {}",
                    self.fields.len(),
                    entity.len()
                ),
            ));
        }
        for (field, value) in self.fields.iter().zip(entity.values()) {
            if !field.field_type.accepts(value) {
                return Err(SchemaError::bad_entity(
                    &self.name,
                    format!(
                        "field {} is {}, got a {} value",
                        field.name,
                        field.field_type,
                        value.kind()
                    ),
                ));
            }
        }
        Ok(())
    }

    /// Checks that `key` has one value per identity field, of the right types.
    pub fn check_identity(&self, key: &[Value]) -> SchemaResult<()> {
        if key.len() != self.identity_count {
            return Err(SchemaError::bad_entity(
                &self.name,
                format!(
                    "expected {} identity values, got {}",
                    self.identity_count,
                    key.len()
                ),
            ));
        }
        for (field, value) in self.fields.iter().zip(key) {
            if !field.field_type.accepts(value) {
                return Err(SchemaError::bad_entity(
                    &self.name,
                    format!("identity {} is {}, got a {} value", field.name, field.field_type, value.kind()),
                ));
            }
        }
        Ok(())
    }

    /// Builds an entity from named values; unnamed fields are null.
    pub fn entity(&self, values: &[(&str, Value)]) -> SchemaResult<Entity> {
        let mut entity = Entity::empty(self.fields.len());
        for (name, value) in values {
            let column = self.require_field(name)?;
            entity.set(column, value.clone());
        }
        self.check_entity(&entity)?;
        Ok(entity)
    }

    /// Value of the field named `field`
    pub fn value<'a>(&self, entity: &'a Entity, field: &str) -> SchemaResult<&'a Value> {
        let column = self.require_field(field)?;
        entity
            .get(column)
            .ok_or_else(|| SchemaError::bad_entity(&self.name, "entity is missing columns"))
    }

    fn derive(
        &self,
        name: String,
        columns: Vec<Option<usize>>,
        fields: Vec<FieldDef>,
        overrides: Vec<Option<Arc<dyn ValueFormat>>>,
        identity_count: usize,
        identity_changed: bool,
    ) -> SchemaChange {
        SchemaChange {
            schema: Self::build(name, fields, identity_count, Some(overrides)),
            columns,
            identity_changed,
        }
    }

    fn identity_columns(&self) -> Vec<Option<usize>> {
        (0..self.fields.len()).map(Some).collect()
    }

    /// Adds a field. Identity fields join the end of the identity prefix,
    /// others go after the last column.
    pub fn add_field(
        &self,
        field: FieldDef,
        format: Option<Arc<dyn ValueFormat>>,
        identity: bool,
    ) -> SchemaResult<SchemaChange> {
        validate_name(&field.name)?;
        field.field_type.validate()?;
        if self.field_index(&field.name).is_some() {
            return Err(SchemaError::duplicate_field(&self.name, &field.name));
        }
        let at = if identity {
            self.identity_count
        } else {
            self.fields.len()
        };
        let mut columns = self.identity_columns();
        let mut fields = self.fields.clone();
        let mut overrides = self.overrides.clone();
        columns.insert(at, None);
        fields.insert(at, field);
        overrides.insert(at, format);
        let identity_count = self.identity_count + usize::from(identity);
        Ok(self.derive(
            self.name.clone(),
            columns,
            fields,
            overrides,
            identity_count,
            identity,
        ))
    }

    /// Removes a field. The sole identity field cannot be removed.
    pub fn remove_field(&self, name: &str) -> SchemaResult<SchemaChange> {
        let column = self.require_field(name)?;
        let identity = self.is_identity(column);
        if identity && self.identity_count == 1 {
            return Err(SchemaError::sole_identity(&self.name, name));
        }
        let mut columns = self.identity_columns();
        let mut fields = self.fields.clone();
        let mut overrides = self.overrides.clone();
        columns.remove(column);
        fields.remove(column);
        overrides.remove(column);
        let identity_count = self.identity_count - usize::from(identity);
        Ok(self.derive(
            self.name.clone(),
            columns,
            fields,
            overrides,
            identity_count,
            identity,
        ))
    }

    /// Renames a field in place.
    pub fn rename_field(&self, old: &str, new: &str) -> SchemaResult<SchemaChange> {
        let column = self.require_field(old)?;
        validate_name(new)?;
        if old != new && self.field_index(new).is_some() {
            return Err(SchemaError::duplicate_field(&self.name, new));
        }
        let mut fields = self.fields.clone();
        fields[column].name = new.to_string();
        Ok(self.derive(
            self.name.clone(),
            self.identity_columns(),
            fields,
            self.overrides.clone(),
            self.identity_count,
            false,
        ))
    }

    /// Promotes a field into the identity prefix (at its end) or demotes
    /// it to the first non-identity column.
    pub fn change_field_identity(&self, name: &str, identity: bool) -> SchemaResult<SchemaChange> {
        let column = self.require_field(name)?;
        if self.is_identity(column) == identity {
            return Ok(self.derive(
                self.name.clone(),
                self.identity_columns(),
                self.fields.clone(),
                self.overrides.clone(),
                self.identity_count,
                false,
            ));
        }
        if !identity && self.identity_count == 1 {
            return Err(SchemaError::sole_identity(&self.name, name));
        }
        let mut columns = self.identity_columns();
        let mut fields = self.fields.clone();
        let mut overrides = self.overrides.clone();
        let moved_column = columns.remove(column);
        let moved_field = fields.remove(column);
        let moved_format = overrides.remove(column);
        // After removal, the identity prefix ends at identity_count (promote)
        // or identity_count - 1 (demote); both are the insert position.
        let (at, identity_count) = if identity {
            (self.identity_count, self.identity_count + 1)
        } else {
            (self.identity_count - 1, self.identity_count - 1)
        };
        columns.insert(at, moved_column);
        fields.insert(at, moved_field);
        overrides.insert(at, moved_format);
        Ok(self.derive(
            self.name.clone(),
            columns,
            fields,
            overrides,
            identity_count,
            true,
        ))
    }

    /// Same fields and formats under a new type name.
    pub fn rename(&self, new_name: &str) -> SchemaResult<EntitySchema> {
        validate_name(new_name)?;
        Ok(Self::build(
            new_name.to_string(),
            self.fields.clone(),
            self.identity_count,
            Some(self.overrides.clone()),
        ))
    }
}
