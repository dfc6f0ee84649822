//! Declarative field metadata and the validation built on top of it.
//!
//! Every entity is described by a static [`EntityDef`]: an ordered table of
//! [`FieldDef`]s plus the synthesized (computed) field names and any
//! multi-column uniqueness constraints. Both store backends consult this table
//! on every write; nothing is reflected from a live record.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::StoreError;
use crate::model::EntityKind;
use crate::store::StoreResult;

/// A dynamically shaped row: field name → JSON value.
pub type Record = Map<String, Value>;

/// Declared storage type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Integer,
    /// Bounded string; the bound is advisory and reported in the schema.
    String(usize),
    Text,
    /// Structured blob: must be an object or a list. Null reads back as `{}`.
    Json,
    /// Any JSON value, including scalars and explicit null.
    JsonEntry,
    /// String restricted to a fixed set of values.
    Enum(&'static [&'static str]),
}

impl FieldType {
    /// Type name as reported by `get_schema`.
    pub fn type_name(&self) -> String {
        match self {
            FieldType::Integer => "INTEGER".into(),
            FieldType::String(len) => format!("VARCHAR({len})"),
            FieldType::Text => "TEXT".into(),
            FieldType::Json => "JSON".into(),
            FieldType::JsonEntry => "JSON_ENTRY".into(),
            FieldType::Enum(values) => {
                let len = values.iter().map(|v| v.len()).max().unwrap_or(0);
                format!("VARCHAR({len})")
            }
        }
    }
}

/// Value a column takes when the create payload omits it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldDefault {
    Null,
    Int(i64),
    Str(&'static str),
    EmptyObject,
    EmptyList,
}

impl FieldDefault {
    fn to_value(self) -> Value {
        match self {
            FieldDefault::Null => Value::Null,
            FieldDefault::Int(n) => Value::from(n),
            FieldDefault::Str(s) => Value::from(s),
            FieldDefault::EmptyObject => Value::Object(Map::new()),
            FieldDefault::EmptyList => Value::Array(Vec::new()),
        }
    }
}

/// Metadata for one stored column.
#[derive(Debug, Clone, Copy)]
pub struct FieldDef {
    pub name: &'static str,
    pub ty: FieldType,
    pub primary_key: bool,
    pub unique: bool,
    pub nullable: bool,
    pub updatable: bool,
    pub default: FieldDefault,
    /// `"<table>.<column>"` this column references.
    pub foreign_key: Option<&'static str>,
}

impl FieldDef {
    pub const fn new(name: &'static str, ty: FieldType) -> Self {
        Self {
            name,
            ty,
            primary_key: false,
            unique: false,
            nullable: true,
            updatable: true,
            default: FieldDefault::Null,
            foreign_key: None,
        }
    }

    /// Integer primary key, assigned by the store and never updatable.
    pub const fn id() -> Self {
        Self {
            primary_key: true,
            nullable: false,
            updatable: false,
            ..Self::new("id", FieldType::Integer)
        }
    }

    pub const fn not_null(self) -> Self {
        Self {
            nullable: false,
            ..self
        }
    }

    pub const fn unique(self) -> Self {
        Self {
            unique: true,
            ..self
        }
    }

    pub const fn fixed(self) -> Self {
        Self {
            updatable: false,
            ..self
        }
    }

    pub const fn with_default(self, default: FieldDefault) -> Self {
        Self { default, ..self }
    }

    pub const fn references(self, target: &'static str) -> Self {
        Self {
            foreign_key: Some(target),
            ..self
        }
    }

    /// A field is required on create when the column does not accept null.
    pub fn required(&self) -> bool {
        !self.nullable
    }

    /// Coerce `value` into this column's declared type.
    pub fn coerce(&self, value: Value) -> Result<Value, String> {
        if value.is_null() {
            return match (self.nullable, self.ty) {
                (false, _) => Err(format!("field {} may not be null", self.name)),
                (true, FieldType::Json) => Ok(match self.default {
                    FieldDefault::EmptyList | FieldDefault::EmptyObject => self.default.to_value(),
                    _ => Value::Object(Map::new()),
                }),
                (true, _) => Ok(Value::Null),
            };
        }

        match self.ty {
            FieldType::Integer => match &value {
                Value::Number(n) if n.is_i64() => Ok(value),
                Value::String(s) => s
                    .trim()
                    .parse::<i64>()
                    .map(Value::from)
                    .map_err(|_| format!("field {} expects an integer, got {s:?}", self.name)),
                other => Err(format!("field {} expects an integer, got {other}", self.name)),
            },
            FieldType::String(_) | FieldType::Text => match value {
                Value::String(_) => Ok(value),
                other => Err(format!("field {} expects a string, got {other}", self.name)),
            },
            FieldType::Json => match value {
                Value::Object(_) | Value::Array(_) => Ok(value),
                other => Err(format!(
                    "JSON object must be either an object or a list, not {} (field {})",
                    json_kind(&other),
                    self.name
                )),
            },
            FieldType::JsonEntry => Ok(value),
            FieldType::Enum(values) => match &value {
                Value::String(s) if values.contains(&s.as_str()) => Ok(value),
                other => Err(format!(
                    "field {} must be one of {values:?}, got {other}",
                    self.name
                )),
            },
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "object",
    }
}

/// Static description of one entity type.
#[derive(Debug)]
pub struct EntityDef {
    pub kind: EntityKind,
    /// Table / collection name (`"nodes"`, `"facts"`, ...).
    pub name: &'static str,
    pub fields: &'static [FieldDef],
    /// Computed fields: reported by the schema as read-only text, never stored.
    pub synthesized: &'static [&'static str],
    /// Column groups whose combined values must be unique across rows.
    pub unique_together: &'static [&'static [&'static str]],
}

/// Per-field entry of a schema report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldSchema {
    #[serde(rename = "type")]
    pub ty: String,
    pub primary_key: bool,
    pub unique: bool,
    pub required: bool,
    pub updatable: bool,
    pub read_only: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fk: Option<String>,
}

impl FieldSchema {
    fn synthesized() -> Self {
        Self {
            ty: "TEXT".into(),
            primary_key: false,
            unique: false,
            required: false,
            updatable: false,
            read_only: true,
            fk: None,
        }
    }
}

/// Schema report for one entity, shaped `{"schema": {field: {...}}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Schema {
    pub schema: BTreeMap<String, FieldSchema>,
}

impl Schema {
    pub fn field(&self, name: &str) -> Option<&FieldSchema> {
        self.schema.get(name)
    }
}

impl EntityDef {
    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn is_synthesized(&self, name: &str) -> bool {
        self.synthesized.contains(&name)
    }

    /// Stored field names in declaration order, followed by synthesized ones.
    pub fn columns(&self) -> Vec<&'static str> {
        self.fields
            .iter()
            .map(|f| f.name)
            .chain(self.synthesized.iter().copied())
            .collect()
    }

    pub fn schema(&self) -> Schema {
        let mut schema = BTreeMap::new();
        for f in self.fields {
            schema.insert(
                f.name.to_string(),
                FieldSchema {
                    ty: f.ty.type_name(),
                    primary_key: f.primary_key,
                    unique: f.unique || f.primary_key,
                    required: f.required(),
                    updatable: f.updatable,
                    read_only: false,
                    fk: f.foreign_key.map(str::to_string),
                },
            );
        }
        for name in self.synthesized {
            schema.insert(name.to_string(), FieldSchema::synthesized());
        }
        Schema { schema }
    }

    /// The subset of `data` a create may use.
    ///
    /// Unknown and read-only fields are dropped; a missing required field
    /// (other than the primary key, which the store assigns) is an error.
    pub fn create_view(&self, data: &Record) -> StoreResult<Record> {
        for f in self.fields.iter().filter(|f| f.required() && !f.primary_key) {
            if !data.contains_key(f.name) {
                return Err(StoreError::create(
                    self.name,
                    format!("missing required field {}", f.name),
                ));
            }
        }

        Ok(data
            .iter()
            .filter(|(k, _)| self.field(k).is_some_and(|f| !f.primary_key))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    /// The subset of `data` an update may apply: unknown, synthesized and
    /// non-updatable fields are dropped silently.
    pub fn update_view(&self, data: &Record) -> Record {
        data.iter()
            .filter(|(k, _)| self.field(k).is_some_and(|f| f.updatable))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Construct a full row from a create view: every stored column is
    /// present, omitted ones take their declared default, and each value is
    /// coerced into its column type. The primary key is left unset.
    pub fn build(&self, mut view: Record) -> StoreResult<Record> {
        let mut record = Record::new();
        for f in self.fields.iter().filter(|f| !f.primary_key) {
            let value = view.remove(f.name).unwrap_or_else(|| f.default.to_value());
            let value = f
                .coerce(value)
                .map_err(|message| StoreError::create(self.name, message))?;
            record.insert(f.name.to_string(), value);
        }
        Ok(record)
    }

    /// Apply an update view onto `current`, coercing each field. Nothing is
    /// applied unless every field coerces.
    pub fn apply(&self, current: &Record, view: Record) -> StoreResult<Record> {
        let mut next = current.clone();
        for (name, value) in view {
            let Some(f) = self.field(&name) else { continue };
            let value = f
                .coerce(value)
                .map_err(|message| StoreError::validation(self.name, message))?;
            next.insert(name, value);
        }
        Ok(next)
    }

    /// Check `candidate` against `existing` rows for single-column and
    /// multi-column uniqueness. Rows sharing the candidate's id are skipped,
    /// and null never collides.
    pub fn check_unique<'a>(
        &self,
        candidate: &Record,
        existing: impl IntoIterator<Item = &'a Record>,
    ) -> Result<(), String> {
        let own_id = candidate.get("id").and_then(Value::as_i64);
        let singles: Vec<&str> = self
            .fields
            .iter()
            .filter(|f| f.unique && !f.primary_key)
            .map(|f| f.name)
            .collect();

        for row in existing {
            if own_id.is_some() && row.get("id").and_then(Value::as_i64) == own_id {
                continue;
            }
            for name in &singles {
                if collides(candidate, row, &[name]) {
                    return Err(format!("duplicate entry for {name}"));
                }
            }
            for group in self.unique_together {
                if collides(candidate, row, group) {
                    return Err(format!("duplicate entry for ({})", group.join(", ")));
                }
            }
        }
        Ok(())
    }

    /// Coerce filter criteria into column types so `{"node_id": "3"}` and
    /// `{"node_id": 3}` select the same rows.
    pub fn normalize_criteria(&self, criteria: &Record) -> StoreResult<Record> {
        let mut out = Record::new();
        for (name, value) in criteria {
            let f = self.field(name).ok_or_else(|| {
                StoreError::validation(self.name, format!("cannot filter on unknown field {name}"))
            })?;
            let value = match f.ty {
                FieldType::Integer => f.coerce(value.clone()).unwrap_or_else(|_| value.clone()),
                _ => value.clone(),
            };
            out.insert(name.clone(), value);
        }
        Ok(out)
    }

    /// Whether `record` satisfies every `field == value` pair in `criteria`.
    pub fn matches(record: &Record, criteria: &Record) -> bool {
        criteria
            .iter()
            .all(|(k, v)| record.get(k).unwrap_or(&Value::Null) == v)
    }
}

fn collides(candidate: &Record, row: &Record, group: &[&str]) -> bool {
    group.iter().all(|name| match (candidate.get(*name), row.get(*name)) {
        (Some(a), Some(b)) => !a.is_null() && a == b,
        _ => false,
    })
}

/// Lookup table from entity name to its static definition.
#[derive(Debug, Clone, Copy, Default)]
pub struct SchemaRegistry;

impl SchemaRegistry {
    pub fn get(&self, entity: &str) -> Option<&'static EntityDef> {
        EntityKind::from_name(entity).map(EntityKind::def)
    }

    pub fn get_schema(&self, entity: &str) -> Option<Schema> {
        self.get(entity).map(EntityDef::schema)
    }

    pub fn entities(&self) -> impl Iterator<Item = &'static EntityDef> {
        EntityKind::ALL.iter().map(|k| k.def())
    }
}
