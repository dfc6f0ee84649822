//! Entity catalogue: the static field tables for every entity type, plus
//! typed views that decode a [`Record`] into a concrete struct.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::StoreError;
use crate::schema::FieldType::{Integer, Json, JsonEntry};
use crate::schema::{EntityDef, FieldDef, FieldDefault, FieldType, Record};
use crate::store::StoreResult;
use crate::task::TaskState;

/// Every entity type the control plane stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Nodes,
    Facts,
    Attrs,
    Tasks,
    Adventures,
    Filters,
    Primitives,
}

impl EntityKind {
    pub const ALL: [EntityKind; 7] = [
        EntityKind::Nodes,
        EntityKind::Facts,
        EntityKind::Attrs,
        EntityKind::Tasks,
        EntityKind::Adventures,
        EntityKind::Filters,
        EntityKind::Primitives,
    ];

    pub fn def(self) -> &'static EntityDef {
        match self {
            EntityKind::Nodes => &NODES,
            EntityKind::Facts => &FACTS,
            EntityKind::Attrs => &ATTRS,
            EntityKind::Tasks => &TASKS,
            EntityKind::Adventures => &ADVENTURES,
            EntityKind::Filters => &FILTERS,
            EntityKind::Primitives => &PRIMITIVES,
        }
    }

    pub fn name(self) -> &'static str {
        self.def().name
    }

    /// Accepts the table name or its singular form (`"node"`, `"facts"`, ...).
    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|k| k.name() == name || k.name().strip_suffix('s') == Some(name.as_str()))
    }

    /// Entities that only ever live in process memory.
    pub fn is_ephemeral_only(self) -> bool {
        matches!(self, EntityKind::Primitives)
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

// ---------------------------------------------------------------------------
// Field tables
// ---------------------------------------------------------------------------

static NODES: EntityDef = EntityDef {
    kind: EntityKind::Nodes,
    name: "nodes",
    fields: &[
        FieldDef::id(),
        FieldDef::new("name", FieldType::String(64)).not_null().fixed(),
        FieldDef::new("adventure_id", Integer).references("adventures.id"),
        FieldDef::new("task_id", Integer).references("tasks.id"),
    ],
    synthesized: &["facts", "attrs"],
    unique_together: &[],
};

static FACTS: EntityDef = EntityDef {
    kind: EntityKind::Facts,
    name: "facts",
    fields: &[
        FieldDef::id(),
        FieldDef::new("node_id", Integer)
            .not_null()
            .fixed()
            .references("nodes.id"),
        FieldDef::new("key", FieldType::String(64)).not_null().fixed(),
        FieldDef::new("value", JsonEntry).with_default(FieldDefault::Str("")),
    ],
    synthesized: &[],
    unique_together: &[&["node_id", "key"]],
};

static ATTRS: EntityDef = EntityDef {
    kind: EntityKind::Attrs,
    name: "attrs",
    fields: &[
        FieldDef::id(),
        FieldDef::new("node_id", Integer)
            .not_null()
            .fixed()
            .references("nodes.id"),
        FieldDef::new("key", FieldType::String(64)).not_null().fixed(),
        FieldDef::new("value", JsonEntry).with_default(FieldDefault::Str("")),
    ],
    synthesized: &[],
    unique_together: &[&["node_id", "key"]],
};

static TASKS: EntityDef = EntityDef {
    kind: EntityKind::Tasks,
    name: "tasks",
    fields: &[
        FieldDef::id(),
        FieldDef::new("node_id", Integer)
            .not_null()
            .references("nodes.id"),
        FieldDef::new("action", FieldType::String(40)).not_null(),
        FieldDef::new("payload", Json)
            .not_null()
            .with_default(FieldDefault::EmptyObject),
        FieldDef::new("state", FieldType::Enum(TaskState::NAMES))
            .with_default(FieldDefault::Str("pending")),
        FieldDef::new("parent_id", Integer).references("tasks.id"),
        FieldDef::new("result", Json).with_default(FieldDefault::EmptyObject),
        FieldDef::new("submitted", Integer).fixed(),
        FieldDef::new("completed", Integer),
        FieldDef::new("expires", Integer),
    ],
    synthesized: &[],
    unique_together: &[],
};

static ADVENTURES: EntityDef = EntityDef {
    kind: EntityKind::Adventures,
    name: "adventures",
    fields: &[
        FieldDef::id(),
        FieldDef::new("name", FieldType::String(30)).not_null(),
        FieldDef::new("dsl", Json)
            .not_null()
            .with_default(FieldDefault::EmptyObject),
        FieldDef::new("criteria", FieldType::String(255)).with_default(FieldDefault::Str("true")),
    ],
    synthesized: &[],
    unique_together: &[],
};

static FILTERS: EntityDef = EntityDef {
    kind: EntityKind::Filters,
    name: "filters",
    fields: &[
        FieldDef::id(),
        FieldDef::new("parent_id", Integer).references("filters.id"),
        FieldDef::new("name", FieldType::String(30)),
        FieldDef::new("filter_type", FieldType::String(30)),
        FieldDef::new("expr", FieldType::String(255)),
    ],
    synthesized: &["full_expr"],
    unique_together: &[],
};

static PRIMITIVES: EntityDef = EntityDef {
    kind: EntityKind::Primitives,
    name: "primitives",
    fields: &[
        FieldDef::id(),
        FieldDef::new("name", FieldType::String(32)).not_null(),
        FieldDef::new("args", Json).with_default(FieldDefault::EmptyObject),
        FieldDef::new("constraints", Json).with_default(FieldDefault::EmptyList),
        FieldDef::new("consequences", Json).with_default(FieldDefault::EmptyList),
        FieldDef::new("weight", Integer).with_default(FieldDefault::Int(50)),
        FieldDef::new("timeout", Integer).with_default(FieldDefault::Int(30)),
    ],
    synthesized: &[],
    unique_together: &[],
};

// ---------------------------------------------------------------------------
// Typed views
// ---------------------------------------------------------------------------

/// Decode a record into one of the typed views below.
pub fn decode<T: DeserializeOwned>(record: &Record) -> StoreResult<T> {
    serde_json::from_value(Value::Object(record.clone())).map_err(|e| {
        StoreError::Serialization {
            message: format!("failed to decode {}: {e}", std::any::type_name::<T>()),
        }
    })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: i64,
    pub name: String,
    pub adventure_id: Option<i64>,
    pub task_id: Option<i64>,
    /// Present only on rendered records.
    #[serde(default)]
    pub facts: Option<Record>,
    #[serde(default)]
    pub attrs: Option<Record>,
}

/// Inherited key/value datum on a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fact {
    pub id: i64,
    pub node_id: i64,
    pub key: String,
    pub value: Value,
}

/// Node-local, non-inherited key/value datum.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attr {
    pub id: i64,
    pub node_id: i64,
    pub key: String,
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: i64,
    pub node_id: i64,
    pub action: String,
    pub payload: Value,
    pub state: TaskState,
    pub parent_id: Option<i64>,
    pub result: Value,
    pub submitted: Option<i64>,
    pub completed: Option<i64>,
    pub expires: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Adventure {
    pub id: i64,
    pub name: String,
    pub dsl: Value,
    pub criteria: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub id: i64,
    pub parent_id: Option<i64>,
    pub name: Option<String>,
    pub filter_type: Option<String>,
    pub expr: Option<String>,
    #[serde(default)]
    pub full_expr: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Primitive {
    pub id: i64,
    pub name: String,
    pub args: Value,
    pub constraints: Value,
    pub consequences: Value,
    pub weight: i64,
    pub timeout: i64,
}
