//! Dual-backend storage for control-plane entities.
//!
//! Two interchangeable backends implement the same [`Store`] contract:
//!
//! - [`EphemeralStore`]: rows in process memory, lost on exit
//! - [`PersistentStore`]: rows in ACID transactions (redb)
//!
//! Both drive validation from the entity's static field table
//! ([`EntityDef`](crate::schema::EntityDef)) and fire the same write hooks, so
//! a caller cannot tell them apart except by durability.

pub mod durable;
pub mod mem;

pub use durable::{DurableStore, PersistentStore};
pub use mem::{EphemeralStore, MemStore};

use crate::error::StoreError;
use crate::hooks;
use crate::model::EntityKind;
use crate::schema::{EntityDef, Schema};

pub use crate::schema::Record;

/// Result type for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// CRUD contract shared by every entity store.
///
/// Records come back with every stored column present; synthesized fields
/// are added by [`Api::render`](crate::api::Api::render).
pub trait Store: Send + Sync {
    /// The entity this store holds.
    fn kind(&self) -> EntityKind;

    /// Validate `data` against the schema and persist it as a new row.
    ///
    /// Unknown and read-only fields are dropped. A missing required field,
    /// a uniqueness collision or a type mismatch fails with
    /// [`StoreError::Create`] and leaves nothing behind.
    fn create(&self, data: &Record) -> StoreResult<Record>;

    fn get(&self, id: i64) -> StoreResult<Option<Record>>;

    /// Rows matching every `field == value` pair, in id order.
    fn filter(&self, criteria: &Record) -> StoreResult<Vec<Record>>;

    /// Apply the updatable subset of `data` to row `id`, all or nothing.
    fn update(&self, id: i64, data: &Record) -> StoreResult<Record>;

    /// Remove row `id` and any rows it owns.
    fn delete(&self, id: i64) -> StoreResult<()>;

    fn get_all(&self) -> StoreResult<Vec<Record>>;

    fn def(&self) -> &'static EntityDef {
        self.kind().def()
    }

    fn get_columns(&self) -> Vec<&'static str> {
        self.def().columns()
    }

    fn get_schema(&self) -> Schema {
        self.def().schema()
    }

    /// Run a filter-language expression through an external evaluator.
    ///
    /// The evaluator receives `"<entity>: <expr>"`; every record it returns
    /// must carry only this entity's columns.
    fn query(&self, evaluator: &dyn QueryEvaluator, expr: &str) -> StoreResult<Vec<Record>> {
        let def = self.def();
        let records = evaluator.evaluate(&format!("{}: {}", def.name, expr))?;
        for record in &records {
            if let Some(field) = record
                .keys()
                .find(|k| def.field(k).is_none() && !def.is_synthesized(k))
            {
                return Err(StoreError::Query {
                    message: format!(
                        "evaluator returned {} record with unknown field {field}",
                        def.name
                    ),
                });
            }
        }
        Ok(records)
    }
}

/// Opaque filter-expression evaluator (grammar lives outside this crate).
pub trait QueryEvaluator {
    fn evaluate(&self, query: &str) -> StoreResult<Vec<Record>>;
}

impl<F> QueryEvaluator for F
where
    F: Fn(&str) -> StoreResult<Vec<Record>>,
{
    fn evaluate(&self, query: &str) -> StoreResult<Vec<Record>> {
        self(query)
    }
}

/// Build the row a create will insert: create view, defaults, coercion,
/// then the create hooks. The id is assigned by the backend.
pub(crate) fn prepare_create(kind: EntityKind, data: &Record, now: i64) -> StoreResult<Record> {
    let def = kind.def();
    let mut record = def.build(def.create_view(data)?)?;
    hooks::on_create(kind, &mut record, now);
    Ok(record)
}

/// Build the row an update will write in place of `current`.
pub(crate) fn prepare_update(
    kind: EntityKind,
    current: &Record,
    data: &Record,
    now: i64,
) -> StoreResult<Record> {
    let def = kind.def();
    let view = def.update_view(data);
    let state_written = view.contains_key("state");
    let mut next = def.apply(current, view)?;
    if state_written {
        hooks::on_after_state_change(kind, &mut next, now);
    }
    Ok(next)
}
