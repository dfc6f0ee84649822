//! In-process ephemeral storage.
//!
//! Every table lives in one [`MemStore`] behind a single mutex, so a write
//! and its cascades are applied as one step. All data is lost on process exit.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use serde_json::Value;

use crate::error::StoreError;
use crate::hooks;
use crate::model::EntityKind;
use crate::schema::{EntityDef, Record};
use crate::store::{Store, StoreResult, prepare_create, prepare_update};
use crate::task::unix_now;

type Table = BTreeMap<i64, Record>;

/// Shared in-memory collection holding the rows of every entity.
#[derive(Debug, Default)]
pub struct MemStore {
    tables: Mutex<HashMap<EntityKind, Table>>,
}

impl MemStore {
    /// Create an empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    fn with_tables<T>(&self, f: impl FnOnce(&mut HashMap<EntityKind, Table>) -> T) -> T {
        let mut tables = self.tables.lock().expect("mem store lock poisoned");
        f(&mut tables)
    }

    /// Number of rows held for `kind`.
    pub fn len(&self, kind: EntityKind) -> usize {
        self.with_tables(|tables| tables.get(&kind).map_or(0, BTreeMap::len))
    }

    pub fn is_empty(&self, kind: EntityKind) -> bool {
        self.len(kind) == 0
    }
}

/// `1` for an empty table, otherwise one past the largest id.
fn next_id(table: &Table) -> i64 {
    table.keys().next_back().map_or(1, |max| max + 1)
}

/// Ephemeral [`Store`] for one entity.
#[derive(Debug, Clone)]
pub struct EphemeralStore {
    db: Arc<MemStore>,
    kind: EntityKind,
}

impl EphemeralStore {
    pub fn new(db: Arc<MemStore>, kind: EntityKind) -> Self {
        Self { db, kind }
    }

    /// A store for `kind` with a private collection of its own.
    pub fn standalone(kind: EntityKind) -> Self {
        Self::new(Arc::new(MemStore::new()), kind)
    }

    fn entity(&self) -> &'static EntityDef {
        self.kind.def()
    }
}

impl Store for EphemeralStore {
    fn kind(&self) -> EntityKind {
        self.kind
    }

    fn create(&self, data: &Record) -> StoreResult<Record> {
        let def = self.entity();
        let mut record = prepare_create(self.kind, data, unix_now())?;

        self.db.with_tables(|tables| {
            let table = tables.entry(self.kind).or_default();
            def.check_unique(&record, table.values())
                .map_err(|message| StoreError::create(def.name, message))?;

            let id = next_id(table);
            record.insert("id".into(), Value::from(id));
            table.insert(id, record.clone());
            tracing::debug!(entity = def.name, id, "created ephemeral row");
            Ok(record)
        })
    }

    fn get(&self, id: i64) -> StoreResult<Option<Record>> {
        Ok(self
            .db
            .with_tables(|tables| tables.get(&self.kind).and_then(|t| t.get(&id).cloned())))
    }

    fn filter(&self, criteria: &Record) -> StoreResult<Vec<Record>> {
        let criteria = self.entity().normalize_criteria(criteria)?;
        Ok(self.db.with_tables(|tables| {
            tables.get(&self.kind).map_or_else(Vec::new, |t| {
                t.values()
                    .filter(|row| EntityDef::matches(row, &criteria))
                    .cloned()
                    .collect()
            })
        }))
    }

    fn update(&self, id: i64, data: &Record) -> StoreResult<Record> {
        let def = self.entity();
        self.db.with_tables(|tables| {
            let table = tables.entry(self.kind).or_default();
            let current = table
                .get(&id)
                .ok_or_else(|| StoreError::not_found(def.name, id))?;
            let next = prepare_update(self.kind, current, data, unix_now())?;
            def.check_unique(&next, table.values())
                .map_err(|message| StoreError::validation(def.name, message))?;

            table.insert(id, next.clone());
            tracing::debug!(entity = def.name, id, "updated ephemeral row");
            Ok(next)
        })
    }

    fn delete(&self, id: i64) -> StoreResult<()> {
        let def = self.entity();
        self.db.with_tables(|tables| {
            if !tables.get(&self.kind).is_some_and(|t| t.contains_key(&id)) {
                return Err(StoreError::not_found(def.name, id));
            }

            for rule in hooks::on_before_delete(self.kind) {
                if let Some(dependents) = tables.get_mut(&rule.target) {
                    let before = dependents.len();
                    dependents.retain(|_, row| {
                        row.get(rule.column).and_then(Value::as_i64) != Some(id)
                    });
                    tracing::debug!(
                        entity = def.name,
                        id,
                        target = rule.target.name(),
                        removed = before - dependents.len(),
                        "cascade delete"
                    );
                }
            }

            if let Some(table) = tables.get_mut(&self.kind) {
                table.remove(&id);
            }
            Ok(())
        })
    }

    fn get_all(&self) -> StoreResult<Vec<Record>> {
        Ok(self.db.with_tables(|tables| {
            tables
                .get(&self.kind)
                .map_or_else(Vec::new, |t| t.values().cloned().collect())
        }))
    }
}
