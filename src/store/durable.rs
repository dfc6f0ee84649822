//! ACID-durable storage backed by redb.
//!
//! One database file holds a table per entity, keyed by id, with each row
//! stored as JSON text. Every create, update and delete (cascades included)
//! runs inside a single write transaction that is committed on success and
//! aborted on any error.

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadTransaction, ReadableTable, TableDefinition, WriteTransaction};
use serde_json::Value;

use crate::error::StoreError;
use crate::hooks;
use crate::model::EntityKind;
use crate::schema::{EntityDef, Record};
use crate::store::{Store, StoreResult, prepare_create, prepare_update};
use crate::task::unix_now;

/// Database file name inside the data directory.
pub const DB_FILE: &str = "opencenter.redb";

fn table_def(kind: EntityKind) -> TableDefinition<'static, i64, &'static str> {
    TableDefinition::new(kind.name())
}

fn redb_err<E: std::fmt::Display>(op: &'static str) -> impl FnOnce(E) -> StoreError {
    move |e| StoreError::Redb {
        message: format!("{op} failed: {e}"),
    }
}

fn encode(record: &Record) -> StoreResult<String> {
    serde_json::to_string(record).map_err(|e| StoreError::Serialization {
        message: format!("failed to encode row: {e}"),
    })
}

fn decode(text: &str) -> StoreResult<Record> {
    serde_json::from_str(text).map_err(|e| StoreError::Serialization {
        message: format!("failed to decode row: {e}"),
    })
}

/// Every row of an open table, in id order.
fn rows<T>(table: &T) -> StoreResult<Vec<Record>>
where
    T: ReadableTable<i64, &'static str>,
{
    let mut out = Vec::new();
    for entry in table.iter().map_err(redb_err("iter"))? {
        let (_, value) = entry.map_err(redb_err("iter"))?;
        out.push(decode(value.value())?);
    }
    Ok(out)
}

/// Handle on the redb database shared by every persistent entity store.
#[derive(Clone)]
pub struct DurableStore {
    db: Arc<Database>,
}

impl DurableStore {
    /// Open or create the database in `data_dir`, creating every entity table.
    pub fn open(data_dir: &Path) -> StoreResult<Self> {
        std::fs::create_dir_all(data_dir).map_err(|e| StoreError::Io { source: e })?;
        let db_path = data_dir.join(DB_FILE);
        let db = Database::create(&db_path).map_err(|e| StoreError::Redb {
            message: format!("failed to open redb at {}: {e}", db_path.display()),
        })?;
        let store = Self { db: Arc::new(db) };

        store.write(|txn| {
            for kind in EntityKind::ALL {
                txn.open_table(table_def(kind)).map_err(redb_err("open_table"))?;
            }
            Ok(())
        })?;
        tracing::info!(path = %db_path.display(), "opened durable store");
        Ok(store)
    }

    /// Run `f` in a write transaction: commit on `Ok`, abort on `Err`.
    pub(crate) fn write<T>(
        &self,
        f: impl FnOnce(&WriteTransaction) -> StoreResult<T>,
    ) -> StoreResult<T> {
        let txn = self.db.begin_write().map_err(redb_err("begin_write"))?;
        match f(&txn) {
            Ok(value) => {
                txn.commit().map_err(redb_err("commit"))?;
                Ok(value)
            }
            Err(e) => {
                if let Err(abort) = txn.abort() {
                    tracing::warn!(error = %abort, "transaction abort failed");
                }
                Err(e)
            }
        }
    }

    pub(crate) fn read<T>(&self, f: impl FnOnce(&ReadTransaction) -> StoreResult<T>) -> StoreResult<T> {
        let txn = self.db.begin_read().map_err(redb_err("begin_read"))?;
        f(&txn)
    }
}

impl std::fmt::Debug for DurableStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DurableStore").finish()
    }
}

/// Persistent [`Store`] for one entity.
#[derive(Debug, Clone)]
pub struct PersistentStore {
    db: DurableStore,
    kind: EntityKind,
}

impl PersistentStore {
    pub fn new(db: DurableStore, kind: EntityKind) -> Self {
        Self { db, kind }
    }

    fn entity(&self) -> &'static EntityDef {
        self.kind.def()
    }

    fn all_rows(&self) -> StoreResult<Vec<Record>> {
        self.db.read(|txn| {
            let table = txn
                .open_table(table_def(self.kind))
                .map_err(redb_err("open_table"))?;
            rows(&table)
        })
    }
}

impl Store for PersistentStore {
    fn kind(&self) -> EntityKind {
        self.kind
    }

    fn create(&self, data: &Record) -> StoreResult<Record> {
        let def = self.entity();
        let mut record = prepare_create(self.kind, data, unix_now())?;

        self.db.write(|txn| {
            let mut table = txn
                .open_table(table_def(self.kind))
                .map_err(redb_err("open_table"))?;
            def.check_unique(&record, &rows(&table)?)
                .map_err(|message| StoreError::create(def.name, message))?;

            let id = table
                .last()
                .map_err(redb_err("last"))?
                .map_or(1, |(key, _)| key.value() + 1);
            record.insert("id".into(), Value::from(id));
            table
                .insert(id, encode(&record)?.as_str())
                .map_err(redb_err("insert"))?;
            tracing::debug!(entity = def.name, id, "created persistent row");
            Ok(record)
        })
    }

    fn get(&self, id: i64) -> StoreResult<Option<Record>> {
        self.db.read(|txn| {
            let table = txn
                .open_table(table_def(self.kind))
                .map_err(redb_err("open_table"))?;
            let guard = table.get(id).map_err(redb_err("get"))?;
            guard.map(|g| decode(g.value())).transpose()
        })
    }

    fn filter(&self, criteria: &Record) -> StoreResult<Vec<Record>> {
        let criteria = self.entity().normalize_criteria(criteria)?;
        Ok(self
            .all_rows()?
            .into_iter()
            .filter(|row| EntityDef::matches(row, &criteria))
            .collect())
    }

    fn update(&self, id: i64, data: &Record) -> StoreResult<Record> {
        let def = self.entity();
        self.db.write(|txn| {
            let mut table = txn
                .open_table(table_def(self.kind))
                .map_err(redb_err("open_table"))?;
            let current = match table.get(id).map_err(redb_err("get"))? {
                Some(guard) => decode(guard.value())?,
                None => return Err(StoreError::not_found(def.name, id)),
            };
            let next = prepare_update(self.kind, &current, data, unix_now())?;
            def.check_unique(&next, &rows(&table)?)
                .map_err(|message| StoreError::validation(def.name, message))?;

            table
                .insert(id, encode(&next)?.as_str())
                .map_err(redb_err("insert"))?;
            tracing::debug!(entity = def.name, id, "updated persistent row");
            Ok(next)
        })
    }

    fn delete(&self, id: i64) -> StoreResult<()> {
        let def = self.entity();
        self.db.write(|txn| {
            let mut table = txn
                .open_table(table_def(self.kind))
                .map_err(redb_err("open_table"))?;
            if table.get(id).map_err(redb_err("get"))?.is_none() {
                return Err(StoreError::not_found(def.name, id));
            }

            for rule in hooks::on_before_delete(self.kind) {
                let mut dependents = txn
                    .open_table(table_def(rule.target))
                    .map_err(redb_err("open_table"))?;
                let doomed: Vec<i64> = rows(&dependents)?
                    .iter()
                    .filter(|row| row.get(rule.column).and_then(Value::as_i64) == Some(id))
                    .filter_map(|row| row.get("id").and_then(Value::as_i64))
                    .collect();
                for dependent in &doomed {
                    dependents.remove(*dependent).map_err(redb_err("remove"))?;
                }
                tracing::debug!(
                    entity = def.name,
                    id,
                    target = rule.target.name(),
                    removed = doomed.len(),
                    "cascade delete"
                );
            }

            table.remove(id).map_err(redb_err("remove"))?;
            Ok(())
        })
    }

    fn get_all(&self) -> StoreResult<Vec<Record>> {
        self.all_rows()
    }
}
