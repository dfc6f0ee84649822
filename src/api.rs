//! Facade over every entity store.
//!
//! [`Api`] owns one [`Store`] per entity and the fact-type registry, and adds
//! the synthesized fields to records on the way out: a node's resolved
//! `facts` and local `attrs`, and a filter's `full_expr`.

use std::path::PathBuf;
use std::sync::Arc;

use serde_json::{Value, json};

use crate::facts::{FactMap, FactResolver, FactTypeRegistry};
use crate::filter::FilterChain;
use crate::model::EntityKind;
use crate::schema::Record;
use crate::store::{
    DurableStore, EphemeralStore, MemStore, PersistentStore, QueryEvaluator, Store, StoreResult,
};

/// Settings for [`Api::open`].
#[derive(Debug)]
pub struct ApiConfig {
    /// Directory for the redb file; `None` keeps every entity in memory.
    pub data_dir: Option<PathBuf>,
    pub fact_types: FactTypeRegistry,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            fact_types: FactTypeRegistry::builtin(),
        }
    }
}

/// Entry point to the control-plane data layer.
pub struct Api {
    nodes: Box<dyn Store>,
    facts: Box<dyn Store>,
    attrs: Box<dyn Store>,
    tasks: Box<dyn Store>,
    adventures: Box<dyn Store>,
    filters: Box<dyn Store>,
    primitives: Box<dyn Store>,
    fact_types: FactTypeRegistry,
    persistent: bool,
}

impl Api {
    /// Open every entity store.
    ///
    /// With a data directory, everything except primitives is persisted in
    /// one redb file; primitives always live in memory.
    pub fn open(config: ApiConfig) -> StoreResult<Self> {
        let durable = config
            .data_dir
            .as_deref()
            .map(DurableStore::open)
            .transpose()?;
        let memory = Arc::new(MemStore::new());

        let backend = |kind: EntityKind| -> Box<dyn Store> {
            match &durable {
                Some(db) if !kind.is_ephemeral_only() => {
                    Box::new(PersistentStore::new(db.clone(), kind))
                }
                _ => Box::new(EphemeralStore::new(Arc::clone(&memory), kind)),
            }
        };

        let api = Self {
            nodes: backend(EntityKind::Nodes),
            facts: backend(EntityKind::Facts),
            attrs: backend(EntityKind::Attrs),
            tasks: backend(EntityKind::Tasks),
            adventures: backend(EntityKind::Adventures),
            filters: backend(EntityKind::Filters),
            primitives: backend(EntityKind::Primitives),
            fact_types: config.fact_types,
            persistent: durable.is_some(),
        };
        tracing::info!(
            persistent = api.persistent,
            fact_types = api.fact_types.len(),
            "opened control-plane api"
        );
        Ok(api)
    }

    /// Every entity in memory, with the builtin fact types.
    pub fn in_memory() -> StoreResult<Self> {
        Self::open(ApiConfig::default())
    }

    pub fn store(&self, kind: EntityKind) -> &dyn Store {
        match kind {
            EntityKind::Nodes => self.nodes.as_ref(),
            EntityKind::Facts => self.facts.as_ref(),
            EntityKind::Attrs => self.attrs.as_ref(),
            EntityKind::Tasks => self.tasks.as_ref(),
            EntityKind::Adventures => self.adventures.as_ref(),
            EntityKind::Filters => self.filters.as_ref(),
            EntityKind::Primitives => self.primitives.as_ref(),
        }
    }

    pub fn fact_types(&self) -> &FactTypeRegistry {
        &self.fact_types
    }

    pub fn is_persistent(&self) -> bool {
        self.persistent
    }

    pub fn resolver(&self) -> FactResolver<'_> {
        FactResolver::new(self.facts.as_ref(), &self.fact_types)
    }

    /// Effective (inherited) facts of a node.
    pub fn node_facts(&self, node_id: i64) -> StoreResult<FactMap> {
        self.resolver().resolve(node_id)
    }

    /// The node's own attrs as a key → value map.
    pub fn node_attrs(&self, node_id: i64) -> StoreResult<Record> {
        let rows = self.attrs.filter(&by_node(node_id))?;
        Ok(rows
            .into_iter()
            .filter_map(|mut row| match (row.remove("key"), row.remove("value")) {
                (Some(Value::String(key)), Some(value)) => Some((key, value)),
                _ => None,
            })
            .collect())
    }

    pub fn filter_full_expr(&self, filter_id: i64) -> StoreResult<Option<String>> {
        FilterChain::new(self.filters.as_ref()).full_expr_by_id(filter_id)
    }

    /// Add the synthesized fields of `kind` to a stored record.
    pub fn render(&self, kind: EntityKind, mut record: Record) -> StoreResult<Record> {
        match kind {
            EntityKind::Nodes => {
                if let Some(id) = record.get("id").and_then(Value::as_i64) {
                    record.insert("facts".into(), Value::Object(self.node_facts(id)?));
                    record.insert("attrs".into(), Value::Object(self.node_attrs(id)?));
                }
            }
            EntityKind::Filters => {
                let full = FilterChain::new(self.filters.as_ref()).full_expr(&record)?;
                record.insert("full_expr".into(), Value::from(full));
            }
            _ => {}
        }
        Ok(record)
    }

    pub fn get_rendered(&self, kind: EntityKind, id: i64) -> StoreResult<Option<Record>> {
        self.store(kind)
            .get(id)?
            .map(|record| self.render(kind, record))
            .transpose()
    }

    pub fn get_all_rendered(&self, kind: EntityKind) -> StoreResult<Vec<Record>> {
        self.store(kind)
            .get_all()?
            .into_iter()
            .map(|record| self.render(kind, record))
            .collect()
    }

    /// Forward a filter-language expression to `evaluator`.
    pub fn query(
        &self,
        kind: EntityKind,
        evaluator: &dyn QueryEvaluator,
        expr: &str,
    ) -> StoreResult<Vec<Record>> {
        self.store(kind).query(evaluator, expr)
    }
}

fn by_node(node_id: i64) -> Record {
    let mut criteria = Record::new();
    criteria.insert("node_id".into(), json!(node_id));
    criteria
}
