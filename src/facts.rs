//! Hierarchical fact inheritance.
//!
//! A node's position in the hierarchy is itself a fact: `parent_id` names the
//! node above it. [`FactResolver::resolve`] walks that chain to the root and
//! folds facts downward, letting each key's registered [`Inheritance`] policy
//! decide how an ancestor's value combines with the node's own.
//!
//! Resolution issues one read per level and takes no snapshot, so a write to
//! any fact in the chain while a resolve is running may be half-observed.

use std::collections::HashSet;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{error, warn};

use crate::config::ConfigError;
use crate::schema::Record;
use crate::store::{Store, StoreResult};

/// Effective fact mapping of a node: key → value.
pub type FactMap = Record;

/// How a fact's value flows from an ancestor down to a descendant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Inheritance {
    /// Both lists, ancestor elements first, no duplicates.
    Union,
    /// A non-null ancestor value overrides the descendant.
    ParentClobber,
    /// The descendant's value wins when it has one.
    ChildClobber,
    /// Pass-through: the descendant's value if set, else the ancestor's.
    None,
}

/// A registered fact definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FactType {
    pub name: String,
    pub inheritance: Inheritance,
}

impl FactType {
    pub fn new(name: impl Into<String>, inheritance: Inheritance) -> Self {
        Self {
            name: name.into(),
            inheritance,
        }
    }
}

#[derive(Deserialize)]
struct FactTypesFile {
    #[serde(default)]
    facts: Vec<FactType>,
}

/// Fact name → merge policy lookup, supplied to the resolver explicitly.
#[derive(Debug, Default)]
pub struct FactTypeRegistry {
    types: DashMap<String, FactType>,
}

impl FactTypeRegistry {
    /// An empty registry: every fact resolves as unknown.
    pub fn new() -> Self {
        Self::default()
    }

    /// The definitions the control plane relies on itself.
    pub fn builtin() -> Self {
        let registry = Self::new();
        registry.register(FactType::new("parent_id", Inheritance::None));
        registry.register(FactType::new("backends", Inheritance::Union));
        registry
    }

    /// Builtins plus every `[[facts]]` entry of a TOML document.
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let file: FactTypesFile = toml::from_str(text).map_err(|e| ConfigError::Parse {
            message: format!("invalid fact type table: {e}"),
        })?;
        let registry = Self::builtin();
        registry.extend(file.facts);
        Ok(registry)
    }

    /// Add or replace a definition.
    pub fn register(&self, fact: FactType) {
        self.types.insert(fact.name.clone(), fact);
    }

    pub fn extend(&self, facts: impl IntoIterator<Item = FactType>) {
        for fact in facts {
            self.register(fact);
        }
    }

    pub fn get(&self, name: &str) -> Option<FactType> {
        self.types.get(name).map(|r| r.value().clone())
    }

    pub fn inheritance(&self, name: &str) -> Option<Inheritance> {
        self.types.get(name).map(|r| r.value().inheritance)
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

/// Combine an inherited value with a node's own.
///
/// `child` is `None` when the node does not set the key at all, which is
/// distinct from setting it to `null`. A `None` result removes the key.
pub fn merge(
    policy: Inheritance,
    key: &str,
    child: Option<Value>,
    parent: Value,
) -> Option<Value> {
    match policy {
        Inheritance::Union => match (child, parent) {
            (None, Value::Array(items)) => Some(Value::Array(items)),
            (Some(Value::Array(own)), Value::Array(mut items)) => {
                for item in own {
                    if !items.contains(&item) {
                        items.push(item);
                    }
                }
                Some(Value::Array(items))
            }
            (_, parent) => {
                error!(fact = key, "union inheritance on a non-list fact");
                Some(parent)
            }
        },
        Inheritance::ParentClobber => {
            if parent.is_null() {
                child
            } else {
                Some(parent)
            }
        }
        Inheritance::ChildClobber | Inheritance::None => child.or(Some(parent)),
    }
}

/// Computes a node's effective facts from the fact store.
pub struct FactResolver<'a> {
    facts: &'a dyn Store,
    registry: &'a FactTypeRegistry,
}

impl<'a> FactResolver<'a> {
    pub fn new(facts: &'a dyn Store, registry: &'a FactTypeRegistry) -> Self {
        Self { facts, registry }
    }

    /// Facts set directly on `node_id`.
    pub fn own_facts(&self, node_id: i64) -> StoreResult<FactMap> {
        let rows = self.facts.filter(&criteria(json!({ "node_id": node_id })))?;
        Ok(rows
            .into_iter()
            .filter_map(|mut row| match (row.remove("key"), row.remove("value")) {
                (Some(Value::String(key)), Some(value)) => Some((key, value)),
                _ => None,
            })
            .collect())
    }

    /// `node_id` followed by its ancestors, nearest first.
    ///
    /// The walk stops at the first node without exactly one `parent_id`
    /// fact, or at the first repeated id.
    pub fn ancestry(&self, node_id: i64) -> StoreResult<Vec<i64>> {
        let mut chain = Vec::new();
        let mut visited = HashSet::new();
        let mut current = Some(node_id);

        while let Some(id) = current {
            if !visited.insert(id) {
                warn!(node = node_id, repeated = id, "cycle in node hierarchy, stopping walk");
                break;
            }
            chain.push(id);
            current = self.parent_of(id)?;
        }
        Ok(chain)
    }

    fn parent_of(&self, node_id: i64) -> StoreResult<Option<i64>> {
        let rows = self
            .facts
            .filter(&criteria(json!({ "node_id": node_id, "key": "parent_id" })))?;
        let [row] = rows.as_slice() else {
            return Ok(None);
        };

        Ok(match row.get("value") {
            Some(Value::Number(n)) => n
                .as_i64()
                .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64))
                .or_else(|| {
                    warn!(node = node_id, value = %n, "fractional parent_id fact");
                    None
                }),
            Some(Value::String(s)) => s.trim().parse().ok().or_else(|| {
                warn!(node = node_id, value = %s, "non-numeric parent_id fact");
                None
            }),
            None | Some(Value::Null) => None,
            Some(other) => {
                warn!(node = node_id, value = %other, "unusable parent_id fact");
                None
            }
        })
    }

    /// Effective facts of `node_id`, recomputed from the store on every call.
    pub fn resolve(&self, node_id: i64) -> StoreResult<FactMap> {
        let mut chain = self.ancestry(node_id)?.into_iter().rev();
        let Some(root) = chain.next() else {
            return Ok(FactMap::new());
        };

        let mut merged = self.own_facts(root)?;
        for id in chain {
            let inherited = merged;
            let mut own = self.own_facts(id)?;
            for (key, parent_value) in inherited {
                let policy = self.registry.inheritance(&key).unwrap_or_else(|| {
                    error!(fact = %key, node = id, "unknown fact type, passing through");
                    Inheritance::None
                });
                let child_value = own.remove(&key);
                if let Some(value) = merge(policy, &key, child_value, parent_value) {
                    own.insert(key, value);
                }
            }
            merged = own;
        }
        Ok(merged)
    }
}

fn criteria(value: Value) -> Record {
    match value {
        Value::Object(map) => map,
        _ => Record::new(),
    }
}

#[cfg(test)]
mod tests {
    use crate::model::EntityKind;
    use crate::store::EphemeralStore;

    use super::*;

    fn fact(store: &EphemeralStore, node_id: i64, key: &str, value: Value) {
        store
            .create(&criteria(json!({"node_id": node_id, "key": key, "value": value})))
            .unwrap();
    }

    fn registry(entries: &[(&str, Inheritance)]) -> FactTypeRegistry {
        let registry = FactTypeRegistry::builtin();
        for (name, inheritance) in entries {
            registry.register(FactType::new(*name, *inheritance));
        }
        registry
    }

    #[test]
    fn union_inherits_missing_list() {
        let facts = EphemeralStore::standalone(EntityKind::Facts);
        fact(&facts, 1, "backends", json!(["node"]));
        fact(&facts, 2, "parent_id", json!(1));

        let registry = FactTypeRegistry::builtin();
        let resolved = FactResolver::new(&facts, &registry).resolve(2).unwrap();
        assert_eq!(resolved["backends"], json!(["node"]));
        assert_eq!(resolved["parent_id"], json!(1));
    }

    #[test]
    fn union_combines_parent_first_without_duplicates() {
        let facts = EphemeralStore::standalone(EntityKind::Facts);
        fact(&facts, 1, "backends", json!(["node", "agent"]));
        fact(&facts, 2, "parent_id", json!(1));
        fact(&facts, 2, "backends", json!(["container", "node"]));

        let registry = FactTypeRegistry::builtin();
        let resolved = FactResolver::new(&facts, &registry).resolve(2).unwrap();
        assert_eq!(resolved["backends"], json!(["node", "agent", "container"]));
    }

    #[test]
    fn union_on_scalar_passes_parent_through() {
        assert_eq!(
            merge(Inheritance::Union, "k", Some(json!("x")), json!(["a"])),
            Some(json!(["a"]))
        );
        assert_eq!(
            merge(Inheritance::Union, "k", Some(json!(["b"])), json!(5)),
            Some(json!(5))
        );
    }

    #[test]
    fn parent_clobber_prefers_non_null_parent() {
        let facts = EphemeralStore::standalone(EntityKind::Facts);
        fact(&facts, 1, "locked", json!(true));
        fact(&facts, 2, "parent_id", json!(1));
        fact(&facts, 2, "locked", json!(false));

        let registry = registry(&[("locked", Inheritance::ParentClobber)]);
        let resolved = FactResolver::new(&facts, &registry).resolve(2).unwrap();
        assert_eq!(resolved["locked"], json!(true));

        assert_eq!(
            merge(Inheritance::ParentClobber, "locked", Some(json!(false)), Value::Null),
            Some(json!(false))
        );
        assert_eq!(
            merge(Inheritance::ParentClobber, "locked", None, Value::Null),
            None
        );
    }

    #[test]
    fn child_clobber_prefers_child_when_present() {
        let facts = EphemeralStore::standalone(EntityKind::Facts);
        fact(&facts, 1, "x", json!(1));
        fact(&facts, 1, "y", json!(1));
        fact(&facts, 2, "parent_id", json!(1));
        fact(&facts, 2, "x", json!(2));

        let registry = registry(&[
            ("x", Inheritance::ChildClobber),
            ("y", Inheritance::ChildClobber),
        ]);
        let resolved = FactResolver::new(&facts, &registry).resolve(2).unwrap();
        assert_eq!(resolved["x"], json!(2));
        assert_eq!(resolved["y"], json!(1));
    }

    #[test]
    fn explicit_null_is_not_absent() {
        assert_eq!(
            merge(Inheritance::ChildClobber, "x", Some(Value::Null), json!(1)),
            Some(Value::Null)
        );
        assert_eq!(
            merge(Inheritance::ChildClobber, "x", None, json!(1)),
            Some(json!(1))
        );
    }

    #[test]
    fn unknown_fact_types_pass_through() {
        let facts = EphemeralStore::standalone(EntityKind::Facts);
        fact(&facts, 1, "mystery", json!("root"));
        fact(&facts, 1, "shadowed", json!("root"));
        fact(&facts, 2, "parent_id", json!(1));
        fact(&facts, 2, "shadowed", json!("leaf"));

        let registry = FactTypeRegistry::new();
        let resolved = FactResolver::new(&facts, &registry).resolve(2).unwrap();
        assert_eq!(resolved["mystery"], json!("root"));
        assert_eq!(resolved["shadowed"], json!("leaf"));
    }

    #[test]
    fn three_level_chain_folds_from_the_root() {
        let facts = EphemeralStore::standalone(EntityKind::Facts);
        fact(&facts, 1, "backends", json!(["a"]));
        fact(&facts, 2, "parent_id", json!("1"));
        fact(&facts, 2, "backends", json!(["b"]));
        fact(&facts, 3, "parent_id", json!(2));
        fact(&facts, 3, "backends", json!(["c", "a"]));

        let registry = FactTypeRegistry::builtin();
        let resolver = FactResolver::new(&facts, &registry);
        assert_eq!(resolver.ancestry(3).unwrap(), vec![3, 2, 1]);
        assert_eq!(resolver.resolve(3).unwrap()["backends"], json!(["a", "b", "c"]));
    }

    #[test]
    fn cycles_stop_the_walk() {
        let facts = EphemeralStore::standalone(EntityKind::Facts);
        fact(&facts, 1, "parent_id", json!(2));
        fact(&facts, 2, "parent_id", json!(1));
        fact(&facts, 1, "color", json!("red"));

        let registry = registry(&[("color", Inheritance::ChildClobber)]);
        let resolver = FactResolver::new(&facts, &registry);
        assert_eq!(resolver.ancestry(1).unwrap(), vec![1, 2]);

        let first = resolver.resolve(1).unwrap();
        assert_eq!(first, resolver.resolve(1).unwrap());
        assert_eq!(first["color"], json!("red"));
        assert_eq!(first["parent_id"], json!(2));
    }

    #[test]
    fn whole_float_parent_id_is_followed() {
        let facts = EphemeralStore::standalone(EntityKind::Facts);
        fact(&facts, 1, "color", json!("red"));
        fact(&facts, 2, "parent_id", json!(1.0));
        fact(&facts, 3, "parent_id", json!(1.5));

        let registry = FactTypeRegistry::builtin();
        let resolver = FactResolver::new(&facts, &registry);
        assert_eq!(resolver.ancestry(2).unwrap(), vec![2, 1]);
        assert_eq!(resolver.resolve(2).unwrap()["color"], json!("red"));
        assert_eq!(resolver.ancestry(3).unwrap(), vec![3]);
    }

    #[test]
    fn node_without_facts_resolves_empty() {
        let facts = EphemeralStore::standalone(EntityKind::Facts);
        let registry = FactTypeRegistry::builtin();
        assert!(FactResolver::new(&facts, &registry).resolve(42).unwrap().is_empty());
    }

    #[test]
    fn registry_loads_from_toml() {
        let registry = FactTypeRegistry::from_toml(
            r#"
            [[facts]]
            name = "chef_server_uri"
            inheritance = "parent_clobber"

            [[facts]]
            name = "backends"
            inheritance = "child_clobber"
            "#,
        )
        .unwrap();
        assert_eq!(
            registry.inheritance("chef_server_uri"),
            Some(Inheritance::ParentClobber)
        );
        assert_eq!(registry.inheritance("backends"), Some(Inheritance::ChildClobber));
        assert_eq!(registry.inheritance("parent_id"), Some(Inheritance::None));
        assert_eq!(registry.len(), 3);

        assert!(FactTypeRegistry::from_toml("[[facts]]\nname = 1").is_err());
    }
}
