//! Composition of parent-chained filter expressions.

use std::collections::HashSet;

use serde_json::Value;

use crate::schema::Record;
use crate::store::{Store, StoreResult};

/// Builds a filter's `full_expr` by walking its `parent_id` chain.
pub struct FilterChain<'a> {
    filters: &'a dyn Store,
}

fn parent_id(record: &Record) -> Option<i64> {
    match record.get("parent_id") {
        Some(Value::Number(n)) => n.as_i64().filter(|id| *id != 0),
        _ => None,
    }
}

fn expr(record: &Record) -> String {
    record
        .get("expr")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

impl<'a> FilterChain<'a> {
    pub fn new(filters: &'a dyn Store) -> Self {
        Self { filters }
    }

    /// `expr` for a root filter, otherwise `"(expr) and (<parent full_expr>)"`.
    ///
    /// A parent that does not exist, or one already visited on this walk,
    /// ends the chain there.
    pub fn full_expr(&self, record: &Record) -> StoreResult<String> {
        let mut exprs = vec![expr(record)];
        let mut visited: HashSet<i64> = record
            .get("id")
            .and_then(Value::as_i64)
            .into_iter()
            .collect();
        let mut next = parent_id(record);

        while let Some(id) = next {
            if !visited.insert(id) {
                tracing::warn!(filter = id, "cycle in filter parents, stopping walk");
                break;
            }
            let Some(parent) = self.filters.get(id)? else {
                tracing::warn!(filter = id, "filter parent does not exist");
                break;
            };
            exprs.push(expr(&parent));
            next = parent_id(&parent);
        }

        let mut exprs = exprs.into_iter().rev();
        let mut full = exprs.next().unwrap_or_default();
        for inner in exprs {
            full = format!("({inner}) and ({full})");
        }
        Ok(full)
    }

    pub fn full_expr_by_id(&self, id: i64) -> StoreResult<Option<String>> {
        self.filters
            .get(id)?
            .map(|record| self.full_expr(&record))
            .transpose()
    }
}
