//! Write-path side effects, invoked explicitly by both store backends.
//!
//! - [`on_before_delete`] names the dependent rows a delete must remove in
//!   the same unit of work (nodes own their facts, attrs and tasks).
//! - [`on_create`] and [`on_after_state_change`] run the task lifecycle.

use crate::model::EntityKind;
use crate::schema::Record;
use crate::task;

/// Rows of `target` whose `column` equals the deleted id go with it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CascadeRule {
    pub target: EntityKind,
    pub column: &'static str,
}

const NODE_CASCADE: &[CascadeRule] = &[
    CascadeRule {
        target: EntityKind::Facts,
        column: "node_id",
    },
    CascadeRule {
        target: EntityKind::Attrs,
        column: "node_id",
    },
    CascadeRule {
        target: EntityKind::Tasks,
        column: "node_id",
    },
];

pub fn on_before_delete(kind: EntityKind) -> &'static [CascadeRule] {
    match kind {
        EntityKind::Nodes => NODE_CASCADE,
        _ => &[],
    }
}

/// Runs on a fully built row before it is first persisted.
pub fn on_create(kind: EntityKind, record: &mut Record, now: i64) {
    if kind == EntityKind::Tasks {
        task::stamp_submitted(record, now);
        on_after_state_change(kind, record, now);
    }
}

/// Runs after an update wrote a `state` value into `record`.
pub fn on_after_state_change(kind: EntityKind, record: &mut Record, now: i64) {
    if kind == EntityKind::Tasks && task::on_state_change(record, now) {
        tracing::debug!(
            task = record.get("id").and_then(|v| v.as_i64()),
            state = record.get("state").and_then(|v| v.as_str()),
            completed = now,
            "task reached terminal state"
        );
    }
}
