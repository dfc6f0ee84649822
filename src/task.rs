//! Task lifecycle state machine.
//!
//! ```text
//! pending → delivered → running → { done | timeout | cancelled }
//! ```
//!
//! The store's write path calls [`stamp_submitted`] once at creation and
//! [`on_state_change`] whenever a write carries a `state` value. `completed` is
//! stamped the first time the state leaves the non-terminal set and never
//! again.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::schema::Record;

/// State of a dispatched task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Pending,
    Delivered,
    Running,
    Done,
    Timeout,
    Cancelled,
}

impl TaskState {
    /// Wire names, in lifecycle order.
    pub const NAMES: &'static [&'static str] =
        &["pending", "delivered", "running", "done", "timeout", "cancelled"];

    pub fn as_str(self) -> &'static str {
        match self {
            TaskState::Pending => "pending",
            TaskState::Delivered => "delivered",
            TaskState::Running => "running",
            TaskState::Done => "done",
            TaskState::Timeout => "timeout",
            TaskState::Cancelled => "cancelled",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "pending" => Some(TaskState::Pending),
            "delivered" => Some(TaskState::Delivered),
            "running" => Some(TaskState::Running),
            "done" => Some(TaskState::Done),
            "timeout" => Some(TaskState::Timeout),
            "cancelled" => Some(TaskState::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskState::Done | TaskState::Timeout | TaskState::Cancelled
        )
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Seconds since the UNIX epoch.
pub fn unix_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}

/// Stamp `submitted` on a freshly built task row, ignoring any caller value.
pub fn stamp_submitted(record: &mut Record, now: i64) {
    record.insert("submitted".into(), Value::from(now));
}

/// Apply the transition rule after `state` has been written.
///
/// Returns `true` when `completed` was stamped by this call.
pub fn on_state_change(record: &mut Record, now: i64) -> bool {
    let non_terminal = record
        .get("state")
        .and_then(Value::as_str)
        .and_then(TaskState::parse)
        .is_some_and(|s| !s.is_terminal());
    let completed_unset = record.get("completed").is_none_or(Value::is_null);

    if !non_terminal && completed_unset {
        record.insert("completed".into(), Value::from(now));
        return true;
    }
    false
}
