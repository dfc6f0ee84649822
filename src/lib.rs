// thiserror's #[error("...{field}...")] format strings reference struct fields,
// but the compiler doesn't see through the derive macro and reports false positives.
#![allow(unused_assignments)]

//! # opencenter
//!
//! Control-plane data layer for a node orchestration service: managed
//! machines ("nodes"), their inherited configuration ("facts") and local
//! attributes ("attrs"), dispatched work ("tasks"), automation recipes
//! ("adventures") and node-selection expressions ("filters").
//!
//! ## Architecture
//!
//! - **Schema** (`schema`, `model`): static per-entity field tables that drive all validation
//! - **Storage** (`store`): one CRUD contract over an ephemeral (memory) and a persistent (redb) backend
//! - **Inheritance** (`facts`): hierarchical fact resolution with per-key merge policies
//! - **Lifecycle** (`task`, `hooks`): task state stamping and node cascade deletes on the write path
//! - **Filters** (`filter`): parent-chained expression composition
//!
//! ## Library usage
//!
//! ```no_run
//! use opencenter::api::Api;
//! use opencenter::model::EntityKind;
//! use serde_json::json;
//!
//! let api = Api::in_memory().unwrap();
//! let data = json!({"name": "web01"});
//! let node = api
//!     .store(EntityKind::Nodes)
//!     .create(data.as_object().unwrap())
//!     .unwrap();
//! let facts = api.node_facts(node["id"].as_i64().unwrap()).unwrap();
//! assert!(facts.is_empty());
//! ```

pub mod api;
pub mod config;
pub mod error;
pub mod facts;
pub mod filter;
pub mod hooks;
pub mod model;
pub mod schema;
pub mod seeds;
pub mod store;
pub mod task;
