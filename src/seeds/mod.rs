//! Default data: the built-in node tree, canned filters and adventure import.
//!
//! [`seed_defaults`] lays down the three top-level nodes every deployment
//! starts with (`workspace`, with `unprovisioned` and `support` beneath it)
//! plus the canned node filters. [`load_adventures`] imports adventure
//! definitions from a directory of `<name>.json` files, each optionally
//! paired with a `<name>.criteria` expression.

use std::path::{Path, PathBuf};

use miette::Diagnostic;
use serde_json::{Value, json};
use thiserror::Error;

use crate::api::Api;
use crate::model::EntityKind;
use crate::schema::Record;

// ── Errors ──────────────────────────────────────────────────────────────

#[derive(Debug, Error, Diagnostic)]
pub enum SeedError {
    #[error("failed to read seed file: {path}")]
    #[diagnostic(code(opencenter::seed::io), help("Ensure the file exists and is readable."))]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse adventure \"{name}\": {message}")]
    #[diagnostic(
        code(opencenter::seed::parse),
        help("An adventure file must hold a JSON object or list describing its DSL.")
    )]
    Parse { name: String, message: String },

    #[error("failed to apply seed \"{what}\": {message}")]
    #[diagnostic(
        code(opencenter::seed::apply),
        help("Check that the data directory is writable and not already seeded by an older layout.")
    )]
    Apply { what: String, message: String },
}

pub type SeedResult<T> = std::result::Result<T, SeedError>;

/// What a seeding call wrote.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SeedReport {
    pub nodes: usize,
    pub facts: usize,
    pub attrs: usize,
    pub filters: usize,
    pub adventures: usize,
    /// Entries skipped because they were already present.
    pub skipped: usize,
}

// ── Default tree ────────────────────────────────────────────────────────

const WORKSPACE: &str = "workspace";

/// Name and display name of each default node, root first.
const DEFAULT_NODES: &[(&str, &str)] = &[
    (WORKSPACE, "Workspace"),
    ("unprovisioned", "Available Nodes"),
    ("support", "Service Nodes"),
];

const SCHEMA_VERSION: i64 = 1;

fn canned_filters() -> [Value; 3] {
    [
        json!({
            "name": "unprovisioned nodes",
            "filter_type": "node",
            "expr": "backend='unprovisioned'",
        }),
        json!({
            "name": "chef client nodes",
            "filter_type": "node",
            "expr": "backend='chef-client'",
        }),
        json!({
            "name": "chef-server",
            "filter_type": "interface",
            "expr": "facts.chef_server_uri != None and facts.chef_server_pem != None",
        }),
    ]
}

fn record(value: Value) -> Record {
    match value {
        Value::Object(map) => map,
        _ => Record::new(),
    }
}

fn create(api: &Api, kind: EntityKind, what: &str, data: Value) -> SeedResult<Record> {
    api.store(kind)
        .create(&record(data))
        .map_err(|e| SeedError::Apply {
            what: what.to_string(),
            message: e.to_string(),
        })
}

/// Create the default nodes, their facts and attrs, and the canned filters.
///
/// Does nothing when a `workspace` node already exists.
pub fn seed_defaults(api: &Api) -> SeedResult<SeedReport> {
    let existing = api
        .store(EntityKind::Nodes)
        .filter(&record(json!({ "name": WORKSPACE })))
        .map_err(|e| SeedError::Apply {
            what: WORKSPACE.into(),
            message: e.to_string(),
        })?;
    if !existing.is_empty() {
        tracing::info!("default nodes already present, skipping seed");
        return Ok(SeedReport {
            skipped: 1,
            ..SeedReport::default()
        });
    }

    let mut report = SeedReport::default();
    for filter in canned_filters() {
        let name = filter["name"].as_str().unwrap_or("filter").to_string();
        create(api, EntityKind::Filters, &name, filter)?;
        report.filters += 1;
    }

    let mut workspace_id: Option<Value> = None;
    for (name, display) in DEFAULT_NODES {
        let node = create(api, EntityKind::Nodes, name, json!({ "name": name }))?;
        let id = node.get("id").cloned().unwrap_or(Value::Null);
        report.nodes += 1;

        match workspace_id.clone() {
            None => {
                create(
                    api,
                    EntityKind::Attrs,
                    "json_schema_version",
                    json!({ "node_id": id, "key": "json_schema_version", "value": SCHEMA_VERSION }),
                )?;
                report.attrs += 1;
                workspace_id = Some(id.clone());
            }
            Some(parent) => {
                create(
                    api,
                    EntityKind::Facts,
                    "parent_id",
                    json!({ "node_id": id, "key": "parent_id", "value": parent }),
                )?;
                report.facts += 1;
            }
        }

        create(
            api,
            EntityKind::Facts,
            "backends",
            json!({ "node_id": id, "key": "backends", "value": ["container", "node"] }),
        )?;
        create(
            api,
            EntityKind::Attrs,
            "display_name",
            json!({ "node_id": id, "key": "display_name", "value": display }),
        )?;
        create(
            api,
            EntityKind::Attrs,
            "locked",
            json!({ "node_id": id, "key": "locked", "value": true }),
        )?;
        report.facts += 1;
        report.attrs += 2;
    }

    tracing::info!(
        nodes = report.nodes,
        facts = report.facts,
        attrs = report.attrs,
        filters = report.filters,
        "seeded default data"
    );
    Ok(report)
}

// ── Adventures ──────────────────────────────────────────────────────────

fn read(path: &Path) -> SeedResult<String> {
    std::fs::read_to_string(path).map_err(|e| SeedError::Io {
        path: path.display().to_string(),
        source: e,
    })
}

/// Import every `<name>.json` adventure in `dir`, sorted by file name.
///
/// The criteria come from `<name>.criteria` when present and default to
/// `"true"`. Adventures whose name is already taken are skipped.
pub fn load_adventures(api: &Api, dir: &Path) -> SeedResult<SeedReport> {
    let entries = std::fs::read_dir(dir).map_err(|e| SeedError::Io {
        path: dir.display().to_string(),
        source: e,
    })?;
    let mut files: Vec<PathBuf> = entries
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
        .collect();
    files.sort();

    let adventures = api.store(EntityKind::Adventures);
    let mut report = SeedReport::default();
    for path in files {
        let Some(name) = path.file_stem().and_then(|s| s.to_str()).map(str::to_string) else {
            continue;
        };

        let taken = adventures
            .filter(&record(json!({ "name": name })))
            .map_err(|e| SeedError::Apply {
                what: name.clone(),
                message: e.to_string(),
            })?;
        if !taken.is_empty() {
            tracing::debug!(adventure = %name, "adventure already present");
            report.skipped += 1;
            continue;
        }

        let dsl: Value = serde_json::from_str(&read(&path)?).map_err(|e| SeedError::Parse {
            name: name.clone(),
            message: e.to_string(),
        })?;
        let criteria_path = path.with_extension("criteria");
        let criteria = if criteria_path.is_file() {
            read(&criteria_path)?.trim().to_string()
        } else {
            "true".to_string()
        };

        create(
            api,
            EntityKind::Adventures,
            &name,
            json!({ "name": name, "dsl": dsl, "criteria": criteria }),
        )?;
        report.adventures += 1;
    }

    tracing::info!(
        dir = %dir.display(),
        imported = report.adventures,
        skipped = report.skipped,
        "loaded adventures"
    );
    Ok(report)
}
