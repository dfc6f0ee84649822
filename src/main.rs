//! opencenter CLI: inspect and edit the control-plane data store.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use miette::{IntoDiagnostic, Result};
use serde_json::Value;

use opencenter::api::Api;
use opencenter::config::ServiceConfig;
use opencenter::model::EntityKind;
use opencenter::schema::Record;
use opencenter::seeds;

#[derive(Parser)]
#[command(name = "opencenter", version, about = "Node orchestration control plane")]
struct Cli {
    /// Config file (defaults to $XDG_CONFIG_HOME/opencenter/opencenter.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Data directory for persistent storage; overrides the config file.
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Keep everything in memory, ignoring any configured data directory.
    #[arg(long, global = true)]
    ephemeral: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the default node tree and canned filters.
    Init,

    /// Print the field schema of an entity.
    Schema { entity: String },

    /// List every record of an entity.
    List { entity: String },

    /// Show one record, with synthesized fields.
    Show { entity: String, id: i64 },

    /// Create a record from a JSON object.
    Create { entity: String, json: String },

    /// Update a record from a JSON object.
    Update { entity: String, id: i64, json: String },

    /// Delete a record (nodes take their facts, attrs and tasks with them).
    Delete { entity: String, id: i64 },

    /// Print the effective facts of a node.
    Facts { node_id: i64 },

    /// Print the composed expression of a filter.
    Expr { filter_id: i64 },

    /// Manage adventures.
    Adventures {
        #[command(subcommand)]
        action: AdventureAction,
    },
}

#[derive(Subcommand)]
enum AdventureAction {
    /// Import `<name>.json` (+ optional `<name>.criteria`) files from a directory.
    Import { dir: PathBuf },
}

fn entity(name: &str) -> Result<EntityKind> {
    EntityKind::from_name(name).ok_or_else(|| miette::miette!("unknown entity \"{name}\""))
}

fn json_object(text: &str) -> Result<Record> {
    match serde_json::from_str(text).into_diagnostic()? {
        Value::Object(map) => Ok(map),
        other => miette::bail!("expected a JSON object, got {other}"),
    }
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value).into_diagnostic()?);
    Ok(())
}

fn main() -> Result<()> {
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .unicode(true)
                .context_lines(3)
                .build(),
        )
    }))
    .ok(); // Ignore error if hook already set (e.g., in tests)

    let cli = Cli::parse();

    let mut config = match cli.config.clone().or_else(ServiceConfig::default_path) {
        Some(path) => ServiceConfig::load_or_default(&path)?,
        None => ServiceConfig::default(),
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_filter)),
        )
        .init();

    if cli.ephemeral {
        config.data_dir = None;
    } else if cli.data_dir.is_some() {
        config.data_dir = cli.data_dir.clone();
    } else if config.data_dir.is_none() {
        config.data_dir = ServiceConfig::default_data_dir();
    }

    let api = Api::open(config.api_config())?;

    match cli.command {
        Commands::Init => {
            let report = seeds::seed_defaults(&api)?;
            if report.nodes == 0 {
                println!("Already initialized.");
            } else {
                println!(
                    "Seeded {} nodes, {} facts, {} attrs, {} filters.",
                    report.nodes, report.facts, report.attrs, report.filters
                );
            }
        }

        Commands::Schema { entity: name } => {
            print_json(&api.store(entity(&name)?).get_schema())?;
        }

        Commands::List { entity: name } => {
            let records = api.get_all_rendered(entity(&name)?)?;
            print_json(&records)?;
        }

        Commands::Show { entity: name, id } => {
            let kind = entity(&name)?;
            match api.get_rendered(kind, id)? {
                Some(record) => print_json(&record)?,
                None => miette::bail!("{kind} id {id} does not exist"),
            }
        }

        Commands::Create { entity: name, json } => {
            let record = api.store(entity(&name)?).create(&json_object(&json)?)?;
            print_json(&record)?;
        }

        Commands::Update {
            entity: name,
            id,
            json,
        } => {
            let record = api.store(entity(&name)?).update(id, &json_object(&json)?)?;
            print_json(&record)?;
        }

        Commands::Delete { entity: name, id } => {
            let kind = entity(&name)?;
            api.store(kind).delete(id)?;
            println!("Deleted {kind} {id}.");
        }

        Commands::Facts { node_id } => {
            print_json(&api.node_facts(node_id)?)?;
        }

        Commands::Expr { filter_id } => match api.filter_full_expr(filter_id)? {
            Some(expr) => println!("{expr}"),
            None => miette::bail!("filters id {filter_id} does not exist"),
        },

        Commands::Adventures {
            action: AdventureAction::Import { dir },
        } => {
            let report = seeds::load_adventures(&api, &dir)?;
            println!(
                "Imported {} adventures ({} already present).",
                report.adventures, report.skipped
            );
        }
    }

    Ok(())
}
