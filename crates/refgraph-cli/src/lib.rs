// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! refgraph developer CLI.
//!
//! Replays JSON-lines operation logs against a set of schema declarations and
//! prints the resulting entity store, the references into or out of an entity,
//! or the schema reference map.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use refgraph_config_fs::FsConfigStore;
use refgraph_core::config::{ConfigService, GraphConfig};
use refgraph_core::{Dispatcher, EntityKey, Operation, Reference, State};
use serde_json::{json, Value};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

/// Top-level command line.
#[derive(Parser, Debug)]
#[command(name = "refgraph")]
#[command(version, about = "Normalized entity graph tooling")]
pub struct Cli {
    /// Where schema declarations come from.
    #[command(flatten)]
    pub source: SchemaSource,
    /// Subcommand to run.
    #[command(subcommand)]
    pub command: Commands,
}

/// Schema declaration source: an explicit file, or the config store.
#[derive(Args, Debug, Clone, Default)]
pub struct SchemaSource {
    /// JSON file holding `{ "schemas": [...] }`.
    #[arg(long, global = true)]
    pub schemas: Option<PathBuf>,
    /// Config directory to read (or save) declarations from, instead of the
    /// platform default.
    #[arg(long, global = true)]
    pub config_dir: Option<PathBuf>,
}

/// Subcommands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Replay an operation log and print the entity store as JSON
    Apply {
        /// Path to a JSON-lines operation log
        ops: PathBuf,
        /// Verify the reference index against a full rebuild
        #[arg(long)]
        check: bool,
        /// Print the BLAKE3 digest of the final store instead of the store
        #[arg(long)]
        digest: bool,
    },
    /// Replay an operation log and print the references into one entity
    Refs {
        /// Path to a JSON-lines operation log
        ops: PathBuf,
        /// Target entity as `schema:id`
        #[arg(long)]
        target: EntityKey,
        /// List the references the entity holds instead of those pointing at it
        #[arg(long)]
        outgoing: bool,
    },
    /// Print the per-schema reference fields
    Schemas {
        /// Persist the declarations into the config store
        #[arg(long)]
        save: bool,
        /// Only list the fields whose references land on this schema
        #[arg(long)]
        target: Option<String>,
    },
}

/// Parses the process arguments, installs logging and runs the command.
pub fn entrypoint() -> Result<String> {
    init_tracing()?;
    run(&Cli::parse())
}

/// Installs a stderr `fmt` subscriber; `RUST_LOG` overrides the `warn` default.
pub fn init_tracing() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|err| anyhow!(err))
}

/// Runs `cli` and returns what should be written to stdout.
pub fn run(cli: &Cli) -> Result<String> {
    match &cli.command {
        Commands::Apply { ops, check, digest } => {
            let state = replay(&cli.source, ops)?;
            if *check {
                state
                    .check_integrity()
                    .context("reference index does not match the entity store")?;
                info!("integrity check passed");
            }
            let store = state.schema_entities();
            if *digest {
                let hash = store.canonical_hash().context("failed to hash entity store")?;
                return Ok(format!("{}\n", hex::encode(hash)));
            }
            let mut out = serde_json::to_string_pretty(store)?;
            out.push('\n');
            Ok(out)
        }
        Commands::Refs {
            ops,
            target,
            outgoing,
        } => {
            let state = replay(&cli.source, ops)?;
            if state.schemas().get(&target.schema).is_none() {
                bail!("unknown schema `{}`", target.schema);
            }
            let index = state.entity_references();
            let refs: Vec<&Reference> = if *outgoing {
                index.references_from(target).collect()
            } else {
                index.references_to(target).values().collect()
            };
            debug!(entity = %target, outgoing, count = refs.len(), "collected references");
            let mut out = serde_json::to_string_pretty(&refs)?;
            out.push('\n');
            Ok(out)
        }
        Commands::Schemas { save, target } => {
            let config = load_config(&cli.source)?;
            let state = State::new(config.registry()?);
            if *save {
                let service = ConfigService::new(open_store(&cli.source)?);
                service.save_graph_config(&config)?;
                info!(count = config.schemas.len(), "saved schema declarations");
            }
            let map = state.schema_references();
            let mut out = match target {
                Some(target) => {
                    if state.schemas().get(target).is_none() {
                        bail!("unknown schema `{target}`");
                    }
                    let fields: Vec<Value> = map
                        .fields_targeting(target)
                        .map(|(schema, field)| {
                            json!({
                                "schema": schema,
                                "field": field.field,
                                "cardinality": field.cardinality,
                            })
                        })
                        .collect();
                    serde_json::to_string_pretty(&fields)?
                }
                None => serde_json::to_string_pretty(map)?,
            };
            out.push('\n');
            Ok(out)
        }
    }
}

fn open_store(source: &SchemaSource) -> Result<FsConfigStore> {
    let store = match &source.config_dir {
        Some(dir) => FsConfigStore::at(dir),
        None => FsConfigStore::new(),
    };
    store.context("failed to open config store")
}

fn load_config(source: &SchemaSource) -> Result<GraphConfig> {
    if let Some(path) = &source.schemas {
        let bytes = fs::read(path)
            .with_context(|| format!("failed to read schemas from {}", path.display()))?;
        return serde_json::from_slice(&bytes)
            .with_context(|| format!("failed to parse schemas in {}", path.display()));
    }
    let service = ConfigService::new(open_store(source)?);
    service
        .load_graph_config()
        .context("no schema declarations; pass --schemas or save them with `refgraph schemas --save`")
}

/// Reads a JSON-lines operation log; blank lines are skipped.
pub fn read_operations(path: &Path) -> Result<Vec<Operation>> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read operations from {}", path.display()))?;
    text.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(n, line)| {
            serde_json::from_str(line)
                .with_context(|| format!("{}:{}: malformed operation", path.display(), n + 1))
        })
        .collect()
}

fn replay(source: &SchemaSource, ops_path: &Path) -> Result<Arc<State>> {
    let config = load_config(source)?;
    let ops = read_operations(ops_path)?;
    let mut dispatcher = Dispatcher::new(State::new(config.registry()?));
    let state = dispatcher.dispatch_all(&ops).map_err(|(position, err)| {
        anyhow::Error::new(err).context(format!("operation {} rejected", position + 1))
    })?;
    info!(operations = ops.len(), entities = state.schema_entities().len(), "replayed log");
    Ok(state)
}
