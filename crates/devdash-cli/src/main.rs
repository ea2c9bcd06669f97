//! Devdash CLI
//!
//! Command-line access to the worktree mapping relations:
//! - Listing committed memberships (`show`)
//! - Staging toggles and saving them as one batch (`apply`)
//! - Describing the relation catalog (`relations`)

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use devdash_mapping::catalog::{worktree_apps, worktree_pipelines, worktree_services};
use devdash_mapping::{EntityId, MappingEditor, Relation, RelationStore};
use devdash_storage::{open_backend, Backend, BackendConfig, StoreSpec};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod output;

#[derive(Parser)]
#[command(name = "devdash")]
#[command(author, version, about = "Devdash: worktree ↔ app/pipeline/service mappings")]
struct Cli {
    /// Backend holding the relations: postgrest | memory | file:PATH
    #[arg(long, global = true, value_name = "STORE")]
    store: Option<StoreSpec>,
    /// JSON config file (`store`, `postgrest.url`, `postgrest.api_key`, `postgrest.timeout_secs`)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Log at debug level (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print committed memberships grouped by worktree
    Show {
        relation: RelationKind,
        /// Only this worktree
        #[arg(long)]
        left: Option<String>,
    },

    /// Stage toggles and save them in one batch
    Apply {
        relation: RelationKind,
        /// Pair to flip, as LEFT=RIGHT (may be repeated)
        #[arg(long = "toggle", value_name = "LEFT=RIGHT", required = true)]
        toggles: Vec<String>,
        /// Print the plan without writing anything
        #[arg(long)]
        dry_run: bool,
    },

    /// List the known relations and their tables
    Relations,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum RelationKind {
    Apps,
    Pipelines,
    Services,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Commands::Relations = cli.command {
        output::print_catalog();
        return Ok(ExitCode::SUCCESS);
    }

    let mut config = match &cli.config {
        Some(path) => BackendConfig::load(path)?,
        None => BackendConfig::default(),
    }
    .with_env();
    if let Some(store) = cli.store {
        config.store = store;
    }
    let backend = Arc::new(open_backend(&config)?);
    tracing::debug!(backend = backend.kind(), "store opened");

    let ok = match cli.command {
        Commands::Show { relation, left } => {
            dispatch_show(relation, backend, left.as_deref()).await?;
            true
        }
        Commands::Apply {
            relation,
            toggles,
            dry_run,
        } => dispatch_apply(relation, backend, &toggles, dry_run).await?,
        Commands::Relations => true,
    };
    Ok(if ok { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn dispatch_show(kind: RelationKind, backend: Arc<Backend>, left: Option<&str>) -> Result<()> {
    match kind {
        RelationKind::Apps => cmd_show(worktree_apps(), backend, left).await,
        RelationKind::Pipelines => cmd_show(worktree_pipelines(), backend, left).await,
        RelationKind::Services => cmd_show(worktree_services(), backend, left).await,
    }
}

async fn dispatch_apply(
    kind: RelationKind,
    backend: Arc<Backend>,
    toggles: &[String],
    dry_run: bool,
) -> Result<bool> {
    match kind {
        RelationKind::Apps => cmd_apply(worktree_apps(), backend, toggles, dry_run).await,
        RelationKind::Pipelines => cmd_apply(worktree_pipelines(), backend, toggles, dry_run).await,
        RelationKind::Services => cmd_apply(worktree_services(), backend, toggles, dry_run).await,
    }
}

// ============================================================================
// Commands
// ============================================================================

async fn cmd_show<L: EntityId, R: EntityId>(
    relation: Relation<L, R>,
    store: Arc<dyn RelationStore<L, R>>,
    left: Option<&str>,
) -> Result<()> {
    let only = left
        .map(|text| parse_entity::<L>(relation.left_column(), text))
        .transpose()?;

    let editor = MappingEditor::new(relation, store);
    editor.load().await?;

    let tuples: Vec<_> = editor
        .committed()
        .into_iter()
        .filter(|t| only.as_ref().map_or(true, |l| &t.left == l))
        .collect();
    output::print_membership(editor.relation(), &tuples);
    Ok(())
}

/// Returns `false` when any write or the refetch failed.
async fn cmd_apply<L: EntityId, R: EntityId>(
    relation: Relation<L, R>,
    store: Arc<dyn RelationStore<L, R>>,
    toggles: &[String],
    dry_run: bool,
) -> Result<bool> {
    let editor = MappingEditor::new(relation, store);
    editor.load().await?;

    let mut rejected = 0usize;
    for raw in toggles {
        match stage(&editor, raw) {
            Ok(()) => {}
            Err(err) => {
                rejected += 1;
                tracing::warn!(toggle = %raw, error = %err, "toggle skipped");
                eprintln!("{} {raw}: {err}", "skipped".yellow().bold());
            }
        }
    }

    let plan = editor.plan();
    output::print_plan(editor.relation(), &plan);
    if dry_run || plan.is_empty() {
        return Ok(rejected == 0);
    }

    match editor.save().await {
        Ok(report) => {
            tracing::info!(
                relation = %report.relation,
                inserted = report.inserted.len(),
                deleted = report.deleted.len(),
                failed = report.failures.len(),
                "save finished"
            );
            output::print_report(&report);
            Ok(rejected == 0 && report.is_success())
        }
        Err(err) => {
            tracing::warn!(relation = %editor.relation().name(), error = %err, "save failed");
            if let Some(report) = err.report() {
                output::print_report(report);
            }
            eprintln!("{} {err}", "error:".red().bold());
            Ok(false)
        }
    }
}

// ============================================================================
// Parsing
// ============================================================================

fn stage<L: EntityId, R: EntityId>(editor: &MappingEditor<L, R>, raw: &str) -> Result<()> {
    let (left, right) = split_toggle(raw)?;
    let relation = editor.relation();
    let left = parse_entity::<L>(relation.left_column(), left)?;
    let right = parse_entity::<R>(relation.right_column(), right)?;
    editor.toggle(left, right)?;
    Ok(())
}

/// Split `LEFT=RIGHT` at the first `=`.
fn split_toggle(raw: &str) -> Result<(&str, &str)> {
    let (left, right) = raw
        .split_once('=')
        .ok_or_else(|| anyhow!("expected LEFT=RIGHT, got `{raw}`"))?;
    Ok((left.trim(), right.trim()))
}

fn parse_entity<T: EntityId>(column: &str, text: &str) -> Result<T> {
    let value: T = text
        .parse()
        .map_err(|_| anyhow!("{column}: `{text}` is not a valid id"))?;
    value.validate().map_err(|err| anyhow!("{column}: {err}"))?;
    Ok(value)
}
