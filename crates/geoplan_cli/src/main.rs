//! Operator CLI for the GeoPlan store.
//!
//! # Responsibility
//! - Turn command-line/env input into a `StoreConfig` and logging setup.
//! - Inspect the declared schema, dry-run a sync plan, or apply it.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use geoplan_core::db::open_connection;
use geoplan_core::db::sync::{apply, sync_with, LiveSchema};
use geoplan_core::{platform_schema, SchemaGraph, StoreConfig, SyncOptions};
use log::info;
use std::path::PathBuf;

/// GeoPlan schema tool
#[derive(Parser, Debug)]
#[command(name = "geoplan")]
#[command(version, about = "Inspect and synchronize the GeoPlan database schema")]
struct Args {
    /// SQLite database file; in-memory when omitted
    #[arg(short, long, env = "GEOPLAN_DATABASE", global = true)]
    database: Option<PathBuf>,

    /// Also rebuild foreign keys whose ON DELETE action differs
    #[arg(long, global = true)]
    alter_existing: bool,

    /// trace|debug|info|warn|error
    #[arg(long, env = "GEOPLAN_LOG_LEVEL", global = true)]
    log_level: Option<String>,

    /// Absolute directory for rolling log files; logging is off when omitted
    #[arg(long, env = "GEOPLAN_LOG_DIR", global = true)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    /// List declared entities and relationship edges
    Schema,
    /// Print the steps needed to bring storage up to date
    Plan,
    /// Apply pending steps in one transaction
    Sync,
}

impl From<&Args> for StoreConfig {
    fn from(args: &Args) -> Self {
        let config = match &args.database {
            Some(path) => StoreConfig::file(path),
            None => StoreConfig::in_memory(),
        };
        config
            .with_alter_existing(args.alter_existing)
            .with_sync_on_startup(false)
    }
}

fn main() {
    let args = Args::parse();
    if let Err(err) = run(&args) {
        eprintln!("Error: {err:#}");
        std::process::exit(1);
    }
}

fn log_level(args: &Args) -> &str {
    args.log_level
        .as_deref()
        .unwrap_or_else(|| geoplan_core::default_log_level())
}

fn run(args: &Args) -> Result<()> {
    if let Some(dir) = &args.log_dir {
        let level = log_level(args);
        let dir = dir.to_str().context("log directory must be valid UTF-8")?;
        geoplan_core::init_logging(level, dir)
            .map_err(anyhow::Error::msg)
            .context("failed to initialize logging")?;
    }

    let graph = platform_schema().context("declared schema is inconsistent")?;
    match args.command {
        Command::Schema => {
            print_schema(&graph);
            Ok(())
        }
        Command::Plan | Command::Sync => reconcile(args, &graph),
    }
}

fn reconcile(args: &Args, graph: &SchemaGraph) -> Result<()> {
    let config = StoreConfig::from(args);
    let mut conn = open_connection(&config).context("failed to open database")?;
    let live = LiveSchema::introspect(&conn).context("failed to read live schema")?;
    let plan = sync_with(
        graph,
        &live,
        SyncOptions {
            alter_existing: config.alter_existing,
        },
    );
    print!("{plan}");
    if plan.is_empty() {
        println!();
    }

    if args.command == Command::Sync && !plan.is_empty() {
        let report = apply(&mut conn, graph, &plan).context("sync failed; nothing was applied")?;
        info!(
            "event=cli_sync module=cli status=ok applied={} skipped={}",
            report.applied, report.skipped
        );
        println!("applied {} step(s), skipped {}", report.applied, report.skipped);
    }
    Ok(())
}

fn print_schema(graph: &SchemaGraph) {
    for entity in graph.entities() {
        let kind = if entity.is_associative() {
            "association"
        } else {
            "entity"
        };
        println!("{kind} {}", entity.name);
        for column in &entity.columns {
            let mut flags = Vec::new();
            if !column.nullable {
                flags.push("required");
            }
            if column.unique {
                flags.push("unique");
            }
            if column.managed {
                flags.push("managed");
            }
            println!(
                "  {:<24} {:<10} {}",
                column.name,
                column.ty.label(),
                flags.join(",")
            );
        }
        for edge in graph.foreign_keys(&entity.name) {
            println!(
                "  -> {}.{} references {} on delete {}",
                entity.name, edge.column, edge.target, edge.on_delete
            );
        }
    }
}
