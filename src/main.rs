//! Connector CLI - inspect and maintain the feedback-analytics database

use anyhow::Context;
use clap::{Parser, Subcommand};
use connector::config::{self, ConnectorConfig};
use connector::ui::{self, Icons};
use connector::{AssociationTable, Filters, Record, Store};
use std::path::PathBuf;
use std::str::FromStr;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "connector")]
#[command(version)]
#[command(about = "Relational core of the feedback-analytics platform")]
#[command(long_about = r#"
Connector owns the relational store behind the feedback-analytics platform:
projects, users, feedback, conversational messages, issues, topics, rules,
datasets and reports.

Example usage:
  connector init
  connector stats
  connector find --table feedbacks --filters '{"source": {"value": "slack"}}'
  connector link --table users_projects --set user_id=1 --set project_id=2
  connector remap --table topics_userMessages --column topic_id --from 7 --to 3
  connector export --id 4
  connector customers --id 12
"#)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to the config file (defaults to ./connector.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Path to the database file (overrides the config)
    #[arg(short, long, global = true)]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a config file and create the schema
    Init {
        /// Overwrite an existing config file
        #[arg(long)]
        force: bool,
    },

    /// Show row counts for every table
    Stats,

    /// List rows of a table matching JSON filters
    Find {
        /// Entity table name, e.g. `feedbacks`
        #[arg(short, long)]
        table: String,

        /// Filters as JSON: {"field": {"operator": ">=", "value": 4}}
        #[arg(short, long)]
        filters: Option<String>,

        /// Print rows as JSON
        #[arg(long)]
        json: bool,
    },

    /// Link two rows through an association table
    Link {
        /// Association table name, e.g. `users_projects`
        #[arg(short, long)]
        table: String,

        /// Edge column assignment, `column=id`; give one per side
        #[arg(long = "set", value_parser = parse_assignment, required = true)]
        set: Vec<(String, i64)>,
    },

    /// Move every edge from one id to another (entity merge)
    Remap {
        #[arg(short, long)]
        table: String,

        /// Edge column to rewrite
        #[arg(long)]
        column: String,

        #[arg(long)]
        from: i64,

        #[arg(long)]
        to: i64,
    },

    /// Print a dataset with its messages as JSON
    Export {
        /// Dataset id
        #[arg(long)]
        id: i64,
    },

    /// Read the customer table configured under [customer_table]
    Customers {
        /// Only the row with this id
        #[arg(long)]
        id: Option<i64>,

        /// Print rows as JSON
        #[arg(long)]
        json: bool,
    },
}

fn parse_assignment(s: &str) -> Result<(String, i64), String> {
    let (column, id) = s
        .split_once('=')
        .ok_or_else(|| format!("expected column=id, got '{}'", s))?;
    let id = id
        .trim()
        .parse::<i64>()
        .map_err(|e| format!("invalid id in '{}': {}", s, e))?;
    Ok((column.trim().to_string(), id))
}

fn resolve_config(cli: &Cli) -> anyhow::Result<ConnectorConfig> {
    let mut config = config::load_config(cli.config.as_deref())?.unwrap_or_default();
    config.apply_env();
    if let Some(db) = &cli.database {
        config.database = Some(db.display().to_string());
    }
    Ok(config)
}

fn open_store(config: &ConnectorConfig) -> anyhow::Result<Store> {
    let path = config.database_path();
    config::ensure_db_dir(&path)?;
    Store::open_with(&path, config.store_options())
        .with_context(|| format!("failed to open database at {}", path.display()))
}

fn main() {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    if let Err(e) = run(cli) {
        ui::error(&format!("{:#}", e));
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let config = resolve_config(&cli)?;

    match cli.command {
        Commands::Init { force } => {
            let config_path = cli.config.clone().unwrap_or_else(config::default_config_path);
            let mut written = config.clone();
            written.database = Some(config.database_path().display().to_string());
            config::write_config(&config_path, &written, force)?;

            let store = open_store(&written)?;
            let tables = store.schema().entities().count() + store.schema().associations().len();
            ui::success(&format!("Wrote {}", config_path.display()));
            ui::info("Database", &written.database_path().display().to_string());
            ui::info("Tables", &tables.to_string());
        }

        Commands::Stats => {
            let store = open_store(&config)?;
            let stats = store.stats()?;

            ui::header(
                Icons::STATS,
                &format!("Connector Statistics ({})", config.database_path().display()),
            );
            println!("{}", ui::stats_table(&stats.tables));
            ui::summary_row(
                "Connections:",
                &format!("{} ({} idle)", stats.connections, stats.idle_connections),
            );
        }

        Commands::Find { table, filters, json } => {
            let store = open_store(&config)?;
            let filters = match filters {
                Some(raw) => Filters::from_json(&raw)?,
                None => Filters::new(),
            };
            let records = store.read(|uow| uow.find_records(&table, &filters))?;
            print_records(&table, &records, json)?;
        }

        Commands::Link { table, set } => {
            let table = AssociationTable::from_str(&table)?;
            let columns: Vec<(&str, i64)> = set.iter().map(|(c, id)| (c.as_str(), *id)).collect();
            let inserted = store_transaction(&config, |uow| uow.insert_edge_if_absent(table, &columns))?;

            if inserted {
                ui::success(&format!("{} Linked in {}", Icons::LINK, table));
            } else {
                ui::info(table.as_str(), "edge already present");
            }
        }

        Commands::Remap { table, column, from, to } => {
            let table = AssociationTable::from_str(&table)?;
            let outcome =
                store_transaction(&config, |uow| uow.remap_edges(table, &column, Some(from), Some(to)))?;

            ui::success(&format!("{} Remapped {}.{}: {} -> {}", Icons::MERGE, table, column, from, to));
            ui::summary_row("Rewritten:", &outcome.rewritten.to_string());
            ui::summary_row("Collapsed:", &outcome.collapsed.to_string());
        }

        Commands::Export { id } => {
            let store = open_store(&config)?;
            let export = store
                .read(|uow| uow.export_dataset(id))?
                .with_context(|| format!("no dataset with id {}", id))?;
            println!("{}", serde_json::to_string_pretty(&export)?);
        }

        Commands::Customers { id, json } => {
            let mapping = config
                .customer_table
                .as_ref()
                .context("no [customer_table] section in the config")?
                .build()?;
            let store = open_store(&config)?;
            let records = match id {
                Some(id) => store
                    .read(|uow| uow.read_mapped_by_id(&mapping, id))?
                    .into_iter()
                    .collect(),
                None => store.read(|uow| uow.read_all_mapped(&mapping))?,
            };
            print_records(mapping.table(), &records, json)?;
        }
    }

    Ok(())
}

fn print_records(table: &str, records: &[Record], json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(records)?);
    } else if records.is_empty() {
        ui::warn(&format!("No rows in {} matched", table));
    } else {
        ui::header(Icons::MAG, &format!("{} ({} rows)", table, records.len()));
        println!("{}", ui::records_table(records));
    }
    Ok(())
}

fn store_transaction<T>(
    config: &ConnectorConfig,
    f: impl FnOnce(&mut connector::UnitOfWork) -> connector::Result<T>,
) -> anyhow::Result<T> {
    let store = open_store(config)?;
    Ok(store.transaction(f)?)
}
