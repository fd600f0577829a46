//! Litemodel CLI - inspect and query a litemodel database

use clap::{Parser, Subcommand};
use litemodel::config::{default_config_path, load_config, write_config};
use litemodel::{ui, DbConfig, SqliteDb};
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const LIST_TABLES: &str = "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name";

#[derive(Parser)]
#[command(name = "litemodel")]
#[command(version)]
#[command(about = "Typed models over an embedded SQLite store")]
#[command(long_about = r#"
Inspect a litemodel database from the shell.

Example usage:
  litemodel init --database ./data/app.db
  litemodel tables
  litemodel query "SELECT * FROM users WHERE age >= 18" --json
  litemodel exec "DELETE FROM sessions WHERE expired == 1"
"#)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to the config file (defaults to ./litemodel.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Database file, overrides the config file
    #[arg(short, long, global = true)]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a config file with default settings
    Init {
        /// Overwrite an existing config file
        #[arg(short, long)]
        force: bool,
    },

    /// List the tables in the database
    Tables,

    /// Run a read query and print the rows
    Query {
        /// SQL to run
        sql: String,

        /// Print rows as JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Run a mutating statement through the writer
    Exec {
        /// SQL to run
        sql: String,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let config_path = cli.config.clone().unwrap_or_else(default_config_path);
    let mut config = load_config(Some(&config_path))?.unwrap_or_default();
    if let Some(database) = cli.database {
        config.database = database;
    }

    match cli.command {
        Commands::Init { force } => {
            write_config(&config_path, &config, force)?;
            ui::success(&format!("Wrote {}", config_path.display()));
            ui::info("database", &config.database.display().to_string());
        }

        Commands::Tables => {
            let db = open(config)?;
            let rows = db.select(LIST_TABLES)?;
            if rows.is_empty() {
                ui::warn("No tables");
                return Ok(());
            }
            ui::header(&format!("{} table(s) in {}", rows.len(), db.config().database.display()));
            for row in &rows {
                if let Some(name) = row.get("name") {
                    println!("  {}", ui::table::cell(name));
                }
            }
        }

        Commands::Query { sql, json } => {
            let db = open(config)?;
            let rows = db.select(&sql)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&ui::rows_json(&rows))?);
            } else if rows.is_empty() {
                println!("{}", ui::dim("(no rows)"));
            } else {
                println!("{}", ui::rows_table(&rows));
                println!("{}", ui::dim(&format!("{} row(s)", rows.len())));
            }
        }

        Commands::Exec { sql } => {
            let db = open(config)?;
            match db.execute(&sql, Vec::new()) {
                Ok(changed) => ui::success(&format!("{} row(s) changed", changed)),
                Err(e) => {
                    ui::error(&e.to_string());
                    return Err(e.into());
                }
            }
        }
    }

    Ok(())
}

fn open(config: DbConfig) -> anyhow::Result<SqliteDb> {
    tracing::debug!(database = %config.database.display(), "opening database");
    Ok(SqliteDb::open(config)?)
}
