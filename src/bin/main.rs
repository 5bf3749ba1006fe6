//! dbnexus CLI - query databases and manage driver agents
//!
//! Usage:
//!   dbnexus drivers list
//!   dbnexus drivers install <engine> [--url <url>]
//!   dbnexus query <connection> <sql> [--database <name>]
//!   dbnexus tables <connection>
//!
//! `<connection>` is a saved connection name from the config file, `env`
//! for the `DBNEXUS_DB_*` variables, or a path to a SQLite file.
//!
//! Examples:
//!   dbnexus query ./data/app.db "SELECT * FROM users LIMIT 5"
//!   dbnexus drivers install duckdb
//!   dbnexus columns reporting orders --database sales

use clap::{Parser, Subcommand};
use dbnexus::config::{ConnectionConfig, Settings};
use dbnexus::provision::{ChannelSink, ProgressStatus, TracingSink};
use dbnexus::{logging, Backend};
use serde::Serialize;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "dbnexus")]
#[command(about = "dbnexus - one interface over many database engines")]
#[command(version)]
struct Cli {
    /// Config file (defaults to ./dbnexus.toml or the user config dir)
    #[arg(long, global = true, env = "DBNEXUS_CONFIG")]
    config: Option<PathBuf>,

    /// Driver root directory
    #[arg(long, global = true)]
    driver_root: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage driver agents
    Drivers {
        #[command(subcommand)]
        command: DriverCommands,
    },

    /// Run a statement and print rows or the affected row count
    Query {
        connection: String,
        sql: String,
        #[arg(short, long, default_value = "")]
        database: String,
    },

    /// List databases
    Databases { connection: String },

    /// List tables
    Tables {
        connection: String,
        #[arg(short, long, default_value = "")]
        database: String,
    },

    /// Describe a table's columns
    Columns {
        connection: String,
        table: String,
        #[arg(short, long, default_value = "")]
        database: String,
    },

    /// Print a table's CREATE statement
    Ddl {
        connection: String,
        table: String,
        #[arg(short, long, default_value = "")]
        database: String,
    },
}

#[derive(Subcommand)]
enum DriverCommands {
    /// Show every engine and whether it can connect
    List {
        /// Manifest address (http(s) URL, file, or builtin://manifest)
        #[arg(long, default_value = "")]
        manifest: String,
    },

    /// Install an optional engine's driver agent
    Install {
        engine: String,
        /// Download URL tried before the release assets
        #[arg(long, default_value = "")]
        url: String,
        #[arg(long, default_value = "")]
        manifest: String,
    },

    /// Install a driver agent executable from a local file
    InstallLocal { engine: String, file: PathBuf },

    /// Remove an installed driver agent
    Remove { engine: String },

    /// Show the URL an install would try first
    Url {
        engine: String,
        #[arg(long, default_value = "")]
        manifest: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let settings = match load_settings(cli.config.as_ref()) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };
    logging::init(&settings.logging);

    let backend = match Backend::from_settings(&settings) {
        Ok(b) => b,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };
    if let Some(root) = &cli.driver_root {
        if let Err(e) = backend.drivers.configure_driver_root(root) {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    }

    let code = match cli.command {
        Commands::Drivers { command } => cmd_drivers(&backend, command).await,
        command => cmd_database(&backend, &settings, command).await,
    };
    backend.shutdown().await;
    code
}

fn load_settings(path: Option<&PathBuf>) -> Result<Settings, dbnexus::SettingsError> {
    match path {
        Some(path) => Settings::from_file(path),
        None => Settings::load(),
    }
}

/// Resolve a connection argument: saved name, `env`, or a SQLite path.
fn resolve_connection(settings: &Settings, name: &str) -> Result<ConnectionConfig, String> {
    if settings.connections.contains_key(name) {
        return settings.connection(name).map_err(|e| e.to_string());
    }
    if name == "env" {
        return ConnectionConfig::from_env().map_err(|e| e.to_string());
    }
    Ok(ConnectionConfig::sqlite(name))
}

fn print_json<T: Serialize>(value: &T) -> ExitCode {
    match serde_json::to_string_pretty(value) {
        Ok(json) => {
            println!("{}", json);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn report<T: Serialize, E: std::fmt::Display>(result: Result<T, E>) -> ExitCode {
    match result {
        Ok(value) => print_json(&value),
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn cmd_drivers(backend: &Backend, command: DriverCommands) -> ExitCode {
    let drivers = &backend.drivers;
    match command {
        DriverCommands::List { manifest } => print_json(&drivers.status_list(&manifest).await),
        DriverCommands::Install { engine, url, manifest } => {
            let (sink, mut events) = ChannelSink::new();
            let printer = tokio::spawn(async move {
                while let Some(event) = events.recv().await {
                    if event.status != ProgressStatus::Error {
                        eprintln!("[{:>3.0}%] {}", event.percent, event.message);
                    }
                }
            });
            let result = drivers.install(&engine, &url, &manifest, &sink).await;
            drop(sink);
            let _ = printer.await;
            report(result)
        }
        DriverCommands::InstallLocal { engine, file } => {
            report(drivers.install_local_package(&engine, &file, &TracingSink).await)
        }
        DriverCommands::Remove { engine } => match drivers.remove(&engine).await {
            Ok(()) => {
                println!("Removed {}", engine);
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("Error: {}", e);
                ExitCode::FAILURE
            }
        },
        DriverCommands::Url { engine, manifest } => {
            report(drivers.resolve_download_url(&engine, &manifest).await)
        }
    }
}

async fn cmd_database(backend: &Backend, settings: &Settings, command: Commands) -> ExitCode {
    let service = &backend.service;
    let connection = match &command {
        Commands::Query { connection, .. }
        | Commands::Databases { connection }
        | Commands::Tables { connection, .. }
        | Commands::Columns { connection, .. }
        | Commands::Ddl { connection, .. } => connection.clone(),
        Commands::Drivers { .. } => return ExitCode::FAILURE,
    };
    let config = match resolve_connection(settings, &connection) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match command {
        Commands::Query { sql, database, .. } => report(service.run(&config, &database, &sql).await),
        Commands::Databases { .. } => report(service.databases(&config).await),
        Commands::Tables { database, .. } => report(service.tables(&config, &database).await),
        Commands::Columns { table, database, .. } => {
            report(service.columns(&config, &database, &table).await)
        }
        Commands::Ddl { table, database, .. } => {
            match service.create_statement(&config, &database, &table).await {
                Ok(ddl) => {
                    println!("{}", ddl);
                    ExitCode::SUCCESS
                }
                Err(e) => {
                    eprintln!("Error: {}", e);
                    ExitCode::FAILURE
                }
            }
        }
        Commands::Drivers { .. } => ExitCode::FAILURE,
    }
}
