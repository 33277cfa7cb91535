use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use schoolhouse::config::AppConfig;

mod cmd;

#[derive(Parser)]
#[command(name = "schoolhouse")]
#[command(version, about = "School administration back-end")]
pub struct Cli {
    /// Path to a TOML config file (defaults to ./schoolhouse.toml when present)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the JSON API server
    Serve {
        #[arg(long)]
        host: Option<String>,

        #[arg(short, long)]
        port: Option<u16>,

        /// Database path
        #[arg(long)]
        db_path: Option<PathBuf>,

        /// Enable dev mode (permissive CORS for the Expo dev client)
        #[arg(long)]
        dev: bool,
    },
    /// Create the database file and run migrations
    InitDb {
        #[arg(long)]
        db_path: Option<PathBuf>,
    },
    /// Create an admin account
    CreateAdmin {
        #[arg(long)]
        name: String,

        #[arg(long)]
        email: String,

        #[arg(long)]
        password: String,

        #[arg(long)]
        db_path: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config =
        AppConfig::resolve(cli.config.as_deref()).context("Failed to load configuration")?;
    let _log_guard = schoolhouse::logging::init(&config.logging, cli.verbose)?;

    match cli.command {
        Commands::Serve {
            host,
            port,
            db_path,
            dev,
        } => {
            cmd::apply_serve_overrides(&mut config, host, port, db_path, dev);
            cmd::cmd_serve(&config).await?;
        }
        Commands::InitDb { db_path } => {
            cmd::apply_db_path(&mut config, db_path);
            cmd::cmd_init_db(&config)?;
        }
        Commands::CreateAdmin {
            name,
            email,
            password,
            db_path,
        } => {
            cmd::apply_db_path(&mut config, db_path);
            cmd::cmd_create_admin(&config, &name, &email, &password)?;
        }
    }

    Ok(())
}
