//! CLI module for foliosync
//!
//! Command-line interface over the session and sync cores. Uses clap for
//! argument parsing and a structured command pattern: one module per
//! command under `commands/`.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

pub mod commands;

use crate::auth::CredentialStore;
use crate::config::AppConfig;
use crate::context::AppContext;
use crate::data_paths::{DataPaths, DEFAULT_DATA_DIR};
use crate::logging::{init_logging, LogMode, LoggingConfig};

use commands::goals::GoalsArgs;
use commands::investments::InvestmentsArgs;
use commands::login::LoginArgs;
use commands::logout::LogoutArgs;
use commands::publish::PublishArgs;
use commands::stats::StatsArgs;
use commands::status::StatusArgs;
use commands::watch::WatchArgs;

#[derive(Parser)]
#[command(name = "foliosync")]
#[command(version)]
#[command(about = "Authenticated session and live-sync client for the portfolio tracker", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// REST API base URL (default: http://localhost:8000/api)
    #[arg(long, global = true)]
    pub api_url: Option<String>,

    /// Price feed WebSocket URL (default: ws://localhost:8000/ws/prices/)
    #[arg(long, global = true)]
    pub ws_url: Option<String>,

    /// Data directory path (default: ./data)
    #[arg(long, global = true, default_value = DEFAULT_DATA_DIR)]
    pub data_dir: PathBuf,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Log in and persist the session
    Login(LoginArgs),

    /// End the session and clear stored credentials
    Logout(LogoutArgs),

    /// Show the current session and token expiry
    Status(StatusArgs),

    /// List investment goals with server-computed aggregates
    Goals(GoalsArgs),

    /// List investments
    Investments(InvestmentsArgs),

    /// Show the portfolio-level summary
    Stats(StatsArgs),

    /// Follow live price updates and apply them to the cached view
    Watch(WatchArgs),

    /// Publish a price update over the live channel (data admins only)
    Publish(PublishArgs),
}

impl Cli {
    fn app_config(&self) -> AppConfig {
        let mut config = AppConfig::from_env();
        if let Some(api_url) = &self.api_url {
            config.base_url = api_url.clone();
        }
        if let Some(ws_url) = &self.ws_url {
            config.ws_url = ws_url.clone();
        }
        config
    }

    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        let data_paths = DataPaths::new(&self.data_dir);
        data_paths.ensure_directories()?;

        // The watch view owns the terminal, so its logs go to file only
        let log_mode = match &self.command {
            Commands::Watch(_) => LogMode::FileOnly,
            _ => LogMode::ConsoleAndFile,
        };
        init_logging(LoggingConfig::new(log_mode, data_paths.clone()))?;

        let store = CredentialStore::open(&data_paths)?;
        let ctx = AppContext::init(self.app_config(), store).await?;

        match self.command {
            Commands::Login(args) => commands::login::execute(ctx, args).await,
            Commands::Logout(args) => commands::logout::execute(ctx, args).await,
            Commands::Status(args) => commands::status::execute(ctx, args).await,
            Commands::Goals(args) => commands::goals::execute(ctx, args).await,
            Commands::Investments(args) => commands::investments::execute(ctx, args).await,
            Commands::Stats(args) => commands::stats::execute(ctx, args).await,
            Commands::Watch(args) => commands::watch::execute(ctx, args).await,
            Commands::Publish(args) => commands::publish::execute(ctx, args).await,
        }
    }
}
