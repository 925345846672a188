mod commands;
mod config;
mod render;

use std::{
    path::{Path, PathBuf},
    process::ExitCode,
    sync::Arc,
};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use daemon::{
    db,
    providers::ProviderRegistry,
    store::{StaticAccounts, SurrealSink},
    Dispatcher,
};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::{commands::Endpoint, config::Config};

#[derive(Parser)]
#[command(name = "hop", version, about = "Copy files between storage accounts")]
struct Cli {
    /// Path to hop.toml
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Also write logs to this file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    /// Keep transfer history in memory only
    #[arg(long, global = true)]
    ephemeral: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Copy one file and follow its progress
    Transfer {
        #[arg(long)]
        user: String,
        /// Source as ACCOUNT:PATH
        #[arg(long)]
        from: Endpoint,
        /// Destination as ACCOUNT:PATH
        #[arg(long)]
        to: Endpoint,
        /// Display name, defaults to the last segment of the source path
        #[arg(long)]
        name: Option<String>,
    },
    /// Show one transfer
    Status {
        id: String,
        #[arg(long)]
        user: String,
        #[arg(long)]
        json: bool,
    },
    /// List a user's transfers, newest first
    History {
        #[arg(long)]
        user: String,
    },
    /// List configured accounts
    Accounts {
        #[arg(long)]
        user: Option<String>,
    },
}

fn init_logging(log_file: Option<&Path>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let file_layer = match log_file {
        Some(path) => {
            let dir = path.parent().filter(|d| !d.as_os_str().is_empty()).unwrap_or(Path::new("."));
            std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
            let name = path
                .file_name()
                .with_context(|| format!("{} is not a file path", path.display()))?;
            let appender = tracing_appender::rolling::never(dir, name);
            Some(fmt::layer().with_ansi(false).with_writer(appender))
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .init();
    Ok(())
}

async fn open_dispatcher(config: &Config, ephemeral: bool) -> Result<Dispatcher> {
    let handle = if ephemeral {
        db::open_in_memory().await?
    } else {
        let path = config.database_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
        }
        db::open(&path)
            .await
            .with_context(|| format!("opening database at {}", path.display()))?
    };

    let dispatcher = Dispatcher::new(
        config.engine.clone(),
        Arc::new(StaticAccounts::new(config.accounts.iter().cloned())),
        Arc::new(ProviderRegistry::with_defaults()),
        Arc::new(SurrealSink::new(handle)),
    )?;
    Ok(dispatcher)
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_logging(cli.log_file.as_deref())?;
    let config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Command::Accounts { user } => {
            commands::accounts(&config, user.as_deref());
            Ok(ExitCode::SUCCESS)
        }
        Command::Transfer { user, from, to, name } => {
            let dispatcher = open_dispatcher(&config, cli.ephemeral).await?;
            commands::transfer(&dispatcher, user, from, to, name).await
        }
        Command::Status { id, user, json } => {
            let dispatcher = open_dispatcher(&config, cli.ephemeral).await?;
            commands::status(&dispatcher, &id, &user, json).await?;
            Ok(ExitCode::SUCCESS)
        }
        Command::History { user } => {
            let dispatcher = open_dispatcher(&config, cli.ephemeral).await?;
            commands::history(&dispatcher, &user).await?;
            Ok(ExitCode::SUCCESS)
        }
    }
}
