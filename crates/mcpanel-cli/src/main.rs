mod commands;

use clap::{Parser, Subcommand};
use mcpanel_core::{DEFAULT_PANEL_URL, PanelConfig};
use std::net::SocketAddr;
use tracing_appender::{non_blocking::WorkerGuard, rolling};

#[derive(Parser)]
#[command(name = "mcpanel")]
#[command(about = "Power on and watch the Minecraft server VM")]
#[command(version)]
struct Cli {
    /// Base URL serving the VM functions
    #[arg(long, global = true, env = "MCPANEL_PANEL_URL", default_value = DEFAULT_PANEL_URL)]
    panel_url: String,

    /// Backend management API base (defaults to <panel-url>/api)
    #[arg(long, global = true, env = "MCPANEL_API_URL")]
    api_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the vm-start and vm-status functions (reads AZURE_* variables)
    Serve {
        /// Address to listen on
        #[arg(short, long, default_value = "127.0.0.1:7071")]
        bind: SocketAddr,
    },
    /// Start the VM and wait until the backend is reachable
    Start,
    /// Show VM and server status once
    Status,
    /// Keep polling VM and server status until interrupted
    Watch,
    /// Log in to the backend and store the session token
    Login {
        /// Account name
        #[arg(short, long)]
        username: String,
        /// Time-based one-time password, if two-factor auth is enabled
        #[arg(short, long)]
        totp: Option<String>,
    },
    /// Forget the stored session token
    Logout,
    /// Check the stored session token against the backend
    Whoami,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _log_guard = init_logging();

    let cli = Cli::parse();
    let panel = PanelConfig::new(cli.panel_url, cli.api_url);

    match cli.command {
        Commands::Serve { bind } => {
            commands::serve(bind).await?;
        }
        Commands::Start => {
            commands::start(panel).await?;
        }
        Commands::Status => {
            commands::status(panel).await?;
        }
        Commands::Watch => {
            commands::watch(panel).await?;
        }
        Commands::Login { username, totp } => {
            commands::login(panel, &username, totp.as_deref()).await?;
        }
        Commands::Logout => {
            commands::logout()?;
        }
        Commands::Whoami => {
            commands::whoami(panel).await?;
        }
    }

    Ok(())
}

fn mcpanel_log_dir() -> anyhow::Result<std::path::PathBuf> {
    let state_dir = dirs::state_dir()
        .or_else(dirs::data_local_dir)
        .ok_or_else(|| anyhow::anyhow!("state directory not found"))?;
    Ok(state_dir.join("mcpanel").join("logs"))
}

fn init_logging() -> Option<WorkerGuard> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    if let Ok(log_dir) = mcpanel_log_dir()
        && std::fs::create_dir_all(&log_dir).is_ok()
    {
        let log_path = log_dir.join("mcpanel.log");
        if std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .is_ok()
        {
            let file_appender = rolling::never(&log_dir, "mcpanel.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_ansi(false)
                .with_writer(non_blocking)
                .init();
            return Some(guard);
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_ansi(false)
        .with_writer(std::io::stderr)
        .init();
    None
}
