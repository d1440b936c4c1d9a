use anyhow::Result;
use clap::{Parser, Subcommand};
use shellbridge::common::config::{self, ConfigOverrides};
use shellbridge::common::config_commands;
use shellbridge::server;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "shellbridge")]
#[command(about = "SSH and SFTP sessions for browser clients")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP and WebSocket server
    Serve {
        #[arg(long, help = "Address to listen on")]
        host: Option<String>,
        #[arg(long, short, help = "Port to listen on")]
        port: Option<u16>,
        #[arg(long, help = "Path to a config file")]
        config: Option<PathBuf>,
    },
    /// Inspect configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
        #[arg(long, global = true, help = "Path to a config file")]
        config: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective settings after file and environment merging
    Show,
    /// Print where the config file is read from
    Path,
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("shellbridge=info")),
        )
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            host,
            port,
            config: config_file,
        } => {
            init_tracing();
            let loaded = config::load_config(config_file.as_deref())?;
            let resolved = config::apply_overrides(loaded, &ConfigOverrides { host, port });
            resolved.validate()?;
            server::serve(resolved).await
        }
        Commands::Config {
            action,
            config: config_file,
        } => match action {
            ConfigAction::Show => config_commands::run_config_show(config_file.as_deref()),
            ConfigAction::Path => config_commands::run_config_path(config_file.as_deref()),
        },
    }
}
