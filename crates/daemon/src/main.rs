//! WebTerm daemon
//!
//! Serves an interactive program to browsers as a terminal over WebSocket.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use daemon::config::{default_config_path, Config};
use daemon::server::WebServer;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// WebTerm - an interactive program in the browser.
#[derive(Parser, Debug)]
#[command(name = "webterm")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute (defaults to `serve`)
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available commands.
#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Commands {
    /// Start the web server
    Serve {
        /// Port to listen on
        #[arg(long, short)]
        port: Option<u16>,

        /// Address to bind
        #[arg(long)]
        bind: Option<String>,

        /// Directory with the front-end files
        #[arg(long, value_name = "DIR")]
        static_dir: Option<PathBuf>,
    },

    /// Print the effective configuration and validate it
    CheckConfig,
}

impl Default for Commands {
    fn default() -> Self {
        Commands::Serve {
            port: None,
            bind: None,
            static_dir: None,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = cli.config.clone().unwrap_or_else(default_config_path);
    let mut config = Config::load(&config_path)?;
    config.apply_env_overrides();

    let command = cli.command.clone().unwrap_or_default();
    if let Commands::Serve {
        port,
        bind,
        static_dir,
    } = &command
    {
        apply_serve_overrides(&mut config, *port, bind.clone(), static_dir.clone());
    }

    init_tracing(&config, cli.verbose);
    tracing::debug!(path = %config_path.display(), "Loaded configuration");

    match command {
        Commands::CheckConfig => check_config(&config),
        Commands::Serve { .. } => {
            config.validate()?;
            serve(config).await
        }
    }
}

/// Applies `serve` flags on top of file and environment settings.
fn apply_serve_overrides(
    config: &mut Config,
    port: Option<u16>,
    bind: Option<String>,
    static_dir: Option<PathBuf>,
) {
    if let Some(port) = port {
        config.server.port = port;
    }
    if let Some(bind) = bind {
        config.server.bind_addr = bind;
    }
    if let Some(dir) = static_dir {
        config.server.static_dir = dir;
    }
}

/// `RUST_LOG` wins; otherwise the configured level, or debug with `--verbose`.
fn init_tracing(config: &Config, verbose: bool) {
    let level = if verbose {
        "debug".to_string()
    } else {
        config.daemon.log_level.to_lowercase()
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn check_config(config: &Config) -> anyhow::Result<()> {
    print!("{}", config.to_toml()?);

    if let Err(e) = config.validate() {
        eprintln!("Invalid configuration: {}", e);
        std::process::exit(1);
    }

    if !config.session.command_resolves() {
        eprintln!(
            "Warning: command '{}' was not found on PATH",
            config.session.command
        );
    }

    Ok(())
}

async fn serve(config: Config) -> anyhow::Result<()> {
    if !config.session.command_resolves() {
        tracing::warn!(
            command = %config.session.command,
            "Session command not found on PATH; connections will fail to start"
        );
    }

    let shutdown = CancellationToken::new();
    let server = WebServer::new(config, shutdown.clone());

    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        tracing::info!("Received shutdown signal");
        signal_token.cancel();
    });

    server.run().await
}

/// Wait for a shutdown signal (SIGTERM or Ctrl-C).
async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = sigterm.recv() => tracing::info!("Received SIGTERM"),
                    _ = tokio::signal::ctrl_c() => tracing::info!("Received SIGINT"),
                }
                return;
            }
            Err(e) => tracing::warn!(error = %e, "Failed to register SIGTERM handler"),
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for Ctrl-C; running until killed");
        std::future::pending::<()>().await;
    }
}
