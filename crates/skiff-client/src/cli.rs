//! CLI module for the skiff client.

use std::io;
use std::path::PathBuf;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use skiff_core::defaults::{DEFAULT_LISTEN, DEFAULT_TIMEOUT_SECS};

use crate::config::{
    self, ClientConfig, ClientSettings, LogFormat, LogOutput, LoggingConfig, load_client_config,
    validate_config,
};

/// Skiff client CLI arguments.
#[derive(Parser, Debug, Clone)]
#[command(name = "skiff", version, about = "Encrypted forwarding proxy client")]
pub struct ClientArgs {
    /// Config file path (toml/json/jsonc).
    #[arg(short, long, default_value = "skiff.toml")]
    pub config: PathBuf,

    /// Override local SOCKS5 listen address.
    #[arg(short, long)]
    pub listen: Option<String>,

    /// Override remote relay server address.
    #[arg(short, long)]
    pub server: Option<String>,

    /// Override password.
    #[arg(short, long)]
    pub password: Option<String>,

    /// Override relay timeout in seconds.
    #[arg(short, long)]
    pub timeout: Option<u64>,

    /// Skip TLS certificate verification.
    #[arg(long)]
    pub skip_verify: bool,

    /// Log level override.
    #[arg(long)]
    pub log_level: Option<String>,

    /// Print an example config file and exit.
    #[arg(long)]
    pub show_config_example: bool,
}

/// Run the skiff client with the given CLI arguments.
pub async fn run(args: ClientArgs) -> Result<(), Box<dyn std::error::Error>> {
    if args.show_config_example {
        print!("{}", config::EXAMPLE_CONFIG);
        return Ok(());
    }

    let mut config = load_or_synthesize_config(&args)?;

    // Apply CLI overrides
    if let Some(listen) = &args.listen {
        config.client.listen = listen.clone();
    }
    if let Some(server) = &args.server {
        config.client.server = server.clone();
    }
    if let Some(password) = &args.password {
        config.client.password = password.clone();
    }
    if let Some(timeout) = args.timeout {
        config.client.timeout_secs = timeout;
    }
    if args.skip_verify {
        config.client.tls.skip_verify = true;
    }
    if let Some(level) = &args.log_level {
        config.logging.level = Some(level.clone());
    }

    validate_config(&config)?;
    init_tracing(&config.logging);

    // rustls needs a process-level crypto provider before the first
    // TLS config is built.
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

    // Graceful shutdown
    let shutdown = CancellationToken::new();
    let shutdown_signal = shutdown.clone();

    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        info!("shutdown signal received");
        shutdown_signal.cancel();
    });

    crate::run(config, shutdown).await?;
    Ok(())
}

/// Load the config file, or build a config purely from flags when the
/// file does not exist but `--server` and `--password` are given.
fn load_or_synthesize_config(args: &ClientArgs) -> Result<ClientConfig, Box<dyn std::error::Error>> {
    if args.config.exists() {
        return Ok(load_client_config(&args.config)?);
    }

    match (&args.server, &args.password) {
        (Some(server), Some(password)) => Ok(ClientConfig {
            client: ClientSettings {
                listen: DEFAULT_LISTEN.to_string(),
                server: server.clone(),
                password: password.clone(),
                timeout_secs: DEFAULT_TIMEOUT_SECS,
                pool: Default::default(),
                tls: Default::default(),
                tcp: Default::default(),
            },
            logging: LoggingConfig::default(),
        }),
        _ => Err(format!(
            "config file {} not found (pass --server and --password to run without one)",
            args.config.display()
        )
        .into()),
    }
}

/// Resolve once the process receives Ctrl-C or, on unix, SIGTERM.
/// A signal source that cannot be installed is logged and parked so the
/// other source still works.
async fn wait_for_shutdown_signal() {
    let interrupt = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Ctrl+C handler unavailable");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(sig) => Some(sig),
            Err(e) => {
                warn!(error = %e, "SIGTERM handler unavailable");
                None
            }
        };
        let terminate = async {
            match sigterm.as_mut() {
                Some(sig) => {
                    sig.recv().await;
                }
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            _ = interrupt => {}
            _ = terminate => {}
        }
    }

    #[cfg(not(unix))]
    interrupt.await;
}

fn init_tracing(config: &LoggingConfig) {
    let directives = std::iter::once(config.level.as_deref().unwrap_or("info").to_string())
        .chain(
            config
                .filters
                .iter()
                .map(|(module, level)| format!("{module}={level}")),
        )
        .collect::<Vec<_>>()
        .join(",");
    let filter = EnvFilter::try_new(&directives).unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(filter);
    match (config.format, config.output) {
        (LogFormat::Pretty, LogOutput::Stderr) => {
            registry.with(fmt::layer().with_writer(io::stderr)).init()
        }
        (LogFormat::Pretty, LogOutput::Stdout) => {
            registry.with(fmt::layer().with_writer(io::stdout)).init()
        }
        (LogFormat::Compact, LogOutput::Stderr) => registry
            .with(fmt::layer().compact().with_writer(io::stderr))
            .init(),
        (LogFormat::Compact, LogOutput::Stdout) => registry
            .with(fmt::layer().compact().with_writer(io::stdout))
            .init(),
        (LogFormat::Json, LogOutput::Stderr) => registry
            .with(fmt::layer().json().with_writer(io::stderr))
            .init(),
        (LogFormat::Json, LogOutput::Stdout) => registry
            .with(fmt::layer().json().with_writer(io::stdout))
            .init(),
    }
}
