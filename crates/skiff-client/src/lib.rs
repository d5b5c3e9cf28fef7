//! Skiff client: a local SOCKS5 proxy forwarding over pooled, encrypted
//! connections to a remote relay server.
//!
//! Each accepted client connection borrows one cipher connection from
//! the pool, sends a session request naming the target, and relays bytes
//! bidirectionally. Cleanly finished sessions hand their cipher
//! connection back for reuse; anything else discards it.

pub mod cli;
pub mod config;
mod connector;
mod error;
mod handler;
pub mod proto;
pub mod relay;
pub mod socks5;
pub mod stats;

pub use cli::ClientArgs;
pub use config::{ClientConfig, load_client_config, validate_config};
pub use connector::CipherConnector;
pub use error::{ClientError, Socks5Error};
pub use relay::{RelayStats, relay};
pub use stats::Stats;

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio_rustls::TlsConnector;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use skiff_cipher::SessionKeys;
use skiff_core::defaults::{
    DEFAULT_POOL_SWEEP_INTERVAL_SECS, DEFAULT_STATS_INTERVAL_SECS,
    DEFAULT_TLS_HANDSHAKE_TIMEOUT_SECS,
};
use skiff_pool::Pool;

/// Shared state for connection handlers.
pub struct ClientState {
    pub pool: Arc<Pool<CipherConnector>>,
    pub timeout: Duration,
    pub stats: Arc<Stats>,
}

/// Run the skiff client with the given configuration.
pub async fn run(config: ClientConfig, shutdown: CancellationToken) -> Result<(), ClientError> {
    let keys = SessionKeys::derive(&config.client.password);

    let tls_config = connector::build_tls_config(&config.client.tls)?;
    let sni = connector::resolve_sni(&config.client.tls, &config.client.server)?;
    let cipher_connector = CipherConnector::new(
        config.client.server.clone(),
        TlsConnector::from(Arc::new(tls_config)),
        sni,
        config.client.tcp.clone(),
        Duration::from_secs(DEFAULT_TLS_HANDSHAKE_TIMEOUT_SECS),
        keys,
    );

    let pool = Pool::new(config.client.pool.to_pool_config(), cipher_connector);
    pool.warm_up().await?;
    pool.start_sweeper(Duration::from_secs(DEFAULT_POOL_SWEEP_INTERVAL_SECS));

    let stats = Arc::new(Stats::new());
    stats.start_reporter(
        Duration::from_secs(DEFAULT_STATS_INTERVAL_SECS),
        shutdown.clone(),
    );

    let state = Arc::new(ClientState {
        pool: pool.clone(),
        timeout: Duration::from_secs(config.client.timeout_secs),
        stats,
    });

    let listener = TcpListener::bind(&config.client.listen).await?;
    info!(listen = %config.client.listen, server = %config.client.server, "skiff client started");

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, peer)) => {
                        let state = state.clone();
                        tokio::spawn(async move {
                            handler::handle_socks5_conn(stream, peer, state).await;
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "failed to accept connection");
                    }
                }
            }
            _ = shutdown.cancelled() => {
                info!("shutting down client");
                break;
            }
        }
    }

    pool.close();
    Ok(())
}
