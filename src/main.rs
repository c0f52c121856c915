//! switchboardd - real-time event switchboard daemon.

use std::sync::Arc;
use switchboard::config::Config;
use switchboard::directory::MemoryDirectory;
use switchboard::network::Gateway;
use switchboard::state::AppState;
use switchboard::{http, metrics};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.toml".to_string());

    let config = Config::load(&config_path).map_err(|e| {
        error!(path = %config_path, error = %e, "Failed to load config");
        e
    })?;

    info!(server = %config.server.name, "Starting switchboardd");

    // SECURITY: refuse to start with a default/weak token-signing secret.
    // Every session token is an HMAC over this value; a predictable secret
    // makes every credential forgeable.
    if config.has_default_secret() {
        if std::env::var("SWITCHBOARD_ALLOW_INSECURE_SECRET").is_ok() {
            tracing::warn!(
                "INSECURE: Running with a weak auth secret (allowed via SWITCHBOARD_ALLOW_INSECURE_SECRET)"
            );
        } else {
            error!("FATAL: Insecure [auth] secret detected!");
            error!("  Set a strong secret in config.toml:");
            error!("    [auth]");
            error!("    secret = \"<random-32-char-string>\"");
            error!("  Generate one with: openssl rand -hex 32");
            error!("  For testing only, set SWITCHBOARD_ALLOW_INSECURE_SECRET=1 to bypass.");
            return Err(anyhow::anyhow!(
                "Refusing to start with an insecure auth secret"
            ));
        }
    }

    metrics::init();
    info!("Metrics initialized");

    // No external storage wired in: the in-memory directory stands in for
    // the persistence collaborator.
    let directory = Arc::new(MemoryDirectory::new());
    let state = AppState::new(config, directory);

    // Process-wide shutdown signal; cancels sweeps, the HTTP server, and
    // the gateway accept loop.
    let shutdown = CancellationToken::new();

    state.spawn_sweepers(&shutdown);
    info!("Credential store sweepers started");

    // HTTP API (auth, recovery, metrics)
    let http_listener = tokio::net::TcpListener::bind(state.config.http.address).await?;
    info!(address = %state.config.http.address, "HTTP API listening");
    {
        let state = Arc::clone(&state);
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            http::serve(http_listener, state, shutdown).await;
        });
    }

    // WebSocket gateway
    let gateway = Gateway::bind(
        &state.config.websocket,
        state.config.keepalive.clone(),
        Arc::clone(&state.registry),
        shutdown.clone(),
    )
    .await?;

    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Shutdown signal received");
            }
            shutdown.cancel();
        });
    }

    gateway.run().await?;

    Ok(())
}
