use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use galleria::api::rate_limit::spawn_cleanup_task;
use galleria::api::setup::{ensure_admin_user, AdminProvision};
use galleria::cli::{run_command, Cli};
use galleria::config::Config;
use galleria::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Subcommands only need to print; no tracing setup
    if !cli.is_serve() {
        return run_command(&cli).await;
    }

    let config = Config::load(&cli.config)?;

    let log_level = cli
        .log_level
        .as_ref()
        .unwrap_or(&config.logging.level)
        .clone();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level)),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Galleria v{}", env!("CARGO_PKG_VERSION"));

    if config.auth.jwt_secret_generated {
        tracing::warn!(
            "No jwt_secret configured; using an ephemeral secret, sessions will not survive a restart"
        );
    }

    galleria::utils::ensure_dir(&config.server.data_dir)?;
    galleria::utils::ensure_dir(&config.uploads.dir)?;

    let db = galleria::db::init(&config.server.data_dir).await?;

    if let (Some(email), Some(password)) = (&config.auth.admin_email, &config.auth.admin_password)
    {
        let outcome = ensure_admin_user(&db, &config.auth.admin_name, email, password)
            .await
            .context("Failed to ensure configured admin account")?;
        if outcome != AdminProvision::AlreadyAdmin {
            tracing::info!(email = %email, outcome = ?outcome, "Configured admin account ready");
        }
    }

    if !config.email.is_configured() {
        tracing::warn!("SMTP is not configured; verification codes and reset links will be logged");
    }

    let state = Arc::new(AppState::new(config.clone(), db));

    if config.rate_limit.enabled {
        spawn_cleanup_task(state.rate_limiter.clone(), config.rate_limit.cleanup_interval);
    }

    let app = galleria::api::create_router(state);

    let addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    tracing::info!("API server listening on http://{}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
