use std::env;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;

use hui_core::{Collaborators, ControlEvent, ControlPlane, HuiConfig, SqliteStore};
use tokio::net::TcpListener;
use tokio::sync::broadcast;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_filter())
        .init();

    let hui_config = match HuiConfig::load() {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!(error = %err, "failed to load hui config; using defaults");
            HuiConfig::default()
        }
    };
    let control = hui_config.control_config()?;

    let db_path = match env::var("HUI_DB_PATH") {
        Ok(path) => PathBuf::from(path),
        Err(_) => hui_config.database_path()?,
    };
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let store = Arc::new(SqliteStore::open(&db_path)?);
    tracing::info!(db = %db_path.display(), "store opened");

    let parts = Collaborators::production(&control)?;
    let plane = ControlPlane::new(store, control, parts);
    plane.settings.seed_defaults()?;

    let events = plane.subscribe_events();
    let booted = plane.coordinator.boot().await?;
    if !booted.is_ok() {
        tracing::warn!(failed = booted.failures.len(), "some nodes did not start");
    }
    let _background = plane.spawn_background()?;

    if plane.settings.web_tls()? {
        tracing::warn!("cert and key are configured but this listener serves plain http; terminate tls in front of it");
    }
    let host = parse_ip("HUI_BIND", IpAddr::V4(Ipv4Addr::UNSPECIFIED));
    let bind = SocketAddr::new(host, plane.settings.web_port()?);
    let app = plane.router()?;

    let listener = TcpListener::bind(bind).await?;
    tracing::info!(addr = %bind, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(events))
        .await?;

    let released = plane.coordinator.release_all().await;
    if let Err(err) = released.into_result() {
        tracing::warn!(error = %err, "node release on shutdown failed");
    }
    Ok(())
}

/// Resolves on ctrl-c or when a settings change needs a fresh process.
async fn shutdown_signal(mut events: broadcast::Receiver<ControlEvent>) {
    let restart = async {
        loop {
            match events.recv().await {
                Ok(ControlEvent::HostRestartRequested { keys }) => {
                    tracing::info!(?keys, "restart requested");
                    return;
                }
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => std::future::pending::<()>().await,
            }
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => tracing::info!("shutting down"),
        _ = restart => {}
    }
}

fn parse_ip(key: &str, default: IpAddr) -> IpAddr {
    match env::var(key) {
        Ok(v) => v.parse().unwrap_or(default),
        Err(_) => default,
    }
}

fn tracing_filter() -> tracing_subscriber::EnvFilter {
    let explicit = env::var("HUI_LOG").or_else(|_| env::var("RUST_LOG")).ok();
    if let Some(filter) = explicit {
        return tracing_subscriber::EnvFilter::new(filter);
    }
    if matches!(
        env::var("HUI_DEBUG").as_deref(),
        Ok("1" | "true" | "TRUE" | "yes" | "YES")
    ) {
        return tracing_subscriber::EnvFilter::new("debug");
    }
    tracing_subscriber::EnvFilter::new("info")
}
