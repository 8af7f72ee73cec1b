use gateway::api::ApiClient;
use gateway::broker::{Broker, MemoryBroker, RedisBroker};
use gateway::config::GatewayConfig;
use gateway::{build_router, fanout, AppState};
use std::env;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let log_level = env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_owned());
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(log_level))
        .init();

    let config = GatewayConfig::from_env().expect("invalid configuration");

    let api = ApiClient::new(&config).expect("failed to build API client");
    let broker: Arc<dyn Broker> = match &config.redis_url {
        Some(url) => {
            info!("connecting to broker...");
            Arc::new(
                RedisBroker::connect(url)
                    .await
                    .expect("failed to connect to broker"),
            )
        }
        None => {
            info!("no REDIS_URL set, using in-process loopback broker");
            Arc::new(MemoryBroker::new())
        }
    };

    let bind_addr = config.bind_addr.clone();
    let state = AppState::new(config, api, broker);
    fanout::spawn(state.clone());

    let router = build_router(state.clone());
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .expect("failed to bind");
    info!(addr = %bind_addr, "gateway listening");
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    drain_sessions(&state).await;
    info!("gateway shut down gracefully");
}

/// Close every live session and release its presence before exit.
async fn drain_sessions(state: &AppState) {
    for session in state.registry.all_sessions().await {
        session.force_close();
        if state
            .registry
            .remove_by_socket(session.socket_id)
            .await
            .is_some()
        {
            if let Err(e) = state.broker.mark_offline(session.user_id).await {
                warn!(user_id = session.user_id, error = %e, "presence mark-offline failed");
            }
        }
    }
}

/// Waits for SIGTERM or Ctrl-C (SIGINT) and returns to trigger graceful shutdown.
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => { info!("received Ctrl+C, shutting down"); },
        _ = terminate => { info!("received SIGTERM, shutting down"); },
    }
}
