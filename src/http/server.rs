//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Build the Axum router (`/ws`, `/health`) and its middleware
//! - Serve plain TCP or TLS on the given listener
//! - Spawn the admin API on its own address when enabled
//! - Apply reloaded configuration
//! - Coordinate graceful shutdown and socket drain

use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc, Semaphore};
use tower::ServiceBuilder;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

use crate::admin;
use crate::config::RelayConfig;
use crate::http::websocket::ws_handler;
use crate::lifecycle::Shutdown;
use crate::net::ConnectionTracker;
use crate::session::SessionRegistry;
use crate::upstream::{GeminiConnector, UpstreamConnector};

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ArcSwap<RelayConfig>>,
    pub registry: SessionRegistry,
    pub connector: Arc<dyn UpstreamConnector>,
    pub connections: ConnectionTracker,
    pub limiter: Arc<Semaphore>,
    pub shutdown: Shutdown,
    pub started_at: Instant,
}

/// The relay's HTTP/WebSocket server.
pub struct RelayServer {
    state: AppState,
}

impl RelayServer {
    /// Create a server that relays to the configured backend.
    pub fn new(config: RelayConfig) -> Self {
        let max_connections = config.listener.max_connections;
        let config = Arc::new(ArcSwap::from_pointee(config));
        let connector: Arc<dyn UpstreamConnector> = Arc::new(GeminiConnector::new(Arc::clone(&config)));
        let state = AppState {
            config,
            registry: SessionRegistry::new(),
            connector,
            connections: ConnectionTracker::new(),
            limiter: Arc::new(Semaphore::new(max_connections)),
            shutdown: Shutdown::new(),
            started_at: Instant::now(),
        };
        Self { state }
    }

    pub fn registry(&self) -> SessionRegistry {
        self.state.registry.clone()
    }

    /// Build the Axum router with all middleware layers.
    fn build_router(state: AppState) -> Router {
        Router::new()
            .route("/ws", get(ws_handler))
            .route("/health", get(health))
            .with_state(state)
            .layer(
                ServiceBuilder::new()
                    .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                    .layer(TraceLayer::new_for_http())
                    .layer(PropagateRequestIdLayer::x_request_id()),
            )
    }

    /// Run the server on `listener` until `shutdown` fires, then wait for
    /// client sockets to drain.
    pub async fn run(
        self,
        listener: TcpListener,
        mut config_updates: mpsc::UnboundedReceiver<RelayConfig>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let state = self.state;
        let config = state.config.load_full();
        let addr = listener.local_addr()?;

        let coordinator = state.shutdown.clone();
        tokio::spawn(async move {
            let _ = shutdown.recv().await;
            coordinator.trigger();
        });

        let shared = Arc::clone(&state.config);
        tokio::spawn(async move {
            while let Some(new_config) = config_updates.recv().await {
                let old = shared.load();
                if old.listener != new_config.listener || old.admin != new_config.admin {
                    tracing::warn!("Listener and admin changes take effect after restart");
                }
                shared.store(Arc::new(new_config));
                tracing::info!("Configuration reloaded; applies to the next setup");
            }
        });

        if config.admin.enabled {
            let admin_listener = TcpListener::bind(&config.admin.bind_address).await?;
            let admin_router = admin::admin_router(state.clone());
            let admin_shutdown = state.shutdown.clone();
            tracing::info!(address = %config.admin.bind_address, "Admin API listening");
            tokio::spawn(async move {
                let result = axum::serve(admin_listener, admin_router)
                    .with_graceful_shutdown(async move { admin_shutdown.wait().await })
                    .await;
                if let Err(e) = result {
                    tracing::error!(error = %e, "Admin API failed");
                }
            });
        }

        let app = Self::build_router(state.clone());
        match &config.listener.tls {
            Some(tls) => {
                let rustls = axum_server::tls_rustls::RustlsConfig::from_pem_file(&tls.cert_path, &tls.key_path).await?;
                let handle = axum_server::Handle::new();
                let drain = Duration::from_secs(config.timeouts.shutdown_drain_secs);
                let stop = state.shutdown.clone();
                let stopper = handle.clone();
                tokio::spawn(async move {
                    stop.wait().await;
                    stopper.graceful_shutdown(Some(drain));
                });

                tracing::info!(address = %addr, "Relay listening (TLS)");
                axum_server::from_tcp_rustls(listener.into_std()?, rustls)
                    .handle(handle)
                    .serve(app.into_make_service())
                    .await?;
            }
            None => {
                let stop = state.shutdown.clone();
                tracing::info!(address = %addr, "Relay listening");
                axum::serve(listener, app)
                    .with_graceful_shutdown(async move { stop.wait().await })
                    .await?;
            }
        }

        let deadline = Duration::from_secs(state.config.load().timeouts.shutdown_drain_secs);
        if state.connections.drain(deadline).await {
            tracing::info!("All client sockets drained");
        } else {
            tracing::warn!(
                remaining = state.connections.active_count(),
                "Drain deadline passed with sockets still open"
            );
        }
        tracing::info!(sessions = state.registry.len(), "Relay server stopped");
        Ok(())
    }
}

#[derive(Debug, Serialize)]
pub struct Health {
    pub status: &'static str,
    pub sessions: usize,
    pub uptime_secs: u64,
}

/// `GET /health`
async fn health(State(state): State<AppState>) -> Json<Health> {
    Json(Health {
        status: if state.shutdown.is_triggered() { "draining" } else { "ok" },
        sessions: state.registry.len(),
        uptime_secs: state.started_at.elapsed().as_secs(),
    })
}
