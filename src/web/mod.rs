//! Web server module: JSON API over the host manager.

mod handlers;

pub use handlers::*;

use crate::config::ServerConfig;
use crate::hosts::HostList;
use crate::monitor::HostManager;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, put},
    Router,
};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::Mutex;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: ServerConfig,
    pub manager: Arc<HostManager>,
    pub hosts: Arc<Mutex<HostList>>,
}

impl AppState {
    /// Persist the current host list to the configured path.
    pub async fn save_hosts(&self) -> Result<(), crate::hosts::HostsError> {
        self.hosts.lock().await.save(&self.config.hosts_path)
    }
}

/// Web server for pingwatch.
pub struct Server {
    state: AppState,
}

impl Server {
    /// Create a new server with the given dependencies.
    pub fn new(config: ServerConfig, manager: Arc<HostManager>, hosts: Arc<Mutex<HostList>>) -> Self {
        Self {
            state: AppState {
                config,
                manager,
                hosts,
            },
        }
    }

    /// Build the router with all routes.
    pub fn routes(&self) -> Router {
        let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any);

        Router::new()
            .route("/api/hosts", get(handlers::handle_list_hosts).post(handlers::handle_add_host))
            .route(
                "/api/hosts/{target}",
                get(handlers::handle_get_host).delete(handlers::handle_remove_host),
            )
            .route("/api/hosts/{target}/history", get(handlers::handle_get_history))
            .route("/api/hosts/{target}/interval", put(handlers::handle_update_interval))
            .route("/api/interval", put(handlers::handle_set_interval_all))
            .route("/api/snapshot", get(handlers::handle_snapshot))
            .route("/api/health", get(handlers::handle_health))
            .layer(TraceLayer::new_for_http())
            .layer(cors)
            .layer(DefaultBodyLimit::max(64 * 1024))
            .with_state(self.state.clone())
    }

    /// Serve on the configured port until `shutdown` resolves.
    pub async fn start(
        &self,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.state.config.http_port));
        let router = self.routes();

        tracing::info!("Web server listening on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown)
            .await?;

        Ok(())
    }
}
