//! `BlitzServer`: Axum HTTP + `WebSocket` server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::ws::{WebSocketUpgrade, rejection::WebSocketUpgradeRejection};
use axum::extract::{ConnectInfo, State};
use axum::http::{Extensions, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use metrics::counter;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::config::ServerConfig;
use crate::dispatch::CommandDispatcher;
use crate::health::{self, HealthResponse};
use crate::metrics::WS_CONNECTIONS_REJECTED_TOTAL;
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::broadcast::BroadcastHub;
use crate::websocket::connection::{ConnectionSlots, new_session_id};
use crate::websocket::session::{SessionContext, run_ws_session};

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Session registry and fan-out.
    pub hub: Arc<BroadcastHub>,
    /// Admission counter for `/ws` upgrades.
    pub slots: Arc<ConnectionSlots>,
    /// Command dispatcher shared by all sessions.
    pub dispatcher: Arc<CommandDispatcher>,
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// Shutdown coordinator.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// When the server started.
    pub start_time: Instant,
    /// Prometheus handle for `/metrics`, when a recorder is installed.
    pub metrics: Option<PrometheusHandle>,
}

/// The Blitz server.
pub struct BlitzServer {
    config: Arc<ServerConfig>,
    dispatcher: Arc<CommandDispatcher>,
    hub: Arc<BroadcastHub>,
    slots: Arc<ConnectionSlots>,
    shutdown: Arc<ShutdownCoordinator>,
    start_time: Instant,
    metrics: Option<PrometheusHandle>,
}

impl BlitzServer {
    /// Create a new server.
    pub fn new(config: ServerConfig, dispatcher: CommandDispatcher) -> Self {
        Self {
            slots: Arc::new(ConnectionSlots::new(config.max_connections)),
            config: Arc::new(config),
            dispatcher: Arc::new(dispatcher),
            hub: Arc::new(BroadcastHub::new()),
            shutdown: Arc::new(ShutdownCoordinator::new()),
            start_time: Instant::now(),
            metrics: None,
        }
    }

    /// Serve `/metrics` from `handle`.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        let state = AppState {
            hub: Arc::clone(&self.hub),
            slots: Arc::clone(&self.slots),
            dispatcher: Arc::clone(&self.dispatcher),
            config: Arc::clone(&self.config),
            shutdown: Arc::clone(&self.shutdown),
            start_time: self.start_time,
            metrics: self.metrics.clone(),
        };

        let mut router = Router::new()
            .route("/ws", get(ws_handler))
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .with_state(state);

        let static_dir = self.config.static_dir.as_ref();
        if let Some(dir) = static_dir.filter(|d| !d.as_os_str().is_empty()) {
            router = router.fallback_service(ServeDir::new(dir));
        }

        router
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
    }

    /// Bind the listener and serve until the shutdown token is cancelled.
    ///
    /// Returns the bound address (useful with port `0`) and the server task.
    pub async fn listen(&self) -> std::io::Result<(SocketAddr, JoinHandle<()>)> {
        let listener =
            tokio::net::TcpListener::bind((self.config.host.as_str(), self.config.port)).await?;
        let addr = listener.local_addr()?;
        info!(%addr, "blitz server listening");

        let app = self.router();
        let token = self.shutdown.token();
        let handle = tokio::spawn(async move {
            let result = axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(token.cancelled_owned())
            .await;
            match result {
                Ok(()) => info!("http server stopped"),
                Err(e) => warn!(error = %e, "http server exited with error"),
            }
        });
        Ok((addr, handle))
    }

    /// Get the broadcast hub.
    pub fn hub(&self) -> &Arc<BroadcastHub> {
        &self.hub
    }

    /// Get the connection admission counter.
    pub fn connection_slots(&self) -> &Arc<ConnectionSlots> {
        &self.slots
    }

    /// Get the shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// Get the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Get the command dispatcher.
    pub fn dispatcher(&self) -> &Arc<CommandDispatcher> {
        &self.dispatcher
    }
}

/// GET /ws
async fn ws_handler(
    State(state): State<AppState>,
    extensions: Extensions,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let Some(slot) = state.slots.try_acquire() else {
        counter!(WS_CONNECTIONS_REJECTED_TOTAL).increment(1);
        warn!(
            connections = state.slots.in_use(),
            max = state.slots.max(),
            "connection limit reached, rejecting upgrade"
        );
        return (StatusCode::SERVICE_UNAVAILABLE, "too many connections").into_response();
    };

    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => return rejection.into_response(),
    };

    let remote = extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let session_id = new_session_id(remote);
    let ctx = SessionContext {
        hub: Arc::clone(&state.hub),
        dispatcher: Arc::clone(&state.dispatcher),
        queue_capacity: state.config.queue_capacity,
        ping_interval: state.config.heartbeat_interval(),
        pong_timeout: state.config.heartbeat_timeout(),
        shutdown: state.shutdown.token(),
    };

    ws.max_message_size(state.config.max_message_size)
        .on_upgrade(move |socket| async move {
            let _slot = slot;
            run_ws_session(socket, session_id, ctx).await;
        })
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let connections = state.hub.count().await;
    Json(health::health_check(state.start_time, connections))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => crate::metrics::render(handle).into_response(),
        None => (StatusCode::NOT_FOUND, "metrics recorder not installed").into_response(),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::time::Duration;

    use super::*;
    use crate::dispatch::CommandTable;
    use crate::websocket::connection::ClientSession;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use blitz_core::{CommandExecutor, ExecutionError, Invocation};
    use tower::ServiceExt;

    struct NoopExecutor;

    #[async_trait]
    impl CommandExecutor for NoopExecutor {
        async fn execute(&self, _invocation: &Invocation) -> Result<(), ExecutionError> {
            Ok(())
        }
    }

    fn make_server(config: ServerConfig) -> BlitzServer {
        let dispatcher = CommandDispatcher::new(
            CommandTable::new(&BTreeMap::new()),
            Arc::new(NoopExecutor),
            Duration::from_secs(1),
        );
        BlitzServer::new(config, dispatcher)
    }

    fn no_static() -> ServerConfig {
        ServerConfig {
            static_dir: None,
            ..ServerConfig::default()
        }
    }

    async fn get(app: Router, uri: &str) -> Response {
        let req = Request::builder().uri(uri).body(Body::empty()).unwrap();
        app.oneshot(req).await.unwrap()
    }

    async fn body_text(resp: Response) -> String {
        let body = axum::body::to_bytes(resp.into_body(), 1_000_000)
            .await
            .unwrap();
        String::from_utf8(body.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn health_endpoint_returns_ok() {
        let server = make_server(no_static());
        let resp = get(server.router(), "/health").await;
        assert_eq!(resp.status(), StatusCode::OK);

        let parsed: serde_json::Value = serde_json::from_str(&body_text(resp).await).unwrap();
        assert_eq!(parsed["status"], "ok");
        assert_eq!(parsed["connections"], 0);
        assert!(parsed["uptime_secs"].is_number());
    }

    #[tokio::test]
    async fn health_counts_sessions() {
        let server = make_server(no_static());
        let (session, _rx) = ClientSession::channel("s1".into(), 4);
        server.hub().register(Arc::new(session)).await;

        let resp = get(server.router(), "/health").await;
        let parsed: serde_json::Value = serde_json::from_str(&body_text(resp).await).unwrap();
        assert_eq!(parsed["connections"], 1);
    }

    #[tokio::test]
    async fn metrics_without_recorder_is_404() {
        let server = make_server(no_static());
        let resp = get(server.router(), "/metrics").await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn metrics_with_recorder_renders() {
        let recorder = metrics_exporter_prometheus::PrometheusBuilder::new().build_recorder();
        let server = make_server(no_static()).with_metrics(recorder.handle());
        let resp = get(server.router(), "/metrics").await;
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn ws_without_upgrade_is_rejected() {
        let server = make_server(no_static());
        let resp = get(server.router(), "/ws").await;
        assert!(resp.status().is_client_error(), "{}", resp.status());
    }

    #[tokio::test]
    async fn ws_at_capacity_is_503() {
        let server = make_server(ServerConfig {
            max_connections: 1,
            ..no_static()
        });
        let held = server.connection_slots().try_acquire().unwrap();

        let resp = get(server.router(), "/ws").await;
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);

        // A rejected upgrade attempt does not leak the slot it reserved.
        drop(held);
        let resp = get(server.router(), "/ws").await;
        assert_ne!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(server.connection_slots().in_use(), 0);
    }

    #[tokio::test]
    async fn unknown_route_without_static_dir_is_404() {
        let server = make_server(no_static());
        let resp = get(server.router(), "/nonexistent").await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn static_files_are_served() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("index.html"), "<h1>blitz</h1>").unwrap();
        let server = make_server(ServerConfig {
            static_dir: Some(dir.path().to_path_buf()),
            ..ServerConfig::default()
        });

        let resp = get(server.router(), "/index.html").await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_text(resp).await, "<h1>blitz</h1>");

        let resp = get(server.router(), "/").await;
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = get(server.router(), "/missing.js").await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn listen_on_ephemeral_port_and_shutdown() {
        let server = make_server(ServerConfig {
            host: "127.0.0.1".into(),
            port: 0,
            ..no_static()
        });
        let (addr, handle) = server.listen().await.unwrap();
        assert_ne!(addr.port(), 0);

        server.shutdown().shutdown();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[test]
    fn accessors() {
        let server = make_server(no_static());
        assert_eq!(server.config().port, 8765);
        assert!(!server.shutdown().is_shutting_down());
        assert!(server.dispatcher().table().command_names().contains(&"ping".to_owned()));
    }
}
