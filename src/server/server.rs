//! Dispatch server implementation

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::dispatch::Dispatcher;

use super::api::create_router;
use super::config::ServerConfig;

// ============================================================================
// App State
// ============================================================================

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Dispatch facade
    pub dispatcher: Arc<Dispatcher>,

    /// Server start time
    pub start_time: Instant,
}

impl AppState {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            dispatcher,
            start_time: Instant::now(),
        }
    }
}

// ============================================================================
// Dispatch Server
// ============================================================================

/// HTTP front end for a [`Dispatcher`]
pub struct DispatchServer {
    config: ServerConfig,
    state: AppState,
}

impl DispatchServer {
    pub fn new(config: ServerConfig, dispatcher: Arc<Dispatcher>) -> Result<Self, ServerError> {
        config
            .validate()
            .map_err(|e| ServerError::ConfigError(e.to_string()))?;

        Ok(Self {
            config,
            state: AppState::new(dispatcher),
        })
    }

    /// Get the application state
    pub fn state(&self) -> AppState {
        self.state.clone()
    }

    /// Build the router with all routes
    pub fn build_router(&self) -> Router {
        let mut router = create_router(self.state.clone());

        if self.config.enable_cors {
            router = router.layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods(Any)
                    .allow_headers(Any),
            );
        }

        if self.config.enable_request_logging {
            router = router.layer(TraceLayer::new_for_http());
        }

        router
    }

    /// Serve until `shutdown_signal` resolves, then cancel pending escalations
    pub async fn start_with_shutdown(
        &self,
        shutdown_signal: impl std::future::Future<Output = ()> + Send + 'static,
    ) -> Result<(), ServerError> {
        let router = self.build_router();
        let addr = self.config.bind_address;

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::BindError(e.to_string()))?;

        tracing::info!("Starting dispatch server on {}", addr);

        let result = axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal)
            .await
            .map_err(|e| ServerError::ServeError(e.to_string()));

        self.state.dispatcher.shutdown();
        tracing::info!("Dispatch server shutdown complete");
        result
    }

    /// Get server info
    pub fn info(&self) -> ServerInfo {
        ServerInfo {
            bind_address: self.config.bind_address,
            cors_enabled: self.config.enable_cors,
            request_logging_enabled: self.config.enable_request_logging,
            escalation_timeout_secs: self.state.dispatcher.escalation().config().timeout.as_secs(),
        }
    }
}

/// Server information
#[derive(Debug, Clone)]
pub struct ServerInfo {
    pub bind_address: SocketAddr,
    pub cors_enabled: bool,
    pub request_logging_enabled: bool,
    pub escalation_timeout_secs: u64,
}

impl ServerInfo {
    /// Format as display string
    pub fn display(&self) -> String {
        format!(
            "Dispatch Server\n\
             {:-<40}\n\
             Bind Address: {}\n\
             Escalation Window: {}s\n\
             CORS: {}\n\
             Request Logging: {}",
            "",
            self.bind_address,
            self.escalation_timeout_secs,
            if self.cors_enabled { "enabled" } else { "disabled" },
            if self.request_logging_enabled { "enabled" } else { "disabled" }
        )
    }
}

// ============================================================================
// Server Errors
// ============================================================================

/// Server errors
#[derive(Debug, Clone)]
pub enum ServerError {
    /// Configuration error
    ConfigError(String),

    /// Failed to bind to address
    BindError(String),

    /// Server error
    ServeError(String),
}

impl std::fmt::Display for ServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
            Self::BindError(msg) => write!(f, "Failed to bind: {}", msg),
            Self::ServeError(msg) => write!(f, "Server error: {}", msg),
        }
    }
}

impl std::error::Error for ServerError {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::EscalationConfig;
    use crate::storage::{MemoryStore, Stores};

    fn dispatcher() -> Arc<Dispatcher> {
        Arc::new(Dispatcher::new(
            Stores::shared(Arc::new(MemoryStore::new())),
            EscalationConfig::default(),
            16,
        ))
    }

    #[test]
    fn test_server_info() {
        let config = ServerConfig::builder()
            .enable_cors(false)
            .build()
            .unwrap();

        let server = DispatchServer::new(config, dispatcher()).unwrap();
        let info = server.info();

        assert!(!info.cors_enabled);
        assert_eq!(info.escalation_timeout_secs, 30);
        assert!(info.display().contains("Escalation Window: 30s"));
    }

    #[tokio::test]
    async fn test_bind_failure_is_reported() {
        let taken = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let config = ServerConfig::builder()
            .bind_address(taken.local_addr().unwrap())
            .build()
            .unwrap();

        let server = DispatchServer::new(config, dispatcher()).unwrap();
        let result = server.start_with_shutdown(async {}).await;

        assert!(matches!(result, Err(ServerError::BindError(_))));
    }
}
