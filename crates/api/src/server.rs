use crate::error::ApiError;
use crate::routes::{StatusProvider, router};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// HTTP server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Interface to bind.
    pub host: String,
    /// Port to bind.
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

impl ServerConfig {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Serves the listener's HTTP surface until cancelled.
pub struct ApiServer {
    config: ServerConfig,
}

impl ApiServer {
    pub fn new(config: ServerConfig) -> Self {
        Self { config }
    }

    /// Binds and serves until `shutdown` fires.
    ///
    /// # Errors
    /// Returns [`ApiError::Bind`] if the address is unavailable.
    pub async fn serve(
        self,
        status: Arc<dyn StatusProvider>,
        shutdown: CancellationToken,
    ) -> Result<(), ApiError> {
        let addr = self.config.addr();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| ApiError::Bind {
                addr: addr.clone(),
                source,
            })?;
        info!(%addr, "HTTP server listening");

        axum::serve(listener, router(status))
            .with_graceful_shutdown(async move {
                shutdown.cancelled().await;
                info!("HTTP server shutting down");
            })
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_binds_all_interfaces_on_8080() {
        assert_eq!(ServerConfig::default().addr(), "0.0.0.0:8080");
    }

    #[tokio::test]
    async fn test_bind_conflict_is_reported() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = taken.local_addr().unwrap().port();
        let server = ApiServer::new(ServerConfig {
            host: "127.0.0.1".to_string(),
            port,
        });

        struct Idle;
        #[async_trait::async_trait]
        impl StatusProvider for Idle {
            async fn status(&self) -> chainwatch_execution::context::ListenerStatus {
                unreachable!("never served")
            }
        }

        let err = server
            .serve(Arc::new(Idle), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Bind { .. }));
    }
}
