use async_trait::async_trait;
use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use chainwatch_execution::context::{ListenerContext, ListenerStatus};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Body of `GET /`.
pub const BANNER: &str = "chainwatch event listener";

/// Source of the `/status` document.
#[async_trait]
pub trait StatusProvider: Send + Sync {
    async fn status(&self) -> ListenerStatus;
}

#[async_trait]
impl StatusProvider for ListenerContext {
    async fn status(&self) -> ListenerStatus {
        ListenerContext::status(self).await
    }
}

type SharedStatus = Arc<dyn StatusProvider>;

/// Builds the router with request tracing.
pub fn router(status: SharedStatus) -> Router {
    Router::new()
        .route("/", get(banner))
        .route("/healthz", get(healthz))
        .route("/status", get(listener_status))
        .layer(TraceLayer::new_for_http())
        .with_state(status)
}

async fn banner() -> &'static str {
    BANNER
}

async fn healthz() -> &'static str {
    "OK"
}

async fn listener_status(State(status): State<SharedStatus>) -> Json<ListenerStatus> {
    Json(status.status().await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode};
    use chainwatch_domain::{ConnectionState, Network};
    use serde_json::{Value, json};
    use tower::ServiceExt;

    struct FixedStatus;

    #[async_trait]
    impl StatusProvider for FixedStatus {
        async fn status(&self) -> ListenerStatus {
            ListenerStatus {
                network: Network::Testnet,
                connection_state: ConnectionState::Connected,
                binding_address: Some("0x5FbDB2315678afecb367f032d93F642f64180aa3".to_string()),
                binding_version: Some(2),
                last_event_at: None,
                pending_confirmations: 1,
                reconnect_attempts: 0,
            }
        }
    }

    async fn get(path: &str) -> (StatusCode, Vec<u8>) {
        let response = router(Arc::new(FixedStatus))
            .oneshot(Request::builder().uri(path).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, body.to_vec())
    }

    #[tokio::test]
    async fn test_root_serves_banner() {
        let (status, body) = get("/").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, BANNER.as_bytes());
    }

    #[tokio::test]
    async fn test_healthz_is_ok() {
        let (status, body) = get("/healthz").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"OK");
    }

    #[tokio::test]
    async fn test_status_is_json() {
        let (status, body) = get("/status").await;
        let doc: Value = serde_json::from_slice(&body).unwrap();

        assert_eq!(status, StatusCode::OK);
        assert_eq!(doc["network"], json!("testnet"));
        assert_eq!(doc["binding_version"], json!(2));
        assert_eq!(doc["pending_confirmations"], json!(1));
    }

    #[tokio::test]
    async fn test_unknown_path_is_not_found() {
        let (status, _) = get("/metrics").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
