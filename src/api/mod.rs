//! HTTP API for health checks and allocator statistics

use crate::config::ApiConfig;
use crate::context::RelayContext;
use crate::error::{RelayerError, RelayerResult};

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub context: Arc<RelayContext>,
}

/// Routes served by the status API
pub fn router(context: Arc<RelayContext>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/stats", get(get_stats))
        .with_state(AppState { context })
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Run the HTTP API server
pub async fn run_server(config: ApiConfig, context: Arc<RelayContext>) -> RelayerResult<()> {
    let app = router(context);

    let addr = format!("{}:{}", config.host, config.port);
    info!("Starting API server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| RelayerError::Internal(format!("bind {}: {}", addr, e)))?;
    axum::serve(listener, app)
        .await
        .map_err(|e| RelayerError::Internal(e.to_string()))?;

    Ok(())
}

/// Health check endpoint - basic liveness
async fn health_check() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Readiness check - the ledger must answer
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    match state.context.ledger().chain_id().await {
        Ok(chain_id) => (
            StatusCode::OK,
            Json(ReadinessResponse {
                ready: true,
                chain_id: Some(chain_id),
                error: None,
            }),
        ),
        Err(e) => {
            warn!("Readiness check failed: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ReadinessResponse {
                    ready: false,
                    chain_id: None,
                    error: Some(e.to_string()),
                }),
            )
        }
    }
}

/// Allocator counters and per-account state
async fn get_stats(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.context.stats().await)
}

// Response types

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

#[derive(Serialize)]
struct ReadinessResponse {
    ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    chain_id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::tests::settings;
    use crate::ledger::mock::MockLedger;
    use crate::ledger::LedgerClient;
    use crate::wallet::Keyring;

    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;

    async fn get_json(app: Router, path: &str) -> (StatusCode, serde_json::Value) {
        let response = app
            .oneshot(Request::builder().uri(path).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    fn app(ledger: MockLedger) -> Router {
        let ledger: Arc<dyn LedgerClient> = Arc::new(ledger);
        let context = RelayContext::new(&settings("pooled"), ledger, Arc::new(Keyring::new()));
        router(Arc::new(context))
    }

    #[tokio::test]
    async fn test_health() {
        let (status, body) = get_json(app(MockLedger::new()), "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_ready_reports_ledger_failure() {
        let mut ledger = MockLedger::new();
        ledger
            .expect_chain_id()
            .returning(|| Err(RelayerError::Connectivity("connection refused".to_string())));

        let (status, body) = get_json(app(ledger), "/ready").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["ready"], false);
    }

    #[tokio::test]
    async fn test_ready_with_reachable_ledger() {
        let mut ledger = MockLedger::new();
        ledger.expect_chain_id().returning(|| Ok(1337));

        let (status, body) = get_json(app(ledger), "/ready").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["chain_id"], 1337);
    }

    #[tokio::test]
    async fn test_stats_snapshot() {
        let (status, body) = get_json(app(MockLedger::new()), "/stats").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["instance_id"], "ctx-test");
        assert_eq!(body["allocator"]["strategy"], "pooled");
        assert_eq!(body["allocator"]["values_issued"], 0);
        assert_eq!(body["allocator"]["pool_size"], 4);
    }
}
