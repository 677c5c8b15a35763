use anyhow::Result;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::get,
    Router,
};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Readiness flag flipped once the controller's watches are established
#[derive(Clone, Default)]
pub struct Readiness {
    ready: Arc<AtomicBool>,
}

impl Readiness {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_ready(&self) {
        self.ready.store(true, Ordering::SeqCst);
    }

    pub fn mark_not_ready(&self) {
        self.ready.store(false, Ordering::SeqCst);
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }
}

pub fn create_router(readiness: Readiness) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .layer(TraceLayer::new_for_http())
        .with_state(readiness)
}

/// Serve the probes until the task is aborted
pub async fn start_server(addr: SocketAddr, readiness: Readiness) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("✓ Health probes listening on {}", addr);

    axum::serve(listener, create_router(readiness))
        .await
        .map_err(|e| anyhow::anyhow!("Health server error: {}", e))?;

    Ok(())
}

async fn healthz() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "orion-operator",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn readyz(State(readiness): State<Readiness>) -> impl IntoResponse {
    if readiness.is_ready() {
        (StatusCode::OK, Json(serde_json::json!({ "status": "ready" })))
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({ "status": "starting" })),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_readyz_follows_flag() {
        let readiness = Readiness::new();

        let response = readyz(State(readiness.clone())).await.into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        readiness.mark_ready();
        let response = readyz(State(readiness.clone())).await.into_response();
        assert_eq!(response.status(), StatusCode::OK);

        readiness.mark_not_ready();
        assert!(!readiness.is_ready());
    }

    #[tokio::test]
    async fn test_healthz_is_always_ok() {
        let response = healthz().await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
