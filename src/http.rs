//! Admin HTTP surface: health/readiness/metrics plus a demo ingress route
//! that exercises the full request pipeline end to end. Grounded on
//! `build_webhook_router` — same
//! `/healthz`/`/readyz`/`/metrics` trio, generalized from admission-webhook
//! health to gateway health, plus one additional route that is this
//! crate's "in-band request path" made concrete rather than left as an
//! interface diagram (spec OVERVIEW). This is explicitly a demo surface,
//! not the admin REST/GraphQL surface spec.md places out of scope.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use prometheus::{Encoder, TextEncoder};
use serde::{Deserialize, Serialize};

use crate::error::GatewayError;
use crate::loadbalancer::{EndpointConfig, Executor};
use crate::model::{Content, CorrelationId, Message, Parameters, Priority, Request, Role};
use crate::pipeline::GatewayPipeline;

/// Upstream call stand-in for the demo ingress route: the core has no
/// bundled `ProviderAdapter` (spec §1 places provider wire formats out of
/// scope), so this executor synthesizes a response instead of making a
/// real network call, the same role `EchoExecutor` plays in
/// `pipeline`'s own tests.
pub struct DemoExecutor;

#[async_trait::async_trait]
impl Executor for DemoExecutor {
    async fn execute(&self, endpoint: &EndpointConfig, prompt: &str) -> Result<String, String> {
        Ok(format!("[demo response from {}] {}", endpoint.id, prompt))
    }
}

pub struct AppState {
    pub pipeline: Arc<GatewayPipeline>,
    pub ready: AtomicBool,
    pub queue_max_size: usize,
}

impl AppState {
    pub fn new(pipeline: Arc<GatewayPipeline>, queue_max_size: usize) -> Self {
        Self { pipeline, ready: AtomicBool::new(true), queue_max_size }
    }

    /// Approximate load signal fed to the backpressure handler: current
    /// queue occupancy over its configured capacity (§4.5: "max(queue
    /// utilization, processing utilization, ...)" — this demo surface only
    /// has the queue signal available).
    fn load_signal(&self) -> f64 {
        if self.queue_max_size == 0 {
            return 0.0;
        }
        (self.pipeline.queue.len() as f64) / (self.queue_max_size as f64 * Priority::ALL.len() as f64)
    }
}

pub fn build_admin_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics_handler))
        .route("/v1/chat/completions", post(chat_completions))
        .with_state(state)
}

async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    if state.ready.load(Ordering::Relaxed) {
        (StatusCode::OK, "READY")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
    }
}

async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let families = crate::metrics::REGISTRY.gather();
    let mut buffer = Vec::new();

    match encoder.encode(&families, &mut buffer) {
        Ok(_) => match String::from_utf8(buffer) {
            Ok(body) => (StatusCode::OK, body),
            Err(_) => (StatusCode::INTERNAL_SERVER_ERROR, "metrics encoding error".to_string()),
        },
        Err(_) => (StatusCode::INTERNAL_SERVER_ERROR, "metrics encoding error".to_string()),
    }
}

/* ============================= DEMO INGRESS ============================= */

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChatCompletionRequest {
    provider: String,
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(default)]
    tenant_id: Option<String>,
    #[serde(default)]
    user_id: Option<String>,
    #[serde(default)]
    user_group: Option<String>,
    #[serde(default)]
    temperature: Option<f64>,
    #[serde(default)]
    priority: Priority,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    role: Role,
    content: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ChatCompletionResponse {
    correlation_id: CorrelationId,
    content: String,
    cached: bool,
    input_tokens: u64,
    output_tokens: u64,
    threat_level: String,
}

struct ApiError(GatewayError);

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let body = serde_json::json!({
            "error": self.0.code(),
            "message": self.0.to_string(),
        });
        (self.0.status_code(), Json(body)).into_response()
    }
}

async fn chat_completions(State(state): State<Arc<AppState>>, Json(body): Json<ChatCompletionRequest>) -> Result<impl IntoResponse, ApiError> {
    let request = Request {
        correlation_id: CorrelationId::new(),
        tenant_id: body.tenant_id,
        user_id: body.user_id,
        user_group: body.user_group,
        provider: body.provider,
        model: body.model,
        messages: body.messages.into_iter().map(|m| Message { role: m.role, content: Content::Text(m.content) }).collect(),
        parameters: Parameters { temperature: body.temperature, max_output_tokens: None, top_p: None },
        streaming: false,
        priority: body.priority,
    };

    let load_signal = state.load_signal();
    let outcome = state.pipeline.handle(request, load_signal, &DemoExecutor).await.map_err(ApiError)?;

    Ok(Json(ChatCompletionResponse {
        correlation_id: outcome.response.correlation_id,
        content: outcome.response.content,
        cached: outcome.cached,
        input_tokens: outcome.response.input_tokens,
        output_tokens: outcome.response.output_tokens,
        threat_level: outcome.verdict.overall_threat_level.to_string(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GatewayConfig;
    use crate::loadbalancer::Algorithm;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn test_state() -> Arc<AppState> {
        let mut config = GatewayConfig::default();
        config.endpoints = vec![EndpointConfig {
            id: "demo".into(),
            provider: "openai".into(),
            base_url: "https://example.test".into(),
            credential: String::new(),
            weight: 1.0,
            priority: 1,
            max_connections: 4,
            enabled: true,
            pricing: None,
        }];
        config.lb.algorithm = Algorithm::RoundRobin;
        let pipeline = GatewayPipeline::from_config(&config, vec![], vec![]);
        Arc::new(AppState::new(Arc::new(pipeline), config.queue.max_size))
    }

    #[tokio::test]
    async fn healthz_returns_ok() {
        let router = build_admin_router(test_state());
        let response = router
            .oneshot(axum::http::Request::builder().uri("/healthz").body(axum::body::Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn metrics_endpoint_serves_text() {
        let router = build_admin_router(test_state());
        let response = router
            .oneshot(axum::http::Request::builder().uri("/metrics").body(axum::body::Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn demo_ingress_round_trips_clean_prompt() {
        let router = build_admin_router(test_state());
        let body = serde_json::json!({
            "provider": "openai",
            "model": "gpt-4",
            "messages": [{"role": "user", "content": "what's the weather"}],
        });
        let response = router
            .oneshot(
                axum::http::Request::builder()
                    .method("POST")
                    .uri("/v1/chat/completions")
                    .header("content-type", "application/json")
                    .body(axum::body::Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let parsed: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert!(parsed["content"].as_str().unwrap().contains("demo response"));
    }

    #[tokio::test]
    async fn demo_ingress_rejects_unregistered_tenant_before_scanning() {
        let router = build_admin_router(test_state());
        let body = serde_json::json!({
            "provider": "openai",
            "model": "gpt-4",
            "tenantId": "unknown-tenant",
            "messages": [{"role": "user", "content": "my SSN is 123-45-6789"}],
        });
        let response = router
            .oneshot(
                axum::http::Request::builder()
                    .method("POST")
                    .uri("/v1/chat/completions")
                    .header("content-type", "application/json")
                    .body(axum::body::Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        // No tenant registered -> Unauthorized before any scanning occurs.
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
