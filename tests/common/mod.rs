//! Shared fixtures for black-box pipeline tests: builders for requests,
//! endpoints, and tenants so individual test files stay focused on the
//! scenario under test.

use ai_gateway_core::loadbalancer::{Algorithm, EndpointConfig, Executor};
use ai_gateway_core::model::{Content, CorrelationId, Message, Parameters, Priority, Request, Role};
use ai_gateway_core::tenant::{Quota, Tenant, TenantConfig};

pub fn make_request(text: &str, tenant_id: Option<&str>, priority: Priority) -> Request {
    Request {
        correlation_id: CorrelationId::new(),
        tenant_id: tenant_id.map(str::to_string),
        user_id: Some("user-1".into()),
        user_group: None,
        provider: "openai".into(),
        model: "gpt-4".into(),
        messages: vec![Message { role: Role::User, content: Content::Text(text.to_string()) }],
        parameters: Parameters::default(),
        streaming: false,
        priority,
    }
}

pub fn make_endpoint(id: &str, priority: i64, max_connections: usize) -> EndpointConfig {
    EndpointConfig {
        id: id.to_string(),
        provider: "openai".into(),
        base_url: format!("https://{id}.example.test"),
        credential: String::new(),
        weight: 1.0,
        priority,
        max_connections,
        enabled: true,
        pricing: None,
    }
}

pub fn make_tenant(id: &str, enabled: bool, quotas: Vec<Quota>) -> Tenant {
    Tenant { id: id.to_string(), enabled, config: TenantConfig::default(), quotas, policy_ids: vec![] }
}

pub fn default_lb_algorithm() -> Algorithm {
    Algorithm::RoundRobin
}

/// Always succeeds, echoing the prompt back prefixed with the endpoint id
/// it was dispatched to - lets tests assert which endpoint served a
/// request without a real upstream.
pub struct EchoExecutor;

#[async_trait::async_trait]
impl Executor for EchoExecutor {
    async fn execute(&self, endpoint: &EndpointConfig, prompt: &str) -> Result<String, String> {
        Ok(format!("{}: {}", endpoint.id, prompt))
    }
}

/// Fails every call; used to exercise failover and circuit-breaker paths.
pub struct FailingExecutor;

#[async_trait::async_trait]
impl Executor for FailingExecutor {
    async fn execute(&self, _endpoint: &EndpointConfig, _prompt: &str) -> Result<String, String> {
        Err("upstream unavailable".to_string())
    }
}
