//! Black-box end-to-end scenarios driven through `GatewayPipeline::handle`
//! only, the way a real caller (the admin HTTP surface) would use it -
//! no reaching into private subsystem internals.

mod common;

use ai_gateway_core::config::GatewayConfig;
use ai_gateway_core::model::Priority;
use ai_gateway_core::pipeline::GatewayPipeline;
use ai_gateway_core::policy::{Action, Condition, Field, Operator, Policy};
use ai_gateway_core::tenant::{Period, Quota};
use common::{default_lb_algorithm, make_endpoint, make_request, make_tenant, EchoExecutor, FailingExecutor};

fn base_config() -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.endpoints = vec![make_endpoint("primary", 1, 8), make_endpoint("secondary", 2, 8)];
    config.lb.algorithm = default_lb_algorithm();
    config
}

#[tokio::test]
async fn ssn_in_prompt_is_blocked_before_dispatch() {
    let config = base_config();
    let block_pii = Policy {
        id: "block-pii".into(),
        name: "block PII".into(),
        priority: 1,
        enabled: true,
        conditions: vec![Condition { field: Field::FindingType, operator: Operator::Contains, value: "PII".into() }],
        actions: vec![Action::Block { message: "personal data is not allowed".into() }],
    };
    let tenant = make_tenant("acme", true, vec![]);
    let pipeline = GatewayPipeline::from_config(&config, vec![block_pii], vec![tenant]);

    let request = make_request("please remember my SSN is 123-45-6789", Some("acme"), Priority::Normal);
    let err = pipeline.handle(request, 0.1, &EchoExecutor).await.unwrap_err();
    assert_eq!(err.code(), "PolicyBlocked");
}

#[tokio::test]
async fn identical_prompt_is_served_from_cache_on_second_call() {
    let config = base_config();
    let tenant = make_tenant("acme", true, vec![]);
    let pipeline = GatewayPipeline::from_config(&config, vec![], vec![tenant]);

    let first = make_request("summarize our quarterly roadmap", Some("acme"), Priority::Normal);
    let outcome_one = pipeline.handle(first, 0.1, &EchoExecutor).await.unwrap();
    assert!(!outcome_one.cached);

    let second = make_request("summarize our quarterly roadmap", Some("acme"), Priority::Normal);
    let outcome_two = pipeline.handle(second, 0.1, &EchoExecutor).await.unwrap();
    assert!(outcome_two.cached);
    assert_eq!(outcome_two.response.content, outcome_one.response.content);
}

#[tokio::test]
async fn primary_endpoint_failure_fails_over_to_secondary() {
    let config = base_config();
    let tenant = make_tenant("acme", true, vec![]);
    let pipeline = GatewayPipeline::from_config(&config, vec![], vec![tenant]);

    struct PrimaryFailsExecutor;
    #[async_trait::async_trait]
    impl ai_gateway_core::loadbalancer::Executor for PrimaryFailsExecutor {
        async fn execute(&self, endpoint: &ai_gateway_core::loadbalancer::EndpointConfig, prompt: &str) -> Result<String, String> {
            if endpoint.id == "primary" {
                Err("primary is down".to_string())
            } else {
                Ok(format!("{}: {}", endpoint.id, prompt))
            }
        }
    }

    let request = make_request("what's the capital of France", Some("acme"), Priority::Normal);
    let outcome = pipeline.handle(request, 0.1, &PrimaryFailsExecutor).await.unwrap();
    assert!(outcome.response.content.starts_with("secondary:"));
}

#[tokio::test]
async fn all_endpoints_failing_surfaces_upstream_failure() {
    let config = base_config();
    let tenant = make_tenant("acme", true, vec![]);
    let pipeline = GatewayPipeline::from_config(&config, vec![], vec![tenant]);

    let request = make_request("hello", Some("acme"), Priority::Normal);
    let err = pipeline.handle(request, 0.1, &FailingExecutor).await.unwrap_err();
    assert_eq!(err.code(), "UpstreamFailure");
}

#[tokio::test]
async fn critical_load_sheds_non_critical_priority_requests() {
    let config = base_config();
    let tenant = make_tenant("acme", true, vec![]);
    let pipeline = GatewayPipeline::from_config(&config, vec![], vec![tenant]);

    let request = make_request("low priority batch job", Some("acme"), Priority::Low);
    let err = pipeline.handle(request, 0.99, &EchoExecutor).await.unwrap_err();
    assert_eq!(err.code(), "LoadShed");
}

#[tokio::test]
async fn critical_priority_requests_bypass_load_shedding() {
    let config = base_config();
    let tenant = make_tenant("acme", true, vec![]);
    let pipeline = GatewayPipeline::from_config(&config, vec![], vec![tenant]);

    let request = make_request("page the on-call engineer", Some("acme"), Priority::Critical);
    let outcome = pipeline.handle(request, 0.99, &EchoExecutor).await.unwrap();
    assert!(!outcome.cached);
}

#[tokio::test]
async fn request_quota_exceeded_rejects_further_requests_in_window() {
    let config = base_config();
    let quota = Quota { period: Period::Hour, max_requests: Some(1), max_tokens: None, max_cost_usd: None };
    let tenant = make_tenant("acme", true, vec![quota]);
    let pipeline = GatewayPipeline::from_config(&config, vec![], vec![tenant]);

    let first = make_request("first request this hour", Some("acme"), Priority::Normal);
    pipeline.handle(first, 0.1, &EchoExecutor).await.unwrap();

    let second = make_request("second request this hour", Some("acme"), Priority::Normal);
    let err = pipeline.handle(second, 0.1, &EchoExecutor).await.unwrap_err();
    assert_eq!(err.code(), "QuotaExceeded");
}

#[tokio::test]
async fn disabled_tenant_is_rejected_before_any_upstream_call() {
    let config = base_config();
    let tenant = make_tenant("acme", false, vec![]);
    let pipeline = GatewayPipeline::from_config(&config, vec![], vec![tenant]);

    let request = make_request("hello", Some("acme"), Priority::Normal);
    let err = pipeline.handle(request, 0.1, &EchoExecutor).await.unwrap_err();
    assert_eq!(err.code(), "TenantDisabled");
}

#[tokio::test]
async fn unregistered_tenant_is_unauthorized() {
    let config = base_config();
    let pipeline = GatewayPipeline::from_config(&config, vec![], vec![]);

    let request = make_request("hello", Some("ghost-tenant"), Priority::Normal);
    let err = pipeline.handle(request, 0.1, &EchoExecutor).await.unwrap_err();
    assert_eq!(err.code(), "Unauthorized");
}

#[tokio::test]
async fn anonymous_request_with_no_tenant_id_is_allowed() {
    let config = base_config();
    let pipeline = GatewayPipeline::from_config(&config, vec![], vec![]);

    let request = make_request("hello, no tenant attached", None, Priority::Normal);
    let outcome = pipeline.handle(request, 0.1, &EchoExecutor).await.unwrap();
    assert!(outcome.response.content.contains("hello"));
}
