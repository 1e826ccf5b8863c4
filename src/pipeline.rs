//! The in-band request pipeline: ingress -> normalize -> admission ->
//! cache-lookup -> scanner-pipeline -> policy-engine -> scheduler ->
//! load-balancer -> upstream-call -> response-scan -> cache-store ->
//! cost-track -> metrics/audit -> egress. This module is the
//! orchestration glue the component modules describe only individually:
//! a top-to-bottom "collect findings, decide, record" shape that threads
//! every subsystem in this crate into one request lifecycle.

use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::audit::{AuditEvent, AuditSink};
use crate::backpressure::{self, CircuitBreaker, LoadThresholds};
use crate::cache::{CacheMetadata, SemanticCache};
use crate::cost::CostTracker;
use crate::error::GatewayError;
use crate::loadbalancer::{Executor, LoadBalancer};
use crate::model::{Request, Response};
use crate::policy::{Decision, EvalContext, PolicyEngine};
use crate::queue::PriorityQueue;
use crate::scanner::{AggregatedVerdict, ScannerPipeline};
use crate::scheduler::{DefaultRetryClassifier, Scheduler};
use crate::tenant::{TenantManager, UsageDelta};

/// Pluggable embedding generator ( assumes an embedding arrives
/// with the prompt; generation itself is an external collaborator whose
/// failure is locally recoverable — the pipeline degrades to a cache
/// miss, class 1).
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f64>, String>;
}

/// Deterministic, dependency-free fallback: hashes n-grams into fixed-size
/// buckets. Good enough to exercise the cache's similarity gate in tests
/// and demos; a real deployment wires in a provider-backed embedder here.
pub struct HashEmbeddingProvider {
    pub dim: usize,
}

#[async_trait]
impl EmbeddingProvider for HashEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f64>, String> {
        let mut vector = vec![0.0; self.dim.max(1)];
        for (i, byte) in text.bytes().enumerate() {
            let bucket = (byte as usize + i) % vector.len();
            vector[bucket] += 1.0;
        }
        Ok(vector)
    }
}

/// Outcome handed back to the ingress caller once the full pipeline
/// completes (or is rejected by an earlier stage).
pub struct PipelineOutcome {
    pub response: Response,
    pub cached: bool,
    pub verdict: AggregatedVerdict,
}

/// The wiring that owns every subsystem instance (: "every
/// subsystem is instantiated once at startup with its configuration and
/// a reference to its collaborators").
pub struct GatewayPipeline {
    pub tenants: TenantManager,
    pub policies: RwLock<Arc<PolicyEngine>>,
    pub scanners: Arc<ScannerPipeline>,
    pub queue: PriorityQueue,
    pub scheduler: Scheduler,
    pub backpressure_thresholds: LoadThresholds,
    pub shed_priorities: Vec<crate::model::Priority>,
    pub circuit: CircuitBreaker,
    pub cache: SemanticCache,
    pub embeddings: Arc<dyn EmbeddingProvider>,
    pub load_balancer: LoadBalancer,
    pub cost_tracker: CostTracker,
    pub audit: Arc<dyn AuditSink>,
}

impl GatewayPipeline {
    /// Builds the full subsystem wiring from a loaded config document plus
    /// policy/tenant documents, registering every built-in scanner (spec
    /// §4.1's named variants) the way `main` assembles one of everything
    /// "at startup with its configuration and a reference to its
    /// collaborators" (§5).
    pub fn from_config(config: &crate::config::GatewayConfig, policies: Vec<crate::policy::Policy>, tenants: Vec<crate::tenant::Tenant>) -> Self {
        let scanners: Vec<Arc<dyn crate::scanner::Scanner>> = vec![
            Arc::new(crate::scanner::pii::PiiScanner::new()),
            Arc::new(crate::scanner::prompt_injection::PromptInjectionScanner::new()),
            Arc::new(crate::scanner::toxicity::ToxicityScanner::new()),
            Arc::new(crate::scanner::dlp::DlpScanner::new()),
            Arc::new(crate::scanner::compliance::ComplianceScanner::new()),
        ];
        let mode = if config.scanner.parallel { crate::scanner::ScanMode::Parallel } else { crate::scanner::ScanMode::Sequential };

        // A tenant document that omits quotas falls back to `tenant.defaultQuotas`.
        let default_quotas = config.tenant.as_quotas();
        let tenants = tenants
            .into_iter()
            .map(|mut tenant| {
                if tenant.quotas.is_empty() {
                    tenant.quotas = default_quotas.clone();
                }
                tenant
            })
            .collect();

        Self {
            tenants: TenantManager::new(tenants),
            policies: RwLock::new(Arc::new(PolicyEngine::new(policies))),
            scanners: Arc::new(ScannerPipeline::new(scanners, mode, Duration::from_millis(config.scanner.timeout_ms))),
            queue: PriorityQueue::new(config.queue.max_size, config.queue.enable_fairness),
            scheduler: Scheduler::new(
                1,
                config.queue.max_concurrent,
                config.lb.max_retries,
                config.lb.retry_delay(),
                2.0,
                Duration::from_secs(30),
            ),
            backpressure_thresholds: config.backpressure.thresholds,
            shed_priorities: config.backpressure.shed_priorities.clone(),
            circuit: CircuitBreaker::new(config.circuit.window, config.circuit.threshold, Duration::from_millis(config.circuit.cooldown_ms), config.circuit.probe_batch),
            cache: SemanticCache::new(config.cache.similarity_threshold, config.cache.max_entries, config.cache.ttl()),
            embeddings: Arc::new(HashEmbeddingProvider { dim: config.cache.embedding_dim }),
            load_balancer: LoadBalancer::new(
                config.lb.algorithm,
                config.endpoints.clone(),
                config.lb.max_retries,
                config.lb.retry_delay(),
            ),
            cost_tracker: CostTracker::new(config.cost.pricing_table(), config.cost.budgets.clone()),
            audit: Arc::new(crate::audit::TracingAuditSink),
        }
    }

    /// Atomically publishes a new policy snapshot (: copy-on-write
    /// publication through an atomic pointer swap; readers never block
    /// writers).
    pub fn publish_policies(&self, engine: PolicyEngine) {
        *self.policies.write().expect("policy lock poisoned") = Arc::new(engine);
    }

    /// Runs one request through the full lifecycle described in ,
    /// given an `Executor` for the upstream call and an approximate
    /// current load signal (queue/processing utilization, normally
    /// computed by the caller from live gauges).
    pub async fn handle(&self, mut request: Request, load_signal: f64, executor: &dyn Executor) -> Result<PipelineOutcome, GatewayError> {
        let now = Utc::now();
        let correlation_id = request.correlation_id;

        // ── admission: tenant access + quotas ──
        if let Some(tenant_id) = request.tenant_id.clone() {
            self.tenants.validate_access(&tenant_id, &request.provider, &request.model, now)?;
        }

        // ── admission: cost budgets ──
        for status in self.cost_tracker.check_budget(request.user_id.as_deref(), request.tenant_id.as_deref(), now) {
            if status.exceeded {
                return Err(GatewayError::BudgetExceeded(format!(
                    "{:?} budget {} exceeded: {:.2}/{:.2}",
                    status.scope,
                    status.scope_id.as_deref().unwrap_or("*"),
                    status.current,
                    status.limit,
                )));
            }
        }

        // ── admission: backpressure + circuit breaker ──
        let level = self.backpressure_thresholds.classify(load_signal);
        let mut rng = rand::thread_rng();
        backpressure::admit(level, request.priority, &self.shed_priorities, load_signal, &mut rng)?;
        if !self.circuit.allow(request.priority) {
            return Err(GatewayError::CircuitOpen);
        }

        // ── cache lookup ──
        let prompt = request.user_text();
        let embedding = self.embeddings.embed(&prompt).await.unwrap_or_default();
        let cache_metadata = CacheMetadata {
            provider: request.provider.clone(),
            model: request.model.clone(),
            temperature: request.parameters.temperature,
            organization_id: request.tenant_id.clone(),
        };
        if !embedding.is_empty() {
            if let Some(hit) = self.cache.lookup(&embedding, &cache_metadata).await {
                self.record_usage(&request, 0, 0, 0.0, true, false, now);
                self.audit
                    .record(AuditEvent::from_decision(
                        correlation_id,
                        request.user_id.clone(),
                        request.tenant_id.clone(),
                        &Decision::Allow,
                        crate::model::Severity::None,
                        vec![],
                        now,
                    ))
                    .await;
                let response = Response { correlation_id, content: hit.response, input_tokens: 0, output_tokens: 0, cached: true };
                return Ok(PipelineOutcome { response, cached: true, verdict: AggregatedVerdict::empty() });
            }
        }

        // ── scanner pipeline ──
        let verdict = self.scanners.scan(&request).await;

        // ── policy engine ──
        let snapshot = self.policies.read().expect("policy lock poisoned").clone();
        let ctx = EvalContext {
            event_type: "chat",
            user_group: request.user_group.as_deref(),
            provider: &request.provider,
            model: &request.model,
            verdict: &verdict,
        };
        let decision = snapshot.evaluate(&ctx);

        crate::metrics::POLICY_DECISIONS.with_label_values(&[decision_label(&decision)]).inc();

        match &decision {
            Decision::Block { policy_id, message } => {
                self.record_usage(&request, 0, 0, 0.0, false, true, now);
                self.audit
                    .record(AuditEvent::from_decision(
                        correlation_id,
                        request.user_id.clone(),
                        request.tenant_id.clone(),
                        &decision,
                        verdict.overall_threat_level,
                        verdict.findings.clone(),
                        now,
                    ))
                    .await;
                return Err(GatewayError::PolicyBlocked { policy_id: policy_id.clone(), message: message.clone() });
            }
            Decision::Redact { replacement, .. } => {
                let spans: Vec<String> = verdict.findings.iter().map(|f| f.evidence.clone()).collect();
                request.redact(&spans, replacement);
            }
            Decision::Allow | Decision::Alert { .. } | Decision::Log { .. } => {}
        }

        // ── scheduler: admission queue + bounded worker pool ──
        let deadline = Instant::now() + Duration::from_secs(30);
        let queue_id = self.queue.enqueue(request.clone(), Some(deadline))?;
        let enqueued_at = Instant::now();
        let (picked, expired) = self.queue.dequeue();
        for timed_out in expired {
            if timed_out.id == queue_id {
                return Err(GatewayError::Timeout);
            }
        }
        let Some(picked) = picked else { return Err(GatewayError::InternalError("dequeue produced nothing".to_string())) };
        let dequeued_at = Instant::now();

        let model = picked.request.model.clone();
        let prompt_for_dispatch = picked.request.user_text();
        let circuit = &self.circuit;
        let lb = &self.load_balancer;
        let (dispatch_result, _metrics) = self
            .scheduler
            .run(enqueued_at, dequeued_at, &DefaultRetryClassifier, || async {
                match lb.dispatch(&model, &prompt_for_dispatch, executor).await {
                    Ok(outcome) => {
                        circuit.record(true);
                        Ok(outcome)
                    }
                    Err(err) => {
                        circuit.record(false);
                        Err(err.to_string())
                    }
                }
            })
            .await;
        self.queue.mark_complete(picked.user_id.as_deref());

        let outcome = dispatch_result.map_err(GatewayError::UpstreamFailure)?;

        // ── response scan + cost track + cache store ──
        let input_tokens = prompt.split_whitespace().count() as u64;
        let output_tokens = outcome.response.split_whitespace().count() as u64;

        if !embedding.is_empty() {
            self.cache.store(embedding, prompt.clone(), outcome.response.clone(), cache_metadata).await;
        }

        let cost_entry = self.cost_tracker.record(
            Uuid::new_v4(),
            &request.provider,
            &request.model,
            request.user_id.as_deref(),
            request.tenant_id.as_deref(),
            input_tokens,
            output_tokens,
            false,
            now,
        );
        self.record_usage(&request, input_tokens + output_tokens, 0, cost_entry.total_cost, false, false, now);

        self.audit
            .record(AuditEvent::from_decision(
                correlation_id,
                request.user_id.clone(),
                request.tenant_id.clone(),
                &decision,
                verdict.overall_threat_level,
                verdict.findings.clone(),
                now,
            ))
            .await;
        crate::metrics::REQUESTS_TOTAL.with_label_values(&["allow"]).inc();

        let response = Response { correlation_id, content: outcome.response, input_tokens, output_tokens, cached: false };
        Ok(PipelineOutcome { response, cached: false, verdict })
    }

    #[allow(clippy::too_many_arguments)]
    fn record_usage(&self, request: &Request, tokens: u64, requests: u64, cost: f64, cache_hit: bool, blocked: bool, now: chrono::DateTime<Utc>) {
        let Some(tenant_id) = &request.tenant_id else { return };
        let delta = UsageDelta { requests: requests.max(1), tokens, cost, cache_hit, cache_miss: !cache_hit && !blocked, blocked, error: false };
        self.tenants.record_usage(tenant_id, &delta, now);
    }
}

fn decision_label(decision: &Decision) -> &'static str {
    match decision {
        Decision::Allow => "allow",
        Decision::Block { .. } => "block",
        Decision::Alert { .. } => "alert",
        Decision::Redact { .. } => "redact",
        Decision::Log { .. } => "log",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loadbalancer::{Algorithm, EndpointConfig};
    use crate::model::{Content, CorrelationId, Message, Parameters, Priority, Role};
    use crate::policy::{Action, Condition, Field, Operator, Policy};
    use crate::tenant::Tenant;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct EchoExecutor;
    #[async_trait]
    impl Executor for EchoExecutor {
        async fn execute(&self, _e: &crate::loadbalancer::EndpointConfig, prompt: &str) -> Result<String, String> {
            Ok(format!("echo: {prompt}"))
        }
    }

    fn make_request(text: &str, tenant_id: Option<&str>) -> Request {
        Request {
            correlation_id: CorrelationId::new(),
            tenant_id: tenant_id.map(str::to_string),
            user_id: Some("u1".into()),
            user_group: None,
            provider: "openai".into(),
            model: "gpt-4".into(),
            messages: vec![Message { role: Role::User, content: Content::Text(text.to_string()) }],
            parameters: Parameters::default(),
            streaming: false,
            priority: Priority::Normal,
        }
    }

    fn build_pipeline(policies: Vec<Policy>) -> GatewayPipeline {
        GatewayPipeline {
            tenants: TenantManager::new(vec![Tenant {
                id: "t1".into(),
                enabled: true,
                config: crate::tenant::TenantConfig::default(),
                quotas: vec![],
                policy_ids: vec![],
            }]),
            policies: RwLock::new(Arc::new(PolicyEngine::new(policies))),
            scanners: Arc::new(ScannerPipeline::new(
                vec![Arc::new(crate::scanner::pii::PiiScanner::new())],
                crate::scanner::ScanMode::Parallel,
                Duration::from_millis(500),
            )),
            queue: PriorityQueue::new(100, true),
            scheduler: Scheduler::new(1, 4, 2, Duration::from_millis(1), 2.0, Duration::from_millis(50)),
            backpressure_thresholds: LoadThresholds::default(),
            shed_priorities: vec![Priority::Low, Priority::Background],
            circuit: CircuitBreaker::new(20, 0.5, Duration::from_millis(100), 2),
            cache: SemanticCache::new(0.9, 100, Duration::from_secs(60)),
            embeddings: Arc::new(HashEmbeddingProvider { dim: 32 }),
            load_balancer: LoadBalancer::new(
                Algorithm::RoundRobin,
                vec![EndpointConfig {
                    id: "a".into(),
                    provider: "openai".into(),
                    base_url: "https://example.test".into(),
                    credential: String::new(),
                    weight: 1.0,
                    priority: 1,
                    max_connections: 4,
                    enabled: true,
                    pricing: None,
                }],
                2,
                Duration::from_millis(1),
            ),
            cost_tracker: CostTracker::new(crate::cost::default_pricing_table(), vec![]),
            audit: Arc::new(crate::audit::TracingAuditSink),
        }
    }

    #[tokio::test]
    async fn clean_request_is_allowed_and_dispatched() {
        let pipeline = build_pipeline(vec![]);
        let request = make_request("hello there", Some("t1"));
        let outcome = pipeline.handle(request, 0.1, &EchoExecutor).await.unwrap();
        assert!(outcome.response.content.contains("echo:"));
        assert!(!outcome.cached);
    }

    #[tokio::test]
    async fn ssn_block_policy_short_circuits_before_dispatch() {
        let policy = Policy {
            id: "block-ssn".into(),
            name: "block ssn".into(),
            priority: 1,
            enabled: true,
            conditions: vec![
                Condition { field: Field::FindingType, operator: Operator::Contains, value: "SSN".into() },
            ],
            actions: vec![Action::Block { message: "ssn detected".into() }],
        };
        let pipeline = build_pipeline(vec![policy]);
        let request = make_request("My SSN is 123-45-6789", Some("t1"));
        let err = pipeline.handle(request, 0.1, &EchoExecutor).await.unwrap_err();
        assert_eq!(err.code(), "PolicyBlocked");
    }

    #[tokio::test]
    async fn disabled_tenant_rejected_before_any_scan() {
        let calls = Arc::new(AtomicU32::new(0));
        struct CountingExecutor(Arc<AtomicU32>);
        #[async_trait]
        impl Executor for CountingExecutor {
            async fn execute(&self, _e: &crate::loadbalancer::EndpointConfig, prompt: &str) -> Result<String, String> {
                self.0.fetch_add(1, Ordering::Relaxed);
                Ok(format!("echo: {prompt}"))
            }
        }
        let mut pipeline = build_pipeline(vec![]);
        pipeline.tenants = TenantManager::new(vec![Tenant {
            id: "t1".into(),
            enabled: false,
            config: crate::tenant::TenantConfig::default(),
            quotas: vec![],
            policy_ids: vec![],
        }]);
        let request = make_request("hello", Some("t1"));
        let err = pipeline.handle(request, 0.1, &CountingExecutor(calls.clone())).await.unwrap_err();
        assert_eq!(err.code(), "TenantDisabled");
        assert_eq!(calls.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn second_identical_request_hits_cache_without_dispatch() {
        let calls = Arc::new(AtomicU32::new(0));
        struct CountingExecutor(Arc<AtomicU32>);
        #[async_trait]
        impl Executor for CountingExecutor {
            async fn execute(&self, _e: &crate::loadbalancer::EndpointConfig, prompt: &str) -> Result<String, String> {
                self.0.fetch_add(1, Ordering::Relaxed);
                Ok(format!("echo: {prompt}"))
            }
        }
        let pipeline = build_pipeline(vec![]);
        let executor = CountingExecutor(calls.clone());
        let r1 = make_request("what is the weather", Some("t1"));
        pipeline.handle(r1, 0.1, &executor).await.unwrap();
        let r2 = make_request("what is the weather", Some("t1"));
        let outcome = pipeline.handle(r2, 0.1, &executor).await.unwrap();
        assert!(outcome.cached);
        assert_eq!(calls.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn exceeded_user_budget_blocks_before_dispatch() {
        use crate::cost::{BudgetLimit, BudgetScope};

        let mut pipeline = build_pipeline(vec![]);
        pipeline.cost_tracker = CostTracker::new(
            crate::cost::default_pricing_table(),
            vec![BudgetLimit { scope: BudgetScope::User, scope_id: Some("u1".into()), period: crate::tenant::Period::Day, limit: 0.0, alert_threshold_pct: 100.0 }],
        );
        let request = make_request("hello", Some("t1"));
        let err = pipeline.handle(request, 0.1, &EchoExecutor).await.unwrap_err();
        assert_eq!(err.code(), "BudgetExceeded");
    }
}
