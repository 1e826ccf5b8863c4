//! Load balancer and connection pool: algorithmic endpoint selection,
//! per-endpoint connection pooling, health tracking, and failover dispatch.
//! One `Mutex<EndpointState>` per registered endpoint plus a single lock
//! for the round-robin cursor.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use rand::distributions::{Distribution, WeightedIndex};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::cost::Pricing;
use crate::error::GatewayError;

/* ============================= ENDPOINT ============================= */

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Algorithm {
    RoundRobin,
    LeastConnections,
    LeastLatency,
    WeightedRandom,
    Random,
    LeastCost,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointConfig {
    pub id: String,
    pub provider: String,
    pub base_url: String,
    #[serde(default)]
    pub credential: String,
    #[serde(default = "default_weight")]
    pub weight: f64,
    /// Failover rank: lower value attempted first (spec glossary).
    pub priority: i64,
    pub max_connections: usize,
    #[serde(default = "crate::tenant::default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub pricing: Option<Pricing>,
}

fn default_weight() -> f64 {
    1.0
}

/// Liveness stats tracked per endpoint.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointStats {
    pub active_connections: u64,
    pub total_requests: u64,
    pub success: u64,
    pub fail: u64,
    pub avg_latency_ewma_ms: f64,
    pub healthy: bool,
}

impl Default for EndpointStats {
    fn default() -> Self {
        Self { active_connections: 0, total_requests: 0, success: 0, fail: 0, avg_latency_ewma_ms: 0.0, healthy: true }
    }
}

struct PoolSlot {
    in_use: bool,
    created_at: Instant,
    last_used: Instant,
    request_count: u64,
}

struct EndpointState {
    config: EndpointConfig,
    stats: EndpointStats,
    pool: VecDeque<PoolSlot>,
}

/// One registered endpoint plus its bounded connection pool (
/// `Endpoint` + `ConnectionPoolEntry`). An endpoint is selectable iff
/// `enabled && healthy`.
pub struct Endpoint {
    state: Mutex<EndpointState>,
}

impl Endpoint {
    pub fn new(config: EndpointConfig) -> Self {
        Self { state: Mutex::new(EndpointState { config, stats: EndpointStats::default(), pool: VecDeque::new() }) }
    }

    pub fn id(&self) -> String {
        self.state.lock().expect("endpoint lock poisoned").config.id.clone()
    }

    pub fn is_selectable(&self) -> bool {
        let state = self.state.lock().expect("endpoint lock poisoned");
        state.config.enabled && state.stats.healthy
    }

    pub fn stats(&self) -> EndpointStats {
        self.state.lock().expect("endpoint lock poisoned").stats
    }

    pub fn config(&self) -> EndpointConfig {
        self.state.lock().expect("endpoint lock poisoned").config.clone()
    }

    /// Acquires a pooled connection slot: first idle slot,
    /// else a new one under `maxConnections`, else the least-recently-used
    /// busy slot (wait-on-LRU rather than actually blocking, since the
    /// pool here models a logical connection handle, not a real socket).
    fn acquire(&self, now: Instant) -> usize {
        let mut state = self.state.lock().expect("endpoint lock poisoned");
        if let Some((i, _)) = state.pool.iter().enumerate().find(|(_, s)| !s.in_use) {
            state.pool[i].in_use = true;
            state.pool[i].last_used = now;
            state.pool[i].request_count += 1;
            state.stats.active_connections += 1;
            return i;
        }
        let max_connections = state.config.max_connections;
        if state.pool.len() < max_connections {
            state.pool.push_back(PoolSlot { in_use: true, created_at: now, last_used: now, request_count: 1 });
            state.stats.active_connections += 1;
            return state.pool.len() - 1;
        }
        let lru = state
            .pool
            .iter()
            .enumerate()
            .min_by_key(|(_, s)| s.last_used)
            .map(|(i, _)| i)
            .expect("pool at capacity implies non-empty");
        state.pool[lru].in_use = true;
        state.pool[lru].last_used = now;
        state.pool[lru].request_count += 1;
        state.stats.active_connections += 1;
        lru
    }

    fn release(&self, slot: usize, now: Instant) {
        let mut state = self.state.lock().expect("endpoint lock poisoned");
        if let Some(s) = state.pool.get_mut(slot) {
            s.in_use = false;
            s.last_used = now;
        }
        state.stats.active_connections = state.stats.active_connections.saturating_sub(1);
    }

    /// Reaps idle slots older than `idle_timeout`.
    pub fn reap_idle_at(&self, idle_timeout: Duration, now: Instant) -> usize {
        let mut state = self.state.lock().expect("endpoint lock poisoned");
        let before = state.pool.len();
        state.pool.retain(|s| s.in_use || now.duration_since(s.last_used) < idle_timeout);
        before - state.pool.len()
    }

    pub fn pool_len(&self) -> usize {
        self.state.lock().expect("endpoint lock poisoned").pool.len()
    }

    /// Records a dispatch outcome and updates the health flag and EWMA
    /// latency (: "sticky boolean flipped by the health
    /// tracker"; `avg' = 0.9*avg + 0.1*sample`).
    fn record_outcome(&self, success: bool, latency_ms: f64) {
        let mut state = self.state.lock().expect("endpoint lock poisoned");
        state.stats.total_requests += 1;
        if success {
            state.stats.success += 1;
            state.stats.avg_latency_ewma_ms = 0.9 * state.stats.avg_latency_ewma_ms + 0.1 * latency_ms;
        } else {
            state.stats.fail += 1;
        }
        let total = state.stats.total_requests;
        let fail_rate = state.stats.fail as f64 / total as f64;
        if total > 10 && fail_rate > 0.5 {
            state.stats.healthy = false;
        } else if fail_rate <= 0.5 {
            state.stats.healthy = true;
        }
        crate::metrics::ENDPOINT_HEALTHY
            .with_label_values(&[&state.config.id])
            .set(if state.stats.healthy { 1 } else { 0 });
    }
}

/* ============================= SELECTION ============================= */

/// Picks one candidate index from `candidates` per the configured
/// algorithm. `cursor` backs round-robin's rotating index.
fn select<'a>(
    algorithm: Algorithm,
    candidates: &[(&'a Endpoint, EndpointStats, EndpointConfig)],
    model: &str,
    cursor: &AtomicUsize,
    rng: &mut impl Rng,
) -> Option<usize> {
    if candidates.is_empty() {
        return None;
    }
    match algorithm {
        Algorithm::RoundRobin => {
            let i = cursor.fetch_add(1, Ordering::Relaxed) % candidates.len();
            Some(i)
        }
        Algorithm::LeastConnections => candidates
            .iter()
            .enumerate()
            .min_by_key(|(_, (_, stats, _))| stats.active_connections)
            .map(|(i, _)| i),
        Algorithm::LeastLatency => candidates
            .iter()
            .enumerate()
            .min_by(|(_, (_, a, _)), (_, (_, b, _))| a.avg_latency_ewma_ms.total_cmp(&b.avg_latency_ewma_ms))
            .map(|(i, _)| i),
        Algorithm::WeightedRandom => {
            let weights: Vec<f64> = candidates.iter().map(|(_, _, cfg)| cfg.weight.max(0.0001)).collect();
            WeightedIndex::new(&weights).ok().map(|dist| dist.sample(rng))
        }
        Algorithm::Random => Some(rng.gen_range(0..candidates.len())),
        Algorithm::LeastCost => {
            // Rank by (inPrice + outPrice) for the requested model (spec
            // §9 REDESIGN FLAG), falling back to round-robin when no
            // candidate carries pricing for `model`.
            let priced: Vec<(usize, f64)> = candidates
                .iter()
                .enumerate()
                .filter_map(|(i, (_, _, cfg))| {
                    cfg.pricing.map(|p| (i, p.input_price_per_million_tokens + p.output_price_per_million_tokens))
                })
                .collect();
            let _ = model;
            if priced.is_empty() {
                let i = cursor.fetch_add(1, Ordering::Relaxed) % candidates.len();
                Some(i)
            } else {
                priced.into_iter().min_by(|a, b| a.1.total_cmp(&b.1)).map(|(i, _)| i)
            }
        }
    }
}

/* ============================= DISPATCHER ============================= */

pub struct DispatchOutcome {
    pub endpoint_id: String,
    pub response: String,
}

/// A single upstream call, injected so the dispatcher is testable without
/// real network I/O. Mirrors the `ProviderAdapter` boundary from 
#[async_trait::async_trait]
pub trait Executor: Send + Sync {
    async fn execute(&self, endpoint: &EndpointConfig, prompt: &str) -> Result<String, String>;
}

pub struct LoadBalancer {
    algorithm: Algorithm,
    endpoints: Vec<Endpoint>,
    cursor: AtomicUsize,
    max_retries: u32,
    retry_delay: Duration,
}

impl LoadBalancer {
    pub fn new(algorithm: Algorithm, endpoints: Vec<EndpointConfig>, max_retries: u32, retry_delay: Duration) -> Self {
        Self {
            algorithm,
            endpoints: endpoints.into_iter().map(Endpoint::new).collect(),
            cursor: AtomicUsize::new(0),
            max_retries,
            retry_delay,
        }
    }

    pub fn endpoints(&self) -> &[Endpoint] {
        &self.endpoints
    }

    fn candidates(&self) -> Vec<(&Endpoint, EndpointStats, EndpointConfig)> {
        self.endpoints
            .iter()
            .filter(|e| e.is_selectable())
            .map(|e| (e, e.stats(), e.config()))
            .collect()
    }

    /// Selects one endpoint id using the configured algorithm, without
    /// dispatching. Exposed for tests and for the `least-cost` property
    /// check in 
    pub fn select_endpoint(&self, model: &str, rng: &mut impl Rng) -> Option<String> {
        let candidates = self.candidates();
        let i = select(self.algorithm, &candidates, model, &self.cursor, rng)?;
        Some(candidates[i].2.id.clone())
    }

    /// Iterates endpoints in ascending failover `priority`, attempting
    /// each via the connection pool; on failure, records the outcome,
    /// sleeps `retryDelay`, and tries the next, stopping after
    /// `maxRetries` attempts or exhaustion.
    pub async fn dispatch(&self, model: &str, prompt: &str, executor: &dyn Executor) -> Result<DispatchOutcome, GatewayError> {
        let mut ordered: Vec<&Endpoint> = self.endpoints.iter().filter(|e| e.is_selectable()).collect();
        ordered.sort_by_key(|e| e.config().priority);

        if ordered.is_empty() {
            return Err(GatewayError::UpstreamFailure("no healthy endpoints".to_string()));
        }

        // The configured algorithm picks which endpoint within the best
        // failover tier goes first; failover rank still governs the
        // retry chain for every attempt after that (§4.6: "priority =
        // failover rank, not scheduling priority").
        let top_priority = ordered[0].config().priority;
        let top_tier: Vec<(&Endpoint, EndpointStats, EndpointConfig)> = ordered
            .iter()
            .filter(|e| e.config().priority == top_priority)
            .map(|e| (*e, e.stats(), e.config()))
            .collect();
        let mut rng = rand::thread_rng();
        if let Some(i) = select(self.algorithm, &top_tier, model, &self.cursor, &mut rng) {
            let chosen_id = top_tier[i].2.id.clone();
            if let Some(pos) = ordered.iter().position(|e| e.config().id == chosen_id) {
                let chosen = ordered.remove(pos);
                ordered.insert(0, chosen);
            }
        }

        let mut last_error = String::new();
        let mut attempts = 0u32;
        for endpoint in ordered {
            if attempts >= self.max_retries {
                break;
            }
            attempts += 1;
            let config = endpoint.config();
            let slot = endpoint.acquire(Instant::now());
            let started = Instant::now();
            let result = executor.execute(&config, prompt).await;
            endpoint.release(slot, Instant::now());
            let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;

            match result {
                Ok(response) => {
                    endpoint.record_outcome(true, elapsed_ms);
                    let _ = model;
                    return Ok(DispatchOutcome { endpoint_id: config.id, response });
                }
                Err(err) => {
                    endpoint.record_outcome(false, elapsed_ms);
                    last_error = err;
                    tokio::time::sleep(self.retry_delay).await;
                }
            }
        }
        Err(GatewayError::UpstreamFailure(last_error))
    }

    /// Background reaper tick across every endpoint's pool.
    pub fn reap_idle_at(&self, idle_timeout: Duration, now: Instant) -> usize {
        self.endpoints.iter().map(|e| e.reap_idle_at(idle_timeout, now)).sum()
    }
}
