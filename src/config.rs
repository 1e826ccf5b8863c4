//! `GatewayConfig`: the YAML/JSON-deserializable configuration surface,
//! loaded from a single bundle file. Every field group has a `Default`
//! impl so an empty config file is valid, matching the "empty policy
//! set / empty scanner set" boundary cases.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::backpressure::LoadThresholds;
use crate::loadbalancer::Algorithm;
use crate::model::Priority;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScannerConfig {
    pub parallel: bool,
    pub timeout_ms: u64,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self { parallel: true, timeout_ms: 2_000 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QueueConfig {
    pub max_size: usize,
    pub max_concurrent: usize,
    pub enable_fairness: bool,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self { max_size: 1_000, max_concurrent: 16, enable_fairness: true }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackpressureStrategy {
    Shed,
    Throttle,
    Reject,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BackpressureConfig {
    pub strategy: BackpressureStrategy,
    pub shed_priorities: Vec<Priority>,
    pub thresholds: LoadThresholds,
}

impl Default for BackpressureConfig {
    fn default() -> Self {
        Self {
            strategy: BackpressureStrategy::Shed,
            shed_priorities: vec![Priority::Low, Priority::Background],
            thresholds: LoadThresholds::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CircuitConfig {
    pub threshold: f64,
    pub window: usize,
    pub cooldown_ms: u64,
    pub probe_batch: usize,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self { threshold: 0.5, window: 20, cooldown_ms: 30_000, probe_batch: 3 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoadBalancerConfig {
    pub algorithm: Algorithm,
    pub health_check_interval_ms: u64,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub max_pool_size: usize,
    pub idle_timeout_ms: u64,
}

impl Default for LoadBalancerConfig {
    fn default() -> Self {
        Self {
            algorithm: Algorithm::RoundRobin,
            health_check_interval_ms: 30_000,
            max_retries: 3,
            retry_delay_ms: 200,
            max_pool_size: 16,
            idle_timeout_ms: 60_000,
        }
    }
}

impl LoadBalancerConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CacheConfig {
    pub similarity_threshold: f64,
    pub max_entries: usize,
    pub ttl_ms: u64,
    pub embedding_dim: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { similarity_threshold: 0.92, max_entries: 10_000, ttl_ms: 3_600_000, embedding_dim: 1536 }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct TenantDefaults {
    pub max_requests_per_hour: Option<u64>,
    pub max_tokens_per_day: Option<u64>,
    pub max_cost_per_month_usd: Option<f64>,
}

impl TenantDefaults {
    /// Renders `tenant.defaultQuotas` as the `Quota` list a tenant document
    /// falls back to when it declares none of its own.
    pub fn as_quotas(&self) -> Vec<crate::tenant::Quota> {
        use crate::tenant::{Period, Quota};
        let mut quotas = Vec::new();
        if let Some(max_requests) = self.max_requests_per_hour {
            quotas.push(Quota { period: Period::Hour, max_requests: Some(max_requests), max_tokens: None, max_cost_usd: None });
        }
        if let Some(max_tokens) = self.max_tokens_per_day {
            quotas.push(Quota { period: Period::Day, max_requests: None, max_tokens: Some(max_tokens), max_cost_usd: None });
        }
        if let Some(max_cost_usd) = self.max_cost_per_month_usd {
            quotas.push(Quota { period: Period::Month, max_requests: None, max_tokens: None, max_cost_usd: Some(max_cost_usd) });
        }
        quotas
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct CostConfig {
    pub pricing: std::collections::HashMap<String, std::collections::HashMap<String, crate::cost::Pricing>>,
    pub budgets: Vec<crate::cost::BudgetLimit>,
}

impl CostConfig {
    /// Flattens the `pricing[provider][model]` nested map from the
    /// config document into the `(provider, model) -> Pricing` keying the
    /// cost tracker uses internally, seeding unset entries from
    /// `cost::default_pricing_table()` first.
    pub fn pricing_table(&self) -> std::collections::HashMap<(String, String), crate::cost::Pricing> {
        let mut table = crate::cost::default_pricing_table();
        for (provider, models) in &self.pricing {
            for (model, pricing) in models {
                table.insert((provider.clone(), model.clone()), *pricing);
            }
        }
        table
    }
}

/// Top-level configuration document: one field group per subsystem, plus
/// the static `endpoints` roster the load balancer dispatches against.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct GatewayConfig {
    pub scanner: ScannerConfig,
    pub queue: QueueConfig,
    pub backpressure: BackpressureConfig,
    pub circuit: CircuitConfig,
    pub lb: LoadBalancerConfig,
    pub cache: CacheConfig,
    pub tenant: TenantDefaults,
    pub cost: CostConfig,
    pub endpoints: Vec<crate::loadbalancer::EndpointConfig>,
}

impl GatewayConfig {
    /// Loads and validates a config document from YAML or JSON text. A
    /// malformed document is a fatal-at-startup error;
    /// an empty document deserializes to `GatewayConfig::default()`.
    pub fn from_yaml_str(text: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_is_valid_default() {
        let config = GatewayConfig::from_yaml_str("{}").unwrap();
        assert_eq!(config.queue.max_size, 1_000);
        assert!(config.backpressure.shed_priorities.contains(&Priority::Low));
    }

    #[test]
    fn malformed_document_is_an_error() {
        assert!(GatewayConfig::from_yaml_str("not: [valid: yaml: here").is_err());
    }

    #[test]
    fn pricing_table_merges_config_over_defaults() {
        let mut cost = CostConfig::default();
        let mut models = std::collections::HashMap::new();
        models.insert(
            "custom-model".to_string(),
            crate::cost::Pricing { input_price_per_million_tokens: 1.0, output_price_per_million_tokens: 2.0 },
        );
        cost.pricing.insert("custom-provider".to_string(), models);
        let table = cost.pricing_table();
        assert!(table.contains_key(&("custom-provider".to_string(), "custom-model".to_string())));
        assert!(table.contains_key(&("openai".to_string(), "gpt-4o".to_string())));
    }
}
