//! Tenant manager: access validation, usage recording, and quota
//! enforcement across hour/day/month windows. Uses a per-tenant
//! `Mutex<HashMap<BucketKey, UsageBucket>>`: one lock around the
//! `{period, periodStart} -> bucket` map per tenant.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Datelike, Duration as ChronoDuration, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::error::GatewayError;

/* ============================= TENANT CONFIG ============================= */

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Period {
    Hour,
    Day,
    Month,
}

impl Period {
    /// Floors `now` to the start of its own period, in UTC (server
    /// timezone; this crate treats UTC as the server tz).
    fn floor(self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            Period::Hour => now.with_minute(0).and_then(|d| d.with_second(0)).and_then(|d| d.with_nanosecond(0)).unwrap_or(now),
            Period::Day => now.with_hour(0).and_then(|d| d.with_minute(0)).and_then(|d| d.with_second(0)).and_then(|d| d.with_nanosecond(0)).unwrap_or(now),
            Period::Month => Utc
                .with_ymd_and_hms(now.year(), now.month(), 1, 0, 0, 0)
                .single()
                .unwrap_or(now),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Quota {
    pub period: Period,
    #[serde(default)]
    pub max_requests: Option<u64>,
    #[serde(default)]
    pub max_tokens: Option<u64>,
    #[serde(default)]
    pub max_cost_usd: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantConfig {
    #[serde(default)]
    pub allowed_providers: Vec<String>,
    #[serde(default)]
    pub allowed_models: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tenant {
    pub id: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub config: TenantConfig,
    #[serde(default)]
    pub quotas: Vec<Quota>,
    #[serde(default)]
    pub policy_ids: Vec<String>,
}

pub(crate) fn default_true() -> bool {
    true
}

impl Default for TenantConfig {
    fn default() -> Self {
        Self { allowed_providers: Vec::new(), allowed_models: Vec::new() }
    }
}

/* ============================= USAGE ============================= */

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageBucket {
    pub requests: u64,
    pub tokens: u64,
    pub cost: f64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub blocked: u64,
    pub errors: u64,
}

#[derive(Debug, Clone, Default)]
pub struct UsageDelta {
    pub requests: u64,
    pub tokens: u64,
    pub cost: f64,
    pub cache_hit: bool,
    pub cache_miss: bool,
    pub blocked: bool,
    pub error: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct BucketKey {
    period: Period,
    period_start_unix: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaStatus {
    pub period: Period,
    pub requests_used: u64,
    pub requests_limit: Option<u64>,
    pub tokens_used: u64,
    pub tokens_limit: Option<u64>,
    pub cost_used: f64,
    pub cost_limit: Option<f64>,
    pub exhausted: bool,
}

/* ============================= MANAGER ============================= */

/// Access-validation and per-tenant usage bookkeeping. One `TenantManager`
/// is constructed at startup with the full tenant set (: "every
/// subsystem is instantiated once at startup").
pub struct TenantManager {
    tenants: HashMap<String, Tenant>,
    usage: Mutex<HashMap<String, HashMap<BucketKey, UsageBucket>>>,
}

impl TenantManager {
    pub fn new(tenants: Vec<Tenant>) -> Self {
        let tenants = tenants.into_iter().map(|t| (t.id.clone(), t)).collect();
        Self { tenants, usage: Mutex::new(HashMap::new()) }
    }

    fn get(&self, tenant_id: &str) -> Result<&Tenant, GatewayError> {
        self.tenants.get(tenant_id).ok_or(GatewayError::Unauthorized)
    }

    /// Rejects when the tenant is disabled, the provider/model is not on
    /// its allow-list, or any quota is exhausted in its current window
    ///.
    pub fn validate_access(&self, tenant_id: &str, provider: &str, model: &str, now: DateTime<Utc>) -> Result<(), GatewayError> {
        let tenant = self.get(tenant_id)?;
        if !tenant.enabled {
            return Err(GatewayError::TenantDisabled);
        }
        if !tenant.config.allowed_providers.is_empty() && !tenant.config.allowed_providers.iter().any(|p| p == provider) {
            return Err(GatewayError::ProviderNotAllowed(provider.to_string()));
        }
        if !tenant.config.allowed_models.is_empty() && !tenant.config.allowed_models.iter().any(|m| m == model) {
            return Err(GatewayError::ModelNotAllowed(model.to_string()));
        }
        for status in self.check_quotas_at(tenant_id, now)? {
            if status.exhausted {
                return Err(GatewayError::QuotaExceeded(format!("{:?}", status.period)));
            }
        }
        Ok(())
    }

    /// Increments the hour, day, and month buckets simultaneously (spec
    /// §4.3: "increments the appropriate buckets for hour, day, and month
    /// simultaneously").
    pub fn record_usage(&self, tenant_id: &str, delta: &UsageDelta, now: DateTime<Utc>) {
        let mut usage = self.usage.lock().expect("usage lock poisoned");
        let tenant_buckets = usage.entry(tenant_id.to_string()).or_default();
        for period in [Period::Hour, Period::Day, Period::Month] {
            let key = BucketKey { period, period_start_unix: period.floor(now).timestamp() };
            let bucket = tenant_buckets.entry(key).or_default();
            bucket.requests += delta.requests;
            bucket.tokens += delta.tokens;
            bucket.cost += delta.cost;
            if delta.cache_hit {
                bucket.cache_hits += 1;
            }
            if delta.cache_miss {
                bucket.cache_misses += 1;
            }
            if delta.blocked {
                bucket.blocked += 1;
            }
            if delta.error {
                bucket.errors += 1;
            }
        }
    }

    pub fn check_quotas(&self, tenant_id: &str, now: DateTime<Utc>) -> Result<Vec<QuotaStatus>, GatewayError> {
        self.check_quotas_at(tenant_id, now)
    }

    fn check_quotas_at(&self, tenant_id: &str, now: DateTime<Utc>) -> Result<Vec<QuotaStatus>, GatewayError> {
        let tenant = self.get(tenant_id)?;
        let usage = self.usage.lock().expect("usage lock poisoned");
        let empty = HashMap::new();
        let tenant_buckets = usage.get(tenant_id).unwrap_or(&empty);

        let mut statuses = Vec::with_capacity(tenant.quotas.len());
        for quota in &tenant.quotas {
            let key = BucketKey { period: quota.period, period_start_unix: quota.period.floor(now).timestamp() };
            let bucket = tenant_buckets.get(&key).cloned().unwrap_or_default();

            let requests_exhausted = quota.max_requests.is_some_and(|max| bucket.requests >= max);
            let tokens_exhausted = quota.max_tokens.is_some_and(|max| bucket.tokens >= max);
            let cost_exhausted = quota.max_cost_usd.is_some_and(|max| bucket.cost >= max);

            statuses.push(QuotaStatus {
                period: quota.period,
                requests_used: bucket.requests,
                requests_limit: quota.max_requests,
                tokens_used: bucket.tokens,
                tokens_limit: quota.max_tokens,
                cost_used: bucket.cost,
                cost_limit: quota.max_cost_usd,
                exhausted: requests_exhausted || tokens_exhausted || cost_exhausted,
            });
        }
        Ok(statuses)
    }
}
