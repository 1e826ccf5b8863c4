//! Cost tracker: per-request cost computation from a pricing table, and
//! budget enforcement across user/tenant/global scopes.
//! Grounded on the pricing-table shape in
//! `examples/other_examples/923b9377_..._cost_tracker.rs.rs`
//! (`ModelPricing`/`default_pricing_table`), adapted to this crate's
//! `(provider, model)` keying and append-only `CostEntry` ledger.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::tenant::Period;

/* ============================= PRICING ============================= */

/// Price per million tokens for a `(provider, model)` pair.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pricing {
    pub input_price_per_million_tokens: f64,
    pub output_price_per_million_tokens: f64,
}

/// Seeds a handful of well-known provider/model pairs so the cost tracker
/// is useful out of the box; operators extend or
/// override via `cost.pricing` in config.
pub fn default_pricing_table() -> HashMap<(String, String), Pricing> {
    let mut table = HashMap::new();
    table.insert(
        ("anthropic".to_string(), "claude-opus-4".to_string()),
        Pricing { input_price_per_million_tokens: 15.0, output_price_per_million_tokens: 75.0 },
    );
    table.insert(
        ("anthropic".to_string(), "claude-sonnet-4".to_string()),
        Pricing { input_price_per_million_tokens: 3.0, output_price_per_million_tokens: 15.0 },
    );
    table.insert(
        ("anthropic".to_string(), "claude-haiku-4".to_string()),
        Pricing { input_price_per_million_tokens: 0.8, output_price_per_million_tokens: 4.0 },
    );
    table.insert(
        ("openai".to_string(), "gpt-4o".to_string()),
        Pricing { input_price_per_million_tokens: 2.5, output_price_per_million_tokens: 10.0 },
    );
    table.insert(
        ("openai".to_string(), "gpt-4o-mini".to_string()),
        Pricing { input_price_per_million_tokens: 0.15, output_price_per_million_tokens: 0.6 },
    );
    table
}

/* ============================= COST ENTRY ============================= */

/// An append-only cost record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CostEntry {
    pub id: Uuid,
    pub ts: DateTime<Utc>,
    pub provider: String,
    pub model: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub tenant_id: Option<String>,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub input_cost: f64,
    pub output_cost: f64,
    pub total_cost: f64,
    pub request_id: Uuid,
    pub cached: bool,
}

/// `{inputCost, outputCost, totalCost}` for one request. When
/// the `(provider, model)` key is absent from the pricing table, costs are
/// zero and a warning is the caller's responsibility to log.
fn compute_cost(pricing: Option<&Pricing>, input_tokens: u64, output_tokens: u64) -> (f64, f64, f64) {
    let Some(pricing) = pricing else { return (0.0, 0.0, 0.0) };
    let input_cost = input_tokens as f64 / 1_000_000.0 * pricing.input_price_per_million_tokens;
    let output_cost = output_tokens as f64 / 1_000_000.0 * pricing.output_price_per_million_tokens;
    (input_cost, output_cost, input_cost + output_cost)
}

/* ============================= BUDGETS ============================= */

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BudgetScope {
    User,
    Tenant,
    Global,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BudgetLimit {
    pub scope: BudgetScope,
    /// Ignored when `scope == Global`.
    #[serde(default)]
    pub scope_id: Option<String>,
    pub period: Period,
    pub limit: f64,
    /// Percentage (0-100) of `limit` at which an alert is raised.
    pub alert_threshold_pct: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BudgetStatus {
    pub scope: BudgetScope,
    pub scope_id: Option<String>,
    pub period: Period,
    pub current: f64,
    pub limit: f64,
    pub pct: f64,
    pub exceeded: bool,
    pub alert_triggered: bool,
}

/* ============================= TRACKER ============================= */

/// Per-request cost computation plus budget checks, backed by an
/// append-only in-memory ledger. Single-writer discipline via
/// one `Mutex` guarding the ledger and registered budgets, matching
/// `TenantManager`'s per-subject lock.
pub struct CostTracker {
    pricing: HashMap<(String, String), Pricing>,
    budgets: Vec<BudgetLimit>,
    ledger: Mutex<Vec<CostEntry>>,
}

impl CostTracker {
    pub fn new(pricing: HashMap<(String, String), Pricing>, budgets: Vec<BudgetLimit>) -> Self {
        Self { pricing, budgets, ledger: Mutex::new(Vec::new()) }
    }

    /// Computes and records the cost of one completed request, returning
    /// the entry so the caller can feed it into tenant usage recording.
    #[allow(clippy::too_many_arguments)]
    pub fn record(
        &self,
        request_id: Uuid,
        provider: &str,
        model: &str,
        user_id: Option<&str>,
        tenant_id: Option<&str>,
        input_tokens: u64,
        output_tokens: u64,
        cached: bool,
        now: DateTime<Utc>,
    ) -> CostEntry {
        let pricing = self.pricing.get(&(provider.to_string(), model.to_string()));
        let (input_cost, output_cost, total_cost) = compute_cost(pricing, input_tokens, output_tokens);
        let entry = CostEntry {
            id: Uuid::new_v4(),
            ts: now,
            provider: provider.to_string(),
            model: model.to_string(),
            user_id: user_id.map(str::to_string),
            tenant_id: tenant_id.map(str::to_string),
            input_tokens,
            output_tokens,
            input_cost,
            output_cost,
            total_cost,
            request_id,
            cached,
        };
        self.ledger.lock().expect("ledger lock poisoned").push(entry.clone());
        crate::metrics::COST_TOTAL_USD
            .with_label_values(&[provider, model])
            .inc_by((total_cost * 1_000_000.0).round() as u64);
        entry
    }

    /// Whether pricing is known for a `(provider, model)` pair; callers
    /// emit a warning event when this is `false` but tracking proceeds
    /// regardless.
    pub fn has_pricing(&self, provider: &str, model: &str) -> bool {
        self.pricing.contains_key(&(provider.to_string(), model.to_string()))
    }

    /// Evaluates every budget limit applicable to `user_id`/`tenant_id`
    /// against the ledger.
    pub fn check_budget(&self, user_id: Option<&str>, tenant_id: Option<&str>, now: DateTime<Utc>) -> Vec<BudgetStatus> {
        let ledger = self.ledger.lock().expect("ledger lock poisoned");
        self.budgets
            .iter()
            .filter(|b| applies_to(b, user_id, tenant_id))
            .map(|b| {
                let period_start = period_floor(b.period, now);
                let current: f64 = ledger
                    .iter()
                    .filter(|e| e.ts >= period_start)
                    .filter(|e| matches_scope(b, e))
                    .map(|e| e.total_cost)
                    .sum();
                let pct = if b.limit > 0.0 { current / b.limit * 100.0 } else { 0.0 };
                BudgetStatus {
                    scope: b.scope,
                    scope_id: b.scope_id.clone(),
                    period: b.period,
                    current,
                    limit: b.limit,
                    pct,
                    exceeded: current >= b.limit,
                    alert_triggered: pct >= b.alert_threshold_pct,
                }
            })
            .collect()
    }
}

fn applies_to(b: &BudgetLimit, user_id: Option<&str>, tenant_id: Option<&str>) -> bool {
    match b.scope {
        BudgetScope::Global => true,
        BudgetScope::User => b.scope_id.as_deref() == user_id && user_id.is_some(),
        BudgetScope::Tenant => b.scope_id.as_deref() == tenant_id && tenant_id.is_some(),
    }
}

fn matches_scope(b: &BudgetLimit, entry: &CostEntry) -> bool {
    match b.scope {
        BudgetScope::Global => true,
        BudgetScope::User => entry.user_id.as_deref() == b.scope_id.as_deref(),
        BudgetScope::Tenant => entry.tenant_id.as_deref() == b.scope_id.as_deref(),
    }
}

/// Period floor shared with `tenant::Period`, duplicated here rather than
/// made `pub` on `Period` because the cost tracker only ever needs the
/// boundary, never bucket storage.
fn period_floor(period: Period, now: DateTime<Utc>) -> DateTime<Utc> {
    use chrono::{Datelike, TimeZone, Timelike};
    match period {
        Period::Hour => now.with_minute(0).and_then(|d| d.with_second(0)).and_then(|d| d.with_nanosecond(0)).unwrap_or(now),
        Period::Day => now.with_hour(0).and_then(|d| d.with_minute(0)).and_then(|d| d.with_second(0)).and_then(|d| d.with_nanosecond(0)).unwrap_or(now),
        Period::Month => Utc.with_ymd_and_hms(now.year(), now.month(), 1, 0, 0, 0).single().unwrap_or(now),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 7, 27, 10, 30, 0).single().unwrap()
    }

    #[test]
    fn known_pricing_computes_nonzero_cost() {
        let tracker = CostTracker::new(default_pricing_table(), vec![]);
        let entry = tracker.record(Uuid::new_v4(), "openai", "gpt-4o", None, None, 1_000_000, 500_000, false, now());
        assert_eq!(entry.input_cost, 2.5);
        assert_eq!(entry.output_cost, 5.0);
        assert_eq!(entry.total_cost, 7.5);
    }

    #[test]
    fn unknown_pricing_yields_zero_cost_but_still_tracks() {
        let tracker = CostTracker::new(HashMap::new(), vec![]);
        let entry = tracker.record(Uuid::new_v4(), "mystery", "model-x", None, None, 100, 100, false, now());
        assert_eq!(entry.total_cost, 0.0);
        assert!(!tracker.has_pricing("mystery", "model-x"));
    }

    #[test]
    fn budget_exceeded_flags_once_limit_crossed() {
        let budgets = vec![BudgetLimit {
            scope: BudgetScope::Tenant,
            scope_id: Some("t1".into()),
            period: Period::Day,
            limit: 10.0,
            alert_threshold_pct: 80.0,
        }];
        let tracker = CostTracker::new(default_pricing_table(), budgets);
        tracker.record(Uuid::new_v4(), "openai", "gpt-4o", None, Some("t1"), 2_000_000, 1_000_000, false, now());
        let statuses = tracker.check_budget(None, Some("t1"), now());
        assert_eq!(statuses.len(), 1);
        assert!(statuses[0].exceeded);
        assert!(statuses[0].alert_triggered);
    }

    #[test]
    fn budget_for_unrelated_tenant_not_applied() {
        let budgets = vec![BudgetLimit {
            scope: BudgetScope::Tenant,
            scope_id: Some("t1".into()),
            period: Period::Day,
            limit: 10.0,
            alert_threshold_pct: 80.0,
        }];
        let tracker = CostTracker::new(default_pricing_table(), budgets);
        let statuses = tracker.check_budget(None, Some("other"), now());
        assert!(statuses.is_empty());
    }
}
