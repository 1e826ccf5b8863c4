//! Policy engine: an ordered, prioritized rule set evaluated over a
//! request and its aggregated scanner verdict, emitting a terminal action.
//! Policies are loaded once into an immutable, priority-sorted `Vec`, and
//! `PolicyEngine::evaluate` never mutates or panics on a well-formed
//! snapshot.

use serde::{Deserialize, Serialize};

use crate::model::Severity;
use crate::scanner::AggregatedVerdict;

/* ============================= CONDITIONS ============================= */

/// A single field a condition can predicate on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Field {
    ThreatLevel,
    EventType,
    UserGroup,
    Provider,
    Model,
    FindingType,
    FindingSeverity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Operator {
    Equals,
    Contains,
    GreaterOrEqual,
    LessOrEqual,
}

/// A single predicate. All conditions in a policy must hold for it to
/// match (conjunction within a policy; disjunction across policies by
/// priority order,).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    pub field: Field,
    pub operator: Operator,
    pub value: String,
}

/// Context a condition is evaluated against: the request's own fields plus
/// the aggregated verdict's findings, flattened to one row per finding so a
/// single policy can match on `findingType`/`findingSeverity` pairs.
pub struct EvalContext<'a> {
    pub event_type: &'a str,
    pub user_group: Option<&'a str>,
    pub provider: &'a str,
    pub model: &'a str,
    pub verdict: &'a AggregatedVerdict,
}

impl Condition {
    /// A condition matches if it holds for the request fields directly, or
    /// for at least one finding when the field is finding-scoped.
    fn matches(&self, ctx: &EvalContext) -> bool {
        match self.field {
            Field::ThreatLevel => compare_severity(ctx.verdict.overall_threat_level, self.operator, &self.value),
            Field::EventType => compare_string(ctx.event_type, self.operator, &self.value),
            Field::UserGroup => ctx.user_group.map(|g| compare_string(g, self.operator, &self.value)).unwrap_or(false),
            Field::Provider => compare_string(ctx.provider, self.operator, &self.value),
            Field::Model => compare_string(ctx.model, self.operator, &self.value),
            Field::FindingType => ctx.verdict.findings.iter().any(|f| compare_string(&f.kind, self.operator, &self.value)),
            Field::FindingSeverity => {
                ctx.verdict.findings.iter().any(|f| compare_severity(f.severity, self.operator, &self.value))
            }
        }
    }
}

fn compare_string(actual: &str, op: Operator, value: &str) -> bool {
    match op {
        Operator::Equals => actual.eq_ignore_ascii_case(value),
        Operator::Contains => actual.to_ascii_lowercase().contains(&value.to_ascii_lowercase()),
        Operator::GreaterOrEqual | Operator::LessOrEqual => false,
    }
}

fn parse_severity(s: &str) -> Option<Severity> {
    match s.to_ascii_lowercase().as_str() {
        "none" => Some(Severity::None),
        "low" => Some(Severity::Low),
        "medium" => Some(Severity::Medium),
        "high" => Some(Severity::High),
        "critical" => Some(Severity::Critical),
        _ => None,
    }
}

fn compare_severity(actual: Severity, op: Operator, value: &str) -> bool {
    let Some(expected) = parse_severity(value) else { return false };
    match op {
        Operator::Equals => actual == expected,
        Operator::GreaterOrEqual => actual >= expected,
        Operator::LessOrEqual => actual <= expected,
        Operator::Contains => false,
    }
}

/* ============================= ACTIONS ============================= */

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Action {
    Allow,
    Block { message: String },
    Alert { message: String },
    Redact { replacement: String },
    Log { message: String },
}

/* ============================= POLICY ============================= */

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Policy {
    pub id: String,
    pub name: String,
    /// Lower values are evaluated first; the first enabled policy whose
    /// conditions all match wins.
    pub priority: i64,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub actions: Vec<Action>,
}

fn default_true() -> bool {
    true
}

impl Policy {
    /// A policy is malformed if it has no actions or a priority that can't
    /// be compared; skipped at load time, never at evaluate time (§4.2).
    fn is_well_formed(&self) -> bool {
        !self.actions.is_empty() && !self.id.is_empty()
    }

    fn matches(&self, ctx: &EvalContext) -> bool {
        self.enabled && self.conditions.iter().all(|c| c.matches(ctx))
    }
}

/* ============================= DECISION ============================= */

#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Allow,
    Block { policy_id: String, message: String },
    Alert { policy_id: String, message: String },
    Redact { policy_id: String, replacement: String },
    Log { policy_id: String, message: String },
}

impl Decision {
    pub fn policy_id(&self) -> Option<&str> {
        match self {
            Decision::Allow => None,
            Decision::Block { policy_id, .. }
            | Decision::Alert { policy_id, .. }
            | Decision::Redact { policy_id, .. }
            | Decision::Log { policy_id, .. } => Some(policy_id),
        }
    }
}

/* ============================= ENGINE ============================= */

/// Holds an immutable, priority-sorted snapshot of policies. Readers
/// observe a stable snapshot; updates
/// publish a new `PolicyEngine` rather than mutating this one in place.
#[derive(Debug, Clone, Default)]
pub struct PolicyEngine {
    policies: Vec<Policy>,
}

impl PolicyEngine {
    /// Builds a snapshot from a raw policy list, dropping malformed
    /// entries and sorting by ascending priority (first evaluated first).
    pub fn new(mut policies: Vec<Policy>) -> Self {
        policies.retain(Policy::is_well_formed);
        policies.sort_by_key(|p| p.priority);
        Self { policies }
    }

    pub fn policies(&self) -> &[Policy] {
        &self.policies
    }

    /// Evaluates the snapshot deterministically: `Evaluate(req, v) ==
    /// Evaluate(req, v)` for any fixed snapshot. No match yields
    /// `Decision::Allow`.
    pub fn evaluate(&self, ctx: &EvalContext) -> Decision {
        for policy in &self.policies {
            if !policy.matches(ctx) {
                continue;
            }
            for action in &policy.actions {
                match action {
                    Action::Allow => return Decision::Allow,
                    Action::Block { message } => {
                        return Decision::Block { policy_id: policy.id.clone(), message: message.clone() }
                    }
                    Action::Alert { message } => {
                        return Decision::Alert { policy_id: policy.id.clone(), message: message.clone() }
                    }
                    Action::Redact { replacement } => {
                        return Decision::Redact { policy_id: policy.id.clone(), replacement: replacement.clone() }
                    }
                    Action::Log { message } => {
                        return Decision::Log { policy_id: policy.id.clone(), message: message.clone() }
                    }
                }
            }
        }
        Decision::Allow
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::{Finding, Location};

    fn verdict_with_finding(kind: &str, severity: Severity) -> AggregatedVerdict {
        AggregatedVerdict {
            overall_threat_level: severity,
            overall_score: severity.score(),
            findings: vec![Finding {
                scanner_id: "pii".into(),
                kind: kind.into(),
                severity,
                confidence: 0.9,
                location: Location::Message(0),
                evidence: "***".into(),
                remediation: "n/a".into(),
            }],
            duration_ms: 1,
            passed: false,
        }
    }

    #[test]
    fn no_policies_allows_by_default() {
        let engine = PolicyEngine::new(vec![]);
        let verdict = AggregatedVerdict::empty();
        let ctx = EvalContext { event_type: "chat", user_group: None, provider: "openai", model: "gpt-4", verdict: &verdict };
        assert_eq!(engine.evaluate(&ctx), Decision::Allow);
    }

    #[test]
    fn block_on_critical_ssn_finding() {
        let policy = Policy {
            id: "p1".into(),
            name: "block ssn".into(),
            priority: 10,
            enabled: true,
            conditions: vec![
                Condition { field: Field::FindingType, operator: Operator::Contains, value: "SSN".into() },
                Condition { field: Field::FindingSeverity, operator: Operator::Equals, value: "critical".into() },
            ],
            actions: vec![Action::Block { message: "SSN detected".into() }],
        };
        let engine = PolicyEngine::new(vec![policy]);
        let verdict = verdict_with_finding("PII_SSN", Severity::Critical);
        let ctx = EvalContext { event_type: "chat", user_group: None, provider: "openai", model: "gpt-4", verdict: &verdict };
        assert_eq!(
            engine.evaluate(&ctx),
            Decision::Block { policy_id: "p1".into(), message: "SSN detected".into() }
        );
    }

    #[test]
    fn malformed_policy_skipped_at_load() {
        let malformed = Policy { id: "".into(), name: "bad".into(), priority: 1, enabled: true, conditions: vec![], actions: vec![] };
        let engine = PolicyEngine::new(vec![malformed]);
        assert!(engine.policies().is_empty());
    }

    #[test]
    fn lower_priority_number_evaluated_first() {
        let first = Policy { id: "first".into(), name: "a".into(), priority: 1, enabled: true, conditions: vec![], actions: vec![Action::Block { message: "x".into() }] };
        let second = Policy { id: "second".into(), name: "b".into(), priority: 5, enabled: true, conditions: vec![], actions: vec![Action::Allow] };
        let engine = PolicyEngine::new(vec![second, first]);
        let verdict = AggregatedVerdict::empty();
        let ctx = EvalContext { event_type: "chat", user_group: None, provider: "openai", model: "gpt-4", verdict: &verdict };
        assert_eq!(engine.evaluate(&ctx).policy_id(), Some("first"));
    }

    #[test]
    fn disabled_policy_never_matches() {
        let policy = Policy { id: "p1".into(), name: "a".into(), priority: 1, enabled: false, conditions: vec![], actions: vec![Action::Block { message: "x".into() }] };
        let engine = PolicyEngine::new(vec![policy]);
        let verdict = AggregatedVerdict::empty();
        let ctx = EvalContext { event_type: "chat", user_group: None, provider: "openai", model: "gpt-4", verdict: &verdict };
        assert_eq!(engine.evaluate(&ctx), Decision::Allow);
    }
}
