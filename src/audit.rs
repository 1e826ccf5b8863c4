//! Audit sink: the structured event contract at the core boundary (spec
//! §6 "Audit sink"). Storage is pluggable — the core only ever emits
//! through the `AuditSink` trait; a durable store is an external
//! collaborator.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{CorrelationId, Severity};
use crate::policy::Decision;
use crate::scanner::Finding;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEvent {
    pub ts: DateTime<Utc>,
    pub correlation_id: CorrelationId,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub tenant_id: Option<String>,
    pub decision: String,
    pub threat_level: Severity,
    pub findings: Vec<Finding>,
}

impl AuditEvent {
    pub fn from_decision(
        correlation_id: CorrelationId,
        user_id: Option<String>,
        tenant_id: Option<String>,
        decision: &Decision,
        threat_level: Severity,
        findings: Vec<Finding>,
        now: DateTime<Utc>,
    ) -> Self {
        let decision = match decision {
            Decision::Allow => "allow".to_string(),
            Decision::Block { .. } => "block".to_string(),
            Decision::Alert { .. } => "alert".to_string(),
            Decision::Redact { .. } => "redact".to_string(),
            Decision::Log { .. } => "log".to_string(),
        };
        Self { ts: now, correlation_id, user_id, tenant_id, decision, threat_level, findings }
    }
}

/// Pluggable audit event consumer. The default implementation
/// traces the event at `info` level and keeps no durable copy, matching
/// the "core exposes event hooks, storage is pluggable" non-goal (spec
/// §1).
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, event: AuditEvent);
}

pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn record(&self, event: AuditEvent) {
        tracing::info!(
            correlation_id = %event.correlation_id,
            tenant_id = ?event.tenant_id,
            user_id = ?event.user_id,
            decision = %event.decision,
            threat_level = %event.threat_level,
            finding_count = event.findings.len(),
            "audit_event"
        );
    }
}
