//! Core request/response data model shared by every subsystem.
//!
//! A `Request` is normalized once at ingress and then flows, largely
//! unchanged, through admission, caching, scanning, policy, scheduling,
//! and dispatch. See `crate::pipeline` for the orchestration that stitches
//! these together.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/* ============================= IDENTITY ============================= */

/// Opaque identifier attached to a request for end-to-end tracing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CorrelationId(pub Uuid);

impl CorrelationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/* ============================= PRIORITY ============================= */

/// Admission priority band. Ordering is significant: `Critical` is the
/// highest band and is drained first by the scheduler (see `crate::queue`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Priority {
    Background,
    Low,
    Normal,
    High,
    Critical,
}

impl Priority {
    pub const ALL: [Priority; 5] = [
        Priority::Critical,
        Priority::High,
        Priority::Normal,
        Priority::Low,
        Priority::Background,
    ];

    /// Index into a fixed five-band array, highest priority first.
    pub fn band_index(self) -> usize {
        match self {
            Priority::Critical => 0,
            Priority::High => 1,
            Priority::Normal => 2,
            Priority::Low => 3,
            Priority::Background => 4,
        }
    }
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Normal
    }
}

/* ============================= SEVERITY ============================= */

/// Ordinal severity in `{none, low, medium, high, critical}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum Severity {
    #[default]
    None,
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Severity-to-score mapping used when averaging a scanner's findings
    /// (`{none:0, low:0.2, medium:0.4, high:0.7, critical:1.0}`).
    pub fn score(self) -> f64 {
        match self {
            Severity::None => 0.0,
            Severity::Low => 0.2,
            Severity::Medium => 0.4,
            Severity::High => 0.7,
            Severity::Critical => 1.0,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::None => "none",
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        };
        write!(f, "{s}")
    }
}

/* ============================= MESSAGES ============================= */

/// The role of a single message in the conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A single message's content. Structured parts are flattened to text for
/// scanning purposes by `Request::extracted_text`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Content {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentPart {
    pub kind: String,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: Content,
}

impl Message {
    pub fn text(&self) -> String {
        match &self.content {
            Content::Text(s) => s.clone(),
            Content::Parts(parts) => parts
                .iter()
                .filter_map(|p| p.text.as_deref())
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

/* ============================= PARAMETERS ============================= */

/// Numeric knobs carried alongside the message list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Parameters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
}

/* ============================= REQUEST ============================= */

/// A provider-agnostic inbound request. Immutable from normalize through
/// scan; mutable only in the policy engine's redact phase (see
/// `crate::policy::Decision::Redact`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Request {
    pub correlation_id: CorrelationId,
    #[serde(default)]
    pub tenant_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub user_group: Option<String>,
    pub provider: String,
    pub model: String,
    pub messages: Vec<Message>,
    #[serde(default)]
    pub parameters: Parameters,
    #[serde(default)]
    pub streaming: bool,
    #[serde(default)]
    pub priority: Priority,
}

impl Request {
    /// Flattened text of every user-role message, the input the compliance
    /// and PII scanners inspect (§4.1: "flattened text of all user-role
    /// messages").
    pub fn user_text(&self) -> String {
        self.messages
            .iter()
            .filter(|m| m.role == Role::User)
            .map(|m| m.text())
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Flattened text of every message regardless of role, used by scanners
    /// that care about assistant/tool content too (toxicity, DLP).
    pub fn all_text(&self) -> String {
        self.messages
            .iter()
            .map(|m| m.text())
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Rewrites matched spans in the request's messages before forwarding
    /// ( `redact` action: "the rewritten request is what
    /// downstream sees"). Each `span` that appears verbatim in a message's
    /// text is replaced by `replacement`; spans already evidence-masked by
    /// a scanner (containing the redaction marker) are left untouched
    /// since they never reach the provider as-is regardless.
    pub fn redact(&mut self, spans: &[String], replacement: &str) {
        for message in &mut self.messages {
            match &mut message.content {
                Content::Text(text) => {
                    for span in spans {
                        if !span.is_empty() {
                            *text = text.replace(span.as_str(), replacement);
                        }
                    }
                }
                Content::Parts(parts) => {
                    for part in parts {
                        if let Some(text) = &mut part.text {
                            for span in spans {
                                if !span.is_empty() {
                                    *text = text.replace(span.as_str(), replacement);
                                }
                            }
                        }
                    }
                }
            }
        }
    }
}

/* ============================= RESPONSE ============================= */

/// A provider-agnostic response, produced after a successful upstream call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    pub correlation_id: CorrelationId,
    pub content: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    #[serde(default)]
    pub cached: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_band_index_orders_critical_first() {
        assert_eq!(Priority::Critical.band_index(), 0);
        assert_eq!(Priority::Background.band_index(), 4);
        assert!(Priority::Critical > Priority::High);
        assert!(Priority::Low > Priority::Background);
    }

    #[test]
    fn severity_score_matches_table() {
        assert_eq!(Severity::None.score(), 0.0);
        assert_eq!(Severity::Low.score(), 0.2);
        assert_eq!(Severity::Medium.score(), 0.4);
        assert_eq!(Severity::High.score(), 0.7);
        assert_eq!(Severity::Critical.score(), 1.0);
    }

    #[test]
    fn user_text_excludes_other_roles() {
        let req = Request {
            correlation_id: CorrelationId::new(),
            tenant_id: None,
            user_id: None,
            user_group: None,
            provider: "openai".into(),
            model: "gpt-4".into(),
            messages: vec![
                Message { role: Role::System, content: Content::Text("sys".into()) },
                Message { role: Role::User, content: Content::Text("hello".into()) },
                Message { role: Role::Assistant, content: Content::Text("hi".into()) },
            ],
            parameters: Parameters::default(),
            streaming: false,
            priority: Priority::Normal,
        };
        assert_eq!(req.user_text(), "hello");
        assert!(req.all_text().contains("sys"));
    }

    #[test]
    fn redact_replaces_span_in_text_message() {
        let mut req = Request {
            correlation_id: CorrelationId::new(),
            tenant_id: None,
            user_id: None,
            user_group: None,
            provider: "openai".into(),
            model: "gpt-4".into(),
            messages: vec![Message { role: Role::User, content: Content::Text("my SSN is 123-45-6789 ok".into()) }],
            parameters: Parameters::default(),
            streaming: false,
            priority: Priority::Normal,
        };
        req.redact(&["123-45-6789".to_string()], "[REDACTED]");
        assert_eq!(req.user_text(), "my SSN is [REDACTED] ok");
    }

    #[test]
    fn content_parts_join_with_newline() {
        let msg = Message {
            role: Role::User,
            content: Content::Parts(vec![
                ContentPart { kind: "text".into(), text: Some("a".into()) },
                ContentPart { kind: "image".into(), text: None },
                ContentPart { kind: "text".into(), text: Some("b".into()) },
            ]),
        };
        assert_eq!(msg.text(), "a\nb");
    }
}
