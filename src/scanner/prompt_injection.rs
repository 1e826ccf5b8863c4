//! Prompt-injection / jailbreak-phrase scanner: flags
//! user-authored text that attempts to override system instructions or
//! extract hidden context. Pattern list is illustrative, not exhaustive.

use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;

use crate::model::{Request, Severity};

use super::{mask_evidence, Finding, Location, Scanner, ScannerVerdict};

struct Pattern {
    kind: &'static str,
    severity: Severity,
    confidence: f64,
    regex: &'static LazyLock<Regex>,
    remediation: &'static str,
}

static IGNORE_INSTRUCTIONS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)ignore (all|any|the) (previous|prior|above) (instructions|rules|prompt)").unwrap()
});
static SYSTEM_OVERRIDE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(you are now|act as|pretend to be) (dan|an? unrestricted|a jailbroken)").unwrap()
});
static REVEAL_SYSTEM_PROMPT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(reveal|print|repeat|show me) (your|the) (system prompt|instructions)").unwrap()
});
static DEVELOPER_MODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bdeveloper mode\b").unwrap());

static PATTERNS: &[Pattern] = &[
    Pattern {
        kind: "PROMPT_INJECTION_OVERRIDE",
        severity: Severity::High,
        confidence: 0.8,
        regex: &IGNORE_INSTRUCTIONS,
        remediation: "block or alert; the request attempts to override system instructions",
    },
    Pattern {
        kind: "PROMPT_INJECTION_PERSONA",
        severity: Severity::Medium,
        confidence: 0.7,
        regex: &SYSTEM_OVERRIDE,
        remediation: "review for jailbreak persona framing",
    },
    Pattern {
        kind: "PROMPT_INJECTION_EXFIL",
        severity: Severity::Medium,
        confidence: 0.75,
        regex: &REVEAL_SYSTEM_PROMPT,
        remediation: "do not echo system-level instructions back to the caller",
    },
    Pattern {
        kind: "PROMPT_INJECTION_DEVMODE",
        severity: Severity::Low,
        confidence: 0.6,
        regex: &DEVELOPER_MODE,
        remediation: "low-confidence jailbreak phrasing, monitor for repetition",
    },
];

/// Detects attempts to override system instructions via the user turn.
pub struct PromptInjectionScanner;

impl PromptInjectionScanner {
    pub fn new() -> Self {
        Self
    }
}

impl Default for PromptInjectionScanner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Scanner for PromptInjectionScanner {
    fn id(&self) -> &str {
        "prompt_injection"
    }

    fn name(&self) -> &str {
        "Prompt Injection Detector"
    }

    async fn scan(&self, request: &Request) -> Result<ScannerVerdict, String> {
        let text = request.user_text();
        let mut findings = Vec::new();

        for pattern in PATTERNS {
            if let Some(m) = pattern.regex.find(&text) {
                findings.push(Finding {
                    scanner_id: self.id().to_string(),
                    kind: pattern.kind.to_string(),
                    severity: pattern.severity,
                    confidence: pattern.confidence,
                    location: Location::Message(0),
                    evidence: mask_evidence(m.as_str()),
                    remediation: pattern.remediation.to_string(),
                });
            }
        }

        let passed = findings.is_empty();
        Ok(ScannerVerdict::from_findings(self.id(), passed, findings, 0))
    }
}
