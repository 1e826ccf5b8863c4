//! PII detection scanner: regex-based recognizers for common personal
//! identifiers. Grounded on the `PiiCheckResult`/`PiiType` shape
//! from `examples/other_examples/.../gateway-integrations-src-traits.rs.rs`,
//! adapted to this crate's `Scanner`/`Finding` types.

use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;

use crate::model::{Request, Severity};

use super::{mask_evidence, Finding, Location, Scanner, ScannerVerdict};

struct Recognizer {
    kind: &'static str,
    severity: Severity,
    confidence: f64,
    pattern: &'static LazyLock<Regex>,
    remediation: &'static str,
}

static SSN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b\d{3}-\d{2}-\d{4}\b").unwrap());
static EMAIL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b[\w.+-]+@[\w-]+\.[\w.-]+\b").unwrap());
static PHONE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(?:\+1[-.\s]?)?\(?\d{3}\)?[-.\s]\d{3}[-.\s]\d{4}\b").unwrap());
static CREDIT_CARD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(?:\d[ -]*?){13,16}\b").unwrap());
static IP_ADDRESS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(?:\d{1,3}\.){3}\d{1,3}\b").unwrap());

static RECOGNIZERS: &[Recognizer] = &[
    Recognizer {
        kind: "PII_SSN",
        severity: Severity::High,
        confidence: 0.9,
        pattern: &SSN,
        remediation: "redact or tokenize social security numbers before forwarding upstream",
    },
    Recognizer {
        kind: "PII_EMAIL",
        severity: Severity::Low,
        confidence: 0.85,
        pattern: &EMAIL,
        remediation: "mask email addresses if the destination provider is untrusted",
    },
    Recognizer {
        kind: "PII_PHONE",
        severity: Severity::Medium,
        confidence: 0.75,
        pattern: &PHONE,
        remediation: "mask phone numbers if the destination provider is untrusted",
    },
    Recognizer {
        kind: "PII_CREDIT_CARD",
        severity: Severity::Critical,
        confidence: 0.8,
        pattern: &CREDIT_CARD,
        remediation: "credit card numbers must never leave the tenant boundary unmasked",
    },
    Recognizer {
        kind: "PII_IP_ADDRESS",
        severity: Severity::Low,
        confidence: 0.6,
        pattern: &IP_ADDRESS,
        remediation: "consider masking IP addresses under strict data-residency policies",
    },
];

/// Detects personal identifiers in user-authored message text.
pub struct PiiScanner;

impl PiiScanner {
    pub fn new() -> Self {
        Self
    }
}

impl Default for PiiScanner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Scanner for PiiScanner {
    fn id(&self) -> &str {
        "pii"
    }

    fn name(&self) -> &str {
        "PII Detector"
    }

    async fn scan(&self, request: &Request) -> Result<ScannerVerdict, String> {
        let text = request.user_text();
        let mut findings = Vec::new();

        for recognizer in RECOGNIZERS {
            for m in recognizer.pattern.find_iter(&text) {
                findings.push(Finding {
                    scanner_id: self.id().to_string(),
                    kind: recognizer.kind.to_string(),
                    severity: recognizer.severity,
                    confidence: recognizer.confidence,
                    location: Location::Message(0),
                    evidence: mask_evidence(m.as_str()),
                    remediation: recognizer.remediation.to_string(),
                });
            }
        }

        let passed = findings.is_empty();
        Ok(ScannerVerdict::from_findings(self.id(), passed, findings, 0))
    }
}
