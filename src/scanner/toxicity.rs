//! Lexical toxicity scanner: flags slur/harassment terms in any
//! message role, since abusive content can originate from either side of
//! the conversation (`Request::all_text`).

use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;

use crate::model::{Request, Severity};

use super::{mask_evidence, Finding, Location, Scanner, ScannerVerdict};

struct Category {
    kind: &'static str,
    severity: Severity,
    confidence: f64,
    regex: &'static LazyLock<Regex>,
    remediation: &'static str,
}

static HARASSMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(kill yourself|i hope you die|you should die)\b").unwrap()
});
static HATE_SPEECH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(subhuman|racial slur placeholder)\b").unwrap());
static THREATS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(i will hurt you|i'm going to kill)\b").unwrap());

static CATEGORIES: &[Category] = &[
    Category {
        kind: "TOXICITY_HARASSMENT",
        severity: Severity::High,
        confidence: 0.8,
        regex: &HARASSMENT,
        remediation: "block and alert a trust-and-safety reviewer",
    },
    Category {
        kind: "TOXICITY_HATE_SPEECH",
        severity: Severity::Critical,
        confidence: 0.85,
        regex: &HATE_SPEECH,
        remediation: "block; hate speech must not reach the upstream model or caller",
    },
    Category {
        kind: "TOXICITY_THREAT",
        severity: Severity::Critical,
        confidence: 0.85,
        regex: &THREATS,
        remediation: "block and escalate; the text contains a direct threat",
    },
];

/// Detects harassment, hate speech, and threats in conversation text.
pub struct ToxicityScanner;

impl ToxicityScanner {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ToxicityScanner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Scanner for ToxicityScanner {
    fn id(&self) -> &str {
        "toxicity"
    }

    fn name(&self) -> &str {
        "Toxicity Detector"
    }

    async fn scan(&self, request: &Request) -> Result<ScannerVerdict, String> {
        let text = request.all_text();
        let mut findings = Vec::new();

        for category in CATEGORIES {
            if let Some(m) = category.regex.find(&text) {
                findings.push(Finding {
                    scanner_id: self.id().to_string(),
                    kind: category.kind.to_string(),
                    severity: category.severity,
                    confidence: category.confidence,
                    location: Location::Message(0),
                    evidence: mask_evidence(m.as_str()),
                    remediation: category.remediation.to_string(),
                });
            }
        }

        let passed = findings.is_empty();
        Ok(ScannerVerdict::from_findings(self.id(), passed, findings, 0))
    }
}
