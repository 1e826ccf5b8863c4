//! Scanner pipeline: pattern-based content inspection with parallel fan-out
//! and overall verdict aggregation.
//!
//! Every registered `Scanner` is invoked once per request, either in
//! parallel (default) or sequentially. A scanner that exceeds its timeout
//! has its individual result synthesized as a `ScannerError` finding so one
//! slow scanner never blocks the others (`ScannerPipeline::scan`).

pub mod compliance;
pub mod dlp;
pub mod pii;
pub mod prompt_injection;
pub mod toxicity;

use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::model::{Request, Severity};

/* ============================= FINDINGS ============================= */

/// A logical pointer into the request that a finding refers to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Location {
    /// Index into `Request::messages`.
    Message(usize),
    /// No specific location (e.g. a pipeline-level error).
    Request,
}

/// A structured datum emitted by a scanner indicating a specific inspection
/// outcome at a specific location in the request. Findings are append-only
/// and carry the originating scanner id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Finding {
    pub scanner_id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub severity: Severity,
    pub confidence: f64,
    pub location: Location,
    pub evidence: String,
    pub remediation: String,
}

/// Replace the middle of a span longer than 100 characters with a
/// redaction marker ( compliance-scanner evidence masking, applied
/// generically to any scanner's evidence excerpts).
pub fn mask_evidence(span: &str) -> String {
    const MAX_UNMASKED: usize = 100;
    let chars: Vec<char> = span.chars().collect();
    if chars.len() <= MAX_UNMASKED {
        return span.to_string();
    }
    let keep = 20;
    let head: String = chars[..keep].iter().collect();
    let tail: String = chars[chars.len() - keep..].iter().collect();
    format!("{head}…[REDACTED]…{tail}")
}

/* ============================= VERDICTS ============================= */

/// The result of running a single scanner against one request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScannerVerdict {
    pub scanner_id: String,
    pub passed: bool,
    pub score: f64,
    pub findings: Vec<Finding>,
    pub threat_level: Severity,
    pub duration_ms: u64,
}

impl ScannerVerdict {
    /// Derive `threat_level`/`score` from a finding set:
    /// `max(finding.severity)` and `mean(severityScore(finding.severity))`;
    /// an empty finding set scores `1.0`/`none`.
    fn from_findings(scanner_id: &str, passed: bool, findings: Vec<Finding>, duration_ms: u64) -> Self {
        let threat_level = findings.iter().map(|f| f.severity).max().unwrap_or(Severity::None);
        let score = if findings.is_empty() {
            1.0
        } else {
            findings.iter().map(|f| f.severity.score()).sum::<f64>() / findings.len() as f64
        };
        Self {
            scanner_id: scanner_id.to_string(),
            passed,
            score,
            findings,
            threat_level,
            duration_ms,
        }
    }

    fn timeout(scanner_id: &str, timeout_ms: u64) -> Self {
        Self {
            scanner_id: scanner_id.to_string(),
            passed: false,
            score: Severity::Low.score(),
            findings: vec![Finding {
                scanner_id: scanner_id.to_string(),
                kind: "ScannerError".to_string(),
                severity: Severity::Low,
                confidence: 1.0,
                location: Location::Request,
                evidence: "scanner exceeded timeout".to_string(),
                remediation: "investigate scanner latency or raise scanner.timeoutMs".to_string(),
            }],
            threat_level: Severity::Low,
            duration_ms: timeout_ms,
        }
    }

    /// Recoverable scanner crash (§4.1 "scanner errors (non-timeout) are
    /// recoverable"): recorded as a low-severity finding, pipeline continues.
    fn crashed(scanner_id: &str, message: &str, duration_ms: u64) -> Self {
        Self {
            scanner_id: scanner_id.to_string(),
            passed: false,
            score: Severity::Low.score(),
            findings: vec![Finding {
                scanner_id: scanner_id.to_string(),
                kind: "ScannerError".to_string(),
                severity: Severity::Low,
                confidence: 1.0,
                location: Location::Request,
                evidence: mask_evidence(message),
                remediation: "scanner raised an error; result excluded from aggregation".to_string(),
            }],
            threat_level: Severity::Low,
            duration_ms,
        }
    }
}

/// Union of every scanner's verdict for one request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatedVerdict {
    pub overall_threat_level: Severity,
    pub overall_score: f64,
    pub findings: Vec<Finding>,
    pub duration_ms: u64,
    pub passed: bool,
}

impl AggregatedVerdict {
    /// Empty scanner set boundary case: `{passed:true,
    /// threatLevel:none, score:1}`.
    pub fn empty() -> Self {
        Self {
            overall_threat_level: Severity::None,
            overall_score: 1.0,
            findings: Vec::new(),
            duration_ms: 0,
            passed: true,
        }
    }

    fn aggregate(verdicts: &[ScannerVerdict], duration_ms: u64) -> Self {
        if verdicts.is_empty() {
            return Self::empty();
        }
        let overall_threat_level = verdicts.iter().map(|v| v.threat_level).max().unwrap_or(Severity::None);
        let overall_score = verdicts.iter().map(|v| v.score).sum::<f64>() / verdicts.len() as f64;
        let findings = verdicts.iter().flat_map(|v| v.findings.clone()).collect();
        let passed = verdicts.iter().all(|v| v.passed);
        Self {
            overall_threat_level,
            overall_score,
            findings,
            duration_ms,
            passed,
        }
    }
}

/* ============================= SCANNER TRAIT ============================= */

/// Polymorphic content inspector: `{id, name, Scan(Request) -> ScannerVerdict}`.
#[async_trait]
pub trait Scanner: Send + Sync {
    fn id(&self) -> &str;
    fn name(&self) -> &str;
    async fn scan(&self, request: &Request) -> Result<ScannerVerdict, String>;
}

/* ============================= PIPELINE ============================= */

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanMode {
    Parallel,
    Sequential,
}

pub struct ScannerPipeline {
    scanners: Vec<std::sync::Arc<dyn Scanner>>,
    mode: ScanMode,
    timeout: Duration,
}

impl ScannerPipeline {
    pub fn new(scanners: Vec<std::sync::Arc<dyn Scanner>>, mode: ScanMode, timeout: Duration) -> Self {
        Self { scanners, mode, timeout }
    }

    /// Run every registered scanner once against `request` and aggregate.
    pub async fn scan(&self, request: &Request) -> AggregatedVerdict {
        let started = Instant::now();

        let verdicts = match self.mode {
            ScanMode::Parallel => {
                let futures = self.scanners.iter().map(|s| self.run_one(s.as_ref(), request));
                futures::future::join_all(futures).await
            }
            ScanMode::Sequential => {
                let mut out = Vec::with_capacity(self.scanners.len());
                for s in &self.scanners {
                    out.push(self.run_one(s.as_ref(), request).await);
                }
                out
            }
        };

        let total = started.elapsed().as_millis() as u64;
        crate::metrics::SCAN_DURATION.observe(total as f64);
        AggregatedVerdict::aggregate(&verdicts, total)
    }

    async fn run_one(&self, scanner: &dyn Scanner, request: &Request) -> ScannerVerdict {
        let started = Instant::now();
        match tokio::time::timeout(self.timeout, scanner.scan(request)).await {
            Ok(Ok(verdict)) => verdict,
            Ok(Err(message)) => {
                ScannerVerdict::crashed(scanner.id(), &message, started.elapsed().as_millis() as u64)
            }
            Err(_) => ScannerVerdict::timeout(scanner.id(), self.timeout.as_millis() as u64),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Content, CorrelationId, Message, Parameters, Priority, Role};

    fn make_request(text: &str) -> Request {
        Request {
            correlation_id: CorrelationId::new(),
            tenant_id: None,
            user_id: None,
            user_group: None,
            provider: "openai".into(),
            model: "gpt-4".into(),
            messages: vec![Message { role: Role::User, content: Content::Text(text.to_string()) }],
            parameters: Parameters::default(),
            streaming: false,
            priority: Priority::Normal,
        }
    }

    struct AlwaysClean;
    #[async_trait]
    impl Scanner for AlwaysClean {
        fn id(&self) -> &str { "clean" }
        fn name(&self) -> &str { "AlwaysClean" }
        async fn scan(&self, _r: &Request) -> Result<ScannerVerdict, String> {
            Ok(ScannerVerdict::from_findings("clean", true, vec![], 1))
        }
    }

    struct AlwaysSlow;
    #[async_trait]
    impl Scanner for AlwaysSlow {
        fn id(&self) -> &str { "slow" }
        fn name(&self) -> &str { "AlwaysSlow" }
        async fn scan(&self, _r: &Request) -> Result<ScannerVerdict, String> {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(ScannerVerdict::from_findings("slow", true, vec![], 1))
        }
    }

    struct AlwaysCrashes;
    #[async_trait]
    impl Scanner for AlwaysCrashes {
        fn id(&self) -> &str { "crashy" }
        fn name(&self) -> &str { "AlwaysCrashes" }
        async fn scan(&self, _r: &Request) -> Result<ScannerVerdict, String> {
            Err("boom".to_string())
        }
    }

    #[tokio::test]
    async fn empty_scanner_set_passes() {
        let pipeline = ScannerPipeline::new(vec![], ScanMode::Parallel, Duration::from_millis(50));
        let verdict = pipeline.scan(&make_request("hi")).await;
        assert!(verdict.passed);
        assert_eq!(verdict.overall_threat_level, Severity::None);
        assert_eq!(verdict.overall_score, 1.0);
    }

    #[tokio::test]
    async fn slow_scanner_times_out_without_blocking_others() {
        let pipeline = ScannerPipeline::new(
            vec![std::sync::Arc::new(AlwaysClean), std::sync::Arc::new(AlwaysSlow)],
            ScanMode::Parallel,
            Duration::from_millis(20),
        );
        let started = Instant::now();
        let verdict = pipeline.scan(&make_request("hi")).await;
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(verdict.findings.iter().any(|f| f.kind == "ScannerError"));
        assert!(!verdict.passed);
    }

    #[tokio::test]
    async fn crashing_scanner_is_recoverable() {
        let pipeline = ScannerPipeline::new(
            vec![std::sync::Arc::new(AlwaysClean), std::sync::Arc::new(AlwaysCrashes)],
            ScanMode::Sequential,
            Duration::from_millis(50),
        );
        let verdict = pipeline.scan(&make_request("hi")).await;
        assert!(verdict.findings.iter().any(|f| f.kind == "ScannerError"));
    }

    #[test]
    fn mask_evidence_redacts_long_spans() {
        let long = "a".repeat(200);
        let masked = mask_evidence(&long);
        assert!(masked.contains("[REDACTED]"));
        assert!(masked.len() < long.len());
    }

    #[test]
    fn mask_evidence_preserves_short_spans() {
        assert_eq!(mask_evidence("short"), "short");
    }

    #[test]
    fn verdict_empty_findings_scores_one() {
        let v = ScannerVerdict::from_findings("s", true, vec![], 5);
        assert_eq!(v.score, 1.0);
        assert_eq!(v.threat_level, Severity::None);
    }
}
