//! Regulatory-compliance scanner: a table-driven rule set
//! covering the named standards (HIPAA, PCI-DSS, SOX, GLBA, FERPA, COPPA,
//! CCPA, CPRA, GDPR, PIPEDA, LGPD, PDPA, SOC2, ISO27001, NIST). Each rule's
//! finding type is `"{standard}_{name}"`; rule ids are unique per-standard:
//! two standards may each define a rule `"001"` without colliding, since
//! the finding type is namespaced by `standard`.

use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;

use crate::model::{Request, Severity};

use super::{mask_evidence, Finding, Location, Scanner, ScannerVerdict};

struct Rule {
    id: &'static str,
    standard: &'static str,
    name: &'static str,
    severity: Severity,
    confidence: f64,
    pattern: &'static LazyLock<Regex>,
    remediation: &'static str,
}

impl Rule {
    fn finding_type(&self) -> String {
        format!("{}_{}", self.standard, self.name)
    }
}

static HIPAA_MRN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bMRN[:#]?\s*\d{6,10}\b").unwrap());
static HIPAA_DIAGNOSIS_CODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b[A-TV-Z][0-9][0-9AB]\.?[0-9A-TV-Z]{0,4}\b").unwrap());
static PCI_PAN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b(?:\d[ -]*?){13,16}\b").unwrap());
static PCI_CVV: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\bcvv[:#]?\s*\d{3,4}\b").unwrap());
static SOX_ACCOUNT_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\baccount\s*(number|no\.?|#)\s*:?\s*\d{6,12}\b").unwrap());
static GLBA_ROUTING_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\brouting\s*(number|no\.?|#)\s*:?\s*\d{9}\b").unwrap());
static FERPA_STUDENT_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bstudent\s*id[:#]?\s*\d{6,10}\b").unwrap());
static COPPA_MINOR_AGE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bi(?:'m| am) (?:[1-9]|1[0-2]) years old\b").unwrap());
static CCPA_SSN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b\d{3}-\d{2}-\d{4}\b").unwrap());
static CPRA_PRECISE_GEOLOCATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b-?\d{1,3}\.\d{4,},\s*-?\d{1,3}\.\d{4,}\b").unwrap());
static GDPR_EMAIL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b[\w.+-]+@[\w-]+\.[\w.-]+\b").unwrap());
static PIPEDA_SIN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b\d{3}[- ]\d{3}[- ]\d{3}\b").unwrap());
static LGPD_CPF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\d{3}\.\d{3}\.\d{3}-\d{2}\b").unwrap());
static PDPA_NRIC: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b[STFG]\d{7}[A-Z]\b").unwrap());
static SOC2_ADMIN_CREDENTIAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)(admin|root)[_-]?(password|pwd)\s*[:=]\s*\S+"#).unwrap());
static ISO27001_PRIVATE_KEY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"-----BEGIN (RSA |EC )?PRIVATE KEY-----").unwrap());
static NIST_CLASSIFIED_MARKING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(top secret|classified|for official use only)\b").unwrap());

static RULES: &[Rule] = &[
    Rule {
        id: "001",
        standard: "HIPAA",
        name: "MedicalRecordNumber",
        severity: Severity::High,
        confidence: 0.85,
        pattern: &HIPAA_MRN,
        remediation: "redact medical record numbers before forwarding to a non-BAA provider",
    },
    Rule {
        id: "002",
        standard: "HIPAA",
        name: "DiagnosisCode",
        severity: Severity::Medium,
        confidence: 0.6,
        pattern: &HIPAA_DIAGNOSIS_CODE,
        remediation: "review ICD-10 diagnosis code disclosure against the tenant's BAA scope",
    },
    Rule {
        id: "001",
        standard: "PCI_DSS",
        name: "PrimaryAccountNumber",
        severity: Severity::Critical,
        confidence: 0.8,
        pattern: &PCI_PAN,
        remediation: "block; primary account numbers must be tokenized before leaving the gateway",
    },
    Rule {
        id: "002",
        standard: "PCI_DSS",
        name: "CardVerificationValue",
        severity: Severity::Critical,
        confidence: 0.9,
        pattern: &PCI_CVV,
        remediation: "block; CVV must never be stored or transmitted per PCI-DSS 3.2",
    },
    Rule {
        id: "001",
        standard: "SOX",
        name: "FinancialAccountNumber",
        severity: Severity::High,
        confidence: 0.75,
        pattern: &SOX_ACCOUNT_NUMBER,
        remediation: "redact financial account numbers from audit-adjacent conversations",
    },
    Rule {
        id: "001",
        standard: "GLBA",
        name: "RoutingNumber",
        severity: Severity::High,
        confidence: 0.8,
        pattern: &GLBA_ROUTING_NUMBER,
        remediation: "redact bank routing numbers before forwarding upstream",
    },
    Rule {
        id: "001",
        standard: "FERPA",
        name: "StudentIdentifier",
        severity: Severity::Medium,
        confidence: 0.8,
        pattern: &FERPA_STUDENT_ID,
        remediation: "redact student identifiers under FERPA education-record rules",
    },
    Rule {
        id: "001",
        standard: "COPPA",
        name: "SelfDeclaredMinorAge",
        severity: Severity::High,
        confidence: 0.7,
        pattern: &COPPA_MINOR_AGE,
        remediation: "require parental consent workflow before continuing the conversation",
    },
    Rule {
        id: "001",
        standard: "CCPA",
        name: "SocialSecurityNumber",
        severity: Severity::High,
        confidence: 0.85,
        pattern: &CCPA_SSN,
        remediation: "honor CCPA data-minimization by redacting SSNs at ingress",
    },
    Rule {
        id: "001",
        standard: "CPRA",
        name: "PreciseGeolocation",
        severity: Severity::Medium,
        confidence: 0.7,
        pattern: &CPRA_PRECISE_GEOLOCATION,
        remediation: "precise geolocation is sensitive personal information under CPRA",
    },
    Rule {
        id: "001",
        standard: "GDPR",
        name: "EmailAddress",
        severity: Severity::Low,
        confidence: 0.75,
        pattern: &GDPR_EMAIL,
        remediation: "confirm a lawful basis exists before processing this personal data",
    },
    Rule {
        id: "001",
        standard: "PIPEDA",
        name: "SocialInsuranceNumber",
        severity: Severity::High,
        confidence: 0.75,
        pattern: &PIPEDA_SIN,
        remediation: "redact Canadian social insurance numbers before forwarding upstream",
    },
    Rule {
        id: "001",
        standard: "LGPD",
        name: "CadastroPessoaFisica",
        severity: Severity::High,
        confidence: 0.85,
        pattern: &LGPD_CPF,
        remediation: "redact CPF numbers per LGPD Article 5",
    },
    Rule {
        id: "001",
        standard: "PDPA",
        name: "NationalRegistrationId",
        severity: Severity::High,
        confidence: 0.8,
        pattern: &PDPA_NRIC,
        remediation: "redact NRIC/FIN identifiers before forwarding upstream",
    },
    Rule {
        id: "001",
        standard: "SOC2",
        name: "PlaintextAdminCredential",
        severity: Severity::Critical,
        confidence: 0.9,
        pattern: &SOC2_ADMIN_CREDENTIAL,
        remediation: "block; plaintext admin credentials violate SOC2 CC6 access controls",
    },
    Rule {
        id: "001",
        standard: "ISO27001",
        name: "PrivateKeyMaterial",
        severity: Severity::Critical,
        confidence: 0.95,
        pattern: &ISO27001_PRIVATE_KEY,
        remediation: "block; cryptographic key material must stay within the ISMS boundary",
    },
    Rule {
        id: "001",
        standard: "NIST",
        name: "ClassificationMarking",
        severity: Severity::Critical,
        confidence: 0.7,
        pattern: &NIST_CLASSIFIED_MARKING,
        remediation: "escalate to security; classified markings must not reach a commercial model",
    },
];

/// Evaluates request text against a table of regulatory-standard rules.
pub struct ComplianceScanner;

impl ComplianceScanner {
    pub fn new() -> Self {
        Self
    }

    /// `(standard, id)` pairs currently loaded, for diagnostics/tests.
    pub fn rule_keys() -> Vec<(&'static str, &'static str)> {
        RULES.iter().map(|r| (r.standard, r.id)).collect()
    }
}

impl Default for ComplianceScanner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Scanner for ComplianceScanner {
    fn id(&self) -> &str {
        "compliance"
    }

    fn name(&self) -> &str {
        "Compliance Rule Evaluator"
    }

    async fn scan(&self, request: &Request) -> Result<ScannerVerdict, String> {
        let text = request.user_text();
        let mut findings = Vec::new();

        for rule in RULES {
            if let Some(m) = rule.pattern.find(&text) {
                findings.push(Finding {
                    scanner_id: self.id().to_string(),
                    kind: rule.finding_type(),
                    severity: rule.severity,
                    confidence: rule.confidence,
                    location: Location::Message(0),
                    evidence: mask_evidence(m.as_str()),
                    remediation: rule.remediation.to_string(),
                });
            }
        }

        let passed = findings.is_empty();
        Ok(ScannerVerdict::from_findings(self.id(), passed, findings, 0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Content, CorrelationId, Message, Parameters, Priority, Role};

    fn req_with_text(text: &str) -> Request {
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

    #[test]
    fn rule_ids_collide_across_standards_by_design() {
        let keys = ComplianceScanner::rule_keys();
        assert!(keys.iter().filter(|(_, id)| *id == "001").count() > 1);
        // uniqueness holds per-standard, not globally
        let mut per_standard: std::collections::HashMap<&str, std::collections::HashSet<&str>> =
            std::collections::HashMap::new();
        for (standard, id) in keys {
            assert!(per_standard.entry(standard).or_default().insert(id), "duplicate rule id within {standard}");
        }
    }

    #[tokio::test]
    async fn detects_pci_pan_with_namespaced_finding_type() {
        let scanner = ComplianceScanner::new();
        let verdict = scanner
            .scan(&req_with_text("card number 4111 1111 1111 1111 please charge it"))
            .await
            .unwrap();
        assert!(verdict.findings.iter().any(|f| f.kind == "PCI_DSS_PrimaryAccountNumber"));
    }

    #[tokio::test]
    async fn detects_hipaa_mrn() {
        let scanner = ComplianceScanner::new();
        let verdict = scanner.scan(&req_with_text("patient MRN: 1234567")).await.unwrap();
        assert!(verdict.findings.iter().any(|f| f.kind == "HIPAA_MedicalRecordNumber"));
    }

    #[tokio::test]
    async fn clean_text_passes() {
        let scanner = ComplianceScanner::new();
        let verdict = scanner.scan(&req_with_text("let's schedule a meeting tomorrow")).await.unwrap();
        assert!(verdict.passed);
    }
}
