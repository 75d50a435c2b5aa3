//! Domain checker: brand impersonation and disposable-domain heuristics.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};

use super::errors::ToolError;
use super::types::{string_list, AnalysisTool, ToolContext, ToolName};
use crate::analysis::types::RiskLevel;

/// Brands that phishing domains commonly impersonate.
const KNOWN_BRANDS: &[&str] = &[
    "paypal",
    "apple",
    "microsoft",
    "amazon",
    "google",
    "facebook",
    "netflix",
    "chase",
    "wellsfargo",
    "citibank",
    "ebay",
    "instagram",
    "linkedin",
    "dropbox",
    "docusign",
    "adobe",
    "outlook",
    "office365",
    "bank",
];

/// TLDs favoured by throwaway registrations.
const SUSPICIOUS_TLDS: &[&str] = &["tk", "ml", "ga", "cf", "click", "download"];

const MAX_DIGIT_RATIO: f64 = 0.3;
const MAX_HYPHENS: usize = 2;

/// Substring patterns that suggest `brand` is being impersonated.
fn impersonation_patterns(brand: &str) -> [String; 8] {
    [
        format!("{brand}-"),
        format!("-{brand}"),
        format!("secure{brand}"),
        format!("{brand}secure"),
        format!("{brand}login"),
        format!("login{brand}"),
        format!("{brand}verify"),
        format!("verify{brand}"),
    ]
}

/// Findings for one domain.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainFinding {
    pub domain: String,
    pub risk_level: RiskLevel,
    pub flags: Vec<String>,
}

/// Reduce user input (possibly a URL or address) to a bare lowercase host.
pub fn normalize_domain(raw: &str) -> String {
    let mut d = raw.trim().to_lowercase();
    if let Some((_, rest)) = d.split_once("://") {
        d = rest.to_string();
    }
    if let Some((_, host)) = d.rsplit_once('@') {
        d = host.to_string();
    }
    let host_end = d.find(['/', '?', '#', ':']).unwrap_or(d.len());
    d.truncate(host_end);
    let d = d.trim_end_matches('.');
    d.strip_prefix("www.").unwrap_or(d).to_string()
}

/// Check a single domain.
pub fn check_domain(raw: &str) -> DomainFinding {
    let domain = normalize_domain(raw);
    let mut flags = Vec::new();

    for brand in KNOWN_BRANDS {
        if impersonation_patterns(brand)
            .iter()
            .any(|p| domain.contains(p.as_str()))
        {
            flags.push(format!("possible impersonation of '{brand}'"));
        }
    }

    if !domain.is_empty() {
        let digits = domain.chars().filter(|c| c.is_ascii_digit()).count();
        let ratio = digits as f64 / domain.chars().count() as f64;
        if ratio > MAX_DIGIT_RATIO {
            flags.push(format!(
                "digits make up {:.0}% of the domain",
                ratio * 100.0
            ));
        }
    }

    let hyphens = domain.matches('-').count();
    if hyphens > MAX_HYPHENS {
        flags.push(format!("contains {hyphens} hyphens"));
    }

    if let Some((_, tld)) = domain.rsplit_once('.') {
        if SUSPICIOUS_TLDS.contains(&tld) {
            flags.push(format!("suspicious top-level domain '.{tld}'"));
        }
    }

    DomainFinding {
        risk_level: RiskLevel::from_flag_count(flags.len(), 1),
        domain,
        flags,
    }
}

/// Check a batch of domains into the tool's result object.
pub fn check_domains(domains: &[String]) -> Value {
    let findings: Vec<DomainFinding> = domains.iter().map(|d| check_domain(d)).collect();
    let risk = findings
        .iter()
        .map(|f| f.risk_level)
        .max()
        .unwrap_or(RiskLevel::Low);
    let features: Vec<String> = findings
        .iter()
        .flat_map(|f| f.flags.iter().map(move |flag| format!("{}: {flag}", f.domain)))
        .collect();

    let analysis = match findings.len() {
        0 => "No domains were provided.".to_string(),
        n => format!(
            "Checked {n} domain(s) for impersonation and disposable-domain traits. Overall risk: {risk}."
        ),
    };

    json!({
        "riskLevel": risk,
        "suspiciousFeatures": features,
        "analysis": analysis,
        "domains": findings,
    })
}

/// Tool wrapper around [`check_domains`].
pub struct DomainChecker;

#[async_trait]
impl AnalysisTool for DomainChecker {
    fn name(&self) -> ToolName {
        ToolName::DomainChecker
    }

    fn description(&self) -> &'static str {
        "Check sender or link domains for brand impersonation, digit-heavy or \
         hyphen-heavy names, and suspicious top-level domains."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "domains": {
                    "type": "array",
                    "items": {"type": "string"},
                    "description": "Domains to check, e.g. from the sender address and links"
                }
            },
            "required": ["domains"]
        })
    }

    async fn invoke(&self, args: &Value, _ctx: ToolContext<'_>) -> Result<Value, ToolError> {
        Ok(check_domains(&string_list(args, "domains")))
    }
}
