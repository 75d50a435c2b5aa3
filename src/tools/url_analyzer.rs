//! URL analyzer: structural red flags in links found in an email.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};
use url::{Host, Url};

use super::errors::ToolError;
use super::types::{string_list, AnalysisTool, ToolContext, ToolName};
use crate::analysis::types::RiskLevel;

/// Keywords that phishing URLs commonly embed in the host or path.
const PHISHING_KEYWORDS: &[&str] = &["secure", "verify", "update", "confirm", "login", "account"];

const URL_SHORTENERS: &[&str] = &[
    "bit.ly",
    "tinyurl.com",
    "goo.gl",
    "t.co",
    "ow.ly",
    "is.gd",
    "buff.ly",
    "rebrand.ly",
    "cutt.ly",
    "shorturl.at",
    "tiny.cc",
    "rb.gy",
    "t.ly",
];

/// Query parameter names that usually carry a redirect target.
const REDIRECT_PARAMS: &[&str] = &["next", "goto", "dest", "destination", "continue", "target"];

const MAX_DOMAIN_LEN: usize = 50;
const MAX_SUBDOMAINS: usize = 4;

/// Findings for one URL.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UrlFinding {
    pub url: String,
    pub domain: Option<String>,
    pub risk_level: RiskLevel,
    pub flags: Vec<String>,
}

/// Analyze a single URL.
pub fn analyze_url(raw: &str) -> UrlFinding {
    let candidate = raw.trim();
    let with_scheme = if candidate.contains("://") {
        candidate.to_string()
    } else {
        format!("http://{candidate}")
    };

    let parsed = Url::parse(&with_scheme)
        .ok()
        .filter(|u| u.host_str().is_some_and(|h| !h.is_empty()));
    let Some(url) = parsed else {
        return UrlFinding {
            url: candidate.to_string(),
            domain: None,
            risk_level: RiskLevel::High,
            flags: vec!["URL could not be parsed".to_string()],
        };
    };

    let domain = url.host_str().unwrap_or_default().to_lowercase();
    let path = url.path().to_lowercase();
    let is_ip = matches!(url.host(), Some(Host::Ipv4(_)));
    let mut flags = Vec::new();

    if domain.len() > MAX_DOMAIN_LEN {
        flags.push(format!("unusually long domain ({} characters)", domain.len()));
    }

    if is_ip {
        flags.push("host is a bare IP address".to_string());
    } else {
        let subdomains = domain.split('.').count().saturating_sub(2);
        if subdomains > MAX_SUBDOMAINS {
            flags.push(format!("excessive subdomains ({subdomains})"));
        }
    }

    for keyword in PHISHING_KEYWORDS {
        if domain.contains(keyword) || path.contains(keyword) {
            flags.push(format!("contains phishing keyword '{keyword}'"));
        }
    }

    if URL_SHORTENERS
        .iter()
        .any(|s| domain == *s || domain.ends_with(&format!(".{s}")))
    {
        flags.push(format!("uses URL shortener '{domain}'"));
    }

    let redirect_params: Vec<String> = url
        .query_pairs()
        .map(|(k, _)| k.to_lowercase())
        .filter(|k| k.contains("redirect") || k.contains("url") || REDIRECT_PARAMS.contains(&k.as_str()))
        .collect();
    if !redirect_params.is_empty() {
        flags.push(format!(
            "redirect-style query parameter ({})",
            redirect_params.join(", ")
        ));
    }

    UrlFinding {
        url: candidate.to_string(),
        domain: Some(domain),
        risk_level: RiskLevel::from_flag_count(flags.len(), 2),
        flags,
    }
}

/// Analyze a batch of URLs into the tool's result object.
pub fn analyze_urls(urls: &[String]) -> Value {
    let findings: Vec<UrlFinding> = urls.iter().map(|u| analyze_url(u)).collect();
    let risk = findings
        .iter()
        .map(|f| f.risk_level)
        .max()
        .unwrap_or(RiskLevel::Low);

    let features: Vec<String> = findings
        .iter()
        .flat_map(|f| f.flags.iter().map(move |flag| format!("{}: {flag}", f.url)))
        .collect();

    let analysis = if findings.is_empty() {
        "No URLs were provided.".to_string()
    } else {
        let flagged = findings.iter().filter(|f| !f.flags.is_empty()).count();
        format!(
            "Analyzed {} URL(s); {flagged} showed suspicious traits. Overall risk: {risk}.",
            findings.len()
        )
    };

    json!({
        "riskLevel": risk,
        "suspiciousFeatures": features,
        "analysis": analysis,
        "urls": findings,
    })
}

/// Tool wrapper around [`analyze_urls`].
pub struct UrlAnalyzer;

#[async_trait]
impl AnalysisTool for UrlAnalyzer {
    fn name(&self) -> ToolName {
        ToolName::UrlAnalyzer
    }

    fn description(&self) -> &'static str {
        "Inspect URLs for phishing traits: IP hosts, long or deeply nested domains, \
         phishing keywords, URL shorteners and redirect parameters."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "urls": {
                    "type": "array",
                    "items": {"type": "string"},
                    "description": "URLs extracted from the email"
                }
            },
            "required": ["urls"]
        })
    }

    async fn invoke(&self, args: &Value, _ctx: ToolContext<'_>) -> Result<Value, ToolError> {
        Ok(analyze_urls(&string_list(args, "urls")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ip_literal_with_keywords_is_high() {
        let finding = analyze_url("http://203.0.113.5/verify-login");
        assert_eq!(finding.risk_level, RiskLevel::High);
        assert!(finding.flags.iter().any(|f| f.contains("bare IP")));
        assert!(finding.flags.iter().any(|f| f.contains("'verify'")));
    }

    #[test]
    fn shortener_alone_is_medium() {
        let finding = analyze_url("https://bit.ly/xyz");
        assert_eq!(finding.risk_level, RiskLevel::Medium);
        assert_eq!(finding.flags.len(), 1);
    }

    #[test]
    fn clean_url_is_low() {
        let finding = analyze_url("https://www.example.com/news/today");
        assert_eq!(finding.risk_level, RiskLevel::Low);
        assert!(finding.flags.is_empty());
    }

    #[test]
    fn missing_scheme_is_tolerated() {
        let finding = analyze_url("example.org/about");
        assert_eq!(finding.domain.as_deref(), Some("example.org"));
        assert_eq!(finding.risk_level, RiskLevel::Low);
    }

    #[test]
    fn unparsable_url_is_high() {
        let finding = analyze_url("http://");
        assert_eq!(finding.risk_level, RiskLevel::High);
        assert_eq!(finding.flags, vec!["URL could not be parsed".to_string()]);
    }

    #[test]
    fn deep_subdomains_and_redirects_are_flagged() {
        let finding = analyze_url("https://a.b.c.d.e.example.com/?redirect_uri=http://evil.tk");
        assert!(finding.flags.iter().any(|f| f.contains("subdomains (5)")));
        assert!(finding.flags.iter().any(|f| f.contains("redirect_uri")));
    }

    #[test]
    fn long_domain_is_flagged() {
        let host = format!("{}.com", "a".repeat(60));
        let finding = analyze_url(&format!("https://{host}/"));
        assert!(finding.flags.iter().any(|f| f.contains("long domain")));
    }

    #[test]
    fn batch_risk_is_the_maximum() {
        let result = analyze_urls(&[
            "http://203.0.113.5/verify-login".to_string(),
            "https://bit.ly/xyz".to_string(),
        ]);
        assert_eq!(result["riskLevel"], "high");
        assert_eq!(result["urls"][0]["riskLevel"], "high");
        assert_eq!(result["urls"][1]["riskLevel"], "medium");
        assert!(result["suspiciousFeatures"].as_array().unwrap().len() >= 4);
    }

    #[test]
    fn empty_batch_is_low() {
        let result = analyze_urls(&[]);
        assert_eq!(result["riskLevel"], "low");
        assert!(result["analysis"].as_str().unwrap().contains("No URLs"));
    }

    #[tokio::test]
    async fn invoke_reads_urls_argument() {
        let result = UrlAnalyzer
            .invoke(&json!({"urls": ["https://bit.ly/xyz"]}), ToolContext::default())
            .await
            .unwrap();
        assert_eq!(result["riskLevel"], "medium");
    }
}
