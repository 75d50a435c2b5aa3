//! Header analyzer: sender, routing and metadata inconsistencies.

use std::net::Ipv4Addr;
use std::sync::OnceLock;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use serde_json::{json, Value};

use super::errors::ToolError;
use super::types::{string_arg, string_list, AnalysisTool, ToolContext, ToolName};
use crate::analysis::types::RiskLevel;

/// Consumer mailbox providers anyone can register on.
const FREE_MAIL_DOMAINS: &[&str] = &[
    "gmail.com",
    "googlemail.com",
    "yahoo.com",
    "hotmail.com",
    "outlook.com",
    "live.com",
    "aol.com",
    "icloud.com",
    "mail.com",
    "gmx.com",
    "protonmail.com",
    "proton.me",
    "yandex.com",
    "qq.com",
    "163.com",
    "126.com",
];

/// Display-name words that imply the sender is an organisation.
const INSTITUTIONAL_WORDS: &[&str] = &[
    "bank",
    "paypal",
    "apple",
    "microsoft",
    "amazon",
    "netflix",
    "support",
    "security",
    "service",
    "team",
    "admin",
    "account",
    "billing",
    "helpdesk",
    "department",
    "tax",
    "government",
    "official",
];

const MAX_HOPS: usize = 10;
const MAX_AGE_DAYS: i64 = 365;
/// Clock skew tolerated before a Date header counts as "in the future".
const FUTURE_SKEW_MINUTES: i64 = 10;

/// Header fields the tool inspects.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HeaderInput {
    pub from: String,
    pub reply_to: Option<String>,
    pub return_path: Option<String>,
    pub received: Vec<String>,
    pub message_id: Option<String>,
    pub date: Option<String>,
}

impl HeaderInput {
    /// Read the tool arguments, accepting camelCase or snake_case keys.
    pub fn from_args(args: &Value) -> Self {
        let text = |keys: &[&str]| {
            keys.iter()
                .find_map(|k| string_arg(args, k))
                .map(str::to_string)
        };
        let received = ["received", "receivedHeaders", "received_headers"]
            .iter()
            .map(|k| string_list_lines(args, k))
            .find(|v| !v.is_empty())
            .unwrap_or_default();

        Self {
            from: text(&["from"]).unwrap_or_default(),
            reply_to: text(&["replyTo", "reply_to"]),
            return_path: text(&["returnPath", "return_path"]),
            received,
            message_id: text(&["messageId", "message_id"]),
            date: text(&["date"]),
        }
    }
}

/// Received headers contain commas, so a single string is split on
/// newlines only.
fn string_list_lines(args: &Value, key: &str) -> Vec<String> {
    match args.get(key) {
        Some(Value::String(s)) => s
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect(),
        _ => string_list(args, key),
    }
}

/// `(display name, domain)` of an address header such as
/// `"PayPal Support" <service@paypal.com>`.
fn split_address(header: &str) -> (Option<String>, Option<String>) {
    static ADDR: OnceLock<Regex> = OnceLock::new();
    let re = ADDR.get_or_init(|| {
        Regex::new(r#"^\s*"?([^"<]*?)"?\s*<([^>]*)>"#).expect("address regex is valid")
    });

    let (display, address) = match re.captures(header) {
        Some(caps) => (
            caps.get(1)
                .map(|m| m.as_str().trim().to_string())
                .filter(|s| !s.is_empty()),
            caps.get(2).map(|m| m.as_str().trim()).unwrap_or_default(),
        ),
        None => (None, header.trim()),
    };

    let domain = address
        .rsplit_once('@')
        .map(|(_, d)| d.trim().trim_end_matches('>').to_lowercase())
        .filter(|d| !d.is_empty());
    (display, domain)
}

fn message_id_regex() -> &'static Regex {
    static MESSAGE_ID: OnceLock<Regex> = OnceLock::new();
    MESSAGE_ID
        .get_or_init(|| Regex::new(r"^<[^@\s<>]+@[^>\s<]+>$").expect("message-id regex is valid"))
}

/// Whether a Received hop originates from a bare IP, localhost or an
/// unresolved host.
fn is_suspicious_hop(hop: &str) -> bool {
    let lower = hop.to_lowercase();
    if lower.contains("localhost") || lower.contains("unknown") {
        return true;
    }
    lower
        .strip_prefix("from")
        .and_then(|rest| rest.split_whitespace().next())
        .map(|host| host.trim_matches(|c: char| matches!(c, '[' | ']' | '(' | ')')))
        .is_some_and(|host| host.parse::<Ipv4Addr>().is_ok())
}

fn parse_date(raw: &str) -> Option<DateTime<Utc>> {
    // RFC 2822 allows a trailing comment such as "(UTC)".
    let trimmed = match raw.find('(') {
        Some(idx) => raw[..idx].trim(),
        None => raw.trim(),
    };
    DateTime::parse_from_rfc2822(trimmed)
        .or_else(|_| DateTime::parse_from_rfc3339(trimmed))
        .map(|d| d.with_timezone(&Utc))
        .ok()
}

/// Analyze headers relative to `now`.
pub fn analyze_headers_at(input: &HeaderInput, now: DateTime<Utc>) -> Value {
    let mut flags: Vec<String> = Vec::new();

    let (display, from_domain) = split_address(&input.from);
    if from_domain.is_none() {
        flags.push("From header has no parsable address".to_string());
    }

    if let (Some(name), Some(domain)) = (&display, &from_domain) {
        let lower = name.to_lowercase();
        let institutional = INSTITUTIONAL_WORDS.iter().find(|w| lower.contains(*w));
        if let Some(word) = institutional {
            if FREE_MAIL_DOMAINS.contains(&domain.as_str()) {
                flags.push(format!(
                    "display name '{name}' suggests an organisation ('{word}') but the sender uses free mail provider {domain}"
                ));
            }
        }
    }

    let mut compare = |label: &str, header: &Option<String>| {
        let Some(value) = header else { return };
        let (_, other) = split_address(value);
        if let (Some(other), Some(from)) = (other, &from_domain) {
            if &other != from {
                flags.push(format!("{label} domain {other} differs from From domain {from}"));
            }
        }
    };
    compare("Reply-To", &input.reply_to);
    compare("Return-Path", &input.return_path);

    if input.received.len() > MAX_HOPS {
        flags.push(format!(
            "unusually long routing path ({} hops)",
            input.received.len()
        ));
    }
    if let Some(hop) = input.received.iter().find(|h| is_suspicious_hop(h)) {
        flags.push(format!("routing hop from a suspicious host: {hop}"));
    }

    if let Some(id) = &input.message_id {
        if !message_id_regex().is_match(id) {
            flags.push(format!("malformed Message-ID '{id}'"));
        }
    }

    if let Some(raw) = &input.date {
        match parse_date(raw) {
            Some(date) if date > now + Duration::minutes(FUTURE_SKEW_MINUTES) => {
                flags.push(format!("Date header is in the future ({raw})"));
            }
            Some(date) if date < now - Duration::days(MAX_AGE_DAYS) => {
                flags.push(format!("Date header is more than {MAX_AGE_DAYS} days old ({raw})"));
            }
            Some(_) => {}
            None => flags.push(format!("Date header could not be parsed ({raw})")),
        }
    }

    let risk = RiskLevel::from_flag_count(flags.len(), 2);
    let analysis = if flags.is_empty() {
        "Headers are internally consistent.".to_string()
    } else {
        format!(
            "Found {} header inconsistenc{}. Overall risk: {risk}.",
            flags.len(),
            if flags.len() == 1 { "y" } else { "ies" }
        )
    };

    json!({
        "riskLevel": risk,
        "suspiciousFeatures": flags,
        "analysis": analysis,
        "senderDomain": from_domain,
        "hopCount": input.received.len(),
    })
}

/// Analyze headers relative to the current time.
pub fn analyze_headers(input: &HeaderInput) -> Value {
    analyze_headers_at(input, Utc::now())
}

/// Tool wrapper around [`analyze_headers`].
pub struct HeaderAnalyzer;

#[async_trait]
impl AnalysisTool for HeaderAnalyzer {
    fn name(&self) -> ToolName {
        ToolName::HeaderAnalyzer
    }

    fn description(&self) -> &'static str {
        "Check email headers for spoofing signs: free-mail senders posing as \
         organisations, mismatched Reply-To/Return-Path, odd routing, malformed \
         Message-ID and implausible dates."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "from": {"type": "string", "description": "From header, including display name"},
                "replyTo": {"type": "string", "description": "Reply-To header"},
                "returnPath": {"type": "string", "description": "Return-Path header"},
                "received": {
                    "type": "array",
                    "items": {"type": "string"},
                    "description": "Received headers, most recent first"
                },
                "messageId": {"type": "string", "description": "Message-ID header"},
                "date": {"type": "string", "description": "Date header"}
            },
            "required": ["from"]
        })
    }

    async fn invoke(&self, args: &Value, _ctx: ToolContext<'_>) -> Result<Value, ToolError> {
        Ok(analyze_headers(&HeaderInput::from_args(args)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    fn clean() -> HeaderInput {
        HeaderInput {
            from: "\"Example News\" <news@example.com>".into(),
            reply_to: Some("news@example.com".into()),
            return_path: Some("<bounce@example.com>".into()),
            received: vec!["from mail.example.com (mail.example.com [198.51.100.7]) by mx.test".into()],
            message_id: Some("<abc123@example.com>".into()),
            date: Some("Sat, 01 Jun 2024 11:30:00 +0000".into()),
        }
    }

    fn flags(result: &Value) -> Vec<String> {
        serde_json::from_value(result["suspiciousFeatures"].clone()).unwrap()
    }

    #[test]
    fn consistent_headers_are_low() {
        let result = analyze_headers_at(&clean(), now());
        assert_eq!(result["riskLevel"], "low", "{:?}", flags(&result));
        assert_eq!(result["senderDomain"], "example.com");
    }

    #[test]
    fn free_mail_institution_with_mismatched_reply_to() {
        let input = HeaderInput {
            from: "\"PayPal Security Team\" <paypal.alerts@gmail.com>".into(),
            reply_to: Some("collector@evil.tk".into()),
            return_path: Some("<bounce@mailer.ru>".into()),
            ..clean()
        };
        let result = analyze_headers_at(&input, now());
        let f = flags(&result);
        assert!(f.iter().any(|s| s.contains("free mail")));
        assert!(f.iter().any(|s| s.starts_with("Reply-To")));
        assert!(f.iter().any(|s| s.starts_with("Return-Path")));
        assert_eq!(result["riskLevel"], "high");
    }

    #[test]
    fn routing_anomalies() {
        let mut input = clean();
        input.received = (0..11).map(|i| format!("from relay{i}.example.com by x")).collect();
        input.received.push("from [203.0.113.9] by mx.test".into());
        let f = flags(&analyze_headers_at(&input, now()));
        assert!(f.iter().any(|s| s.contains("12 hops")));
        assert!(f.iter().any(|s| s.contains("suspicious host")));

        let mut input = clean();
        input.received = vec!["from localhost by mx.test".into()];
        assert_eq!(flags(&analyze_headers_at(&input, now())).len(), 1);
    }

    #[test]
    fn bracketed_ip_in_comment_is_not_a_bare_hop() {
        assert!(!is_suspicious_hop(
            "from mail.example.com (mail.example.com [198.51.100.7]) by mx"
        ));
        assert!(is_suspicious_hop("from 203.0.113.9 by mx"));
    }

    #[test]
    fn malformed_message_id() {
        let mut input = clean();
        input.message_id = Some("abc123-no-brackets".into());
        let f = flags(&analyze_headers_at(&input, now()));
        assert_eq!(f.len(), 1);
        assert!(f[0].contains("Message-ID"));
    }

    #[test]
    fn date_checks_respect_skew_and_age() {
        let mut input = clean();
        input.date = Some("Sat, 01 Jun 2024 12:05:00 +0000".into());
        assert!(flags(&analyze_headers_at(&input, now())).is_empty(), "within skew");

        input.date = Some("Sat, 01 Jun 2024 13:00:00 +0000".into());
        assert!(flags(&analyze_headers_at(&input, now()))[0].contains("future"));

        input.date = Some("2022-01-01T00:00:00Z".into());
        assert!(flags(&analyze_headers_at(&input, now()))[0].contains("days old"));

        input.date = Some("yesterday-ish".into());
        let result = analyze_headers_at(&input, now());
        assert!(flags(&result)[0].contains("could not be parsed"));
        assert_eq!(result["riskLevel"], "medium");
    }

    #[test]
    fn date_with_trailing_comment_parses() {
        assert!(parse_date("Sat, 01 Jun 2024 11:30:00 +0000 (UTC)").is_some());
    }

    #[test]
    fn args_accept_both_key_styles() {
        let input = HeaderInput::from_args(&json!({
            "from": "a@b.com",
            "reply_to": "c@d.com",
            "returnPath": "e@f.com",
            "received": "from x by y\nfrom z by w",
        }));
        assert_eq!(input.reply_to.as_deref(), Some("c@d.com"));
        assert_eq!(input.return_path.as_deref(), Some("e@f.com"));
        assert_eq!(input.received.len(), 2);
        assert!(input.date.is_none());
    }
}
