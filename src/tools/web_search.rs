//! Web search tool: reputation lookups through a pluggable search backend.
//!
//! The backend sits behind [`SearchProvider`]; [`HttpSearchProvider`] speaks
//! the Tavily search API. Transport failures never become tool errors: the
//! tool answers with `{error: true, message, query, timestamp}` so the model
//! can carry on without the evidence.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use async_trait::async_trait;
use reqwest::Client as HttpClient;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::errors::ToolError;
use super::types::{string_arg, AnalysisTool, ToolContext, ToolName};
use crate::analysis::types::{now_timestamp, RiskLevel};

const DEFAULT_MAX_RESULTS: usize = 5;
const MAX_RESULTS_LIMIT: usize = 10;
const SEARCH_TIMEOUT: Duration = Duration::from_secs(20);

/// Words in result titles/snippets that point at known scams.
const SCAM_KEYWORDS: &[&str] = &[
    "scam",
    "phishing",
    "fraud",
    "fake",
    "spam",
    "malware",
    "impersonat",
    "complaint",
    "warning",
    "suspicious",
];

// ─── Provider ────────────────────────────────────────────────────────────────

/// One search hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
    #[serde(default)]
    pub snippet: String,
}

/// A search backend.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    async fn search(
        &self,
        query: &str,
        max_results: usize,
        api_key: Option<&str>,
    ) -> anyhow::Result<Vec<SearchHit>>;
}

/// Tavily-compatible HTTP search backend.
pub struct HttpSearchProvider {
    http: HttpClient,
    endpoint: String,
}

impl HttpSearchProvider {
    pub fn new(endpoint: impl Into<String>) -> anyhow::Result<Self> {
        let http = HttpClient::builder()
            .timeout(SEARCH_TIMEOUT)
            .build()
            .context("failed to build search HTTP client")?;
        Ok(Self {
            http,
            endpoint: endpoint.into(),
        })
    }
}

#[async_trait]
impl SearchProvider for HttpSearchProvider {
    async fn search(
        &self,
        query: &str,
        max_results: usize,
        api_key: Option<&str>,
    ) -> anyhow::Result<Vec<SearchHit>> {
        #[derive(Deserialize)]
        struct Response {
            #[serde(default)]
            results: Vec<WireResult>,
        }

        #[derive(Deserialize)]
        struct WireResult {
            #[serde(default)]
            title: String,
            #[serde(default)]
            url: String,
            #[serde(default)]
            content: String,
        }

        let Some(api_key) = api_key else {
            bail!("web search API key is not configured");
        };

        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(api_key)
            .json(&json!({
                "query": query,
                "max_results": max_results,
                "search_depth": "basic",
            }))
            .send()
            .await
            .with_context(|| format!("search request to {} failed", self.endpoint))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("search provider returned HTTP {}: {body}", status.as_u16());
        }

        let parsed: Response = response
            .json()
            .await
            .context("search provider returned malformed JSON")?;

        Ok(parsed
            .results
            .into_iter()
            .take(max_results)
            .map(|r| SearchHit {
                title: r.title,
                url: r.url,
                snippet: r.content,
            })
            .collect())
    }
}

// ─── Tool ────────────────────────────────────────────────────────────────────

/// Summarize hits into the tool's result object.
pub fn summarize_results(query: &str, hits: &[SearchHit]) -> Value {
    let mut features = Vec::new();
    for keyword in SCAM_KEYWORDS {
        let mentions = hits
            .iter()
            .filter(|h| {
                h.title.to_lowercase().contains(keyword) || h.snippet.to_lowercase().contains(keyword)
            })
            .count();
        if mentions > 0 {
            features.push(format!("{mentions} search result(s) mention '{keyword}'"));
        }
    }

    let risk = RiskLevel::from_flag_count(features.len(), 2);
    let analysis = if hits.is_empty() {
        format!("No search results found for '{query}'.")
    } else if features.is_empty() {
        format!(
            "Found {} result(s) for '{query}' with no scam reports.",
            hits.len()
        )
    } else {
        format!(
            "Found {} result(s) for '{query}'; some mention scam-related terms.",
            hits.len()
        )
    };

    json!({
        "query": query,
        "totalResults": hits.len(),
        "searchResults": hits,
        "analysis": analysis,
        "timestamp": now_timestamp(),
        "riskLevel": risk,
        "suspiciousFeatures": features,
    })
}

/// Structured failure result; never raised as an error.
pub fn search_error(query: &str, message: &str) -> Value {
    json!({
        "error": true,
        "message": message,
        "query": query,
        "timestamp": now_timestamp(),
    })
}

/// Web search over a [`SearchProvider`].
pub struct WebSearchTool {
    provider: Arc<dyn SearchProvider>,
}

impl WebSearchTool {
    pub fn new(provider: Arc<dyn SearchProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl AnalysisTool for WebSearchTool {
    fn name(&self) -> ToolName {
        ToolName::WebSearch
    }

    fn description(&self) -> &'static str {
        "Search the web for reputation information about a sender, domain or \
         phrase, e.g. existing scam reports."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {"type": "string", "description": "Search query"},
                "maxResults": {
                    "type": "integer",
                    "description": "Maximum number of results (1-10)",
                    "minimum": 1,
                    "maximum": 10
                }
            },
            "required": ["query"]
        })
    }

    async fn invoke(&self, args: &Value, ctx: ToolContext<'_>) -> Result<Value, ToolError> {
        let Some(query) = string_arg(args, "query") else {
            return Ok(search_error("", "query is empty"));
        };

        let max_results = args
            .get("maxResults")
            .or_else(|| args.get("max_results"))
            .or_else(|| ctx.setting("maxResults"))
            .and_then(Value::as_u64)
            .map(|n| n as usize)
            .unwrap_or(DEFAULT_MAX_RESULTS)
            .clamp(1, MAX_RESULTS_LIMIT);

        match self.provider.search(query, max_results, ctx.api_key()).await {
            Ok(hits) => {
                tracing::debug!(query = %query, hits = hits.len(), "web search completed");
                Ok(summarize_results(query, &hits))
            }
            Err(e) => {
                tracing::warn!(query = %query, error = %e, "web search failed");
                Ok(search_error(query, &format!("{e:#}")))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::types::ToolConfig;
    use std::sync::Mutex;

    struct StubProvider {
        hits: Vec<SearchHit>,
        seen: Mutex<Vec<(String, usize, Option<String>)>>,
    }

    #[async_trait]
    impl SearchProvider for StubProvider {
        async fn search(
            &self,
            query: &str,
            max_results: usize,
            api_key: Option<&str>,
        ) -> anyhow::Result<Vec<SearchHit>> {
            self.seen.lock().unwrap().push((
                query.to_string(),
                max_results,
                api_key.map(str::to_string),
            ));
            Ok(self.hits.iter().take(max_results).cloned().collect())
        }
    }

    struct FailingProvider;

    #[async_trait]
    impl SearchProvider for FailingProvider {
        async fn search(&self, _: &str, _: usize, _: Option<&str>) -> anyhow::Result<Vec<SearchHit>> {
            bail!("connection reset by peer")
        }
    }

    fn hit(title: &str, snippet: &str) -> SearchHit {
        SearchHit {
            title: title.into(),
            url: "https://example.com".into(),
            snippet: snippet.into(),
        }
    }

    #[tokio::test]
    async fn normalizes_results_and_scores_scam_mentions() {
        let provider = Arc::new(StubProvider {
            hits: vec![
                hit("secure-paypal-login.tk reported as phishing", "Users warn of a scam"),
                hit("Fraud alert", "fake invoice emails"),
            ],
            seen: Mutex::new(Vec::new()),
        });
        let tool = WebSearchTool::new(provider.clone());
        let config = ToolConfig {
            api_key: Some("tvly-key".into()),
            settings: None,
        };
        let ctx = ToolContext {
            config: Some(&config),
        };

        let result = tool
            .invoke(&json!({"query": "secure-paypal-login.tk", "maxResults": 50}), ctx)
            .await
            .unwrap();

        assert_eq!(result["query"], "secure-paypal-login.tk");
        assert_eq!(result["totalResults"], 2);
        assert_eq!(result["riskLevel"], "high");
        assert!(result["timestamp"].is_string());
        let seen = provider.seen.lock().unwrap();
        assert_eq!(seen[0].1, MAX_RESULTS_LIMIT, "maxResults is clamped");
        assert_eq!(seen[0].2.as_deref(), Some("tvly-key"));
    }

    #[tokio::test]
    async fn transport_failure_is_a_structured_result() {
        let tool = WebSearchTool::new(Arc::new(FailingProvider));
        let result = tool
            .invoke(&json!({"query": "example.com"}), ToolContext::default())
            .await
            .unwrap();
        assert_eq!(result["error"], true);
        assert_eq!(result["query"], "example.com");
        assert!(result["message"].as_str().unwrap().contains("connection reset"));
    }

    #[tokio::test]
    async fn http_provider_requires_api_key() {
        let provider = HttpSearchProvider::new("http://127.0.0.1:9/search").unwrap();
        let err = provider.search("x", 3, None).await.unwrap_err();
        assert!(err.to_string().contains("API key"));
    }

    #[test]
    fn clean_results_are_low_risk() {
        let result = summarize_results("example.com", &[hit("Example Domain", "For documentation")]);
        assert_eq!(result["riskLevel"], "low");
        assert!(result["suspiciousFeatures"].as_array().unwrap().is_empty());
    }
}
