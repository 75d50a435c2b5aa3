//! Deterministic analysis tools the model can call during an analysis.
//!
//! Four tools are pure heuristics over email artefacts (URLs, domains,
//! headers, attachment metadata) and run offline. The fifth, web search,
//! goes through a pluggable [`SearchProvider`]. Every tool returns a JSON
//! object with at least `riskLevel`, `suspiciousFeatures` and `analysis`.

pub mod attachment_scanner;
pub mod domain_checker;
pub mod errors;
pub mod header_analyzer;
pub mod registry;
pub mod types;
pub mod url_analyzer;
pub mod web_search;

// Re-exports for convenience
pub use errors::ToolError;
pub use registry::ToolRegistry;
pub use types::{AnalysisTool, ToolCallResult, ToolConfig, ToolContext, ToolName, ToolSettings};
pub use web_search::{HttpSearchProvider, SearchHit, SearchProvider};
