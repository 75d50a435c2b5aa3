//! Analysis data model, result validation and the error taxonomy.
//!
//! - `types`: `AnalysisRequest`, `AnalysisResult`, `RiskLevel`
//! - `validator`: layered parsing of model text into an `AnalysisResult`
//! - `errors`: `AnalysisError` and connection-error classification

pub mod errors;
pub mod types;
pub mod validator;

// Re-exports for convenience
pub use errors::{AnalysisError, ConnectionErrorKind, ErrorKind};
pub use types::{AnalysisRequest, AnalysisResult, RiskLevel};
pub use validator::{parse_analysis, validate_value};
