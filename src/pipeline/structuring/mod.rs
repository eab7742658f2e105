pub mod ollama;
pub mod parser;
pub mod prompt;
pub mod types;
pub mod validation;

pub use ollama::*;
pub use parser::*;
pub use prompt::*;
pub use types::*;
pub use validation::*;

use thiserror::Error;

/// Reasons a model response could not be turned into a typed finding.
#[derive(Error, Debug, PartialEq)]
pub enum StructuringError {
    #[error("No JSON object found in model output")]
    NoJsonBlock,

    #[error("JSON parsing error: {0}")]
    JsonParsing(String),

    #[error("Schema mismatch at '{field}': {reason}")]
    SchemaMismatch { field: String, reason: String },
}

impl StructuringError {
    pub(crate) fn mismatch(field: &str, reason: impl Into<String>) -> Self {
        Self::SchemaMismatch {
            field: field.to_string(),
            reason: reason.into(),
        }
    }
}

/// Failures talking to the vision model.
#[derive(Error, Debug)]
pub enum OllamaError {
    #[error("Ollama is not running at {0}")]
    Connection(String),

    #[error("Request timed out after {0}s")]
    Timeout(u64),

    #[error("Ollama returned error (status {status}): {body}")]
    Status { status: u16, body: String },

    #[error("HTTP client error: {0}")]
    HttpClient(String),

    #[error("Malformed Ollama response: {0}")]
    MalformedResponse(String),
}
