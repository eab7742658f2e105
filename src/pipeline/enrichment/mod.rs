pub mod history_context;
pub mod reference;

pub use history_context::*;
pub use reference::*;

use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum EnrichmentError {
    #[error("Drug name is empty or unreadable")]
    UnreadableDrugName,
}

/// Failures of the drug-reference service. Never surfaced to callers.
#[derive(Error, Debug)]
pub enum ReferenceError {
    #[error("Reference request timed out after {0}s")]
    Timeout(u64),

    #[error("Reference service returned status {0}")]
    Status(u16),

    #[error("HTTP client error: {0}")]
    HttpClient(String),

    #[error("Malformed reference response: {0}")]
    MalformedResponse(String),
}
