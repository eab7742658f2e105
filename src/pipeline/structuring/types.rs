use serde::{Deserialize, Serialize};

/// Placeholder for any field the model could not read.
pub const UNKNOWN: &str = "UNKNOWN";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PrescriptionStatus {
    Yes,
    No,
    #[serde(rename = "UNKNOWN")]
    Unknown,
}

/// What the model read off a medicine package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MedicineFinding {
    pub drug_name: String,
    pub strength: String,
    pub indications: String,
    pub prescription_drug: PrescriptionStatus,
}

impl MedicineFinding {
    /// The fallback substituted for any unparseable medicine response.
    pub fn unknown() -> Self {
        Self {
            drug_name: UNKNOWN.to_string(),
            strength: UNKNOWN.to_string(),
            indications: UNKNOWN.to_string(),
            prescription_drug: PrescriptionStatus::Unknown,
        }
    }

    pub fn has_readable_drug_name(&self) -> bool {
        is_readable_name(&self.drug_name)
    }
}

/// False for empty, whitespace-only and `UNKNOWN` (any case) names.
pub fn is_readable_name(name: &str) -> bool {
    let trimmed = name.trim();
    !trimmed.is_empty() && !trimmed.eq_ignore_ascii_case(UNKNOWN)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AbnormalityStatus {
    High,
    Low,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Abnormality {
    pub test: String,
    pub value: String,
    pub status: AbnormalityStatus,
}

/// Patient-facing reading of a lab report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportFinding {
    pub patient_name: String,
    pub report_date: String,
    pub patient_summary: String,
    pub abnormalities: Vec<Abnormality>,
    pub recommendations: [String; 3],
}

/// Uniform response body: `{"status":"success","message":T}` or
/// `{"status":"failure","message":"<text>"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "message", rename_all = "lowercase")]
pub enum AnalysisEnvelope<T> {
    Success(T),
    Failure(String),
}

impl<T> AnalysisEnvelope<T> {
    pub fn failure(message: impl Into<String>) -> Self {
        Self::Failure(message.into())
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> AnalysisEnvelope<U> {
        match self {
            Self::Success(value) => AnalysisEnvelope::Success(f(value)),
            Self::Failure(message) => AnalysisEnvelope::Failure(message),
        }
    }
}
