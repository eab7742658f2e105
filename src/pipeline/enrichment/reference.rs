//! Drug reference lookup (openFDA) and merging with the model's finding.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{EnrichmentError, ReferenceError};
use crate::pipeline::structuring::{is_readable_name, MedicineFinding, PrescriptionStatus};

/// Longest text kept per reference field.
const MAX_FIELD_CHARS: usize = 1200;

/// Label sections copied from an openFDA drug label, in display order.
const LABEL_SECTIONS: &[&str] = &[
    "purpose",
    "indications_and_usage",
    "warnings",
    "contraindications",
    "dosage_and_administration",
    "adverse_reactions",
    "drug_interactions",
];

const OPENFDA_FIELDS: &[&str] = &["brand_name", "generic_name", "manufacturer_name"];

/// Reference fields for one drug, keyed by section name. Empty on a miss.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceRecord {
    pub fields: BTreeMap<String, String>,
}

impl ReferenceRecord {
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// External drug-information service. `Ok(None)` is a miss.
pub trait DrugReferenceLookup: Send + Sync {
    fn lookup(&self, drug_name: &str) -> Result<Option<ReferenceRecord>, ReferenceError>;
}

// ── openFDA ───────────────────────────────────────────────

pub struct OpenFdaClient {
    base_url: String,
    client: reqwest::blocking::Client,
    timeout_secs: u64,
}

impl OpenFdaClient {
    pub fn new(base_url: &str, timeout_secs: u64) -> Result<Self, ReferenceError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| ReferenceError::HttpClient(e.to_string()))?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            timeout_secs,
        })
    }
}

#[derive(Deserialize)]
struct LabelResponse {
    #[serde(default)]
    results: Vec<Value>,
}

impl DrugReferenceLookup for OpenFdaClient {
    fn lookup(&self, drug_name: &str) -> Result<Option<ReferenceRecord>, ReferenceError> {
        let url = format!("{}/drug/label.json", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[("search", search_expression(drug_name)), ("limit", "1".into())])
            .send()
            .map_err(|e| {
                if e.is_timeout() {
                    ReferenceError::Timeout(self.timeout_secs)
                } else {
                    ReferenceError::HttpClient(e.to_string())
                }
            })?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(ReferenceError::Status(status.as_u16()));
        }

        let parsed: LabelResponse = response
            .json()
            .map_err(|e| ReferenceError::MalformedResponse(e.to_string()))?;

        Ok(parsed
            .results
            .first()
            .map(record_from_label)
            .filter(|record| !record.is_empty()))
    }
}

/// Match either the brand or the generic name. Quotes are stripped so the
/// name cannot break out of the phrase.
fn search_expression(drug_name: &str) -> String {
    let name: String = drug_name.chars().filter(|c| *c != '"').collect();
    let name = name.trim();
    format!("openfda.brand_name:\"{name}\" openfda.generic_name:\"{name}\"")
}

/// Keep the first entry of each known section, truncated.
fn record_from_label(label: &Value) -> ReferenceRecord {
    let mut fields = BTreeMap::new();

    for section in LABEL_SECTIONS {
        if let Some(text) = first_text(label.get(*section)) {
            fields.insert(section.to_string(), truncate_at_word(text, MAX_FIELD_CHARS));
        }
    }

    if let Some(openfda) = label.get("openfda") {
        for field in OPENFDA_FIELDS {
            if let Some(text) = first_text(openfda.get(*field)) {
                fields.insert(field.to_string(), truncate_at_word(text, MAX_FIELD_CHARS));
            }
        }
    }

    ReferenceRecord { fields }
}

fn first_text(value: Option<&Value>) -> Option<&str> {
    let text = match value? {
        Value::Array(items) => items.first()?.as_str()?,
        Value::String(s) => s.as_str(),
        _ => return None,
    };
    let text = text.trim();
    (!text.is_empty()).then_some(text)
}

/// Cut `text` to at most `max_chars` characters, backing off to the last space.
pub fn truncate_at_word(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let cut: String = text.chars().take(max_chars).collect();
    let trimmed = match cut.rfind(char::is_whitespace) {
        Some(pos) if pos > 0 => &cut[..pos],
        _ => cut.as_str(),
    };
    format!("{}...", trimmed.trim_end())
}

// ── Enricher ──────────────────────────────────────────────

/// Merges a drug name with the reference service. Lookup problems degrade
/// to an empty record.
pub struct ReferenceEnricher {
    lookup: Arc<dyn DrugReferenceLookup>,
}

impl ReferenceEnricher {
    pub fn new(lookup: Arc<dyn DrugReferenceLookup>) -> Self {
        Self { lookup }
    }

    pub fn enrich(&self, drug_name: &str) -> Result<ReferenceRecord, EnrichmentError> {
        if !is_readable_name(drug_name) {
            return Err(EnrichmentError::UnreadableDrugName);
        }

        match self.lookup.lookup(drug_name.trim()) {
            Ok(Some(record)) => {
                tracing::debug!(fields = record.fields.len(), "Reference lookup hit");
                Ok(record)
            }
            Ok(None) => {
                tracing::info!("Reference lookup miss, continuing without reference data");
                Ok(ReferenceRecord::default())
            }
            Err(e) => {
                tracing::warn!(error = %e, "Reference lookup failed, continuing without reference data");
                Ok(ReferenceRecord::default())
            }
        }
    }
}

/// A validated finding together with its reference data.
#[derive(Debug, Clone, PartialEq)]
pub struct EnrichedMedicine {
    pub finding: MedicineFinding,
    pub reference: ReferenceRecord,
}

impl EnrichedMedicine {
    /// Text handed to the second model pass.
    pub fn context_blob(&self) -> String {
        let prescription = match self.finding.prescription_drug {
            PrescriptionStatus::Yes => "Yes",
            PrescriptionStatus::No => "No",
            PrescriptionStatus::Unknown => "UNKNOWN",
        };

        let mut blob = format!(
            "Drug name: {}\nStrength: {}\nIndications: {}\nPrescription drug: {}\n",
            self.finding.drug_name,
            self.finding.strength,
            self.finding.indications,
            prescription,
        );

        if self.reference.is_empty() {
            blob.push_str("\nNo reference information was found for this drug.");
        } else {
            blob.push_str("\nReference information:");
            for (field, text) in &self.reference.fields {
                blob.push_str(&format!("\n- {}: {}", field.replace('_', " "), text));
            }
        }
        blob
    }
}

// ── Mock for testing ──────────────────────────────────────

/// In-memory lookup keyed by lower-cased drug name.
pub struct MockReferenceLookup {
    records: HashMap<String, ReferenceRecord>,
    fail: bool,
    calls: AtomicUsize,
}

impl MockReferenceLookup {
    pub fn new() -> Self {
        Self {
            records: HashMap::new(),
            fail: false,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_record(mut self, drug_name: &str, fields: &[(&str, &str)]) -> Self {
        let record = ReferenceRecord {
            fields: fields
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        };
        self.records.insert(drug_name.to_lowercase(), record);
        self
    }

    /// Every lookup fails as a timed-out request would.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new()
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Default for MockReferenceLookup {
    fn default() -> Self {
        Self::new()
    }
}

impl DrugReferenceLookup for MockReferenceLookup {
    fn lookup(&self, drug_name: &str) -> Result<Option<ReferenceRecord>, ReferenceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(ReferenceError::Timeout(10));
        }
        Ok(self.records.get(&drug_name.to_lowercase()).cloned())
    }
}
