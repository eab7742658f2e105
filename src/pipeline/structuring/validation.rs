//! Coerces loosely-shaped model JSON into the strict finding types.
//!
//! Both entry points are total: any failure is logged and replaced by the
//! type's fallback, never a partially-populated value.

use serde_json::{Map, Value};

use super::parser::parse_json_block;
use super::types::{
    Abnormality, AbnormalityStatus, AnalysisEnvelope, MedicineFinding, PrescriptionStatus,
    ReportFinding, UNKNOWN,
};
use super::StructuringError;

/// Validate a medicine-label response. The flag is `false` when the fallback was used.
pub fn validate_medicine(raw: &str) -> (MedicineFinding, bool) {
    match parse_json_block(raw).and_then(|value| coerce_medicine(&value)) {
        Ok(finding) => (finding, true),
        Err(e) => {
            tracing::warn!(reason = %e, "Medicine response rejected, using UNKNOWN fallback");
            (MedicineFinding::unknown(), false)
        }
    }
}

/// Validate a report response. On failure the envelope carries `failure_message`.
pub fn validate_report(
    raw: &str,
    failure_message: &str,
) -> (AnalysisEnvelope<ReportFinding>, bool) {
    match parse_json_block(raw).and_then(|value| coerce_report(&value)) {
        Ok(finding) => (AnalysisEnvelope::Success(finding), true),
        Err(e) => {
            tracing::warn!(reason = %e, "Report response rejected, using failure envelope");
            (AnalysisEnvelope::failure(failure_message), false)
        }
    }
}

pub fn coerce_medicine(value: &Value) -> Result<MedicineFinding, StructuringError> {
    let obj = as_object(value, "$")?;
    Ok(MedicineFinding {
        drug_name: required_text(obj, "drug_name")?,
        strength: required_text(obj, "strength")?,
        indications: required_text(obj, "indications")?,
        prescription_drug: prescription_status(obj)?,
    })
}

pub fn coerce_report(value: &Value) -> Result<ReportFinding, StructuringError> {
    let obj = as_object(value, "$")?;

    let patient_summary = match (obj.get("patient_summary"), obj.get("summary")) {
        (Some(v), _) => text_value(v, "patient_summary")?,
        (None, Some(v)) => text_value(v, "summary")?,
        (None, None) => return Err(StructuringError::mismatch("patient_summary", "missing")),
    };

    Ok(ReportFinding {
        patient_name: required_text(obj, "patient_name")?,
        report_date: required_text(obj, "report_date")?,
        patient_summary,
        abnormalities: abnormalities(obj)?,
        recommendations: recommendations(obj)?,
    })
}

fn as_object<'a>(value: &'a Value, field: &str) -> Result<&'a Map<String, Value>, StructuringError> {
    value
        .as_object()
        .ok_or_else(|| StructuringError::mismatch(field, "expected an object"))
}

/// A key that must be present; `null` becomes the UNKNOWN sentinel.
fn required_text(obj: &Map<String, Value>, field: &str) -> Result<String, StructuringError> {
    let value = obj
        .get(field)
        .ok_or_else(|| StructuringError::mismatch(field, "missing"))?;
    text_value(value, field)
}

fn text_value(value: &Value, field: &str) -> Result<String, StructuringError> {
    match value {
        Value::Null => Ok(UNKNOWN.to_string()),
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        Value::Array(_) | Value::Object(_) => {
            Err(StructuringError::mismatch(field, "expected a scalar"))
        }
    }
}

fn prescription_status(obj: &Map<String, Value>) -> Result<PrescriptionStatus, StructuringError> {
    let value = obj
        .get("prescription_drug")
        .ok_or_else(|| StructuringError::mismatch("prescription_drug", "missing"))?;

    let status = match value {
        Value::Bool(true) => PrescriptionStatus::Yes,
        Value::Bool(false) => PrescriptionStatus::No,
        Value::String(s) => match s.trim().trim_end_matches('.').to_ascii_lowercase().as_str() {
            "yes" | "y" | "true" | "rx" => PrescriptionStatus::Yes,
            "no" | "n" | "false" | "otc" => PrescriptionStatus::No,
            _ => PrescriptionStatus::Unknown,
        },
        Value::Null | Value::Number(_) => PrescriptionStatus::Unknown,
        Value::Array(_) | Value::Object(_) => {
            return Err(StructuringError::mismatch("prescription_drug", "expected a scalar"))
        }
    };
    Ok(status)
}

fn abnormalities(obj: &Map<String, Value>) -> Result<Vec<Abnormality>, StructuringError> {
    let items = match obj.get("abnormalities") {
        None => return Err(StructuringError::mismatch("abnormalities", "missing")),
        Some(Value::Null) => return Ok(Vec::new()),
        Some(Value::Array(items)) => items,
        Some(_) => return Err(StructuringError::mismatch("abnormalities", "expected an array")),
    };

    items
        .iter()
        .enumerate()
        .map(|(i, item)| -> Result<Abnormality, StructuringError> {
            let field = format!("abnormalities[{i}]");
            let entry = as_object(item, &field)?;
            Ok(Abnormality {
                test: required_text(entry, "test")?,
                value: required_text(entry, "value")?,
                status: abnormality_status(entry, &field)?,
            })
        })
        .collect()
}

fn abnormality_status(
    entry: &Map<String, Value>,
    field: &str,
) -> Result<AbnormalityStatus, StructuringError> {
    let raw = entry
        .get("status")
        .and_then(Value::as_str)
        .ok_or_else(|| StructuringError::mismatch(field, "status missing or not a string"))?;
    match raw.trim().to_ascii_lowercase().as_str() {
        "high" => Ok(AbnormalityStatus::High),
        "low" => Ok(AbnormalityStatus::Low),
        other => Err(StructuringError::mismatch(
            field,
            format!("status must be High or Low, got '{other}'"),
        )),
    }
}

fn recommendations(obj: &Map<String, Value>) -> Result<[String; 3], StructuringError> {
    let items = obj
        .get("recommendations")
        .and_then(Value::as_array)
        .ok_or_else(|| StructuringError::mismatch("recommendations", "missing or not an array"))?;

    let texts = items
        .iter()
        .map(|item| match item {
            Value::String(s) => Ok(s.clone()),
            _ => Err(StructuringError::mismatch("recommendations", "expected strings")),
        })
        .collect::<Result<Vec<_>, _>>()?;

    let count = texts.len();
    <[String; 3]>::try_from(texts).map_err(|_| {
        StructuringError::mismatch("recommendations", format!("expected 3 items, got {count}"))
    })
}
