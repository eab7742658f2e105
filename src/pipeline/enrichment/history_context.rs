use crate::models::MedicalHistoryRecord;

pub const NO_KNOWN_HISTORY: &str = "Patient has no known medical history.";

/// One-line natural-language summary of the patient's profile for the model.
///
/// Parts appear in a fixed order (allergies, chronic conditions, current
/// medications) joined by `". "`. Blank fields are skipped.
pub fn build_history_context(record: Option<&MedicalHistoryRecord>) -> String {
    let Some(record) = record else {
        return NO_KNOWN_HISTORY.to_string();
    };

    let parts: Vec<String> = [
        ("Allergies", record.allergy.as_deref()),
        ("Chronic Conditions", record.chronic_condition.as_deref()),
        ("Current Medications", record.current_medication.as_deref()),
    ]
    .into_iter()
    .filter_map(|(label, value)| {
        let value = value?.trim();
        (!value.is_empty()).then(|| format!("{label}: {value}"))
    })
    .collect();

    if parts.is_empty() {
        NO_KNOWN_HISTORY.to_string()
    } else {
        parts.join(". ")
    }
}
