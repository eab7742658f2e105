pub const MEDICINE_LABEL_PROMPT: &str = r#"
Analyze this medicine image.
Extract the following and answer with a single JSON object, nothing else:
{
  "drug_name": "string",
  "strength": "string",
  "indications": "string",
  "prescription_drug": "Yes | No"
}
If a field cannot be read from the image, use null for that field.
"#;

pub const MEDICINE_EFFECTS_SYSTEM_PROMPT: &str = r#"
You are a careful pharmacist assistant. Using ONLY the patient history and the
medicine information provided, tell the patient about warnings, precautions and
side effects that apply to them. Point out interactions with their current
medications and conflicts with their allergies or chronic conditions.
Write plain, patient-friendly sentences.
"#;

pub const REPORT_ANALYSIS_PROMPT: &str = r#"
You are a helpful medical API. Analyze the image and return a valid JSON object.

Rules:
1. Extract 'patient_name' and 'report_date'.
2. 'patient_summary': Write a polite, 2-sentence summary for the patient (e.g., "Your blood count shows low iron levels.").
3. 'abnormalities': List ONLY test results that are marked High or Low. Ignore normal results.
4. 'recommendations': Provide exactly 3 simple, patient-friendly health tips based on the abnormalities.
5. ONLY return the JSON object, nothing else.

Output Format (Strict JSON):
{
  "patient_name": "string",
  "report_date": "string",
  "patient_summary": "string",
  "abnormalities": [
    {"test": "string", "value": "string", "status": "High/Low"}
  ],
  "recommendations": ["string", "string", "string"]
}
"#;

/// Second-pass prompt: patient history plus everything known about the medicine.
pub fn build_effects_prompt(history_context: &str, medicine_context: &str) -> String {
    format!(
        r#"<patient_history>
{history_context}
</patient_history>

<medicine_information>
{medicine_context}
</medicine_information>

Analyze this medicine and the patient history. List any warnings, precautions or side effects that can happen for this patient."#
    )
}
