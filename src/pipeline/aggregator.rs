//! Orchestrates one upload: decode → model → validate → enrich → persist.
//!
//! Model and parsing problems always come back as a failure envelope. Only
//! storage and database faults are returned as `Err`.

use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;

use super::enrichment::{
    build_history_context, DrugReferenceLookup, EnrichedMedicine, ReferenceEnricher,
};
use super::extraction::{
    decode_image, encode_for_model, ExtractionError, PdfPageRenderer, PdfStitcher,
};
use super::structuring::{
    build_effects_prompt, validate_medicine, validate_report, AnalysisEnvelope, ReportFinding,
    MEDICINE_EFFECTS_SYSTEM_PROMPT, MEDICINE_LABEL_PROMPT, REPORT_ANALYSIS_PROMPT,
};
use crate::db::{DatabaseError, RecordStore};
use crate::models::{EntryType, HistoryEntry, Identity};
use crate::ollama_service::{OllamaService, OperationKind};
use crate::storage::{with_extension, ImageStore, StorageError};

pub const UNREADABLE_IMAGE: &str = "Could not read image";
pub const PDF_UNPROCESSABLE: &str = "Could not process PDF file.";
pub const PDF_REQUIRED: &str = "File must be a PDF";
pub const PDF_UNSTRUCTURED: &str = "AI could not structure the PDF data";

const PDF_CONTENT_TYPE: &str = "application/pdf";

#[derive(Error, Debug)]
pub enum AggregatorError {
    #[error("Image storage failed: {0}")]
    Storage(#[from] StorageError),

    #[error("Record persistence failed: {0}")]
    Database(#[from] DatabaseError),

    #[error("Payload serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// One multipart file as received from the client.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub file_name: String,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

impl UploadedFile {
    fn declares_non_pdf(&self) -> bool {
        self.content_type.as_deref().is_some_and(|declared| {
            let essence = declared.split(';').next().unwrap_or_default().trim();
            !essence.eq_ignore_ascii_case(PDF_CONTENT_TYPE)
        })
    }
}

pub struct RecordAggregator {
    ollama: Arc<OllamaService>,
    enricher: ReferenceEnricher,
    stitcher: PdfStitcher,
    images: Arc<dyn ImageStore>,
    records: Arc<dyn RecordStore>,
}

impl RecordAggregator {
    pub fn new(
        ollama: Arc<OllamaService>,
        lookup: Arc<dyn DrugReferenceLookup>,
        renderer: Arc<dyn PdfPageRenderer>,
        images: Arc<dyn ImageStore>,
        records: Arc<dyn RecordStore>,
    ) -> Self {
        Self {
            ollama,
            enricher: ReferenceEnricher::new(lookup),
            stitcher: PdfStitcher::new(renderer),
            images,
            records,
        }
    }

    /// Medicine packaging photo → patient-specific warnings text.
    ///
    /// Nothing is persisted unless both model passes succeed and the drug
    /// name was readable.
    pub fn process_medicine_image(
        &self,
        owner: &Identity,
        upload: &UploadedFile,
    ) -> Result<AnalysisEnvelope<String>, AggregatorError> {
        let span = tracing::info_span!("medicine_upload", user_id = %owner.user_id, size = upload.bytes.len());
        let _enter = span.enter();
        let started = Instant::now();

        let decoded = decode_image(&upload.bytes).and_then(|image| encode_for_model(&image));
        let model_image = match decoded {
            Ok(encoded) => encoded.bytes,
            Err(e) => {
                tracing::info!(error = %e, "Medicine image could not be decoded");
                return Ok(AnalysisEnvelope::failure(UNREADABLE_IMAGE));
            }
        };

        let raw = match self.ollama.analyze_image(
            OperationKind::MedicineLabel,
            &model_image,
            MEDICINE_LABEL_PROMPT,
            None,
        ) {
            Ok(raw) => raw,
            Err(_) => return Ok(AnalysisEnvelope::failure(UNREADABLE_IMAGE)),
        };

        let (finding, _) = validate_medicine(&raw);
        if !finding.has_readable_drug_name() {
            tracing::info!("No readable drug name, skipping lookup and persistence");
            return Ok(AnalysisEnvelope::failure(UNREADABLE_IMAGE));
        }

        let reference = match self.enricher.enrich(&finding.drug_name) {
            Ok(reference) => reference,
            Err(_) => return Ok(AnalysisEnvelope::failure(UNREADABLE_IMAGE)),
        };

        let record = self.records.find_by_user(&owner.user_id)?;
        let history_context = build_history_context(record.as_ref());
        let enriched = EnrichedMedicine { finding, reference };
        let prompt = build_effects_prompt(&history_context, &enriched.context_blob());

        let analysis = match self.ollama.analyze_text(
            OperationKind::MedicineEffects,
            &prompt,
            Some(MEDICINE_EFFECTS_SYSTEM_PROMPT),
        ) {
            Ok(text) => text.trim().to_string(),
            Err(_) => return Ok(AnalysisEnvelope::failure(UNREADABLE_IMAGE)),
        };

        let envelope = AnalysisEnvelope::Success(analysis);
        self.persist(owner, &upload.bytes, &upload.file_name, EntryType::Med, &envelope)?;

        tracing::info!(elapsed_ms = started.elapsed().as_millis() as u64, "Medicine upload processed");
        Ok(envelope)
    }

    /// Lab report photo → structured findings. Every attempt that reaches the
    /// decoder or the validator leaves a history entry, including fallbacks.
    pub fn process_report_image(
        &self,
        owner: &Identity,
        upload: &UploadedFile,
    ) -> Result<AnalysisEnvelope<ReportFinding>, AggregatorError> {
        let span = tracing::info_span!("report_image_upload", user_id = %owner.user_id, size = upload.bytes.len());
        let _enter = span.enter();

        let decoded = decode_image(&upload.bytes).and_then(|image| encode_for_model(&image));
        let model_image = match decoded {
            Ok(encoded) => encoded.bytes,
            Err(e) => {
                tracing::info!(error = %e, "Report image could not be decoded");
                let envelope = AnalysisEnvelope::failure(UNREADABLE_IMAGE);
                self.persist(owner, &upload.bytes, &upload.file_name, EntryType::Report, &envelope)?;
                return Ok(envelope);
            }
        };

        self.analyze_report(
            owner,
            &upload.bytes,
            &upload.file_name,
            &model_image,
            UNREADABLE_IMAGE,
        )
    }

    /// Multi-page PDF report → one stitched image → structured findings.
    pub fn process_report_pdf(
        &self,
        owner: &Identity,
        upload: &UploadedFile,
    ) -> Result<AnalysisEnvelope<ReportFinding>, AggregatorError> {
        let span = tracing::info_span!("report_pdf_upload", user_id = %owner.user_id, size = upload.bytes.len());
        let _enter = span.enter();

        if upload.declares_non_pdf() {
            return Ok(AnalysisEnvelope::failure(PDF_REQUIRED));
        }

        let stitched = match self
            .stitcher
            .stitch(&upload.bytes)
            .and_then(|image| encode_for_model(&image))
        {
            Ok(encoded) => encoded,
            Err(e) => {
                log_pdf_failure(&e);
                let envelope = AnalysisEnvelope::failure(PDF_UNPROCESSABLE);
                self.persist(owner, &upload.bytes, &upload.file_name, EntryType::Report, &envelope)?;
                return Ok(envelope);
            }
        };

        let stored_name = with_extension(&upload.file_name, stitched.extension);
        self.analyze_report(
            owner,
            &stitched.bytes,
            &stored_name,
            &stitched.bytes,
            PDF_UNSTRUCTURED,
        )
    }

    /// Shared tail of both report flows. `stored_bytes` is what lands in image
    /// storage; `model_image` is what the model sees.
    fn analyze_report(
        &self,
        owner: &Identity,
        stored_bytes: &[u8],
        stored_name: &str,
        model_image: &[u8],
        failure_message: &str,
    ) -> Result<AnalysisEnvelope<ReportFinding>, AggregatorError> {
        let started = Instant::now();

        let raw = match self.ollama.analyze_image(
            OperationKind::ReportAnalysis,
            model_image,
            REPORT_ANALYSIS_PROMPT,
            None,
        ) {
            Ok(raw) => raw,
            Err(_) => return Ok(AnalysisEnvelope::failure(failure_message)),
        };

        let (envelope, structured) = validate_report(&raw, failure_message);
        self.persist(owner, stored_bytes, stored_name, EntryType::Report, &envelope)?;

        tracing::info!(
            structured,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Report processed"
        );
        Ok(envelope)
    }

    /// Store the image, then append the entry. Returns the image reference.
    fn persist<T: serde::Serialize>(
        &self,
        owner: &Identity,
        bytes: &[u8],
        file_name: &str,
        entry_type: EntryType,
        envelope: &AnalysisEnvelope<T>,
    ) -> Result<String, AggregatorError> {
        let image_reference = self.images.save(bytes, file_name, &owner.user_id)?;
        let entry = HistoryEntry::new(
            image_reference.clone(),
            entry_type,
            serde_json::to_value(envelope)?,
        );
        self.records.append_entry(owner, &entry)?;
        tracing::debug!(entry_id = %entry.id, entry_type = entry_type.as_str(), "History entry recorded");
        Ok(image_reference)
    }
}

fn log_pdf_failure(e: &ExtractionError) {
    match e {
        ExtractionError::PdfRendering { .. } | ExtractionError::ImageProcessing(_) => {
            tracing::warn!(error = %e, "PDF conversion failed")
        }
        _ => tracing::info!(error = %e, "PDF rejected"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::SqliteRecordStore;
    use crate::models::MedicalInfo;
    use crate::pipeline::enrichment::MockReferenceLookup;
    use crate::pipeline::extraction::decode::encode_png;
    use crate::pipeline::extraction::MockPdfPageRenderer;
    use crate::pipeline::structuring::MockVisionClient;
    use crate::storage::FsImageStore;
    use image::{Rgb, RgbImage};
    use std::time::Duration;
    use tempfile::TempDir;

    const QUEUE_TIMEOUT: Duration = Duration::from_secs(5);

    const LABEL_JSON: &str = r#"I can see a blister pack.
{"drug_name": "Ibuprofen", "strength": "200 mg", "indications": "Pain and fever", "prescription_drug": "No"}"#;

    const REPORT_JSON: &str = r#"{"patient_name": "Jane Doe", "report_date": "2024-03-02",
        "patient_summary": "Your iron is low.",
        "abnormalities": [{"test": "Ferritin", "value": "8 ng/mL", "status": "Low"}],
        "recommendations": ["Eat leafy greens", "Take iron with vitamin C", "Retest in 3 months"]}"#;

    struct Harness {
        _dir: TempDir,
        vision: Arc<MockVisionClient>,
        reference: Arc<MockReferenceLookup>,
        renderer: Arc<MockPdfPageRenderer>,
        images: Arc<FsImageStore>,
        records: Arc<SqliteRecordStore>,
        aggregator: RecordAggregator,
    }

    fn harness_with(vision: MockVisionClient, renderer: MockPdfPageRenderer) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let vision = Arc::new(vision);
        let reference = Arc::new(
            MockReferenceLookup::new()
                .with_record("Ibuprofen", &[("drug_interactions", "Avoid combining with aspirin")]),
        );
        let renderer = Arc::new(renderer);
        let images = Arc::new(FsImageStore::new(&dir.path().join("images")).unwrap());
        let records = Arc::new(SqliteRecordStore::open(&dir.path().join("test.db")).unwrap());
        let ollama = Arc::new(OllamaService::new(vision.clone(), "medgemma:4b", QUEUE_TIMEOUT));

        let aggregator = RecordAggregator::new(
            ollama,
            reference.clone(),
            renderer.clone(),
            images.clone(),
            records.clone(),
        );
        Harness {
            _dir: dir,
            vision,
            reference,
            renderer,
            images,
            records,
            aggregator,
        }
    }

    fn harness(responses: &[&str]) -> Harness {
        harness_with(MockVisionClient::new(responses), MockPdfPageRenderer::new(vec![(100, 300), (200, 150)]))
    }

    fn owner() -> Identity {
        Identity {
            user_id: "user-1".into(),
            email: "patient@example.com".into(),
        }
    }

    fn png_upload(name: &str) -> UploadedFile {
        UploadedFile {
            file_name: name.into(),
            content_type: Some("image/png".into()),
            bytes: encode_png(&RgbImage::from_pixel(8, 8, Rgb([120, 40, 40]))).unwrap(),
        }
    }

    fn garbage_upload(name: &str) -> UploadedFile {
        UploadedFile {
            file_name: name.into(),
            content_type: Some("image/jpeg".into()),
            bytes: b"not an image at all".to_vec(),
        }
    }

    fn pdf_upload() -> UploadedFile {
        UploadedFile {
            file_name: "labs.pdf".into(),
            content_type: Some("application/pdf".into()),
            bytes: b"%PDF-1.7 mock".to_vec(),
        }
    }

    fn entries(h: &Harness) -> Vec<HistoryEntry> {
        h.records.list_history("user-1").unwrap()
    }

    // -- Medicine --

    #[test]
    fn medicine_success_persists_one_entry() {
        let h = harness(&[LABEL_JSON, "  Ibuprofen may irritate your stomach.  "]);
        h.records
            .update_medical_info(
                &owner(),
                &MedicalInfo {
                    allergy: Some("Penicillin".into()),
                    ..Default::default()
                },
            )
            .unwrap();

        let envelope = h
            .aggregator
            .process_medicine_image(&owner(), &png_upload("box.png"))
            .unwrap();
        assert_eq!(
            envelope,
            AnalysisEnvelope::Success("Ibuprofen may irritate your stomach.".into())
        );

        let calls = h.vision.recorded_calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].image_count, 1);
        assert_eq!(calls[1].image_count, 0);
        assert!(calls[1].prompt.contains("Allergies: Penicillin"));
        assert!(calls[1].prompt.contains("Avoid combining with aspirin"));
        assert_eq!(h.reference.call_count(), 1);

        let stored = entries(&h);
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].entry_type, EntryType::Med);
        assert_eq!(stored[0].response_payload["status"], "success");
        assert!(h.images.resolve(&stored[0].image_reference).exists());
    }

    #[test]
    fn medicine_unknown_drug_short_circuits() {
        let h = harness(&[r#"{"drug_name": "UNKNOWN", "strength": null, "indications": null, "prescription_drug": null}"#]);
        let envelope = h
            .aggregator
            .process_medicine_image(&owner(), &png_upload("box.png"))
            .unwrap();

        assert_eq!(envelope, AnalysisEnvelope::failure(UNREADABLE_IMAGE));
        assert_eq!(h.vision.call_count(), 1);
        assert_eq!(h.reference.call_count(), 0);
        assert!(entries(&h).is_empty());
        assert!(h.records.find_by_user("user-1").unwrap().is_none());
    }

    #[test]
    fn medicine_unparseable_label_short_circuits() {
        let h = harness(&["Sorry, the photo is too dark."]);
        let envelope = h
            .aggregator
            .process_medicine_image(&owner(), &png_upload("box.png"))
            .unwrap();
        assert_eq!(envelope, AnalysisEnvelope::failure(UNREADABLE_IMAGE));
        assert!(entries(&h).is_empty());
    }

    #[test]
    fn medicine_undecodable_image_writes_nothing() {
        let h = harness(&[LABEL_JSON]);
        let envelope = h
            .aggregator
            .process_medicine_image(&owner(), &garbage_upload("box.jpg"))
            .unwrap();
        assert_eq!(envelope, AnalysisEnvelope::failure(UNREADABLE_IMAGE));
        assert_eq!(h.vision.call_count(), 0);
        assert!(entries(&h).is_empty());
    }

    #[test]
    fn medicine_model_failure_writes_nothing() {
        let h = harness_with(MockVisionClient::failing(), MockPdfPageRenderer::new(vec![]));
        let envelope = h
            .aggregator
            .process_medicine_image(&owner(), &png_upload("box.png"))
            .unwrap();
        assert_eq!(envelope, AnalysisEnvelope::failure(UNREADABLE_IMAGE));
        assert!(entries(&h).is_empty());
    }

    #[test]
    fn medicine_second_pass_failure_writes_nothing() {
        // Only the label response is queued; the effects call errors.
        let h = harness(&[LABEL_JSON]);
        let envelope = h
            .aggregator
            .process_medicine_image(&owner(), &png_upload("box.png"))
            .unwrap();
        assert_eq!(envelope, AnalysisEnvelope::failure(UNREADABLE_IMAGE));
        assert_eq!(h.vision.call_count(), 2);
        assert!(entries(&h).is_empty());
    }

    #[test]
    fn medicine_lookup_failure_still_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let vision = Arc::new(MockVisionClient::new(&[LABEL_JSON, "Take with food."]));
        let records = Arc::new(SqliteRecordStore::open(&dir.path().join("t.db")).unwrap());
        let aggregator = RecordAggregator::new(
            Arc::new(OllamaService::new(vision.clone(), "medgemma:4b", QUEUE_TIMEOUT)),
            Arc::new(MockReferenceLookup::failing()),
            Arc::new(MockPdfPageRenderer::new(vec![])),
            Arc::new(FsImageStore::new(&dir.path().join("img")).unwrap()),
            records.clone(),
        );

        let envelope = aggregator
            .process_medicine_image(&owner(), &png_upload("box.png"))
            .unwrap();
        assert!(envelope.is_success());
        assert!(vision.recorded_calls()[1]
            .prompt
            .contains("No reference information was found"));
        assert!(vision.recorded_calls()[1]
            .prompt
            .contains("Patient has no known medical history."));
        assert_eq!(records.list_history("user-1").unwrap().len(), 1);
    }

    // -- Report image --

    #[test]
    fn report_success_persists_finding() {
        let h = harness(&[REPORT_JSON]);
        let envelope = h
            .aggregator
            .process_report_image(&owner(), &png_upload("cbc.png"))
            .unwrap();

        let AnalysisEnvelope::Success(finding) = &envelope else {
            panic!("expected success, got {envelope:?}");
        };
        assert_eq!(finding.patient_name, "Jane Doe");

        let stored = entries(&h);
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].entry_type, EntryType::Report);
        assert_eq!(stored[0].response_payload, serde_json::to_value(&envelope).unwrap());
        assert!(stored[0].image_reference.ends_with("_cbc.png"));
    }

    #[test]
    fn report_fallback_still_persists_exactly_one_entry() {
        let h = harness(&["The report is illegible."]);
        let envelope = h
            .aggregator
            .process_report_image(&owner(), &png_upload("cbc.png"))
            .unwrap();
        assert_eq!(envelope, AnalysisEnvelope::failure(UNREADABLE_IMAGE));

        let stored = entries(&h);
        assert_eq!(stored.len(), 1);
        assert_eq!(
            stored[0].response_payload,
            serde_json::json!({"status": "failure", "message": "Could not read image"})
        );
    }

    #[test]
    fn report_undecodable_image_persists_failure_entry() {
        let h = harness(&[REPORT_JSON]);
        let envelope = h
            .aggregator
            .process_report_image(&owner(), &garbage_upload("scan.jpg"))
            .unwrap();
        assert_eq!(envelope, AnalysisEnvelope::failure(UNREADABLE_IMAGE));
        assert_eq!(h.vision.call_count(), 0);

        let stored = entries(&h);
        assert_eq!(stored.len(), 1);
        assert_eq!(
            std::fs::read(h.images.resolve(&stored[0].image_reference)).unwrap(),
            b"not an image at all"
        );
    }

    #[test]
    fn report_model_failure_writes_nothing() {
        let h = harness_with(MockVisionClient::failing(), MockPdfPageRenderer::new(vec![]));
        let envelope = h
            .aggregator
            .process_report_image(&owner(), &png_upload("cbc.png"))
            .unwrap();
        assert_eq!(envelope, AnalysisEnvelope::failure(UNREADABLE_IMAGE));
        assert!(entries(&h).is_empty());
    }

    // -- Report PDF --

    #[test]
    fn pdf_success_stores_stitched_jpeg() {
        let h = harness(&[REPORT_JSON]);
        let envelope = h.aggregator.process_report_pdf(&owner(), &pdf_upload()).unwrap();
        assert!(envelope.is_success());

        let stored = entries(&h);
        assert_eq!(stored.len(), 1);
        assert!(stored[0].image_reference.ends_with("_labs.jpg"));
        let bytes = std::fs::read(h.images.resolve(&stored[0].image_reference)).unwrap();
        assert_eq!(decode_image(&bytes).unwrap().dimensions(), (200, 450));
    }

    #[test]
    fn long_pdf_is_stored_as_png_when_too_tall_for_jpeg() {
        // Thirty A4 pages at 200 DPI stack well past 65535 px.
        let h = harness_with(
            MockVisionClient::new(&[REPORT_JSON]),
            MockPdfPageRenderer::new(vec![(16, 2339); 30]),
        );
        let envelope = h.aggregator.process_report_pdf(&owner(), &pdf_upload()).unwrap();
        assert!(envelope.is_success());
        assert_eq!(h.vision.recorded_calls()[0].image_count, 1);

        let stored = entries(&h);
        assert_eq!(stored.len(), 1);
        assert!(stored[0].image_reference.ends_with("_labs.png"));
        let bytes = std::fs::read(h.images.resolve(&stored[0].image_reference)).unwrap();
        assert_eq!(decode_image(&bytes).unwrap().dimensions(), (16, 2339 * 30));
    }

    #[test]
    fn pdf_wrong_content_type_is_rejected_without_side_effects() {
        let h = harness(&[REPORT_JSON]);
        let upload = UploadedFile {
            content_type: Some("image/png".into()),
            ..pdf_upload()
        };
        let envelope = h.aggregator.process_report_pdf(&owner(), &upload).unwrap();
        assert_eq!(envelope, AnalysisEnvelope::failure(PDF_REQUIRED));
        assert_eq!(h.renderer.call_count(), 0);
        assert_eq!(h.vision.call_count(), 0);
        assert!(entries(&h).is_empty());
    }

    #[test]
    fn pdf_content_type_parameters_are_ignored() {
        let h = harness(&[REPORT_JSON]);
        let upload = UploadedFile {
            content_type: Some("Application/PDF; charset=binary".into()),
            ..pdf_upload()
        };
        assert!(h.aggregator.process_report_pdf(&owner(), &upload).unwrap().is_success());
    }

    #[test]
    fn pdf_stitch_failure_persists_failure_entry() {
        let h = harness(&[REPORT_JSON]);
        let upload = UploadedFile {
            bytes: b"PK\x03\x04 zip pretending to be pdf".to_vec(),
            ..pdf_upload()
        };
        let envelope = h.aggregator.process_report_pdf(&owner(), &upload).unwrap();
        assert_eq!(envelope, AnalysisEnvelope::failure(PDF_UNPROCESSABLE));
        assert_eq!(h.vision.call_count(), 0);

        let stored = entries(&h);
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].response_payload["message"], PDF_UNPROCESSABLE);
    }

    #[test]
    fn pdf_without_pages_persists_failure_entry() {
        let h = harness_with(MockVisionClient::new(&[REPORT_JSON]), MockPdfPageRenderer::new(vec![]));
        let envelope = h.aggregator.process_report_pdf(&owner(), &pdf_upload()).unwrap();
        assert_eq!(envelope, AnalysisEnvelope::failure(PDF_UNPROCESSABLE));
        assert_eq!(entries(&h).len(), 1);
    }

    #[test]
    fn pdf_unstructured_response_uses_pdf_message() {
        let h = harness(&["{ not json }"]);
        let envelope = h.aggregator.process_report_pdf(&owner(), &pdf_upload()).unwrap();
        assert_eq!(envelope, AnalysisEnvelope::failure(PDF_UNSTRUCTURED));
        assert_eq!(entries(&h).len(), 1);
    }

    // -- Model queue --

    #[test]
    fn busy_model_degrades_to_failure_envelope() {
        use std::sync::mpsc;
        use std::thread;

        let dir = tempfile::tempdir().unwrap();
        let vision = Arc::new(MockVisionClient::new(&[REPORT_JSON]));
        let ollama = Arc::new(OllamaService::new(
            vision.clone(),
            "medgemma:4b",
            Duration::from_millis(100),
        ));
        let records = Arc::new(SqliteRecordStore::open(&dir.path().join("t.db")).unwrap());
        let aggregator = RecordAggregator::new(
            ollama.clone(),
            Arc::new(MockReferenceLookup::new()),
            Arc::new(MockPdfPageRenderer::new(vec![(100, 300)])),
            Arc::new(FsImageStore::new(&dir.path().join("img")).unwrap()),
            records.clone(),
        );

        let (held_tx, held_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let holder = {
            let ollama = Arc::clone(&ollama);
            thread::spawn(move || {
                let _guard = ollama.acquire(OperationKind::MedicineLabel).unwrap();
                held_tx.send(()).unwrap();
                let _ = release_rx.recv();
            })
        };
        held_rx.recv().unwrap();

        let start = Instant::now();
        let image = aggregator
            .process_report_image(&owner(), &png_upload("cbc.png"))
            .unwrap();
        let pdf = aggregator.process_report_pdf(&owner(), &pdf_upload()).unwrap();
        assert!(start.elapsed() < Duration::from_secs(2));

        assert_eq!(image, AnalysisEnvelope::failure(UNREADABLE_IMAGE));
        assert_eq!(pdf, AnalysisEnvelope::failure(PDF_UNSTRUCTURED));
        assert_eq!(vision.call_count(), 0);
        assert!(records.list_history("user-1").unwrap().is_empty());

        release_tx.send(()).unwrap();
        holder.join().unwrap();
    }

    // -- Infrastructure faults --

    struct BrokenImageStore;

    impl ImageStore for BrokenImageStore {
        fn save(&self, _: &[u8], _: &str, _: &str) -> Result<String, StorageError> {
            Err(StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "read-only volume",
            )))
        }
    }

    #[test]
    fn storage_fault_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let records = Arc::new(SqliteRecordStore::open(&dir.path().join("t.db")).unwrap());
        let aggregator = RecordAggregator::new(
            Arc::new(OllamaService::new(
                Arc::new(MockVisionClient::new(&[REPORT_JSON])),
                "medgemma:4b",
                QUEUE_TIMEOUT,
            )),
            Arc::new(MockReferenceLookup::new()),
            Arc::new(MockPdfPageRenderer::new(vec![])),
            Arc::new(BrokenImageStore),
            records.clone(),
        );

        let err = aggregator
            .process_report_image(&owner(), &png_upload("cbc.png"))
            .unwrap_err();
        assert!(matches!(err, AggregatorError::Storage(_)));
        assert!(records.list_history("user-1").unwrap().is_empty());
    }
}
