//! Patient endpoints. All require an authenticated `Identity`.
//!
//! - `POST /med/upload-medicine-image` — multipart `image`
//! - `POST /med/upload-medical-report-image` — multipart `image`
//! - `POST /med/upload-medical-report-pdf` — multipart `file`
//! - `POST /med/infoupdate` — partial profile update
//! - `GET /med/infoget` — profile fields
//! - `GET /med/history` — history entries in append order
//!
//! Upload endpoints answer 200 with an `AnalysisEnvelope` for every outcome
//! of the analysis itself; only persistence faults become 5xx.

use axum::extract::multipart::MultipartError;
use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use axum::{Extension, Json};

use crate::api::error::ApiError;
use crate::api::types::{ApiContext, HistoryResponse, UpdateResult};
use crate::models::{Identity, MedicalInfo};
use crate::pipeline::structuring::{AnalysisEnvelope, ReportFinding};
use crate::pipeline::UploadedFile;

const DEFAULT_UPLOAD_NAME: &str = "upload";

/// `POST /med/upload-medicine-image`
pub async fn upload_medicine_image(
    State(ctx): State<ApiContext>,
    Extension(identity): Extension<Identity>,
    multipart: Multipart,
) -> Result<Json<AnalysisEnvelope<String>>, ApiError> {
    let upload = read_upload(multipart, "image", ctx.core.config.max_upload_bytes).await?;
    let core = ctx.core.clone();
    let envelope = tokio::task::spawn_blocking(move || {
        core.aggregator().process_medicine_image(&identity, &upload)
    })
    .await??;
    Ok(Json(envelope))
}

/// `POST /med/upload-medical-report-image`
pub async fn upload_report_image(
    State(ctx): State<ApiContext>,
    Extension(identity): Extension<Identity>,
    multipart: Multipart,
) -> Result<Json<AnalysisEnvelope<ReportFinding>>, ApiError> {
    let upload = read_upload(multipart, "image", ctx.core.config.max_upload_bytes).await?;
    let core = ctx.core.clone();
    let envelope = tokio::task::spawn_blocking(move || {
        core.aggregator().process_report_image(&identity, &upload)
    })
    .await??;
    Ok(Json(envelope))
}

/// `POST /med/upload-medical-report-pdf`
pub async fn upload_report_pdf(
    State(ctx): State<ApiContext>,
    Extension(identity): Extension<Identity>,
    multipart: Multipart,
) -> Result<Json<AnalysisEnvelope<ReportFinding>>, ApiError> {
    let upload = read_upload(multipart, "file", ctx.core.config.max_upload_bytes).await?;
    let core = ctx.core.clone();
    let envelope = tokio::task::spawn_blocking(move || {
        core.aggregator().process_report_pdf(&identity, &upload)
    })
    .await??;
    Ok(Json(envelope))
}

/// `POST /med/infoupdate` — absent fields keep their stored value. Creates
/// the record on first use.
pub async fn info_update(
    State(ctx): State<ApiContext>,
    Extension(identity): Extension<Identity>,
    Json(info): Json<MedicalInfo>,
) -> Result<Json<UpdateResult>, ApiError> {
    let core = ctx.core.clone();
    tokio::task::spawn_blocking(move || core.records().update_medical_info(&identity, &info))
        .await??;
    Ok(Json(UpdateResult {
        result: "updated medical info",
    }))
}

/// `GET /med/infoget` — 404 until the record exists.
pub async fn info_get(
    State(ctx): State<ApiContext>,
    Extension(identity): Extension<Identity>,
) -> Result<Json<MedicalInfo>, ApiError> {
    let core = ctx.core.clone();
    let record =
        tokio::task::spawn_blocking(move || core.records().find_by_user(&identity.user_id))
            .await??;

    record
        .as_ref()
        .map(|record| Json(MedicalInfo::from(record)))
        .ok_or_else(|| ApiError::NotFound("Medical record not found".into()))
}

/// `GET /med/history` — empty list when no record exists yet.
pub async fn history(
    State(ctx): State<ApiContext>,
    Extension(identity): Extension<Identity>,
) -> Result<Json<HistoryResponse>, ApiError> {
    let core = ctx.core.clone();
    let entries =
        tokio::task::spawn_blocking(move || core.records().list_history(&identity.user_id))
            .await??;
    Ok(Json(HistoryResponse { entries }))
}

// ── Multipart ───────────────────────────────────────────────

/// Read the first part named `field_name`; other parts are skipped.
async fn read_upload(
    mut multipart: Multipart,
    field_name: &str,
    limit: usize,
) -> Result<UploadedFile, ApiError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| multipart_error(e, limit))?
    {
        if field.name() != Some(field_name) {
            continue;
        }

        let file_name = field
            .file_name()
            .filter(|name| !name.trim().is_empty())
            .unwrap_or(DEFAULT_UPLOAD_NAME)
            .to_string();
        let content_type = field
            .content_type()
            .map(str::to_string)
            .or_else(|| guess_content_type(&file_name));
        let bytes = field.bytes().await.map_err(|e| multipart_error(e, limit))?;

        tracing::debug!(field = field_name, size = bytes.len(), "Upload received");
        return Ok(UploadedFile {
            file_name,
            content_type,
            bytes: bytes.to_vec(),
        });
    }

    Err(ApiError::BadRequest(format!(
        "Missing multipart field '{field_name}'"
    )))
}

/// Clients that omit a part's content type get one inferred from the file name.
fn guess_content_type(file_name: &str) -> Option<String> {
    mime_guess::from_path(file_name)
        .first()
        .map(|mime| mime.essence_str().to_string())
}

fn multipart_error(err: MultipartError, limit: usize) -> ApiError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::PayloadTooLarge { limit }
    } else {
        ApiError::BadRequest(err.body_text())
    }
}
