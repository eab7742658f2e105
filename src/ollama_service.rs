//! Single point of access to the vision model.
//!
//! Ollama serves one model at a time, so concurrent uploads would otherwise
//! thrash it. `OllamaService` owns the injected client, serializes every call
//! behind one lock and exposes what is currently running. Waiting for the lock
//! is bounded by the queue timeout.

use std::sync::{Arc, Mutex, MutexGuard, TryLockError};
use std::time::{Duration, Instant};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::Serialize;

use crate::pipeline::structuring::{OllamaError, VisionClient};

// ═══════════════════════════════════════════════════════════
// Types
// ═══════════════════════════════════════════════════════════

/// What kind of model call is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    /// Reading drug name, strength and indications off packaging
    MedicineLabel,
    /// Second pass: warnings for this patient from history + drug info
    MedicineEffects,
    /// Lab report image (or stitched PDF) to structured findings
    ReportAnalysis,
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MedicineLabel => write!(f, "Medicine label"),
            Self::MedicineEffects => write!(f, "Medicine effects"),
            Self::ReportAnalysis => write!(f, "Report analysis"),
        }
    }
}

/// Snapshot of the currently running model call.
#[derive(Debug, Clone, Serialize)]
pub struct ActiveOperation {
    pub kind: OperationKind,
    pub model: String,
    /// ISO 8601
    pub started_at: String,
}

/// Model gate state reported by `GET /health`.
#[derive(Debug, Clone, Serialize)]
pub struct ModelStatus {
    pub model: String,
    pub busy: bool,
    pub current_operation: Option<ActiveOperation>,
}

#[derive(Debug, thiserror::Error)]
pub enum OllamaServiceError {
    #[error("Internal lock error")]
    LockPoisoned,

    #[error("Model busy, gave up after waiting {waited_ms} ms")]
    Busy { waited_ms: u64 },

    #[error(transparent)]
    Model(#[from] OllamaError),
}

// ═══════════════════════════════════════════════════════════
// OllamaService
// ═══════════════════════════════════════════════════════════

const QUEUE_POLL_INTERVAL: Duration = Duration::from_millis(25);

pub struct OllamaService {
    client: Arc<dyn VisionClient>,
    model: String,
    queue_timeout: Duration,
    lock: Mutex<()>,
    current_op: Mutex<Option<ActiveOperation>>,
}

impl OllamaService {
    pub fn new(client: Arc<dyn VisionClient>, model: &str, queue_timeout: Duration) -> Self {
        Self {
            client,
            model: model.to_string(),
            queue_timeout,
            lock: Mutex::new(()),
            current_op: Mutex::new(None),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Run one image through the model. Waits up to the queue timeout while
    /// another call holds the model.
    pub fn analyze_image(
        &self,
        kind: OperationKind,
        image_bytes: &[u8],
        prompt: &str,
        system: Option<&str>,
    ) -> Result<String, OllamaServiceError> {
        let images = [STANDARD.encode(image_bytes)];
        self.run(kind, prompt, &images, system)
    }

    /// Text-only model call.
    pub fn analyze_text(
        &self,
        kind: OperationKind,
        prompt: &str,
        system: Option<&str>,
    ) -> Result<String, OllamaServiceError> {
        self.run(kind, prompt, &[], system)
    }

    /// Acquire exclusive access to the model, polling until the queue timeout
    /// expires. Dropping the guard releases it.
    pub(crate) fn acquire(&self, kind: OperationKind) -> Result<OllamaGuard<'_>, OllamaServiceError> {
        let started = Instant::now();
        let guard = loop {
            match self.lock.try_lock() {
                Ok(guard) => break guard,
                Err(TryLockError::Poisoned(_)) => return Err(OllamaServiceError::LockPoisoned),
                Err(TryLockError::WouldBlock) => {
                    let waited = started.elapsed();
                    if waited >= self.queue_timeout {
                        let waited_ms = waited.as_millis() as u64;
                        tracing::warn!(operation = %kind, waited_ms, "Model queue timeout");
                        return Err(OllamaServiceError::Busy { waited_ms });
                    }
                    std::thread::sleep(QUEUE_POLL_INTERVAL.min(self.queue_timeout - waited));
                }
            }
        };

        self.set_current_op(kind);
        Ok(OllamaGuard {
            _guard: guard,
            service: self,
        })
    }

    /// Returns `None` if the model is idle.
    pub fn current_operation(&self) -> Option<ActiveOperation> {
        self.current_op.lock().ok()?.clone()
    }

    pub fn is_busy(&self) -> bool {
        matches!(self.lock.try_lock(), Err(TryLockError::WouldBlock))
    }

    pub fn status(&self) -> ModelStatus {
        ModelStatus {
            model: self.model.clone(),
            busy: self.is_busy(),
            current_operation: self.current_operation(),
        }
    }

    // ── Internal ────────────────────────────────────────────

    fn run(
        &self,
        kind: OperationKind,
        prompt: &str,
        images: &[String],
        system: Option<&str>,
    ) -> Result<String, OllamaServiceError> {
        let _guard = self.acquire(kind)?;
        let started = Instant::now();

        let result = self
            .client
            .chat_with_images(&self.model, prompt, images, system);

        let elapsed_ms = started.elapsed().as_millis() as u64;
        match &result {
            Ok(text) => tracing::info!(
                operation = %kind,
                model = %self.model,
                elapsed_ms,
                response_len = text.len(),
                "Model call completed"
            ),
            Err(e) => tracing::warn!(
                operation = %kind,
                model = %self.model,
                elapsed_ms,
                error = %e,
                "Model call failed"
            ),
        }

        Ok(result?)
    }

    fn set_current_op(&self, kind: OperationKind) {
        if let Ok(mut current) = self.current_op.lock() {
            *current = Some(ActiveOperation {
                kind,
                model: self.model.clone(),
                started_at: chrono::Utc::now().to_rfc3339(),
            });
        }
    }

    fn clear_current_op(&self) {
        if let Ok(mut current) = self.current_op.lock() {
            *current = None;
        }
    }
}

// ═══════════════════════════════════════════════════════════
// OllamaGuard — RAII exclusive access token
// ═══════════════════════════════════════════════════════════

pub(crate) struct OllamaGuard<'a> {
    _guard: MutexGuard<'a, ()>,
    service: &'a OllamaService,
}

impl Drop for OllamaGuard<'_> {
    fn drop(&mut self) {
        self.service.clear_current_op();
    }
}
