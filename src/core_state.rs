//! Application state shared by every HTTP handler.
//!
//! `CoreState` owns the collaborators wired up once at startup: the model
//! gate, the upload pipeline, the record store and the account service.
//! Everything in here is blocking; handlers reach it through
//! `spawn_blocking`.

use std::sync::Arc;
use std::time::Duration;

use crate::auth::AuthService;
use crate::config::AppConfig;
use crate::db::{self, RecordStore, SqliteRecordStore};
use crate::ollama_service::OllamaService;
use crate::pipeline::enrichment::{DrugReferenceLookup, OpenFdaClient, ReferenceError};
use crate::pipeline::extraction::{ExtractionError, PdfPageRenderer, PdfiumRenderer};
use crate::pipeline::structuring::{OllamaClient, OllamaError, VisionClient};
use crate::pipeline::RecordAggregator;
use crate::storage::{FsImageStore, ImageStore, StorageError};

// ═══════════════════════════════════════════════════════════
// CoreState
// ═══════════════════════════════════════════════════════════

pub struct CoreState {
    pub config: AppConfig,
    ollama: Arc<OllamaService>,
    aggregator: RecordAggregator,
    records: Arc<dyn RecordStore>,
    auth: AuthService,
}

/// Injected collaborators, for tests and alternative deployments.
pub struct CoreParts {
    pub vision: Arc<dyn VisionClient>,
    pub lookup: Arc<dyn DrugReferenceLookup>,
    pub renderer: Arc<dyn PdfPageRenderer>,
    pub images: Arc<dyn ImageStore>,
    pub records: Arc<dyn RecordStore>,
}

impl CoreState {
    /// Build the production collaborators. Blocking: constructs blocking HTTP
    /// clients and opens the database, so call it off the async runtime.
    pub fn from_config(config: AppConfig) -> Result<Self, CoreError> {
        std::fs::create_dir_all(&config.data_dir).map_err(StorageError::from)?;

        let vision = OllamaClient::new(&config.ollama_url, config.ai_timeout_secs)?;
        let lookup = OpenFdaClient::new(&config.openfda_url, config.reference_timeout_secs)?;
        let renderer = PdfiumRenderer::new()?;
        let images = FsImageStore::new(&config.images_dir())?;
        let records = SqliteRecordStore::open(&config.database_path())?;

        tracing::info!(
            model = %config.model,
            data_dir = %config.data_dir.display(),
            "Core state initialized"
        );

        Self::from_parts(
            config,
            CoreParts {
                vision: Arc::new(vision),
                lookup: Arc::new(lookup),
                renderer: Arc::new(renderer),
                images: Arc::new(images),
                records: Arc::new(records),
            },
        )
    }

    /// Wire the given collaborators. Accounts live in the database at
    /// `config.database_path()`, which is migrated here.
    pub fn from_parts(config: AppConfig, parts: CoreParts) -> Result<Self, CoreError> {
        let db_path = config.database_path();
        db::open_database(&db_path)?;

        let ollama = Arc::new(OllamaService::new(
            parts.vision,
            &config.model,
            Duration::from_secs(config.ai_queue_timeout_secs),
        ));
        let aggregator = RecordAggregator::new(
            ollama.clone(),
            parts.lookup,
            parts.renderer,
            parts.images,
            parts.records.clone(),
        );
        let auth = AuthService::new(&db_path, config.password_iterations);

        Ok(Self {
            config,
            ollama,
            aggregator,
            records: parts.records,
            auth,
        })
    }

    pub fn aggregator(&self) -> &RecordAggregator {
        &self.aggregator
    }

    pub fn records(&self) -> &dyn RecordStore {
        self.records.as_ref()
    }

    pub fn auth(&self) -> &AuthService {
        &self.auth
    }

    pub fn ollama(&self) -> &OllamaService {
        &self.ollama
    }
}

// ═══════════════════════════════════════════════════════════
// Errors
// ═══════════════════════════════════════════════════════════

/// Startup failures. Any of these aborts the process.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Database error: {0}")]
    Database(#[from] db::DatabaseError),
    #[error("Image storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("Model client error: {0}")]
    Model(#[from] OllamaError),
    #[error("Drug reference client error: {0}")]
    Reference(#[from] ReferenceError),
    #[error("PDF renderer unavailable: {0}")]
    Pdf(#[from] ExtractionError),
}
