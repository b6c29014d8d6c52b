//! PinDrop incident report submission engine
//!
//! Headless engine for a map-based incident reporting client: it gates
//! location-dependent actions on authorization, validates pin drops against
//! the device's current fix, persists reports to a remote document store,
//! and uploads attached videos to Cloudflare R2 with progress reporting.
//!
//! # Architecture
//!
//! ```text
//! host UI  ──►  Engine
//!                 ├── auth::AuthorizationHandle   (permission state machine)
//!                 ├── location::LocationStream    (fix cache + one-shot refresh)
//!                 ├── data::PinRepository         (remote-first pin cache)
//!                 ├── upload::VideoUploadPipeline (compress + R2 upload)
//!                 └── submit::ReportSubmissionOrchestrator
//! ```
//!
//! The host supplies platform collaborators (permission prompts, the
//! location fix source, the incident-type picker) and observes results
//! through [`EngineEvent`] and per-job upload state.

pub mod auth;
pub mod config;
pub mod data;
pub mod error;
pub mod geo;
pub mod location;
pub mod storage;
pub mod submit;
pub mod upload;

use std::sync::Arc;

use crate::auth::{AuthState, AuthorizationHandle, PermissionProvider};
use crate::config::EngineConfig;
use crate::data::repository::PinRepository;
use crate::data::store::{DocumentStore, RestDocumentStore};
use crate::location::{LocationProvider, LocationStream};
use crate::storage::media::{BlobStore, S3BlobStore};
use crate::submit::{IncidentTypePicker, ReportSubmissionOrchestrator};
use crate::upload::VideoUploadPipeline;
use crate::upload::transcode::{FfmpegTranscoder, VideoTranscoder};

pub use crate::data::models::{IncidentType, LocalVideo, Pin};
pub use crate::error::{EngineError, Result, UploadFailure};
pub use crate::geo::{Coordinate, Fix};
pub use crate::submit::{EngineEvent, SubmissionOutcome};
pub use crate::upload::{UploadJob, UploadJobState};

/// Platform collaborators the host must provide
pub struct Collaborators {
    pub permissions: Arc<dyn PermissionProvider>,
    pub location: Arc<dyn LocationProvider>,
    pub picker: Arc<dyn IncidentTypePicker>,
}

/// Engine composition root
///
/// Owns the long-lived services and exposes the submission flow to the
/// host. Construct once per session and share behind an `Arc`.
pub struct Engine {
    location: Arc<LocationStream>,
    repository: Arc<PinRepository>,
    auth: AuthorizationHandle,
    orchestrator: ReportSubmissionOrchestrator,
}

impl Engine {
    /// Initialize the engine with production backends
    ///
    /// # Arguments
    /// * `config` - Validated engine configuration
    /// * `collaborators` - Host-provided platform integrations
    ///
    /// # Errors
    /// Returns error if configuration is invalid or a backend client cannot
    /// be initialized
    pub async fn new(config: &EngineConfig, collaborators: Collaborators) -> Result<Self> {
        config.validate()?;

        tracing::info!("1. Connecting to document store...");
        let store = Arc::new(RestDocumentStore::new(&config.document_store)?);

        tracing::info!("2. Initializing R2 blob storage...");
        let blob = Arc::new(S3BlobStore::new(&config.blob_store).await?);

        tracing::info!("3. Preparing video transcoder...");
        let transcoder = Arc::new(FfmpegTranscoder::default());

        Self::with_backends(config, collaborators, store, blob, transcoder)
    }

    /// Initialize the engine with explicit backends
    ///
    /// Used by tests and hosts that bring their own storage. Must be called
    /// from within a Tokio runtime; the authorization actor is spawned here.
    pub fn with_backends(
        config: &EngineConfig,
        collaborators: Collaborators,
        store: Arc<dyn DocumentStore>,
        blob: Arc<dyn BlobStore>,
        transcoder: Arc<dyn VideoTranscoder>,
    ) -> Result<Self> {
        config.validate()?;

        tracing::info!("4. Starting authorization state machine...");
        let auth = AuthorizationHandle::spawn(collaborators.permissions);

        tracing::info!("5. Starting location stream...");
        let location = Arc::new(LocationStream::new(
            collaborators.location,
            config.one_shot_timeout(),
        ));

        tracing::info!("6. Initializing pin repository...");
        let repository = Arc::new(PinRepository::new(
            store,
            config.identity.user_id.clone(),
        ));

        tracing::info!("7. Initializing upload pipeline...");
        let pipeline = Arc::new(VideoUploadPipeline::new(
            blob.clone(),
            transcoder,
            config.identity.user_id.clone(),
            config.identity.device_id.clone(),
        ));

        let orchestrator = ReportSubmissionOrchestrator::new(
            auth.clone(),
            location.clone(),
            repository.clone(),
            pipeline,
            blob,
            collaborators.picker,
            config.identity.user_id.clone(),
            config.identity.device_id.clone(),
            config.fix_staleness(),
        );

        tracing::info!("Engine initialized");
        Ok(Self {
            location,
            repository,
            auth,
            orchestrator,
        })
    }

    // ====== Submission flow ======

    /// Run the drop-pin flow; see [`ReportSubmissionOrchestrator::request_pin_drop`]
    pub async fn request_pin_drop(
        &self,
        candidate: Coordinate,
        video: Option<LocalVideo>,
    ) -> Result<SubmissionOutcome> {
        self.orchestrator.request_pin_drop(candidate, video).await
    }

    /// Delete one of the user's reports along with its video object
    pub async fn delete_report(&self, pin: &Pin) -> Result<()> {
        self.orchestrator.delete_report(pin).await
    }

    /// Gate on authorization and resolve a fresh fix for map centering
    pub async fn center_on_user(&self) -> Result<Fix> {
        self.orchestrator.center_on_user().await
    }

    // ====== Platform callbacks ======

    /// Forward a platform authorization change into the state machine
    pub fn authorization_changed(&self, state: AuthState) {
        self.auth.authorization_changed(state);
    }

    /// Ask the platform for when-in-use authorization without an action
    pub fn request_permission(&self) {
        self.auth.request_permission();
    }

    /// Feed a platform-delivered fix into the location stream
    pub fn report_fix(&self, fix: Fix) {
        self.location.report_fix(fix);
    }

    // ====== Observation ======

    /// Subscribe to engine events
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<EngineEvent> {
        self.orchestrator.subscribe()
    }

    /// Shared pin repository for map rendering and projections
    pub fn repository(&self) -> Arc<PinRepository> {
        self.repository.clone()
    }

    /// Shared location stream for map follow mode
    pub fn location(&self) -> Arc<LocationStream> {
        self.location.clone()
    }

    /// Re-fetch the full pin set from the document store
    pub async fn resync(&self) -> Result<Vec<Pin>> {
        self.repository.list_all().await
    }
}

/// Initialize tracing subscriber from logging configuration
///
/// Call once at host startup; `RUST_LOG` overrides the configured level.
pub fn init_tracing(config: &config::LoggingConfig) {
    use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("pindrop={}", config.level)));

    if config.format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().pretty())
            .init();
    }
}
