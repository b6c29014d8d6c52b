//! Common test utilities for end-to-end submission tests

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Notify, watch};

use pindrop::auth::{AuthState, PermissionProvider};
use pindrop::config;
use pindrop::data::models::{EntityId, IncidentType, PinDocument};
use pindrop::data::store::{DocumentEnvelope, DocumentStore, StoreError};
use pindrop::error::{EngineError, UploadFailure};
use pindrop::geo::{Coordinate, Fix};
use pindrop::location::{LocationError, LocationProvider};
use pindrop::storage::media::{BlobStore, UploadMetadata};
use pindrop::submit::IncidentTypePicker;
use pindrop::upload::transcode::{TranscodeError, TranscodedVideo, VideoTranscoder};
use pindrop::{Collaborators, Engine};

/// Meters per degree of latitude on the mean-radius sphere
pub const M_PER_DEG_LAT: f64 = 6_371_000.0 * std::f64::consts::PI / 180.0;

/// A coordinate `meters` north of `base`
pub fn offset_north(base: &Coordinate, meters: f64) -> Coordinate {
    Coordinate::new(base.latitude() + meters / M_PER_DEG_LAT, base.longitude()).unwrap()
}

pub fn base_coordinate() -> Coordinate {
    Coordinate::new(40.0, -73.0).unwrap()
}

pub fn fresh_fix_at(coordinate: Coordinate) -> Fix {
    Fix {
        coordinate,
        timestamp: Utc::now(),
        accuracy_m: 5.0,
    }
}

// ====== In-memory document store ======

#[derive(Default)]
pub struct InMemoryStore {
    pub documents: Mutex<HashMap<EntityId, PinDocument>>,
    /// Error returned by the next write, then cleared
    pub fail_next: Mutex<Option<StoreError>>,
}

impl InMemoryStore {
    pub fn document_count(&self) -> usize {
        self.documents.lock().unwrap().len()
    }

    pub fn fail_next_with(&self, error: StoreError) {
        *self.fail_next.lock().unwrap() = Some(error);
    }

    fn take_failure(&self) -> Option<StoreError> {
        self.fail_next.lock().unwrap().take()
    }
}

#[async_trait]
impl DocumentStore for InMemoryStore {
    async fn put(&self, id: &EntityId, document: &PinDocument) -> Result<(), StoreError> {
        if let Some(error) = self.take_failure() {
            return Err(error);
        }
        self.documents
            .lock()
            .unwrap()
            .insert(id.clone(), document.clone());
        Ok(())
    }

    async fn patch_video_url(&self, id: &EntityId, video_url: &str) -> Result<(), StoreError> {
        if let Some(error) = self.take_failure() {
            return Err(error);
        }
        let mut documents = self.documents.lock().unwrap();
        match documents.get_mut(id) {
            Some(document) => {
                document.video_url = video_url.to_string();
                Ok(())
            }
            None => Err(StoreError::Missing),
        }
    }

    async fn delete(&self, id: &EntityId) -> Result<(), StoreError> {
        if let Some(error) = self.take_failure() {
            return Err(error);
        }
        self.documents.lock().unwrap().remove(id);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<DocumentEnvelope>, StoreError> {
        let documents = self.documents.lock().unwrap();
        Ok(documents
            .iter()
            .map(|(id, document)| DocumentEnvelope {
                id: id.clone(),
                document: document.clone(),
            })
            .collect())
    }
}

// ====== Recording blob store ======

#[derive(Default)]
pub struct RecordingBlobStore {
    pub uploaded_keys: Mutex<Vec<String>>,
    pub deleted_keys: Mutex<Vec<String>>,
    pub fail_uploads_with: Mutex<Option<UploadFailure>>,
}

impl RecordingBlobStore {
    pub fn uploads(&self) -> Vec<String> {
        self.uploaded_keys.lock().unwrap().clone()
    }

    pub fn deletes(&self) -> Vec<String> {
        self.deleted_keys.lock().unwrap().clone()
    }
}

#[async_trait]
impl BlobStore for RecordingBlobStore {
    async fn upload(
        &self,
        key: &str,
        source: &Path,
        _content_type: &str,
        _metadata: &UploadMetadata,
        progress: &watch::Sender<f64>,
    ) -> Result<String, UploadFailure> {
        if let Some(failure) = self.fail_uploads_with.lock().unwrap().clone() {
            return Err(failure);
        }
        tokio::fs::metadata(source)
            .await
            .map_err(|e| UploadFailure::Other(format!("could not stat video file: {}", e)))?;

        self.uploaded_keys.lock().unwrap().push(key.to_string());
        let _ = progress.send(1.0);
        Ok(format!("https://media.test/{}", key))
    }

    async fn delete(&self, key: &str) -> Result<(), EngineError> {
        self.deleted_keys.lock().unwrap().push(key.to_string());
        Ok(())
    }
}

// ====== Scripted platform collaborators ======

pub struct ScriptedPermissions {
    pub status: Mutex<AuthState>,
    pub prompts: AtomicUsize,
}

impl ScriptedPermissions {
    pub fn new(initial: AuthState) -> Self {
        Self {
            status: Mutex::new(initial),
            prompts: AtomicUsize::new(0),
        }
    }

    pub fn prompt_count(&self) -> usize {
        self.prompts.load(Ordering::SeqCst)
    }
}

impl PermissionProvider for ScriptedPermissions {
    fn current_status(&self) -> AuthState {
        *self.status.lock().unwrap()
    }

    fn request_when_in_use_authorization(&self) {
        self.prompts.fetch_add(1, Ordering::SeqCst);
    }
}

pub struct FixedLocation {
    pub fix: Mutex<Option<Fix>>,
}

impl FixedLocation {
    pub fn with_fix(fix: Fix) -> Self {
        Self {
            fix: Mutex::new(Some(fix)),
        }
    }

    pub fn unavailable() -> Self {
        Self {
            fix: Mutex::new(None),
        }
    }
}

#[async_trait]
impl LocationProvider for FixedLocation {
    async fn request_one_shot(&self) -> Result<Fix, LocationError> {
        self.fix
            .lock()
            .unwrap()
            .clone()
            .ok_or(LocationError::TemporarilyUnknown)
    }
}

/// Picker returning a scripted choice, optionally blocking until released
pub struct ScriptedPicker {
    pub choice: Mutex<Option<IncidentType>>,
    pub picks: AtomicUsize,
    blocking: Mutex<bool>,
    pub entered: Notify,
    release: Notify,
}

impl ScriptedPicker {
    pub fn choosing(choice: IncidentType) -> Self {
        Self {
            choice: Mutex::new(Some(choice)),
            picks: AtomicUsize::new(0),
            blocking: Mutex::new(false),
            entered: Notify::new(),
            release: Notify::new(),
        }
    }

    pub fn cancelling() -> Self {
        let picker = Self::choosing(IncidentType::Verbal);
        *picker.choice.lock().unwrap() = None;
        picker
    }

    /// Make the next pick block until `release_pick` is called
    pub fn block_next_pick(&self) {
        *self.blocking.lock().unwrap() = true;
    }

    pub fn release_pick(&self) {
        self.release.notify_one();
    }

    pub fn pick_count(&self) -> usize {
        self.picks.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IncidentTypePicker for ScriptedPicker {
    async fn pick(&self) -> Option<IncidentType> {
        self.picks.fetch_add(1, Ordering::SeqCst);
        let blocking = {
            let mut blocking = self.blocking.lock().unwrap();
            std::mem::take(&mut *blocking)
        };
        if blocking {
            self.entered.notify_one();
            self.release.notified().await;
        }
        *self.choice.lock().unwrap()
    }
}

/// Transcoder that stages a copy of the source
pub struct CopyTranscoder;

#[async_trait]
impl VideoTranscoder for CopyTranscoder {
    async fn transcode(&self, source: &Path) -> Result<TranscodedVideo, TranscodeError> {
        let staging = tempfile::NamedTempFile::new()
            .map_err(|e| TranscodeError(format!("could not create staging file: {}", e)))?;
        std::fs::copy(source, staging.path())
            .map_err(|e| TranscodeError(format!("copy failed: {}", e)))?;
        Ok(TranscodedVideo::new(staging))
    }
}

// ====== Harness ======

pub fn test_config() -> config::EngineConfig {
    config::EngineConfig {
        identity: config::IdentityConfig {
            user_id: "user-1".to_string(),
            device_id: "device-1".to_string(),
        },
        document_store: config::DocumentStoreConfig {
            base_url: "https://store.test.example.com/v1".to_string(),
            collection: "pins".to_string(),
            auth_token: "test-token".to_string(),
            timeout_seconds: 5,
        },
        blob_store: config::BlobStoreConfig {
            account_id: "test-account".to_string(),
            access_key_id: "test-key".to_string(),
            secret_access_key: "test-secret".to_string(),
            bucket: "test-videos".to_string(),
            public_url: "https://media.test".to_string(),
        },
        location: config::LocationConfig {
            fix_staleness_seconds: 30,
            one_shot_timeout_seconds: 5,
        },
        logging: config::LoggingConfig {
            level: "info".to_string(),
            format: "pretty".to_string(),
        },
    }
}

/// Engine wired to in-memory backends and scripted collaborators
pub struct TestHarness {
    pub engine: Engine,
    pub store: Arc<InMemoryStore>,
    pub blob: Arc<RecordingBlobStore>,
    pub permissions: Arc<ScriptedPermissions>,
    pub location: Arc<FixedLocation>,
    pub picker: Arc<ScriptedPicker>,
}

impl TestHarness {
    pub fn new(initial_auth: AuthState) -> Self {
        Self::build(
            initial_auth,
            Arc::new(FixedLocation::with_fix(fresh_fix_at(base_coordinate()))),
            Arc::new(ScriptedPicker::choosing(IncidentType::Verbal)),
        )
    }

    pub fn build(
        initial_auth: AuthState,
        location: Arc<FixedLocation>,
        picker: Arc<ScriptedPicker>,
    ) -> Self {
        let store = Arc::new(InMemoryStore::default());
        let blob = Arc::new(RecordingBlobStore::default());
        let permissions = Arc::new(ScriptedPermissions::new(initial_auth));

        let engine = Engine::with_backends(
            &test_config(),
            Collaborators {
                permissions: permissions.clone(),
                location: location.clone(),
                picker: picker.clone(),
            },
            store.clone(),
            blob.clone(),
            Arc::new(CopyTranscoder),
        )
        .expect("engine construction");

        Self {
            engine,
            store,
            blob,
            permissions,
            location,
            picker,
        }
    }
}

/// Write a small throwaway video file and return its handle
pub fn video_file() -> tempfile::NamedTempFile {
    let file = tempfile::NamedTempFile::new().unwrap();
    std::fs::write(file.path(), b"not really a video").unwrap();
    file
}
