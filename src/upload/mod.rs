//! Video upload pipeline
//!
//! Drives one job per pin through `Queued -> Compressing -> Uploading ->
//! {Succeeded | Failed}`, skipping compression for small files and falling
//! back to the original file when the transcoder fails. Each job owns a
//! watch channel for its state, so progress observation is scoped to the
//! job's caller and concurrent uploads cannot cross-talk.
//!
//! There is no retry inside the pipeline: an ambiguous network failure must
//! not duplicate uploads, so a retry re-enters at `Queued` with an explicit
//! new `submit` call once the previous job reached a terminal state.

pub mod transcode;

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use tokio::sync::watch;

use crate::data::models::{EntityId, LocalVideo};
use crate::error::{EngineError, UploadFailure};
use crate::storage::media::{BlobStore, STORAGE_CEILING_BYTES, UploadMetadata, video_key};

pub use transcode::{
    COMPRESSION_THRESHOLD_BYTES, FfmpegTranscoder, TranscodeError, TranscodedVideo,
    VideoTranscoder, needs_compression,
};

/// State of one upload job
///
/// `Uploading::progress` is a non-decreasing fraction in [0, 1]; consumers
/// may sample it at any rate and are not guaranteed an event per chunk.
#[derive(Debug, Clone, PartialEq)]
pub enum UploadJobState {
    Queued,
    Compressing,
    Uploading { progress: f64 },
    Succeeded { url: String },
    Failed { reason: UploadFailure },
}

impl UploadJobState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            UploadJobState::Succeeded { .. } | UploadJobState::Failed { .. }
        )
    }
}

/// Handle to one upload job
///
/// Observation only; the pipeline owns the job's execution.
pub struct UploadJob {
    pin_id: EntityId,
    state: watch::Receiver<UploadJobState>,
}

impl UploadJob {
    pub fn pin_id(&self) -> &EntityId {
        &self.pin_id
    }

    /// Current state snapshot
    pub fn state(&self) -> UploadJobState {
        self.state.borrow().clone()
    }

    /// Subscribe to state changes
    pub fn watch(&self) -> watch::Receiver<UploadJobState> {
        self.state.clone()
    }

    /// Wait for the terminal state
    ///
    /// # Returns
    /// The remote URL on success (empty string for "no video"), or the
    /// classified failure.
    pub async fn await_result(mut self) -> Result<String, UploadFailure> {
        loop {
            let current = self.state.borrow_and_update().clone();
            match current {
                UploadJobState::Succeeded { url } => return Ok(url),
                UploadJobState::Failed { reason } => return Err(reason),
                _ => {}
            }
            if self.state.changed().await.is_err() {
                // Pipeline dropped the job without a terminal state
                return Err(UploadFailure::Other("upload job aborted".to_string()));
            }
        }
    }
}

/// Clamp a progress sample so the reported fraction never decreases
fn clamp_monotonic(last: &mut f64, next: f64) -> f64 {
    let clamped = next.clamp(*last, 1.0);
    *last = clamped;
    clamped
}

/// The upload pipeline
///
/// At most one active job per pin id; submitting again while a job is in
/// flight is rejected, not queued.
pub struct VideoUploadPipeline {
    blob: Arc<dyn BlobStore>,
    transcoder: Arc<dyn VideoTranscoder>,
    user_id: String,
    device_id: String,
    /// Pin ids with a non-terminal job
    active: Arc<Mutex<HashSet<EntityId>>>,
}

impl VideoUploadPipeline {
    pub fn new(
        blob: Arc<dyn BlobStore>,
        transcoder: Arc<dyn VideoTranscoder>,
        user_id: String,
        device_id: String,
    ) -> Self {
        Self {
            blob,
            transcoder,
            user_id,
            device_id,
            active: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Submit a job for one pin
    ///
    /// A missing video completes immediately with `Succeeded("")`; "no
    /// video" is a valid successful path, not a failure.
    ///
    /// # Errors
    /// `InvalidState` if a job for this pin id is already in flight
    pub fn submit(
        &self,
        pin_id: EntityId,
        video: Option<LocalVideo>,
    ) -> Result<UploadJob, EngineError> {
        let Some(video) = video else {
            let (_, state) = watch::channel(UploadJobState::Succeeded {
                url: String::new(),
            });
            return Ok(UploadJob { pin_id, state });
        };

        {
            let mut active = self.active.lock().expect("active set lock poisoned");
            if !active.insert(pin_id.clone()) {
                return Err(EngineError::InvalidState(format!(
                    "an upload for pin {} is already in flight",
                    pin_id
                )));
            }
        }

        let (state_tx, state_rx) = watch::channel(UploadJobState::Queued);
        let job = UploadJob {
            pin_id: pin_id.clone(),
            state: state_rx,
        };

        let blob = self.blob.clone();
        let transcoder = self.transcoder.clone();
        let user_id = self.user_id.clone();
        let device_id = self.device_id.clone();
        let active = self.active.clone();

        tokio::spawn(async move {
            let terminal =
                run_job(blob, transcoder, &user_id, &device_id, &pin_id, video, &state_tx).await;
            match &terminal {
                UploadJobState::Succeeded { url } => {
                    tracing::info!(pin_id = %pin_id, url, "Upload job succeeded");
                }
                UploadJobState::Failed { reason } => {
                    tracing::warn!(pin_id = %pin_id, %reason, "Upload job failed");
                }
                _ => unreachable!("run_job returns a terminal state"),
            }
            // Deliver the result before releasing the admission slot, so a
            // resubmission can never overlap a live job for the same pin.
            let _ = state_tx.send(terminal);
            active
                .lock()
                .expect("active set lock poisoned")
                .remove(&pin_id);
        });

        Ok(job)
    }
}

/// Execute one job and return its terminal state
async fn run_job(
    blob: Arc<dyn BlobStore>,
    transcoder: Arc<dyn VideoTranscoder>,
    user_id: &str,
    device_id: &str,
    pin_id: &EntityId,
    video: LocalVideo,
    state_tx: &watch::Sender<UploadJobState>,
) -> UploadJobState {
    let size_bytes = match tokio::fs::metadata(&video.path).await {
        Ok(metadata) => metadata.len(),
        Err(error) => {
            return UploadJobState::Failed {
                reason: UploadFailure::Other(format!("could not stat video file: {}", error)),
            };
        }
    };

    if size_bytes > STORAGE_CEILING_BYTES {
        return UploadJobState::Failed {
            reason: UploadFailure::TooLarge(size_bytes),
        };
    }

    // Compression is best-effort: a transcoder failure downgrades to
    // uploading the original file. The staged output must stay alive until
    // the upload finishes reading it.
    let mut staged: Option<TranscodedVideo> = None;
    let mut content_type = video.content_type.clone();
    if needs_compression(size_bytes) {
        let _ = state_tx.send(UploadJobState::Compressing);
        match transcoder.transcode(&video.path).await {
            Ok(output) => {
                content_type = "video/mp4".to_string();
                staged = Some(output);
            }
            Err(error) => {
                tracing::warn!(pin_id = %pin_id, %error, "Transcode failed; uploading original");
            }
        }
    }
    let source = staged
        .as_ref()
        .map(|s| s.path().to_path_buf())
        .unwrap_or_else(|| video.path.clone());

    let _ = state_tx.send(UploadJobState::Uploading { progress: 0.0 });

    // Bridge blob-store progress into the job state, clamped monotonic.
    let (progress_tx, mut progress_rx) = watch::channel(0.0_f64);
    let forwarder = {
        let state_tx = state_tx.clone();
        tokio::spawn(async move {
            let mut last = 0.0_f64;
            while progress_rx.changed().await.is_ok() {
                let sample = *progress_rx.borrow();
                let progress = clamp_monotonic(&mut last, sample);
                let _ = state_tx.send(UploadJobState::Uploading { progress });
            }
        })
    };

    let key = video_key(user_id, pin_id, &content_type);
    let metadata = UploadMetadata {
        user_id: user_id.to_string(),
        device_id: device_id.to_string(),
        timestamp: Utc::now(),
    };

    let result = blob
        .upload(&key, &source, &content_type, &metadata, &progress_tx)
        .await;

    // Stop the forwarder before publishing the terminal state so a stale
    // progress sample cannot overwrite it.
    drop(progress_tx);
    let _ = forwarder.await;

    match result {
        Ok(url) => UploadJobState::Succeeded { url },
        Err(reason) => UploadJobState::Failed { reason },
    }
}
