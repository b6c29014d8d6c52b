//! Report submission orchestrator
//!
//! Composes the authorization gate, validator, repository, and upload
//! pipeline into the end-to-end "drop pin" flow, and owns the
//! single-outstanding-submission invariant: one flow in flight at a time,
//! with the lock released on every terminal path including early rejection.
//!
//! A failed upload never rolls back the persisted pin; the report survives
//! with an empty video URL and the failure surfaces as a warning.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Mutex, broadcast};

use crate::auth::{AuthorizationHandle, GateDecision, PendingAction};
use crate::data::models::{EntityId, IncidentType, LocalVideo, Pin, PinDraft};
use crate::data::repository::PinRepository;
use crate::error::{EngineError, Result, UploadFailure};
use crate::geo::{Coordinate, DropDecision, Fix, RejectReason, validate_drop};
use crate::location::{LocationError, LocationStream};
use crate::storage::media::BlobStore;
use crate::upload::VideoUploadPipeline;

/// Incident-type picker collaborator (UI-owned)
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait IncidentTypePicker: Send + Sync {
    /// Ask the user to choose a category; `None` means they cancelled
    async fn pick(&self) -> Option<IncidentType>;
}

/// Terminal result of a submission flow
#[derive(Debug, Clone)]
pub enum SubmissionOutcome {
    /// Pin persisted; video (if any) attached
    Success { pin: Pin },
    /// Pin persisted but the video attachment failed; the report exists
    /// with an empty video URL
    DegradedSuccess { pin: Pin, warning: UploadFailure },
    /// The user dismissed the incident-type picker
    Cancelled,
}

/// Engine notification for the host UI
///
/// Scoped, typed replacement for a global notification broadcast: hosts
/// subscribe per engine instance.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    PinCreated(Pin),
    PinUpdated(Pin),
    PinDeleted(EntityId),
    SubmissionFinished { pin_id: EntityId, degraded: bool },
}

/// Drives the full submission flow
pub struct ReportSubmissionOrchestrator {
    auth: AuthorizationHandle,
    location: Arc<LocationStream>,
    repository: Arc<PinRepository>,
    pipeline: Arc<VideoUploadPipeline>,
    blob: Arc<dyn BlobStore>,
    picker: Arc<dyn IncidentTypePicker>,
    user_id: String,
    device_id: String,
    fix_staleness: Duration,
    /// Single-outstanding-submission admission gate
    in_flight: Mutex<()>,
    events: broadcast::Sender<EngineEvent>,
}

impl ReportSubmissionOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        auth: AuthorizationHandle,
        location: Arc<LocationStream>,
        repository: Arc<PinRepository>,
        pipeline: Arc<VideoUploadPipeline>,
        blob: Arc<dyn BlobStore>,
        picker: Arc<dyn IncidentTypePicker>,
        user_id: String,
        device_id: String,
        fix_staleness: Duration,
    ) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            auth,
            location,
            repository,
            pipeline,
            blob,
            picker,
            user_id,
            device_id,
            fix_staleness,
            in_flight: Mutex::new(()),
            events,
        }
    }

    /// Subscribe to engine events
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    /// Run the full drop-pin flow for a candidate coordinate
    ///
    /// # Flow
    /// 1. Gate on location authorization (deferring behind the permission
    ///    prompt if needed)
    /// 2. Validate the candidate against the latest fix
    /// 3. Ask the picker for an incident type
    /// 4. Persist the pin with an empty video URL
    /// 5. Upload the video, if any, and attach its URL
    ///
    /// # Errors
    /// `InvalidState` when another submission is already in flight or this
    /// request was superseded while waiting for authorization;
    /// `PermissionDenied`, `LocationUnknown`, `TooFar`, `Persistence` per
    /// the flow taxonomy.
    pub async fn request_pin_drop(
        &self,
        candidate: Coordinate,
        video: Option<LocalVideo>,
    ) -> Result<SubmissionOutcome> {
        match self
            .auth
            .ensure_authorized(PendingAction::DropPinAt(candidate))
            .await
        {
            GateDecision::Granted => {}
            GateDecision::Denied => return Err(EngineError::PermissionDenied),
            GateDecision::Superseded => {
                return Err(EngineError::InvalidState(
                    "drop request superseded by a newer request".to_string(),
                ));
            }
        }

        // One drop-pin flow at a time; the guard spans every path below.
        let _guard = self.in_flight.try_lock().map_err(|_| {
            EngineError::InvalidState("a submission is already in progress".to_string())
        })?;

        let fix = self.current_or_fresh_fix().await;
        match validate_drop(&candidate, fix.as_ref(), self.fix_staleness) {
            DropDecision::Accept => {}
            DropDecision::Reject(RejectReason::LocationUnknown) => {
                return Err(EngineError::LocationUnknown);
            }
            DropDecision::Reject(RejectReason::TooFar { distance_m }) => {
                return Err(EngineError::TooFar { distance_m });
            }
        }

        let Some(incident_type) = self.picker.pick().await else {
            tracing::debug!("Submission cancelled at incident-type picker");
            return Ok(SubmissionOutcome::Cancelled);
        };

        let draft = PinDraft {
            coordinate: candidate,
            incident_type,
            video,
        };

        let mut pin = Pin {
            id: EntityId::new(),
            coordinate: draft.coordinate,
            incident_type: draft.incident_type,
            video_url: String::new(),
            owner_id: self.user_id.clone(),
            created_at: Utc::now(),
            device_id: self.device_id.clone(),
        };

        // Draft is discarded by propagation on failure; no partial pin
        // survives without the user hearing about it.
        self.repository.create(pin.clone()).await?;
        let _ = self.events.send(EngineEvent::PinCreated(pin.clone()));

        let outcome = match draft.video {
            None => SubmissionOutcome::Success { pin },
            Some(video) => {
                let job = self.pipeline.submit(pin.id.clone(), Some(video))?;
                match job.await_result().await {
                    Ok(url) if !url.is_empty() => {
                        match self.repository.update_video_url(&pin.id, &url).await {
                            Ok(()) => {
                                pin.video_url = url;
                                let _ = self.events.send(EngineEvent::PinUpdated(pin.clone()));
                                SubmissionOutcome::Success { pin }
                            }
                            Err(error) => {
                                tracing::warn!(pin_id = %pin.id, %error, "Uploaded video could not be attached");
                                SubmissionOutcome::DegradedSuccess {
                                    pin,
                                    warning: UploadFailure::Other(format!(
                                        "video uploaded but could not be attached: {}",
                                        error
                                    )),
                                }
                            }
                        }
                    }
                    Ok(_) => SubmissionOutcome::Success { pin },
                    Err(reason) => {
                        tracing::warn!(pin_id = %pin.id, %reason, "Video upload failed; pin kept without video");
                        SubmissionOutcome::DegradedSuccess {
                            pin,
                            warning: reason,
                        }
                    }
                }
            }
        };

        if let SubmissionOutcome::Success { pin } | SubmissionOutcome::DegradedSuccess { pin, .. } =
            &outcome
        {
            let degraded = matches!(outcome, SubmissionOutcome::DegradedSuccess { .. });
            let _ = self.events.send(EngineEvent::SubmissionFinished {
                pin_id: pin.id.clone(),
                degraded,
            });
        }

        Ok(outcome)
    }

    /// Resolve a fresh fix for the center-on-user action
    ///
    /// Shares the authorization gate with pin drops; the newest request
    /// wins if both are pending.
    pub async fn center_on_user(&self) -> Result<Fix> {
        match self.auth.ensure_authorized(PendingAction::CenterOnUser).await {
            GateDecision::Granted => {}
            GateDecision::Denied => return Err(EngineError::PermissionDenied),
            GateDecision::Superseded => {
                return Err(EngineError::InvalidState(
                    "center request superseded by a newer request".to_string(),
                ));
            }
        }

        self.location.refresh().await.map_err(|error| match error {
            LocationError::PermissionDenied => EngineError::PermissionDenied,
            LocationError::NetworkUnavailable | LocationError::TemporarilyUnknown => {
                EngineError::LocationUnknown
            }
            LocationError::Other(message) => EngineError::Internal(anyhow::anyhow!(message)),
        })
    }

    /// Delete a report and, best-effort, its video object
    ///
    /// The document is authoritative: a failed object delete logs a warning
    /// but does not fail the operation.
    pub async fn delete_report(&self, pin: &Pin) -> Result<()> {
        self.repository.delete(pin).await?;

        if pin.has_video() {
            // The public URL is `{base}/videos/{owner}/{pin}.{ext}`, so the
            // object key is recoverable from the URL path as-is, whatever
            // extension the upload used.
            match pin.video_url.split_once("/videos/") {
                Some((_, rest)) => {
                    let key = format!("videos/{}", rest);
                    if let Err(error) = self.blob.delete(&key).await {
                        tracing::warn!(pin_id = %pin.id, %error, "Orphaned video object left behind");
                    }
                }
                None => {
                    tracing::warn!(pin_id = %pin.id, url = %pin.video_url, "Could not derive object key; video object left behind");
                }
            }
        }

        let _ = self.events.send(EngineEvent::PinDeleted(pin.id.clone()));
        Ok(())
    }

    /// Latest fix if fresh, otherwise one coalesced refresh attempt
    async fn current_or_fresh_fix(&self) -> Option<Fix> {
        match self.location.latest_fix() {
            Some(fix) if !fix.is_stale(self.fix_staleness, Utc::now()) => Some(fix),
            _ => match self.location.refresh().await {
                Ok(fix) => Some(fix),
                Err(error) => {
                    // Classified surfacing is the caller's concern; the
                    // validator turns a missing fix into LocationUnknown.
                    tracing::debug!(%error, "Could not refresh fix before validation");
                    None
                }
            },
        }
    }
}
