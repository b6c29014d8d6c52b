//! Location stream
//!
//! Wraps the platform location provider behind a trait and owns the latest
//! fix. One-shot requests are coalesced: a request issued while another is
//! outstanding waits for it and reuses the resulting fix instead of asking
//! the platform twice. Provider errors arrive pre-classified; the
//! `should_surface` policy decides which ones the host may alert on.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{Mutex, watch};

use crate::geo::Fix;

/// Classified location-provider failure
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LocationError {
    /// Location access is not authorized
    #[error("location permission denied")]
    PermissionDenied,

    /// No network path to resolve a position
    #[error("network unavailable")]
    NetworkUnavailable,

    /// The provider could not produce a fix right now; retrying later is
    /// expected to succeed
    #[error("location temporarily unknown")]
    TemporarilyUnknown,

    /// Anything else
    #[error("location error: {0}")]
    Other(String),
}

impl LocationError {
    /// Whether the host should show this error to the user
    ///
    /// Only permission and unclassified failures following a user-initiated
    /// action surface as alerts. `TemporarilyUnknown` is transient noise and
    /// must never spam the user on retry.
    pub fn should_surface(&self, user_initiated: bool) -> bool {
        user_initiated
            && matches!(
                self,
                LocationError::PermissionDenied | LocationError::Other(_)
            )
    }
}

/// Platform location provider surface
///
/// The host adapts its platform location API to this trait. Continuous
/// updates, where the host enables them, are delivered by calling
/// [`LocationStream::report_fix`]; the trait itself only models the one-shot
/// request the engine issues.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LocationProvider: Send + Sync {
    /// Request a single location fix
    async fn request_one_shot(&self) -> Result<Fix, LocationError>;
}

/// Owner of the latest location fix
///
/// The fix is replaced wholesale on every update and never mutated in
/// place. Subscribers observe replacements through a watch channel.
pub struct LocationStream {
    provider: Arc<dyn LocationProvider>,
    latest: watch::Sender<Option<Fix>>,
    /// Bumped after every successful one-shot; lets a coalesced waiter
    /// detect that a fresh fix arrived while it was queued
    generation: AtomicU64,
    /// Serializes one-shot requests
    gate: Mutex<()>,
    timeout: Duration,
}

impl LocationStream {
    /// Create a stream over the given provider
    ///
    /// # Arguments
    /// * `provider` - Platform adapter
    /// * `timeout` - Give up on a one-shot request after this long
    pub fn new(provider: Arc<dyn LocationProvider>, timeout: Duration) -> Self {
        let (latest, _) = watch::channel(None);
        Self {
            provider,
            latest,
            generation: AtomicU64::new(0),
            gate: Mutex::new(()),
            timeout,
        }
    }

    /// Latest known fix, if any
    ///
    /// Staleness is the validator's concern; this returns whatever is
    /// newest regardless of age.
    pub fn latest_fix(&self) -> Option<Fix> {
        self.latest.borrow().clone()
    }

    /// Subscribe to fix replacements
    pub fn changed(&self) -> watch::Receiver<Option<Fix>> {
        self.latest.subscribe()
    }

    /// Fix replacements as a `Stream`, for hosts driving a follow-mode loop
    pub fn fix_stream(&self) -> tokio_stream::wrappers::WatchStream<Option<Fix>> {
        tokio_stream::wrappers::WatchStream::new(self.latest.subscribe())
    }

    /// Record a fix delivered by the host's continuous-update channel
    pub fn report_fix(&self, fix: Fix) {
        self.latest.send_replace(Some(fix));
        self.generation.fetch_add(1, Ordering::Release);
    }

    /// Obtain a fresh fix, coalescing concurrent requests
    ///
    /// If another one-shot is in flight, this waits for it and reuses its
    /// fix rather than issuing a duplicate platform call. A timed-out
    /// request classifies as `TemporarilyUnknown`.
    pub async fn refresh(&self) -> Result<Fix, LocationError> {
        let seen = self.generation.load(Ordering::Acquire);
        let _guard = self.gate.lock().await;

        // A one-shot completed while we were queued; its fix is ours too.
        if self.generation.load(Ordering::Acquire) != seen {
            if let Some(fix) = self.latest_fix() {
                return Ok(fix);
            }
        }

        let fix = match tokio::time::timeout(self.timeout, self.provider.request_one_shot()).await
        {
            Ok(Ok(fix)) => fix,
            Ok(Err(error)) => {
                tracing::debug!(%error, "One-shot location request failed");
                return Err(error);
            }
            Err(_elapsed) => {
                tracing::debug!(timeout = ?self.timeout, "One-shot location request timed out");
                return Err(LocationError::TemporarilyUnknown);
            }
        };

        tracing::debug!(
            latitude = fix.coordinate.latitude(),
            longitude = fix.coordinate.longitude(),
            accuracy_m = fix.accuracy_m,
            "Location fix updated"
        );
        self.latest.send_replace(Some(fix.clone()));
        self.generation.fetch_add(1, Ordering::Release);
        Ok(fix)
    }
}
