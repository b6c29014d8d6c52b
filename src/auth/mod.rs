//! Location-authorization state machine
//!
//! Tracks the platform permission state and defers at most one action until
//! authorization resolves. Implemented as a single serialized actor: every
//! mutation flows through one command loop, so callbacks and gated requests
//! are applied in a total order and a deferred action can never run against
//! a state transition that has not been applied yet.
//!
//! The deferred slot has depth one with last-writer-wins semantics: gating a
//! second action before authorization resolves supersedes the first, and the
//! superseded caller is told so.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};

use crate::geo::Coordinate;

/// Device location-authorization state
///
/// Transitions only via platform callbacks (forwarded through
/// [`AuthorizationHandle::authorization_changed`]); the engine never sets
/// the state directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    Undetermined,
    AuthorizedWhenInUse,
    AuthorizedAlways,
    Denied,
    Restricted,
}

impl AuthState {
    /// True for either authorized state
    pub fn is_authorized(&self) -> bool {
        matches!(self, AuthState::AuthorizedWhenInUse | AuthState::AuthorizedAlways)
    }

    /// True when the user (or policy) has refused location access
    pub fn is_refused(&self) -> bool {
        matches!(self, AuthState::Denied | AuthState::Restricted)
    }
}

/// A deferred operation awaiting authorization
#[derive(Debug, Clone, PartialEq)]
pub enum PendingAction {
    /// Center the map on a fresh location fix
    CenterOnUser,
    /// Drop a pin at the given coordinate
    DropPinAt(Coordinate),
}

/// Outcome of gating an action on authorization
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    /// Authorization held (or was granted); run the action now
    Granted,
    /// Authorization denied or restricted; the action was discarded
    Denied,
    /// A newer gated action replaced this one before authorization resolved
    Superseded,
}

/// Platform permission prompt surface
///
/// The host adapts its platform location-permission API to this trait.
/// Status-change callbacks are delivered separately, by the host calling
/// [`AuthorizationHandle::authorization_changed`].
#[cfg_attr(test, mockall::automock)]
pub trait PermissionProvider: Send + Sync {
    /// Current authorization status at construction time
    fn current_status(&self) -> AuthState;

    /// Trigger the platform permission prompt
    ///
    /// The eventual user response arrives through the status-change
    /// callback channel, not as a return value.
    fn request_when_in_use_authorization(&self);
}

enum Command {
    EnsureAuthorized(PendingAction, oneshot::Sender<GateDecision>),
    RequestPermission,
    AuthorizationChanged(AuthState),
    CurrentState(oneshot::Sender<AuthState>),
}

/// Handle to the authorization actor
///
/// Cheap to clone; all clones address the same serialized command loop.
#[derive(Clone)]
pub struct AuthorizationHandle {
    tx: mpsc::UnboundedSender<Command>,
}

impl AuthorizationHandle {
    /// Spawn the authorization actor
    ///
    /// Initial state is read from the provider; from then on it only moves
    /// via `authorization_changed`.
    pub fn spawn(provider: Arc<dyn PermissionProvider>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run(provider, rx));
        Self { tx }
    }

    /// Gate an action on authorization
    ///
    /// Runs-now semantics when already authorized; otherwise the action is
    /// stored as the single pending action (overwriting any previous one)
    /// and the platform prompt is requested. Resolves when authorization
    /// resolves.
    pub async fn ensure_authorized(&self, action: PendingAction) -> GateDecision {
        let (respond, decision) = oneshot::channel();
        if self
            .tx
            .send(Command::EnsureAuthorized(action, respond))
            .is_err()
        {
            return GateDecision::Denied;
        }
        // A dropped responder means the actor stopped; treat as refusal
        decision.await.unwrap_or(GateDecision::Denied)
    }

    /// Trigger the platform prompt if the state is still undetermined
    ///
    /// Idempotent: repeated calls while undetermined issue one prompt.
    pub fn request_permission(&self) {
        let _ = self.tx.send(Command::RequestPermission);
    }

    /// Forward a platform authorization-change callback
    pub fn authorization_changed(&self, new_state: AuthState) {
        let _ = self.tx.send(Command::AuthorizationChanged(new_state));
    }

    /// Snapshot of the current state
    pub async fn current_state(&self) -> AuthState {
        let (respond, state) = oneshot::channel();
        if self.tx.send(Command::CurrentState(respond)).is_err() {
            return AuthState::Restricted;
        }
        state.await.unwrap_or(AuthState::Restricted)
    }
}

/// Actor command loop
///
/// Owns the state, the depth-one pending slot, and the prompt latch.
async fn run(provider: Arc<dyn PermissionProvider>, mut rx: mpsc::UnboundedReceiver<Command>) {
    let mut state = provider.current_status();
    let mut pending: Option<(PendingAction, oneshot::Sender<GateDecision>)> = None;
    let mut prompt_issued = false;

    tracing::debug!(?state, "Authorization actor started");

    while let Some(command) = rx.recv().await {
        match command {
            Command::EnsureAuthorized(action, respond) => {
                if state.is_authorized() {
                    let _ = respond.send(GateDecision::Granted);
                } else if state.is_refused() {
                    tracing::info!(?action, "Gated action refused: permission denied");
                    let _ = respond.send(GateDecision::Denied);
                } else {
                    // Last-writer-wins: the previous pending action is
                    // superseded, never stacked.
                    if let Some((old_action, old_respond)) = pending.replace((action, respond)) {
                        tracing::debug!(?old_action, "Pending action superseded");
                        let _ = old_respond.send(GateDecision::Superseded);
                    }
                    if !prompt_issued {
                        provider.request_when_in_use_authorization();
                        prompt_issued = true;
                    }
                }
            }
            Command::RequestPermission => {
                if state == AuthState::Undetermined && !prompt_issued {
                    provider.request_when_in_use_authorization();
                    prompt_issued = true;
                }
            }
            Command::AuthorizationChanged(new_state) => {
                tracing::info!(from = ?state, to = ?new_state, "Authorization changed");
                state = new_state;
                prompt_issued = false;

                if state.is_authorized() {
                    // Consumed exactly once, after the transition above is
                    // applied.
                    if let Some((action, respond)) = pending.take() {
                        tracing::debug!(?action, "Releasing pending action");
                        let _ = respond.send(GateDecision::Granted);
                    }
                } else if state.is_refused() {
                    if let Some((action, respond)) = pending.take() {
                        tracing::info!(?action, "Discarding pending action: permission refused");
                        let _ = respond.send(GateDecision::Denied);
                    }
                }
            }
            Command::CurrentState(respond) => {
                let _ = respond.send(state);
            }
        }
    }

    tracing::debug!("Authorization actor stopped");
}
