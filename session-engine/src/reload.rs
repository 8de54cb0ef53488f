//! Reload coordination.
//!
//! A reload asks the server to recompute the changeset (optionally with new
//! comparison arguments) and, once the server confirms, resets the whole
//! client. File indices and option semantics are not stable across a
//! recomputation, so nothing from the previous changeset is reused.
//!
//! Ordering: `reload_in_progress = true` and `changed = false` are published
//! before the request is issued, so the "changes detected" banner disappears
//! immediately. The reset runs only after the server has answered with
//! success; it is never speculative.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use tracing::{debug, info, instrument, warn};

use crate::errors::{SessionError, SessionResult};
use crate::server::{DiffServer, SessionId};
use crate::status::StatusBoard;

/// Hook performing the full client reset after a confirmed reload.
///
/// `session` is the identity the server recomputed. `applied_args` are the
/// comparison arguments the server now uses when the reload overrode them,
/// `None` when it kept the previous ones. By the time the hook runs the
/// server-side changeset has already moved, so implementations must drop
/// state of the old changeset even when their own refresh fails.
pub trait ClientReset: Send + Sync {
    fn reset<'a>(
        &'a self,
        session: SessionId,
        applied_args: Option<&'a [String]>,
    ) -> Pin<Box<dyn Future<Output = SessionResult<()>> + Send + 'a>>;
}

/// Result of one [`ReloadCoordinator::reload`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReloadOutcome {
    /// Server recomputed the changeset and the client was reset.
    Reloaded,
    /// Another reload was already running; nothing was sent.
    AlreadyInProgress,
    /// The previous changeset stays loaded; `message` is user-facing.
    Failed { message: String },
}

/// Serializes reloads and drives the status flags around them.
pub struct ReloadCoordinator {
    server: Arc<dyn DiffServer>,
    session: AtomicUsize,
    status: StatusBoard,
    in_flight: AtomicBool,
    reset: Arc<dyn ClientReset>,
}

impl ReloadCoordinator {
    pub fn new(
        server: Arc<dyn DiffServer>,
        session: SessionId,
        status: StatusBoard,
        reset: Arc<dyn ClientReset>,
    ) -> Self {
        Self {
            server,
            session: AtomicUsize::new(session.0),
            status,
            in_flight: AtomicBool::new(false),
            reset,
        }
    }

    pub fn session(&self) -> SessionId {
        SessionId(self.session.load(Ordering::Acquire))
    }

    /// Points later reloads at another changeset identity.
    pub fn set_session(&self, session: SessionId) {
        self.session.store(session.0, Ordering::Release);
    }

    pub fn in_progress(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Claims the in-flight slot without reloading, so no reload can start
    /// while the caller changes the identity. `None` when a reload (or
    /// another hold) is running. Status flags are left alone.
    pub fn hold(&self) -> Option<IdentityHold<'_>> {
        self.in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| IdentityHold { coordinator: self })
    }

    /// Recomputes the changeset. `override_args = None` keeps the arguments
    /// the server currently uses; `Some(vec![])` selects working-tree
    /// changes.
    ///
    /// Re-entrant calls while a reload runs return
    /// [`ReloadOutcome::AlreadyInProgress`] without side effects.
    #[instrument(skip_all, fields(session = %self.session(), override_args = ?override_args))]
    pub async fn reload(&self, override_args: Option<Vec<String>>) -> ReloadOutcome {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("reload already in flight; ignoring trigger");
            return ReloadOutcome::AlreadyInProgress;
        }
        let guard = InFlightGuard { coordinator: self };

        self.status.begin_reload();

        let session = self.session();
        let result = self.server.reload(session, override_args.as_deref()).await;

        let outcome = match result {
            Ok(resp) if resp.success => {
                info!(message = ?resp.message, "server recomputed changeset; resetting client");
                match self.reset.reset(session, override_args.as_deref()).await {
                    Ok(()) => {
                        self.status.mark_fresh_load();
                        ReloadOutcome::Reloaded
                    }
                    Err(e) => {
                        warn!(error = %e, "client reset after reload failed");
                        ReloadOutcome::Failed {
                            message: format!(
                                "Reloaded, but refreshing the view failed: {}",
                                e.user_message()
                            ),
                        }
                    }
                }
            }
            Ok(resp) => {
                let reason = resp.error.unwrap_or_else(|| "unknown error".to_string());
                warn!(%reason, "server rejected reload");
                ReloadOutcome::Failed {
                    message: format!("Reload failed: {reason}"),
                }
            }
            Err(SessionError::ServerReported(reason)) => {
                warn!(%reason, "server reported reload failure");
                ReloadOutcome::Failed {
                    message: format!("Reload failed: {reason}"),
                }
            }
            Err(e) => {
                warn!(error = %e, "reload request failed");
                ReloadOutcome::Failed {
                    message: format!("Reload failed: {}", e.user_message()),
                }
            }
        };

        let error = match &outcome {
            ReloadOutcome::Failed { message } => Some(message.clone()),
            _ => None,
        };
        guard.finish(error);
        outcome
    }
}

/// Clears the in-flight state even when the reload future is dropped early.
struct InFlightGuard<'a> {
    coordinator: &'a ReloadCoordinator,
}

impl InFlightGuard<'_> {
    fn finish(self, error: Option<String>) {
        self.coordinator.status.finish_reload(error);
        self.coordinator.in_flight.store(false, Ordering::Release);
        std::mem::forget(self);
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        debug!("reload abandoned before completion");
        self.coordinator.status.finish_reload(None);
        self.coordinator.in_flight.store(false, Ordering::Release);
    }
}

/// Keeps reloads out until dropped. See [`ReloadCoordinator::hold`].
pub struct IdentityHold<'a> {
    coordinator: &'a ReloadCoordinator,
}

impl Drop for IdentityHold<'_> {
    fn drop(&mut self) {
        self.coordinator.in_flight.store(false, Ordering::Release);
    }
}
