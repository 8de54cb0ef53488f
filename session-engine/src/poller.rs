//! Change-detection polling.
//!
//! [`ChangePoller::start`] issues one status request immediately and then
//! one per interval until the returned [`PollHandle`] is stopped or dropped.
//! Failures are logged and retried on the next tick; polling never backs off.
//! Stopping does not cancel a request already in flight, its answer is simply
//! discarded.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, instrument, warn};

use crate::server::{DiffServer, SessionId};
use crate::status::StatusBoard;

/// Factory for polling tasks against one server.
#[derive(Clone)]
pub struct ChangePoller {
    server: Arc<dyn DiffServer>,
    status: StatusBoard,
    interval: Duration,
}

impl ChangePoller {
    pub fn new(server: Arc<dyn DiffServer>, status: StatusBoard, interval: Duration) -> Self {
        Self {
            server,
            status,
            interval,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Spawns the polling task for `session` on the current tokio runtime.
    pub fn start(&self, session: SessionId) -> PollHandle {
        let stop = Arc::new(StopSignal::default());
        tokio::spawn(poll_loop(
            self.server.clone(),
            self.status.clone(),
            session,
            self.interval,
            stop.clone(),
        ));
        debug!(%session, interval_ms = self.interval.as_millis() as u64, "polling started");
        PollHandle { session, stop }
    }
}

#[derive(Default)]
struct StopSignal {
    stopped: AtomicBool,
    wake: Notify,
}

/// Owner of one running polling task.
pub struct PollHandle {
    session: SessionId,
    stop: Arc<StopSignal>,
}

impl PollHandle {
    pub fn session(&self) -> SessionId {
        self.session
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.stopped.load(Ordering::Acquire)
    }

    /// Stops the timer. Idempotent.
    pub fn stop(&self) {
        if !self.stop.stopped.swap(true, Ordering::AcqRel) {
            self.stop.wake.notify_one();
            debug!(session = %self.session, "polling stopped");
        }
    }
}

impl Drop for PollHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

#[instrument(skip_all, fields(session = %session))]
async fn poll_loop(
    server: Arc<dyn DiffServer>,
    status: StatusBoard,
    session: SessionId,
    interval: Duration,
    stop: Arc<StopSignal>,
) {
    let mut ticker = time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = stop.wake.notified() => break,
        }
        if stop.stopped.load(Ordering::Acquire) {
            break;
        }

        let result = server.diff_changed(session).await;

        if stop.stopped.load(Ordering::Acquire) {
            debug!("discarding poll response after stop");
            break;
        }

        match result {
            Ok(change) => {
                if status.record_poll(change) {
                    info!("changeset differs from the loaded one");
                }
            }
            Err(e) => warn!(error = %e, "change poll failed; retrying next tick"),
        }
    }
}

/// Keeps at most one polling task alive and follows identity switches.
pub struct ChangeWatcher {
    poller: ChangePoller,
    current: Option<PollHandle>,
}

impl ChangeWatcher {
    pub fn new(poller: ChangePoller) -> Self {
        Self {
            poller,
            current: None,
        }
    }

    /// Polls `session`, replacing any task bound to another identity.
    pub fn retarget(&mut self, session: SessionId) {
        if let Some(handle) = &self.current {
            if handle.session() == session && !handle.is_stopped() {
                return;
            }
        }
        self.stop();
        self.current = Some(self.poller.start(session));
    }

    pub fn stop(&mut self) {
        if let Some(handle) = self.current.take() {
            handle.stop();
        }
    }

    pub fn current_session(&self) -> Option<SessionId> {
        self.current.as_ref().map(PollHandle::session)
    }

    pub fn is_running(&self) -> bool {
        self.current.as_ref().is_some_and(|h| !h.is_stopped())
    }
}
