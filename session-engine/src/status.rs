//! Observable view flags shared by the poller and the reload coordinator.
//!
//! The poller owns `watch_enabled` and raises `changed`; the coordinator owns
//! `reload_in_progress` and `last_error` and lowers `changed`. Both write
//! through the same [`StatusBoard`] so subscribers see one consistent value.

use std::sync::Arc;

use tokio::sync::watch;

use crate::server::ChangeStatus;

/// Snapshot of the flags a UI renders from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ViewStatus {
    /// Server-controlled: whether change detection is active at all.
    pub watch_enabled: bool,
    /// The on-disk changeset differs from the loaded one. Sticky until a
    /// reload starts or a fresh load completes.
    pub changed: bool,
    pub reload_in_progress: bool,
    /// Message of the last failed reload, cleared by the next attempt.
    pub last_error: Option<String>,
}

impl ViewStatus {
    /// The "changes detected" banner is hidden while a reload runs.
    pub fn show_changed_banner(&self) -> bool {
        self.changed && !self.reload_in_progress
    }
}

/// Shared, cloneable handle over the current [`ViewStatus`].
#[derive(Debug, Clone)]
pub struct StatusBoard {
    tx: Arc<watch::Sender<ViewStatus>>,
}

impl StatusBoard {
    pub fn new(watch_enabled: bool) -> Self {
        let (tx, _) = watch::channel(ViewStatus {
            watch_enabled,
            ..ViewStatus::default()
        });
        Self { tx: Arc::new(tx) }
    }

    pub fn snapshot(&self) -> ViewStatus {
        self.tx.borrow().clone()
    }

    /// Receiver notified on every effective change.
    pub fn subscribe(&self) -> watch::Receiver<ViewStatus> {
        self.tx.subscribe()
    }

    /// Applies one poll response. Returns `true` when this response raised
    /// the `changed` flag.
    ///
    /// `changed` is never lowered here.
    pub fn record_poll(&self, status: ChangeStatus) -> bool {
        let mut raised = false;
        self.tx.send_if_modified(|s| {
            let mut modified = false;
            if s.watch_enabled != status.watch_enabled {
                s.watch_enabled = status.watch_enabled;
                modified = true;
            }
            if status.changed && !s.changed {
                s.changed = true;
                raised = true;
                modified = true;
            }
            modified
        });
        raised
    }

    /// Marks a reload as started and optimistically lowers `changed`, in one
    /// update, before any request goes out.
    pub fn begin_reload(&self) {
        self.tx.send_modify(|s| {
            s.reload_in_progress = true;
            s.changed = false;
            s.last_error = None;
        });
    }

    /// Ends the running reload, recording the failure message if any.
    pub fn finish_reload(&self, error: Option<String>) {
        self.tx.send_modify(|s| {
            s.reload_in_progress = false;
            s.last_error = error;
        });
    }

    /// A freshly loaded changeset has nothing pending.
    pub fn mark_fresh_load(&self) {
        self.tx.send_if_modified(|s| {
            let modified = s.changed || s.last_error.is_some();
            s.changed = false;
            s.last_error = None;
            modified
        });
    }
}
