//! Client-side session engine for a webdiff server.
//!
//! Keeps a local view of one server-computed changeset in sync: memoized
//! per-file diff fetches, change polling, blocking reloads that reset all
//! client state, and commit selection through single-commit ranges.

pub mod cache;
pub mod commits;
pub mod config;
mod errors;
pub mod fetcher;
pub mod options;
pub mod poller;
pub mod preferences;
pub mod reload;
pub mod server;
pub mod session;
pub mod status;
pub mod telemetry;

#[cfg(test)]
mod test_support;

use tracing::info;

pub use crate::{
    config::SessionConfig,
    errors::{ConfigError, SessionError, SessionResult, TransportError, env_opt_bool},
    options::{DiffAlgorithm, DiffOptions},
    reload::ReloadOutcome,
    session::DiffSession,
    status::{StatusBoard, ViewStatus},
};

/// Connects to the configured server and loads the starting changeset.
pub async fn open_session(cfg: SessionConfig) -> SessionResult<DiffSession> {
    info!(
        url = %cfg.server_url,
        session = %cfg.session,
        "opening diff session"
    );

    let session = DiffSession::connect(cfg)?;
    session.bootstrap().await?;

    info!(
        session = %session.session(),
        label = %session.label(),
        files = session.file_count(),
        "diff session ready"
    );
    Ok(session)
}
