//! Startup configuration of a diff session.
//!
//! [`SessionConfig`] is built once (from the environment or from the
//! server-injected bootstrap blob) and passed by value into
//! [`crate::session::DiffSession`]. Nothing reads ambient globals afterwards.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use crate::commits::DEFAULT_PAGE_SIZE;
use crate::errors::{
    ConfigError, SessionResult, env_opt_bool, env_opt_u64, must_env, validate_http_endpoint,
};
use crate::options::DiffOptions;
use crate::preferences::default_preferences_dir;
use crate::server::{RepoEntry, SessionId};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(2000);
/// Reload blocks until the server has recomputed the changeset.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);
const FALLBACK_LABEL: &str = "default";

/// Immutable configuration of one client process.
#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// Base URL of the webdiff server, e.g. `http://localhost:8000`.
    pub server_url: String,
    /// Repository index the session starts on.
    pub session: SessionId,
    /// Label of the starting repository; derived from `repos` when unset.
    pub repo_label: Option<String>,
    /// Repositories known at startup (may be empty for single-repo servers).
    pub repos: Vec<RepoEntry>,
    /// Comparison arguments currently loaded on the server.
    pub git_args: Vec<String>,
    pub initial_options: DiffOptions,
    pub watch_enabled: bool,
    pub manage_repos_enabled: bool,
    /// Server can render image diffs.
    pub has_magick: bool,
    pub poll_interval: Duration,
    pub request_timeout: Duration,
    pub commit_page_size: u32,
    pub prefs_dir: PathBuf,
    /// Raw server configuration as injected by the server, if known.
    pub server_config: Option<serde_json::Value>,
}

/// Shape of the state blob the server injects into its page.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct BootstrapData {
    repos: Vec<RepoEntry>,
    current_repo_label: Option<String>,
    current_repo_idx: Option<usize>,
    git_args: Vec<String>,
    watch_enabled: bool,
    manage_repos_enabled: bool,
    has_magick: bool,
    server_config: Option<serde_json::Value>,
}

impl SessionConfig {
    /// Defaults for a single-repository server at `server_url`.
    pub fn new_default(server_url: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            session: SessionId(0),
            repo_label: None,
            repos: Vec::new(),
            git_args: Vec::new(),
            initial_options: DiffOptions::default(),
            watch_enabled: true,
            manage_repos_enabled: false,
            has_magick: false,
            poll_interval: DEFAULT_POLL_INTERVAL,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            commit_page_size: DEFAULT_PAGE_SIZE,
            prefs_dir: default_preferences_dir(),
            server_config: None,
        }
    }

    /// Reads `WEBDIFF_*` variables. Only `WEBDIFF_URL` is required.
    pub fn from_env() -> SessionResult<Self> {
        let server_url = must_env("WEBDIFF_URL")?;
        validate_http_endpoint("WEBDIFF_URL", &server_url)?;

        let mut cfg = Self::new_default(server_url.trim_end_matches('/'));

        if let Some(idx) = env_opt_u64("WEBDIFF_REPO")? {
            cfg.session = SessionId(usize::try_from(idx).map_err(|_| {
                ConfigError::InvalidNumber {
                    var: "WEBDIFF_REPO",
                    reason: "repository index out of range",
                }
            })?);
        }
        cfg.repo_label = std::env::var("WEBDIFF_REPO_LABEL")
            .ok()
            .filter(|v| !v.trim().is_empty());
        if let Ok(args) = std::env::var("WEBDIFF_GIT_ARGS") {
            cfg.git_args = args.split_whitespace().map(str::to_string).collect();
        }
        if let Ok(query) = std::env::var("WEBDIFF_OPTIONS") {
            cfg.initial_options = DiffOptions::decode(&query);
        }
        if let Some(watch) = env_opt_bool("WEBDIFF_WATCH")? {
            cfg.watch_enabled = watch;
        }
        if let Some(ms) = env_opt_u64("WEBDIFF_POLL_MS")? {
            cfg.poll_interval = Duration::from_millis(ms);
        }
        if let Some(secs) = env_opt_u64("WEBDIFF_TIMEOUT_SECS")? {
            cfg.request_timeout = Duration::from_secs(secs);
        }
        if let Some(page) = env_opt_u64("WEBDIFF_COMMIT_PAGE")? {
            cfg.commit_page_size = u32::try_from(page).map_err(|_| ConfigError::InvalidNumber {
                var: "WEBDIFF_COMMIT_PAGE",
                reason: "page size too large",
            })?;
        }
        if let Ok(dir) = std::env::var("WEBDIFF_PREFS_DIR") {
            if !dir.trim().is_empty() {
                cfg.prefs_dir = PathBuf::from(dir);
            }
        }

        cfg.validate()?;
        debug!(url = %cfg.server_url, session = %cfg.session, "configuration loaded from env");
        Ok(cfg)
    }

    /// Builds the configuration from the state blob the server injects into
    /// its page.
    pub fn from_bootstrap(server_url: impl Into<String>, json: &str) -> SessionResult<Self> {
        let data: BootstrapData = serde_json::from_str(json)
            .map_err(|e| ConfigError::InvalidBootstrap(e.to_string()))?;

        let mut cfg = Self::new_default(server_url);
        cfg.session = SessionId(data.current_repo_idx.unwrap_or(0));
        cfg.repo_label = data.current_repo_label;
        cfg.repos = data.repos;
        cfg.git_args = data.git_args;
        cfg.watch_enabled = data.watch_enabled;
        cfg.manage_repos_enabled = data.manage_repos_enabled;
        cfg.has_magick = data.has_magick;

        if let Some(width) = data
            .server_config
            .as_ref()
            .and_then(|c| c.pointer("/webdiff/maxDiffWidth"))
            .and_then(serde_json::Value::as_u64)
            .and_then(|w| u32::try_from(w).ok())
        {
            cfg.initial_options = cfg.initial_options.with_max_diff_width(width);
        }
        cfg.server_config = data.server_config;

        cfg.validate()?;
        Ok(cfg)
    }

    /// Checks URL, timing and repository consistency.
    pub fn validate(&self) -> SessionResult<()> {
        if self.server_url.trim().is_empty() {
            return Err(ConfigError::MissingVar("WEBDIFF_URL").into());
        }
        validate_http_endpoint("WEBDIFF_URL", &self.server_url)?;
        if self.poll_interval.is_zero() {
            return Err(ConfigError::InvalidNumber {
                var: "WEBDIFF_POLL_MS",
                reason: "poll interval must be > 0",
            }
            .into());
        }
        if self.commit_page_size == 0 {
            return Err(ConfigError::InvalidNumber {
                var: "WEBDIFF_COMMIT_PAGE",
                reason: "page size must be > 0",
            }
            .into());
        }
        if !self.repos.is_empty() && self.session.0 >= self.repos.len() {
            return Err(ConfigError::InvalidBootstrap(format!(
                "current repository index {} out of range ({} repositories)",
                self.session,
                self.repos.len()
            ))
            .into());
        }
        Ok(())
    }

    /// Label of the starting repository.
    pub fn current_label(&self) -> String {
        self.repo_label
            .clone()
            .or_else(|| self.repo(self.session).map(|r| r.label.clone()))
            .unwrap_or_else(|| FALLBACK_LABEL.to_string())
    }

    pub fn repo(&self, session: SessionId) -> Option<&RepoEntry> {
        self.repos.get(session.0)
    }

    /// Session identity of the repository labelled `label`.
    pub fn repo_index(&self, label: &str) -> Option<SessionId> {
        self.repos
            .iter()
            .position(|r| r.label == label)
            .map(SessionId)
    }
}
