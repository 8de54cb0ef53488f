//! Session facade: one client talking to one webdiff server.
//!
//! [`DiffSession`] owns every component for the currently viewed changeset
//! and is the only place where identity changes (reload success, repository
//! switch) are turned into the required resets: new file listing, fresh
//! cache, empty commit history, polling retargeted.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use tracing::{debug, info, instrument, warn};

use crate::cache::UnifiedDataCache;
use crate::commits::{self, CommitHistory, CommitSelector};
use crate::config::SessionConfig;
use crate::errors::{ConfigError, SessionError, SessionResult};
use crate::fetcher::UnifiedFileFetcher;
use crate::options::DiffOptions;
use crate::poller::{ChangePoller, ChangeWatcher};
use crate::preferences::{DisplayPreferences, FileListPreferences, PreferenceStore};
use crate::reload::{ClientReset, ReloadCoordinator, ReloadOutcome};
use crate::server::{
    DiffServer, FileContentPreview, FileIndexRef, FileListing, HttpDiffServer, RepoEntry,
    RepoValidation, SessionId, UnifiedFileData,
};
use crate::status::{StatusBoard, ViewStatus};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// What is loaded for the current changeset identity.
struct Loaded {
    session: SessionId,
    listing: FileListing,
    cache: Arc<UnifiedDataCache>,
    git_args: Vec<String>,
    /// The server recomputed the changeset but its listing is not loaded.
    stale: bool,
}

/// State replaced wholesale on every identity change.
struct LoadedState {
    server: Arc<dyn DiffServer>,
    inner: RwLock<Loaded>,
    commits: tokio::sync::Mutex<CommitSelector>,
}

impl LoadedState {
    fn new(
        server: Arc<dyn DiffServer>,
        session: SessionId,
        git_args: Vec<String>,
        page: u32,
    ) -> Self {
        Self {
            commits: tokio::sync::Mutex::new(CommitSelector::new(server.clone(), session, page)),
            inner: RwLock::new(Loaded {
                session,
                listing: FileListing::default(),
                cache: empty_cache(&server, session),
                git_args,
                stale: false,
            }),
            server,
        }
    }

    fn read<R>(&self, f: impl FnOnce(&Loaded) -> R) -> R {
        let guard = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        f(&*guard)
    }

    fn write<R>(&self, f: impl FnOnce(&mut Loaded) -> R) -> R {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut *guard)
    }

    fn session(&self) -> SessionId {
        self.read(|l| l.session)
    }

    fn cache(&self) -> Arc<UnifiedDataCache> {
        self.read(|l| l.cache.clone())
    }

    /// Fetches the listing of `session` and swaps in a fresh cache. The
    /// previous state stays untouched when the listing request fails.
    #[instrument(skip_all, fields(session = %session))]
    async fn load(&self, session: SessionId, git_args: Option<Vec<String>>) -> SessionResult<()> {
        let listing = self.server.files(session).await?;
        let cache = Arc::new(UnifiedDataCache::new(UnifiedFileFetcher::new(
            self.server.clone(),
            session,
            listing.changed.len(),
        )));
        info!(
            changed = listing.changed.len(),
            untracked = listing.untracked.len(),
            "changeset loaded"
        );

        let old = self.write(|inner| {
            let old = std::mem::replace(&mut inner.cache, cache);
            inner.session = session;
            inner.listing = listing;
            inner.stale = false;
            if let Some(args) = git_args {
                inner.git_args = args;
            }
            old
        });
        old.clear();

        self.commits.lock().await.reset(session);
        Ok(())
    }

    /// Drops everything derived from the previous changeset of `session`:
    /// memoized payloads, listing and commit history. Applied arguments are
    /// recorded right away since the server already uses them.
    async fn invalidate(&self, session: SessionId, git_args: Option<Vec<String>>) {
        let old = self.write(|inner| {
            let old = std::mem::replace(&mut inner.cache, empty_cache(&self.server, session));
            inner.listing = FileListing::default();
            inner.stale = true;
            if let Some(args) = git_args {
                inner.git_args = args;
            }
            old
        });
        old.clear();
        self.commits.lock().await.reset(session);
    }
}

fn empty_cache(server: &Arc<dyn DiffServer>, session: SessionId) -> Arc<UnifiedDataCache> {
    Arc::new(UnifiedDataCache::new(UnifiedFileFetcher::new(
        server.clone(),
        session,
        0,
    )))
}

impl ClientReset for LoadedState {
    fn reset<'a>(
        &'a self,
        session: SessionId,
        applied_args: Option<&'a [String]>,
    ) -> Pin<Box<dyn Future<Output = SessionResult<()>> + Send + 'a>> {
        Box::pin(async move {
            if self.session() != session {
                warn!(
                    reloaded = %session,
                    current = %self.session(),
                    "identity moved during reload; skipping reset"
                );
                return Ok(());
            }
            self.invalidate(session, applied_args.map(<[String]>::to_vec)).await;
            self.load(session, None).await
        })
    }
}

/// Client-side session against one webdiff server.
pub struct DiffSession {
    server: Arc<dyn DiffServer>,
    config: SessionConfig,
    status: StatusBoard,
    state: Arc<LoadedState>,
    coordinator: ReloadCoordinator,
    watcher: Mutex<ChangeWatcher>,
    options: Mutex<DiffOptions>,
    preferences: Mutex<DisplayPreferences>,
    store: PreferenceStore,
    repos: Mutex<Vec<RepoEntry>>,
    label: Mutex<String>,
}

impl DiffSession {
    /// Connects to the configured server over HTTP.
    pub fn connect(config: SessionConfig) -> SessionResult<Self> {
        config.validate()?;
        let server = HttpDiffServer::new(&config.server_url, config.request_timeout)?;
        Ok(Self::new(config, Arc::new(server)))
    }

    /// Wires every component around `server`. Nothing is fetched until
    /// [`DiffSession::bootstrap`].
    pub fn new(config: SessionConfig, server: Arc<dyn DiffServer>) -> Self {
        let status = StatusBoard::new(config.watch_enabled);
        let state = Arc::new(LoadedState::new(
            server.clone(),
            config.session,
            config.git_args.clone(),
            config.commit_page_size,
        ));
        let coordinator = ReloadCoordinator::new(
            server.clone(),
            config.session,
            status.clone(),
            state.clone(),
        );
        let poller = ChangePoller::new(server.clone(), status.clone(), config.poll_interval);
        let store = PreferenceStore::new(config.prefs_dir.clone());
        let label = config.current_label();

        Self {
            preferences: Mutex::new(DisplayPreferences::load(store.clone(), label.clone())),
            options: Mutex::new(config.initial_options.clone()),
            repos: Mutex::new(config.repos.clone()),
            label: Mutex::new(label),
            watcher: Mutex::new(ChangeWatcher::new(poller)),
            server,
            status,
            state,
            coordinator,
            store,
            config,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn session(&self) -> SessionId {
        self.state.session()
    }

    pub fn label(&self) -> String {
        lock(&self.label).clone()
    }

    pub fn status(&self) -> &StatusBoard {
        &self.status
    }

    pub fn view_status(&self) -> ViewStatus {
        self.status.snapshot()
    }

    /// Loads the file listing of the current changeset. Also the way back
    /// after a reload whose refresh failed.
    pub async fn bootstrap(&self) -> SessionResult<()> {
        self.state.load(self.session(), None).await?;
        self.status.mark_fresh_load();
        Ok(())
    }

    /// `true` after the server recomputed the changeset but the client could
    /// not load the new listing. Nothing is served until
    /// [`DiffSession::bootstrap`] succeeds.
    pub fn needs_refresh(&self) -> bool {
        self.state.read(|l| l.stale)
    }

    pub fn files(&self) -> FileListing {
        self.state.read(|l| l.listing.clone())
    }

    /// Listing filtered by the display preferences.
    pub fn visible_files(&self) -> FileListing {
        let prefs = self.preferences();
        let mut listing = self.files();
        if !prefs.show_changed {
            listing.changed.clear();
        }
        if !prefs.show_untracked {
            listing.untracked.clear();
        }
        if !prefs.show_gitignored {
            listing.gitignored.clear();
        }
        listing
    }

    pub fn file_count(&self) -> usize {
        self.state.read(|l| l.listing.changed.len())
    }

    /// Comparison arguments of the loaded changeset.
    pub fn current_args(&self) -> Vec<String> {
        self.state.read(|l| l.git_args.clone())
    }

    pub fn options(&self) -> DiffOptions {
        lock(&self.options).clone()
    }

    /// Replaces the diff options; memoized payloads are dropped when the
    /// change alters what the server returns.
    pub fn set_options(&self, next: DiffOptions) {
        let mut current = lock(&self.options);
        if current.requires_refetch(&next) {
            debug!(from = %current.encode(), to = %next.encode(), "options changed; clearing cache");
            self.state.cache().clear();
        }
        *current = next;
    }

    /// Diff data of one file under the current options, memoized.
    pub async fn file_data(&self, index: FileIndexRef) -> SessionResult<Arc<UnifiedFileData>> {
        let (flags, normalize) = self.request_params();
        self.state.cache().get_or_fetch(index, &flags, normalize).await
    }

    /// Full, untruncated payload of one file. Bypasses the cache.
    pub async fn render_anyway(&self, index: FileIndexRef) -> SessionResult<UnifiedFileData> {
        let (flags, normalize) = self.request_params();
        let cache = self.state.cache();
        cache.fetcher().fetch(index, &flags, normalize, true).await
    }

    fn request_params(&self) -> (Vec<String>, bool) {
        let options = lock(&self.options);
        (options.to_flags(), options.normalize_json)
    }

    pub async fn reload(&self, override_args: Option<Vec<String>>) -> ReloadOutcome {
        self.coordinator.reload(override_args).await
    }

    pub fn reload_in_progress(&self) -> bool {
        self.coordinator.in_progress()
    }

    /// Starts change polling for the current identity. Returns `false` when
    /// the server has watching disabled.
    pub fn start_watching(&self) -> bool {
        if !self.status.snapshot().watch_enabled {
            debug!("server has change watching disabled");
            return false;
        }
        lock(&self.watcher).retarget(self.session());
        true
    }

    pub fn stop_watching(&self) {
        lock(&self.watcher).stop();
    }

    pub fn is_watching(&self) -> bool {
        lock(&self.watcher).is_running()
    }

    // ----- commits -----

    pub async fn load_commits(&self) -> SessionResult<CommitHistory> {
        let mut selector = self.state.commits.lock().await;
        Ok(selector.load_first_page().await?.clone())
    }

    pub async fn load_more_commits(&self) -> SessionResult<CommitHistory> {
        let mut selector = self.state.commits.lock().await;
        Ok(selector.load_more().await?.clone())
    }

    pub async fn commit_history(&self) -> CommitHistory {
        self.state.commits.lock().await.history().clone()
    }

    /// Row of the commit the loaded changeset shows, if any.
    pub async fn selected_commit_index(&self) -> Option<usize> {
        let args = self.current_args();
        self.state.commits.lock().await.selected_index(&args)
    }

    pub async fn select_working_changes(&self) -> ReloadOutcome {
        commits::select_working_changes(&self.coordinator).await
    }

    pub async fn select_commit(&self, hash: &str) -> ReloadOutcome {
        commits::select_commit(&self.coordinator, hash).await
    }

    // ----- preferences -----

    pub fn preferences(&self) -> FileListPreferences {
        lock(&self.preferences).get()
    }

    pub fn set_preferences(&self, prefs: FileListPreferences) {
        lock(&self.preferences).set(prefs);
    }

    // ----- repositories -----

    pub fn repos(&self) -> Vec<RepoEntry> {
        lock(&self.repos).clone()
    }

    /// Moves the session to another repository of the same server.
    ///
    /// Refused while a reload runs; reloads triggered during the switch are
    /// ignored. On failure the previous repository stays loaded and polled.
    #[instrument(skip(self))]
    pub async fn switch_repo(&self, label: &str) -> SessionResult<()> {
        let target = lock(&self.repos)
            .iter()
            .position(|r| r.label == label)
            .map(SessionId)
            .ok_or_else(|| SessionError::NotFound(format!("repository '{label}'")))?;

        let Some(_hold) = self.coordinator.hold() else {
            warn!("reload in flight; refusing repository switch");
            return Err(SessionError::Busy("reload"));
        };

        let was_watching = self.is_watching();
        self.stop_watching();

        if let Err(e) = self.state.load(target, Some(Vec::new())).await {
            warn!(error = %e, "switching repository failed");
            if was_watching {
                lock(&self.watcher).retarget(self.session());
            }
            return Err(e);
        }

        self.coordinator.set_session(target);
        *lock(&self.label) = label.to_string();
        *lock(&self.preferences) = DisplayPreferences::load(self.store.clone(), label);
        self.status.mark_fresh_load();
        info!(session = %target, "switched repository");

        // The poller keeps `watch_enabled` current, so polling follows
        // the switch even if the last answer had watching disabled.
        if was_watching {
            lock(&self.watcher).retarget(target);
        }
        Ok(())
    }

    /// Raw-content preview of a working-tree file. Never cached.
    pub async fn file_content(&self, path: &str) -> SessionResult<FileContentPreview> {
        self.server.file_content(self.session(), path).await
    }

    pub async fn validate_repo(&self, label: &str, path: &str) -> SessionResult<RepoValidation> {
        self.require_repo_management()?;
        self.server.validate_repo(label, path).await
    }

    /// Replaces the server's repository list and adopts the accepted one.
    pub async fn update_repos(&self, repos: &[RepoEntry]) -> SessionResult<Vec<RepoEntry>> {
        self.require_repo_management()?;
        let accepted = self.server.update_repos(repos).await?;
        *lock(&self.repos) = accepted.clone();
        Ok(accepted)
    }

    fn require_repo_management(&self) -> SessionResult<()> {
        if self.config.manage_repos_enabled {
            Ok(())
        } else {
            Err(ConfigError::FeatureDisabled("repository management").into())
        }
    }
}

impl Drop for DiffSession {
    fn drop(&mut self) {
        self.stop_watching();
    }
}
