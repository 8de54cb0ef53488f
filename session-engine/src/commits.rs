//! Commit history and single-commit selection.
//!
//! A single commit is viewed by reloading the server with the range
//! `<hash>^..<hash>`; working-tree changes are an empty argument list. Any
//! other argument list (for example an explicit `A..B` range) is not
//! recognized and renders as "nothing selected".

use std::collections::HashSet;
use std::sync::{Arc, LazyLock};

use regex::Regex;
use tracing::{debug, instrument, warn};

use crate::errors::SessionResult;
use crate::reload::{ReloadCoordinator, ReloadOutcome};
use crate::server::{CommitRef, DiffServer, SessionId};

pub const DEFAULT_PAGE_SIZE: u32 = 25;

static SINGLE_COMMIT: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^([0-9a-fA-F]{4,64})\^\.\.([0-9a-fA-F]{4,64})$").ok());

/// Returns the commit the current comparison arguments select, if they are
/// exactly one single-commit range with matching endpoints.
pub fn parse_selection(args: &[String]) -> Option<String> {
    let [only] = args else {
        return None;
    };
    let re = SINGLE_COMMIT.as_ref()?;
    let caps = re.captures(only.trim())?;
    let (from, to) = (caps.get(1)?.as_str(), caps.get(2)?.as_str());
    from.eq_ignore_ascii_case(to).then(|| from.to_string())
}

/// Comparison arguments that view exactly `hash`.
pub fn encode_selection(hash: &str) -> Vec<String> {
    vec![format!("{hash}^..{hash}")]
}

/// Whether `commit` is the highlighted row for `selected`.
///
/// Matches on equality or either value being a prefix of the other, so short
/// and full hashes compare equal.
pub fn is_selected(commit: &str, selected: &str) -> bool {
    if commit.is_empty() || selected.is_empty() {
        return false;
    }
    let c = commit.to_ascii_lowercase();
    let s = selected.to_ascii_lowercase();
    c == s || c.starts_with(&s) || s.starts_with(&c)
}

/// One page as returned by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitPage {
    pub commits: Vec<CommitRef>,
    pub has_more: bool,
    pub offset: u32,
    pub branch: Option<String>,
}

impl CommitPage {
    /// Offset right after this page, clamped at `u32::MAX`.
    fn end_offset(&self) -> u32 {
        let len = u32::try_from(self.commits.len()).unwrap_or(u32::MAX);
        self.offset.saturating_add(len)
    }
}

/// History accumulated for the current changeset identity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitHistory {
    pub commits: Vec<CommitRef>,
    pub branch: Option<String>,
    pub has_more: bool,
    pub next_offset: u32,
}

impl CommitHistory {
    /// Row of the commit selected by `args`, if it is loaded.
    pub fn selected_index(&self, args: &[String]) -> Option<usize> {
        let selected = parse_selection(args)?;
        self.commits
            .iter()
            .position(|c| is_selected(&c.hash, &selected))
    }

    fn replace(&mut self, page: &CommitPage) {
        self.commits = page.commits.clone();
        self.branch = page.branch.clone();
        self.has_more = page.has_more;
        self.next_offset = page.end_offset();
    }

    fn append(&mut self, page: &CommitPage) {
        let mut seen: HashSet<String> = self.commits.iter().map(|c| c.hash.clone()).collect();
        let mut duplicates = 0usize;
        for commit in &page.commits {
            if seen.insert(commit.hash.clone()) {
                self.commits.push(commit.clone());
            } else {
                duplicates += 1;
            }
        }
        if duplicates > 0 {
            warn!(
                duplicates,
                offset = page.offset,
                "dropped commits already in history"
            );
        }
        if page.branch.is_some() {
            self.branch = page.branch.clone();
        }
        self.has_more = page.has_more;
        self.next_offset = self.next_offset.max(page.end_offset());
    }
}

/// Paginated commit history of one changeset identity.
pub struct CommitSelector {
    server: Arc<dyn DiffServer>,
    session: SessionId,
    page_size: u32,
    history: CommitHistory,
}

impl CommitSelector {
    pub fn new(server: Arc<dyn DiffServer>, session: SessionId, page_size: u32) -> Self {
        Self {
            server,
            session,
            page_size: page_size.max(1),
            history: CommitHistory::default(),
        }
    }

    pub fn session(&self) -> SessionId {
        self.session
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    pub fn history(&self) -> &CommitHistory {
        &self.history
    }

    /// Fetches one page. `offset = 0` replaces the accumulated history,
    /// any other offset appends to it.
    #[instrument(skip(self), fields(session = %self.session))]
    pub async fn fetch_page(&mut self, offset: u32, limit: u32) -> SessionResult<CommitPage> {
        let resp = self.server.commits(self.session, limit, offset).await?;
        let page = CommitPage {
            commits: resp.commits,
            has_more: resp.has_more,
            offset,
            branch: resp.branch,
        };
        debug!(
            returned = page.commits.len(),
            has_more = page.has_more,
            "commit page loaded"
        );

        if offset == 0 {
            self.history.replace(&page);
        } else {
            self.history.append(&page);
        }
        Ok(page)
    }

    pub async fn load_first_page(&mut self) -> SessionResult<&CommitHistory> {
        self.fetch_page(0, self.page_size).await?;
        Ok(&self.history)
    }

    /// Fetches the next page; a no-op when the server reported no more.
    pub async fn load_more(&mut self) -> SessionResult<&CommitHistory> {
        if self.history.next_offset > 0 && !self.history.has_more {
            return Ok(&self.history);
        }
        let offset = self.history.next_offset;
        self.fetch_page(offset, self.page_size).await?;
        Ok(&self.history)
    }

    /// Forgets the history and binds to another identity.
    pub fn reset(&mut self, session: SessionId) {
        self.session = session;
        self.history = CommitHistory::default();
    }

    pub fn selected_index(&self, args: &[String]) -> Option<usize> {
        self.history.selected_index(args)
    }
}

/// Switches the view back to working-tree changes.
pub async fn select_working_changes(coordinator: &ReloadCoordinator) -> ReloadOutcome {
    coordinator.reload(Some(Vec::new())).await
}

/// Switches the view to the changes introduced by `hash`.
pub async fn select_commit(coordinator: &ReloadCoordinator, hash: &str) -> ReloadOutcome {
    coordinator.reload(Some(encode_selection(hash))).await
}
