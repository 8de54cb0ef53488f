//! In-memory [`DiffServer`] used by unit tests.

use std::collections::HashSet;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use tokio::sync::oneshot;

use crate::errors::{SessionError, TransportError};
use crate::server::*;
use crate::status::{StatusBoard, ViewStatus};

/// Scripted answer of the fake reload endpoint.
#[derive(Debug, Clone)]
pub(crate) enum ReloadScript {
    Success,
    /// 2xx body with `success: false`.
    Rejected(String),
    /// Non-2xx with a well-formed error body.
    Reported(String),
    Unreachable,
}

pub(crate) struct FakeServer {
    pub listing: Mutex<FileListing>,
    pub files_calls: AtomicUsize,
    pub fail_files: AtomicBool,

    pub file_calls: AtomicUsize,
    pub file_requests: Mutex<Vec<FileRequest>>,
    pub fail_file_data: AtomicBool,
    /// Indices whose content contains over-long lines.
    pub long_line_files: Mutex<HashSet<usize>>,

    pub change_status: Mutex<ChangeStatus>,
    pub status_calls: AtomicUsize,
    pub status_sessions: Mutex<Vec<SessionId>>,
    pub fail_status: AtomicBool,

    pub reload_calls: AtomicUsize,
    pub reload_args: Mutex<Vec<Option<Vec<String>>>>,
    pub reload_script: Mutex<ReloadScript>,
    pub reload_gate: Mutex<Option<oneshot::Receiver<()>>>,
    /// When set, the status seen at the moment the reload request is issued
    /// is recorded into `reload_observed`.
    pub observe: Mutex<Option<StatusBoard>>,
    pub reload_observed: Mutex<Vec<ViewStatus>>,

    pub commits: Mutex<Vec<CommitRef>>,
    pub commit_calls: AtomicUsize,
}

impl FakeServer {
    pub fn with_files(count: usize) -> Self {
        let changed = (0..count)
            .map(|i| FileInfo {
                path: format!("src/file_{i}.rs"),
                kind: Some("change".into()),
                ..FileInfo::default()
            })
            .collect();

        Self {
            listing: Mutex::new(FileListing {
                changed,
                untracked: vec![FileInfo {
                    path: "notes.txt".into(),
                    ..FileInfo::default()
                }],
                gitignored: Vec::new(),
            }),
            files_calls: AtomicUsize::new(0),
            fail_files: AtomicBool::new(false),
            file_calls: AtomicUsize::new(0),
            file_requests: Mutex::new(Vec::new()),
            fail_file_data: AtomicBool::new(false),
            long_line_files: Mutex::new(HashSet::new()),
            change_status: Mutex::new(ChangeStatus {
                changed: false,
                watch_enabled: true,
            }),
            status_calls: AtomicUsize::new(0),
            status_sessions: Mutex::new(Vec::new()),
            fail_status: AtomicBool::new(false),
            reload_calls: AtomicUsize::new(0),
            reload_args: Mutex::new(Vec::new()),
            reload_script: Mutex::new(ReloadScript::Success),
            reload_gate: Mutex::new(None),
            observe: Mutex::new(None),
            reload_observed: Mutex::new(Vec::new()),
            commits: Mutex::new(Vec::new()),
            commit_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_commits(self, count: usize) -> Self {
        *self.commits.lock().unwrap() = (0..count).map(commit).collect();
        self
    }

    pub fn set_file_count(&self, count: usize) {
        let mut listing = self.listing.lock().unwrap();
        listing.changed = (0..count)
            .map(|i| FileInfo {
                path: format!("src/other_{i}.rs"),
                ..FileInfo::default()
            })
            .collect();
    }

    fn payload(&self, request: &FileRequest) -> UnifiedFileData {
        let path = format!("src/file_{}.rs", request.index);
        let long = self
            .long_line_files
            .lock()
            .unwrap()
            .contains(&request.index);

        let thick = ThickFileInfo {
            a: Some(path.clone()),
            b: Some(path),
            kind: Some("change".into()),
            ..ThickFileInfo::default()
        };

        if long && !request.no_truncate {
            return UnifiedFileData {
                idx: request.index,
                thick,
                truncated: true,
                truncated_lines: 2,
                truncated_bytes: 1500,
                content_a: None,
                content_b: None,
                diff_ops: Vec::new(),
                diff_error: None,
            };
        }

        let wide = if long { "x".repeat(1000) } else { "x".into() };
        UnifiedFileData {
            idx: request.index,
            thick,
            truncated: false,
            truncated_lines: 0,
            truncated_bytes: 0,
            content_a: Some(format!("{wide}\nold\n")),
            content_b: Some(format!("{wide}\nnew\n")),
            diff_ops: vec![
                DiffOp {
                    kind: DiffOpKind::Equal,
                    before: (0, 1),
                    after: (0, 1),
                },
                DiffOp {
                    kind: DiffOpKind::Replace,
                    before: (1, 2),
                    after: (1, 2),
                },
            ],
            diff_error: None,
        }
    }
}

pub(crate) fn commit(i: usize) -> CommitRef {
    // Reversed so short hashes differ between commits.
    let hash: String = format!("{:040x}", 0xabc000 + i).chars().rev().collect();
    CommitRef {
        short_hash: hash[..7].to_string(),
        hash,
        message: format!("commit {i}"),
        author: "Dev".into(),
        date: "2024-01-01T00:00:00+00:00".into(),
        relative: "1y ago".into(),
    }
}

fn unreachable_error() -> SessionError {
    SessionError::Transport(TransportError::Network("connection refused".into()))
}

impl DiffServer for FakeServer {
    fn file_data<'a>(
        &'a self,
        _session: SessionId,
        request: &'a FileRequest,
    ) -> ServerFuture<'a, UnifiedFileData> {
        Box::pin(async move {
            self.file_calls.fetch_add(1, Ordering::SeqCst);
            self.file_requests.lock().unwrap().push(request.clone());
            if self.fail_file_data.load(Ordering::SeqCst) {
                return Err(unreachable_error());
            }
            Ok(self.payload(request))
        })
    }

    fn diff_changed(&self, session: SessionId) -> ServerFuture<'_, ChangeStatus> {
        Box::pin(async move {
            self.status_calls.fetch_add(1, Ordering::SeqCst);
            self.status_sessions.lock().unwrap().push(session);
            if self.fail_status.load(Ordering::SeqCst) {
                return Err(unreachable_error());
            }
            Ok(*self.change_status.lock().unwrap())
        })
    }

    fn reload<'a>(
        &'a self,
        _session: SessionId,
        git_args: Option<&'a [String]>,
    ) -> ServerFuture<'a, ReloadResponse> {
        Box::pin(async move {
            self.reload_calls.fetch_add(1, Ordering::SeqCst);
            self.reload_args
                .lock()
                .unwrap()
                .push(git_args.map(|a| a.to_vec()));
            if let Some(board) = self.observe.lock().unwrap().as_ref() {
                self.reload_observed.lock().unwrap().push(board.snapshot());
            }

            let gate = self.reload_gate.lock().unwrap().take();
            if let Some(gate) = gate {
                let _ = gate.await;
            }

            let script = self.reload_script.lock().unwrap().clone();
            match script {
                ReloadScript::Success => Ok(ReloadResponse {
                    success: true,
                    message: Some("reloaded".into()),
                    error: None,
                }),
                ReloadScript::Rejected(reason) => Ok(ReloadResponse {
                    success: false,
                    message: None,
                    error: Some(reason),
                }),
                ReloadScript::Reported(reason) => Err(SessionError::ServerReported(reason)),
                ReloadScript::Unreachable => Err(unreachable_error()),
            }
        })
    }

    fn commits(
        &self,
        _session: SessionId,
        limit: u32,
        offset: u32,
    ) -> ServerFuture<'_, CommitsResponse> {
        Box::pin(async move {
            self.commit_calls.fetch_add(1, Ordering::SeqCst);
            let all = self.commits.lock().unwrap();
            let start = (offset as usize).min(all.len());
            let end = (start + limit as usize).min(all.len());
            Ok(CommitsResponse {
                commits: all[start..end].to_vec(),
                branch: Some("main".into()),
                has_more: end < all.len(),
            })
        })
    }

    fn files(&self, _session: SessionId) -> ServerFuture<'_, FileListing> {
        Box::pin(async move {
            self.files_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_files.load(Ordering::SeqCst) {
                return Err(unreachable_error());
            }
            Ok(self.listing.lock().unwrap().clone())
        })
    }

    fn file_content<'a>(
        &'a self,
        _session: SessionId,
        path: &'a str,
    ) -> ServerFuture<'a, FileContentPreview> {
        Box::pin(async move {
            Ok(FileContentPreview {
                path: Some(path.to_string()),
                content: Some("preview".into()),
                ..FileContentPreview::default()
            })
        })
    }

    fn validate_repo<'a>(
        &'a self,
        label: &'a str,
        path: &'a str,
    ) -> ServerFuture<'a, RepoValidation> {
        Box::pin(async move {
            Ok(RepoValidation {
                valid: path.starts_with('/'),
                label: Some(label.to_string()),
                path: Some(path.to_string()),
                error: (!path.starts_with('/')).then(|| "Path must be absolute".to_string()),
            })
        })
    }

    fn update_repos<'a>(&'a self, repos: &'a [RepoEntry]) -> ServerFuture<'a, Vec<RepoEntry>> {
        Box::pin(async move { Ok(repos.to_vec()) })
    }
}
