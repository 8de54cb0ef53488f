//! Transport seam between the session engine and the webdiff server.
//!
//! [`DiffServer`] is the provider interface every component talks to. It uses
//! boxed futures instead of async-trait so it stays object safe and can be
//! shared as `Arc<dyn DiffServer>`. [`http::HttpDiffServer`] is the real
//! `reqwest` implementation; tests plug in in-memory fakes.

pub mod http;
pub mod types;

pub use http::HttpDiffServer;
pub use types::*;

use std::{future::Future, pin::Pin};

use crate::errors::SessionResult;

/// Boxed future returned by every [`DiffServer`] operation.
pub type ServerFuture<'a, T> = Pin<Box<dyn Future<Output = SessionResult<T>> + Send + 'a>>;

/// Parameters of one per-file fetch.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FileRequest {
    pub index: FileIndexRef,
    /// Ordered diff flags, see [`crate::options::DiffOptions::to_flags`].
    pub flags: Vec<String>,
    pub normalize_json: bool,
    /// Ask the server for the full payload even when lines are very long.
    pub no_truncate: bool,
}

/// Endpoints of the webdiff server consumed by the engine.
pub trait DiffServer: Send + Sync {
    /// Metadata, both contents and diff operations of one file.
    fn file_data<'a>(
        &'a self,
        session: SessionId,
        request: &'a FileRequest,
    ) -> ServerFuture<'a, UnifiedFileData>;

    /// Whether the on-disk changeset differs from the loaded one.
    fn diff_changed(&self, session: SessionId) -> ServerFuture<'_, ChangeStatus>;

    /// Blocking recomputation of the changeset. `None` keeps the current
    /// comparison arguments; `Some(&[])` means working-tree changes.
    fn reload<'a>(
        &'a self,
        session: SessionId,
        git_args: Option<&'a [String]>,
    ) -> ServerFuture<'a, ReloadResponse>;

    /// One page of commit history.
    fn commits(&self, session: SessionId, limit: u32, offset: u32)
    -> ServerFuture<'_, CommitsResponse>;

    /// Bulk listing of changed, untracked and ignored files.
    fn files(&self, session: SessionId) -> ServerFuture<'_, FileListing>;

    /// Raw-content preview of a working-tree file. Never cached.
    fn file_content<'a>(
        &'a self,
        session: SessionId,
        path: &'a str,
    ) -> ServerFuture<'a, FileContentPreview>;

    /// Checks whether a repository could be added to the server.
    fn validate_repo<'a>(&'a self, label: &'a str, path: &'a str)
    -> ServerFuture<'a, RepoValidation>;

    /// Replaces the server's repository list; returns the accepted list.
    fn update_repos<'a>(&'a self, repos: &'a [RepoEntry]) -> ServerFuture<'a, Vec<RepoEntry>>;
}
