//! Unified per-file fetcher: one round trip per file diff.

use std::sync::Arc;

use tracing::{debug, instrument};

use crate::errors::{SessionError, SessionResult};
use crate::server::{DiffServer, FileIndexRef, FileRequest, SessionId, UnifiedFileData};

/// Fetches [`UnifiedFileData`] for files of one loaded changeset.
///
/// Bound to the changeset's file count: indices outside it fail with
/// [`SessionError::NotFound`] without touching the network.
#[derive(Clone)]
pub struct UnifiedFileFetcher {
    server: Arc<dyn DiffServer>,
    session: SessionId,
    file_count: usize,
}

impl UnifiedFileFetcher {
    pub fn new(server: Arc<dyn DiffServer>, session: SessionId, file_count: usize) -> Self {
        Self {
            server,
            session,
            file_count,
        }
    }

    pub fn session(&self) -> SessionId {
        self.session
    }

    pub fn file_count(&self) -> usize {
        self.file_count
    }

    /// Fetches metadata, both contents and diff operations of one file.
    ///
    /// With `no_truncate = false` the server may answer with a truncated
    /// payload (see [`UnifiedFileData::truncation`]); repeating the call with
    /// `no_truncate = true` is the only way to get the full content.
    #[instrument(skip(self, flags), fields(session = %self.session))]
    pub async fn fetch(
        &self,
        index: FileIndexRef,
        flags: &[String],
        normalize_json: bool,
        no_truncate: bool,
    ) -> SessionResult<UnifiedFileData> {
        if index >= self.file_count {
            return Err(SessionError::NotFound(format!(
                "file index {index} (changeset has {} files)",
                self.file_count
            )));
        }

        let request = FileRequest {
            index,
            flags: flags.to_vec(),
            normalize_json,
            no_truncate,
        };
        let data = self.server.file_data(self.session, &request).await?;

        if data.idx != index {
            return Err(SessionError::Decode(format!(
                "asked for file {index}, server answered for file {}",
                data.idx
            )));
        }

        if let Some(notice) = data.truncation() {
            debug!(
                lines = notice.lines,
                bytes = notice.bytes,
                "server truncated file payload"
            );
        }

        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::*;
    use crate::errors::TransportError;
    use crate::test_support::FakeServer;

    fn fetcher(server: &Arc<FakeServer>, files: usize) -> UnifiedFileFetcher {
        UnifiedFileFetcher::new(server.clone(), SessionId(0), files)
    }

    #[tokio::test]
    async fn out_of_range_index_is_not_found_without_request() {
        let server = Arc::new(FakeServer::with_files(2));
        let err = fetcher(&server, 2)
            .fetch(2, &[], false, false)
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::NotFound(_)));
        assert_eq!(server.file_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn passes_flags_and_switches_through() {
        let server = Arc::new(FakeServer::with_files(3));
        let flags = vec!["-w".to_string(), "-U5".to_string()];
        fetcher(&server, 3)
            .fetch(1, &flags, true, false)
            .await
            .unwrap();

        let requests = server.file_requests.lock().unwrap();
        assert_eq!(
            requests[0],
            FileRequest {
                index: 1,
                flags,
                normalize_json: true,
                no_truncate: false,
            }
        );
    }

    #[tokio::test]
    async fn truncated_payload_then_full_payload_on_override() {
        let server = Arc::new(FakeServer::with_files(3));
        server.long_line_files.lock().unwrap().insert(2);
        let f = fetcher(&server, 3);

        let truncated = f.fetch(2, &[], false, false).await.unwrap();
        let notice = truncated.truncation().expect("payload should be truncated");
        assert!(notice.lines > 0 && notice.bytes > 0);
        assert!(truncated.content_a.is_none() && truncated.content_b.is_none());

        let full = f.fetch(2, &[], false, true).await.unwrap();
        assert!(full.truncation().is_none());
        assert!(full.content_b.as_deref().unwrap().len() > 1000);
        assert!(!full.diff_ops.is_empty());
    }

    #[tokio::test]
    async fn transport_failure_is_surfaced() {
        let server = Arc::new(FakeServer::with_files(1));
        server.fail_file_data.store(true, Ordering::SeqCst);
        let err = fetcher(&server, 1)
            .fetch(0, &[], false, false)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SessionError::Transport(TransportError::Network(_))
        ));
    }
}
