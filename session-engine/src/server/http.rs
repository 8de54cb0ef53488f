//! `reqwest` implementation of [`DiffServer`].
//!
//! Endpoints used:
//!   * GET  /file/{session}/{index}?options=..&normalize_json=..&no_truncate=..
//!   * GET  /api/diff-changed/{session}
//!   * POST /api/server-reload/{session}
//!   * GET  /api/commits/{session}?limit=..&offset=..
//!   * GET  /api/files/{session}
//!   * GET  /api/file-content/{session}?path=..
//!   * POST /api/repos/validate
//!   * POST /api/repos/update

use std::time::Duration;

use reqwest::{Client, RequestBuilder, Response, StatusCode, header};
use serde::de::DeserializeOwned;
use tracing::{debug, instrument, warn};

use crate::errors::{SessionError, SessionResult, TransportError, make_snippet};
use crate::server::types::*;
use crate::server::{DiffServer, FileRequest, ServerFuture};

/// HTTP client for one webdiff server.
#[derive(Debug, Clone)]
pub struct HttpDiffServer {
    http: Client,
    base: String,
}

impl HttpDiffServer {
    /// Builds a client for `base_url` (e.g. `http://localhost:8000`).
    ///
    /// `timeout` bounds every request, including the blocking reload, so it
    /// should be generous.
    pub fn new(base_url: &str, timeout: Duration) -> SessionResult<Self> {
        crate::errors::validate_http_endpoint("base_url", base_url.trim())?;

        let http = Client::builder()
            .user_agent(concat!("session-engine/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .gzip(true)
            .build()?;

        let base = base_url.trim().trim_end_matches('/').to_string();
        debug!("Creating HttpDiffServer with base={}", base);
        Ok(Self { http, base })
    }

    pub fn base_url(&self) -> &str {
        &self.base
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    #[instrument(skip_all, fields(session = %session, index = request.index, no_truncate = request.no_truncate))]
    async fn get_file_data(
        &self,
        session: SessionId,
        request: &FileRequest,
    ) -> SessionResult<UnifiedFileData> {
        let url = self.url(&format!("/file/{}/{}", session, request.index));
        debug!("GET {}", url);

        let mut query: Vec<(&str, String)> = vec![
            ("normalize_json", request.normalize_json.to_string()),
            ("no_truncate", u8::from(request.no_truncate).to_string()),
        ];
        if !request.flags.is_empty() {
            query.push(("options", request.flags.join(",")));
        }

        let resp = self.http.get(&url).query(&query).send().await?;

        // The server answers 400 for an index outside its file list.
        if matches!(resp.status(), StatusCode::BAD_REQUEST | StatusCode::NOT_FOUND) {
            let body = resp.text().await.unwrap_or_default();
            debug!(snippet = %make_snippet(&body), "file index rejected by server");
            return Err(SessionError::NotFound(format!("file index {}", request.index)));
        }

        decode_json(resp, &url).await
    }

    #[instrument(skip_all, fields(session = %session))]
    async fn get_diff_changed(&self, session: SessionId) -> SessionResult<ChangeStatus> {
        let url = self.url(&format!("/api/diff-changed/{}", session));
        debug!("GET {}", url);

        let req = self
            .http
            .get(&url)
            .header(header::CACHE_CONTROL, "no-cache");
        send_json(req, &url).await
    }

    #[instrument(skip_all, fields(session = %session, override_args = git_args.is_some()))]
    async fn post_reload(
        &self,
        session: SessionId,
        git_args: Option<&[String]>,
    ) -> SessionResult<ReloadResponse> {
        let url = self.url(&format!("/api/server-reload/{}", session));
        debug!("POST {} git_args={:?}", url, git_args);

        let mut req = self.http.post(&url);
        if let Some(git_args) = git_args {
            req = req.json(&ReloadRequest { git_args });
        }

        let resp = req.send().await?;
        if resp.status().is_success() {
            return decode_json(resp, &url).await;
        }

        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        match serde_json::from_str::<ReloadResponse>(&body) {
            Ok(ReloadResponse {
                error: Some(reason),
                ..
            }) => Err(SessionError::ServerReported(reason)),
            _ => Err(http_status(status, &url, &body)),
        }
    }

    #[instrument(skip_all, fields(session = %session, limit = limit, offset = offset))]
    async fn get_commits(
        &self,
        session: SessionId,
        limit: u32,
        offset: u32,
    ) -> SessionResult<CommitsResponse> {
        let url = self.url(&format!("/api/commits/{}", session));
        debug!("GET {} limit={} offset={}", url, limit, offset);

        let req = self
            .http
            .get(&url)
            .query(&[("limit", limit), ("offset", offset)]);
        send_json(req, &url).await
    }

    #[instrument(skip_all, fields(session = %session))]
    async fn get_files(&self, session: SessionId) -> SessionResult<FileListing> {
        let url = self.url(&format!("/api/files/{}", session));
        debug!("GET {}", url);
        send_json(self.http.get(&url), &url).await
    }

    #[instrument(skip_all, fields(session = %session, path = path))]
    async fn get_file_content(
        &self,
        session: SessionId,
        path: &str,
    ) -> SessionResult<FileContentPreview> {
        let url = self.url(&format!("/api/file-content/{}", session));
        debug!("GET {} path={}", url, path);
        send_json(self.http.get(&url).query(&[("path", path)]), &url).await
    }

    #[instrument(skip_all, fields(label = label))]
    async fn post_validate_repo(&self, label: &str, path: &str) -> SessionResult<RepoValidation> {
        let url = self.url("/api/repos/validate");
        debug!("POST {} label={} path={}", url, label, path);

        let body = RepoEntry {
            label: label.to_string(),
            path: path.to_string(),
        };
        let resp = self.http.post(&url).json(&body).send().await?;
        let status = resp.status();
        let text = resp.text().await?;

        // Rejections (including "management disabled") still carry a
        // well-formed validation body.
        match serde_json::from_str::<RepoValidation>(&text) {
            Ok(v) => Ok(v),
            Err(_) if !status.is_success() => Err(http_status(status, &url, &text)),
            Err(e) => Err(e.into()),
        }
    }

    #[instrument(skip_all, fields(count = repos.len()))]
    async fn post_update_repos(&self, repos: &[RepoEntry]) -> SessionResult<Vec<RepoEntry>> {
        let url = self.url("/api/repos/update");
        debug!("POST {} count={}", url, repos.len());

        let resp = self
            .http
            .post(&url)
            .json(&serde_json::json!({ "repos": repos }))
            .send()
            .await?;
        let status = resp.status();
        let text = resp.text().await?;

        match serde_json::from_str::<UpdateReposResponse>(&text) {
            Ok(r) if r.success => Ok(r.repos),
            Ok(r) => Err(SessionError::ServerReported(
                r.error.unwrap_or_else(|| "repository update rejected".to_string()),
            )),
            Err(_) if !status.is_success() => Err(http_status(status, &url, &text)),
            Err(e) => Err(e.into()),
        }
    }
}

impl DiffServer for HttpDiffServer {
    fn file_data<'a>(
        &'a self,
        session: SessionId,
        request: &'a FileRequest,
    ) -> ServerFuture<'a, UnifiedFileData> {
        Box::pin(self.get_file_data(session, request))
    }

    fn diff_changed(&self, session: SessionId) -> ServerFuture<'_, ChangeStatus> {
        Box::pin(self.get_diff_changed(session))
    }

    fn reload<'a>(
        &'a self,
        session: SessionId,
        git_args: Option<&'a [String]>,
    ) -> ServerFuture<'a, ReloadResponse> {
        Box::pin(self.post_reload(session, git_args))
    }

    fn commits(
        &self,
        session: SessionId,
        limit: u32,
        offset: u32,
    ) -> ServerFuture<'_, CommitsResponse> {
        Box::pin(self.get_commits(session, limit, offset))
    }

    fn files(&self, session: SessionId) -> ServerFuture<'_, FileListing> {
        Box::pin(self.get_files(session))
    }

    fn file_content<'a>(
        &'a self,
        session: SessionId,
        path: &'a str,
    ) -> ServerFuture<'a, FileContentPreview> {
        Box::pin(self.get_file_content(session, path))
    }

    fn validate_repo<'a>(
        &'a self,
        label: &'a str,
        path: &'a str,
    ) -> ServerFuture<'a, RepoValidation> {
        Box::pin(self.post_validate_repo(label, path))
    }

    fn update_repos<'a>(&'a self, repos: &'a [RepoEntry]) -> ServerFuture<'a, Vec<RepoEntry>> {
        Box::pin(self.post_update_repos(repos))
    }
}

/// Sends the request and decodes a JSON body, mapping non-2xx statuses.
async fn send_json<T: DeserializeOwned>(req: RequestBuilder, url: &str) -> SessionResult<T> {
    let resp = req.send().await?;
    decode_json(resp, url).await
}

async fn decode_json<T: DeserializeOwned>(resp: Response, url: &str) -> SessionResult<T> {
    let status = resp.status();
    if status == StatusCode::NOT_FOUND {
        return Err(SessionError::NotFound(url.to_string()));
    }
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(http_status(status, url, &body));
    }

    let text = resp.text().await?;
    serde_json::from_str(&text).map_err(|e| {
        warn!(url, error = %e, "unexpected response shape");
        SessionError::Decode(format!("{url}: {e}"))
    })
}

fn http_status(status: StatusCode, url: &str, body: &str) -> SessionError {
    SessionError::Transport(TransportError::HttpStatus {
        status: status.as_u16(),
        url: url.to_string(),
        snippet: make_snippet(body),
    })
}
