//! Wire data model for the webdiff JSON endpoints.

use std::fmt;

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

/// Identity of the changeset being viewed (the server's repository index).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct SessionId(pub usize);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Position of one file pair within the loaded changeset's file list.
///
/// Only meaningful for the changeset it was obtained from; any successful
/// reload invalidates every index.
pub type FileIndexRef = usize;

/// Kind of a diff operation, as produced by the server's diff engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiffOpKind {
    Equal,
    Replace,
    Insert,
    Delete,
    Skip,
}

/// One diff operation over half-open line ranges of both sides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffOp {
    #[serde(rename = "type")]
    pub kind: DiffOpKind,
    pub before: (u32, u32),
    pub after: (u32, u32),
}

/// Full per-file metadata ("thick" file pair).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ThickFileInfo {
    /// Path on the left side, if present.
    #[serde(default)]
    pub a: Option<String>,
    /// Path on the right side, if present.
    #[serde(default)]
    pub b: Option<String>,
    /// Change kind reported by the server (`add`, `delete`, `change`, `move`).
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub num_add: Option<u32>,
    #[serde(default)]
    pub num_delete: Option<u32>,
    #[serde(default)]
    pub is_image_diff: bool,
    /// Fields this client does not interpret, kept for renderers.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Everything needed to render one file diff, fetched in one round trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnifiedFileData {
    pub idx: FileIndexRef,
    pub thick: ThickFileInfo,
    #[serde(default)]
    pub truncated: bool,
    #[serde(default)]
    pub truncated_lines: u64,
    #[serde(default)]
    pub truncated_bytes: u64,
    /// Left-side content; absent for missing sides, `None` when truncated.
    #[serde(default)]
    pub content_a: Option<String>,
    #[serde(default)]
    pub content_b: Option<String>,
    #[serde(default)]
    pub diff_ops: Vec<DiffOp>,
    /// Set when the server returned contents but failed to compute the diff.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diff_error: Option<String>,
}

/// Summary of a truncated payload, shown to the user with a "render anyway"
/// affordance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TruncationNotice {
    pub lines: u64,
    pub bytes: u64,
}

impl UnifiedFileData {
    /// Returns the truncation summary when the server elided content.
    pub fn truncation(&self) -> Option<TruncationNotice> {
        self.truncated.then_some(TruncationNotice {
            lines: self.truncated_lines,
            bytes: self.truncated_bytes,
        })
    }
}

/// Response of the change-detection endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ChangeStatus {
    #[serde(default)]
    pub changed: bool,
    #[serde(default)]
    pub watch_enabled: bool,
}

/// Optional body of the reload request.
#[derive(Debug, Clone, Serialize)]
pub(crate) struct ReloadRequest<'a> {
    pub git_args: &'a [String],
}

/// Response of the reload endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ReloadResponse {
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

/// One commit in the history list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitRef {
    pub hash: String,
    pub short_hash: String,
    pub message: String,
    pub author: String,
    /// ISO 8601 author date.
    pub date: String,
    /// Human-readable age computed by the server ("3d ago").
    pub relative: String,
}

impl CommitRef {
    /// Parses the author date; `None` when the server sent a non-ISO value.
    pub fn authored_at(&self) -> Option<DateTime<FixedOffset>> {
        DateTime::parse_from_rfc3339(&self.date).ok()
    }
}

/// Raw response of the commit history endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CommitsResponse {
    #[serde(default)]
    pub commits: Vec<CommitRef>,
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub has_more: bool,
}

/// "Thin" file entry of the bulk listing.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FileInfo {
    pub path: String,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Bulk listing of the loaded changeset and side categories.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FileListing {
    #[serde(default)]
    pub changed: Vec<FileInfo>,
    #[serde(default)]
    pub untracked: Vec<FileInfo>,
    #[serde(default)]
    pub gitignored: Vec<FileInfo>,
}

/// Raw-content preview of one working-tree file.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FileContentPreview {
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub is_binary: bool,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub error: Option<String>,
}

/// A repository the server serves, addressed by its unique label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoEntry {
    pub label: String,
    pub path: String,
}

/// Result of validating a candidate repository on the server.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RepoValidation {
    pub valid: bool,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Response of the repository list replacement endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub(crate) struct UpdateReposResponse {
    pub success: bool,
    #[serde(default)]
    pub repos: Vec<RepoEntry>,
    #[serde(default)]
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_truncated_payload_without_contents() {
        let raw = r#"{
            "idx": 3,
            "thick": {"a": "src/lib.rs", "b": "src/lib.rs", "type": "change", "num_add": 2},
            "truncated": true,
            "truncated_lines": 4,
            "truncated_bytes": 9120,
            "content_a": null,
            "content_b": null,
            "diff_ops": []
        }"#;
        let data: UnifiedFileData = serde_json::from_str(raw).expect("valid payload");
        assert_eq!(
            data.truncation(),
            Some(TruncationNotice {
                lines: 4,
                bytes: 9120
            })
        );
        assert_eq!(data.thick.num_add, Some(2));
        assert!(data.content_a.is_none());
    }

    #[test]
    fn parses_diff_ops_and_keeps_unknown_thick_fields() {
        let raw = r#"{
            "idx": 0,
            "thick": {"a": null, "b": "img.png", "type": "add", "is_image_diff": true,
                      "image_b": {"width": 10, "height": 20}},
            "content_a": null,
            "content_b": "Binary file (120 bytes)",
            "diff_ops": [{"type": "insert", "before": [0, 0], "after": [0, 1]}]
        }"#;
        let data: UnifiedFileData = serde_json::from_str(raw).expect("valid payload");
        assert!(!data.truncated);
        assert_eq!(data.diff_ops[0].kind, DiffOpKind::Insert);
        assert_eq!(data.diff_ops[0].after, (0, 1));
        assert!(data.thick.extra.contains_key("image_b"));
    }

    #[test]
    fn commit_date_parses_as_timestamp() {
        let c = CommitRef {
            hash: "abc123".into(),
            short_hash: "abc".into(),
            message: "m".into(),
            author: "a".into(),
            date: "2024-05-01T10:20:30+02:00".into(),
            relative: "1y ago".into(),
        };
        assert!(c.authored_at().is_some());
    }
}
