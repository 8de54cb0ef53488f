//! Per-repository display preferences persisted as small JSON files.
//!
//! Reads happen once when a [`DisplayPreferences`] is created; every setter
//! writes through. Storage problems never reach the caller: a missing or
//! malformed file yields defaults and a failed write is logged.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

const KEY_PREFIX: &str = "webdiff-file-prefs-";
const APP_DIR_NAME: &str = "webdiff";

/// Which file categories the file list shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FileListPreferences {
    pub show_changed: bool,
    pub show_untracked: bool,
    pub show_gitignored: bool,
}

impl Default for FileListPreferences {
    fn default() -> Self {
        Self {
            show_changed: true,
            show_untracked: true,
            show_gitignored: false,
        }
    }
}

/// Namespaced storage key for a repository label.
pub fn preference_key(label: &str) -> String {
    let sanitized: String = label
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("{KEY_PREFIX}{sanitized}")
}

/// Default directory: `<config dir>/webdiff`, falling back to the home
/// directory and then the working directory.
pub fn default_preferences_dir() -> PathBuf {
    dirs::config_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR_NAME)
}

/// Directory-backed key/value store of preference blobs.
#[derive(Debug, Clone)]
pub struct PreferenceStore {
    dir: PathBuf,
}

impl PreferenceStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, label: &str) -> PathBuf {
        self.dir.join(format!("{}.json", preference_key(label)))
    }

    /// Stored preferences for `label`, or defaults.
    pub fn load(&self, label: &str) -> FileListPreferences {
        let path = self.path_for(label);
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "no stored preferences; using defaults");
                return FileListPreferences::default();
            }
        };
        match serde_json::from_str(&raw) {
            Ok(prefs) => prefs,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "malformed preferences; using defaults");
                FileListPreferences::default()
            }
        }
    }

    /// Writes `prefs` for `label`. Returns whether the write succeeded;
    /// failures are logged, never raised.
    pub fn save(&self, label: &str, prefs: &FileListPreferences) -> bool {
        let path = self.path_for(label);
        let result = fs::create_dir_all(&self.dir)
            .map_err(|e| e.to_string())
            .and_then(|_| serde_json::to_string(prefs).map_err(|e| e.to_string()))
            .and_then(|json| fs::write(&path, json).map_err(|e| e.to_string()));

        match result {
            Ok(()) => {
                debug!(path = %path.display(), "preferences saved");
                true
            }
            Err(error) => {
                warn!(path = %path.display(), %error, "failed to persist preferences");
                false
            }
        }
    }
}

/// Preferences of one repository label, loaded once and written on change.
#[derive(Debug, Clone)]
pub struct DisplayPreferences {
    store: PreferenceStore,
    label: String,
    current: FileListPreferences,
}

impl DisplayPreferences {
    pub fn load(store: PreferenceStore, label: impl Into<String>) -> Self {
        let label = label.into();
        let current = store.load(&label);
        Self {
            store,
            label,
            current,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn get(&self) -> FileListPreferences {
        self.current
    }

    pub fn set(&mut self, prefs: FileListPreferences) {
        self.current = prefs;
        self.store.save(&self.label, &self.current);
    }

    pub fn set_show_changed(&mut self, show: bool) {
        self.set(FileListPreferences {
            show_changed: show,
            ..self.current
        });
    }

    pub fn set_show_untracked(&mut self, show: bool) {
        self.set(FileListPreferences {
            show_untracked: show,
            ..self.current
        });
    }

    pub fn set_show_gitignored(&mut self, show: bool) {
        self.set(FileListPreferences {
            show_gitignored: show,
            ..self.current
        });
    }
}
