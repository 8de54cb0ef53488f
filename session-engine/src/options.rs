//! Diff option codec.
//!
//! [`DiffOptions`] is an immutable snapshot of the user's diff settings. It
//! converts to and from a URL-safe query fragment (defaults omitted) and to
//! the ordered flag list the per-file fetch endpoint accepts. The flag order
//! is fixed so that cache keys built from it are stable.

use std::fmt;
use std::str::FromStr;

use tracing::debug;

/// Default display width (columns) of one side of a diff.
pub const DEFAULT_MAX_DIFF_WIDTH: u32 = 100;

const KEY_IGNORE_ALL_SPACE: &str = "w";
const KEY_IGNORE_SPACE_CHANGE: &str = "b";
const KEY_FUNCTION_CONTEXT: &str = "W";
const KEY_NO_RENAMES: &str = "no-renames";
const KEY_CONTEXT_LINES: &str = "U";
const KEY_ALGORITHM: &str = "algorithm";
const KEY_NORMALIZE_JSON: &str = "normalize_json";
const KEY_MAX_WIDTH: &str = "width";

/// Line-matching algorithm passed through to `git diff --diff-algorithm`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiffAlgorithm {
    Myers,
    Minimal,
    Patience,
    Histogram,
}

impl DiffAlgorithm {
    pub const ALL: [DiffAlgorithm; 4] = [
        DiffAlgorithm::Myers,
        DiffAlgorithm::Minimal,
        DiffAlgorithm::Patience,
        DiffAlgorithm::Histogram,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            DiffAlgorithm::Myers => "myers",
            DiffAlgorithm::Minimal => "minimal",
            DiffAlgorithm::Patience => "patience",
            DiffAlgorithm::Histogram => "histogram",
        }
    }
}

impl fmt::Display for DiffAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DiffAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DiffAlgorithm::ALL
            .into_iter()
            .find(|a| a.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown diff algorithm '{s}'"))
    }
}

/// Immutable diff settings snapshot.
///
/// Replace wholesale when the user changes a setting; builder-style `with_*`
/// methods return a new value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DiffOptions {
    /// `-w`: ignore all whitespace.
    pub ignore_all_space: bool,
    /// `-b`: ignore changes in amount of whitespace.
    pub ignore_space_change: bool,
    /// `-W`: show whole function as context.
    pub function_context: bool,
    /// `--no-renames`: turn off rename detection.
    pub no_renames: bool,
    /// `-U<n>`: lines of context; `None` keeps git's default.
    pub context_lines: Option<u32>,
    /// `--diff-algorithm=<algo>`; `None` keeps git's default.
    pub algorithm: Option<DiffAlgorithm>,
    /// Pretty-print JSON files before diffing. Sent as its own request
    /// parameter, never as a flag.
    pub normalize_json: bool,
    /// Display-only column limit; does not affect fetched data.
    pub max_diff_width: u32,
}

impl Default for DiffOptions {
    fn default() -> Self {
        Self {
            ignore_all_space: false,
            ignore_space_change: false,
            function_context: false,
            no_renames: false,
            context_lines: None,
            algorithm: None,
            normalize_json: false,
            max_diff_width: DEFAULT_MAX_DIFF_WIDTH,
        }
    }
}

impl DiffOptions {
    pub fn with_ignore_all_space(mut self, on: bool) -> Self {
        self.ignore_all_space = on;
        self
    }

    pub fn with_ignore_space_change(mut self, on: bool) -> Self {
        self.ignore_space_change = on;
        self
    }

    pub fn with_function_context(mut self, on: bool) -> Self {
        self.function_context = on;
        self
    }

    pub fn with_no_renames(mut self, on: bool) -> Self {
        self.no_renames = on;
        self
    }

    pub fn with_context_lines(mut self, lines: Option<u32>) -> Self {
        self.context_lines = lines;
        self
    }

    pub fn with_algorithm(mut self, algorithm: Option<DiffAlgorithm>) -> Self {
        self.algorithm = algorithm;
        self
    }

    pub fn with_normalize_json(mut self, on: bool) -> Self {
        self.normalize_json = on;
        self
    }

    pub fn with_max_diff_width(mut self, width: u32) -> Self {
        self.max_diff_width = width;
        self
    }

    /// Encodes into a query fragment (`w=1&U=5`), omitting default values.
    ///
    /// The empty string stands for all defaults.
    pub fn encode(&self) -> String {
        let mut pairs: Vec<(&str, String)> = Vec::new();

        if self.ignore_all_space {
            pairs.push((KEY_IGNORE_ALL_SPACE, "1".into()));
        }
        if self.ignore_space_change {
            pairs.push((KEY_IGNORE_SPACE_CHANGE, "1".into()));
        }
        if self.function_context {
            pairs.push((KEY_FUNCTION_CONTEXT, "1".into()));
        }
        if self.no_renames {
            pairs.push((KEY_NO_RENAMES, "1".into()));
        }
        if let Some(n) = self.context_lines {
            pairs.push((KEY_CONTEXT_LINES, n.to_string()));
        }
        if let Some(algo) = self.algorithm {
            pairs.push((KEY_ALGORITHM, algo.as_str().into()));
        }
        if self.normalize_json {
            pairs.push((KEY_NORMALIZE_JSON, "1".into()));
        }
        if self.max_diff_width != DEFAULT_MAX_DIFF_WIDTH {
            pairs.push((KEY_MAX_WIDTH, self.max_diff_width.to_string()));
        }

        pairs
            .into_iter()
            .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(&v)))
            .collect::<Vec<_>>()
            .join("&")
    }

    /// Decodes a query fragment produced by [`DiffOptions::encode`].
    ///
    /// Never fails: a leading `?` is accepted, unknown keys are ignored and
    /// missing or unparsable values take their defaults.
    pub fn decode(query: &str) -> Self {
        let mut out = DiffOptions::default();
        let query = query.trim().trim_start_matches('?');

        for pair in query.split('&').filter(|p| !p.is_empty()) {
            let (raw_key, raw_value) = pair.split_once('=').unwrap_or((pair, ""));
            let key = decode_component(raw_key);
            let value = decode_component(raw_value);

            match key.as_str() {
                KEY_IGNORE_ALL_SPACE => out.ignore_all_space = parse_flag(&value),
                KEY_IGNORE_SPACE_CHANGE => out.ignore_space_change = parse_flag(&value),
                KEY_FUNCTION_CONTEXT => out.function_context = parse_flag(&value),
                KEY_NO_RENAMES => out.no_renames = parse_flag(&value),
                KEY_CONTEXT_LINES => out.context_lines = value.parse().ok(),
                KEY_ALGORITHM => out.algorithm = value.parse().ok(),
                KEY_NORMALIZE_JSON => out.normalize_json = parse_flag(&value),
                KEY_MAX_WIDTH => {
                    out.max_diff_width = value.parse().unwrap_or(DEFAULT_MAX_DIFF_WIDTH)
                }
                other => debug!(key = other, "ignoring unknown diff option"),
            }
        }

        out
    }

    /// Ordered flag list for the per-file fetch endpoint.
    pub fn to_flags(&self) -> Vec<String> {
        let mut flags = Vec::new();
        if self.ignore_all_space {
            flags.push("-w".to_string());
        }
        if self.ignore_space_change {
            flags.push("-b".to_string());
        }
        if self.function_context {
            flags.push("-W".to_string());
        }
        if self.no_renames {
            flags.push("--no-renames".to_string());
        }
        if let Some(n) = self.context_lines {
            flags.push(format!("-U{n}"));
        }
        if let Some(algo) = self.algorithm {
            flags.push(format!("--diff-algorithm={algo}"));
        }
        flags
    }

    /// True when moving from `self` to `next` changes what the server
    /// returns, so every memoized file payload is stale.
    pub fn requires_refetch(&self, next: &DiffOptions) -> bool {
        self.to_flags() != next.to_flags() || self.normalize_json != next.normalize_json
    }
}

fn decode_component(raw: &str) -> String {
    let raw = raw.replace('+', " ");
    urlencoding::decode(&raw)
        .map(|c| c.into_owned())
        .unwrap_or(raw)
}

fn parse_flag(value: &str) -> bool {
    matches!(value, "1" | "true" | "on" | "")
}
