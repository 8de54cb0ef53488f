//! Tracing setup for binaries embedding the session engine.
//!
//! Events of this crate get their own detailed layer (timestamps, source
//! location, request span timings); everything else goes through a plain
//! host layer. The crate's verbosity is controlled separately from
//! `RUST_LOG` through `WEBDIFF_LOG`.

use std::io::{self, IsTerminal};
use std::str::FromStr;

use tracing::Level;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::time::FormatTime;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{EnvFilter, Layer, filter, fmt};

use crate::errors::{ConfigError, SessionResult};

/// Target prefix of every event emitted by this crate.
pub const TARGET_PREFIX: &str = "session_engine";

/// Environment variable selecting this crate's level.
pub const LOG_LEVEL_VAR: &str = "WEBDIFF_LOG";

/// Crate level when [`LOG_LEVEL_VAR`] is unset.
pub const DEFAULT_LEVEL: Level = Level::INFO;

/// Everything outside the session engine: the client binary at `info`,
/// the HTTP stack (hyper, reqwest) only when it warns.
const HOST_DIRECTIVES: &str = "warn,webdiff_client=info";

#[derive(Clone, Debug, Default)]
struct UtcSeconds;

impl FormatTime for UtcSeconds {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        let now = chrono::Utc::now();
        w.write_str(&now.to_rfc3339_opts(chrono::SecondsFormat::Secs, true))
    }
}

fn is_engine_event(meta: &tracing::Metadata<'_>) -> bool {
    meta.target().starts_with(TARGET_PREFIX)
}

/// Detailed layer for session-engine events only. Closing spans of
/// instrumented requests and reloads print their duration.
pub fn layer<S>() -> impl Layer<S> + Send + Sync
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
{
    fmt::layer()
        .with_timer(UtcSeconds)
        .with_target(true)
        .with_ansi(io::stdout().is_terminal())
        .with_span_events(fmt::format::FmtSpan::CLOSE)
        .event_format(fmt::format().compact().with_source_location(true))
        .with_filter(filter::filter_fn(is_engine_event))
}

/// Plain layer for the embedding binary and its dependencies.
pub fn host_layer<S>() -> impl Layer<S> + Send + Sync
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
{
    fmt::layer()
        .with_target(false)
        .with_ansi(io::stdout().is_terminal())
        .with_filter(filter::filter_fn(|meta| !is_engine_event(meta)))
}

/// Directive like `session_engine=debug`.
pub fn level_directive(level: Level) -> Option<Directive> {
    let s = format!("{TARGET_PREFIX}={}", level.as_str().to_lowercase());
    Directive::from_str(&s).ok()
}

/// Reads [`LOG_LEVEL_VAR`]; unset or empty gives [`DEFAULT_LEVEL`].
pub fn level_from_env() -> SessionResult<Level> {
    match std::env::var(LOG_LEVEL_VAR) {
        Ok(v) if !v.trim().is_empty() => parse_level(&v),
        _ => Ok(DEFAULT_LEVEL),
    }
}

fn parse_level(raw: &str) -> SessionResult<Level> {
    Level::from_str(raw.trim()).map_err(|_| {
        ConfigError::InvalidFormat {
            var: LOG_LEVEL_VAR,
            reason: "expected one of trace, debug, info, warn, error",
        }
        .into()
    })
}

/// `RUST_LOG` when set and valid, the host defaults otherwise, with the
/// session engine pinned to `level` either way.
pub fn env_filter(level: Level) -> EnvFilter {
    let base =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(HOST_DIRECTIVES));
    match level_directive(level) {
        Some(d) => base.add_directive(d),
        None => base,
    }
}
