//! Shared helper functions used across CLI subcommands.

use anyhow::{Context, Result, bail};
use tracing_subscriber::EnvFilter;

use crate::cli::SessionSource;

/// Environment variable holding a deployed SESSION_ID string.
pub const SESSION_ENV_VAR: &str = "SESSION_ID";

/// Characters of the session string shown after encoding.
const PREVIEW_CHARS: usize = 100;

// ---------------------------------------------------------------------------
// Tracing
// ---------------------------------------------------------------------------

/// Initialize the tracing subscriber with the given default log level.
pub fn init_tracing(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}

// ---------------------------------------------------------------------------
// Session strings
// ---------------------------------------------------------------------------

/// Resolve the SESSION_ID string from `--session`, `--file`, or `$SESSION_ID`.
pub fn read_session_string(source: &SessionSource) -> Result<String> {
    if let Some(s) = &source.session {
        return Ok(s.clone());
    }
    if let Some(path) = &source.file {
        return std::fs::read_to_string(path)
            .with_context(|| format!("failed to read session file {}", path.display()));
    }
    match std::env::var(SESSION_ENV_VAR) {
        Ok(s) if !s.trim().is_empty() => Ok(s),
        _ => bail!("no session given: pass --session, --file, or set {SESSION_ENV_VAR}"),
    }
}

/// The first characters of `s`, with an ellipsis when truncated.
pub fn preview(s: &str) -> String {
    match s.char_indices().nth(PREVIEW_CHARS) {
        Some((cut, _)) => format!("{}...", &s[..cut]),
        None => s.to_string(),
    }
}
