//! Helpers for sanitizing untrusted names and span attributes.
//!
//! Span fields and log lines carry file names only, never full paths.

use std::path::Path;

/// Returns only the filename component of a path (no directory).
pub fn redact_path(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("<unknown>")
        .to_string()
}

/// Reduces a queue connection string to its scheme and file name.
///
/// - `sqlite:///var/lib/sheetflow/queue.db` → `sqlite://queue.db`
/// - `sqlite::memory:` → `sqlite::memory:` (no change)
pub fn redact_queue_url(url: &str) -> String {
    if url == "sqlite::memory:" || url == "memory://" || url == ":memory:" {
        return url.to_string();
    }
    let (scheme, rest) = match url.find("://") {
        Some(i) => (&url[..i + 3], &url[i + 3..]),
        None => match url.strip_prefix("sqlite:") {
            Some(rest) => ("sqlite:", rest),
            None => ("", url),
        },
    };
    format!("{}{}", scheme, redact_path(Path::new(rest)))
}

/// Turns a client-supplied file name into a safe single path component.
///
/// Directory parts are dropped and anything outside `[A-Za-z0-9._-]` becomes
/// `_`. Leading dots are stripped so the result is never hidden or `..`.
pub fn sanitize_filename(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        "upload".to_string()
    } else {
        cleaned.to_string()
    }
}
