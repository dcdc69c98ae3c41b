//! `.env`-style file loading.
//!
//! Parses `KEY=VALUE` lines, skipping blanks and `#` comments. Values
//! may be wrapped in matching single or double quotes. Loaded entries
//! never override variables already present in the process environment.

use std::path::Path;

use tracing::{debug, warn};

/// Load environment variables from a dotenv-style file.
///
/// Returns the number of variables set. A missing file is not an
/// error — callers pass the default `.env` path unconditionally.
pub fn load_env_file(path: &Path) -> std::io::Result<usize> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "no env file found");
            return Ok(0);
        }
        Err(e) => return Err(e),
    };

    let mut loaded = 0;
    for (lineno, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((key, value)) = line.split_once('=') else {
            warn!(path = %path.display(), line = lineno + 1, "skipping malformed env line");
            continue;
        };

        let key = key.trim();
        let value = unquote(value.trim());
        if key.is_empty() {
            warn!(path = %path.display(), line = lineno + 1, "skipping env line with empty key");
            continue;
        }

        if std::env::var_os(key).is_none() {
            // Safety: called during single-threaded startup, before the
            // runtime spawns anything that reads the environment.
            unsafe { std::env::set_var(key, value) };
            loaded += 1;
        }
    }

    debug!(path = %path.display(), loaded, "env file loaded");
    Ok(loaded)
}

/// Strip one layer of matching single or double quotes.
fn unquote(value: &str) -> &str {
    let bytes = value.as_bytes();
    if bytes.len() >= 2 {
        let (first, last) = (bytes[0], bytes[bytes.len() - 1]);
        if (first == b'"' && last == b'"') || (first == b'\'' && last == b'\'') {
            return &value[1..value.len() - 1];
        }
    }
    value
}
