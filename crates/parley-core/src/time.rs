//! Timestamp helpers.
//!
//! Tokens and push payloads carry epoch milliseconds; rows persisted to
//! the store carry a `YYYY-MM-DD HH:MM:SS` display string produced by
//! the database (`NOW()`) or by [`now_string`] for the in-memory store.

/// Milliseconds since the Unix epoch.
pub fn epoch_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Current time as a `YYYY-MM-DD HH:MM:SS` display string (UTC).
pub fn now_string() -> String {
    format_epoch_secs(chrono::Utc::now().timestamp())
}

/// Format epoch seconds as `YYYY-MM-DD HH:MM:SS` (UTC).
pub fn format_epoch_secs(epoch: i64) -> String {
    chrono::DateTime::from_timestamp(epoch, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "unknown".to_string())
}
