use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds in one hour.
pub const HOUR_MS: i64 = 60 * 60 * 1000;

/// Current wall-clock time in epoch milliseconds.
///
/// Every persisted timestamp uses this representation so that store-side
/// comparisons (`window_expires_at < ?`) are plain integer comparisons.
pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}
