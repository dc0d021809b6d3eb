//! Shared timestamp and identifier helpers.
//!
//! Every stored timestamp is an INTEGER count of unix-epoch milliseconds.

use ulid::Ulid;

pub const MILLIS_PER_MINUTE: i64 = 60_000;

/// Current unix-epoch milliseconds.
pub fn now_millis() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

pub fn new_id() -> String {
    Ulid::new().to_string()
}

/// Human-sized age of `ts` relative to `now`, e.g. `42s`, `7m`, `3h`, `2d`.
pub fn format_age(ts: i64, now: i64) -> String {
    let secs = (now - ts).max(0) / 1000;
    match secs {
        s if s < 60 => format!("{}s", s),
        s if s < 3600 => format!("{}m", s / 60),
        s if s < 86_400 => format!("{}h", s / 3600),
        s => format!("{}d", s / 86_400),
    }
}
