//! Time helpers

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Current Unix timestamp in milliseconds (0 if the clock is before 1970)
pub fn current_time_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Time elapsed since a millisecond timestamp; zero for future timestamps
pub fn elapsed_since(millis: u64) -> Duration {
    Duration::from_millis(current_time_millis().saturating_sub(millis))
}

/// Short human form of an age: "4s ago", "3m ago", "2h ago"
pub fn format_age(millis: u64) -> String {
    let secs = elapsed_since(millis).as_secs();
    match secs {
        0..=59 => format!("{}s ago", secs),
        60..=3599 => format!("{}m ago", secs / 60),
        _ => format!("{}h ago", secs / 3600),
    }
}
