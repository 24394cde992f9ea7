use std::time::{SystemTime, UNIX_EPOCH};

pub fn current_timestamp() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Seconds elapsed between `start` and `end`; negative when `start` lies in the future.
pub fn elapsed_seconds(start: i64, end: i64) -> i64 {
    end - start
}

/// Strictly greater than `limit` seconds since `timestamp`.
pub fn is_older_than(timestamp: i64, limit: i64, current_time: i64) -> bool {
    elapsed_seconds(timestamp, current_time) > limit
}

/// Strictly less than `limit` seconds since `timestamp`.
pub fn is_younger_than(timestamp: i64, limit: i64, current_time: i64) -> bool {
    elapsed_seconds(timestamp, current_time) < limit
}
