use chrono::{DateTime, Duration, Utc};

/// Wait before the next pass, indexed by consecutive no-change passes.
/// Starts at 30s and saturates at four days.
pub const BACKOFF_SCHEDULE_SECS: [u64; 12] = [
    30, 60, 120, 300, 900, 1800, 3600, 7200, 21600, 43200, 86400, 345600,
];

pub fn schedule_for(consecutive_no_change: u32) -> u64 {
    let idx = (consecutive_no_change as usize).min(BACKOFF_SCHEDULE_SECS.len() - 1);
    BACKOFF_SCHEDULE_SECS[idx]
}

pub fn initial_backoff_secs() -> u64 {
    BACKOFF_SCHEDULE_SECS[0]
}

pub fn next_sync_at(now: DateTime<Utc>, backoff_secs: u64) -> DateTime<Utc> {
    now + Duration::seconds(backoff_secs as i64)
}
