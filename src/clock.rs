use std::time::{SystemTime, UNIX_EPOCH};

/// Seconds since the unix epoch, the unit JWT timestamps and pending logins use.
pub fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
