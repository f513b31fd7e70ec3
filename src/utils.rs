use std::time::{SystemTime, UNIX_EPOCH};

pub fn get_current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Build the counter key for one identity in one fixed window bucket.
pub fn format_counter_key(scope: &str, identity: &str, bucket: u64) -> String {
    format!("ratelimit:{}:{}:{}", scope, identity, bucket)
}
