/// Milliseconds since the Unix epoch, the timestamp unit used on the wire and at rest.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Whole seconds since the Unix epoch, used for local bookkeeping columns.
pub fn now_secs() -> i64 {
    chrono::Utc::now().timestamp()
}
