/// Milliseconds since the Unix epoch, the timestamp unit used on the wire.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
