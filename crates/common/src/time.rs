/// Current wall-clock time as Unix epoch milliseconds.
///
/// A clock set before 1970 yields 0 rather than an error.
pub fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

/// Milliseconds elapsed since `start`, saturating at `i64::MAX`.
pub fn elapsed_ms(start: std::time::Instant) -> i64 {
    i64::try_from(start.elapsed().as_millis()).unwrap_or(i64::MAX)
}
