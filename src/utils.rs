//! Timing helpers for logging slow work.

use std::time::{Duration, Instant};
use tracing::warn;

/// Store queries slower than this are logged.
pub const SLOW_QUERY: Duration = Duration::from_millis(500);

/// Refreshes slower than this usually mean upstream rate limiting or network delays.
pub const SLOW_REFRESH: Duration = Duration::from_secs(30);

/// Startup migrations slower than this are logged.
pub const SLOW_MIGRATIONS: Duration = Duration::from_secs(5);

/// Debug-format a `Duration` with two decimals and automatic units, e.g. `1.94ms` or `2.34s`.
pub fn fmt_duration(d: Duration) -> String {
    format!("{d:.2?}")
}

/// Time elapsed since `start`, with a warning when it went past `threshold`.
///
/// Call inside the caller's span so the warning carries its player or domain.
pub fn log_if_slow(start: Instant, threshold: Duration, operation: &str) -> Duration {
    let elapsed = start.elapsed();
    if elapsed > threshold {
        warn!(
            operation,
            duration = fmt_duration(elapsed),
            threshold = fmt_duration(threshold),
            "Slow operation"
        );
    }
    elapsed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn durations_scale_their_unit() {
        assert_eq!(fmt_duration(Duration::from_millis(1500)), "1.50s");
        assert_eq!(fmt_duration(Duration::from_micros(250)), "250.00µs");
    }

    #[test]
    fn log_if_slow_reports_elapsed_time() {
        let start = Instant::now().checked_sub(Duration::from_secs(2)).unwrap();
        let elapsed = log_if_slow(start, SLOW_QUERY, "select_stale");
        assert!(elapsed >= Duration::from_secs(2));

        let elapsed = log_if_slow(Instant::now(), SLOW_REFRESH, "refresh");
        assert!(elapsed < SLOW_REFRESH);
    }
}
