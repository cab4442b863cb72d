//! Time-related utilities with clock abstraction for testability.
//!
//! All timestamps are Unix milliseconds in UTC, matching the backend clock.

use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, SecondsFormat, Utc};

/// Clock trait for dependency injection and testing
pub trait Clock: Send + Sync {
    /// Get current Unix timestamp in UTC (milliseconds)
    fn now_millis(&self) -> i64;
}

/// System clock implementation (uses actual system time)
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        now_millis()
    }
}

/// Fixed clock implementation for testing (returns a fixed time)
#[derive(Debug, Clone, Copy)]
pub struct FixedClock {
    fixed_time: i64,
}

impl FixedClock {
    /// Create a new fixed clock with the given timestamp
    pub fn new(fixed_time_millis: i64) -> Self {
        Self {
            fixed_time: fixed_time_millis,
        }
    }
}

impl Clock for FixedClock {
    fn now_millis(&self) -> i64 {
        self.fixed_time
    }
}

/// Clock that advances by a fixed step on every read.
///
/// Gives strictly increasing, reproducible timestamps in tests and demos.
#[derive(Debug)]
pub struct SteppingClock {
    next: AtomicI64,
    step: i64,
}

impl SteppingClock {
    /// Create a clock starting at `start_millis` and advancing by `step_millis`
    pub fn new(start_millis: i64, step_millis: i64) -> Self {
        Self {
            next: AtomicI64::new(start_millis),
            step: step_millis,
        }
    }
}

impl Clock for SteppingClock {
    fn now_millis(&self) -> i64 {
        self.next.fetch_add(self.step, Ordering::SeqCst)
    }
}

/// Get current Unix timestamp in UTC (milliseconds)
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Convert Unix timestamp (milliseconds) to RFC 3339 format in UTC
///
/// Returns `None` when the timestamp is outside the representable range.
pub fn timestamp_to_rfc3339(timestamp_millis: i64) -> Option<String> {
    DateTime::<Utc>::from_timestamp_millis(timestamp_millis)
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Millis, true))
}

/// Parse an RFC 3339 string into Unix milliseconds
pub fn rfc3339_to_timestamp(value: &str) -> Option<i64> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.timestamp_millis())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_clock_returns_non_zero_timestamp() {
        // テスト項目: SystemClock が 0 以外のタイムスタンプを返す
        // given (前提条件):
        let clock = SystemClock;

        // when (操作):
        let timestamp = clock.now_millis();

        // then (期待する結果):
        assert!(timestamp > 0);
    }

    #[test]
    fn test_fixed_clock_returns_consistent_timestamp() {
        // テスト項目: FixedClock が複数回呼び出しても同じタイムスタンプを返す
        // given (前提条件):
        let fixed_time = 9876543210987;
        let clock = FixedClock::new(fixed_time);

        // when (操作):
        let timestamp1 = clock.now_millis();
        let timestamp2 = clock.now_millis();

        // then (期待する結果):
        assert_eq!(timestamp1, fixed_time);
        assert_eq!(timestamp2, fixed_time);
    }

    #[test]
    fn test_stepping_clock_advances_by_step() {
        // テスト項目: SteppingClock が呼び出すたびに step ずつ進む
        // given (前提条件):
        let clock = SteppingClock::new(1000, 10);

        // when (操作):
        let first = clock.now_millis();
        let second = clock.now_millis();
        let third = clock.now_millis();

        // then (期待する結果):
        assert_eq!((first, second, third), (1000, 1010, 1020));
    }

    #[test]
    fn test_timestamp_to_rfc3339_format() {
        // テスト項目: タイムスタンプが正しく RFC 3339 形式（UTC）に変換される
        // given (前提条件):
        // 2023-01-01 00:00:00.123 UTC
        let timestamp = 1672531200123;

        // when (操作):
        let result = timestamp_to_rfc3339(timestamp);

        // then (期待する結果):
        assert_eq!(result.as_deref(), Some("2023-01-01T00:00:00.123Z"));
    }

    #[test]
    fn test_rfc3339_to_timestamp_accepts_offsets() {
        // テスト項目: オフセット付きの RFC 3339 文字列を UTC ミリ秒に変換できる
        // given (前提条件):
        let value = "2023-01-01T09:00:00+09:00";

        // when (操作):
        let result = rfc3339_to_timestamp(value);

        // then (期待する結果):
        assert_eq!(result, Some(1672531200000));
    }

    #[test]
    fn test_rfc3339_to_timestamp_rejects_garbage() {
        // テスト項目: 不正な文字列は None になる
        // given (前提条件):
        let value = "yesterday";

        // when (操作):
        let result = rfc3339_to_timestamp(value);

        // then (期待する結果):
        assert_eq!(result, None);
    }
}
