//! Exam timer arithmetic.
//!
//! Timers are computed, never stored: the only persisted facts are
//! `start_time` and any admin-granted extra time. Everything else derives
//! from the clock, so a restarted server cannot drift a running exam.

use serde::{Deserialize, Serialize};

/// Base exam duration: four hours.
pub const BASE_EXAM_DURATION_MS: i64 = 4 * 60 * 60 * 1000;

/// Upper bound on a single admin time extension, in minutes.
pub const MAX_EXTENSION_MINUTES: i64 = 480;

/// Derived timer view for one candidate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimerStatus {
    pub remaining_ms: i64,
    pub total_duration_ms: i64,
    pub running: bool,
    /// Epoch millis at which the exam ends (or ended). `None` until started.
    pub end_time: Option<i64>,
}

impl TimerStatus {
    /// Compute the timer for a candidate given its persisted facts.
    ///
    /// `start_time` is epoch millis (None = not started), `extra_time_ms`
    /// accumulates admin extensions, `now_ms` is the caller's clock.
    pub fn compute(start_time: Option<i64>, extra_time_ms: i64, now_ms: i64) -> Self {
        let total = BASE_EXAM_DURATION_MS + extra_time_ms.max(0);
        let Some(start) = start_time else {
            return Self {
                remaining_ms: total,
                total_duration_ms: total,
                running: false,
                end_time: None,
            };
        };
        let elapsed = now_ms - start;
        if elapsed >= total {
            Self {
                remaining_ms: 0,
                total_duration_ms: total,
                running: false,
                end_time: Some(start + total),
            }
        } else {
            Self {
                remaining_ms: total - elapsed,
                total_duration_ms: total,
                running: true,
                end_time: Some(start + total),
            }
        }
    }

    pub fn expired(&self) -> bool {
        self.end_time.is_some() && self.remaining_ms == 0
    }
}

/// Clamp a requested extension to the allowed range. Returns `None` for
/// non-positive requests, which callers reject as a bad request.
pub fn clamp_extension_minutes(minutes: i64) -> Option<i64> {
    if minutes < 1 {
        None
    } else {
        Some(minutes.min(MAX_EXTENSION_MINUTES))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_started() {
        let t = TimerStatus::compute(None, 0, 1_000_000);
        assert_eq!(t.remaining_ms, BASE_EXAM_DURATION_MS);
        assert!(!t.running);
        assert!(t.end_time.is_none());
        assert!(!t.expired());
    }

    #[test]
    fn test_running_midway() {
        let start = 1_000_000;
        let now = start + BASE_EXAM_DURATION_MS / 2;
        let t = TimerStatus::compute(Some(start), 0, now);
        assert!(t.running);
        assert_eq!(t.remaining_ms, BASE_EXAM_DURATION_MS / 2);
        assert_eq!(t.end_time, Some(start + BASE_EXAM_DURATION_MS));
    }

    #[test]
    fn test_expired() {
        let start = 1_000_000;
        let now = start + BASE_EXAM_DURATION_MS + 1;
        let t = TimerStatus::compute(Some(start), 0, now);
        assert!(!t.running);
        assert_eq!(t.remaining_ms, 0);
        assert!(t.expired());
    }

    #[test]
    fn test_extra_time_extends_end() {
        let start = 0;
        let now = BASE_EXAM_DURATION_MS + 1;
        // Without the extension this candidate would be expired.
        let t = TimerStatus::compute(Some(start), 60_000, now);
        assert!(t.running);
        assert_eq!(t.remaining_ms, 60_000 - 1);
    }

    #[test]
    fn test_negative_extra_time_ignored() {
        let t = TimerStatus::compute(None, -5_000, 0);
        assert_eq!(t.total_duration_ms, BASE_EXAM_DURATION_MS);
    }

    #[test]
    fn test_clamp_extension() {
        assert_eq!(clamp_extension_minutes(0), None);
        assert_eq!(clamp_extension_minutes(-10), None);
        assert_eq!(clamp_extension_minutes(30), Some(30));
        assert_eq!(clamp_extension_minutes(10_000), Some(MAX_EXTENSION_MINUTES));
    }
}
