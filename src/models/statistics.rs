//! Derived, read-only aggregates over a set of error logs.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use super::{ErrorLog, Priority, Severity};

/// Counts by severity, priority, analysis state and recency.
///
/// Recomputed on demand; never persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogStatistics {
    pub total_logs: usize,
    pub critical_count: usize,
    pub high_count: usize,
    pub medium_count: usize,
    pub low_count: usize,
    pub high_priority_count: usize,
    pub medium_priority_count: usize,
    pub low_priority_count: usize,
    pub analyzed_count: usize,
    pub unanalyzed_count: usize,
    /// Same UTC date as the reference time.
    pub today_count: usize,
    /// Within the 7 days before the reference time.
    pub this_week_count: usize,
    /// Within the 30 days before the reference time.
    pub this_month_count: usize,
}

impl LogStatistics {
    /// Aggregate `logs` relative to `now`.
    pub fn compute<'a>(logs: impl IntoIterator<Item = &'a ErrorLog>, now: DateTime<Utc>) -> Self {
        let today = now.date_naive();
        let week_start = now - Duration::days(7);
        let month_start = now - Duration::days(30);

        let mut stats = Self::default();
        for log in logs {
            stats.total_logs += 1;

            match log.severity {
                Some(Severity::Critical) => stats.critical_count += 1,
                Some(Severity::High) => stats.high_count += 1,
                Some(Severity::Medium) => stats.medium_count += 1,
                Some(Severity::Low) => stats.low_count += 1,
                None => {}
            }

            match log.priority {
                Some(Priority::High) => stats.high_priority_count += 1,
                Some(Priority::Medium) => stats.medium_priority_count += 1,
                Some(Priority::Low) => stats.low_priority_count += 1,
                None => {}
            }

            if log.is_analyzed {
                stats.analyzed_count += 1;
            } else {
                stats.unanalyzed_count += 1;
            }

            if log.day() == today {
                stats.today_count += 1;
            }
            if log.timestamp >= week_start && log.timestamp <= now {
                stats.this_week_count += 1;
            }
            if log.timestamp >= month_start && log.timestamp <= now {
                stats.this_month_count += 1;
            }
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AnalysisResult;
    use chrono::TimeZone;

    fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 9, 0, 0).unwrap()
    }

    fn analyzed(id: &str, ts: DateTime<Utc>, severity: Severity, priority: Priority) -> ErrorLog {
        let mut log = ErrorLog::new(id, ts, "svc", "boom", "");
        log.apply_analysis(
            &AnalysisResult {
                severity,
                priority,
                ai_reasoning: "r".to_string(),
                potential_fix: "f".to_string(),
            },
            ts,
        );
        log
    }

    #[test]
    fn test_mixed_fixture_counts() {
        let now = Utc.with_ymd_and_hms(2024, 1, 20, 12, 0, 0).unwrap();
        let logs = vec![
            analyzed("a", at(2024, 1, 20), Severity::Critical, Priority::High),
            analyzed("b", at(2024, 1, 18), Severity::High, Priority::High),
            analyzed("c", at(2024, 1, 5), Severity::Low, Priority::Medium),
            ErrorLog::new("d", at(2023, 11, 1), "svc", "x", ""),
        ];

        let stats = LogStatistics::compute(&logs, now);
        assert_eq!(stats.total_logs, 4);
        assert_eq!(stats.critical_count, 1);
        assert_eq!(stats.high_count, 1);
        assert_eq!(stats.medium_count, 0);
        assert_eq!(stats.low_count, 1);
        assert_eq!(stats.high_priority_count, 2);
        assert_eq!(stats.medium_priority_count, 1);
        assert_eq!(stats.low_priority_count, 0);
        assert_eq!(stats.analyzed_count, 3);
        assert_eq!(stats.unanalyzed_count, 1);
        assert_eq!(stats.today_count, 1);
        assert_eq!(stats.this_week_count, 2);
        assert_eq!(stats.this_month_count, 3);
    }

    #[test]
    fn test_empty_input() {
        let stats = LogStatistics::compute(&Vec::<ErrorLog>::new(), Utc::now());
        assert_eq!(stats, LogStatistics::default());
    }
}
