//! Error log records and their classification enums.
//!
//! Field names serialize in camelCase; partition files and export output
//! depend on them staying stable.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::AnalysisResult;

/// Severity assigned by analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
}

impl Severity {
    pub const ALL: [Severity; 4] = [Self::Critical, Self::High, Self::Medium, Self::Low];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Critical => "Critical",
            Self::High => "High",
            Self::Medium => "Medium",
            Self::Low => "Low",
        }
    }

    /// Case-insensitive parse; the analysis service is not consistent about casing.
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "critical" => Some(Self::Critical),
            "high" => Some(Self::High),
            "medium" => Some(Self::Medium),
            "low" => Some(Self::Low),
            _ => None,
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Priority assigned by analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Priority {
    High,
    Medium,
    Low,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::High => "High",
            Self::Medium => "Medium",
            Self::Low => "Low",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "high" => Some(Self::High),
            "medium" => Some(Self::Medium),
            "low" => Some(Self::Low),
            _ => None,
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Human resolution state, independent of analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResolutionStatus {
    Open,
    InProgress,
    Resolved,
    Ignored,
}

impl ResolutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "Open",
            Self::InProgress => "InProgress",
            Self::Resolved => "Resolved",
            Self::Ignored => "Ignored",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().replace(['-', '_', ' '], "").as_str() {
            "open" => Some(Self::Open),
            "inprogress" => Some(Self::InProgress),
            "resolved" => Some(Self::Resolved),
            "ignored" => Some(Self::Ignored),
            _ => None,
        }
    }
}

/// A single collected application error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorLog {
    /// Assigned at collection time, stable thereafter.
    pub id: String,
    /// Event time; its UTC date selects the owning partition.
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub stack_trace: String,
    #[serde(default)]
    pub severity: Option<Severity>,
    #[serde(default)]
    pub priority: Option<Priority>,
    #[serde(default)]
    pub is_analyzed: bool,
    #[serde(default)]
    pub analyzed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub ai_reasoning: String,
    #[serde(default)]
    pub potential_fix: String,
    #[serde(default)]
    pub resolution_status: Option<ResolutionStatus>,
    #[serde(default)]
    pub resolved_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub resolved_by: Option<String>,
}

impl ErrorLog {
    /// Create an unanalyzed record.
    pub fn new(
        id: impl Into<String>,
        timestamp: DateTime<Utc>,
        source: impl Into<String>,
        message: impl Into<String>,
        stack_trace: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            timestamp,
            source: source.into(),
            message: message.into(),
            stack_trace: stack_trace.into(),
            severity: None,
            priority: None,
            is_analyzed: false,
            analyzed_at: None,
            ai_reasoning: String::new(),
            potential_fix: String::new(),
            resolution_status: None,
            resolved_at: None,
            resolved_by: None,
        }
    }

    /// The partition day that owns this record.
    pub fn day(&self) -> NaiveDate {
        self.timestamp.date_naive()
    }

    /// Record a successful analysis.
    ///
    /// `analyzed_at` is set exactly once: a record that is already analyzed
    /// is left untouched and `false` is returned.
    pub fn apply_analysis(&mut self, result: &AnalysisResult, at: DateTime<Utc>) -> bool {
        if self.is_analyzed {
            return false;
        }
        self.severity = Some(result.severity);
        self.priority = Some(result.priority);
        self.ai_reasoning = result.ai_reasoning.clone();
        self.potential_fix = result.potential_fix.clone();
        self.analyzed_at = Some(at);
        self.is_analyzed = true;
        true
    }

    /// Apply a human resolution update.
    pub fn resolve(
        &mut self,
        status: ResolutionStatus,
        resolved_by: impl Into<String>,
        resolved_at: DateTime<Utc>,
    ) {
        self.resolution_status = Some(status);
        self.resolved_by = Some(resolved_by.into());
        self.resolved_at = Some(resolved_at);
    }

    /// `is_analyzed` holds iff `analyzed_at`, severity and priority are all set.
    pub fn analysis_consistent(&self) -> bool {
        let populated =
            self.analyzed_at.is_some() && self.severity.is_some() && self.priority.is_some();
        self.is_analyzed == populated
    }
}

/// Record shape accepted at the ingestion boundary.
///
/// `id` is assigned when absent; `timestamp` is required and a record
/// without one fails validation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncomingLog {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub stack_trace: String,
}

impl IncomingLog {
    pub fn new(timestamp: DateTime<Utc>, source: &str, message: &str) -> Self {
        Self {
            id: None,
            timestamp: Some(timestamp),
            source: source.to_string(),
            message: message.to_string(),
            stack_trace: String::new(),
        }
    }

    /// Convert into a stored record, assigning an id if needed.
    ///
    /// Returns `None` when the timestamp is missing.
    pub fn into_error_log(self) -> Option<ErrorLog> {
        let timestamp = self.timestamp?;
        let id = self
            .id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        Some(ErrorLog::new(
            id,
            timestamp,
            self.source,
            self.message,
            self.stack_trace,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample() -> ErrorLog {
        ErrorLog::new(
            "log-1",
            Utc.with_ymd_and_hms(2024, 1, 15, 23, 59, 0).unwrap(),
            "billing-api",
            "NullReferenceException",
            "at Billing.Charge()",
        )
    }

    fn result() -> AnalysisResult {
        AnalysisResult {
            severity: Severity::Critical,
            priority: Priority::High,
            ai_reasoning: "payment path".to_string(),
            potential_fix: "guard the null".to_string(),
        }
    }

    #[test]
    fn test_day_uses_utc_date() {
        assert_eq!(sample().day(), NaiveDate::from_ymd_opt(2024, 1, 15).unwrap());
    }

    #[test]
    fn test_apply_analysis_sets_fields_once() {
        let mut log = sample();
        assert!(log.analysis_consistent());

        let first = Utc.with_ymd_and_hms(2024, 1, 16, 1, 0, 0).unwrap();
        assert!(log.apply_analysis(&result(), first));
        assert!(log.is_analyzed);
        assert_eq!(log.severity, Some(Severity::Critical));
        assert_eq!(log.analyzed_at, Some(first));
        assert!(log.analysis_consistent());

        let later = Utc.with_ymd_and_hms(2024, 1, 17, 1, 0, 0).unwrap();
        assert!(!log.apply_analysis(&result(), later));
        assert_eq!(log.analyzed_at, Some(first));
    }

    #[test]
    fn test_serde_uses_camel_case() {
        let json = serde_json::to_value(sample()).unwrap();
        assert!(json.get("stackTrace").is_some());
        assert!(json.get("isAnalyzed").is_some());
        assert!(json.get("aiReasoning").is_some());
    }

    #[test]
    fn test_enum_parsing_is_case_insensitive() {
        assert_eq!(Severity::from_str("CRITICAL"), Some(Severity::Critical));
        assert_eq!(Priority::from_str(" low "), Some(Priority::Low));
        assert_eq!(Severity::from_str("urgent"), None);
        assert_eq!(
            ResolutionStatus::from_str("in-progress"),
            Some(ResolutionStatus::InProgress)
        );
    }

    #[test]
    fn test_incoming_assigns_id_when_absent() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 15, 8, 0, 0).unwrap();
        let log = IncomingLog::new(ts, "svc", "boom").into_error_log().unwrap();
        assert!(!log.id.is_empty());
        assert!(!log.is_analyzed);

        let keep = IncomingLog {
            id: Some("abc".to_string()),
            ..IncomingLog::new(ts, "svc", "boom")
        };
        assert_eq!(keep.into_error_log().unwrap().id, "abc");
    }

    #[test]
    fn test_incoming_without_timestamp_is_rejected() {
        let log = IncomingLog {
            message: "boom".to_string(),
            ..Default::default()
        };
        assert!(log.into_error_log().is_none());
    }
}
