//! Bulk export of error logs for external report generation.

use std::io::Write;

use crate::models::ErrorLog;

/// Export format options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ExportFormat {
    #[default]
    Json,
    Jsonl,
    Csv,
}

impl ExportFormat {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "json" => Some(Self::Json),
            "jsonl" | "ndjson" => Some(Self::Jsonl),
            "csv" => Some(Self::Csv),
            _ => None,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Jsonl => "jsonl",
            Self::Csv => "csv",
        }
    }
}

const CSV_HEADER: &str = "id,timestamp,source,message,stackTrace,severity,priority,isAnalyzed,analyzedAt,aiReasoning,potentialFix,resolutionStatus,resolvedAt,resolvedBy";

/// Write `logs` to `out` in `format`.
pub fn export_logs<W: Write>(
    logs: &[ErrorLog],
    format: ExportFormat,
    out: &mut W,
) -> std::io::Result<()> {
    match format {
        ExportFormat::Json => {
            serde_json::to_writer_pretty(&mut *out, logs)?;
            writeln!(out)
        }
        ExportFormat::Jsonl => {
            for log in logs {
                serde_json::to_writer(&mut *out, log)?;
                writeln!(out)?;
            }
            Ok(())
        }
        ExportFormat::Csv => {
            writeln!(out, "{}", CSV_HEADER)?;
            for log in logs {
                writeln!(
                    out,
                    "{},{},{},{},{},{},{},{},{},{},{},{},{},{}",
                    escape_csv(&log.id),
                    log.timestamp.to_rfc3339(),
                    escape_csv(&log.source),
                    escape_csv(&log.message),
                    escape_csv(&log.stack_trace),
                    log.severity.map(|s| s.as_str()).unwrap_or(""),
                    log.priority.map(|p| p.as_str()).unwrap_or(""),
                    log.is_analyzed,
                    log.analyzed_at.map(|t| t.to_rfc3339()).unwrap_or_default(),
                    escape_csv(&log.ai_reasoning),
                    escape_csv(&log.potential_fix),
                    log.resolution_status.map(|s| s.as_str()).unwrap_or(""),
                    log.resolved_at.map(|t| t.to_rfc3339()).unwrap_or_default(),
                    escape_csv(log.resolved_by.as_deref().unwrap_or("")),
                )?;
            }
            Ok(())
        }
    }
}

/// Escape a string for CSV output.
fn escape_csv(s: &str) -> String {
    if s.contains(',') || s.contains('"') || s.contains('\n') || s.contains('\r') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn sample() -> Vec<ErrorLog> {
        vec![
            ErrorLog::new(
                "a",
                Utc.with_ymd_and_hms(2024, 1, 15, 8, 0, 0).unwrap(),
                "api",
                "bad \"input\", rejected",
                "line1\nline2",
            ),
            ErrorLog::new(
                "b",
                Utc.with_ymd_and_hms(2024, 1, 15, 9, 0, 0).unwrap(),
                "worker",
                "oom",
                "",
            ),
        ]
    }

    #[test]
    fn test_escape_csv() {
        assert_eq!(escape_csv("plain"), "plain");
        assert_eq!(escape_csv("a,b"), "\"a,b\"");
        assert_eq!(escape_csv("say \"hi\""), "\"say \"\"hi\"\"\"");
    }

    #[test]
    fn test_csv_export() {
        let mut out = Vec::new();
        export_logs(&sample(), ExportFormat::Csv, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();

        assert!(text.starts_with(CSV_HEADER));
        assert!(text.contains("\"bad \"\"input\"\", rejected\""));
        assert!(text.contains("\"line1\nline2\""));
        assert!(text.contains("b,2024-01-15T09:00:00+00:00,worker,oom,,,,false"));
    }

    #[test]
    fn test_jsonl_export_one_record_per_line() {
        let mut out = Vec::new();
        export_logs(&sample(), ExportFormat::Jsonl, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(lines.len(), 2);
        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["id"], "a");
        assert_eq!(first["isAnalyzed"], false);
    }

    #[test]
    fn test_json_export_is_array() {
        let mut out = Vec::new();
        export_logs(&sample(), ExportFormat::Json, &mut out).unwrap();
        let parsed: Vec<ErrorLog> = serde_json::from_slice(&out).unwrap();
        assert_eq!(parsed, sample());
    }

    #[test]
    fn test_format_parsing() {
        assert_eq!(ExportFormat::from_str("CSV"), Some(ExportFormat::Csv));
        assert_eq!(ExportFormat::from_str("ndjson"), Some(ExportFormat::Jsonl));
        assert_eq!(ExportFormat::from_str("xlsx"), None);
    }
}
