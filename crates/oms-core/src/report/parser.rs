//! Report parser for the newline-delimited ingest stream.

use serde_json::Value;

use super::types::TelegramReport;
use crate::error::Result;

/// Parse and validate a single NDJSON line.
pub fn parse_report_line(line: &str) -> Result<TelegramReport> {
    let raw: Value = serde_json::from_str(line)?;
    parse_report_value(raw)
}

/// Parse and validate a JSON value into a report.
pub fn parse_report_value(raw: Value) -> Result<TelegramReport> {
    let report: TelegramReport = serde_json::from_value(raw)?;
    report.validate()?;
    Ok(report)
}
