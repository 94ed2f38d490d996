use crate::api::WppClient;
use crate::error::{Result, WppError};
use crate::spreadsheet;
use crate::types::{PhoneNumber, ReportEntry};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::info;

pub const EXPORT_COLUMNS: [&str; 7] = [
    "date_time_queue",
    "date_time_send",
    "from_number",
    "to_number",
    "message_type",
    "status",
    "message",
];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReportQuery {
    pub from_number: Option<PhoneNumber>,
    pub init_time: Option<NaiveDate>,
    pub end_time: Option<NaiveDate>,
}

impl ReportQuery {
    pub fn new(from_number: PhoneNumber) -> Self {
        Self {
            from_number: Some(from_number),
            ..Self::default()
        }
    }

    pub fn between(mut self, init: Option<NaiveDate>, end: Option<NaiveDate>) -> Self {
        self.init_time = init;
        self.end_time = end;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.from_number.is_none() {
            return Err(WppError::validation("select a sender number for the report"));
        }
        if let (Some(init), Some(end)) = (self.init_time, self.end_time) {
            if init > end {
                return Err(WppError::validation(format!(
                    "start date {init} is after end date {end}"
                )));
            }
        }
        Ok(())
    }

    pub fn to_params(&self) -> Vec<(&'static str, String)> {
        let mut params = Vec::new();
        if let Some(number) = &self.from_number {
            params.push(("from_number", number.to_string()));
        }
        if let Some(init) = self.init_time {
            params.push(("init_time", init.format("%Y-%m-%d").to_string()));
        }
        if let Some(end) = self.end_time {
            params.push(("end_time", end.format("%Y-%m-%d").to_string()));
        }
        params
    }
}

pub async fn fetch_reports(client: &WppClient, query: &ReportQuery) -> Result<Vec<ReportEntry>> {
    query.validate()?;
    let entries = client.sends_report(query).await?;
    info!("report returned {} sends", entries.len());
    Ok(entries)
}

fn send_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.date_naive());
    }
    for fmt in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(dt.date());
        }
    }
    raw.get(..10)
        .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
}

/// Sends per day of `date_time_send`; entries without a parsable send time are skipped.
pub fn daily_counts(entries: &[ReportEntry]) -> BTreeMap<NaiveDate, usize> {
    let mut counts = BTreeMap::new();
    for date in entries
        .iter()
        .filter_map(|e| e.date_time_send.as_deref())
        .filter_map(send_date)
    {
        *counts.entry(date).or_insert(0) += 1;
    }
    counts
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReportSummary {
    pub total: usize,
    pub by_status: BTreeMap<String, usize>,
}

pub fn summarize(entries: &[ReportEntry]) -> ReportSummary {
    let mut by_status = BTreeMap::new();
    for entry in entries {
        let status = match entry.status.trim() {
            "" => "unknown".to_string(),
            s => s.to_lowercase(),
        };
        *by_status.entry(status).or_insert(0) += 1;
    }
    ReportSummary {
        total: entries.len(),
        by_status,
    }
}

fn entry_row(entry: &ReportEntry) -> Vec<String> {
    vec![
        entry.date_time_queue.clone().unwrap_or_default(),
        entry.date_time_send.clone().unwrap_or_default(),
        entry.from_number.clone(),
        entry.to_number.clone(),
        entry.message_type.clone(),
        entry.status.clone(),
        entry.message.clone().unwrap_or_default(),
    ]
}

pub fn export_reports(path: &Path, entries: &[ReportEntry]) -> Result<()> {
    let mut rows: Vec<Vec<String>> = Vec::with_capacity(entries.len() + 1);
    rows.push(EXPORT_COLUMNS.iter().map(|c| c.to_string()).collect());
    rows.extend(entries.iter().map(entry_row));
    spreadsheet::write_rows(path, "Relatorio", &rows)?;
    info!("exported {} report rows to {}", entries.len(), path.display());
    Ok(())
}

/// Reads a sheet written by [`export_reports`]; columns are matched by header name.
pub fn import_reports(path: &Path) -> Result<Vec<ReportEntry>> {
    let rows = spreadsheet::read_rows(path)?;
    let Some((header, body)) = rows.split_first() else {
        return Ok(Vec::new());
    };
    let column = |name: &str| header.iter().position(|h| h.trim() == name);
    let index: Vec<Option<usize>> = EXPORT_COLUMNS.iter().map(|c| column(*c)).collect();
    if index[2].is_none() || index[3].is_none() {
        return Err(WppError::Spreadsheet(
            "report sheet is missing from_number/to_number columns".into(),
        ));
    }

    let cell = |row: &Vec<String>, col: usize| -> String {
        index[col]
            .and_then(|i| row.get(i))
            .cloned()
            .unwrap_or_default()
    };
    let optional = |value: String| (!value.is_empty()).then_some(value);

    Ok(body
        .iter()
        .filter(|row| row.iter().any(|c| !c.trim().is_empty()))
        .map(|row| ReportEntry {
            date_time_queue: optional(cell(row, 0)),
            date_time_send: optional(cell(row, 1)),
            from_number: cell(row, 2),
            to_number: cell(row, 3),
            message_type: cell(row, 4),
            status: cell(row, 5),
            message: optional(cell(row, 6)),
        })
        .collect())
}
