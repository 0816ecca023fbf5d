//! Monthly bulk snapshot download and header-mapped TSV parsing.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Datelike, NaiveDate, TimeZone};
use reqwest::blocking::Client;

use crate::domain::SnapshotKind;
use crate::error::CivicError;
use crate::http;

/// Header of a snapshot file, resolved once into a name to position map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Columns {
    index: HashMap<String, usize>,
}

impl Columns {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut index = HashMap::new();
        for (position, name) in names.into_iter().enumerate() {
            let name: String = name.into();
            // first occurrence wins on duplicated headers
            index.entry(name.trim().to_string()).or_insert(position);
        }
        Self { index }
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn require(&self, names: &[&str]) -> Result<(), CivicError> {
        match names.iter().find(|name| self.position(name).is_none()) {
            Some(missing) => Err(CivicError::MissingColumn((*missing).to_string())),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SnapshotRow {
    columns: Arc<Columns>,
    values: Vec<String>,
    line: u64,
}

impl SnapshotRow {
    pub fn new(columns: Arc<Columns>, values: Vec<String>, line: u64) -> Self {
        Self {
            columns,
            values,
            line,
        }
    }

    /// Value of the named column; `None` when the column is unknown or the row
    /// is shorter than the header.
    pub fn get(&self, column: &str) -> Option<&str> {
        self.columns
            .position(column)
            .and_then(|position| self.values.get(position))
            .map(|value| value.as_str())
    }

    /// Like [`SnapshotRow::get`], treating blank cells as absent.
    pub fn non_empty(&self, column: &str) -> Option<&str> {
        self.get(column)
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }

    pub fn line(&self) -> u64 {
        self.line
    }
}

#[derive(Debug, Clone)]
pub struct Snapshot {
    pub url: String,
    pub columns: Arc<Columns>,
    pub rows: Vec<SnapshotRow>,
    /// Records the TSV reader rejected. They are dropped, not fatal.
    pub malformed: usize,
}

pub trait SnapshotSource: Send + Sync {
    fn fetch(&self, kind: SnapshotKind, date: NaiveDate) -> Result<Snapshot, CivicError>;
}

#[derive(Clone)]
pub struct SnapshotHttpClient {
    client: Client,
    base_url: String,
}

impl SnapshotHttpClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, CivicError> {
        Ok(Self {
            client: http::build_client(timeout, CivicError::SnapshotHttp)?,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

impl SnapshotSource for SnapshotHttpClient {
    fn fetch(&self, kind: SnapshotKind, date: NaiveDate) -> Result<Snapshot, CivicError> {
        let url = snapshot_url(&self.base_url, kind, date);
        tracing::info!(%url, "downloading snapshot");
        let response = http::send_with_retries(|| self.client.get(&url), CivicError::SnapshotHttp)?;
        let response = http::check_status(response, "snapshot request failed")
            .map_err(|(status, message)| CivicError::SnapshotStatus { status, message })?;
        let text = response
            .text()
            .map_err(|err| CivicError::SnapshotHttp(err.to_string()))?;
        parse_snapshot(&url, &text)
    }
}

/// First day of the month containing `now`; snapshots are published monthly.
pub fn snapshot_date<Tz: TimeZone>(now: &DateTime<Tz>) -> NaiveDate {
    let today = now.date_naive();
    today.with_day(1).unwrap_or(today)
}

/// Accepts `YYYY-MM` or `YYYY-MM-DD` and returns the first of that month.
pub fn parse_snapshot_date(value: &str) -> Result<NaiveDate, CivicError> {
    let value = value.trim();
    let date = NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(&format!("{value}-01"), "%Y-%m-%d"))
        .map_err(|_| CivicError::InvalidSnapshotDate(value.to_string()))?;
    Ok(date.with_day(1).unwrap_or(date))
}

/// e.g. `<base>/01-Mar-2023/01-Mar-2023-VariantSummaries.tsv`
pub fn snapshot_url(base_url: &str, kind: SnapshotKind, date: NaiveDate) -> String {
    let formatted = date.format("%d-%b-%Y");
    format!(
        "{}/{formatted}/{formatted}-{}.tsv",
        base_url.trim_end_matches('/'),
        kind.summary_name()
    )
}

pub fn parse_snapshot(url: &str, text: &str) -> Result<Snapshot, CivicError> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(true)
        .flexible(true)
        .from_reader(text.as_bytes());

    let header = reader
        .headers()
        .map_err(|err| CivicError::Parse(format!("snapshot header: {err}")))?;
    if header.iter().all(|name| name.trim().is_empty()) {
        return Err(CivicError::Parse("snapshot has no header row".to_string()));
    }
    let columns = Arc::new(Columns::new(header.iter()));

    let mut rows = Vec::new();
    let mut malformed = 0usize;
    for record in reader.records() {
        match record {
            Ok(record) => {
                let line = record.position().map(|pos| pos.line()).unwrap_or(0);
                let values = record.iter().map(|value| value.to_string()).collect();
                rows.push(SnapshotRow::new(columns.clone(), values, line));
            }
            Err(err) => {
                tracing::warn!(error = %err, "dropping malformed snapshot record");
                malformed += 1;
            }
        }
    }

    Ok(Snapshot {
        url: url.to_string(),
        columns,
        rows,
        malformed,
    })
}
