use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use std::collections::BTreeSet;
use thiserror::Error;

pub const DAY: i64 = 24 * 3600;
pub const HOUR: i64 = 3600;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueryError {
    #[error("Incorrectly formatted time: {0}")]
    MalformedTime(String),

    #[error("no regular expression given")]
    NoTerms,

    #[error("start of range ({start}) is after its end ({end})")]
    InvertedRange { start: i64, end: i64 },
}

/// One search invocation. Built once, never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    pub positive: Vec<String>,
    pub negative: Vec<String>,
    /// Inclusive, epoch seconds UTC.
    pub start: i64,
    /// Inclusive, epoch seconds UTC.
    pub end: i64,
    pub hosts: Option<BTreeSet<String>>,
    pub log_type: String,
    pub tail: bool,
}

impl Query {
    pub fn new(
        positive: Vec<String>,
        negative: Vec<String>,
        (start, end): (i64, i64),
        hosts: Vec<String>,
        log_type: impl Into<String>,
        tail: bool,
    ) -> Result<Self, QueryError> {
        if positive.is_empty() {
            return Err(QueryError::NoTerms);
        }
        if start > end {
            return Err(QueryError::InvertedRange { start, end });
        }

        let hosts = if hosts.is_empty() {
            None
        } else {
            Some(hosts.into_iter().collect())
        };

        Ok(Self {
            positive,
            negative,
            start,
            end,
            hosts,
            log_type: log_type.into(),
            tail,
        })
    }

    /// Signed terms as the native filter expects them: `+re` must match,
    /// `!re` must not.
    pub fn signed_terms(&self) -> Vec<String> {
        self.positive
            .iter()
            .map(|re| format!("+{}", re))
            .chain(self.negative.iter().map(|re| format!("!{}", re)))
            .collect()
    }

    pub fn includes_host(&self, host: &str) -> bool {
        self.hosts.as_ref().map_or(true, |hosts| hosts.contains(host))
    }
}

/// Time range options as given on the command line, before resolution.
#[derive(Debug, Clone, Default)]
pub struct RangeArgs {
    pub day: Option<String>,
    pub days_back: Option<u32>,
    pub hours_back: Option<u32>,
    pub start: Option<String>,
    pub end: Option<String>,
}

impl RangeArgs {
    /// Resolve to an inclusive `(start, end)` pair relative to `now`.
    ///
    /// Without options the range is the current UTC day. `--day` covers one
    /// whole day; `--daysback`/`--hoursback` move the start back from now;
    /// explicit `--start`/`--end` are applied last.
    pub fn resolve(&self, now: i64) -> Result<(i64, i64), QueryError> {
        let today = now - now.rem_euclid(DAY);
        let mut start = today;
        let mut end = today + DAY - 1;

        if let Some(days) = self.days_back {
            start = now - i64::from(days) * DAY;
            end = now;
        }
        if let Some(hours) = self.hours_back {
            start = now - i64::from(hours) * HOUR;
            end = now;
        }
        if let Some(day) = &self.day {
            let day = parse_time(day)?;
            start = day;
            end = day + DAY - 1;
        }
        if let Some(s) = &self.start {
            start = parse_time(s)?;
        }
        if let Some(e) = &self.end {
            end = parse_time(e)?;
        }

        if start > end {
            return Err(QueryError::InvertedRange { start, end });
        }
        Ok((start, end))
    }
}

const DATETIME_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"];
const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y%m%d"];

/// Parse a user-supplied time into epoch seconds (UTC).
///
/// All-digit input not starting with `20` is taken as epoch seconds; anything
/// else must be one of the accepted date/datetime layouts.
pub fn parse_time(input: &str) -> Result<i64, QueryError> {
    let input = input.trim();
    let malformed = || QueryError::MalformedTime(input.to_string());

    if !input.is_empty() && input.bytes().all(|b| b.is_ascii_digit()) && !input.starts_with("20") {
        return input.parse().map_err(|_| malformed());
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(input) {
        return Ok(dt.with_timezone(&Utc).timestamp());
    }

    for format in DATETIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(input, format) {
            return Ok(Utc.from_utc_datetime(&naive).timestamp());
        }
    }

    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(input, format) {
            return date_start(date).ok_or_else(malformed);
        }
    }

    Err(malformed())
}

/// Midnight UTC of `date`, as epoch seconds.
pub fn date_start(date: NaiveDate) -> Option<i64> {
    date.and_hms_opt(0, 0, 0)
        .map(|naive| Utc.from_utc_datetime(&naive).timestamp())
}

pub fn format_time(ts: i64) -> String {
    Utc.timestamp_opt(ts, 0)
        .single()
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| ts.to_string())
}
