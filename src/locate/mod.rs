pub mod glob;

use crate::query::{date_start, format_time, Query, DAY};
use chrono::NaiveDate;
use regex::Regex;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum LocateError {
    #[error("no files matched for type '{log_type}' between {} and {}", fmt_ts(.start), fmt_ts(.end))]
    NoFiles { log_type: String, start: i64, end: i64 },

    #[error("no files for today matched for type '{log_type}'")]
    NoLiveFiles { log_type: String },
}

fn fmt_ts(ts: &i64) -> String {
    format_time(*ts)
}

/// A discovered path before any parsing or filtering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub host: String,
    pub path: PathBuf,
}

impl Candidate {
    /// Candidate for a local file laid out as `.../<host>/<file>`.
    pub fn from_local_path(path: PathBuf) -> Self {
        let host = host_segment(&path).unwrap_or_default();
        Self { host, path }
    }
}

/// Time coverage of a log file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileSpan {
    /// Covers `start..=end` (one day, `end = start + 86399`).
    Bounded { start: i64, end: i64 },
    /// A growing file followed with `tail -f`; no end.
    Live,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFileRef {
    pub path: PathBuf,
    pub host: String,
    pub span: FileSpan,
}

impl LogFileRef {
    pub fn is_live(&self) -> bool {
        matches!(self.span, FileSpan::Live)
    }
}

/// Files searched in parallel; batches run one after another.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileBatch {
    /// Start of the day bucket, `None` for the tail-mode batch.
    pub bucket: Option<i64>,
    pub files: Vec<LogFileRef>,
}

impl FileBatch {
    pub fn paths(&self) -> Vec<&Path> {
        self.files.iter().map(|f| f.path.as_path()).collect()
    }
}

fn date_token_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\d+)(\.\w+)?$").unwrap())
}

fn date_token(path: &Path) -> Option<String> {
    let name = path.to_string_lossy();
    date_token_regex()
        .captures(&name)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// `(start, end)` of the day named by the trailing `YYYYMMDD` token,
/// e.g. `production.log-20130110` or `production.log-20130110.gz`.
pub fn parse_dates_from_fname(path: &Path) -> Option<(i64, i64)> {
    let token = date_token(path)?;
    let date = NaiveDate::parse_from_str(&token, "%Y%m%d").ok()?;
    let start = date_start(date)?;
    Some((start, start + DAY - 1))
}

/// Name of the directory holding `path`.
pub fn host_segment(path: &Path) -> Option<String> {
    path.parent()?
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
}

fn ranges_overlap(a: (i64, i64), b: (i64, i64)) -> bool {
    a.0 <= b.1 && b.0 <= a.1
}

/// Apply the host and time filters and group what survives by day.
///
/// Files whose name carries no parseable date are skipped. Batches come out
/// in ascending day order; within a batch files keep their input order.
pub fn filter_and_group_files(candidates: Vec<Candidate>, query: &Query) -> Vec<FileBatch> {
    let mut buckets: BTreeMap<i64, Vec<LogFileRef>> = BTreeMap::new();

    for candidate in candidates {
        if !query.includes_host(&candidate.host) {
            continue;
        }

        let Some((start, end)) = parse_dates_from_fname(&candidate.path) else {
            debug!(file = %candidate.path.display(), "No date in file name, skipping");
            continue;
        };

        if !ranges_overlap((query.start, query.end), (start, end)) {
            continue;
        }

        buckets.entry(start).or_default().push(LogFileRef {
            path: candidate.path,
            host: candidate.host,
            span: FileSpan::Bounded { start, end },
        });
    }

    buckets
        .into_iter()
        .map(|(bucket, files)| FileBatch {
            bucket: Some(bucket),
            files,
        })
        .collect()
}

/// The single tail-mode batch: every candidate whose name ends in today's date.
pub fn select_tail_files(candidates: Vec<Candidate>, today: NaiveDate) -> FileBatch {
    let suffix = format!("-{}", today.format("%Y%m%d"));

    let files = candidates
        .into_iter()
        .filter(|c| c.path.to_string_lossy().ends_with(&suffix))
        .map(|c| LogFileRef {
            path: c.path,
            host: c.host,
            span: FileSpan::Live,
        })
        .collect();

    FileBatch {
        bucket: None,
        files,
    }
}

/// Turn discovered candidates into the batches to search.
pub fn locate(
    candidates: Vec<Candidate>,
    query: &Query,
    today: NaiveDate,
) -> Result<Vec<FileBatch>, LocateError> {
    if query.tail {
        let batch = select_tail_files(candidates, today);
        if batch.files.is_empty() {
            return Err(LocateError::NoLiveFiles {
                log_type: query.log_type.clone(),
            });
        }
        return Ok(vec![batch]);
    }

    let batches = filter_and_group_files(candidates, query);
    if batches.is_empty() {
        return Err(LocateError::NoFiles {
            log_type: query.log_type.clone(),
            start: query.start,
            end: query.end,
        });
    }

    Ok(batches)
}
