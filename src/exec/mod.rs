pub mod local;
pub mod remote;

pub use local::LocalBackend;
pub use remote::RemoteBackend;

use crate::locate::{Candidate, LogFileRef};
use crate::merge::PipelineId;
use crate::query::Query;
use async_trait::async_trait;
use std::io;
use std::path::{Path, PathBuf};
use std::os::unix::process::ExitStatusExt;
use std::process::{ExitStatus, Stdio};
use thiserror::Error;
use tokio::process::{Child, ChildStdout, Command};

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("failed to start `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("`{command}` has no output stream")]
    NoOutput { command: String },

    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("{host} is not set up for remote search, please run `timegrep setup`")]
    SetupRequired { host: String },

    #[error("remote setup failed on {host}: {step}")]
    Setup { host: String, step: String },
}

/// How the filter is invoked for the selected log type.
#[derive(Debug, Clone)]
pub struct FilterSpec {
    pub command: String,
    /// Log-type identifier handed to the filter.
    pub format: String,
    pub index_dir: Option<PathBuf>,
}

/// A command that copies a log file from near a timestamp, using its seek
/// index: `<program> <args>... <file> <start> [--index-dir <dir>]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeekReader {
    pub program: String,
    pub args: Vec<String>,
}

impl SeekReader {
    /// Parse a shell-style command line such as `timegrep cat`.
    pub fn parse(command: &str) -> Option<Self> {
        let mut words = shell_words::split(command).ok()?.into_iter();
        let program = words.next()?;
        Some(Self {
            program,
            args: words.collect(),
        })
    }

    fn argv(&self, file: &Path, start: i64, index_dir: Option<&Path>) -> Vec<String> {
        let mut argv = vec![self.program.clone()];
        argv.extend(self.args.iter().cloned());
        argv.push(file.display().to_string());
        argv.push(start.to_string());
        if let Some(dir) = index_dir {
            argv.push("--index-dir".to_string());
            argv.push(dir.display().to_string());
        }
        argv
    }
}

/// One running pipeline: the stage processes and the filter's output.
pub struct Pipeline {
    pub id: PipelineId,
    /// Label used for records until the stream announces a file.
    pub label: String,
    /// Prepended to file names announced in the stream.
    pub prefix: String,
    pub stdout: ChildStdout,
    pub children: Vec<Child>,
    pub command: String,
}

/// Launches searches for one file at a time, on this machine or elsewhere.
#[async_trait]
pub trait Backend: Send + Sync {
    fn name(&self) -> &'static str;

    /// List candidate files for the given glob patterns.
    async fn discover(&self, globs: &[String]) -> Result<Vec<Candidate>, ExecError>;

    /// Start the pipeline that searches `file`. The returned pipeline's
    /// children must be reaped by the caller once its output is drained.
    async fn launch(
        &self,
        id: PipelineId,
        file: &LogFileRef,
        query: &Query,
    ) -> Result<Pipeline, ExecError>;

    /// One-time provisioning. Idempotent.
    async fn setup(&self) -> Result<(), ExecError>;

    /// Cheap check that `setup` has been done.
    async fn verify(&self) -> Result<(), ExecError> {
        Ok(())
    }

    /// Shown once at the end of a run in which some pipelines failed.
    fn failure_hint(&self) -> &'static str;
}

/// The stage that produces the file's plain text.
pub fn source_argv(file: &LogFileRef, query: &Query, seek_reader: Option<&SeekReader>, index_dir: Option<&Path>) -> Vec<String> {
    let path = file.path.display().to_string();

    if file.is_live() {
        return vec!["tail".to_string(), "-f".to_string(), path];
    }
    if path.ends_with(".gz") {
        return vec!["gzip".to_string(), "-dcf".to_string(), path];
    }
    if path.ends_with(".bz2") {
        return vec!["bzip2".to_string(), "-dcf".to_string(), path];
    }

    match seek_reader {
        Some(reader) => reader.argv(&file.path, query.start, index_dir),
        None => vec!["cat".to_string(), path],
    }
}

/// `<filter> <format> <start> <end> +re... !re...`
pub fn filter_argv(command: &str, format: &str, query: &Query) -> Vec<String> {
    let mut argv = vec![
        command.to_string(),
        format.to_string(),
        query.start.to_string(),
        query.end.to_string(),
    ];
    argv.extend(query.signed_terms());
    argv
}

/// Render argv lists as one shell pipeline with every word quoted.
pub fn shell_pipeline(stages: &[Vec<String>]) -> String {
    stages
        .iter()
        .map(|argv| shell_words::join(argv))
        .collect::<Vec<_>>()
        .join(" | ")
}

/// Spawn one stage with piped stdout. The child is killed if dropped before
/// it is reaped.
pub(crate) fn spawn_stage(argv: &[String], stdin: Stdio) -> Result<Child, ExecError> {
    let (program, args) = argv.split_first().ok_or_else(|| ExecError::Spawn {
        command: String::new(),
        source: io::Error::new(io::ErrorKind::InvalidInput, "empty command"),
    })?;

    Command::new(program)
        .args(args)
        .stdin(stdin)
        .stdout(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| ExecError::Spawn {
            command: shell_words::join(argv),
            source,
        })
}

/// Take a spawned stage's stdout.
pub(crate) fn take_stdout(child: &mut Child, argv: &[String]) -> Result<ChildStdout, ExecError> {
    child.stdout.take().ok_or_else(|| ExecError::NoOutput {
        command: shell_words::join(argv),
    })
}

const SIGPIPE: i32 = 13;

/// Exit statuses of one finished pipeline's stages, source first.
#[derive(Debug)]
pub struct Reaped {
    pub pipeline: PipelineId,
    pub label: String,
    pub statuses: Vec<io::Result<ExitStatus>>,
}

impl Reaped {
    /// Why the pipeline failed, if it did.
    ///
    /// The filter's status decides. Upstream stages must succeed too, except
    /// that they may die of a broken pipe: the filter stops reading once it
    /// is past the end of the range.
    pub fn failure(&self) -> Option<String> {
        let (filter, upstream) = self.statuses.split_last()?;

        match filter {
            Err(e) => return Some(format!("could not be reaped: {}", e)),
            Ok(status) if !status.success() => return Some(format!("exited with {}", status)),
            Ok(_) => {}
        }

        upstream.iter().find_map(|status| match status {
            Err(e) => Some(format!("source stage could not be reaped: {}", e)),
            Ok(status) if status.success() || status.signal() == Some(SIGPIPE) => None,
            Ok(status) => Some(format!("source stage exited with {}", status)),
        })
    }
}

/// Wait for every stage of a finished pipeline.
pub async fn reap(id: PipelineId, label: &str, children: Vec<Child>) -> Reaped {
    let mut statuses = Vec::with_capacity(children.len());
    for mut child in children {
        statuses.push(child.wait().await);
    }
    Reaped {
        pipeline: id,
        label: label.to_string(),
        statuses,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::locate::FileSpan;

    fn query() -> Query {
        Query::new(
            vec!["Processing".to_string(), "it's".to_string()],
            vec!["health check".to_string()],
            (100, 200),
            vec![],
            "app",
            false,
        )
        .unwrap()
    }

    fn file(path: &str, span: FileSpan) -> LogFileRef {
        LogFileRef {
            path: PathBuf::from(path),
            host: "h1".to_string(),
            span,
        }
    }

    const DAY: FileSpan = FileSpan::Bounded { start: 0, end: 86399 };

    #[test]
    fn test_source_argv_by_suffix() {
        let q = query();
        assert_eq!(source_argv(&file("l/a.log-1.gz", DAY), &q, None, None), vec!["gzip", "-dcf", "l/a.log-1.gz"]);
        assert_eq!(source_argv(&file("l/a.log-1.bz2", DAY), &q, None, None), vec!["bzip2", "-dcf", "l/a.log-1.bz2"]);
        assert_eq!(source_argv(&file("l/a.log-1", DAY), &q, None, None), vec!["cat", "l/a.log-1"]);
        assert_eq!(source_argv(&file("l/a.log-1", FileSpan::Live), &q, None, None), vec!["tail", "-f", "l/a.log-1"]);
    }

    #[test]
    fn test_source_argv_with_seek_reader() {
        let reader = SeekReader::parse("/usr/bin/timegrep cat").unwrap();
        let argv = source_argv(&file("l/a.log-1", DAY), &query(), Some(&reader), Some(Path::new("/idx")));
        assert_eq!(argv, vec!["/usr/bin/timegrep", "cat", "l/a.log-1", "100", "--index-dir", "/idx"]);

        // Compressed and live files never go through the seek reader.
        let argv = source_argv(&file("l/a.log-1.gz", DAY), &query(), Some(&reader), None);
        assert_eq!(argv[0], "gzip");
    }

    #[test]
    fn test_filter_argv() {
        assert_eq!(
            filter_argv("ug_guts", "rails", &query()),
            vec!["ug_guts", "rails", "100", "200", "+Processing", "+it's", "!health check"]
        );
    }

    #[test]
    fn test_shell_pipeline_quotes_terms() {
        let stages = vec![
            vec!["cat".to_string(), "/logs/a b".to_string()],
            filter_argv("ug_guts", "rails", &query()),
        ];
        assert_eq!(
            shell_pipeline(&stages),
            "cat '/logs/a b' | ug_guts rails 100 200 +Processing '+it'\\''s' '!health check'"
        );
    }

    fn reaped(raw: &[i32]) -> Reaped {
        Reaped {
            pipeline: 0,
            label: "a.log".to_string(),
            statuses: raw.iter().map(|r| Ok(ExitStatus::from_raw(*r))).collect(),
        }
    }

    #[test]
    fn test_broken_pipe_upstream_is_not_a_failure() {
        // Wait statuses: 0 is a clean exit, 13 is killed by SIGPIPE.
        assert_eq!(reaped(&[0, 0]).failure(), None);
        assert_eq!(reaped(&[13, 0]).failure(), None);
    }

    #[test]
    fn test_filter_status_decides() {
        let failure = reaped(&[0, 3 << 8]).failure().unwrap();
        assert!(failure.starts_with("exited with"), "{}", failure);

        // A filter failure is reported even if the source broke its pipe.
        assert!(reaped(&[13, 1 << 8]).failure().is_some());
    }

    #[test]
    fn test_source_failure_is_reported() {
        let failure = reaped(&[1 << 8, 0]).failure().unwrap();
        assert!(failure.starts_with("source stage exited with"), "{}", failure);

        // Killed by anything other than a broken pipe.
        assert!(reaped(&[9, 0]).failure().is_some());
    }
}
