use crate::cli::{filter_spec, load, select_type};
use crate::config::{Config, ConfigError};
use crate::exec::{reap, Backend, ExecError, FilterSpec, LocalBackend, RemoteBackend, SeekReader};
use crate::locate::{locate, FileBatch, LocateError};
use crate::merge::{Merger, OutputFormat, PipelineId, Printer};
use crate::query::{format_time, Query, QueryError, RangeArgs};
use crate::reader::{read_records, FrameParser, RecordSink};
use chrono::Utc;
use futures::future::join_all;
use std::future::Future;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::BufReader;
use tokio::process::Child;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Query(#[from] QueryError),

    #[error(transparent)]
    Locate(#[from] LocateError),

    #[error(transparent)]
    Exec(#[from] ExecError),

    #[error("output error: {0}")]
    Output(#[from] io::Error),
}

/// Everything a search needs from the command line.
#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    pub config: Option<PathBuf>,
    pub log_type: Option<String>,
    pub positive: Vec<String>,
    pub negative: Vec<String>,
    pub range: RangeArgs,
    pub hosts: Vec<String>,
    pub tail: bool,
    pub perf: bool,
    pub remote: bool,
    /// First stage for plain local files. Plain `cat` when absent.
    pub seek_reader: Option<SeekReader>,
}

/// A pipeline that could not be started, read, or exited non-zero.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineFailure {
    pub label: String,
    pub reason: String,
}

#[derive(Debug, Default)]
pub struct RunSummary {
    pub batches: usize,
    pub files: usize,
    /// Records closed by all readers.
    pub records: usize,
    pub failures: Vec<PipelineFailure>,
    /// Set when some pipelines failed.
    pub hint: Option<&'static str>,
    pub interrupted: bool,
}

pub async fn run(options: SearchOptions) -> Result<RunSummary, RunError> {
    let config = load(options.config.as_deref())?;
    let (type_name, log_type) = select_type(&config, options.log_type.as_deref())?;

    let now = Utc::now();
    let range = options.range.resolve(now.timestamp())?;
    let query = Query::new(
        options.positive,
        options.negative,
        range,
        options.hosts,
        type_name,
        options.tail,
    )?;
    info!(
        log_type = %query.log_type,
        terms = ?query.signed_terms(),
        "Searching from {} to {}",
        format_time(query.start),
        format_time(query.end)
    );

    let filter = filter_spec(&config, type_name, log_type);
    let backend = build_backend(&config, filter, options.remote, options.seek_reader)?;
    backend.verify().await?;

    let candidates = backend.discover(&log_type.glob.to_vec()).await?;
    let batches = locate(candidates, &query, now.date_naive())?;

    let format = if options.perf {
        OutputFormat::Perf
    } else {
        OutputFormat::Raw
    };
    let printer = Arc::new(Printer::stdout(format));

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if forward_interrupts(signal::ctrl_c, on_signal).await {
            std::process::exit(130);
        }
    });

    execute(
        backend.as_ref(),
        batches,
        &query,
        printer,
        config.search.flush_interval,
        cancel,
    )
    .await
}

/// Cancel the search on the first interrupt. Returns true when a second one
/// arrives before the search has wound down, and false if the listener fails.
pub async fn forward_interrupts<F, Fut>(mut interrupted: F, cancel: CancellationToken) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = io::Result<()>>,
{
    if let Err(e) = interrupted().await {
        warn!(error = %e, "Could not listen for interrupts");
        return false;
    }
    info!("Interrupt received, stopping search (interrupt again to quit)");
    cancel.cancel();

    if interrupted().await.is_err() {
        return false;
    }
    warn!("Second interrupt received, quitting");
    true
}

pub fn build_backend(
    config: &Config,
    filter: FilterSpec,
    remote: bool,
    seek_reader: Option<SeekReader>,
) -> Result<Box<dyn Backend>, ConfigError> {
    if remote {
        let remote = config.remote.as_ref().ok_or(ConfigError::NoRemote)?;
        Ok(Box::new(RemoteBackend::new(
            remote,
            filter,
            config.filter.assets.clone(),
        )))
    } else {
        Ok(Box::new(LocalBackend::new(filter, seek_reader)))
    }
}

/// Search `batches` one after another, every file of a batch in parallel.
///
/// Without tail mode records pass through one merge buffer for the whole
/// run and come out in timestamp order. In tail mode each record is written
/// as soon as it closes. Cancelling `cancel` stops the current batch, kills
/// its processes and writes out whatever was already read.
pub async fn execute(
    backend: &dyn Backend,
    batches: Vec<FileBatch>,
    query: &Query,
    printer: Arc<Printer>,
    flush_interval: Duration,
    cancel: CancellationToken,
) -> Result<RunSummary, RunError> {
    let merger = if query.tail {
        None
    } else {
        Some(Merger::start(printer.clone(), flush_interval))
    };

    let mut summary = RunSummary::default();
    let mut next_id: PipelineId = 0;

    for batch in batches {
        if cancel.is_cancelled() {
            summary.interrupted = true;
            break;
        }

        summary.batches += 1;
        summary.files += batch.files.len();
        info!(
            bucket = ?batch.bucket.map(format_time),
            files = batch.files.len(),
            "Searching batch"
        );

        let mut pipelines = Vec::with_capacity(batch.files.len());
        for file in &batch.files {
            let id = next_id;
            next_id += 1;
            debug!(pipeline = id, host = %file.host, file = %file.path.display(), "Launching");

            match backend.launch(id, file, query).await {
                Ok(pipeline) => pipelines.push(pipeline),
                Err(e) => {
                    warn!(file = %file.path.display(), error = %e, "Failed to launch pipeline");
                    summary.failures.push(PipelineFailure {
                        label: file.path.display().to_string(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        // Every pipeline of the batch holds the horizon back before any
        // reader starts.
        if let Some(merger) = &merger {
            for pipeline in &pipelines {
                merger.buffer().register(pipeline.id);
            }
        }

        let mut readers = Vec::with_capacity(pipelines.len());
        let mut stages: Vec<(PipelineId, String, Vec<Child>)> = Vec::with_capacity(pipelines.len());
        for pipeline in pipelines {
            let sink = match &merger {
                Some(merger) => RecordSink::Merge {
                    buffer: merger.buffer().clone(),
                    pipeline: pipeline.id,
                },
                None => RecordSink::Direct(printer.clone()),
            };
            let parser = FrameParser::new(pipeline.prefix, pipeline.label.clone());
            readers.push(tokio::spawn(read_records(
                BufReader::new(pipeline.stdout),
                parser,
                sink,
            )));
            stages.push((pipeline.id, pipeline.label, pipeline.children));
        }

        let results = tokio::select! {
            results = join_all(readers.iter_mut()) => Some(results),
            _ = cancel.cancelled() => None,
        };

        let Some(results) = results else {
            for reader in &readers {
                reader.abort();
            }
            for (id, _, children) in stages {
                for mut child in children {
                    if let Err(e) = child.kill().await {
                        debug!(pipeline = id, error = %e, "Failed to kill stage");
                    }
                }
            }
            summary.interrupted = true;
            break;
        };

        for ((id, label, _), result) in stages.iter().zip(results) {
            match result {
                Ok(Ok(stats)) => {
                    debug!(pipeline = id, lines = stats.lines, records = stats.records, "Reader finished");
                    summary.records += stats.records;
                }
                Ok(Err(e)) => summary.failures.push(PipelineFailure {
                    label: label.clone(),
                    reason: format!("read failed: {}", e),
                }),
                Err(e) => summary.failures.push(PipelineFailure {
                    label: label.clone(),
                    reason: format!("reader task failed: {}", e),
                }),
            }
        }

        for (id, label, children) in stages {
            let reaped = reap(id, &label, children).await;
            if let Some(reason) = reaped.failure() {
                warn!(pipeline = id, label = %reaped.label, reason = %reason, "Pipeline failed");
                summary.failures.push(PipelineFailure {
                    label: reaped.label,
                    reason,
                });
            }
            if let Some(merger) = &merger {
                merger.buffer().retire(id);
            }
        }
        if let Some(merger) = &merger {
            debug!(tracked = merger.buffer().tracked(), "Batch finished");
        }
    }

    if let Some(merger) = merger {
        merger.finish().await?;
    }

    if !summary.failures.is_empty() {
        summary.hint = Some(backend.failure_hint());
    }

    info!(
        batches = summary.batches,
        files = summary.files,
        records = summary.records,
        failures = summary.failures.len(),
        "Search complete"
    );

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::locate::{FileSpan, LogFileRef};
    use crate::merge::output::test_support::printer;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;
    use tempfile::TempDir;
    use tokio::sync::Notify;

    fn script(dir: &Path, name: &str, body: &str) -> String {
        let path = dir.join(name);
        fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path.display().to_string()
    }

    fn backend(filter: String) -> LocalBackend {
        LocalBackend::new(
            FilterSpec {
                command: filter,
                format: "app".to_string(),
                index_dir: None,
            },
            None,
        )
    }

    fn query(tail: bool) -> Query {
        Query::new(vec!["x".to_string()], vec![], (0, 86399), vec![], "app", tail).unwrap()
    }

    fn batch(files: Vec<PathBuf>, span: FileSpan) -> FileBatch {
        FileBatch {
            bucket: None,
            files: files
                .into_iter()
                .map(|path| LogFileRef {
                    path,
                    host: "h".to_string(),
                    span,
                })
                .collect(),
        }
    }

    const DAY: FileSpan = FileSpan::Bounded { start: 0, end: 86399 };

    #[tokio::test]
    async fn test_interleaves_pipelines_by_timestamp() {
        let dir = TempDir::new().unwrap();
        let a = dir.path().join("a.log-19700101");
        let b = dir.path().join("b.log-19700101");
        fs::write(&a, "@@10\na10\n---\n@@30\na30\n---\n").unwrap();
        fs::write(&b, "@@20\nb20\n---\n@@40\nb40\n---\n").unwrap();

        let filter = script(dir.path(), "filter", "exec cat");
        let (printer, buf) = printer(OutputFormat::Raw);
        let summary = execute(
            &backend(filter),
            vec![batch(vec![a, b], DAY)],
            &query(false),
            printer,
            Duration::from_millis(5),
            CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(summary.records, 4);
        assert!(summary.failures.is_empty());
        let bodies: Vec<_> = buf
            .contents()
            .lines()
            .filter(|l| l.len() == 3 && !l.starts_with('-'))
            .map(String::from)
            .collect();
        assert_eq!(bodies, vec!["a10", "b20", "a30", "b40"]);
    }

    #[tokio::test]
    async fn test_failing_filter_keeps_partial_output() {
        let dir = TempDir::new().unwrap();
        let a = dir.path().join("a.log-19700101");
        fs::write(&a, "@@10\nkept\n---\n").unwrap();

        let filter = script(dir.path(), "filter", "cat\nexit 3");
        let (printer, buf) = printer(OutputFormat::Raw);
        let summary = execute(
            &backend(filter),
            vec![batch(vec![a.clone()], DAY)],
            &query(false),
            printer,
            Duration::from_secs(60),
            CancellationToken::new(),
        )
        .await
        .unwrap();

        assert!(buf.contents().contains("kept"));
        assert_eq!(summary.failures.len(), 1);
        assert_eq!(summary.failures[0].label, a.display().to_string());
        assert!(summary.hint.is_some());
    }

    #[tokio::test]
    async fn test_filter_stopping_early_is_not_a_failure() {
        let dir = TempDir::new().unwrap();
        let a = dir.path().join("a.log-19700101");
        let big: String = (0..200_000).map(|i| format!("line {}\n", i)).collect();
        fs::write(&a, big).unwrap();

        // Reads one line, then exits while `cat` is still writing.
        let filter = script(
            dir.path(),
            "filter",
            "head -n 1 >/dev/null\nprintf '@@10\\nkept\\n---\\n'\nexit 0",
        );
        let (printer, buf) = printer(OutputFormat::Raw);
        let summary = execute(
            &backend(filter),
            vec![batch(vec![a], DAY)],
            &query(false),
            printer,
            Duration::from_secs(60),
            CancellationToken::new(),
        )
        .await
        .unwrap();

        assert!(summary.failures.is_empty(), "{:?}", summary.failures);
        assert_eq!(summary.hint, None);
        assert!(buf.contents().contains("kept"));
    }

    #[tokio::test]
    async fn test_launch_failure_does_not_stop_other_files() {
        let dir = TempDir::new().unwrap();
        let a = dir.path().join("a.log-19700101");
        fs::write(&a, "@@10\nfine\n---\n").unwrap();

        let (printer, buf) = printer(OutputFormat::Raw);
        let summary = execute(
            &backend(dir.path().join("missing").display().to_string()),
            vec![batch(vec![a], DAY)],
            &query(false),
            printer,
            Duration::from_secs(60),
            CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(summary.failures.len(), 1);
        assert_eq!(buf.contents(), "");
    }

    #[tokio::test]
    async fn test_cancel_stops_tail_search() {
        let dir = TempDir::new().unwrap();
        let live = dir.path().join("a.log-19700101");
        fs::write(&live, "@@10\nfirst\n---\n").unwrap();

        let filter = script(dir.path(), "filter", "exec cat");
        let (printer, buf) = printer(OutputFormat::Raw);
        let cancel = CancellationToken::new();
        let backend = backend(filter);
        let q = query(true);

        let search = execute(
            &backend,
            vec![batch(vec![live], FileSpan::Live)],
            &q,
            printer,
            Duration::from_secs(60),
            cancel.clone(),
        );
        let stopper = async {
            let mut waited = 0;
            while buf.contents().is_empty() && waited < 400 {
                tokio::time::sleep(Duration::from_millis(5)).await;
                waited += 1;
            }
            cancel.cancel();
        };

        let (summary, _) = tokio::join!(search, stopper);
        let summary = summary.unwrap();
        assert!(summary.interrupted);
        assert!(buf.contents().contains("first"));
    }

    /// Interrupt source driven by `notify`.
    fn interrupts(
        notify: Arc<Notify>,
    ) -> impl FnMut() -> std::pin::Pin<Box<dyn Future<Output = io::Result<()>> + Send>> {
        move || {
            let notify = notify.clone();
            Box::pin(async move {
                notify.notified().await;
                Ok(())
            })
        }
    }

    #[tokio::test]
    async fn test_second_interrupt_quits() {
        let notify = Arc::new(Notify::new());
        let cancel = CancellationToken::new();
        let task = tokio::spawn(forward_interrupts(interrupts(notify.clone()), cancel.clone()));

        notify.notify_one();
        cancel.cancelled().await;
        tokio::task::yield_now().await;
        assert!(!task.is_finished());

        notify.notify_one();
        assert!(task.await.unwrap());
    }

    #[tokio::test]
    async fn test_interrupt_listener_failure_leaves_search_running() {
        let cancel = CancellationToken::new();
        let quit = forward_interrupts(
            || async { Err(io::Error::new(io::ErrorKind::Other, "no signal handler")) },
            cancel.clone(),
        )
        .await;
        assert!(!quit);
        assert!(!cancel.is_cancelled());
    }
}
