pub mod buffer;
pub mod output;

pub use buffer::{FlushStats, MergeBuffer, PipelineId, Watermark};
pub use output::{OutputFormat, Printer};

use crate::query::format_time;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// A [`MergeBuffer`] plus the background task that flushes it on a fixed
/// interval.
pub struct Merger {
    buffer: Arc<MergeBuffer>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl Merger {
    pub fn start(printer: Arc<Printer>, interval: Duration) -> Self {
        let buffer = Arc::new(MergeBuffer::new(printer));
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_flusher(buffer.clone(), interval, cancel.clone()));

        Self {
            buffer,
            cancel,
            task,
        }
    }

    pub fn buffer(&self) -> &Arc<MergeBuffer> {
        &self.buffer
    }

    /// Stop the flusher and write out everything left.
    pub async fn finish(self) -> io::Result<usize> {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            warn!(error = %e, "Flusher task failed");
        }
        self.buffer.finish()
    }
}

async fn run_flusher(buffer: Arc<MergeBuffer>, interval: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(interval);
    // The first tick completes immediately.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                match buffer.flush() {
                    Ok(stats) => {
                        if let Watermark::At(horizon) = stats.horizon {
                            debug!(
                                released = stats.released,
                                retained = stats.retained,
                                "Searched up through {}",
                                format_time(horizon)
                            );
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "Failed to write search output, stopping flusher");
                        break;
                    }
                }
            }
        }
    }
}
