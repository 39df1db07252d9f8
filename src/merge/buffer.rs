use crate::merge::output::{lock, Printer};
use crate::reader::Record;
use std::collections::HashMap;
use std::io;
use std::sync::{Arc, Mutex};

pub type PipelineId = usize;

/// How far one pipeline's stream has been read.
///
/// Ordering matters: `Pending < At(_) < Done`, and `At` compares by timestamp,
/// so the horizon is simply the minimum over all pipelines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Watermark {
    /// Registered, nothing read yet.
    Pending,
    At(i64),
    /// Stream exhausted.
    Done,
}

impl Watermark {
    fn releases(&self, timestamp: i64) -> bool {
        match self {
            Watermark::Pending => false,
            Watermark::At(horizon) => timestamp <= *horizon,
            Watermark::Done => true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlushStats {
    pub horizon: Watermark,
    pub released: usize,
    pub retained: usize,
}

#[derive(Default)]
struct BufferState {
    records: Vec<Record>,
    watermarks: HashMap<PipelineId, Watermark>,
}

impl BufferState {
    fn horizon(&self) -> Watermark {
        self.watermarks
            .values()
            .copied()
            .min()
            .unwrap_or(Watermark::Done)
    }
}

/// Records from every pipeline of a run, held until they can be written in
/// timestamp order.
///
/// A record is released once its timestamp is at or before the horizon, the
/// minimum watermark over all registered pipelines. Given that each pipeline
/// delivers its own records in non-decreasing timestamp order, everything
/// released is globally ordered.
pub struct MergeBuffer {
    state: Mutex<BufferState>,
    // Serializes flushes so chunks from two flushes cannot land out of order.
    flushing: Mutex<()>,
    printer: Arc<Printer>,
}

impl MergeBuffer {
    pub fn new(printer: Arc<Printer>) -> Self {
        Self {
            state: Mutex::new(BufferState::default()),
            flushing: Mutex::new(()),
            printer,
        }
    }

    pub fn printer(&self) -> &Arc<Printer> {
        &self.printer
    }

    /// Start tracking a pipeline. Until its first watermark arrives it holds
    /// the horizon back entirely.
    pub fn register(&self, pipeline: PipelineId) {
        lock(&self.state)
            .watermarks
            .insert(pipeline, Watermark::Pending);
    }

    pub fn push(&self, record: Record) {
        lock(&self.state).records.push(record);
    }

    /// Raise a pipeline's watermark. Never lowers it.
    pub fn set_watermark(&self, pipeline: PipelineId, timestamp: i64) {
        let mut state = lock(&self.state);
        let entry = state
            .watermarks
            .entry(pipeline)
            .or_insert(Watermark::Pending);
        *entry = (*entry).max(Watermark::At(timestamp));
    }

    pub fn mark_done(&self, pipeline: PipelineId) {
        lock(&self.state)
            .watermarks
            .insert(pipeline, Watermark::Done);
    }

    /// Stop tracking a pipeline that has finished. Returns false, keeping the
    /// entry, if the pipeline is not done yet.
    pub fn retire(&self, pipeline: PipelineId) -> bool {
        let mut state = lock(&self.state);
        if state.watermarks.get(&pipeline) != Some(&Watermark::Done) {
            return false;
        }
        state.watermarks.remove(&pipeline);
        true
    }

    /// Number of pipelines holding a watermark.
    pub fn tracked(&self) -> usize {
        lock(&self.state).watermarks.len()
    }

    pub fn horizon(&self) -> Watermark {
        lock(&self.state).horizon()
    }

    pub fn buffered(&self) -> usize {
        lock(&self.state).records.len()
    }

    /// Write every record at or before the current horizon, oldest first.
    pub fn flush(&self) -> io::Result<FlushStats> {
        let _flushing = lock(&self.flushing);

        let (horizon, mut release, retained) = {
            let mut state = lock(&self.state);
            let horizon = state.horizon();
            let (release, keep): (Vec<_>, Vec<_>) = std::mem::take(&mut state.records)
                .into_iter()
                .partition(|r| horizon.releases(r.timestamp));
            state.records = keep;
            (horizon, release, state.records.len())
        };

        self.write_sorted(&mut release)?;
        Ok(FlushStats {
            horizon,
            released: release.len(),
            retained,
        })
    }

    /// Write everything still buffered, regardless of watermarks.
    pub fn finish(&self) -> io::Result<usize> {
        let _flushing = lock(&self.flushing);

        let mut remaining = std::mem::take(&mut lock(&self.state).records);
        self.write_sorted(&mut remaining)?;
        Ok(remaining.len())
    }

    fn write_sorted(&self, records: &mut [Record]) -> io::Result<()> {
        // Stable, so one pipeline's records with equal timestamps keep their order.
        records.sort_by_key(|r| r.timestamp);
        self.printer.write_records(records.iter())?;
        Ok(())
    }
}
