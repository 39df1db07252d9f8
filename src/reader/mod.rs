pub mod frame;

pub use frame::{FrameEvent, FrameParser, Record};

use crate::merge::{MergeBuffer, PipelineId, Printer};
use std::io;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{debug, trace};

/// Where a reader delivers the records it closes.
#[derive(Clone)]
pub enum RecordSink {
    /// Ordered search: hold records in the merge buffer and publish watermarks.
    Merge {
        buffer: Arc<MergeBuffer>,
        pipeline: PipelineId,
    },
    /// Tail mode: write each record as soon as it closes.
    Direct(Arc<Printer>),
}

impl RecordSink {
    fn watermark(&self, timestamp: i64) {
        if let RecordSink::Merge { buffer, pipeline } = self {
            buffer.set_watermark(*pipeline, timestamp);
        }
    }

    fn record(&self, record: Record) -> io::Result<()> {
        match self {
            RecordSink::Merge { buffer, .. } => buffer.push(record),
            RecordSink::Direct(printer) => {
                printer.write_record(&record)?;
            }
        }
        Ok(())
    }

    fn done(&self) {
        if let RecordSink::Merge { buffer, pipeline } = self {
            buffer.mark_done(*pipeline);
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReadStats {
    pub lines: usize,
    pub records: usize,
    /// A trailing record was still open at end of stream and was dropped.
    pub discarded_partial: bool,
}

/// Parse one pipeline's output until it ends, feeding `sink`.
///
/// The pipeline is marked done when the stream ends, whether cleanly or with
/// a read error, so that it never holds the merge horizon back afterwards.
pub async fn read_records<R>(
    stream: R,
    parser: FrameParser,
    sink: RecordSink,
) -> io::Result<ReadStats>
where
    R: AsyncBufRead + Unpin,
{
    let result = read_loop(stream, parser, &sink).await;
    sink.done();
    result
}

async fn read_loop<R>(mut stream: R, mut parser: FrameParser, sink: &RecordSink) -> io::Result<ReadStats>
where
    R: AsyncBufRead + Unpin,
{
    let mut stats = ReadStats::default();
    let mut buf = Vec::new();

    loop {
        buf.clear();
        if stream.read_until(b'\n', &mut buf).await? == 0 {
            break;
        }
        stats.lines += 1;

        let line = sanitize_utf8(&buf);
        match parser.feed(&line) {
            Some(FrameEvent::Watermark(ts)) => {
                trace!(label = parser.label(), ts, "Watermark");
                sink.watermark(ts);
            }
            Some(FrameEvent::Record(record)) => {
                stats.records += 1;
                sink.record(record)?;
            }
            None => {}
        }
    }

    if let Some(partial) = parser.finish() {
        if !partial.lines.is_empty() {
            debug!(label = %partial.label, "Discarding unterminated trailing record");
            stats.discarded_partial = true;
        }
    }

    Ok(stats)
}

/// Decode as UTF-8, dropping invalid byte sequences.
pub fn sanitize_utf8(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len());
    let mut rest = bytes;

    loop {
        match std::str::from_utf8(rest) {
            Ok(valid) => {
                out.push_str(valid);
                return out;
            }
            Err(e) => {
                let (valid, after) = rest.split_at(e.valid_up_to());
                out.push_str(std::str::from_utf8(valid).unwrap_or_default());
                let skip = e.error_len().unwrap_or(after.len());
                rest = &after[skip..];
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merge::output::test_support::printer;
    use crate::merge::{OutputFormat, Watermark};
    use tokio::io::AsyncWriteExt;

    #[test]
    fn test_sanitize_removes_invalid_utf8() {
        assert_eq!(sanitize_utf8(b"\xE2\x82\xACfoo\xA0bar"), "€foobar");
        assert_eq!(sanitize_utf8(b"plain\n"), "plain\n");
        // Truncated multi-byte sequence at the end.
        assert_eq!(sanitize_utf8(b"ab\xE2\x82"), "ab");
    }

    #[tokio::test]
    async fn test_reader_feeds_merge_buffer() {
        let (printer, buf) = printer(OutputFormat::Raw);
        let buffer = Arc::new(MergeBuffer::new(printer));
        buffer.register(7);

        let input: &[u8] = b"@@100\nline1\n---\n@@105\nline2\n---\n";
        let stats = read_records(
            input,
            FrameParser::new("", "a.log"),
            RecordSink::Merge {
                buffer: buffer.clone(),
                pipeline: 7,
            },
        )
        .await
        .unwrap();

        assert_eq!(stats.records, 2);
        assert!(!stats.discarded_partial);
        assert_eq!(buffer.horizon(), Watermark::Done);
        assert_eq!(buffer.buffered(), 2);

        buffer.flush().unwrap();
        assert_eq!(buf.contents(), "\n# a.log\nline1\n---\n\n# a.log\nline2\n---\n");
    }

    #[tokio::test]
    async fn test_reader_drops_trailing_fragment() {
        let (printer, buf) = printer(OutputFormat::Raw);
        let input: &[u8] = b"@@100\nkept\n---\n@@101\nnever closed\n";

        let stats = read_records(input, FrameParser::new("", "a.log"), RecordSink::Direct(printer))
            .await
            .unwrap();

        assert_eq!(stats.records, 1);
        assert!(stats.discarded_partial);
        assert_eq!(buf.contents(), "\n# a.log\nkept\n---\n");
    }

    #[tokio::test]
    async fn test_tail_sink_writes_immediately() {
        let (printer, buf) = printer(OutputFormat::Raw);
        let (mut tx, rx) = tokio::io::duplex(64);

        let reader = tokio::spawn(read_records(
            tokio::io::BufReader::new(rx),
            FrameParser::new("", "live.log"),
            RecordSink::Direct(printer),
        ));

        tx.write_all(b"@@1\nfirst\n---\n").await.unwrap();

        // Written while the stream is still open.
        let mut waited = 0;
        while buf.contents().is_empty() && waited < 200 {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            waited += 1;
        }
        assert_eq!(buf.contents(), "\n# live.log\nfirst\n---\n");

        drop(tx);
        let stats = reader.await.unwrap().unwrap();
        assert_eq!(stats.records, 1);
    }

    #[tokio::test]
    async fn test_invalid_bytes_inside_record() {
        let (printer, buf) = printer(OutputFormat::Raw);
        let input: &[u8] = b"@@9\nbad\xFFbyte\n---\n";
        read_records(input, FrameParser::new("", "x"), RecordSink::Direct(printer))
            .await
            .unwrap();
        assert_eq!(buf.contents(), "\n# x\nbadbyte\n---\n");
    }
}
