//! Line-level state machine for the filter's framing protocol.
//!
//! ```text
//! @@<epoch>        timestamp confirmed so far; opens a new record
//! @@FILE:<suffix>  following records come from <prefix><suffix>
//! ---...           closes the open record, opens the next one
//! anything else    body line of the open record
//! ```

/// A reconstructed log entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Timestamp of the last marker seen before the record opened.
    pub timestamp: i64,
    /// Display label of the file the record came from.
    pub label: String,
    /// Raw lines, newline-terminated, boundary line included.
    pub lines: Vec<String>,
}

impl Record {
    fn open(timestamp: i64, label: &str) -> Self {
        Self {
            timestamp,
            label: label.to_string(),
            lines: Vec::new(),
        }
    }

    pub fn body(&self) -> String {
        self.lines.concat()
    }
}

/// What a single line produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameEvent {
    /// This stream has been read up to the given timestamp.
    Watermark(i64),
    /// A record was closed by a boundary marker.
    Record(Record),
}

#[derive(Debug)]
pub struct FrameParser {
    prefix: String,
    label: String,
    last_timestamp: Option<i64>,
    open: Option<Record>,
}

impl FrameParser {
    /// `prefix` is prepended to names announced with `@@FILE:`; `label` is the
    /// label used until such an announcement.
    pub fn new(prefix: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            label: label.into(),
            last_timestamp: None,
            open: None,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Feed one line, including its trailing newline if it had one.
    pub fn feed(&mut self, line: &str) -> Option<FrameEvent> {
        if let Some(suffix) = line.strip_prefix("@@FILE:") {
            self.label = format!("{}{}", self.prefix, suffix.trim_end_matches(&['\n', '\r'][..]));
            return None;
        }

        if let Some(ts) = parse_timestamp_marker(line) {
            self.last_timestamp = Some(ts);
            self.open = Some(Record::open(ts, &self.label));
            return Some(FrameEvent::Watermark(ts));
        }

        if line.starts_with("---") {
            let closed = self.open.take().map(|mut record| {
                record.lines.push(line.to_string());
                record
            });
            if let Some(ts) = self.last_timestamp {
                self.open = Some(Record::open(ts, &self.label));
            }
            // A boundary right after another boundary closes nothing worth printing.
            return closed
                .filter(|record| record.lines.len() > 1)
                .map(FrameEvent::Record);
        }

        if let Some(record) = self.open.as_mut() {
            record.lines.push(line.to_string());
        }
        None
    }

    /// Take the record still open at end of stream. Its end was never
    /// confirmed by the filter, so callers discard it.
    pub fn finish(&mut self) -> Option<Record> {
        self.open.take()
    }
}

/// `@@<digits>` at line start, trailing text ignored.
fn parse_timestamp_marker(line: &str) -> Option<i64> {
    let rest = line.strip_prefix("@@")?;
    let end = rest
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(rest.len());
    if end == 0 {
        return None;
    }
    rest[..end].parse().ok()
}
