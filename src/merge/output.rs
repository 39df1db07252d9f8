use crate::reader::Record;
use regex::Regex;
use std::io::{self, Write};
use std::sync::{Mutex, MutexGuard, OnceLock, PoisonError};

/// How a record is rendered for output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    /// `# <label>` header followed by the record's raw lines.
    #[default]
    Raw,
    /// One `<timestamp>\t<action>\t<ms>` line per request; other records are dropped.
    Perf,
}

fn perf_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s).*Processing (\S+) .*Completed in (\d+)ms").unwrap())
}

impl OutputFormat {
    pub fn render(&self, record: &Record) -> Option<String> {
        match self {
            OutputFormat::Raw => {
                let body = record.body();
                // Filters usually open a record with a blank line, which then
                // ends the header line itself.
                let sep = if body.starts_with('\n') { "" } else { "\n" };
                Some(format!("\n# {}{}{}", record.label, sep, body))
            }
            OutputFormat::Perf => {
                let body = record.body();
                let caps = perf_regex().captures(&body)?;
                Some(format!("{}\t{}\t{}\n", record.timestamp, &caps[1], &caps[2]))
            }
        }
    }
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// The single output sink shared by the merge buffer and tail-mode readers.
/// Each call writes its records as one uninterrupted chunk.
pub struct Printer {
    out: Mutex<Box<dyn Write + Send>>,
    format: OutputFormat,
}

impl Printer {
    pub fn new(out: Box<dyn Write + Send>, format: OutputFormat) -> Self {
        Self {
            out: Mutex::new(out),
            format,
        }
    }

    pub fn stdout(format: OutputFormat) -> Self {
        Self::new(Box::new(io::stdout()), format)
    }

    pub fn format(&self) -> OutputFormat {
        self.format
    }

    /// Render and write `records` in the given order. Returns how many
    /// produced output.
    pub fn write_records<'a>(
        &self,
        records: impl IntoIterator<Item = &'a Record>,
    ) -> io::Result<usize> {
        let rendered: Vec<String> = records
            .into_iter()
            .filter_map(|r| self.format.render(r))
            .collect();
        if rendered.is_empty() {
            return Ok(0);
        }

        let mut out = lock(&self.out);
        out.write_all(rendered.concat().as_bytes())?;
        out.flush()?;
        Ok(rendered.len())
    }

    pub fn write_record(&self, record: &Record) -> io::Result<bool> {
        self.write_records(std::iter::once(record)).map(|n| n > 0)
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::printer;
    use super::*;

    fn record(ts: i64, label: &str, lines: &[&str]) -> Record {
        Record {
            timestamp: ts,
            label: label.to_string(),
            lines: lines.iter().map(|l| l.to_string()).collect(),
        }
    }

    #[test]
    fn test_raw_format() {
        let r = record(100, "foo/host.1/a.log-20130110", &["Processing xxx\n", "-----\n"]);
        assert_eq!(
            OutputFormat::Raw.render(&r).unwrap(),
            "\n# foo/host.1/a.log-20130110\nProcessing xxx\n-----\n"
        );
    }

    #[test]
    fn test_raw_format_with_leading_blank_line() {
        let r = record(100, "a.log", &["\n", "Processing xxx\n", "---\n"]);
        assert_eq!(
            OutputFormat::Raw.render(&r).unwrap(),
            "\n# a.log\nProcessing xxx\n---\n"
        );
    }

    #[test]
    fn test_perf_format() {
        let r = record(
            1357819200,
            "a.log",
            &["Processing UsersController#show (for 1.2.3.4)\n", "Completed in 120ms\n", "---\n"],
        );
        assert_eq!(
            OutputFormat::Perf.render(&r).unwrap(),
            "1357819200\tUsersController#show\t120\n"
        );
        assert_eq!(OutputFormat::Perf.render(&record(1, "a", &["nothing\n"])), None);
    }

    #[test]
    fn test_printer_writes_in_given_order() {
        let (printer, buf) = printer(OutputFormat::Raw);
        let records = [record(2, "b", &["two\n"]), record(1, "a", &["one\n"])];
        assert_eq!(printer.write_records(&records).unwrap(), 2);
        assert_eq!(buf.contents(), "\n# b\ntwo\n\n# a\none\n");
    }

    #[test]
    fn test_printer_skips_unrendered_records() {
        let (printer, buf) = printer(OutputFormat::Perf);
        assert!(!printer.write_record(&record(1, "a", &["x\n"])).unwrap());
        assert_eq!(buf.contents(), "");
    }
}
