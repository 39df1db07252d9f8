use crate::index::cat_from;
use std::io::{self, Write};
use std::path::Path;

/// Copy `file` to stdout from near `start`, using its seek index when present.
pub fn run(file: &Path, start: u64, index_dir: Option<&Path>) -> io::Result<()> {
    let stdout = io::stdout();
    let mut out = io::BufWriter::new(stdout.lock());

    match cat_from(file, index_dir, start, &mut out).and_then(|_| out.flush()) {
        // The filter stops reading once it is past the end of the range.
        Err(e) if e.kind() == io::ErrorKind::BrokenPipe => Ok(()),
        other => other,
    }
}
