//! Time→offset seek index.
//!
//! An index file is a flat run of 16-byte entries, each a native-endian
//! `(timestamp_seconds: u64, byte_offset: u64)` pair, in ascending timestamp
//! order. The index for `dir/name` lives at `<index_dir>/.name.idx`, with
//! `index_dir` defaulting to the log's own directory.

use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

pub const ENTRY_SIZE: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexEntry {
    pub timestamp: u64,
    pub offset: u64,
}

/// Decode entries; a trailing partial entry is ignored.
pub fn decode(bytes: &[u8]) -> Vec<IndexEntry> {
    bytes
        .chunks_exact(ENTRY_SIZE)
        .map(|chunk| {
            let (ts, offset) = chunk.split_at(8);
            IndexEntry {
                timestamp: u64::from_ne_bytes(ts.try_into().unwrap_or_default()),
                offset: u64::from_ne_bytes(offset.try_into().unwrap_or_default()),
            }
        })
        .collect()
}

pub fn read_index(path: &Path) -> io::Result<Vec<IndexEntry>> {
    let mut bytes = Vec::new();
    File::open(path)?.read_to_end(&mut bytes)?;
    Ok(decode(&bytes))
}

pub fn index_path(log: &Path, index_dir: Option<&Path>) -> PathBuf {
    let name = log
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let dir = index_dir
        .map(Path::to_path_buf)
        .or_else(|| log.parent().map(Path::to_path_buf))
        .unwrap_or_default();
    dir.join(format!(".{}.idx", name))
}

/// Byte offset to start reading from so that nothing at or after `start` is
/// skipped: the offset of the last entry whose timestamp is `<= start`, or 0.
pub fn seek_offset(entries: &[IndexEntry], start: u64) -> u64 {
    let after = entries.partition_point(|e| e.timestamp <= start);
    after
        .checked_sub(1)
        .map(|i| entries[i].offset)
        .unwrap_or(0)
}

/// Copy `log` to `out`, starting near `start` when an index is available.
/// Returns the number of bytes copied.
pub fn cat_from(
    log: &Path,
    index_dir: Option<&Path>,
    start: u64,
    out: &mut impl Write,
) -> io::Result<u64> {
    let mut file = File::open(log)?;

    let idx = index_path(log, index_dir);
    match read_index(&idx) {
        Ok(entries) => {
            let offset = seek_offset(&entries, start);
            debug!(file = %log.display(), offset, "Seeking via index");
            file.seek(SeekFrom::Start(offset))?;
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }

    io::copy(&mut BufReader::new(file), out)
}
