use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::record::{self, Record};

/// Returns the on-disk filename for a segment number: `log-{N:08}.seg`.
pub fn segment_filename(segment_no: u32) -> String {
    format!("log-{segment_no:08}.seg")
}

pub fn segment_path(dir: &Path, segment_no: u32) -> PathBuf {
    dir.join(segment_filename(segment_no))
}

/// Parses a segment filename back into its segment number, rejecting
/// anything that doesn't match `log-{8 digits}.seg` exactly.
pub fn parse_segment_filename(name: &str) -> Option<u32> {
    let stem = name.strip_prefix("log-")?.strip_suffix(".seg")?;
    if stem.len() != 8 || !stem.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    stem.parse().ok()
}

/// Lists segment numbers present in `dir`, ascending. Missing directory
/// yields an empty list.
pub fn discover_segments(dir: &Path) -> Result<Vec<u32>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut found = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if let Some(name) = entry.file_name().to_str() {
            if let Some(seg) = parse_segment_filename(name) {
                found.push(seg);
            }
        }
    }
    found.sort_unstable();
    Ok(found)
}

/// The next segment number to create, given what's already on disk.
pub fn next_segment_id(existing: &[u32]) -> u32 {
    existing.iter().max().map(|n| n + 1).unwrap_or(0)
}

/// Owns the append handle for the single active segment of a topic.
///
/// The sole mutation point for segment bytes: `append` is the only way new
/// records reach disk, matching the "must be the sole mutation point"
/// requirement on the append operation.
pub struct SegmentWriter {
    dir: PathBuf,
    segment_no: u32,
    file: File,
    len: u64,
}

impl SegmentWriter {
    /// Opens `segment_no` for appending, creating it if absent.
    pub fn open(dir: &Path, segment_no: u32) -> Result<Self> {
        fs::create_dir_all(dir)?;
        let path = segment_path(dir, segment_no);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .read(true)
            .open(&path)?;
        let len = file.metadata()?.len();
        Ok(SegmentWriter {
            dir: dir.to_path_buf(),
            segment_no,
            file,
            len,
        })
    }

    pub fn segment_no(&self) -> u32 {
        self.segment_no
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// True if appending `next_record_len` more bytes would exceed the
    /// configured segment size cap.
    pub fn needs_roll(&self, next_record_len: usize, max_segment_bytes: u64) -> bool {
        !self.is_empty() && self.len + next_record_len as u64 > max_segment_bytes
    }

    /// Appends `bytes` at the current end of the segment and returns the
    /// start offset of the write.
    pub fn append(&mut self, bytes: &[u8]) -> Result<u64> {
        let offset = self.len;
        self.file.write_all(bytes)?;
        self.len += bytes.len() as u64;
        Ok(offset)
    }

    pub fn sync(&self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }

    /// Truncates this segment to `offset`. Used by recovery to drop a
    /// partial tail record.
    pub fn truncate(&mut self, offset: u64) -> Result<()> {
        self.file.set_len(offset)?;
        self.len = offset;
        Ok(())
    }

    /// Seals the current segment (fsync) and opens the next one.
    pub fn rotate(self) -> Result<Self> {
        self.sync()?;
        SegmentWriter::open(&self.dir, self.segment_no + 1)
    }
}

/// Reads one record at the given byte offset within a segment, validating
/// CRC and framing.
pub fn read_record(dir: &Path, segment_no: u32, offset: u64) -> Result<Record> {
    let path = segment_path(dir, segment_no);
    let mut file = File::open(&path)?;
    file.seek(SeekFrom::Start(offset))?;
    let mut buf = Vec::new();
    file.read_to_end(&mut buf)?;
    let (record, _) = record::decode(&buf, offset)?;
    Ok(record)
}

/// Lazily scans every valid record in a segment starting at `offset`, in
/// order, stopping at end-of-file or the first corrupt/truncated frame.
pub struct SegmentScanner {
    reader: std::io::BufReader<File>,
    offset: u64,
    file_len: u64,
    done: bool,
}

impl SegmentScanner {
    pub fn open(dir: &Path, segment_no: u32, offset: u64) -> Result<Self> {
        let path = segment_path(dir, segment_no);
        let mut file = File::open(&path)?;
        let file_len = file.metadata()?.len();
        file.seek(SeekFrom::Start(offset))?;
        Ok(SegmentScanner {
            reader: std::io::BufReader::new(file),
            offset,
            file_len,
            done: false,
        })
    }
}

impl Iterator for SegmentScanner {
    /// `(start_offset, bytes_consumed, record)` for each valid frame.
    type Item = Result<(u64, usize, Record)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        // Read the fixed header first so we know how much more to pull in.
        let mut header = [0u8; 12];
        let read = match read_fully_or_partial(&mut self.reader, &mut header) {
            Ok(n) => n,
            Err(err) => {
                self.done = true;
                return Some(Err(err.into()));
            }
        };
        if read == 0 {
            self.done = true;
            return None;
        }
        if read < header.len() {
            self.done = true;
            return Some(Err(Error::TruncatedTail(self.offset)));
        }
        let record_len = u32::from_le_bytes(header[8..12].try_into().unwrap()) as usize;

        // Validate the claimed length against what's actually left in the
        // file before allocating: a torn or garbage header must never drive
        // a multi-gigabyte allocation during recovery.
        let remaining = self
            .file_len
            .saturating_sub(self.offset + header.len() as u64);
        if record_len as u64 > remaining {
            self.done = true;
            return Some(Err(Error::TruncatedTail(self.offset)));
        }

        let mut rest = vec![0u8; record_len];
        let read_rest = match read_fully_or_partial(&mut self.reader, &mut rest) {
            Ok(n) => n,
            Err(err) => {
                self.done = true;
                return Some(Err(err.into()));
            }
        };
        if read_rest < rest.len() {
            self.done = true;
            return Some(Err(Error::TruncatedTail(self.offset)));
        }
        let mut full = Vec::with_capacity(header.len() + rest.len());
        full.extend_from_slice(&header);
        full.extend_from_slice(&rest);

        match record::decode(&full, self.offset) {
            Ok((record, consumed)) => {
                let start = self.offset;
                self.offset += consumed as u64;
                Some(Ok((start, consumed, record)))
            }
            Err(err) => {
                self.done = true;
                Some(Err(err))
            }
        }
    }
}

/// Reads until `buf` is full or the underlying reader reaches true EOF,
/// returning the number of bytes actually read (which is `< buf.len()` only
/// on EOF, never on a transient short read).
fn read_fully_or_partial(reader: &mut impl Read, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut total = 0;
    while total < buf.len() {
        match reader.read(&mut buf[total..]) {
            Ok(0) => break,
            Ok(n) => total += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filename_round_trip() {
        assert_eq!(segment_filename(7), "log-00000007.seg");
        assert_eq!(parse_segment_filename("log-00000007.seg"), Some(7));
        assert_eq!(parse_segment_filename("log-7.seg"), None);
        assert_eq!(parse_segment_filename("other.seg"), None);
    }

    #[test]
    fn rotate_seals_current_and_opens_next() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = SegmentWriter::open(dir.path(), 0).unwrap();
        writer.append(b"hello").unwrap();
        let rotated = writer.rotate().unwrap();
        assert_eq!(rotated.segment_no(), 1);
        assert_eq!(rotated.len(), 0);
        assert_eq!(discover_segments(dir.path()).unwrap(), vec![0, 1]);
    }

    #[test]
    fn discover_and_next_segment_id() {
        let dir = tempfile::tempdir().unwrap();
        SegmentWriter::open(dir.path(), 0).unwrap();
        SegmentWriter::open(dir.path(), 1).unwrap();
        let segs = discover_segments(dir.path()).unwrap();
        assert_eq!(segs, vec![0, 1]);
        assert_eq!(next_segment_id(&segs), 2);
    }

    #[test]
    fn append_and_scan_round_trip() {
        use crate::id::IdGenerator;
        use std::collections::BTreeMap;

        let dir = tempfile::tempdir().unwrap();
        let mut writer = SegmentWriter::open(dir.path(), 0).unwrap();
        let gen = IdGenerator::new();
        for i in 0..5u64 {
            let rec = Record {
                event_id: gen.next(1_000_000 + i as i64),
                ts_nanos: 1_000_000 + i as i64,
                topic: "t".to_string(),
                payload: format!("payload-{i}").into_bytes(),
                headers: BTreeMap::new(),
            };
            let bytes = record::encode(&rec, 1 << 20, 255).unwrap();
            writer.append(&bytes).unwrap();
        }
        writer.sync().unwrap();

        let scanner = SegmentScanner::open(dir.path(), 0, 0).unwrap();
        let records: Vec<_> = scanner.collect::<Result<Vec<_>>>().unwrap();
        assert_eq!(records.len(), 5);
        for (i, (_, _, rec)) in records.iter().enumerate() {
            assert_eq!(rec.payload, format!("payload-{i}").into_bytes());
        }
    }

    #[test]
    fn truncated_tail_surfaces_and_is_recoverable() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = SegmentWriter::open(dir.path(), 0).unwrap();
        let good_len = {
            use crate::id::IdGenerator;
            use std::collections::BTreeMap;
            let gen = IdGenerator::new();
            let rec = Record {
                event_id: gen.next(1_000_000),
                ts_nanos: 1_000_000,
                topic: "t".to_string(),
                payload: b"hello".to_vec(),
                headers: BTreeMap::new(),
            };
            let bytes = record::encode(&rec, 1 << 20, 255).unwrap();
            writer.append(&bytes).unwrap();
            writer.len()
        };
        // Append a partial frame that never completes.
        writer.append(&[0xAA; 17]).unwrap();
        writer.sync().unwrap();
        drop(writer);

        let mut scanner = SegmentScanner::open(dir.path(), 0, 0).unwrap();
        let first = scanner.next().unwrap().unwrap();
        assert_eq!(first.0, 0);
        let second = scanner.next().unwrap();
        assert!(matches!(second, Err(Error::TruncatedTail(offset)) if offset == good_len));
    }
}
