use std::path::Path;

use crate::error::{Error, Result};
use crate::index::Indices;
use crate::segment::{self, SegmentScanner, SegmentWriter};

/// State rebuilt from disk before a topic's writer starts serving publishes.
pub struct Recovered {
    pub indices: Indices,
    pub active_segment: u32,
    pub last_ts_nanos: i64,
    pub last_ms_plus_one: u64,
}

/// Runs the recovery procedure for one topic directory: enumerate segments
/// in ascending order, replay each through the codec to rebuild indices,
/// truncate a partial tail found in the final segment, and fail hard on any
/// corruption found earlier in the log.
pub fn recover_topic(dir: &Path, timestamp_index_stride: u64) -> Result<Recovered> {
    std::fs::create_dir_all(dir)?;
    let segments = segment::discover_segments(dir)?;

    if segments.is_empty() {
        SegmentWriter::open(dir, 0)?;
        return Ok(Recovered {
            indices: Indices::new(timestamp_index_stride),
            active_segment: 0,
            last_ts_nanos: 0,
            last_ms_plus_one: 0,
        });
    }

    let mut indices = Indices::new(timestamp_index_stride);
    let mut last_ts_nanos = 0i64;
    let mut last_ms_plus_one = 0u64;
    let last_idx = segments.len() - 1;

    for (i, &segment_no) in segments.iter().enumerate() {
        let is_final = i == last_idx;
        let scanner = SegmentScanner::open(dir, segment_no, 0)?;

        for item in scanner {
            match item {
                Ok((offset, _consumed, record)) => {
                    indices.record(record.event_id, record.ts_nanos, (segment_no, offset));
                    last_ts_nanos = last_ts_nanos.max(record.ts_nanos);
                    last_ms_plus_one = last_ms_plus_one.max(record.event_id.ms_prefix() + 1);
                }
                Err(Error::TruncatedTail(offset)) | Err(Error::CorruptRecord(offset)) => {
                    if !is_final {
                        return Err(Error::UnrecoverableSegment { segment_no, offset });
                    }
                    log::warn!(
                        "truncating segment {segment_no} at offset {offset} during recovery"
                    );
                    let mut writer = SegmentWriter::open(dir, segment_no)?;
                    writer.truncate(offset)?;
                    writer.sync()?;
                    break;
                }
                Err(other) => return Err(other),
            }
        }
    }

    let active_segment = *segments.last().unwrap();
    Ok(Recovered {
        indices,
        active_segment,
        last_ts_nanos,
        last_ms_plus_one,
    })
}
