use std::collections::HashMap;

use crate::id::EventId;

/// A segment number plus a byte offset within that segment.
pub type Location = (u32, u64);

/// Per-topic in-memory lookup structures: an exact id map and a sampled
/// timestamp sequence for binary-search-based replay seeking.
#[derive(Default)]
pub struct Indices {
    id_map: HashMap<EventId, Location>,
    ts_samples: Vec<(i64, u32, u64)>,
    stride: u64,
    seen_count: u64,
}

impl Indices {
    pub fn new(stride: u64) -> Self {
        Indices {
            id_map: HashMap::new(),
            ts_samples: Vec::new(),
            stride: stride.max(1),
            seen_count: 0,
        }
    }

    /// Records a newly committed event at `location`. Call exactly once per
    /// committed record, in append order.
    pub fn record(&mut self, event_id: EventId, ts_nanos: i64, location: Location) {
        self.id_map.insert(event_id, location);
        self.seen_count += 1;
        if self.seen_count % self.stride == 0 {
            self.ts_samples.push((ts_nanos, location.0, location.1));
        }
    }

    pub fn lookup_id(&self, event_id: &EventId) -> Option<Location> {
        self.id_map.get(event_id).copied()
    }

    pub fn len(&self) -> usize {
        self.id_map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.id_map.is_empty()
    }

    /// Resolves a starting point for replaying from `target_ts`: the
    /// greatest sample with `ts <= target_ts`, or the very beginning if no
    /// sample qualifies. The caller still scans forward from this point
    /// filtering out events with `ts < target_ts`.
    pub fn lookup_timestamp_floor(&self, target_ts: i64) -> Location {
        if self.ts_samples.is_empty() {
            return (0, 0);
        }
        // partition_point: first index where sample.ts > target_ts
        let idx = self.ts_samples.partition_point(|(ts, _, _)| *ts <= target_ts);
        if idx == 0 {
            (0, 0)
        } else {
            let (_, seg, off) = self.ts_samples[idx - 1];
            (seg, off)
        }
    }
}
