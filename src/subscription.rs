use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::Receiver;
use std::sync::{Arc, Mutex};

use crate::error::{Error, Result};
use crate::id::EventId;
use crate::record::Record;
use crate::segment::{self, SegmentScanner};
use crate::topic::{BroadcastEvent, SubscriberHandle, TopicState};

/// The event type delivered to subscribers; identical in shape to the
/// decoded on-disk record.
pub type Event = Record;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Inclusivity {
    Inclusive,
    Exclusive,
}

/// Specifies where a subscription's replay should begin.
#[derive(Debug, Clone)]
pub enum Cursor {
    Beginning,
    Now,
    Timestamp(i64),
    EventId(EventId, Inclusivity),
}

/// The result of advancing a subscription.
#[derive(Debug)]
pub enum Next {
    Event(Event),
    Lagged(u64),
    End,
}

/// Per-consumer state: replays the on-disk backlog up to the snapshot taken
/// at subscribe time, then seamlessly attaches to the topic's live
/// broadcast, discarding anything already covered by the backlog.
pub struct Subscription {
    id: u64,
    subscribers: Arc<Mutex<HashMap<u64, SubscriberHandle>>>,
    receiver: Receiver<BroadcastEvent>,
    lagged: Arc<AtomicU64>,
    replay: ReplayState,
    ts_filter: Option<i64>,
    snapshot_segment: u32,
    snapshot_offset: u64,
    live: bool,
}

impl Subscription {
    pub(crate) fn new(
        id: u64,
        dir: PathBuf,
        state: Arc<Mutex<TopicState>>,
        subscribers: Arc<Mutex<HashMap<u64, SubscriberHandle>>>,
        receiver: Receiver<BroadcastEvent>,
        lagged: Arc<AtomicU64>,
        cursor: Cursor,
    ) -> Result<Subscription> {
        // Resolved against the indices while the topic's state lock is
        // held; an exclusive event-id cursor additionally needs the
        // matched record's encoded length, which is resolved afterwards by
        // reopening its segment (cheap: one frame).
        enum Resolved {
            Direct(u32, u64, Option<i64>),
            ById(u32, u64, Inclusivity),
        }

        let (resolved, snapshot_segment, snapshot_offset) = {
            let guard = state.lock().unwrap();
            let snapshot_segment = guard.active_segment;
            let snapshot_offset = guard.write_offset;
            let resolved = match cursor {
                Cursor::Beginning => {
                    let segments = segment::discover_segments(&dir)?;
                    let first = segments.first().copied().unwrap_or(0);
                    Resolved::Direct(first, 0, None)
                }
                Cursor::Now => Resolved::Direct(snapshot_segment, snapshot_offset, None),
                Cursor::Timestamp(ts) => {
                    let (seg, offset) = guard.indices.lookup_timestamp_floor(ts);
                    Resolved::Direct(seg, offset, Some(ts))
                }
                Cursor::EventId(ref event_id, inclusivity) => {
                    let loc = guard
                        .indices
                        .lookup_id(event_id)
                        .ok_or(Error::CursorNotFound)?;
                    Resolved::ById(loc.0, loc.1, inclusivity)
                }
            };
            (resolved, snapshot_segment, snapshot_offset)
        };

        let (start_segment, start_offset, ts_filter) = match resolved {
            Resolved::Direct(seg, offset, filter) => (seg, offset, filter),
            Resolved::ById(seg, offset, Inclusivity::Inclusive) => (seg, offset, None),
            Resolved::ById(seg, offset, Inclusivity::Exclusive) => {
                let mut scanner = SegmentScanner::open(&dir, seg, offset)?;
                match scanner.next() {
                    Some(Ok((_, consumed, _))) => (seg, offset + consumed as u64, None),
                    _ => return Err(Error::CursorNotFound),
                }
            }
        };

        let segments = segment::discover_segments(&dir)?
            .into_iter()
            .filter(|&s| s >= start_segment && s <= snapshot_segment)
            .collect::<Vec<_>>();

        let replay = ReplayState {
            dir,
            segments,
            idx: 0,
            current: None,
            start_offset,
            snapshot_segment,
            snapshot_offset,
            finished: false,
        };

        Ok(Subscription {
            id,
            subscribers,
            receiver,
            lagged,
            replay,
            ts_filter,
            snapshot_segment,
            snapshot_offset,
            live: false,
        })
    }

    /// Advances the subscription, returning the next event, a lag signal,
    /// or a terminal end-of-stream marker.
    pub fn next(&mut self) -> Result<Next> {
        loop {
            if !self.live {
                match self.replay.next_item() {
                    Some(Ok((_, _, record))) => {
                        if let Some(t) = self.ts_filter {
                            if record.ts_nanos < t {
                                continue;
                            }
                        }
                        return Ok(Next::Event(record));
                    }
                    Some(Err(err)) => return Err(err),
                    None => {
                        self.live = true;
                    }
                }
                continue;
            }

            let lag = self.lagged.swap(0, Ordering::SeqCst);
            if lag > 0 {
                return Ok(Next::Lagged(lag));
            }

            match self.receiver.recv() {
                Ok(event) => {
                    let already_seen = event.segment_no < self.snapshot_segment
                        || (event.segment_no == self.snapshot_segment
                            && event.offset < self.snapshot_offset);
                    if already_seen {
                        continue;
                    }
                    if let Some(t) = self.ts_filter {
                        if event.record.ts_nanos < t {
                            continue;
                        }
                    }
                    return Ok(Next::Event((*event.record).clone()));
                }
                Err(_) => return Ok(Next::End),
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.subscribers.lock().unwrap().remove(&self.id);
    }
}

struct ReplayState {
    dir: PathBuf,
    segments: Vec<u32>,
    idx: usize,
    current: Option<SegmentScanner>,
    start_offset: u64,
    snapshot_segment: u32,
    snapshot_offset: u64,
    finished: bool,
}

impl ReplayState {
    fn next_item(&mut self) -> Option<Result<(u32, u64, Record)>> {
        if self.finished {
            return None;
        }
        loop {
            if self.current.is_none() {
                if self.idx >= self.segments.len() {
                    self.finished = true;
                    return None;
                }
                let seg_no = self.segments[self.idx];
                let offset = if self.idx == 0 { self.start_offset } else { 0 };
                match SegmentScanner::open(&self.dir, seg_no, offset) {
                    Ok(s) => self.current = Some(s),
                    Err(e) => {
                        self.finished = true;
                        return Some(Err(e));
                    }
                }
            }

            let seg_no = self.segments[self.idx];
            match self.current.as_mut().unwrap().next() {
                Some(Ok((offset, _consumed, record))) => {
                    if seg_no == self.snapshot_segment && offset >= self.snapshot_offset {
                        self.finished = true;
                        return None;
                    }
                    return Some(Ok((seg_no, offset, record)));
                }
                Some(Err(e)) => {
                    self.finished = true;
                    return Some(Err(e));
                }
                None => {
                    if seg_no == self.snapshot_segment {
                        self.finished = true;
                        return None;
                    }
                    self.current = None;
                    self.idx += 1;
                }
            }
        }
    }
}
