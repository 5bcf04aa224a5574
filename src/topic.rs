use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender, SyncSender, TrySendError};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::clock::Clock;
use crate::config::{BusConfig, Durability};
use crate::error::{Error, Result};
use crate::id::{EventId, IdGenerator};
use crate::index::Indices;
use crate::record::{self, Record};
use crate::recovery;
use crate::segment::SegmentWriter;
use crate::subscription::{Cursor, Subscription};

/// One committed event tagged with its file location, as fanned out to live
/// subscribers. The `(segment_no, offset)` tag is what lets a subscription
/// stitch the live stream onto the end of its backlog scan without gaps or
/// duplicates (see `Subscription`).
#[derive(Clone)]
pub struct BroadcastEvent {
    pub segment_no: u32,
    pub offset: u64,
    pub record: Arc<Record>,
}

struct PublishRequest {
    payload: Vec<u8>,
    headers: BTreeMap<String, String>,
    ack: Sender<Result<EventId>>,
}

pub(crate) struct SubscriberHandle {
    pub sender: SyncSender<BroadcastEvent>,
    pub lagged: Arc<AtomicU64>,
}

/// Shared, mutex-guarded topic state read by subscribers (to resolve a
/// cursor against the current indices and log position) and written by the
/// topic's own writer thread after each committed append.
pub(crate) struct TopicState {
    pub indices: Indices,
    pub active_segment: u32,
    pub write_offset: u64,
}

#[derive(Default)]
pub struct WriterMetrics {
    pub records_appended: AtomicU64,
    pub bytes_appended: AtomicU64,
    pub fsyncs: AtomicU64,
    pub segments_rotated: AtomicU64,
    pub subscribers_lagged: AtomicU64,
}

/// A single topic: one dedicated writer thread serializing every append,
/// index mutation, and broadcast for this topic; publishers and subscribers
/// only ever talk to it through channels.
pub struct Topic {
    pub(crate) name: String,
    pub(crate) dir: PathBuf,
    pub(crate) config: Arc<BusConfig>,
    sender: SyncSender<PublishRequest>,
    pub(crate) state: Arc<Mutex<TopicState>>,
    pub(crate) subscribers: Arc<Mutex<HashMap<u64, SubscriberHandle>>>,
    next_subscriber_id: AtomicU64,
    shutdown: Arc<AtomicBool>,
    join: Mutex<Option<JoinHandle<()>>>,
    pub metrics: Arc<WriterMetrics>,
}

impl Topic {
    pub(crate) fn open(
        name: String,
        config: Arc<BusConfig>,
        clock: Arc<dyn Clock>,
    ) -> Result<Arc<Topic>> {
        let dir = config.data_dir.join("topics").join(&name);
        let recovered = recovery::recover_topic(&dir, config.timestamp_index_stride)?;

        let id_gen = IdGenerator::new();
        id_gen.seed(recovered.last_ms_plus_one);

        let segment_writer = SegmentWriter::open(&dir, recovered.active_segment)?;
        let state = Arc::new(Mutex::new(TopicState {
            indices: recovered.indices,
            active_segment: recovered.active_segment,
            write_offset: segment_writer.len(),
        }));

        let (sender, receiver) = mpsc::sync_channel(config.channel_capacity);
        let subscribers: Arc<Mutex<HashMap<u64, SubscriberHandle>>> = Arc::default();
        let shutdown = Arc::new(AtomicBool::new(false));
        let metrics = Arc::new(WriterMetrics::default());

        let topic = Arc::new(Topic {
            name: name.clone(),
            dir: dir.clone(),
            config: config.clone(),
            sender,
            state: state.clone(),
            subscribers: subscribers.clone(),
            next_subscriber_id: AtomicU64::new(0),
            shutdown: shutdown.clone(),
            join: Mutex::new(None),
            metrics: metrics.clone(),
        });

        let worker = WriterThread {
            name,
            dir,
            config,
            clock,
            id_gen,
            last_ts_nanos: recovered.last_ts_nanos,
            segment_writer,
            state,
            subscribers,
            shutdown,
            metrics,
            pending_acks: Vec::new(),
        };
        let handle = std::thread::spawn(move || worker.run(receiver));
        *topic.join.lock().unwrap() = Some(handle);

        Ok(topic)
    }

    /// Publishes `payload` (with optional headers) and blocks for the
    /// writer's acknowledgement, returning the minted event id.
    pub fn publish(
        &self,
        payload: Vec<u8>,
        headers: Option<BTreeMap<String, String>>,
    ) -> Result<EventId> {
        if self.shutdown.load(Ordering::SeqCst) {
            return Err(Error::Shutdown);
        }
        let (ack_tx, ack_rx) = mpsc::channel();
        let request = PublishRequest {
            payload,
            headers: headers.unwrap_or_default(),
            ack: ack_tx,
        };
        match self.sender.try_send(request) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => return Err(Error::QueueFull),
            Err(TrySendError::Disconnected(_)) => return Err(Error::Shutdown),
        }
        ack_rx.recv().map_err(|_| Error::Shutdown)?
    }

    /// Opens a new subscription starting at `cursor`.
    pub fn subscribe(&self, cursor: Cursor) -> Result<Subscription> {
        let id = self.next_subscriber_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::sync_channel(self.config.subscriber_buffer);
        let lagged = Arc::new(AtomicU64::new(0));
        self.subscribers.lock().unwrap().insert(
            id,
            SubscriberHandle {
                sender: tx,
                lagged: lagged.clone(),
            },
        );
        Subscription::new(
            id,
            self.dir.clone(),
            self.state.clone(),
            self.subscribers.clone(),
            rx,
            lagged,
            cursor,
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Signals shutdown: subsequent publishes fail fast, the writer thread
    /// drains what's already enqueued, fsyncs once, and every subscriber
    /// observes a terminal signal.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(handle) = self.join.lock().unwrap().take() {
            let _ = handle.join();
        }
    }
}

struct WriterThread {
    name: String,
    dir: PathBuf,
    config: Arc<BusConfig>,
    clock: Arc<dyn Clock>,
    id_gen: IdGenerator,
    last_ts_nanos: i64,
    segment_writer: SegmentWriter,
    state: Arc<Mutex<TopicState>>,
    subscribers: Arc<Mutex<HashMap<u64, SubscriberHandle>>>,
    shutdown: Arc<AtomicBool>,
    metrics: Arc<WriterMetrics>,
    /// Acks for committed-but-not-yet-fsynced `FsyncBatch` records; sent only
    /// once `maybe_flush_batch` has synced the bytes to stable storage, so an
    /// ack always implies durability even under batching.
    pending_acks: Vec<(Sender<Result<EventId>>, EventId)>,
}

impl WriterThread {
    fn run(mut self, receiver: Receiver<PublishRequest>) {
        let mut pending_since: Option<Instant> = None;
        let mut pending_count: u32 = 0;
        let poll_interval = self
            .config
            .durability
            .batch_max_millis()
            .unwrap_or(Duration::from_millis(200));

        loop {
            match receiver.recv_timeout(poll_interval) {
                Ok(request) => {
                    self.handle_publish(request, &mut pending_since, &mut pending_count);
                }
                Err(mpsc::RecvTimeoutError::Timeout) => {
                    self.maybe_flush_batch(&mut pending_since, &mut pending_count, true);
                    if self.shutdown.load(Ordering::SeqCst) {
                        break;
                    }
                }
                Err(mpsc::RecvTimeoutError::Disconnected) => break,
            }
            if self.shutdown.load(Ordering::SeqCst) {
                // Drain whatever is already queued before exiting.
                while let Ok(request) = receiver.try_recv() {
                    self.handle_publish(request, &mut pending_since, &mut pending_count);
                }
                break;
            }
        }

        let sync_result = self.segment_writer.sync();
        self.metrics.fsyncs.fetch_add(1, Ordering::Relaxed);
        self.drain_pending_acks(sync_result.is_err());
        self.subscribers.lock().unwrap().clear();
    }

    /// Sends every buffered `FsyncBatch` ack now that a fsync has been
    /// attempted, reporting `IoFailure` instead of the minted id if that
    /// fsync failed.
    fn drain_pending_acks(&mut self, sync_failed: bool) {
        for (ack, event_id) in self.pending_acks.drain(..) {
            let outcome = if sync_failed {
                Err(Error::IoFailure(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "batched fsync failed",
                )))
            } else {
                Ok(event_id)
            };
            let _ = ack.send(outcome);
        }
    }

    fn handle_publish(
        &mut self,
        request: PublishRequest,
        pending_since: &mut Option<Instant>,
        pending_count: &mut u32,
    ) {
        let result = self.append_one(&request.payload, request.headers);
        match &result {
            Ok(_) => {
                *pending_count += 1;
                if pending_since.is_none() {
                    *pending_since = Some(Instant::now());
                }
            }
            Err(_) => {}
        }
        let durability = self.config.durability;
        match durability {
            Durability::FsyncAlways => {
                if result.is_ok() {
                    let _ = self.segment_writer.sync();
                    self.metrics.fsyncs.fetch_add(1, Ordering::Relaxed);
                    *pending_since = None;
                    *pending_count = 0;
                }
                let _ = request.ack.send(result);
            }
            Durability::OSBuffered => {
                let _ = request.ack.send(result);
            }
            Durability::FsyncBatch { max_events, .. } => {
                match result {
                    Ok(event_id) => self.pending_acks.push((request.ack, event_id)),
                    Err(_) => {
                        let _ = request.ack.send(result);
                    }
                }
                if *pending_count >= max_events {
                    self.maybe_flush_batch(pending_since, pending_count, false);
                }
            }
        }
    }

    fn maybe_flush_batch(
        &mut self,
        pending_since: &mut Option<Instant>,
        pending_count: &mut u32,
        time_triggered: bool,
    ) {
        if *pending_count == 0 {
            return;
        }
        if let Durability::FsyncBatch { max_millis, .. } = self.config.durability {
            let elapsed_ok = pending_since
                .map(|t| t.elapsed() >= Duration::from_millis(max_millis))
                .unwrap_or(false);
            if time_triggered && !elapsed_ok {
                return;
            }
        }
        let sync_result = self.segment_writer.sync();
        self.metrics.fsyncs.fetch_add(1, Ordering::Relaxed);
        *pending_since = None;
        *pending_count = 0;
        self.drain_pending_acks(sync_result.is_err());
    }

    fn append_one(
        &mut self,
        payload: &[u8],
        headers: BTreeMap<String, String>,
    ) -> Result<EventId> {
        let now_nanos = self.clock.now_nanos();
        let ts_nanos = now_nanos.max(self.last_ts_nanos);
        self.last_ts_nanos = ts_nanos;
        let event_id = self.id_gen.next(now_nanos);

        let record = Record {
            event_id,
            ts_nanos,
            topic: self.name.clone(),
            payload: payload.to_vec(),
            headers,
        };
        let bytes = record::encode(
            &record,
            self.config.max_payload_bytes,
            self.config.max_topic_name_bytes,
        )?;

        if self
            .segment_writer
            .needs_roll(bytes.len(), self.config.max_segment_bytes)
        {
            let next_no = self.segment_writer.segment_no() + 1;
            let old = std::mem::replace(
                &mut self.segment_writer,
                SegmentWriter::open(&self.dir, next_no)?,
            );
            old.sync()?;
            self.metrics.segments_rotated.fetch_add(1, Ordering::Relaxed);
            let mut state = self.state.lock().unwrap();
            state.active_segment = self.segment_writer.segment_no();
            state.write_offset = 0;
        }

        let offset = self.segment_writer.append(&bytes)?;
        self.metrics.records_appended.fetch_add(1, Ordering::Relaxed);
        self.metrics
            .bytes_appended
            .fetch_add(bytes.len() as u64, Ordering::Relaxed);

        let segment_no = self.segment_writer.segment_no();
        {
            let mut state = self.state.lock().unwrap();
            state
                .indices
                .record(record.event_id, record.ts_nanos, (segment_no, offset));
            state.write_offset = self.segment_writer.len();
        }

        self.broadcast(segment_no, offset, record);
        Ok(event_id)
    }

    fn broadcast(&self, segment_no: u32, offset: u64, record: Record) {
        let event = BroadcastEvent {
            segment_no,
            offset,
            record: Arc::new(record),
        };
        let mut subscribers = self.subscribers.lock().unwrap();
        let mut stale = Vec::new();
        for (id, handle) in subscribers.iter() {
            match handle.sender.try_send(event.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    handle.lagged.fetch_add(1, Ordering::SeqCst);
                    self.metrics.subscribers_lagged.fetch_add(1, Ordering::Relaxed);
                }
                Err(TrySendError::Disconnected(_)) => stale.push(*id),
            }
        }
        for id in stale {
            subscribers.remove(&id);
        }
    }
}
