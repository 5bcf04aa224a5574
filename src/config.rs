use std::time::Duration;

/// The three durability modes governing when appended bytes are forced to
/// stable storage. A closed, tagged union: switched on directly in the
/// writer hot path rather than dispatched through a trait object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Durability {
    /// Fsync after every record; only then is the publish acknowledged.
    FsyncAlways,
    /// Accumulate unacknowledged appends; fsync and drain acks when either
    /// bound is reached.
    FsyncBatch {
        max_events: u32,
        max_millis: u64,
    },
    /// Never fsync from the hot path; rely on the OS page cache, with a
    /// best-effort flush on shutdown.
    OSBuffered,
}

impl Default for Durability {
    fn default() -> Self {
        Durability::FsyncBatch {
            max_events: 64,
            max_millis: 10,
        }
    }
}

impl Durability {
    pub(crate) fn batch_max_millis(&self) -> Option<Duration> {
        match self {
            Durability::FsyncBatch { max_millis, .. } => Some(Duration::from_millis(*max_millis)),
            _ => None,
        }
    }
}

/// Bus-wide configuration. Constructed programmatically by the embedding
/// application; this crate does not parse flags, environment variables, or
/// config files.
#[derive(Debug, Clone)]
pub struct BusConfig {
    pub data_dir: std::path::PathBuf,
    pub durability: Durability,
    pub max_segment_bytes: u64,
    pub timestamp_index_stride: u64,
    pub channel_capacity: usize,
    pub subscriber_buffer: usize,
    pub max_payload_bytes: usize,
    pub max_topic_name_bytes: usize,
}

impl BusConfig {
    pub fn new(data_dir: impl Into<std::path::PathBuf>) -> Self {
        BusConfig {
            data_dir: data_dir.into(),
            ..Self::defaults()
        }
    }

    fn defaults() -> Self {
        BusConfig {
            data_dir: std::path::PathBuf::new(),
            durability: Durability::default(),
            max_segment_bytes: 256 * 1024 * 1024,
            timestamp_index_stride: 10_000,
            channel_capacity: 1024,
            subscriber_buffer: 1024,
            max_payload_bytes: 16 * 1024 * 1024,
            max_topic_name_bytes: 128,
        }
    }
}
