use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::clock::{Clock, SystemClock};
use crate::config::BusConfig;
use crate::error::{Error, Result};
use crate::subscription::{Cursor, Subscription};
use crate::topic::Topic;

const FORMAT_VERSION: u32 = 1;

/// Bus-wide metadata persisted at `<data_dir>/bus.meta.json`.
#[derive(Debug, Serialize, Deserialize)]
pub struct BusMeta {
    pub format_version: u32,
    pub topics: Vec<String>,
}

/// The top-level handle to an embedded bus: owns the topic registry, the
/// meta file, and the shutdown latch. Process-scoped but explicitly
/// constructed and shut down; there is no hidden singleton.
pub struct Bus {
    config: Arc<BusConfig>,
    clock: Arc<dyn Clock>,
    topics: Mutex<HashMap<String, Arc<Topic>>>,
    meta_path: PathBuf,
    shutdown: AtomicBool,
}

impl Bus {
    /// Opens (or creates) a bus at `config.data_dir`. Per-topic recovery
    /// happens lazily on first `topic()` call, not eagerly here, but the
    /// meta file's topic list is loaded immediately so `topic_names()`
    /// reflects topics known from a prior run before any of them are
    /// reopened.
    pub fn open(config: BusConfig) -> Result<Bus> {
        fs::create_dir_all(&config.data_dir)?;
        let meta_path = config.data_dir.join("bus.meta.json");
        if !meta_path.exists() {
            write_meta_atomic(
                &meta_path,
                &BusMeta {
                    format_version: FORMAT_VERSION,
                    topics: Vec::new(),
                },
            )?;
        } else {
            let meta = read_meta(&meta_path)?;
            if meta.format_version != FORMAT_VERSION {
                return Err(Error::Unsupported("unrecognized bus meta format_version"));
            }
        }

        Ok(Bus {
            config: Arc::new(config),
            clock: Arc::new(SystemClock),
            topics: Mutex::new(HashMap::new()),
            meta_path,
            shutdown: AtomicBool::new(false),
        })
    }

    /// Substitutes the wall-clock source, for deterministic tests.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Opens the named topic, starting its writer thread (and running
    /// recovery) on first open.
    pub fn topic(&self, name: &str) -> Result<Arc<Topic>> {
        if self.shutdown.load(Ordering::SeqCst) {
            return Err(Error::Shutdown);
        }
        if name.is_empty() || name.len() > self.config.max_topic_name_bytes {
            return Err(Error::LimitExceeded { field: "topic_name" });
        }

        let mut topics = self.topics.lock().unwrap();
        if let Some(topic) = topics.get(name) {
            return Ok(topic.clone());
        }

        let topic = Topic::open(name.to_string(), self.config.clone(), self.clock.clone())?;
        topics.insert(name.to_string(), topic.clone());
        self.persist_topic_name(name)?;
        Ok(topic)
    }

    /// Convenience: publish directly without holding onto a `Topic` handle.
    pub fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        headers: Option<std::collections::BTreeMap<String, String>>,
    ) -> Result<crate::id::EventId> {
        self.topic(topic)?.publish(payload, headers)
    }

    /// Convenience: subscribe directly without holding onto a `Topic` handle.
    pub fn subscribe(&self, topic: &str, cursor: Cursor) -> Result<Subscription> {
        self.topic(topic)?.subscribe(cursor)
    }

    /// Topic names known to this bus, including ones not yet reopened this
    /// process lifetime.
    pub fn topic_names(&self) -> Result<Vec<String>> {
        Ok(read_meta(&self.meta_path)?.topics)
    }

    pub fn meta(&self) -> Result<BusMeta> {
        read_meta(&self.meta_path)
    }

    /// Signals every topic's writer to drain and stop. Idempotent.
    pub fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }
        let topics = self.topics.lock().unwrap();
        for topic in topics.values() {
            topic.shutdown();
        }
    }

    fn persist_topic_name(&self, name: &str) -> Result<()> {
        let mut meta = read_meta(&self.meta_path)?;
        if !meta.topics.iter().any(|t| t == name) {
            meta.topics.push(name.to_string());
            write_meta_atomic(&self.meta_path, &meta)?;
        }
        Ok(())
    }
}

impl Drop for Bus {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn read_meta(path: &Path) -> Result<BusMeta> {
    let bytes = fs::read(path)?;
    serde_json::from_slice(&bytes).map_err(|_| Error::Unsupported("corrupt bus.meta.json"))
}

/// Writes `meta` via a temp-file-then-rename, matching the atomic-publish
/// idiom used for other small marker files in this crate.
fn write_meta_atomic(path: &Path, meta: &BusMeta) -> Result<()> {
    let tmp_path = path.with_extension("json.tmp");
    let bytes = serde_json::to_vec_pretty(meta).expect("BusMeta always serializes");
    fs::write(&tmp_path, bytes)?;
    fs::rename(&tmp_path, path)?;
    Ok(())
}
