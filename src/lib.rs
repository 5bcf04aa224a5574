//! Single-node, embedded message bus with durable, ordered, topic-scoped
//! event streams and replay by timestamp or event id.

pub mod bus;
pub mod clock;
pub mod config;
pub mod error;
pub mod id;
pub mod index;
pub mod record;
pub mod recovery;
pub mod segment;
pub mod subscription;
pub mod topic;

pub use bus::{Bus, BusMeta};
pub use clock::{Clock, QuantaClock, SystemClock};
pub use config::{BusConfig, Durability};
pub use error::{Error, Result};
pub use id::EventId;
pub use subscription::{Cursor, Event, Inclusivity, Next, Subscription};
pub use topic::{Topic, WriterMetrics};
