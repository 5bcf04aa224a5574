use std::fmt;

/// Errors surfaced by the bus, the topic writer, and subscriptions.
#[derive(Debug)]
pub enum Error {
    /// CRC or framing mismatch mid-segment, at the given byte offset.
    CorruptRecord(u64),
    /// Incomplete final record at the given byte offset; recoverable by truncation.
    TruncatedTail(u64),
    /// Corruption found in a non-final segment; fatal, aborts startup.
    UnrecoverableSegment { segment_no: u32, offset: u64 },
    /// A payload, topic name, or header set exceeded a configured limit.
    LimitExceeded { field: &'static str },
    /// Subscribe-by-id referenced an event id that does not exist.
    CursorNotFound,
    /// Publish back-pressure: the writer's request queue is full.
    QueueFull,
    /// The bus is shutting down or already closed.
    Shutdown,
    /// A filesystem error not otherwise classified above.
    IoFailure(std::io::Error),
    /// A request that is structurally unsupported (bad config, empty name, ...).
    Unsupported(&'static str),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::CorruptRecord(offset) => write!(f, "corrupt record at offset {offset}"),
            Error::TruncatedTail(offset) => write!(f, "truncated tail at offset {offset}"),
            Error::UnrecoverableSegment { segment_no, offset } => write!(
                f,
                "unrecoverable corruption in segment {segment_no} at offset {offset}"
            ),
            Error::LimitExceeded { field } => write!(f, "limit exceeded: {field}"),
            Error::CursorNotFound => write!(f, "cursor not found"),
            Error::QueueFull => write!(f, "writer queue full"),
            Error::Shutdown => write!(f, "bus is shut down"),
            Error::IoFailure(err) => write!(f, "io error: {err}"),
            Error::Unsupported(msg) => write!(f, "unsupported: {msg}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::IoFailure(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Error::IoFailure(value)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
