use std::collections::BTreeMap;

use crate::error::{Error, Result};
use crate::id::EventId;

pub const MAGIC: u32 = 0x5350_4253; // "SPBS"
pub const VERSION: u16 = 1;

const FIXED_OVERHEAD: usize = 4 + 2 + 2 + 4; // MAGIC + VERSION + FLAGS + RECORD_LEN
const BODY_FIXED_OVERHEAD: usize = 16 + 8 + 2 + 4 + 4 + 4; // EVENT_ID + TS_NANOS + TOPIC_LEN + PAYLOAD_LEN + HEADERS_LEN + CRC32

/// One decoded event, as it appears in memory after decoding a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub event_id: EventId,
    pub ts_nanos: i64,
    pub topic: String,
    pub payload: Vec<u8>,
    pub headers: BTreeMap<String, String>,
}

/// Encodes `record` into the on-disk framed representation.
///
/// `max_payload_bytes` is the configured hard cap on payload size; encoding
/// also fails if any length field would overflow its wire type.
pub fn encode(record: &Record, max_payload_bytes: usize, max_topic_bytes: usize) -> Result<Vec<u8>> {
    if record.payload.len() > max_payload_bytes {
        return Err(Error::LimitExceeded { field: "payload" });
    }
    if record.topic.len() > max_topic_bytes || record.topic.len() > u16::MAX as usize {
        return Err(Error::LimitExceeded { field: "topic" });
    }
    if record.payload.len() > u32::MAX as usize {
        return Err(Error::LimitExceeded { field: "payload" });
    }

    let headers_bytes = encode_headers(&record.headers);
    if headers_bytes.len() > u32::MAX as usize {
        return Err(Error::LimitExceeded { field: "headers" });
    }

    let body_len = BODY_FIXED_OVERHEAD
        + record.topic.len()
        + record.payload.len()
        + headers_bytes.len();
    let record_len = u32::try_from(body_len).map_err(|_| Error::LimitExceeded { field: "record" })?;

    let mut buf = Vec::with_capacity(FIXED_OVERHEAD + body_len);
    buf.extend_from_slice(&MAGIC.to_le_bytes());
    buf.extend_from_slice(&VERSION.to_le_bytes());
    buf.extend_from_slice(&0u16.to_le_bytes()); // FLAGS, reserved
    buf.extend_from_slice(&record_len.to_le_bytes());

    let body_start = buf.len();
    buf.extend_from_slice(record.event_id.as_bytes());
    buf.extend_from_slice(&record.ts_nanos.to_le_bytes());
    buf.extend_from_slice(&(record.topic.len() as u16).to_le_bytes());
    buf.extend_from_slice(record.topic.as_bytes());
    buf.extend_from_slice(&(record.payload.len() as u32).to_le_bytes());
    buf.extend_from_slice(&record.payload);
    buf.extend_from_slice(&(headers_bytes.len() as u32).to_le_bytes());
    buf.extend_from_slice(&headers_bytes);

    let crc = crc32fast::hash(&buf[body_start..]);
    buf.extend_from_slice(&crc.to_le_bytes());

    Ok(buf)
}

/// Decodes exactly one record from the front of `bytes`.
///
/// Returns the decoded record and the number of bytes consumed. Surfaces
/// [`Error::TruncatedTail`] if `bytes` does not hold a complete frame yet,
/// and [`Error::CorruptRecord`] on any structural or CRC mismatch.
/// `base_offset` is only used to annotate errors with the absolute file
/// offset of the frame's first byte.
pub fn decode(bytes: &[u8], base_offset: u64) -> Result<(Record, usize)> {
    if bytes.len() < FIXED_OVERHEAD {
        return Err(Error::TruncatedTail(base_offset));
    }
    let magic = u32::from_le_bytes(bytes[0..4].try_into().unwrap());
    if magic != MAGIC {
        return Err(Error::CorruptRecord(base_offset));
    }
    let version = u16::from_le_bytes(bytes[4..6].try_into().unwrap());
    if version != VERSION {
        return Err(Error::CorruptRecord(base_offset));
    }
    let _flags = u16::from_le_bytes(bytes[6..8].try_into().unwrap());
    let record_len = u32::from_le_bytes(bytes[8..12].try_into().unwrap()) as usize;

    let total_len = FIXED_OVERHEAD + record_len;
    if bytes.len() < total_len {
        return Err(Error::TruncatedTail(base_offset));
    }
    if record_len < BODY_FIXED_OVERHEAD {
        return Err(Error::CorruptRecord(base_offset));
    }

    let body = &bytes[FIXED_OVERHEAD..total_len];
    let event_id = EventId::from_bytes(body[0..16].try_into().unwrap());
    let ts_nanos = i64::from_le_bytes(body[16..24].try_into().unwrap());
    let topic_len = u16::from_le_bytes(body[24..26].try_into().unwrap()) as usize;

    let mut cursor = 26;
    if body.len() < cursor + topic_len + 4 {
        return Err(Error::CorruptRecord(base_offset));
    }
    let topic = std::str::from_utf8(&body[cursor..cursor + topic_len])
        .map_err(|_| Error::CorruptRecord(base_offset))?
        .to_string();
    cursor += topic_len;

    let payload_len = u32::from_le_bytes(body[cursor..cursor + 4].try_into().unwrap()) as usize;
    cursor += 4;
    if body.len() < cursor + payload_len + 4 {
        return Err(Error::CorruptRecord(base_offset));
    }
    let payload = body[cursor..cursor + payload_len].to_vec();
    cursor += payload_len;

    let headers_len = u32::from_le_bytes(body[cursor..cursor + 4].try_into().unwrap()) as usize;
    cursor += 4;
    if body.len() < cursor + headers_len + 4 {
        return Err(Error::CorruptRecord(base_offset));
    }
    let headers = decode_headers(&body[cursor..cursor + headers_len])
        .ok_or(Error::CorruptRecord(base_offset))?;
    cursor += headers_len;

    let expected_total = 26 + topic_len + 4 + payload_len + 4 + headers_len + 4;
    if cursor + 4 != expected_total || expected_total != body.len() {
        return Err(Error::CorruptRecord(base_offset));
    }

    let crc_stored = u32::from_le_bytes(body[cursor..cursor + 4].try_into().unwrap());
    let crc_computed = crc32fast::hash(&body[..cursor]);
    if crc_stored != crc_computed {
        return Err(Error::CorruptRecord(base_offset));
    }

    Ok((
        Record {
            event_id,
            ts_nanos,
            topic,
            payload,
            headers,
        },
        total_len,
    ))
}

fn encode_headers(headers: &BTreeMap<String, String>) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_from_slice(&(headers.len() as u32).to_le_bytes());
    for (k, v) in headers {
        buf.extend_from_slice(&(k.len() as u16).to_le_bytes());
        buf.extend_from_slice(k.as_bytes());
        buf.extend_from_slice(&(v.len() as u32).to_le_bytes());
        buf.extend_from_slice(v.as_bytes());
    }
    buf
}

fn decode_headers(bytes: &[u8]) -> Option<BTreeMap<String, String>> {
    if bytes.is_empty() {
        return Some(BTreeMap::new());
    }
    if bytes.len() < 4 {
        return None;
    }
    let count = u32::from_le_bytes(bytes[0..4].try_into().ok()?);
    let mut cursor = 4;
    let mut out = BTreeMap::new();
    for _ in 0..count {
        if bytes.len() < cursor + 2 {
            return None;
        }
        let klen = u16::from_le_bytes(bytes[cursor..cursor + 2].try_into().ok()?) as usize;
        cursor += 2;
        if bytes.len() < cursor + klen + 4 {
            return None;
        }
        let key = std::str::from_utf8(&bytes[cursor..cursor + klen]).ok()?.to_string();
        cursor += klen;
        let vlen = u32::from_le_bytes(bytes[cursor..cursor + 4].try_into().ok()?) as usize;
        cursor += 4;
        if bytes.len() < cursor + vlen {
            return None;
        }
        let val = std::str::from_utf8(&bytes[cursor..cursor + vlen]).ok()?.to_string();
        cursor += vlen;
        out.insert(key, val);
    }
    if cursor != bytes.len() {
        return None;
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::IdGenerator;

    fn sample(topic: &str, payload: &[u8]) -> Record {
        let gen = IdGenerator::new();
        Record {
            event_id: gen.next(123_000_000),
            ts_nanos: 123_000_000,
            topic: topic.to_string(),
            payload: payload.to_vec(),
            headers: BTreeMap::new(),
        }
    }

    #[test]
    fn encode_decode_round_trip() {
        let record = sample("orders", b"hello");
        let bytes = encode(&record, 1 << 20, 255).unwrap();
        let (decoded, consumed) = decode(&bytes, 0).unwrap();
        assert_eq!(consumed, bytes.len());
        assert_eq!(decoded, record);
    }

    #[test]
    fn round_trip_with_headers() {
        let mut record = sample("orders", b"payload");
        record.headers.insert("content-type".to_string(), "text/plain".to_string());
        let bytes = encode(&record, 1 << 20, 255).unwrap();
        let (decoded, _) = decode(&bytes, 0).unwrap();
        assert_eq!(decoded.headers.get("content-type").unwrap(), "text/plain");
    }

    #[test]
    fn payload_over_limit_is_rejected() {
        let record = sample("orders", &vec![0u8; 16]);
        let err = encode(&record, 8, 255).unwrap_err();
        assert!(matches!(err, Error::LimitExceeded { field: "payload" }));
    }

    #[test]
    fn truncated_bytes_surface_truncated_tail() {
        let record = sample("orders", b"hello world");
        let bytes = encode(&record, 1 << 20, 255).unwrap();
        let err = decode(&bytes[..bytes.len() - 3], 0).unwrap_err();
        assert!(matches!(err, Error::TruncatedTail(0)));
    }

    #[test]
    fn bit_flip_in_body_is_rejected() {
        let record = sample("orders", b"hello world");
        let mut bytes = encode(&record, 1 << 20, 255).unwrap();
        let flip_at = FIXED_OVERHEAD + 2;
        bytes[flip_at] ^= 0x01;
        let err = decode(&bytes, 0).unwrap_err();
        assert!(matches!(err, Error::CorruptRecord(0)));
    }
}
