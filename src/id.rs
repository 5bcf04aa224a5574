use std::cell::Cell;

use rand::RngCore;

const RAND_BITS: u32 = 80;
const RAND_MASK: u128 = (1u128 << RAND_BITS) - 1;

/// A 128-bit, time-sortable event identifier.
///
/// Byte layout (big-endian, so that byte-lexicographic order equals creation
/// order): bytes `0..6` hold a 48-bit millisecond timestamp prefix, bytes
/// `6..16` hold 80 bits of monotone randomness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EventId([u8; 16]);

impl EventId {
    fn from_parts(ms: u64, rand: u128) -> Self {
        let mut bytes = [0u8; 16];
        bytes[0..6].copy_from_slice(&ms.to_be_bytes()[2..8]);
        bytes[6..16].copy_from_slice(&rand.to_be_bytes()[6..16]);
        EventId(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        EventId(bytes)
    }

    /// The millisecond timestamp prefix this id was minted with.
    pub fn ms_prefix(&self) -> u64 {
        let mut buf = [0u8; 8];
        buf[2..8].copy_from_slice(&self.0[0..6]);
        u64::from_be_bytes(buf)
    }

    /// Canonical textual form: lowercase hex, 32 characters, unpadded.
    pub fn to_hex(&self) -> String {
        let mut out = String::with_capacity(32);
        for byte in self.0 {
            out.push_str(&format!("{byte:02x}"));
        }
        out
    }

    pub fn from_hex(s: &str) -> Option<Self> {
        if s.len() != 32 {
            return None;
        }
        let mut bytes = [0u8; 16];
        for (i, chunk) in s.as_bytes().chunks(2).enumerate() {
            let hi = (chunk[0] as char).to_digit(16)?;
            let lo = (chunk[1] as char).to_digit(16)?;
            bytes[i] = ((hi << 4) | lo) as u8;
        }
        Some(EventId(bytes))
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Mints [`EventId`]s for a single topic writer.
///
/// Not `Sync`: the topic writer is the sole owner and caller, matching the
/// spec's "one generator per topic writer, no cross-topic coordination"
/// requirement. Calls from a single thread observe strictly increasing ids.
pub struct IdGenerator {
    last_ms: Cell<u64>,
    last_rand: Cell<u128>,
}

impl IdGenerator {
    pub fn new() -> Self {
        IdGenerator {
            last_ms: Cell::new(0),
            last_rand: Cell::new(0),
        }
    }

    /// Seeds the monotonic floor from a recovered maximum observed id, per
    /// the recovery procedure ("seed the id generator's last_ms to the
    /// maximum observed event-id timestamp prefix + 1").
    pub fn seed(&self, last_ms_plus_one: u64) {
        if last_ms_plus_one > self.last_ms.get() {
            self.last_ms.set(last_ms_plus_one);
            self.last_rand.set(0);
        }
    }

    /// Mints the next id given the current wall-clock reading in
    /// nanoseconds. Enforces intra-millisecond monotonicity and freezes at
    /// the last-used millisecond if the clock has retreated.
    pub fn next(&self, now_nanos: i64) -> EventId {
        let now_ms = (now_nanos.max(0) as u64) / 1_000_000;
        let last_ms = self.last_ms.get();

        if now_ms > last_ms {
            let rand = next_random_suffix();
            self.last_ms.set(now_ms);
            self.last_rand.set(rand);
            return EventId::from_parts(now_ms, rand);
        }

        // Clock at or behind the last tick: freeze at last_ms and keep
        // strictly increasing by incrementing the random suffix.
        let next_rand = self.last_rand.get().wrapping_add(1) & RAND_MASK;
        if next_rand == 0 {
            // 80-bit suffix overflowed: borrow a millisecond from the future.
            let next_ms = last_ms + 1;
            self.last_ms.set(next_ms);
            self.last_rand.set(0);
            EventId::from_parts(next_ms, 0)
        } else {
            self.last_rand.set(next_rand);
            EventId::from_parts(last_ms, next_rand)
        }
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

fn next_random_suffix() -> u128 {
    let mut buf = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut buf);
    u128::from_be_bytes(buf) & RAND_MASK
}
