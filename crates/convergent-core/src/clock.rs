//! The logical clock. Every CRDT in this workspace is stamped by one of
//! these: a Lamport scalar that gives causally comparable timestamps
//! without any wall-clock dependency.

use crate::error::CrdtError;
use crate::value::WrappedValue;
use serde::{Deserialize, Serialize};

/// A clock timestamp. Non-negative for the built-in [`ScalarClock`];
/// custom clocks may reinterpret the domain so long as they keep a
/// total order over the values they produce.
pub type Timestamp = i64;

/// A Lamport scalar clock: `(counter, uuid)`. `uuid` identifies the
/// clock -- and transitively the CRDT instance it stamps -- so that
/// `update` can reject envelopes produced under a different clock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScalarClock {
    pub counter: u32,
    pub uuid: [u8; 16],
}

impl ScalarClock {
    /// The sentinel timestamp meaning "nothing has happened yet". Left
    /// available because the counter itself starts at 1.
    pub fn default_ts() -> Timestamp {
        0
    }

    pub fn new(uuid: [u8; 16]) -> Self {
        ScalarClock { counter: 1, uuid }
    }

    pub fn new_random() -> Self {
        Self::new(ulid::Ulid::new().to_bytes())
    }

    pub fn read(&self) -> Timestamp {
        self.counter as Timestamp
    }

    /// Advances the counter so it strictly exceeds `ts`. Equivalent to
    /// `counter = max(counter, ts + 1)`, expressed as the source's
    /// original guard (`if ts >= counter { counter = ts + 1 }`) rather
    /// than the looser `max(counter, ts) + 1` phrasing -- the two agree
    /// only when `ts < counter`, and the guard form is the one that is
    /// bit-exact with every other implementation in this family.
    pub fn update(&mut self, ts: Timestamp) -> Result<Timestamp, CrdtError> {
        if ts < 0 {
            return Err(CrdtError::value_invalid("timestamp must be non-negative"));
        }
        let ts_u32 = u32::try_from(ts)
            .map_err(|_| CrdtError::value_invalid("timestamp exceeds clock range"))?;
        if ts_u32 >= self.counter {
            self.counter = ts_u32
                .checked_add(1)
                .ok_or_else(|| CrdtError::value_invalid("clock counter overflow"))?;
        }
        Ok(self.read())
    }

    pub fn is_later(ts1: Timestamp, ts2: Timestamp) -> bool {
        ts1 > ts2
    }

    pub fn are_concurrent(ts1: Timestamp, ts2: Timestamp) -> bool {
        ts1 == ts2
    }

    /// -1 if `ts1` is earlier, 1 if later, 0 if concurrent (equal).
    pub fn compare(ts1: Timestamp, ts2: Timestamp) -> i32 {
        if Self::is_later(ts1, ts2) {
            1
        } else if Self::is_later(ts2, ts1) {
            -1
        } else {
            0
        }
    }

    pub fn wrap_ts(ts: Timestamp) -> WrappedValue {
        WrappedValue::Int(ts)
    }

    /// `(4-byte big-endian counter, 16-byte uuid)`, 20 bytes total.
    /// This is a fixed-width format, not routed through the tagged
    /// value codec, since the clock is always the first thing an
    /// envelope needs before any registry is available to interpret
    /// tagged bytes.
    pub fn pack(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(20);
        out.extend_from_slice(&self.counter.to_be_bytes());
        out.extend_from_slice(&self.uuid);
        out
    }

    pub fn unpack(data: &[u8]) -> Result<Self, CrdtError> {
        if data.len() != 20 {
            return Err(CrdtError::type_invalid("scalar clock must be exactly 20 bytes"));
        }
        let counter = u32::from_be_bytes([data[0], data[1], data[2], data[3]]);
        let mut uuid = [0u8; 16];
        uuid.copy_from_slice(&data[4..20]);
        Ok(ScalarClock { counter, uuid })
    }
}
