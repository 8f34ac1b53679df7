//! `Counter`: a grow-only counter. Converges cleanly only when a single
//! writer funnels every increment; for genuinely multi-writer counting
//! use [`crate::pncounter::PnCounter`] or [`crate::counterset::CounterSet`].

use crate::merkle_crdt::MerkleCrdt;
use convergent_core::{CrdtError, Payload, ScalarClock, StateUpdate, Timestamp, Value};

#[derive(Debug, Clone, PartialEq)]
pub struct Counter {
    clock: ScalarClock,
    counter: u32,
}

impl Counter {
    pub fn new(clock: ScalarClock) -> Self {
        Counter { clock, counter: 0 }
    }

    pub fn clock(&self) -> &ScalarClock {
        &self.clock
    }

    pub fn read(&self) -> u32 {
        self.counter
    }

    /// Produces and applies an update raising the counter by `amount`.
    pub fn increase(&mut self, amount: u32) -> Result<StateUpdate, CrdtError> {
        if amount == 0 {
            return Err(CrdtError::value_invalid("increase amount must be positive"));
        }
        let new_value = self
            .counter
            .checked_add(amount)
            .ok_or_else(|| CrdtError::value_invalid("counter overflow"))?;
        let ts = self.clock.read();
        let su = StateUpdate::new(
            self.clock.uuid,
            ts,
            Payload::Value(Value::Int(i32::try_from(new_value).map_err(|_| {
                CrdtError::value_invalid("counter exceeds representable range")
            })?)),
        );
        self.apply(&su)?;
        Ok(su)
    }

    pub fn update(&mut self, su: StateUpdate) -> Result<&mut Self, CrdtError> {
        self.apply(&su)?;
        Ok(self)
    }

    fn apply(&mut self, su: &StateUpdate) -> Result<(), CrdtError> {
        if su.clock_uuid != self.clock.uuid {
            return Err(CrdtError::type_invalid("update clock_uuid does not match counter's clock"));
        }
        let value = match &su.data {
            Payload::Value(Value::Int(i)) => *i,
            _ => return Err(CrdtError::type_invalid("counter payload must be an int")),
        };
        if value < 0 {
            return Err(CrdtError::value_invalid("counter payload must be non-negative"));
        }
        self.counter = self.counter.max(value as u32);
        self.clock.update(su.ts)?;
        Ok(())
    }

    pub fn checksums(&self) -> (u32,) {
        (self.counter,)
    }

    pub fn pack(&self) -> Vec<u8> {
        let mut out = self.clock.pack();
        out.extend_from_slice(&self.counter.to_be_bytes());
        out
    }

    pub fn unpack(data: &[u8]) -> Result<Self, CrdtError> {
        if data.len() != 24 {
            return Err(CrdtError::type_invalid("packed counter must be 24 bytes"));
        }
        let clock = ScalarClock::unpack(&data[..20])?;
        let counter = u32::from_be_bytes(data[20..24].try_into().unwrap());
        Ok(Counter { clock, counter })
    }
}

impl MerkleCrdt for Counter {
    /// A single synthetic envelope carrying `clock.read() - 1` as its
    /// timestamp -- the timestamp the counter's last applied update
    /// actually advanced the clock past, not the current read time.
    fn history(&self, from_ts: Option<Timestamp>, until_ts: Option<Timestamp>) -> Vec<StateUpdate> {
        let ts = self.clock.read() - 1;
        if from_ts.map_or(false, |f| ts < f) || until_ts.map_or(false, |u| ts > u) {
            return Vec::new();
        }
        vec![StateUpdate::new(
            self.clock.uuid,
            ts,
            Payload::Value(Value::Int(self.counter as i32)),
        )]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn increase_raises_the_counter() {
        let mut c = Counter::new(ScalarClock::new([1; 16]));
        c.increase(3).unwrap();
        assert_eq!(c.read(), 3);
        c.increase(2).unwrap();
        assert_eq!(c.read(), 5);
    }

    #[test]
    fn rejects_zero_increase() {
        let mut c = Counter::new(ScalarClock::new([1; 16]));
        assert!(c.increase(0).is_err());
    }

    #[test]
    fn update_takes_the_max_of_applied_payloads() {
        let mut a = Counter::new(ScalarClock::new([1; 16]));
        let su = a.increase(5).unwrap();

        let mut b = Counter::new(ScalarClock::new([1; 16]));
        b.update(su).unwrap();
        assert_eq!(b.read(), 5);
    }

    #[test]
    fn pack_round_trips() {
        let mut c = Counter::new(ScalarClock::new([2; 16]));
        c.increase(9).unwrap();
        let packed = c.pack();
        assert_eq!(Counter::unpack(&packed).unwrap(), c);
    }

    #[test]
    fn rejects_mismatched_clock_uuid() {
        let mut a = Counter::new(ScalarClock::new([1; 16]));
        let su = a.increase(5).unwrap();
        let mut b = Counter::new(ScalarClock::new([2; 16]));
        assert!(b.update(su).is_err());
    }
}
