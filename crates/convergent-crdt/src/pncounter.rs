//! `PnCounter`: a counter that supports both increment and decrement
//! across multiple writers by keeping separate grow-only totals.

use crate::merkle_crdt::MerkleCrdt;
use convergent_core::{CrdtError, Payload, ScalarClock, StateUpdate, Timestamp, Value};

#[derive(Debug, Clone, PartialEq)]
pub struct PnCounter {
    clock: ScalarClock,
    positive: u32,
    negative: u32,
}

impl PnCounter {
    pub fn new(clock: ScalarClock) -> Self {
        PnCounter {
            clock,
            positive: 0,
            negative: 0,
        }
    }

    pub fn clock(&self) -> &ScalarClock {
        &self.clock
    }

    pub fn read(&self) -> i64 {
        self.positive as i64 - self.negative as i64
    }

    pub fn increase(&mut self, amount: u32) -> Result<StateUpdate, CrdtError> {
        if amount == 0 {
            return Err(CrdtError::value_invalid("increase amount must be positive"));
        }
        let new_positive = self
            .positive
            .checked_add(amount)
            .ok_or_else(|| CrdtError::value_invalid("counter overflow"))?;
        self.produce(new_positive, self.negative)
    }

    pub fn decrease(&mut self, amount: u32) -> Result<StateUpdate, CrdtError> {
        if amount == 0 {
            return Err(CrdtError::value_invalid("decrease amount must be positive"));
        }
        let new_negative = self
            .negative
            .checked_add(amount)
            .ok_or_else(|| CrdtError::value_invalid("counter overflow"))?;
        self.produce(self.positive, new_negative)
    }

    fn produce(&mut self, positive: u32, negative: u32) -> Result<StateUpdate, CrdtError> {
        let ts = self.clock.read();
        let su = StateUpdate::new(
            self.clock.uuid,
            ts,
            Payload::tuple(vec![
                Payload::Value(Value::Int(i32::try_from(positive).map_err(|_| {
                    CrdtError::value_invalid("positive total exceeds representable range")
                })?)),
                Payload::Value(Value::Int(i32::try_from(negative).map_err(|_| {
                    CrdtError::value_invalid("negative total exceeds representable range")
                })?)),
            ]),
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
        let (p, n) = match &su.data {
            Payload::Tuple(items) if items.len() == 2 => {
                let p = match &items[0] {
                    Payload::Value(Value::Int(i)) if *i >= 0 => *i as u32,
                    _ => return Err(CrdtError::type_invalid("positive total must be a non-negative int")),
                };
                let n = match &items[1] {
                    Payload::Value(Value::Int(i)) if *i >= 0 => *i as u32,
                    _ => return Err(CrdtError::type_invalid("negative total must be a non-negative int")),
                };
                (p, n)
            }
            _ => return Err(CrdtError::type_invalid("pn-counter payload must be a (positive, negative) pair")),
        };
        self.positive = self.positive.max(p);
        self.negative = self.negative.max(n);
        self.clock.update(su.ts)?;
        Ok(())
    }

    pub fn checksums(&self) -> (u32, u32) {
        (self.positive, self.negative)
    }

    pub fn pack(&self) -> Vec<u8> {
        let mut out = self.clock.pack();
        out.extend_from_slice(&self.positive.to_be_bytes());
        out.extend_from_slice(&self.negative.to_be_bytes());
        out
    }

    pub fn unpack(data: &[u8]) -> Result<Self, CrdtError> {
        if data.len() != 28 {
            return Err(CrdtError::type_invalid("packed pn-counter must be 28 bytes"));
        }
        let clock = ScalarClock::unpack(&data[..20])?;
        let positive = u32::from_be_bytes(data[20..24].try_into().unwrap());
        let negative = u32::from_be_bytes(data[24..28].try_into().unwrap());
        Ok(PnCounter {
            clock,
            positive,
            negative,
        })
    }
}

impl MerkleCrdt for PnCounter {
    fn history(&self, from_ts: Option<Timestamp>, until_ts: Option<Timestamp>) -> Vec<StateUpdate> {
        let ts = self.clock.read() - 1;
        if from_ts.map_or(false, |f| ts < f) || until_ts.map_or(false, |u| ts > u) {
            return Vec::new();
        }
        vec![StateUpdate::new(
            self.clock.uuid,
            ts,
            Payload::tuple(vec![
                Payload::Value(Value::Int(self.positive as i32)),
                Payload::Value(Value::Int(self.negative as i32)),
            ]),
        )]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_the_net_value() {
        let mut c = PnCounter::new(ScalarClock::new([1; 16]));
        c.increase(5).unwrap();
        c.decrease(2).unwrap();
        assert_eq!(c.read(), 3);
    }

    #[test]
    fn merge_takes_componentwise_max() {
        let mut r1 = PnCounter::new(ScalarClock::new([1; 16]));
        let su1 = r1.increase(3).unwrap();

        let mut r2 = PnCounter::new(ScalarClock::new([1; 16]));
        let su2 = r2.decrease(2).unwrap();

        r1.update(su2).unwrap();
        r2.update(su1).unwrap();

        assert_eq!(r1.read(), 1);
        assert_eq!(r2.read(), 1);
        assert_eq!(r1.checksums(), r2.checksums());
    }

    #[test]
    fn rejects_non_positive_amounts() {
        let mut c = PnCounter::new(ScalarClock::new([1; 16]));
        assert!(c.increase(0).is_err());
        assert!(c.decrease(0).is_err());
    }

    #[test]
    fn pack_round_trips() {
        let mut c = PnCounter::new(ScalarClock::new([4; 16]));
        c.increase(2).unwrap();
        c.decrease(1).unwrap();
        let packed = c.pack();
        assert_eq!(PnCounter::unpack(&packed).unwrap(), c);
    }
}
