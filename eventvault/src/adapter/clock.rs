use crate::errors::{RegistryError, RegistryResult};
use crate::types::Timestamp;
use std::sync::Mutex;

/// Hands out strictly increasing timestamps.
///
/// Wall-clock readings that do not move past the previous instant are bumped
/// by one microsecond, so envelopes stored back to back never share a
/// creation time.
#[derive(Debug, Default)]
pub struct MonotonicClock {
    last: Mutex<Option<Timestamp>>,
}

impl MonotonicClock {
    /// Creates a clock with no history.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns an instant strictly after every instant returned before.
    pub fn tick(&self) -> RegistryResult<Timestamp> {
        let mut last = self
            .last
            .lock()
            .map_err(|_| RegistryError::StoreFailure { operation: "tick" })?;
        let now = Timestamp::now();
        let next = match *last {
            Some(previous) if previous >= now => previous.next_tick(),
            _ => now,
        };
        *last = Some(next);
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ticks_strictly_increase() {
        let clock = MonotonicClock::new();
        let ticks: Vec<_> = (0..1000).map(|_| clock.tick().unwrap()).collect();
        assert!(ticks.windows(2).all(|pair| pair[0] < pair[1]));
    }
}
