//! Per-connection running maximum state machine

/// Lifecycle of one streaming connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Accepting observations and emitting updates
    Active,

    /// End-of-stream or cancellation seen; no more sends are attempted
    Draining,

    /// Terminal
    Closed,
}

/// Running maximum for a single connection
///
/// Emits a new value only when an observation is strictly greater than the
/// current maximum, so the emitted sequence is strictly increasing.
#[derive(Debug, Clone)]
pub struct MaxAggregator {
    max: i32,
    phase: Phase,
}

impl Default for MaxAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl MaxAggregator {
    /// Start from zero, the default value of an `int32` field on the wire
    pub fn new() -> Self {
        Self::starting_at(0)
    }

    /// Start from an explicit floor; use `i32::MIN` to report negative maxima
    pub fn starting_at(floor: i32) -> Self {
        Self {
            max: floor,
            phase: Phase::Active,
        }
    }

    /// Feed one observation, returning the new maximum if it increased
    pub fn observe(&mut self, value: i32) -> Option<i32> {
        if self.phase != Phase::Active || value <= self.max {
            return None;
        }
        self.max = value;
        Some(value)
    }

    /// Stop emitting; later observations are ignored
    pub fn drain(&mut self) {
        if self.phase == Phase::Active {
            self.phase = Phase::Draining;
        }
    }

    pub fn close(&mut self) {
        self.phase = Phase::Closed;
    }

    pub fn max(&self) -> i32 {
        self.max
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn emitted(values: &[i32]) -> Vec<i32> {
        let mut agg = MaxAggregator::new();
        values.iter().filter_map(|&v| agg.observe(v)).collect()
    }

    #[test]
    fn test_repeated_and_lower_values_are_dropped() {
        assert_eq!(emitted(&[5, 3, 5, 2]), vec![5]);
    }

    #[test]
    fn test_emits_each_new_maximum() {
        assert_eq!(emitted(&[1, 4, 2, 9, 3]), vec![1, 4, 9]);
    }

    #[test]
    fn test_zero_floor_drops_non_positive() {
        assert!(emitted(&[0, -3, -1]).is_empty());

        let mut agg = MaxAggregator::starting_at(i32::MIN);
        assert_eq!(agg.observe(-3), Some(-3));
        assert_eq!(agg.observe(-5), None);
    }

    #[test]
    fn test_phase_transitions() {
        let mut agg = MaxAggregator::new();
        assert_eq!(agg.phase(), Phase::Active);

        agg.observe(7);
        agg.drain();
        assert_eq!(agg.phase(), Phase::Draining);
        assert_eq!(agg.observe(100), None);
        assert_eq!(agg.max(), 7);

        agg.close();
        assert_eq!(agg.phase(), Phase::Closed);

        // No way back to Active
        agg.drain();
        assert_eq!(agg.phase(), Phase::Closed);
    }

    proptest! {
        #[test]
        fn prop_updates_are_prefix_maxima(values in proptest::collection::vec(any::<i32>(), 0..200)) {
            let mut agg = MaxAggregator::starting_at(i32::MIN);
            let mut last: Option<i32> = None;

            for (i, &v) in values.iter().enumerate() {
                if let Some(update) = agg.observe(v) {
                    let prefix_max = values[..=i].iter().copied().max().unwrap();
                    prop_assert_eq!(update, prefix_max);
                    if let Some(prev) = last {
                        prop_assert!(update > prev);
                    }
                    last = Some(update);
                }
            }
        }
    }
}
