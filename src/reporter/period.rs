//! Adaptive interval: doubles on a successful send, halves on a silent
//! cycle, bounded within `[min_period, max_period]` (spec.md §4.F).

use std::time::Duration;

pub struct AdaptivePeriod {
    current: Duration,
    min: Duration,
    max: Duration,
}

impl AdaptivePeriod {
    pub fn new(min: Duration, max: Duration) -> Self {
        Self { current: min, min, max }
    }

    pub fn current(&self) -> Duration {
        self.current
    }

    /// Record the outcome of the just-finished interval and compute the
    /// next one. `sent_data` is true if any data was successfully sent
    /// during that interval.
    pub fn on_cycle_complete(&mut self, sent_data: bool) {
        self.current = if sent_data {
            (self.current * 2).min(self.max)
        } else {
            (self.current / 2).max(self.min)
        };
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn b5_adaptive_up_down_sequence() {
        let mut p = AdaptivePeriod::new(Duration::from_secs(60), Duration::from_secs(960));
        let outcomes = [true, true, false, false, true];
        let expected = [120, 240, 120, 60, 120];
        for (sent, want) in outcomes.iter().zip(expected.iter()) {
            p.on_cycle_complete(*sent);
            assert_eq!(p.current().as_secs(), *want, "after sent={sent}");
        }
    }

    #[test]
    fn never_exceeds_bounds() {
        let mut p = AdaptivePeriod::new(Duration::from_secs(45), Duration::from_secs(3600));
        for _ in 0..20 {
            p.on_cycle_complete(true);
        }
        assert_eq!(p.current(), Duration::from_secs(3600));
        for _ in 0..20 {
            p.on_cycle_complete(false);
        }
        assert_eq!(p.current(), Duration::from_secs(45));
    }
}
