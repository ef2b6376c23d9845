//! Per-probe measurement throttle: reuse the last measurement until the probe's minimum
//! interval has passed, otherwise measure, record to the time series, and cache.

use std::sync::PoisonError;
use std::time::Duration;

use tracing::trace;

use crate::probe::Probe;
use crate::types::Measurement;

/// A measurement taken at `last_ms` is reusable until `last_ms + min_interval` is strictly
/// behind `now_ms`.
pub fn is_due(last_ms: i64, min_interval: Duration, now_ms: i64) -> bool {
    last_ms.saturating_add(min_interval.as_millis() as i64) < now_ms
}

impl Probe {
    pub async fn get_data(&self) -> Measurement {
        let mut store = self.store.lock().await;
        let now = (self.clock)();

        if let Some(last) = self.last_measurement() {
            if !is_due(last.timestamp, self.min_interval, now) {
                trace!(probe = %self.name, age_ms = now - last.timestamp, "reusing measurement");
                return last;
            }
        }

        let values = self.produce_values().await;
        // Stamped once the values are in hand; a slow read must not be filed early.
        let taken = (self.clock)();
        let measurement = Measurement {
            values,
            timestamp: taken,
        };
        store.write(&measurement.values, taken.div_euclid(1000));

        *self.last.lock().unwrap_or_else(PoisonError::into_inner) = Some(measurement.clone());
        measurement
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boundary_is_strict() {
        let interval = Duration::from_millis(1_000);
        assert!(!is_due(10_000, interval, 10_500));
        assert!(!is_due(10_000, interval, 11_000));
        assert!(is_due(10_000, interval, 11_001));
        assert!(is_due(10_000, Duration::ZERO, 10_001));
        assert!(!is_due(10_000, Duration::ZERO, 10_000));
    }
}
