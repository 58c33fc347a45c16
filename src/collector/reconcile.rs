use std::collections::HashMap;

/// Upstream cumulative values that are re-exposed as local counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cumulative {
    BytesIn,
    BytesOut,
    Connections,
}

#[derive(Debug, Clone, Copy, Default)]
struct Baselines {
    bytes_in: f64,
    bytes_out: f64,
    connections: f64,
}

impl Baselines {
    fn slot(&mut self, kind: Cumulative) -> &mut f64 {
        match kind {
            Cumulative::BytesIn => &mut self.bytes_in,
            Cumulative::BytesOut => &mut self.bytes_out,
            Cumulative::Connections => &mut self.connections,
        }
    }
}

/// Last observed upstream cumulative value per (vhost, stream).
///
/// Turns readings that may go backwards (upstream restart, counter
/// reset) into non-negative deltas for a monotonic counter.
///
/// RULES:
/// - delta = max(0, current - last_observed)
/// - last_observed only moves up (current > last_observed)
/// - last_observed starts at 0, so the first reading is credited
///   in full
///
/// After an upstream reset the baseline stays at the old peak; the
/// counter resumes only once the new cumulative value passes it.
///
/// Entries are never evicted. State is in-memory only and starts
/// empty on every process start.
#[derive(Debug, Default)]
pub struct ReconciliationState {
    last: HashMap<(String, String), Baselines>,
}

impl ReconciliationState {
    /// Record `current` and return how much the exposed counter must advance.
    pub fn advance(&mut self, kind: Cumulative, vhost: &str, stream: &str, current: f64) -> f64 {
        let slot = self
            .last
            .entry((vhost.to_string(), stream.to_string()))
            .or_default()
            .slot(kind);

        // NaN compares false and is dropped here
        if current > *slot {
            let delta = current - *slot;
            *slot = current;
            delta
        } else {
            0.0
        }
    }

    #[cfg(test)]
    pub fn last_observed(&self, kind: Cumulative, vhost: &str, stream: &str) -> Option<f64> {
        let mut baselines = *self.last.get(&(vhost.to_string(), stream.to_string()))?;
        Some(*baselines.slot(kind))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_observation_is_credited_in_full() {
        let mut state = ReconciliationState::default();
        assert_eq!(state.advance(Cumulative::BytesIn, "default", "test", 100.0), 100.0);
        assert_eq!(state.last_observed(Cumulative::BytesIn, "default", "test"), Some(100.0));
    }

    #[test]
    fn reset_holds_baseline_until_exceeded() {
        let mut state = ReconciliationState::default();
        let deltas: Vec<f64> = [100.0, 150.0, 140.0, 200.0]
            .into_iter()
            .map(|v| state.advance(Cumulative::BytesOut, "default", "test", v))
            .collect();

        assert_eq!(deltas, vec![100.0, 50.0, 0.0, 50.0]);
        assert_eq!(deltas.iter().sum::<f64>(), 200.0);
        assert_eq!(state.last_observed(Cumulative::BytesOut, "default", "test"), Some(200.0));
    }

    #[test]
    fn zero_and_nan_never_advance() {
        let mut state = ReconciliationState::default();
        assert_eq!(state.advance(Cumulative::Connections, "v", "s", 0.0), 0.0);
        assert_eq!(state.advance(Cumulative::Connections, "v", "s", f64::NAN), 0.0);
        assert_eq!(state.advance(Cumulative::Connections, "v", "s", -5.0), 0.0);
        assert_eq!(state.last_observed(Cumulative::Connections, "v", "s"), Some(0.0));
    }

    #[test]
    fn kinds_and_streams_are_tracked_independently() {
        let mut state = ReconciliationState::default();
        state.advance(Cumulative::BytesIn, "default", "a", 500.0);

        assert_eq!(state.advance(Cumulative::BytesOut, "default", "a", 10.0), 10.0);
        assert_eq!(state.advance(Cumulative::BytesIn, "default", "b", 20.0), 20.0);
        assert_eq!(state.advance(Cumulative::BytesIn, "other", "a", 30.0), 30.0);
        assert_eq!(state.last_observed(Cumulative::BytesIn, "default", "a"), Some(500.0));
        assert_eq!(state.last_observed(Cumulative::BytesIn, "missing", "a"), None);
    }
}
