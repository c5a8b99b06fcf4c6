//! Per-participant coupling statistics

use serde::{Deserialize, Serialize};

/// Counters collected by one participant's scheme over a run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CouplingMetrics {
    /// Advances that exchanged data
    pub exchanges: u64,
    /// Advances that stayed inside a time window
    pub subcycling_steps: u64,
    /// Coupling iterations needed by each completed window
    pub iterations_per_window: Vec<u32>,
    /// Windows accepted because the iteration cap was reached
    pub forced_convergences: u32,
}

impl CouplingMetrics {
    pub fn record_exchange(&mut self) {
        self.exchanges += 1;
    }

    pub fn record_subcycle(&mut self) {
        self.subcycling_steps += 1;
    }

    pub fn record_window(&mut self, iterations: u32, forced: bool) {
        self.iterations_per_window.push(iterations);
        if forced {
            self.forced_convergences += 1;
        }
    }

    pub fn windows_completed(&self) -> usize {
        self.iterations_per_window.len()
    }

    pub fn average_iterations(&self) -> f64 {
        if self.iterations_per_window.is_empty() {
            return 0.0;
        }
        let total: u32 = self.iterations_per_window.iter().sum();
        total as f64 / self.iterations_per_window.len() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_average_iterations() {
        let mut metrics = CouplingMetrics::default();
        assert_eq!(metrics.average_iterations(), 0.0);

        metrics.record_window(3, false);
        metrics.record_window(5, true);
        assert_eq!(metrics.windows_completed(), 2);
        assert_eq!(metrics.average_iterations(), 4.0);
        assert_eq!(metrics.forced_convergences, 1);
    }

    #[test]
    fn test_metrics_serialize() {
        let mut metrics = CouplingMetrics::default();
        metrics.record_exchange();
        metrics.record_window(1, false);
        let json = serde_json::to_value(&metrics).unwrap();
        assert_eq!(json["exchanges"], 1);
        assert_eq!(json["iterations_per_window"][0], 1);
    }
}
