//! Convergence measures evaluated on the second participant

use std::fmt;

use nalgebra::DVectorView;
use serde::{Deserialize, Serialize};

/// Decides whether one field has converged within the current time window
pub trait ConvergenceMeasure: Send + fmt::Debug {
    /// Resets per-window state. Called whenever a time window completes.
    fn new_measurement_series(&mut self);

    fn measure(&mut self, old_values: &[f64], new_values: &[f64]);

    fn is_convergence(&self) -> bool;

    fn print_state(&self) -> String;
}

fn norm(values: &[f64]) -> f64 {
    DVectorView::from_slice(values, values.len()).norm()
}

fn diff_norm(old_values: &[f64], new_values: &[f64]) -> f64 {
    let n = old_values.len().min(new_values.len());
    let old = DVectorView::from_slice(&old_values[..n], n);
    let new = DVectorView::from_slice(&new_values[..n], n);
    (new - old).norm()
}

/// Converged when `||new - old||_2 < limit`
#[derive(Debug, Clone)]
pub struct AbsoluteConvergenceMeasure {
    limit: f64,
    norm_diff: f64,
    is_converged: bool,
}

impl AbsoluteConvergenceMeasure {
    pub fn new(limit: f64) -> Self {
        Self {
            limit,
            norm_diff: 0.0,
            is_converged: false,
        }
    }

    pub fn norm_diff(&self) -> f64 {
        self.norm_diff
    }
}

impl ConvergenceMeasure for AbsoluteConvergenceMeasure {
    fn new_measurement_series(&mut self) {
        self.is_converged = false;
    }

    fn measure(&mut self, old_values: &[f64], new_values: &[f64]) {
        self.norm_diff = diff_norm(old_values, new_values);
        self.is_converged = self.norm_diff < self.limit;
    }

    fn is_convergence(&self) -> bool {
        self.is_converged
    }

    fn print_state(&self) -> String {
        format!(
            "absolute convergence measure: two-norm diff = {:.6e}, limit = {:.6e}, conv = {}",
            self.norm_diff, self.limit, self.is_converged
        )
    }
}

/// Converged when `||new - old||_2 <= limit * ||new||_2`
#[derive(Debug, Clone)]
pub struct RelativeConvergenceMeasure {
    limit: f64,
    norm_diff: f64,
    norm: f64,
    is_converged: bool,
}

impl RelativeConvergenceMeasure {
    pub fn new(limit: f64) -> Self {
        Self {
            limit,
            norm_diff: 0.0,
            norm: 0.0,
            is_converged: false,
        }
    }
}

impl ConvergenceMeasure for RelativeConvergenceMeasure {
    fn new_measurement_series(&mut self) {
        self.is_converged = false;
    }

    fn measure(&mut self, old_values: &[f64], new_values: &[f64]) {
        self.norm_diff = diff_norm(old_values, new_values);
        self.norm = norm(new_values);
        self.is_converged = self.norm_diff <= self.limit * self.norm;
    }

    fn is_convergence(&self) -> bool {
        self.is_converged
    }

    fn print_state(&self) -> String {
        format!(
            "relative convergence measure: two-norm diff = {:.6e}, relative limit = {:.6e}, conv = {}",
            self.norm_diff,
            self.limit * self.norm,
            self.is_converged
        )
    }
}

/// Converged when the residual has dropped to `limit` times the first
/// residual of the current time window
#[derive(Debug, Clone)]
pub struct ResidualRelativeConvergenceMeasure {
    limit: f64,
    first_residual: Option<f64>,
    residual: f64,
    is_converged: bool,
}

impl ResidualRelativeConvergenceMeasure {
    pub fn new(limit: f64) -> Self {
        Self {
            limit,
            first_residual: None,
            residual: 0.0,
            is_converged: false,
        }
    }
}

impl ConvergenceMeasure for ResidualRelativeConvergenceMeasure {
    fn new_measurement_series(&mut self) {
        self.first_residual = None;
        self.is_converged = false;
    }

    fn measure(&mut self, old_values: &[f64], new_values: &[f64]) {
        self.residual = diff_norm(old_values, new_values);
        let first = *self.first_residual.get_or_insert(self.residual);
        self.is_converged = self.residual <= self.limit * first;
    }

    fn is_convergence(&self) -> bool {
        self.is_converged
    }

    fn print_state(&self) -> String {
        format!(
            "residual relative convergence measure: residual = {:.6e}, first residual = {:.6e}, conv = {}",
            self.residual,
            self.first_residual.unwrap_or(0.0),
            self.is_converged
        )
    }
}

/// Converged once `min_iterations` measurements were taken in the current window
#[derive(Debug, Clone)]
pub struct MinIterationConvergenceMeasure {
    min_iterations: u32,
    current_iteration: u32,
}

impl MinIterationConvergenceMeasure {
    pub fn new(min_iterations: u32) -> Self {
        Self {
            min_iterations,
            current_iteration: 0,
        }
    }
}

impl ConvergenceMeasure for MinIterationConvergenceMeasure {
    fn new_measurement_series(&mut self) {
        self.current_iteration = 0;
    }

    fn measure(&mut self, _old_values: &[f64], _new_values: &[f64]) {
        self.current_iteration += 1;
    }

    fn is_convergence(&self) -> bool {
        self.current_iteration >= self.min_iterations
    }

    fn print_state(&self) -> String {
        format!(
            "min iteration convergence measure: iterations = {}, min iterations = {}, conv = {}",
            self.current_iteration,
            self.min_iterations,
            self.is_convergence()
        )
    }
}

/// Serializable description of a measure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum MeasureKind {
    Absolute {
        limit: f64,
    },
    Relative {
        limit: f64,
    },
    ResidualRelative {
        limit: f64,
    },
    MinIteration {
        #[serde(rename = "min-iterations")]
        min_iterations: u32,
    },
}

impl MeasureKind {
    pub fn build(&self) -> Box<dyn ConvergenceMeasure> {
        match *self {
            Self::Absolute { limit } => Box::new(AbsoluteConvergenceMeasure::new(limit)),
            Self::Relative { limit } => Box::new(RelativeConvergenceMeasure::new(limit)),
            Self::ResidualRelative { limit } => Box::new(ResidualRelativeConvergenceMeasure::new(limit)),
            Self::MinIteration { min_iterations } => Box::new(MinIterationConvergenceMeasure::new(min_iterations)),
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        match *self {
            Self::Absolute { limit } | Self::Relative { limit } | Self::ResidualRelative { limit } => {
                if !(limit > 0.0 && limit.is_finite()) {
                    return Err(format!("convergence limit must be positive, got {}", limit));
                }
            }
            Self::MinIteration { min_iterations } => {
                if min_iterations == 0 {
                    return Err("min-iterations must be at least 1".to_string());
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_euclidean_norms() {
        assert_relative_eq!(norm(&[3.0, 4.0]), 5.0);
        assert_relative_eq!(norm(&[]), 0.0);
        assert_relative_eq!(diff_norm(&[1.0, 1.0, 2.0], &[4.0, 5.0, 2.0]), 5.0);
    }

    #[test]
    fn test_absolute_is_strict() {
        let mut m = AbsoluteConvergenceMeasure::new(5.0);
        m.measure(&[0.0, 0.0], &[3.0, 4.0]);
        assert!(!m.is_convergence());
        m.measure(&[0.0, 0.0], &[3.0, 3.9]);
        assert!(m.is_convergence());
        assert!(m.print_state().contains("conv = true"));
    }

    #[test]
    fn test_relative_handles_zero_fields() {
        let mut m = RelativeConvergenceMeasure::new(0.1);
        m.measure(&[0.0], &[0.0]);
        assert!(m.is_convergence());
        m.measure(&[9.0], &[10.0]);
        assert!(m.is_convergence());
        m.measure(&[8.0], &[10.0]);
        assert!(!m.is_convergence());
    }

    #[test]
    fn test_residual_relative_resets_per_window() {
        let mut m = ResidualRelativeConvergenceMeasure::new(0.5);
        m.measure(&[0.0], &[4.0]);
        assert!(!m.is_convergence());
        m.measure(&[4.0], &[5.0]);
        assert!(m.is_convergence());

        m.new_measurement_series();
        m.measure(&[5.0], &[6.0]);
        assert!(!m.is_convergence());
    }

    #[test]
    fn test_min_iteration_counts_per_window() {
        let mut m = MinIterationConvergenceMeasure::new(3);
        for expected in [false, false, true, true] {
            m.measure(&[], &[]);
            assert_eq!(m.is_convergence(), expected);
        }
        m.new_measurement_series();
        assert!(!m.is_convergence());
    }

    #[test]
    fn test_measure_kind_yaml() {
        let kind: MeasureKind = serde_yaml::from_str("type: min-iteration\nmin-iterations: 3\n").unwrap();
        assert_eq!(kind, MeasureKind::MinIteration { min_iterations: 3 });
        let kind: MeasureKind = serde_yaml::from_str("type: residual-relative\nlimit: 0.01\n").unwrap();
        assert_eq!(kind, MeasureKind::ResidualRelative { limit: 0.01 });
        assert!(MeasureKind::Absolute { limit: 0.0 }.validate().is_err());
    }
}
