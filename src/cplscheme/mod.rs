//! Coupling schemes
//!
//! - [`ImplicitCouplingScheme`] - serial implicit coupling with checkpointing
//! - [`ConvergenceMeasure`] - per-field convergence criteria
//! - [`CouplingData`] - iterate history and extrapolation per exchanged field

mod action;
mod coupling_data;
mod measure;
mod metrics;
mod scheme;

pub use action::{Action, ActionSet};
pub use coupling_data::CouplingData;
pub use measure::{
    AbsoluteConvergenceMeasure, ConvergenceMeasure, MeasureKind, MinIterationConvergenceMeasure,
    RelativeConvergenceMeasure, ResidualRelativeConvergenceMeasure,
};
pub use metrics::CouplingMetrics;
pub use scheme::{
    DEFAULT_VALID_DIGITS, ImplicitCouplingScheme, MAX_EXTRAPOLATION_ORDER, SchemeConfig, SchemeState, TimestepPolicy,
};
