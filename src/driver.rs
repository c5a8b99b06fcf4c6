//! Solver-side driver loop
//!
//! Runs one participant through the usual sequence: initialize, exchange
//! initial data, then compute, report time and advance until the coupling
//! ends, honouring checkpoint actions along the way.

use eyre::{Result, bail};
use tracing::{debug, info};

use crate::cplscheme::{Action, CouplingMetrics, ImplicitCouplingScheme};
use crate::mesh::DataProvider;

/// A solver coupled through an [`ImplicitCouplingScheme`]
pub trait Participant<D: DataProvider> {
    fn name(&self) -> &str;

    /// Step the solver would like to take. `None` takes the full remainder
    /// of the current time window.
    fn preferred_timestep(&self) -> Option<f64> {
        None
    }

    /// Advances the solver by `dt`, reading received fields from `data` and
    /// writing the fields it sends
    fn solve(&mut self, dt: f64, data: &mut D) -> Result<()>;

    fn write_checkpoint(&mut self, data: &D);

    fn read_checkpoint(&mut self, data: &mut D);
}

/// Drives `solver` until the scheme reports the end of the run, then finalizes
pub async fn run_participant<D, P>(
    scheme: &mut ImplicitCouplingScheme,
    solver: &mut P,
    data: &mut D,
) -> Result<CouplingMetrics>
where
    D: DataProvider + Send + Sync,
    P: Participant<D> + Send,
{
    debug!(participant = solver.name(), "run_participant: called");
    scheme.initialize(0.0, 0, data).await?;
    scheme.initialize_data(data).await?;

    while scheme.is_coupling_ongoing() {
        if scheme.is_action_required(Action::WriteCheckpoint) {
            solver.write_checkpoint(data);
            scheme.performed_action(Action::WriteCheckpoint);
        }

        let max = scheme.next_timestep_max_length();
        let dt = solver.preferred_timestep().map_or(max, |preferred| preferred.min(max));
        if !dt.is_finite() || dt >= f64::MAX {
            bail!(
                "participant '{}' must choose its own timestep when the window length is open",
                solver.name()
            );
        }

        solver.solve(dt, data)?;
        scheme.add_computed_time(dt)?;
        scheme.advance(data).await?;

        if scheme.is_action_required(Action::ReadCheckpoint) {
            solver.read_checkpoint(data);
            scheme.performed_action(Action::ReadCheckpoint);
        }
    }

    scheme.finalize().await?;
    info!(
        participant = solver.name(),
        time = scheme.time(),
        timesteps = scheme.timesteps(),
        "participant finished"
    );
    Ok(scheme.metrics().clone())
}
