//! Implicit (serial) coupling scheme
//!
//! Two participants iterate each time window until the second participant's
//! convergence measures accept the exchanged data. The first participant
//! computes and sends, then waits for the verdict and the second's data. The
//! second participant receives, computes, measures, and replies.
//!
//! Exchange sequence for one filled window:
//!
//! ```text
//! first                              second
//!   [window length] + send data  ->    (received during the previous advance)
//!   receive convergence          <-    measure, send convergence
//!   receive data                 <-    send data
//!                                      if ongoing: receive [window] + data
//! ```

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::action::{Action, ActionSet};
use super::coupling_data::CouplingData;
use super::measure::ConvergenceMeasure;
use super::metrics::CouplingMetrics;
use crate::error::CouplingError;
use crate::m2n::M2N;
use crate::mesh::{DataId, DataProvider, MeshData};

pub const DEFAULT_VALID_DIGITS: u32 = 10;
pub const MAX_EXTRAPOLATION_ORDER: usize = 2;

/// Who determines the length of a time window
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TimestepPolicy {
    /// Both participants use the configured window length
    #[default]
    Fixed,
    /// The first participant picks each window's length and sends it
    FirstParticipantDecides,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SchemeState {
    Uninitialized,
    Initialized,
    Iterating,
    AdvancedTimestep,
    Finalized,
}

/// Construction parameters for [`ImplicitCouplingScheme`]
#[derive(Debug, Clone, PartialEq)]
pub struct SchemeConfig {
    pub first: String,
    pub second: String,
    pub local: String,
    pub max_time: Option<f64>,
    pub max_timesteps: Option<u32>,
    /// Required for [`TimestepPolicy::Fixed`]
    pub timestep_length: Option<f64>,
    pub policy: TimestepPolicy,
    pub valid_digits: u32,
    /// Accept a window after this many iterations even if not converged
    pub max_iterations: Option<u32>,
    pub extrapolation_order: usize,
}

impl SchemeConfig {
    pub fn new(first: impl Into<String>, second: impl Into<String>, local: impl Into<String>) -> Self {
        Self {
            first: first.into(),
            second: second.into(),
            local: local.into(),
            max_time: None,
            max_timesteps: None,
            timestep_length: None,
            policy: TimestepPolicy::Fixed,
            valid_digits: DEFAULT_VALID_DIGITS,
            max_iterations: None,
            extrapolation_order: 0,
        }
    }

    pub fn with_max_time(mut self, max_time: f64) -> Self {
        self.max_time = Some(max_time);
        self
    }

    pub fn with_max_timesteps(mut self, max_timesteps: u32) -> Self {
        self.max_timesteps = Some(max_timesteps);
        self
    }

    pub fn with_timestep_length(mut self, length: f64) -> Self {
        self.timestep_length = Some(length);
        self
    }

    pub fn with_policy(mut self, policy: TimestepPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = Some(max_iterations);
        self
    }

    pub fn with_extrapolation_order(mut self, order: usize) -> Self {
        self.extrapolation_order = order;
        self
    }

    pub fn validate(&self) -> Result<(), CouplingError> {
        if self.first == self.second {
            return Err(CouplingError::InvalidConfig(format!(
                "first and second participant are both '{}'",
                self.first
            )));
        }
        if self.local != self.first && self.local != self.second {
            return Err(CouplingError::InvalidConfig(format!(
                "local participant '{}' is neither '{}' nor '{}'",
                self.local, self.first, self.second
            )));
        }
        if self.max_time.is_none() && self.max_timesteps.is_none() {
            return Err(CouplingError::InvalidConfig(
                "at least one of max time and max timesteps is required".to_string(),
            ));
        }
        if let Some(max_time) = self.max_time.filter(|t| !(*t > 0.0)) {
            return Err(CouplingError::InvalidConfig(format!("max time must be positive, got {}", max_time)));
        }
        match (self.policy, self.timestep_length) {
            (TimestepPolicy::Fixed, None) => {
                return Err(CouplingError::InvalidConfig(
                    "fixed time windows need a timestep length".to_string(),
                ));
            }
            (_, Some(length)) if !(length > 0.0) => {
                return Err(CouplingError::InvalidConfig(format!(
                    "timestep length must be positive, got {}",
                    length
                )));
            }
            _ => {}
        }
        if !(1..=16).contains(&self.valid_digits) {
            return Err(CouplingError::InvalidConfig(format!(
                "valid digits must be between 1 and 16, got {}",
                self.valid_digits
            )));
        }
        if self.extrapolation_order > MAX_EXTRAPOLATION_ORDER {
            return Err(CouplingError::InvalidConfig(format!(
                "extrapolation order {} is not supported",
                self.extrapolation_order
            )));
        }
        if self.max_iterations == Some(0) {
            return Err(CouplingError::InvalidConfig("max iterations must be at least 1".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug)]
struct MeasureContext {
    data_id: DataId,
    suffices_alone: bool,
    measure: Box<dyn ConvergenceMeasure>,
}

pub struct ImplicitCouplingScheme {
    config: SchemeConfig,
    m2n: M2N,
    state: SchemeState,
    does_first_step: bool,
    eps: f64,
    /// Start of the current time window
    time: f64,
    timesteps: u32,
    computed_part: f64,
    window_length: Option<f64>,
    iterations: u32,
    actions: ActionSet,
    send_data: Vec<CouplingData>,
    receive_data: Vec<CouplingData>,
    measures: Vec<MeasureContext>,
    has_data_been_exchanged: bool,
    is_timestep_complete: bool,
    initial_data_pending: bool,
    /// Window count at which sent data was last extrapolated
    extrapolated_at: Option<u32>,
    metrics: CouplingMetrics,
}

impl ImplicitCouplingScheme {
    pub fn new(config: SchemeConfig, m2n: M2N) -> Result<Self, CouplingError> {
        debug!(local = %config.local, first = %config.first, second = %config.second, "ImplicitCouplingScheme::new: called");
        config.validate()?;
        let does_first_step = config.local == config.first;
        let window_length = match config.policy {
            TimestepPolicy::Fixed => config.timestep_length,
            TimestepPolicy::FirstParticipantDecides => None,
        };
        let eps = 10f64.powi(-(config.valid_digits as i32));
        Ok(Self {
            config,
            m2n,
            state: SchemeState::Uninitialized,
            does_first_step,
            eps,
            time: 0.0,
            timesteps: 0,
            computed_part: 0.0,
            window_length,
            iterations: 0,
            actions: ActionSet::default(),
            send_data: Vec::new(),
            receive_data: Vec::new(),
            measures: Vec::new(),
            has_data_been_exchanged: false,
            is_timestep_complete: false,
            initial_data_pending: false,
            extrapolated_at: None,
            metrics: CouplingMetrics::default(),
        })
    }

    pub fn add_data_to_send(&mut self, data: &MeshData, initialize: bool) -> Result<(), CouplingError> {
        debug!(data = %data.id(), initialize, "ImplicitCouplingScheme::add_data_to_send: called");
        self.ensure_registration(data.id())?;
        self.send_data.push(CouplingData::new(data, initialize));
        Ok(())
    }

    pub fn add_data_to_receive(&mut self, data: &MeshData, initialize: bool) -> Result<(), CouplingError> {
        debug!(data = %data.id(), initialize, "ImplicitCouplingScheme::add_data_to_receive: called");
        self.ensure_registration(data.id())?;
        self.receive_data.push(CouplingData::new(data, initialize));
        Ok(())
    }

    /// Registers a measure on an already registered field.
    ///
    /// The window converges when all measures converge, or when any measure
    /// flagged `suffices_alone` converges.
    pub fn add_convergence_measure(
        &mut self,
        data_id: DataId,
        suffices_alone: bool,
        measure: Box<dyn ConvergenceMeasure>,
    ) -> Result<(), CouplingError> {
        debug!(data = %data_id, suffices_alone, ?measure, "ImplicitCouplingScheme::add_convergence_measure: called");
        if self.state != SchemeState::Uninitialized {
            return Err(CouplingError::protocol("measures must be added before initialize"));
        }
        if self.coupling_data(data_id).is_none() {
            return Err(CouplingError::UnknownData(data_id));
        }
        self.measures.push(MeasureContext {
            data_id,
            suffices_alone,
            measure,
        });
        Ok(())
    }

    pub fn set_extrapolation_order(&mut self, order: usize) -> Result<(), CouplingError> {
        if self.state != SchemeState::Uninitialized {
            return Err(CouplingError::protocol("extrapolation order must be set before initialize"));
        }
        if order > MAX_EXTRAPOLATION_ORDER {
            return Err(CouplingError::InvalidConfig(format!(
                "extrapolation order {} is not supported",
                order
            )));
        }
        self.config.extrapolation_order = order;
        Ok(())
    }

    pub async fn initialize<D>(&mut self, start_time: f64, start_timestep: u32, data: &mut D) -> Result<(), CouplingError>
    where
        D: DataProvider + Send + Sync,
    {
        debug!(start_time, start_timestep, local = %self.config.local, "ImplicitCouplingScheme::initialize: called");
        match self.state {
            SchemeState::Uninitialized => {}
            SchemeState::Finalized => return Err(CouplingError::protocol("initialize called after finalize")),
            _ => return Err(CouplingError::protocol("initialize called twice")),
        }
        if !self.m2n.is_connected() {
            return Err(CouplingError::protocol("initialize requires a connected M2N"));
        }
        if !self.m2n.are_slaves_connected() {
            return Err(CouplingError::protocol(
                "initialize requires connected distributed communications on every mesh",
            ));
        }
        self.time = start_time;
        self.timesteps = start_timestep;
        self.setup_data_matrices(&*data)?;

        if self.does_first_step && !self.measures.is_empty() {
            warn!(
                local = %self.config.local,
                count = self.measures.len(),
                "convergence measures registered on the first participant are never evaluated"
            );
        }
        self.initial_data_pending = self.has_to_send_init_data() || self.has_to_receive_init_data();
        self.state = SchemeState::Initialized;

        if self.is_coupling_ongoing() {
            if !self.does_first_step && !self.initial_data_pending {
                self.receive_and_set_window(data).await?;
                self.has_data_been_exchanged = true;
            }
            self.actions.require(Action::WriteCheckpoint);
        }
        info!(
            local = %self.config.local,
            first = self.does_first_step,
            send = self.send_data.len(),
            receive = self.receive_data.len(),
            "coupling scheme initialized"
        );
        Ok(())
    }

    /// Exchanges fields flagged for initialization: the second participant
    /// sends them once before the first window. A no-op when nothing is flagged.
    pub async fn initialize_data<D>(&mut self, data: &mut D) -> Result<(), CouplingError>
    where
        D: DataProvider + Send + Sync,
    {
        debug!(local = %self.config.local, "ImplicitCouplingScheme::initialize_data: called");
        if self.state != SchemeState::Initialized {
            return Err(CouplingError::protocol("initialize_data must follow initialize"));
        }
        if !self.initial_data_pending {
            debug!("ImplicitCouplingScheme::initialize_data: nothing to exchange");
            return Ok(());
        }
        self.has_data_been_exchanged = false;

        if self.has_to_receive_init_data() {
            for cpl in self.receive_data.iter_mut().filter(|c| c.requires_initialization()) {
                let values = data
                    .values_mut(cpl.data_id())
                    .ok_or(CouplingError::UnknownData(cpl.data_id()))?;
                self.m2n.receive(values, cpl.mesh_id(), cpl.dimension()).await?;
                cpl.store_iterate(values)?;
            }
            self.has_data_been_exchanged = true;
        }

        if self.has_to_send_init_data() {
            for cpl in self.send_data.iter_mut().filter(|c| c.requires_initialization()) {
                let values = data.values(cpl.data_id()).ok_or(CouplingError::UnknownData(cpl.data_id()))?;
                self.m2n.send(values, cpl.mesh_id(), cpl.dimension()).await?;
                cpl.store_iterate(values)?;
            }
            if self.is_coupling_ongoing() {
                self.receive_and_set_window(data).await?;
                self.has_data_been_exchanged = true;
            }
        }
        self.initial_data_pending = false;
        info!(local = %self.config.local, "initial data exchanged");
        Ok(())
    }

    /// Reports solver progress within the current time window
    pub fn add_computed_time(&mut self, dt: f64) -> Result<(), CouplingError> {
        debug!(dt, computed_part = self.computed_part, "ImplicitCouplingScheme::add_computed_time: called");
        self.ensure_active("add_computed_time")?;
        if !self.is_coupling_ongoing() {
            return Err(CouplingError::protocol("add_computed_time called after the coupling run has ended"));
        }
        if !(dt > 0.0) || !dt.is_finite() {
            return Err(CouplingError::protocol(format!("computed time must be positive, got {}", dt)));
        }
        let max = self.next_timestep_max_length();
        if dt - max > self.eps {
            return Err(CouplingError::protocol(format!(
                "computed time {} exceeds the remaining window length {}",
                dt, max
            )));
        }
        self.computed_part += dt;
        Ok(())
    }

    /// Exchanges data if the current time window is filled; otherwise records a
    /// sub-cycling step.
    pub async fn advance<D>(&mut self, data: &mut D) -> Result<(), CouplingError>
    where
        D: DataProvider + Send + Sync,
    {
        debug!(
            local = %self.config.local,
            time = self.time,
            computed_part = self.computed_part,
            iterations = self.iterations,
            "ImplicitCouplingScheme::advance: called"
        );
        self.ensure_active("advance")?;
        if !self.is_coupling_ongoing() {
            return Err(CouplingError::protocol("advance called after the coupling run has ended"));
        }
        if self.initial_data_pending {
            return Err(CouplingError::protocol("initialize_data must be called before advance"));
        }
        if let Some(action) = self.actions.iter().next() {
            return Err(CouplingError::protocol(format!(
                "required action {} was not performed before advance",
                action
            )));
        }

        self.is_timestep_complete = false;
        self.has_data_been_exchanged = false;

        if !self.is_window_filled() {
            self.metrics.record_subcycle();
            debug!(computed_part = self.computed_part, "ImplicitCouplingScheme::advance: sub-cycling");
            return Ok(());
        }

        self.has_data_been_exchanged = true;
        self.iterations += 1;
        self.metrics.record_exchange();

        let (converged, forced) = if self.does_first_step {
            if self.config.policy == TimestepPolicy::FirstParticipantDecides {
                let length = *self.window_length.get_or_insert(self.computed_part);
                self.m2n.send_double(length).await?;
            }
            send_all(&mut self.m2n, &self.send_data, &*data).await?;
            let converged = self.m2n.receive_bool().await?;
            receive_all(&mut self.m2n, &self.receive_data, data).await?;
            (converged, false)
        } else {
            let mut converged = self.measure_convergence(&*data)?;
            let forced = !converged && self.config.max_iterations.is_some_and(|max| self.iterations >= max);
            if forced {
                warn!(
                    iterations = self.iterations,
                    timestep = self.timesteps + 1,
                    "iteration limit reached, accepting time window without convergence"
                );
                converged = true;
            }
            self.m2n.send_bool(converged).await?;
            send_all(&mut self.m2n, &self.send_data, &*data).await?;
            (converged, forced)
        };

        if converged {
            self.timestep_completed(forced);
        } else {
            debug!(iterations = self.iterations, "ImplicitCouplingScheme::advance: not converged");
            self.state = SchemeState::Iterating;
        }
        self.update_history(converged, data)?;
        self.computed_part = 0.0;

        let ongoing = self.is_coupling_ongoing();
        if !self.does_first_step && ongoing {
            self.receive_and_set_window(data).await?;
        }

        if !converged {
            self.actions.require(Action::ReadCheckpoint);
        } else if ongoing {
            self.actions.require(Action::WriteCheckpoint);
        }
        Ok(())
    }

    /// Extrapolates all sent fields into the next window and shifts their
    /// history. Valid once per completed window; `advance` does this itself
    /// when an extrapolation order is set and the run continues.
    pub fn extrapolate_data<D: DataProvider>(&mut self, data: &mut D) -> Result<(), CouplingError> {
        debug!(timesteps = self.timesteps, "ImplicitCouplingScheme::extrapolate_data: called");
        self.ensure_active("extrapolate_data")?;
        if !self.is_timestep_complete {
            return Err(CouplingError::protocol(
                "extrapolate_data is only valid right after a time window completes",
            ));
        }
        if self.extrapolated_at == Some(self.timesteps) {
            return Err(CouplingError::protocol(format!(
                "data was already extrapolated after time window {}",
                self.timesteps
            )));
        }
        let order = self.config.extrapolation_order;
        for cpl in &mut self.send_data {
            let values = data
                .values_mut(cpl.data_id())
                .ok_or(CouplingError::UnknownData(cpl.data_id()))?;
            cpl.extrapolate(values, order, self.timesteps)?;
        }
        self.extrapolated_at = Some(self.timesteps);
        Ok(())
    }

    pub async fn finalize(&mut self) -> Result<(), CouplingError> {
        debug!(local = %self.config.local, "ImplicitCouplingScheme::finalize: called");
        match self.state {
            SchemeState::Uninitialized => return Err(CouplingError::protocol("finalize called before initialize")),
            SchemeState::Finalized => return Err(CouplingError::protocol("finalize called twice")),
            _ => {}
        }
        if self.is_coupling_ongoing() {
            return Err(CouplingError::protocol("finalize called while the coupling is still ongoing"));
        }
        self.m2n.close_connection().await?;
        self.state = SchemeState::Finalized;
        info!(
            local = %self.config.local,
            time = self.time,
            timesteps = self.timesteps,
            average_iterations = self.metrics.average_iterations(),
            "coupling scheme finalized"
        );
        Ok(())
    }

    pub fn is_coupling_ongoing(&self) -> bool {
        let time_left = self.config.max_time.is_none_or(|max| max - self.time > self.eps);
        let steps_left = self.config.max_timesteps.is_none_or(|max| self.timesteps < max);
        time_left && steps_left
    }

    pub fn is_action_required(&self, action: Action) -> bool {
        self.actions.contains(action)
    }

    pub fn performed_action(&mut self, action: Action) {
        debug!(%action, "ImplicitCouplingScheme::performed_action: called");
        if !self.actions.clear(action) {
            warn!(%action, "performed action that was not required");
        }
    }

    /// Largest step the solver may take without overshooting the window or
    /// the end of the run
    pub fn next_timestep_max_length(&self) -> f64 {
        let remainder = match self.window_length {
            Some(length) => length - self.computed_part,
            None => f64::MAX,
        };
        match self.config.max_time {
            Some(max) => remainder.min(max - self.time - self.computed_part),
            None => remainder,
        }
    }

    pub fn time(&self) -> f64 {
        self.time + self.computed_part
    }

    pub fn timesteps(&self) -> u32 {
        self.timesteps
    }

    /// Iterations in the current window, zero right after a window completes
    pub fn iterations(&self) -> u32 {
        self.iterations
    }

    pub fn has_data_been_exchanged(&self) -> bool {
        self.has_data_been_exchanged
    }

    pub fn is_coupling_timestep_complete(&self) -> bool {
        self.is_timestep_complete
    }

    pub fn window_length(&self) -> Option<f64> {
        self.window_length
    }

    pub fn state(&self) -> SchemeState {
        self.state
    }

    pub fn does_first_step(&self) -> bool {
        self.does_first_step
    }

    pub fn metrics(&self) -> &CouplingMetrics {
        &self.metrics
    }

    pub fn send_data(&self, data_id: DataId) -> Option<&CouplingData> {
        self.send_data.iter().find(|c| c.data_id() == data_id)
    }

    pub fn receive_data(&self, data_id: DataId) -> Option<&CouplingData> {
        self.receive_data.iter().find(|c| c.data_id() == data_id)
    }

    pub fn m2n(&self) -> &M2N {
        &self.m2n
    }

    fn coupling_data(&self, data_id: DataId) -> Option<&CouplingData> {
        self.send_data(data_id).or_else(|| self.receive_data(data_id))
    }

    fn ensure_registration(&self, data_id: DataId) -> Result<(), CouplingError> {
        if self.state != SchemeState::Uninitialized {
            return Err(CouplingError::protocol("data must be registered before initialize"));
        }
        if self.coupling_data(data_id).is_some() {
            return Err(CouplingError::DuplicateData(data_id));
        }
        Ok(())
    }

    fn ensure_active(&self, operation: &str) -> Result<(), CouplingError> {
        match self.state {
            SchemeState::Initialized | SchemeState::Iterating | SchemeState::AdvancedTimestep => Ok(()),
            SchemeState::Uninitialized => Err(CouplingError::protocol(format!("{} called before initialize", operation))),
            SchemeState::Finalized => Err(CouplingError::protocol(format!("{} called after finalize", operation))),
        }
    }

    fn has_to_send_init_data(&self) -> bool {
        !self.does_first_step && self.send_data.iter().any(CouplingData::requires_initialization)
    }

    fn has_to_receive_init_data(&self) -> bool {
        self.does_first_step && self.receive_data.iter().any(CouplingData::requires_initialization)
    }

    fn is_window_filled(&self) -> bool {
        if self.window_length.is_none() {
            return self.computed_part > 0.0;
        }
        self.next_timestep_max_length() <= self.eps
    }

    fn setup_data_matrices<D: DataProvider>(&mut self, data: &D) -> Result<(), CouplingError> {
        let columns = self.config.extrapolation_order + 1;
        for cpl in &mut self.send_data {
            let rows = data.values(cpl.data_id()).ok_or(CouplingError::UnknownData(cpl.data_id()))?.len();
            cpl.allocate(rows, columns);
        }
        for cpl in &mut self.receive_data {
            let rows = data.values(cpl.data_id()).ok_or(CouplingError::UnknownData(cpl.data_id()))?.len();
            cpl.allocate(rows, 1);
        }
        Ok(())
    }

    fn measure_convergence<D: DataProvider>(&mut self, data: &D) -> Result<bool, CouplingError> {
        if self.measures.is_empty() {
            return Ok(true);
        }
        let mut all_converged = true;
        let mut one_suffices = false;
        for ctx in &mut self.measures {
            let cpl = self
                .send_data
                .iter()
                .chain(self.receive_data.iter())
                .find(|c| c.data_id() == ctx.data_id)
                .ok_or(CouplingError::UnknownData(ctx.data_id))?;
            let values = data.values(ctx.data_id).ok_or(CouplingError::UnknownData(ctx.data_id))?;
            ctx.measure.measure(cpl.previous_iterate(), values);
            let converged = ctx.measure.is_convergence();
            debug!(data = %ctx.data_id, state = %ctx.measure.print_state(), "convergence measured");
            if !converged {
                all_converged = false;
            } else if ctx.suffices_alone {
                one_suffices = true;
            }
        }
        Ok(all_converged || one_suffices)
    }

    fn timestep_completed(&mut self, forced: bool) {
        let advanced = match self.window_length {
            Some(length) => self.config.max_time.map_or(length, |max| length.min(max - self.time)),
            None => self.computed_part,
        };
        self.time += advanced;
        self.timesteps += 1;
        self.is_timestep_complete = true;
        self.metrics.record_window(self.iterations, forced);
        info!(
            local = %self.config.local,
            timestep = self.timesteps,
            time = self.time,
            iterations = self.iterations,
            "time window completed"
        );
        self.iterations = 0;
        for ctx in &mut self.measures {
            ctx.measure.new_measurement_series();
        }
        if self.does_first_step && self.config.policy == TimestepPolicy::FirstParticipantDecides {
            self.window_length = None;
        }
        self.state = SchemeState::AdvancedTimestep;
    }

    fn update_history<D: DataProvider>(&mut self, converged: bool, data: &mut D) -> Result<(), CouplingError> {
        if converged && self.config.extrapolation_order > 0 && self.is_coupling_ongoing() {
            self.extrapolate_data(data)?;
        } else {
            for cpl in &mut self.send_data {
                let values = data.values(cpl.data_id()).ok_or(CouplingError::UnknownData(cpl.data_id()))?;
                cpl.store_iterate(values)?;
            }
        }
        for cpl in &mut self.receive_data {
            let values = data.values(cpl.data_id()).ok_or(CouplingError::UnknownData(cpl.data_id()))?;
            cpl.store_iterate(values)?;
        }
        Ok(())
    }

    async fn receive_and_set_window<D>(&mut self, data: &mut D) -> Result<(), CouplingError>
    where
        D: DataProvider + Send + Sync,
    {
        if self.config.policy == TimestepPolicy::FirstParticipantDecides {
            let length = self.m2n.receive_double().await?;
            if !(length > 0.0) {
                return Err(CouplingError::protocol(format!(
                    "received non-positive window length {}",
                    length
                )));
            }
            debug!(length, "ImplicitCouplingScheme::receive_and_set_window: window length received");
            self.window_length = Some(length);
        }
        receive_all(&mut self.m2n, &self.receive_data, data).await
    }
}

async fn send_all<D>(m2n: &mut M2N, coupling_data: &[CouplingData], data: &D) -> Result<(), CouplingError>
where
    D: DataProvider + Sync,
{
    for cpl in coupling_data {
        let values = data.values(cpl.data_id()).ok_or(CouplingError::UnknownData(cpl.data_id()))?;
        m2n.send(values, cpl.mesh_id(), cpl.dimension()).await?;
    }
    Ok(())
}

async fn receive_all<D>(m2n: &mut M2N, coupling_data: &[CouplingData], data: &mut D) -> Result<(), CouplingError>
where
    D: DataProvider + Send,
{
    for cpl in coupling_data {
        let values = data
            .values_mut(cpl.data_id())
            .ok_or(CouplingError::UnknownData(cpl.data_id()))?;
        m2n.receive(values, cpl.mesh_id(), cpl.dimension()).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::com::ChannelHub;
    use crate::m2n::{MeshPartition, PointToPointComFactory};
    use crate::cplscheme::AbsoluteConvergenceMeasure;
    use crate::mesh::{Mesh, MeshId};

    const MESH: MeshId = MeshId(0);

    fn mesh() -> (Mesh, DataId, DataId) {
        let mut mesh = Mesh::new(MESH, "Interface", 1);
        let d0 = mesh.create_data("Data0", 1);
        let d1 = mesh.create_data("Data1", 3);
        (mesh, d0, d1)
    }

    fn m2n(hub: &ChannelHub) -> M2N {
        let factory = Arc::new(PointToPointComFactory::new(Arc::new(hub.clone())));
        let mut m2n = M2N::new(Box::new(hub.communication("master")), factory);
        m2n.create_distributed_communication(MeshPartition::serial(MESH, 1)).unwrap();
        m2n
    }

    async fn connected_m2ns() -> (M2N, M2N) {
        let hub = ChannelHub::default();
        let mut a = m2n(&hub);
        let mut b = m2n(&hub);
        a.accept_master_connection("P0", "P1").await.unwrap();
        a.accept_slaves_connection("P0", "P1").await.unwrap();
        b.request_master_connection("P0", "P1").await.unwrap();
        b.request_slaves_connection("P0", "P1").await.unwrap();
        (a, b)
    }

    fn scheme(local: &str, m2n: M2N, mesh: &Mesh) -> ImplicitCouplingScheme {
        let config = SchemeConfig::new("P0", "P1", local)
            .with_max_timesteps(1)
            .with_timestep_length(0.1);
        let mut scheme = ImplicitCouplingScheme::new(config, m2n).unwrap();
        let d0 = mesh.data_by_name("Data0").unwrap();
        let d1 = mesh.data_by_name("Data1").unwrap();
        if local == "P0" {
            scheme.add_data_to_send(d0, false).unwrap();
            scheme.add_data_to_receive(d1, false).unwrap();
        } else {
            scheme.add_data_to_receive(d0, false).unwrap();
            scheme.add_data_to_send(d1, false).unwrap();
        }
        scheme
    }

    #[test]
    fn test_config_validation() {
        let base = SchemeConfig::new("A", "B", "A").with_max_timesteps(3).with_timestep_length(0.1);
        assert!(base.validate().is_ok());

        assert!(SchemeConfig::new("A", "A", "A").with_max_timesteps(1).with_timestep_length(0.1).validate().is_err());
        assert!(SchemeConfig::new("A", "B", "C").with_max_timesteps(1).with_timestep_length(0.1).validate().is_err());
        assert!(SchemeConfig::new("A", "B", "A").with_timestep_length(0.1).validate().is_err());
        assert!(SchemeConfig::new("A", "B", "A").with_max_timesteps(1).validate().is_err());
        assert!(base.clone().with_max_time(-1.0).validate().is_err());
        assert!(base.clone().with_extrapolation_order(3).validate().is_err());
        assert!(base.clone().with_max_iterations(0).validate().is_err());

        let decides = SchemeConfig::new("A", "B", "B")
            .with_max_time(1.0)
            .with_policy(TimestepPolicy::FirstParticipantDecides);
        assert!(decides.validate().is_ok());
    }

    #[tokio::test]
    async fn test_initialize_requires_connected_m2n() {
        let hub = ChannelHub::default();
        let (mut mesh, _, _) = mesh();
        let mut first = scheme("P0", m2n(&hub), &mesh);
        let err = first.initialize(0.0, 0, &mut mesh).await.unwrap_err();
        assert!(matches!(err, CouplingError::Protocol(_)));
        assert_eq!(first.state(), SchemeState::Uninitialized);
    }

    #[tokio::test]
    async fn test_initialize_requires_connected_mesh_channels() {
        let hub = ChannelHub::default();
        let mut a = m2n(&hub);
        let mut b = m2n(&hub);
        a.accept_master_connection("P0", "P1").await.unwrap();
        b.request_master_connection("P0", "P1").await.unwrap();

        let (mut mesh0, _, _) = mesh();
        let (mut mesh1, _, _) = mesh();
        let mut first = scheme("P0", a, &mesh0);
        let mut second = scheme("P1", b, &mesh1);
        assert!(first.m2n().is_connected());
        assert!(!first.m2n().are_slaves_connected());

        let err = first.initialize(0.0, 0, &mut mesh0).await.unwrap_err();
        assert!(err.to_string().contains("distributed communications"));
        assert!(second.initialize(0.0, 0, &mut mesh1).await.is_err());
        assert_eq!(first.state(), SchemeState::Uninitialized);
        assert_eq!(second.state(), SchemeState::Uninitialized);
    }

    #[tokio::test]
    async fn test_registration_errors() {
        let (m2n, _peer) = connected_m2ns().await;
        let (mut mesh, d0, _) = mesh();
        let mut first = scheme("P0", m2n, &mesh);

        let err = first.add_data_to_receive(mesh.data(d0).unwrap(), false).unwrap_err();
        assert!(matches!(err, CouplingError::DuplicateData(id) if id == d0));

        let unknown = DataId::new(MESH, 7);
        let err = first
            .add_convergence_measure(unknown, false, Box::new(AbsoluteConvergenceMeasure::new(1.0)))
            .unwrap_err();
        assert!(matches!(err, CouplingError::UnknownData(_)));
        assert!(matches!(first.set_extrapolation_order(3), Err(CouplingError::InvalidConfig(_))));

        first.initialize(0.0, 0, &mut mesh).await.unwrap();
        assert!(first.add_data_to_send(mesh.data(d0).unwrap(), false).is_err());
        assert!(first.set_extrapolation_order(1).is_err());
        assert!(first.initialize(0.0, 0, &mut mesh).await.is_err());
    }

    #[tokio::test]
    async fn test_pending_action_blocks_advance() {
        let (m2n, _peer) = connected_m2ns().await;
        let (mut mesh, _, _) = mesh();
        let mut first = scheme("P0", m2n, &mesh);
        first.initialize(0.0, 0, &mut mesh).await.unwrap();

        first.add_computed_time(0.1).unwrap();
        let err = first.advance(&mut mesh).await.unwrap_err();
        assert!(err.to_string().contains("write-iteration-checkpoint"));
        assert!(!first.has_data_been_exchanged());
    }

    #[tokio::test]
    async fn test_add_computed_time_bounds() {
        let (m2n, _peer) = connected_m2ns().await;
        let (mut mesh, _, _) = mesh();
        let mut first = scheme("P0", m2n, &mesh);

        assert!(first.add_computed_time(0.05).is_err());
        first.initialize(0.0, 0, &mut mesh).await.unwrap();

        assert!(first.add_computed_time(0.0).is_err());
        assert!(first.add_computed_time(-0.1).is_err());
        first.add_computed_time(0.05).unwrap();
        assert!((first.next_timestep_max_length() - 0.05).abs() < 1e-12);
        assert!(first.add_computed_time(0.06).is_err());
        first.add_computed_time(0.05).unwrap();
        assert!((first.time() - 0.1).abs() < 1e-12);
    }

    #[tokio::test]
    async fn test_performed_action_not_required_is_noop() {
        let (m2n, _peer) = connected_m2ns().await;
        let (mut mesh, _, _) = mesh();
        let mut first = scheme("P0", m2n, &mesh);
        first.initialize(0.0, 0, &mut mesh).await.unwrap();

        first.performed_action(Action::ReadCheckpoint);
        assert!(first.is_action_required(Action::WriteCheckpoint));
        first.performed_action(Action::WriteCheckpoint);
        assert!(!first.is_action_required(Action::WriteCheckpoint));
        first.performed_action(Action::WriteCheckpoint);
    }

    #[tokio::test]
    async fn test_finalize_errors() {
        let (m2n, _peer) = connected_m2ns().await;
        let (mut mesh, _, _) = mesh();
        let mut first = scheme("P0", m2n, &mesh);
        assert!(first.finalize().await.is_err());
        first.initialize(0.0, 0, &mut mesh).await.unwrap();
        let err = first.finalize().await.unwrap_err();
        assert!(err.to_string().contains("still ongoing"));
    }

    #[tokio::test]
    async fn test_extrapolate_data_once_per_completed_window() {
        let (m2n0, m2n1) = connected_m2ns().await;
        let (mut mesh0, d0, _) = mesh();
        let (mut mesh1, _, d1) = mesh();
        let mut first = scheme("P0", m2n0, &mesh0);
        let mut second = scheme("P1", m2n1, &mesh1);
        first.set_extrapolation_order(1).unwrap();

        tokio::join!(
            async {
                first.initialize(0.0, 0, &mut mesh0).await.unwrap();
                assert!(first.extrapolate_data(&mut mesh0).is_err());
                first.performed_action(Action::WriteCheckpoint);

                mesh0.values_mut(d0).unwrap()[0] = 2.0;
                first.add_computed_time(0.1).unwrap();
                first.advance(&mut mesh0).await.unwrap();
                // the run is over, so advance stored the value unchanged
                assert_eq!(mesh0.values(d0).unwrap(), &[2.0]);

                // 2 * 2.0 - 0.0 from the previous window
                first.extrapolate_data(&mut mesh0).unwrap();
                assert_eq!(mesh0.values(d0).unwrap(), &[4.0]);
                let err = first.extrapolate_data(&mut mesh0).unwrap_err();
                assert!(err.to_string().contains("already extrapolated"));
                assert_eq!(mesh0.values(d0).unwrap(), &[4.0]);
                first.finalize().await.unwrap();
            },
            async {
                second.initialize(0.0, 0, &mut mesh1).await.unwrap();
                second.performed_action(Action::WriteCheckpoint);
                mesh1.values_mut(d1).unwrap().copy_from_slice(&[1.0, 2.0, 3.0]);
                second.add_computed_time(0.1).unwrap();
                second.advance(&mut mesh1).await.unwrap();
                second.finalize().await.unwrap();
            }
        );
    }

    #[tokio::test]
    async fn test_single_window_exchange() {
        let (m2n0, m2n1) = connected_m2ns().await;
        let (mut mesh0, d0, d1) = mesh();
        let (mut mesh1, _, _) = mesh();
        let mut first = scheme("P0", m2n0, &mesh0);
        let mut second = scheme("P1", m2n1, &mesh1);

        tokio::join!(
            async {
                first.initialize(0.0, 0, &mut mesh0).await.unwrap();
                assert!(first.is_action_required(Action::WriteCheckpoint));
                assert!(!first.has_data_been_exchanged());
                first.performed_action(Action::WriteCheckpoint);

                mesh0.values_mut(d0).unwrap()[0] = 2.0;
                first.add_computed_time(0.1).unwrap();
                first.advance(&mut mesh0).await.unwrap();

                assert!(first.has_data_been_exchanged());
                assert!(first.is_coupling_timestep_complete());
                assert_eq!(first.timesteps(), 1);
                assert!(!first.is_coupling_ongoing());
                assert!(!first.is_action_required(Action::WriteCheckpoint));
                assert!(!first.is_action_required(Action::ReadCheckpoint));
                assert_eq!(mesh0.values(d1).unwrap(), &[1.0, 2.0, 3.0]);
                first.finalize().await.unwrap();
            },
            async {
                second.initialize(0.0, 0, &mut mesh1).await.unwrap();
                assert!(second.is_action_required(Action::WriteCheckpoint));
                assert!(second.has_data_been_exchanged());
                assert_eq!(mesh1.values(d0).unwrap(), &[2.0]);
                second.performed_action(Action::WriteCheckpoint);

                mesh1.values_mut(d1).unwrap().copy_from_slice(&[1.0, 2.0, 3.0]);
                second.add_computed_time(0.1).unwrap();
                second.advance(&mut mesh1).await.unwrap();

                assert_eq!(second.timesteps(), 1);
                assert!(!second.is_coupling_ongoing());
                assert_eq!(second.state(), SchemeState::AdvancedTimestep);
                second.finalize().await.unwrap();
                assert_eq!(second.state(), SchemeState::Finalized);
                assert!(second.add_computed_time(0.1).is_err());
            }
        );
    }
}
