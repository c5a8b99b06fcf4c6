//! Built-in demo: two synthetic solvers with a known fixed point
//!
//! Each solver writes `coupling * mean(received) + forcing * t` into every
//! field it sends. With a coupling factor below one the coupled problem
//! contracts, so each time window converges after a few iterations.

use std::collections::BTreeMap;
use std::sync::Arc;

use eyre::Result;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::com::ChannelHub;
use crate::config::{Config, ExchangeConfig};
use crate::cplscheme::{CouplingMetrics, TimestepPolicy};
use crate::driver::{Participant, run_participant};
use crate::m2n::{M2N, MeshPartition, PointToPointComFactory};
use crate::mesh::{DataId, DataProvider, Mesh};

const DEFAULT_DEMO_STEP: f64 = 0.1;

#[derive(Debug, Clone)]
pub struct FixedPointSolver {
    name: String,
    reads: Vec<DataId>,
    writes: Vec<DataId>,
    coupling: f64,
    forcing: f64,
    preferred_dt: Option<f64>,
    time: f64,
    checkpoint_time: f64,
}

impl FixedPointSolver {
    pub fn new(name: impl Into<String>, reads: Vec<DataId>, writes: Vec<DataId>, coupling: f64, forcing: f64) -> Self {
        Self {
            name: name.into(),
            reads,
            writes,
            coupling,
            forcing,
            preferred_dt: None,
            time: 0.0,
            checkpoint_time: 0.0,
        }
    }

    pub fn with_preferred_timestep(mut self, dt: f64) -> Self {
        self.preferred_dt = Some(dt);
        self
    }

    /// Builds the solver for participant `local` from the exchange table
    pub fn from_config(config: &Config, local: &str, meshes: &[Mesh]) -> Self {
        let reads = field_ids(config, meshes, |e| e.to == local);
        let writes = field_ids(config, meshes, |e| e.from == local);
        let solver = Self::new(local, reads, writes, config.demo.coupling, config.demo.forcing);

        let c = &config.coupling;
        let is_first = local == c.first;
        match (is_first, c.timestep_policy) {
            (true, TimestepPolicy::FirstParticipantDecides) => {
                solver.with_preferred_timestep(c.timestep_length.unwrap_or(DEFAULT_DEMO_STEP))
            }
            (false, _) if config.demo.second_substeps > 1 => {
                let window = c.timestep_length.unwrap_or(DEFAULT_DEMO_STEP);
                solver.with_preferred_timestep(window / config.demo.second_substeps as f64)
            }
            _ => solver,
        }
    }

    pub fn time(&self) -> f64 {
        self.time
    }

    fn mean_input<D: DataProvider>(&self, data: &D) -> f64 {
        let (sum, count) = self
            .reads
            .iter()
            .filter_map(|id| data.values(*id))
            .flatten()
            .fold((0.0_f64, 0usize), |(sum, count), v| (sum + *v, count + 1));
        if count == 0 { 0.0 } else { sum / count as f64 }
    }
}

impl<D: DataProvider> Participant<D> for FixedPointSolver {
    fn name(&self) -> &str {
        &self.name
    }

    fn preferred_timestep(&self) -> Option<f64> {
        self.preferred_dt
    }

    fn solve(&mut self, dt: f64, data: &mut D) -> Result<()> {
        self.time += dt;
        let output = self.coupling * self.mean_input(&*data) + self.forcing * self.time;
        debug!(solver = %self.name, dt, time = self.time, output, "FixedPointSolver::solve: called");
        for id in &self.writes {
            let values = data
                .values_mut(*id)
                .ok_or_else(|| eyre::eyre!("solver {} has no buffer for {}", self.name, id))?;
            values.fill(output);
        }
        Ok(())
    }

    fn write_checkpoint(&mut self, _data: &D) {
        self.checkpoint_time = self.time;
    }

    fn read_checkpoint(&mut self, _data: &mut D) {
        self.time = self.checkpoint_time;
    }
}

fn field_ids(config: &Config, meshes: &[Mesh], pick: impl Fn(&ExchangeConfig) -> bool) -> Vec<DataId> {
    config
        .exchanges
        .iter()
        .filter(|e| pick(e))
        .filter_map(|e| {
            meshes
                .iter()
                .find(|m| m.name() == e.mesh)
                .and_then(|m| m.data_by_name(&e.data))
                .map(|d| d.id())
        })
        .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParticipantReport {
    pub name: String,
    pub time: f64,
    pub metrics: CouplingMetrics,
    /// First value of every field this participant sent, keyed by data name
    pub final_values: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DemoReport {
    pub participants: Vec<ParticipantReport>,
}

/// Runs both demo participants as concurrent tasks over an in-process hub
pub async fn run_demo(config: &Config) -> Result<DemoReport> {
    config.validate()?;
    let mut config = config.clone();
    if config.coupling.max_iterations.is_none() {
        config.coupling.max_iterations = config.demo.max_iterations;
    }
    let config = &config;
    info!(
        first = %config.coupling.first,
        second = %config.coupling.second,
        "starting demo coupling run"
    );
    let hub = ChannelHub::new(config.transport.channel_buffer);
    let (first, second) = tokio::try_join!(
        run_side(config, &hub, &config.coupling.first),
        run_side(config, &hub, &config.coupling.second),
    )?;
    Ok(DemoReport {
        participants: vec![first, second],
    })
}

async fn run_side(config: &Config, hub: &ChannelHub, local: &str) -> Result<ParticipantReport> {
    let c = &config.coupling;
    let mut meshes = config.create_meshes();

    let factory = Arc::new(PointToPointComFactory::new(Arc::new(hub.clone())));
    let mut m2n = M2N::new(Box::new(hub.communication("master")), factory);
    for mesh in &meshes {
        m2n.create_distributed_communication(MeshPartition::serial(mesh.id(), mesh.vertex_count()))?;
    }
    if local == c.first {
        m2n.accept_master_connection(&c.first, &c.second).await?;
        m2n.accept_slaves_connection(&c.first, &c.second).await?;
    } else {
        m2n.request_master_connection(&c.first, &c.second).await?;
        m2n.request_slaves_connection(&c.first, &c.second).await?;
    }

    let mut scheme = config.build_scheme(local, m2n, &meshes)?;
    let mut solver = FixedPointSolver::from_config(config, local, &meshes);
    let metrics = run_participant(&mut scheme, &mut solver, &mut meshes).await?;

    let final_values = config
        .exchanges
        .iter()
        .filter(|e| e.from == local)
        .filter_map(|e| {
            let mesh = meshes.iter().find(|m| m.name() == e.mesh)?;
            let value = mesh.data_by_name(&e.data)?.values().first().copied()?;
            Some((e.data.clone(), value))
        })
        .collect();

    Ok(ParticipantReport {
        name: local.to_string(),
        time: scheme.time(),
        metrics,
        final_values,
    })
}
