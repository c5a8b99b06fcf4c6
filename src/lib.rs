//! Tandem - implicit coupling of two solvers
//!
//! Tandem couples two simulation participants that advance in lockstep
//! through time windows. Within each window the participants iterate,
//! exchanging interface data, until the second participant's convergence
//! measures accept the result. Solvers roll back to a checkpoint between
//! iterations and save a new one when a window completes.
//!
//! # Core Concepts
//!
//! - **Time windows**: Both participants exchange data only at window boundaries
//! - **Sub-cycling**: A solver may take several smaller steps inside a window
//! - **Actions**: The scheme tells the solver when to write or read checkpoints
//! - **M2N**: Each rank exchanges exactly the vertices it shares with each remote rank
//!
//! # Modules
//!
//! - [`cplscheme`] - Implicit coupling scheme, convergence measures, extrapolation
//! - [`m2n`] - Master connection and distributed mesh communication
//! - [`com`] - Point-to-point transport
//! - [`mesh`] - Data buffers exchanged by the scheme
//! - [`driver`] - Solver-side loop around the scheme
//! - [`config`] - Configuration types and loading
//! - [`cli`] - Command-line interface

pub mod cli;
pub mod com;
pub mod config;
pub mod cplscheme;
pub mod demo;
pub mod driver;
pub mod error;
pub mod m2n;
pub mod mesh;

// Re-export commonly used types
pub use config::Config;
pub use cplscheme::{
    Action, ConvergenceMeasure, CouplingMetrics, ImplicitCouplingScheme, MeasureKind, SchemeConfig, SchemeState,
    TimestepPolicy,
};
pub use driver::{Participant, run_participant};
pub use error::CouplingError;
pub use m2n::{DistributedCommunication, M2N, M2nError, MeshPartition, VertexDistribution};
pub use mesh::{DataId, DataProvider, Mesh, MeshData, MeshId};
