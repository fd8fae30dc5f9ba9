//! Configuration types for loading runs from YAML.
//!
//! A scenario file is a thin, `serde`-deserializable description of one run:
//!
//! - [`Config`]         – force model, integrator, timestep and encounter policy
//! - [`BodyConfig`]     – initial state of each body
//! - [`OutputConfig`]   – keep trajectories in memory or stream them to disk
//! - [`ScenarioConfig`] – top-level wrapper
//!
//! # YAML format
//!
//! ```yaml
//! config:
//!   force: { method: direct, softening: 0.0 }
//!   integrator: { method: bulirsch_stoer, tolerance: 1.0e-10, n_try: 8 }
//!   timestep: { method: adaptive, dt: 1.0e-3, dt_min: 1.0e-9, dt_max: 0.1 }
//!   close_encounter: { method: regularized, threshold: 1.0e-3 }
//!   record_acceleration: false
//!   encounter_recovery: retry   # or abort
//!   max_retries: 8
//!   G: 1.0
//!
//! t_stop: 10.0
//!
//! bodies:
//!   - m: 1.0
//!     x: [ -1.0, 0.0, 0.0 ]
//!     v: [  0.0, 0.9428090416, 0.0 ]
//!   - m: 2.0
//!     x: [  0.5, 0.0, 0.0 ]
//!     v: [  0.0, -0.4714045208, 0.0 ]
//!   - m: 1.0e-3
//!     x: [ 5.0, 0.0, 0.0 ]
//!     v: [ 0.0, 0.7, 0.0 ]
//!     active: false           # passive: pulls on the others, feels nothing
//!
//! output:
//!   kind: disk                # or memory
//!   path: out/two_body
//!   replace: true
//!   chunk_len: 65536
//! ```
//!
//! Active bodies must come before passive ones.

use std::path::PathBuf;

use serde::Deserialize;

use crate::output::disk::DEFAULT_CHUNK_LEN;
use crate::simulation::params::Config;
use crate::simulation::states::Body;

fn default_active() -> bool {
    true
}

fn default_chunk_len() -> usize {
    DEFAULT_CHUNK_LEN
}

/// Initial state of a single body
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct BodyConfig {
    pub m: f64,      // mass
    pub x: [f64; 3], // position
    pub v: [f64; 3], // velocity
    #[serde(default = "default_active")]
    pub active: bool, // false: source only
}

impl BodyConfig {
    pub fn to_body(&self) -> Body {
        if self.active {
            Body::new(self.m, self.x, self.v)
        } else {
            Body::passive(self.m, self.x, self.v)
        }
    }
}

/// Where the trajectories of a run end up
#[derive(Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OutputConfig {
    #[default]
    Memory,
    Disk {
        path: PathBuf,
        #[serde(default)]
        replace: bool, // overwrite an existing store
        #[serde(default = "default_chunk_len")]
        chunk_len: usize, // rows per HDF5 chunk dataset
    },
}

/// Top-level scenario configuration loaded from YAML.
#[derive(Deserialize, Debug, Clone)]
pub struct ScenarioConfig {
    pub config: Config, // numerical methods and constants
    pub t_stop: f64, // integrate from t = 0 to here
    pub bodies: Vec<BodyConfig>, // initial conditions, index = body id
    #[serde(default)]
    pub output: OutputConfig,
}
