pub mod error;
pub mod simulation;
pub mod configuration;
pub mod output;
pub mod diagnostics;
pub mod benchmark;

pub use error::{Error, Result, RunFailure, StorageError};

pub use simulation::states::{Body, NVec3, Snapshot, System};
pub use simulation::params::{
    CloseEncounterMethod, Config, EncounterRecovery, ForceMethod, IntegratorMethod, TimestepMethod,
};
pub use simulation::forces::{compute_accelerations, Acceleration, ForceModel, NewtonianGravity, NewtonianGravityBarnesHut};
pub use simulation::integrator::{Integrator, Phase, StepOutcome};
pub use simulation::engine::{
    run_in_memory, run_on_disk, Driver, LogProgress, Progress, RunReport, RunStatus, Simulation, StopHandle,
};
pub use simulation::scenario::{Scenario, ScenarioOutput};

pub use configuration::config::{BodyConfig, OutputConfig, ScenarioConfig};

pub use output::{Field, TrajectorySink};
pub use output::memory::{Record, Trajectory};
pub use output::disk::{store_file, BodyReader, DiskSink, DiskStore, StoreHeader, DEFAULT_CHUNK_LEN};

pub use diagnostics::energy::{compute_energy, compute_energy_with, EnergySeries, KineticScope};

pub use benchmark::benchmark::{bench_forces, bench_integrators, ForceTiming, IntegratorTiming};
