//! Simulation driver
//!
//! [`Simulation`] is the validated initial state, moved to its centre-of-mass
//! frame. A [`Driver`] composes force model, encounter policy, timestep
//! controller and integrator around a copy of that state and steps it to
//! `t_stop`, pushing every accepted state to a [`TrajectorySink`].
//!
//! Stepping is strictly sequential; the only concurrency is inside a force
//! evaluation and in the disk sink's flush worker.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::{Error, Result, RunFailure};
use crate::output::disk::DiskSink;
use crate::output::memory::Record;
use crate::output::TrajectorySink;
use crate::simulation::encounter::EncounterPolicy;
use crate::simulation::forces::{ForceModel, Sources};
use crate::simulation::integrator::{Integrator, Phase, StepOutcome};
use crate::simulation::params::{Config, EncounterRecovery};
use crate::simulation::states::{Body, NVec3, Snapshot, System};
use crate::simulation::timestep::TimestepController;

const PROGRESS_INTERVAL: Duration = Duration::from_millis(100);

/// Initial conditions of a run
#[derive(Debug, Clone)]
pub struct Simulation {
    system: System, // positions relative to the centre of mass
    origin: NVec3, // centre of mass of the input, added back on output
}

impl Simulation {
    pub fn new(bodies: Vec<Body>) -> Result<Self> {
        let mut system = System::new(bodies)?;
        let origin = system.center_of_mass().unwrap_or_else(NVec3::zeros);
        for b in system.bodies.iter_mut() {
            b.x -= origin;
        }
        Ok(Self { system, origin })
    }

    /// Active bodies from `[m, x, y, z, vx, vy, vz]` rows
    pub fn from_rows(rows: &[[f64; 7]]) -> Result<Self> {
        Self::new(rows.iter().map(Body::from_row).collect())
    }

    pub fn system(&self) -> &System {
        &self.system
    }

    pub fn origin(&self) -> NVec3 {
        self.origin
    }

    pub fn len(&self) -> usize {
        self.system.len()
    }

    pub fn is_empty(&self) -> bool {
        self.system.is_empty()
    }

    pub fn active_count(&self) -> usize {
        self.system.active_count()
    }

    pub fn masses(&self) -> Vec<f64> {
        self.system.masses()
    }

    /// Input-frame positions
    pub fn positions(&self) -> Vec<NVec3> {
        self.system.bodies.iter().map(|b| b.x + self.origin).collect()
    }
}

/// Cooperative cancellation, checked between steps
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn stop(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Progress side channel; never influences the numerics
pub trait Progress {
    /// `fraction` of the requested interval done after `steps` accepted steps
    fn update(&mut self, fraction: f64, steps: usize);
}

/// Reports progress through `log::info!`
#[derive(Debug, Default)]
pub struct LogProgress;

impl Progress for LogProgress {
    fn update(&mut self, fraction: f64, steps: usize) {
        log::info!("{:5.1}% ({steps} steps)", 100.0 * fraction);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Completed,
    /// Cancelled through a [`StopHandle`]; the sink holds everything up to the stop
    Stopped,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub status: RunStatus,
    pub t_end: f64,
    pub steps: usize, // accepted
    pub rejected: usize,
    pub encounters: usize, // pair-steps handled by regularization
}

pub struct Driver {
    config: Config,
    origin: NVec3,
    m: Vec<f64>,
    active_count: usize,
    t: f64,
    y: Phase, // canonical state, only replaced by an accepted step
    acc: Vec<NVec3>, // recorded accelerations
    force: ForceModel,
    encounter: EncounterPolicy,
    controller: TimestepController,
    integrator: Integrator,
    steps: usize,
    initial_recorded: bool,
    stop: StopHandle,
    progress: Option<Box<dyn Progress>>,
}

impl Driver {
    /// Validate `config` and prepare a run from the initial conditions of `sim`
    pub fn new(sim: &Simulation, config: Config) -> Result<Self> {
        config.validate()?;
        let n = sim.len();
        Ok(Self {
            origin: sim.origin,
            m: sim.masses(),
            active_count: sim.active_count(),
            t: sim.system.t,
            y: Phase::from_system(&sim.system),
            acc: vec![NVec3::zeros(); n],
            force: ForceModel::new(config.force, config.g),
            encounter: EncounterPolicy::new(config.close_encounter),
            controller: TimestepController::new(config.timestep, config.max_retries),
            integrator: Integrator::new(config.integrator),
            steps: 0,
            initial_recorded: false,
            stop: StopHandle::default(),
            progress: None,
            config,
        })
    }

    pub fn with_progress(mut self, progress: Box<dyn Progress>) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Handle that stops the run cleanly from another thread
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn t(&self) -> f64 {
        self.t
    }

    /// Current state, positions relative to the centre of mass
    pub fn state(&self) -> &Phase {
        &self.y
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Step until `t_stop`, recording into `sink`.
    ///
    /// `sink.finish()` is called on every exit path, so whatever was
    /// recorded before a failure stays in the sink and is flushed.
    pub fn run<S: TrajectorySink + ?Sized>(&mut self, t_stop: f64, sink: &mut S) -> Result<RunReport> {
        if !(t_stop.is_finite() && t_stop > 0.0) {
            return Err(Error::InvalidConfig(format!(
                "t_stop must be finite and positive, got {t_stop}"
            )));
        }
        if t_stop <= self.t {
            return Err(Error::InvalidConfig(format!(
                "t_stop = {t_stop} is not after the current time {}",
                self.t
            )));
        }

        log::info!(
            "running {} bodies ({} active), {} / {:?} to t = {t_stop}",
            self.m.len(),
            self.active_count,
            self.config.integrator.name(),
            self.config.force,
        );

        let outcome = self.step_loop(t_stop, sink);
        match (outcome, sink.finish()) {
            (Ok(status), Ok(())) => Ok(RunReport {
                status,
                t_end: self.t,
                steps: self.steps,
                rejected: self.controller.rejected_total(),
                encounters: self.encounter.regularized_count(),
            }),
            (Ok(_), Err(e)) => Err(e),
            (Err(e), finish) => {
                if let Err(fe) = finish {
                    log::error!("closing the trajectory sink after a failed run: {fe}");
                }
                Err(e)
            }
        }
    }

    fn step_loop<S: TrajectorySink + ?Sized>(&mut self, t_stop: f64, sink: &mut S) -> Result<RunStatus> {
        if !self.initial_recorded {
            self.record(sink)?;
            self.initial_recorded = true;
        }

        let t0 = self.t;
        let mut last_report = Instant::now();

        while self.t < t_stop {
            if self.stop.is_stopped() {
                log::info!("stop requested at t = {}, {} steps done", self.t, self.steps);
                return Ok(RunStatus::Stopped);
            }

            let t = self.t;
            let dt = self.controller.propose(t, t_stop);
            let trial = self.integrator.step(
                &self.y,
                dt,
                t,
                &self.force,
                &mut self.encounter,
                &self.m,
                self.active_count,
            );

            match trial {
                Ok(StepOutcome::Accepted(estimate)) => {
                    self.y.assign(self.integrator.result());
                    self.t = if dt >= t_stop - t { t_stop } else { t + dt };
                    self.steps += 1;
                    self.controller.accept(dt, estimate);
                    self.encounter.accept();
                    self.record(sink)?;
                }
                Ok(StepOutcome::Rejected(estimate)) => self.controller.reject(t, dt, estimate)?,
                Err(e) if e.is_recoverable() => match self.config.encounter_recovery {
                    EncounterRecovery::Retry => {
                        log::debug!("{e}, retrying with a smaller step");
                        // out of retries: report the encounter, not the controller
                        if self.controller.reject(t, dt, None).is_err() {
                            return Err(e);
                        }
                    }
                    EncounterRecovery::Abort => return Err(e),
                },
                Err(e) => return Err(e),
            }

            if let Some(progress) = self.progress.as_mut() {
                if last_report.elapsed() >= PROGRESS_INTERVAL {
                    progress.update((self.t - t0) / (t_stop - t0), self.steps);
                    last_report = Instant::now();
                }
            }
        }

        if let Some(progress) = self.progress.as_mut() {
            progress.update(1.0, self.steps);
        }
        Ok(RunStatus::Completed)
    }

    /// Push the current state of every body, in the input frame
    fn record<S: TrajectorySink + ?Sized>(&mut self, sink: &mut S) -> Result<()> {
        let with_acc = self.config.record_acceleration;
        if with_acc {
            let src = Sources::new(&self.y.x, &self.m, self.active_count);
            self.force.accumulate_accels(&src, &mut self.acc);
        }
        for i in 0..self.y.len() {
            let snapshot = Snapshot {
                t: self.t,
                r: self.y.x[i] + self.origin,
                v: self.y.v[i],
                a: with_acc.then(|| self.acc[i]),
            };
            sink.record(i, &snapshot)?;
        }
        Ok(())
    }
}

/// Run to `t_stop` keeping every snapshot in memory.
///
/// On failure the snapshots recorded so far come back with the error.
pub fn run_in_memory(
    sim: &Simulation,
    config: &Config,
    t_stop: f64,
) -> std::result::Result<Record, RunFailure<Record>> {
    let mut driver = Driver::new(sim, config.clone()).map_err(RunFailure::before_start)?;
    let mut record = Record::empty(&sim.masses(), config.record_acceleration);
    match driver.run(t_stop, &mut record) {
        Ok(_) => Ok(record),
        Err(error) => Err(RunFailure {
            error,
            partial: Some(record),
        }),
    }
}

/// Run to `t_stop` streaming snapshots to an HDF5 store in `dir`.
///
/// Once the store exists it is closed on every exit path and its directory
/// is returned with the error, so the flushed prefix can still be read.
pub fn run_on_disk(
    sim: &Simulation,
    config: &Config,
    t_stop: f64,
    dir: impl AsRef<Path>,
    replace: bool,
    chunk_len: usize,
) -> std::result::Result<PathBuf, RunFailure<PathBuf>> {
    let mut driver = Driver::new(sim, config.clone()).map_err(RunFailure::before_start)?;
    let mut sink = DiskSink::create(
        dir.as_ref(),
        &sim.masses(),
        sim.active_count(),
        config.record_acceleration,
        replace,
        chunk_len,
    )
    .map_err(RunFailure::before_start)?;
    let outcome = driver.run(t_stop, &mut sink);
    let dir = sink.dir().to_path_buf();
    match outcome {
        Ok(_) => Ok(dir),
        Err(error) => Err(RunFailure {
            error,
            partial: Some(dir),
        }),
    }
}
