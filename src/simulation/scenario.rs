//! Build a runnable scenario from configuration
//!
//! Takes a `ScenarioConfig` (YAML-facing) and produces a [`Scenario`]:
//! - the validated initial conditions (`Simulation`)
//! - the run configuration (`Config`)
//! - the stop time and where the output goes

use crate::configuration::config::{OutputConfig, ScenarioConfig};
use crate::error::{Error, Result, RunFailure};
use crate::output::disk::DiskSink;
use crate::output::memory::Record;
use crate::simulation::engine::{Driver, Progress, RunReport, Simulation};
use crate::simulation::params::Config;

/// A fully initialised run, ready to go
#[derive(Debug, Clone)]
pub struct Scenario {
    pub simulation: Simulation,
    pub config: Config,
    pub t_stop: f64,
    pub output: OutputConfig,
}

/// What a scenario run produced
#[derive(Debug)]
pub enum ScenarioOutput {
    Memory(Record),
    Disk(std::path::PathBuf),
}

impl Scenario {
    /// Validates bodies, configuration and stop time up front
    pub fn build_scenario(cfg: ScenarioConfig) -> Result<Self> {
        let simulation = Simulation::new(cfg.bodies.iter().map(|bc| bc.to_body()).collect())?;
        cfg.config.validate()?;
        if !(cfg.t_stop.is_finite() && cfg.t_stop > 0.0) {
            return Err(Error::InvalidConfig(format!(
                "t_stop must be finite and positive, got {}",
                cfg.t_stop
            )));
        }
        Ok(Self {
            simulation,
            config: cfg.config,
            t_stop: cfg.t_stop,
            output: cfg.output,
        })
    }

    /// Run to `t_stop`. A failure after recording started carries the
    /// output collected up to that point.
    pub fn run(
        &self,
        progress: Option<Box<dyn Progress>>,
    ) -> std::result::Result<(RunReport, ScenarioOutput), RunFailure<ScenarioOutput>> {
        let mut driver = Driver::new(&self.simulation, self.config.clone()).map_err(RunFailure::before_start)?;
        if let Some(p) = progress {
            driver = driver.with_progress(p);
        }

        match &self.output {
            OutputConfig::Memory => {
                let mut record = Record::empty(&self.simulation.masses(), self.config.record_acceleration);
                match driver.run(self.t_stop, &mut record) {
                    Ok(report) => Ok((report, ScenarioOutput::Memory(record))),
                    Err(error) => Err(RunFailure {
                        error,
                        partial: Some(ScenarioOutput::Memory(record)),
                    }),
                }
            }
            OutputConfig::Disk {
                path,
                replace,
                chunk_len,
            } => {
                let mut sink = DiskSink::create(
                    path,
                    &self.simulation.masses(),
                    self.simulation.active_count(),
                    self.config.record_acceleration,
                    *replace,
                    *chunk_len,
                )
                .map_err(RunFailure::before_start)?;
                let outcome = driver.run(self.t_stop, &mut sink);
                drop(sink);
                match outcome {
                    Ok(report) => Ok((report, ScenarioOutput::Disk(path.clone()))),
                    Err(error) => Err(RunFailure {
                        error,
                        partial: Some(ScenarioOutput::Disk(path.clone())),
                    }),
                }
            }
        }
    }
}
