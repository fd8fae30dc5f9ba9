//! Runtime configuration for a run
//!
//! `Config` selects the force model, integrator, timestep policy and
//! close-encounter policy. It is built once and never mutated;
//! [`Config::validate`] is the compatibility check between the variants.
//!
//! The `from_id` constructors map the numeric identifiers used by the
//! wrapper layer (0 = Euler, 1 = RK4, 2 = BS, 3 = LeapFrog, ...).

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// How accelerations are evaluated
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum ForceMethod {
    /// Exact pairwise sum
    Direct { softening: f64 },
    /// Octree approximation, `theta` is the opening angle
    BarnesHut { softening: f64, theta: f64 },
}

/// Update rule used by the integrator
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum IntegratorMethod {
    Euler,
    Rk4,
    LeapFrog,
    BulirschStoer { tolerance: f64, n_try: usize },
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum TimestepMethod {
    Constant { dt: f64 },
    /// Error-controlled, starts at `dt` and stays within `[dt_min, dt_max]`
    Adaptive { dt: f64, dt_min: f64, dt_max: f64 },
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Default)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum CloseEncounterMethod {
    #[default]
    None,
    Regularized { threshold: f64 },
}

/// What the driver does when a step or an encounter fails
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Default)]
#[serde(rename_all = "snake_case")]
pub enum EncounterRecovery {
    /// Shrink the step and try again, up to `max_retries`
    #[default]
    Retry,
    /// Stop at the first failure
    Abort,
}

fn default_g() -> f64 {
    1.0
}

fn default_max_retries() -> usize {
    8
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Config {
    pub force: ForceMethod,
    pub integrator: IntegratorMethod,
    pub timestep: TimestepMethod,
    #[serde(default)]
    pub close_encounter: CloseEncounterMethod,
    #[serde(default)]
    pub record_acceleration: bool,
    #[serde(default)]
    pub encounter_recovery: EncounterRecovery,
    #[serde(default = "default_max_retries")]
    pub max_retries: usize, // step rejections allowed before failing
    #[serde(default = "default_g", rename = "G")]
    pub g: f64, // gravitational constant
}

impl Config {
    pub fn new(
        force: ForceMethod,
        integrator: IntegratorMethod,
        timestep: TimestepMethod,
        close_encounter: CloseEncounterMethod,
        record_acceleration: bool,
    ) -> Self {
        Self {
            force,
            integrator,
            timestep,
            close_encounter,
            record_acceleration,
            encounter_recovery: EncounterRecovery::default(),
            max_retries: default_max_retries(),
            g: default_g(),
        }
    }

    pub fn with_recovery(mut self, recovery: EncounterRecovery, max_retries: usize) -> Self {
        self.encounter_recovery = recovery;
        self.max_retries = max_retries;
        self
    }

    pub fn with_g(mut self, g: f64) -> Self {
        self.g = g;
        self
    }

    /// Check parameter ranges and which variants may be combined
    pub fn validate(&self) -> Result<()> {
        if !(self.g.is_finite() && self.g >= 0.0) {
            return invalid(format!("G must be finite and non-negative, got {}", self.g));
        }

        match self.force {
            ForceMethod::Direct { softening } => non_negative("softening", softening)?,
            ForceMethod::BarnesHut { softening, theta } => {
                non_negative("softening", softening)?;
                positive("theta", theta)?;
            }
        }

        if let IntegratorMethod::BulirschStoer { tolerance, n_try } = self.integrator {
            positive("tolerance", tolerance)?;
            if tolerance < f64::EPSILON {
                return invalid(format!(
                    "tolerance {tolerance:e} is below machine epsilon and can never be met"
                ));
            }
            if n_try < 2 {
                return invalid(format!("n_try must be at least 2, got {n_try}"));
            }
        }

        match self.timestep {
            TimestepMethod::Constant { dt } => positive("dt", dt)?,
            TimestepMethod::Adaptive { dt, dt_min, dt_max } => {
                positive("dt", dt)?;
                positive("dt_min", dt_min)?;
                positive("dt_max", dt_max)?;
                if !(dt_min <= dt && dt <= dt_max) {
                    return invalid(format!(
                        "adaptive timestep needs dt_min <= dt <= dt_max, got {dt_min} <= {dt} <= {dt_max}"
                    ));
                }
                if !matches!(self.integrator, IntegratorMethod::BulirschStoer { .. }) {
                    return invalid(format!(
                        "adaptive timestep requires an error-estimating integrator, {:?} has none",
                        self.integrator
                    ));
                }
            }
        }

        if let CloseEncounterMethod::Regularized { threshold } = self.close_encounter {
            positive("threshold", threshold)?;
            if matches!(self.force, ForceMethod::BarnesHut { .. }) {
                return invalid(
                    "regularized close encounters need exact pair forces, use the direct force method"
                        .to_string(),
                );
            }
        }

        Ok(())
    }
}

impl ForceMethod {
    pub fn from_id(id: u8, softening: f64, theta: Option<f64>) -> Result<Self> {
        match id {
            0 => Ok(ForceMethod::Direct { softening }),
            1 => Ok(ForceMethod::BarnesHut {
                softening,
                theta: theta.unwrap_or(0.7),
            }),
            _ => invalid(format!("unknown force method id {id}")),
        }
    }
}

impl IntegratorMethod {
    /// BS uses `tolerance` and `n_try`; the other methods ignore them
    pub fn from_id(id: u8, tolerance: Option<f64>, n_try: Option<usize>) -> Result<Self> {
        match id {
            0 => Ok(IntegratorMethod::Euler),
            1 => Ok(IntegratorMethod::Rk4),
            2 => Ok(IntegratorMethod::BulirschStoer {
                tolerance: tolerance.unwrap_or(1e-10),
                n_try: n_try.unwrap_or(8),
            }),
            3 => Ok(IntegratorMethod::LeapFrog),
            _ => invalid(format!("unknown integrator id {id}")),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            IntegratorMethod::Euler => "euler",
            IntegratorMethod::Rk4 => "rk4",
            IntegratorMethod::LeapFrog => "leap_frog",
            IntegratorMethod::BulirschStoer { .. } => "bulirsch_stoer",
        }
    }
}

impl TimestepMethod {
    pub fn from_id(id: u8, delta_t: Option<f64>) -> Result<Self> {
        let dt = delta_t.ok_or_else(|| Error::InvalidConfig("timestep needs delta_t".to_string()))?;
        match id {
            0 => Ok(TimestepMethod::Constant { dt }),
            1 => Ok(TimestepMethod::Adaptive {
                dt,
                dt_min: dt * 1e-6,
                dt_max: dt * 1e3,
            }),
            _ => invalid(format!("unknown timestep id {id}")),
        }
    }

    /// Step size the run starts with
    pub fn initial_dt(&self) -> f64 {
        match *self {
            TimestepMethod::Constant { dt } => dt,
            TimestepMethod::Adaptive { dt, .. } => dt,
        }
    }
}

impl CloseEncounterMethod {
    pub fn from_id(id: u8, par: Option<f64>) -> Result<Self> {
        match id {
            0 => Ok(CloseEncounterMethod::None),
            1 => {
                let threshold = par.ok_or_else(|| {
                    Error::InvalidConfig("regularized encounters need a threshold".to_string())
                })?;
                Ok(CloseEncounterMethod::Regularized { threshold })
            }
            _ => invalid(format!("unknown close encounter id {id}")),
        }
    }
}

fn invalid<T>(msg: String) -> Result<T> {
    Err(Error::InvalidConfig(msg))
}

fn positive(name: &str, value: f64) -> Result<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        invalid(format!("{name} must be finite and positive, got {value}"))
    }
}

fn non_negative(name: &str, value: f64) -> Result<()> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        invalid(format!("{name} must be finite and non-negative, got {value}"))
    }
}
