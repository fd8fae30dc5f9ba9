//! Time integrators for the N-body system
//!
//! [`Integrator`] is a closed set of update rules behind one `step`:
//! forward Euler, classical RK4, kick-drift-kick leapfrog and Bulirsch–Stoer.
//! Every variant keeps its stage buffers between steps and writes its trial
//! result into [`Integrator::result`]; the canonical state is only touched by
//! the driver once the step is accepted.

use crate::error::Result;
use crate::simulation::bulirsch_stoer::BulirschStoer;
use crate::simulation::encounter::EncounterPolicy;
use crate::simulation::forces::{ForceModel, Sources};
use crate::simulation::params::IntegratorMethod;
use crate::simulation::states::{NVec3, System};

/// Positions and velocities of every body
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Phase {
    pub x: Vec<NVec3>,
    pub v: Vec<NVec3>,
}

impl Phase {
    pub fn zeros(n: usize) -> Self {
        Self {
            x: vec![NVec3::zeros(); n],
            v: vec![NVec3::zeros(); n],
        }
    }

    pub fn from_system(sys: &System) -> Self {
        Self {
            x: sys.bodies.iter().map(|b| b.x).collect(),
            v: sys.bodies.iter().map(|b| b.v).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.x.len()
    }

    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }

    /// Copy `other` into `self` without reallocating
    pub fn assign(&mut self, other: &Phase) {
        self.x.clone_from(&other.x);
        self.v.clone_from(&other.v);
    }

    pub fn is_finite(&self) -> bool {
        self.x
            .iter()
            .chain(self.v.iter())
            .all(|p| p.iter().all(|c| c.is_finite()))
    }
}

/// Read-only inputs shared by every stage of a step
#[derive(Debug, Clone, Copy)]
pub struct StepContext<'a> {
    pub force: &'a ForceModel,
    pub m: &'a [f64], // masses
    pub active_count: usize,
    pub excluded: &'a [(usize, usize)], // pairs taken over by the encounter policy
}

impl<'a> StepContext<'a> {
    /// Accelerations at positions `x` into `out`
    pub fn accels(&self, x: &[NVec3], out: &mut [NVec3]) {
        let src = Sources::new(x, self.m, self.active_count).excluding(self.excluded);
        self.force.accumulate_accels(&src, out);
    }
}

/// Normalised local error of an adaptive step, `ratio <= 1` means within tolerance
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ErrorEstimate {
    pub ratio: f64,
    pub order: usize, // order of the accepted estimate, drives the rescale exponent
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StepOutcome {
    /// `result()` holds the new state
    Accepted(Option<ErrorEstimate>),
    /// The trial was thrown away; retry with a smaller step
    Rejected(Option<ErrorEstimate>),
}

/// Forward Euler: velocity from the old acceleration, position from the old velocity
#[derive(Debug, Clone, Default)]
pub struct Euler {
    a: Vec<NVec3>,
}

impl Euler {
    fn step(&mut self, y0: &Phase, dt: f64, ctx: &StepContext, out: &mut Phase) {
        self.a.resize(y0.len(), NVec3::zeros());
        ctx.accels(&y0.x, &mut self.a);
        for i in 0..y0.len() {
            out.x[i] = y0.x[i] + y0.v[i] * dt;
            out.v[i] = y0.v[i] + self.a[i] * dt;
        }
    }
}

/// Classical 4-stage Runge–Kutta on the combined (x, v) state
#[derive(Debug, Clone, Default)]
pub struct Rk4 {
    kx: [Vec<NVec3>; 4], // dx/dt at each stage
    kv: [Vec<NVec3>; 4], // dv/dt at each stage
    stage: Phase,
}

impl Rk4 {
    fn step(&mut self, y0: &Phase, dt: f64, ctx: &StepContext, out: &mut Phase) {
        let n = y0.len();
        for k in 0..4 {
            self.kx[k].resize(n, NVec3::zeros());
            self.kv[k].resize(n, NVec3::zeros());
        }
        self.stage.assign(y0);

        // k1 at y0, k2 and k3 at half steps, k4 at the full step
        let offsets = [0.5 * dt, 0.5 * dt, dt];
        for k in 0..4 {
            self.kx[k].copy_from_slice(&self.stage.v);
            ctx.accels(&self.stage.x, &mut self.kv[k]);
            if k < 3 {
                let h = offsets[k];
                for i in 0..n {
                    self.stage.x[i] = y0.x[i] + self.kx[k][i] * h;
                    self.stage.v[i] = y0.v[i] + self.kv[k][i] * h;
                }
            }
        }

        let sixth = dt / 6.0;
        for i in 0..n {
            out.x[i] = y0.x[i]
                + (self.kx[0][i] + 2.0 * self.kx[1][i] + 2.0 * self.kx[2][i] + self.kx[3][i]) * sixth;
            out.v[i] = y0.v[i]
                + (self.kv[0][i] + 2.0 * self.kv[1][i] + 2.0 * self.kv[2][i] + self.kv[3][i]) * sixth;
        }
    }
}

/// Symplectic kick-drift-kick leapfrog, two force evaluations per step
#[derive(Debug, Clone, Default)]
pub struct LeapFrog {
    a: Vec<NVec3>,
}

impl LeapFrog {
    fn step(&mut self, y0: &Phase, dt: f64, ctx: &StepContext, out: &mut Phase) {
        let n = y0.len();
        let half_dt = 0.5 * dt;
        self.a.resize(n, NVec3::zeros());

        // Kick: v_n+1/2 = v_n + (dt/2) a(x_n)
        ctx.accels(&y0.x, &mut self.a);
        for i in 0..n {
            out.v[i] = y0.v[i] + self.a[i] * half_dt;
        }

        // Drift: x_n+1 = x_n + dt v_n+1/2
        for i in 0..n {
            out.x[i] = y0.x[i] + out.v[i] * dt;
        }

        // Kick: v_n+1 = v_n+1/2 + (dt/2) a(x_n+1)
        ctx.accels(&out.x, &mut self.a);
        for i in 0..n {
            out.v[i] += self.a[i] * half_dt;
        }
    }
}

#[derive(Debug, Clone)]
enum Scheme {
    Euler(Euler),
    Rk4(Rk4),
    LeapFrog(LeapFrog),
    BulirschStoer(BulirschStoer),
}

/// An integrator variant together with its reusable trial buffer
#[derive(Debug, Clone)]
pub struct Integrator {
    scheme: Scheme,
    out: Phase,
    pairs: Vec<(usize, usize)>, // encounter pairs of the current step
}

impl Integrator {
    pub fn new(method: IntegratorMethod) -> Self {
        let scheme = match method {
            IntegratorMethod::Euler => Scheme::Euler(Euler::default()),
            IntegratorMethod::Rk4 => Scheme::Rk4(Rk4::default()),
            IntegratorMethod::LeapFrog => Scheme::LeapFrog(LeapFrog::default()),
            IntegratorMethod::BulirschStoer { tolerance, n_try } => {
                Scheme::BulirschStoer(BulirschStoer::new(tolerance, n_try))
            }
        };
        Self {
            scheme,
            out: Phase::default(),
            pairs: Vec::new(),
        }
    }

    /// Trial state produced by the last accepted `step`
    pub fn result(&self) -> &Phase {
        &self.out
    }

    /// Advance `y0` by `dt`.
    ///
    /// Close pairs flagged by `encounter` are integrated without their mutual
    /// term and then handed to the encounter policy. Non-finite results are
    /// reported as a rejection so the timestep controller can shrink.
    #[allow(clippy::too_many_arguments)]
    pub fn step(
        &mut self,
        y0: &Phase,
        dt: f64,
        t: f64,
        force: &ForceModel,
        encounter: &mut EncounterPolicy,
        m: &[f64],
        active_count: usize,
    ) -> Result<StepOutcome> {
        let n = y0.len();
        self.out.x.resize(n, NVec3::zeros());
        self.out.v.resize(n, NVec3::zeros());

        self.pairs.clear();
        self.pairs.extend_from_slice(encounter.detect(&y0.x, active_count));
        let ctx = StepContext {
            force,
            m,
            active_count,
            excluded: &self.pairs,
        };

        let estimate = match &mut self.scheme {
            Scheme::Euler(s) => {
                s.step(y0, dt, &ctx, &mut self.out);
                None
            }
            Scheme::Rk4(s) => {
                s.step(y0, dt, &ctx, &mut self.out);
                None
            }
            Scheme::LeapFrog(s) => {
                s.step(y0, dt, &ctx, &mut self.out);
                None
            }
            Scheme::BulirschStoer(s) => {
                let estimate = s.step(y0, dt, &ctx, &mut self.out);
                if !(estimate.ratio <= 1.0) {
                    return Ok(StepOutcome::Rejected(Some(estimate)));
                }
                Some(estimate)
            }
        };

        if !self.pairs.is_empty() {
            encounter.splice(&y0.x, &y0.v, m, force.g(), dt, t, &mut self.out.x, &mut self.out.v)?;
        }

        if !self.out.is_finite() {
            return Ok(StepOutcome::Rejected(None));
        }
        Ok(StepOutcome::Accepted(estimate))
    }
}
