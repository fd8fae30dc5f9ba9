//! Gravitational acceleration for a state snapshot
//!
//! `ForceModel` dispatches between direct Newtonian summation and the
//! Barnes–Hut octree. Both honour the active/passive split: only the first
//! `active_count` bodies receive acceleration, every body acts as a source.
//! Pairs handed over to the close-encounter policy are skipped.

use rayon::prelude::*;

use crate::simulation::barnes_hut::BarnesHutTree3;
use crate::simulation::params::ForceMethod;
use crate::simulation::states::{Body, NVec3};

/// Above this many active bodies the direct sum runs on the rayon pool
pub const PARALLEL_THRESHOLD: usize = 512;

/// Everything a force evaluation reads
#[derive(Debug, Clone, Copy)]
pub struct Sources<'a> {
    pub x: &'a [NVec3], // positions
    pub m: &'a [f64], // masses
    pub active_count: usize, // bodies [0, active_count) receive force
    pub excluded: &'a [(usize, usize)], // pairs whose mutual term is skipped
}

impl<'a> Sources<'a> {
    pub fn new(x: &'a [NVec3], m: &'a [f64], active_count: usize) -> Self {
        Self {
            x,
            m,
            active_count,
            excluded: &[],
        }
    }

    pub fn excluding(mut self, excluded: &'a [(usize, usize)]) -> Self {
        self.excluded = excluded;
        self
    }

    #[inline]
    fn is_excluded(&self, i: usize, j: usize) -> bool {
        self.excluded
            .iter()
            .any(|&(a, b)| (a == i && b == j) || (a == j && b == i))
    }
}

/// Trait for acceleration sources
/// Implementations add their contribution into `out[i]` for each active body
pub trait Acceleration {
    fn acceleration(&self, src: &Sources, out: &mut [NVec3]);
}

/// Newtonian gravity with Plummer softening, direct n^2 sum
#[derive(Debug, Clone, Copy)]
pub struct NewtonianGravity {
    pub g: f64, // gravitational constant
    pub eps2: f64, // softening squared
}

impl NewtonianGravity {
    /// Acceleration on `i` from every other body, summed in index order
    fn accel_on(&self, i: usize, src: &Sources) -> NVec3 {
        let xi = src.x[i];
        let mut acc = NVec3::zeros();
        for (j, (xj, mj)) in src.x.iter().zip(src.m.iter()).enumerate() {
            if j == i || src.is_excluded(i, j) {
                continue;
            }
            let r = xj - xi;
            let d2 = r.dot(&r) + self.eps2;
            let inv_r = d2.sqrt().recip();
            acc += self.g * mj * inv_r * inv_r * inv_r * r;
        }
        acc
    }
}

impl Acceleration for NewtonianGravity {
    fn acceleration(&self, src: &Sources, out: &mut [NVec3]) {
        let n = src.x.len();
        let n_active = src.active_count.min(n);
        if n_active == 0 {
            return;
        }

        if n_active >= PARALLEL_THRESHOLD {
            // one writer per body, each summing in a fixed order, so the
            // result does not depend on how rayon splits the work
            out[..n_active]
                .par_iter_mut()
                .enumerate()
                .for_each(|(i, a)| *a += self.accel_on(i, src));
            return;
        }

        // Loop over each unordered pair (i, j) with i < j where i is active.
        // Passive bodies only come after the active prefix, so j may be
        // passive: it still pulls on i but receives nothing back.
        for i in 0..n_active {
            let xi = src.x[i];
            let mi = src.m[i];

            for j in (i + 1)..n {
                if src.is_excluded(i, j) {
                    continue;
                }
                // r points from i to j: i is pulled along +r, j along -r
                let r = src.x[j] - xi;
                let d2 = r.dot(&r) + self.eps2;
                let inv_r = d2.sqrt().recip();
                let coef = self.g * inv_r * inv_r * inv_r;

                out[i] += coef * src.m[j] * r;
                if j < n_active {
                    out[j] -= coef * mi * r;
                }
            }
        }
    }
}

/// Newtonian gravity evaluated through a Barnes–Hut octree
/// Approximate O(N log N) accelerations controlled by `theta` (opening angle)
#[derive(Debug, Clone, Copy)]
pub struct NewtonianGravityBarnesHut {
    pub g: f64,
    pub eps2: f64,
    pub theta: f64,
}

impl Acceleration for NewtonianGravityBarnesHut {
    fn acceleration(&self, src: &Sources, out: &mut [NVec3]) {
        let n_active = src.active_count.min(src.x.len());
        if n_active == 0 {
            return;
        }
        let tree = BarnesHutTree3::build(src.x, src.m);
        for (i, a) in out[..n_active].iter_mut().enumerate() {
            *a += tree.force_on_body(i, src.x, src.m, self.g, self.eps2, self.theta);
        }
    }
}

/// The force strategy selected by the run configuration
#[derive(Debug, Clone, Copy)]
pub enum ForceModel {
    Direct(NewtonianGravity),
    BarnesHut(NewtonianGravityBarnesHut),
}

impl ForceModel {
    pub fn new(method: ForceMethod, g: f64) -> Self {
        match method {
            ForceMethod::Direct { softening } => ForceModel::Direct(NewtonianGravity {
                g,
                eps2: softening * softening,
            }),
            ForceMethod::BarnesHut { softening, theta } => {
                ForceModel::BarnesHut(NewtonianGravityBarnesHut {
                    g,
                    eps2: softening * softening,
                    theta,
                })
            }
        }
    }

    /// Overwrite `out` with the accelerations for `src`
    /// Passive bodies end up with zero acceleration
    pub fn accumulate_accels(&self, src: &Sources, out: &mut [NVec3]) {
        for a in out.iter_mut() {
            *a = NVec3::zeros();
        }
        match self {
            ForceModel::Direct(f) => f.acceleration(src, out),
            ForceModel::BarnesHut(f) => f.acceleration(src, out),
        }
    }

    pub fn g(&self) -> f64 {
        match self {
            ForceModel::Direct(f) => f.g,
            ForceModel::BarnesHut(f) => f.g,
        }
    }
}

/// Direct-sum accelerations for a list of bodies.
///
/// Bodies past `active_count` act as sources only. `softening = 0` is valid;
/// coincident bodies then produce non-finite values for the caller to handle.
pub fn compute_accelerations(
    bodies: &[Body],
    active_count: usize,
    softening: f64,
    g: f64,
) -> Vec<NVec3> {
    let x: Vec<NVec3> = bodies.iter().map(|b| b.x).collect();
    let m: Vec<f64> = bodies.iter().map(|b| b.m).collect();
    let mut out = vec![NVec3::zeros(); bodies.len()];
    ForceModel::new(ForceMethod::Direct { softening }, g)
        .accumulate_accels(&Sources::new(&x, &m, active_count), &mut out);
    out
}
