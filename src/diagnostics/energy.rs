//! Total energy of recorded trajectories
//!
//! E(t) = sum_i 1/2 m_i |v_i|^2 - sum_{i<j} G m_i m_j / |r_i - r_j|
//!
//! The potential counts every pair with at least one active body; passive
//! bodies do not interact with each other. Instants are evaluated in
//! parallel, each one independently, so the series does not depend on the
//! thread count.

use rayon::prelude::*;

use crate::error::{Error, Result};
use crate::output::memory::Trajectory;
use crate::simulation::states::NVec3;

/// Which bodies contribute kinetic energy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KineticScope {
    #[default]
    Active,
    All,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnergySeries {
    pub times: Vec<f64>,
    pub energies: Vec<f64>,
}

impl EnergySeries {
    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    /// |E(t) - E(0)| / |E(0)|, absolute when E(0) is zero
    pub fn relative_drift(&self) -> Vec<f64> {
        let Some(&e0) = self.energies.first() else {
            return Vec::new();
        };
        let scale = if e0 != 0.0 { e0.abs() } else { 1.0 };
        self.energies.iter().map(|e| (e - e0).abs() / scale).collect()
    }

    pub fn max_relative_drift(&self) -> f64 {
        self.relative_drift().into_iter().fold(0.0, f64::max)
    }
}

/// Energy per instant with G = 1, kinetic energy of the active bodies
pub fn compute_energy(trajectories: &[Trajectory], active_count: usize) -> Result<EnergySeries> {
    compute_energy_with(trajectories, active_count, KineticScope::Active, 1.0)
}

pub fn compute_energy_with(
    trajectories: &[Trajectory],
    active_count: usize,
    scope: KineticScope,
    g: f64,
) -> Result<EnergySeries> {
    if trajectories.is_empty() {
        return Err(Error::InvalidConfig("no trajectories to compute energy from".to_string()));
    }
    if active_count > trajectories.len() {
        return Err(Error::InvalidConfig(format!(
            "active_count {active_count} exceeds the {} trajectories",
            trajectories.len()
        )));
    }

    // instants present for every body
    let len = trajectories.iter().map(Trajectory::len).min().unwrap_or(0);
    let kinetic_count = match scope {
        KineticScope::Active => active_count,
        KineticScope::All => trajectories.len(),
    };

    let energies = (0..len)
        .into_par_iter()
        .map(|k| {
            let kinetic: f64 = trajectories[..kinetic_count]
                .iter()
                .map(|tr| 0.5 * tr.mass * tr.path[k].v.norm_squared())
                .sum();

            let mut potential = 0.0;
            for i in 0..active_count {
                let ri: NVec3 = trajectories[i].path[k].r;
                let mi = trajectories[i].mass;
                for tj in &trajectories[i + 1..] {
                    let d = (tj.path[k].r - ri).norm();
                    potential -= g * mi * tj.mass / d;
                }
            }
            kinetic + potential
        })
        .collect();

    let times = trajectories[0].path[..len].iter().map(|s| s.t).collect();
    Ok(EnergySeries { times, energies })
}
