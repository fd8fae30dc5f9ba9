use std::time::Instant;

use crate::simulation::encounter::EncounterPolicy;
use crate::simulation::forces::{ForceModel, Sources};
use crate::simulation::integrator::{Integrator, Phase, StepOutcome};
use crate::simulation::params::{CloseEncounterMethod, ForceMethod, IntegratorMethod};
use crate::simulation::states::{Body, NVec3};

const G: f64 = 0.1;
const SOFTENING: f64 = 1e-2;

/// Deterministic cluster of `n` unit masses, no rand needed
pub fn make_cluster(n: usize) -> Vec<Body> {
    (0..n)
        .map(|i| {
            let i_f = i as f64;
            Body::new(
                1.0,
                [
                    (i_f * 0.37).sin() * 5.0,
                    (i_f * 0.13).cos() * 5.0,
                    (i_f * 0.07).sin() * 5.0,
                ],
                [0.0; 3],
            )
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct ForceTiming {
    pub n: usize,
    pub direct_ms: f64,
    pub tree_ms: f64, // Barnes-Hut, theta 0.7
}

#[derive(Debug, Clone, PartialEq)]
pub struct IntegratorTiming {
    pub name: &'static str,
    pub n: usize,
    pub ms_per_step: f64,
}

/// One force evaluation, direct sum vs Barnes–Hut
pub fn bench_forces(ns: &[usize]) -> Vec<ForceTiming> {
    let mut timings = Vec::with_capacity(ns.len());
    for &n in ns {
        let bodies = make_cluster(n);
        let x: Vec<NVec3> = bodies.iter().map(|b| b.x).collect();
        let m: Vec<f64> = bodies.iter().map(|b| b.m).collect();
        let src = Sources::new(&x, &m, n);
        let mut out = vec![NVec3::zeros(); n];

        let direct = ForceModel::new(ForceMethod::Direct { softening: SOFTENING }, G);
        let bh = ForceModel::new(
            ForceMethod::BarnesHut {
                softening: SOFTENING,
                theta: 0.7,
            },
            G,
        );

        // Warm up
        direct.accumulate_accels(&src, &mut out);
        bh.accumulate_accels(&src, &mut out);

        let t0 = Instant::now();
        direct.accumulate_accels(&src, &mut out);
        let ms_direct = t0.elapsed().as_secs_f64() * 1000.0;

        let t1 = Instant::now();
        bh.accumulate_accels(&src, &mut out);
        let ms_bh = t1.elapsed().as_secs_f64() * 1000.0;

        log::debug!("forces n = {n}: direct {ms_direct:.3} ms, tree {ms_bh:.3} ms");
        timings.push(ForceTiming {
            n,
            direct_ms: ms_direct,
            tree_ms: ms_bh,
        });
    }
    timings
}

/// Wall-clock time per step of every integrator with direct forces
pub fn bench_integrators(n: usize, steps: usize) -> Vec<IntegratorTiming> {
    let methods = [
        IntegratorMethod::Euler,
        IntegratorMethod::Rk4,
        IntegratorMethod::LeapFrog,
        IntegratorMethod::BulirschStoer {
            tolerance: 1e-10,
            n_try: 8,
        },
    ];
    let bodies = make_cluster(n);
    let m: Vec<f64> = bodies.iter().map(|b| b.m).collect();
    let y0 = Phase {
        x: bodies.iter().map(|b| b.x).collect(),
        v: bodies.iter().map(|b| b.v).collect(),
    };
    let force = ForceModel::new(ForceMethod::Direct { softening: SOFTENING }, G);
    let steps = steps.max(1);

    let mut timings = Vec::with_capacity(methods.len());
    for method in methods {
        let mut integrator = Integrator::new(method);
        let mut encounter = EncounterPolicy::new(CloseEncounterMethod::None);
        let mut y = y0.clone();

        let t0 = Instant::now();
        for k in 0..steps {
            let outcome = integrator.step(&y, 1e-3, k as f64 * 1e-3, &force, &mut encounter, &m, n);
            if let Ok(StepOutcome::Accepted(_)) = outcome {
                y.assign(integrator.result());
            }
        }
        let ms = t0.elapsed().as_secs_f64() * 1000.0 / steps as f64;
        timings.push(IntegratorTiming {
            name: method.name(),
            n,
            ms_per_step: ms,
        });
    }
    timings
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timings_cover_every_size_and_method() {
        let forces = bench_forces(&[4, 16]);
        assert_eq!(forces.iter().map(|t| t.n).collect::<Vec<_>>(), vec![4, 16]);
        assert!(forces.iter().all(|t| t.direct_ms >= 0.0 && t.tree_ms >= 0.0));

        let steps = bench_integrators(8, 2);
        let names: Vec<_> = steps.iter().map(|t| t.name).collect();
        assert_eq!(names.len(), 4);
        assert!(names.contains(&IntegratorMethod::Rk4.name()));
        assert!(steps.iter().all(|t| t.n == 8));
    }
}
