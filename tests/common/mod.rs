#![allow(dead_code)]

use std::f64::consts::PI;
use std::path::PathBuf;

use nbody_engine::{
    Body, CloseEncounterMethod, Config, EncounterRecovery, ForceMethod, IntegratorMethod, Simulation,
    TimestepMethod,
};

/// Two bodies at rest, separated along the x-axis
pub fn two_body_system(dist: f64, m1: f64, m2: f64) -> Vec<Body> {
    vec![
        Body::new(m1, [-dist / 2.0, 0.0, 0.0], [0.0; 3]),
        Body::new(m2, [dist / 2.0, 0.0, 0.0], [0.0; 3]),
    ]
}

/// Circular binary with G = 1, centre of mass at rest at the origin.
/// `speed_factor` scales both velocities (1.0 = circular).
pub fn circular_pair(m1: f64, m2: f64, dist: f64, speed_factor: f64) -> Vec<Body> {
    let m = m1 + m2;
    let v_rel = (m / dist).sqrt() * speed_factor;
    vec![
        Body::new(m1, [-dist * m2 / m, 0.0, 0.0], [0.0, -v_rel * m2 / m, 0.0]),
        Body::new(m2, [dist * m1 / m, 0.0, 0.0], [0.0, v_rel * m1 / m, 0.0]),
    ]
}

/// Kepler period of a circular pair with G = 1
pub fn period(m1: f64, m2: f64, dist: f64) -> f64 {
    2.0 * PI * (dist.powi(3) / (m1 + m2)).sqrt()
}

/// Binary plus a distant light companion, all active
pub fn triple() -> Vec<Body> {
    let mut bodies = circular_pair(1.0, 0.8, 1.0, 1.0);
    bodies.push(Body::new(0.01, [6.0, 0.0, 0.0], [0.0, 0.55, 0.0]));
    bodies
}

pub fn simulation(bodies: Vec<Body>) -> Simulation {
    Simulation::new(bodies).expect("valid bodies")
}

/// Direct forces, no softening, fixed step, no encounter handling
pub fn constant_config(integrator: IntegratorMethod, dt: f64) -> Config {
    Config::new(
        ForceMethod::Direct { softening: 0.0 },
        integrator,
        TimestepMethod::Constant { dt },
        CloseEncounterMethod::None,
        false,
    )
}

pub fn bs(tolerance: f64) -> IntegratorMethod {
    IntegratorMethod::BulirschStoer { tolerance, n_try: 8 }
}

/// Error-controlled Bulirsch–Stoer
pub fn adaptive_config(tolerance: f64, dt: f64) -> Config {
    Config::new(
        ForceMethod::Direct { softening: 0.0 },
        bs(tolerance),
        TimestepMethod::Adaptive {
            dt,
            dt_min: 1e-12,
            dt_max: 0.1,
        },
        CloseEncounterMethod::None,
        false,
    )
}

/// Two bodies closing head-on at unit speed, coincident at exactly t = 1
pub fn head_on_pair() -> Vec<Body> {
    vec![
        Body::new(1.0, [-1.0, 0.0, 0.0], [1.0, 0.0, 0.0]),
        Body::new(1.0, [1.0, 0.0, 0.0], [-1.0, 0.0, 0.0]),
    ]
}

/// Euler with dt = 0.25 and G = 0: rows at t = 0, 0.25, .., 1, then the
/// step out of the coincidence is non-finite at every size
pub fn head_on_config(max_retries: usize) -> Config {
    constant_config(IntegratorMethod::Euler, 0.25)
        .with_g(0.0)
        .with_recovery(EncounterRecovery::Retry, max_retries)
}

/// Fresh, empty scratch path under the system temp dir
pub fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("nbody-test-{}-{name}", std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    dir
}

pub fn rel_err(a: f64, b: f64) -> f64 {
    (a - b).abs() / b.abs().max(f64::MIN_POSITIVE)
}
