mod common;

use common::two_body_system;
use nbody_engine::simulation::forces::{Sources, PARALLEL_THRESHOLD};
use nbody_engine::{compute_accelerations, Body, ForceMethod, ForceModel, NVec3};

const G: f64 = 0.1;

fn accels(bodies: &[Body], softening: f64) -> Vec<NVec3> {
    compute_accelerations(bodies, bodies.len(), softening, G)
}

// ==================================================================================
// Direct gravity
// ==================================================================================

#[test]
fn gravity_newton_third_law() {
    let bodies = two_body_system(1.0, 2.0, 3.0);
    let acc = accels(&bodies, 0.0);
    let net = acc[0] * bodies[0].m + acc[1] * bodies[1].m;
    assert!(net.norm() < 1e-12, "Net momentum not zero: {:?}", net);
}

#[test]
fn gravity_points_toward_other_body() {
    let bodies = two_body_system(2.0, 1.0, 1.0);
    let acc = accels(&bodies, 0.0);
    let dx = bodies[1].x - bodies[0].x;
    assert!(acc[0].dot(&dx) > 0.0, "Acceleration is not toward second body");
    assert!(acc[1].dot(&dx) < 0.0, "Acceleration is not toward first body");
}

#[test]
fn gravity_magnitude_matches_newton() {
    let bodies = two_body_system(2.0, 1.0, 3.0);
    let acc = accels(&bodies, 0.0);
    // G m2 / r^2
    assert!((acc[0].norm() - G * 3.0 / 4.0).abs() < 1e-15);
    assert!((acc[1].norm() - G * 1.0 / 4.0).abs() < 1e-15);
}

#[test]
fn gravity_inverse_square_law() {
    let acc_r = accels(&two_body_system(1.0, 1.0, 1.0), 0.0);
    let acc_2r = accels(&two_body_system(2.0, 1.0, 1.0), 0.0);
    let ratio = acc_r[0].norm() / acc_2r[0].norm();
    assert!((ratio - 4.0).abs() < 1e-12, "Expected 4x, got {}", ratio);
}

#[test]
fn gravity_softening_prevents_blowup() {
    let bodies = two_body_system(1e-9, 1.0, 1.0);
    let acc = accels(&bodies, 0.3);
    assert!(acc[0].norm() < 1e-6, "Softening failed; acceleration too large");
    assert!(acc.iter().all(|a| a.iter().all(|c| c.is_finite())));
}

#[test]
fn empty_and_single_body_feel_nothing() {
    assert!(accels(&[], 0.0).is_empty());
    let one = [Body::new(5.0, [1.0, 2.0, 3.0], [0.0; 3])];
    assert_eq!(accels(&one, 0.0), vec![NVec3::zeros()]);
}

// ==================================================================================
// Active / passive split
// ==================================================================================

#[test]
fn passive_bodies_pull_but_are_not_pulled() {
    let bodies = vec![
        Body::new(1.0, [0.0, 0.0, 0.0], [0.0; 3]),
        Body::passive(2.0, [1.0, 0.0, 0.0], [0.0; 3]),
        Body::passive(2.0, [-1.0, 0.5, 0.0], [0.0; 3]),
    ];
    let acc = compute_accelerations(&bodies, 1, 0.0, 1.0);
    assert!(acc[0].norm() > 0.0);
    assert_eq!(acc[1], NVec3::zeros());
    assert_eq!(acc[2], NVec3::zeros());
}

#[test]
fn excluded_pair_drops_only_its_mutual_term() {
    let x = vec![
        NVec3::new(0.0, 0.0, 0.0),
        NVec3::new(1.0, 0.0, 0.0),
        NVec3::new(0.0, 2.0, 0.0),
    ];
    let m = vec![1.0, 1.0, 1.0];
    let force = ForceModel::new(ForceMethod::Direct { softening: 0.0 }, 1.0);
    let mut out = vec![NVec3::zeros(); 3];
    let excluded = [(0, 1)];
    force.accumulate_accels(&Sources::new(&x, &m, 3).excluding(&excluded), &mut out);

    // body 0 only feels body 2, which sits straight up at distance 2
    assert!((out[0] - NVec3::new(0.0, 0.25, 0.0)).norm() < 1e-15);
    assert!(out[2].norm() > 0.0);
}

// ==================================================================================
// Parallel and tree evaluation
// ==================================================================================

fn cluster(n: usize) -> (Vec<NVec3>, Vec<f64>) {
    let x = (0..n)
        .map(|i| {
            let f = i as f64;
            NVec3::new((f * 0.37).sin() * 5.0, (f * 0.13).cos() * 5.0, (f * 0.07).sin() * 5.0)
        })
        .collect();
    let m = (0..n).map(|i| 1.0 + (i % 3) as f64).collect();
    (x, m)
}

#[test]
fn parallel_sum_is_reproducible_and_matches_serial() {
    let n = PARALLEL_THRESHOLD + 37;
    let (x, m) = cluster(n);
    let force = ForceModel::new(ForceMethod::Direct { softening: 0.01 }, 1.0);

    let mut a1 = vec![NVec3::zeros(); n];
    let mut a2 = vec![NVec3::zeros(); n];
    force.accumulate_accels(&Sources::new(&x, &m, n), &mut a1);
    force.accumulate_accels(&Sources::new(&x, &m, n), &mut a2);
    assert_eq!(a1, a2);

    // below the threshold the pair loop runs; same physics
    let active = PARALLEL_THRESHOLD - 1;
    let mut serial = vec![NVec3::zeros(); n];
    force.accumulate_accels(&Sources::new(&x, &m, active), &mut serial);
    let mut parallel = vec![NVec3::zeros(); n];
    force.accumulate_accels(&Sources::new(&x, &m, n), &mut parallel);
    for i in 0..active {
        // bodies below `active` feel every other body in both runs
        assert!((serial[i] - parallel[i]).norm() <= 1e-10 * parallel[i].norm().max(1.0));
    }
}

#[test]
fn barnes_hut_approximates_direct_sum() {
    let n = 300;
    let (x, m) = cluster(n);
    let direct = ForceModel::new(ForceMethod::Direct { softening: 0.01 }, 1.0);
    let tree = ForceModel::new(
        ForceMethod::BarnesHut {
            softening: 0.01,
            theta: 0.5,
        },
        1.0,
    );
    let mut a_direct = vec![NVec3::zeros(); n];
    let mut a_tree = vec![NVec3::zeros(); n];
    direct.accumulate_accels(&Sources::new(&x, &m, n), &mut a_direct);
    tree.accumulate_accels(&Sources::new(&x, &m, n), &mut a_tree);

    let mean_rel: f64 = a_direct
        .iter()
        .zip(&a_tree)
        .map(|(d, t)| (d - t).norm() / d.norm())
        .sum::<f64>()
        / n as f64;
    assert!(mean_rel < 2e-2, "mean relative error {mean_rel}");
}
