//! Close-encounter handling
//!
//! With `Regularized`, every step starts by pairing up bodies closer than
//! `threshold` (closest pairs first, each body in at most one pair). At least
//! one body of a pair is active; passive bodies only ever pair with an active
//! one.
//! The integrator then evaluates forces with those pairs' mutual terms
//! removed, and [`EncounterPolicy::splice`] adds back the pair's own two-body
//! motion, solved in regularized time:
//!
//! - relative coordinates `r = x_j - x_i`, `v = v_j - v_i`, `mu = G (m_i + m_j)`
//! - logarithmic-Hamiltonian leapfrog: drift `dt = h / (T + B)`, kick
//!   `dt = h / U`, with `T = |v|^2 / 2`, `U = mu / |r|` and the binding energy
//!   `B = U - T` fixed at the start. No term divides by a vanishing `|r|`
//!   during a drift, and the scheme is time-symmetric.
//! - the last sub-step is solved by secant iteration so the pair lands on `dt`.
//!
//! The correction `(Kepler solution) - (free drift)` is shared out by mass, so
//! the pair's center of mass and total momentum are left untouched. For an
//! active-passive pair `mu = G m_passive` and the whole correction goes to
//! the active body, since the passive one feels no force.

use std::collections::BTreeSet;

use crate::error::{Error, Result};
use crate::simulation::params::CloseEncounterMethod;
use crate::simulation::states::NVec3;

/// Sub-step size as a fraction of the local dynamical time
const ETA: f64 = 0.02;

/// Hard cap on sub-steps for one pair within one global step
const MAX_SUBSTEPS: usize = 1_000_000;

/// Secant iterations allowed to land the final sub-step on `dt`
const MAX_LANDING_ITERATIONS: usize = 64;

/// Relative tolerance on the landing time
const LANDING_TOL: f64 = 1e-13;

#[derive(Debug, Clone)]
pub enum EncounterPolicy {
    /// No special treatment, rely on softening and small steps
    None,
    Regularized(Regularizer),
}

#[derive(Debug, Clone, Default)]
pub struct Regularizer {
    pub threshold: f64,
    pairs: Vec<(usize, usize)>, // pairs flagged for the current step
    previous: BTreeSet<(usize, usize)>, // pairs flagged last step, for logging
    candidates: Vec<(f64, usize, usize)>, // scratch
    taken: Vec<bool>, // scratch
    active_count: usize, // as of the last detect
    total: usize, // pair-steps regularized over accepted steps
}

impl EncounterPolicy {
    pub fn new(method: CloseEncounterMethod) -> Self {
        match method {
            CloseEncounterMethod::None => EncounterPolicy::None,
            CloseEncounterMethod::Regularized { threshold } => {
                EncounterPolicy::Regularized(Regularizer {
                    threshold,
                    ..Default::default()
                })
            }
        }
    }

    /// Flag the close pairs of `x` for the coming step and return them.
    /// Only counted once the step is accepted, see [`accept`](Self::accept).
    pub fn detect(&mut self, x: &[NVec3], active_count: usize) -> &[(usize, usize)] {
        match self {
            EncounterPolicy::None => &[],
            EncounterPolicy::Regularized(reg) => {
                reg.detect(x, active_count);
                &reg.pairs
            }
        }
    }

    /// Pairs flagged by the last call to [`detect`](Self::detect)
    pub fn pairs(&self) -> &[(usize, usize)] {
        match self {
            EncounterPolicy::None => &[],
            EncounterPolicy::Regularized(reg) => &reg.pairs,
        }
    }

    /// The step that used the current pairs was accepted
    pub fn accept(&mut self) {
        if let EncounterPolicy::Regularized(reg) = self {
            reg.total += reg.pairs.len();
        }
    }

    /// Add the two-body motion of each flagged pair to a step computed
    /// without their mutual attraction.
    ///
    /// `x0`/`v0` is the state at the start of the step, `x`/`v` the generic
    /// result that gets corrected in place.
    #[allow(clippy::too_many_arguments)]
    pub fn splice(
        &self,
        x0: &[NVec3],
        v0: &[NVec3],
        m: &[f64],
        g: f64,
        dt: f64,
        t: f64,
        x: &mut [NVec3],
        v: &mut [NVec3],
    ) -> Result<()> {
        let active_count = match self {
            EncounterPolicy::None => return Ok(()),
            EncounterPolicy::Regularized(reg) => reg.active_count,
        };
        for &(i, j) in self.pairs() {
            // i is always active; a passive j pulls on i and is not pulled back
            let (m_tot, fi, fj) = if j < active_count {
                let m_tot = m[i] + m[j];
                (m_tot, m[j] / m_tot, m[i] / m_tot)
            } else {
                (m[j], 1.0, 0.0)
            };
            if !(m_tot > 0.0) {
                continue;
            }
            let r0 = x0[j] - x0[i];
            let w0 = v0[j] - v0[i];
            let (rk, wk) = kepler_advance(r0, w0, g * m_tot, dt).map_err(|iterations| {
                Error::EncounterFailure {
                    t,
                    pair: (i, j),
                    iterations,
                }
            })?;

            let dr = rk - (r0 + w0 * dt);
            let dw = wk - w0;
            x[i] -= dr * fi;
            x[j] += dr * fj;
            v[i] -= dw * fi;
            v[j] += dw * fj;
        }
        Ok(())
    }

    /// Number of pair-steps handled by regularization so far
    pub fn regularized_count(&self) -> usize {
        match self {
            EncounterPolicy::None => 0,
            EncounterPolicy::Regularized(reg) => reg.total,
        }
    }
}

impl Regularizer {
    fn detect(&mut self, x: &[NVec3], active_count: usize) {
        let n = x.len();
        let n_active = active_count.min(n);
        self.active_count = n_active;
        let threshold2 = self.threshold * self.threshold;

        self.candidates.clear();
        for i in 0..n_active {
            for j in (i + 1)..n {
                let d2 = (x[j] - x[i]).norm_squared();
                if d2 < threshold2 {
                    self.candidates.push((d2, i, j));
                }
            }
        }
        // closest first; index order breaks ties so the choice is reproducible
        self.candidates.sort_by(|a, b| a.0.total_cmp(&b.0).then((a.1, a.2).cmp(&(b.1, b.2))));

        self.taken.clear();
        self.taken.resize(n, false);
        self.pairs.clear();
        for &(_, i, j) in &self.candidates {
            if !self.taken[i] && !self.taken[j] {
                self.taken[i] = true;
                self.taken[j] = true;
                self.pairs.push((i, j));
            }
        }
        self.pairs.sort_unstable();

        let current: BTreeSet<(usize, usize)> = self.pairs.iter().copied().collect();
        for p in current.difference(&self.previous) {
            log::debug!("bodies {} and {} entered regularization", p.0, p.1);
        }
        for p in self.previous.difference(&current) {
            log::debug!("bodies {} and {} left regularization", p.0, p.1);
        }
        self.previous = current;
    }
}

/// One drift-kick-drift sub-step in regularized time `h`.
/// Returns the new relative state and the physical time it covered.
fn dkd(r: NVec3, w: NVec3, h: f64, binding: f64) -> Option<(NVec3, NVec3, f64)> {
    let t1 = 0.5 * w.norm_squared() + binding;
    if !(t1 > 0.0) {
        return None;
    }
    let dt1 = 0.5 * h / t1;
    let r = r + w * dt1;

    let rn = r.norm();
    if !(rn > 0.0) {
        return None;
    }
    // dt = h / U, a = -mu r / |r|^3, so a * dt = -h r / |r|^2
    let w = w - r * (h / (rn * rn));

    let t2 = 0.5 * w.norm_squared() + binding;
    if !(t2 > 0.0) {
        return None;
    }
    let dt2 = 0.5 * h / t2;
    let r = r + w * dt2;

    let tau = dt1 + dt2;
    tau.is_finite().then_some((r, w, tau))
}

/// Advance the relative two-body state `(r, w)` by physical time `dt`.
/// On failure returns the number of iterations spent.
pub(crate) fn kepler_advance(
    r0: NVec3,
    w0: NVec3,
    mu: f64,
    dt: f64,
) -> std::result::Result<(NVec3, NVec3), usize> {
    if mu == 0.0 || dt == 0.0 {
        return Ok((r0 + w0 * dt, w0));
    }
    let rn = r0.norm();
    if !(rn > 0.0) {
        return Err(0);
    }
    let binding = mu / rn - 0.5 * w0.norm_squared();

    let (mut r, mut w) = (r0, w0);
    let mut elapsed = 0.0;
    let tol = LANDING_TOL * dt;

    for step in 0..MAX_SUBSTEPS {
        let remaining = dt - elapsed;
        if remaining <= tol {
            return Ok((r, w));
        }
        let h = ETA * (mu * r.norm()).sqrt();
        let (r1, w1, tau) = dkd(r, w, h, binding).ok_or(step)?;
        if tau < remaining {
            r = r1;
            w = w1;
            elapsed += tau;
            continue;
        }

        // final sub-step: find h_land with tau(h_land) = remaining
        let (mut h_a, mut f_a) = (0.0, -remaining);
        let mut h_b = h * remaining / tau;
        for it in 0..MAX_LANDING_ITERATIONS {
            let (r_b, w_b, tau_b) = dkd(r, w, h_b, binding).ok_or(step + it)?;
            let f_b = tau_b - remaining;
            if f_b.abs() <= tol {
                return Ok((r_b, w_b));
            }
            if f_b == f_a {
                return Err(step + it);
            }
            let h_next = h_b - f_b * (h_b - h_a) / (f_b - f_a);
            h_a = h_b;
            f_a = f_b;
            h_b = h_next;
        }
        return Err(step + MAX_LANDING_ITERATIONS);
    }
    Err(MAX_SUBSTEPS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn circular_orbit_returns_after_one_period() {
        // mu = 1, r = 1, circular speed 1, period 2 pi
        let r0 = NVec3::new(1.0, 0.0, 0.0);
        let w0 = NVec3::new(0.0, 1.0, 0.0);
        let (r, w) = kepler_advance(r0, w0, 1.0, 2.0 * std::f64::consts::PI).unwrap();
        assert!((r - r0).norm() < 1e-3, "r = {r:?}");
        assert!((w - w0).norm() < 1e-3, "w = {w:?}");
    }

    #[test]
    fn quarter_orbit_lands_on_requested_time() {
        let r0 = NVec3::new(1.0, 0.0, 0.0);
        let w0 = NVec3::new(0.0, 1.0, 0.0);
        let (r, _) = kepler_advance(r0, w0, 1.0, 0.5 * std::f64::consts::PI).unwrap();
        assert!((r - NVec3::new(0.0, 1.0, 0.0)).norm() < 1e-3, "r = {r:?}");
    }

    #[test]
    fn energy_is_preserved_through_pericenter() {
        // eccentric orbit, e ~ 0.99
        let r0 = NVec3::new(1.0, 0.0, 0.0);
        let w0 = NVec3::new(0.0, 0.1, 0.0);
        let e0 = 0.5 * w0.norm_squared() - 1.0 / r0.norm();
        let (r, w) = kepler_advance(r0, w0, 1.0, 1.2).unwrap();
        let e1 = 0.5 * w.norm_squared() - 1.0 / r.norm();
        assert!(((e1 - e0) / e0).abs() < 1e-6, "e0 = {e0}, e1 = {e1}");
    }

    #[test]
    fn detection_pairs_each_body_once() {
        let mut policy = EncounterPolicy::new(CloseEncounterMethod::Regularized { threshold: 0.5 });
        let x = vec![
            NVec3::new(0.0, 0.0, 0.0),
            NVec3::new(0.1, 0.0, 0.0),
            NVec3::new(0.3, 0.0, 0.0),
            NVec3::new(5.0, 0.0, 0.0),
        ];
        let pairs = policy.detect(&x, 4).to_vec();
        assert_eq!(pairs, vec![(0, 1)]);
        // a passive body pairs with an active one, never with another passive
        assert_eq!(policy.detect(&x, 1).to_vec(), vec![(0, 1)]);
        assert!(policy.detect(&x, 0).is_empty());
        assert_eq!(policy.regularized_count(), 0);
        policy.accept();
        assert_eq!(policy.regularized_count(), 0);
        policy.detect(&x, 4);
        policy.accept();
        assert_eq!(policy.regularized_count(), 1);
    }

    #[test]
    fn passive_partner_is_left_on_its_free_path() {
        let mut policy = EncounterPolicy::new(CloseEncounterMethod::Regularized { threshold: 1.0 });
        let x0 = vec![NVec3::new(0.1, 0.0, 0.0), NVec3::zeros()];
        let v0 = vec![NVec3::new(0.0, 1.0, 0.0), NVec3::zeros()];
        let m = vec![1e-6, 1.0];
        assert_eq!(policy.detect(&x0, 1).to_vec(), vec![(0, 1)]);
        let dt = 0.01;
        let mut x: Vec<NVec3> = x0.iter().zip(&v0).map(|(x, v)| x + v * dt).collect();
        let mut v = v0.clone();
        policy.splice(&x0, &v0, &m, 1.0, dt, 0.0, &mut x, &mut v).unwrap();
        assert_eq!(x[1], NVec3::zeros());
        assert_eq!(v[1], NVec3::zeros());
        // the active body was pulled towards the passive one
        assert!(v[0].x < 0.0);
        assert!(x[0].norm() < (x0[0] + v0[0] * dt).norm());
    }

    #[test]
    fn splice_keeps_pair_momentum() {
        let mut policy = EncounterPolicy::new(CloseEncounterMethod::Regularized { threshold: 1.0 });
        let x0 = vec![NVec3::new(0.0, 0.0, 0.0), NVec3::new(0.2, 0.0, 0.0)];
        let v0 = vec![NVec3::new(0.0, -1.0, 0.0), NVec3::new(0.0, 2.0, 0.0)];
        let m = vec![2.0, 1.0];
        policy.detect(&x0, 2);
        let dt = 0.01;
        let mut x: Vec<NVec3> = x0.iter().zip(&v0).map(|(x, v)| x + v * dt).collect();
        let mut v = v0.clone();
        policy.splice(&x0, &v0, &m, 1.0, dt, 0.0, &mut x, &mut v).unwrap();
        let p0 = v0[0] * m[0] + v0[1] * m[1];
        let p1 = v[0] * m[0] + v[1] * m[1];
        assert!((p1 - p0).norm() < 1e-12);
        // attraction pulled the bodies closer than free drift would
        assert!((x[1] - x[0]).norm() < (x0[1] + v0[1] * dt - x0[0] - v0[0] * dt).norm());
    }
}
