//! Bulirsch–Stoer extrapolation integrator
//!
//! One step of size `H` is computed with the modified midpoint method for an
//! increasing number of sub-steps `n_k = 2, 4, 6, ...`. The results are
//! extrapolated to zero sub-step size (polynomial in `h^2`, Neville tableau).
//! The step is accepted as soon as two neighbouring extrapolations agree to
//! within `tolerance`; after `n_try` columns without agreement it is rejected
//! and the adaptive controller shrinks `H`.
//!
//! Tableau rows and midpoint buffers are kept between steps.

use crate::simulation::integrator::{ErrorEstimate, Phase, StepContext};
use crate::simulation::states::NVec3;

#[derive(Debug, Clone, Default)]
struct MidpointBuffers {
    zp: Phase, // z_{m-1}
    zc: Phase, // z_m
    a: Vec<NVec3>,
}

#[derive(Debug, Clone)]
pub struct BulirschStoer {
    pub tolerance: f64,
    pub n_try: usize, // maximum tableau columns per step
    midpoint: MidpointBuffers,
    prev_row: Vec<Phase>,
    cur_row: Vec<Phase>,
}

/// Sub-step count of tableau row `k`
#[inline]
fn substeps(k: usize) -> usize {
    2 * (k + 1)
}

impl BulirschStoer {
    pub fn new(tolerance: f64, n_try: usize) -> Self {
        Self {
            tolerance,
            n_try,
            midpoint: MidpointBuffers::default(),
            prev_row: vec![Phase::default(); n_try],
            cur_row: vec![Phase::default(); n_try],
        }
    }

    /// Try to advance `y0` by `big_h`. `out` is written only when the returned
    /// ratio is within tolerance (`<= 1`).
    pub fn step(&mut self, y0: &Phase, big_h: f64, ctx: &StepContext, out: &mut Phase) -> ErrorEstimate {
        let mut last = ErrorEstimate {
            ratio: f64::INFINITY,
            order: 0,
        };

        for k in 0..self.n_try {
            let n_k = substeps(k);
            modified_midpoint(y0, big_h, n_k, ctx, &mut self.midpoint, &mut self.cur_row[0]);

            // T[k][j] = T[k][j-1] + (T[k][j-1] - T[k-1][j-1]) / ((n_k / n_{k-j})^2 - 1)
            for j in 1..=k {
                let ratio = n_k as f64 / substeps(k - j) as f64;
                let denom = ratio * ratio - 1.0;
                let (lo, hi) = self.cur_row.split_at_mut(j);
                let src = &lo[j - 1];
                let prev = &self.prev_row[j - 1];
                let dst = &mut hi[0];
                extrapolate(src, prev, denom, dst);
            }

            if k > 0 {
                let err = scaled_difference(&self.cur_row[k], &self.cur_row[k - 1]);
                last = ErrorEstimate {
                    ratio: err / self.tolerance,
                    order: 2 * k,
                };
                if last.ratio <= 1.0 {
                    out.assign(&self.cur_row[k]);
                    return last;
                }
            }

            std::mem::swap(&mut self.prev_row, &mut self.cur_row);
        }

        log::debug!(
            "bulirsch-stoer did not converge in {} columns (error ratio {:.3e}, H = {big_h})",
            self.n_try,
            last.ratio
        );
        last
    }
}

/// Modified midpoint method over `big_h` with `n` sub-steps.
///
/// z_0 = y_0, z_1 = z_0 + h f(z_0), z_{m+1} = z_{m-1} + 2h f(z_m),
/// y = (z_n + z_{n-1} + h f(z_n)) / 2, with f(x, v) = (v, a(x)).
fn modified_midpoint(
    y0: &Phase,
    big_h: f64,
    n: usize,
    ctx: &StepContext,
    buf: &mut MidpointBuffers,
    out: &mut Phase,
) {
    let len = y0.len();
    let h = big_h / n as f64;
    let h2 = 2.0 * h;
    buf.a.resize(len, NVec3::zeros());
    buf.zp.assign(y0);
    buf.zc.assign(y0);
    out.x.resize(len, NVec3::zeros());
    out.v.resize(len, NVec3::zeros());

    ctx.accels(&y0.x, &mut buf.a);
    for i in 0..len {
        buf.zc.x[i] = y0.x[i] + y0.v[i] * h;
        buf.zc.v[i] = y0.v[i] + buf.a[i] * h;
    }

    for _ in 1..n {
        ctx.accels(&buf.zc.x, &mut buf.a);
        for i in 0..len {
            buf.zp.x[i] += buf.zc.v[i] * h2;
            buf.zp.v[i] += buf.a[i] * h2;
        }
        std::mem::swap(&mut buf.zp, &mut buf.zc);
    }

    ctx.accels(&buf.zc.x, &mut buf.a);
    for i in 0..len {
        out.x[i] = 0.5 * (buf.zc.x[i] + buf.zp.x[i] + buf.zc.v[i] * h);
        out.v[i] = 0.5 * (buf.zc.v[i] + buf.zp.v[i] + buf.a[i] * h);
    }
}

fn extrapolate(src: &Phase, prev: &Phase, denom: f64, dst: &mut Phase) {
    let len = src.len();
    dst.x.resize(len, NVec3::zeros());
    dst.v.resize(len, NVec3::zeros());
    for i in 0..len {
        dst.x[i] = src.x[i] + (src.x[i] - prev.x[i]) / denom;
        dst.v[i] = src.v[i] + (src.v[i] - prev.v[i]) / denom;
    }
}

/// Largest component difference, relative for large values, absolute for small ones
fn scaled_difference(a: &Phase, b: &Phase) -> f64 {
    let mut err: f64 = 0.0;
    let pairs = a.x.iter().zip(&b.x).chain(a.v.iter().zip(&b.v));
    for (pa, pb) in pairs {
        for c in 0..3 {
            let e = (pa[c] - pb[c]).abs() / (1.0 + pa[c].abs());
            // NaN must win so the step gets rejected
            if e.is_nan() {
                return f64::NAN;
            }
            err = err.max(e);
        }
    }
    err
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::forces::ForceModel;
    use crate::simulation::params::ForceMethod;

    #[test]
    fn free_particles_converge_immediately() {
        let force = ForceModel::new(ForceMethod::Direct { softening: 0.0 }, 1.0);
        let m = [0.0, 0.0];
        let ctx = StepContext {
            force: &force,
            m: &m,
            active_count: 2,
            excluded: &[],
        };
        let y0 = Phase {
            x: vec![NVec3::new(0.0, 0.0, 0.0), NVec3::new(1.0, 0.0, 0.0)],
            v: vec![NVec3::new(1.0, 2.0, 3.0), NVec3::new(0.0, -1.0, 0.0)],
        };
        let mut bs = BulirschStoer::new(1e-12, 6);
        let mut out = Phase::default();
        let est = bs.step(&y0, 0.5, &ctx, &mut out);
        assert!(est.ratio <= 1.0);
        assert_eq!(est.order, 2);
        assert!((out.x[0] - NVec3::new(0.5, 1.0, 1.5)).norm() < 1e-14);
        assert!((out.x[1] - NVec3::new(1.0, -0.5, 0.0)).norm() < 1e-14);
    }

    #[test]
    fn too_large_step_is_rejected() {
        let force = ForceModel::new(ForceMethod::Direct { softening: 0.0 }, 1.0);
        let m = [1.0, 1.0];
        let ctx = StepContext {
            force: &force,
            m: &m,
            active_count: 2,
            excluded: &[],
        };
        let y0 = Phase {
            x: vec![NVec3::new(-0.5, 0.0, 0.0), NVec3::new(0.5, 0.0, 0.0)],
            v: vec![NVec3::new(0.0, -0.7, 0.0), NVec3::new(0.0, 0.7, 0.0)],
        };
        let mut bs = BulirschStoer::new(1e-14, 2);
        let mut out = Phase::default();
        let est = bs.step(&y0, 10.0, &ctx, &mut out);
        assert!(est.ratio > 1.0);
    }
}
