//! Step-size control
//!
//! `Constant` proposes the same `dt` every step; a rejected step is retried at
//! half the size and the nominal `dt` is restored once a step is accepted.
//! `Adaptive` rescales `dt` from the integrator's error estimate after every
//! trial, within `[dt_min, dt_max]`.
//!
//! Both count consecutive rejections and give up after `max_retries`.

use crate::error::{Error, Result};
use crate::simulation::integrator::ErrorEstimate;
use crate::simulation::params::TimestepMethod;

const SAFETY: f64 = 0.9;
const MAX_GROWTH: f64 = 4.0;
const MIN_SHRINK: f64 = 0.2;
const MAX_SHRINK: f64 = 0.5; // a rejection always at least halves the step

#[derive(Debug, Clone)]
pub struct TimestepController {
    method: TimestepMethod,
    dt: f64, // step proposed next
    retries: usize, // consecutive rejections, reset on accept
    max_retries: usize,
    rejected_total: usize,
}

impl TimestepController {
    pub fn new(method: TimestepMethod, max_retries: usize) -> Self {
        Self {
            method,
            dt: method.initial_dt(),
            retries: 0,
            max_retries,
            rejected_total: 0,
        }
    }

    /// Step to try from `t`, clipped so the run ends exactly at `t_stop`
    pub fn propose(&self, t: f64, t_stop: f64) -> f64 {
        let remaining = t_stop - t;
        // absorb a sliver that would otherwise become a tiny extra step
        if self.dt >= remaining * (1.0 - 1e-9) {
            remaining
        } else {
            self.dt
        }
    }

    /// The trial of size `dt_used` was accepted
    pub fn accept(&mut self, dt_used: f64, estimate: Option<ErrorEstimate>) {
        self.retries = 0;
        match self.method {
            TimestepMethod::Constant { dt } => self.dt = dt,
            TimestepMethod::Adaptive { dt_min, dt_max, .. } => {
                let factor = estimate.map_or(1.0, |e| rescale(e).min(MAX_GROWTH));
                // a step clipped at t_stop says nothing about the nominal size
                let base = self.dt.max(dt_used);
                self.dt = (base * factor).clamp(dt_min, dt_max);
            }
        }
    }

    /// The trial of size `dt_used` was rejected; shrink for the retry
    pub fn reject(&mut self, t: f64, dt_used: f64, estimate: Option<ErrorEstimate>) -> Result<()> {
        self.retries += 1;
        self.rejected_total += 1;
        if self.retries > self.max_retries {
            log::warn!("step at t = {t} rejected {} times, giving up", self.retries);
            return Err(Error::IntegrationFailure {
                t,
                dt: dt_used,
                retries: self.max_retries,
            });
        }

        let factor = estimate.map_or(MAX_SHRINK, |e| rescale(e).clamp(MIN_SHRINK, MAX_SHRINK));
        self.dt = match self.method {
            TimestepMethod::Constant { .. } => dt_used * 0.5,
            TimestepMethod::Adaptive { dt_min, .. } => (dt_used * factor).max(dt_min),
        };
        log::debug!("step rejected at t = {t}, dt {dt_used} -> {}", self.dt);
        Ok(())
    }

    pub fn dt(&self) -> f64 {
        self.dt
    }

    pub fn retries(&self) -> usize {
        self.retries
    }

    pub fn rejected_total(&self) -> usize {
        self.rejected_total
    }
}

/// `SAFETY * ratio^(-1/(order+1))`, huge or invalid errors map to the minimum
fn rescale(e: ErrorEstimate) -> f64 {
    if !(e.ratio.is_finite()) {
        return MIN_SHRINK;
    }
    if e.ratio == 0.0 {
        return MAX_GROWTH;
    }
    SAFETY * e.ratio.powf(-1.0 / (e.order as f64 + 1.0))
}
