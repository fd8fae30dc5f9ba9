//! Core state types for the N-body simulation.
//!
//! - `Body`     point mass with position/velocity and an `active` flag
//! - `System`   ordered bodies (index = body id) plus the current time `t`
//! - `Snapshot` one recorded instant of one body
//!
//! Active bodies always come first: `active_count` is the length of that prefix.

use nalgebra::Vector3;

use crate::error::{Error, Result};

pub type NVec3 = Vector3<f64>;

#[derive(Debug, Clone, PartialEq)]
pub struct Body {
    pub x: NVec3, // position
    pub v: NVec3, // velocity
    pub m: f64, // mass, fixed for the run
    pub active: bool, // false = passive source, feels no force
}

impl Body {
    pub fn new(m: f64, x: [f64; 3], v: [f64; 3]) -> Self {
        Self {
            x: NVec3::from(x),
            v: NVec3::from(v),
            m,
            active: true,
        }
    }

    pub fn passive(m: f64, x: [f64; 3], v: [f64; 3]) -> Self {
        Self {
            active: false,
            ..Self::new(m, x, v)
        }
    }

    /// Build a body from a `[m, x, y, z, vx, vy, vz]` row
    pub fn from_row(row: &[f64; 7]) -> Self {
        Self::new(row[0], [row[1], row[2], row[3]], [row[4], row[5], row[6]])
    }
}

#[derive(Debug, Clone)]
pub struct System {
    pub bodies: Vec<Body>, // index is the body id for the whole run
    pub t: f64, // time
    active_count: usize,
}

impl System {
    /// Validate bodies and build a system at `t = 0`
    pub fn new(bodies: Vec<Body>) -> Result<Self> {
        for (i, b) in bodies.iter().enumerate() {
            let finite = b.m.is_finite()
                && b.x.iter().all(|c| c.is_finite())
                && b.v.iter().all(|c| c.is_finite());
            if !finite {
                return Err(Error::InvalidConfig(format!("body {i} has non-finite state")));
            }
            if b.m < 0.0 {
                return Err(Error::InvalidConfig(format!("body {i} has negative mass {}", b.m)));
            }
        }
        let active_count = bodies.iter().take_while(|b| b.active).count();
        if bodies[active_count..].iter().any(|b| b.active) {
            return Err(Error::InvalidConfig(
                "active bodies must precede passive bodies".to_string(),
            ));
        }
        Ok(Self {
            bodies,
            t: 0.0,
            active_count,
        })
    }

    pub fn len(&self) -> usize {
        self.bodies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bodies.is_empty()
    }

    pub fn active_count(&self) -> usize {
        self.active_count
    }

    pub fn masses(&self) -> Vec<f64> {
        self.bodies.iter().map(|b| b.m).collect()
    }

    pub fn total_mass(&self) -> f64 {
        self.bodies.iter().map(|b| b.m).sum()
    }

    /// Mass-weighted mean position, `None` when the total mass is zero
    pub fn center_of_mass(&self) -> Option<NVec3> {
        let m = self.total_mass();
        if m <= 0.0 {
            return None;
        }
        let weighted = self
            .bodies
            .iter()
            .fold(NVec3::zeros(), |acc, b| acc + b.x * b.m);
        Some(weighted / m)
    }

    pub fn momentum(&self) -> NVec3 {
        self.bodies
            .iter()
            .fold(NVec3::zeros(), |acc, b| acc + b.v * b.m)
    }
}

/// One recorded instant `(t, r, v, [a])` of a single body.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Snapshot {
    pub t: f64,
    pub r: NVec3,
    pub v: NVec3,
    pub a: Option<NVec3>,
}

impl Snapshot {
    /// `t,x,y,z,vx,vy,vz[,ax,ay,az]`
    pub fn to_row(&self) -> Vec<f64> {
        let mut row = vec![self.t, self.r.x, self.r.y, self.r.z, self.v.x, self.v.y, self.v.z];
        if let Some(a) = self.a {
            row.extend_from_slice(&[a.x, a.y, a.z]);
        }
        row
    }

    pub fn from_row(row: &[f64]) -> Result<Self> {
        let a = match row.len() {
            7 => None,
            10 => Some(NVec3::new(row[7], row[8], row[9])),
            n => {
                return Err(Error::InvalidConfig(format!(
                    "trajectory rows need 7 or 10 fields, got {n}"
                )))
            }
        };
        Ok(Self {
            t: row[0],
            r: NVec3::new(row[1], row[2], row[3]),
            v: NVec3::new(row[4], row[5], row[6]),
            a,
        })
    }
}
