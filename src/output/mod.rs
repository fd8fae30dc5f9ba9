//! Where recorded snapshots go
//!
//! The driver pushes one [`Snapshot`] per body per accepted step through
//! [`TrajectorySink::record`]. [`memory::Record`] keeps everything resident,
//! [`disk::DiskSink`] streams fixed-size chunks to an HDF5 store that
//! [`disk::DiskStore`] reads back lazily.

pub mod disk;
pub mod memory;

use std::fmt;

use crate::error::Result;
use crate::simulation::states::Snapshot;

pub trait TrajectorySink {
    /// Append `snapshot` to the trajectory of `body_id`
    fn record(&mut self, body_id: usize, snapshot: &Snapshot) -> Result<()>;

    /// Flush whatever is buffered and leave the output consistent.
    /// Called by the driver on every exit path; must be idempotent.
    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

impl<S: TrajectorySink + ?Sized> TrajectorySink for &mut S {
    fn record(&mut self, body_id: usize, snapshot: &Snapshot) -> Result<()> {
        (**self).record(body_id, snapshot)
    }

    fn finish(&mut self) -> Result<()> {
        (**self).finish()
    }
}

/// Recorded columns, in row order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Field {
    T,
    X,
    Y,
    Z,
    Vx,
    Vy,
    Vz,
    Ax,
    Ay,
    Az,
}

impl Field {
    pub const ALL: [Field; 10] = [
        Field::T,
        Field::X,
        Field::Y,
        Field::Z,
        Field::Vx,
        Field::Vy,
        Field::Vz,
        Field::Ax,
        Field::Ay,
        Field::Az,
    ];

    /// The columns present with or without recorded acceleration
    pub fn recorded(with_acceleration: bool) -> &'static [Field] {
        if with_acceleration {
            &Self::ALL
        } else {
            &Self::ALL[..7]
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Field::T => "t",
            Field::X => "x",
            Field::Y => "y",
            Field::Z => "z",
            Field::Vx => "vx",
            Field::Vy => "vy",
            Field::Vz => "vz",
            Field::Ax => "ax",
            Field::Ay => "ay",
            Field::Az => "az",
        }
    }

    /// Value of this column in `s`; acceleration columns are `None` when not recorded
    pub fn of(&self, s: &Snapshot) -> Option<f64> {
        let v = match self {
            Field::T => s.t,
            Field::X => s.r.x,
            Field::Y => s.r.y,
            Field::Z => s.r.z,
            Field::Vx => s.v.x,
            Field::Vy => s.v.y,
            Field::Vz => s.v.z,
            Field::Ax => s.a?.x,
            Field::Ay => s.a?.y,
            Field::Az => s.a?.z,
        };
        Some(v)
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
