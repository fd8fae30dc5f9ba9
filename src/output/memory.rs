//! Fully resident trajectories

use crate::error::{Error, Result};
use crate::output::TrajectorySink;
use crate::simulation::states::Snapshot;

/// Time history of one body
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Trajectory {
    pub mass: f64,
    pub path: Vec<Snapshot>,
}

impl Trajectory {
    pub fn new(mass: f64) -> Self {
        Self {
            mass,
            path: Vec::new(),
        }
    }

    /// Rows of 7 (`t,x,y,z,vx,vy,vz`) or 10 fields (plus `ax,ay,az`)
    pub fn from_rows<R: AsRef<[f64]>>(mass: f64, rows: &[R]) -> Result<Self> {
        let path = rows
            .iter()
            .map(|r| Snapshot::from_row(r.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { mass, path })
    }

    pub fn len(&self) -> usize {
        self.path.len()
    }

    pub fn is_empty(&self) -> bool {
        self.path.is_empty()
    }

    pub fn get(&self, index: usize) -> Result<&Snapshot> {
        self.path.get(index).ok_or(Error::OutOfRange {
            index,
            len: self.path.len(),
        })
    }

    pub fn last(&self) -> Option<&Snapshot> {
        self.path.last()
    }

    pub fn times(&self) -> Vec<f64> {
        self.path.iter().map(|s| s.t).collect()
    }

    /// Index of the recorded instant closest to `t`
    pub fn nearest(&self, t: f64) -> Option<usize> {
        if self.path.is_empty() {
            return None;
        }
        let idx = self.path.partition_point(|s| s.t < t);
        if idx == 0 {
            return Some(0);
        }
        if idx == self.path.len() {
            return Some(idx - 1);
        }
        let before = t - self.path[idx - 1].t;
        let after = self.path[idx].t - t;
        Some(if before <= after { idx - 1 } else { idx })
    }

    pub fn to_rows(&self) -> Vec<Vec<f64>> {
        self.path.iter().map(Snapshot::to_row).collect()
    }
}

/// In-memory sink: one growable trajectory per body id
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    pub objects: Vec<Trajectory>,
    pub record_acceleration: bool,
}

impl Record {
    pub fn empty(masses: &[f64], record_acceleration: bool) -> Self {
        Self {
            objects: masses.iter().map(|&m| Trajectory::new(m)).collect(),
            record_acceleration,
        }
    }

    pub fn from_trajectories(objects: Vec<Trajectory>) -> Self {
        let record_acceleration = objects
            .iter()
            .flat_map(|t| t.path.first())
            .any(|s| s.a.is_some());
        Self {
            objects,
            record_acceleration,
        }
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn body(&self, id: usize) -> Result<&Trajectory> {
        self.objects.get(id).ok_or(Error::OutOfRange {
            index: id,
            len: self.objects.len(),
        })
    }

    /// Per body, the 7- or 10-field rows
    pub fn to_rows(&self) -> Vec<Vec<Vec<f64>>> {
        self.objects.iter().map(Trajectory::to_rows).collect()
    }

    pub fn into_trajectories(self) -> Vec<Trajectory> {
        self.objects
    }
}

impl TrajectorySink for Record {
    fn record(&mut self, body_id: usize, snapshot: &Snapshot) -> Result<()> {
        let len = self.objects.len();
        let traj = self.objects.get_mut(body_id).ok_or(Error::OutOfRange { index: body_id, len })?;
        traj.path.push(*snapshot);
        Ok(())
    }
}
