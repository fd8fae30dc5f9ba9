//! Error types for the integration engine
//!
//! Every fallible entry point returns [`Result`]. Storage problems get their
//! own enum so the on-disk sink can report them without knowing about the
//! rest of the engine.

use std::fmt;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Crate-wide result type alias.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Rejected before any stepping: bad parameters, shapes or variant combinations.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A step kept failing after the controller exhausted its retry budget.
    #[error("integration failed at t = {t} (dt = {dt}) after {retries} retries")]
    IntegrationFailure { t: f64, dt: f64, retries: usize },

    /// The regularized two-body solver did not converge.
    #[error("close encounter between bodies {} and {} failed to converge at t = {t} ({iterations} iterations)", pair.0, pair.1)]
    EncounterFailure {
        t: f64,
        pair: (usize, usize),
        iterations: usize,
    },

    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Index past the recorded length.
    #[error("index {index} out of range (len {len})")]
    OutOfRange { index: usize, len: usize },
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("output already exists at {0} (pass replace to overwrite)")]
    AlreadyExists(PathBuf),

    #[error("{0} exists and is not a directory")]
    NotADirectory(PathBuf),

    #[error("corrupted store {path}: {reason}")]
    Corrupted { path: PathBuf, reason: String },

    /// Reported by the HDF5 library; kept as text so the error stays `Send`
    #[error("hdf5: {0}")]
    Hdf5(String),

    /// The flush worker stopped without reporting a reason.
    #[error("chunk flush worker terminated unexpectedly")]
    WorkerGone,

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Storage(StorageError::Io(e))
    }
}

impl From<hdf5::Error> for StorageError {
    fn from(e: hdf5::Error) -> Self {
        StorageError::Hdf5(e.to_string())
    }
}

impl From<hdf5::Error> for Error {
    fn from(e: hdf5::Error) -> Self {
        Error::Storage(e.into())
    }
}

/// A run that stopped on an error, with whatever it produced before that.
///
/// `partial` is `None` when the run failed before the first snapshot could be
/// recorded (bad configuration, output that could not be created).
#[derive(Debug)]
pub struct RunFailure<T> {
    pub error: Error,
    pub partial: Option<T>,
}

impl<T> RunFailure<T> {
    pub fn before_start(error: Error) -> Self {
        Self { error, partial: None }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> RunFailure<U> {
        RunFailure {
            error: self.error,
            partial: self.partial.map(f),
        }
    }
}

impl<T> fmt::Display for RunFailure<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.partial {
            Some(_) => write!(f, "{} (partial output kept)", self.error),
            None => self.error.fmt(f),
        }
    }
}

impl<T: fmt::Debug> std::error::Error for RunFailure<T> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

impl<T> From<RunFailure<T>> for Error {
    fn from(f: RunFailure<T>) -> Self {
        f.error
    }
}

impl Error {
    /// Failures the driver may retry with a smaller step.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::IntegrationFailure { .. } | Error::EncounterFailure { .. }
        )
    }
}
