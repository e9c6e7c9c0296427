//! Error taxonomy shared by every stage of a run.
//!
//! Library functions return `anyhow::Result`; the variants below are attached at the
//! point of failure so the driver can recover a stable status code from the chain.

use crate::roots::RootStatus;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EobError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("root finder for {quantity} did not converge ({status:?})")]
    RootFinder {
        quantity: &'static str,
        status: RootStatus,
    },

    #[error("initial data construction failed: {0}")]
    InitialData(String),

    #[error("ODE integration failed: {0}")]
    OdeIntegration(String),

    #[error("could not grow buffer to {0} samples")]
    Allocation(usize),

    #[error("I/O failure: {0}")]
    Io(#[from] std::io::Error),
}

impl EobError {
    /// Stable numeric status; zero is reserved for a successful run.
    pub fn status_code(&self) -> i32 {
        match self {
            EobError::InvalidConfig(_) => 1,
            EobError::RootFinder { .. } => 2,
            EobError::InitialData(_) => 3,
            EobError::OdeIntegration(_) => 4,
            EobError::Allocation(_) => 5,
            EobError::Io(_) => 6,
        }
    }

    /// Name of the stage that raised the error.
    pub fn component(&self) -> &'static str {
        match self {
            EobError::InvalidConfig(_) => "parameters",
            EobError::RootFinder { .. } => "root finder",
            EobError::InitialData(_) => "initial conditions",
            EobError::OdeIntegration(_) => "dynamics",
            EobError::Allocation(_) => "storage",
            EobError::Io(_) => "io",
        }
    }
}

/// Reserves room for `additional` more samples, mapping failure to `EobError::Allocation`.
pub fn try_grow<T>(buffer: &mut Vec<T>, additional: usize) -> Result<(), EobError> {
    buffer
        .try_reserve(additional)
        .map_err(|_| EobError::Allocation(buffer.len() + additional))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_are_distinct_and_nonzero() {
        let errors = [
            EobError::InvalidConfig("q".into()),
            EobError::RootFinder {
                quantity: "pphi",
                status: RootStatus::MaxIterations,
            },
            EobError::InitialData("prstar".into()),
            EobError::OdeIntegration("nan".into()),
            EobError::Allocation(10),
            EobError::Io(std::io::Error::new(std::io::ErrorKind::NotFound, "x")),
        ];
        let mut codes: Vec<i32> = errors.iter().map(EobError::status_code).collect();
        assert!(codes.iter().all(|&c| c != 0));
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
    }

    #[test]
    fn grow_reserves_capacity() {
        let mut buffer: Vec<f64> = Vec::new();
        try_grow(&mut buffer, 64).expect("small reservation succeeds");
        assert!(buffer.capacity() >= 64);
    }
}
