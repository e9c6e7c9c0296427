//! The `teob_core` crate evolves a compact binary in the effective-one-body (EOB)
//! framework and produces its multipolar gravitational waveform.
//!
//! Key components:
//! - **Parameters**: `config` (user input), `params` (derived run state), `fits` (numerical-relativity fits).
//! - **Dynamics**: `metric` and `hamiltonian` (EOB potentials), `flux` (radiation reaction),
//!   `initial_conditions`, `orbits` (light ring, LSO) and `dynamics` (the ODE run).
//! - **Waveform**: `waveform` (factorized multipoles, polarizations, SPA), `nqc` and `ringdown`.
//! - **Precession**: `spin` (spin and orbital-plane evolution, Euler angles).
//! - **Numerics**: `autodiff` (second-order jets), `solvers` (Tsit5 with step control),
//!   `interp` and `roots`.
//! - **Driver**: `driver::run` ties everything together and writes the outputs.
pub mod autodiff;
pub mod config;
pub mod driver;
pub mod dynamics;
pub mod error;
pub mod fits;
pub mod flux;
pub mod hamiltonian;
pub mod initial_conditions;
pub mod interp;
pub mod metric;
pub mod nqc;
pub mod orbits;
pub mod params;
pub mod ringdown;
pub mod roots;
pub mod solvers;
pub mod spin;
pub mod traits;
pub mod waveform;

pub use config::InputParameters;
pub use driver::{run, RunOutput};
pub use error::EobError;
