use num_traits::{Float, FromPrimitive};
use std::fmt::Debug;

/// A trait for types that can be used as scalars in the EOB kernels.
/// Implemented by `f64` and by the forward-mode `Jet` used to differentiate potentials.
pub trait Scalar: Float + FromPrimitive + Debug + 'static {
    /// Lifts a literal constant into the scalar type.
    fn cst(x: f64) -> Self {
        Self::from_f64(x).unwrap_or_else(Self::nan)
    }
}

impl<T: Float + FromPrimitive + Debug + 'static> Scalar for T {}

/// Represents a first-order ODE system y' = f(t, y).
pub trait DynamicalSystem<T: Scalar> {
    /// Returns the dimension of the state space.
    fn dimension(&self) -> usize;

    /// Evaluates the vector field.
    /// x: current state
    /// t: current time
    /// out: buffer to write dx/dt
    fn apply(&self, t: T, x: &[T], out: &mut [T]);
}

/// A trait for solvers that can step a system forward with a fixed step.
pub trait Steppable<T: Scalar> {
    /// Performs one step of size dt.
    /// t: current time (updated after step)
    /// state: current state (updated after step)
    /// dt: step size (may be negative for backward integration)
    fn step(&mut self, system: &impl DynamicalSystem<T>, t: &mut T, state: &mut [T], dt: T);
}

/// Solvers carrying an embedded lower-order solution, used for step-size control.
pub trait EmbeddedSteppable<T: Scalar>: Steppable<T> {
    /// Order of the propagated solution.
    fn order(&self) -> u32;

    /// Attempts a step without committing it.
    /// `out` receives the candidate state at t + dt, `err` the local error estimate.
    fn trial_step(
        &mut self,
        system: &impl DynamicalSystem<T>,
        t: T,
        state: &[T],
        dt: T,
        out: &mut [T],
        err: &mut [T],
    );
}
