use num_traits::{Float, FromPrimitive};
use std::fmt::Debug;
use std::ops::{AddAssign, Neg};

/// A trait for types that can be used as scalars in the integrated systems.
/// Must support basic arithmetic, debug printing, and conversion from f64.
pub trait Scalar: Float + FromPrimitive + Debug + Send + Sync + 'static {}

impl<T: Float + FromPrimitive + Debug + Send + Sync + 'static> Scalar for T {}

/// Converts an f64 constant into `T`. Unrepresentable values become NaN, which the
/// integrator rejects as a non-finite state.
pub(crate) fn constant<T: Scalar>(value: f64) -> T {
    T::from_f64(value).unwrap_or_else(T::nan)
}

/// A value a rule can carry as its rate.
///
/// Rule desugaring only needs negation and accumulation, so it works the same
/// for plain numbers and for richer rate representations (e.g. symbolic
/// expressions) that implement this trait.
pub trait RateValue: Clone + Debug + Neg<Output = Self> + AddAssign {
    /// Whether the value may be written into a rate structure.
    fn is_admissible(&self) -> bool {
        true
    }
}

impl RateValue for f64 {
    fn is_admissible(&self) -> bool {
        self.is_finite()
    }
}

impl RateValue for f32 {
    fn is_admissible(&self) -> bool {
        self.is_finite()
    }
}

/// Represents a continuous-time dynamical system.
pub trait DynamicalSystem<T: Scalar> {
    /// Returns the dimension of the state space.
    fn dimension(&self) -> usize;

    /// Evaluates the vector field.
    /// x: current state
    /// t: current time
    /// out: buffer to write dx/dt into
    fn apply(&self, t: T, x: &[T], out: &mut [T]);
}

/// A trait for fixed-step solvers that can step a system forward.
pub trait Steppable<T: Scalar> {
    /// Performs one step of size dt.
    /// t: current time (updated after step)
    /// state: current state (updated after step)
    /// dt: step size
    fn step(&mut self, system: &impl DynamicalSystem<T>, t: &mut T, state: &mut [T], dt: T);
}
