use num_traits::{Float, FromPrimitive};
use std::fmt::Debug;

use crate::error::DomainViolation;

/// A trait for types that can be used as scalars in the models.
/// Must support basic arithmetic, debug printing, and conversion from f64.
pub trait Scalar: Float + FromPrimitive + Debug + 'static {
    /// Lifts an `f64` constant (usually a rate parameter) into the scalar type.
    fn constant(value: f64) -> Self {
        Self::from_f64(value).unwrap_or_else(Self::nan)
    }

    /// The real part as `f64`, used when reporting a value back to the caller.
    fn real(self) -> f64 {
        self.to_f64().unwrap_or(f64::NAN)
    }
}

impl<T: Float + FromPrimitive + Debug + 'static> Scalar for T {}

/// An autonomous or non-autonomous vector field `dx/dt = f(t, x)`.
pub trait DynamicalSystem<T: Scalar> {
    /// Returns the dimension of the state space.
    fn dimension(&self) -> usize;

    /// Evaluates the vector field.
    /// t: current time
    /// x: current state
    /// out: buffer to write dx/dt into
    ///
    /// Returns a [`DomainViolation`] when `x` lies outside the region where the
    /// equations are defined (e.g. the operand of a square root is negative).
    /// The contents of `out` are unspecified in that case.
    fn apply(&self, t: T, x: &[T], out: &mut [T]) -> Result<(), DomainViolation>;

    /// Human-readable name of a state component, used in error reports.
    fn component_name(&self, index: usize) -> String {
        format!("x{index}")
    }
}
