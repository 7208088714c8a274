//! Errors reported by model construction and integration.

use serde::Serialize;

/// Raised by a model's evaluator when the state leaves the region where its
/// equations are real-valued.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DomainViolation {
    /// Index of the offending compartment in the state vector.
    pub index: usize,
    /// Value of that compartment at the point of evaluation.
    pub value: f64,
}

impl DomainViolation {
    pub fn new(index: usize, value: f64) -> Self {
        Self { index, value }
    }
}

/// Broad classification of a [`SimulationError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorKind {
    /// Rejected before integration began.
    Configuration,
    /// The solver could not produce a trustworthy trajectory.
    Numerical,
    /// A compartment left the domain of the model's equations.
    Domain,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SimulationError {
    #[error("parameter `{name}` must be finite and non-negative, got {value}")]
    InvalidParameter { name: &'static str, value: f64 },

    #[error("state vector has {actual} entries, model expects {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("invalid time grid: {reason}")]
    InvalidTimeGrid { reason: String },

    #[error("invalid integrator settings: {reason}")]
    InvalidSettings { reason: String },

    #[error("unknown model `{name}`, expected one of hzr, hizr, hdzg, pale")]
    UnknownModel { name: String },

    #[error("compartment `{compartment}` left its domain (value {value}) at t = {time}")]
    DomainViolation {
        compartment: String,
        value: f64,
        time: f64,
    },

    #[error("derivative of `{compartment}` is not finite at t = {time}")]
    NonFiniteDerivative { compartment: String, time: f64 },

    #[error("iteration matrix is singular or not finite at t = {time}")]
    SingularIterationMatrix { time: f64 },

    #[error("step size {step:e} fell below machine resolution at t = {time}")]
    StepSizeUnderflow { time: f64, step: f64 },

    #[error("gave up after {steps} steps at t = {time}")]
    TooManySteps { time: f64, steps: usize },
}

impl SimulationError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidParameter { .. }
            | Self::DimensionMismatch { .. }
            | Self::InvalidTimeGrid { .. }
            | Self::InvalidSettings { .. }
            | Self::UnknownModel { .. } => ErrorKind::Configuration,
            Self::DomainViolation { .. } => ErrorKind::Domain,
            Self::NonFiniteDerivative { .. }
            | Self::SingularIterationMatrix { .. }
            | Self::StepSizeUnderflow { .. }
            | Self::TooManySteps { .. } => ErrorKind::Numerical,
        }
    }
}

/// Checks that every named rate constant is finite and non-negative.
pub(crate) fn check_rates(rates: &[(&'static str, f64)]) -> Result<(), SimulationError> {
    for &(name, value) in rates {
        if !value.is_finite() || value < 0.0 {
            return Err(SimulationError::InvalidParameter { name, value });
        }
    }
    Ok(())
}
