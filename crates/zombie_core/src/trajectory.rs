//! Output time grids and the trajectories sampled on them.

use crate::error::SimulationError;
use crate::integrate::IntegrationStats;
use crate::models::ModelState;
use serde::{Deserialize, Serialize};

/// Evenly spaced grid description, `samples` points from `start` to `end`
/// inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridSpec {
    pub start: f64,
    pub end: f64,
    pub samples: usize,
}

impl GridSpec {
    pub const fn new(start: f64, end: f64, samples: usize) -> Self {
        Self {
            start,
            end,
            samples,
        }
    }

    pub fn build(&self) -> Result<TimeGrid, SimulationError> {
        TimeGrid::linspace(self.start, self.end, self.samples)
    }
}

/// Strictly increasing, finite output times.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimeGrid(Vec<f64>);

impl TimeGrid {
    pub fn new(times: Vec<f64>) -> Result<Self, SimulationError> {
        if times.is_empty() {
            return Err(invalid("at least one time point is required"));
        }
        if let Some(t) = times.iter().find(|t| !t.is_finite()) {
            return Err(invalid(format!("time {t} is not finite")));
        }
        if let Some(pair) = times.windows(2).find(|w| w[1] <= w[0]) {
            return Err(invalid(format!(
                "times must be strictly increasing, found {} after {}",
                pair[1], pair[0]
            )));
        }
        Ok(Self(times))
    }

    /// `samples` evenly spaced points with both endpoints included.
    pub fn linspace(start: f64, end: f64, samples: usize) -> Result<Self, SimulationError> {
        match samples {
            0 => Err(invalid("at least one sample is required")),
            1 => Self::new(vec![start]),
            _ => {
                let step = (end - start) / (samples - 1) as f64;
                let mut times: Vec<f64> = (0..samples).map(|i| start + step * i as f64).collect();
                times[samples - 1] = end;
                Self::new(times)
            }
        }
    }

    pub fn times(&self) -> &[f64] {
        &self.0
    }

    pub fn start(&self) -> f64 {
        self.0[0]
    }

    pub fn end(&self) -> f64 {
        self.0[self.0.len() - 1]
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

fn invalid(reason: impl Into<String>) -> SimulationError {
    SimulationError::InvalidTimeGrid {
        reason: reason.into(),
    }
}

/// States sampled on a [`TimeGrid`]. Row `k` of `states` is the state at
/// `times[k]`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Trajectory {
    compartments: Vec<String>,
    times: Vec<f64>,
    states: Vec<Vec<f64>>,
    stats: IntegrationStats,
}

impl Trajectory {
    pub(crate) fn new(
        compartments: Vec<String>,
        times: Vec<f64>,
        states: Vec<Vec<f64>>,
        stats: IntegrationStats,
    ) -> Self {
        debug_assert_eq!(times.len(), states.len());
        Self {
            compartments,
            times,
            states,
            stats,
        }
    }

    pub fn compartments(&self) -> &[String] {
        &self.compartments
    }

    pub fn times(&self) -> &[f64] {
        &self.times
    }

    pub fn states(&self) -> &[Vec<f64>] {
        &self.states
    }

    pub fn stats(&self) -> &IntegrationStats {
        &self.stats
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    pub fn state(&self, k: usize) -> Option<&[f64]> {
        self.states.get(k).map(Vec::as_slice)
    }

    pub fn final_state(&self) -> Option<&[f64]> {
        self.states.last().map(Vec::as_slice)
    }

    /// Values of one compartment over time (one plotted curve).
    pub fn column(&self, index: usize) -> Option<Vec<f64>> {
        if index >= self.compartments.len() {
            return None;
        }
        Some(self.states.iter().map(|row| row[index]).collect())
    }

    pub fn column_by_name(&self, name: &str) -> Option<Vec<f64>> {
        let index = self.compartments.iter().position(|c| c == name)?;
        self.column(index)
    }

    /// Row `k` as a model's named-field state, `None` past the last sample.
    pub fn decode<S: ModelState>(&self, k: usize) -> Result<Option<S>, SimulationError> {
        self.states.get(k).map(|row| S::from_slice(row)).transpose()
    }
}
