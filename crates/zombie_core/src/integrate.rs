//! Adaptive integration of an initial value problem onto an output grid.
//!
//! The driver advances with [`Tsit5`] while the problem is non-stiff and hands
//! over to [`Rosenbrock23`] once the explicit method's stability estimate says
//! step size is being limited by stiffness rather than accuracy. Steps are
//! clipped so that every grid time is hit exactly; no interpolation is done.

use crate::autodiff::Dual;
use crate::error::{DomainViolation, SimulationError};
use crate::solvers::{evaluate, Rosenbrock23, StageFailure, Steppable, Tolerance, Trial, Tsit5};
use crate::trajectory::{TimeGrid, Trajectory};
use crate::traits::DynamicalSystem;
use serde::{Deserialize, Serialize};
use std::cell::Cell;

/// Which stepper(s) the driver may use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Method {
    /// Start explicit, switch to Rosenbrock23 when stiffness is detected.
    #[default]
    Auto,
    Tsit5,
    Rosenbrock23,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntegratorSettings {
    pub method: Method,
    pub rtol: f64,
    pub atol: f64,
    /// First trial step; estimated from the problem when absent.
    pub initial_step: Option<f64>,
    pub max_step: Option<f64>,
    /// Budget of step attempts (accepted and rejected) for the whole run.
    pub max_steps: usize,
}

impl Default for IntegratorSettings {
    fn default() -> Self {
        Self {
            method: Method::Auto,
            rtol: 1.49012e-8,
            atol: 1.49012e-8,
            initial_step: None,
            max_step: None,
            max_steps: 1_000_000,
        }
    }
}

impl IntegratorSettings {
    pub fn validate(&self) -> Result<(), SimulationError> {
        let invalid = |reason: String| Err(SimulationError::InvalidSettings { reason });
        if !(self.rtol.is_finite() && self.rtol > 0.0) {
            return invalid(format!("rtol must be positive, got {}", self.rtol));
        }
        if !(self.atol.is_finite() && self.atol >= 0.0) {
            return invalid(format!("atol must be non-negative, got {}", self.atol));
        }
        for (name, step) in [("initial_step", self.initial_step), ("max_step", self.max_step)] {
            if let Some(h) = step {
                if !(h.is_finite() && h > 0.0) {
                    return invalid(format!("{name} must be positive, got {h}"));
                }
            }
        }
        if self.max_steps == 0 {
            return invalid("max_steps must be greater than zero".to_string());
        }
        Ok(())
    }

    fn tolerance(&self) -> Tolerance {
        Tolerance {
            rtol: self.rtol,
            atol: self.atol,
        }
    }
}

/// Work counters for one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IntegrationStats {
    pub accepted_steps: usize,
    pub rejected_steps: usize,
    /// Rejections caused by a stage that could not be evaluated, as opposed to
    /// an error estimate above tolerance.
    pub failed_stages: usize,
    pub derivative_evaluations: usize,
    pub jacobian_evaluations: usize,
    /// Time at which `Method::Auto` switched to the stiff solver.
    pub stiffness_switch: Option<f64>,
}

/// Integrates `dx/dt = system(t, x)` from `initial_state` at `grid.start()`
/// and samples the solution at every grid time.
///
/// # Errors
///
/// Configuration errors are reported before any evaluation. A failure to
/// evaluate the initial state is reported immediately; failures at trial
/// points shrink the step and are reported only if the step size underflows.
pub fn integrate<S>(
    system: &S,
    initial_state: &[f64],
    grid: &TimeGrid,
    settings: &IntegratorSettings,
) -> Result<Trajectory, SimulationError>
where
    S: DynamicalSystem<f64> + DynamicalSystem<Dual> + ?Sized,
{
    settings.validate()?;
    let dim = DynamicalSystem::<f64>::dimension(system);
    if initial_state.len() != dim {
        return Err(SimulationError::DimensionMismatch {
            expected: dim,
            actual: initial_state.len(),
        });
    }
    let names: Vec<String> = (0..dim)
        .map(|i| DynamicalSystem::<f64>::component_name(system, i))
        .collect();

    log::debug!(
        "integrating {dim} components over [{}, {}] at {} points ({:?})",
        grid.start(),
        grid.end(),
        grid.len(),
        settings.method
    );

    let mut run = Run::new(system, &names, initial_state, grid.start(), settings);
    let outcome = run.sample(grid);
    let stats = run.finish();

    match outcome {
        Ok(states) => {
            log::debug!(
                "integration finished: {} accepted, {} rejected, {} evaluations",
                stats.accepted_steps,
                stats.rejected_steps,
                stats.derivative_evaluations
            );
            Ok(Trajectory::new(names, grid.times().to_vec(), states, stats))
        }
        Err(err) => {
            log::warn!("integration failed after {} steps: {err}", stats.accepted_steps);
            Err(err)
        }
    }
}

/// Counts right-hand-side evaluations without touching the wrapped system.
struct Counted<'a, S: ?Sized> {
    inner: &'a S,
    calls: Cell<usize>,
}

impl<S> DynamicalSystem<f64> for Counted<'_, S>
where
    S: DynamicalSystem<f64> + ?Sized,
{
    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    fn apply(&self, t: f64, x: &[f64], out: &mut [f64]) -> Result<(), DomainViolation> {
        self.calls.set(self.calls.get() + 1);
        self.inner.apply(t, x, out)
    }
}

impl<S> DynamicalSystem<Dual> for Counted<'_, S>
where
    S: DynamicalSystem<Dual> + ?Sized,
{
    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    fn apply(&self, t: Dual, x: &[Dual], out: &mut [Dual]) -> Result<(), DomainViolation> {
        self.inner.apply(t, x, out)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Active {
    Explicit,
    Implicit,
}

// Hairer's stiffness test: h·ρ above the Tsit5 stability boundary on
// STIFF_HITS accepted steps, forgiven after NON_STIFF_RESET clean ones.
const STIFF_RATIO: f64 = 3.25;
const STIFF_HITS: usize = 15;
const NON_STIFF_RESET: usize = 6;

const SAFETY: f64 = 0.9;
const MIN_FACTOR: f64 = 0.2;
const MAX_FACTOR: f64 = 5.0;
const STAGE_FAILURE_FACTOR: f64 = 0.25;

struct Run<'a, S: ?Sized> {
    system: Counted<'a, S>,
    names: &'a [String],
    settings: &'a IntegratorSettings,
    tol: Tolerance,
    t: f64,
    y: Vec<f64>,
    dy: Vec<f64>,
    h: Option<f64>,
    active: Active,
    explicit: Tsit5,
    implicit: Rosenbrock23,
    stiff_hits: usize,
    non_stiff: usize,
    last_failure: Option<StageFailure>,
    stats: IntegrationStats,
}

impl<'a, S> Run<'a, S>
where
    S: DynamicalSystem<f64> + DynamicalSystem<Dual> + ?Sized,
{
    fn new(
        system: &'a S,
        names: &'a [String],
        initial_state: &[f64],
        t0: f64,
        settings: &'a IntegratorSettings,
    ) -> Self {
        let dim = initial_state.len();
        let active = match settings.method {
            Method::Rosenbrock23 => Active::Implicit,
            Method::Auto | Method::Tsit5 => Active::Explicit,
        };
        Self {
            system: Counted {
                inner: system,
                calls: Cell::new(0),
            },
            names,
            settings,
            tol: settings.tolerance(),
            t: t0,
            y: initial_state.to_vec(),
            dy: vec![0.0; dim],
            h: settings.initial_step,
            active,
            explicit: Tsit5::new(dim),
            implicit: Rosenbrock23::new(dim),
            stiff_hits: 0,
            non_stiff: 0,
            last_failure: None,
            stats: IntegrationStats::default(),
        }
    }

    fn sample(&mut self, grid: &TimeGrid) -> Result<Vec<Vec<f64>>, SimulationError> {
        evaluate(&self.system, self.t, &self.y, &mut self.dy).map_err(|f| self.describe(f))?;

        let mut states = Vec::with_capacity(grid.len());
        states.push(self.y.clone());
        for &t_out in &grid.times()[1..] {
            self.advance_to(t_out, grid.end())?;
            states.push(self.y.clone());
        }
        Ok(states)
    }

    fn finish(mut self) -> IntegrationStats {
        self.stats.derivative_evaluations = self.system.calls.get();
        self.stats.jacobian_evaluations = self.implicit.jacobian_evaluations();
        self.stats
    }

    fn order(&self) -> i32 {
        match self.active {
            Active::Explicit => Tsit5::ORDER,
            Active::Implicit => Rosenbrock23::ORDER,
        }
    }

    fn advance_to(&mut self, t_out: f64, t_end: f64) -> Result<(), SimulationError> {
        while self.t < t_out {
            if self.stats.accepted_steps + self.stats.rejected_steps >= self.settings.max_steps {
                return Err(SimulationError::TooManySteps {
                    time: self.t,
                    steps: self.settings.max_steps,
                });
            }

            let remaining = t_out - self.t;
            let mut h = match self.h {
                Some(h) => h,
                None => {
                    let h = self.initial_step(t_end - self.t);
                    self.h = Some(h);
                    h
                }
            };
            if let Some(max_step) = self.settings.max_step {
                h = h.min(max_step);
            }
            // Stretch by up to 1% rather than leave a sliver before t_out.
            let clipped = h >= remaining / 1.01;
            if clipped {
                h = remaining;
            }
            // A clipped step lands exactly on t_out however short it is.
            if !clipped && h < min_step(self.t) {
                return Err(self.underflow(h));
            }

            let attempt = match self.active {
                Active::Explicit => {
                    self.explicit
                        .attempt(&self.system, self.t, &self.y, &self.dy, h, &self.tol)
                }
                Active::Implicit => {
                    self.implicit
                        .attempt(&self.system, self.t, &self.y, &self.dy, h, &self.tol)
                }
            };

            match attempt {
                Ok(trial) if trial.error <= 1.0 => self.accept(h, clipped, t_out, trial),
                Ok(trial) if !trial.error.is_finite() => {
                    self.stats.rejected_steps += 1;
                    self.stats.failed_stages += 1;
                    self.last_failure = None;
                    log::trace!("error estimate {} for h = {h:e} at t = {}", trial.error, self.t);
                    self.h = Some(h * STAGE_FAILURE_FACTOR);
                }
                Ok(trial) => {
                    self.stats.rejected_steps += 1;
                    self.last_failure = None;
                    let factor = step_factor(trial.error, self.order()).min(1.0);
                    log::trace!("rejected h = {h:e} at t = {} (error {:.3})", self.t, trial.error);
                    self.h = Some(h * factor);
                }
                Err(failure) => {
                    self.stats.rejected_steps += 1;
                    self.stats.failed_stages += 1;
                    self.last_failure = Some(failure);
                    log::trace!("stage failed for h = {h:e} at t = {}: {failure:?}", self.t);
                    self.h = Some(h * STAGE_FAILURE_FACTOR);
                }
            }
        }
        Ok(())
    }

    fn accept(&mut self, h: f64, clipped: bool, t_out: f64, trial: Trial) {
        let (y_new, dy_new) = match self.active {
            Active::Explicit => self.explicit.candidate(),
            Active::Implicit => self.implicit.candidate(),
        };
        self.y.copy_from_slice(y_new);
        self.dy.copy_from_slice(dy_new);
        match self.active {
            Active::Explicit => self.explicit.accept(),
            Active::Implicit => self.implicit.accept(),
        }
        self.t = if clipped { t_out } else { self.t + h };
        self.stats.accepted_steps += 1;
        self.last_failure = None;

        let proposal = h * step_factor(trial.error, self.order());
        // A step shortened to land on t_out says nothing about the step the
        // problem can take next.
        let previous = self.h.unwrap_or(proposal);
        self.h = Some(if clipped {
            proposal.max(previous)
        } else {
            proposal
        });

        if self.settings.method == Method::Auto && self.active == Active::Explicit {
            if let Some(ratio) = trial.stiffness {
                self.track_stiffness(ratio);
            }
        }
    }

    fn track_stiffness(&mut self, ratio: f64) {
        if ratio > STIFF_RATIO {
            self.non_stiff = 0;
            self.stiff_hits += 1;
            if self.stiff_hits >= STIFF_HITS {
                log::info!(
                    "stiffness detected at t = {} (h·ρ = {ratio:.2}), switching to Rosenbrock23",
                    self.t
                );
                self.active = Active::Implicit;
                self.stats.stiffness_switch = Some(self.t);
            }
        } else {
            self.non_stiff += 1;
            if self.non_stiff == NON_STIFF_RESET {
                self.stiff_hits = 0;
            }
        }
    }

    /// Hairer's starting step heuristic (Solving ODEs I, II.4).
    fn initial_step(&self, span: f64) -> f64 {
        let scale: Vec<f64> = self
            .y
            .iter()
            .map(|y| self.tol.atol + self.tol.rtol * y.abs())
            .collect();
        let d0 = rms(self.y.iter().zip(&scale).map(|(y, s)| scaled(*y, *s)));
        let d1 = rms(self.dy.iter().zip(&scale).map(|(f, s)| scaled(*f, *s)));
        let h0 = if d0 < 1e-5 || d1 < 1e-5 {
            1e-6
        } else {
            0.01 * d0 / d1
        }
        .min(span);

        let y1: Vec<f64> = self
            .y
            .iter()
            .zip(&self.dy)
            .map(|(y, f)| y + h0 * f)
            .collect();
        let mut f1 = vec![0.0; y1.len()];
        // If the trial point fails, h0 stands and the step loop shrinks it.
        if evaluate(&self.system, self.t + h0, &y1, &mut f1).is_err() {
            return h0;
        }
        let d2 = rms(
            f1.iter()
                .zip(&self.dy)
                .zip(&scale)
                .map(|((a, b), s)| scaled(a - b, *s)),
        ) / h0;

        let h1 = if d1.max(d2) <= 1e-15 {
            (h0 * 1e-3).max(1e-6)
        } else {
            (0.01 / d1.max(d2)).powf(1.0 / f64::from(self.order() + 1))
        };
        (100.0 * h0).min(h1).min(span)
    }

    fn underflow(&self, step: f64) -> SimulationError {
        match self.last_failure {
            Some(failure) => self.describe(failure),
            None => SimulationError::StepSizeUnderflow { time: self.t, step },
        }
    }

    fn describe(&self, failure: StageFailure) -> SimulationError {
        let name = |index: usize| {
            self.names
                .get(index)
                .cloned()
                .unwrap_or_else(|| format!("x{index}"))
        };
        match failure {
            StageFailure::Domain { violation, time } => SimulationError::DomainViolation {
                compartment: name(violation.index),
                value: violation.value,
                time,
            },
            StageFailure::NonFinite { index, time } => SimulationError::NonFiniteDerivative {
                compartment: name(index),
                time,
            },
            StageFailure::Singular { time } => SimulationError::SingularIterationMatrix { time },
        }
    }
}

fn step_factor(error: f64, order: i32) -> f64 {
    if error == 0.0 {
        return MAX_FACTOR;
    }
    (SAFETY * error.powf(-1.0 / f64::from(order + 1))).clamp(MIN_FACTOR, MAX_FACTOR)
}

fn rms(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, n) = values.fold((0.0, 0usize), |(s, n), x| (s + x * x, n + 1));
    if n == 0 {
        0.0
    } else {
        (sum / n as f64).sqrt()
    }
}

/// `value / scale`, with exact zeros staying zero when `atol` is zero.
fn scaled(value: f64, scale: f64) -> f64 {
    if value == 0.0 {
        0.0
    } else {
        value / scale
    }
}

fn min_step(t: f64) -> f64 {
    16.0 * f64::EPSILON * t.abs().max(1.0)
}
