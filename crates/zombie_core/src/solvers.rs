//! Embedded Runge-Kutta pairs used by the adaptive integrator.
//!
//! Both steppers attempt a single step of a given size and report a scaled
//! error estimate; accepting or rejecting the step is left to the driver in
//! [`crate::integrate`].

use crate::autodiff::{linearize, Dual};
use crate::error::DomainViolation;
use crate::traits::DynamicalSystem;
use nalgebra::{DMatrix, DVector};

/// Mixed absolute/relative error tolerance.
#[derive(Debug, Clone, Copy)]
pub struct Tolerance {
    pub rtol: f64,
    pub atol: f64,
}

impl Tolerance {
    /// RMS norm of `err` scaled by `atol + rtol * max(|y0|, |y1|)`. Exact
    /// components count as zero even where the scale vanishes.
    pub fn scaled_norm(&self, err: &[f64], y0: &[f64], y1: &[f64]) -> f64 {
        if err.is_empty() {
            return 0.0;
        }
        let sum: f64 = err
            .iter()
            .zip(y0.iter().zip(y1))
            .filter(|(e, _)| **e != 0.0)
            .map(|(e, (a, b))| {
                let scale = self.atol + self.rtol * a.abs().max(b.abs());
                (e / scale).powi(2)
            })
            .sum();
        (sum / err.len() as f64).sqrt()
    }
}

/// Why a trial evaluation could not be used.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StageFailure {
    Domain { violation: DomainViolation, time: f64 },
    NonFinite { index: usize, time: f64 },
    Singular { time: f64 },
}

/// Result of a step attempt that produced a candidate state.
#[derive(Debug, Clone, Copy)]
pub struct Trial {
    /// Scaled error norm; the step is acceptable when `<= 1`.
    pub error: f64,
    /// Estimate of `h·|λ|` along the dominant direction, when the method
    /// provides one.
    pub stiffness: Option<f64>,
}

/// Evaluates `system` at `(t, x)` and checks the result is finite.
pub fn evaluate<S>(system: &S, t: f64, x: &[f64], out: &mut [f64]) -> Result<(), StageFailure>
where
    S: DynamicalSystem<f64> + ?Sized,
{
    system
        .apply(t, x, out)
        .map_err(|violation| StageFailure::Domain { violation, time: t })?;
    check_finite(out, t)
}

/// Fails on the first non-finite component, so overflow in a stage
/// combination never reaches the error norm.
fn check_finite(values: &[f64], time: f64) -> Result<(), StageFailure> {
    match values.iter().position(|v| !v.is_finite()) {
        Some(index) => Err(StageFailure::NonFinite { index, time }),
        None => Ok(()),
    }
}

/// A solver that can attempt a step of size `h` from an accepted point.
pub trait Steppable {
    /// Order of the lower-order solution of the embedded pair; the step-size
    /// controller uses exponent `1 / (ORDER + 1)`.
    const ORDER: i32;

    /// Attempts a step from `(t, y)` where `dy = f(t, y)` is already known.
    /// On success the candidate is available through [`Self::candidate`].
    fn attempt<S>(
        &mut self,
        system: &S,
        t: f64,
        y: &[f64],
        dy: &[f64],
        h: f64,
        tol: &Tolerance,
    ) -> Result<Trial, StageFailure>
    where
        S: DynamicalSystem<f64> + DynamicalSystem<Dual>;

    /// Candidate state and its derivative from the last successful attempt.
    fn candidate(&self) -> (&[f64], &[f64]);

    /// Called when the driver accepts the candidate.
    fn accept(&mut self) {}
}

// Tsitouras 5(4) tableau (Tsitouras, 2011).
const C2: f64 = 0.161;
const C3: f64 = 0.327;
const C4: f64 = 0.9;
const C5: f64 = 0.9800255409045097;

const A21: f64 = 0.161;
const A31: f64 = -0.008480655492356989;
const A32: f64 = 0.335480655492357;
const A41: f64 = 2.897153057105493;
const A42: f64 = -6.359448489975075;
const A43: f64 = 4.3622954328695815;
const A51: f64 = 5.325864828439257;
const A52: f64 = -11.748883564062828;
const A53: f64 = 7.4955393428898365;
const A54: f64 = -0.09249506636175525;
const A61: f64 = 5.86145544294642;
const A62: f64 = -12.92096931784711;
const A63: f64 = 8.159367898576159;
const A64: f64 = -0.071584973281401;
const A65: f64 = -0.028269050394068383;

// Fifth-order weights (equal to the last row, FSAL).
const B1: f64 = 0.09646076681806523;
const B2: f64 = 0.01;
const B3: f64 = 0.4798896504144996;
const B4: f64 = 1.379008574103742;
const B5: f64 = -3.290069515436081;
const B6: f64 = 2.324710524099774;

// Difference between the fifth- and fourth-order weights.
const E1: f64 = -0.00178001105222577714;
const E2: f64 = -0.0008164344596567469;
const E3: f64 = 0.007880878010261995;
const E4: f64 = -0.1447110071732629;
const E5: f64 = 0.5823571654525552;
const E6: f64 = -0.45808210592918697;
const E7: f64 = 0.015151515151515152;

/// Tsitouras 5/4 Solver with embedded error estimate and FSAL derivative.
pub struct Tsit5 {
    k2: Vec<f64>,
    k3: Vec<f64>,
    k4: Vec<f64>,
    k5: Vec<f64>,
    k6: Vec<f64>,
    k7: Vec<f64>,
    tmp: Vec<f64>,
    y_new: Vec<f64>,
    err: Vec<f64>,
}

impl Tsit5 {
    pub fn new(dim: usize) -> Self {
        Self {
            k2: vec![0.0; dim],
            k3: vec![0.0; dim],
            k4: vec![0.0; dim],
            k5: vec![0.0; dim],
            k6: vec![0.0; dim],
            k7: vec![0.0; dim],
            tmp: vec![0.0; dim],
            y_new: vec![0.0; dim],
            err: vec![0.0; dim],
        }
    }
}

impl Steppable for Tsit5 {
    const ORDER: i32 = 4;

    fn attempt<S>(
        &mut self,
        system: &S,
        t: f64,
        y: &[f64],
        k1: &[f64],
        h: f64,
        tol: &Tolerance,
    ) -> Result<Trial, StageFailure>
    where
        S: DynamicalSystem<f64> + DynamicalSystem<Dual>,
    {
        let n = y.len();

        for i in 0..n {
            self.tmp[i] = y[i] + h * A21 * k1[i];
        }
        evaluate(system, t + C2 * h, &self.tmp, &mut self.k2)?;

        for i in 0..n {
            self.tmp[i] = y[i] + h * (A31 * k1[i] + A32 * self.k2[i]);
        }
        evaluate(system, t + C3 * h, &self.tmp, &mut self.k3)?;

        for i in 0..n {
            self.tmp[i] = y[i] + h * (A41 * k1[i] + A42 * self.k2[i] + A43 * self.k3[i]);
        }
        evaluate(system, t + C4 * h, &self.tmp, &mut self.k4)?;

        for i in 0..n {
            self.tmp[i] = y[i]
                + h * (A51 * k1[i] + A52 * self.k2[i] + A53 * self.k3[i] + A54 * self.k4[i]);
        }
        evaluate(system, t + C5 * h, &self.tmp, &mut self.k5)?;

        for i in 0..n {
            self.tmp[i] = y[i]
                + h * (A61 * k1[i]
                    + A62 * self.k2[i]
                    + A63 * self.k3[i]
                    + A64 * self.k4[i]
                    + A65 * self.k5[i]);
        }
        evaluate(system, t + h, &self.tmp, &mut self.k6)?;

        for i in 0..n {
            self.y_new[i] = y[i]
                + h * (B1 * k1[i]
                    + B2 * self.k2[i]
                    + B3 * self.k3[i]
                    + B4 * self.k4[i]
                    + B5 * self.k5[i]
                    + B6 * self.k6[i]);
        }
        check_finite(&self.y_new, t + h)?;
        // k7 doubles as the derivative at the candidate point.
        evaluate(system, t + h, &self.y_new, &mut self.k7)?;

        for i in 0..n {
            self.err[i] = h
                * (E1 * k1[i]
                    + E2 * self.k2[i]
                    + E3 * self.k3[i]
                    + E4 * self.k4[i]
                    + E5 * self.k5[i]
                    + E6 * self.k6[i]
                    + E7 * self.k7[i]);
        }
        check_finite(&self.err, t + h)?;
        let error = tol.scaled_norm(&self.err, y, &self.y_new);

        // Stages 6 and 7 share c = 1, so their difference quotient estimates
        // the dominant eigenvalue (Hairer & Wanner, IV.2).
        let mut num = 0.0;
        let mut den = 0.0;
        for i in 0..n {
            num += (self.k7[i] - self.k6[i]).powi(2);
            den += (self.y_new[i] - self.tmp[i]).powi(2);
        }
        let stiffness = (den > 0.0).then(|| h * (num / den).sqrt());

        Ok(Trial { error, stiffness })
    }

    fn candidate(&self) -> (&[f64], &[f64]) {
        (&self.y_new, &self.k7)
    }
}

/// Shampine's Rosenbrock 2(3) pair (the `ode23s` scheme). L-stable, so large
/// steps stay bounded on stiff problems. The Jacobian is computed once per
/// accepted point and reused across rejected attempts.
pub struct Rosenbrock23 {
    linearization: Option<(DMatrix<f64>, Vec<f64>)>,
    f1: Vec<f64>,
    f2: Vec<f64>,
    tmp: Vec<f64>,
    y_new: Vec<f64>,
    err: Vec<f64>,
    jacobian_evaluations: usize,
}

impl Rosenbrock23 {
    const D: f64 = 1.0 / (2.0 + std::f64::consts::SQRT_2);
    const E32: f64 = 6.0 + std::f64::consts::SQRT_2;

    pub fn new(dim: usize) -> Self {
        Self {
            linearization: None,
            f1: vec![0.0; dim],
            f2: vec![0.0; dim],
            tmp: vec![0.0; dim],
            y_new: vec![0.0; dim],
            err: vec![0.0; dim],
            jacobian_evaluations: 0,
        }
    }

    pub fn jacobian_evaluations(&self) -> usize {
        self.jacobian_evaluations
    }
}

impl Steppable for Rosenbrock23 {
    const ORDER: i32 = 2;

    fn attempt<S>(
        &mut self,
        system: &S,
        t: f64,
        y: &[f64],
        f0: &[f64],
        h: f64,
        tol: &Tolerance,
    ) -> Result<Trial, StageFailure>
    where
        S: DynamicalSystem<f64> + DynamicalSystem<Dual>,
    {
        let n = y.len();

        if self.linearization.is_none() {
            let lin = linearize(system, t, y)
                .map_err(|violation| StageFailure::Domain { violation, time: t })?;
            self.jacobian_evaluations += 1;
            if !lin.is_finite() {
                return Err(StageFailure::Singular { time: t });
            }
            self.linearization = Some((lin.jacobian, lin.dfdt));
        }
        let Some((jacobian, dfdt)) = self.linearization.as_ref() else {
            return Err(StageFailure::Singular { time: t });
        };

        // W = I - h·d·J
        let hd = h * Self::D;
        let w = DMatrix::<f64>::identity(n, n) - jacobian * hd;
        let lu = w.lu();
        let solve = |rhs: DVector<f64>| lu.solve(&rhs).ok_or(StageFailure::Singular { time: t });

        let k1 = solve(DVector::from_iterator(
            n,
            (0..n).map(|i| f0[i] + hd * dfdt[i]),
        ))?;

        for i in 0..n {
            self.tmp[i] = y[i] + 0.5 * h * k1[i];
        }
        evaluate(system, t + 0.5 * h, &self.tmp, &mut self.f1)?;

        let k2 = solve(DVector::from_iterator(n, (0..n).map(|i| self.f1[i] - k1[i])))? + &k1;

        for i in 0..n {
            self.y_new[i] = y[i] + h * k2[i];
        }
        check_finite(&self.y_new, t + h)?;
        evaluate(system, t + h, &self.y_new, &mut self.f2)?;

        let k3 = solve(DVector::from_iterator(
            n,
            (0..n).map(|i| {
                self.f2[i] - Self::E32 * (k2[i] - self.f1[i]) - 2.0 * (k1[i] - f0[i])
                    + hd * dfdt[i]
            }),
        ))?;

        for i in 0..n {
            self.err[i] = h / 6.0 * (k1[i] - 2.0 * k2[i] + k3[i]);
        }
        if self.err.iter().any(|e| !e.is_finite()) {
            return Err(StageFailure::Singular { time: t });
        }
        let error = tol.scaled_norm(&self.err, y, &self.y_new);

        Ok(Trial {
            error,
            stiffness: None,
        })
    }

    fn candidate(&self) -> (&[f64], &[f64]) {
        (&self.y_new, &self.f2)
    }

    fn accept(&mut self) {
        self.linearization = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::Scalar;
    use approx::assert_relative_eq;

    struct Decay {
        rate: f64,
    }

    impl<T: Scalar> DynamicalSystem<T> for Decay {
        fn dimension(&self) -> usize {
            1
        }

        fn apply(&self, _t: T, x: &[T], out: &mut [T]) -> Result<(), DomainViolation> {
            out[0] = -T::constant(self.rate) * x[0];
            Ok(())
        }
    }

    struct Poisoned;

    impl<T: Scalar> DynamicalSystem<T> for Poisoned {
        fn dimension(&self) -> usize {
            2
        }

        fn apply(&self, _t: T, x: &[T], out: &mut [T]) -> Result<(), DomainViolation> {
            out[0] = T::one();
            out[1] = if x[0].real() > 1.0 { T::nan() } else { T::zero() };
            Ok(())
        }
    }

    const TOL: Tolerance = Tolerance {
        rtol: 1e-6,
        atol: 1e-9,
    };

    fn single_step<M: Steppable>(stepper: &mut M, h: f64) -> (Trial, f64) {
        let system = Decay { rate: 1.0 };
        let trial = stepper
            .attempt(&system, 0.0, &[1.0], &[-1.0], h, &TOL)
            .expect("decay never fails");
        (trial, stepper.candidate().0[0])
    }

    #[test]
    fn scaled_norm_is_rms_of_weighted_errors() {
        let tol = Tolerance {
            rtol: 0.0,
            atol: 0.5,
        };
        let norm = tol.scaled_norm(&[0.5, 1.5], &[0.0, 0.0], &[0.0, 0.0]);
        assert_relative_eq!(norm, (0.5_f64 * (1.0 + 9.0)).sqrt());
    }

    #[test]
    fn tsit5_step_is_fifth_order_accurate() {
        let mut stepper = Tsit5::new(1);
        let (trial, y) = single_step(&mut stepper, 0.1);
        assert!((y - (-0.1_f64).exp()).abs() < 1e-9);
        assert!(trial.error < 1.0);
        assert_relative_eq!(stepper.candidate().1[0], -y);
    }

    #[test]
    fn tsit5_local_error_shrinks_at_fifth_order() {
        let mut stepper = Tsit5::new(1);
        let local_error = |stepper: &mut Tsit5, h: f64| {
            let (_, y) = single_step(stepper, h);
            (y - (-h).exp()).abs()
        };
        let coarse = local_error(&mut stepper, 0.2);
        let fine = local_error(&mut stepper, 0.1);
        let finer = local_error(&mut stepper, 0.05);
        // O(h^6) local error: halving h divides it by about 64.
        assert!(coarse / fine > 48.0, "ratio {}", coarse / fine);
        assert!(fine / finer > 48.0, "ratio {}", fine / finer);
    }

    #[test]
    fn tsit5_error_estimate_tracks_local_error() {
        let mut stepper = Tsit5::new(1);
        for h in [0.4, 0.2, 0.1] {
            let (trial, y) = single_step(&mut stepper, h);
            let scale = TOL.atol + TOL.rtol * y.abs().max(1.0);
            let actual = (y - (-h).exp()).abs() / scale;
            // The estimate belongs to the embedded fourth-order solution, so it
            // bounds the error of the fifth-order one from above.
            assert!(trial.error >= actual, "h = {h}: {} < {actual}", trial.error);
            assert!(trial.error < 1e4 * actual.max(1e-12), "h = {h}");
        }
    }

    #[test]
    fn tsit5_error_estimate_grows_with_step() {
        let mut stepper = Tsit5::new(1);
        let (small, _) = single_step(&mut stepper, 0.05);
        let (large, _) = single_step(&mut stepper, 0.4);
        assert!(large.error > small.error * 100.0);
    }

    #[test]
    fn tsit5_reports_stiffness_ratio_for_linear_decay() {
        let mut stepper = Tsit5::new(1);
        let system = Decay { rate: 1000.0 };
        let trial = stepper
            .attempt(&system, 0.0, &[1.0], &[-1000.0], 0.001, &TOL)
            .expect("decay never fails");
        // For y' = λy the estimate is exactly h|λ|.
        let ratio = trial.stiffness.expect("stages differ");
        assert_relative_eq!(ratio, 1.0, epsilon = 1e-9);
    }

    #[test]
    fn rosenbrock_is_stable_far_beyond_explicit_limit() {
        let mut stepper = Rosenbrock23::new(1);
        let system = Decay { rate: 1e6 };
        stepper
            .attempt(&system, 0.0, &[1.0], &[-1e6], 1.0, &TOL)
            .expect("linear problem is never singular");
        let y = stepper.candidate().0[0];
        assert!(y.abs() < 1.0, "L-stable step must damp, got {y}");
        assert_eq!(stepper.jacobian_evaluations(), 1);
    }

    #[test]
    fn rosenbrock_reuses_jacobian_until_accept() {
        let mut stepper = Rosenbrock23::new(1);
        single_step(&mut stepper, 0.2);
        single_step(&mut stepper, 0.1);
        assert_eq!(stepper.jacobian_evaluations(), 1);
        stepper.accept();
        let (_, y) = single_step(&mut stepper, 0.01);
        assert_eq!(stepper.jacobian_evaluations(), 2);
        assert!((y - (-0.01_f64).exp()).abs() < 1e-5);
    }

    #[test]
    fn non_finite_stage_is_reported_with_component() {
        let mut stepper = Tsit5::new(2);
        let failure = stepper
            .attempt(&Poisoned, 0.0, &[0.5, 0.0], &[1.0, 0.0], 1.0, &TOL)
            .expect_err("stage crosses x = 1");
        assert!(matches!(failure, StageFailure::NonFinite { index: 1, .. }));
    }

    struct Overflowing;

    impl<T: Scalar> DynamicalSystem<T> for Overflowing {
        fn dimension(&self) -> usize {
            1
        }

        fn apply(&self, _t: T, _x: &[T], out: &mut [T]) -> Result<(), DomainViolation> {
            out[0] = T::constant(1e308);
            Ok(())
        }
    }

    #[test]
    fn overflowing_combination_is_a_stage_failure() {
        let mut stepper = Tsit5::new(1);
        let failure = stepper
            .attempt(&Overflowing, 0.0, &[0.0], &[1e308], 1e-3, &TOL)
            .expect_err("weighted sum of stages overflows");
        assert!(matches!(failure, StageFailure::NonFinite { index: 0, .. }));
    }

    #[test]
    fn scaled_norm_ignores_exact_components_with_zero_scale() {
        let tol = Tolerance {
            rtol: 1e-6,
            atol: 0.0,
        };
        let norm = tol.scaled_norm(&[1e-6, 0.0], &[1.0, 0.0], &[1.0, 0.0]);
        assert_relative_eq!(norm, 0.5_f64.sqrt());
    }
}
