//! Humans, the dead, zombies and the gone, with heroes and a learned
//! probability of winning an encounter.
//!
//! Rates are per day. The win probability `survival` lives in the state vector
//! next to the populations but is not itself a population.

use super::{compartment_name, Compartment, CompartmentModel, Flow};
use crate::error::{check_rates, DomainViolation, SimulationError};
use crate::trajectory::GridSpec;
use crate::traits::{DynamicalSystem, Scalar};
use serde::{Deserialize, Serialize};

pub const DAYS_PER_YEAR: f64 = 365.25;

/// Converts an annual rate to a daily one.
pub fn per_day(annual: f64) -> f64 {
    annual / DAYS_PER_YEAR
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HdzgParams {
    pub birth: f64,
    pub death: f64,
    /// The dead rising as zombies.
    pub resurrection: f64,
    /// The dead decaying past any return.
    pub decay: f64,
    /// How fast encounters teach humans to win.
    pub learning: f64,
    /// Heroes destroying zombies, scaled by `sqrt(zombies)`.
    pub heroism: f64,
    pub forgetting: f64,
    pub teaching: f64,
}

impl Default for HdzgParams {
    fn default() -> Self {
        let forgetting = 0.01;
        Self {
            birth: per_day(0.065),
            death: per_day(0.02),
            resurrection: per_day(0.01),
            decay: per_day(0.05),
            learning: 0.03,
            heroism: 0.0001,
            forgetting,
            teaching: 0.2 * forgetting,
        }
    }
}

impl HdzgParams {
    pub fn validate(&self) -> Result<(), SimulationError> {
        check_rates(&[
            ("birth", self.birth),
            ("death", self.death),
            ("resurrection", self.resurrection),
            ("decay", self.decay),
            ("learning", self.learning),
            ("heroism", self.heroism),
            ("forgetting", self.forgetting),
            ("teaching", self.teaching),
        ])
    }
}

model_state! {
    HdzgState {
        humans = 1.0 - 1e-4,
        dead = 0.0,
        zombies = 1e-4,
        gone = 0.0,
        /// Probability that a human wins an encounter.
        survival = 0.1,
    }
}

const HUMANS: usize = 0;
const DEAD: usize = 1;
const ZOMBIES: usize = 2;
const GONE: usize = 3;
const SURVIVAL: usize = 4;

#[derive(Debug, Clone)]
pub struct Hdzg {
    params: HdzgParams,
}

impl<T: Scalar> DynamicalSystem<T> for Hdzg {
    fn dimension(&self) -> usize {
        5
    }

    fn apply(&self, _t: T, x: &[T], out: &mut [T]) -> Result<(), DomainViolation> {
        let (h, dead, z, hw) = (x[HUMANS], x[DEAD], x[ZOMBIES], x[SURVIVAL]);
        // Compare real parts: a Dual ordering also looks at the tangent.
        if z.real() < 0.0 {
            return Err(DomainViolation::new(ZOMBIES, z.real()));
        }
        if hw.real() > 1.0 {
            return Err(DomainViolation::new(SURVIVAL, hw.real()));
        }

        let p = &self.params;
        let birth = T::constant(p.birth);
        let death = T::constant(p.death);
        let resurrection = T::constant(p.resurrection);
        let decay = T::constant(p.decay);
        let learning = T::constant(p.learning);
        let heroism = T::constant(p.heroism);
        let forgetting = T::constant(p.forgetting);
        let teaching = T::constant(p.teaching);

        let losing = T::one() - hw;
        let encounters = h * z;
        let heroes = heroism * h * z.sqrt();

        out[HUMANS] = birth * h - death * h - losing * encounters;
        out[DEAD] = death * h + losing * encounters - resurrection * dead - decay * dead;
        out[ZOMBIES] = resurrection * dead - hw * encounters - heroes;
        out[GONE] = decay * dead + hw * encounters + heroes;
        out[SURVIVAL] =
            learning * hw * losing.sqrt() * encounters - forgetting * hw + teaching * losing;
        Ok(())
    }

    fn component_name(&self, index: usize) -> String {
        compartment_name(Self::COMPARTMENTS, index)
    }
}

impl CompartmentModel for Hdzg {
    type Params = HdzgParams;
    type State = HdzgState;

    const NAME: &'static str = "hdzg";

    const COMPARTMENTS: &'static [Compartment] = &[
        Compartment::population("humans"),
        Compartment::population("dead"),
        Compartment::population("zombies"),
        Compartment::population("gone"),
        Compartment::rate("survival"),
    ];

    fn new(params: HdzgParams) -> Result<Self, SimulationError> {
        params.validate()?;
        Ok(Self { params })
    }

    fn params(&self) -> &HdzgParams {
        &self.params
    }

    /// Rates are NaN where the state is outside the domain (`zombies < 0`).
    fn flows(&self, s: &HdzgState) -> Vec<Flow> {
        let p = &self.params;
        let encounters = s.humans * s.zombies;
        vec![
            Flow::new("birth", None, Some(HUMANS), p.birth * s.humans),
            Flow::new("death", Some(HUMANS), Some(DEAD), p.death * s.humans),
            Flow::new(
                "infection",
                Some(HUMANS),
                Some(DEAD),
                (1.0 - s.survival) * encounters,
            ),
            Flow::new(
                "resurrection",
                Some(DEAD),
                Some(ZOMBIES),
                p.resurrection * s.dead,
            ),
            Flow::new("decay", Some(DEAD), Some(GONE), p.decay * s.dead),
            Flow::new("defeat", Some(ZOMBIES), Some(GONE), s.survival * encounters),
            Flow::new(
                "heroes",
                Some(ZOMBIES),
                Some(GONE),
                p.heroism * s.humans * s.zombies.sqrt(),
            ),
        ]
    }

    fn default_grid() -> GridSpec {
        GridSpec::new(0.0, 100_000.0, 10_000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::autodiff::linearize;
    use crate::error::ErrorKind;
    use crate::integrate::{IntegratorSettings, Method};
    use crate::models::testing::{assert_flows_balance, population_derivative};
    use crate::models::ModelState;
    use approx::assert_relative_eq;

    fn published() -> Hdzg {
        Hdzg::new(HdzgParams::default()).expect("published parameters are valid")
    }

    #[test]
    fn published_rates_are_per_day() {
        let p = HdzgParams::default();
        assert_relative_eq!(p.birth * DAYS_PER_YEAR, 0.065, max_relative = 1e-14);
        assert_relative_eq!(p.teaching, 0.002, max_relative = 1e-14);
        let s = HdzgState::default();
        assert_relative_eq!(s.humans + s.zombies, 1.0, max_relative = 1e-15);
    }

    #[test]
    fn flows_balance_and_total_grows_by_births() {
        let model = published();
        let state = HdzgState {
            humans: 0.8,
            dead: 0.05,
            zombies: 0.09,
            gone: 0.01,
            survival: 0.3,
        };
        assert_flows_balance(&model, &state);
        assert_relative_eq!(
            population_derivative(&model, &state),
            model.params().birth * state.humans,
            max_relative = 1e-9
        );
    }

    #[test]
    fn certain_win_stops_new_infections() {
        let model = published();
        let state = HdzgState {
            humans: 0.7,
            dead: 0.1,
            zombies: 0.2,
            gone: 0.0,
            survival: 1.0,
        };
        let infection = model
            .flows(&state)
            .into_iter()
            .find(|f| f.label == "infection")
            .expect("infection flow");
        assert_eq!(infection.rate, 0.0);

        let p = model.params();
        let d = model.derivative(&state).expect("survival = 1 is in the domain");
        assert_eq!(d.humans, p.birth * state.humans - p.death * state.humans);
    }

    #[test]
    fn survival_derivative_matches_formula() {
        let model = published();
        let s = HdzgState {
            humans: 0.9,
            dead: 0.0,
            zombies: 0.04,
            gone: 0.0,
            survival: 0.36,
        };
        let d = model.derivative(&s).expect("evaluates");
        let expected = 0.03 * 0.36 * 0.8 * 0.9 * 0.04 - 0.01 * 0.36 + 0.002 * 0.64;
        assert_relative_eq!(d.survival, expected, max_relative = 1e-12);
    }

    #[test]
    fn negative_zombies_are_outside_the_domain() {
        let model = published();
        let state = HdzgState {
            zombies: -1e-6,
            ..HdzgState::default()
        };
        let err = model.derivative(&state).expect_err("sqrt of a negative count");
        assert_eq!(err.kind(), ErrorKind::Domain);

        let grid = GridSpec::new(0.0, 10.0, 11).build().expect("valid grid");
        let err = model
            .simulate(&state, &grid, &IntegratorSettings::default())
            .expect_err("initial state is invalid");
        assert_eq!(
            err,
            SimulationError::DomainViolation {
                compartment: "zombies".to_string(),
                value: -1e-6,
                time: 0.0,
            }
        );
    }

    #[test]
    fn survival_above_one_is_outside_the_domain() {
        let model = published();
        let err = model
            .derivative(&HdzgState {
                survival: 1.5,
                ..HdzgState::default()
            })
            .expect_err("sqrt(1 - survival) is undefined");
        assert!(matches!(
            err,
            SimulationError::DomainViolation { ref compartment, value, .. }
                if compartment == "survival" && value == 1.5
        ));
    }

    #[test]
    fn jacobian_of_heroes_term_uses_square_root_slope() {
        let model = Hdzg::new(HdzgParams {
            birth: 0.0,
            death: 0.0,
            resurrection: 0.0,
            decay: 0.0,
            learning: 0.0,
            heroism: 0.5,
            forgetting: 0.0,
            teaching: 0.0,
        })
        .expect("valid");
        let x = [2.0, 0.0, 0.25, 0.0, 1.0];
        let lin = linearize(&model, 0.0, &x).expect("in the domain");
        // Z' = -H Z - 0.5 H sqrt(Z) with survival = 1.
        assert_relative_eq!(lin.jacobian[(ZOMBIES, ZOMBIES)], -2.0 - 0.5 * 2.0 * 0.5 / 0.5);
        assert_relative_eq!(lin.jacobian[(ZOMBIES, HUMANS)], -0.25 - 0.5 * 0.5);
    }

    #[test]
    fn short_run_stays_in_the_domain() {
        let model = published();
        let grid = GridSpec::new(0.0, 1_000.0, 101).build().expect("valid grid");
        let trajectory = model
            .simulate(&HdzgState::default(), &grid, &IntegratorSettings::default())
            .expect("integrates");
        for k in 0..trajectory.len() {
            let s: HdzgState = trajectory.decode(k).expect("five compartments").expect("row");
            assert!(s.zombies >= 0.0);
            assert!(s.humans > 0.0);
            assert!(s.survival > 0.0 && s.survival < 1.0);
            assert!(s.to_vec().iter().all(|v| v.is_finite()));
        }
    }

    #[test]
    fn jacobian_is_finite_without_zombies() {
        let model = published();
        let x = [1.0, 0.2, 0.0, 0.0, 0.1];
        let lin = linearize(&model, 0.0, &x).expect("zero zombies is in the domain");
        assert!(lin.is_finite());
        assert!(lin.jacobian[(ZOMBIES, ZOMBIES)] < 0.0);
    }

    #[test]
    fn zombie_free_population_grows_without_an_outbreak() {
        let model = Hdzg::new(HdzgParams {
            resurrection: 0.0,
            ..HdzgParams::default()
        })
        .expect("valid");
        let initial = HdzgState {
            humans: 1.0,
            dead: 0.0,
            zombies: 0.0,
            gone: 0.0,
            survival: 0.1,
        };
        let grid = GridSpec::new(0.0, 1_000.0, 11).build().expect("valid grid");
        let p = model.params();

        for method in [Method::Auto, Method::Rosenbrock23] {
            let settings = IntegratorSettings {
                method,
                ..IntegratorSettings::default()
            };
            let trajectory = model
                .simulate(&initial, &grid, &settings)
                .expect("no zombies ever appear");
            for (k, t) in trajectory.times().iter().enumerate() {
                let s: HdzgState = trajectory.decode(k).expect("five compartments").expect("row");
                assert!(s.zombies.abs() < 1e-12, "{method:?} at t = {t}: {}", s.zombies);
                assert_relative_eq!(
                    s.humans,
                    ((p.birth - p.death) * t).exp(),
                    max_relative = 1e-6
                );
            }
        }
    }
}
