//! Humans, a latent infected class, zombies and the removed, with a cure that
//! returns zombies to the human population.

use super::{compartment_name, Compartment, CompartmentModel, Flow};
use crate::error::{check_rates, DomainViolation, SimulationError};
use crate::trajectory::GridSpec;
use crate::traits::{DynamicalSystem, Scalar};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HizrParams {
    /// Constant inflow of newborn humans (not per capita).
    pub birth: f64,
    pub death: f64,
    pub infection: f64,
    pub resurrection: f64,
    pub defeat: f64,
    pub cure: f64,
    /// Rate at which the infected become zombies.
    pub turning: f64,
}

impl Default for HizrParams {
    fn default() -> Self {
        Self {
            birth: 0.0006,
            death: 0.0001,
            infection: 0.0095,
            resurrection: 0.0001,
            defeat: 0.005,
            cure: 0.0001,
            turning: 0.001,
        }
    }
}

impl HizrParams {
    pub fn validate(&self) -> Result<(), SimulationError> {
        check_rates(&[
            ("birth", self.birth),
            ("death", self.death),
            ("infection", self.infection),
            ("resurrection", self.resurrection),
            ("defeat", self.defeat),
            ("cure", self.cure),
            ("turning", self.turning),
        ])
    }
}

model_state! {
    HizrState {
        humans = 500.0,
        infected = 0.0,
        zombies = 100.0,
        removed = 0.0,
    }
}

const HUMANS: usize = 0;
const INFECTED: usize = 1;
const ZOMBIES: usize = 2;
const REMOVED: usize = 3;

#[derive(Debug, Clone)]
pub struct Hizr {
    params: HizrParams,
}

impl<T: Scalar> DynamicalSystem<T> for Hizr {
    fn dimension(&self) -> usize {
        4
    }

    fn apply(&self, _t: T, x: &[T], out: &mut [T]) -> Result<(), DomainViolation> {
        let p = &self.params;
        let (h, i, z, r) = (x[HUMANS], x[INFECTED], x[ZOMBIES], x[REMOVED]);
        let birth = T::constant(p.birth);
        let death = T::constant(p.death);
        let infection = T::constant(p.infection);
        let resurrection = T::constant(p.resurrection);
        let defeat = T::constant(p.defeat);
        let cure = T::constant(p.cure);
        let turning = T::constant(p.turning);

        out[HUMANS] = birth + cure * z - death * h - infection * h * z;
        out[INFECTED] = infection * h * z - death * i - turning * i;
        out[ZOMBIES] = turning * i + resurrection * r - defeat * h * z - cure * z;
        out[REMOVED] = death * h + death * i + defeat * h * z - resurrection * r;
        Ok(())
    }

    fn component_name(&self, index: usize) -> String {
        compartment_name(Self::COMPARTMENTS, index)
    }
}

impl CompartmentModel for Hizr {
    type Params = HizrParams;
    type State = HizrState;

    const NAME: &'static str = "hizr";

    const COMPARTMENTS: &'static [Compartment] = &[
        Compartment::population("humans"),
        Compartment::population("infected"),
        Compartment::population("zombies"),
        Compartment::population("removed"),
    ];

    fn new(params: HizrParams) -> Result<Self, SimulationError> {
        params.validate()?;
        Ok(Self { params })
    }

    fn params(&self) -> &HizrParams {
        &self.params
    }

    fn flows(&self, s: &HizrState) -> Vec<Flow> {
        let p = &self.params;
        let encounters = s.humans * s.zombies;
        vec![
            Flow::new("birth", None, Some(HUMANS), p.birth),
            Flow::new("cure", Some(ZOMBIES), Some(HUMANS), p.cure * s.zombies),
            Flow::new("death", Some(HUMANS), Some(REMOVED), p.death * s.humans),
            Flow::new(
                "infection",
                Some(HUMANS),
                Some(INFECTED),
                p.infection * encounters,
            ),
            Flow::new(
                "infected death",
                Some(INFECTED),
                Some(REMOVED),
                p.death * s.infected,
            ),
            Flow::new("turning", Some(INFECTED), Some(ZOMBIES), p.turning * s.infected),
            Flow::new(
                "resurrection",
                Some(REMOVED),
                Some(ZOMBIES),
                p.resurrection * s.removed,
            ),
            Flow::new("defeat", Some(ZOMBIES), Some(REMOVED), p.defeat * encounters),
        ]
    }

    fn default_grid() -> GridSpec {
        GridSpec::new(0.0, 1e6, 100)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::integrate::IntegratorSettings;
    use crate::models::testing::{assert_flows_balance, population_derivative};
    use crate::models::ModelState;
    use approx::assert_relative_eq;

    fn published() -> Hizr {
        Hizr::new(HizrParams::default()).expect("published parameters are valid")
    }

    #[test]
    fn births_are_a_constant_inflow() {
        let model = published();
        let empty = HizrState {
            humans: 0.0,
            infected: 0.0,
            zombies: 0.0,
            removed: 0.0,
        };
        let d = model.derivative(&empty).expect("evaluates");
        assert_eq!(d.to_vec(), vec![0.0006, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn derivative_at_published_start() {
        let model = published();
        let d = model.derivative(&HizrState::default()).expect("evaluates");
        // 500 humans meeting 100 zombies.
        assert_relative_eq!(d.humans, 0.0006 + 0.01 - 0.05 - 475.0, max_relative = 1e-12);
        assert_relative_eq!(d.infected, 475.0, max_relative = 1e-12);
        assert_relative_eq!(d.zombies, -250.0 - 0.01, max_relative = 1e-12);
        assert_relative_eq!(d.removed, 0.05 + 250.0, max_relative = 1e-12);
    }

    #[test]
    fn flows_balance_and_total_grows_by_constant_births() {
        let model = published();
        let state = HizrState {
            humans: 120.0,
            infected: 33.0,
            zombies: 260.0,
            removed: 75.0,
        };
        assert_flows_balance(&model, &state);
        assert_relative_eq!(
            population_derivative(&model, &state),
            model.params().birth,
            max_relative = 1e-6
        );
    }

    #[test]
    fn cure_alone_moves_zombies_back_to_humans() {
        let model = Hizr::new(HizrParams {
            birth: 0.0,
            death: 0.0,
            infection: 0.0,
            resurrection: 0.0,
            defeat: 0.0,
            cure: 0.5,
            turning: 0.0,
        })
        .expect("valid");
        let d = model
            .derivative(&HizrState {
                humans: 10.0,
                infected: 0.0,
                zombies: 4.0,
                removed: 0.0,
            })
            .expect("evaluates");
        assert_eq!(d.humans, 2.0);
        assert_eq!(d.zombies, -2.0);
    }

    #[test]
    fn published_run_conserves_population_plus_births() {
        let model = published();
        let grid = Hizr::default_grid().build().expect("valid grid");
        let initial = HizrState::default();
        let trajectory = model
            .simulate(&initial, &grid, &IntegratorSettings::default())
            .expect("integrates");
        let start: f64 = initial.to_vec().iter().sum();
        for (t, row) in trajectory.times().iter().zip(trajectory.states()) {
            let total: f64 = row.iter().sum();
            assert_relative_eq!(total, start + model.params().birth * t, max_relative = 1e-6);
        }
    }
}
