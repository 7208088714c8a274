//! Humans, zombies and the removed.

use super::{compartment_name, Compartment, CompartmentModel, Flow};
use crate::error::{check_rates, DomainViolation, SimulationError};
use crate::trajectory::GridSpec;
use crate::traits::{DynamicalSystem, Scalar};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HzrParams {
    /// Per-capita human birth rate.
    pub birth: f64,
    /// Natural human death rate.
    pub death: f64,
    /// Zombie-human encounters that turn the human.
    pub infection: f64,
    /// Removed rising as zombies.
    pub resurrection: f64,
    /// Zombie-human encounters that destroy the zombie.
    pub defeat: f64,
}

impl Default for HzrParams {
    fn default() -> Self {
        Self {
            birth: 0.0006,
            death: 0.0001,
            infection: 0.0095,
            resurrection: 1e-6,
            defeat: 0.0095,
        }
    }
}

impl HzrParams {
    pub fn validate(&self) -> Result<(), SimulationError> {
        check_rates(&[
            ("birth", self.birth),
            ("death", self.death),
            ("infection", self.infection),
            ("resurrection", self.resurrection),
            ("defeat", self.defeat),
        ])
    }
}

model_state! {
    HzrState {
        humans = 500.0,
        zombies = 1e-4,
        removed = 0.0,
    }
}

const HUMANS: usize = 0;
const ZOMBIES: usize = 1;
const REMOVED: usize = 2;

#[derive(Debug, Clone)]
pub struct Hzr {
    params: HzrParams,
}

impl<T: Scalar> DynamicalSystem<T> for Hzr {
    fn dimension(&self) -> usize {
        3
    }

    fn apply(&self, _t: T, x: &[T], out: &mut [T]) -> Result<(), DomainViolation> {
        let p = &self.params;
        let (h, z, r) = (x[HUMANS], x[ZOMBIES], x[REMOVED]);
        let birth = T::constant(p.birth);
        let death = T::constant(p.death);
        let infection = T::constant(p.infection);
        let resurrection = T::constant(p.resurrection);
        let defeat = T::constant(p.defeat);

        out[HUMANS] = birth * h - death * h - infection * h * z;
        out[ZOMBIES] = infection * h * z + resurrection * r - defeat * h * z;
        out[REMOVED] = death * h + defeat * h * z - resurrection * r;
        Ok(())
    }

    fn component_name(&self, index: usize) -> String {
        compartment_name(Self::COMPARTMENTS, index)
    }
}

impl CompartmentModel for Hzr {
    type Params = HzrParams;
    type State = HzrState;

    const NAME: &'static str = "hzr";

    const COMPARTMENTS: &'static [Compartment] = &[
        Compartment::population("humans"),
        Compartment::population("zombies"),
        Compartment::population("removed"),
    ];

    fn new(params: HzrParams) -> Result<Self, SimulationError> {
        params.validate()?;
        Ok(Self { params })
    }

    fn params(&self) -> &HzrParams {
        &self.params
    }

    fn flows(&self, s: &HzrState) -> Vec<Flow> {
        let p = &self.params;
        vec![
            Flow::new("birth", None, Some(HUMANS), p.birth * s.humans),
            Flow::new("death", Some(HUMANS), Some(REMOVED), p.death * s.humans),
            Flow::new(
                "infection",
                Some(HUMANS),
                Some(ZOMBIES),
                p.infection * s.humans * s.zombies,
            ),
            Flow::new(
                "defeat",
                Some(ZOMBIES),
                Some(REMOVED),
                p.defeat * s.humans * s.zombies,
            ),
            Flow::new(
                "resurrection",
                Some(REMOVED),
                Some(ZOMBIES),
                p.resurrection * s.removed,
            ),
        ]
    }

    fn default_grid() -> GridSpec {
        GridSpec::new(0.0, 10_000.0, 100)
    }
}
