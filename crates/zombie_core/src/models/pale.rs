//! Two regions, the Pale and the country outside it, each with humans,
//! infected, zombies and removed, sharing one pool of the gone. Humans and
//! zombies migrate between the regions.
//!
//! Migration is driven by the imbalance between a region's zombies and that
//! same region's humans: zombies leave the Pale at `Zp·Md1·(Zp − Hp)` and
//! enter it at `Z·Md2·(Z − H)`; humans leave the Pale at `Hp·Ma·(Zp − Hp)`
//! and enter it at `H·Mb·(Z − H)`. A negative rate is a flow the other way.

use super::{compartment_name, Compartment, CompartmentModel, Flow, ModelState};
use crate::error::{check_rates, DomainViolation, SimulationError};
use crate::trajectory::GridSpec;
use crate::traits::{DynamicalSystem, Scalar};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PaleParams {
    pub infection: f64,
    pub resurrection: f64,
    /// Bodies burned before they can rise.
    pub cremation: f64,
    pub death: f64,
    /// Infected killed by humans.
    pub infected_killed: f64,
    /// Infected turning into zombies.
    pub turning: f64,
    pub human_leave_pale: f64,
    pub human_enter_pale: f64,
    pub zombie_leave_pale: f64,
    pub zombie_enter_pale: f64,
    /// Zombies destroyed by humans; they leave the system.
    pub zombie_defeat: f64,
    /// Humans killed by zombies outright.
    pub human_killed: f64,
    pub birth: f64,
}

impl Default for PaleParams {
    fn default() -> Self {
        Self {
            infection: 0.1,
            resurrection: 0.002,
            cremation: 0.002,
            death: 0.001,
            infected_killed: 0.025,
            turning: 0.05,
            human_leave_pale: 5e-11,
            human_enter_pale: 5e-10,
            zombie_leave_pale: 5e-6,
            zombie_enter_pale: 5e-11,
            zombie_defeat: 0.05,
            human_killed: 0.0655,
            birth: 0.005,
        }
    }
}

impl PaleParams {
    pub fn validate(&self) -> Result<(), SimulationError> {
        check_rates(&[
            ("infection", self.infection),
            ("resurrection", self.resurrection),
            ("cremation", self.cremation),
            ("death", self.death),
            ("infected_killed", self.infected_killed),
            ("turning", self.turning),
            ("human_leave_pale", self.human_leave_pale),
            ("human_enter_pale", self.human_enter_pale),
            ("zombie_leave_pale", self.zombie_leave_pale),
            ("zombie_enter_pale", self.zombie_enter_pale),
            ("zombie_defeat", self.zombie_defeat),
            ("human_killed", self.human_killed),
            ("birth", self.birth),
        ])
    }
}

model_state! {
    PaleState {
        infected = 0.01,
        pale_infected = 0.01,
        zombies = 100.0,
        pale_zombies = 1400.0,
        removed = 0.0,
        pale_removed = 0.0,
        gone = 0.0,
        humans = 700.0,
        pale_humans = 5000.0,
    }
}

const I: usize = 0;
const IP: usize = 1;
const Z: usize = 2;
const ZP: usize = 3;
const R: usize = 4;
const RP: usize = 5;
const G: usize = 6;
const H: usize = 7;
const HP: usize = 8;

/// One region's compartments, as indices into the state vector.
#[derive(Clone, Copy)]
struct Region {
    infected: usize,
    zombies: usize,
    removed: usize,
    humans: usize,
}

const OUTSIDE: Region = Region {
    infected: I,
    zombies: Z,
    removed: R,
    humans: H,
};

const INSIDE: Region = Region {
    infected: IP,
    zombies: ZP,
    removed: RP,
    humans: HP,
};

#[derive(Debug, Clone)]
pub struct Pale {
    params: PaleParams,
}

impl<T: Scalar> DynamicalSystem<T> for Pale {
    fn dimension(&self) -> usize {
        9
    }

    fn apply(&self, _t: T, x: &[T], out: &mut [T]) -> Result<(), DomainViolation> {
        let p = &self.params;
        let c = T::constant;

        let (h, hp, z, zp) = (x[H], x[HP], x[Z], x[ZP]);
        let zombies_out_of_pale = zp * c(p.zombie_leave_pale) * (zp - hp);
        let zombies_into_pale = z * c(p.zombie_enter_pale) * (z - h);
        let humans_out_of_pale = hp * c(p.human_leave_pale) * (zp - hp);
        let humans_into_pale = h * c(p.human_enter_pale) * (z - h);

        out[G] = T::zero();
        for (region, zombie_inflow, human_inflow) in [
            (
                OUTSIDE,
                zombies_out_of_pale - zombies_into_pale,
                humans_out_of_pale - humans_into_pale,
            ),
            (
                INSIDE,
                zombies_into_pale - zombies_out_of_pale,
                humans_into_pale - humans_out_of_pale,
            ),
        ] {
            let i = x[region.infected];
            let z = x[region.zombies];
            let r = x[region.removed];
            let h = x[region.humans];

            out[region.infected] =
                c(p.infection) * h * z - c(p.infected_killed) * h * i - c(p.turning) * i;
            out[region.zombies] = c(p.turning) * i + zombie_inflow
                - c(p.zombie_defeat) * h * z
                + c(p.resurrection) * r;
            out[region.removed] =
                c(p.death) * h - c(p.resurrection) * r - c(p.cremation) * r * h;
            out[region.humans] = human_inflow + c(p.birth) * h
                - c(p.human_killed) * h * z
                - c(p.infection) * h * z
                - c(p.death) * h;
            out[G] = out[G]
                + c(p.infected_killed) * h * i
                + c(p.cremation) * r * h
                + c(p.human_killed) * h * z;
        }
        Ok(())
    }

    fn component_name(&self, index: usize) -> String {
        compartment_name(Self::COMPARTMENTS, index)
    }
}

impl CompartmentModel for Pale {
    type Params = PaleParams;
    type State = PaleState;

    const NAME: &'static str = "pale";

    const COMPARTMENTS: &'static [Compartment] = &[
        Compartment::population("infected"),
        Compartment::population("pale_infected"),
        Compartment::population("zombies"),
        Compartment::population("pale_zombies"),
        Compartment::population("removed"),
        Compartment::population("pale_removed"),
        Compartment::population("gone"),
        Compartment::population("humans"),
        Compartment::population("pale_humans"),
    ];

    fn new(params: PaleParams) -> Result<Self, SimulationError> {
        params.validate()?;
        Ok(Self { params })
    }

    fn params(&self) -> &PaleParams {
        &self.params
    }

    fn flows(&self, s: &PaleState) -> Vec<Flow> {
        let p = &self.params;
        let x = s.to_vec();
        let mut flows = vec![
            Flow::new(
                "zombies leave pale",
                Some(ZP),
                Some(Z),
                s.pale_zombies * p.zombie_leave_pale * (s.pale_zombies - s.pale_humans),
            ),
            Flow::new(
                "zombies enter pale",
                Some(Z),
                Some(ZP),
                s.zombies * p.zombie_enter_pale * (s.zombies - s.humans),
            ),
            Flow::new(
                "humans leave pale",
                Some(HP),
                Some(H),
                s.pale_humans * p.human_leave_pale * (s.pale_zombies - s.pale_humans),
            ),
            Flow::new(
                "humans enter pale",
                Some(H),
                Some(HP),
                s.humans * p.human_enter_pale * (s.zombies - s.humans),
            ),
        ];
        for region in [OUTSIDE, INSIDE] {
            let (i, z, r, h) = (
                x[region.infected],
                x[region.zombies],
                x[region.removed],
                x[region.humans],
            );
            let infected = Some(region.infected);
            let zombies = Some(region.zombies);
            let removed = Some(region.removed);
            let humans = Some(region.humans);
            flows.extend([
                Flow::new("birth", None, humans, p.birth * h),
                Flow::new("infection", humans, infected, p.infection * h * z),
                Flow::new("death", humans, removed, p.death * h),
                Flow::new("human killed", humans, Some(G), p.human_killed * h * z),
                Flow::new("infected killed", infected, Some(G), p.infected_killed * h * i),
                Flow::new("turning", infected, zombies, p.turning * i),
                Flow::new("zombie defeat", zombies, None, p.zombie_defeat * h * z),
                Flow::new("resurrection", removed, zombies, p.resurrection * r),
                Flow::new("cremation", removed, Some(G), p.cremation * r * h),
            ]);
        }
        flows
    }

    fn default_grid() -> GridSpec {
        GridSpec::new(0.0, 200.0, 20)
    }
}
