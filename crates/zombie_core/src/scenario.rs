//! Complete, serializable run descriptions: parameters, initial state and
//! output grid for one model.

use crate::error::SimulationError;
use crate::integrate::IntegratorSettings;
use crate::models::{Compartment, CompartmentModel, Hdzg, Hizr, Hzr, Pale};
use crate::trajectory::{GridSpec, Trajectory};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    Hzr,
    Hizr,
    Hdzg,
    Pale,
}

impl ModelKind {
    pub const ALL: [ModelKind; 4] = [Self::Hzr, Self::Hizr, Self::Hdzg, Self::Pale];

    pub fn name(self) -> &'static str {
        match self {
            Self::Hzr => Hzr::NAME,
            Self::Hizr => Hizr::NAME,
            Self::Hdzg => Hdzg::NAME,
            Self::Pale => Pale::NAME,
        }
    }

    pub fn compartments(self) -> &'static [Compartment] {
        match self {
            Self::Hzr => Hzr::COMPARTMENTS,
            Self::Hizr => Hizr::COMPARTMENTS,
            Self::Hdzg => Hdzg::COMPARTMENTS,
            Self::Pale => Pale::COMPARTMENTS,
        }
    }
}

impl FromStr for ModelKind {
    type Err = SimulationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Self::ALL
            .into_iter()
            .find(|kind| kind.name().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| SimulationError::UnknownModel {
                name: s.to_string(),
            })
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Everything needed to reproduce one run of model `M`. Missing fields
/// deserialize to the published scenario.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound = "", default)]
pub struct Scenario<M: CompartmentModel> {
    pub params: M::Params,
    pub initial: M::State,
    pub grid: GridSpec,
}

impl<M: CompartmentModel> Default for Scenario<M> {
    fn default() -> Self {
        Self {
            params: M::Params::default(),
            initial: M::State::default(),
            grid: M::default_grid(),
        }
    }
}

impl<M: CompartmentModel> Scenario<M> {
    /// Validates the scenario and integrates it.
    pub fn run(&self, settings: &IntegratorSettings) -> Result<Trajectory, SimulationError> {
        let model = M::new(self.params.clone())?;
        let grid = self.grid.build()?;
        log::debug!(
            "{} scenario over [{}, {}] with {} samples",
            M::NAME,
            self.grid.start,
            self.grid.end,
            self.grid.samples
        );
        model.simulate(&self.initial, &grid, settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::models::{HdzgState, HzrParams, HzrState, ModelState};
    use approx::assert_relative_eq;

    #[test]
    fn model_kind_parses_case_insensitively() {
        assert_eq!("hzr".parse::<ModelKind>(), Ok(ModelKind::Hzr));
        assert_eq!(" Pale ".parse::<ModelKind>(), Ok(ModelKind::Pale));
        for kind in ModelKind::ALL {
            assert_eq!(kind.to_string().parse::<ModelKind>(), Ok(kind));
        }
        let err = "sir".parse::<ModelKind>().expect_err("not a model");
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert!(err.to_string().contains("sir"));
    }

    #[test]
    fn compartment_tables_are_exposed_per_kind() {
        let names: Vec<_> = ModelKind::Hdzg.compartments().iter().map(|c| c.name).collect();
        assert_eq!(names, ["humans", "dead", "zombies", "gone", "survival"]);
        assert_eq!(ModelKind::Pale.compartments().len(), 9);
    }

    #[test]
    fn invalid_scenarios_fail_before_integrating() {
        let negative = Scenario::<Hzr> {
            params: HzrParams {
                infection: f64::NAN,
                ..HzrParams::default()
            },
            ..Scenario::default()
        };
        let err = negative
            .run(&IntegratorSettings::default())
            .expect_err("NaN rate");
        assert!(matches!(err, SimulationError::InvalidParameter { name: "infection", .. }));

        let empty_grid = Scenario::<Hzr> {
            grid: GridSpec::new(0.0, 10.0, 0),
            ..Scenario::default()
        };
        let err = empty_grid
            .run(&IntegratorSettings::default())
            .expect_err("no samples");
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn splitting_a_run_matches_one_run() {
        let settings = IntegratorSettings::default();
        let whole = Scenario::<Hzr> {
            grid: GridSpec::new(0.0, 2_000.0, 2),
            ..Scenario::default()
        }
        .run(&settings)
        .expect("integrates");

        let first = Scenario::<Hzr> {
            grid: GridSpec::new(0.0, 1_000.0, 2),
            ..Scenario::default()
        }
        .run(&settings)
        .expect("integrates");
        let midpoint: HzrState = first.decode(1).expect("three compartments").expect("row");
        let second = Scenario::<Hzr> {
            initial: midpoint,
            grid: GridSpec::new(1_000.0, 2_000.0, 2),
            ..Scenario::default()
        }
        .run(&settings)
        .expect("integrates");

        let direct = whole.final_state().expect("non-empty");
        let split = second.final_state().expect("non-empty");
        for (a, b) in direct.iter().zip(split) {
            assert_relative_eq!(a, b, epsilon = 1e-6, max_relative = 1e-5);
        }
    }

    #[test]
    fn single_sample_grid_returns_the_initial_state() {
        let scenario = Scenario::<Hzr> {
            grid: GridSpec::new(5.0, 5.0, 1),
            ..Scenario::default()
        };
        let trajectory = scenario.run(&IntegratorSettings::default()).expect("integrates");
        assert_eq!(trajectory.times(), &[5.0]);
        assert_eq!(trajectory.state(0), Some(&HzrState::default().to_vec()[..]));
        assert_eq!(trajectory.stats().accepted_steps, 0);
    }

    #[test]
    fn published_hdzg_outbreak_burns_out() {
        let scenario = Scenario::<Hdzg>::default();
        assert_eq!(scenario.initial, HdzgState::default());
        let trajectory = scenario
            .run(&IntegratorSettings::default())
            .expect("published outbreak integrates");

        assert_eq!(trajectory.len(), 10_000);
        assert!(trajectory.states().iter().flatten().all(|v| v.is_finite()));
        let zombies = trajectory.column_by_name("zombies").expect("zombies column");
        assert!(zombies.iter().all(|z| *z >= 0.0));

        let last: HdzgState = trajectory
            .decode(trajectory.len() - 1)
            .expect("five compartments")
            .expect("row");
        assert!(last.humans > 10.0, "humans {}", last.humans);
        assert!(last.gone > last.humans);
        assert!(last.zombies > 0.0 && last.zombies < 1e-2, "zombies {}", last.zombies);
        assert!(last.survival > 0.0 && last.survival < 1.0);
    }
}
