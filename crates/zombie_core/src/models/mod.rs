//! The compartment models: each is a parameter set plus a vector field over a
//! fixed, named ordering of compartments.

/// Declares a named-field state struct, its published default and its
/// [`ModelState`] mapping. Field order is state-vector order.
macro_rules! model_state {
    ($(#[$meta:meta])* $name:ident { $($(#[$field_meta:meta])* $field:ident = $default:expr),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
        #[serde(default)]
        pub struct $name {
            $($(#[$field_meta])* pub $field: f64,)+
        }

        impl Default for $name {
            fn default() -> Self {
                Self {
                    $($field: $default,)+
                }
            }
        }

        impl $crate::models::ModelState for $name {
            const LEN: usize = [$(stringify!($field)),+].len();

            fn to_vec(&self) -> Vec<f64> {
                vec![$(self.$field),+]
            }

            fn from_slice(values: &[f64]) -> Result<Self, $crate::error::SimulationError> {
                let [$($field),+] = values else {
                    return Err($crate::error::SimulationError::DimensionMismatch {
                        expected: Self::LEN,
                        actual: values.len(),
                    });
                };
                Ok(Self {
                    $($field: *$field,)+
                })
            }
        }
    };
}

mod hdzg;
mod hizr;
mod hzr;
mod pale;

pub use hdzg::{per_day, Hdzg, HdzgParams, HdzgState, DAYS_PER_YEAR};
pub use hizr::{Hizr, HizrParams, HizrState};
pub use hzr::{Hzr, HzrParams, HzrState};
pub use pale::{Pale, PaleParams, PaleState};

use crate::autodiff::Dual;
use crate::error::SimulationError;
use crate::integrate::{integrate, IntegratorSettings};
use crate::trajectory::{GridSpec, TimeGrid, Trajectory};
use crate::traits::DynamicalSystem;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CompartmentKind {
    /// A head count; conserved by the model's flows.
    Population,
    /// A dimensionless rate carried in the state vector.
    Rate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Compartment {
    pub name: &'static str,
    pub kind: CompartmentKind,
}

impl Compartment {
    pub const fn population(name: &'static str) -> Self {
        Self {
            name,
            kind: CompartmentKind::Population,
        }
    }

    pub const fn rate(name: &'static str) -> Self {
        Self {
            name,
            kind: CompartmentKind::Rate,
        }
    }
}

/// A named-field state that maps to and from the integrator's flat vector.
pub trait ModelState: Sized {
    const LEN: usize;

    fn to_vec(&self) -> Vec<f64>;

    fn from_slice(values: &[f64]) -> Result<Self, SimulationError>;
}

/// Transfer between two compartments at the current state. `None` on either
/// end is outside the system (births, permanent removal).
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Flow {
    pub label: &'static str,
    pub from: Option<usize>,
    pub to: Option<usize>,
    pub rate: f64,
}

impl Flow {
    pub const fn new(label: &'static str, from: Option<usize>, to: Option<usize>, rate: f64) -> Self {
        Self {
            label,
            from,
            to,
            rate,
        }
    }
}

/// Inflow minus outflow per compartment.
pub fn net_flows(flows: &[Flow], dimension: usize) -> Vec<f64> {
    let mut net = vec![0.0; dimension];
    for flow in flows {
        if let Some(from) = flow.from {
            net[from] -= flow.rate;
        }
        if let Some(to) = flow.to {
            net[to] += flow.rate;
        }
    }
    net
}

pub trait CompartmentModel: DynamicalSystem<f64> + DynamicalSystem<Dual> + Sized {
    type Params: Debug + Clone + Default + Serialize + DeserializeOwned;
    type State: ModelState + Debug + Clone + Default + Serialize + DeserializeOwned;

    /// Short lowercase identifier, as accepted by [`ModelKind`](crate::scenario::ModelKind).
    const NAME: &'static str;

    /// Compartments in state-vector order.
    const COMPARTMENTS: &'static [Compartment];

    /// Validates `params` and builds the model.
    fn new(params: Self::Params) -> Result<Self, SimulationError>;

    fn params(&self) -> &Self::Params;

    /// Every transfer the equations describe. The derivative of each
    /// `Population` compartment is the sum of its inflows minus its outflows.
    fn flows(&self, state: &Self::State) -> Vec<Flow>;

    /// The output grid the published scenario uses.
    fn default_grid() -> GridSpec;

    fn simulate(
        &self,
        initial: &Self::State,
        grid: &TimeGrid,
        settings: &IntegratorSettings,
    ) -> Result<Trajectory, SimulationError> {
        integrate(self, &initial.to_vec(), grid, settings)
    }

    /// Evaluates the derivative at a named state.
    fn derivative(&self, state: &Self::State) -> Result<Self::State, SimulationError> {
        let x = state.to_vec();
        let mut dx = vec![0.0; x.len()];
        DynamicalSystem::<f64>::apply(self, 0.0, &x, &mut dx).map_err(|violation| {
            SimulationError::DomainViolation {
                compartment: compartment_name(Self::COMPARTMENTS, violation.index),
                value: violation.value,
                time: 0.0,
            }
        })?;
        Self::State::from_slice(&dx)
    }
}

pub(crate) fn compartment_name(compartments: &[Compartment], index: usize) -> String {
    compartments
        .get(index)
        .map_or_else(|| format!("x{index}"), |c| c.name.to_string())
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn net_flows_ignore_the_outside() {
        let flows = [
            Flow::new("birth", None, Some(0), 2.0),
            Flow::new("move", Some(0), Some(1), 0.5),
            Flow::new("loss", Some(1), None, 0.25),
        ];
        assert_eq!(net_flows(&flows, 2), vec![1.5, 0.25]);
    }

    #[test]
    fn states_reject_wrong_length() {
        let err = HzrState::from_slice(&[1.0, 2.0]).expect_err("too short");
        assert_eq!(
            err,
            SimulationError::DimensionMismatch {
                expected: 3,
                actual: 2
            }
        );
        let state = HzrState::from_slice(&[1.0, 2.0, 3.0]).expect("right length");
        assert_eq!(state.to_vec(), vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn compartment_tables_match_state_length() {
        assert_eq!(Hzr::COMPARTMENTS.len(), HzrState::LEN);
        assert_eq!(Hizr::COMPARTMENTS.len(), HizrState::LEN);
        assert_eq!(Hdzg::COMPARTMENTS.len(), HdzgState::LEN);
        assert_eq!(Pale::COMPARTMENTS.len(), PaleState::LEN);
    }

    #[test]
    fn unknown_index_falls_back_to_positional_name() {
        assert_eq!(compartment_name(Hzr::COMPARTMENTS, 1), "zombies");
        assert_eq!(compartment_name(Hzr::COMPARTMENTS, 7), "x7");
    }
}
