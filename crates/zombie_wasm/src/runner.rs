//! Native side of the bridge: parses partial configurations, dispatches on the
//! model name and shapes results for plotting.

use anyhow::{anyhow, Context};
use serde::{Deserialize, Deserializer, Serialize};
use zombie_core::models::{CompartmentModel, Hdzg, Hizr, Hzr, ModelState, Pale};
use zombie_core::{GridSpec, IntegrationStats, IntegratorSettings, ModelKind, Scenario};

/// A run request for model `M`. Every field is optional and falls back to the
/// published scenario and default solver settings.
#[derive(Debug, Deserialize)]
#[serde(bound = "", default, deny_unknown_fields)]
pub struct RunConfig<M: CompartmentModel> {
    pub params: M::Params,
    pub initial: M::State,
    pub grid: GridSpec,
    pub settings: IntegratorSettings,
}

impl<M: CompartmentModel> Default for RunConfig<M> {
    fn default() -> Self {
        let scenario = Scenario::<M>::default();
        Self {
            params: scenario.params,
            initial: scenario.initial,
            grid: scenario.grid,
            settings: IntegratorSettings::default(),
        }
    }
}

impl<M: CompartmentModel> RunConfig<M> {
    fn into_parts(self) -> (Scenario<M>, IntegratorSettings) {
        let scenario = Scenario {
            params: self.params,
            initial: self.initial,
            grid: self.grid,
        };
        (scenario, self.settings)
    }
}

/// Trajectory laid out one series per compartment.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunOutput {
    pub model: ModelKind,
    pub compartments: Vec<String>,
    pub times: Vec<f64>,
    pub series: Vec<Vec<f64>>,
    pub stats: IntegrationStats,
}

/// Published scenario of any model, for pre-filling a form.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum DefaultScenario {
    Hzr(Scenario<Hzr>),
    Hizr(Scenario<Hizr>),
    Hdzg(Scenario<Hdzg>),
    Pale(Scenario<Pale>),
}

pub fn parse_model(name: &str) -> anyhow::Result<ModelKind> {
    Ok(name.parse::<ModelKind>()?)
}

pub fn run_scenario<'de, D>(model: &str, config: Option<D>) -> anyhow::Result<RunOutput>
where
    D: Deserializer<'de>,
{
    let kind = parse_model(model)?;
    match kind {
        ModelKind::Hzr => run_model::<Hzr, D>(kind, config),
        ModelKind::Hizr => run_model::<Hizr, D>(kind, config),
        ModelKind::Hdzg => run_model::<Hdzg, D>(kind, config),
        ModelKind::Pale => run_model::<Pale, D>(kind, config),
    }
}

fn run_model<'de, M, D>(kind: ModelKind, config: Option<D>) -> anyhow::Result<RunOutput>
where
    M: CompartmentModel,
    D: Deserializer<'de>,
{
    let config: RunConfig<M> = match config {
        Some(raw) => RunConfig::deserialize(raw)
            .map_err(|err| anyhow!("invalid {kind} configuration: {err}"))?,
        None => RunConfig::default(),
    };
    let (scenario, settings) = config.into_parts();
    let trajectory = scenario
        .run(&settings)
        .with_context(|| format!("{kind} scenario failed"))?;

    let series = (0..trajectory.compartments().len())
        .filter_map(|i| trajectory.column(i))
        .collect();
    Ok(RunOutput {
        model: kind,
        compartments: trajectory.compartments().to_vec(),
        times: trajectory.times().to_vec(),
        series,
        stats: trajectory.stats().clone(),
    })
}

pub fn default_scenario(model: &str) -> anyhow::Result<DefaultScenario> {
    Ok(match parse_model(model)? {
        ModelKind::Hzr => DefaultScenario::Hzr(Scenario::default()),
        ModelKind::Hizr => DefaultScenario::Hizr(Scenario::default()),
        ModelKind::Hdzg => DefaultScenario::Hdzg(Scenario::default()),
        ModelKind::Pale => DefaultScenario::Pale(Scenario::default()),
    })
}

pub fn compartment_names(model: &str) -> anyhow::Result<Vec<&'static str>> {
    let kind = parse_model(model)?;
    Ok(kind.compartments().iter().map(|c| c.name).collect())
}

/// Derivative of `model` at `state`, both partial objects over the published
/// defaults. Returned in state-vector order.
pub fn derivative_at<'de, D>(
    model: &str,
    params: Option<D>,
    state: Option<D>,
) -> anyhow::Result<Vec<f64>>
where
    D: Deserializer<'de>,
{
    let kind = parse_model(model)?;
    match kind {
        ModelKind::Hzr => derivative_of::<Hzr, D>(kind, params, state),
        ModelKind::Hizr => derivative_of::<Hizr, D>(kind, params, state),
        ModelKind::Hdzg => derivative_of::<Hdzg, D>(kind, params, state),
        ModelKind::Pale => derivative_of::<Pale, D>(kind, params, state),
    }
}

fn derivative_of<'de, M, D>(
    kind: ModelKind,
    params: Option<D>,
    state: Option<D>,
) -> anyhow::Result<Vec<f64>>
where
    M: CompartmentModel,
    D: Deserializer<'de>,
{
    let params = decode_or_default::<M::Params, D>(params)
        .map_err(|err| anyhow!("invalid {kind} parameters: {err}"))?;
    let state = decode_or_default::<M::State, D>(state)
        .map_err(|err| anyhow!("invalid {kind} state: {err}"))?;
    let model = M::new(params).with_context(|| format!("invalid {kind} parameters"))?;
    let rates = model
        .derivative(&state)
        .with_context(|| format!("{kind} derivative failed"))?;
    Ok(rates.to_vec())
}

fn decode_or_default<'de, T, D>(raw: Option<D>) -> Result<T, D::Error>
where
    T: Deserialize<'de> + Default,
    D: Deserializer<'de>,
{
    raw.map_or_else(|| Ok(T::default()), T::deserialize)
}
