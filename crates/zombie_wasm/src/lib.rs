//! Browser bindings for `zombie_core`.
//!
//! Configurations arrive as plain JS objects and may be partial; anything
//! missing falls back to the model's published scenario.

pub mod runner;

use js_sys::Array;
use serde_wasm_bindgen::{to_value, Deserializer};
use wasm_bindgen::prelude::*;

fn present(value: JsValue) -> Option<Deserializer> {
    (!value.is_undefined() && !value.is_null()).then(|| Deserializer::from(value))
}

fn to_js_error(err: anyhow::Error) -> JsValue {
    JsValue::from_str(&format!("{err:#}"))
}

/// Runs `model` ("hzr", "hizr", "hdzg" or "pale") with an optional partial
/// `{ params, initial, grid, settings }` object.
#[wasm_bindgen(js_name = runScenario)]
pub fn run_scenario(model: &str, config: JsValue) -> Result<JsValue, JsValue> {
    console_error_panic_hook::set_once();
    let output = runner::run_scenario(model, present(config)).map_err(to_js_error)?;
    to_value(&output).map_err(|e| JsValue::from_str(&format!("Serialization error: {}", e)))
}

#[wasm_bindgen(js_name = defaultScenario)]
pub fn default_scenario(model: &str) -> Result<JsValue, JsValue> {
    let scenario = runner::default_scenario(model).map_err(to_js_error)?;
    to_value(&scenario).map_err(|e| JsValue::from_str(&format!("Serialization error: {}", e)))
}

#[wasm_bindgen(js_name = compartmentNames)]
pub fn compartment_names(model: &str) -> Result<Array, JsValue> {
    let names = runner::compartment_names(model).map_err(to_js_error)?;
    Ok(names.into_iter().map(JsValue::from_str).collect())
}

#[wasm_bindgen(js_name = derivativeAt)]
pub fn derivative_at(model: &str, params: JsValue, state: JsValue) -> Result<Vec<f64>, JsValue> {
    runner::derivative_at(model, present(params), present(state)).map_err(to_js_error)
}

#[cfg(all(test, target_arch = "wasm32"))]
mod tests {
    use super::*;
    use wasm_bindgen_test::wasm_bindgen_test;

    #[wasm_bindgen_test]
    fn compartment_names_cross_the_boundary() {
        let names = compartment_names("hdzg").expect("known model");
        assert_eq!(names.length(), 5);
        assert_eq!(names.get(4).as_string().as_deref(), Some("survival"));
    }

    #[wasm_bindgen_test]
    fn unknown_model_becomes_js_error() {
        let err = run_scenario("sir", JsValue::UNDEFINED).expect_err("unknown model");
        let message = err.as_string().expect("string error");
        assert!(message.contains("unknown model"));
    }

    #[wasm_bindgen_test]
    fn undefined_arguments_use_published_values() {
        let rates = derivative_at("hzr", JsValue::UNDEFINED, JsValue::NULL).expect("evaluates");
        assert_eq!(rates.len(), 3);
        assert!(rates.iter().all(|r| r.is_finite()));
    }
}
