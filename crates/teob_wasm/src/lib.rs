//! WASM bridge for the waveform generator.
//!
//! Parameters come in as a plain JS object with the same keys as the parfile; missing
//! keys take their defaults. Errors are returned as strings prefixed by the status code.

use js_sys::Float64Array;
use serde::Serialize;
use serde_wasm_bindgen::{from_value, to_value};
use teob_core::config::{Domain, InputParameters};
use teob_core::driver::{self, status_of, RunOutput};
use teob_core::waveform::LMAX;
use wasm_bindgen::prelude::*;

fn run_error(err: &anyhow::Error) -> JsValue {
    let (code, message) = status_of(err);
    JsValue::from_str(&format!("[{code}] {message}"))
}

fn parse_input(input: JsValue) -> Result<InputParameters, JsValue> {
    if input.is_undefined() || input.is_null() {
        return Ok(InputParameters::default());
    }
    from_value(input).map_err(|e| JsValue::from_str(&format!("Invalid parameters: {}", e)))
}

/// Summary returned alongside the waveform arrays.
#[derive(Debug, Serialize)]
struct RunSummary<'a> {
    status: i32,
    domain: Domain,
    samples: usize,
    termination: &'static str,
    light_ring: Option<f64>,
    lso: Option<f64>,
    nu: f64,
    remnant: Option<teob_core::params::Remnant>,
    parfile: &'a str,
}

/// Result of one waveform run, exposed as typed arrays.
#[wasm_bindgen]
pub struct WasmRun {
    output: RunOutput,
    parfile: String,
}

#[wasm_bindgen]
impl WasmRun {
    #[wasm_bindgen(constructor)]
    pub fn new(input: JsValue) -> Result<WasmRun, JsValue> {
        console_error_panic_hook::set_once();
        let input = parse_input(input)?;
        let output = driver::run(&input).map_err(|e| run_error(&e))?;
        let parfile = output.parameters.to_parfile();
        Ok(WasmRun { output, parfile })
    }

    #[wasm_bindgen(getter)]
    pub fn frequency_domain(&self) -> bool {
        self.output.domain == Domain::Frequency
    }

    /// Time in s (or M), or frequency in Hz (or 1/M).
    #[wasm_bindgen(getter)]
    pub fn abscissa(&self) -> Float64Array {
        Float64Array::from(self.output.time_or_freq.as_slice())
    }

    #[wasm_bindgen(getter)]
    pub fn hplus(&self) -> Float64Array {
        Float64Array::from(self.output.hplus.as_slice())
    }

    #[wasm_bindgen(getter)]
    pub fn hcross(&self) -> Float64Array {
        Float64Array::from(self.output.hcross.as_slice())
    }

    /// Imaginary part of h̃+; empty in the time domain.
    #[wasm_bindgen(getter)]
    pub fn hplus_im(&self) -> Float64Array {
        Float64Array::from(self.output.hplus_im.as_slice())
    }

    #[wasm_bindgen(getter)]
    pub fn hcross_im(&self) -> Float64Array {
        Float64Array::from(self.output.hcross_im.as_slice())
    }

    /// Amplitude and phase of multipole (l, m), concatenated; empty when not requested.
    pub fn multipole(&self, l: usize, m: usize) -> Result<Float64Array, JsValue> {
        let Some(hlm) = &self.output.multipoles else {
            return Ok(Float64Array::new_with_length(0));
        };
        if !(2..=LMAX).contains(&l) || m == 0 || m > l {
            return Err(JsValue::from_str(&format!("No multipole ({l}, {m}).")));
        }
        let mode = hlm
            .mode_lm(l, m)
            .ok_or_else(|| JsValue::from_str(&format!("Multipole ({l}, {m}) was not computed.")))?;
        let mut packed = Vec::with_capacity(2 * mode.amp.len());
        packed.extend_from_slice(&mode.amp);
        packed.extend_from_slice(&mode.phase);
        Ok(Float64Array::from(packed.as_slice()))
    }

    /// Run summary as a plain object.
    pub fn summary(&self) -> Result<JsValue, JsValue> {
        let params = &self.output.parameters;
        let summary = RunSummary {
            status: self.output.status,
            domain: self.output.domain,
            samples: self.output.time_or_freq.len(),
            termination: self.output.termination.reason(),
            light_ring: self.output.light_ring,
            lso: self.output.lso,
            nu: params.nu,
            remnant: params.remnant,
            parfile: &self.parfile,
        };
        to_value(&summary).map_err(|e| JsValue::from_str(&format!("Serialization error: {}", e)))
    }

    /// Full dynamics, when requested, as a plain object.
    pub fn dynamics(&self) -> Result<JsValue, JsValue> {
        to_value(&self.output.dynamics).map_err(|e| JsValue::from_str(&format!("Serialization error: {}", e)))
    }
}

/// One-shot run returning the whole output as a plain object.
#[wasm_bindgen]
pub fn run_waveform(input: JsValue) -> Result<JsValue, JsValue> {
    console_error_panic_hook::set_once();
    let input = parse_input(input)?;
    let output = driver::run(&input).map_err(|e| run_error(&e))?;
    to_value(&output).map_err(|e| JsValue::from_str(&format!("Serialization error: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use wasm_bindgen_test::wasm_bindgen_test;

    #[wasm_bindgen_test]
    fn invalid_mass_ratio_reports_its_status() {
        let input = InputParameters {
            q: -2.0,
            ..InputParameters::default()
        };
        let err = driver::run(&input).expect_err("negative mass ratio");
        let message = run_error(&err).as_string().expect("string error");
        assert!(message.starts_with("[1]"), "{message}");
    }

    #[wasm_bindgen_test]
    fn missing_input_takes_the_defaults() {
        let input = parse_input(JsValue::UNDEFINED).expect("defaults");
        assert_eq!(input.q, InputParameters::default().q);
    }
}
