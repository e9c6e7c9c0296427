//! User-facing options.
//!
//! Every knob is a flat key with a default; unknown keys are ignored so parameter files
//! written for newer versions still load. Selectors are enums with the legacy spellings
//! accepted as aliases.

use crate::error::EobError;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    #[serde(alias = "TD", alias = "td", alias = "0")]
    Time,
    #[serde(alias = "FD", alias = "fd", alias = "1")]
    Frequency,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OdeTimestep {
    Adaptive,
    Uniform,
    #[serde(alias = "adaptive+uniform_after_LSO")]
    AdaptiveUniformAfterLso,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CentrifugalRadius {
    #[serde(alias = "LO")]
    Lo,
    #[serde(alias = "NLO")]
    Nlo,
    #[serde(alias = "NNLO")]
    Nnlo,
    #[serde(alias = "NNLOS4")]
    NnloS4,
    #[serde(alias = "NOSPIN")]
    NoSpin,
    #[serde(alias = "NOTIDES")]
    NoTides,
}

/// Spin content retained in the resummed amplitudes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlmModel {
    #[serde(alias = "SSLO")]
    Sslo,
    #[serde(alias = "SSNLO")]
    Ssnlo,
    #[serde(alias = "HM")]
    Hm,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TidalModel {
    #[serde(alias = "no")]
    Off,
    #[serde(alias = "NNLO")]
    Nnlo,
    #[serde(alias = "TEOBRESUM", alias = "TEOBRESUM3", alias = "teobresum3")]
    Teobresum,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GravitomagneticTides {
    #[serde(alias = "no")]
    Off,
    #[serde(alias = "PN")]
    Pn,
}

/// How Λ_3 and Λ_4 are obtained when not given explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LambdaFits {
    #[serde(alias = "no")]
    None,
    #[serde(alias = "YAGI13")]
    Yagi13,
    #[serde(alias = "GODZIEBA20")]
    Godzieba20,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NqcMode {
    #[serde(alias = "no")]
    Off,
    Auto,
    Manual,
}

/// Source of the next-to-quasi-circular coefficients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NqcFit {
    None,
    #[serde(alias = "nrfit_nospin20160209", alias = "nrfit_nospin201602")]
    Nospin201602,
    #[serde(alias = "nrfit_spin202002", alias = "nrfit_spin20202")]
    Spin202002,
    #[serde(alias = "fromfile")]
    FromFile,
    Compute,
}

/// ω̇ model driving the spin-precession equations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpinFlux {
    #[serde(alias = "PN")]
    Pn,
    Hybrid,
    #[serde(alias = "EOB")]
    Eob,
}

/// Euler angles after merger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RingdownEuler {
    Constant,
    #[serde(alias = "QNMs")]
    Qnms,
}

/// Flat option set. Defaults describe an equal-mass, non-spinning black-hole binary in
/// geometric units.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InputParameters {
    pub q: f64,
    /// Aligned spin components.
    pub chi1: f64,
    pub chi2: f64,
    pub chi1x: f64,
    pub chi1y: f64,
    pub chi2x: f64,
    pub chi2y: f64,

    #[serde(alias = "LambdaAl2")]
    pub lambda1: f64,
    #[serde(alias = "LambdaBl2")]
    pub lambda2: f64,
    /// Higher-ℓ polarizabilities per body, ℓ = 3..8. Missing entries come from fits.
    #[serde(deserialize_with = "one_or_many")]
    pub lambda1_l: Vec<f64>,
    #[serde(deserialize_with = "one_or_many")]
    pub lambda2_l: Vec<f64>,
    pub use_lambda234_fits: LambdaFits,

    pub use_geometric_units: bool,
    /// Initial gravitational-wave frequency (M f in geometric units, Hz otherwise).
    pub initial_frequency: f64,
    /// Initial radius. Zero means derived from the frequency.
    pub r0: f64,
    /// Solve for the EOB circular radius instead of the Kepler estimate.
    pub r0_from_eob_frequency: bool,
    #[serde(alias = "M")]
    pub total_mass: f64,
    /// Luminosity distance in Mpc.
    pub distance: f64,
    pub inclination: f64,
    pub coalescence_angle: f64,

    pub domain: Domain,
    pub srate: f64,
    pub dt: f64,
    pub interp_uniform_grid: bool,
    pub srate_interp: f64,
    pub dt_interp: f64,
    /// Frequency step; 1e-5/M in geometric units or 1/128 Hz otherwise when unset.
    pub df: Option<f64>,
    pub time_shift_fd: bool,
    /// Linear multipole indices used for h+/h×; k = 1 is (2,2).
    #[serde(deserialize_with = "one_or_many")]
    pub use_mode_lm: Vec<usize>,

    pub centrifugal_radius: Option<CentrifugalRadius>,
    pub use_flm: Option<FlmModel>,
    pub use_tidal: Option<TidalModel>,
    pub use_tidal_gravitomagnetic: Option<GravitomagneticTides>,
    pub pgsf_tidal: f64,
    /// Overrides for the calibration coefficients.
    pub a6c: Option<f64>,
    #[serde(alias = "cN3LO")]
    pub cn3lo: Option<f64>,

    pub nqc: NqcMode,
    pub nqc_coefs_flx: NqcFit,
    pub nqc_coefs_hlm: NqcFit,
    pub nqc_coefs_flx_file: Option<String>,
    pub nqc_coefs_hlm_file: Option<String>,

    pub compute_lr: bool,
    pub compute_lso: bool,

    pub size: usize,
    pub ringdown_extend_array: usize,
    pub dt_merger_interp: f64,
    pub ode_timestep: OdeTimestep,
    pub ode_abstol: f64,
    pub ode_reltol: f64,
    pub ode_tmax: f64,
    pub ode_stop_radius: f64,
    pub ode_stop_after_peak: bool,
    /// Integration time kept after the orbital-frequency peak. Model dependent when unset.
    pub peak_time_lag: Option<f64>,

    pub spin_flx: SpinFlux,
    pub spin_odes_dt: f64,
    pub spin_odes_omg_stop: Option<f64>,
    pub spin_odes_t_stop: Option<f64>,
    pub ringdown_eulerangles: RingdownEuler,

    pub output_hpc: bool,
    pub output_multipoles: bool,
    pub output_dynamics: bool,
    pub output_dir: Option<String>,
}

impl Default for InputParameters {
    fn default() -> Self {
        Self {
            q: 1.0,
            chi1: 0.0,
            chi2: 0.0,
            chi1x: 0.0,
            chi1y: 0.0,
            chi2x: 0.0,
            chi2y: 0.0,
            lambda1: 0.0,
            lambda2: 0.0,
            lambda1_l: Vec::new(),
            lambda2_l: Vec::new(),
            use_lambda234_fits: LambdaFits::Yagi13,
            use_geometric_units: true,
            initial_frequency: 0.0035,
            r0: 0.0,
            r0_from_eob_frequency: false,
            total_mass: 1.0,
            distance: 1.0,
            inclination: 0.0,
            coalescence_angle: 0.0,
            domain: Domain::Time,
            srate: 4096.0,
            dt: 0.5,
            interp_uniform_grid: false,
            srate_interp: 4096.0,
            dt_interp: 0.5,
            df: None,
            time_shift_fd: true,
            use_mode_lm: vec![1],
            centrifugal_radius: None,
            use_flm: None,
            use_tidal: None,
            use_tidal_gravitomagnetic: None,
            pgsf_tidal: 4.0,
            a6c: None,
            cn3lo: None,
            nqc: NqcMode::Auto,
            nqc_coefs_flx: NqcFit::None,
            nqc_coefs_hlm: NqcFit::None,
            nqc_coefs_flx_file: None,
            nqc_coefs_hlm_file: None,
            compute_lr: false,
            compute_lso: false,
            size: 500,
            ringdown_extend_array: 500,
            dt_merger_interp: 0.5,
            ode_timestep: OdeTimestep::Adaptive,
            ode_abstol: 1e-13,
            ode_reltol: 1e-11,
            ode_tmax: 1e12,
            ode_stop_radius: 1.0,
            ode_stop_after_peak: false,
            peak_time_lag: None,
            spin_flx: SpinFlux::Pn,
            spin_odes_dt: 1.0,
            spin_odes_omg_stop: None,
            spin_odes_t_stop: None,
            ringdown_eulerangles: RingdownEuler::Qnms,
            output_hpc: false,
            output_multipoles: false,
            output_dynamics: false,
            output_dir: None,
        }
    }
}

impl InputParameters {
    pub fn from_value(value: Value) -> Result<Self> {
        serde_json::from_value(value)
            .map_err(|e| EobError::InvalidConfig(e.to_string()))
            .context("Failed to read input parameters.")
    }

    pub fn from_map(map: &BTreeMap<String, Value>) -> Result<Self> {
        let object: Map<String, Value> = map.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        Self::from_value(Value::Object(object))
    }

    /// Reads a `key = value` parameter file.
    pub fn from_parfile(text: &str) -> Result<Self> {
        Self::from_map(&parse_parfile(text)?)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

/// Accepts a bare scalar where a list is expected, as parameter files write `key = 1`.
fn one_or_many<'de, D, T>(deserializer: D) -> std::result::Result<Vec<T>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(value) => vec![value],
        OneOrMany::Many(values) => values,
    })
}

/// Parses `key = value` lines into a flat option map.
///
/// `#` starts a comment, quoted values are strings, comma separated values become
/// arrays and bare tokens are read as booleans, numbers or strings in that order.
pub fn parse_parfile(text: &str) -> Result<BTreeMap<String, Value>> {
    let mut map = BTreeMap::new();
    for (lineno, raw) in text.lines().enumerate() {
        let line = strip_comment(raw).trim();
        if line.is_empty() {
            continue;
        }
        let (key, value) = line.split_once('=').ok_or_else(|| {
            EobError::InvalidConfig(format!("line {}: expected `key = value`", lineno + 1))
        })?;
        let key = key.trim();
        if key.is_empty() {
            return Err(EobError::InvalidConfig(format!("line {}: empty key", lineno + 1)).into());
        }
        map.insert(key.to_string(), parse_value(value.trim()));
    }
    Ok(map)
}

fn strip_comment(line: &str) -> &str {
    let mut in_quotes = false;
    for (i, c) in line.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            '#' if !in_quotes => return &line[..i],
            _ => {}
        }
    }
    line
}

fn parse_value(token: &str) -> Value {
    if let Some(inner) = token.strip_prefix('"').and_then(|t| t.strip_suffix('"')) {
        return Value::String(inner.to_string());
    }
    if token.contains(',') {
        let items = token
            .trim_start_matches('[')
            .trim_end_matches(']')
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(parse_scalar)
            .collect();
        return Value::Array(items);
    }
    parse_scalar(token)
}

fn parse_scalar(token: &str) -> Value {
    match token {
        "yes" | "true" => return Value::Bool(true),
        "no" | "false" => return Value::Bool(false),
        _ => {}
    }
    if let Ok(i) = token.parse::<i64>() {
        return Value::from(i);
    }
    if let Ok(x) = token.parse::<f64>() {
        return Value::from(x);
    }
    Value::String(token.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn assert_err_contains<T: std::fmt::Debug>(result: Result<T>, needle: &str) {
        let err = result.expect_err("expected error");
        let chain = format!("{err:#}");
        assert!(chain.contains(needle), "missing `{needle}` in `{chain}`");
    }

    #[test]
    fn parfile_values_are_typed() {
        let text = r#"
            # binary
            q = 2.5            # mass ratio
            use_flm = "HM"
            use_mode_lm = 0, 1, 4
            output_hpc = yes
            ode_tmax = 1e4
        "#;
        let map = parse_parfile(text).expect("parfile parses");
        assert_eq!(map["q"], json!(2.5));
        assert_eq!(map["use_flm"], json!("HM"));
        assert_eq!(map["use_mode_lm"], json!([0, 1, 4]));
        assert_eq!(map["output_hpc"], json!(true));

        let pars = InputParameters::from_map(&map).expect("options deserialize");
        assert_eq!(pars.q, 2.5);
        assert_eq!(pars.use_flm, Some(FlmModel::Hm));
        assert_eq!(pars.use_mode_lm, vec![0, 1, 4]);
        assert_eq!(pars.ode_tmax, 1e4);
    }

    #[test]
    fn unknown_keys_are_ignored_and_defaults_kept() {
        let pars = InputParameters::from_value(json!({"q": 3.0, "openmp_threads": 8}))
            .expect("unknown keys are fine");
        assert_eq!(pars.q, 3.0);
        assert_eq!(pars.ode_abstol, 1e-13);
        assert_eq!(pars.nqc, NqcMode::Auto);
    }

    #[test]
    fn legacy_aliases_are_accepted() {
        let pars = InputParameters::from_value(json!({
            "centrifugal_radius": "NNLO",
            "nqc_coefs_hlm": "nrfit_nospin20160209",
            "ode_timestep": "adaptive+uniform_after_LSO",
            "LambdaAl2": 400.0,
            "M": 2.8,
        }))
        .expect("aliases deserialize");
        assert_eq!(pars.centrifugal_radius, Some(CentrifugalRadius::Nnlo));
        assert_eq!(pars.nqc_coefs_hlm, NqcFit::Nospin201602);
        assert_eq!(pars.ode_timestep, OdeTimestep::AdaptiveUniformAfterLso);
        assert_eq!(pars.lambda1, 400.0);
        assert_eq!(pars.total_mass, 2.8);
    }

    #[test]
    fn malformed_input_is_a_config_error() {
        assert_err_contains(parse_parfile("q 2.0"), "expected `key = value`");
        assert_err_contains(
            InputParameters::from_value(json!({"use_flm": "XYZ"})),
            "invalid configuration",
        );
    }

    #[test]
    fn hash_inside_quotes_is_kept() {
        let map = parse_parfile(r#"output_dir = "run#1" # trailing"#).expect("parses");
        assert_eq!(map["output_dir"], json!("run#1"));
    }

    #[test]
    fn single_mode_index_becomes_a_list() {
        let map = parse_parfile("use_mode_lm = 4").expect("parses");
        let pars = InputParameters::from_map(&map).expect("scalar accepted");
        assert_eq!(pars.use_mode_lm, vec![4]);
    }
}
