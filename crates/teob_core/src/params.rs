//! Resolved parameter set.
//!
//! `EobParameters::resolve` is the single place where user options become physics: the
//! mass ratio is canonicalized, spin and tidal couplings are derived, model selectors
//! get their per-binary defaults and every unit conversion happens. The result is never
//! mutated afterwards.

use crate::config::{
    CentrifugalRadius, Domain, FlmModel, GravitomagneticTides, InputParameters, LambdaFits,
    NqcFit, NqcMode, RingdownEuler, TidalModel,
};
use crate::dynamics::OdeSettings;
use crate::error::EobError;
use crate::fits;
use crate::spin::SpinOdeSettings;
use crate::waveform::ModeMask;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::f64::consts::PI;
use std::fmt::Write as _;
use tracing::{debug, info};

/// Solar mass in metres (G M_sun / c^2).
pub const MSUN_M: f64 = 1.476625061404649406193430731479084713e3;
/// Solar mass in seconds (G M_sun / c^3).
pub const MSUN_S: f64 = 4.925491025543575903411922162094833998e-6;
pub const MPC_M: f64 = 3.085677581491367278913937957796471611e22;
pub const EULER_GAMMA: f64 = 0.5772156649015328606065121;
/// Smallest initial radius accepted from the Kepler estimate.
pub const R0_THRESHOLD: f64 = 14.0;

/// Default frequency step in geometric units (1/M) and in Hz.
pub const DF_GEOMETRIC: f64 = 1e-5;
pub const DF_PHYSICAL: f64 = 1.0 / 128.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryKind {
    BlackHoles,
    NeutronStars,
    BlackHoleNeutronStar,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpinKind {
    None,
    Aligned,
    /// Non-negligible in-plane components: the orbital plane precesses.
    Generic,
}

/// Spin combinations entering the Hamiltonian and the waveform.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpinVariables {
    pub s1: f64,
    pub s2: f64,
    /// Dimensionless Kerr parameters a_i = X_i χ_i.
    pub a1: f64,
    pub a2: f64,
    /// a1 + a2
    pub a0: f64,
    /// a1 - a2
    pub a12: f64,
    pub ak2: f64,
    pub s: f64,
    pub sstar: f64,
}

impl SpinVariables {
    fn new(x1: f64, x2: f64, chi1: f64, chi2: f64) -> Self {
        let a1 = x1 * chi1;
        let a2 = x2 * chi2;
        let s1 = x1 * x1 * chi1;
        let s2 = x2 * x2 * chi2;
        let a0 = a1 + a2;
        Self {
            s1,
            s2,
            a1,
            a2,
            a0,
            a12: a1 - a2,
            ak2: a0 * a0,
            s: s1 + s2,
            sstar: x2 * a1 + x1 * a2,
        }
    }
}

/// Tidal couplings. Index ℓ of every array is the multipole; entries 0 and 1 are unused.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TidalParameters {
    pub lambda_a: [f64; 9],
    pub lambda_b: [f64; 9],
    pub kappa_a: [f64; 9],
    pub kappa_b: [f64; 9],
    pub kappa_t: [f64; 9],
    pub bar_alpha2_1: f64,
    pub bar_alpha2_2: f64,
    pub bar_alpha3_1: f64,
    pub bar_alpha3_2: f64,
    /// Gravitomagnetic ℓ = 2 couplings.
    pub jap_a2: f64,
    pub jap_b2: f64,
    pub jap_t2: f64,
    pub bar_alpha2j_1: f64,
    /// Spin-induced multipole coefficients per body (1 for black holes).
    pub c_q: [f64; 2],
    pub c_oct: [f64; 2],
    pub c_hex: [f64; 2],
    pub pgsf: f64,
}

impl TidalParameters {
    fn black_holes() -> Self {
        Self {
            lambda_a: [0.0; 9],
            lambda_b: [0.0; 9],
            kappa_a: [0.0; 9],
            kappa_b: [0.0; 9],
            kappa_t: [0.0; 9],
            bar_alpha2_1: 0.0,
            bar_alpha2_2: 0.0,
            bar_alpha3_1: 0.0,
            bar_alpha3_2: 0.0,
            jap_a2: 0.0,
            jap_b2: 0.0,
            jap_t2: 0.0,
            bar_alpha2j_1: 0.0,
            c_q: [1.0; 2],
            c_oct: [1.0; 2],
            c_hex: [1.0; 2],
            pgsf: 4.0,
        }
    }
}

/// Model selectors after per-binary defaults have been applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelChoice {
    pub centrifugal_radius: CentrifugalRadius,
    pub flm: FlmModel,
    pub tidal: TidalModel,
    pub gravitomagnetic: GravitomagneticTides,
    pub lambda_fits: LambdaFits,
    pub nqc_flux: NqcFit,
    pub nqc_hlm: NqcFit,
    pub nqc_flux_file: Option<String>,
    pub nqc_hlm_file: Option<String>,
    pub ringdown_euler: RingdownEuler,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Remnant {
    pub mass: f64,
    pub spin: f64,
}

/// Conversion between mass-rescaled geometric quantities and the reported output.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Units {
    pub geometric: bool,
    pub total_mass: f64,
    pub distance: f64,
    /// Seconds per unit of M (1 in geometric units).
    pub time_scale: f64,
    /// Multiplies h_lm/ν into the reported strain.
    pub amplitude_scale: f64,
    /// Multiplies the frequency-domain strain.
    pub amplitude_scale_fd: f64,
}

impl Units {
    fn new(geometric: bool, total_mass: f64, distance: f64, nu: f64) -> Self {
        if geometric {
            return Self {
                geometric,
                total_mass: 1.0,
                distance: 1.0,
                time_scale: 1.0,
                amplitude_scale: nu,
                amplitude_scale_fd: nu,
            };
        }
        Self {
            geometric,
            total_mass,
            distance,
            time_scale: total_mass * MSUN_S,
            amplitude_scale: nu * total_mass * MSUN_M / (distance * MPC_M),
            amplitude_scale_fd: nu * total_mass * total_mass * MSUN_M * MSUN_S / (distance * MPC_M),
        }
    }
}

/// Output grid and multipole selection, in units of M.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputSettings {
    pub domain: Domain,
    pub dt: f64,
    pub interp_uniform_grid: bool,
    pub dt_interp: f64,
    pub df: f64,
    pub time_shift_fd: bool,
    pub modes: ModeMask,
    pub inclination: f64,
    pub coalescence_angle: f64,
    pub compute_lr: bool,
    pub compute_lso: bool,
    pub ringdown_extend: usize,
    pub dt_merger_interp: f64,
    pub hpc: bool,
    pub multipoles: bool,
    pub dynamics: bool,
    pub dir: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EobParameters {
    pub q: f64,
    pub nu: f64,
    pub x1: f64,
    pub x2: f64,
    /// X1 - X2
    pub x12: f64,
    /// Dimensionless spin vectors (x, y, z).
    pub chi1_vec: [f64; 3],
    pub chi2_vec: [f64; 3],
    /// Aligned components used by the orbital dynamics.
    pub chi1: f64,
    pub chi2: f64,
    pub spin_vars: SpinVariables,
    pub binary: BinaryKind,
    pub spins: SpinKind,
    pub tides: TidalParameters,
    pub models: ModelChoice,
    pub a6c: f64,
    pub cn3lo: f64,
    /// Orbital frequency at merger from the numerical-relativity fit.
    pub mrg_omega: f64,
    pub remnant: Option<Remnant>,
    pub r0: f64,
    /// Initial gravitational-wave frequency in units of 1/M.
    pub f0: f64,
    pub r0_from_eob_frequency: bool,
    pub units: Units,
    pub ode: OdeSettings,
    pub spin_ode: SpinOdeSettings,
    pub output: OutputSettings,
}

fn invalid(message: impl Into<String>) -> anyhow::Error {
    EobError::InvalidConfig(message.into()).into()
}

fn require_finite(value: f64, name: &str) -> Result<()> {
    if !value.is_finite() {
        return Err(invalid(format!("{name} must be finite.")));
    }
    Ok(())
}

fn require_positive(value: f64, name: &str) -> Result<()> {
    if !(value > 0.0 && value.is_finite()) {
        return Err(invalid(format!("{name} must be positive.")));
    }
    Ok(())
}

fn double_factorial(n: i32) -> f64 {
    (1..=n).rev().step_by(2).map(f64::from).product()
}

/// Binary labels after the q ≥ 1 canonicalization.
struct Bodies {
    q: f64,
    chi1: [f64; 3],
    chi2: [f64; 3],
    lambda1: [f64; 9],
    lambda2: [f64; 9],
    coalescence_angle: f64,
}

fn lambda_table(lambda2: f64, higher: &[f64]) -> Result<[f64; 9]> {
    if higher.len() > 6 {
        return Err(invalid("at most six higher-ell polarizabilities (ell = 3..8) are accepted."));
    }
    let mut table = [0.0; 9];
    table[2] = lambda2;
    for (slot, value) in table[3..].iter_mut().zip(higher) {
        *slot = *value;
    }
    for (ell, value) in table.iter().enumerate().skip(2) {
        if !(value.is_finite() && *value >= 0.0) {
            return Err(invalid(format!("Lambda_{ell} must be non-negative.")));
        }
    }
    Ok(table)
}

fn canonical_bodies(input: &InputParameters) -> Result<Bodies> {
    require_positive(input.q, "q")?;
    let mut bodies = Bodies {
        q: input.q,
        chi1: [input.chi1x, input.chi1y, input.chi1],
        chi2: [input.chi2x, input.chi2y, input.chi2],
        lambda1: lambda_table(input.lambda1, &input.lambda1_l)?,
        lambda2: lambda_table(input.lambda2, &input.lambda2_l)?,
        coalescence_angle: input.coalescence_angle,
    };
    if bodies.q < 1.0 {
        bodies.q = 1.0 / bodies.q;
        std::mem::swap(&mut bodies.chi1, &mut bodies.chi2);
        std::mem::swap(&mut bodies.lambda1, &mut bodies.lambda2);
        // relabelling the bodies is a rotation by π about the orbital axis
        for chi in [&mut bodies.chi1, &mut bodies.chi2] {
            chi[0] = -chi[0];
            chi[1] = -chi[1];
        }
        bodies.coalescence_angle -= PI;
    }
    if (bodies.q - 1.0).abs() < 1e-8 {
        bodies.q = 1.0;
    }
    for (name, chi) in [("chi1", &bodies.chi1), ("chi2", &bodies.chi2)] {
        for c in chi {
            require_finite(*c, name)?;
        }
        let norm = chi.iter().map(|c| c * c).sum::<f64>().sqrt();
        if norm > 1.0 {
            return Err(invalid(format!("|{name}| = {norm} exceeds the Kerr bound.")));
        }
    }
    Ok(bodies)
}

/// Symmetric mass ratio and mass fractions. Exact for q = 1.
pub fn mass_fractions(q: f64) -> (f64, f64, f64) {
    let nu = q / ((1.0 + q) * (1.0 + q));
    let x1 = 0.5 * (1.0 + (1.0 - 4.0 * nu).max(0.0).sqrt());
    (nu, x1, 1.0 - x1)
}

fn resolve_tides(
    bodies: &Bodies,
    binary: BinaryKind,
    fits_choice: LambdaFits,
    gravitomagnetic: GravitomagneticTides,
    pgsf: f64,
    x_a: f64,
    x_b: f64,
) -> Result<TidalParameters> {
    let mut tides = TidalParameters::black_holes();
    if binary == BinaryKind::BlackHoles {
        return Ok(tides);
    }
    tides.pgsf = pgsf;
    tides.lambda_a = bodies.lambda1;
    tides.lambda_b = bodies.lambda2;

    for (table, given) in [
        (&mut tides.lambda_a, bodies.lambda1),
        (&mut tides.lambda_b, bodies.lambda2),
    ] {
        for ell in 3..=8 {
            if given[ell] > 0.0 {
                continue;
            }
            let fitted = match fits_choice {
                LambdaFits::None => None,
                LambdaFits::Yagi13 => fits::yagi_lambda_ell(given[2], ell),
                LambdaFits::Godzieba20 => fits::godzieba_lambda_ell(given[2], ell),
            };
            if let Some(value) = fitted {
                table[ell] = value;
            }
        }
    }

    let q = bodies.q;
    for ell in 2..=8 {
        let weight = double_factorial(2 * ell as i32 - 1);
        let power = 2 * ell as i32 + 1;
        tides.kappa_a[ell] = weight * tides.lambda_a[ell] * x_a.powi(power) / q;
        tides.kappa_b[ell] = weight * tides.lambda_b[ell] * x_b.powi(power) * q;
        tides.kappa_t[ell] = tides.kappa_a[ell] + tides.kappa_b[ell];
    }
    for ell in 2..=4 {
        if !(tides.kappa_t[ell] > 0.0) {
            return Err(invalid(format!(
                "tidal coupling kappa^T_{ell} must be positive; give Lambda_{ell} or enable the fits."
            )));
        }
    }

    let (ka, kb, kt) = (tides.kappa_a, tides.kappa_b, tides.kappa_t);
    tides.bar_alpha2_1 = (2.5 * x_a * ka[2] + 2.5 * x_b * kb[2]) / kt[2];
    tides.bar_alpha2_2 = ((3.0 + x_a / 8.0 + 337.0 / 28.0 * x_a * x_a) * ka[2]
        + (3.0 + x_b / 8.0 + 337.0 / 28.0 * x_b * x_b) * kb[2])
        / kt[2];
    tides.bar_alpha3_1 = ((-2.0 + 7.5 * x_a) * ka[3] + (-2.0 + 7.5 * x_b) * kb[3]) / kt[3];
    tides.bar_alpha3_2 = ((8.0 / 3.0 - 311.0 / 24.0 * x_a + 110.0 / 3.0 * x_a * x_a) * ka[3]
        + (8.0 / 3.0 - 311.0 / 24.0 * x_b + 110.0 / 3.0 * x_b * x_b) * kb[3])
        / kt[3];

    if gravitomagnetic == GravitomagneticTides::Pn {
        let sigma_a = fits::sigma_irrotational(tides.lambda_a[2]);
        let sigma_b = fits::sigma_irrotational(tides.lambda_b[2]);
        tides.jap_a2 = 24.0 * sigma_a * x_a.powi(5) / q;
        tides.jap_b2 = 24.0 * sigma_b * x_b.powi(5) * q;
        tides.jap_t2 = tides.jap_a2 + tides.jap_b2;
        if tides.jap_t2 != 0.0 {
            tides.bar_alpha2j_1 = (tides.jap_a2 * (1.0 + 11.0 / 6.0 * x_a + x_a * x_a)
                + tides.jap_b2 * (1.0 + 11.0 / 6.0 * x_b + x_b * x_b))
                / tides.jap_t2;
        }
    }

    for (i, lambda2) in [tides.lambda_a[2], tides.lambda_b[2]].into_iter().enumerate() {
        if lambda2 > 0.0 {
            let c_q = fits::yagi_yunes_cq(lambda2);
            tides.c_q[i] = c_q;
            tides.c_oct[i] = fits::yagi_coct(c_q);
            tides.c_hex[i] = fits::yagi_chex(c_q);
        }
    }
    Ok(tides)
}

fn resolve_models(input: &InputParameters, binary: BinaryKind, spins: SpinKind) -> Result<ModelChoice> {
    let (centrifugal_radius, flm, tidal, gravitomagnetic) = match binary {
        BinaryKind::BlackHoles => (
            CentrifugalRadius::Nlo,
            FlmModel::Hm,
            TidalModel::Off,
            GravitomagneticTides::Off,
        ),
        BinaryKind::NeutronStars => (
            CentrifugalRadius::Nnlo,
            FlmModel::Ssnlo,
            TidalModel::Teobresum,
            GravitomagneticTides::Pn,
        ),
        BinaryKind::BlackHoleNeutronStar => (
            CentrifugalRadius::Nlo,
            FlmModel::Hm,
            TidalModel::Teobresum,
            GravitomagneticTides::Off,
        ),
    };
    let mut tidal = input.use_tidal.unwrap_or(tidal);
    let mut gravitomagnetic = input.use_tidal_gravitomagnetic.unwrap_or(gravitomagnetic);
    if binary == BinaryKind::BlackHoles {
        tidal = TidalModel::Off;
        gravitomagnetic = GravitomagneticTides::Off;
    }

    let (nqc_flux, nqc_hlm) = match input.nqc {
        NqcMode::Off => (NqcFit::None, NqcFit::None),
        NqcMode::Manual => (input.nqc_coefs_flx, input.nqc_coefs_hlm),
        NqcMode::Auto => match (binary, spins) {
            (BinaryKind::NeutronStars, _) => (NqcFit::None, NqcFit::None),
            (_, SpinKind::None) => (NqcFit::Nospin201602, NqcFit::Nospin201602),
            _ => (NqcFit::Spin202002, NqcFit::Compute),
        },
    };
    if nqc_flux == NqcFit::Compute {
        return Err(invalid("the flux NQC coefficients cannot be computed; use a fit or a file."));
    }
    if nqc_flux == NqcFit::FromFile && input.nqc_coefs_flx_file.is_none() {
        return Err(invalid("nqc_coefs_flx = from_file needs nqc_coefs_flx_file."));
    }
    if nqc_hlm == NqcFit::FromFile && input.nqc_coefs_hlm_file.is_none() {
        return Err(invalid("nqc_coefs_hlm = from_file needs nqc_coefs_hlm_file."));
    }

    Ok(ModelChoice {
        centrifugal_radius: input.centrifugal_radius.unwrap_or(centrifugal_radius),
        flm: input.use_flm.unwrap_or(flm),
        tidal,
        gravitomagnetic,
        lambda_fits: input.use_lambda234_fits,
        nqc_flux,
        nqc_hlm,
        nqc_flux_file: input.nqc_coefs_flx_file.clone(),
        nqc_hlm_file: input.nqc_coefs_hlm_file.clone(),
        ringdown_euler: input.ringdown_eulerangles,
    })
}

impl EobParameters {
    /// Derives the complete, immutable parameter set from the user options.
    pub fn resolve(input: &InputParameters) -> Result<Self> {
        let bodies = canonical_bodies(input)?;
        let (nu, x1, x2) = mass_fractions(bodies.q);

        let in_plane = bodies.chi1[0].hypot(bodies.chi1[1]) + bodies.chi2[0].hypot(bodies.chi2[1]);
        let spins = if in_plane > 1e-4 {
            SpinKind::Generic
        } else if bodies.chi1[2] != 0.0 || bodies.chi2[2] != 0.0 {
            SpinKind::Aligned
        } else {
            SpinKind::None
        };
        let (chi1, chi2) = (bodies.chi1[2], bodies.chi2[2]);
        let spin_vars = SpinVariables::new(x1, x2, chi1, chi2);

        let binary = match (bodies.lambda1[2] > 0.0, bodies.lambda2[2] > 0.0) {
            (true, true) => BinaryKind::NeutronStars,
            (false, false) => BinaryKind::BlackHoles,
            _ => BinaryKind::BlackHoleNeutronStar,
        };

        let models = resolve_models(input, binary, spins)?;
        require_positive(input.pgsf_tidal, "pgsf_tidal")?;
        let tides = if models.tidal == TidalModel::Off {
            TidalParameters::black_holes()
        } else {
            resolve_tides(
                &bodies,
                binary,
                models.lambda_fits,
                models.gravitomagnetic,
                input.pgsf_tidal,
                x1,
                x2,
            )?
        };

        let (a1, a2) = (spin_vars.a1, spin_vars.a2);
        let (default_a6c, default_cn3lo) = match (binary, models.flm) {
            (BinaryKind::NeutronStars, _) => (fits::a6c_fit(nu), 0.0),
            (_, FlmModel::Hm) => (fits::a6c_fit_hm_2023(nu), fits::c3_fit_hm_2023(nu, a1, a2)),
            _ => (fits::a6c_fit(nu), fits::c3_fit_global(nu, a1, a2)),
        };
        let a6c = input.a6c.unwrap_or(default_a6c);
        let cn3lo = input.cn3lo.unwrap_or(default_cn3lo);
        require_finite(a6c, "a6c")?;
        require_finite(cn3lo, "cN3LO")?;

        let mrg_omega = fits::mrg_momg(nu, x1, x2, chi1, chi2);
        let remnant = (binary != BinaryKind::NeutronStars).then(|| Remnant {
            mass: fits::remnant_mass(nu, x1, x2, chi1, chi2),
            spin: fits::remnant_spin(nu, x1, x2, chi1, chi2),
        });

        let units = Units::new(input.use_geometric_units, input.total_mass, input.distance, nu);
        if !units.geometric {
            require_positive(input.total_mass, "total_mass")?;
            require_positive(input.distance, "distance")?;
            require_positive(input.srate, "srate")?;
            require_positive(input.srate_interp, "srate_interp")?;
        }
        let (r0, f0) = if input.r0 > 0.0 {
            (input.r0, input.r0.powf(-1.5) / PI)
        } else {
            let f0 = input.initial_frequency * units.time_scale;
            require_positive(f0, "initial_frequency")?;
            (kepler_radius(f0), f0)
        };
        require_finite(r0, "r0")?;

        let (dt, dt_interp, df) = if units.geometric {
            (input.dt, input.dt_interp, input.df.unwrap_or(DF_GEOMETRIC))
        } else {
            (
                1.0 / input.srate / units.time_scale,
                1.0 / input.srate_interp / units.time_scale,
                input.df.unwrap_or(DF_PHYSICAL) * units.time_scale,
            )
        };
        require_positive(dt, "dt")?;
        require_positive(dt_interp, "dt_interp")?;
        require_positive(df, "df")?;
        require_positive(input.dt_merger_interp, "dt_merger_interp")?;
        require_positive(input.ode_abstol, "ode_abstol")?;
        require_positive(input.ode_reltol, "ode_reltol")?;
        require_positive(input.ode_tmax, "ode_tmax")?;
        require_positive(input.spin_odes_dt.abs(), "spin_odes_dt")?;
        if input.size == 0 {
            return Err(invalid("size must be greater than zero."));
        }

        let modes = ModeMask::from_indices(&input.use_mode_lm).map_err(|e| invalid(e.to_string()))?;

        let default_lag = match (models.flm, binary) {
            (FlmModel::Hm, BinaryKind::BlackHoleNeutronStar) => 3.0,
            (FlmModel::Hm, _) => 10.0,
            _ => 2.0,
        };
        let ode = OdeSettings {
            timestep: input.ode_timestep,
            abs_tol: input.ode_abstol,
            rel_tol: input.ode_reltol,
            dt,
            t_max: input.ode_tmax,
            stop_radius: input.ode_stop_radius,
            stop_after_peak: input.ode_stop_after_peak,
            peak_time_lag: input.peak_time_lag.unwrap_or(default_lag),
            chunk: input.size,
            ..OdeSettings::default()
        };
        if !(ode.peak_time_lag >= 0.0 && ode.peak_time_lag.is_finite()) {
            return Err(invalid("peak_time_lag must be non-negative."));
        }

        let spin_ode = SpinOdeSettings {
            dt: input.spin_odes_dt,
            abs_tol: 100.0 * input.ode_abstol,
            rel_tol: 100.0 * input.ode_reltol,
            omega_stop: input.spin_odes_omg_stop.unwrap_or(1.1 * mrg_omega),
            t_stop: input.spin_odes_t_stop,
            t_max: input.ode_tmax,
            flux: input.spin_flx,
            chunk: input.size,
            ..SpinOdeSettings::default()
        };

        let output = OutputSettings {
            domain: input.domain,
            dt,
            // the twist needs a uniform grid
            interp_uniform_grid: input.interp_uniform_grid
                || (spins == SpinKind::Generic && input.domain == Domain::Time),
            dt_interp,
            df,
            time_shift_fd: input.time_shift_fd,
            modes,
            inclination: input.inclination,
            coalescence_angle: bodies.coalescence_angle,
            compute_lr: input.compute_lr,
            compute_lso: input.compute_lso,
            ringdown_extend: input.ringdown_extend_array,
            dt_merger_interp: input.dt_merger_interp,
            hpc: input.output_hpc,
            multipoles: input.output_multipoles,
            dynamics: input.output_dynamics,
            dir: input.output_dir.clone(),
        };

        let params = Self {
            q: bodies.q,
            nu,
            x1,
            x2,
            x12: x1 - x2,
            chi1_vec: bodies.chi1,
            chi2_vec: bodies.chi2,
            chi1,
            chi2,
            spin_vars,
            binary,
            spins,
            tides,
            models,
            a6c,
            cn3lo,
            mrg_omega,
            remnant,
            r0,
            f0,
            r0_from_eob_frequency: input.r0_from_eob_frequency,
            units,
            ode,
            spin_ode,
            output,
        };
        info!(
            target: "teob::params",
            q = params.q,
            nu = params.nu,
            binary = ?params.binary,
            spins = ?params.spins,
            "parameters resolved"
        );
        debug!(
            target: "teob::params",
            a6c = params.a6c,
            cn3lo = params.cn3lo,
            r0 = params.r0,
            f0 = params.f0,
            nqc_flux = ?params.models.nqc_flux,
            nqc_hlm = ?params.models.nqc_hlm,
            "derived coefficients"
        );
        Ok(params)
    }

    pub fn use_spins(&self) -> bool {
        self.spins != SpinKind::None
    }

    /// Copy with the aligned spin components replaced, e.g. by the projections of
    /// precessing spins on the orbital angular momentum.
    pub fn with_aligned_spins(&self, chi1: f64, chi2: f64) -> Self {
        Self {
            chi1,
            chi2,
            spin_vars: SpinVariables::new(self.x1, self.x2, chi1, chi2),
            ..self.clone()
        }
    }

    pub fn use_tides(&self) -> bool {
        self.models.tidal != TidalModel::Off
    }

    /// Initial orbital frequency MΩ0 = π M f0.
    pub fn omega0(&self) -> f64 {
        PI * self.f0
    }

    /// `key = value` dump of the resolved set, loadable by `config::parse_parfile`.
    pub fn to_parfile(&self) -> String {
        let mut out = String::from("# resolved EOB parameters\n");
        if let Ok(value) = serde_json::to_value(self) {
            write_flat(&mut out, "", &value);
        }
        out
    }
}

/// Newtonian circular-orbit radius for a given gravitational-wave frequency.
pub fn kepler_radius(f0: f64) -> f64 {
    (PI * f0).powf(-2.0 / 3.0)
}

fn write_flat(out: &mut String, prefix: &str, value: &Value) {
    match value {
        Value::Object(map) => {
            for (key, inner) in map {
                let name = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{prefix}.{key}")
                };
                write_flat(out, &name, inner);
            }
        }
        Value::Array(items) if items.iter().all(|v| !v.is_object() && !v.is_array()) => {
            let joined: Vec<String> = items.iter().map(scalar_text).collect();
            let _ = writeln!(out, "{prefix} = {}", joined.join(", "));
        }
        Value::Array(items) => {
            for (i, inner) in items.iter().enumerate() {
                write_flat(out, &format!("{prefix}.{i}"), inner);
            }
        }
        Value::Null => {}
        other => {
            let _ = writeln!(out, "{prefix} = {}", scalar_text(other));
        }
    }
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => format!("\"{s}\""),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_parfile;
    use proptest::prelude::*;

    fn assert_err_contains<T: std::fmt::Debug>(result: Result<T>, needle: &str) {
        let err = result.expect_err("expected an error");
        let message = format!("{err:#}");
        assert!(message.contains(needle), "`{message}` does not mention `{needle}`");
    }

    fn bns_input() -> InputParameters {
        InputParameters {
            q: 1.2,
            lambda1: 400.0,
            lambda2: 600.0,
            chi1: 0.05,
            chi2: -0.02,
            ..InputParameters::default()
        }
    }

    #[test]
    fn equal_mass_is_exact() {
        let params = EobParameters::resolve(&InputParameters::default()).expect("defaults resolve");
        assert_eq!(params.q, 1.0);
        assert_eq!(params.nu, 0.25);
        assert_eq!(params.x1, 0.5);
        assert_eq!(params.x2, 0.5);
        assert_eq!(params.binary, BinaryKind::BlackHoles);
        assert_eq!(params.spins, SpinKind::None);
        assert_eq!(params.models.nqc_hlm, NqcFit::Nospin201602);
    }

    #[test]
    fn nearly_equal_mass_snaps_to_one() {
        let input = InputParameters {
            q: 1.0 + 1e-10,
            ..InputParameters::default()
        };
        let params = EobParameters::resolve(&input).expect("resolves");
        assert_eq!(params.nu, 0.25);
    }

    #[test]
    fn inverse_mass_ratio_swaps_bodies() {
        let input = InputParameters {
            q: 0.5,
            chi1: 0.1,
            chi2: 0.7,
            chi1x: 0.2,
            chi2y: 0.3,
            coalescence_angle: 1.0,
            ..InputParameters::default()
        };
        let params = EobParameters::resolve(&input).expect("resolves");
        assert_eq!(params.q, 2.0);
        assert_eq!(params.chi1, 0.7);
        assert_eq!(params.chi2, 0.1);
        assert_eq!(params.chi1_vec, [0.0, -0.3, 0.7]);
        assert_eq!(params.chi2_vec, [-0.2, 0.0, 0.1]);
        assert!((params.output.coalescence_angle - (1.0 - PI)).abs() < 1e-15);
        assert_eq!(params.spins, SpinKind::Generic);
        assert!(params.output.interp_uniform_grid);
    }

    #[test]
    fn spin_variables_follow_definitions() {
        let input = InputParameters {
            q: 3.0,
            chi1: 0.5,
            chi2: -0.4,
            ..InputParameters::default()
        };
        let p = EobParameters::resolve(&input).expect("resolves");
        let s = p.spin_vars;
        assert!((p.nu - 0.1875).abs() < 1e-15);
        assert!((p.x1 - 0.75).abs() < 1e-15);
        assert!((s.a1 - 0.375).abs() < 1e-15);
        assert!((s.a2 + 0.1).abs() < 1e-15);
        assert!((s.s1 - 0.75 * 0.75 * 0.5).abs() < 1e-15);
        assert!((s.sstar - (0.25 * 0.375 + 0.75 * -0.1)).abs() < 1e-15);
        assert_eq!(p.spins, SpinKind::Aligned);
        assert_eq!(p.models.nqc_flux, NqcFit::Spin202002);
        assert_eq!(p.models.nqc_hlm, NqcFit::Compute);
    }

    #[test]
    fn neutron_star_defaults() {
        let p = EobParameters::resolve(&bns_input()).expect("resolves");
        assert_eq!(p.binary, BinaryKind::NeutronStars);
        assert_eq!(p.models.tidal, TidalModel::Teobresum);
        assert_eq!(p.models.centrifugal_radius, CentrifugalRadius::Nnlo);
        assert_eq!(p.models.nqc_hlm, NqcFit::None);
        assert!(p.remnant.is_none());
        assert!(p.tides.kappa_t[2] > 0.0);
        assert!(p.tides.kappa_t[3] > 0.0 && p.tides.kappa_t[4] > 0.0);
        assert!(p.tides.c_q.iter().all(|&c| c > 1.0));
        assert!(p.tides.jap_t2 < 0.0);
        assert_eq!(p.ode.peak_time_lag, 2.0);
    }

    #[test]
    fn kappa_matches_closed_form() {
        let input = InputParameters {
            q: 1.0,
            lambda1: 300.0,
            lambda2: 300.0,
            ..InputParameters::default()
        };
        let p = EobParameters::resolve(&input).expect("resolves");
        // 3!! Λ X^5 per body, two identical bodies
        let expected = 2.0 * 3.0 * 300.0 * 0.5f64.powi(5);
        assert!((p.tides.kappa_t[2] - expected).abs() < 1e-12);
        assert!((p.tides.bar_alpha2_1 - 1.25).abs() < 1e-14);
    }

    #[test]
    fn mixed_binary_keeps_remnant() {
        let input = InputParameters {
            q: 4.0,
            lambda2: 500.0,
            ..InputParameters::default()
        };
        let p = EobParameters::resolve(&input).expect("resolves");
        assert_eq!(p.binary, BinaryKind::BlackHoleNeutronStar);
        assert!(p.remnant.is_some());
        assert_eq!(p.ode.peak_time_lag, 3.0);
        assert_eq!(p.tides.c_q[0], 1.0);
    }

    #[test]
    fn frequency_step_defaults_follow_the_units() {
        let p = EobParameters::resolve(&InputParameters::default()).expect("resolves");
        assert_eq!(p.output.df, DF_GEOMETRIC);
        let input = InputParameters {
            use_geometric_units: false,
            total_mass: 10.0,
            initial_frequency: 20.0,
            ..InputParameters::default()
        };
        let p = EobParameters::resolve(&input).expect("resolves");
        assert!((p.output.df / (DF_PHYSICAL * 10.0 * MSUN_S) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn higher_modes_lengthen_peak_lag() {
        let p = EobParameters::resolve(&InputParameters::default()).expect("resolves");
        assert_eq!(p.models.flm, FlmModel::Hm);
        assert_eq!(p.ode.peak_time_lag, 10.0);
        let input = InputParameters {
            peak_time_lag: Some(4.0),
            ..InputParameters::default()
        };
        let p = EobParameters::resolve(&input).expect("resolves");
        assert_eq!(p.ode.peak_time_lag, 4.0);
    }

    #[test]
    fn radius_and_frequency_are_consistent() {
        let input = InputParameters {
            initial_frequency: 0.004,
            ..InputParameters::default()
        };
        let p = EobParameters::resolve(&input).expect("resolves");
        assert!((p.r0 - (PI * 0.004).powf(-2.0 / 3.0)).abs() < 1e-12);

        let input = InputParameters {
            r0: 20.0,
            ..InputParameters::default()
        };
        let p = EobParameters::resolve(&input).expect("resolves");
        assert!((kepler_radius(p.f0) - 20.0).abs() < 1e-10);
    }

    #[test]
    fn physical_units_rescale_time() {
        let input = InputParameters {
            use_geometric_units: false,
            total_mass: 50.0,
            distance: 100.0,
            initial_frequency: 20.0,
            srate: 4096.0,
            ..InputParameters::default()
        };
        let p = EobParameters::resolve(&input).expect("resolves");
        let scale = 50.0 * MSUN_S;
        assert!((p.f0 - 20.0 * scale).abs() < 1e-15);
        assert!((p.output.dt - 1.0 / 4096.0 / scale).abs() < 1e-12);
        assert!(p.units.amplitude_scale < 1e-18);
    }

    #[test]
    fn rejects_bad_values() {
        let spin = InputParameters {
            chi1: 0.9,
            chi1x: 0.9,
            ..InputParameters::default()
        };
        assert_err_contains(EobParameters::resolve(&spin), "Kerr bound");

        let q = InputParameters {
            q: -1.0,
            ..InputParameters::default()
        };
        assert_err_contains(EobParameters::resolve(&q), "q must be positive");

        let lambda = InputParameters {
            lambda1: -3.0,
            ..InputParameters::default()
        };
        assert_err_contains(EobParameters::resolve(&lambda), "Lambda_2");

        let tol = InputParameters {
            ode_reltol: 0.0,
            ..InputParameters::default()
        };
        assert_err_contains(EobParameters::resolve(&tol), "ode_reltol");

        let modes = InputParameters {
            use_mode_lm: vec![40],
            ..InputParameters::default()
        };
        assert_err_contains(EobParameters::resolve(&modes), "multipole");

        let fits_off = InputParameters {
            use_lambda234_fits: LambdaFits::None,
            ..bns_input()
        };
        assert_err_contains(EobParameters::resolve(&fits_off), "kappa^T_3");
    }

    #[test]
    fn configuration_errors_carry_status() {
        let input = InputParameters {
            initial_frequency: 0.0,
            ..InputParameters::default()
        };
        let err = EobParameters::resolve(&input).expect_err("zero frequency");
        let typed = err.downcast_ref::<EobError>().expect("typed error");
        assert_eq!(typed.status_code(), 1);
    }

    #[test]
    fn parfile_dump_reloads_as_a_map() {
        let p = EobParameters::resolve(&bns_input()).expect("resolves");
        let text = p.to_parfile();
        assert!(text.contains("nu = "));
        assert!(text.contains("tides.kappa_t = "));
        let map = parse_parfile(&text).expect("dump parses");
        assert_eq!(map.get("binary"), Some(&Value::String("NeutronStars".into())));
    }

    proptest! {
        #[test]
        fn inverse_mass_ratio_gives_same_binary(
            q in 1.0f64..8.0,
            chi1 in -0.9f64..0.9,
            chi2 in -0.9f64..0.9,
        ) {
            let direct = InputParameters { q, chi1, chi2, ..InputParameters::default() };
            let swapped = InputParameters { q: 1.0 / q, chi1: chi2, chi2: chi1, ..InputParameters::default() };
            let a = EobParameters::resolve(&direct).expect("direct");
            let b = EobParameters::resolve(&swapped).expect("swapped");
            prop_assert!((a.q - b.q).abs() <= 1e-12 * a.q);
            prop_assert!((a.nu - b.nu).abs() < 1e-14);
            prop_assert_eq!(a.chi1, b.chi1);
            prop_assert_eq!(a.chi2, b.chi2);
            prop_assert!((a.a6c - b.a6c).abs() < 1e-9);
        }
    }
}
