//! Numerical-relativity informed fits.
//!
//! Everything here is a closed-form function of the intrinsic parameters; nothing is
//! stateful. Frequencies and amplitudes follow the mass-rescaled conventions of the
//! waveform module (h_lm/ν, times in units of M, ringdown times in units of M_bh).

use crate::waveform::{mode_index, KMAX};
use serde::{Deserialize, Serialize};

/// 5PN effective coefficient a6c of the A potential, first calibration.
pub fn a6c_fit(nu: f64) -> f64 {
    3097.3 * nu * nu - 1330.6 * nu + 81.38
}

/// a6c for the higher-multipole model.
pub fn a6c_fit_hm(nu: f64) -> f64 {
    let (nu2, nu3) = (nu * nu, nu * nu * nu);
    let (n0, n1, n2, n3, d1) = (5.9951, -34.4844, -79.2997, 713.4451, -3.167);
    n0 * (1.0 + n1 * nu + n2 * nu2 + n3 * nu3) / (1.0 + d1 * nu)
}

/// a6c for the 2023 recalibration of the higher-multipole model.
pub fn a6c_fit_hm_2023(nu: f64) -> f64 {
    let (nu2, nu3) = (nu * nu, nu * nu * nu);
    let (n0, n1, n2, n3, d1) = (46.5524, -24.2516, 120.9594, -167.2242, -3.3998);
    n0 * (1.0 + n1 * nu + n2 * nu2 + n3 * nu3) / (1.0 + d1 * nu)
}

/// Next-to-next-to-next-to-leading order spin-orbit coefficient c3, first calibration.
pub fn c3_fit_global(nu: f64, a1: f64, a2: f64) -> f64 {
    let nu2 = nu * nu;
    let nu3 = nu2 * nu;
    let x12 = (1.0 - 4.0 * nu).max(0.0).sqrt();
    let a12 = a1 + a2;

    let c3_eq = 43.371638 * (1.0 - 1.174839 * a12 + 0.354064 * a12 * a12) / (1.0 - 0.151961 * a12);
    let c3_uneq = 929.579 * a12 * nu * x12 - 9178.87 * a12 * nu2 * x12 + 23632.3 * a12 * nu3 * x12
        - 104.891 * (a1 - a2) * nu2;
    c3_eq + c3_uneq
}

pub fn c3_fit_hm(nu: f64, a1: f64, a2: f64) -> f64 {
    let nu2 = nu * nu;
    let x12 = (1.0 - 4.0 * nu).max(0.0).sqrt();
    let a0 = a1 + a2;
    let poly = 1.0 - 1.688708 * a0 + 0.787959 * a0.powi(2) - 0.018080 * a0.powi(3)
        - 0.001906 * a0.powi(4);
    45.235903 * poly / (1.0 - 0.751479 * a0) + 47.3756 * nu * x12 * a0 - 36.1964 * nu2 * (a1 - a2)
}

pub fn c3_fit_hm_2023(nu: f64, a1: f64, a2: f64) -> f64 {
    const EQ: [f64; 6] = [42.195044, -2.010717, 1.258034, -0.129593, -0.106295, -0.966525];
    const NEQ: [f64; 6] = [
        20.99561492580911,
        1.5806110388013492,
        -10.428048396877976,
        -61.19803748038313,
        37.11341346539421,
        -37.668146004322274,
    ];
    let nu2 = nu * nu;
    let x12 = (1.0 - 4.0 * nu).max(0.0).sqrt();
    let a0 = a1 + a2;
    let (a02, a03, a04) = (a0 * a0, a0.powi(3), a0.powi(4));
    let eq = EQ[0] * (1.0 + EQ[1] * a0 + EQ[2] * a02 + EQ[3] * a03 + EQ[4] * a04) / (1.0 + EQ[5] * a0);
    let neq = NEQ[0] * a0 * x12
        + NEQ[1] * a02 * x12
        + NEQ[2] * a03 * x12
        + NEQ[3] * a0 * nu * x12
        + NEQ[4] * (a1 - a2) * nu2
        + NEQ[5] * (a1 - a2).powi(2) * nu2;
    eq + neq
}

/// Gravitational-wave frequency of the (2,2) mode at merger.
pub fn mrg_momg(nu: f64, x1: f64, x2: f64, chi1: f64, chi2: f64) -> f64 {
    let nu2 = nu * nu;
    let x12 = (1.0 - 4.0 * nu).max(0.0).sqrt();
    let a1 = x1 * chi1;
    let a2 = x2 * chi2;
    let shat = 0.5 * (a1 + a2 + x12 * (a1 - a2));
    let b = [0.066045, -0.23876, 0.76819, -0.9201];
    0.273356 * (1.0 + 0.84074 * nu + 1.6976 * nu2)
        * (1.0 + ((-0.42311 + b[0] * x12) / (1.0 + b[1] * x12)) * shat - 0.066699 * shat * shat)
        / (1.0 + ((-0.83053 + b[2] * x12) / (1.0 + b[3] * x12)) * shat)
}

/// Shift between the orbital-frequency peak and the (2,2) amplitude peak.
pub fn nqc_timeshift(nu: f64, chi1: f64) -> f64 {
    if (chi1 < -0.9 && nu < 8.0 / 81.0) || (chi1 < -0.8 && nu < 11.0 / 144.0) {
        4.0
    } else {
        1.0
    }
}

/// Amplitude, frequency and their time derivatives of the (2,2) mode at the NQC point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NqcPoint {
    pub amp: f64,
    pub damp: f64,
    pub omega: f64,
    pub domega: f64,
}

/// (2,2) values two M after the amplitude peak. Amplitudes are Zerilli normalized.
pub fn nqc_point_22(nu: f64, x1: f64, x2: f64, chi1: f64, chi2: f64) -> NqcPoint {
    let nu2 = nu * nu;
    let nu3 = nu2 * nu;
    let x12 = x1 - x2;
    let ak = x1 * chi1 + x2 * chi2;
    let (ak2, ak3, ak4) = (ak * ak, ak.powi(3), ak.powi(4));
    let a12 = x1 * chi1 - x2 * chi2;
    let aeff = ak + a12 * x12 / 3.0;
    let aeff_omg = ak + a12 * x12;

    if nu > 0.2485 {
        let quartic = |p: [f64; 5]| p[0] * ak4 + p[1] * ak3 + p[2] * ak2 + p[3] * ak + p[4];
        NqcPoint {
            amp: quartic([0.00178195, 0.00435589, 0.00344489, -0.00076165, 0.31973334]),
            damp: quartic([0.00000927, -0.00024550, 0.00012469, 0.00123845, -0.00195014]),
            omega: quartic([0.00603482, 0.01604555, 0.02290799, 0.07084587, 0.38321834]),
            domega: quartic([0.00024066, 0.00038123, -0.00049714, 0.00041219, 0.01190548]),
        }
    } else if nu > 0.16 {
        let lin = |p: [f64; 2]| p[0] * nu + p[1];
        let amp = lin([0.04680896, -0.00632114]) * ak3
            + lin([0.06586192, -0.01180039]) * ak2
            + lin([-0.11617413, 0.02704959]) * ak
            + lin([0.15597465, 0.28034978]);
        let damp = lin([-0.00130824, 0.00006202]) * ak3
            + lin([0.00199855, -0.00027474]) * ak2
            + lin([0.00218838, 0.00071540]) * ak
            + lin([-0.00362779, -0.00105397]);
        let omega = lin([0.46908067, 0.27022141]) / (1.0 + lin([0.64131115, -0.37878384]) * ak);
        let domega = lin([0.00061175, 0.00074001]) * ak + lin([0.02504442, 0.00548217]);
        NqcPoint {
            amp,
            damp,
            omega,
            domega,
        }
    } else {
        let quad = |c0: f64, c1: f64, c2: f64| c2 * x12 * x12 + c1 * x12 + c0;

        let omg_nu = 0.5427169903 * nu2 + 0.2512395608 * nu + 0.2863992248;
        let omg_eq = (quad(-0.1460961247, 0.0998056, -0.118098) * aeff_omg + 1.0)
            / (quad(-0.3430184009, 0.0921551, -0.0740285) * aeff_omg + 1.0);
        let omega = omg_nu * omg_eq;

        let domg_nu = (0.0045213831 * nu + 0.0064934920) / (-1.4466409969 * nu + 1.0);
        let domg_eq = quad(-0.0299583285, 0.0711715, -0.0500886) * aeff_omg * aeff_omg
            + quad(0.0604556289, 0.0461239, -0.0153068) * aeff_omg
            + 1.0;
        let domega = domg_nu * domg_eq;

        let amp_nu = -0.9862040409 * nu3 + 0.8167558040 * nu2 - 0.0427442282 * nu + 0.2948879452;
        let amp_eq = (quad(-0.2750516062, 0.143066, -0.0425947) * aeff + 1.0)
            / (quad(-0.4693776065, 0.176955, -0.111902) * aeff + 1.0);
        let amp = amp_nu * amp_eq * (1.0 - 0.5 * omega * aeff);

        let damp_nu = (-0.0847947167 * nu - 0.0042142765) / (16.1559461812 * nu + 1.0);
        let damp_eq = (quad(0.0037461628, 0.00129393, -0.00239069) * aeff)
            / (quad(0.0636082543, -0.0534209, -0.186101) * aeff + 1.0);
        let damp = (damp_nu + damp_eq) * omega;

        NqcPoint {
            amp,
            damp,
            omega,
            domega,
        }
    }
}

/// NQC point read off the post-peak ringdown template, `delay` M after the peak.
pub fn nqc_point_postpeak(template: &QnmTemplate, mbh: f64, delay: f64) -> NqcPoint {
    let tau = delay / mbh;
    let QnmTemplate {
        c1a,
        c2a,
        c3a,
        c4a,
        c1phi,
        c2phi,
        c3phi,
        c4phi,
        alpha1,
        omega1,
    } = *template;

    let decay = (-alpha1 * tau).exp();
    let amp = decay * (c1a * (c2a * tau + c3a).tanh() + c4a);
    let fact = (c3a + c2a * tau).cosh();
    let damp = (c1a * c2a * decay / (fact * fact) - alpha1 * amp) / mbh;

    let x = (-c2phi * tau).exp();
    let x2 = x * x;
    let num = c1phi * (-2.0 * c2phi * c4phi * x2 - c2phi * c3phi * x);
    let den = 1.0 + c4phi * x2 + c3phi * x;
    let omega = (num / den + omega1) / mbh;
    let dn = c1phi * (4.0 * c2phi * c2phi * c4phi * x2 + c2phi * c2phi * c3phi * x);
    let domega = -(num * num / (c1phi * den * den) - dn / den) / (mbh * mbh);

    NqcPoint {
        amp,
        damp,
        omega,
        domega,
    }
}

/// Spin-dependent (2,2) NQC amplitude coefficient a1.
pub fn nqc_a1_fit_22(nu: f64, chi1: f64, chi2: f64, use_spins: bool) -> f64 {
    let x12 = (1.0 - 4.0 * nu).max(0.0).sqrt();
    let x1 = 0.5 * (1.0 + x12);
    let x2 = 1.0 - x1;
    let shat = x1 * x1 * chi1 + x2 * x2 * chi2;
    let sn = shat / (x1 * x1 + x2 * x2);

    if !use_spins {
        let x = 1.0 - 4.0 * nu;
        return 0.070974 / (1.0 + 0.786350 * x - 9.085105 * x * x);
    }
    if nu > 0.2485 {
        let (b1, b2, b3, b4, b5, b6, b7, b8) = (
            0.121187, -5.950663, 9.420324, -10.601339, 17.641549, -5.684777, 10.910451, -6.867377,
        );
        return b1 * (1.0 + b2 * shat + b3 * shat.powi(2) + b4 * shat.powi(3) + b5 * shat.powi(4))
            / (1.0 + b6 * shat + b7 * shat.powi(2) + b8 * shat.powi(3));
    }
    if nu > 0.16 {
        let nospin = 0.26132647 * (1.0 - 4.90302367 * nu + 20.67036124 * nu.powi(3))
            / (1.0 - 3.17109808 * nu);
        let spin = (1.0 - 3.082861 * sn + 2.169948 * sn.powi(2) - 0.636353 * sn.powi(3)
            + 0.741419 * sn.powi(4))
            / (1.0 - 2.843896 * sn + 2.709697 * sn.powi(2) - 0.832894 * sn.powi(3));
        return nospin * spin;
    }
    let nospin =
        0.341803 * (1.0 - 1.350488 * nu - 6.353357 * nu.powi(3)) / (1.0 + 2.216156 * nu);
    let xnu = nu - 0.16;
    let r = |a: f64, b: f64| (1.0 + a * xnu) / (1.0 + b * xnu);
    let spin = (1.0 - 2.287721 * r(7.650946, 7.106992) * sn
        - 0.598451 * r(-60.630748, -69.630357) * sn.powi(2)
        + 0.766069 * r(47.114247, 5.733002) * sn.powi(3)
        + 1.857169 * r(-12.905707, 5.045688) * sn.powi(4))
        / (1.0 - 2.035234 * r(3.515869, 1.564146) * sn
            + 0.836427 * r(0.642864, 2.947890) * sn.powi(2)
            + 0.297476 * r(31.023038, 1.829543) * sn.powi(3));
    nospin * spin
}

/// Spin-dependent (2,2) NQC amplitude coefficient a2.
pub fn nqc_a2_fit_22(nu: f64, chi1: f64, chi2: f64, use_spins: bool) -> f64 {
    let x12 = (1.0 - 4.0 * nu).max(0.0).sqrt();
    let x1 = 0.5 * (1.0 + x12);
    let x2 = 1.0 - x1;
    let shat = x1 * x1 * chi1 + x2 * x2 * chi2;
    let sn = shat / (x1 * x1 + x2 * x2);

    if !use_spins {
        return 1.315133 * (1.0 - 0.324849 * x12 - 0.304506 * x12 * x12) / (1.0 - 0.371614 * x12);
    }
    if nu > 0.2485 {
        let (b1, b2, b3, b4, b5, b6, b7, b8) = (
            1.331703, -4.237724, 1.786023, 10.546205, -9.698233, -6.225823, 13.209381, -9.402513,
        );
        return b1 * (1.0 + b2 * shat + b3 * shat.powi(2) + b4 * shat.powi(3) + b5 * shat.powi(4))
            / (1.0 + b6 * shat + b7 * shat.powi(2) + b8 * shat.powi(3));
    }
    if nu > 0.16 {
        let nospin = 1.03364144 * (1.0 - 3.46191440 * nu - 7.86652243 * nu.powi(3))
            / (1.0 - 3.96268815 * nu);
        let spin = (1.0
            + 0.036452 * (1.0 - 64.360789 * nu) * sn
            + 0.275707 * (1.0 - 34.573145 * nu) * sn.powi(2)
            - 0.113951 * sn.powi(3)
            - 2.531304 * (1.0 - 7.691661 * nu) * sn.powi(4))
            / (1.0
                - 1.025824 * (1.0 + 4.237539 * nu) * sn
                + 0.593579 * (1.0 + 1.661809 * nu) * sn.powi(2)
                - 0.939736 * (1.0 - 6.333442 * nu) * sn.powi(3));
        return nospin * spin;
    }
    let nospin =
        0.929192 * (1.0 + 1.334263 * nu - 26.389790 * nu.powi(3)) / (1.0 - 1.289984 * nu);
    let xnu = nu - 0.16;
    let r = |a: f64, b: f64| (1.0 + a * xnu) / (1.0 + b * xnu);
    let spin = (1.0 - 0.886561 * r(15.871482, 5.066190) * sn
        - 1.953955 * r(7.168498, 6.709490) * sn.powi(2)
        + 1.366537 * r(18.583382, 5.764512) * sn.powi(3)
        + 0.950212 * r(-14.038564, -17.126231) * sn.powi(4))
        / (1.0 - 2.531000 * r(6.387917, 3.438456) * sn
            + 1.723991 * r(8.867098, 2.910938) * sn.powi(2));
    nospin * spin
}

fn poly_log_fit(x: f64, coeffs: &[f64]) -> f64 {
    // highest power first
    coeffs.iter().fold(0.0, |acc, c| acc * x + c)
}

/// Spin-induced quadrupole C_Q from the quadrupolar tidal polarizability.
pub fn yagi_yunes_cq(lambda2: f64) -> f64 {
    if lambda2 <= 0.0 {
        return 1.0;
    }
    poly_log_fit(lambda2.ln(), &[1.23e-4, -4.21e-3, 0.0474, 0.0936, 0.194]).exp()
}

/// Gravitomagnetic tidal Love number Σ_2 of an irrotational star.
pub fn sigma_irrotational(lambda2: f64) -> f64 {
    if lambda2 <= 0.0 {
        return 0.0;
    }
    -poly_log_fit(lambda2.ln(), &[2.24e-6, -9.37e-5, 1.03e-3, 9.69e-3, 0.487, -2.03]).exp()
}

/// Octupolar and hexadecapolar quasi-universal relations in terms of C_Q.
pub fn yagi_coct(c_q: f64) -> f64 {
    (-0.925 + 1.98 * c_q.powf(0.273)).powi(3)
}

pub fn yagi_chex(c_q: f64) -> f64 {
    (-0.413 + 1.5 * c_q.powf(0.466)).powi(4)
}

/// Λ_3 or Λ_4 from Λ_2 (quasi-universal relation). Zero for a non-positive input.
pub fn yagi_lambda_ell(lambda2: f64, ell: usize) -> Option<f64> {
    if lambda2 <= 0.0 {
        return Some(0.0);
    }
    let coeffs: &[f64] = match ell {
        3 => &[2.52e-5, -1.31e-3, 2.51e-2, 1.18, -1.15],
        4 => &[2.8e-5, -1.81e-3, 3.95e-2, 1.43, -2.45],
        _ => return None,
    };
    Some(poly_log_fit(lambda2.ln(), coeffs).exp())
}

/// Λ_ℓ for ℓ = 3..8 from Λ_2 with the wider-range relation.
pub fn godzieba_lambda_ell(lambda2: f64, ell: usize) -> Option<f64> {
    if lambda2 <= 0.0 {
        return Some(0.0);
    }
    let coef: [f64; 7] = match ell {
        3 => [-1.052, 1.165, 6.369e-3, 5.058e-3, -7.268e-4, 3.749e-5, -6.803e-8],
        4 => [-2.262, 1.383, 1.662e-3, 1.225e-2, -1.752e-3, 9.667e-5, -1.886e-6],
        5 => [-4.511, 2.382, -0.3182, 0.08999, -0.01142, 6.896e-4, -1.606e-05],
        6 => [-7.662, 4.949, -1.644, 0.4715, -0.06856, 0.004986, -1.44e-04],
        7 => [-13.07, 9.799, -4.197, 1.242, -0.1966, 0.016, -0.0005265],
        8 => [-26.49, 30.03, -18.38, 6.54, -1.291, 0.1346, -0.005795],
        _ => return None,
    };
    let lnx = lambda2.ln();
    let mut lny = coef[0];
    let mut p = lnx;
    for c in &coef[1..] {
        lny += p * c;
        p *= lnx;
    }
    Some(lny.exp())
}

/// Remnant mass in units of the initial total mass.
pub fn remnant_mass(nu: f64, x1: f64, x2: f64, chi1: f64, chi2: f64) -> f64 {
    let dchi = chi1 - chi2;
    let s = (x1 * x1 * chi1 + x2 * x2 * chi2) / (x1 * x1 + x2 * x2);
    let (nu2, nu3, nu4) = (nu * nu, nu.powi(3), nu.powi(4));
    let xnu = (1.0 - 4.0 * nu).max(0.0).sqrt();

    let erad_nospin = 3.145 * nu4 - 0.847 * nu3 + 0.5610 * nu2 + (1.0 - 2.0 * 2f64.sqrt() / 3.0) * nu;

    let (f20, f30, f50) = (4.27, 31.09, 1.56735);
    let f10 = -0.574752 * f20 - 0.280958 * f30 + 64.6408 * f50 - 88.3165;
    let (f11, f21, f31, f51) = (15.7, 0.0, -243.6, -0.58);
    let f12 = 16.0 - 16.0 * f10 - 4.0 * f11;
    let f22 = 16.0 - 16.0 * f20 - 4.0 * f21;
    let f32 = 16.0 - 16.0 * f30 - 4.0 * f31;
    let f52 = 16.0 - 16.0 * f50 - 4.0 * f51;
    let b1 = -0.209 * (f10 + f11 * nu + f12 * nu2);
    let b2 = -0.197 * (f20 + f21 * nu + f22 * nu2);
    let b3 = -0.159 * (f30 + f31 * nu + f32 * nu2);
    let b5 = 2.985 * (f50 + f51 * nu + f52 * nu2);

    let erad_eq = 0.0484161;
    let erad_eq_spin = erad_eq * (0.128 * b3 * s.powi(3) + 0.211 * b2 * s * s + 0.346 * b1 * s + 1.0)
        / (1.0 - 0.212 * b5 * s);

    let a1 = -0.098 * xnu * nu2 * (-3.23 * nu + 1.0);
    let a2 = 0.0112 * nu3;
    let a3 = -0.0198 * xnu * nu * (-4.92 * nu + 1.0);
    let erad_uneq = a1 * dchi + a2 * dchi * dchi + a3 * s * dchi;

    1.0 - (erad_nospin * erad_eq_spin / erad_eq + erad_uneq)
}

/// Dimensionless remnant spin for aligned spins.
pub fn remnant_spin(nu: f64, x1: f64, x2: f64, chi1: f64, chi2: f64) -> f64 {
    let xnu = (1.0 - 4.0 * nu).max(0.0).sqrt();
    let dchi = chi1 - chi2;
    let s = (x1 * x1 * chi1 + x2 * x2 * chi2) / (x1 * x1 + x2 * x2);
    let (nu2, nu3) = (nu * nu, nu.powi(3));

    let lorb_nospin =
        (1.3 * -9.49 * nu3 + 5.24 * 3.833 * nu2 + 2.0 * 3f64.sqrt() * nu) / (2.88 * 2.513 * nu + 1.0);

    let (f21, f31, f50) = (8.774, 22.83, 1.8805);
    let f11 = 0.345225 * f21 + 0.0321306 * f31 - 3.66556 * f50 + 7.5397;
    let (f12, f22, f32, f51) = (0.512, -32.1, -154.0, -4.77);
    let f13 = 64.0 - 16.0 * f11 - 4.0 * f12;
    let f23 = 64.0 - 16.0 * f21 - 4.0 * f22;
    let f33 = 64.0 - 16.0 * f31 - 4.0 * f32;
    let f53 = 64.0 - 64.0 * f50 - 16.0 * f51;
    let b1 = 1.00096 * (f11 * nu + f12 * nu2 + f13 * nu3);
    let b2 = 0.788 * (f21 * nu + f22 * nu2 + f23 * nu3);
    let b3 = 0.654 * (f31 * nu + f32 * nu2 + f33 * nu3);
    let b5 = 0.840 * (f50 + f51 * nu + f53 * nu3);

    let lorb_eq_spin =
        (0.00954 * b3 * s.powi(3) + 0.0851 * b2 * s * s - 0.194 * b1 * s) / (1.0 - 0.579 * b5 * s);

    let a1 = 0.322 * xnu * nu2 * (9.33 * nu + 1.0);
    let a2 = -0.0598 * nu3;
    let a3 = 2.32 * xnu * nu3 * (-3.26 * nu + 1.0);
    let lorb_uneq = a1 * dchi + a2 * dchi * dchi + a3 * s * dchi;

    x1 * x1 * chi1 + x2 * x2 * chi2 + lorb_nospin + lorb_eq_spin + lorb_uneq
}

/// Post-peak template coefficients of one multipole. Times are in units of M_bh.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QnmTemplate {
    pub c1a: f64,
    pub c2a: f64,
    pub c3a: f64,
    pub c4a: f64,
    pub c1phi: f64,
    pub c2phi: f64,
    pub c3phi: f64,
    pub c4phi: f64,
    /// Inverse damping time of the fundamental mode.
    pub alpha1: f64,
    /// Oscillation frequency of the fundamental mode.
    pub omega1: f64,
}

impl QnmTemplate {
    fn from_fit(fit: RingdownFit) -> Self {
        let c2a = 0.5 * fit.alpha21;
        let cosh = fit.c3a.cosh();
        let c1a = fit.amrg * fit.alpha1 * cosh * cosh / c2a;
        Self {
            c1a,
            c2a,
            c3a: fit.c3a,
            c4a: fit.amrg - c1a * fit.c3a.tanh(),
            c1phi: fit.domg * (1.0 + fit.c3phi + fit.c4phi)
                / (fit.alpha21 * (fit.c3phi + 2.0 * fit.c4phi)),
            c2phi: fit.alpha21,
            c3phi: fit.c3phi,
            c4phi: fit.c4phi,
            alpha1: fit.sigma_r,
            omega1: fit.sigma_i,
        }
    }

    /// Amplitude and phase at τ = (t − t_peak)/M_bh. The phase obeys h = A e^{−iφ}.
    pub fn eval(&self, tau: f64) -> (f64, f64) {
        let amp = (-self.alpha1 * tau).exp() * (self.c1a * (self.c2a * tau + self.c3a).tanh() + self.c4a);
        let x = (-self.c2phi * tau).exp();
        let ratio = (1.0 + self.c3phi * x + self.c4phi * x * x) / (1.0 + self.c3phi + self.c4phi);
        (amp, self.omega1 * tau + self.c1phi * ratio.ln())
    }
}

#[derive(Debug, Clone, Copy)]
struct RingdownFit {
    alpha21: f64,
    alpha1: f64,
    c3a: f64,
    c3phi: f64,
    c4phi: f64,
    domg: f64,
    amrg: f64,
    sigma_r: f64,
    sigma_i: f64,
}

/// Hybrid ringdown fits. Non-spinning binaries carry (2,1), (2,2), (3,3); spinning ones
/// only (2,2).
pub fn qnm_hybrid_templates(
    nu: f64,
    x1: f64,
    x2: f64,
    chi1: f64,
    chi2: f64,
    mbh: f64,
    abh: f64,
    use_spins: bool,
) -> [Option<QnmTemplate>; KMAX] {
    let mut out = [None; KMAX];
    let nu2 = nu * nu;
    let nu3 = nu2 * nu;

    if !use_spins {
        let k22 = RingdownFit {
            alpha21: -0.3025985041156393 * nu2 + 0.0032794155172817 * nu + 0.1828276903682022,
            alpha1: -0.1615300454109702 * nu2 + 0.0147030662812516 * nu + 0.0878204175700328,
            c3a: 0.8118901739129283 * nu - 0.5584875090785957,
            c3phi: 0.7156419884962878 * nu + 3.8436474282409803,
            c4phi: 2.2336960710670901 * nu + 1.4736119175780844,
            domg: 0.8846304360111242 * nu2 + 0.0872792137250448 * nu + 0.1058414813686749,
            amrg: 1.4935750287318139 * nu2 + 0.2157497669089671 * nu + 1.4292027468283439,
            sigma_r: -0.364177 * nu3 + 0.010951 * nu2 - 0.010591 * nu + 0.08896,
            sigma_i: 2.392808 * nu3 + 0.051309 * nu2 + 0.449425 * nu + 0.37365,
        };
        let k21 = RingdownFit {
            alpha21: -0.2741607253846813 * nu2 + 0.0079342900879431 * nu + 0.1835522430667348,
            alpha1: -0.1277546304610336 * nu2 + 0.0093615534859368 * nu + 0.0882855170502398,
            c3a: -0.9431151070942140 * nu + 0.2569989171628133,
            c3phi: -3.4479482376671666 * nu + 2.4755856452648359,
            c4phi: -3.4024504071619841 * nu + 1.0650118588151427,
            domg: 0.2660644668923829 * nu2 + 0.2276854484140649 * nu + 0.0884880283627388,
            amrg: -5.7236432632743952 * nu2 + 0.0390010969627653 * nu + 0.4291847351869338,
            sigma_r: -0.208936 * nu3 - 0.028103 * nu2 - 0.005383 * nu + 0.08896,
            sigma_i: 0.733477 * nu3 + 0.188359 * nu2 + 0.220659 * nu + 0.37367,
        };
        let k33 = RingdownFit {
            alpha21: -0.3620553934265325 * nu2 + 0.0171973908686402 * nu + 0.1865364041200878,
            alpha1: -0.1821867653548689 * nu2 + 0.0134440240947561 * nu + 0.0916720214797975,
            c3a: 2.7565431398030675 * nu - 0.5506682334306747,
            c3phi: -0.2497526471104979 * nu + 2.3737675006958683,
            c4phi: -2.9538823110315420 * nu + 1.4483501341373066,
            domg: 1.3341439550896721 * nu2 - 0.1717105341058959 * nu + 0.1694617455660599,
            amrg: -9.3034388918614841 * nu2 + 1.0189351143222705 * nu + 0.4533252110436300,
            sigma_r: -0.319703 * nu3 - 0.030076 * nu2 - 0.009034 * nu + 0.09270,
            sigma_i: 2.957425 * nu3 + 0.178146 * nu2 + 0.709560 * nu + 0.59944,
        };
        out[mode_index(2, 1)] = Some(QnmTemplate::from_fit(k21));
        out[mode_index(2, 2)] = Some(QnmTemplate::from_fit(k22));
        out[mode_index(3, 3)] = Some(QnmTemplate::from_fit(k33));
        return out;
    }

    let x12 = x1 - x2;
    let x12_2 = x12 * x12;
    let ak = x1 * chi1 + x2 * chi2;
    let a12 = x1 * chi1 - x2 * chi2;
    let aeff = ak + a12 * x12 / 3.0;
    let aeff_omg = ak + a12 * x12;
    let af = abh;
    let (af2, af3) = (af * af, af.powi(3));

    let omega1 = 0.3736716844
        * (-0.0598837831 * af3 + 0.8082136788 * af2 - 1.7408467418 * af + 1.0)
        / (-0.2358960279 * af3 + 1.3152369374 * af2 - 2.0764065380 * af + 1.0);
    let alpha1 = 0.0889623157
        * (0.1211263886 * af3 + 0.7015835813 * af2 - 1.8226060896 * af + 1.0)
        / (0.0811633377 * af3 + 0.7201166020 * af2 - 1.8002031358 * af + 1.0);
    let alpha21 = 0.1849525596
        * (0.4764196512 * af3 - 0.0593165805 * af2 - 1.4168096833 * af + 1.0)
        / (0.4385578151 * af3 - 0.0763529088 * af2 - 1.3595491146 * af + 1.0);

    let c3a = 0.8298678603 * nu - 0.5615838975
        + (-0.115928 * x12 + 0.0907476903) * aeff.powi(3)
        + (-0.0799343 * x12 + 0.0227344099) * aeff * aeff
        + (0.0169543 * x12 - 0.1994944332) * aeff;

    let c3phi = 0.4558467286 * nu + 3.8883812141
        + (1.8275 * x12 - 2.0575868122) * aeff_omg.powi(4)
        + (0.437747 * x12 - 0.5051534498) * aeff_omg.powi(3)
        + (-0.904512 * x12 + 2.5742292762) * aeff_omg.powi(2)
        + (-0.462321 * x12 + 2.5599640181) * aeff_omg;

    let c4phi = 2.0822327682 * nu + 1.4996868401
        + (-0.980913 * x12 + 3.5695199109) * aeff_omg.powi(2)
        + (-0.449976 * x12 + 4.1312404030) * aeff_omg;

    let omgmx_eq = ((-0.122735 * x12_2 + 0.0857478 * x12 - 0.1416002395) * aeff_omg + 1.0)
        / ((-0.0760023 * x12_2 + 0.0826514 * x12 - 0.3484804901) * aeff_omg + 1.0);
    let omgmx = (0.481958619443355 * nu2 + 0.223976694441952 * nu + 0.273813064427363) * omgmx_eq;

    let amp_eq = ((-0.0820894 * x12_2 + 0.176126 * x12 - 0.2935238329) * aeff + 1.0)
        / ((-0.150239 * x12_2 + 0.20491 * x12 - 0.4728707630) * aeff + 1.0);
    let amp_scaled = (1.826573640739664 * nu2 + 0.100709438291872 * nu + 1.438424467327531) * amp_eq;

    let fit = RingdownFit {
        alpha21,
        alpha1,
        c3a,
        c3phi,
        c4phi,
        domg: omega1 - mbh * omgmx,
        amrg: amp_scaled * (1.0 - 0.5 * omgmx * aeff),
        sigma_r: alpha1,
        sigma_i: omega1,
    };
    out[mode_index(2, 2)] = Some(QnmTemplate::from_fit(fit));
    out
}

/// Fundamental quasi-normal mode of one multipole as a function of the remnant spin.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QnmFrequencies {
    pub omega1: f64,
    pub alpha1: f64,
    pub alpha21: f64,
}

/// Fundamental QNM frequencies for (2,1..2), (3,1..3), (4,1..4) and (5,5).
pub fn qnm_frequencies(af: f64, l: usize, m: usize) -> Option<QnmFrequencies> {
    let (af2, af3) = (af * af, af.powi(3));
    let rat = |scale: f64, n: [f64; 3], d: [f64; 3]| {
        scale * (1.0 + n[0] * af + n[1] * af2 + n[2] * af3) / (1.0 + d[0] * af + d[1] * af2 + d[2] * af3)
    };
    let q = |omega1, alpha1, alpha21| {
        Some(QnmFrequencies {
            omega1,
            alpha1,
            alpha21,
        })
    };
    match (l, m) {
        (2, 1) => q(
            rat(0.373672, [-0.79546, -0.1908, 0.11460], [-0.96337, -0.1495, 0.19522]),
            rat(0.0889623, [-1.31253, -0.21033, 0.52502], [-1.30041, -0.1566, 0.46204]),
            rat(0.184952, [-1.1329, -0.3520, 0.4924], [-1.10334, -0.3037, 0.4262]),
        ),
        (2, 2) => q(
            rat(0.373672, [-1.5367, 0.5503, 0.0], [-1.8700, 0.9848, -0.10943]),
            rat(0.08896, [-1.90036, 0.86200, 0.0384893], [-1.87933, 0.88062, 0.0]),
            rat(0.184953, [-1.89397, 0.88126, 0.0130256], [-1.83901, 0.84162, 0.0]),
        ),
        (3, 1) => q(
            rat(0.599443, [-0.70941, -0.16975, 0.08559], [-0.82174, -0.16792, 0.14524]),
            rat(0.0927030, [-1.2345, -0.30447, 0.5446], [-1.2263, -0.24223, 0.47738]),
            rat(0.188595, [-1.035, -0.3816, 0.4486], [-1.023, -0.3170, 0.3898]),
        ),
        (3, 2) => q(
            rat(0.599443, [-0.251, -0.891, 0.2706], [-0.475, -0.911, 0.4609]),
            rat(0.0927030, [-1.58277, 0.2783, 0.30503], [-1.56797, 0.3290, 0.24155]),
            rat(0.188595, [-1.5212, 0.1563, 0.3652], [-1.4968, 0.1968, 0.3021]),
        ),
        (3, 3) => q(
            rat(0.599443, [-1.84922, 0.9294, -0.07613], [-2.18719, 1.4903, -0.3014]),
            rat(0.0927030, [-1.8310, 0.7568, 0.0745], [-1.8098, 0.7926, 0.0196]),
            rat(0.188595, [-1.8011, 0.7046, 0.0968], [-1.7653, 0.7176, 0.0504]),
        ),
        (4, 1) => q(
            rat(0.809178, [-0.68647, -0.1852590, 0.0934997], [-0.77272, -0.1986852, 0.1485093]),
            rat(0.0941640, [1.1018882, -0.88643, -0.78266], [1.1065495, -0.80961, -0.68905]),
            rat(0.190170, [1.0590157, -0.8650630, -0.75222], [1.0654880, -0.7830051, -0.65814]),
        ),
        (4, 2) => q(
            rat(0.809178, [-0.6644, -0.3357, 0.1425], [-0.8366, -0.2921, 0.2254]),
            rat(0.0941640, [-1.44152, 0.0542, 0.39020], [-1.43312, 0.1167, 0.32253]),
            rat(0.190170, [-1.38840, 0.0, 0.39333], [-1.37584, 0.0600017, 0.32632]),
        ),
        (4, 3) => q(
            rat(0.809178, [-1.8397, 0.9616, -0.11339], [-2.0979, 1.3701, -0.2675]),
            rat(0.0941640, [-1.7177, 0.5320, 0.1860], [-1.7065, 0.5876, 0.120939]),
            rat(0.190170, [-1.6860, 0.4724, 0.2139], [-1.6684, 0.5198, 0.1508]),
        ),
        (4, 4) => q(
            rat(0.809178, [-1.83156, 0.9016, -0.06579], [-2.17745, 1.4753, -0.2961]),
            rat(0.0941640, [-1.8662, 0.8248, 0.0417], [-1.8514, 0.8736, -0.0198]),
            rat(0.190170, [-1.8546, 0.8041, 0.0507], [-1.8315, 0.8391, -0.0051]),
        ),
        (5, 5) => q(
            rat(1.012295, [-1.5659, 0.5783, 0.0], [-1.9149, 1.0668, -0.14663]),
            rat(0.0948705, [-1.8845, 0.8585, 0.0263], [-1.8740, 0.9147, -0.0384]),
            rat(0.190947, [-1.8780, 0.8467, 0.0315], [-1.8619, 0.8936, -0.0293]),
        ),
        _ => None,
    }
}
