//! Nonlinear curve fitting of 1D bead intensity profiles.
//!
//! A profile sampled at integer positions is fitted with a [`ProfileModel`]
//! (Airy by default, Gaussian optionally). Goodness of fit is reported as
//! R², used consistently throughout the crate. Degenerate input and
//! optimizer divergence raise [`FittingError`]; callers decide the blast
//! radius of that failure.

mod lm;
mod model;

pub use model::{ProfileModel, AIRY_HALF_MAX_RADIUS, GAUSSIAN_FWHM_FACTOR};

use crate::error::FittingError;

/// Minimum number of samples a profile must carry to constrain the four
/// model parameters.
pub const MIN_PROFILE_SAMPLES: usize = 5;

const MAX_FIT_ITERATIONS: usize = 200;

/// Result of fitting one 1D profile.
#[derive(Debug, Clone, PartialEq)]
pub struct ProfileFit {
    /// Fitted `[amplitude, center, width, offset]`.
    pub params: [f64; 4],
    /// Model curve sampled at the profile positions.
    pub fitted: Vec<f64>,
    /// Coefficient of determination of the fit.
    pub r2: f64,
    /// Full width at half maximum, in sample units (pixels).
    pub fwhm: f64,
    /// Fitted peak center position, in sample units.
    pub center: f64,
}

/// Fit `profile` with `model`.
///
/// The initial guess takes the amplitude and offset from the profile range,
/// the center from the argmax and the width from the half-maximum crossing
/// distance around the peak.
pub fn fit_profile(profile: &[f64], model: ProfileModel) -> Result<ProfileFit, FittingError> {
    if profile.len() < MIN_PROFILE_SAMPLES {
        return Err(FittingError::TooShort {
            len: profile.len(),
            min: MIN_PROFILE_SAMPLES,
        });
    }
    if profile.iter().any(|v| !v.is_finite()) {
        return Err(FittingError::DegenerateProfile { range: f64::NAN });
    }

    let (argmax, max) = profile
        .iter()
        .copied()
        .enumerate()
        .fold((0, f64::NEG_INFINITY), |(bi, bv), (i, v)| {
            if v > bv {
                (i, v)
            } else {
                (bi, bv)
            }
        });
    let min = profile.iter().copied().fold(f64::INFINITY, f64::min);
    let range = max - min;
    if range <= 1e-12 {
        return Err(FittingError::DegenerateProfile { range });
    }

    let fwhm_estimate = half_max_crossing_width(profile, argmax, min, max);
    let initial = [
        range,
        argmax as f64,
        model.width_from_fwhm(fwhm_estimate).max(0.25),
        min,
    ];

    let params = lm::fit_least_squares(
        |p, x| model.eval(p, x),
        profile,
        initial,
        MAX_FIT_ITERATIONS,
    )?;

    let fitted: Vec<f64> = (0..profile.len())
        .map(|i| model.eval(&params, i as f64))
        .collect();

    let fwhm = model.fwhm(params[2]);
    if !fwhm.is_finite() || fwhm <= 0.0 {
        return Err(FittingError::DidNotConverge {
            iterations: MAX_FIT_ITERATIONS,
        });
    }

    Ok(ProfileFit {
        params,
        r2: r_squared(profile, &fitted),
        fwhm,
        center: params[1],
        fitted,
    })
}

/// Width estimate from the half-maximum crossings on either side of the
/// peak; falls back to a quarter of the profile when a side never crosses.
fn half_max_crossing_width(profile: &[f64], argmax: usize, min: f64, max: f64) -> f64 {
    let half = min + (max - min) / 2.0;
    let fallback = (profile.len() as f64 / 4.0).max(1.0);

    let left = (0..argmax)
        .rev()
        .find(|&i| profile[i] <= half)
        .map(|i| (argmax - i) as f64);
    let right = (argmax + 1..profile.len())
        .find(|&i| profile[i] <= half)
        .map(|i| (i - argmax) as f64);

    match (left, right) {
        (Some(l), Some(r)) => l + r,
        (Some(l), None) => 2.0 * l,
        (None, Some(r)) => 2.0 * r,
        (None, None) => fallback,
    }
    .max(1.0)
}

/// Coefficient of determination between observed and fitted samples.
fn r_squared(observed: &[f64], fitted: &[f64]) -> f64 {
    let n = observed.len() as f64;
    let mean = observed.iter().sum::<f64>() / n;
    let ss_tot: f64 = observed.iter().map(|y| (y - mean).powi(2)).sum();
    let ss_res: f64 = observed
        .iter()
        .zip(fitted)
        .map(|(y, f)| (y - f).powi(2))
        .sum();
    if ss_tot <= f64::EPSILON {
        return 0.0;
    }
    1.0 - ss_res / ss_tot
}
