//! Damped least-squares (Levenberg-Marquardt) refinement for the profile
//! models.
//!
//! Small fixed parameter count, numerical Jacobian, normal equations solved
//! with nalgebra. Non-finite intermediate values abort the fit instead of
//! propagating.

use nalgebra::{DMatrix, DVector};

use crate::error::FittingError;

const N_PARAMS: usize = 4;
const LAMBDA_INIT: f64 = 1e-3;
const LAMBDA_UP: f64 = 4.0;
const LAMBDA_DOWN: f64 = 3.0;
const LAMBDA_MAX: f64 = 1e12;
const COST_TOLERANCE: f64 = 1e-12;
const STEP_TOLERANCE: f64 = 1e-10;

/// Minimize the sum of squared residuals of `model(params, x_i)` against
/// `samples[i]`, with `x_i = i`.
pub(crate) fn fit_least_squares(
    model: impl Fn(&[f64; 4], f64) -> f64,
    samples: &[f64],
    initial: [f64; 4],
    max_iterations: usize,
) -> Result<[f64; 4], FittingError> {
    let n = samples.len();
    let mut params = initial;
    let mut cost = residual_cost(&model, samples, &params)
        .ok_or(FittingError::DidNotConverge { iterations: 0 })?;
    let mut lambda = LAMBDA_INIT;

    for iteration in 0..max_iterations {
        let mut residuals = DVector::zeros(n);
        for (i, &y) in samples.iter().enumerate() {
            residuals[i] = y - model(&params, i as f64);
        }
        let jacobian = numerical_jacobian(&model, n, &params);

        let jt = jacobian.transpose();
        let jtj = &jt * &jacobian;
        let gradient = &jt * &residuals;

        // Inner loop: raise damping until a step improves the cost.
        let mut stepped = false;
        while lambda < LAMBDA_MAX {
            let mut damped = jtj.clone();
            for d in 0..N_PARAMS {
                damped[(d, d)] += lambda * jtj[(d, d)].max(1e-12);
            }
            let Some(step) = damped.lu().solve(&gradient) else {
                lambda *= LAMBDA_UP;
                continue;
            };
            if step.iter().any(|v| !v.is_finite()) {
                lambda *= LAMBDA_UP;
                continue;
            }

            let mut candidate = params;
            for (p, s) in candidate.iter_mut().zip(step.iter()) {
                *p += s;
            }
            match residual_cost(&model, samples, &candidate) {
                Some(new_cost) if new_cost <= cost => {
                    let converged = (cost - new_cost) <= COST_TOLERANCE * (cost + COST_TOLERANCE)
                        || step.norm() <= STEP_TOLERANCE;
                    params = candidate;
                    cost = new_cost;
                    lambda = (lambda / LAMBDA_DOWN).max(1e-12);
                    stepped = true;
                    if converged {
                        return Ok(params);
                    }
                    break;
                }
                _ => lambda *= LAMBDA_UP,
            }
        }

        if !stepped {
            // Damping saturated without any improving step; the current
            // parameters are the local optimum within tolerance.
            if iteration > 0 {
                return Ok(params);
            }
            return Err(FittingError::DidNotConverge {
                iterations: iteration + 1,
            });
        }
    }

    Err(FittingError::DidNotConverge {
        iterations: max_iterations,
    })
}

fn residual_cost(
    model: &impl Fn(&[f64; 4], f64) -> f64,
    samples: &[f64],
    params: &[f64; 4],
) -> Option<f64> {
    let mut cost = 0.0;
    for (i, &y) in samples.iter().enumerate() {
        let r = y - model(params, i as f64);
        if !r.is_finite() {
            return None;
        }
        cost += r * r;
    }
    Some(cost)
}

/// Central-difference Jacobian of the model values (not the residuals).
fn numerical_jacobian(
    model: &impl Fn(&[f64; 4], f64) -> f64,
    n: usize,
    params: &[f64; 4],
) -> DMatrix<f64> {
    let mut jacobian = DMatrix::zeros(n, N_PARAMS);
    for p in 0..N_PARAMS {
        let h = 1e-6 * params[p].abs().max(1.0);
        let mut forward = *params;
        forward[p] += h;
        let mut backward = *params;
        backward[p] -= h;
        for i in 0..n {
            let x = i as f64;
            jacobian[(i, p)] = (model(&forward, x) - model(&backward, x)) / (2.0 * h);
        }
    }
    jacobian
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fitting::ProfileModel;
    use approx::assert_relative_eq;

    #[test]
    fn recovers_exact_gaussian_parameters() {
        let truth = [1.0, 10.0, 2.0, 0.1];
        let samples: Vec<f64> = (0..21)
            .map(|i| ProfileModel::Gaussian.eval(&truth, i as f64))
            .collect();
        let initial = [0.8, 9.0, 3.0, 0.0];
        let fitted = fit_least_squares(
            |p, x| ProfileModel::Gaussian.eval(p, x),
            &samples,
            initial,
            200,
        )
        .unwrap();
        assert_relative_eq!(fitted[1], truth[1], epsilon = 1e-6);
        assert_relative_eq!(fitted[2].abs(), truth[2], epsilon = 1e-6);
    }

    #[test]
    fn tolerates_moderate_noise() {
        let truth = [1.0, 7.0, 1.5, 0.05];
        // Deterministic pseudo-noise, +-0.01.
        let samples: Vec<f64> = (0..15)
            .map(|i| {
                let v = ProfileModel::Gaussian.eval(&truth, i as f64);
                v + 0.01 * ((i * 37 % 11) as f64 / 11.0 - 0.5)
            })
            .collect();
        let fitted = fit_least_squares(
            |p, x| ProfileModel::Gaussian.eval(p, x),
            &samples,
            [0.9, 6.0, 2.5, 0.0],
            200,
        )
        .unwrap();
        assert_relative_eq!(fitted[1], truth[1], epsilon = 0.1);
        assert_relative_eq!(fitted[2].abs(), truth[2], epsilon = 0.2);
    }
}
