//! Robust and classical statistics helpers.
//!
//! The outlier classifier and the key-measurement aggregation both lean on
//! these; NaN inputs are filtered rather than propagated so that a single
//! undefined measurement does not poison a channel aggregate.

/// Scale factor turning a MAD into a consistent estimator of the standard
/// deviation for normally distributed data.
pub const ROBUST_Z_SCALE: f64 = 0.6745;

/// Median of the finite values in `values`, or `None` when no finite value
/// remains.
pub fn median(values: &[f64]) -> Option<f64> {
    let mut finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if finite.is_empty() {
        return None;
    }
    finite.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = finite.len() / 2;
    Some(if finite.len() % 2 == 0 {
        (finite[mid - 1] + finite[mid]) / 2.0
    } else {
        finite[mid]
    })
}

/// Median absolute deviation around the median.
pub fn median_absolute_deviation(values: &[f64]) -> Option<f64> {
    let center = median(values)?;
    let deviations: Vec<f64> = values
        .iter()
        .filter(|v| v.is_finite())
        .map(|v| (v - center).abs())
        .collect();
    median(&deviations)
}

/// Robust z-score of `value` against a sample median and MAD.
///
/// A MAD of zero (all samples identical) yields a score of zero; scores in
/// that regime carry no information.
pub fn robust_z_score(value: f64, sample_median: f64, mad: f64) -> f64 {
    if mad <= f64::EPSILON {
        return 0.0;
    }
    ROBUST_Z_SCALE * (value - sample_median) / mad
}

/// Arithmetic mean of the finite values, or `None` when empty.
pub fn mean(values: &[f64]) -> Option<f64> {
    let finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if finite.is_empty() {
        return None;
    }
    Some(finite.iter().sum::<f64>() / finite.len() as f64)
}

/// Population standard deviation of the finite values, or `None` when empty.
pub fn std_dev(values: &[f64]) -> Option<f64> {
    let finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if finite.is_empty() {
        return None;
    }
    let m = finite.iter().sum::<f64>() / finite.len() as f64;
    let variance = finite.iter().map(|v| (v - m).powi(2)).sum::<f64>() / finite.len() as f64;
    Some(variance.sqrt())
}
