use crate::error::{CytoNormError, Result};
use itertools::{Itertools, MinMaxResult};

/// Calculate median of a slice of f64 values
///
/// NaN values are skipped, matching how column medians are taken over event
/// tables. Returns an error when no non-NaN value remains.
pub fn median(data: &[f64]) -> Result<f64> {
    let mut sorted: Vec<f64> = data.iter().copied().filter(|x| !x.is_nan()).collect();
    if sorted.is_empty() {
        return Err(CytoNormError::StatsError("Empty data".to_string()));
    }
    sorted.sort_by(f64::total_cmp);

    let len = sorted.len();
    let median_value = if len % 2 == 0 {
        (sorted[len / 2 - 1] + sorted[len / 2]) / 2.0
    } else {
        sorted[len / 2]
    };

    Ok(median_value)
}

/// Arithmetic mean, skipping NaN values
///
/// Values are summed in sorted order with compensated summation, so the
/// result does not depend on the order the data arrived in.
pub fn mean(data: &[f64]) -> Result<f64> {
    let mut values: Vec<f64> = data.iter().copied().filter(|x| !x.is_nan()).collect();
    if values.is_empty() {
        return Err(CytoNormError::StatsError("Empty data".to_string()));
    }
    values.sort_by(f64::total_cmp);
    Ok(compensated_sum(&values) / values.len() as f64)
}

/// Mean of one row across several channels, skipping NaN; NaN if every value is NaN
pub fn row_mean(values: &[f64]) -> f64 {
    let (sum, n) = values
        .iter()
        .filter(|x| !x.is_nan())
        .fold((0.0, 0usize), |(s, n), &x| (s + x, n + 1));
    if n == 0 { f64::NAN } else { sum / n as f64 }
}

/// Minimum and maximum, skipping NaN values
pub fn min_max(data: &[f64]) -> Result<(f64, f64)> {
    match data
        .iter()
        .copied()
        .filter(|x| !x.is_nan())
        .minmax_by(f64::total_cmp)
    {
        MinMaxResult::NoElements => Err(CytoNormError::StatsError("Empty data".to_string())),
        MinMaxResult::OneElement(x) => Ok((x, x)),
        MinMaxResult::MinMax(lo, hi) => Ok((lo, hi)),
    }
}

/// Neumaier summation
fn compensated_sum(values: &[f64]) -> f64 {
    let mut sum = 0.0;
    let mut compensation = 0.0;
    for &v in values {
        let t = sum + v;
        if sum.abs() >= v.abs() {
            compensation += (sum - t) + v;
        } else {
            compensation += (v - t) + sum;
        }
        sum = t;
    }
    sum + compensation
}
