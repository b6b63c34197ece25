//! Earth Mover's Distance between one-dimensional samples
//!
//! For two empirical distributions on the real line with uniform weights the
//! optimal-transport cost reduces to the area between their cumulative
//! distribution functions:
//!
//! ```text
//! EMD(u, v) = ∫ |F_u(t) - F_v(t)| dt
//! ```
//!
//! The samples may have different lengths.

use crate::error::{CytoNormError, Result};

/// Wasserstein-1 distance between two samples
///
/// Both samples must be non-empty and contain only finite values.
pub fn earth_movers_distance(u: &[f64], v: &[f64]) -> Result<f64> {
    if u.is_empty() || v.is_empty() {
        return Err(CytoNormError::StatsError(
            "EMD requires two non-empty samples".to_string(),
        ));
    }
    if u.iter().chain(v.iter()).any(|x| !x.is_finite()) {
        return Err(CytoNormError::StatsError(
            "EMD requires finite samples".to_string(),
        ));
    }

    let mut u_sorted = u.to_vec();
    let mut v_sorted = v.to_vec();
    u_sorted.sort_by(f64::total_cmp);
    v_sorted.sort_by(f64::total_cmp);

    let mut all: Vec<f64> = u_sorted.iter().chain(v_sorted.iter()).copied().collect();
    all.sort_by(f64::total_cmp);

    let n_u = u_sorted.len() as f64;
    let n_v = v_sorted.len() as f64;
    let (mut i_u, mut i_v) = (0usize, 0usize);
    let mut distance = 0.0;

    for step in all.windows(2) {
        let (at, next) = (step[0], step[1]);
        while i_u < u_sorted.len() && u_sorted[i_u] <= at {
            i_u += 1;
        }
        while i_v < v_sorted.len() && v_sorted[i_v] <= at {
            i_v += 1;
        }
        let cdf_gap = (i_u as f64 / n_u - i_v as f64 / n_v).abs();
        distance += cdf_gap * (next - at);
    }

    Ok(distance)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_identical_samples_have_zero_distance() {
        let a = vec![1.0, 2.0, 3.0, 4.0];
        assert_relative_eq!(earth_movers_distance(&a, &a).unwrap(), 0.0);
    }

    #[test]
    fn test_shifted_sample_distance_equals_shift() {
        let a = vec![0.0, 1.0, 2.0, 5.0];
        let b: Vec<f64> = a.iter().map(|x| x + 3.5).collect();
        assert_relative_eq!(earth_movers_distance(&a, &b).unwrap(), 3.5, epsilon = 1e-12);
        assert_relative_eq!(earth_movers_distance(&b, &a).unwrap(), 3.5, epsilon = 1e-12);
    }

    #[test]
    fn test_different_lengths() {
        // F_u jumps to 1 at 0; F_v is 0.5 on [0, 2) then 1
        let u = vec![0.0];
        let v = vec![0.0, 2.0];
        assert_relative_eq!(earth_movers_distance(&u, &v).unwrap(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_known_value() {
        // scipy.stats.wasserstein_distance([0, 1, 3], [5, 6, 8]) == 5.0
        let u = vec![0.0, 1.0, 3.0];
        let v = vec![5.0, 6.0, 8.0];
        assert_relative_eq!(earth_movers_distance(&u, &v).unwrap(), 5.0, epsilon = 1e-12);
    }

    #[test]
    fn test_rejects_empty_and_non_finite() {
        assert!(earth_movers_distance(&[], &[1.0]).is_err());
        assert!(earth_movers_distance(&[1.0], &[f64::NAN]).is_err());
        assert!(earth_movers_distance(&[f64::INFINITY], &[1.0]).is_err());
    }
}
