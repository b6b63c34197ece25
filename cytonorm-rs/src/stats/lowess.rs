//! Locally weighted scatterplot smoothing (LOWESS)
//!
//! Fitting is delegated to the `lowess` crate (robust bisquare iterations,
//! tricube weights, `delta` skipping). This module owns the input hygiene
//! around it: non-finite pairs are dropped, pairs are sorted by x, and the
//! result is exposed through the [`CurveFitter`] trait so the normalization
//! pipeline only depends on "fit a curve, query it anywhere".

use crate::error::{CytoNormError, Result};
use lowess::prelude::{Batch, Lowess as LowessModel};

/// A fitted curve of y against x, queryable at arbitrary points
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FittedCurve {
    /// Sorted x values of the fit (ties allowed)
    pub x: Vec<f64>,
    /// Fitted y value at each `x`
    pub y: Vec<f64>,
}

impl FittedCurve {
    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }

    /// Linear interpolation on the fitted curve
    ///
    /// Queries outside the fitted domain take the nearest boundary fitted
    /// value; the curve is never extrapolated. NaN queries and empty curves
    /// yield NaN.
    pub fn interpolate(&self, q: f64) -> f64 {
        let n = self.x.len();
        if n == 0 || q.is_nan() {
            return f64::NAN;
        }
        // Index of the first x strictly greater than q
        let hi = self.x.partition_point(|&v| v <= q);
        if hi == 0 {
            return self.y[0];
        }
        if hi == n {
            return self.y[n - 1];
        }
        let lo = hi - 1;
        if self.x[lo] == q {
            return self.y[lo];
        }
        let t = (q - self.x[lo]) / (self.x[hi] - self.x[lo]);
        self.y[lo] + t * (self.y[hi] - self.y[lo])
    }

    pub fn interpolate_all(&self, queries: &[f64]) -> Vec<f64> {
        queries.iter().map(|&q| self.interpolate(q)).collect()
    }
}

/// Anything that can fit a smooth curve of `y` as a function of `x`
pub trait CurveFitter: Send + Sync {
    fn fit(&self, x: &[f64], y: &[f64]) -> Result<FittedCurve>;
}

/// LOWESS smoother configuration
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Lowess {
    /// Fraction of the data used in each local regression, in (0, 1]
    pub frac: f64,
    /// Number of robustifying iterations
    pub iterations: usize,
    /// Distance within which fitted values are interpolated instead of computed
    pub delta: f64,
}

impl Default for Lowess {
    fn default() -> Self {
        Self {
            frac: 0.5,
            iterations: 3,
            delta: 0.0,
        }
    }
}

impl Lowess {
    pub fn new(frac: f64) -> Self {
        Self {
            frac,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.frac > 0.0 && self.frac <= 1.0) {
            return Err(CytoNormError::ConfigError(format!(
                "LOWESS fraction must be in (0, 1], got {}",
                self.frac
            )));
        }
        if !(self.delta >= 0.0 && self.delta.is_finite()) {
            return Err(CytoNormError::ConfigError(format!(
                "LOWESS delta must be finite and non-negative, got {}",
                self.delta
            )));
        }
        Ok(())
    }
}

impl CurveFitter for Lowess {
    fn fit(&self, x: &[f64], y: &[f64]) -> Result<FittedCurve> {
        if x.len() != y.len() {
            return Err(CytoNormError::StatsError(
                "x and y must have the same length".to_string(),
            ));
        }
        self.validate()?;

        // Pairs with a non-finite coordinate cannot take part in the fit
        let mut pairs: Vec<(f64, f64)> = x
            .iter()
            .zip(y.iter())
            .filter(|(a, b)| a.is_finite() && b.is_finite())
            .map(|(&a, &b)| (a, b))
            .collect();
        pairs.sort_by(|a, b| a.0.total_cmp(&b.0));
        let (xs, ys): (Vec<f64>, Vec<f64>) = pairs.into_iter().unzip();

        if xs.len() < 3 {
            return Ok(FittedCurve { x: xs, y: ys });
        }

        let model = LowessModel::new()
            .fraction(self.frac)
            .iterations(self.iterations)
            .delta(self.delta)
            .adapter(Batch)
            .build()
            .map_err(|e| CytoNormError::StatsError(format!("LOWESS setup failed: {e}")))?;
        let result = model
            .fit(&xs, &ys)
            .map_err(|e| CytoNormError::StatsError(format!("LOWESS fit failed: {e}")))?;

        if result.y.len() != xs.len() {
            return Err(CytoNormError::StatsError(format!(
                "LOWESS returned {} fitted values for {} points",
                result.y.len(),
                xs.len()
            )));
        }

        Ok(FittedCurve { x: xs, y: result.y })
    }
}
