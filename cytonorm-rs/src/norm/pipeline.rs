use crate::error::{CytoNormError, Result};
use crate::norm::reference::BatchContext;
use crate::norm::strategy::{Correction, ReferenceValue, StrategyConfig};
use crate::stats::lowess::CurveFitter;
use crate::table::EventTable;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

fn default_min_signal() -> f64 {
    0.01
}

/// Per-run normalisation settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizationConfig {
    pub strategy: StrategyConfig,

    /// Columns left untouched (metadata such as event index or time)
    #[serde(default)]
    pub ignore: Vec<String>,

    /// Rows whose reference value is not strictly above this are dropped
    #[serde(default = "default_min_signal")]
    pub min_signal: f64,
}

impl NormalizationConfig {
    pub fn new(strategy: StrategyConfig) -> Self {
        Self {
            strategy,
            ignore: Vec::new(),
            min_signal: default_min_signal(),
        }
    }

    pub fn with_ignore<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ignore = columns.into_iter().map(Into::into).collect();
        self
    }

    /// Check the settings against the columns of a table
    ///
    /// # Errors
    /// [`CytoNormError::ColumnNotFound`] naming the first missing reference
    /// or ignore column, or [`CytoNormError::ConfigError`] for invalid values.
    pub fn validate<S: AsRef<str>>(&self, columns: &[S]) -> Result<()> {
        if !(self.min_signal.is_finite() && self.min_signal >= 0.0) {
            return Err(CytoNormError::ConfigError(format!(
                "Minimum signal must be finite and non-negative, got {}",
                self.min_signal
            )));
        }
        self.strategy.validate()?;

        let has = |name: &str| columns.iter().any(|c| c.as_ref() == name);
        for name in self
            .strategy
            .reference_columns()
            .into_iter()
            .chain(self.ignore.iter().map(String::as_str))
        {
            if !has(name) {
                return Err(CytoNormError::ColumnNotFound(name.to_string()));
            }
        }
        Ok(())
    }

    /// Columns that get divided: everything not ignored, not a reference, not derived
    pub fn marker_columns(&self, table: &EventTable) -> Vec<String> {
        let references = self.strategy.reference_columns();
        let derived = self.strategy.derived_column().map(|d| d.name.as_str());
        table
            .columns()
            .into_iter()
            .filter(|c| {
                !self.ignore.contains(c)
                    && !references.contains(&c.as_str())
                    && derived != Some(c.as_str())
            })
            .collect()
    }
}

/// Counts describing what normalisation did to one table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizationReport {
    pub strategy: String,
    pub n_events_before: usize,
    pub n_events_after: usize,
    /// Rows removed by the minimum-signal filter
    pub n_below_threshold: usize,
    /// Rows removed because a marker result was not finite
    pub n_non_finite: usize,
    /// Table-wide divisor, for strategies that use one
    pub reference_scalar: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct CorrectedEventTable {
    pub table: EventTable,
    pub report: NormalizationReport,
}

/// Normalise one table with the configured strategy
///
/// `context` must hold the batch statistics when the strategy runs in batch
/// mode; see [`crate::ReferenceEstimator::estimate`].
pub fn normalize(
    table: &EventTable,
    config: &NormalizationConfig,
    context: Option<&BatchContext>,
) -> Result<CorrectedEventTable> {
    normalize_with(table, config, context, None)
}

/// Like [`normalize`], with a replacement curve fitter for the Loess strategy
pub fn normalize_with(
    table: &EventTable,
    config: &NormalizationConfig,
    context: Option<&BatchContext>,
    fitter: Option<&dyn CurveFitter>,
) -> Result<CorrectedEventTable> {
    config.validate(&table.columns())?;

    let n_events_before = table.n_events();
    let markers = config.marker_columns(table);
    let (prepared, correction) = config.strategy.prepare(table, context, config.min_signal)?;

    let mut n_below_threshold = 0;
    let mut reference_scalar = None;

    let corrected = match correction {
        Correction::Ratio {
            reference,
            min_signal,
        } => {
            let (filtered, reference) = match min_signal {
                Some(threshold) => {
                    let (filtered, reference, dropped) =
                        apply_min_signal(&prepared, reference, threshold)?;
                    n_below_threshold = dropped;
                    (filtered, reference)
                }
                None => (prepared, reference),
            };
            if let ReferenceValue::Scalar(v) = &reference {
                reference_scalar = Some(*v);
            }
            divide_markers(&filtered, &markers, &reference)?
        }
        Correction::Smoothed {
            reference,
            fitter: lowess,
        } => {
            let fitter: &dyn CurveFitter = match fitter {
                Some(custom) => custom,
                None => &lowess,
            };
            smooth_markers(&prepared, &markers, &reference, fitter)?
        }
    };

    let (output, n_non_finite) = if config.strategy.drops_non_finite() {
        let mask = corrected.finite_mask(&markers)?;
        let n_dropped = mask.iter().filter(|keep| !**keep).count();
        if n_dropped > 0 {
            warn!("Dropping {} rows with non-finite marker values", n_dropped);
        }
        (corrected.filter_rows(&mask)?, n_dropped)
    } else {
        (corrected, 0)
    };

    info!(
        "Normalised {} -> {} events ({}, {} markers)",
        n_events_before,
        output.n_events(),
        config.strategy,
        markers.len()
    );

    Ok(CorrectedEventTable {
        report: NormalizationReport {
            strategy: config.strategy.to_string(),
            n_events_before,
            n_events_after: output.n_events(),
            n_below_threshold,
            n_non_finite,
            reference_scalar,
        },
        table: output,
    })
}

/// Drop rows whose reference value is not strictly above `threshold`
fn apply_min_signal(
    table: &EventTable,
    reference: ReferenceValue,
    threshold: f64,
) -> Result<(EventTable, ReferenceValue, usize)> {
    let mask: Vec<bool> = (0..table.n_events())
        .map(|i| reference.at(i) > threshold)
        .collect();
    let dropped: Vec<usize> = mask
        .iter()
        .enumerate()
        .filter_map(|(i, keep)| (!keep).then_some(i))
        .collect();

    if dropped.is_empty() {
        return Ok((table.clone(), reference, 0));
    }

    warn!(
        "{} rows have reference signal <= {} and will be dropped",
        dropped.len(),
        threshold
    );
    for &i in &dropped {
        debug!("Dropping row {} (reference value {})", i, reference.at(i));
    }

    let filtered = table.filter_rows(&mask)?;
    Ok((filtered, reference.retain(&mask), dropped.len()))
}

fn divide_markers(
    table: &EventTable,
    markers: &[String],
    reference: &ReferenceValue,
) -> Result<EventTable> {
    let columns: Vec<(String, Vec<f64>)> = markers
        .par_iter()
        .map(|marker| {
            let values = table.column_f64(marker)?;
            let divided = values
                .iter()
                .enumerate()
                .map(|(i, v)| v / reference.at(i))
                .collect();
            Ok((marker.clone(), divided))
        })
        .collect::<Result<_>>()?;

    replace_columns(table, columns)
}

/// Divide each marker by its fitted curve against the reference, markers in parallel
fn smooth_markers(
    table: &EventTable,
    markers: &[String],
    reference: &[f64],
    fitter: &dyn CurveFitter,
) -> Result<EventTable> {
    let columns: Vec<(String, Vec<f64>)> = markers
        .par_iter()
        .map(|marker| {
            let values = table.column_f64(marker)?;
            let curve = fitter.fit(reference, &values)?;
            let expected = curve.interpolate_all(reference);
            debug!("Fitted {} against reference ({} points)", marker, curve.x.len());
            let corrected = values
                .iter()
                .zip(expected)
                .map(|(v, e)| v / e)
                .collect();
            Ok((marker.clone(), corrected))
        })
        .collect::<Result<_>>()?;

    replace_columns(table, columns)
}

fn replace_columns(table: &EventTable, columns: Vec<(String, Vec<f64>)>) -> Result<EventTable> {
    columns
        .into_iter()
        .try_fold(table.clone(), |acc, (name, values)| {
            acc.with_column(&name, values, None)
        })
}
