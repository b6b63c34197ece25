//! Reference-channel correction strategies
//!
//! Each [`StrategyConfig`] variant turns an event table into a [`Correction`]:
//! the reference value(s) every marker will be divided by, or for `Loess` the
//! reference series each marker is smoothed against. The shared filtering,
//! division and reassembly steps live in [`crate::norm::pipeline`].

use crate::error::{CytoNormError, Result};
use crate::norm::reference::BatchContext;
use crate::stats::lowess::Lowess;
use crate::stats::summary::{mean, median, min_max, row_mean};
use crate::table::EventTable;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Where batch-dependent statistics come from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EstimationMode {
    /// Statistics of the table being normalised
    #[default]
    PerFile,
    /// Statistics of the whole batch, from a [`BatchContext`]
    Batch,
}

/// Optional output column holding the per-row reference mean
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DerivedColumn {
    pub name: String,
    /// Insertion position; appended when `None` or past the end
    #[serde(default)]
    pub index: Option<usize>,
}

fn default_span() -> f64 {
    0.5
}

fn default_iterations() -> usize {
    3
}

/// One of the five correction strategies, with its settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, strum_macros::Display)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StrategyConfig {
    /// Divide by this row's reference value
    #[strum(to_string = "direct-ratio")]
    DirectRatio { reference: String },

    /// Divide by the row mean over several reference channels
    #[strum(to_string = "mean-ratio")]
    MeanRatio {
        references: Vec<String>,
        /// Divide each reference channel by its mean before taking row means
        #[serde(default)]
        pre_normalize: Option<EstimationMode>,
        #[serde(default)]
        derived: Option<DerivedColumn>,
    },

    /// Divide by the median of the reference channel over the whole table
    #[strum(to_string = "median-ratio")]
    MedianRatio { reference: String },

    /// Divide by the reference value rescaled onto [0, 1]
    #[strum(to_string = "min-max-ratio")]
    MinMaxRatio {
        reference: String,
        #[serde(default)]
        mode: EstimationMode,
    },

    /// Divide each marker by its LOWESS fit against the reference
    #[strum(to_string = "loess")]
    Loess {
        reference: String,
        #[serde(default = "default_span")]
        span: f64,
        #[serde(default = "default_iterations")]
        iterations: usize,
        #[serde(default)]
        delta: f64,
    },
}

/// Divisor applied to marker columns
#[derive(Debug, Clone, PartialEq)]
pub enum ReferenceValue {
    /// One number for every row
    Scalar(f64),
    /// One number per row
    PerRow(Vec<f64>),
}

impl ReferenceValue {
    pub fn at(&self, row: usize) -> f64 {
        match self {
            Self::Scalar(v) => *v,
            Self::PerRow(values) => values.get(row).copied().unwrap_or(f64::NAN),
        }
    }

    /// Keep the entries for retained rows; scalars are unaffected
    pub fn retain(&self, mask: &[bool]) -> Self {
        match self {
            Self::Scalar(v) => Self::Scalar(*v),
            Self::PerRow(values) => Self::PerRow(
                values
                    .iter()
                    .zip(mask)
                    .filter_map(|(v, keep)| keep.then_some(*v))
                    .collect(),
            ),
        }
    }
}

/// What the pipeline should do with the marker columns of a prepared table
#[derive(Debug, Clone, PartialEq)]
pub enum Correction {
    Ratio {
        reference: ReferenceValue,
        /// Drop rows whose reference is not strictly above this value
        min_signal: Option<f64>,
    },
    Smoothed {
        reference: Vec<f64>,
        fitter: Lowess,
    },
}

impl StrategyConfig {
    /// Reference channel(s) read by this strategy
    pub fn reference_columns(&self) -> Vec<&str> {
        match self {
            Self::MeanRatio { references, .. } => references.iter().map(String::as_str).collect(),
            Self::DirectRatio { reference }
            | Self::MedianRatio { reference }
            | Self::MinMaxRatio { reference, .. }
            | Self::Loess { reference, .. } => vec![reference.as_str()],
        }
    }

    pub fn derived_column(&self) -> Option<&DerivedColumn> {
        match self {
            Self::MeanRatio { derived, .. } => derived.as_ref(),
            _ => None,
        }
    }

    /// True when a [`BatchContext`] must be estimated before any table is processed
    pub fn needs_batch_context(&self) -> bool {
        matches!(
            self,
            Self::MeanRatio {
                pre_normalize: Some(EstimationMode::Batch),
                ..
            } | Self::MinMaxRatio {
                mode: EstimationMode::Batch,
                ..
            }
        )
    }

    /// True for strategies that drop rows with non-finite marker results
    pub fn drops_non_finite(&self) -> bool {
        matches!(self, Self::MinMaxRatio { .. } | Self::Loess { .. })
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            Self::MeanRatio {
                references,
                derived,
                ..
            } => {
                if references.is_empty() {
                    return Err(CytoNormError::ConfigError(
                        "Mean-ratio normalisation needs at least one reference channel"
                            .to_string(),
                    ));
                }
                if let Some(d) = derived
                    && d.name.is_empty()
                {
                    return Err(CytoNormError::ConfigError(
                        "Derived column name must not be empty".to_string(),
                    ));
                }
                Ok(())
            }
            Self::Loess {
                span,
                iterations,
                delta,
                ..
            } => Lowess {
                frac: *span,
                iterations: *iterations,
                delta: *delta,
            }
            .validate(),
            _ => Ok(()),
        }
    }

    /// Rewrite reference columns as the strategy requires and derive the correction
    ///
    /// `context` is only consulted in [`EstimationMode::Batch`].
    pub fn prepare(
        &self,
        table: &EventTable,
        context: Option<&BatchContext>,
        min_signal: f64,
    ) -> Result<(EventTable, Correction)> {
        match self {
            Self::DirectRatio { reference } => {
                let values = table.column_f64(reference)?;
                Ok((
                    table.clone(),
                    Correction::Ratio {
                        reference: ReferenceValue::PerRow(values),
                        min_signal: Some(min_signal),
                    },
                ))
            }

            Self::MeanRatio {
                references,
                pre_normalize,
                derived,
            } => {
                let mut prepared = table.clone();
                let mut channels = Vec::with_capacity(references.len());
                for channel in references {
                    let mut values = table.column_f64(channel)?;
                    if let Some(mode) = pre_normalize {
                        let divisor = match mode {
                            EstimationMode::Batch => batch_context(context)?.channel_mean(channel)?,
                            EstimationMode::PerFile => mean(&values).unwrap_or(f64::NAN),
                        };
                        debug!("Pre-normalising {} by {}", channel, divisor);
                        values.iter_mut().for_each(|v| *v /= divisor);
                        prepared = prepared.with_column(channel, values.clone(), None)?;
                    }
                    channels.push(values);
                }

                let row_means: Vec<f64> = (0..table.n_events())
                    .map(|i| {
                        let row: Vec<f64> = channels.iter().map(|c| c[i]).collect();
                        row_mean(&row)
                    })
                    .collect();

                if let Some(d) = derived {
                    prepared = prepared.with_column(&d.name, row_means.clone(), d.index)?;
                }

                Ok((
                    prepared,
                    Correction::Ratio {
                        reference: ReferenceValue::PerRow(row_means),
                        min_signal: Some(min_signal),
                    },
                ))
            }

            Self::MedianRatio { reference } => {
                let values = table.column_f64(reference)?;
                // An empty table has no median; nothing will be divided anyway
                let scalar = median(&values).unwrap_or(f64::NAN);
                Ok((
                    table.clone(),
                    Correction::Ratio {
                        reference: ReferenceValue::Scalar(scalar),
                        min_signal: None,
                    },
                ))
            }

            Self::MinMaxRatio { reference, mode } => {
                let values = table.column_f64(reference)?;
                let (lo, hi) = match mode {
                    EstimationMode::Batch => batch_context(context)?.range()?,
                    EstimationMode::PerFile => {
                        min_max(&values).unwrap_or((f64::NAN, f64::NAN))
                    }
                };
                let rescaled: Vec<f64> = values.iter().map(|v| (v - lo) / (hi - lo)).collect();
                let prepared = table.with_column(reference, rescaled.clone(), None)?;
                Ok((
                    prepared,
                    Correction::Ratio {
                        reference: ReferenceValue::PerRow(rescaled),
                        min_signal: None,
                    },
                ))
            }

            Self::Loess {
                reference,
                span,
                iterations,
                delta,
            } => {
                let values = table.column_f64(reference)?;
                Ok((
                    table.clone(),
                    Correction::Smoothed {
                        reference: values,
                        fitter: Lowess {
                            frac: *span,
                            iterations: *iterations,
                            delta: *delta,
                        },
                    },
                ))
            }
        }
    }
}

fn batch_context(context: Option<&BatchContext>) -> Result<&BatchContext> {
    context.ok_or_else(|| {
        CytoNormError::ConfigError(
            "Batch estimation mode requires a batch context".to_string(),
        )
    })
}
