//! Batch-level reference statistics
//!
//! Computed once over every table of a run, before any table is normalised,
//! then shared read-only (typically behind an `Arc`) with the per-table workers.

use crate::error::{CytoNormError, Result};
use crate::norm::strategy::{EstimationMode, StrategyConfig};
use crate::stats::summary::{mean, min_max};
use crate::table::EventTable;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Read-only statistics shared by every table in a batch
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchContext {
    /// Mean of each reference channel over the concatenated batch
    pub channel_means: BTreeMap<String, f64>,
    /// (min, max) of the rescaled reference channel over the concatenated batch
    pub reference_range: Option<(f64, f64)>,
    /// Number of tables the statistics were taken from
    pub n_tables: usize,
}

impl BatchContext {
    pub fn channel_mean(&self, channel: &str) -> Result<f64> {
        self.channel_means.get(channel).copied().ok_or_else(|| {
            CytoNormError::ConfigError(format!(
                "Batch context has no mean for reference channel {channel}"
            ))
        })
    }

    pub fn range(&self) -> Result<(f64, f64)> {
        self.reference_range.ok_or_else(|| {
            CytoNormError::ConfigError("Batch context has no reference range".to_string())
        })
    }
}

/// Computes [`BatchContext`] statistics over the row-wise union of a batch
pub struct ReferenceEstimator;

impl ReferenceEstimator {
    /// Per-channel mean across all tables, skipping NaN
    ///
    /// The result does not depend on the order of `tables`.
    pub fn channel_means<S: AsRef<str>>(
        tables: &[EventTable],
        channels: &[S],
    ) -> Result<BTreeMap<String, f64>> {
        channels
            .iter()
            .map(|channel| {
                let values = concatenated(tables, channel.as_ref())?;
                let m = mean(&values).map_err(|_| no_usable_values(channel.as_ref(), &values))?;
                Ok((channel.as_ref().to_string(), m))
            })
            .collect()
    }

    /// Minimum and maximum of one channel across all tables
    pub fn global_min_max(tables: &[EventTable], channel: &str) -> Result<(f64, f64)> {
        let values = concatenated(tables, channel)?;
        min_max(&values).map_err(|_| no_usable_values(channel, &values))
    }

    /// Everything `strategy` needs from the batch; empty for per-file strategies
    pub fn estimate(tables: &[EventTable], strategy: &StrategyConfig) -> Result<BatchContext> {
        let mut context = BatchContext {
            n_tables: tables.len(),
            ..Default::default()
        };

        match strategy {
            StrategyConfig::MeanRatio {
                references,
                pre_normalize: Some(EstimationMode::Batch),
                ..
            } => {
                context.channel_means = Self::channel_means(tables, references)?;
                for (channel, m) in &context.channel_means {
                    debug!("Batch mean for {}: {}", channel, m);
                }
            }
            StrategyConfig::MinMaxRatio {
                reference,
                mode: EstimationMode::Batch,
            } => {
                let range = Self::global_min_max(tables, reference)?;
                debug!("Batch range for {}: [{}, {}]", reference, range.0, range.1);
                context.reference_range = Some(range);
            }
            _ => return Ok(context),
        }

        info!(
            "Estimated batch reference statistics from {} tables",
            tables.len()
        );
        Ok(context)
    }
}

fn no_usable_values(channel: &str, values: &[f64]) -> CytoNormError {
    CytoNormError::StatsError(format!(
        "Channel {} has no non-NaN values across {} batch rows",
        channel,
        values.len()
    ))
}

fn concatenated(tables: &[EventTable], channel: &str) -> Result<Vec<f64>> {
    if tables.is_empty() {
        return Err(CytoNormError::InsufficientData { min: 1, actual: 0 });
    }
    let mut values = Vec::with_capacity(tables.iter().map(EventTable::n_events).sum());
    for table in tables {
        values.extend(table.column_f64(channel)?);
    }
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn batch() -> Vec<EventTable> {
        vec![
            EventTable::from_columns([("Ru100", vec![1.0, 3.0]), ("Ru101", vec![10.0, 20.0])])
                .unwrap(),
            EventTable::from_columns([
                ("Ru100", vec![5.0, 7.0, 9.0]),
                ("Ru101", vec![30.0, 40.0, 50.0]),
            ])
            .unwrap(),
        ]
    }

    #[test]
    fn test_channel_means_use_concatenation() {
        let means = ReferenceEstimator::channel_means(&batch(), &["Ru100", "Ru101"]).unwrap();
        // 25 / 5, not the mean of per-table means
        assert_relative_eq!(means["Ru100"], 5.0);
        assert_relative_eq!(means["Ru101"], 30.0);
    }

    #[test]
    fn test_global_min_max() {
        let range = ReferenceEstimator::global_min_max(&batch(), "Ru101").unwrap();
        assert_eq!(range, (10.0, 50.0));
    }

    #[test]
    fn test_missing_channel_is_configuration_error() {
        let err = ReferenceEstimator::channel_means(&batch(), &["Ru102"]).unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_empty_batch_rejected() {
        assert!(ReferenceEstimator::global_min_max(&[], "Ru100").is_err());
    }

    #[test]
    fn test_all_nan_channel_names_channel_and_rows() {
        let tables = vec![
            EventTable::from_columns([("Ru100", vec![f64::NAN, f64::NAN])]).unwrap(),
            EventTable::from_columns([("Ru100", vec![f64::NAN])]).unwrap(),
        ];
        for err in [
            ReferenceEstimator::channel_means(&tables, &["Ru100"]).unwrap_err(),
            ReferenceEstimator::global_min_max(&tables, "Ru100").unwrap_err(),
        ] {
            match err {
                CytoNormError::StatsError(message) => {
                    assert!(message.contains("Ru100"));
                    assert!(message.contains("3 batch rows"));
                }
                other => panic!("unexpected error: {other}"),
            }
        }
    }

    #[test]
    fn test_estimate_only_fills_what_strategy_needs() {
        let strategy = StrategyConfig::MinMaxRatio {
            reference: "Ru100".to_string(),
            mode: EstimationMode::Batch,
        };
        let ctx = ReferenceEstimator::estimate(&batch(), &strategy).unwrap();
        assert_eq!(ctx.reference_range, Some((1.0, 9.0)));
        assert!(ctx.channel_means.is_empty());
        assert_eq!(ctx.n_tables, 2);

        let per_file = StrategyConfig::MinMaxRatio {
            reference: "Ru100".to_string(),
            mode: EstimationMode::PerFile,
        };
        let ctx = ReferenceEstimator::estimate(&batch(), &per_file).unwrap();
        assert_eq!(ctx.reference_range, None);
        assert!(ctx.range().is_err());
    }
}
