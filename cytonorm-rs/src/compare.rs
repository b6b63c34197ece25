//! Signed Earth Mover's Distance between two event populations
//!
//! Every marker series is validated before any distance is computed. A failed
//! check aborts the whole comparison: no record is produced for the failing
//! marker or any marker after it.

use crate::error::{CytoNormError, DataQualityIssue, Result, Side};
use crate::stats::emd::earth_movers_distance;
use crate::stats::summary::median;
use crate::table::{EventTable, column_values, is_numeric_dtype};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use tracing::{debug, error};

/// Shift of one marker between the `from` and `to` populations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmdRecord {
    pub marker: String,
    pub median_from: f64,
    pub median_to: f64,
    /// `median_from - median_to`
    pub median_diff: f64,
    /// EMD carrying the sign of `median_diff`; non-negative when the medians are equal
    pub emd: f64,
}

/// Validate both series and compute the signed EMD for one marker
pub fn compare_marker(marker: &str, from: &[f64], to: &[f64]) -> Result<EmdRecord> {
    check_series(marker, from, to)?;

    let median_from = median(from)?;
    let median_to = median(to)?;
    let median_diff = median_from - median_to;
    let distance = earth_movers_distance(from, to)?;
    let emd = if median_diff >= 0.0 { distance } else { -distance };

    debug!(
        "{}: median {} -> {}, EMD {}",
        marker, median_from, median_to, emd
    );

    Ok(EmdRecord {
        marker: marker.to_string(),
        median_from,
        median_to,
        median_diff,
        emd,
    })
}

/// Compare every marker, in the given order
///
/// # Errors
/// The first [`CytoNormError::DataQuality`] (or missing column) encountered;
/// records already computed for earlier markers are discarded with it.
pub fn compare_all<S: AsRef<str>>(
    markers: &[S],
    from: &EventTable,
    to: &EventTable,
) -> Result<Vec<EmdRecord>> {
    compare_frames(markers, from.data_frame(), to.data_frame())
}

/// [`compare_all`] over raw DataFrames, whose columns may be of any type
pub fn compare_frames<S: AsRef<str>>(
    markers: &[S],
    from: &DataFrame,
    to: &DataFrame,
) -> Result<Vec<EmdRecord>> {
    markers
        .iter()
        .map(|marker| {
            let marker = marker.as_ref();
            let from_column = marker_column(marker, from)?;
            let to_column = marker_column(marker, to)?;
            check_types(marker, from_column, to_column)?;
            compare_marker(marker, &column_values(from_column)?, &column_values(to_column)?)
        })
        .collect()
}

fn marker_column<'a>(marker: &str, data_frame: &'a DataFrame) -> Result<&'a Column> {
    data_frame
        .column(marker)
        .map_err(|_| CytoNormError::ColumnNotFound(marker.to_string()))
}

fn check_types(marker: &str, from: &Column, to: &Column) -> Result<()> {
    let failing = [(Side::From, from), (Side::To, to)]
        .into_iter()
        .find(|(_, column)| !is_numeric_dtype(column.dtype()));
    let Some((side, column)) = failing else {
        return Ok(());
    };

    let issue = DataQualityIssue::UnsupportedType {
        dtype: column.dtype().to_string(),
    };
    error!("Marker {} failed validation ({} population): {}", marker, side, issue);
    error!("  from: {}", describe_column(from));
    error!("  to:   {}", describe_column(to));
    Err(CytoNormError::data_quality(marker, side, issue))
}

/// Gates run across both sides before moving on: empty, then NaN, then infinite
fn check_series(marker: &str, from: &[f64], to: &[f64]) -> Result<()> {
    let sides = [(Side::From, from), (Side::To, to)];
    let gates: [fn(&[f64]) -> Option<DataQualityIssue>; 3] = [
        |series| series.is_empty().then_some(DataQualityIssue::Empty),
        |series| {
            let count = series.iter().filter(|v| v.is_nan()).count();
            (count > 0).then_some(DataQualityIssue::ContainsNaN { count })
        },
        |series| {
            let count = series.iter().filter(|v| v.is_infinite()).count();
            (count > 0).then_some(DataQualityIssue::ContainsInfinite { count })
        },
    ];

    let failure = gates.iter().find_map(|gate| {
        sides
            .iter()
            .find_map(|&(side, series)| gate(series).map(|issue| (side, issue)))
    });
    let Some((side, issue)) = failure else {
        return Ok(());
    };

    error!("Marker {} failed validation ({} population): {}", marker, side, issue);
    error!("  from: {}", describe(from));
    error!("  to:   {}", describe(to));
    Err(CytoNormError::data_quality(marker, side, issue))
}

fn describe_column(column: &Column) -> String {
    match column_values(column) {
        Ok(values) => describe(&values),
        Err(_) => format!("{} values of type {}", column.len(), column.dtype()),
    }
}

fn describe(series: &[f64]) -> String {
    let n_nan = series.iter().filter(|v| v.is_nan()).count();
    let n_inf = series.iter().filter(|v| v.is_infinite()).count();
    let head: Vec<String> = series.iter().take(5).map(|v| v.to_string()).collect();
    format!(
        "{} values ({} NaN, {} infinite), first [{}]",
        series.len(),
        n_nan,
        n_inf,
        head.join(", ")
    )
}

/// One row of an [`EmdTable`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmdRow {
    pub from: String,
    pub to: String,
    #[serde(flatten)]
    pub record: EmdRecord,
}

/// Accumulated comparison results for one or more population pairs
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmdTable {
    pub rows: Vec<EmdRow>,
}

impl EmdTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append the records of one comparison pair
    pub fn push_pair(&mut self, from: &str, to: &str, records: Vec<EmdRecord>) {
        self.rows.extend(records.into_iter().map(|record| EmdRow {
            from: from.to_string(),
            to: to.to_string(),
            record,
        }));
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn to_data_frame(&self) -> Result<DataFrame> {
        let text = |f: fn(&EmdRow) -> &str| -> Vec<String> {
            self.rows.iter().map(|r| f(r).to_string()).collect()
        };
        let number = |f: fn(&EmdRecord) -> f64| -> Vec<f64> {
            self.rows.iter().map(|r| f(&r.record)).collect()
        };

        let df = DataFrame::new(vec![
            Column::new("from".into(), text(|r| r.from.as_str())),
            Column::new("to".into(), text(|r| r.to.as_str())),
            Column::new("marker".into(), text(|r| r.record.marker.as_str())),
            Column::new("median_from".into(), number(|r| r.median_from)),
            Column::new("median_to".into(), number(|r| r.median_to)),
            Column::new("median_diff".into(), number(|r| r.median_diff)),
            Column::new("emd".into(), number(|r| r.emd)),
        ])?;
        Ok(df)
    }

    /// Tab-delimited, one header row
    pub fn write_tsv(&self, path: &Path) -> Result<()> {
        crate::io::write_data_frame(path, &self.to_data_frame()?)
    }

    pub fn write_json(&self, path: &Path) -> Result<()> {
        let identifier = path.display().to_string();
        let file = File::create(path).map_err(|e| CytoNormError::write_failed(&identifier, e))?;
        serde_json::to_writer_pretty(BufWriter::new(file), &self.rows)
            .map_err(|e| CytoNormError::write_failed(identifier, e))
    }
}
