//! Reference-channel normalisation for mass-cytometry event tables
//!
//! This crate corrects per-cell marker intensities for technical variation
//! using one or more reference channels, and measures how far a marker's
//! distribution has shifted between two populations with a signed Earth
//! Mover's Distance.
//!
//! # Quick Start
//!
//! ```no_run
//! use cytonorm_rs::{EventTable, NormalizationConfig, StrategyConfig, normalize};
//!
//! let table = EventTable::from_columns([
//!     ("Cell_Index", vec![1.0, 2.0, 3.0]),
//!     ("RefCh", vec![2.0, 0.005, 4.0]),
//!     ("M1", vec![10.0, 1.0, 8.0]),
//! ])?;
//!
//! let config = NormalizationConfig::new(StrategyConfig::DirectRatio {
//!     reference: "RefCh".to_string(),
//! })
//! .with_ignore(["Cell_Index"]);
//!
//! let corrected = normalize(&table, &config, None)?;
//! println!(
//!     "{} -> {} events",
//!     corrected.report.n_events_before, corrected.report.n_events_after
//! );
//! # Ok::<(), cytonorm_rs::CytoNormError>(())
//! ```
//!
//! # Batch Example
//!
//! Strategies that run in [`EstimationMode::Batch`] need statistics from
//! every table of the run before any single table is corrected:
//!
//! ```rust,no_run
//! use cytonorm_rs::{
//!     DelimitedFiles, EstimationMode, NormalizationConfig, PrefixedSink, ReferenceEstimator,
//!     StrategyConfig, TableSink, TableSource, normalize,
//! };
//! use std::path::PathBuf;
//! use std::sync::Arc;
//!
//! let source = DelimitedFiles::discover(&[PathBuf::from("data/")], "txt")?;
//! let config = NormalizationConfig::new(StrategyConfig::MinMaxRatio {
//!     reference: "DNA1".to_string(),
//!     mode: EstimationMode::Batch,
//! });
//!
//! let inputs = source.list_inputs()?;
//! let tables = inputs
//!     .iter()
//!     .map(|id| source.read(id))
//!     .collect::<cytonorm_rs::Result<Vec<_>>>()?;
//! let context = Arc::new(ReferenceEstimator::estimate(&tables, &config.strategy)?);
//!
//! let sink = PrefixedSink::beside_inputs();
//! for (id, table) in inputs.iter().zip(&tables) {
//!     let corrected = normalize(table, &config, Some(&context))?;
//!     sink.write(id, &corrected.table)?;
//! }
//! # Ok::<(), cytonorm_rs::CytoNormError>(())
//! ```

pub mod compare;
pub mod error;
pub mod io;
pub mod norm;
pub mod stats;
pub mod table;

pub use compare::{EmdRecord, EmdRow, EmdTable, compare_all, compare_frames, compare_marker};
pub use error::{CytoNormError, DataQualityIssue, Result, Side};
pub use io::{
    DelimitedFiles, PrefixedSink, TableSink, TableSource, read_data_frame, read_delimited,
    write_delimited,
};
pub use norm::{
    BatchContext, CorrectedEventTable, DerivedColumn, EstimationMode, NormalizationConfig,
    NormalizationReport, ReferenceEstimator, ReferenceValue, StrategyConfig, normalize,
    normalize_with,
};
pub use stats::{CurveFitter, FittedCurve, Lowess};
pub use table::EventTable;
