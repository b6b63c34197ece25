pub mod pipeline;
pub mod reference;
pub mod strategy;

pub use pipeline::{
    CorrectedEventTable, NormalizationConfig, NormalizationReport, normalize, normalize_with,
};
pub use reference::{BatchContext, ReferenceEstimator};
pub use strategy::{Correction, DerivedColumn, EstimationMode, ReferenceValue, StrategyConfig};
