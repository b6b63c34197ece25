pub mod emd;
pub mod lowess;
pub mod summary;

pub use emd::earth_movers_distance;
pub use lowess::{CurveFitter, FittedCurve, Lowess};
pub use summary::{mean, median, min_max, row_mean};
