//! Observations, presence labelling, and input loading.

pub mod loader;
pub mod observation;
pub mod presence;

pub use loader::{load_csv, load_csv_reader, DataColumns, LoadError};
pub use observation::{CovariateValue, Covariates, Observation, ObservationSeries};
pub use presence::build_series;
