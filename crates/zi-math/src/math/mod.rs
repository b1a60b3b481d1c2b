//! Core math modules.

pub mod stable;
pub mod bernoulli;
pub mod gamma;
pub mod stats;
pub mod tweedie;
