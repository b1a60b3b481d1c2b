//! Zero-inflation math utilities.

pub mod math;

pub use math::stable::*;
pub use math::bernoulli;
pub use math::gamma;
pub use math::stats::*;
pub use math::tweedie;
