//! Zero-inflated series modelling library.
//!
//! This library provides the pipeline behind the `zi-core` binary:
//! - Data loading and presence labelling
//! - A penalized IRLS fitting engine for binomial, Gamma and Tweedie GLMs
//! - Two-part hurdle models (linear, smooth and random-intercept variants)
//! - Tweedie fits with variance-power profiling
//! - Model comparison and report rendering
//! - Configuration, exit codes and structured logging
//!
//! The binary entry point is in `main.rs`.

pub mod compare;
pub mod config;
pub mod data;
pub mod engine;
pub mod exit_codes;
pub mod hurdle;
pub mod logging;
pub mod pipeline;
pub mod report;
pub mod tweedie;
