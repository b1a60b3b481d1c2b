//! Shared types for the zero-inflated series workspace.
//!
//! This crate provides foundational types shared across zi-core modules:
//! - The unified error type with stable codes
//! - Run identifiers for log correlation
//! - Output format specifications

pub mod error;
pub mod id;
pub mod output;

pub use error::{format_error_human, Error, ErrorCategory, Result, StructuredError, SuggestedAction};
pub use id::RunId;
pub use output::OutputFormat;
