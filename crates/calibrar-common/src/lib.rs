//! Shared infrastructure for the calibrar workspace.
//!
//! Holds the single error type used across calibration, quantization and
//! evaluation, so every stage reports failures with the same codes.
//!
//! # Toyota Way Principles
//!
//! - **Jidoka**: Rich error messages with actionable diagnostics
//! - **Muda Elimination**: Single source of truth for shared code

pub mod error;

pub use error::{CalibrarError, Result};
