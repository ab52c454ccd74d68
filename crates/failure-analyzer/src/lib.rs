//! Failure Analyzer - explains why an element could not be resolved
//!
//! This crate implements:
//! - Evidence model (attempts, vision outcome, screenshots, console, URL)
//! - Ordered root-cause rules with confidence scores
//! - Ranked fix suggestions

pub mod analyzer;
pub mod evidence;
pub mod types;

pub use analyzer::*;
pub use evidence::*;
pub use types::*;
