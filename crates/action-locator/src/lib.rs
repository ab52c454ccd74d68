//! Locator descriptors and multi-strategy element resolution
//!
//! This crate turns a recorded element description back into a live element:
//! - Descriptor model with prioritized strategies and outcome counters
//! - Context navigation across open shadow roots and same-origin frames
//! - Per-root strategy resolution with kind-specific matching rules
//! - Success tracking and pluggable attempt ordering

pub mod descriptor;
pub mod driver;
pub mod errors;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
pub mod navigator;
pub mod resolver;
pub mod strategies;
pub mod tracker;
pub mod types;

pub use descriptor::*;
pub use driver::*;
pub use errors::*;
pub use navigator::*;
pub use resolver::*;
pub use tracker::*;
pub use types::*;
