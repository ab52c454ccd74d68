//! Relocator - turn recorded element descriptions back into live elements
//!
//! Structural strategies are tried across every reachable shadow root and
//! same-origin frame, then a vision service is consulted once through a
//! shared response cache, and when both fail the failure is classified with
//! ranked fix suggestions.

pub mod config;
pub mod errors;
pub mod pipeline;
pub mod report;
pub mod telemetry;

pub use config::RelocatorConfig;
pub use errors::RelocateError;
pub use pipeline::Relocator;
pub use report::{ResolutionMethod, ResolutionOutcome, ResolutionReport};

pub use action_locator;
pub use failure_analyzer;
pub use perceiver_visual;
pub use relocator_core_types as core_types;
