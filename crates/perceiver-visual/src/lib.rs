//! Visual Perceiver - vision fallback for element location
//!
//! This crate provides:
//! - The [`VisionLocator`] port and prompt/response handling
//! - An HTTP client for Ollama-compatible inference services
//! - A content-addressed response cache shared across sessions
//! - Acceptance rules for vision answers

pub mod cache;
pub mod client;
pub mod errors;
pub mod fingerprint;
pub mod http;
pub mod models;

// Re-exports
pub use cache::{CacheEntry, CacheStats, CachedVisionLocator, ResponseCache};
pub use client::{build_prompt, extract_json_object, parse_response, VisionLocator};
pub use errors::VisionError;
pub use fingerprint::fingerprint;
pub use http::{HttpVisionClient, HttpVisionConfig};
pub use models::*;
