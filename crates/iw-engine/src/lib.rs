//! Analysis and search orchestration for Inkwell.

pub mod analysis;
pub mod cache;
pub mod concept;
pub mod config;
pub mod embedding;
pub mod engine;
pub mod fallback;
pub mod fingerprint;
pub mod json_extract;
pub mod llm;
pub mod rate_limit;
pub mod search;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use engine::InkwellEngine;
