//! Shared domain types for the sinusoid extraction pipeline.

pub mod config;
pub mod types;

pub use config::PipelineConfig;
pub use types::*;
