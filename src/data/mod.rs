//! Synthetic light-curve generation for the demo mode and tests.

pub mod sample;

pub use sample::{generate_sample, SampleConfig};
