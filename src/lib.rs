//! `prewhiten` library crate.
//!
//! The binary (`pw`) is a thin wrapper around this library so that:
//!
//! - core logic is testable without spawning processes
//! - modules are reusable (e.g., batch drivers, notebooks)
//! - code stays easy to navigate as the project grows

pub mod app;
pub mod cli;
pub mod data;
pub mod domain;
pub mod error;
pub mod extract;
pub mod fit;
pub mod harmonics;
pub mod io;
pub mod math;
pub mod report;
pub mod spectrum;
