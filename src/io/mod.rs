//! File input/output: light-curve ingestion and result export.

pub mod export;
pub mod ingest;
