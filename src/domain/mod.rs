//! Domain types used throughout the pipeline.
//!
//! This module defines:
//!
//! - validated revenue records and the series built from them
//! - train/test splits
//! - forecast requests/results and the trained model reference

pub mod types;

pub use types::*;
