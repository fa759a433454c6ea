//! Terminal reports for each stage.

pub mod format;

pub use format::*;
