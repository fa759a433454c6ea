//! Input/output helpers.
//!
//! - CSV ingest + validation (`ingest`)
//! - processed split / forecast CSV writers (`export`)
//! - preprocessing manifest (`manifest`)
//! - training summary hand-off (`model_ref`)

pub mod export;
pub mod ingest;
pub mod manifest;
pub mod model_ref;

pub use export::*;
pub use ingest::*;
pub use manifest::*;
pub use model_ref::*;
