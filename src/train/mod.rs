//! AutoML training orchestration.
//!
//! Responsibilities:
//!
//! - build the job definition and a service-safe job name
//! - upload the processed dataset and submit the job
//! - poll until the job finishes, then record the trained model reference

pub mod job;
pub mod trainer;

pub use job::*;
pub use trainer::*;
