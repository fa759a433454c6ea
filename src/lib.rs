//! `revenue-forecast` library crate.
//!
//! The binary (`rf`) is a thin wrapper around this library so that:
//!
//! - each stage is testable without spawning processes
//! - the AutoML service sits behind traits that tests can stub
//! - the preprocess, train and predict stages can be driven independently

pub mod app;
pub mod cli;
pub mod cloud;
pub mod config;
pub mod domain;
pub mod error;
pub mod io;
pub mod predict;
pub mod prep;
pub mod report;
pub mod train;
