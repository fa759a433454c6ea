//! Forecast inference.
//!
//! Responsibilities:
//!
//! - validate a request against the trained model reference
//! - send the partner's history as endpoint context
//! - decode the endpoint's quantile forecasts

pub mod predictor;
pub mod request;
pub mod response;

pub use predictor::*;
pub use request::*;
pub use response::*;
