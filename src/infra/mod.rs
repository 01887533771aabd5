//! Runtime bootstrap: settings, logging and metric descriptions.

pub mod error;
pub mod runtime;
pub mod telemetry;

pub use error::InfraError;
pub use runtime::Runtime;
