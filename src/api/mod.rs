// Process-facing API: tracing setup and the service facade.

pub mod service;
pub mod telemetry;
