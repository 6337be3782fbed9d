//! Operational telemetry about the service itself.

pub mod health;
