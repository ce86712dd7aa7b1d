//! Observability for flowrig: tracing subscriber setup with optional
//! OpenTelemetry export.

pub mod tracing_setup;

pub use tracing_setup::{init_tracing, shutdown_tracing, TracingOptions};
