//! Configuration-scoped engine and per-request lifecycle.

/// Engine and stream configuration.
pub mod config;
/// The engine.
pub mod engine;
/// Synthetic requests for diagnostics and tests.
pub mod synthetic;
