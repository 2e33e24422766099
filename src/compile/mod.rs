//! Frame job construction: program tables, patches, cost and the job state machine.

/// Table population, LUTs and image binding.
pub mod compiler;
/// Processing cost estimate.
pub mod cost;
/// Job buffer and construction state machine.
pub mod job;
/// Address relocations.
pub mod patch;
/// Program entries and stage sets.
pub mod program;
