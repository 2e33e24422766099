//! Buffer-dimension negotiation.
//!
//! Per-output requirements are merged into one input requirement, and the multi-pass cascade is
//! derived from it. This runs once per stream (re)configuration.

/// Hardware dimension and scaling limits.
pub mod limits;
/// Pass planning from merged requirements.
pub mod planner;
/// Per-output buffer requirements and their merge rule.
pub mod requirement;
