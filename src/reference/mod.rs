//! Temporal reference buffer rings.

/// Slot rings, slot selection and continuity.
pub mod ring;
