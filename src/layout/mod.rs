//! Frame-job binary layout: the versioned ABI description and the per-configuration offset map.

/// Offset map generation.
pub mod offsets;
/// Versioned ABI description.
pub mod schema;
