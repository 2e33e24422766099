//! Patch resolution and job submission.

/// In-process mapper and submitter.
pub mod local;
/// Mapping and submission seams.
pub mod resolve;
