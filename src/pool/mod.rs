//! Device buffer allocation and the job buffer pool.

/// Buffer allocator seam and an in-process implementation.
pub mod allocator;
/// Bounded job buffer pool.
pub mod job_pool;
