use std::collections::BTreeMap;

use crate::compile::job::JobBuffer;
use crate::foundation::core::BufferHandle;
use crate::foundation::error::{FrameJobError, FrameJobResult};
use crate::pool::allocator::{BufferAllocator, BufferPurpose};

/// Pool configuration for job buffers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Number of job buffers, i.e. the maximum number of requests in flight.
    pub capacity: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self { capacity: 8 }
    }
}

impl PoolConfig {
    /// Upper bound accepted by [`PoolConfig::validate`].
    pub const MAX_CAPACITY: usize = 64;

    /// Reject an empty or oversized pool.
    pub fn validate(&self) -> FrameJobResult<()> {
        if self.capacity == 0 || self.capacity > Self::MAX_CAPACITY {
            return Err(FrameJobError::config(format!(
                "pool capacity {} outside 1..={}",
                self.capacity,
                Self::MAX_CAPACITY
            )));
        }
        Ok(())
    }
}

/// Pool counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize)]
pub struct JobPoolStats {
    /// Buffers ready for checkout.
    pub free: usize,
    /// Buffers held by in-flight requests.
    pub checked_out: usize,
    /// Successful checkouts since creation.
    pub checkouts: u64,
    /// Checkouts refused because every buffer was in flight.
    pub exhausted: u64,
}

/// Bounded pool of equally sized job buffers.
///
/// All buffers are allocated up front. A buffer is moved out on checkout and moved back on
/// recycle, keyed by request id, so a request id can hold at most one buffer.
#[derive(Debug)]
pub struct JobPool {
    config: PoolConfig,
    buffer_len: u64,
    free: Vec<JobBuffer>,
    checked_out: BTreeMap<u64, BufferHandle>,
    stats: JobPoolStats,
}

impl JobPool {
    /// Allocate `config.capacity` buffers of `buffer_len` bytes.
    ///
    /// On allocation failure the buffers obtained so far are released again.
    pub fn new(
        config: PoolConfig,
        buffer_len: u64,
        allocator: &mut dyn BufferAllocator,
    ) -> FrameJobResult<Self> {
        config.validate()?;
        let mut free = Vec::with_capacity(config.capacity);
        for _ in 0..config.capacity {
            let allocated = allocator
                .allocate(buffer_len, BufferPurpose::Job)
                .and_then(JobBuffer::new);
            match allocated {
                Ok(b) => free.push(b),
                Err(e) => {
                    for b in free.drain(..) {
                        allocator.free(b.buffer_ref())?;
                    }
                    return Err(e);
                }
            }
        }
        tracing::debug!(
            capacity = config.capacity,
            buffer_len,
            "allocated job pool"
        );
        Ok(Self {
            config,
            buffer_len,
            stats: JobPoolStats {
                free: free.len(),
                ..JobPoolStats::default()
            },
            free,
            checked_out: BTreeMap::new(),
        })
    }

    /// Pool configuration.
    pub fn config(&self) -> PoolConfig {
        self.config
    }

    /// Length of every pooled buffer.
    pub fn buffer_len(&self) -> u64 {
        self.buffer_len
    }

    /// Current counters.
    pub fn stats(&self) -> JobPoolStats {
        self.stats
    }

    /// Requests currently holding a buffer.
    pub fn in_flight(&self) -> usize {
        self.checked_out.len()
    }

    /// `true` if `request_id` holds a buffer.
    pub fn is_checked_out(&self, request_id: u64) -> bool {
        self.checked_out.contains_key(&request_id)
    }

    /// Take a buffer for `request_id`.
    ///
    /// Fails with `EInvalidArg` if the id is already in flight and `ENoMemory` if the pool is
    /// exhausted.
    pub fn checkout(&mut self, request_id: u64) -> FrameJobResult<JobBuffer> {
        if self.checked_out.contains_key(&request_id) {
            return Err(FrameJobError::bad_request(format!(
                "request {request_id} is already in flight"
            )));
        }
        let Some(buffer) = self.free.pop() else {
            self.stats.exhausted = self.stats.exhausted.saturating_add(1);
            return Err(FrameJobError::no_memory(format!(
                "job pool exhausted: {} requests in flight",
                self.checked_out.len()
            )));
        };
        self.checked_out.insert(request_id, buffer.handle());
        self.stats.free = self.free.len();
        self.stats.checked_out = self.checked_out.len();
        self.stats.checkouts = self.stats.checkouts.saturating_add(1);
        Ok(buffer)
    }

    /// Return the buffer held by `request_id`.
    pub fn recycle(&mut self, request_id: u64, buffer: JobBuffer) -> FrameJobResult<()> {
        match self.checked_out.get(&request_id) {
            Some(&h) if h == buffer.handle() => {}
            Some(&h) => {
                return Err(FrameJobError::invalid_state(format!(
                    "request {request_id} returned buffer {} but holds {}",
                    buffer.handle().0,
                    h.0
                )));
            }
            None => {
                return Err(FrameJobError::invalid_state(format!(
                    "request {request_id} holds no job buffer"
                )));
            }
        }
        self.checked_out.remove(&request_id);
        self.free.push(buffer);
        self.stats.free = self.free.len();
        self.stats.checked_out = self.checked_out.len();
        Ok(())
    }

    /// Free every buffer. Fails with `InvalidState` while any buffer is checked out.
    pub fn release(&mut self, allocator: &mut dyn BufferAllocator) -> FrameJobResult<()> {
        if !self.checked_out.is_empty() {
            return Err(FrameJobError::invalid_state(format!(
                "job pool has {} buffers in flight",
                self.checked_out.len()
            )));
        }
        while let Some(b) = self.free.pop() {
            allocator.free(b.buffer_ref())?;
        }
        self.stats.free = 0;
        Ok(())
    }
}

#[cfg(test)]
#[path = "../../tests/unit/pool/job_pool.rs"]
mod tests;
