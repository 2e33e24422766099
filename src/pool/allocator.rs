use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use crate::foundation::core::{BufferHandle, BufferRef};
use crate::foundation::error::{FrameJobError, FrameJobResult};
use crate::negotiate::planner::PassName;

/// What a buffer is allocated for. Forwarded to the allocator for accounting.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BufferPurpose {
    /// A pooled frame job buffer.
    Job,
    /// A reference ring slot.
    Reference {
        /// Pass owning the slot.
        pass: PassName,
        /// Ring index.
        slot: u32,
    },
}

/// Source of device-mappable buffers.
///
/// Implementations stand in for device acquisition and the memory manager. The engine only
/// allocates at configuration and frees at teardown or reconfiguration.
pub trait BufferAllocator: Send {
    /// Allocate `len` bytes.
    fn allocate(&mut self, len: u64, purpose: BufferPurpose) -> FrameJobResult<BufferRef>;

    /// Release a buffer returned by [`BufferAllocator::allocate`].
    fn free(&mut self, buffer: BufferRef) -> FrameJobResult<()>;
}

/// Counters kept by [`SequentialAllocator`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize)]
pub struct AllocatorStats {
    /// Live buffers.
    pub live_buffers: usize,
    /// Live bytes.
    pub live_bytes: u64,
    /// Allocations served since creation.
    pub allocations: u64,
    /// Frees served since creation.
    pub frees: u64,
}

/// In-process allocator handing out increasing handles, with an optional byte budget.
#[derive(Debug)]
pub struct SequentialAllocator {
    next: u32,
    budget: Option<u64>,
    live: BTreeMap<BufferHandle, u64>,
    stats: AllocatorStats,
}

impl Default for SequentialAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl SequentialAllocator {
    /// Unbounded allocator; the first handle is 1.
    pub fn new() -> Self {
        Self {
            next: 1,
            budget: None,
            live: BTreeMap::new(),
            stats: AllocatorStats::default(),
        }
    }

    /// Allocator failing with `ENoMemory` once live bytes would exceed `bytes`.
    pub fn with_budget(bytes: u64) -> Self {
        Self {
            budget: Some(bytes),
            ..Self::new()
        }
    }

    /// Current counters.
    pub fn stats(&self) -> AllocatorStats {
        self.stats
    }

    /// `true` if `handle` is live.
    pub fn is_live(&self, handle: BufferHandle) -> bool {
        self.live.contains_key(&handle)
    }
}

impl BufferAllocator for SequentialAllocator {
    fn allocate(&mut self, len: u64, purpose: BufferPurpose) -> FrameJobResult<BufferRef> {
        if let Some(budget) = self.budget
            && self.stats.live_bytes.saturating_add(len) > budget
        {
            return Err(FrameJobError::no_memory(format!(
                "{purpose:?}: {len} bytes requested, {} of {budget} in use",
                self.stats.live_bytes
            )));
        }
        let handle = BufferHandle(self.next);
        let buffer = BufferRef::new(handle, len)?;
        self.next = self
            .next
            .checked_add(1)
            .ok_or_else(|| FrameJobError::no_memory("buffer handles exhausted"))?;

        self.live.insert(handle, len);
        self.stats.live_buffers = self.live.len();
        self.stats.live_bytes = self.stats.live_bytes.saturating_add(len);
        self.stats.allocations = self.stats.allocations.saturating_add(1);
        Ok(buffer)
    }

    fn free(&mut self, buffer: BufferRef) -> FrameJobResult<()> {
        let len = self.live.remove(&buffer.handle()).ok_or_else(|| {
            FrameJobError::invalid_pointer(format!(
                "free of unknown buffer {}",
                buffer.handle().0
            ))
        })?;
        self.stats.live_buffers = self.live.len();
        self.stats.live_bytes = self.stats.live_bytes.saturating_sub(len);
        self.stats.frees = self.stats.frees.saturating_add(1);
        Ok(())
    }
}

/// Shared allocator, so a caller can allocate its own buffers from the allocator an engine owns.
impl<A: BufferAllocator + ?Sized> BufferAllocator for Arc<Mutex<A>> {
    fn allocate(&mut self, len: u64, purpose: BufferPurpose) -> FrameJobResult<BufferRef> {
        self.lock()
            .map_err(|_| FrameJobError::invalid_state("allocator lock poisoned"))?
            .allocate(len, purpose)
    }

    fn free(&mut self, buffer: BufferRef) -> FrameJobResult<()> {
        self.lock()
            .map_err(|_| FrameJobError::invalid_state("allocator lock poisoned"))?
            .free(buffer)
    }
}
