use smallvec::SmallVec;

use crate::compile::cost::FrameCost;
use crate::compile::patch::{Patch, PatchList};
use crate::compile::program::Program;
use crate::foundation::core::{BufferHandle, BufferRef};
use crate::foundation::error::{FrameJobError, FrameJobResult};
use crate::layout::offsets::OffsetMap;
use crate::layout::schema::{HeaderField, TableId};
use crate::negotiate::limits::MAX_PASSES;
use crate::negotiate::planner::PassName;
use crate::reference::ring::Continuity;

/// Construction state of a [`FrameJob`]. Transitions only move one step forward.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize)]
pub enum JobState {
    /// Fresh buffer, nothing written.
    Empty,
    /// Header written, program counts zero.
    HeaderWritten,
    /// Every table populated and every patch recorded.
    ProgramsAppended,
    /// Every patch resolved to a device address.
    PatchesResolved,
    /// Ready for submission; immutable.
    Committed,
}

impl JobState {
    /// The only state reachable from `self`.
    pub fn next(self) -> Option<Self> {
        match self {
            Self::Empty => Some(Self::HeaderWritten),
            Self::HeaderWritten => Some(Self::ProgramsAppended),
            Self::ProgramsAppended => Some(Self::PatchesResolved),
            Self::PatchesResolved => Some(Self::Committed),
            Self::Committed => None,
        }
    }
}

/// Device-mappable byte buffer holding one frame job.
///
/// Moved out of the pool on checkout and back on recycle, so at most one request writes it.
#[derive(Debug)]
pub struct JobBuffer {
    buffer: BufferRef,
    bytes: Vec<u8>,
}

impl JobBuffer {
    /// Wrap an allocated buffer; the host mirror is zeroed.
    pub fn new(buffer: BufferRef) -> FrameJobResult<Self> {
        let len = usize::try_from(buffer.len()).map_err(|_| {
            FrameJobError::no_memory(format!("job buffer of {} bytes", buffer.len()))
        })?;
        Ok(Self {
            buffer,
            bytes: vec![0; len],
        })
    }

    /// The buffer as a patch source.
    pub fn buffer_ref(&self) -> BufferRef {
        self.buffer
    }

    /// Buffer handle.
    pub fn handle(&self) -> BufferHandle {
        self.buffer.handle()
    }

    /// Length in bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// `true` for a zero-length buffer. Never the case for an allocated buffer.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Contents.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub(crate) fn reset(&mut self) {
        self.bytes.fill(0);
    }

    fn slot_mut<const N: usize>(&mut self, offset: u32) -> FrameJobResult<&mut [u8]> {
        let start = offset as usize;
        let len = self.bytes.len();
        self.bytes.get_mut(start..start + N).ok_or_else(|| {
            FrameJobError::construction_failed(format!(
                "write of {N} bytes at {offset} overruns job buffer of {len} bytes"
            ))
        })
    }

    pub(crate) fn write_u32(&mut self, offset: u32, v: u32) -> FrameJobResult<()> {
        self.slot_mut::<4>(offset)?.copy_from_slice(&v.to_le_bytes());
        Ok(())
    }

    pub(crate) fn write_u64(&mut self, offset: u32, v: u64) -> FrameJobResult<()> {
        self.slot_mut::<8>(offset)?.copy_from_slice(&v.to_le_bytes());
        Ok(())
    }

    /// Read a little-endian u32.
    pub fn read_u32(&self, offset: u32) -> Option<u32> {
        let start = offset as usize;
        let b = self.bytes.get(start..start + 4)?;
        Some(u32::from_le_bytes(b.try_into().ok()?))
    }

    /// Read a little-endian u64.
    pub fn read_u64(&self, offset: u32) -> Option<u64> {
        let start = offset as usize;
        let b = self.bytes.get(start..start + 8)?;
        Some(u64::from_le_bytes(b.try_into().ok()?))
    }
}

/// The binary descriptor of one request, plus the bookkeeping needed to finish it.
#[derive(Debug)]
pub struct FrameJob {
    request_id: u64,
    batch_size: u32,
    state: JobState,
    buffer: JobBuffer,
    programs: Vec<Program>,
    program_counts: SmallVec<[(TableId, u32); 12]>,
    patches: PatchList,
    resolved: usize,
    ref_valid: [u32; MAX_PASSES],
    continuity: Option<Continuity>,
    cost: FrameCost,
}

impl FrameJob {
    /// Start a job for `request_id` in a checked-out buffer.
    pub fn new(request_id: u64, mut buffer: JobBuffer) -> Self {
        buffer.reset();
        Self {
            request_id,
            batch_size: 1,
            state: JobState::Empty,
            buffer,
            programs: Vec::new(),
            program_counts: SmallVec::new(),
            patches: PatchList::default(),
            resolved: 0,
            ref_valid: [0; MAX_PASSES],
            continuity: None,
            cost: FrameCost::default(),
        }
    }

    /// Request id.
    pub fn request_id(&self) -> u64 {
        self.request_id
    }

    /// Frames in the request.
    pub fn batch_size(&self) -> u32 {
        self.batch_size
    }

    /// Current construction state.
    pub fn state(&self) -> JobState {
        self.state
    }

    /// The job buffer.
    pub fn buffer(&self) -> &JobBuffer {
        &self.buffer
    }

    /// Job bytes as submitted to the firmware.
    pub fn bytes(&self) -> &[u8] {
        self.buffer.bytes()
    }

    /// Programs in append order.
    pub fn programs(&self) -> &[Program] {
        &self.programs
    }

    /// Programs appended to `table`, if the table is present.
    pub fn program_count(&self, table: TableId) -> Option<u32> {
        self.program_counts
            .iter()
            .find(|(t, _)| *t == table)
            .map(|(_, n)| *n)
    }

    /// Recorded patches.
    pub fn patches(&self) -> &PatchList {
        &self.patches
    }

    /// Batch-frame bitmask of valid temporal references for `pass`.
    pub fn ref_valid_mask(&self, pass: PassName) -> u32 {
        self.ref_valid[pass.index()]
    }

    /// Continuity outcome recorded by the reference ring.
    pub fn continuity(&self) -> Option<Continuity> {
        self.continuity
    }

    /// Processing cost estimate.
    pub fn cost(&self) -> FrameCost {
        self.cost
    }

    /// Give the buffer back, discarding the job.
    pub fn into_buffer(self) -> JobBuffer {
        self.buffer
    }

    pub(crate) fn advance(&mut self, to: JobState) -> FrameJobResult<()> {
        if self.state.next() != Some(to) {
            return Err(FrameJobError::invalid_state(format!(
                "job {}: cannot move from {:?} to {to:?}",
                self.request_id, self.state
            )));
        }
        self.state = to;
        Ok(())
    }

    fn expect_state(&self, allowed: &[JobState], what: &str) -> FrameJobResult<()> {
        if !allowed.contains(&self.state) {
            return Err(FrameJobError::invalid_state(format!(
                "job {}: {what} not allowed in {:?}",
                self.request_id, self.state
            )));
        }
        Ok(())
    }

    pub(crate) fn buffer_mut(&mut self) -> FrameJobResult<&mut JobBuffer> {
        self.expect_state(
            &[JobState::Empty, JobState::HeaderWritten, JobState::ProgramsAppended],
            "buffer write",
        )?;
        Ok(&mut self.buffer)
    }

    pub(crate) fn set_batch_size(&mut self, batch_size: u32) {
        self.batch_size = batch_size;
    }

    pub(crate) fn push_program(&mut self, program: Program) -> FrameJobResult<()> {
        self.expect_state(&[JobState::HeaderWritten], "program append")?;
        self.programs.push(program);
        Ok(())
    }

    pub(crate) fn set_program_count(&mut self, table: TableId, count: u32) {
        match self.program_counts.iter_mut().find(|(t, _)| *t == table) {
            Some(entry) => entry.1 = count,
            None => self.program_counts.push((table, count)),
        }
    }

    pub(crate) fn record_patch(&mut self, patch: Patch) -> FrameJobResult<()> {
        self.expect_state(
            &[JobState::HeaderWritten, JobState::ProgramsAppended],
            "patch recording",
        )?;
        self.patches.push(patch)
    }

    pub(crate) fn set_ref_valid(
        &mut self,
        map: &OffsetMap,
        pass: PassName,
        mask: u32,
    ) -> FrameJobResult<()> {
        let offset = map.header_field(HeaderField::RefValid) + 4 * pass.index() as u32;
        self.buffer_mut()?.write_u32(offset, mask)?;
        self.ref_valid[pass.index()] = mask;
        Ok(())
    }

    pub(crate) fn set_continuity(&mut self, continuity: Continuity) {
        self.continuity = Some(continuity);
    }

    pub(crate) fn set_cost(&mut self, cost: FrameCost) {
        self.cost = cost;
    }

    /// Write resolved addresses, one per recorded patch in recording order.
    pub(crate) fn apply_resolved(&mut self, map: &OffsetMap, addresses: &[u64]) -> FrameJobResult<()> {
        self.expect_state(&[JobState::ProgramsAppended], "patch resolution")?;
        if addresses.len() != self.patches.len() {
            return Err(FrameJobError::construction_failed(format!(
                "job {}: {} addresses for {} patches",
                self.request_id,
                addresses.len(),
                self.patches.len()
            )));
        }
        for (patch, &addr) in self.patches.iter().zip(addresses) {
            let offset = patch.destination.absolute(map).ok_or_else(|| {
                FrameJobError::construction_failed("patch destination overflows")
            })?;
            self.buffer.write_u64(offset, addr)?;
        }
        self.resolved = addresses.len();
        self.advance(JobState::PatchesResolved)
    }

    /// Seal the job for submission. Every recorded patch must have been resolved.
    pub fn commit(&mut self) -> FrameJobResult<()> {
        if self.state == JobState::PatchesResolved && self.resolved != self.patches.len() {
            return Err(FrameJobError::construction_failed(format!(
                "job {}: {} of {} patches unresolved",
                self.request_id,
                self.patches.len() - self.resolved,
                self.patches.len()
            )));
        }
        self.advance(JobState::Committed)
    }
}

#[cfg(test)]
#[path = "../../tests/unit/compile/job.rs"]
mod tests;
