use smallvec::SmallVec;

use crate::compile::job::FrameJob;
use crate::foundation::core::BufferRef;
use crate::foundation::error::{FrameJobError, FrameJobResult};
use crate::layout::offsets::OffsetMap;

/// Resolves buffers to device addresses (the memory-mapping step).
pub trait AddressMapper {
    /// Device address of the first byte of `buffer`. Must not be zero.
    fn device_address(&self, buffer: BufferRef) -> FrameJobResult<u64>;
}

/// Receives committed frame jobs (kernel submission).
///
/// Ordering contract: jobs arrive in submission order; the caller completes them later through
/// the engine.
pub trait FrameJobSubmitter: Send {
    /// Hand a committed job to the device.
    fn submit(&mut self, job: &FrameJob) -> FrameJobResult<()>;
}

/// Resolve every recorded patch of `job` through `mapper` and write the addresses.
///
/// The job moves from `ProgramsAppended` to `PatchesResolved`. Nothing is written unless every
/// patch resolves.
pub fn resolve_patches(
    job: &mut FrameJob,
    map: &OffsetMap,
    mapper: &dyn AddressMapper,
) -> FrameJobResult<()> {
    let mut addresses: SmallVec<[u64; 64]> = SmallVec::with_capacity(job.patches().len());
    for patch in job.patches() {
        let base = mapper.device_address(patch.source)?;
        if base == 0 {
            return Err(FrameJobError::invalid_pointer(format!(
                "buffer {} maps to a null device address",
                patch.source.handle().0
            )));
        }
        let addr = base.checked_add(patch.source_offset).ok_or_else(|| {
            FrameJobError::invalid_pointer(format!(
                "address of buffer {} + {} overflows",
                patch.source.handle().0,
                patch.source_offset
            ))
        })?;
        addresses.push(addr);
    }
    job.apply_resolved(map, &addresses)
}

/// Resolve, commit and hand `job` to `submitter`.
pub fn submit_job(
    job: &mut FrameJob,
    map: &OffsetMap,
    mapper: &dyn AddressMapper,
    submitter: &mut dyn FrameJobSubmitter,
) -> FrameJobResult<()> {
    resolve_patches(job, map, mapper)?;
    job.commit()?;
    submitter.submit(job)?;
    tracing::debug!(
        request_id = job.request_id(),
        patches = job.patches().len(),
        "submitted frame job"
    );
    Ok(())
}

#[cfg(test)]
#[path = "../../tests/unit/submit/resolve.rs"]
mod tests;
