use crate::compile::job::FrameJob;
use crate::foundation::core::BufferRef;
use crate::foundation::error::{FrameJobError, FrameJobResult};
use crate::foundation::math::Digest;
use crate::submit::resolve::{AddressMapper, FrameJobSubmitter};

/// Mapper placing buffer `h` at `base + h * stride`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StridedMapper {
    /// Address of the (never mapped) null handle.
    pub base: u64,
    /// Distance between consecutive handles.
    pub stride: u64,
}

impl Default for StridedMapper {
    fn default() -> Self {
        Self {
            base: 0x1_0000_0000,
            stride: 1 << 28,
        }
    }
}

impl AddressMapper for StridedMapper {
    fn device_address(&self, buffer: BufferRef) -> FrameJobResult<u64> {
        if buffer.len() > self.stride {
            return Err(FrameJobError::invalid_pointer(format!(
                "buffer {} of {} bytes exceeds mapping stride {}",
                buffer.handle().0,
                buffer.len(),
                self.stride
            )));
        }
        u64::from(buffer.handle().0)
            .checked_mul(self.stride)
            .and_then(|off| off.checked_add(self.base))
            .ok_or_else(|| {
                FrameJobError::invalid_pointer(format!(
                    "buffer {} outside the address space",
                    buffer.handle().0
                ))
            })
    }
}

/// Summary of one submitted job.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize)]
pub struct SubmittedJob {
    /// Request id.
    pub request_id: u64,
    /// Job length in bytes.
    pub len: usize,
    /// Recorded patches.
    pub patches: usize,
    /// xxh3 digest of the submitted bytes.
    pub digest: u64,
}

/// In-memory submitter for tests and the command-line driver.
#[derive(Debug, Default)]
pub struct InMemorySubmitter {
    submitted: Vec<SubmittedJob>,
    fail_next: bool,
}

impl InMemorySubmitter {
    /// Create an empty submitter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Jobs received so far, in submission order.
    pub fn submitted(&self) -> &[SubmittedJob] {
        &self.submitted
    }

    /// Make the next submission fail.
    pub fn fail_next(&mut self) {
        self.fail_next = true;
    }
}

impl FrameJobSubmitter for InMemorySubmitter {
    fn submit(&mut self, job: &FrameJob) -> FrameJobResult<()> {
        if std::mem::take(&mut self.fail_next) {
            return Err(FrameJobError::construction_failed(format!(
                "submission of job {} rejected",
                job.request_id()
            )));
        }
        let mut d = Digest::new();
        for chunk in job.bytes().chunks(8) {
            let mut word = [0u8; 8];
            word[..chunk.len()].copy_from_slice(chunk);
            d.write_u64(u64::from_le_bytes(word));
        }
        self.submitted.push(SubmittedJob {
            request_id: job.request_id(),
            len: job.bytes().len(),
            patches: job.patches().len(),
            digest: d.finish(),
        });
        Ok(())
    }
}
