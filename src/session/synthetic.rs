use crate::compile::compiler::{
    CommandRegion, CommandRegions, ImageBinding, LutRegion, LutRegions, PlaneBinding,
};
use crate::compile::program::StageSet;
use crate::foundation::core::{BufferFormat, BufferRef};
use crate::foundation::error::FrameJobResult;
use crate::layout::schema::{IoImage, StageKind};
use crate::negotiate::planner::PassName;
use crate::pool::allocator::{BufferAllocator, BufferPurpose};
use crate::session::engine::{Engine, FrameRequest};

/// Bytes of command data bound to every stage.
pub const COMMAND_BYTES: u32 = 256;
/// Bytes of every synthetic LUT.
pub const LUT_BYTES: u32 = 1024;

/// Caller-side buffers backing a synthetic request.
#[derive(Clone, Debug, Default)]
pub struct SyntheticBuffers {
    /// Every buffer allocated for the request.
    pub buffers: Vec<BufferRef>,
}

impl SyntheticBuffers {
    /// Return every buffer to `allocator`.
    pub fn free(self, allocator: &mut dyn BufferAllocator) -> FrameJobResult<()> {
        for b in self.buffers {
            allocator.free(b)?;
        }
        Ok(())
    }
}

/// Build a request for `engine` with command data for every stage, LUTs for enabled LUT
/// stages, a two-plane input image and a display image, all allocated from `allocator`.
pub fn synthetic_request(
    engine: &Engine,
    allocator: &mut dyn BufferAllocator,
    request_id: u64,
    enabled: StageSet,
) -> FrameJobResult<(FrameRequest, SyntheticBuffers)> {
    let mut out = SyntheticBuffers::default();
    let map = engine.offset_map();
    let plan = engine.plan();

    let programs: u32 = map.tables().iter().map(|t| t.capacity).sum();
    let cmd = allocator.allocate(u64::from(programs * COMMAND_BYTES), BufferPurpose::Job)?;
    out.buffers.push(cmd);
    let mut regions = CommandRegions::default();
    let mut cursor = 0;
    for t in map.tables() {
        for &stage in t.id.stages() {
            regions.insert(t.id, stage, CommandRegion::new(cmd, cursor, COMMAND_BYTES))?;
            cursor += COMMAND_BYTES;
        }
    }

    let mut luts = LutRegions::default();
    for pass in plan.passes() {
        for stage in StageKind::LUT_STAGES {
            if !enabled.contains(stage) {
                continue;
            }
            let buffer = allocator.allocate(u64::from(LUT_BYTES), BufferPurpose::Job)?;
            out.buffers.push(buffer);
            luts.insert(
                pass.name,
                stage,
                LutRegion {
                    buffer,
                    offset: 0,
                    length: LUT_BYTES,
                },
            )?;
        }
    }

    let area = plan.input().area();
    let mut images = Vec::with_capacity(2);
    for port in [IoImage::Input(PassName::Full), IoImage::Display] {
        let buffer = allocator.allocate(area.saturating_mul(3).div_ceil(2), BufferPurpose::Job)?;
        out.buffers.push(buffer);
        images.push(ImageBinding::new(
            port,
            buffer,
            BufferFormat::Linear,
            [
                PlaneBinding {
                    offset: 0,
                    metadata_len: 0,
                },
                PlaneBinding {
                    offset: area,
                    metadata_len: 0,
                },
            ],
        ));
    }

    let request = FrameRequest {
        request_id,
        stream_identity: 0,
        batch_size: engine.config().batch_size,
        enabled,
        regions,
        luts,
        images,
    };
    Ok((request, out))
}
