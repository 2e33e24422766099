use std::collections::BTreeMap;

use smallvec::SmallVec;

use crate::compile::cost::FrameCost;
use crate::compile::job::{FrameJob, JobState};
use crate::compile::patch::{Destination, Patch, PatchKind};
use crate::compile::program::{Program, ProgramTag, StageSet};
use crate::foundation::core::{BufferFormat, BufferRef};
use crate::foundation::error::{FrameJobError, FrameJobResult};
use crate::layout::offsets::{Anchor, OffsetMap};
use crate::layout::schema::{
    FRAME_JOB_MAGIC, HeaderField, IMAGE_PLANES, IoImage, LutField, MAX_BATCH, ProgramField,
    SCHEMA_VERSION, StageKind, TABLE_ABSENT, TABLE_SLOTS, TableHeaderField, TableId,
};
use crate::negotiate::limits::{CompressionRatios, MAX_PASSES};
use crate::negotiate::planner::{PassName, PassPlan};

/// Command data backing one program: a byte range of a caller buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize)]
pub struct CommandRegion {
    /// Buffer holding the command data.
    pub buffer: BufferRef,
    /// Offset of the data in the buffer.
    pub offset: u32,
    /// Data length in bytes.
    pub length: u32,
}

impl CommandRegion {
    /// Region covering `length` bytes at `offset` of `buffer`.
    pub fn new(buffer: BufferRef, offset: u32, length: u32) -> Self {
        Self {
            buffer,
            offset,
            length,
        }
    }
}

/// Command regions of one frame, keyed by table and stage.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CommandRegions {
    regions: BTreeMap<(TableId, StageKind), CommandRegion>,
}

impl CommandRegions {
    /// Bind `region` to `stage` in `table`. The stage must be a candidate of the table.
    pub fn insert(
        &mut self,
        table: TableId,
        stage: StageKind,
        region: CommandRegion,
    ) -> FrameJobResult<()> {
        if !table.stages().contains(&stage) {
            return Err(FrameJobError::bad_request(format!(
                "stage {stage:?} has no entry in table {table:?}"
            )));
        }
        self.regions.insert((table, stage), region);
        Ok(())
    }

    /// Region bound to `stage` in `table`.
    pub fn get(&self, table: TableId, stage: StageKind) -> Option<&CommandRegion> {
        self.regions.get(&(table, stage))
    }

    /// Number of bound regions.
    pub fn len(&self) -> usize {
        self.regions.len()
    }

    /// `true` if nothing is bound.
    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }
}

/// LUT data of one stage in one pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize)]
pub struct LutRegion {
    /// Buffer holding the LUT.
    pub buffer: BufferRef,
    /// Offset of the LUT in the buffer.
    pub offset: u64,
    /// LUT length in bytes.
    pub length: u32,
}

/// Per-pass LUT regions of one frame. Every enabled LUT stage needs one per active pass.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LutRegions {
    regions: BTreeMap<(PassName, StageKind), LutRegion>,
}

impl LutRegions {
    /// Bind a LUT. Only stages with a per-pass LUT entry are accepted.
    pub fn insert(
        &mut self,
        pass: PassName,
        stage: StageKind,
        region: LutRegion,
    ) -> FrameJobResult<()> {
        if stage.lut_slot().is_none() {
            return Err(FrameJobError::bad_request(format!(
                "stage {stage:?} has no per-pass LUT entry"
            )));
        }
        self.regions.insert((pass, stage), region);
        Ok(())
    }

    /// LUT bound to `stage` in `pass`.
    pub fn get(&self, pass: PassName, stage: StageKind) -> Option<&LutRegion> {
        self.regions.get(&(pass, stage))
    }
}

/// Placement of one plane inside an image buffer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct PlaneBinding {
    /// Offset of the plane (metadata included) in the buffer.
    pub offset: u64,
    /// Length of the metadata region leading the plane. Only used for compressed formats.
    #[serde(default)]
    pub metadata_len: u64,
}

/// A caller image bound to a port.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize)]
pub struct ImageBinding {
    /// Port the image is bound to.
    pub port: IoImage,
    /// Image buffer.
    pub buffer: BufferRef,
    /// Memory layout of the buffer.
    pub format: BufferFormat,
    /// One or two planes.
    pub planes: SmallVec<[PlaneBinding; IMAGE_PLANES]>,
}

impl ImageBinding {
    /// Bind a single-buffer image with the given plane placements.
    pub fn new(
        port: IoImage,
        buffer: BufferRef,
        format: BufferFormat,
        planes: impl IntoIterator<Item = PlaneBinding>,
    ) -> Self {
        Self {
            port,
            buffer,
            format,
            planes: planes.into_iter().collect(),
        }
    }

    /// Offset of the pixel data of a plane, skipping the metadata of compressed layouts.
    pub fn data_offset(&self, plane: usize) -> Option<u64> {
        let p = self.planes.get(plane)?;
        if self.format.is_compressed() {
            p.offset.checked_add(p.metadata_len)
        } else {
            Some(p.offset)
        }
    }
}

/// Read-only inputs of one compilation.
#[derive(Clone, Copy, Debug)]
pub struct CompileInputs<'a> {
    /// Negotiated pass plan.
    pub plan: &'a PassPlan,
    /// Offset map for the plan's pass count.
    pub map: &'a OffsetMap,
    /// Frames in the request.
    pub batch_size: u32,
    /// Stages enabled for this frame.
    pub enabled: StageSet,
    /// Command regions.
    pub regions: &'a CommandRegions,
    /// LUT regions.
    pub luts: &'a LutRegions,
    /// Caller images.
    pub images: &'a [ImageBinding],
    /// Format used for the bandwidth estimate.
    pub format: BufferFormat,
    /// Compression ratios used for the bandwidth estimate.
    pub ratios: &'a CompressionRatios,
}

/// Fill `job` (in `Empty`) from `inputs`, leaving it in `ProgramsAppended` with every patch
/// recorded.
///
/// On error the job is left partially written and must be discarded.
#[tracing::instrument(
    skip(inputs, job),
    fields(request_id = job.request_id(), enabled = inputs.enabled.len())
)]
pub fn compile(inputs: &CompileInputs<'_>, job: &mut FrameJob) -> FrameJobResult<()> {
    validate_inputs(inputs, job)?;

    write_header(inputs, job)?;
    job.advance(JobState::HeaderWritten)?;
    record_region_bases(inputs.map, job)?;

    append_programs(inputs, job)?;
    job.advance(JobState::ProgramsAppended)?;

    write_luts(inputs, job)?;
    bind_images(inputs, job)?;

    job.set_cost(FrameCost::estimate(
        inputs.plan,
        inputs.enabled,
        inputs.format,
        inputs.ratios,
    ));
    tracing::debug!(
        request_id = job.request_id(),
        programs = job.programs().len(),
        patches = job.patches().len(),
        "compiled frame job"
    );
    Ok(())
}

fn validate_inputs(inputs: &CompileInputs<'_>, job: &FrameJob) -> FrameJobResult<()> {
    if job.state() != JobState::Empty {
        return Err(FrameJobError::invalid_state(format!(
            "job {} must be Empty to compile, is {:?}",
            job.request_id(),
            job.state()
        )));
    }
    if inputs.map.pass_count() != inputs.plan.len() {
        return Err(FrameJobError::invalid_state(format!(
            "offset map is for {} passes, plan has {}",
            inputs.map.pass_count(),
            inputs.plan.len()
        )));
    }
    if inputs.batch_size == 0 || inputs.batch_size as usize > MAX_BATCH {
        return Err(FrameJobError::bad_request(format!(
            "batch size {} outside 1..={MAX_BATCH}",
            inputs.batch_size
        )));
    }
    if !inputs.enabled.contains(StageKind::Ica1) {
        return Err(FrameJobError::bad_request(
            "geometric correction (ica1) must be enabled on every frame",
        ));
    }
    if job.buffer().len() < inputs.map.job_size() {
        return Err(FrameJobError::no_memory(format!(
            "job buffer of {} bytes, layout needs {}",
            job.buffer().len(),
            inputs.map.job_size()
        )));
    }
    Ok(())
}

fn write_header(inputs: &CompileInputs<'_>, job: &mut FrameJob) -> FrameJobResult<()> {
    let map = inputs.map;
    let request_id = job.request_id();
    job.set_batch_size(inputs.batch_size);

    let mut table_offsets = [TABLE_ABSENT; TABLE_SLOTS];
    for t in map.tables() {
        table_offsets[t.id.slot()] = map
            .relative_to(Anchor::Tables, t.offset)
            .unwrap_or(TABLE_ABSENT);
    }
    let mut lut_offsets = [TABLE_ABSENT; MAX_PASSES];
    for l in map.luts() {
        lut_offsets[l.pass.index()] = map
            .relative_to(Anchor::Luts, l.offset)
            .unwrap_or(TABLE_ABSENT);
    }
    let mut ref_offsets = [TABLE_ABSENT; MAX_PASSES];
    for r in map.refs() {
        ref_offsets[r.pass.index()] = map
            .relative_to(Anchor::Refs, r.offset)
            .unwrap_or(TABLE_ABSENT);
    }

    let buf = job.buffer_mut()?;
    buf.reset();
    buf.write_u32(map.header_field(HeaderField::Magic), FRAME_JOB_MAGIC)?;
    buf.write_u32(map.header_field(HeaderField::Version), SCHEMA_VERSION)?;
    buf.write_u64(map.header_field(HeaderField::RequestId), request_id)?;
    buf.write_u32(map.header_field(HeaderField::PassCount), map.pass_count() as u32)?;
    buf.write_u32(map.header_field(HeaderField::BatchSize), inputs.batch_size)?;

    let base = map.header_field(HeaderField::TableOffsets);
    for (i, off) in table_offsets.iter().enumerate() {
        buf.write_u32(base + 4 * i as u32, *off)?;
    }
    let base = map.header_field(HeaderField::LutOffsets);
    for (i, off) in lut_offsets.iter().enumerate() {
        buf.write_u32(base + 4 * i as u32, *off)?;
    }
    let base = map.header_field(HeaderField::RefOffsets);
    for (i, off) in ref_offsets.iter().enumerate() {
        buf.write_u32(base + 4 * i as u32, *off)?;
    }

    for t in map.tables() {
        if let Some(off) = map.table_header_field(t.id, TableHeaderField::NumPrograms) {
            buf.write_u32(off, 0)?;
        }
    }
    for t in map.tables() {
        job.set_program_count(t.id, 0);
    }
    Ok(())
}

fn record_region_bases(map: &OffsetMap, job: &mut FrameJob) -> FrameJobResult<()> {
    let own = job.buffer().buffer_ref();
    for (field, anchor) in [
        (HeaderField::TableBase, Anchor::Tables),
        (HeaderField::LutBase, Anchor::Luts),
        (HeaderField::RefBase, Anchor::Refs),
    ] {
        job.record_patch(Patch {
            destination: Destination::job(map.header_field(field)),
            source: own,
            source_offset: u64::from(map.anchor_offset(anchor)),
            kind: PatchKind::RegionBase,
        })?;
    }
    Ok(())
}

fn append_programs(inputs: &CompileInputs<'_>, job: &mut FrameJob) -> FrameJobResult<()> {
    let map = inputs.map;
    for table in map.tables() {
        let mut count = 0u32;
        for (index, &stage) in table.id.stages().iter().enumerate() {
            let region = if inputs.enabled.contains(stage) {
                Some(enabled_region(inputs.regions, table.id, stage)?)
            } else {
                None
            };
            let program = Program {
                tag: region.map_or(ProgramTag::Skip, |_| ProgramTag::Stage(stage)),
                table: table.id,
                index: index as u32,
                length: region.map_or(0, |r| r.length),
                base_offset: region.map_or(0, |r| r.offset),
            };
            write_program(map, job, &program)?;
            if let Some(region) = region {
                let at = program_field(map, table.id, index, ProgramField::Address)?;
                job.record_patch(Patch {
                    destination: Destination::relative(map, Anchor::Tables, at)?,
                    source: region.buffer,
                    source_offset: u64::from(region.offset),
                    kind: PatchKind::Program,
                })?;
            }
            job.push_program(program)?;
            count += 1;
        }
        let at = map
            .table_header_field(table.id, TableHeaderField::NumPrograms)
            .ok_or_else(|| FrameJobError::construction_failed("table header missing"))?;
        job.buffer_mut()?.write_u32(at, count)?;
        job.set_program_count(table.id, count);
    }
    Ok(())
}

fn enabled_region(
    regions: &CommandRegions,
    table: TableId,
    stage: StageKind,
) -> FrameJobResult<CommandRegion> {
    let region = regions.get(table, stage).ok_or_else(|| {
        FrameJobError::invalid_pointer(format!(
            "enabled stage {stage:?} has no command region in {table:?}"
        ))
    })?;
    if region.length == 0 {
        return Err(FrameJobError::invalid_pointer(format!(
            "enabled stage {stage:?} has a zero-length command region in {table:?}"
        )));
    }
    if !region
        .buffer
        .contains_range(u64::from(region.offset), u64::from(region.length))
    {
        return Err(FrameJobError::invalid_pointer(format!(
            "command region of {stage:?} overruns buffer {}",
            region.buffer.handle().0
        )));
    }
    Ok(*region)
}

fn program_field(
    map: &OffsetMap,
    table: TableId,
    index: usize,
    field: ProgramField,
) -> FrameJobResult<u32> {
    map.program_field(table, index, field).ok_or_else(|| {
        FrameJobError::construction_failed(format!("no entry {index} in table {table:?}"))
    })
}

fn write_program(map: &OffsetMap, job: &mut FrameJob, p: &Program) -> FrameJobResult<()> {
    let index = p.index as usize;
    let tag = program_field(map, p.table, index, ProgramField::Tag)?;
    let length = program_field(map, p.table, index, ProgramField::Length)?;
    let base = program_field(map, p.table, index, ProgramField::BaseOffset)?;
    let buf = job.buffer_mut()?;
    buf.write_u32(tag, p.tag.raw())?;
    buf.write_u32(length, p.length)?;
    buf.write_u32(base, p.base_offset)?;
    Ok(())
}

fn write_luts(inputs: &CompileInputs<'_>, job: &mut FrameJob) -> FrameJobResult<()> {
    let map = inputs.map;
    for lut in map.luts() {
        let count_at = map
            .lut_count_field(lut.pass)
            .ok_or_else(|| FrameJobError::construction_failed("lut header missing"))?;
        job.buffer_mut()?.write_u32(count_at, lut.entries)?;

        for stage in StageKind::LUT_STAGES {
            if !inputs.enabled.contains(stage) {
                continue;
            }
            let region = inputs.luts.get(lut.pass, stage).ok_or_else(|| {
                FrameJobError::invalid_pointer(format!(
                    "enabled stage {stage:?} has no lut bound in {}",
                    lut.pass.as_str()
                ))
            })?;
            if region.length == 0
                || !region
                    .buffer
                    .contains_range(region.offset, u64::from(region.length))
            {
                return Err(FrameJobError::invalid_pointer(format!(
                    "lut of {stage:?} in {} overruns buffer {}",
                    lut.pass.as_str(),
                    region.buffer.handle().0
                )));
            }
            let field = |f: LutField| {
                map.lut_field(lut.pass, stage, f)
                    .ok_or_else(|| FrameJobError::construction_failed("lut entry missing"))
            };
            let (tag_at, len_at, addr_at) = (
                field(LutField::Tag)?,
                field(LutField::Length)?,
                field(LutField::Address)?,
            );
            let buf = job.buffer_mut()?;
            buf.write_u32(tag_at, stage.tag())?;
            buf.write_u32(len_at, region.length)?;
            job.record_patch(Patch {
                destination: Destination::relative(map, Anchor::Luts, addr_at)?,
                source: region.buffer,
                source_offset: region.offset,
                kind: PatchKind::Lut,
            })?;
        }
    }
    Ok(())
}

fn bind_images(inputs: &CompileInputs<'_>, job: &mut FrameJob) -> FrameJobResult<()> {
    let map = inputs.map;
    if !inputs
        .images
        .iter()
        .any(|b| b.port == IoImage::Input(PassName::Full))
    {
        return Err(FrameJobError::invalid_pointer(
            "mandatory full-resolution input image is not bound",
        ));
    }

    let mut seen: SmallVec<[IoImage; 8]> = SmallVec::new();
    for binding in inputs.images {
        if seen.contains(&binding.port) {
            return Err(FrameJobError::bad_request(format!(
                "port {:?} bound twice",
                binding.port
            )));
        }
        seen.push(binding.port);

        if let Some(pass) = binding.port.pass()
            && pass.index() >= map.pass_count()
        {
            return Err(FrameJobError::bad_request(format!(
                "port {:?} has no slot: only {} passes active",
                binding.port,
                map.pass_count()
            )));
        }
        if binding.planes.is_empty() || binding.planes.len() > IMAGE_PLANES {
            return Err(FrameJobError::bad_request(format!(
                "port {:?} binds {} planes, expected 1..={IMAGE_PLANES}",
                binding.port,
                binding.planes.len()
            )));
        }

        for plane in 0..binding.planes.len() {
            let source_offset = binding.data_offset(plane).ok_or_else(|| {
                FrameJobError::invalid_pointer(format!(
                    "plane {plane} of {:?} overflows",
                    binding.port
                ))
            })?;
            let at = map.buffer_slot(binding.port, plane).ok_or_else(|| {
                FrameJobError::construction_failed(format!("no buffer slot for plane {plane}"))
            })?;
            job.record_patch(Patch {
                destination: Destination::job(at),
                source: binding.buffer,
                source_offset,
                kind: PatchKind::Image,
            })?;
        }
    }
    Ok(())
}

#[cfg(test)]
#[path = "../../tests/unit/compile/compiler.rs"]
mod tests;
