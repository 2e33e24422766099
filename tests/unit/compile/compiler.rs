use super::*;
use crate::compile::job::JobBuffer;
use crate::foundation::core::{BufferHandle, Dimensions};
use crate::foundation::error::ResultCode;
use crate::layout::offsets::LayoutAllocator;
use crate::layout::schema::LayoutSchema;
use crate::negotiate::limits::DimensionLimits;
use crate::negotiate::planner::negotiate;
use crate::negotiate::requirement::{BufferRequirement, OutputKind, OutputRequirement};

struct Fixture {
    plan: PassPlan,
    map: OffsetMap,
    regions: CommandRegions,
    luts: LutRegions,
    images: Vec<ImageBinding>,
    ratios: CompressionRatios,
}

fn buf(h: u32, len: u64) -> BufferRef {
    BufferRef::new(BufferHandle(h), len).unwrap()
}

const CMD: u32 = 100;
const LUT: u32 = 200;
const IMG: u32 = 300;

impl Fixture {
    fn new(w: u32, h: u32) -> Self {
        let d = Dimensions::new(w, h);
        let reqs = [OutputRequirement::new(
            OutputKind::Display,
            BufferRequirement::new(d, d, d),
        )];
        let plan = negotiate(&DimensionLimits::default(), &reqs).unwrap().plan;
        let map = LayoutAllocator::new(LayoutSchema::v1())
            .unwrap()
            .compute_layout(plan.len())
            .unwrap();

        let mut regions = CommandRegions::default();
        let cmd = buf(CMD, 64 * 1024);
        let mut cursor = 0u32;
        for t in map.tables() {
            for &stage in t.id.stages() {
                regions
                    .insert(t.id, stage, CommandRegion::new(cmd, cursor, 256))
                    .unwrap();
                cursor += 256;
            }
        }

        let luts = lut_regions(&plan, &StageKind::LUT_STAGES);

        let images = vec![ImageBinding::new(
            IoImage::Input(PassName::Full),
            buf(IMG, 4 << 20),
            BufferFormat::Linear,
            [
                PlaneBinding {
                    offset: 0,
                    metadata_len: 0,
                },
                PlaneBinding {
                    offset: 2 << 20,
                    metadata_len: 0,
                },
            ],
        )];

        Self {
            plan,
            map,
            regions,
            luts,
            images,
            ratios: CompressionRatios::default(),
        }
    }

    fn inputs(&self, enabled: StageSet) -> CompileInputs<'_> {
        CompileInputs {
            plan: &self.plan,
            map: &self.map,
            batch_size: 1,
            enabled,
            regions: &self.regions,
            luts: &self.luts,
            images: &self.images,
            format: BufferFormat::Linear,
            ratios: &self.ratios,
        }
    }

    fn job(&self, request_id: u64) -> FrameJob {
        let len = self.map.job_size() as u64;
        FrameJob::new(request_id, JobBuffer::new(buf(1, len)).unwrap())
    }
}

fn lut_regions(plan: &PassPlan, stages: &[StageKind]) -> LutRegions {
    let mut luts = LutRegions::default();
    let lut = buf(LUT, 4096);
    let mut offset = 0;
    for pass in plan.passes() {
        for &stage in stages {
            let region = LutRegion {
                buffer: lut,
                offset,
                length: 512,
            };
            luts.insert(pass.name, stage, region).unwrap();
            offset += 512;
        }
    }
    luts
}

fn minimal() -> StageSet {
    StageSet::empty().with(StageKind::Ica1)
}

#[test]
fn compile_writes_header() {
    let f = Fixture::new(1920, 1080);
    let mut job = f.job(42);
    compile(&f.inputs(minimal()), &mut job).unwrap();
    assert_eq!(job.state(), JobState::ProgramsAppended);

    let b = job.buffer();
    assert_eq!(b.read_u32(f.map.header_field(HeaderField::Magic)), Some(FRAME_JOB_MAGIC));
    assert_eq!(b.read_u32(f.map.header_field(HeaderField::Version)), Some(SCHEMA_VERSION));
    assert_eq!(b.read_u64(f.map.header_field(HeaderField::RequestId)), Some(42));
    assert_eq!(b.read_u32(f.map.header_field(HeaderField::PassCount)), Some(3));

    let offsets = f.map.header_field(HeaderField::TableOffsets);
    assert_eq!(b.read_u32(offsets + 4 * TableId::Anr(PassName::Full).slot() as u32), Some(0));
    assert_eq!(
        b.read_u32(offsets + 4 * TableId::Anr(PassName::Dc64).slot() as u32),
        Some(TABLE_ABSENT)
    );
}

#[test]
fn table_cardinality_is_independent_of_enabled_stages() {
    let f = Fixture::new(1920, 1080);
    let optional: Vec<_> = StageKind::ALL
        .into_iter()
        .filter(|&s| s != StageKind::Ica1)
        .collect();
    for mask in 0u32..(1 << optional.len()) {
        let set = optional
            .iter()
            .enumerate()
            .filter(|(i, _)| mask & (1 << i) != 0)
            .fold(minimal(), |set, (_, &s)| set.with(s));
        let mut job = f.job(1);
        compile(&f.inputs(set), &mut job).unwrap();
        for t in f.map.tables() {
            let capacity = t.id.stages().len() as u32;
            assert_eq!(job.program_count(t.id), Some(capacity));
            let at = f
                .map
                .table_header_field(t.id, TableHeaderField::NumPrograms)
                .unwrap();
            assert_eq!(job.buffer().read_u32(at), Some(capacity));
            let in_table = job.programs().iter().filter(|p| p.table == t.id).count();
            assert_eq!(in_table as u32, capacity);
        }
    }
}

#[test]
fn disabled_stages_become_skip_entries() {
    let f = Fixture::new(1920, 1080);
    let mut job = f.job(1);
    compile(&f.inputs(minimal().with(StageKind::Glut)), &mut job).unwrap();

    let post: Vec<_> = job
        .programs()
        .iter()
        .filter(|p| p.table == TableId::PostLtm)
        .map(|p| p.tag)
        .collect();
    assert_eq!(
        post,
        vec![
            ProgramTag::Skip,
            ProgramTag::Stage(StageKind::Glut),
            ProgramTag::Skip,
            ProgramTag::Skip,
            ProgramTag::Skip,
            ProgramTag::Skip,
        ]
    );
    let tag_at = f
        .map
        .program_field(TableId::PostLtm, 0, ProgramField::Tag)
        .unwrap();
    assert_eq!(job.buffer().read_u32(tag_at), Some(0));
    let tag_at = f
        .map
        .program_field(TableId::PostLtm, 1, ProgramField::Tag)
        .unwrap();
    assert_eq!(job.buffer().read_u32(tag_at), Some(StageKind::Glut.tag()));
}

#[test]
fn every_real_program_gets_one_patch() {
    let f = Fixture::new(1920, 1080);
    let mut job = f.job(1);
    compile(&f.inputs(StageSet::all()), &mut job).unwrap();
    let real = job.programs().iter().filter(|p| !p.is_skip()).count();
    assert_eq!(job.patches().of_kind(PatchKind::Program).count(), real);
    assert!(
        job.patches()
            .of_kind(PatchKind::Program)
            .all(|p| p.destination.anchor == Anchor::Tables && p.source.handle() == BufferHandle(CMD))
    );
    assert_eq!(job.patches().of_kind(PatchKind::RegionBase).count(), 3);
    // ANR and TF LUTs for each of the three passes
    assert_eq!(job.patches().of_kind(PatchKind::Lut).count(), 6);
    assert_eq!(job.patches().of_kind(PatchKind::Image).count(), 2);
}

#[test]
fn region_bases_point_into_the_job_itself() {
    let f = Fixture::new(640, 480);
    let mut job = f.job(9);
    compile(&f.inputs(minimal()), &mut job).unwrap();
    let bases: Vec<_> = job
        .patches()
        .of_kind(PatchKind::RegionBase)
        .map(|p| (p.source.handle(), p.source_offset))
        .collect();
    assert_eq!(
        bases,
        vec![
            (BufferHandle(1), u64::from(f.map.anchor_offset(Anchor::Tables))),
            (BufferHandle(1), u64::from(f.map.anchor_offset(Anchor::Luts))),
            (BufferHandle(1), u64::from(f.map.anchor_offset(Anchor::Refs))),
        ]
    );
}

#[test]
fn enabled_stage_without_region_is_invalid_pointer() {
    let mut f = Fixture::new(1920, 1080);
    f.regions = CommandRegions::default();
    let region = CommandRegion::new(buf(CMD, 4096), 0, 256);
    f.regions.insert(TableId::Ica1, StageKind::Ica1, region).unwrap();

    let mut job = f.job(1);
    compile(&f.inputs(minimal()), &mut job).unwrap();

    let mut job = f.job(2);
    let err = compile(&f.inputs(minimal().with(StageKind::Hnr)), &mut job).unwrap_err();
    assert_eq!(err.code(), Some(ResultCode::InvalidPointer));
}

#[test]
fn enabled_lut_stage_without_lut_is_invalid_pointer() {
    let mut f = Fixture::new(1920, 1080);
    f.luts = lut_regions(&f.plan, &[StageKind::Anr]);

    let mut job = f.job(1);
    compile(&f.inputs(minimal().with(StageKind::Anr)), &mut job).unwrap();
    let tf_tag = f.map.lut_field(PassName::Full, StageKind::Tf, LutField::Tag).unwrap();
    assert_eq!(job.buffer().read_u32(tf_tag), Some(0));
    assert_eq!(job.patches().of_kind(PatchKind::Lut).count(), 3);

    let mut job = f.job(2);
    let err = compile(&f.inputs(minimal().with(StageKind::Tf)), &mut job).unwrap_err();
    assert_eq!(err.code(), Some(ResultCode::InvalidPointer));
}

#[test]
fn zero_length_region_is_invalid_pointer() {
    let mut f = Fixture::new(1920, 1080);
    f.regions
        .insert(TableId::PreLtm, StageKind::Ltm, CommandRegion::new(buf(CMD, 4096), 0, 0))
        .unwrap();
    let mut job = f.job(1);
    let err = compile(&f.inputs(minimal().with(StageKind::Ltm)), &mut job).unwrap_err();
    assert_eq!(err.code(), Some(ResultCode::InvalidPointer));
}

#[test]
fn overrunning_region_is_invalid_pointer() {
    let mut f = Fixture::new(1920, 1080);
    f.regions
        .insert(TableId::Ica2, StageKind::Ica2, CommandRegion::new(buf(CMD, 512), 400, 256))
        .unwrap();
    let mut job = f.job(1);
    let err = compile(&f.inputs(minimal().with(StageKind::Ica2)), &mut job).unwrap_err();
    assert_eq!(err.code(), Some(ResultCode::InvalidPointer));
}

#[test]
fn missing_input_image_is_invalid_pointer() {
    let mut f = Fixture::new(1920, 1080);
    f.images.clear();
    let mut job = f.job(1);
    let err = compile(&f.inputs(minimal()), &mut job).unwrap_err();
    assert_eq!(err.code(), Some(ResultCode::InvalidPointer));
}

#[test]
fn ica1_is_mandatory() {
    let f = Fixture::new(1920, 1080);
    let mut job = f.job(1);
    let err = compile(&f.inputs(StageSet::empty().with(StageKind::Anr)), &mut job).unwrap_err();
    assert_eq!(err.code(), Some(ResultCode::InvalidArg));
}

#[test]
fn port_of_inactive_pass_is_invalid_arg() {
    let mut f = Fixture::new(1920, 1080);
    f.images.push(ImageBinding::new(
        IoImage::Input(PassName::Dc64),
        buf(IMG + 1, 4096),
        BufferFormat::Linear,
        [PlaneBinding::default()],
    ));
    let mut job = f.job(1);
    let err = compile(&f.inputs(minimal()), &mut job).unwrap_err();
    assert_eq!(err.code(), Some(ResultCode::InvalidArg));
}

#[test]
fn compressed_planes_skip_metadata() {
    let mut f = Fixture::new(1920, 1080);
    f.images.push(ImageBinding::new(
        IoImage::Display,
        buf(IMG + 2, 8 << 20),
        BufferFormat::Ubwc,
        [
            PlaneBinding {
                offset: 0,
                metadata_len: 8192,
            },
            PlaneBinding {
                offset: 4 << 20,
                metadata_len: 4096,
            },
        ],
    ));
    let mut job = f.job(1);
    compile(&f.inputs(minimal()), &mut job).unwrap();
    let display: Vec<_> = job
        .patches()
        .of_kind(PatchKind::Image)
        .filter(|p| p.source.handle() == BufferHandle(IMG + 2))
        .map(|p| (p.destination.offset, p.source_offset))
        .collect();
    let slot0 = f.map.buffer_slot(IoImage::Display, 0).unwrap();
    let slot1 = f.map.buffer_slot(IoImage::Display, 1).unwrap();
    assert_eq!(display, vec![(slot0, 8192), (slot1, (4 << 20) + 4096)]);
}

#[test]
fn compile_requires_a_fresh_job() {
    let f = Fixture::new(1920, 1080);
    let mut job = f.job(1);
    compile(&f.inputs(minimal()), &mut job).unwrap();
    let err = compile(&f.inputs(minimal()), &mut job).unwrap_err();
    assert!(matches!(err, FrameJobError::InvalidState(_)));
}

#[test]
fn undersized_buffer_is_no_memory() {
    let f = Fixture::new(1920, 1080);
    let mut job = FrameJob::new(1, JobBuffer::new(buf(1, 512)).unwrap());
    let err = compile(&f.inputs(minimal()), &mut job).unwrap_err();
    assert_eq!(err.code(), Some(ResultCode::NoMemory));
}

#[test]
fn region_for_foreign_table_is_rejected() {
    let mut regions = CommandRegions::default();
    let err = regions
        .insert(
            TableId::PreLtm,
            StageKind::Glut,
            CommandRegion::new(buf(CMD, 4096), 0, 16),
        )
        .unwrap_err();
    assert_eq!(err.code(), Some(ResultCode::InvalidArg));
}

#[test]
fn cost_is_attached() {
    let f = Fixture::new(1920, 1080);
    let mut job = f.job(1);
    compile(&f.inputs(minimal()), &mut job).unwrap();
    assert_eq!(job.cost().pixels, 1920 * 1080 + 480 * 270 + 120 * 68);
}
