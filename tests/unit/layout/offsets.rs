use super::*;
use crate::foundation::error::{ErrorClass, ResultCode};
use crate::layout::schema::HEADER_SIZE_V1;

fn allocator() -> LayoutAllocator {
    LayoutAllocator::new(LayoutSchema::v1()).unwrap()
}

#[test]
fn layout_is_deterministic() {
    let a = allocator().compute_layout(3).unwrap();
    let b = allocator().compute_layout(3).unwrap();
    assert_eq!(a, b);
    assert_eq!(a.digest(), b.digest());
    assert_ne!(a.digest(), allocator().compute_layout(2).unwrap().digest());
}

#[test]
fn three_pass_layout_offsets() {
    let m = allocator().compute_layout(3).unwrap();
    assert_eq!(m.anchor_offset(Anchor::Tables), 256);

    let offsets: Vec<_> = m.tables().iter().map(|t| (t.id, t.offset)).collect();
    assert_eq!(
        offsets,
        vec![
            (TableId::Anr(PassName::Full), 256),
            (TableId::Anr(PassName::Dc4), 320),
            (TableId::Anr(PassName::Dc16), 384),
            (TableId::Tf(PassName::Full), 448),
            (TableId::Tf(PassName::Dc4), 512),
            (TableId::Tf(PassName::Dc16), 576),
            (TableId::PreLtm, 640),
            (TableId::PostLtm, 768),
            (TableId::Ica1, 960),
            (TableId::Ica2, 1024),
        ]
    );
    assert_eq!(m.anchor_offset(Anchor::Luts), 1088);
    let luts: Vec<_> = m.luts().iter().map(|l| l.offset).collect();
    assert_eq!(luts, vec![1088, 1152, 1216]);
    assert_eq!(m.anchor_offset(Anchor::Refs), 1280);
    let refs: Vec<_> = m.refs().iter().map(|r| r.offset).collect();
    assert_eq!(refs, vec![1280, 1408, 1536]);
    assert_eq!(m.used_size(), 1664);
    assert_eq!(m.job_size(), 4096);
}

#[test]
fn regions_are_aligned_and_disjoint() {
    for n in 1..=4 {
        let m = allocator().compute_layout(n).unwrap();
        let mut regions: Vec<(u32, u32)> = m
            .tables()
            .iter()
            .map(|t| (t.offset, t.size))
            .chain(m.luts().iter().map(|l| (l.offset, l.size)))
            .chain(m.refs().iter().map(|r| (r.offset, r.size)))
            .collect();
        assert!(regions.iter().all(|(o, _)| o % 64 == 0));
        regions.sort_unstable();
        for w in regions.windows(2) {
            assert!(w[0].0 + w[0].1 <= w[1].0);
        }
        assert!(regions[0].0 >= HEADER_SIZE_V1);
        assert!(m.used_size() as usize <= m.job_size());
    }
}

#[test]
fn pass_count_out_of_range_is_invalid_arg() {
    for n in [0, 5] {
        let err = allocator().compute_layout(n).unwrap_err();
        assert_eq!(err.code(), Some(ResultCode::InvalidArg));
        assert_eq!(err.class(), ErrorClass::Construction);
    }
}

#[test]
fn inactive_tables_are_absent() {
    let m = allocator().compute_layout(1).unwrap();
    assert!(m.table(TableId::Anr(PassName::Dc4)).is_none());
    assert!(m.lut(PassName::Dc4).is_none());
    assert!(m.ref_region(PassName::Dc4).is_none());
    assert_eq!(m.tables().len(), 6);
}

#[test]
fn program_and_lut_field_offsets() {
    let m = allocator().compute_layout(2).unwrap();
    let post = m.table(TableId::PostLtm).unwrap().offset;
    assert_eq!(
        m.program_field(TableId::PostLtm, 2, ProgramField::Address),
        Some(post + 8 + 2 * 24 + 16)
    );
    assert_eq!(m.program_field(TableId::PostLtm, 6, ProgramField::Tag), None);

    let lut = m.lut(PassName::Dc4).unwrap().offset;
    assert_eq!(
        m.lut_field(PassName::Dc4, StageKind::Tf, LutField::Address),
        Some(lut + 8 + 16 + 8)
    );
    assert_eq!(m.lut_field(PassName::Dc4, StageKind::Hnr, LutField::Tag), None);

    let r = m.ref_region(PassName::Full).unwrap().offset;
    assert_eq!(m.ref_field(PassName::Full, 3, RefField::ReadAddr), Some(r + 3 * 16 + 8));
    assert_eq!(m.ref_field(PassName::Full, MAX_BATCH, RefField::WriteAddr), None);
}

#[test]
fn anchor_conversions() {
    let m = allocator().compute_layout(2).unwrap();
    let abs = m.table(TableId::PreLtm).unwrap().offset;
    let rel = m.relative_to(Anchor::Tables, abs).unwrap();
    assert_eq!(m.absolute(Anchor::Tables, rel), Some(abs));
    assert_eq!(m.relative_to(Anchor::Luts, 0), None);
}

#[test]
fn buffer_slots_cover_both_planes() {
    let m = allocator().compute_layout(1).unwrap();
    assert_eq!(m.buffer_slot(IoImage::Input(PassName::Full), 0), Some(144));
    assert_eq!(m.buffer_slot(IoImage::Input(PassName::Full), 1), Some(152));
    assert_eq!(m.buffer_slot(IoImage::Display, 0), Some(144 + 8 * 8));
    assert_eq!(m.buffer_slot(IoImage::Display, 2), None);
}
