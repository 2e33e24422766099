use super::*;
use crate::compile::job::{JobBuffer, JobState};
use crate::foundation::core::BufferHandle;
use crate::foundation::error::ResultCode;
use crate::layout::offsets::LayoutAllocator;
use crate::layout::schema::{HeaderField, LayoutSchema};
use crate::negotiate::limits::DimensionLimits;
use crate::negotiate::planner::negotiate;
use crate::negotiate::requirement::{BufferRequirement, OutputKind, OutputRequirement};
use crate::pool::allocator::SequentialAllocator;

fn plan(w: u32, h: u32) -> PassPlan {
    let d = Dimensions::new(w, h);
    let reqs = [OutputRequirement::new(
        OutputKind::Display,
        BufferRequirement::new(d, d, d),
    )];
    negotiate(&DimensionLimits::default(), &reqs).unwrap().plan
}

fn ring(lag: u32, batch: u32, a: &mut SequentialAllocator) -> ReferenceRing {
    let config = RingConfig {
        max_external_read_lag: lag,
        ..RingConfig::default()
    };
    ReferenceRing::new(config, &plan(1920, 1080), batch, a).unwrap()
}

fn job_for(request_id: u64, batch: u32, map: &OffsetMap) -> FrameJob {
    let buffer = BufferRef::new(BufferHandle(999), map.job_size() as u64).unwrap();
    let mut job = FrameJob::new(request_id, JobBuffer::new(buffer).unwrap());
    job.set_batch_size(batch);
    job.advance(JobState::HeaderWritten).unwrap();
    job
}

fn map(passes: usize) -> OffsetMap {
    LayoutAllocator::new(LayoutSchema::v1())
        .unwrap()
        .compute_layout(passes)
        .unwrap()
}

#[test]
fn ring_size_follows_lag_and_batch() {
    let c = RingConfig::default();
    assert_eq!(c.ring_size(1).unwrap(), 2);
    assert_eq!(c.ring_size(4).unwrap(), 8);
    let lagged = RingConfig {
        max_external_read_lag: 3,
        ..c
    };
    assert_eq!(lagged.ring_size(1).unwrap(), 5);
    assert_eq!(lagged.ring_size(6).unwrap(), 30);
    assert!(matches!(lagged.ring_size(8), Err(FrameJobError::Config(_))));
    assert!(c.ring_size(0).is_err());
}

#[test]
fn written_slot_outlives_the_read_lag() {
    for lag in 0..=3 {
        for batch in [1, 2] {
            let mut a = SequentialAllocator::new();
            let r = ring(lag, batch, &mut a);
            let writes = |id: u64| -> Vec<u32> {
                (0..batch)
                    .map(|k| r.select_slots(id, PassName::Full, k).unwrap().write)
                    .collect()
            };
            for n in 0..40u64 {
                let held = writes(n);
                for later in n + 1..=n + u64::from(lag) + 1 {
                    assert!(
                        writes(later).iter().all(|w| !held.contains(w)),
                        "lag {lag} batch {batch}: request {later} overwrites a slot of {n}"
                    );
                }
            }
        }
    }
}

#[test]
fn slots_are_allocated_eagerly() {
    let mut a = SequentialAllocator::new();
    let r = ring(1, 1, &mut a);
    assert_eq!(r.pass_count(), 3);
    assert_eq!(r.ring_size(), 3);
    assert_eq!(a.stats().live_buffers, 9);
    let full = r.slot(PassName::Full, 0).unwrap();
    assert_eq!(full.buffer.len(), reference_buffer_len(Dimensions::new(1920, 1080)));
    assert!(r.slot(PassName::Dc64, 0).is_none());
}

#[test]
fn reference_buffers_follow_firmware_alignment() {
    assert_eq!(reference_buffer_len(Dimensions::new(32, 32)), 4096);
    assert_eq!(reference_buffer_len(Dimensions::new(1920, 1080)), 48 * 65536);
}

#[test]
fn single_frame_slots_rotate() {
    let mut a = SequentialAllocator::new();
    let r = ring(0, 1, &mut a);
    for id in 0..6u64 {
        let p = r.select_slots(id, PassName::Full, 0).unwrap();
        assert_eq!(p.write as u64, id % 2);
        assert_eq!(p.read, (p.write + 1) % 2);
    }
    let prev = r.select_slots(4, PassName::Dc4, 0).unwrap();
    let next = r.select_slots(5, PassName::Dc4, 0).unwrap();
    assert_eq!(next.read, prev.write);
}

#[test]
fn batched_slots_chain_through_the_batch() {
    let mut a = SequentialAllocator::new();
    let r = ring(0, 4, &mut a);
    assert_eq!(r.ring_size(), 8);
    let first: Vec<_> = (0..4).map(|k| r.select_slots(7, PassName::Full, k).unwrap()).collect();
    assert_eq!(first.iter().map(|p| p.write).collect::<Vec<_>>(), vec![4, 5, 6, 7]);
    assert_eq!(first.iter().map(|p| p.read).collect::<Vec<_>>(), vec![3, 4, 5, 6]);
    let next = r.select_slots(8, PassName::Full, 0).unwrap();
    assert_eq!(next.write, 0);
    assert_eq!(next.read, 7);
    assert!(r.select_slots(8, PassName::Full, 4).is_err());
    assert!(r.select_slots(8, PassName::Dc64, 0).is_err());
}

#[test]
fn continuity_rules() {
    let mut a = SequentialAllocator::new();
    let mut r = ring(0, 1, &mut a);

    let first = r.reserve(10, 1).unwrap();
    assert_eq!(first.continuity(), Continuity::FirstFrame);
    r.commit(&first).unwrap();

    let next = r.reserve(11, 1).unwrap();
    assert_eq!(next.continuity(), Continuity::Continuous);
    r.commit(&next).unwrap();

    let gap = r.reserve(14, 1).unwrap();
    assert_eq!(gap.continuity(), Continuity::Gap { delta: 3 });
    r.commit(&gap).unwrap();

    let other = r.reserve(15, 2).unwrap();
    assert_eq!(other.continuity(), Continuity::IdentityChanged);
}

#[test]
fn cancel_does_not_advance_continuity() {
    let mut a = SequentialAllocator::new();
    let mut r = ring(0, 1, &mut a);
    let first = r.reserve(1, 0).unwrap();
    r.commit(&first).unwrap();

    let dropped = r.reserve(2, 0).unwrap();
    r.cancel(dropped).unwrap();

    let after = r.reserve(3, 0).unwrap();
    assert_eq!(after.continuity(), Continuity::Gap { delta: 2 });
}

#[test]
fn failed_predecessor_blocks_reference_read() {
    let mut a = SequentialAllocator::new();
    let mut r = ring(0, 1, &mut a);
    let first = r.reserve(1, 0).unwrap();
    r.commit(&first).unwrap();
    r.complete(1, false).unwrap();

    let next = r.reserve(2, 0).unwrap();
    assert_eq!(next.continuity(), Continuity::PredecessorFailed);
    assert!(!next.reads_reference(0));
}

#[test]
fn lifecycle_misuse_is_invalid_state() {
    let mut a = SequentialAllocator::new();
    let mut r = ring(0, 1, &mut a);
    let res = r.reserve(1, 0).unwrap();
    assert!(r.reserve(1, 0).is_err());
    assert!(matches!(r.complete(1, true), Err(FrameJobError::InvalidState(_))));
    r.commit(&res).unwrap();
    assert!(matches!(r.commit(&res), Err(FrameJobError::InvalidState(_))));
    assert!(matches!(r.cancel(res), Err(FrameJobError::InvalidState(_))));
    r.complete(1, true).unwrap();
    assert_eq!(r.in_flight(), 0);
}

#[test]
fn teardown_waits_for_drain() {
    let mut a = SequentialAllocator::new();
    let mut r = ring(0, 1, &mut a);
    let res = r.reserve(1, 0).unwrap();
    assert!(matches!(r.teardown(&mut a), Err(FrameJobError::InvalidState(_))));
    r.cancel(res).unwrap();
    r.teardown(&mut a).unwrap();
    assert_eq!(a.stats().live_buffers, 0);
    assert_eq!(r.pass_count(), 0);
}

#[test]
fn allocation_failure_releases_partial_ring() {
    let mut a = SequentialAllocator::with_budget(4 * 65536 * 48);
    let err = ReferenceRing::new(RingConfig::default(), &plan(1920, 1080), 8, &mut a).unwrap_err();
    assert_eq!(err.code(), Some(ResultCode::NoMemory));
    assert_eq!(a.stats().live_buffers, 0);
}

#[test]
fn continuous_request_gets_write_and_read_patches() {
    let mut a = SequentialAllocator::new();
    let mut r = ring(0, 1, &mut a);
    let m = map(3);

    let first = r.reserve(1, 0).unwrap();
    let mut job = job_for(1, 1, &m);
    r.fill_patches(&mut job, &first, &m).unwrap();
    assert_eq!(job.patches().of_kind(PatchKind::RefWrite).count(), 3);
    assert_eq!(job.patches().of_kind(PatchKind::RefRead).count(), 0);
    assert_eq!(job.ref_valid_mask(PassName::Full), 0);
    assert_eq!(job.continuity(), Some(Continuity::FirstFrame));
    r.commit(&first).unwrap();

    let second = r.reserve(2, 0).unwrap();
    let mut job = job_for(2, 1, &m);
    r.fill_patches(&mut job, &second, &m).unwrap();
    assert_eq!(job.patches().of_kind(PatchKind::RefRead).count(), 3);
    for pass in [PassName::Full, PassName::Dc4, PassName::Dc16] {
        assert_eq!(job.ref_valid_mask(pass), 1);
    }
    let at = m.header_field(HeaderField::RefValid);
    assert_eq!(job.buffer().read_u32(at), Some(1));

    let read = job
        .patches()
        .of_kind(PatchKind::RefRead)
        .next()
        .unwrap();
    let prev_write = r.slot(PassName::Full, 1).unwrap().buffer;
    assert_eq!(read.source, prev_write);
    assert_eq!(read.destination.anchor, Anchor::Refs);
}

#[test]
fn batched_request_reads_inside_the_batch_after_a_gap() {
    let mut a = SequentialAllocator::new();
    let mut r = ring(0, 3, &mut a);
    let m = map(3);
    let res = r.reserve(5, 0).unwrap();
    assert_eq!(res.continuity(), Continuity::FirstFrame);

    let mut job = job_for(5, 3, &m);
    r.fill_patches(&mut job, &res, &m).unwrap();
    assert_eq!(job.ref_valid_mask(PassName::Dc16), 0b110);
    assert_eq!(job.patches().of_kind(PatchKind::RefWrite).count(), 9);
    assert_eq!(job.patches().of_kind(PatchKind::RefRead).count(), 6);
}

#[test]
fn fill_patches_checks_the_job() {
    let mut a = SequentialAllocator::new();
    let mut r = ring(0, 1, &mut a);
    let m = map(3);
    let res = r.reserve(1, 0).unwrap();
    let mut wrong_id = job_for(2, 1, &m);
    assert!(r.fill_patches(&mut wrong_id, &res, &m).is_err());
    let mut wrong_batch = job_for(1, 2, &m);
    assert!(r.fill_patches(&mut wrong_batch, &res, &m).is_err());
    let mut too_many_passes = job_for(1, 1, &map(4));
    assert!(r.fill_patches(&mut too_many_passes, &res, &map(4)).is_err());
}
