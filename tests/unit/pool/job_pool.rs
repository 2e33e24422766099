use super::*;
use crate::foundation::error::ResultCode;
use crate::pool::allocator::SequentialAllocator;

#[test]
fn pool_allocates_capacity_up_front() {
    let mut a = SequentialAllocator::new();
    let p = JobPool::new(PoolConfig { capacity: 3 }, 4096, &mut a).unwrap();
    assert_eq!(p.stats().free, 3);
    assert_eq!(a.stats().live_buffers, 3);
    assert_eq!(a.stats().live_bytes, 3 * 4096);
}

#[test]
fn pool_is_bounded() {
    let mut a = SequentialAllocator::new();
    let mut p = JobPool::new(PoolConfig { capacity: 2 }, 4096, &mut a).unwrap();
    let x = p.checkout(10).unwrap();
    let _y = p.checkout(11).unwrap();
    let err = p.checkout(12).unwrap_err();
    assert_eq!(err.code(), Some(ResultCode::NoMemory));
    assert_eq!(p.stats().exhausted, 1);

    p.recycle(10, x).unwrap();
    assert!(p.checkout(12).is_ok());
    assert_eq!(p.in_flight(), 2);
}

#[test]
fn request_id_holds_at_most_one_buffer() {
    let mut a = SequentialAllocator::new();
    let mut p = JobPool::new(PoolConfig::default(), 4096, &mut a).unwrap();
    let _x = p.checkout(1).unwrap();
    let err = p.checkout(1).unwrap_err();
    assert_eq!(err.code(), Some(ResultCode::InvalidArg));
}

#[test]
fn recycle_checks_ownership() {
    let mut a = SequentialAllocator::new();
    let mut p = JobPool::new(PoolConfig { capacity: 2 }, 4096, &mut a).unwrap();
    let x = p.checkout(1).unwrap();
    let y = p.checkout(2).unwrap();
    let err = p.recycle(1, y).unwrap_err();
    assert!(matches!(err, FrameJobError::InvalidState(_)));
    let err = p.recycle(3, x).unwrap_err();
    assert!(matches!(err, FrameJobError::InvalidState(_)));
}

#[test]
fn release_requires_quiesced_pool() {
    let mut a = SequentialAllocator::new();
    let mut p = JobPool::new(PoolConfig { capacity: 2 }, 4096, &mut a).unwrap();
    let x = p.checkout(1).unwrap();
    assert!(p.release(&mut a).is_err());
    p.recycle(1, x).unwrap();
    p.release(&mut a).unwrap();
    assert_eq!(a.stats().live_buffers, 0);
}

#[test]
fn partial_allocation_is_rolled_back() {
    let mut a = SequentialAllocator::with_budget(3 * 4096);
    let err = JobPool::new(PoolConfig { capacity: 4 }, 4096, &mut a).unwrap_err();
    assert_eq!(err.code(), Some(ResultCode::NoMemory));
    assert_eq!(a.stats().live_buffers, 0);
}

#[test]
fn zero_capacity_is_a_config_error() {
    let mut a = SequentialAllocator::new();
    let err = JobPool::new(PoolConfig { capacity: 0 }, 4096, &mut a).unwrap_err();
    assert!(matches!(err, FrameJobError::Config(_)));
}
