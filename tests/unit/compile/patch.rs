use super::*;
use crate::foundation::core::BufferHandle;
use crate::foundation::error::ResultCode;

fn buf(h: u32, len: u64) -> BufferRef {
    BufferRef::new(BufferHandle(h), len).unwrap()
}

fn patch(offset: u32, source: BufferRef, source_offset: u64) -> Patch {
    Patch {
        destination: Destination::job(offset),
        source,
        source_offset,
        kind: PatchKind::Image,
    }
}

#[test]
fn destinations_are_write_once() {
    let mut list = PatchList::default();
    list.push(patch(144, buf(1, 64), 0)).unwrap();
    let err = list.push(patch(144, buf(2, 64), 0)).unwrap_err();
    assert_eq!(err.code(), Some(ResultCode::Failed));
    assert_eq!(list.len(), 1);
}

#[test]
fn same_offset_under_another_anchor_is_distinct() {
    let mut list = PatchList::default();
    list.push(patch(8, buf(1, 64), 0)).unwrap();
    list.push(Patch {
        destination: Destination {
            anchor: Anchor::Tables,
            offset: 8,
        },
        source: buf(1, 64),
        source_offset: 0,
        kind: PatchKind::Program,
    })
    .unwrap();
    assert_eq!(list.of_kind(PatchKind::Program).count(), 1);
}

#[test]
fn source_offset_must_be_inside_the_buffer() {
    let mut list = PatchList::default();
    let err = list.push(patch(144, buf(1, 64), 64)).unwrap_err();
    assert_eq!(err.code(), Some(ResultCode::InvalidPointer));
    list.push(patch(144, buf(1, 64), 63)).unwrap();
}
