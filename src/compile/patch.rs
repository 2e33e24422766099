use crate::foundation::core::BufferRef;
use crate::foundation::error::{FrameJobError, FrameJobResult};
use crate::layout::offsets::{Anchor, OffsetMap};

/// Location inside the job where a resolved 64-bit device address is written.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize)]
pub struct Destination {
    /// Base the offset is relative to.
    pub anchor: Anchor,
    /// Offset from the anchor.
    pub offset: u32,
}

impl Destination {
    /// Destination relative to the top of the job.
    pub fn job(offset: u32) -> Self {
        Self {
            anchor: Anchor::Job,
            offset,
        }
    }

    /// Destination expressed relative to `anchor`, from an absolute offset.
    pub(crate) fn relative(map: &OffsetMap, anchor: Anchor, absolute: u32) -> FrameJobResult<Self> {
        let offset = map.relative_to(anchor, absolute).ok_or_else(|| {
            FrameJobError::construction_failed(format!(
                "offset {absolute} lies before anchor {anchor:?}"
            ))
        })?;
        Ok(Self { anchor, offset })
    }

    /// Absolute offset inside the job.
    pub fn absolute(self, map: &OffsetMap) -> Option<u32> {
        map.absolute(self.anchor, self.offset)
    }
}

/// What a patch points at. Diagnostic only.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PatchKind {
    /// Program entry to its command region.
    Program,
    /// Header region base to the job's own buffer.
    RegionBase,
    /// Header image plane to a caller buffer.
    Image,
    /// LUT entry to a caller LUT region.
    Lut,
    /// Reference entry to the slot written by this frame.
    RefWrite,
    /// Reference entry to the slot read as temporal reference.
    RefRead,
}

/// Deferred address relocation: write `address(source) + source_offset` at `destination`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize)]
pub struct Patch {
    /// Where the address is written.
    pub destination: Destination,
    /// Buffer whose device address is taken.
    pub source: BufferRef,
    /// Byte offset added to the buffer address.
    pub source_offset: u64,
    /// Diagnostic kind.
    pub kind: PatchKind,
}

/// Write-once list of patches of one job.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PatchList {
    patches: Vec<Patch>,
}

impl PatchList {
    /// Record a patch.
    ///
    /// Fails with `EInvalidPointer` if `source_offset` lies outside the source buffer and with
    /// `EFailed` if the destination was already patched.
    pub fn push(&mut self, patch: Patch) -> FrameJobResult<()> {
        if !patch.source.contains_range(patch.source_offset, 1) {
            return Err(FrameJobError::invalid_pointer(format!(
                "patch source offset {} outside buffer {} of {} bytes",
                patch.source_offset,
                patch.source.handle().0,
                patch.source.len()
            )));
        }
        if self
            .patches
            .iter()
            .any(|p| p.destination == patch.destination)
        {
            return Err(FrameJobError::construction_failed(format!(
                "patch destination {:?}+{} written twice",
                patch.destination.anchor, patch.destination.offset
            )));
        }
        self.patches.push(patch);
        Ok(())
    }

    /// Number of patches.
    pub fn len(&self) -> usize {
        self.patches.len()
    }

    /// `true` if no patch was recorded.
    pub fn is_empty(&self) -> bool {
        self.patches.is_empty()
    }

    /// Patches in recording order.
    pub fn iter(&self) -> std::slice::Iter<'_, Patch> {
        self.patches.iter()
    }

    /// Patches of one kind.
    pub fn of_kind(&self, kind: PatchKind) -> impl Iterator<Item = &Patch> {
        self.patches.iter().filter(move |p| p.kind == kind)
    }
}

impl<'a> IntoIterator for &'a PatchList {
    type Item = &'a Patch;
    type IntoIter = std::slice::Iter<'a, Patch>;

    fn into_iter(self) -> Self::IntoIter {
        self.patches.iter()
    }
}

#[cfg(test)]
#[path = "../../tests/unit/compile/patch.rs"]
mod tests;
