use smallvec::SmallVec;

use crate::foundation::error::{FrameJobError, FrameJobResult};
use crate::foundation::math::{Digest, align_up_u32, fw_buffer_aligned_size};
use crate::layout::schema::{
    HeaderField, IMAGE_PLANES, IoImage, LayoutSchema, LutField, MAX_BATCH, ProgramField,
    RefField, StageKind, StructLayout, TableHeaderField, TableId,
};
use crate::negotiate::limits::MAX_PASSES;
use crate::negotiate::planner::PassName;

/// Named base inside a job from which relative offsets are expressed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize)]
pub enum Anchor {
    /// Start of the job buffer.
    Job,
    /// Start of the program table region.
    Tables,
    /// Start of the LUT region.
    Luts,
    /// Start of the reference region.
    Refs,
}

/// Placement of one program table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize)]
pub struct TableLayout {
    /// Table identifier.
    pub id: TableId,
    /// Offset from the top of the job.
    pub offset: u32,
    /// Number of program entries (fixed cardinality).
    pub capacity: u32,
    /// Table size in bytes, header included.
    pub size: u32,
}

/// Placement of one per-pass LUT region.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize)]
pub struct LutLayout {
    /// Pass the region belongs to.
    pub pass: PassName,
    /// Offset from the top of the job.
    pub offset: u32,
    /// Number of LUT entries.
    pub entries: u32,
    /// Region size in bytes, header included.
    pub size: u32,
}

/// Placement of one per-pass reference region.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize)]
pub struct RefLayout {
    /// Pass the region belongs to.
    pub pass: PassName,
    /// Offset from the top of the job.
    pub offset: u32,
    /// Region size in bytes.
    pub size: u32,
}

/// Byte offsets of every sub-structure of a frame job for a given pass count.
///
/// Computed once per configuration and shared read-only by every request.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct OffsetMap {
    pass_count: usize,
    header: StructLayout,
    table_header: StructLayout,
    program: StructLayout,
    lut_header: StructLayout,
    lut_entry: StructLayout,
    ref_entry: StructLayout,
    tables_base: u32,
    luts_base: u32,
    refs_base: u32,
    tables: SmallVec<[TableLayout; 12]>,
    luts: SmallVec<[LutLayout; MAX_PASSES]>,
    refs: SmallVec<[RefLayout; MAX_PASSES]>,
    used_size: u32,
    job_size: usize,
}

impl OffsetMap {
    /// Active pass count the map was computed for.
    pub fn pass_count(&self) -> usize {
        self.pass_count
    }

    /// Bytes actually described by the layout.
    pub fn used_size(&self) -> u32 {
        self.used_size
    }

    /// Allocated job size (firmware buffer alignment applied).
    pub fn job_size(&self) -> usize {
        self.job_size
    }

    /// Offset of an anchor from the top of the job.
    pub fn anchor_offset(&self, anchor: Anchor) -> u32 {
        match anchor {
            Anchor::Job => 0,
            Anchor::Tables => self.tables_base,
            Anchor::Luts => self.luts_base,
            Anchor::Refs => self.refs_base,
        }
    }

    /// Convert an absolute offset to one relative to `anchor`.
    pub fn relative_to(&self, anchor: Anchor, absolute: u32) -> Option<u32> {
        absolute.checked_sub(self.anchor_offset(anchor))
    }

    /// Convert an `anchor`-relative offset to an absolute one.
    pub fn absolute(&self, anchor: Anchor, relative: u32) -> Option<u32> {
        self.anchor_offset(anchor).checked_add(relative)
    }

    /// Offset of a header field.
    pub fn header_field(&self, field: HeaderField) -> u32 {
        self.header.offset(field as usize)
    }

    /// Offset of the address of one image plane in the header buffer slots.
    pub fn buffer_slot(&self, image: IoImage, plane: usize) -> Option<u32> {
        if plane >= IMAGE_PLANES {
            return None;
        }
        let index = (image.index() * IMAGE_PLANES + plane) as u32;
        Some(self.header_field(HeaderField::BufferSlots) + index * 8)
    }

    /// Tables in firmware order.
    pub fn tables(&self) -> &[TableLayout] {
        &self.tables
    }

    /// Layout of a table, if present for the active pass count.
    pub fn table(&self, id: TableId) -> Option<&TableLayout> {
        self.tables.iter().find(|t| t.id == id)
    }

    /// Offset of a field in a table header.
    pub fn table_header_field(&self, id: TableId, field: TableHeaderField) -> Option<u32> {
        let t = self.table(id)?;
        Some(t.offset + self.table_header.offset(field as usize))
    }

    /// Offset of a field of the `index`-th program entry of a table.
    pub fn program_field(&self, id: TableId, index: usize, field: ProgramField) -> Option<u32> {
        let t = self.table(id)?;
        if index >= t.capacity as usize {
            return None;
        }
        Some(
            t.offset
                + self.table_header.size()
                + index as u32 * self.program.size()
                + self.program.offset(field as usize),
        )
    }

    /// Per-pass LUT regions.
    pub fn luts(&self) -> &[LutLayout] {
        &self.luts
    }

    /// LUT region of a pass, if active.
    pub fn lut(&self, pass: PassName) -> Option<&LutLayout> {
        self.luts.iter().find(|l| l.pass == pass)
    }

    /// Offset of the entry count of a pass's LUT region.
    pub fn lut_count_field(&self, pass: PassName) -> Option<u32> {
        self.lut(pass).map(|l| l.offset + self.lut_header.offset(0))
    }

    /// Offset of a field of the `stage` LUT entry of a pass.
    pub fn lut_field(&self, pass: PassName, stage: StageKind, field: LutField) -> Option<u32> {
        let l = self.lut(pass)?;
        let slot = stage.lut_slot()? as u32;
        Some(
            l.offset
                + self.lut_header.size()
                + slot * self.lut_entry.size()
                + self.lut_entry.offset(field as usize),
        )
    }

    /// Per-pass reference regions.
    pub fn refs(&self) -> &[RefLayout] {
        &self.refs
    }

    /// Reference region of a pass, if active.
    pub fn ref_region(&self, pass: PassName) -> Option<&RefLayout> {
        self.refs.iter().find(|r| r.pass == pass)
    }

    /// Offset of a field of the reference entry of batch frame `batch_index` of a pass.
    pub fn ref_field(&self, pass: PassName, batch_index: usize, field: RefField) -> Option<u32> {
        if batch_index >= MAX_BATCH {
            return None;
        }
        let r = self.ref_region(pass)?;
        Some(
            r.offset
                + batch_index as u32 * self.ref_entry.size()
                + self.ref_entry.offset(field as usize),
        )
    }

    /// Stable xxh3 digest of every offset in the map.
    pub fn digest(&self) -> u64 {
        let mut d = Digest::new();
        d.write_u64(self.pass_count as u64);
        d.write_u32(self.tables_base);
        d.write_u32(self.luts_base);
        d.write_u32(self.refs_base);
        for t in &self.tables {
            d.write_u64(t.id.slot() as u64);
            d.write_u32(t.offset);
            d.write_u32(t.capacity);
            d.write_u32(t.size);
        }
        for l in &self.luts {
            d.write_u64(l.pass.index() as u64);
            d.write_u32(l.offset);
            d.write_u32(l.size);
        }
        for r in &self.refs {
            d.write_u64(r.pass.index() as u64);
            d.write_u32(r.offset);
            d.write_u32(r.size);
        }
        d.write_u32(self.used_size);
        d.write_u64(self.job_size as u64);
        d.finish()
    }
}

/// Lays out frame jobs from a validated [`LayoutSchema`].
#[derive(Clone, Debug)]
pub struct LayoutAllocator {
    schema: LayoutSchema,
}

impl LayoutAllocator {
    /// Validate `schema` and wrap it.
    pub fn new(schema: LayoutSchema) -> FrameJobResult<Self> {
        schema.validate()?;
        Ok(Self { schema })
    }

    /// Schema in use.
    pub fn schema(&self) -> &LayoutSchema {
        &self.schema
    }

    /// Compute the offset map for `pass_count` active passes.
    ///
    /// Order: header, program tables in firmware order, per-pass LUT regions, per-pass
    /// reference regions. Every region
    /// starts on the schema region alignment. Same input, same map.
    pub fn compute_layout(&self, pass_count: usize) -> FrameJobResult<OffsetMap> {
        if pass_count == 0 || pass_count > self.schema.max_passes() {
            return Err(FrameJobError::bad_request(format!(
                "pass count {pass_count} outside 1..={}",
                self.schema.max_passes()
            )));
        }
        let align = self.schema.region_align();
        let header = self.schema.header_layout();
        let table_header = self.schema.table_header_layout();
        let program = self.schema.program_layout();
        let lut_header = self.schema.lut_header_layout();
        let lut_entry = self.schema.lut_entry_layout();
        let ref_entry = self.schema.ref_entry_layout();

        let tables_base = align_up_u32(header.size(), align);
        let mut cursor = tables_base;
        let mut tables = SmallVec::new();
        for id in TableId::firmware_order(pass_count) {
            let capacity = id.stages().len() as u32;
            let size = table_header.size() + capacity * program.size();
            let offset = align_up_u32(cursor, align);
            tables.push(TableLayout {
                id,
                offset,
                capacity,
                size,
            });
            cursor = offset + size;
        }

        let luts_base = align_up_u32(cursor, align);
        cursor = luts_base;
        let mut luts = SmallVec::new();
        let entries = StageKind::LUT_STAGES.len() as u32;
        for pass in PassName::ALL.into_iter().take(pass_count) {
            let size = lut_header.size() + entries * lut_entry.size();
            let offset = align_up_u32(cursor, align);
            luts.push(LutLayout {
                pass,
                offset,
                entries,
                size,
            });
            cursor = offset + size;
        }

        let refs_base = align_up_u32(cursor, align);
        cursor = refs_base;
        let mut refs = SmallVec::new();
        for pass in PassName::ALL.into_iter().take(pass_count) {
            let size = MAX_BATCH as u32 * ref_entry.size();
            let offset = align_up_u32(cursor, align);
            refs.push(RefLayout { pass, offset, size });
            cursor = offset + size;
        }

        let used_size = cursor;
        let job_size = fw_buffer_aligned_size(used_size as usize);
        tracing::debug!(pass_count, used_size, job_size, "computed frame job layout");
        Ok(OffsetMap {
            pass_count,
            header,
            table_header,
            program,
            lut_header,
            lut_entry,
            ref_entry,
            tables_base,
            luts_base,
            refs_base,
            tables,
            luts,
            refs,
            used_size,
            job_size,
        })
    }
}

#[cfg(test)]
#[path = "../../tests/unit/layout/offsets.rs"]
mod tests;
