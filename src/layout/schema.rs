//! Frame-job ABI description.
//!
//! The binary layout consumed by the firmware is described as ordered `{name, size, align}`
//! field lists from which every offset is generated. The description is versioned and checked
//! once at startup against the pinned ABI fingerprint.

use crate::foundation::error::{FrameJobError, FrameJobResult};
use crate::foundation::math::{Digest, align_up_u32};
use crate::negotiate::limits::MAX_PASSES;
use crate::negotiate::planner::PassName;

/// Magic value at offset 0 of every frame job (`"FJOB"` little-endian).
pub const FRAME_JOB_MAGIC: u32 = u32::from_le_bytes(*b"FJOB");
/// ABI revision written into the header.
pub const SCHEMA_VERSION: u32 = 1;
/// Header size in bytes expected by the firmware for [`SCHEMA_VERSION`].
pub const HEADER_SIZE_V1: u32 = 240;
/// Header `table_offsets` value of a table that is not present for the active pass count.
pub const TABLE_ABSENT: u32 = u32::MAX;
/// Number of program tables addressable from the header.
pub const TABLE_SLOTS: usize = 2 * MAX_PASSES + 4;
/// Number of planes per image buffer slot.
pub const IMAGE_PLANES: usize = 2;
/// Largest number of frames one request may batch.
pub const MAX_BATCH: usize = 8;

/// One field of a layout description.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Field {
    /// Field name, part of the ABI fingerprint.
    pub name: &'static str,
    /// Size in bytes.
    pub size: u32,
    /// Alignment in bytes; a power of two dividing `size`.
    pub align: u32,
}

const fn field(name: &'static str, size: u32, align: u32) -> Field {
    Field { name, size, align }
}

/// Fields of the frame-job header, in ABI order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HeaderField {
    /// [`FRAME_JOB_MAGIC`].
    Magic,
    /// [`SCHEMA_VERSION`].
    Version,
    /// Request id (u64).
    RequestId,
    /// Number of active passes.
    PassCount,
    /// Frames per batch.
    BatchSize,
    /// Device address of the table region (u64, patched).
    TableBase,
    /// Device address of the LUT region (u64, patched).
    LutBase,
    /// Device address of the reference region (u64, patched).
    RefBase,
    /// `[u32; TABLE_SLOTS]` table offsets relative to the table region.
    TableOffsets,
    /// `[u32; MAX_PASSES]` LUT region offsets relative to the LUT region.
    LutOffsets,
    /// `[u32; MAX_PASSES]` reference region offsets relative to the reference region.
    RefOffsets,
    /// `[u32; MAX_PASSES]` per-pass bitmask; bit `k` is set when batch frame `k` has a valid
    /// temporal reference.
    RefValid,
    /// `[[u64; IMAGE_PLANES]; IoImage::COUNT]` image plane addresses (patched).
    BufferSlots,
}

impl HeaderField {
    /// All header fields in ABI order.
    pub const ALL: [Self; 13] = [
        Self::Magic,
        Self::Version,
        Self::RequestId,
        Self::PassCount,
        Self::BatchSize,
        Self::TableBase,
        Self::LutBase,
        Self::RefBase,
        Self::TableOffsets,
        Self::LutOffsets,
        Self::RefOffsets,
        Self::RefValid,
        Self::BufferSlots,
    ];

    /// ABI name.
    pub fn name(self) -> &'static str {
        match self {
            Self::Magic => "magic",
            Self::Version => "version",
            Self::RequestId => "request_id",
            Self::PassCount => "pass_count",
            Self::BatchSize => "batch_size",
            Self::TableBase => "table_base_addr",
            Self::LutBase => "lut_base_addr",
            Self::RefBase => "ref_base_addr",
            Self::TableOffsets => "table_offsets",
            Self::LutOffsets => "lut_offsets",
            Self::RefOffsets => "ref_offsets",
            Self::RefValid => "ref_valid",
            Self::BufferSlots => "buffer_slots",
        }
    }
}

/// Fields of a program table header.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TableHeaderField {
    /// Number of program entries that follow.
    NumPrograms,
    /// Reserved, zero.
    Reserved,
}

impl TableHeaderField {
    /// All fields in ABI order.
    pub const ALL: [Self; 2] = [Self::NumPrograms, Self::Reserved];

    /// ABI name.
    pub fn name(self) -> &'static str {
        match self {
            Self::NumPrograms => "num_programs",
            Self::Reserved => "reserved",
        }
    }
}

/// Fields of one program entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ProgramField {
    /// Stage tag, `0` for skip.
    Tag,
    /// Command byte length.
    Length,
    /// Offset of the command data within its region.
    BaseOffset,
    /// Reserved, zero.
    Reserved,
    /// Device address of the command region (u64, patched).
    Address,
}

impl ProgramField {
    /// All fields in ABI order.
    pub const ALL: [Self; 5] = [
        Self::Tag,
        Self::Length,
        Self::BaseOffset,
        Self::Reserved,
        Self::Address,
    ];

    /// ABI name.
    pub fn name(self) -> &'static str {
        match self {
            Self::Tag => "tag",
            Self::Length => "length",
            Self::BaseOffset => "base_offset",
            Self::Reserved => "reserved",
            Self::Address => "address",
        }
    }
}

/// Fields of one LUT entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LutField {
    /// Stage tag, `0` when no LUT is bound.
    Tag,
    /// LUT byte length.
    Length,
    /// Device address of the LUT data (u64, patched).
    Address,
}

impl LutField {
    /// All fields in ABI order.
    pub const ALL: [Self; 3] = [Self::Tag, Self::Length, Self::Address];

    /// ABI name.
    pub fn name(self) -> &'static str {
        match self {
            Self::Tag => "tag",
            Self::Length => "length",
            Self::Address => "address",
        }
    }
}

/// Fields of one reference entry. A pass's reference region holds [`MAX_BATCH`] entries.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RefField {
    /// Device address of the slot written by this frame (u64, patched).
    WriteAddr,
    /// Device address of the slot read as temporal reference (u64, patched when valid).
    ReadAddr,
}

impl RefField {
    /// All fields in ABI order.
    pub const ALL: [Self; 2] = [Self::WriteAddr, Self::ReadAddr];

    /// ABI name.
    pub fn name(self) -> &'static str {
        match self {
            Self::WriteAddr => "write_addr",
            Self::ReadAddr => "read_addr",
        }
    }
}

/// Functional processing stage that can be enabled or disabled per frame.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    /// Noise reduction, one program per pass.
    Anr,
    /// Temporal filter, one program per pass.
    Tf,
    /// Pre-tone-map generic registers.
    PreLtmGeneric,
    /// Hybrid noise reduction.
    Hnr,
    /// Local tone map.
    Ltm,
    /// Post-tone-map generic registers.
    PostLtmGeneric,
    /// Gamma LUT.
    Glut,
    /// 2D LUT.
    Lut2d,
    /// Adaptive spatial filter.
    Asf,
    /// Upscaler.
    Upscale,
    /// Grain adder.
    Gra,
    /// Primary geometric correction. Mandatory on every frame.
    Ica1,
    /// Reference geometric correction.
    Ica2,
}

impl StageKind {
    /// Every stage, in tag order.
    pub const ALL: [Self; 13] = [
        Self::Anr,
        Self::Tf,
        Self::PreLtmGeneric,
        Self::Hnr,
        Self::Ltm,
        Self::PostLtmGeneric,
        Self::Glut,
        Self::Lut2d,
        Self::Asf,
        Self::Upscale,
        Self::Gra,
        Self::Ica1,
        Self::Ica2,
    ];

    /// Stages whose LUTs live in the per-pass LUT regions, in entry order.
    pub const LUT_STAGES: [Self; 2] = [Self::Anr, Self::Tf];

    /// Firmware tag. `0` is reserved for skip entries.
    pub fn tag(self) -> u32 {
        self as u32 + 1
    }

    /// Stage for a firmware tag.
    pub fn from_tag(tag: u32) -> Option<Self> {
        tag.checked_sub(1)
            .and_then(|i| Self::ALL.get(i as usize).copied())
    }

    /// Entry index in a per-pass LUT region, if the stage has one.
    pub fn lut_slot(self) -> Option<usize> {
        Self::LUT_STAGES.iter().position(|&s| s == self)
    }

    /// `true` for stages that run once per active pass.
    pub fn is_per_pass(self) -> bool {
        matches!(self, Self::Anr | Self::Tf)
    }
}

/// Program table identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize)]
pub enum TableId {
    /// Noise reduction table of a pass.
    Anr(PassName),
    /// Temporal filter table of a pass.
    Tf(PassName),
    /// Pre-tone-map group.
    PreLtm,
    /// Post-tone-map group.
    PostLtm,
    /// Primary geometric correction.
    Ica1,
    /// Reference geometric correction.
    Ica2,
}

impl TableId {
    /// Position of the table's offset in the header `table_offsets` array.
    pub fn slot(self) -> usize {
        match self {
            Self::Anr(p) => p.index(),
            Self::Tf(p) => MAX_PASSES + p.index(),
            Self::PreLtm => 2 * MAX_PASSES,
            Self::PostLtm => 2 * MAX_PASSES + 1,
            Self::Ica1 => 2 * MAX_PASSES + 2,
            Self::Ica2 => 2 * MAX_PASSES + 3,
        }
    }

    /// Candidate stages of the table, in entry order. The length is the table cardinality.
    pub fn stages(self) -> &'static [StageKind] {
        match self {
            Self::Anr(_) => &[StageKind::Anr],
            Self::Tf(_) => &[StageKind::Tf],
            Self::PreLtm => &[StageKind::PreLtmGeneric, StageKind::Hnr, StageKind::Ltm],
            Self::PostLtm => &[
                StageKind::PostLtmGeneric,
                StageKind::Glut,
                StageKind::Lut2d,
                StageKind::Asf,
                StageKind::Upscale,
                StageKind::Gra,
            ],
            Self::Ica1 => &[StageKind::Ica1],
            Self::Ica2 => &[StageKind::Ica2],
        }
    }

    /// Pass the table belongs to, for per-pass tables.
    pub fn pass(self) -> Option<PassName> {
        match self {
            Self::Anr(p) | Self::Tf(p) => Some(p),
            _ => None,
        }
    }

    /// Tables present for `pass_count` active passes, in firmware order.
    pub fn firmware_order(pass_count: usize) -> impl Iterator<Item = TableId> {
        let passes = PassName::ALL.into_iter().take(pass_count);
        passes
            .clone()
            .map(Self::Anr)
            .chain(passes.map(Self::Tf))
            .chain([Self::PreLtm, Self::PostLtm, Self::Ica1, Self::Ica2])
    }
}

/// Image port addressable from the header buffer slots.
///
/// Temporal reference buffers are not ports; they live in the reference region.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "snake_case", tag = "port", content = "pass")]
pub enum IoImage {
    /// Input image of a pass. `Input(Full)` is mandatory.
    Input(PassName),
    /// Primary output.
    Display,
    /// Secondary output.
    Video,
}

impl IoImage {
    /// Number of buffer slots in the header.
    pub const COUNT: usize = MAX_PASSES + 2;

    /// Slot index in the header `buffer_slots` array.
    pub fn index(self) -> usize {
        match self {
            Self::Input(p) => p.index(),
            Self::Display => MAX_PASSES,
            Self::Video => MAX_PASSES + 1,
        }
    }

    /// Pass the port is tied to, if any.
    pub fn pass(self) -> Option<PassName> {
        match self {
            Self::Input(p) => Some(p),
            Self::Display | Self::Video => None,
        }
    }
}

/// Offsets of the fields of one struct, plus its padded size.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct StructLayout {
    offsets: Vec<u32>,
    size: u32,
    align: u32,
}

impl StructLayout {
    fn from_fields(fields: &[Field]) -> Self {
        let mut offsets = Vec::with_capacity(fields.len());
        let mut cursor = 0u32;
        let mut align = 1u32;
        for f in fields {
            let off = align_up_u32(cursor, f.align);
            offsets.push(off);
            cursor = off.saturating_add(f.size);
            align = align.max(f.align);
        }
        Self {
            offsets,
            size: align_up_u32(cursor, align),
            align,
        }
    }

    /// Offset of the `index`-th field.
    pub fn offset(&self, index: usize) -> u32 {
        self.offsets.get(index).copied().unwrap_or(self.size)
    }

    /// Padded struct size.
    pub fn size(&self) -> u32 {
        self.size
    }

    /// Struct alignment (largest field alignment).
    pub fn align(&self) -> u32 {
        self.align
    }
}

/// Versioned description of the frame-job binary layout.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LayoutSchema {
    pub(crate) version: u32,
    pub(crate) header: Vec<Field>,
    pub(crate) table_header: Vec<Field>,
    pub(crate) program_entry: Vec<Field>,
    pub(crate) lut_header: Vec<Field>,
    pub(crate) lut_entry: Vec<Field>,
    pub(crate) ref_entry: Vec<Field>,
    pub(crate) region_align: u32,
}

impl LayoutSchema {
    /// ABI revision 1.
    pub fn v1() -> Self {
        let tables = TABLE_SLOTS as u32;
        let passes = MAX_PASSES as u32;
        let slots = (IoImage::COUNT * IMAGE_PLANES) as u32;
        Self {
            version: SCHEMA_VERSION,
            header: vec![
                field("magic", 4, 4),
                field("version", 4, 4),
                field("request_id", 8, 8),
                field("pass_count", 4, 4),
                field("batch_size", 4, 4),
                field("table_base_addr", 8, 8),
                field("lut_base_addr", 8, 8),
                field("ref_base_addr", 8, 8),
                field("table_offsets", 4 * tables, 4),
                field("lut_offsets", 4 * passes, 4),
                field("ref_offsets", 4 * passes, 4),
                field("ref_valid", 4 * passes, 4),
                field("buffer_slots", 8 * slots, 8),
            ],
            table_header: vec![field("num_programs", 4, 4), field("reserved", 4, 4)],
            program_entry: vec![
                field("tag", 4, 4),
                field("length", 4, 4),
                field("base_offset", 4, 4),
                field("reserved", 4, 4),
                field("address", 8, 8),
            ],
            lut_header: vec![field("num_luts", 4, 4), field("reserved", 4, 4)],
            lut_entry: vec![
                field("tag", 4, 4),
                field("length", 4, 4),
                field("address", 8, 8),
            ],
            ref_entry: vec![field("write_addr", 8, 8), field("read_addr", 8, 8)],
            region_align: 64,
        }
    }

    /// ABI revision.
    pub fn version(&self) -> u32 {
        self.version
    }

    /// Alignment of every region (tables, LUT regions) inside the job.
    pub fn region_align(&self) -> u32 {
        self.region_align
    }

    /// Largest pass count the schema can describe.
    pub fn max_passes(&self) -> usize {
        MAX_PASSES
    }

    /// Header struct layout.
    pub fn header_layout(&self) -> StructLayout {
        StructLayout::from_fields(&self.header)
    }

    /// Program table header layout.
    pub fn table_header_layout(&self) -> StructLayout {
        StructLayout::from_fields(&self.table_header)
    }

    /// Program entry layout.
    pub fn program_layout(&self) -> StructLayout {
        StructLayout::from_fields(&self.program_entry)
    }

    /// LUT region header layout.
    pub fn lut_header_layout(&self) -> StructLayout {
        StructLayout::from_fields(&self.lut_header)
    }

    /// LUT entry layout.
    pub fn lut_entry_layout(&self) -> StructLayout {
        StructLayout::from_fields(&self.lut_entry)
    }

    /// Reference entry layout.
    pub fn ref_entry_layout(&self) -> StructLayout {
        StructLayout::from_fields(&self.ref_entry)
    }

    /// xxh3 fingerprint over the full description.
    pub fn fingerprint(&self) -> u64 {
        let mut d = Digest::new();
        d.write_u32(self.version);
        d.write_u32(self.region_align);
        for group in [
            &self.header,
            &self.table_header,
            &self.program_entry,
            &self.lut_header,
            &self.lut_entry,
            &self.ref_entry,
        ] {
            d.write_u64(group.len() as u64);
            for f in group.iter() {
                d.write_str(f.name);
                d.write_u32(f.size);
                d.write_u32(f.align);
            }
        }
        d.finish()
    }

    /// Check the description against the ABI the firmware expects.
    pub fn validate(&self) -> FrameJobResult<()> {
        if self.version != SCHEMA_VERSION {
            return Err(FrameJobError::config(format!(
                "schema version {} is not supported (expected {SCHEMA_VERSION})",
                self.version
            )));
        }
        if !self.region_align.is_power_of_two() {
            return Err(FrameJobError::config(format!(
                "schema region alignment {} is not a power of two",
                self.region_align
            )));
        }
        for f in self
            .header
            .iter()
            .chain(&self.table_header)
            .chain(&self.program_entry)
            .chain(&self.lut_header)
            .chain(&self.lut_entry)
            .chain(&self.ref_entry)
        {
            if !f.align.is_power_of_two() {
                return Err(FrameJobError::config(format!(
                    "schema field {} alignment {} is not a power of two",
                    f.name, f.align
                )));
            }
            if f.size == 0 || f.size % f.align != 0 {
                return Err(FrameJobError::config(format!(
                    "schema field {} size {} is not a non-zero multiple of {}",
                    f.name, f.size, f.align
                )));
            }
        }
        check_names("header", &self.header, HeaderField::ALL.map(HeaderField::name))?;
        check_names(
            "table header",
            &self.table_header,
            TableHeaderField::ALL.map(TableHeaderField::name),
        )?;
        check_names(
            "program entry",
            &self.program_entry,
            ProgramField::ALL.map(ProgramField::name),
        )?;
        check_names("lut entry", &self.lut_entry, LutField::ALL.map(LutField::name))?;
        check_names("ref entry", &self.ref_entry, RefField::ALL.map(RefField::name))?;

        let header_size = self.header_layout().size();
        if header_size != HEADER_SIZE_V1 {
            return Err(FrameJobError::config(format!(
                "schema header size {header_size} does not match firmware header size {HEADER_SIZE_V1}"
            )));
        }
        let expected = Self::v1().fingerprint();
        let actual = self.fingerprint();
        if actual != expected {
            return Err(FrameJobError::config(format!(
                "schema fingerprint {actual:#018x} does not match ABI fingerprint {expected:#018x}"
            )));
        }
        Ok(())
    }
}

fn check_names<const N: usize>(
    what: &str,
    fields: &[Field],
    expected: [&'static str; N],
) -> FrameJobResult<()> {
    let names: Vec<&str> = fields.iter().map(|f| f.name).collect();
    if names != expected {
        return Err(FrameJobError::config(format!(
            "schema {what} fields {names:?} do not match {expected:?}"
        )));
    }
    Ok(())
}

#[cfg(test)]
#[path = "../../tests/unit/layout/schema.rs"]
mod tests;
