use crate::foundation::core::Dimensions;
use crate::foundation::error::{FrameJobError, FrameJobResult};
use crate::foundation::math::lcm_u32;

/// Size and alignment constraints one consumer places on a buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct BufferRequirement {
    /// Preferred dimensions.
    pub optimal: Dimensions,
    /// Smallest acceptable dimensions.
    pub min: Dimensions,
    /// Largest acceptable dimensions.
    pub max: Dimensions,
    /// Row stride alignment in bytes.
    #[serde(default = "default_alignment")]
    pub stride_alignment: u32,
    /// Scanline (row count) alignment.
    #[serde(default = "default_alignment")]
    pub scanline_alignment: u32,
}

fn default_alignment() -> u32 {
    1
}

impl BufferRequirement {
    /// Requirement with unit alignments.
    pub fn new(optimal: Dimensions, min: Dimensions, max: Dimensions) -> Self {
        Self {
            optimal,
            min,
            max,
            stride_alignment: 1,
            scanline_alignment: 1,
        }
    }

    /// Reject zero dimensions, zero alignments and `min <= optimal <= max` violations.
    pub fn validate(&self) -> FrameJobResult<()> {
        if self.optimal.is_zero() || self.min.is_zero() || self.max.is_zero() {
            return Err(FrameJobError::invalid_arg(format!(
                "requirement has a zero dimension (optimal {}, min {}, max {})",
                self.optimal, self.min, self.max
            )));
        }
        if self.stride_alignment == 0 || self.scanline_alignment == 0 {
            return Err(FrameJobError::invalid_arg("requirement has a zero alignment"));
        }
        if !self.min.fits_within(self.optimal) || !self.optimal.fits_within(self.max) {
            return Err(FrameJobError::invalid_arg(format!(
                "requirement violates min <= optimal <= max (optimal {}, min {}, max {})",
                self.optimal, self.min, self.max
            )));
        }
        Ok(())
    }

    /// Merge two requirements so the result satisfies both consumers.
    ///
    /// optimal and min take the component-wise maximum, max the component-wise minimum and
    /// alignments their least common multiple. Both inputs and the result are validated.
    pub fn merge(&self, other: &Self) -> FrameJobResult<Self> {
        self.validate()?;
        other.validate()?;
        let stride_alignment = lcm_u32(self.stride_alignment, other.stride_alignment)
            .ok_or_else(|| FrameJobError::invalid_arg("stride alignment overflows"))?;
        let scanline_alignment = lcm_u32(self.scanline_alignment, other.scanline_alignment)
            .ok_or_else(|| FrameJobError::invalid_arg("scanline alignment overflows"))?;
        let merged = Self {
            optimal: self.optimal.max(other.optimal),
            min: self.min.max(other.min),
            max: self.max.min(other.max),
            stride_alignment,
            scanline_alignment,
        };
        merged.validate()?;
        Ok(merged)
    }
}

/// Consumer class of a processed output.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum OutputKind {
    /// Primary (preview/display) output.
    Display,
    /// Secondary (video/encoder) output.
    Video,
    /// Temporal reference output read back by the next frame.
    Reference,
}

impl OutputKind {
    /// All kinds, in dominance order.
    pub const ALL: [Self; 3] = [Self::Display, Self::Video, Self::Reference];
}

/// A [`BufferRequirement`] tagged with the output it comes from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct OutputRequirement {
    /// Output the requirement belongs to.
    pub kind: OutputKind,
    /// The requirement itself.
    #[serde(flatten)]
    pub requirement: BufferRequirement,
}

impl OutputRequirement {
    /// Tag `requirement` with `kind`.
    pub fn new(kind: OutputKind, requirement: BufferRequirement) -> Self {
        Self { kind, requirement }
    }
}

/// Merge every requirement of `kind`, or `None` if there is none.
pub(crate) fn merge_kind(
    reqs: &[OutputRequirement],
    kind: OutputKind,
) -> FrameJobResult<Option<BufferRequirement>> {
    let mut merged: Option<BufferRequirement> = None;
    for r in reqs.iter().filter(|r| r.kind == kind) {
        merged = Some(match merged {
            None => {
                r.requirement.validate()?;
                r.requirement
            }
            Some(m) => m.merge(&r.requirement)?,
        });
    }
    Ok(merged)
}

#[cfg(test)]
#[path = "../../tests/unit/negotiate/requirement.rs"]
mod tests;
