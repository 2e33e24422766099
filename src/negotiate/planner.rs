use smallvec::SmallVec;

use crate::foundation::core::Dimensions;
use crate::foundation::error::{FrameJobError, FrameJobResult};
use crate::foundation::math::{align_up_u32, lcm_u32};
use crate::negotiate::limits::{DimensionLimits, MAX_PASSES, ScaleLimits, relative_diff};
use crate::negotiate::requirement::{
    BufferRequirement, OutputKind, OutputRequirement, merge_kind,
};

/// Resolution tier of the multi-scale cascade. Index `k` is a `4^k` downscale of the input.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum PassName {
    /// Full resolution.
    Full,
    /// 1/4 in each dimension.
    Dc4,
    /// 1/16 in each dimension.
    Dc16,
    /// 1/64 in each dimension.
    Dc64,
}

impl PassName {
    /// All passes in cascade order.
    pub const ALL: [Self; MAX_PASSES] = [Self::Full, Self::Dc4, Self::Dc16, Self::Dc64];

    /// Position in the cascade.
    pub fn index(self) -> usize {
        self as usize
    }

    /// Pass at cascade position `index`.
    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    /// Firmware name of the pass.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Full => "FULL",
            Self::Dc4 => "DC4",
            Self::Dc16 => "DC16",
            Self::Dc64 => "DC64",
        }
    }
}

/// One pass of a [`PassPlan`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize)]
pub struct PassDesc {
    /// Pass name.
    pub name: PassName,
    /// Input dimensions processed by the pass.
    pub dims: Dimensions,
}

/// Ordered pass list fixed at negotiation.
///
/// Dimensions strictly decrease with the pass index and every pass meets the minimum pass size.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize)]
pub struct PassPlan {
    passes: SmallVec<[PassDesc; MAX_PASSES]>,
}

impl PassPlan {
    /// Number of active passes, `1..=MAX_PASSES`.
    pub fn len(&self) -> usize {
        self.passes.len()
    }

    /// Always `false` for a negotiated plan.
    pub fn is_empty(&self) -> bool {
        self.passes.is_empty()
    }

    /// Passes in cascade order.
    pub fn passes(&self) -> &[PassDesc] {
        &self.passes
    }

    /// Descriptor of `name`, if that pass is active.
    pub fn get(&self, name: PassName) -> Option<&PassDesc> {
        self.passes.get(name.index())
    }

    /// Full-resolution input dimensions.
    pub fn input(&self) -> Dimensions {
        self.passes.first().map(|p| p.dims).unwrap_or_default()
    }
}

/// Outcome of negotiation: the input buffer requirement and the pass plan derived from it.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize)]
pub struct Negotiation {
    /// Resolved requirement on the accelerator input.
    pub input: BufferRequirement,
    /// Pass plan for the resolved optimal input.
    pub plan: PassPlan,
}

/// Merge per-output requirements into one input requirement and derive the pass plan.
///
/// Pure and idempotent. Malformed or contradictory requirements fail with `EInvalidArg`;
/// requirements the hardware cannot satisfy fail with `EFailed`.
#[tracing::instrument(skip(limits, reqs), fields(outputs = reqs.len()))]
pub fn negotiate(
    limits: &DimensionLimits,
    reqs: &[OutputRequirement],
) -> FrameJobResult<Negotiation> {
    limits.validate()?;
    if reqs.is_empty() {
        return Err(FrameJobError::invalid_arg("no output requirements"));
    }

    let mut merged: SmallVec<[(OutputKind, BufferRequirement); 3]> = SmallVec::new();
    for kind in OutputKind::ALL {
        if let Some(r) = merge_kind(reqs, kind)? {
            merged.push((kind, r));
        }
    }

    let mut optimal = Dimensions::default();
    let mut min = Dimensions::default();
    let mut max = Dimensions::new(u32::MAX, u32::MAX);
    let mut stride_alignment = 1u32;
    let mut scanline_alignment = 1u32;
    for &(kind, r) in &merged {
        let (lo, hi) = scale_bounds(
            r.optimal,
            limits.scale_limits(kind),
            limits.scale_snap_tolerance,
        );
        optimal = optimal.max(r.optimal);
        min = min.max(r.min).max(lo);
        max = max.min(r.max).min(hi);
        stride_alignment = lcm_u32(stride_alignment, r.stride_alignment)
            .ok_or_else(|| FrameJobError::invalid_arg("stride alignment overflows"))?;
        scanline_alignment = lcm_u32(scanline_alignment, r.scanline_alignment)
            .ok_or_else(|| FrameJobError::invalid_arg("scanline alignment overflows"))?;
    }

    min = min.clamp(limits.min_input, limits.max_input);
    max = max.clamp(limits.min_input, limits.max_input);
    optimal = optimal.clamp(limits.min_input, limits.max_input);
    check_bounds(optimal, min, max)?;

    let dominant = *merged
        .first()
        .ok_or_else(|| FrameJobError::invalid_arg("no output requirements"))?;
    optimal = correct_aspect(limits, optimal, dominant.1.optimal, max);

    optimal = Dimensions::new(
        align_up_u32(optimal.width, limits.alignment),
        align_up_u32(optimal.height, limits.alignment),
    );
    check_bounds(optimal, min, max)?;

    let plan = plan_passes(limits, optimal)?;
    let input = BufferRequirement {
        optimal,
        min,
        max,
        stride_alignment,
        scanline_alignment,
    };
    tracing::debug!(
        input = %optimal,
        min = %min,
        max = %max,
        passes = plan.len(),
        dominant = ?dominant.0,
        "negotiated input"
    );
    Ok(Negotiation { input, plan })
}

/// Input bounds an output of size `o` tolerates under `limits`.
fn scale_bounds(o: Dimensions, limits: ScaleLimits, snap: f64) -> (Dimensions, Dimensions) {
    let lo = if (limits.max_upscale - 1.0).abs() <= snap {
        o
    } else {
        Dimensions::new(
            div_ceil_f64(o.width, limits.max_upscale),
            div_ceil_f64(o.height, limits.max_upscale),
        )
    };
    let hi = if (limits.max_downscale - 1.0).abs() <= snap {
        o
    } else {
        Dimensions::new(
            mul_floor_f64(o.width, limits.max_downscale),
            mul_floor_f64(o.height, limits.max_downscale),
        )
    };
    (lo, hi)
}

fn div_ceil_f64(v: u32, by: f64) -> u32 {
    (f64::from(v) / by).ceil().clamp(1.0, f64::from(u32::MAX)) as u32
}

fn mul_floor_f64(v: u32, by: f64) -> u32 {
    (f64::from(v) * by).floor().clamp(1.0, f64::from(u32::MAX)) as u32
}

fn check_bounds(optimal: Dimensions, min: Dimensions, max: Dimensions) -> FrameJobResult<()> {
    if optimal.is_zero() || min.is_zero() {
        return Err(FrameJobError::negotiation_failed(format!(
            "zero input dimension (optimal {optimal}, min {min})"
        )));
    }
    if !min.fits_within(max) {
        return Err(FrameJobError::negotiation_failed(format!(
            "input min {min} exceeds max {max}"
        )));
    }
    if !min.fits_within(optimal) || !optimal.fits_within(max) {
        return Err(FrameJobError::negotiation_failed(format!(
            "input {optimal} outside [{min}, {max}]"
        )));
    }
    Ok(())
}

/// Grow the short side of `optimal` to the dominant output's aspect ratio.
fn correct_aspect(
    limits: &DimensionLimits,
    optimal: Dimensions,
    dominant: Dimensions,
    max: Dimensions,
) -> Dimensions {
    let target = dominant.aspect_ratio();
    let current = optimal.aspect_ratio();
    if relative_diff(current, target) <= limits.aspect_tolerance
        || limits.is_standard_ratio(current)
    {
        return optimal;
    }

    let corrected = if current < target {
        Dimensions::new(
            (f64::from(optimal.height) * target).ceil() as u32,
            optimal.height,
        )
    } else {
        Dimensions::new(
            optimal.width,
            (f64::from(optimal.width) / target).ceil() as u32,
        )
    };
    if !corrected.fits_within(max) {
        tracing::debug!(
            input = %optimal,
            wanted = %corrected,
            max = %max,
            "aspect correction skipped: exceeds max"
        );
        return optimal;
    }
    corrected
}

fn plan_passes(limits: &DimensionLimits, input: Dimensions) -> FrameJobResult<PassPlan> {
    if !limits.min_pass.fits_within(input) {
        return Err(FrameJobError::negotiation_failed(format!(
            "input {input} below minimum pass size {}",
            limits.min_pass
        )));
    }
    let max_passes = (limits.max_passes as usize).min(MAX_PASSES);
    let mut passes: SmallVec<[PassDesc; MAX_PASSES]> = SmallVec::new();
    passes.push(PassDesc {
        name: PassName::Full,
        dims: input,
    });
    let mut prev = input;
    for name in PassName::ALL.into_iter().take(max_passes).skip(1) {
        let dims = Dimensions::new(
            prev.width.div_ceil(limits.downscale_factor),
            prev.height.div_ceil(limits.downscale_factor),
        );
        if !limits.min_pass.fits_within(dims) {
            break;
        }
        passes.push(PassDesc { name, dims });
        prev = dims;
    }
    Ok(PassPlan { passes })
}

#[cfg(test)]
#[path = "../../tests/unit/negotiate/planner.rs"]
mod tests;
