use crate::compile::program::StageSet;
use crate::foundation::core::BufferFormat;
use crate::layout::schema::StageKind;
use crate::negotiate::limits::CompressionRatios;
use crate::negotiate::planner::PassPlan;

/// Bytes per pixel of the 4:2:0 working format, in eighths.
const BPP_EIGHTHS: u64 = 12;

/// Per-frame processing cost forwarded to the clock/bandwidth collaborator.
///
/// A pure function of the pass plan, the enabled stages and the buffer format.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize)]
pub struct FrameCost {
    /// Pixels entering all active passes.
    pub pixels: u64,
    /// Pixel-stage products: every enabled stage counted over the pixels it touches.
    pub stage_pixels: u64,
    /// Estimated memory traffic in bytes after compression.
    pub bandwidth_bytes: u64,
}

impl FrameCost {
    /// Estimate the cost of one frame.
    pub fn estimate(
        plan: &PassPlan,
        enabled: StageSet,
        format: BufferFormat,
        ratios: &CompressionRatios,
    ) -> Self {
        let per_pass = enabled.iter().filter(|s| s.is_per_pass()).count() as u64;
        let full_only = enabled.iter().filter(|s| !s.is_per_pass()).count() as u64;
        let temporal = enabled.contains(StageKind::Tf);

        let mut cost = Self::default();
        for (i, pass) in plan.passes().iter().enumerate() {
            let area = pass.dims.area();
            cost.pixels = cost.pixels.saturating_add(area);

            let stages = if i == 0 { per_pass + full_only } else { per_pass };
            cost.stage_pixels = cost.stage_pixels.saturating_add(area.saturating_mul(stages));

            // input read + output write, plus reference read + write when temporal filtering
            let streams: u64 = if temporal { 4 } else { 2 };
            let raw = area.saturating_mul(BPP_EIGHTHS).saturating_mul(streams) / 8;
            let compressed = (raw as f64 / ratios.ratio(format).max(1.0)).ceil() as u64;
            cost.bandwidth_bytes = cost.bandwidth_bytes.saturating_add(compressed);
        }
        cost
    }
}

#[cfg(test)]
#[path = "../../tests/unit/compile/cost.rs"]
mod tests;
