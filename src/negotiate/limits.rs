use crate::foundation::core::{BufferFormat, Dimensions};
use crate::foundation::error::{FrameJobError, FrameJobResult};
use crate::negotiate::requirement::OutputKind;

/// Upper bound on the number of passes the accelerator can cascade (FULL, DC4, DC16, DC64).
pub const MAX_PASSES: usize = 4;

/// How far an output may be scaled relative to the processed input.
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ScaleLimits {
    /// Maximum `output / input` ratio. `1.0` forbids upscaling.
    pub max_upscale: f64,
    /// Maximum `input / output` ratio.
    pub max_downscale: f64,
}

impl ScaleLimits {
    /// Limits that forbid any scaling.
    pub const NONE: Self = Self {
        max_upscale: 1.0,
        max_downscale: 1.0,
    };
}

/// Bandwidth compression ratio per buffer format, used by the cost estimate.
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct CompressionRatios {
    /// Ratio for linear buffers.
    pub linear: f64,
    /// Ratio for lossless compressed buffers.
    pub ubwc: f64,
    /// Ratio for lossy compressed buffers.
    pub ubwc_lossy: f64,
}

impl Default for CompressionRatios {
    fn default() -> Self {
        Self {
            linear: 1.0,
            ubwc: 1.6,
            ubwc_lossy: 2.0,
        }
    }
}

impl CompressionRatios {
    /// Ratio for `format`.
    pub fn ratio(&self, format: BufferFormat) -> f64 {
        match format {
            BufferFormat::Linear => self.linear,
            BufferFormat::Ubwc => self.ubwc,
            BufferFormat::UbwcLossy => self.ubwc_lossy,
        }
    }
}

/// Static hardware constraints of the accelerator revision.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct DimensionLimits {
    /// Smallest input the full pass accepts.
    pub min_input: Dimensions,
    /// Largest input the full pass accepts.
    pub max_input: Dimensions,
    /// Smallest dimensions any down-scaled pass may have.
    pub min_pass: Dimensions,
    /// Per-pass downscale factor in each dimension.
    pub downscale_factor: u32,
    /// Maximum number of passes, `1..=MAX_PASSES`.
    pub max_passes: u32,
    /// Input width/height alignment.
    pub alignment: u32,
    /// Scaling limits of the display output.
    pub display: ScaleLimits,
    /// Scaling limits of the video output.
    pub video: ScaleLimits,
    /// A ratio limit this close to 1.0 is treated as exactly 1.0.
    pub scale_snap_tolerance: f64,
    /// Relative aspect-ratio difference tolerated without correction.
    pub aspect_tolerance: f64,
    /// Aspect ratios (`[w, h]`) never corrected.
    pub standard_aspect_ratios: Vec<[u32; 2]>,
    /// Per-format compression ratios.
    pub compression: CompressionRatios,
}

impl Default for DimensionLimits {
    fn default() -> Self {
        Self {
            min_input: Dimensions::new(30, 26),
            max_input: Dimensions::new(8192, 8192),
            min_pass: Dimensions::new(30, 26),
            downscale_factor: 4,
            max_passes: MAX_PASSES as u32,
            alignment: 2,
            display: ScaleLimits {
                max_upscale: 1.0,
                max_downscale: 64.0,
            },
            video: ScaleLimits {
                max_upscale: 1.0,
                max_downscale: 16.0,
            },
            scale_snap_tolerance: 0.01,
            aspect_tolerance: 0.01,
            standard_aspect_ratios: vec![[4, 3], [16, 9], [1, 1], [3, 2], [2, 1]],
            compression: CompressionRatios::default(),
        }
    }
}

impl DimensionLimits {
    /// Scaling limits that apply to an output kind. Reference outputs never scale.
    pub fn scale_limits(&self, kind: OutputKind) -> ScaleLimits {
        match kind {
            OutputKind::Display => self.display,
            OutputKind::Video => self.video,
            OutputKind::Reference => ScaleLimits::NONE,
        }
    }

    /// `true` if `ratio` is within tolerance of one of the standard aspect ratios.
    pub fn is_standard_ratio(&self, ratio: f64) -> bool {
        self.standard_aspect_ratios.iter().any(|&[w, h]| {
            h != 0 && relative_diff(ratio, f64::from(w) / f64::from(h)) <= self.aspect_tolerance
        })
    }

    /// Check internal consistency.
    pub fn validate(&self) -> FrameJobResult<()> {
        if self.min_input.is_zero() || self.min_pass.is_zero() {
            return Err(FrameJobError::config(
                "limits min_input and min_pass must be non-zero",
            ));
        }
        if !self.min_input.fits_within(self.max_input) {
            return Err(FrameJobError::config(format!(
                "limits min_input {} exceeds max_input {}",
                self.min_input, self.max_input
            )));
        }
        if self.downscale_factor < 2 {
            return Err(FrameJobError::config("limits downscale_factor must be >= 2"));
        }
        if self.max_passes == 0 || self.max_passes as usize > MAX_PASSES {
            return Err(FrameJobError::config(format!(
                "limits max_passes must be in 1..={MAX_PASSES}"
            )));
        }
        if self.alignment == 0 || !self.alignment.is_power_of_two() {
            return Err(FrameJobError::config(
                "limits alignment must be a power of two",
            ));
        }
        for (name, s) in [("display", self.display), ("video", self.video)] {
            if !(s.max_upscale.is_finite() && s.max_upscale >= 1.0)
                || !(s.max_downscale.is_finite() && s.max_downscale >= 1.0)
            {
                return Err(FrameJobError::config(format!(
                    "limits {name} scale ratios must be finite and >= 1.0"
                )));
            }
        }
        for (name, t) in [
            ("scale_snap_tolerance", self.scale_snap_tolerance),
            ("aspect_tolerance", self.aspect_tolerance),
        ] {
            if !(0.0..1.0).contains(&t) {
                return Err(FrameJobError::config(format!(
                    "limits {name} must be in [0, 1)"
                )));
            }
        }
        if self.standard_aspect_ratios.iter().any(|r| r[0] == 0 || r[1] == 0) {
            return Err(FrameJobError::config(
                "limits standard_aspect_ratios must not contain zero terms",
            ));
        }
        let c = self.compression;
        if [c.linear, c.ubwc, c.ubwc_lossy]
            .iter()
            .any(|r| !(r.is_finite() && *r >= 1.0))
        {
            return Err(FrameJobError::config(
                "limits compression ratios must be finite and >= 1.0",
            ));
        }
        Ok(())
    }
}

pub(crate) fn relative_diff(a: f64, b: f64) -> f64 {
    if b == 0.0 {
        return f64::INFINITY;
    }
    ((a - b) / b).abs()
}

#[cfg(test)]
#[path = "../../tests/unit/negotiate/limits.rs"]
mod tests;
