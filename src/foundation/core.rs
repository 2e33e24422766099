use crate::foundation::error::{FrameJobError, FrameJobResult};

/// Width and height in pixels.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize,
)]
pub struct Dimensions {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl Dimensions {
    /// Build a `Dimensions` value.
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// `true` if either side is zero.
    pub fn is_zero(self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Pixel count.
    pub fn area(self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }

    /// Component-wise maximum.
    pub fn max(self, other: Self) -> Self {
        Self::new(self.width.max(other.width), self.height.max(other.height))
    }

    /// Component-wise minimum.
    pub fn min(self, other: Self) -> Self {
        Self::new(self.width.min(other.width), self.height.min(other.height))
    }

    /// `true` if both sides are `<=` the other's.
    pub fn fits_within(self, other: Self) -> bool {
        self.width <= other.width && self.height <= other.height
    }

    /// Component-wise clamp into `[lo, hi]`.
    pub fn clamp(self, lo: Self, hi: Self) -> Self {
        Self::new(
            self.width.clamp(lo.width, hi.width.max(lo.width)),
            self.height.clamp(lo.height, hi.height.max(lo.height)),
        )
    }

    /// Width divided by height; 0.0 for a zero height.
    pub fn aspect_ratio(self) -> f64 {
        if self.height == 0 {
            return 0.0;
        }
        f64::from(self.width) / f64::from(self.height)
    }
}

impl std::fmt::Display for Dimensions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Opaque handle of a device-mappable buffer. Zero is the null handle.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize,
)]
pub struct BufferHandle(pub u32);

impl BufferHandle {
    /// The null handle.
    pub const NULL: Self = Self(0);

    /// `true` for the null handle.
    pub fn is_null(self) -> bool {
        self.0 == 0
    }
}

/// A validated reference to a buffer: non-null handle, non-zero length.
///
/// This is the only type accepted as a patch source, so a recorded patch can never point at a
/// null or empty buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize)]
pub struct BufferRef {
    handle: BufferHandle,
    len: u64,
}

impl BufferRef {
    /// Validate and build a buffer reference.
    pub fn new(handle: BufferHandle, len: u64) -> FrameJobResult<Self> {
        if handle.is_null() {
            return Err(FrameJobError::invalid_pointer("buffer handle is null"));
        }
        if len == 0 {
            return Err(FrameJobError::invalid_pointer(format!(
                "buffer {} has zero length",
                handle.0
            )));
        }
        Ok(Self { handle, len })
    }

    /// Buffer handle.
    pub fn handle(self) -> BufferHandle {
        self.handle
    }

    /// Buffer length in bytes.
    pub fn len(self) -> u64 {
        self.len
    }

    /// Always `false`; kept for API symmetry with slices.
    pub fn is_empty(self) -> bool {
        self.len == 0
    }

    /// `true` if `[offset, offset + len)` lies inside the buffer.
    pub fn contains_range(self, offset: u64, len: u64) -> bool {
        offset
            .checked_add(len)
            .is_some_and(|end| end <= self.len)
    }
}

/// Memory layout family of an image buffer.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum BufferFormat {
    /// Plain linear planes.
    #[default]
    Linear,
    /// Lossless bandwidth-compressed planes, each preceded by a metadata region.
    Ubwc,
    /// Lossy bandwidth-compressed planes, each preceded by a metadata region.
    UbwcLossy,
}

impl BufferFormat {
    /// `true` for layouts that carry a metadata region ahead of the pixel data.
    pub fn is_compressed(self) -> bool {
        matches!(self, Self::Ubwc | Self::UbwcLossy)
    }
}

#[cfg(test)]
#[path = "../../tests/unit/foundation/core.rs"]
mod tests;
