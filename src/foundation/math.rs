use xxhash_rust::xxh3::Xxh3;

/// Streaming xxh3 digest used to fingerprint ABI descriptions and offset maps.
pub(crate) struct Digest(Xxh3);

impl Digest {
    pub(crate) fn new() -> Self {
        Self(Xxh3::new())
    }

    pub(crate) fn write_u32(&mut self, v: u32) {
        self.0.update(&v.to_le_bytes());
    }

    pub(crate) fn write_u64(&mut self, v: u64) {
        self.0.update(&v.to_le_bytes());
    }

    pub(crate) fn write_str(&mut self, s: &str) {
        self.write_u64(s.len() as u64);
        self.0.update(s.as_bytes());
    }

    pub(crate) fn finish(&self) -> u64 {
        self.0.digest()
    }
}

pub(crate) fn gcd_u32(mut a: u32, mut b: u32) -> u32 {
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    a
}

/// Least common multiple; `None` on overflow or when either side is zero.
pub(crate) fn lcm_u32(a: u32, b: u32) -> Option<u32> {
    if a == 0 || b == 0 {
        return None;
    }
    (a / gcd_u32(a, b)).checked_mul(b)
}

pub(crate) fn align_up_u32(v: u32, align: u32) -> u32 {
    if align <= 1 {
        return v;
    }
    v.div_ceil(align).saturating_mul(align)
}

pub(crate) fn align_up_usize(v: usize, align: usize) -> usize {
    if align <= 1 {
        return v;
    }
    v.div_ceil(align).saturating_mul(align)
}

/// Size rule for firmware-visible buffers: below 4 KiB round to 4 KiB, otherwise round up
/// to a whole number of 64 KiB blocks.
pub(crate) fn fw_buffer_aligned_size(size: usize) -> usize {
    const KIB: usize = 1024;
    if size < 4 * KIB {
        4 * KIB
    } else {
        align_up_usize(size, 64 * KIB)
    }
}
