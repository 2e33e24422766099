use std::collections::BTreeMap;

use smallvec::SmallVec;

use crate::compile::job::FrameJob;
use crate::compile::patch::{Destination, Patch, PatchKind};
use crate::foundation::core::{BufferFormat, BufferRef, Dimensions};
use crate::foundation::error::{FrameJobError, FrameJobResult};
use crate::foundation::math::fw_buffer_aligned_size;
use crate::layout::offsets::{Anchor, OffsetMap};
use crate::layout::schema::{MAX_BATCH, RefField};
use crate::negotiate::limits::MAX_PASSES;
use crate::negotiate::planner::{PassName, PassPlan};
use crate::pool::allocator::{BufferAllocator, BufferPurpose};

/// Upper bound on slots per pass.
pub const MAX_RING_SLOTS: u32 = 32;

/// Reference ring configuration.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct RingConfig {
    /// Frames an external consumer may lag behind the accelerator when reading reference
    /// outputs. Each frame of lag keeps one more request's slots alive.
    pub max_external_read_lag: u32,
    /// Memory layout of reference buffers.
    pub reference_format: BufferFormat,
}

impl RingConfig {
    /// Slots per pass for `batch_size` frames per request.
    pub fn ring_size(&self, batch_size: u32) -> FrameJobResult<u32> {
        if batch_size == 0 || batch_size as usize > MAX_BATCH {
            return Err(FrameJobError::config(format!(
                "batch size {batch_size} outside 1..={MAX_BATCH}"
            )));
        }
        let groups = self.max_external_read_lag.saturating_add(2).max(2);
        let size = groups.saturating_mul(batch_size);
        if size > MAX_RING_SLOTS {
            return Err(FrameJobError::config(format!(
                "reference ring of {size} slots (lag {}, batch {batch_size}) exceeds {MAX_RING_SLOTS}",
                self.max_external_read_lag
            )));
        }
        Ok(size)
    }
}

/// Write and read slot of one frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize)]
pub struct SlotPair {
    /// Slot the frame writes its reference output to.
    pub write: u32,
    /// Slot holding the previous frame's reference output.
    pub read: u32,
}

/// Whether the first frame of a request may read the previous request's reference output.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum Continuity {
    /// Direct successor of the last submitted request.
    Continuous,
    /// No request was submitted since stream start.
    FirstFrame,
    /// Request ids skipped since the last submitted request.
    Gap {
        /// Distance to the last submitted request id.
        delta: u64,
    },
    /// The stream identity changed.
    IdentityChanged,
    /// The predecessor completed with an error; its output is not a valid reference.
    PredecessorFailed,
}

impl Continuity {
    /// `true` if the reference read of the first frame is kept.
    pub fn reads_reference(self) -> bool {
        self == Self::Continuous
    }
}

/// One reference buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize)]
pub struct ReferenceSlot {
    /// Owning pass.
    pub pass: PassName,
    /// Ring index.
    pub index: u32,
    /// Backing buffer.
    pub buffer: BufferRef,
}

/// Slots held by one request between `reserve` and `complete`/`cancel`.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize)]
pub struct Reservation {
    request_id: u64,
    stream_identity: u64,
    continuity: Continuity,
    slots: SmallVec<[SlotPair; MAX_BATCH]>,
}

impl Reservation {
    /// Request holding the reservation.
    pub fn request_id(&self) -> u64 {
        self.request_id
    }

    /// Stream identity the request was reserved under.
    pub fn stream_identity(&self) -> u64 {
        self.stream_identity
    }

    /// Continuity decision for the request.
    pub fn continuity(&self) -> Continuity {
        self.continuity
    }

    /// Slot pair per batch frame.
    pub fn slots(&self) -> &[SlotPair] {
        &self.slots
    }

    /// `true` if batch frame `batch_index` reads a reference.
    ///
    /// Later frames of a batch read their predecessor in the same request, which is always
    /// valid.
    pub fn reads_reference(&self, batch_index: usize) -> bool {
        batch_index > 0 || self.continuity.reads_reference()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    Reserved,
    Submitted,
}

#[derive(Clone, Copy, Debug)]
struct LastSubmitted {
    request_id: u64,
    stream_identity: u64,
    failed: bool,
}

/// Per-pass reference buffer rings with continuity tracking.
#[derive(Debug)]
pub struct ReferenceRing {
    config: RingConfig,
    batch_size: u32,
    ring_size: u32,
    slots: SmallVec<[Vec<ReferenceSlot>; MAX_PASSES]>,
    in_flight: BTreeMap<u64, Phase>,
    last: Option<LastSubmitted>,
}

/// Bytes of one 4:2:0 reference buffer for `dims`.
pub fn reference_buffer_len(dims: Dimensions) -> u64 {
    let bytes = dims.area().saturating_mul(3).div_ceil(2);
    fw_buffer_aligned_size(usize::try_from(bytes).unwrap_or(usize::MAX)) as u64
}

impl ReferenceRing {
    /// Allocate every slot of every pass of `plan`.
    ///
    /// On allocation failure the slots obtained so far are released again.
    pub fn new(
        config: RingConfig,
        plan: &PassPlan,
        batch_size: u32,
        allocator: &mut dyn BufferAllocator,
    ) -> FrameJobResult<Self> {
        let ring_size = config.ring_size(batch_size)?;
        let mut ring = Self {
            config,
            batch_size,
            ring_size,
            slots: SmallVec::new(),
            in_flight: BTreeMap::new(),
            last: None,
        };
        if let Err(e) = ring.allocate(plan, allocator) {
            ring.free_slots(allocator)?;
            return Err(e);
        }
        tracing::debug!(
            passes = ring.slots.len(),
            ring_size,
            batch_size,
            "allocated reference ring"
        );
        Ok(ring)
    }

    fn allocate(&mut self, plan: &PassPlan, allocator: &mut dyn BufferAllocator) -> FrameJobResult<()> {
        for pass in plan.passes() {
            let len = reference_buffer_len(pass.dims);
            let mut slots = Vec::with_capacity(self.ring_size as usize);
            for index in 0..self.ring_size {
                let purpose = BufferPurpose::Reference {
                    pass: pass.name,
                    slot: index,
                };
                match allocator.allocate(len, purpose) {
                    Ok(buffer) => slots.push(ReferenceSlot {
                        pass: pass.name,
                        index,
                        buffer,
                    }),
                    Err(e) => {
                        self.slots.push(slots);
                        return Err(e);
                    }
                }
            }
            self.slots.push(slots);
        }
        Ok(())
    }

    fn free_slots(&mut self, allocator: &mut dyn BufferAllocator) -> FrameJobResult<()> {
        for pass in self.slots.drain(..) {
            for slot in pass {
                allocator.free(slot.buffer)?;
            }
        }
        Ok(())
    }

    /// Ring configuration.
    pub fn config(&self) -> RingConfig {
        self.config
    }

    /// Slots per pass.
    pub fn ring_size(&self) -> u32 {
        self.ring_size
    }

    /// Frames per request.
    pub fn batch_size(&self) -> u32 {
        self.batch_size
    }

    /// Passes with a ring.
    pub fn pass_count(&self) -> usize {
        self.slots.len()
    }

    /// Slot `index` of `pass`.
    pub fn slot(&self, pass: PassName, index: u32) -> Option<&ReferenceSlot> {
        self.slots.get(pass.index())?.get(index as usize)
    }

    /// Requests holding a reservation.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Write and read slot of batch frame `batch_index` of `request_id` in `pass`.
    ///
    /// Every pass rotates in lock step, so the pair only depends on the pass being active.
    pub fn select_slots(
        &self,
        request_id: u64,
        pass: PassName,
        batch_index: u32,
    ) -> FrameJobResult<SlotPair> {
        if pass.index() >= self.slots.len() {
            return Err(FrameJobError::bad_request(format!(
                "pass {} has no reference ring",
                pass.as_str()
            )));
        }
        if batch_index >= self.batch_size {
            return Err(FrameJobError::bad_request(format!(
                "batch index {batch_index} outside batch of {}",
                self.batch_size
            )));
        }
        let r = u64::from(self.ring_size);
        let b = u64::from(self.batch_size);
        let write = (request_id % (r / b)) * b + u64::from(batch_index);
        let read = (write + r - 1) % r;
        Ok(SlotPair {
            write: write as u32,
            read: read as u32,
        })
    }

    fn continuity_for(&self, request_id: u64, stream_identity: u64) -> Continuity {
        let Some(last) = self.last else {
            return Continuity::FirstFrame;
        };
        if last.stream_identity != stream_identity {
            return Continuity::IdentityChanged;
        }
        let delta = request_id.wrapping_sub(last.request_id);
        if delta != 1 {
            return Continuity::Gap { delta };
        }
        if last.failed {
            return Continuity::PredecessorFailed;
        }
        Continuity::Continuous
    }

    /// Reserve slots for `request_id` and decide its continuity.
    pub fn reserve(&mut self, request_id: u64, stream_identity: u64) -> FrameJobResult<Reservation> {
        if self.in_flight.contains_key(&request_id) {
            return Err(FrameJobError::bad_request(format!(
                "request {request_id} already holds a reservation"
            )));
        }
        let slots = (0..self.batch_size)
            .map(|k| self.select_slots(request_id, PassName::Full, k))
            .collect::<FrameJobResult<SmallVec<_>>>()?;
        let continuity = self.continuity_for(request_id, stream_identity);
        self.in_flight.insert(request_id, Phase::Reserved);
        Ok(Reservation {
            request_id,
            stream_identity,
            continuity,
            slots,
        })
    }

    /// Record the reference patches of `reservation` in `job` and set its reference-valid
    /// flags.
    pub fn fill_patches(
        &self,
        job: &mut FrameJob,
        reservation: &Reservation,
        map: &OffsetMap,
    ) -> FrameJobResult<()> {
        if job.request_id() != reservation.request_id {
            return Err(FrameJobError::invalid_state(format!(
                "reservation of request {} applied to job {}",
                reservation.request_id,
                job.request_id()
            )));
        }
        if self.in_flight.get(&reservation.request_id) != Some(&Phase::Reserved) {
            return Err(FrameJobError::invalid_state(format!(
                "request {} holds no open reservation",
                reservation.request_id
            )));
        }
        if job.batch_size() as usize != reservation.slots.len() {
            return Err(FrameJobError::invalid_state(format!(
                "job batch of {} frames, reservation of {}",
                job.batch_size(),
                reservation.slots.len()
            )));
        }
        if map.pass_count() > self.slots.len() {
            return Err(FrameJobError::invalid_state(format!(
                "layout has {} passes, ring has {}",
                map.pass_count(),
                self.slots.len()
            )));
        }

        for pass in PassName::ALL.into_iter().take(map.pass_count()) {
            let mut mask = 0u32;
            for (k, pair) in reservation.slots.iter().enumerate() {
                let write = self.slot_buffer(pass, pair.write)?;
                let at = ref_field(map, pass, k, RefField::WriteAddr)?;
                job.record_patch(Patch {
                    destination: Destination::relative(map, Anchor::Refs, at)?,
                    source: write,
                    source_offset: 0,
                    kind: PatchKind::RefWrite,
                })?;

                if reservation.reads_reference(k) {
                    let read = self.slot_buffer(pass, pair.read)?;
                    let at = ref_field(map, pass, k, RefField::ReadAddr)?;
                    job.record_patch(Patch {
                        destination: Destination::relative(map, Anchor::Refs, at)?,
                        source: read,
                        source_offset: 0,
                        kind: PatchKind::RefRead,
                    })?;
                    mask |= 1 << k;
                }
            }
            job.set_ref_valid(map, pass, mask)?;
        }

        if !reservation.continuity.reads_reference() {
            tracing::warn!(
                request_id = reservation.request_id,
                continuity = ?reservation.continuity,
                "reference read omitted"
            );
        }
        job.set_continuity(reservation.continuity);
        Ok(())
    }

    fn slot_buffer(&self, pass: PassName, index: u32) -> FrameJobResult<BufferRef> {
        self.slot(pass, index).map(|s| s.buffer).ok_or_else(|| {
            FrameJobError::invalid_pointer(format!(
                "no reference slot {index} for pass {}",
                pass.as_str()
            ))
        })
    }

    /// Mark the reservation submitted; continuity advances to this request.
    pub fn commit(&mut self, reservation: &Reservation) -> FrameJobResult<()> {
        match self.in_flight.get_mut(&reservation.request_id) {
            Some(phase @ Phase::Reserved) => *phase = Phase::Submitted,
            _ => {
                return Err(FrameJobError::invalid_state(format!(
                    "request {} holds no open reservation",
                    reservation.request_id
                )));
            }
        }
        self.last = Some(LastSubmitted {
            request_id: reservation.request_id,
            stream_identity: reservation.stream_identity,
            failed: false,
        });
        Ok(())
    }

    /// Release an uncommitted reservation without advancing continuity.
    pub fn cancel(&mut self, reservation: Reservation) -> FrameJobResult<()> {
        match self.in_flight.get(&reservation.request_id) {
            Some(Phase::Reserved) => {
                self.in_flight.remove(&reservation.request_id);
                Ok(())
            }
            Some(Phase::Submitted) => Err(FrameJobError::invalid_state(format!(
                "request {} was already submitted",
                reservation.request_id
            ))),
            None => Err(FrameJobError::invalid_state(format!(
                "request {} holds no reservation",
                reservation.request_id
            ))),
        }
    }

    /// Release a submitted request's reservation.
    ///
    /// A failed completion of the last submitted request invalidates its reference output for
    /// the next request.
    pub fn complete(&mut self, request_id: u64, success: bool) -> FrameJobResult<()> {
        if self.in_flight.get(&request_id) != Some(&Phase::Submitted) {
            return Err(FrameJobError::invalid_state(format!(
                "request {request_id} is not submitted"
            )));
        }
        self.in_flight.remove(&request_id);
        if !success
            && let Some(last) = self.last.as_mut()
            && last.request_id == request_id
        {
            last.failed = true;
        }
        Ok(())
    }

    /// Forget the last submitted request; the next one starts a new stream.
    pub fn reset_continuity(&mut self) {
        self.last = None;
    }

    /// Free every slot. Fails with `InvalidState` while any reservation is in flight.
    pub fn teardown(&mut self, allocator: &mut dyn BufferAllocator) -> FrameJobResult<()> {
        if !self.in_flight.is_empty() {
            return Err(FrameJobError::invalid_state(format!(
                "reference ring has {} reservations in flight",
                self.in_flight.len()
            )));
        }
        self.free_slots(allocator)?;
        self.last = None;
        Ok(())
    }
}

fn ref_field(
    map: &OffsetMap,
    pass: PassName,
    batch_index: usize,
    field: RefField,
) -> FrameJobResult<u32> {
    map.ref_field(pass, batch_index, field).ok_or_else(|| {
        FrameJobError::construction_failed(format!(
            "no reference entry {batch_index} for pass {}",
            pass.as_str()
        ))
    })
}

#[cfg(test)]
#[path = "../../tests/unit/reference/ring.rs"]
mod tests;
