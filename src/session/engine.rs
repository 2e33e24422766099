use std::sync::{Mutex, MutexGuard};

use crate::compile::compiler::{CommandRegions, CompileInputs, ImageBinding, LutRegions, compile};
use crate::compile::cost::FrameCost;
use crate::compile::job::FrameJob;
use crate::compile::program::StageSet;
use crate::foundation::error::{FrameJobError, FrameJobResult};
use crate::layout::offsets::{LayoutAllocator, OffsetMap};
use crate::layout::schema::{IoImage, LayoutSchema};
use crate::negotiate::planner::{Negotiation, PassName, PassPlan, negotiate};
use crate::negotiate::requirement::{BufferRequirement, OutputRequirement};
use crate::pool::allocator::BufferAllocator;
use crate::pool::job_pool::{JobPool, JobPoolStats};
use crate::reference::ring::{Continuity, ReferenceRing, Reservation};
use crate::session::config::EngineConfig;
use crate::submit::resolve::{AddressMapper, FrameJobSubmitter, submit_job};

/// Everything the caller provides for one request.
#[derive(Clone, Debug, Default)]
pub struct FrameRequest {
    /// Unique among in-flight requests; consecutive ids are consecutive frames.
    pub request_id: u64,
    /// Changes whenever the stream is restarted or switched.
    pub stream_identity: u64,
    /// Frames in the request. Must match the configured batch size.
    pub batch_size: u32,
    /// Stages enabled for this frame.
    pub enabled: StageSet,
    /// Command regions of enabled stages.
    pub regions: CommandRegions,
    /// Per-pass LUT regions of enabled LUT stages.
    pub luts: LutRegions,
    /// Caller images.
    pub images: Vec<ImageBinding>,
}

impl FrameRequest {
    /// Single-frame request with nothing bound.
    pub fn new(request_id: u64) -> Self {
        Self {
            request_id,
            batch_size: 1,
            ..Self::default()
        }
    }
}

/// A compiled job together with its ring reservation, ready for submission.
#[derive(Debug)]
pub struct PreparedJob {
    job: FrameJob,
    reservation: Reservation,
}

impl PreparedJob {
    /// The compiled job.
    pub fn job(&self) -> &FrameJob {
        &self.job
    }

    /// Ring reservation.
    pub fn reservation(&self) -> &Reservation {
        &self.reservation
    }

    /// Processing cost of the frame.
    pub fn cost(&self) -> FrameCost {
        self.job.cost()
    }
}

/// A submitted job. Its buffer stays out of the pool until [`Engine::complete`].
#[derive(Debug)]
pub struct InFlightJob {
    job: FrameJob,
}

impl InFlightJob {
    /// The committed job.
    pub fn job(&self) -> &FrameJob {
        &self.job
    }

    /// Request id.
    pub fn request_id(&self) -> u64 {
        self.job.request_id()
    }

    /// Continuity decision the job was built with.
    pub fn continuity(&self) -> Option<Continuity> {
        self.job.continuity()
    }
}

struct Resources {
    pool: Mutex<JobPool>,
    ring: Mutex<ReferenceRing>,
}

fn lock<'a, T>(m: &'a Mutex<T>, what: &str) -> FrameJobResult<MutexGuard<'a, T>> {
    m.lock()
        .map_err(|_| FrameJobError::invalid_state(format!("{what} lock poisoned")))
}

fn get_mut<'a, T>(m: &'a mut Mutex<T>, what: &str) -> FrameJobResult<&'a mut T> {
    m.get_mut()
        .map_err(|_| FrameJobError::invalid_state(format!("{what} lock poisoned")))
}

/// Configuration-scoped owner of the pass plan, offset map, job pool and reference ring.
///
/// Per-request methods take `&self` and may run on several threads; the pool and ring locks are
/// held only to check out, reserve and recycle, never while a job is compiled.
pub struct Engine {
    config: EngineConfig,
    layout: LayoutAllocator,
    negotiation: Negotiation,
    map: OffsetMap,
    allocator: Mutex<Box<dyn BufferAllocator>>,
    resources: Option<Resources>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .field("plan", &self.negotiation.plan)
            .field("job_size", &self.map.job_size())
            .field("configured", &self.resources.is_some())
            .finish()
    }
}

impl Engine {
    /// Negotiate `outputs`, lay out the frame job and allocate the pool and ring.
    pub fn configure(
        config: EngineConfig,
        outputs: &[OutputRequirement],
        mut allocator: Box<dyn BufferAllocator>,
    ) -> FrameJobResult<Self> {
        config.validate()?;
        let layout = LayoutAllocator::new(LayoutSchema::v1())?;
        let negotiation = negotiate(&config.limits, outputs)?;
        let map = layout.compute_layout(negotiation.plan.len())?;
        let resources = allocate(&config, &negotiation.plan, &map, allocator.as_mut())?;

        tracing::info!(
            input = %negotiation.plan.input(),
            passes = negotiation.plan.len(),
            job_size = map.job_size(),
            "engine configured"
        );
        Ok(Self {
            config,
            layout,
            negotiation,
            map,
            allocator: Mutex::new(allocator),
            resources: Some(resources),
        })
    }

    /// Renegotiate with new outputs. The engine must be idle.
    ///
    /// Buffers are reallocated and continuity restarts. If reallocation fails the engine is
    /// left torn down.
    pub fn reconfigure(&mut self, outputs: &[OutputRequirement]) -> FrameJobResult<()> {
        self.ensure_idle()?;
        let negotiation = negotiate(&self.config.limits, outputs)?;
        let map = self.layout.compute_layout(negotiation.plan.len())?;

        self.release()?;
        let allocator = get_mut(&mut self.allocator, "allocator")?;
        let resources = allocate(&self.config, &negotiation.plan, &map, allocator.as_mut())?;
        self.resources = Some(resources);
        self.negotiation = negotiation;
        self.map = map;

        tracing::info!(
            input = %self.negotiation.plan.input(),
            passes = self.negotiation.plan.len(),
            "engine reconfigured"
        );
        Ok(())
    }

    /// Free every buffer. Fails with `InvalidState` while requests are in flight.
    pub fn teardown(&mut self) -> FrameJobResult<()> {
        self.ensure_idle()?;
        self.release()?;
        tracing::info!("engine torn down");
        Ok(())
    }

    fn ensure_idle(&self) -> FrameJobResult<()> {
        let in_flight = self.in_flight()?;
        if in_flight > 0 {
            return Err(FrameJobError::invalid_state(format!(
                "{in_flight} requests in flight"
            )));
        }
        Ok(())
    }

    fn release(&mut self) -> FrameJobResult<()> {
        let Some(mut res) = self.resources.take() else {
            return Ok(());
        };
        let allocator = get_mut(&mut self.allocator, "allocator")?;
        get_mut(&mut res.pool, "job pool")?.release(allocator.as_mut())?;
        get_mut(&mut res.ring, "reference ring")?.teardown(allocator.as_mut())?;
        Ok(())
    }

    fn resources(&self) -> FrameJobResult<&Resources> {
        self.resources
            .as_ref()
            .ok_or_else(|| FrameJobError::invalid_state("engine is torn down"))
    }

    /// Engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Negotiated input requirement.
    pub fn input_requirement(&self) -> &BufferRequirement {
        &self.negotiation.input
    }

    /// Negotiated pass plan.
    pub fn plan(&self) -> &PassPlan {
        &self.negotiation.plan
    }

    /// Offset map of the current configuration.
    pub fn offset_map(&self) -> &OffsetMap {
        &self.map
    }

    /// `true` until teardown.
    pub fn is_configured(&self) -> bool {
        self.resources.is_some()
    }

    /// Requests between `prepare` and `complete`/`cancel`.
    pub fn in_flight(&self) -> FrameJobResult<usize> {
        match &self.resources {
            Some(res) => Ok(lock(&res.pool, "job pool")?.in_flight()),
            None => Ok(0),
        }
    }

    /// Job pool counters.
    pub fn pool_stats(&self) -> FrameJobResult<JobPoolStats> {
        Ok(lock(&self.resources()?.pool, "job pool")?.stats())
    }

    /// Build the frame job of `request`.
    ///
    /// On error nothing stays reserved: the buffer is back in the pool and the ring reservation
    /// is released.
    pub fn prepare(&self, request: &FrameRequest) -> FrameJobResult<PreparedJob> {
        let res = self.resources()?;
        if request.batch_size != self.config.batch_size {
            return Err(FrameJobError::bad_request(format!(
                "request {} has batch size {}, engine is configured for {}",
                request.request_id, request.batch_size, self.config.batch_size
            )));
        }

        let buffer = lock(&res.pool, "job pool")?.checkout(request.request_id)?;
        let reservation = {
            let mut ring = lock(&res.ring, "reference ring")?;
            ring.reserve(request.request_id, request.stream_identity)
        };
        let reservation = match reservation {
            Ok(r) => r,
            Err(e) => {
                lock(&res.pool, "job pool")?.recycle(request.request_id, buffer)?;
                return Err(e);
            }
        };

        let mut job = FrameJob::new(request.request_id, buffer);
        match self.build(request, &mut job, &reservation) {
            Ok(()) => Ok(PreparedJob { job, reservation }),
            Err(e) => {
                tracing::debug!(request_id = request.request_id, error = %e, "discarding job");
                self.discard(job, reservation)?;
                Err(e)
            }
        }
    }

    fn build(
        &self,
        request: &FrameRequest,
        job: &mut FrameJob,
        reservation: &Reservation,
    ) -> FrameJobResult<()> {
        let format = request
            .images
            .iter()
            .find(|b| b.port == IoImage::Input(PassName::Full))
            .map(|b| b.format)
            .unwrap_or_default();
        let inputs = CompileInputs {
            plan: &self.negotiation.plan,
            map: &self.map,
            batch_size: request.batch_size,
            enabled: request.enabled,
            regions: &request.regions,
            luts: &request.luts,
            images: &request.images,
            format,
            ratios: &self.config.limits.compression,
        };
        compile(&inputs, job)?;
        let res = self.resources()?;
        lock(&res.ring, "reference ring")?.fill_patches(job, reservation, &self.map)
    }

    fn discard(&self, job: FrameJob, reservation: Reservation) -> FrameJobResult<()> {
        let res = self.resources()?;
        let request_id = job.request_id();
        lock(&res.ring, "reference ring")?.cancel(reservation)?;
        lock(&res.pool, "job pool")?.recycle(request_id, job.into_buffer())
    }

    /// Drop a prepared job without submitting it. Continuity does not advance.
    pub fn cancel(&self, prepared: PreparedJob) -> FrameJobResult<()> {
        self.discard(prepared.job, prepared.reservation)
    }

    /// Resolve patches, commit and submit a prepared job.
    ///
    /// On error the job is discarded as by [`Engine::cancel`].
    pub fn submit(
        &self,
        prepared: PreparedJob,
        mapper: &dyn AddressMapper,
        submitter: &mut dyn FrameJobSubmitter,
    ) -> FrameJobResult<InFlightJob> {
        let PreparedJob {
            mut job,
            reservation,
        } = prepared;
        if let Err(e) = submit_job(&mut job, &self.map, mapper, submitter) {
            self.discard(job, reservation)?;
            return Err(e);
        }
        lock(&self.resources()?.ring, "reference ring")?.commit(&reservation)?;
        Ok(InFlightJob { job })
    }

    /// Retire a submitted job and return its buffer to the pool.
    ///
    /// A failed completion invalidates the job's reference output for its successor.
    pub fn complete(&self, in_flight: InFlightJob, success: bool) -> FrameJobResult<()> {
        let res = self.resources()?;
        let request_id = in_flight.request_id();
        lock(&res.ring, "reference ring")?.complete(request_id, success)?;
        lock(&res.pool, "job pool")?.recycle(request_id, in_flight.job.into_buffer())?;
        if !success {
            tracing::warn!(request_id, "frame job completed with an error");
        }
        Ok(())
    }
}

fn allocate(
    config: &EngineConfig,
    plan: &PassPlan,
    map: &OffsetMap,
    allocator: &mut dyn BufferAllocator,
) -> FrameJobResult<Resources> {
    let mut pool = JobPool::new(config.pool, map.job_size() as u64, allocator)?;
    let ring = match ReferenceRing::new(config.ring, plan, config.batch_size, allocator) {
        Ok(r) => r,
        Err(e) => {
            pool.release(allocator)?;
            return Err(e);
        }
    };
    Ok(Resources {
        pool: Mutex::new(pool),
        ring: Mutex::new(ring),
    })
}

#[cfg(test)]
#[path = "../../tests/unit/session/engine.rs"]
mod tests;
