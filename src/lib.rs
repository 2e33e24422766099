//! framejob builds the per-frame command descriptors ("frame jobs") consumed by the firmware of
//! a fixed-function, multi-pass image-processing accelerator.
//!
//! The public API is engine-oriented:
//!
//! - Negotiate buffer dimensions and a pass plan from output requirements
//! - Create an [`Engine`], which lays out the frame job and allocates its job pool and
//!   reference rings
//! - Per request: [`Engine::prepare`] compiles a job, [`Engine::submit`] resolves its address
//!   patches and hands it to a [`FrameJobSubmitter`], [`Engine::complete`] retires it
#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod foundation;

/// Command-graph compilation.
pub mod compile;
/// Frame job layout.
pub mod layout;
/// Buffer-dimension negotiation.
pub mod negotiate;
/// Buffer allocation and pooling.
pub mod pool;
/// Temporal reference rings.
pub mod reference;
/// Engine and configuration.
pub mod session;
/// Patch resolution and submission.
pub mod submit;

pub use crate::foundation::core::{BufferFormat, BufferHandle, BufferRef, Dimensions};
pub use crate::foundation::error::{ErrorClass, FrameJobError, FrameJobResult, ResultCode};

pub use crate::compile::compiler::{
    CommandRegion, CommandRegions, CompileInputs, ImageBinding, LutRegion, LutRegions,
    PlaneBinding, compile,
};
pub use crate::compile::cost::FrameCost;
pub use crate::compile::job::{FrameJob, JobBuffer, JobState};
pub use crate::compile::patch::{Patch, PatchKind, PatchList};
pub use crate::compile::program::{Program, ProgramTag, StageSet};
pub use crate::layout::offsets::{Anchor, LayoutAllocator, OffsetMap};
pub use crate::layout::schema::{IoImage, LayoutSchema, StageKind, TableId};
pub use crate::negotiate::limits::DimensionLimits;
pub use crate::negotiate::planner::{Negotiation, PassName, PassPlan, negotiate};
pub use crate::negotiate::requirement::{BufferRequirement, OutputKind, OutputRequirement};
pub use crate::pool::allocator::{BufferAllocator, BufferPurpose, SequentialAllocator};
pub use crate::pool::job_pool::{JobPool, PoolConfig};
pub use crate::reference::ring::{Continuity, ReferenceRing, RingConfig, SlotPair};
pub use crate::session::config::{EngineConfig, StreamConfig};
pub use crate::session::engine::{Engine, FrameRequest, InFlightJob, PreparedJob};
pub use crate::submit::local::{InMemorySubmitter, StridedMapper, SubmittedJob};
pub use crate::submit::resolve::{AddressMapper, FrameJobSubmitter};
