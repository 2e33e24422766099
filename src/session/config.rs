use crate::foundation::error::{FrameJobError, FrameJobResult};
use crate::layout::schema::MAX_BATCH;
use crate::negotiate::limits::DimensionLimits;
use crate::negotiate::requirement::OutputRequirement;
use crate::pool::job_pool::PoolConfig;
use crate::reference::ring::RingConfig;

/// Engine configuration. Every field has a default matching the reference accelerator.
///
/// The layout schema is not configurable: it is part of the firmware ABI.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Hardware dimension constraints.
    pub limits: DimensionLimits,
    /// Reference ring sizing.
    pub ring: RingConfig,
    /// Job buffer pool.
    pub pool: PoolConfig,
    /// Frames per request.
    pub batch_size: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            limits: DimensionLimits::default(),
            ring: RingConfig::default(),
            pool: PoolConfig::default(),
            batch_size: 1,
        }
    }
}

impl EngineConfig {
    /// Parse from JSON, then validate.
    pub fn from_json_str(s: &str) -> FrameJobResult<Self> {
        let config: Self = serde_json::from_str(s)
            .map_err(|e| FrameJobError::serde(format!("engine config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Check every section.
    pub fn validate(&self) -> FrameJobResult<()> {
        if self.batch_size == 0 || self.batch_size as usize > MAX_BATCH {
            return Err(FrameJobError::config(format!(
                "batch size {} outside 1..={MAX_BATCH}",
                self.batch_size
            )));
        }
        self.limits.validate()?;
        self.pool.validate()?;
        self.ring.ring_size(self.batch_size)?;
        Ok(())
    }
}

/// A stream description: engine configuration plus the output requirements to negotiate.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct StreamConfig {
    /// Engine configuration.
    #[serde(default)]
    pub engine: EngineConfig,
    /// Output requirements.
    pub outputs: Vec<OutputRequirement>,
}

impl StreamConfig {
    /// Parse from JSON, then validate the engine section.
    pub fn from_json_str(s: &str) -> FrameJobResult<Self> {
        let config: Self = serde_json::from_str(s)
            .map_err(|e| FrameJobError::serde(format!("stream config: {e}")))?;
        config.engine.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
#[path = "../../tests/unit/session/config.rs"]
mod tests;
