use std::fmt;

/// Convenience result type used across framejob.
pub type FrameJobResult<T> = Result<T, FrameJobError>;

/// Firmware-facing result code carried by negotiation and construction failures.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ResultCode {
    /// Generic failure (`EFailed`).
    Failed,
    /// Invalid argument (`EInvalidArg`).
    InvalidArg,
    /// Missing or null buffer/region (`EInvalidPointer`).
    InvalidPointer,
    /// Allocation or pool exhaustion (`ENoMemory`).
    NoMemory,
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Failed => "EFailed",
            Self::InvalidArg => "EInvalidArg",
            Self::InvalidPointer => "EInvalidPointer",
            Self::NoMemory => "ENoMemory",
        };
        f.write_str(s)
    }
}

/// Coarse error taxonomy used by callers to decide between retrying a request and
/// surfacing a failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// Dimension negotiation could not be satisfied. No job was built.
    Negotiation,
    /// A frame job could not be built; the partial job was discarded.
    Construction,
    /// Lifecycle or state-machine misuse.
    State,
    /// Invalid configuration.
    Config,
    /// Anything else.
    Other,
}

/// Top-level error taxonomy used by engine APIs.
#[derive(thiserror::Error, Debug)]
pub enum FrameJobError {
    /// Dimension constraints unsatisfiable, min > max after merge, zero dimension.
    #[error("negotiation error ({code}): {reason}")]
    Negotiation {
        /// Result code reported to the caller.
        code: ResultCode,
        /// Human readable reason.
        reason: String,
    },

    /// Required region or buffer missing, or allocation failure.
    #[error("construction error ({code}): {reason}")]
    Construction {
        /// Result code reported to the caller.
        code: ResultCode,
        /// Human readable reason.
        reason: String,
    },

    /// Operation attempted in the wrong state.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Invalid configuration data.
    #[error("configuration error: {0}")]
    Config(String),

    /// Errors when serializing or deserializing data structures.
    #[error("serialization error: {0}")]
    Serde(String),

    /// Wrapped lower-level error from dependencies or IO.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl FrameJobError {
    /// Negotiation failure with [`ResultCode::InvalidArg`].
    pub fn invalid_arg(msg: impl Into<String>) -> Self {
        Self::Negotiation {
            code: ResultCode::InvalidArg,
            reason: msg.into(),
        }
    }

    /// Negotiation failure with [`ResultCode::Failed`].
    pub fn negotiation_failed(msg: impl Into<String>) -> Self {
        Self::Negotiation {
            code: ResultCode::Failed,
            reason: msg.into(),
        }
    }

    /// Construction failure with [`ResultCode::InvalidPointer`].
    pub fn invalid_pointer(msg: impl Into<String>) -> Self {
        Self::Construction {
            code: ResultCode::InvalidPointer,
            reason: msg.into(),
        }
    }

    /// Construction failure with [`ResultCode::InvalidArg`].
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::Construction {
            code: ResultCode::InvalidArg,
            reason: msg.into(),
        }
    }

    /// Construction failure with [`ResultCode::NoMemory`].
    pub fn no_memory(msg: impl Into<String>) -> Self {
        Self::Construction {
            code: ResultCode::NoMemory,
            reason: msg.into(),
        }
    }

    /// Construction failure with [`ResultCode::Failed`].
    pub fn construction_failed(msg: impl Into<String>) -> Self {
        Self::Construction {
            code: ResultCode::Failed,
            reason: msg.into(),
        }
    }

    /// Build a [`FrameJobError::InvalidState`] value.
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    /// Build a [`FrameJobError::Config`] value.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Build a [`FrameJobError::Serde`] value.
    pub fn serde(msg: impl Into<String>) -> Self {
        Self::Serde(msg.into())
    }

    /// Firmware result code, if this error carries one.
    pub fn code(&self) -> Option<ResultCode> {
        match self {
            Self::Negotiation { code, .. } | Self::Construction { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Error class used for propagation decisions.
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Negotiation { .. } => ErrorClass::Negotiation,
            Self::Construction { .. } => ErrorClass::Construction,
            Self::InvalidState(_) => ErrorClass::State,
            Self::Config(_) | Self::Serde(_) => ErrorClass::Config,
            Self::Other(_) => ErrorClass::Other,
        }
    }
}

#[cfg(test)]
#[path = "../../tests/unit/foundation/error.rs"]
mod tests;
