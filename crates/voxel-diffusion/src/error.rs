//! Error types for the voxel diffusion crate.
//!
//! Every failure carries a human-readable message and maps onto a stable
//! integer [`ErrorCode`], which is what the host-facing status API and the
//! last-error slot expose.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for diffusion operations
pub type DiffusionResult<T> = Result<T, DiffusionError>;

// ---------------------------------------------------------------------------
// ErrorCode
// ---------------------------------------------------------------------------

/// Stable integer status codes reported to the host.
///
/// `None` (0) means no error has been recorded. The remaining values are part
/// of the host contract and must not be renumbered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ErrorCode {
    /// No error recorded.
    None = 0,
    /// Bad coordinates or label ids.
    InvalidArgument = 1,
    /// A device operation, buffer copy, or thread spawn failed.
    FailedOperation = 2,
    /// The request is not valid in the current lifecycle state.
    InvalidOperation = 3,
    /// A cached engine artifact could not be loaded.
    DeserializeEngine = 4,
    /// The engine could not be built from the model definition.
    BuildingFromModel = 5,
    /// The optimized engine artifact could not be saved.
    EngineSave = 6,
    /// Binding an engine input or output failed.
    SetTensorAddress = 7,
    /// The engine rejected a step.
    Enqueue = 8,
    /// The engine runtime could not be created.
    CreateRuntime = 9,
}

impl ErrorCode {
    /// Integer value handed to the host.
    pub const fn code(self) -> i32 {
        self as i32
    }

    /// Decode an integer status. Unknown values yield `None`.
    pub fn from_code(code: i32) -> Option<Self> {
        let decoded = match code {
            0 => ErrorCode::None,
            1 => ErrorCode::InvalidArgument,
            2 => ErrorCode::FailedOperation,
            3 => ErrorCode::InvalidOperation,
            4 => ErrorCode::DeserializeEngine,
            5 => ErrorCode::BuildingFromModel,
            6 => ErrorCode::EngineSave,
            7 => ErrorCode::SetTensorAddress,
            8 => ErrorCode::Enqueue,
            9 => ErrorCode::CreateRuntime,
            _ => return None,
        };
        Some(decoded)
    }

    /// Whether this code belongs to engine provisioning.
    pub fn is_provisioning(self) -> bool {
        matches!(
            self,
            ErrorCode::DeserializeEngine
                | ErrorCode::BuildingFromModel
                | ErrorCode::EngineSave
                | ErrorCode::CreateRuntime
        )
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorCode::None => "none",
            ErrorCode::InvalidArgument => "invalid-argument",
            ErrorCode::FailedOperation => "failed-operation",
            ErrorCode::InvalidOperation => "invalid-operation",
            ErrorCode::DeserializeEngine => "deserialize-engine",
            ErrorCode::BuildingFromModel => "building-from-model",
            ErrorCode::EngineSave => "engine-save",
            ErrorCode::SetTensorAddress => "set-tensor-address",
            ErrorCode::Enqueue => "enqueue",
            ErrorCode::CreateRuntime => "create-runtime",
        };
        write!(f, "{} ({})", name, self.code())
    }
}

// ---------------------------------------------------------------------------
// ProvisioningStage
// ---------------------------------------------------------------------------

/// The phase of engine provisioning that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisioningStage {
    /// Creating the inference runtime.
    CreateRuntime,
    /// Loading a previously cached engine artifact.
    DeserializeEngine,
    /// Building the engine from the model definition.
    BuildFromModel,
    /// Writing the optimized artifact back to the cache.
    SaveEngine,
}

impl ProvisioningStage {
    /// Error code reported for a failure in this stage.
    pub fn code(self) -> ErrorCode {
        match self {
            ProvisioningStage::CreateRuntime => ErrorCode::CreateRuntime,
            ProvisioningStage::DeserializeEngine => ErrorCode::DeserializeEngine,
            ProvisioningStage::BuildFromModel => ErrorCode::BuildingFromModel,
            ProvisioningStage::SaveEngine => ErrorCode::EngineSave,
        }
    }
}

impl fmt::Display for ProvisioningStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stage = match self {
            ProvisioningStage::CreateRuntime => "create runtime",
            ProvisioningStage::DeserializeEngine => "deserialize cached engine",
            ProvisioningStage::BuildFromModel => "build engine from model",
            ProvisioningStage::SaveEngine => "save engine cache",
        };
        f.write_str(stage)
    }
}

// ---------------------------------------------------------------------------
// DiffusionError
// ---------------------------------------------------------------------------

/// Errors produced by the diffusion context, its worker and its engines.
#[derive(Error, Debug)]
pub enum DiffusionError {
    /// Coordinates or label ids out of range
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Request not valid in the current lifecycle state
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// Device operation, copy or thread spawn failure
    #[error("Operation failed: {0}")]
    FailedOperation(String),

    /// Engine provisioning failure
    #[error("Engine provisioning failed ({stage}): {message}")]
    Provisioning {
        /// Stage that failed
        stage: ProvisioningStage,
        /// Details from the runtime
        message: String,
    },

    /// Engine input/output binding failure
    #[error("Tensor binding failed: {0}")]
    TensorBinding(String),

    /// Engine rejected a step
    #[error("Step rejected at t={timestep}: {message}")]
    StepRejected {
        /// Outer timestep of the rejected step
        timestep: usize,
        /// Details from the engine
        message: String,
    },

    /// Volume shape mismatch
    #[error("Shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        /// Expected shape
        expected: Vec<usize>,
        /// Actual shape
        actual: Vec<usize>,
    },

    /// Configuration validation error
    #[error("Invalid value for `{field}`: {reason}")]
    Config {
        /// Name of the field
        field: &'static str,
        /// Human-readable reason
        reason: String,
    },

    /// Config file could not be read or written
    #[error("Cannot access config file `{path}`: {source}")]
    ConfigFile {
        /// Path that was accessed
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl DiffusionError {
    /// Create an invalid argument error
    pub fn invalid_argument<S: Into<String>>(msg: S) -> Self {
        DiffusionError::InvalidArgument(msg.into())
    }

    /// Create an invalid operation error
    pub fn invalid_operation<S: Into<String>>(msg: S) -> Self {
        DiffusionError::InvalidOperation(msg.into())
    }

    /// Create a failed operation error
    pub fn failed_operation<S: Into<String>>(msg: S) -> Self {
        DiffusionError::FailedOperation(msg.into())
    }

    /// Create a provisioning error for the given stage
    pub fn provisioning<S: Into<String>>(stage: ProvisioningStage, msg: S) -> Self {
        DiffusionError::Provisioning {
            stage,
            message: msg.into(),
        }
    }

    /// Create a tensor binding error
    pub fn tensor_binding<S: Into<String>>(msg: S) -> Self {
        DiffusionError::TensorBinding(msg.into())
    }

    /// Create a step rejection error
    pub fn step_rejected<S: Into<String>>(timestep: usize, msg: S) -> Self {
        DiffusionError::StepRejected {
            timestep,
            message: msg.into(),
        }
    }

    /// Create a shape mismatch error
    pub fn shape_mismatch(expected: Vec<usize>, actual: Vec<usize>) -> Self {
        DiffusionError::ShapeMismatch { expected, actual }
    }

    /// Create a configuration error
    pub fn config<S: Into<String>>(field: &'static str, reason: S) -> Self {
        DiffusionError::Config {
            field,
            reason: reason.into(),
        }
    }

    /// Status code reported to the host for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            DiffusionError::InvalidArgument(_) | DiffusionError::Config { .. } => {
                ErrorCode::InvalidArgument
            }
            DiffusionError::InvalidOperation(_) => ErrorCode::InvalidOperation,
            DiffusionError::Provisioning { stage, .. } => stage.code(),
            DiffusionError::TensorBinding(_) => ErrorCode::SetTensorAddress,
            DiffusionError::StepRejected { .. } => ErrorCode::Enqueue,
            DiffusionError::FailedOperation(_)
            | DiffusionError::ShapeMismatch { .. }
            | DiffusionError::ConfigFile { .. }
            | DiffusionError::Io(_)
            | DiffusionError::Serialization(_) => ErrorCode::FailedOperation,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(ErrorCode::None.code(), 0);
        assert_eq!(ErrorCode::InvalidArgument.code(), 1);
        assert_eq!(ErrorCode::FailedOperation.code(), 2);
        assert_eq!(ErrorCode::InvalidOperation.code(), 3);
        assert_eq!(ErrorCode::DeserializeEngine.code(), 4);
        assert_eq!(ErrorCode::BuildingFromModel.code(), 5);
        assert_eq!(ErrorCode::EngineSave.code(), 6);
        assert_eq!(ErrorCode::SetTensorAddress.code(), 7);
        assert_eq!(ErrorCode::Enqueue.code(), 8);
        assert_eq!(ErrorCode::CreateRuntime.code(), 9);
    }

    #[test]
    fn test_from_code_round_trips_known_values() {
        for code in 0..=9 {
            let decoded = ErrorCode::from_code(code).unwrap();
            assert_eq!(decoded.code(), code);
        }
        assert_eq!(ErrorCode::from_code(10), None);
        assert_eq!(ErrorCode::from_code(-1), None);
    }

    #[test]
    fn test_error_code_mapping() {
        assert_eq!(
            DiffusionError::invalid_argument("x").code(),
            ErrorCode::InvalidArgument
        );
        assert_eq!(
            DiffusionError::invalid_operation("busy").code(),
            ErrorCode::InvalidOperation
        );
        assert_eq!(
            DiffusionError::step_rejected(3, "queue full").code(),
            ErrorCode::Enqueue
        );
        assert_eq!(
            DiffusionError::provisioning(ProvisioningStage::SaveEngine, "disk full").code(),
            ErrorCode::EngineSave
        );
        assert_eq!(
            DiffusionError::tensor_binding("x_out missing").code(),
            ErrorCode::SetTensorAddress
        );
    }

    #[test]
    fn test_provisioning_codes() {
        assert!(ErrorCode::CreateRuntime.is_provisioning());
        assert!(ErrorCode::DeserializeEngine.is_provisioning());
        assert!(!ErrorCode::Enqueue.is_provisioning());
    }

    #[test]
    fn test_error_display() {
        let err = DiffusionError::step_rejected(42, "device lost");
        assert_eq!(err.to_string(), "Step rejected at t=42: device lost");
        assert_eq!(ErrorCode::Enqueue.to_string(), "enqueue (8)");
    }
}
