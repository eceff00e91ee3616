//! Frame graph error types.

use crate::bindings::BindingSpace;
use crate::graph::{PassHandle, ResourceHandle};
use crate::types::ResourceKind;

/// Errors that can occur in backend operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    /// Failed to create a resource.
    #[error("resource creation failed: {0}")]
    ResourceCreationFailed(String),
    /// Queue submission failed.
    #[error("queue submission failed: {0}")]
    SubmissionFailed(String),
    /// Out of GPU memory.
    #[error("out of GPU memory")]
    OutOfMemory,
    /// The device was lost.
    #[error("GPU device lost")]
    DeviceLost,
    /// A handle from another backend was passed in.
    #[error("handle belongs to a different backend: {0}")]
    ForeignHandle(&'static str),
    /// Internal backend error.
    #[error("internal backend error: {0}")]
    Internal(String),
}

/// Current frame state, reported by [`FrameGraphError::StateViolation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameState {
    /// No frame is being declared.
    Inactive,
    /// A frame was begun and passes are being declared.
    Active,
    /// The frame was compiled and is ready to execute.
    Compiled,
}

impl std::fmt::Display for FrameState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Inactive => write!(f, "inactive"),
            Self::Active => write!(f, "active"),
            Self::Compiled => write!(f, "compiled"),
        }
    }
}

/// Errors that can occur while building, compiling, or executing a frame.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameGraphError {
    /// A fixed-size table is full.
    #[error("{what} capacity exceeded (limit {limit})")]
    CapacityExceeded { what: &'static str, limit: usize },
    /// The handle does not address a registry slot.
    #[error("invalid resource handle {0:?}")]
    InvalidHandle(ResourceHandle),
    /// The handle was issued before the slot was last reset.
    #[error("stale resource handle {handle:?} (current version {current_version})")]
    StaleHandle {
        handle: ResourceHandle,
        current_version: u32,
    },
    /// The slot holds a resource of the other kind.
    #[error("resource {handle:?} is a {found}, expected a {expected}")]
    WrongKind {
        handle: ResourceHandle,
        expected: ResourceKind,
        found: ResourceKind,
    },
    /// The slot has no native resource yet.
    #[error("resource {0:?} has not been allocated")]
    NotAllocated(ResourceHandle),
    /// A pass handle does not address a declared pass.
    #[error("invalid pass handle {0:?}")]
    InvalidPass(PassHandle),
    /// No binding pool is registered for a space.
    #[error("no binding pool registered for {0:?}")]
    MissingBinding(BindingSpace),
    /// The live passes contain a dependency cycle.
    #[error("circular dependency between passes: {}", passes.join(", "))]
    CircularDependency { passes: Vec<String> },
    /// An operation was called in the wrong frame state.
    #[error("`{operation}` is not allowed while the frame is {state}")]
    StateViolation {
        operation: &'static str,
        state: FrameState,
    },
    /// A pass callback failed.
    #[error("pass '{pass}' failed: {message}")]
    PassFailed { pass: String, message: String },
    /// The configuration is not usable.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// The backend failed.
    #[error(transparent)]
    Backend(#[from] BackendError),
}

impl FrameGraphError {
    /// Convenience constructor for pass callbacks reporting a failure.
    pub fn pass_failed(pass: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::PassFailed {
            pass: pass.into(),
            message: message.to_string(),
        }
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, FrameGraphError>;
