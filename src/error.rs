//! Error taxonomy for the capture → classify → stream pipeline.
//!
//! Errors fall into three classes:
//!
//! - **Startup** (`StartupError`): the process cannot proceed. Never retried.
//! - **Per-frame** (`PreprocessError`, `InferenceError`): logged, inference for
//!   that frame is skipped, streaming continues.
//! - **Stream-ending** (`FrameError`, write failures): the current client's
//!   loop ends; the process and future connections are unaffected.

use thiserror::Error;

use crate::arena::MemoryRegion;
use crate::model::schema::{BuiltinOperator, TensorType};

/// Tensor arena could not be obtained from any memory region.
#[derive(Error, Debug)]
pub enum ArenaError {
    #[error("arena size must be non-zero")]
    ZeroSize,

    #[error("failed to allocate {size} byte arena (tried: {tried:?})")]
    Exhausted {
        size: usize,
        tried: Vec<MemoryRegion>,
    },
}

/// Camera acquisition errors. Both variants end the current stream.
#[derive(Error, Debug)]
pub enum FrameError {
    #[error("camera capture failed: {0}")]
    Capture(#[source] anyhow::Error),

    #[error("frame acquired while a previous frame is still outstanding")]
    AlreadyAcquired,
}

#[derive(Error, Debug)]
pub enum PreprocessError {
    #[error("frame decode failed: {0}")]
    Decode(String),

    #[error("frame is {actual} bytes, expected {expected} for {width}x{height} {format}")]
    Length {
        expected: usize,
        actual: usize,
        width: u32,
        height: u32,
        format: &'static str,
    },

    #[error("frame has zero width or height")]
    EmptyFrame,
}

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("model buffer is empty")]
    Empty,

    #[error("model buffer is not a TFLite flatbuffer (identifier {0:?})")]
    NotTflite([u8; 4]),

    #[error("malformed model flatbuffer: {0}")]
    Malformed(&'static str),

    #[error("model schema version {found} does not match runtime version {expected}")]
    VersionMismatch { found: u32, expected: u32 },

    #[error("model has no subgraph")]
    NoSubgraph,

    #[error("model subgraph must have exactly one {0} tensor")]
    TensorCount(&'static str),

    #[error("failed to read model file: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum OperatorError {
    #[error("operator set capacity {0} exceeded")]
    CapacityExceeded(usize),

    #[error("operator {0:?} registered twice")]
    Duplicate(BuiltinOperator),

    #[error("model requires operator {0:?} which is not registered")]
    Missing(BuiltinOperator),

    #[error("model requires builtin operator code {0} which this runtime does not know")]
    UnknownCode(i32),

    #[error("model requires custom operator '{0}'")]
    Custom(String),

    #[error("backend '{backend}' cannot execute operator {op:?}")]
    Unsupported {
        backend: &'static str,
        op: BuiltinOperator,
    },
}

/// Per-call inference failures. None of these change engine state.
#[derive(Error, Debug)]
pub enum InferenceError {
    #[error("input tensor type {0:?} is not supported (expected uint8 or int8)")]
    UnsupportedInputType(TensorType),

    #[error("output tensor type {0:?} cannot be aggregated")]
    UnsupportedOutputType(TensorType),

    #[error("tensors have not been allocated")]
    NotAllocated,

    #[error("invoke failed: {0}")]
    Invoke(#[source] anyhow::Error),
}

/// Error codes a persistent store reports from `init()`.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("store has no free pages")]
    NoFreePages,

    #[error("store was written by a newer format version ({0})")]
    NewVersionFound(String),

    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// Codes that are resolved by erasing and initializing again.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, StoreError::NoFreePages | StoreError::NewVersionFound(_))
    }
}

/// Every fatal startup cause.
#[derive(Error, Debug)]
pub enum StartupError {
    #[error("persistent store init failed: {0}")]
    Store(#[from] StoreError),

    #[error("network not connected: {0}")]
    Network(String),

    #[error("tensor arena allocation failed: {0}")]
    Arena(#[from] ArenaError),

    #[error("camera init failed: {0}")]
    Camera(#[source] anyhow::Error),

    #[error("model load failed: {0}")]
    Model(#[from] ModelError),

    #[error("operator registration failed: {0}")]
    Operators(#[from] OperatorError),

    #[error("backend '{backend}' failed to prepare model: {source}")]
    Backend {
        backend: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error("tensor allocation failed: arena has {available} bytes, model needs {required}")]
    TensorAllocation { required: usize, available: usize },

    #[error("model input tensor has unsupported shape {0:?} (expected [1, H, W, 3])")]
    InputShape(Vec<usize>),
}
