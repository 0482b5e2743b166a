//! sortcam: on-device material classifier with a live MJPEG stream.
//!
//! # Architecture
//!
//! Each stream iteration runs the same fixed pipeline:
//!
//! 1. **Acquire**: take the single outstanding frame from the camera driver.
//! 2. **Preprocess**: decode, nearest-neighbor resize to the model input size,
//!    brightness/contrast normalize.
//! 3. **Infer**: copy into the arena-resident input tensor and run the
//!    quantized classifier.
//! 4. **Aggregate**: argmax over the output distribution; the result is logged.
//! 5. **Stream**: write the original frame as one multipart part, then release it.
//!
//! All tensor storage lives in one arena allocated at startup. Nothing in the
//! per-frame path allocates tensors.
//!
//! # Module Structure
//!
//! - `arena`: tensor arena and memory regions
//! - `frame`, `camera`: frame type, acquire/release guard, camera drivers
//! - `preprocess`: decode, resize, normalize
//! - `model`: TFLite flatbuffer reader and schema enums
//! - `engine`: operator set, interpreter, forward-pass backends
//! - `aggregate`: output reduction and label map
//! - `pipeline`: startup sequence and per-frame stages
//! - `server`: HTTP listener and multipart stream loop
//! - `platform`: persistent store and network collaborators
//! - `config`, `error`

pub mod aggregate;
pub mod arena;
pub mod camera;
pub mod config;
pub mod engine;
pub mod error;
pub mod frame;
pub mod model;
pub mod pipeline;
pub mod platform;
pub mod preprocess;
pub mod server;

pub use aggregate::{ClassificationResult, LabelMap};
pub use arena::{HostMemory, MemoryProvider, MemoryRegion, TensorArena};
pub use config::SortcamConfig;
pub use engine::{ForwardPass, InferenceEngine, OperatorSet, StubBackend};
pub use error::{
    ArenaError, FrameError, InferenceError, ModelError, OperatorError, PreprocessError,
    StartupError, StoreError,
};
pub use frame::{CameraDriver, Frame, FrameGuard, FrameSource, PixelFormat};
pub use model::Model;
pub use pipeline::{FrameOutcome, PipelineContext, Stages, Startup};
pub use preprocess::Preprocessor;
pub use server::{ServerHandle, StreamEnd, StreamServer, StreamSummary};
