//! Pipeline context and startup.
//!
//! `PipelineContext` owns every process-lifetime resource: the frame source,
//! the preprocessor scratch buffers, the inference engine (arena, model,
//! operator set, interpreter) and the label map. It is built once by
//! `Startup::run` and lent by `&mut` to the stream loop, so at most one
//! request can drive the pipeline at a time.

use std::borrow::Cow;
use std::path::PathBuf;

use crate::aggregate::{classify, ClassificationResult, LabelMap};
use crate::arena::{MemoryProvider, TensorArena};
use crate::camera::open_camera;
use crate::config::{BackendKind, SortcamConfig};
use crate::engine::{ForwardPass, InferenceEngine, OperatorSet, StubBackend};
use crate::error::StartupError;
use crate::frame::{CameraDriver, Frame, FrameSource};
use crate::model::schema::SCHEMA_VERSION;
use crate::model::{Model, EMBEDDED_MODEL};
use crate::platform::{init_store, LinkStatus, Network, PersistentStore};
use crate::preprocess::Preprocessor;

/// What happened to one frame on its way through the stages.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum FrameOutcome {
    Classified(ClassificationResult),
    /// Inference ran but no class had a positive score.
    Unclassified,
    /// Decode or inference failed; the frame is still streamed.
    Skipped,
}

/// Preprocess → infer → aggregate.
pub struct Stages {
    pub preprocessor: Preprocessor,
    pub engine: InferenceEngine,
    pub labels: LabelMap,
}

impl Stages {
    pub fn classify(&mut self, frame: &Frame) -> FrameOutcome {
        let input = match self.preprocessor.process(frame) {
            Ok(input) => input,
            Err(err) => {
                log::warn!("preprocess failed, skipping inference: {}", err);
                return FrameOutcome::Skipped;
            }
        };
        let output = match self.engine.infer(input) {
            Ok(output) => output,
            Err(err) => {
                log::warn!("inference failed: {}", err);
                return FrameOutcome::Skipped;
            }
        };
        match classify(&output, &self.labels) {
            Ok(Some(result)) => {
                log::info!(
                    "predicted: {} ({:.2}%)",
                    self.labels.name(result.class_index),
                    result.confidence * 100.0
                );
                FrameOutcome::Classified(result)
            }
            Ok(None) => {
                log::info!("no classification for frame");
                FrameOutcome::Unclassified
            }
            Err(err) => {
                log::warn!("aggregation failed: {}", err);
                FrameOutcome::Skipped
            }
        }
    }
}

pub struct PipelineContext {
    pub source: FrameSource,
    pub stages: Stages,
}

/// Startup sequence: store → network → arena → camera → model → operators →
/// interpreter → tensor allocation. Any failure aborts with a `StartupError`.
///
/// Camera, model bytes and backend come from the config unless overridden.
pub struct Startup<'a> {
    config: &'a SortcamConfig,
    camera: Option<Box<dyn CameraDriver>>,
    model: Option<Cow<'static, [u8]>>,
    backend: Option<Box<dyn ForwardPass>>,
}

impl<'a> Startup<'a> {
    pub fn new(config: &'a SortcamConfig) -> Self {
        Self {
            config,
            camera: None,
            model: None,
            backend: None,
        }
    }

    pub fn with_camera(mut self, camera: Box<dyn CameraDriver>) -> Self {
        self.camera = Some(camera);
        self
    }

    pub fn with_model_bytes(mut self, bytes: impl Into<Cow<'static, [u8]>>) -> Self {
        self.model = Some(bytes.into());
        self
    }

    pub fn with_backend(mut self, backend: Box<dyn ForwardPass>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn run(
        self,
        store: &mut dyn PersistentStore,
        network: &mut dyn Network,
        memory: &mut dyn MemoryProvider,
    ) -> Result<PipelineContext, StartupError> {
        let config = self.config;

        init_store(store)?;
        log::info!("persistent store ready");

        network
            .connect()
            .map_err(|err| StartupError::Network(err.to_string()))?;
        let status = network.status();
        if status != LinkStatus::Connected {
            return Err(StartupError::Network(format!("link is {}", status)));
        }

        let arena = TensorArena::allocate(memory, config.memory.arena_bytes)?;

        let camera = match self.camera {
            Some(camera) => camera,
            None => open_camera(&config.camera).map_err(StartupError::Camera)?,
        };
        let source = FrameSource::from_boxed(camera);
        log::info!("camera '{}' initialized", source.driver_name());

        let model = match self.model {
            Some(bytes) => Model::load_with_version(bytes, SCHEMA_VERSION)?,
            None => load_configured_model(config.model.path.clone())?,
        };

        let operators = OperatorSet::for_model(&model, config.model.operator_capacity)?;
        let backend = match self.backend {
            Some(backend) => backend,
            None => make_backend(config.model.backend)?,
        };
        let engine = InferenceEngine::new(model, operators, arena, backend)?;
        let preprocessor = Preprocessor::for_input_tensor(engine.input_info())?;
        log::info!(
            "pipeline ready: input {:?} {:?}, {} classes",
            engine.input_info().dtype,
            engine.input_info().shape,
            engine.class_count()
        );

        Ok(PipelineContext {
            source,
            stages: Stages {
                preprocessor,
                engine,
                labels: LabelMap::new(config.labels.iter().cloned()),
            },
        })
    }
}

fn load_configured_model(path: Option<PathBuf>) -> Result<Model, StartupError> {
    let model = match path {
        Some(path) => {
            log::info!("loading model from {}", path.display());
            Model::from_path(&path, SCHEMA_VERSION)?
        }
        None => Model::load_with_version(EMBEDDED_MODEL, SCHEMA_VERSION)?,
    };
    Ok(model)
}

fn make_backend(kind: BackendKind) -> Result<Box<dyn ForwardPass>, StartupError> {
    match kind {
        BackendKind::Stub => Ok(Box::new(StubBackend::new())),
        #[cfg(feature = "backend-tract")]
        BackendKind::Tract => Ok(Box::new(crate::engine::TractBackend::new())),
        #[cfg(not(feature = "backend-tract"))]
        BackendKind::Tract => Err(StartupError::Backend {
            backend: "tract",
            source: anyhow::anyhow!("sortcam was built without the backend-tract feature"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::HostMemory;
    use crate::camera::StaticDriver;
    use crate::error::StoreError;
    use crate::frame::PixelFormat;

    struct MemStore;

    impl PersistentStore for MemStore {
        fn init(&mut self) -> Result<(), StoreError> {
            Ok(())
        }

        fn erase(&mut self) -> Result<(), StoreError> {
            Ok(())
        }
    }

    struct Link(LinkStatus);

    impl Network for Link {
        fn connect(&mut self) -> anyhow::Result<()> {
            Ok(())
        }

        fn status(&self) -> LinkStatus {
            self.0
        }
    }

    fn start(config: &SortcamConfig, link: LinkStatus) -> Result<PipelineContext, StartupError> {
        let mut memory = HostMemory::new(0, 1024 * 1024);
        Startup::new(config)
            .with_camera(Box::new(StaticDriver::test_pattern(64, 48).unwrap()))
            .run(&mut MemStore, &mut Link(link), &mut memory)
    }

    #[test]
    fn embedded_model_brings_up_pipeline() {
        let config = SortcamConfig::default();
        let mut ctx = start(&config, LinkStatus::Connected).unwrap();
        assert_eq!(ctx.stages.engine.class_count(), 4);

        let guard = ctx.source.acquire().unwrap();
        let outcome = ctx.stages.classify(guard.frame());
        assert!(!matches!(outcome, FrameOutcome::Skipped));
    }

    #[test]
    fn disconnected_network_aborts_startup() {
        let config = SortcamConfig::default();
        assert!(matches!(
            start(&config, LinkStatus::Disconnected),
            Err(StartupError::Network(_))
        ));
    }

    #[test]
    fn undecodable_frame_is_skipped() {
        let config = SortcamConfig::default();
        let mut ctx = start(&config, LinkStatus::Connected).unwrap();
        let frame = Frame::new(vec![0xFF, 0xD8, 0x00], 64, 48, PixelFormat::Jpeg);
        assert_eq!(ctx.stages.classify(&frame), FrameOutcome::Skipped);
    }

    #[cfg(not(feature = "backend-tract"))]
    #[test]
    fn tract_backend_requires_feature() {
        assert!(matches!(
            make_backend(BackendKind::Tract),
            Err(StartupError::Backend { backend: "tract", .. })
        ));
    }
}
