use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use sortcam::camera::StaticDriver;
use sortcam::config::SortcamConfig;
use sortcam::engine::tensor::{TensorView, TensorViewMut};
use sortcam::model::builder::ModelBuilder;
use sortcam::model::schema::{BuiltinOperator, TensorType};
use sortcam::model::Model;
use sortcam::platform::{FileStore, LinkStatus, Network};
use sortcam::{
    ForwardPass, FrameOutcome, HostMemory, MemoryRegion, ModelError, OperatorError,
    PipelineContext, Startup, StartupError,
};

struct Up;

impl Network for Up {
    fn connect(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    fn status(&self) -> LinkStatus {
        LinkStatus::Connected
    }
}

#[derive(Clone, Default)]
struct Calls {
    prepared: Arc<AtomicUsize>,
    forwarded: Arc<AtomicUsize>,
}

/// Counts calls and fills the output with a fixed distribution.
struct FixedBackend {
    calls: Calls,
    scores: Vec<u8>,
}

impl ForwardPass for FixedBackend {
    fn name(&self) -> &'static str {
        "fixed"
    }

    fn supports(&self, _op: BuiltinOperator) -> bool {
        true
    }

    fn prepare(&mut self, _model: &Model) -> anyhow::Result<usize> {
        self.calls.prepared.fetch_add(1, Ordering::SeqCst);
        Ok(256)
    }

    fn forward(
        &mut self,
        _input: TensorView<'_>,
        mut output: TensorViewMut<'_>,
        _scratch: &mut [u8],
    ) -> anyhow::Result<()> {
        self.calls.forwarded.fetch_add(1, Ordering::SeqCst);
        let out = output.data_mut();
        let n = out.len().min(self.scores.len());
        out[..n].copy_from_slice(&self.scores[..n]);
        Ok(())
    }
}

fn start(
    model: Vec<u8>,
    memory: &mut HostMemory,
    calls: &Calls,
    scores: &[u8],
) -> Result<PipelineContext, StartupError> {
    let dir = tempfile::tempdir().unwrap();
    let config = SortcamConfig::default();
    let mut store = FileStore::new(dir.path().join("store"));
    Startup::new(&config)
        .with_camera(Box::new(StaticDriver::test_pattern(40, 30).unwrap()))
        .with_model_bytes(model)
        .with_backend(Box::new(FixedBackend {
            calls: calls.clone(),
            scores: scores.to_vec(),
        }))
        .run(&mut store, &mut Up, memory)
}

fn classifier_model() -> ModelBuilder {
    ModelBuilder::new().operators(&[
        BuiltinOperator::Quantize,
        BuiltinOperator::Conv2d,
        BuiltinOperator::FullyConnected,
        BuiltinOperator::Softmax,
    ])
}

#[test]
fn version_mismatch_is_fatal_and_nothing_runs() {
    let calls = Calls::default();
    let mut memory = HostMemory::new(8 * 1024 * 1024, 1024 * 1024);
    let result = start(
        classifier_model().version(2).build(),
        &mut memory,
        &calls,
        &[0, 0, 0, 0],
    );
    assert!(matches!(
        result,
        Err(StartupError::Model(ModelError::VersionMismatch {
            found: 2,
            expected: 3
        }))
    ));
    assert_eq!(calls.prepared.load(Ordering::SeqCst), 0);
    assert_eq!(calls.forwarded.load(Ordering::SeqCst), 0);
}

#[test]
fn arena_falls_back_to_internal_heap() {
    let calls = Calls::default();
    let mut memory = HostMemory::new(0, 1024 * 1024);
    let mut ctx = start(classifier_model().build(), &mut memory, &calls, &[10, 200, 200, 5])
        .expect("startup without external memory");
    assert_eq!(
        ctx.stages.engine.interpreter().arena_region(),
        MemoryRegion::Internal
    );

    let guard = ctx.source.acquire().unwrap();
    match ctx.stages.classify(guard.frame()) {
        FrameOutcome::Classified(result) => {
            assert_eq!(result.class_index, 1);
            assert!((result.confidence - 200.0 / 255.0).abs() < 1e-6);
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert_eq!(calls.forwarded.load(Ordering::SeqCst), 1);
}

#[test]
fn arena_prefers_external_memory() {
    let calls = Calls::default();
    let mut memory = HostMemory::new(8 * 1024 * 1024, 1024 * 1024);
    let ctx = start(classifier_model().build(), &mut memory, &calls, &[]).unwrap();
    assert_eq!(
        ctx.stages.engine.interpreter().arena_region(),
        MemoryRegion::External
    );
    assert_eq!(memory.remaining(MemoryRegion::Internal), 1024 * 1024);
}

#[test]
fn no_memory_for_arena_is_fatal() {
    let calls = Calls::default();
    let mut memory = HostMemory::new(0, 256 * 1024);
    let result = start(classifier_model().build(), &mut memory, &calls, &[]);
    assert!(matches!(result, Err(StartupError::Arena(_))));
}

#[test]
fn unknown_operator_is_rejected_at_startup() {
    let calls = Calls::default();
    let mut memory = HostMemory::new(0, 1024 * 1024);
    let result = start(
        classifier_model().operator_code(150).build(),
        &mut memory,
        &calls,
        &[],
    );
    assert!(matches!(
        result,
        Err(StartupError::Operators(OperatorError::UnknownCode(150)))
    ));
}

#[test]
fn all_zero_output_is_unclassified() {
    let calls = Calls::default();
    let mut memory = HostMemory::new(0, 1024 * 1024);
    let mut ctx = start(classifier_model().build(), &mut memory, &calls, &[0, 0, 0, 0]).unwrap();
    let guard = ctx.source.acquire().unwrap();
    assert_eq!(
        ctx.stages.classify(guard.frame()),
        FrameOutcome::Unclassified
    );
}

#[test]
fn int8_model_runs_through_pipeline() {
    let calls = Calls::default();
    let mut memory = HostMemory::new(0, 1024 * 1024);
    let model = classifier_model()
        .input(TensorType::Int8, &[1, 48, 64, 3], -128)
        .output(TensorType::Int8, &[1, 4], -128)
        .build();
    // Signed scores -128, 100, 0, -1 shift to 0, 228, 128, 127.
    let scores = [0x80, 100, 0, 0xFF];
    let mut ctx = start(model, &mut memory, &calls, &scores).unwrap();
    assert_eq!(ctx.stages.preprocessor.input().width(), 64);
    assert_eq!(ctx.stages.preprocessor.input().height(), 48);

    let guard = ctx.source.acquire().unwrap();
    match ctx.stages.classify(guard.frame()) {
        FrameOutcome::Classified(result) => assert_eq!(result.class_index, 1),
        other => panic!("unexpected outcome: {other:?}"),
    }
}

#[test]
fn non_image_input_shape_is_rejected() {
    let calls = Calls::default();
    let mut memory = HostMemory::new(0, 1024 * 1024);
    let model = classifier_model()
        .input(TensorType::UInt8, &[1, 96, 96, 1], 0)
        .build();
    assert!(matches!(
        start(model, &mut memory, &calls, &[]),
        Err(StartupError::InputShape(shape)) if shape == vec![1, 96, 96, 1]
    ));
}

#[test]
fn oversized_input_fails_tensor_allocation_before_buffers() {
    for shape in [[1, 4096, 4096, 3], [1, i32::MAX, i32::MAX, 3]] {
        let calls = Calls::default();
        let mut memory = HostMemory::new(0, 1024 * 1024);
        let model = classifier_model()
            .input(TensorType::UInt8, &shape, 0)
            .build();
        match start(model, &mut memory, &calls, &[]) {
            Err(StartupError::TensorAllocation {
                required,
                available,
            }) => assert!(required > available, "shape {shape:?}"),
            Err(other) => panic!("unexpected error for {shape:?}: {other}"),
            Ok(_) => panic!("startup succeeded for {shape:?}"),
        }
        assert_eq!(calls.forwarded.load(Ordering::SeqCst), 0);
    }
}
