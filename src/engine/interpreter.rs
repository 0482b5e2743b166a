use crate::arena::{MemoryRegion, TensorArena};
use crate::engine::backend::ForwardPass;
use crate::engine::ops::OperatorSet;
use crate::engine::tensor::{Span, TensorView, TensorViewMut};
use crate::error::{InferenceError, ModelError, StartupError};
use crate::model::{Model, TensorInfo};

/// Arena offsets are aligned for SIMD kernels.
pub const TENSOR_ALIGNMENT: usize = 16;

#[derive(Clone, Copy, Debug)]
struct TensorPlan {
    input: Span,
    output: Span,
    scratch: Span,
}

fn align_up(value: usize) -> Option<usize> {
    value.div_ceil(TENSOR_ALIGNMENT).checked_mul(TENSOR_ALIGNMENT)
}

fn io_len(info: &TensorInfo) -> Result<usize, StartupError> {
    if info.dtype.element_size().is_none() {
        return Err(StartupError::Model(ModelError::Malformed(
            "input/output tensor has variable-size element type",
        )));
    }
    // An overflowing shape can never fit.
    Ok(info.byte_len().unwrap_or(usize::MAX))
}

/// Lay out input, output and scratch back to back. `None` on overflow.
fn plan_spans(input_len: usize, output_len: usize, scratch_len: usize) -> Option<TensorPlan> {
    let input = Span {
        offset: 0,
        len: input_len,
    };
    let output = Span {
        offset: align_up(input.len)?,
        len: output_len,
    };
    let scratch = Span {
        offset: align_up(output.offset.checked_add(output.len)?)?,
        len: scratch_len,
    };
    scratch.offset.checked_add(scratch.len)?;
    Some(TensorPlan {
        input,
        output,
        scratch,
    })
}

/// Binds a model, its operator set and the tensor arena.
///
/// Exactly one input and one output tensor are exposed. Their storage is
/// carved out of the arena by `allocate_tensors` once and reused by every
/// `invoke`.
pub struct Interpreter {
    model: Model,
    operators: OperatorSet,
    arena: TensorArena,
    backend: Box<dyn ForwardPass>,
    plan: Option<TensorPlan>,
}

impl Interpreter {
    pub fn new(
        model: Model,
        operators: OperatorSet,
        arena: TensorArena,
        backend: Box<dyn ForwardPass>,
    ) -> Result<Self, StartupError> {
        operators.ensure_covers(&model)?;
        operators.ensure_executable(backend.as_ref())?;
        log::info!(
            "interpreter created: backend={} operators={}/{} arena={} KiB ({})",
            backend.name(),
            operators.len(),
            operators.capacity(),
            arena.len() / 1024,
            arena.region()
        );
        Ok(Self {
            model,
            operators,
            arena,
            backend,
            plan: None,
        })
    }

    /// Plan input, output and backend scratch inside the arena.
    pub fn allocate_tensors(&mut self) -> Result<(), StartupError> {
        let scratch_len = self
            .backend
            .prepare(&self.model)
            .map_err(|source| StartupError::Backend {
                backend: self.backend.name(),
                source,
            })?;

        let plan = plan_spans(
            io_len(self.model.input())?,
            io_len(self.model.output())?,
            scratch_len,
        );
        let required = plan.map_or(usize::MAX, |plan| plan.scratch.end());
        let Some(TensorPlan {
            input,
            output,
            scratch,
        }) = plan.filter(|_| required <= self.arena.len())
        else {
            log::error!(
                "tensor allocation failed: need {} bytes, arena has {}",
                required,
                self.arena.len()
            );
            return Err(StartupError::TensorAllocation {
                required,
                available: self.arena.len(),
            });
        };

        log::info!(
            "tensors allocated: input={}B output={}B scratch={}B ({} of {} arena bytes)",
            input.len,
            output.len,
            scratch.len,
            required,
            self.arena.len()
        );
        self.plan = Some(TensorPlan {
            input,
            output,
            scratch,
        });
        Ok(())
    }

    pub fn model(&self) -> &Model {
        &self.model
    }

    pub fn operators(&self) -> &OperatorSet {
        &self.operators
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn arena_region(&self) -> MemoryRegion {
        self.arena.region()
    }

    /// Arena bytes claimed by the tensor plan.
    pub fn arena_used(&self) -> usize {
        self.plan.map(|plan| plan.scratch.end()).unwrap_or(0)
    }

    fn plan(&self) -> Result<TensorPlan, InferenceError> {
        self.plan.ok_or(InferenceError::NotAllocated)
    }

    pub fn input(&self) -> Result<TensorView<'_>, InferenceError> {
        let span = self.plan()?.input;
        Ok(TensorView::new(
            self.model.input(),
            &self.arena.bytes()[span.offset..span.end()],
        ))
    }

    pub fn input_mut(&mut self) -> Result<TensorViewMut<'_>, InferenceError> {
        let span = self.plan()?.input;
        Ok(TensorViewMut::new(
            self.model.input(),
            &mut self.arena.bytes_mut()[span.offset..span.end()],
        ))
    }

    pub fn output(&self) -> Result<TensorView<'_>, InferenceError> {
        let span = self.plan()?.output;
        Ok(TensorView::new(
            self.model.output(),
            &self.arena.bytes()[span.offset..span.end()],
        ))
    }

    /// Run the forward pass over the current input tensor.
    pub fn invoke(&mut self) -> Result<(), InferenceError> {
        let plan = self.plan()?;
        let bytes = self.arena.bytes_mut();
        let (head, rest) = bytes.split_at_mut(plan.output.offset);
        let (output, tail) = rest.split_at_mut(plan.scratch.offset - plan.output.offset);
        let input = TensorView::new(self.model.input(), &head[plan.input.offset..plan.input.end()]);
        let output = TensorViewMut::new(self.model.output(), &mut output[..plan.output.len]);
        let scratch = &mut tail[..plan.scratch.len];

        self.backend
            .forward(input, output, scratch)
            .map_err(InferenceError::Invoke)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::HostMemory;
    use crate::engine::backends::StubBackend;
    use crate::engine::ops::{OperatorSet, DEFAULT_OPERATOR_CAPACITY};
    use crate::model::builder::ModelBuilder;
    use crate::model::schema::TensorType;

    fn interpreter(arena_bytes: usize) -> Result<Interpreter, StartupError> {
        let model = Model::load(ModelBuilder::new().build())?;
        let ops = OperatorSet::classifier(DEFAULT_OPERATOR_CAPACITY)?;
        let mut memory = HostMemory::new(0, arena_bytes);
        let arena = TensorArena::allocate(&mut memory, arena_bytes)?;
        Interpreter::new(model, ops, arena, Box::new(StubBackend::new()))
    }

    #[test]
    fn tensors_are_planned_inside_the_arena() {
        let mut interp = interpreter(64 * 1024).unwrap();
        assert!(matches!(interp.input(), Err(InferenceError::NotAllocated)));

        interp.allocate_tensors().unwrap();
        assert_eq!(interp.input().unwrap().byte_len(), 96 * 96 * 3);
        assert_eq!(interp.output().unwrap().byte_len(), 4);
        assert_eq!(interp.arena_used(), align_up(96 * 96 * 3).unwrap() + 16);
        interp.invoke().unwrap();
    }

    #[test]
    fn small_arena_fails_allocation() {
        let mut interp = interpreter(16 * 1024).unwrap();
        match interp.allocate_tensors() {
            Err(StartupError::TensorAllocation {
                required,
                available,
            }) => {
                assert_eq!(available, 16 * 1024);
                assert!(required > available);
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn huge_input_shape_fails_allocation() {
        let bytes = ModelBuilder::new()
            .input(TensorType::UInt8, &[1, i32::MAX, i32::MAX, 3], 0)
            .build();
        let model = Model::load(bytes).unwrap();
        let ops = OperatorSet::classifier(DEFAULT_OPERATOR_CAPACITY).unwrap();
        let mut memory = HostMemory::new(0, 64 * 1024);
        let arena = TensorArena::allocate(&mut memory, 64 * 1024).unwrap();
        let mut interp =
            Interpreter::new(model, ops, arena, Box::new(StubBackend::new())).unwrap();
        assert!(matches!(
            interp.allocate_tensors(),
            Err(StartupError::TensorAllocation {
                available: 65536,
                ..
            })
        ));
    }

    #[test]
    fn overflowing_plan_is_rejected() {
        assert!(plan_spans(usize::MAX - 3, 4, 0).is_none());
        assert!(plan_spans(16, usize::MAX - 8, 0).is_none());
        let plan = plan_spans(10, 4, 8).unwrap();
        assert_eq!((plan.output.offset, plan.scratch.offset), (16, 32));
    }

    #[test]
    fn invoke_before_allocation_is_rejected() {
        let mut interp = interpreter(64 * 1024).unwrap();
        assert!(matches!(interp.invoke(), Err(InferenceError::NotAllocated)));
    }
}
