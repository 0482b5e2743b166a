//! Inference engine: arena-backed interpreter over a quantized model.
//!
//! Setup happens once: the operator set is checked against the model and the
//! backend, tensors are allocated in the arena, and any failure is fatal.
//! After that `infer` copies a preprocessed image into the input tensor, runs
//! the forward pass, and returns a view of the output tensor. No per-call
//! tensor allocation takes place.

pub mod backend;
pub mod backends;
pub mod interpreter;
pub mod ops;
pub mod tensor;

pub use backend::ForwardPass;
pub use backends::StubBackend;
#[cfg(feature = "backend-tract")]
pub use backends::TractBackend;
pub use interpreter::Interpreter;
pub use ops::{OperatorSet, OperatorSetBuilder, CLASSIFIER_OPERATORS, DEFAULT_OPERATOR_CAPACITY};
pub use tensor::{TensorView, TensorViewMut};

use crate::arena::TensorArena;
use crate::error::{InferenceError, StartupError};
use crate::model::schema::TensorType;
use crate::model::{Model, TensorInfo};

/// Zero-point shift between uint8 and int8 quantization.
pub const INT8_ZERO_POINT_SHIFT: i16 = 128;

pub struct InferenceEngine {
    interpreter: Interpreter,
}

impl InferenceEngine {
    pub fn new(
        model: Model,
        operators: OperatorSet,
        arena: TensorArena,
        backend: Box<dyn ForwardPass>,
    ) -> Result<Self, StartupError> {
        let mut interpreter = Interpreter::new(model, operators, arena, backend)?;
        interpreter.allocate_tensors()?;
        Ok(Self { interpreter })
    }

    pub fn input_info(&self) -> &TensorInfo {
        self.interpreter.model().input()
    }

    pub fn output_info(&self) -> &TensorInfo {
        self.interpreter.model().output()
    }

    pub fn interpreter(&self) -> &Interpreter {
        &self.interpreter
    }

    /// Number of classes, read from the output tensor's shape.
    pub fn class_count(&self) -> usize {
        self.output_info().shape.last().copied().unwrap_or(0)
    }

    /// Copy `input` into the input tensor, invoke, and view the output.
    ///
    /// Failures affect this call only.
    pub fn infer(&mut self, input: &[u8]) -> Result<TensorView<'_>, InferenceError> {
        let mut tensor = self.interpreter.input_mut()?;
        load_input(&mut tensor, input)?;
        self.interpreter.invoke()?;
        self.interpreter.output()
    }
}

/// Copy preprocessed bytes into the input tensor.
///
/// Uint8 tensors receive the bytes verbatim; int8 tensors receive each byte
/// shifted by the zero point (`b - 128`). At most `min(src, tensor)` bytes are
/// written; a length mismatch only logs a warning. Returns the bytes written.
pub fn load_input(tensor: &mut TensorViewMut<'_>, src: &[u8]) -> Result<usize, InferenceError> {
    let dtype = tensor.dtype();
    if !matches!(dtype, TensorType::UInt8 | TensorType::Int8) {
        log::error!("input tensor type {:?} not supported", dtype);
        return Err(InferenceError::UnsupportedInputType(dtype));
    }

    let dst = tensor.data_mut();
    if src.len() != dst.len() {
        log::warn!(
            "input buffer is {} bytes but input tensor is {}; copying {}",
            src.len(),
            dst.len(),
            src.len().min(dst.len())
        );
    }
    let n = src.len().min(dst.len());
    match dtype {
        TensorType::UInt8 => dst[..n].copy_from_slice(&src[..n]),
        _ => {
            for (d, s) in dst[..n].iter_mut().zip(&src[..n]) {
                *d = (*s as i16 - INT8_ZERO_POINT_SHIFT) as i8 as u8;
            }
        }
    }
    Ok(n)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TensorInfo;

    fn info(dtype: TensorType, len: usize) -> TensorInfo {
        TensorInfo {
            name: "input".to_string(),
            dtype,
            shape: vec![len],
            quantization: None,
        }
    }

    #[test]
    fn uint8_input_is_copied_verbatim() {
        let info = info(TensorType::UInt8, 4);
        let mut storage = [0u8; 4];
        let mut tensor = TensorViewMut::new(&info, &mut storage);
        assert_eq!(load_input(&mut tensor, &[0, 1, 128, 255]).unwrap(), 4);
        assert_eq!(storage, [0, 1, 128, 255]);
    }

    #[test]
    fn int8_input_is_zero_point_shifted() {
        let info = info(TensorType::Int8, 4);
        let mut storage = [0u8; 4];
        let mut tensor = TensorViewMut::new(&info, &mut storage);
        load_input(&mut tensor, &[0, 1, 128, 255]).unwrap();
        let signed: Vec<i8> = storage.iter().map(|&b| b as i8).collect();
        assert_eq!(signed, vec![-128, -127, 0, 127]);
    }

    #[test]
    fn length_mismatch_never_overflows() {
        let info = info(TensorType::UInt8, 3);
        let mut storage = [9u8; 3];
        let mut tensor = TensorViewMut::new(&info, &mut storage);
        assert_eq!(load_input(&mut tensor, &[1, 2, 3, 4, 5]).unwrap(), 3);
        assert_eq!(storage, [1, 2, 3]);

        let mut storage = [9u8; 3];
        let mut tensor = TensorViewMut::new(&info, &mut storage);
        assert_eq!(load_input(&mut tensor, &[1]).unwrap(), 1);
        assert_eq!(storage, [1, 9, 9]);
    }

    #[test]
    fn float_input_is_unsupported() {
        let info = info(TensorType::Float32, 4);
        let mut storage = [0u8; 16];
        let mut tensor = TensorViewMut::new(&info, &mut storage);
        assert!(matches!(
            load_input(&mut tensor, &[1, 2, 3, 4]),
            Err(InferenceError::UnsupportedInputType(TensorType::Float32))
        ));
        assert_eq!(storage, [0u8; 16]);
    }
}
