#![cfg(feature = "backend-tract")]

use std::io::Cursor;

use anyhow::{anyhow, Context, Result};
use tract_tflite::prelude::*;

use crate::engine::backend::ForwardPass;
use crate::engine::tensor::{TensorView, TensorViewMut};
use crate::model::schema::{BuiltinOperator, TensorType};
use crate::model::Model;

/// Tract-based backend for TFLite inference.
///
/// Parses the same model bytes the interpreter validated and runs the full
/// graph. Tract keeps its own intermediate activations; only the input and
/// output tensors live in the arena.
#[derive(Default)]
pub struct TractBackend {
    plan: Option<TypedRunnableModel<TypedModel>>,
    input_datum: Option<DatumType>,
}

impl TractBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn build_input(&self, input: &TensorView<'_>) -> Result<Tensor> {
        let shape = input.shape();
        let mut tensor = match input.dtype() {
            TensorType::UInt8 => Tensor::from_shape::<u8>(shape, input.data())?,
            TensorType::Int8 => {
                let signed: Vec<i8> = input.data().iter().map(|&b| b as i8).collect();
                Tensor::from_shape::<i8>(shape, &signed)?
            }
            other => return Err(anyhow!("tract backend cannot feed {:?} input", other)),
        };
        if let Some(datum) = self.input_datum {
            if datum != tensor.datum_type() && datum.unquantized() == tensor.datum_type() {
                // Same storage, quantized datum type carries scale and zero point.
                unsafe { tensor.set_datum_type(datum) };
            }
        }
        Ok(tensor)
    }
}

impl ForwardPass for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn supports(&self, _op: BuiltinOperator) -> bool {
        true
    }

    fn prepare(&mut self, model: &Model) -> Result<usize> {
        let plan = tract_tflite::tflite()
            .model_for_read(&mut Cursor::new(model.bytes()))
            .context("failed to parse TFLite model")?
            .into_optimized()
            .context("failed to optimize TFLite model")?
            .into_runnable()
            .context("failed to build runnable TFLite model")?;
        self.input_datum = Some(plan.model().input_fact(0)?.datum_type);
        self.plan = Some(plan);
        Ok(0)
    }

    fn forward(
        &mut self,
        input: TensorView<'_>,
        mut output: TensorViewMut<'_>,
        _scratch: &mut [u8],
    ) -> Result<()> {
        let tensor = self.build_input(&input)?;
        let plan = self
            .plan
            .as_ref()
            .ok_or_else(|| anyhow!("tract backend not prepared"))?;
        let outputs = plan
            .run(tvec!(tensor.into()))
            .context("TFLite inference failed")?;
        let result = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let bytes = result.as_bytes();
        let dst = output.data_mut();
        if bytes.len() != dst.len() {
            return Err(anyhow!(
                "model output is {} bytes, output tensor is {}",
                bytes.len(),
                dst.len()
            ));
        }
        dst.copy_from_slice(bytes);
        Ok(())
    }
}
