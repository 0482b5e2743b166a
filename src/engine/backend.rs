use anyhow::Result;

use crate::engine::tensor::{TensorView, TensorViewMut};
use crate::model::schema::BuiltinOperator;
use crate::model::Model;

/// Forward-pass backend trait.
///
/// The interpreter owns tensor storage; a backend only reads the input tensor
/// and writes the output tensor in place. Backends must not allocate tensor
/// storage of their own per call. Working memory they need is declared once by
/// `prepare` and handed back as `scratch` on every `forward`.
pub trait ForwardPass: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Returns true when the backend can execute the operator.
    fn supports(&self, op: BuiltinOperator) -> bool;

    /// Prepare the model once at startup. Returns required scratch bytes.
    fn prepare(&mut self, model: &Model) -> Result<usize>;

    /// Run one forward pass.
    fn forward(
        &mut self,
        input: TensorView<'_>,
        output: TensorViewMut<'_>,
        scratch: &mut [u8],
    ) -> Result<()>;
}
