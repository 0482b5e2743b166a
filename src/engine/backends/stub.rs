use anyhow::{anyhow, Result};
use sha2::{Digest, Sha256};

use crate::engine::backend::ForwardPass;
use crate::engine::tensor::{TensorView, TensorViewMut};
use crate::model::schema::BuiltinOperator;
use crate::model::Model;

/// Stub backend for bring-up and testing. Hashes the input tensor and writes
/// the digest bytes into the output tensor, so identical frames always yield
/// identical distributions.
#[derive(Default)]
pub struct StubBackend {
    invocations: u64,
}

impl StubBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn invocations(&self) -> u64 {
        self.invocations
    }
}

impl ForwardPass for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn supports(&self, _op: BuiltinOperator) -> bool {
        true
    }

    fn prepare(&mut self, model: &Model) -> Result<usize> {
        if model.output().dtype.element_size().is_none() {
            return Err(anyhow!(
                "stub backend cannot fill output of type {:?}",
                model.output().dtype
            ));
        }
        Ok(0)
    }

    fn forward(
        &mut self,
        input: TensorView<'_>,
        mut output: TensorViewMut<'_>,
        _scratch: &mut [u8],
    ) -> Result<()> {
        let digest: [u8; 32] = Sha256::digest(input.data()).into();
        for (i, byte) in output.data_mut().iter_mut().enumerate() {
            *byte = digest[i % digest.len()];
        }
        self.invocations += 1;
        Ok(())
    }
}
