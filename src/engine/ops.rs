//! Operator set: the fixed list of kernels the interpreter may execute.
//!
//! Populated once at startup, immutable afterwards. Registration is bounded by
//! a fixed capacity. A model whose operator codes are not all covered fails at
//! startup, never at the first invoke.

use crate::engine::backend::ForwardPass;
use crate::error::OperatorError;
use crate::model::schema::BuiltinOperator;
use crate::model::{Model, OperatorCode};

pub const DEFAULT_OPERATOR_CAPACITY: usize = 15;

/// Kernels used by the quantized MobileNet-style classifier.
pub const CLASSIFIER_OPERATORS: [BuiltinOperator; 10] = [
    BuiltinOperator::Quantize,
    BuiltinOperator::Dequantize,
    BuiltinOperator::Conv2d,
    BuiltinOperator::DepthwiseConv2d,
    BuiltinOperator::Relu,
    BuiltinOperator::Relu6,
    BuiltinOperator::Add,
    BuiltinOperator::Mean,
    BuiltinOperator::FullyConnected,
    BuiltinOperator::Softmax,
];

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OperatorSet {
    ops: Vec<BuiltinOperator>,
    capacity: usize,
}

pub struct OperatorSetBuilder {
    ops: Vec<BuiltinOperator>,
    capacity: usize,
}

impl OperatorSetBuilder {
    pub fn add(&mut self, op: BuiltinOperator) -> Result<&mut Self, OperatorError> {
        if self.ops.contains(&op) {
            return Err(OperatorError::Duplicate(op));
        }
        if self.ops.len() >= self.capacity {
            return Err(OperatorError::CapacityExceeded(self.capacity));
        }
        self.ops.push(op);
        Ok(self)
    }

    pub fn build(self) -> OperatorSet {
        OperatorSet {
            ops: self.ops,
            capacity: self.capacity,
        }
    }
}

impl OperatorSet {
    pub fn builder(capacity: usize) -> OperatorSetBuilder {
        OperatorSetBuilder {
            ops: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// The hand-listed classifier kernels.
    pub fn classifier(capacity: usize) -> Result<Self, OperatorError> {
        let mut builder = Self::builder(capacity);
        for op in CLASSIFIER_OPERATORS {
            builder.add(op)?;
        }
        Ok(builder.build())
    }

    /// Exactly the kernels named in the model's operator-code table.
    pub fn for_model(model: &Model, capacity: usize) -> Result<Self, OperatorError> {
        let mut builder = Self::builder(capacity);
        for code in model.operator_codes() {
            let op = match code {
                OperatorCode::Builtin(code) => {
                    BuiltinOperator::from_code(*code).ok_or(OperatorError::UnknownCode(*code))?
                }
                OperatorCode::Custom(name) => return Err(OperatorError::Custom(name.clone())),
            };
            if !builder.ops.contains(&op) {
                builder.add(op)?;
            }
        }
        Ok(builder.build())
    }

    pub fn contains(&self, op: BuiltinOperator) -> bool {
        self.ops.contains(&op)
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn iter(&self) -> impl Iterator<Item = BuiltinOperator> + '_ {
        self.ops.iter().copied()
    }

    /// Every operator the model uses must be registered.
    pub fn ensure_covers(&self, model: &Model) -> Result<(), OperatorError> {
        for code in model.operator_codes() {
            match code {
                OperatorCode::Builtin(code) => {
                    let op =
                        BuiltinOperator::from_code(*code).ok_or(OperatorError::UnknownCode(*code))?;
                    if !self.contains(op) {
                        return Err(OperatorError::Missing(op));
                    }
                }
                OperatorCode::Custom(name) => return Err(OperatorError::Custom(name.clone())),
            }
        }
        Ok(())
    }

    /// Every registered operator must be executable by the backend.
    pub fn ensure_executable(&self, backend: &dyn ForwardPass) -> Result<(), OperatorError> {
        match self.iter().find(|op| !backend.supports(*op)) {
            Some(op) => Err(OperatorError::Unsupported {
                backend: backend.name(),
                op,
            }),
            None => Ok(()),
        }
    }
}
