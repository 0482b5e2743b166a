//! TFLite schema enums used by the runtime.

/// Schema version this runtime understands.
pub const SCHEMA_VERSION: u32 = 3;

/// Four-byte flatbuffer file identifier of TFLite models.
pub const FILE_IDENTIFIER: [u8; 4] = *b"TFL3";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TensorType {
    Float32,
    Float16,
    Int32,
    UInt8,
    Int64,
    String,
    Bool,
    Int16,
    Complex64,
    Int8,
    Other(i8),
}

impl TensorType {
    pub fn from_code(code: i8) -> Self {
        match code {
            0 => TensorType::Float32,
            1 => TensorType::Float16,
            2 => TensorType::Int32,
            3 => TensorType::UInt8,
            4 => TensorType::Int64,
            5 => TensorType::String,
            6 => TensorType::Bool,
            7 => TensorType::Int16,
            8 => TensorType::Complex64,
            9 => TensorType::Int8,
            other => TensorType::Other(other),
        }
    }

    pub fn code(&self) -> i8 {
        match self {
            TensorType::Float32 => 0,
            TensorType::Float16 => 1,
            TensorType::Int32 => 2,
            TensorType::UInt8 => 3,
            TensorType::Int64 => 4,
            TensorType::String => 5,
            TensorType::Bool => 6,
            TensorType::Int16 => 7,
            TensorType::Complex64 => 8,
            TensorType::Int8 => 9,
            TensorType::Other(code) => *code,
        }
    }

    /// Element size in bytes, `None` for variable-size types.
    pub fn element_size(&self) -> Option<usize> {
        match self {
            TensorType::UInt8 | TensorType::Int8 | TensorType::Bool => Some(1),
            TensorType::Float16 | TensorType::Int16 => Some(2),
            TensorType::Float32 | TensorType::Int32 => Some(4),
            TensorType::Int64 | TensorType::Complex64 => Some(8),
            TensorType::String | TensorType::Other(_) => None,
        }
    }
}

/// Builtin kernels the classifier pipeline knows how to register.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BuiltinOperator {
    Add,
    AveragePool2d,
    Conv2d,
    DepthwiseConv2d,
    Dequantize,
    FullyConnected,
    MaxPool2d,
    Relu,
    Relu6,
    Reshape,
    Softmax,
    Mean,
    Quantize,
}

impl BuiltinOperator {
    pub const ALL: [BuiltinOperator; 13] = [
        BuiltinOperator::Add,
        BuiltinOperator::AveragePool2d,
        BuiltinOperator::Conv2d,
        BuiltinOperator::DepthwiseConv2d,
        BuiltinOperator::Dequantize,
        BuiltinOperator::FullyConnected,
        BuiltinOperator::MaxPool2d,
        BuiltinOperator::Relu,
        BuiltinOperator::Relu6,
        BuiltinOperator::Reshape,
        BuiltinOperator::Softmax,
        BuiltinOperator::Mean,
        BuiltinOperator::Quantize,
    ];

    pub fn from_code(code: i32) -> Option<Self> {
        Self::ALL.into_iter().find(|op| op.code() == code)
    }

    pub fn code(&self) -> i32 {
        match self {
            BuiltinOperator::Add => 0,
            BuiltinOperator::AveragePool2d => 1,
            BuiltinOperator::Conv2d => 3,
            BuiltinOperator::DepthwiseConv2d => 4,
            BuiltinOperator::Dequantize => 6,
            BuiltinOperator::FullyConnected => 9,
            BuiltinOperator::MaxPool2d => 17,
            BuiltinOperator::Relu => 19,
            BuiltinOperator::Relu6 => 21,
            BuiltinOperator::Reshape => 22,
            BuiltinOperator::Softmax => 25,
            BuiltinOperator::Mean => 40,
            BuiltinOperator::Quantize => 114,
        }
    }
}

/// Code stored in `OperatorCode.builtin_code` for custom operators.
pub const CUSTOM_OPERATOR_CODE: i32 = 32;

/// Value of `deprecated_builtin_code` once codes no longer fit in an i8.
pub const PLACEHOLDER_FOR_GREATER_OP_CODES: i32 = 127;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operator_codes_round_trip() {
        for op in BuiltinOperator::ALL {
            assert_eq!(BuiltinOperator::from_code(op.code()), Some(op));
        }
        assert_eq!(BuiltinOperator::from_code(2), None);
    }

    #[test]
    fn unknown_tensor_type_is_preserved() {
        assert_eq!(TensorType::from_code(3), TensorType::UInt8);
        assert_eq!(TensorType::from_code(9), TensorType::Int8);
        assert_eq!(TensorType::from_code(42).code(), 42);
        assert_eq!(TensorType::from_code(42).element_size(), None);
    }
}
