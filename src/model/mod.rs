//! Model asset loading.
//!
//! A `Model` is loaded once from an immutable byte buffer (normally the asset
//! embedded in the binary) and never changes afterwards. Loading reads only
//! the header metadata the pipeline depends on:
//!
//! - schema version, which must equal `SCHEMA_VERSION`
//! - operator codes, used to derive the required operator set
//! - the first subgraph's input and output tensor descriptors
//!
//! Weights and graph structure stay opaque; executing them is the backend's job.

pub mod builder;
mod flatbuffer;
pub mod schema;

use std::borrow::Cow;
use std::path::Path;

use crate::error::ModelError;
use schema::{TensorType, CUSTOM_OPERATOR_CODE, FILE_IDENTIFIER};

pub use schema::SCHEMA_VERSION;

/// Model compiled into the binary.
pub static EMBEDDED_MODEL: &[u8] = include_bytes!("../../assets/model.tflite");

#[derive(Clone, Debug, PartialEq)]
pub struct Quantization {
    pub scale: f32,
    pub zero_point: i64,
}

/// Descriptor of one model tensor.
#[derive(Clone, Debug, PartialEq)]
pub struct TensorInfo {
    pub name: String,
    pub dtype: TensorType,
    pub shape: Vec<usize>,
    pub quantization: Option<Quantization>,
}

impl TensorInfo {
    /// `None` when the shape product overflows `usize`.
    pub fn element_count(&self) -> Option<usize> {
        self.shape
            .iter()
            .try_fold(1usize, |count, &dim| count.checked_mul(dim))
    }

    /// Byte length, `None` for variable-size element types or overflowing shapes.
    pub fn byte_len(&self) -> Option<usize> {
        let size = self.dtype.element_size()?;
        self.element_count()?.checked_mul(size)
    }
}

/// One entry of the model's operator-code table.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OperatorCode {
    Builtin(i32),
    Custom(String),
}

pub struct Model {
    bytes: Cow<'static, [u8]>,
    version: u32,
    operator_codes: Vec<OperatorCode>,
    input: TensorInfo,
    output: TensorInfo,
}

impl Model {
    /// Load and validate against the runtime schema version.
    pub fn load(bytes: impl Into<Cow<'static, [u8]>>) -> Result<Self, ModelError> {
        Self::load_with_version(bytes, SCHEMA_VERSION)
    }

    pub fn load_with_version(
        bytes: impl Into<Cow<'static, [u8]>>,
        expected_version: u32,
    ) -> Result<Self, ModelError> {
        let bytes = bytes.into();
        if bytes.is_empty() {
            return Err(ModelError::Empty);
        }
        if bytes.len() < 8 {
            return Err(ModelError::Malformed("buffer shorter than header"));
        }
        let mut identifier = [0u8; 4];
        identifier.copy_from_slice(&bytes[4..8]);
        if identifier != FILE_IDENTIFIER {
            return Err(ModelError::NotTflite(identifier));
        }

        let root = flatbuffer::root(&bytes)?;
        let version = root.u32_or(0, 0)?;
        if version != expected_version {
            log::error!(
                "model schema version {} != runtime version {}",
                version,
                expected_version
            );
            return Err(ModelError::VersionMismatch {
                found: version,
                expected: expected_version,
            });
        }

        let operator_codes = read_operator_codes(&root)?;
        let subgraphs = root.vector(2)?.ok_or(ModelError::NoSubgraph)?;
        if subgraphs.len() == 0 {
            return Err(ModelError::NoSubgraph);
        }
        let subgraph = subgraphs.table(0)?;
        let tensors = subgraph
            .vector(0)?
            .ok_or(ModelError::Malformed("subgraph has no tensors"))?;
        let input = single_io_tensor(&subgraph, &tensors, 1, "input")?;
        let output = single_io_tensor(&subgraph, &tensors, 2, "output")?;

        log::info!(
            "model loaded: {} bytes, schema v{}, {} operator codes, input {:?} {:?}, output {:?} {:?}",
            bytes.len(),
            version,
            operator_codes.len(),
            input.dtype,
            input.shape,
            output.dtype,
            output.shape
        );

        Ok(Self {
            bytes,
            version,
            operator_codes,
            input,
            output,
        })
    }

    /// Load a model file from disk.
    pub fn from_path(path: &Path, expected_version: u32) -> Result<Self, ModelError> {
        let bytes = std::fs::read(path)?;
        Self::load_with_version(bytes, expected_version)
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn operator_codes(&self) -> &[OperatorCode] {
        &self.operator_codes
    }

    pub fn input(&self) -> &TensorInfo {
        &self.input
    }

    pub fn output(&self) -> &TensorInfo {
        &self.output
    }
}

impl std::fmt::Debug for Model {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Model")
            .field("len", &self.bytes.len())
            .field("version", &self.version)
            .field("operator_codes", &self.operator_codes)
            .field("input", &self.input)
            .field("output", &self.output)
            .finish()
    }
}

fn read_operator_codes(root: &flatbuffer::Table<'_>) -> Result<Vec<OperatorCode>, ModelError> {
    let Some(codes) = root.vector(1)? else {
        return Ok(Vec::new());
    };
    let mut out = Vec::with_capacity(codes.len());
    for entry in codes.tables()? {
        let deprecated = entry.i8_or(0, 0)? as i32;
        let builtin = entry.i32_or(3, 0)?;
        let code = deprecated.max(builtin);
        if code == CUSTOM_OPERATOR_CODE {
            let name = entry.string(1)?.unwrap_or_default();
            out.push(OperatorCode::Custom(name));
        } else {
            out.push(OperatorCode::Builtin(code));
        }
    }
    Ok(out)
}

fn single_io_tensor(
    subgraph: &flatbuffer::Table<'_>,
    tensors: &flatbuffer::Vector<'_>,
    slot: usize,
    kind: &'static str,
) -> Result<TensorInfo, ModelError> {
    let indices = match subgraph.vector(slot)? {
        Some(v) => v.i32s()?,
        None => Vec::new(),
    };
    let [index] = indices[..] else {
        return Err(ModelError::TensorCount(kind));
    };
    let index = usize::try_from(index).map_err(|_| ModelError::Malformed("negative tensor index"))?;
    let tensor = tensors.table(index)?;

    let shape = match tensor.vector(0)? {
        Some(v) => v
            .i32s()?
            .into_iter()
            .map(|d| usize::try_from(d).map_err(|_| ModelError::Malformed("negative dimension")))
            .collect::<Result<Vec<_>, _>>()?,
        None => Vec::new(),
    };
    let dtype = TensorType::from_code(tensor.i8_or(1, 0)?);
    let name = tensor.string(3)?.unwrap_or_default();
    let quantization = match tensor.table(4)? {
        Some(q) => {
            let scale = q.vector(2)?.map(|v| v.f32s()).transpose()?;
            let zero_point = q.vector(3)?.map(|v| v.i64s()).transpose()?;
            match (scale.as_deref(), zero_point.as_deref()) {
                (Some([scale, ..]), Some([zero_point, ..])) => Some(Quantization {
                    scale: *scale,
                    zero_point: *zero_point,
                }),
                _ => None,
            }
        }
        None => None,
    };

    Ok(TensorInfo {
        name,
        dtype,
        shape,
        quantization,
    })
}
