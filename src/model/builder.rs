//! Minimal TFLite model writer for fixtures.
//!
//! Produces a flatbuffer carrying a schema version, operator codes and one
//! subgraph with a single input and output tensor. There are no weights or
//! operators in the graph; backends that only need the I/O contract (such as
//! `StubBackend`) can run it.

use super::schema::{BuiltinOperator, TensorType, FILE_IDENTIFIER, SCHEMA_VERSION};

#[derive(Clone, Debug)]
struct TensorDef {
    name: String,
    dtype: TensorType,
    shape: Vec<i32>,
    scale: f32,
    zero_point: i64,
}

#[derive(Clone, Debug)]
pub struct ModelBuilder {
    version: u32,
    operators: Vec<i32>,
    input: TensorDef,
    output: TensorDef,
}

impl Default for ModelBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ModelBuilder {
    /// A 96x96 RGB uint8 classifier with four classes.
    pub fn new() -> Self {
        Self {
            version: SCHEMA_VERSION,
            operators: Vec::new(),
            input: TensorDef {
                name: "input".to_string(),
                dtype: TensorType::UInt8,
                shape: vec![1, 96, 96, 3],
                scale: 1.0 / 255.0,
                zero_point: 0,
            },
            output: TensorDef {
                name: "output".to_string(),
                dtype: TensorType::UInt8,
                shape: vec![1, 4],
                scale: 1.0 / 256.0,
                zero_point: 0,
            },
        }
    }

    pub fn version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    pub fn operator(mut self, op: BuiltinOperator) -> Self {
        self.operators.push(op.code());
        self
    }

    pub fn operators(mut self, ops: &[BuiltinOperator]) -> Self {
        self.operators.extend(ops.iter().map(|op| op.code()));
        self
    }

    /// Raw builtin code, for operators this runtime does not name.
    pub fn operator_code(mut self, code: i32) -> Self {
        self.operators.push(code);
        self
    }

    pub fn input(mut self, dtype: TensorType, shape: &[i32], zero_point: i64) -> Self {
        self.input.dtype = dtype;
        self.input.shape = shape.to_vec();
        self.input.zero_point = zero_point;
        self
    }

    pub fn output(mut self, dtype: TensorType, shape: &[i32], zero_point: i64) -> Self {
        self.output.dtype = dtype;
        self.output.shape = shape.to_vec();
        self.output.zero_point = zero_point;
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let mut w = Writer::default();
        w.buf.extend_from_slice(&[0u8; 4]);
        w.buf.extend_from_slice(&FILE_IDENTIFIER);

        // Model { version, operator_codes, subgraphs }
        let (model, refs) = w.table(&[Field::U32(self.version), Field::Ref, Field::Ref]);
        w.patch(0, model);

        let (codes, slots) = w.ref_vector(self.operators.len());
        w.patch(refs[1], codes);
        for (slot, code) in slots.into_iter().zip(&self.operators) {
            let deprecated = (*code).min(127) as i8;
            // OperatorCode { deprecated_builtin_code, custom_code, version, builtin_code }
            let (table, _) = w.table(&[
                Field::I8(deprecated),
                Field::Absent,
                Field::I32(1),
                Field::I32(*code),
            ]);
            w.patch(slot, table);
        }

        let (subgraphs, slots) = w.ref_vector(1);
        w.patch(refs[2], subgraphs);
        // SubGraph { tensors, inputs, outputs, operators, name }
        let (subgraph, sg_refs) = w.table(&[
            Field::Ref,
            Field::Ref,
            Field::Ref,
            Field::Absent,
            Field::Ref,
        ]);
        w.patch(slots[0], subgraph);

        let (tensors, slots) = w.ref_vector(2);
        w.patch(sg_refs[0], tensors);
        for (slot, def) in slots.into_iter().zip([&self.input, &self.output]) {
            let table = w.tensor(def);
            w.patch(slot, table);
        }
        let inputs = w.i32_vector(&[0]);
        w.patch(sg_refs[1], inputs);
        let outputs = w.i32_vector(&[1]);
        w.patch(sg_refs[2], outputs);
        let name = w.string("main");
        w.patch(sg_refs[4], name);

        w.buf
    }
}

enum Field {
    Absent,
    I8(i8),
    I32(i32),
    U32(u32),
    Ref,
}

/// Forward-only flatbuffer writer. Referenced objects are always written
/// after the field that points to them, so every `uoffset_t` is positive.
#[derive(Default)]
struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    fn align(&mut self, to: usize) {
        while self.buf.len() % to != 0 {
            self.buf.push(0);
        }
    }

    fn put_u32(&mut self, value: u32) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    fn patch(&mut self, at: usize, target: usize) {
        let off = (target - at) as u32;
        self.buf[at..at + 4].copy_from_slice(&off.to_le_bytes());
    }

    /// Writes vtable + table. Returns the table position and, per field,
    /// the position of its slot (meaningful for `Field::Ref`).
    fn table(&mut self, fields: &[Field]) -> (usize, Vec<usize>) {
        self.align(4);
        let vtable = self.buf.len();
        let vtable_len = 4 + 2 * fields.len();
        let present = fields
            .iter()
            .filter(|f| !matches!(f, Field::Absent))
            .count();
        let table_len = 4 + 4 * present;
        self.buf.extend_from_slice(&(vtable_len as u16).to_le_bytes());
        self.buf.extend_from_slice(&(table_len as u16).to_le_bytes());
        let mut next = 4u16;
        for field in fields {
            if matches!(field, Field::Absent) {
                self.buf.extend_from_slice(&0u16.to_le_bytes());
            } else {
                self.buf.extend_from_slice(&next.to_le_bytes());
                next += 4;
            }
        }
        self.align(4);

        let table = self.buf.len();
        self.buf
            .extend_from_slice(&((table - vtable) as i32).to_le_bytes());
        let mut slots = Vec::with_capacity(fields.len());
        for field in fields {
            slots.push(self.buf.len());
            match field {
                Field::Absent => {}
                Field::I8(v) => self.buf.extend_from_slice(&[*v as u8, 0, 0, 0]),
                Field::I32(v) => self.buf.extend_from_slice(&v.to_le_bytes()),
                Field::U32(v) => self.put_u32(*v),
                Field::Ref => self.put_u32(0),
            }
        }
        (table, slots)
    }

    fn ref_vector(&mut self, len: usize) -> (usize, Vec<usize>) {
        self.align(4);
        let pos = self.buf.len();
        self.put_u32(len as u32);
        let slots = (0..len)
            .map(|_| {
                let slot = self.buf.len();
                self.put_u32(0);
                slot
            })
            .collect();
        (pos, slots)
    }

    fn i32_vector(&mut self, values: &[i32]) -> usize {
        self.align(4);
        let pos = self.buf.len();
        self.put_u32(values.len() as u32);
        for v in values {
            self.buf.extend_from_slice(&v.to_le_bytes());
        }
        pos
    }

    fn f32_vector(&mut self, values: &[f32]) -> usize {
        self.align(4);
        let pos = self.buf.len();
        self.put_u32(values.len() as u32);
        for v in values {
            self.put_u32(v.to_bits());
        }
        pos
    }

    fn i64_vector(&mut self, values: &[i64]) -> usize {
        // Elements start 8-aligned, the length prefix sits just before them.
        self.align(4);
        if (self.buf.len() + 4) % 8 != 0 {
            self.put_u32(0);
        }
        let pos = self.buf.len();
        self.put_u32(values.len() as u32);
        for v in values {
            self.buf.extend_from_slice(&v.to_le_bytes());
        }
        pos
    }

    fn string(&mut self, value: &str) -> usize {
        self.align(4);
        let pos = self.buf.len();
        self.put_u32(value.len() as u32);
        self.buf.extend_from_slice(value.as_bytes());
        self.buf.push(0);
        pos
    }

    fn tensor(&mut self, def: &TensorDef) -> usize {
        // Tensor { shape, type, buffer, name, quantization }
        let (table, refs) = self.table(&[
            Field::Ref,
            Field::I8(def.dtype.code()),
            Field::U32(0),
            Field::Ref,
            Field::Ref,
        ]);
        let shape = self.i32_vector(&def.shape);
        self.patch(refs[0], shape);
        let name = self.string(&def.name);
        self.patch(refs[3], name);
        // QuantizationParameters { min, max, scale, zero_point }
        let (quant, q_refs) = self.table(&[Field::Absent, Field::Absent, Field::Ref, Field::Ref]);
        self.patch(refs[4], quant);
        let scale = self.f32_vector(&[def.scale]);
        self.patch(q_refs[2], scale);
        let zero_point = self.i64_vector(&[def.zero_point]);
        self.patch(q_refs[3], zero_point);
        table
    }
}
