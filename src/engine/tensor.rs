use crate::model::schema::TensorType;
use crate::model::TensorInfo;

/// Region of the arena assigned to one tensor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Span {
    pub offset: usize,
    pub len: usize,
}

impl Span {
    pub fn end(&self) -> usize {
        self.offset + self.len
    }
}

/// Read-only view of a tensor's bytes inside the arena.
#[derive(Clone, Copy)]
pub struct TensorView<'a> {
    info: &'a TensorInfo,
    data: &'a [u8],
}

impl<'a> TensorView<'a> {
    pub(crate) fn new(info: &'a TensorInfo, data: &'a [u8]) -> Self {
        Self { info, data }
    }

    pub fn info(&self) -> &'a TensorInfo {
        self.info
    }

    pub fn dtype(&self) -> TensorType {
        self.info.dtype
    }

    pub fn shape(&self) -> &'a [usize] {
        &self.info.shape
    }

    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    pub fn byte_len(&self) -> usize {
        self.data.len()
    }
}

/// Writable view of a tensor's bytes inside the arena.
pub struct TensorViewMut<'a> {
    info: &'a TensorInfo,
    data: &'a mut [u8],
}

impl<'a> TensorViewMut<'a> {
    pub(crate) fn new(info: &'a TensorInfo, data: &'a mut [u8]) -> Self {
        Self { info, data }
    }

    pub fn info(&self) -> &TensorInfo {
        self.info
    }

    pub fn dtype(&self) -> TensorType {
        self.info.dtype
    }

    pub fn shape(&self) -> &[usize] {
        &self.info.shape
    }

    pub fn data(&self) -> &[u8] {
        self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        self.data
    }

    pub fn byte_len(&self) -> usize {
        self.data.len()
    }
}
