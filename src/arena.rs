//! Tensor arena allocation.
//!
//! The arena is one large block obtained once at startup and owned by the
//! interpreter for the life of the process. It is never resized or freed
//! during normal operation.
//!
//! Allocation prefers external memory (PSRAM) when the device reports it as
//! present, then falls back to the internal heap. Failing both is fatal.

use std::fmt;

use crate::error::ArenaError;

/// Default arena size used by the classifier model.
pub const DEFAULT_ARENA_BYTES: usize = 700 * 1024;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MemoryRegion {
    /// External PSRAM: large, slower, optional.
    External,
    /// Internal RAM, the default heap.
    Internal,
}

impl fmt::Display for MemoryRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemoryRegion::External => f.write_str("external"),
            MemoryRegion::Internal => f.write_str("internal"),
        }
    }
}

/// Source of raw memory blocks for the arena.
pub trait MemoryProvider {
    /// True when external memory is present and initialized.
    fn external_available(&self) -> bool;

    /// Allocate a zeroed block from `region`, or `None` if it cannot be satisfied.
    fn allocate(&mut self, region: MemoryRegion, size: usize) -> Option<Box<[u8]>>;
}

/// Fixed-size arena block with the region it was carved from.
pub struct TensorArena {
    block: Box<[u8]>,
    region: MemoryRegion,
}

impl TensorArena {
    /// Allocate `size` bytes, preferring external memory.
    pub fn allocate(provider: &mut dyn MemoryProvider, size: usize) -> Result<Self, ArenaError> {
        if size == 0 {
            return Err(ArenaError::ZeroSize);
        }
        let mut tried = Vec::with_capacity(2);

        if provider.external_available() {
            tried.push(MemoryRegion::External);
            if let Some(block) = provider.allocate(MemoryRegion::External, size) {
                log::info!("tensor arena: {} KiB in external memory", size / 1024);
                return Ok(Self {
                    block,
                    region: MemoryRegion::External,
                });
            }
            log::warn!("external memory allocation failed; trying internal heap");
        } else {
            log::warn!("external memory not detected; using internal heap for tensor arena");
        }

        tried.push(MemoryRegion::Internal);
        match provider.allocate(MemoryRegion::Internal, size) {
            Some(block) => {
                log::info!("tensor arena: {} KiB in internal memory", size / 1024);
                Ok(Self {
                    block,
                    region: MemoryRegion::Internal,
                })
            }
            None => {
                log::error!("tensor arena allocation of {} bytes failed", size);
                Err(ArenaError::Exhausted { size, tried })
            }
        }
    }

    pub fn region(&self) -> MemoryRegion {
        self.region
    }

    pub fn len(&self) -> usize {
        self.block.len()
    }

    pub fn is_empty(&self) -> bool {
        self.block.is_empty()
    }

    pub(crate) fn bytes(&self) -> &[u8] {
        &self.block
    }

    pub(crate) fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.block
    }
}

impl fmt::Debug for TensorArena {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TensorArena")
            .field("len", &self.block.len())
            .field("region", &self.region)
            .finish()
    }
}

/// Host memory model with byte budgets per region.
///
/// `external_bytes == 0` models a board without PSRAM.
#[derive(Clone, Debug)]
pub struct HostMemory {
    external_remaining: usize,
    internal_remaining: usize,
    external_present: bool,
}

impl HostMemory {
    pub fn new(external_bytes: usize, internal_bytes: usize) -> Self {
        Self {
            external_remaining: external_bytes,
            internal_remaining: internal_bytes,
            external_present: external_bytes > 0,
        }
    }

    pub fn remaining(&self, region: MemoryRegion) -> usize {
        match region {
            MemoryRegion::External => self.external_remaining,
            MemoryRegion::Internal => self.internal_remaining,
        }
    }
}

impl MemoryProvider for HostMemory {
    fn external_available(&self) -> bool {
        self.external_present
    }

    fn allocate(&mut self, region: MemoryRegion, size: usize) -> Option<Box<[u8]>> {
        let budget = match region {
            MemoryRegion::External if self.external_present => &mut self.external_remaining,
            MemoryRegion::External => return None,
            MemoryRegion::Internal => &mut self.internal_remaining,
        };
        if size > *budget {
            return None;
        }
        let mut block = Vec::new();
        block.try_reserve_exact(size).ok()?;
        block.resize(size, 0u8);
        *budget -= size;
        Some(block.into_boxed_slice())
    }
}
