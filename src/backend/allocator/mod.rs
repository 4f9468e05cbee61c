//! Buffer locking and mapping.
//!
//! Collection of the traits planes use to get hold of the client buffers they scan out.
//! The actual mapping (e.g. into a GTT or IOMMU address space) is done by a [`BufferManager`]
//! provided by the display driver integration; planes only keep track of the mappings they
//! created and release them when they are sure the hardware stopped reading from them.
//!
//! Lifecycle of a buffer as seen by a plane:
//!
//! 1. [`BufferManager::lock`] turns a [`BufferHandle`] into a [`DataBuffer`],
//! 2. [`BufferManager::map`] creates a [`BufferMapper`] for it, which is cached by the plane,
//! 3. [`BufferManager::unlock`] releases the lock again right after mapping,
//! 4. [`BufferManager::unmap`] is called once the plane dropped its last reference to the mapping.

use std::fmt;

pub use drm_fourcc::{DrmFourcc as Fourcc, DrmModifier as Modifier};

/// Opaque handle identifying a client buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferHandle(pub u64);

impl fmt::Display for BufferHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl From<u64> for BufferHandle {
    fn from(raw: u64) -> Self {
        BufferHandle(raw)
    }
}

/// A locked buffer
pub trait DataBuffer {
    /// Stable key identifying the underlying memory
    ///
    /// Two handles referring to the same memory have to return the same key,
    /// it is used to look up existing mappings.
    fn key(&self) -> u64;
    /// Width of the two-dimensional buffer
    fn width(&self) -> u32;
    /// Height of the two-dimensional buffer
    fn height(&self) -> u32;
    /// Size (w x h) of the two-dimensional buffer
    fn size(&self) -> (u32, u32) {
        (self.width(), self.height())
    }
    /// Pixel format of the buffer
    fn format(&self) -> Fourcc;
}

/// A mapping of a buffer usable for scan-out
pub trait BufferMapper {
    /// Key of the buffer this mapping was created for
    fn key(&self) -> u64;
}

/// Interface to lock and map buffers
pub trait BufferManager {
    /// Locked buffer type
    type Buffer: DataBuffer;
    /// Mapping type
    type Mapper: BufferMapper;
    /// Error type thrown if locking or mapping fails
    type Error: std::error::Error + Send + Sync + 'static;

    /// Lock the buffer referenced by `handle`
    fn lock(&mut self, handle: BufferHandle) -> Result<Self::Buffer, Self::Error>;
    /// Release a previously locked buffer
    fn unlock(&mut self, buffer: Self::Buffer);
    /// Map a locked buffer for scan-out
    fn map(&mut self, buffer: &Self::Buffer) -> Result<Self::Mapper, Self::Error>;
    /// Destroy a mapping
    fn unmap(&mut self, mapper: Self::Mapper);
}
