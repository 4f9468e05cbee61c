use std::sync::Arc;

use indexmap::IndexMap;
use smallvec::SmallVec;
use tracing::trace;

use crate::{
    backend::allocator::{BufferManager, BufferMapper},
    utils::{Buffer as BufferCoords, Rectangle},
};

/// Minimal amount of mappings a plane caches
pub const MIN_BUFFER_COUNT: usize = 2;

/// Amount of mappings kept alive for buffers the hardware might still scan out
///
/// The current and the previous buffer have to stay mapped, as the previous one
/// is read until the flip to the current one latched.
pub const ACTIVE_RING_CAP: usize = 2;

/// Drop a reference to a mapping, unmapping it if this was the last one
pub(crate) fn release_mapping<B: BufferManager>(buffers: &mut B, mapper: Arc<B::Mapper>) -> bool {
    match Arc::try_unwrap(mapper) {
        Ok(mapper) => {
            trace!(key = mapper.key(), "unmapping buffer");
            buffers.unmap(mapper);
            true
        }
        Err(_) => false,
    }
}

/// A cached mapping and the crop last used with it
#[derive(Debug)]
pub struct CachedMapping<M> {
    pub(crate) mapper: Arc<M>,
    pub(crate) crop: Rectangle<i32, BufferCoords>,
}

impl<M> CachedMapping<M> {
    /// The mapping
    pub fn mapper(&self) -> &M {
        &self.mapper
    }

    /// Source crop last set for this mapping
    pub fn crop(&self) -> Rectangle<i32, BufferCoords> {
        self.crop
    }
}

/// Bounded cache of buffer mappings, keyed by [`DataBuffer::key`](crate::backend::allocator::DataBuffer::key)
///
/// The cache never evicts single entries. Once it is full and a new buffer shows up,
/// all entries are dropped at once. Compositor planes cycle through a small and mostly
/// stable set of buffers, so a full cache usually means the client switched buffers entirely.
#[derive(Debug)]
pub struct BufferCache<M> {
    capacity: usize,
    entries: IndexMap<u64, CachedMapping<M>>,
}

impl<M: BufferMapper> BufferCache<M> {
    /// Create a new cache holding up to `capacity` mappings
    ///
    /// The capacity is raised to [`MIN_BUFFER_COUNT`] if smaller.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(MIN_BUFFER_COUNT);
        BufferCache {
            capacity,
            entries: IndexMap::with_capacity(capacity),
        }
    }

    /// Maximum amount of cached mappings
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Current amount of cached mappings
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing is cached
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns true if inserting another mapping requires a flush
    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.capacity
    }

    /// Returns true if a mapping for `key` is cached
    pub fn contains(&self, key: u64) -> bool {
        self.entries.contains_key(&key)
    }

    /// Look up the mapping for `key`
    pub fn get(&self, key: u64) -> Option<&CachedMapping<M>> {
        self.entries.get(&key)
    }

    pub(crate) fn get_mut(&mut self, key: u64) -> Option<&mut CachedMapping<M>> {
        self.entries.get_mut(&key)
    }

    pub(crate) fn insert(&mut self, key: u64, mapping: CachedMapping<M>) {
        debug_assert!(!self.is_full());
        self.entries.insert(key, mapping);
    }

    /// Drop every cached mapping
    ///
    /// Mappings still referenced by the active ring stay mapped until the ring releases them.
    pub(crate) fn flush<B: BufferManager<Mapper = M>>(&mut self, buffers: &mut B) {
        if self.entries.is_empty() {
            return;
        }
        trace!(entries = self.entries.len(), "invalidating buffer cache");
        for (_, mapping) in self.entries.drain(..) {
            release_mapping(buffers, mapping.mapper);
        }
    }
}

/// FIFO of the mappings the hardware may still be reading from
#[derive(Debug)]
pub struct ActiveRing<M> {
    entries: SmallVec<[Arc<M>; ACTIVE_RING_CAP]>,
}

impl<M> Default for ActiveRing<M> {
    fn default() -> Self {
        ActiveRing {
            entries: SmallVec::new(),
        }
    }
}

impl<M: BufferMapper> ActiveRing<M> {
    /// Number of active mappings
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if no mapping is active
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns true if the mapping for `key` is active
    pub fn contains(&self, key: u64) -> bool {
        self.entries.iter().any(|m| m.key() == key)
    }

    pub(crate) fn get(&self, key: u64) -> Option<&Arc<M>> {
        self.entries.iter().find(|m| m.key() == key)
    }

    /// Keys of the active mappings, oldest first
    pub fn keys(&self) -> impl Iterator<Item = u64> + '_ {
        self.entries.iter().map(|m| m.key())
    }

    /// Mark `mapper` as the newest active mapping
    ///
    /// If the ring is full the oldest entry is released first. A mapping that is
    /// already active is moved to the newest position instead.
    pub(crate) fn push<B: BufferManager<Mapper = M>>(&mut self, buffers: &mut B, mapper: Arc<M>) {
        let key = mapper.key();
        if let Some(pos) = self.entries.iter().position(|m| m.key() == key) {
            let existing = self.entries.remove(pos);
            self.entries.push(existing);
            return;
        }

        if self.entries.len() >= ACTIVE_RING_CAP {
            let oldest = self.entries.remove(0);
            release_mapping(buffers, oldest);
        }
        self.entries.push(mapper);
    }

    /// Release every active mapping
    pub(crate) fn clear<B: BufferManager<Mapper = M>>(&mut self, buffers: &mut B) {
        if self.entries.is_empty() {
            return;
        }
        trace!("invalidating active buffers");
        for mapper in self.entries.drain(..) {
            release_mapping(buffers, mapper);
        }
    }
}
