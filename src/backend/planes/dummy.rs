#![allow(missing_docs)]
//! In-memory collaborators for tests and benchmarks

use std::collections::{HashMap, HashSet};

use crate::{
    backend::allocator::{BufferHandle, BufferManager, BufferMapper, DataBuffer, Fourcc},
    utils::{Physical, Size},
};

use super::{ModeQuery, Pipe, PlaneConfig, PlaneId, PlaneRegisters, PlaneUpdates};

#[derive(Debug, thiserror::Error)]
#[error("dummy backend failure")]
pub struct DummyError;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DummyPlaneState {
    pub enabled: bool,
    pub pending_disable: Option<u32>,
    pub pipe: Option<Pipe>,
    pub zorder: Option<u32>,
    pub enable_calls: usize,
    pub disable_calls: usize,
    pub program_calls: usize,
    pub last_updates: Option<PlaneUpdates>,
    pub last_buffer: Option<u64>,
}

/// Register interface latching disables after a configurable number of vblanks
#[derive(Debug, Default)]
pub struct DummyRegisters {
    planes: HashMap<PlaneId, DummyPlaneState>,
    disable_latency: u32,
    failing_writes: HashSet<PlaneId>,
    failing_queries: HashSet<PlaneId>,
}

impl DummyRegisters {
    pub fn new() -> DummyRegisters {
        DummyRegisters::default()
    }

    /// Disables latch after `vblanks` calls to [`DummyRegisters::vblank`]
    pub fn with_disable_latency(mut self, vblanks: u32) -> Self {
        self.disable_latency = vblanks;
        self
    }

    pub fn vblank(&mut self) {
        for state in self.planes.values_mut() {
            if let Some(remaining) = state.pending_disable.as_mut() {
                *remaining = remaining.saturating_sub(1);
                if *remaining == 0 {
                    state.pending_disable = None;
                    state.enabled = false;
                }
            }
        }
    }

    pub fn fail_writes(&mut self, plane: PlaneId) {
        self.failing_writes.insert(plane);
    }

    pub fn restore_writes(&mut self, plane: PlaneId) {
        self.failing_writes.remove(&plane);
    }

    pub fn fail_queries(&mut self, plane: PlaneId) {
        self.failing_queries.insert(plane);
    }

    pub fn state(&self, plane: PlaneId) -> DummyPlaneState {
        self.planes.get(&plane).cloned().unwrap_or_default()
    }

    pub fn is_scanning_out(&self, plane: PlaneId) -> bool {
        self.state(plane).enabled
    }

    pub fn enable_calls(&self, plane: PlaneId) -> usize {
        self.state(plane).enable_calls
    }

    pub fn disable_calls(&self, plane: PlaneId) -> usize {
        self.state(plane).disable_calls
    }

    pub fn zorder(&self, plane: PlaneId) -> Option<u32> {
        self.state(plane).zorder
    }

    fn write(&mut self, plane: PlaneId) -> Result<&mut DummyPlaneState, DummyError> {
        if self.failing_writes.contains(&plane) {
            return Err(DummyError);
        }
        Ok(self.planes.entry(plane).or_default())
    }
}

impl PlaneRegisters for DummyRegisters {
    type Error = DummyError;

    fn enable(&mut self, plane: PlaneId, pipe: Pipe) -> Result<(), Self::Error> {
        let state = self.write(plane)?;
        state.enabled = true;
        state.pending_disable = None;
        state.pipe = Some(pipe);
        state.enable_calls += 1;
        Ok(())
    }

    fn disable(&mut self, plane: PlaneId) -> Result<(), Self::Error> {
        let latency = self.disable_latency;
        let state = self.write(plane)?;
        state.disable_calls += 1;
        if latency == 0 {
            state.enabled = false;
        } else if state.enabled && state.pending_disable.is_none() {
            state.pending_disable = Some(latency);
        }
        Ok(())
    }

    fn is_disabled(&mut self, plane: PlaneId) -> Result<bool, Self::Error> {
        if self.failing_queries.contains(&plane) {
            return Err(DummyError);
        }
        Ok(!self.state(plane).enabled)
    }

    fn set_zorder(&mut self, plane: PlaneId, pipe: Pipe, slot: u32) -> Result<(), Self::Error> {
        let state = self.write(plane)?;
        state.pipe = Some(pipe);
        state.zorder = Some(slot);
        Ok(())
    }

    fn program<M: BufferMapper>(&mut self, plane: PlaneId, config: &PlaneConfig<'_, M>) -> Result<(), Self::Error> {
        let state = self.write(plane)?;
        state.program_calls += 1;
        state.last_updates = Some(config.updates);
        state.last_buffer = config.mapper.map(|mapper| mapper.key());
        Ok(())
    }
}

/// Mode query with a fixed mode per pipe
#[derive(Debug)]
pub struct DummyModes {
    pipes: HashMap<Pipe, (Size<i32, Physical>, Size<i32, Physical>)>,
}

impl DummyModes {
    /// Both reference pipes driving 1920x1080
    pub fn new() -> DummyModes {
        let mut pipes = HashMap::new();
        let fhd = Size::from((1920, 1080));
        pipes.insert(Pipe::PRIMARY, (fhd, fhd));
        pipes.insert(Pipe::EXTERNAL, (fhd, fhd));
        DummyModes { pipes }
    }

    pub fn set_pipe(&mut self, pipe: Pipe, mode: Size<i32, Physical>, physical: Size<i32, Physical>) {
        self.pipes.insert(pipe, (mode, physical));
    }

    pub fn remove_pipe(&mut self, pipe: Pipe) {
        self.pipes.remove(&pipe);
    }
}

impl Default for DummyModes {
    fn default() -> Self {
        Self::new()
    }
}

impl ModeQuery for DummyModes {
    fn mode_info(&self, pipe: Pipe) -> Option<Size<i32, Physical>> {
        self.pipes.get(&pipe).map(|(mode, _)| *mode)
    }

    fn physical_size(&self, pipe: Pipe) -> Option<Size<i32, Physical>> {
        self.pipes.get(&pipe).map(|(_, physical)| *physical)
    }
}

#[derive(Debug)]
pub struct DummyBuffer {
    handle: BufferHandle,
    key: u64,
}

impl DataBuffer for DummyBuffer {
    fn key(&self) -> u64 {
        self.key
    }

    fn width(&self) -> u32 {
        64
    }

    fn height(&self) -> u32 {
        64
    }

    fn format(&self) -> Fourcc {
        Fourcc::Argb8888
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct DummyMapper {
    key: u64,
}

impl BufferMapper for DummyMapper {
    fn key(&self) -> u64 {
        self.key
    }
}

/// Buffer manager counting locks and mappings
///
/// Buffer keys equal the handle value unless an alias was registered.
#[derive(Debug, Default)]
pub struct DummyBufferManager {
    aliases: HashMap<BufferHandle, u64>,
    failing_locks: HashSet<BufferHandle>,
    failing_maps: HashSet<BufferHandle>,
    mapped: HashMap<u64, usize>,
    lock_calls: usize,
    map_calls: usize,
    unmap_calls: usize,
    outstanding_locks: usize,
}

impl DummyBufferManager {
    pub fn new() -> DummyBufferManager {
        DummyBufferManager::default()
    }

    /// Let `handle` refer to the memory of buffer `key`
    pub fn alias(&mut self, handle: BufferHandle, key: u64) {
        self.aliases.insert(handle, key);
    }

    pub fn fail_lock(&mut self, handle: BufferHandle) {
        self.failing_locks.insert(handle);
    }

    pub fn fail_map(&mut self, handle: BufferHandle) {
        self.failing_maps.insert(handle);
    }

    pub fn lock_calls(&self) -> usize {
        self.lock_calls
    }

    pub fn map_calls(&self) -> usize {
        self.map_calls
    }

    pub fn unmap_calls(&self) -> usize {
        self.unmap_calls
    }

    pub fn outstanding_locks(&self) -> usize {
        self.outstanding_locks
    }

    pub fn is_mapped(&self, key: u64) -> bool {
        self.mapped.contains_key(&key)
    }

    /// Number of live mappings
    pub fn mapped_count(&self) -> usize {
        self.mapped.values().sum()
    }
}

impl BufferManager for DummyBufferManager {
    type Buffer = DummyBuffer;
    type Mapper = DummyMapper;
    type Error = DummyError;

    fn lock(&mut self, handle: BufferHandle) -> Result<DummyBuffer, DummyError> {
        if self.failing_locks.contains(&handle) {
            return Err(DummyError);
        }
        self.lock_calls += 1;
        self.outstanding_locks += 1;
        let key = self.aliases.get(&handle).copied().unwrap_or(handle.0);
        Ok(DummyBuffer { handle, key })
    }

    fn unlock(&mut self, _buffer: DummyBuffer) {
        self.outstanding_locks = self.outstanding_locks.saturating_sub(1);
    }

    fn map(&mut self, buffer: &DummyBuffer) -> Result<DummyMapper, DummyError> {
        if self.failing_maps.contains(&buffer.handle) {
            return Err(DummyError);
        }
        self.map_calls += 1;
        *self.mapped.entry(buffer.key).or_default() += 1;
        Ok(DummyMapper { key: buffer.key })
    }

    fn unmap(&mut self, mapper: DummyMapper) {
        self.unmap_calls += 1;
        if let Some(count) = self.mapped.get_mut(&mapper.key) {
            *count -= 1;
            if *count == 0 {
                self.mapped.remove(&mapper.key);
            }
        }
    }
}
