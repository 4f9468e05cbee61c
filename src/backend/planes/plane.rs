use std::sync::Arc;

use tracing::{debug, error, trace, warn};

use crate::{
    backend::allocator::{BufferHandle, BufferManager, BufferMapper, DataBuffer},
    utils::{Buffer as BufferCoords, Physical, Rectangle, Size, Transform},
};

use super::{
    cache::{ActiveRing, BufferCache, CachedMapping},
    error::Error,
    ModeQuery, Pipe, PlaneId, PlaneRegisters, PlaneType,
};

bitflags::bitflags! {
    /// Register groups of a plane changed since they were last programmed
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PlaneUpdates: u32 {
        /// Destination rectangle changed
        const POSITION = 1;
        /// Source crop changed
        const SOURCE_CROP = 2;
        /// Transform changed
        const TRANSFORM = 4;
        /// A different buffer is attached
        const BUFFER = 8;
        /// Plane alpha or blend mode changed
        const BLENDING = 16;
        /// Z-slot changed
        const ZORDER = 32;
    }
}

/// How a plane is blended with the planes below it
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlendMode {
    /// No blending, the plane is opaque
    #[default]
    None,
    /// Premultiplied alpha blending
    Premultiplied,
    /// Coverage (non-premultiplied) alpha blending
    Coverage,
}

/// Geometry and blending state of a plane
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaneGeometry {
    /// Destination [`Rectangle`] on the pipe
    pub dst: Rectangle<i32, Physical>,
    /// Source [`Rectangle`] of the attached buffer
    pub src: Rectangle<i32, BufferCoords>,
    /// Transform for the attached buffer
    pub transform: Transform,
    /// Plane alpha, `0xff` is fully opaque
    pub alpha: u8,
    /// Blend mode
    pub blend: BlendMode,
}

impl Default for PlaneGeometry {
    fn default() -> Self {
        PlaneGeometry {
            dst: Rectangle::default(),
            src: Rectangle::default(),
            transform: Transform::Normal,
            alpha: 0xff,
            blend: BlendMode::None,
        }
    }
}

/// Configuration handed to the register interface when a plane is programmed
#[derive(Debug)]
pub struct PlaneConfig<'a, M> {
    /// Pipe the plane is bound to
    pub pipe: Option<Pipe>,
    /// Geometry of the plane
    pub geometry: PlaneGeometry,
    /// Hardware z-slot
    pub zorder: Option<u32>,
    /// Mapping of the attached buffer
    pub mapper: Option<&'a M>,
    /// Register groups that changed since the last successful programming
    pub updates: PlaneUpdates,
}

/// Fixed-resolution scaling of a plane
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForcedScaling {
    /// Size of the framebuffer positions are given in
    pub source: Size<i32, Physical>,
    /// Physical size of the pipe
    pub target: Size<i32, Physical>,
}

/// A hardware compositing plane
///
/// Besides its geometry a plane owns the mappings of the buffers it scanned out.
/// Mappings are cached (see [`BufferCache`]) and the mappings of the current and the previous
/// buffer are kept alive in an [`ActiveRing`], until the plane is [`reset`](Plane::reset).
#[derive(Debug)]
pub struct Plane<M> {
    id: PlaneId,
    pipe: Option<Pipe>,
    enabled: bool,
    desynced: bool,
    zorder: Option<u32>,
    mode: Size<i32, Physical>,
    scaling: Option<ForcedScaling>,
    geometry: PlaneGeometry,
    updates: PlaneUpdates,
    current: Option<(BufferHandle, u64)>,
    cache: BufferCache<M>,
    active: ActiveRing<M>,
}

impl<M: BufferMapper> Plane<M> {
    /// Create a new disabled plane caching up to `buffer_count` mappings
    pub fn new(id: PlaneId, buffer_count: usize) -> Self {
        Plane {
            id,
            pipe: None,
            enabled: false,
            desynced: false,
            zorder: None,
            mode: Size::default(),
            scaling: None,
            geometry: PlaneGeometry::default(),
            updates: PlaneUpdates::all(),
            current: None,
            cache: BufferCache::new(buffer_count),
            active: ActiveRing::default(),
        }
    }

    /// Identifier of this plane
    pub fn id(&self) -> PlaneId {
        self.id
    }

    /// Type of this plane
    pub fn plane_type(&self) -> PlaneType {
        self.id.type_
    }

    /// Pipe this plane is currently bound to
    pub fn pipe(&self) -> Option<Pipe> {
        self.pipe
    }

    /// Returns true if the plane was enabled and not disabled since
    ///
    /// This reflects the issued commands, not the latched hardware state,
    /// see [`Plane::is_disabled`].
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Returns true if a failed register access left the hardware state unknown
    pub fn is_desynced(&self) -> bool {
        self.desynced
    }

    /// Current z-slot
    pub fn zorder(&self) -> Option<u32> {
        self.zorder
    }

    /// Mode size the destination rectangle is clamped to
    pub fn mode(&self) -> Size<i32, Physical> {
        self.mode
    }

    /// Forced scaling of the pipe this plane is bound to
    pub fn forced_scaling(&self) -> Option<ForcedScaling> {
        self.scaling
    }

    /// Current geometry
    pub fn geometry(&self) -> PlaneGeometry {
        self.geometry
    }

    /// Register groups waiting to be programmed
    pub fn pending_updates(&self) -> PlaneUpdates {
        self.updates
    }

    /// Handle of the attached buffer
    pub fn current_buffer(&self) -> Option<BufferHandle> {
        self.current.map(|(handle, _)| handle)
    }

    /// Cached mappings
    pub fn cache(&self) -> &BufferCache<M> {
        &self.cache
    }

    /// Mappings possibly still read by the hardware
    pub fn active_buffers(&self) -> &ActiveRing<M> {
        &self.active
    }

    /// Bind this plane to `pipe`
    ///
    /// The mode of the pipe bounds all future destination rectangles. If `scaling_source` is set,
    /// the pipe scans out a framebuffer of that size scaled to its physical size; destination
    /// rectangles are then given in framebuffer coordinates and rescaled.
    pub fn bind_to_pipe<Q: ModeQuery>(
        &mut self,
        pipe: Pipe,
        modes: &Q,
        scaling_source: Option<Size<i32, Physical>>,
    ) {
        trace!(plane = ?self.id, ?pipe, "binding plane to pipe");
        if self.pipe != Some(pipe) {
            self.updates = PlaneUpdates::all();
        }
        self.pipe = Some(pipe);

        self.mode = match modes.mode_info(pipe) {
            Some(mode) => mode,
            None => {
                error!(?pipe, "failed to get mode info");
                Size::default()
            }
        };

        self.scaling = match (scaling_source, modes.physical_size(pipe)) {
            (Some(source), Some(target)) => {
                self.mode = target;
                Some(ForcedScaling { source, target })
            }
            (Some(_), None) => {
                warn!(?pipe, "forced scaling requested, but physical size is unknown");
                None
            }
            (None, _) => None,
        };
    }

    /// Update the geometry of this plane
    ///
    /// Only the changed register groups are marked for programming. The destination is clamped
    /// to the current mode, out-of-range rectangles are never rejected.
    pub fn set_geometry(
        &mut self,
        dst: Rectangle<i32, Physical>,
        src: Rectangle<i32, BufferCoords>,
        transform: Transform,
        alpha: u8,
        blend: BlendMode,
    ) {
        let mut dst = match self.scaling {
            Some(scaling) => dst.rescale(scaling.source, scaling.target),
            None => dst,
        };
        if !self.mode.is_empty() {
            dst = dst.clamp_to(self.mode);
        }
        trace!(plane = ?self.id, ?dst, ?src, ?transform, alpha, ?blend, "set geometry");

        let current = &mut self.geometry;
        if current.dst != dst {
            current.dst = dst;
            self.updates |= PlaneUpdates::POSITION;
        }
        if current.src != src {
            current.src = src;
            self.updates |= PlaneUpdates::SOURCE_CROP;
        }
        if current.transform != transform {
            current.transform = transform;
            self.updates |= PlaneUpdates::TRANSFORM;
        }
        if current.alpha != alpha || current.blend != blend {
            current.alpha = alpha;
            current.blend = blend;
            self.updates |= PlaneUpdates::BLENDING;
        }
    }

    /// Attach the buffer referenced by `handle`
    ///
    /// Setting the already attached buffer without any pending updates does nothing.
    pub fn set_buffer<B>(&mut self, buffers: &mut B, handle: BufferHandle) -> Result<(), Error>
    where
        B: BufferManager<Mapper = M>,
    {
        if self.current_buffer() != Some(handle) {
            self.updates |= PlaneUpdates::BUFFER;
        }
        if self.updates.is_empty() {
            return Ok(());
        }

        let buffer = buffers.lock(handle).map_err(|err| {
            error!(plane = ?self.id, %handle, "failed to lock buffer: {}", err);
            Error::LockFailed {
                handle,
                source: Box::new(err),
            }
        })?;
        let key = buffer.key();
        let crop = self.geometry.src;

        let cached = self.cache.get_mut(key).map(|mapping| {
            trace!(key, "got mapper in cache, updating source crop");
            mapping.crop = crop;
            mapping.mapper.clone()
        });
        let mapper = match cached {
            Some(mapper) => mapper,
            None => {
                trace!(key, "unmapped buffer, mapping...");
                if self.cache.is_full() {
                    self.cache.flush(buffers);
                }
                // a buffer still in the active ring keeps its mapping
                let mapped = match self.active.get(key) {
                    Some(mapper) => Ok(mapper.clone()),
                    None => buffers.map(&buffer).map(Arc::new),
                };
                match mapped {
                    Ok(mapper) => {
                        self.cache.insert(
                            key,
                            CachedMapping {
                                mapper: mapper.clone(),
                                crop,
                            },
                        );
                        mapper
                    }
                    Err(err) => {
                        error!(plane = ?self.id, %handle, "failed to map buffer: {}", err);
                        buffers.unlock(buffer);
                        return Err(Error::MapFailed {
                            handle,
                            source: Box::new(err),
                        });
                    }
                }
            }
        };

        buffers.unlock(buffer);
        self.current = Some((handle, key));
        self.active.push(buffers, mapper);
        Ok(())
    }

    /// Issue the hardware enable command
    ///
    /// Does nothing if the plane is already enabled and in sync with the hardware.
    pub fn enable<R: PlaneRegisters>(&mut self, registers: &mut R) -> Result<(), Error> {
        if self.enabled && !self.desynced {
            return Ok(());
        }
        let Some(pipe) = self.pipe else {
            return Err(Error::PlaneUnavailable(self.id));
        };
        registers.enable(self.id, pipe).map_err(|err| {
            warn!(plane = ?self.id, "plane enabling failed: {}", err);
            self.desynced = true;
            Error::Register {
                plane: self.id,
                errmsg: "Failed to enable plane",
                source: Box::new(err),
            }
        })?;
        debug!(plane = ?self.id, ?pipe, "plane enabled");
        self.enabled = true;
        Ok(())
    }

    /// Issue the hardware disable command
    ///
    /// The command latches asynchronously, use [`Plane::is_disabled`] to find out
    /// when the hardware actually stopped scanning out.
    pub fn disable<R: PlaneRegisters>(&mut self, registers: &mut R) -> Result<(), Error> {
        registers.disable(self.id).map_err(|err| {
            warn!(plane = ?self.id, "plane disabling failed: {}", err);
            self.desynced = true;
            Error::Register {
                plane: self.id,
                errmsg: "Failed to disable plane",
                source: Box::new(err),
            }
        })?;
        debug!(plane = ?self.id, "plane disabled");
        self.enabled = false;
        Ok(())
    }

    /// Query whether the hardware latched the disable of this plane
    ///
    /// A failed query is reported as not disabled.
    pub fn is_disabled<R: PlaneRegisters>(&self, registers: &mut R) -> bool {
        match registers.is_disabled(self.id) {
            Ok(disabled) => disabled,
            Err(err) => {
                warn!(plane = ?self.id, "plane state query failed: {}", err);
                false
            }
        }
    }

    /// Program the hardware z-slot of this plane
    pub fn set_zorder<R: PlaneRegisters>(&mut self, registers: &mut R, slot: u32) -> Result<(), Error> {
        let Some(pipe) = self.pipe else {
            return Err(Error::PlaneUnavailable(self.id));
        };
        if self.zorder != Some(slot) {
            self.updates |= PlaneUpdates::ZORDER;
        }
        registers.set_zorder(self.id, pipe, slot).map_err(|err| {
            warn!(plane = ?self.id, slot, "z-order programming failed: {}", err);
            self.desynced = true;
            Error::Register {
                plane: self.id,
                errmsg: "Failed to set z-order",
                source: Box::new(err),
            }
        })?;
        self.zorder = Some(slot);
        Ok(())
    }

    /// Write all pending register groups to the hardware
    ///
    /// Pending updates are cleared only if the write succeeded.
    pub fn program<R: PlaneRegisters>(&mut self, registers: &mut R) -> Result<(), Error> {
        if self.updates.is_empty() {
            return Ok(());
        }
        if self.desynced {
            return Err(Error::PlaneUnavailable(self.id));
        }

        let mapper = self
            .current
            .and_then(|(_, key)| self.cache.get(key))
            .map(|mapping| mapping.mapper());
        let config = PlaneConfig {
            pipe: self.pipe,
            geometry: self.geometry,
            zorder: self.zorder,
            mapper,
            updates: self.updates,
        };
        if let Err(err) = registers.program(self.id, &config) {
            warn!(plane = ?self.id, "plane programming failed: {}", err);
            self.desynced = true;
            return Err(Error::Register {
                plane: self.id,
                errmsg: "Failed to program plane",
                source: Box::new(err),
            });
        }
        self.updates = PlaneUpdates::empty();
        Ok(())
    }

    /// Drop all cached and active mappings
    ///
    /// Only call this once [`Plane::is_disabled`] confirmed the hardware no longer
    /// references any of the buffers.
    pub fn reset<B: BufferManager<Mapper = M>>(&mut self, buffers: &mut B) {
        trace!(plane = ?self.id, "resetting plane");
        self.cache.flush(buffers);
        self.active.clear(buffers);
        self.current = None;
        self.zorder = None;
        self.enabled = false;
        self.desynced = false;
        self.updates = PlaneUpdates::all();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::{BlendMode, Plane, PlaneUpdates};
    use crate::{
        backend::{
            allocator::BufferHandle,
            planes::{
                dummy::{DummyBufferManager, DummyMapper, DummyModes, DummyRegisters},
                Error, Pipe, PlaneId, PlaneType,
            },
        },
        utils::{Rectangle, Size, Transform},
    };

    fn sprite() -> Plane<DummyMapper> {
        Plane::new(PlaneId::new(PlaneType::Sprite, 0), 3)
    }

    #[test]
    fn cache_hit_reuses_mapping() {
        let mut buffers = DummyBufferManager::new();
        let mut plane = sprite();

        plane.set_buffer(&mut buffers, BufferHandle(1)).unwrap();
        plane.set_buffer(&mut buffers, BufferHandle(2)).unwrap();
        plane.set_buffer(&mut buffers, BufferHandle(1)).unwrap();

        assert_eq!(buffers.map_calls(), 2);
        assert_eq!(plane.cache().len(), 2);
        assert_eq!(buffers.outstanding_locks(), 0);
    }

    #[test]
    fn full_cache_is_flushed_entirely() {
        let mut buffers = DummyBufferManager::new();
        let mut plane = sprite();

        for handle in 1..=3 {
            plane.set_buffer(&mut buffers, BufferHandle(handle)).unwrap();
        }
        assert_eq!(plane.cache().len(), 3);

        plane.set_buffer(&mut buffers, BufferHandle(4)).unwrap();
        assert_eq!(plane.cache().len(), 1);
        assert!(plane.cache().contains(4));
        // buffer 1 left the ring when 3 was attached and its cache entry is gone now
        assert!(!buffers.is_mapped(1));
        // 3 was the previous buffer, the ring keeps it mapped
        assert!(buffers.is_mapped(3));
        assert!(buffers.is_mapped(4));
        assert!(!buffers.is_mapped(2));
    }

    #[test]
    fn previous_buffer_stays_mapped() {
        let mut buffers = DummyBufferManager::new();
        let mut plane = Plane::new(PlaneId::new(PlaneType::Sprite, 0), 2);

        plane.set_buffer(&mut buffers, BufferHandle(1)).unwrap();
        plane.set_buffer(&mut buffers, BufferHandle(2)).unwrap();
        // cache full: flushed, the ring only keeps the previous buffer mapped
        plane.set_buffer(&mut buffers, BufferHandle(3)).unwrap();

        assert!(!buffers.is_mapped(1));
        assert!(buffers.is_mapped(2));
        assert!(buffers.is_mapped(3));
        assert_eq!(plane.active_buffers().keys().collect::<Vec<_>>(), vec![2, 3]);
    }

    #[test]
    fn reattached_buffer_becomes_newest() {
        let mut buffers = DummyBufferManager::new();
        let mut plane = sprite();

        plane.set_buffer(&mut buffers, BufferHandle(1)).unwrap();
        plane.set_buffer(&mut buffers, BufferHandle(2)).unwrap();
        plane.set_buffer(&mut buffers, BufferHandle(1)).unwrap();
        assert_eq!(plane.active_buffers().keys().collect::<Vec<_>>(), vec![2, 1]);
    }

    #[test]
    fn active_buffer_is_not_mapped_twice() {
        let mut buffers = DummyBufferManager::new();
        let mut plane = Plane::new(PlaneId::new(PlaneType::Sprite, 0), 2);

        for handle in [1, 2, 3, 2] {
            plane.set_buffer(&mut buffers, BufferHandle(handle)).unwrap();
        }
        assert_eq!(buffers.map_calls(), 3);
        let cached = plane.cache().get(2).unwrap();
        assert!(Arc::ptr_eq(&cached.mapper, plane.active_buffers().get(2).unwrap()));

        plane.set_buffer(&mut buffers, BufferHandle(4)).unwrap();
        assert_eq!(plane.active_buffers().keys().collect::<Vec<_>>(), vec![2, 4]);
        assert!(buffers.is_mapped(2));
        assert!(!buffers.is_mapped(3));
        assert_eq!(buffers.unmap_calls(), 2);
    }

    #[test]
    fn aliased_handles_share_mapping() {
        let mut buffers = DummyBufferManager::new();
        buffers.alias(BufferHandle(10), 1);
        let mut plane = sprite();

        plane.set_buffer(&mut buffers, BufferHandle(1)).unwrap();
        plane.set_buffer(&mut buffers, BufferHandle(10)).unwrap();

        assert_eq!(buffers.map_calls(), 1);
        assert_eq!(plane.cache().len(), 1);
        assert_eq!(plane.current_buffer(), Some(BufferHandle(10)));
    }

    #[test]
    fn missing_mode_leaves_geometry_unclamped() {
        let mut modes = DummyModes::new();
        modes.remove_pipe(Pipe::EXTERNAL);
        let mut plane = sprite();
        plane.bind_to_pipe(Pipe::EXTERNAL, &modes, None);
        assert!(plane.mode().is_empty());

        plane.set_geometry(
            Rectangle::from_loc_and_size((-5, 3000), (4000, 200)),
            Rectangle::from_loc_and_size((0, 0), (4000, 200)),
            Transform::Normal,
            0xff,
            BlendMode::None,
        );
        assert_eq!(
            plane.geometry().dst,
            Rectangle::from_loc_and_size((-5, 3000), (4000, 200))
        );
    }

    #[test]
    fn unchanged_buffer_is_not_locked_again() {
        let mut buffers = DummyBufferManager::new();
        let mut registers = DummyRegisters::new();
        let modes = DummyModes::new();
        let mut plane = sprite();
        plane.bind_to_pipe(Pipe::PRIMARY, &modes, None);

        plane.set_buffer(&mut buffers, BufferHandle(7)).unwrap();
        plane.program(&mut registers).unwrap();
        plane.set_buffer(&mut buffers, BufferHandle(7)).unwrap();

        assert_eq!(buffers.lock_calls(), 1);
    }

    #[test]
    fn lock_and_map_failures() {
        let mut buffers = DummyBufferManager::new();
        buffers.fail_lock(BufferHandle(5));
        buffers.fail_map(BufferHandle(6));
        let mut plane = sprite();

        assert!(matches!(
            plane.set_buffer(&mut buffers, BufferHandle(5)),
            Err(Error::LockFailed { handle: BufferHandle(5), .. })
        ));
        assert!(matches!(
            plane.set_buffer(&mut buffers, BufferHandle(6)),
            Err(Error::MapFailed { handle: BufferHandle(6), .. })
        ));
        assert_eq!(buffers.outstanding_locks(), 0);
        assert!(plane.cache().is_empty());
        assert_eq!(plane.current_buffer(), None);
    }

    #[test]
    fn geometry_is_clamped_and_tracked() {
        let modes = DummyModes::new();
        let mut plane = sprite();
        plane.bind_to_pipe(Pipe::PRIMARY, &modes, None);
        let mut registers = DummyRegisters::new();
        plane.program(&mut registers).unwrap();
        assert!(plane.pending_updates().is_empty());

        plane.set_geometry(
            Rectangle::from_loc_and_size((-5, 1000), (200, 200)),
            Rectangle::from_loc_and_size((0, 0), (200, 200)),
            Transform::Normal,
            0xff,
            BlendMode::None,
        );
        assert_eq!(
            plane.geometry().dst,
            Rectangle::from_loc_and_size((0, 1000), (200, 80))
        );
        assert_eq!(
            plane.pending_updates(),
            PlaneUpdates::POSITION | PlaneUpdates::SOURCE_CROP
        );

        plane.program(&mut registers).unwrap();
        plane.set_geometry(
            Rectangle::from_loc_and_size((0, 1000), (200, 80)),
            Rectangle::from_loc_and_size((0, 0), (200, 200)),
            Transform::_90,
            0x80,
            BlendMode::Coverage,
        );
        assert_eq!(
            plane.pending_updates(),
            PlaneUpdates::TRANSFORM | PlaneUpdates::BLENDING
        );
    }

    #[test]
    fn forced_scaling_rescales_position() {
        let mut modes = DummyModes::new();
        modes.set_pipe(Pipe::EXTERNAL, Size::from((1280, 720)), Size::from((1920, 1080)));
        let mut plane = sprite();
        plane.bind_to_pipe(Pipe::EXTERNAL, &modes, Some(Size::from((1280, 720))));

        assert_eq!(plane.mode(), Size::from((1920, 1080)));
        plane.set_geometry(
            Rectangle::from_loc_and_size((0, 0), (1280, 720)),
            Rectangle::from_loc_and_size((0, 0), (1280, 720)),
            Transform::Normal,
            0xff,
            BlendMode::None,
        );
        assert_eq!(
            plane.geometry().dst,
            Rectangle::from_loc_and_size((0, 0), (1920, 1080))
        );
    }

    #[test]
    fn enable_is_idempotent() {
        let modes = DummyModes::new();
        let mut registers = DummyRegisters::new();
        let mut plane = sprite();
        plane.bind_to_pipe(Pipe::PRIMARY, &modes, None);

        plane.enable(&mut registers).unwrap();
        plane.enable(&mut registers).unwrap();
        assert_eq!(registers.enable_calls(plane.id()), 1);
    }

    #[test]
    fn failed_register_write_desyncs() {
        let modes = DummyModes::new();
        let mut registers = DummyRegisters::new();
        let mut plane = sprite();
        plane.bind_to_pipe(Pipe::PRIMARY, &modes, None);
        registers.fail_writes(plane.id());

        assert!(matches!(plane.enable(&mut registers), Err(Error::Register { .. })));
        assert!(plane.is_desynced());
        assert!(!plane.is_enabled());
    }

    #[test]
    fn reset_unmaps_everything() {
        let mut buffers = DummyBufferManager::new();
        let mut plane = sprite();
        plane.set_buffer(&mut buffers, BufferHandle(1)).unwrap();
        plane.set_buffer(&mut buffers, BufferHandle(2)).unwrap();

        plane.reset(&mut buffers);
        assert_eq!(buffers.mapped_count(), 0);
        assert!(plane.cache().is_empty());
        assert!(plane.active_buffers().is_empty());
        assert_eq!(plane.current_buffer(), None);
    }
}
