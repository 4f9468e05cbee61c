use std::fmt;

use tracing::{debug, info, info_span, instrument, trace, warn};

use crate::{
    backend::allocator::{BufferHandle, BufferManager},
    utils::{Buffer as BufferCoords, Physical, Rectangle, Transform},
};

use super::{
    error::Error, inventory::PlaneInventory, plane::BlendMode, solver::ZOrderSolver,
    topology::DeviceTopology, zorder::ZOrderConfig, ModeQuery, Pipe, Plane, PlaneId, PlaneRegisters,
    PlaneType,
};

/// Hardware plane manager of a display controller
///
/// Owns all planes of the device together with the collaborators needed to drive them.
/// See the [module documentation](super) for the expected call order during a frame.
pub struct PlaneManager<R, B, Q>
where
    R: PlaneRegisters,
    B: BufferManager,
    Q: ModeQuery,
{
    topology: DeviceTopology,
    inventory: PlaneInventory<B::Mapper>,
    registers: R,
    buffers: B,
    modes: Q,
    span: tracing::Span,
}

impl<R, B, Q> fmt::Debug for PlaneManager<R, B, Q>
where
    R: PlaneRegisters,
    B: BufferManager,
    Q: ModeQuery,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlaneManager")
            .field("topology", &self.topology)
            .field("span", &self.span)
            .finish_non_exhaustive()
    }
}

impl<R, B, Q> PlaneManager<R, B, Q>
where
    R: PlaneRegisters,
    B: BufferManager,
    Q: ModeQuery,
{
    /// Create a new plane manager
    ///
    /// Fails if `topology` is inconsistent. All planes start out free and disabled.
    pub fn new(topology: DeviceTopology, registers: R, buffers: B, modes: Q) -> Result<Self, Error> {
        let span = info_span!("plane_manager");
        let _guard = span.enter();

        topology.validate()?;
        let inventory = PlaneInventory::new(&topology);
        info!(
            primary = topology.plane_count(PlaneType::Primary),
            sprite = topology.plane_count(PlaneType::Sprite),
            overlay = topology.plane_count(PlaneType::Overlay),
            cursor = topology.plane_count(PlaneType::Cursor),
            pipes = topology.pipes.len(),
            "Initializing plane manager"
        );

        drop(_guard);
        Ok(PlaneManager {
            topology,
            inventory,
            registers,
            buffers,
            modes,
            span,
        })
    }

    /// Topology the manager was created with
    pub fn topology(&self) -> &DeviceTopology {
        &self.topology
    }

    /// Availability of all planes
    pub fn inventory(&self) -> &PlaneInventory<B::Mapper> {
        &self.inventory
    }

    /// Access a single plane
    pub fn plane(&self, id: PlaneId) -> Option<&Plane<B::Mapper>> {
        self.inventory.plane(id)
    }

    /// Register interface used by this manager
    pub fn registers(&self) -> &R {
        &self.registers
    }

    /// Mutable access to the register interface
    pub fn registers_mut(&mut self) -> &mut R {
        &mut self.registers
    }

    /// Buffer manager used by this manager
    pub fn buffers(&self) -> &B {
        &self.buffers
    }

    /// Mutable access to the buffer manager
    pub fn buffers_mut(&mut self) -> &mut B {
        &mut self.buffers
    }

    /// Mode query used when binding planes to pipes
    pub fn modes(&self) -> &Q {
        &self.modes
    }

    /// Mutable access to the mode query
    ///
    /// Planes pick up mode changes the next time they are bound to a pipe.
    pub fn modes_mut(&mut self) -> &mut Q {
        &mut self.modes
    }

    /// Check `config` against the limits of `pipe` without allocating anything
    pub fn is_feasible(&self, pipe: Pipe, config: &ZOrderConfig) -> bool {
        ZOrderSolver::new(&self.topology).is_feasible(pipe, config)
    }

    /// Assign hardware planes to the layers of `config`
    ///
    /// See [`ZOrderSolver::assign`].
    #[instrument(level = "debug", parent = &self.span, skip(self, config), fields(layers = config.len()))]
    pub fn assign(&mut self, pipe: Pipe, config: &mut ZOrderConfig) -> Result<Vec<PlaneId>, Error> {
        ZOrderSolver::new(&self.topology).assign(
            pipe,
            config,
            &mut self.inventory,
            &mut self.registers,
            &self.modes,
        )
    }

    /// Free every reclaimed plane the hardware confirmed to be disabled
    ///
    /// Has to be called once per frame, before [`PlaneManager::assign`].
    #[instrument(level = "trace", parent = &self.span, skip(self))]
    pub fn settle_reclaimed(&mut self) -> usize {
        self.inventory
            .settle_reclaimed(&mut self.registers, &mut self.buffers)
    }

    /// Release a plane in use
    #[instrument(level = "trace", parent = &self.span, skip(self))]
    pub fn reclaim(&mut self, plane: PlaneId) -> Result<(), Error> {
        if !self.inventory.is_in_use(plane) {
            return Err(Error::PlaneUnavailable(plane));
        }
        self.inventory.release(plane.type_, plane.index);
        Ok(())
    }

    /// Release every plane in use on `pipe`
    ///
    /// Returns the number of released planes.
    #[instrument(level = "trace", parent = &self.span, skip(self))]
    pub fn reclaim_pipe(&mut self, pipe: Pipe) -> usize {
        let planes = self.planes_on(pipe);
        for id in &planes {
            self.inventory.release(id.type_, id.index);
        }
        planes.len()
    }

    /// Disable every reclaimed plane that was not reused during this frame
    #[instrument(level = "trace", parent = &self.span, skip(self))]
    pub fn disable_reclaimed(&mut self) {
        self.inventory.disable_reclaimed(&mut self.registers);
    }

    /// Number of planes of `type_` that could currently be used on `pipe`
    pub fn available_count(&self, pipe: Pipe, type_: PlaneType) -> usize {
        self.inventory.available_count(pipe, type_)
    }

    /// Returns true if every overlay plane is confirmed to be disabled
    pub fn overlays_disabled(&mut self) -> bool {
        self.inventory.overlays_disabled(&mut self.registers)
    }

    /// Update the geometry of a plane in use
    #[instrument(level = "trace", parent = &self.span, skip(self))]
    pub fn set_geometry(
        &mut self,
        plane: PlaneId,
        dst: Rectangle<i32, Physical>,
        src: Rectangle<i32, BufferCoords>,
        transform: Transform,
        alpha: u8,
        blend: BlendMode,
    ) -> Result<(), Error> {
        self.plane_in_use(plane)?
            .set_geometry(dst, src, transform, alpha, blend);
        Ok(())
    }

    /// Attach a buffer to a plane in use
    ///
    /// On failure the plane keeps its previous buffer, other planes are not affected.
    #[instrument(level = "trace", parent = &self.span, skip(self))]
    pub fn set_buffer(&mut self, plane: PlaneId, handle: BufferHandle) -> Result<(), Error> {
        if !self.inventory.is_in_use(plane) {
            return Err(Error::PlaneUnavailable(plane));
        }
        let Some(target) = self.inventory.plane_mut(plane) else {
            return Err(Error::PlaneUnavailable(plane));
        };
        target.set_buffer(&mut self.buffers, handle)
    }

    /// Write the pending state of every plane in use on `pipe` to the hardware
    ///
    /// A plane failing to program is reclaimed and kept from being allocated again until it is
    /// confirmed to be disabled. All other planes are still programmed, the first error is returned.
    #[instrument(level = "debug", parent = &self.span, skip(self))]
    pub fn program(&mut self, pipe: Pipe) -> Result<(), Error> {
        let mut result = Ok(());
        for id in self.planes_on(pipe) {
            let Some(plane) = self.inventory.plane_mut(id) else {
                continue;
            };
            if let Err(err) = plane.program(&mut self.registers) {
                warn!(plane = %id, "failed to program plane, reclaiming it: {}", err);
                self.inventory.release(id.type_, id.index);
                if result.is_ok() {
                    result = Err(err);
                }
            }
        }
        result
    }

    /// Disable every plane and drop all buffer mappings
    ///
    /// Afterwards every plane is free. This is also done when the manager is dropped.
    #[instrument(level = "debug", parent = &self.span, skip(self))]
    pub fn teardown(&mut self) {
        debug!("tearing down all planes");
        self.inventory.teardown(&mut self.registers, &mut self.buffers);
    }

    fn planes_on(&self, pipe: Pipe) -> Vec<PlaneId> {
        PlaneType::ALL
            .iter()
            .flat_map(|type_| {
                self.inventory
                    .in_use_mask(*type_)
                    .iter()
                    .map(move |index| PlaneId::new(*type_, index))
            })
            .filter(|id| {
                self.inventory
                    .plane(*id)
                    .map(|plane| plane.pipe() == Some(pipe))
                    .unwrap_or(false)
            })
            .collect()
    }

    fn plane_in_use(&mut self, plane: PlaneId) -> Result<&mut Plane<B::Mapper>, Error> {
        if !self.inventory.is_in_use(plane) {
            trace!(%plane, "plane is not in use");
            return Err(Error::PlaneUnavailable(plane));
        }
        self.inventory
            .plane_mut(plane)
            .ok_or(Error::PlaneUnavailable(plane))
    }
}

impl<R, B, Q> Drop for PlaneManager<R, B, Q>
where
    R: PlaneRegisters,
    B: BufferManager,
    Q: ModeQuery,
{
    fn drop(&mut self) {
        let _guard = self.span.enter();
        self.inventory.teardown(&mut self.registers, &mut self.buffers);
    }
}

#[cfg(test)]
mod tests {
    use super::PlaneManager;
    use crate::{
        backend::{
            allocator::BufferHandle,
            planes::{
                dummy::{DummyBufferManager, DummyModes, DummyRegisters},
                BlendMode, DeviceTopology, Error, LogicalLayer, PatternEntry, Pipe, PlaneId, PlaneType,
                ZOrderConfig,
            },
        },
        utils::{Rectangle, Size, Transform},
    };

    type TestManager = PlaneManager<DummyRegisters, DummyBufferManager, DummyModes>;

    fn manager(disable_latency: u32) -> TestManager {
        PlaneManager::new(
            DeviceTopology::reference(),
            DummyRegisters::new().with_disable_latency(disable_latency),
            DummyBufferManager::new(),
            DummyModes::new(),
        )
        .unwrap()
    }

    fn stack(types: &[PlaneType]) -> ZOrderConfig {
        types.iter().copied().map(LogicalLayer::new).collect()
    }

    fn show(manager: &mut TestManager, plane: PlaneId, handle: u64) -> Result<(), Error> {
        manager.set_geometry(
            plane,
            Rectangle::from_loc_and_size((0, 0), (640, 480)),
            Rectangle::from_loc_and_size((0, 0), (640, 480)),
            Transform::Normal,
            0xff,
            BlendMode::Premultiplied,
        )?;
        manager.set_buffer(plane, BufferHandle(handle))
    }

    fn is_send<S: Send>() {}

    #[test]
    fn manager_is_send() {
        is_send::<TestManager>();
    }

    #[test]
    fn invalid_topology_is_rejected() {
        let mut topology = DeviceTopology::reference();
        topology.pipes[0].patterns.push(PatternEntry::new(0, "AZ"));
        let result = PlaneManager::new(
            topology,
            DummyRegisters::new(),
            DummyBufferManager::new(),
            DummyModes::new(),
        );
        assert!(matches!(result, Err(Error::Topology(_))));
    }

    #[test]
    fn frame_cycle_frees_unused_planes() {
        let mut manager = manager(1);

        // frame 1: two layers
        manager.settle_reclaimed();
        manager.reclaim_pipe(Pipe::PRIMARY);
        let mut config = stack(&[PlaneType::Sprite, PlaneType::Sprite]);
        let planes = manager.assign(Pipe::PRIMARY, &mut config).unwrap();
        show(&mut manager, planes[0], 1).unwrap();
        show(&mut manager, planes[1], 2).unwrap();
        manager.program(Pipe::PRIMARY).unwrap();
        manager.disable_reclaimed();
        manager.registers_mut().vblank();

        // frame 2: the top layer is gone
        manager.settle_reclaimed();
        assert_eq!(manager.reclaim_pipe(Pipe::PRIMARY), 2);
        let mut config = stack(&[PlaneType::Sprite]);
        assert_eq!(manager.assign(Pipe::PRIMARY, &mut config).unwrap(), vec![planes[0]]);
        show(&mut manager, planes[0], 1).unwrap();
        manager.program(Pipe::PRIMARY).unwrap();
        manager.disable_reclaimed();
        assert!(manager.inventory().is_reclaimed(planes[1]));
        // the disable did not latch yet
        assert_eq!(manager.settle_reclaimed(), 0);
        assert!(manager.buffers().is_mapped(2));

        manager.registers_mut().vblank();

        // frame 3
        assert_eq!(manager.settle_reclaimed(), 1);
        assert!(manager.inventory().free_mask(PlaneType::Sprite).contains(planes[1].index));
        assert!(!manager.buffers().is_mapped(2));
        assert!(manager.buffers().is_mapped(1));
    }

    #[test]
    fn persistent_layer_keeps_its_plane() {
        let mut manager = manager(1);
        let mut first = Vec::new();

        for frame in 0..2 {
            manager.settle_reclaimed();
            manager.reclaim_pipe(Pipe::PRIMARY);
            let mut config = stack(&[PlaneType::Sprite]);
            let planes = manager.assign(Pipe::PRIMARY, &mut config).unwrap();
            show(&mut manager, planes[0], 7).unwrap();
            manager.program(Pipe::PRIMARY).unwrap();
            manager.disable_reclaimed();
            manager.registers_mut().vblank();

            if frame == 0 {
                first = planes;
            } else {
                assert_eq!(planes, first);
            }
        }

        let plane = first[0];
        assert_eq!(manager.registers().enable_calls(plane), 1);
        assert_eq!(manager.registers().disable_calls(plane), 0);
        assert_eq!(manager.buffers().lock_calls(), 1);
    }

    #[test]
    fn only_planes_in_use_accept_state() {
        let mut manager = manager(0);
        let unused = PlaneId::new(PlaneType::Overlay, 0);
        assert!(matches!(
            manager.set_buffer(unused, BufferHandle(1)),
            Err(Error::PlaneUnavailable(_))
        ));
        assert!(matches!(
            show(&mut manager, unused, 1),
            Err(Error::PlaneUnavailable(_))
        ));
        assert!(matches!(manager.reclaim(unused), Err(Error::PlaneUnavailable(_))));
    }

    #[test]
    fn failed_buffer_does_not_affect_other_planes() {
        let mut manager = manager(0);
        manager.buffers_mut().fail_map(BufferHandle(2));

        let mut config = stack(&[PlaneType::Sprite, PlaneType::Sprite]);
        let planes = manager.assign(Pipe::PRIMARY, &mut config).unwrap();
        show(&mut manager, planes[0], 1).unwrap();
        assert!(matches!(
            show(&mut manager, planes[1], 2),
            Err(Error::MapFailed { .. })
        ));
        manager.program(Pipe::PRIMARY).unwrap();

        let state = manager.registers().state(planes[0]);
        assert_eq!(state.last_buffer, Some(1));
        assert_eq!(manager.registers().state(planes[1]).last_buffer, None);
    }

    #[test]
    fn failed_program_reclaims_plane() {
        let mut manager = manager(0);
        let mut config = stack(&[PlaneType::Sprite, PlaneType::Sprite]);
        let planes = manager.assign(Pipe::PRIMARY, &mut config).unwrap();
        show(&mut manager, planes[0], 1).unwrap();
        show(&mut manager, planes[1], 2).unwrap();

        manager.registers_mut().fail_writes(planes[1]);
        assert!(matches!(
            manager.program(Pipe::PRIMARY),
            Err(Error::Register { plane, .. }) if plane == planes[1]
        ));
        assert!(manager.plane(planes[1]).unwrap().is_desynced());
        assert!(manager.inventory().is_reclaimed(planes[1]));
        assert!(!manager.inventory().is_available(planes[1]));
        assert!(manager.inventory().is_in_use(planes[0]));

        manager.registers_mut().restore_writes(planes[1]);
        manager.disable_reclaimed();
        assert_eq!(manager.settle_reclaimed(), 1);
        assert!(manager.inventory().is_available(planes[1]));
        assert!(!manager.plane(planes[1]).unwrap().is_desynced());
    }

    #[test]
    fn forced_scaling_on_external_pipe() {
        let mut topology = DeviceTopology::reference();
        topology.pipes[1].forced_scaling = Some(Size::from((1280, 720)));
        let mut modes = DummyModes::new();
        modes.set_pipe(Pipe::EXTERNAL, Size::from((1280, 720)), Size::from((1920, 1080)));
        let mut manager = PlaneManager::new(topology, DummyRegisters::new(), DummyBufferManager::new(), modes).unwrap();

        let mut config = stack(&[PlaneType::Sprite]);
        let planes = manager.assign(Pipe::EXTERNAL, &mut config).unwrap();
        manager
            .set_geometry(
                planes[0],
                Rectangle::from_loc_and_size((640, 360), (640, 360)),
                Rectangle::from_loc_and_size((0, 0), (640, 360)),
                Transform::Normal,
                0xff,
                BlendMode::None,
            )
            .unwrap();
        assert_eq!(
            manager.plane(planes[0]).unwrap().geometry().dst,
            Rectangle::from_loc_and_size((960, 540), (960, 540))
        );
    }

    #[test]
    fn overlays_disabled_tracks_hardware() {
        let mut manager = manager(1);
        assert!(manager.overlays_disabled());

        let mut config = stack(&[PlaneType::Sprite, PlaneType::Overlay]);
        manager.assign(Pipe::PRIMARY, &mut config).unwrap();
        assert!(!manager.overlays_disabled());

        manager.reclaim_pipe(Pipe::PRIMARY);
        manager.disable_reclaimed();
        assert!(!manager.overlays_disabled());
        manager.registers_mut().vblank();
        assert!(manager.overlays_disabled());
    }

    #[test]
    fn teardown_disables_and_unmaps() {
        let mut manager = manager(0);
        let mut config = stack(&[PlaneType::Sprite, PlaneType::Overlay, PlaneType::Cursor]);
        let planes = manager.assign(Pipe::PRIMARY, &mut config).unwrap();
        for (i, plane) in planes.iter().enumerate() {
            show(&mut manager, *plane, i as u64 + 1).unwrap();
        }
        manager.program(Pipe::PRIMARY).unwrap();
        assert_eq!(manager.buffers().mapped_count(), 3);

        manager.teardown();
        for plane in &planes {
            assert!(!manager.registers().is_scanning_out(*plane));
            assert!(manager.inventory().is_available(*plane));
        }
        assert_eq!(manager.buffers().mapped_count(), 0);
        assert_eq!(manager.available_count(Pipe::PRIMARY, PlaneType::Sprite), 3);
    }
}
