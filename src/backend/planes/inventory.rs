use std::fmt;

use tracing::{debug, trace, warn};

use crate::backend::allocator::{BufferManager, BufferMapper};

use super::{
    topology::DeviceTopology, Pipe, Plane, PlaneId, PlaneMask, PlaneRegisters, PlaneType,
};

/// Availability tracking of all planes of a device
///
/// Every plane is in exactly one of three states:
///
/// - *free*: disabled in hardware and ready for allocation,
/// - *reclaimed*: released by software, but possibly still scanned out,
/// - *in use*: allocated to a layer.
///
/// Released planes only become free through [`PlaneInventory::settle_reclaimed`], once the
/// hardware confirmed they are disabled. Allocation prefers reclaimed planes, so a plane
/// released and re-allocated within the same frame never has to be disabled.
#[derive(Debug)]
pub struct PlaneInventory<M> {
    planes: [Vec<Plane<M>>; 4],
    free: [PlaneMask; 4],
    reclaimed: [PlaneMask; 4],
    affinity: Vec<[PlaneMask; 4]>,
}

impl<M: BufferMapper> PlaneInventory<M> {
    /// Create a new inventory with all planes of `topology` free
    ///
    /// The topology is expected to be [validated](DeviceTopology::validate).
    pub fn new(topology: &DeviceTopology) -> Self {
        let planes = PlaneType::ALL.map(|type_| {
            (0..topology.plane_count(type_))
                .map(|index| Plane::new(PlaneId::new(type_, index), topology.buffer_count))
                .collect::<Vec<_>>()
        });
        let free = PlaneType::ALL.map(|type_| PlaneMask::full(topology.plane_count(type_)));

        PlaneInventory {
            planes,
            free,
            reclaimed: [PlaneMask::EMPTY; 4],
            affinity: topology.pipes.iter().map(|pipe| pipe.affinity).collect(),
        }
    }

    /// Number of planes of `type_`
    pub fn plane_count(&self, type_: PlaneType) -> usize {
        self.planes[type_.index()].len()
    }

    /// Access a plane
    pub fn plane(&self, id: PlaneId) -> Option<&Plane<M>> {
        self.planes[id.type_.index()].get(id.index)
    }

    pub(crate) fn plane_mut(&mut self, id: PlaneId) -> Option<&mut Plane<M>> {
        self.planes[id.type_.index()].get_mut(id.index)
    }

    /// All planes of `type_`
    pub fn planes(&self, type_: PlaneType) -> &[Plane<M>] {
        &self.planes[type_.index()]
    }

    /// Iterate over every plane of the device
    pub fn iter(&self) -> impl Iterator<Item = &Plane<M>> {
        self.planes.iter().flat_map(|planes| planes.iter())
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut Plane<M>> {
        self.planes.iter_mut().flat_map(|planes| planes.iter_mut())
    }

    /// Free planes of `type_`
    pub fn free_mask(&self, type_: PlaneType) -> PlaneMask {
        self.free[type_.index()]
    }

    /// Reclaimed planes of `type_`
    pub fn reclaimed_mask(&self, type_: PlaneType) -> PlaneMask {
        self.reclaimed[type_.index()]
    }

    /// Planes of `type_` currently allocated
    pub fn in_use_mask(&self, type_: PlaneType) -> PlaneMask {
        PlaneMask::full(self.plane_count(type_)) & !(self.free_mask(type_) | self.reclaimed_mask(type_))
    }

    /// Planes of `type_` whose hardware state is unknown
    pub fn desynced_mask(&self, type_: PlaneType) -> PlaneMask {
        self.planes(type_)
            .iter()
            .filter(|plane| plane.is_desynced())
            .fold(PlaneMask::EMPTY, |mask, plane| mask | PlaneMask::single(plane.id().index))
    }

    fn allocatable(&self, type_: PlaneType) -> (PlaneMask, PlaneMask) {
        let usable = !self.desynced_mask(type_);
        (
            self.reclaimed_mask(type_) & usable,
            self.free_mask(type_) & usable,
        )
    }

    /// Returns true if `id` can be allocated right now
    pub fn is_available(&self, id: PlaneId) -> bool {
        let (reclaimed, free) = self.allocatable(id.type_);
        (reclaimed | free).contains(id.index)
    }

    /// Returns true if `id` is allocated
    pub fn is_in_use(&self, id: PlaneId) -> bool {
        self.in_use_mask(id.type_).contains(id.index)
    }

    /// Returns true if `id` was released, but is not confirmed to be disabled yet
    pub fn is_reclaimed(&self, id: PlaneId) -> bool {
        self.reclaimed_mask(id.type_).contains(id.index)
    }

    /// Allocate any plane of `type_`, preferring reclaimed planes
    pub fn allocate(&mut self, type_: PlaneType) -> Option<PlaneId> {
        let (reclaimed, free) = self.allocatable(type_);
        let index = match (reclaimed.first_set(), free.first_set()) {
            (Some(index), _) => {
                self.reclaimed[type_.index()].clear(index);
                index
            }
            (None, Some(index)) => {
                self.free[type_.index()].clear(index);
                index
            }
            (None, None) => {
                debug!(?type_, "no plane available");
                return None;
            }
        };
        self.check_partition(type_);
        trace!(?type_, index, "plane allocated");
        Some(PlaneId::new(type_, index))
    }

    /// Allocate the plane `index` of `type_`
    pub fn allocate_index(&mut self, type_: PlaneType, index: usize) -> Option<PlaneId> {
        let (reclaimed, free) = self.allocatable(type_);
        if reclaimed.contains(index) {
            self.reclaimed[type_.index()].clear(index);
        } else if free.contains(index) {
            self.free[type_.index()].clear(index);
        } else {
            debug!(?type_, index, "plane is not available");
            return None;
        }
        self.check_partition(type_);
        trace!(?type_, index, "plane allocated");
        Some(PlaneId::new(type_, index))
    }

    /// Release the plane `index` of `type_`
    ///
    /// The plane becomes reclaimed and keeps its buffer mappings. Releasing a plane
    /// that is not in use does nothing.
    pub fn release(&mut self, type_: PlaneType, index: usize) {
        if index >= self.plane_count(type_) {
            warn!(?type_, index, "invalid plane index");
            return;
        }
        if self.free_mask(type_).contains(index) || self.reclaimed_mask(type_).contains(index) {
            warn!(?type_, index, "plane is not in use");
            return;
        }
        self.reclaimed[type_.index()].set(index);
        self.check_partition(type_);
        trace!(?type_, index, "plane reclaimed");
    }

    /// Move every reclaimed plane the hardware confirmed to be disabled to the free set
    ///
    /// Planes are [`reset`](Plane::reset) before they become free.
    /// Returns the number of planes freed.
    #[profiling::function]
    pub fn settle_reclaimed<R, B>(&mut self, registers: &mut R, buffers: &mut B) -> usize
    where
        R: PlaneRegisters,
        B: BufferManager<Mapper = M>,
    {
        let mut settled = 0;
        for type_ in PlaneType::ALL {
            let t = type_.index();
            let reclaimed = self.reclaimed[t];
            for index in reclaimed.iter() {
                let plane = &mut self.planes[t][index];
                if !plane.is_disabled(registers) {
                    continue;
                }
                plane.reset(buffers);
                self.reclaimed[t].clear(index);
                self.free[t].set(index);
                settled += 1;
            }
            self.check_partition(type_);
        }
        if settled > 0 {
            debug!(settled, "reclaimed planes settled");
        }
        settled
    }

    /// Number of planes of `type_` that could be allocated for `pipe`
    pub fn available_count(&self, pipe: Pipe, type_: PlaneType) -> usize {
        let Some(affinity) = self.affinity.get(pipe.index()) else {
            return 0;
        };
        let (reclaimed, free) = self.allocatable(type_);
        ((reclaimed | free) & affinity[type_.index()]).count()
    }

    /// Issue the disable command for every reclaimed plane still enabled
    ///
    /// Desynced planes are disabled again, as their state is unknown.
    pub fn disable_reclaimed<R: PlaneRegisters>(&mut self, registers: &mut R) {
        for type_ in PlaneType::ALL {
            let t = type_.index();
            let reclaimed = self.reclaimed[t];
            for index in reclaimed.iter() {
                let plane = &mut self.planes[t][index];
                if plane.is_enabled() || plane.is_desynced() {
                    // errors are logged and the plane stays reclaimed
                    let _ = plane.disable(registers);
                }
            }
        }
    }

    /// Returns true if every overlay plane is confirmed to be disabled
    pub fn overlays_disabled<R: PlaneRegisters>(&self, registers: &mut R) -> bool {
        self.planes(PlaneType::Overlay)
            .iter()
            .all(|plane| plane.is_disabled(registers))
    }

    /// Disable every plane and drop all buffer mappings
    ///
    /// Afterwards all planes are free.
    pub fn teardown<R, B>(&mut self, registers: &mut R, buffers: &mut B)
    where
        R: PlaneRegisters,
        B: BufferManager<Mapper = M>,
    {
        for plane in self.iter_mut() {
            if plane.is_enabled() || plane.is_desynced() {
                let _ = plane.disable(registers);
            }
            plane.reset(buffers);
        }
        for type_ in PlaneType::ALL {
            self.free[type_.index()] = PlaneMask::full(self.plane_count(type_));
            self.reclaimed[type_.index()] = PlaneMask::EMPTY;
        }
    }

    #[cfg(test)]
    pub(crate) fn snapshot(&self) -> ([PlaneMask; 4], [PlaneMask; 4]) {
        (self.free, self.reclaimed)
    }

    #[inline]
    fn check_partition(&self, type_: PlaneType) {
        debug_assert!(
            (self.free_mask(type_) & self.reclaimed_mask(type_)).is_empty(),
            "plane both free and reclaimed"
        );
    }
}

impl<M: BufferMapper> fmt::Display for PlaneInventory<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "-------------------------------------------------------------")?;
        writeln!(f, "  PLANE TYPE | COUNT |   FREE   | RECLAIMED |  IN USE")?;
        writeln!(f, "-------------+-------+----------+-----------+----------")?;
        for type_ in PlaneType::ALL {
            writeln!(
                f,
                "  {:>10} | {:>5} | {} |  {} | {}",
                format!("{:?}", type_),
                self.plane_count(type_),
                self.free_mask(type_),
                self.reclaimed_mask(type_),
                self.in_use_mask(type_),
            )?;
        }
        Ok(())
    }
}
