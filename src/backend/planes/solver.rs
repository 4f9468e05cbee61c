use smallvec::SmallVec;
use tracing::{debug, error, trace, warn};

use crate::backend::allocator::BufferMapper;

use super::{
    error::Error,
    inventory::PlaneInventory,
    topology::{DeviceTopology, PipeTopology, PlaneCapabilities},
    zorder::ZOrderConfig,
    ModeQuery, Pipe, PlaneId, PlaneRegisters, PlaneType,
};

type Assignment = SmallVec<[PlaneId; 5]>;

/// Matches layer stacks against the stacking patterns of a [`DeviceTopology`]
///
/// The solver itself is stateless, all availability information lives in the
/// [`PlaneInventory`] handed to [`ZOrderSolver::assign`].
#[derive(Debug, Clone, Copy)]
pub struct ZOrderSolver<'a> {
    topology: &'a DeviceTopology,
}

impl<'a> ZOrderSolver<'a> {
    /// Create a solver for `topology`
    pub fn new(topology: &'a DeviceTopology) -> Self {
        ZOrderSolver { topology }
    }

    /// Check `config` against the gross limits of `pipe`
    ///
    /// Returns false for empty stacks, stacks exceeding the maximum layer count,
    /// too many sprites and unknown pipes. A feasible stack may still fail
    /// to get planes assigned.
    pub fn is_feasible(&self, pipe: Pipe, config: &ZOrderConfig) -> bool {
        let Some(pipe_topology) = self.topology.pipe(pipe) else {
            warn!(?pipe, "invalid pipe");
            return false;
        };

        let size = config.len();
        if size == 0 || size > self.topology.max_layers {
            debug!(size, "invalid z-order config size");
            return false;
        }

        let sprites = config.sprite_count();
        let rules = &pipe_topology.rules;
        let exceeds = |limit: Option<usize>| limit.map(|max| sprites > max).unwrap_or(false);

        if exceeds(rules.max_sprites) {
            debug!(?pipe, sprites, "too many sprites");
            return false;
        }
        match config.first_overlay() {
            None if exceeds(rules.max_sprites_without_overlay) => {
                debug!(?pipe, sprites, "too many sprites without an overlay");
                false
            }
            Some(0) if exceeds(rules.max_sprites_over_bottom_overlay) => {
                debug!(?pipe, sprites, "too many sprites over a bottom overlay");
                false
            }
            _ => true,
        }
    }

    /// Assign planes to every layer of `config`
    ///
    /// Candidate patterns are tried in order of preference, the first one whose planes are all
    /// available wins. On success every layer of `config` carries its plane, effective plane
    /// type and z-slot, and the planes are bound to `pipe` and enabled.
    ///
    /// Returns [`Error::NoMatch`] if no pattern fits right now, the inventory is unchanged then.
    #[profiling::function]
    pub fn assign<M, R, Q>(
        &self,
        pipe: Pipe,
        config: &mut ZOrderConfig,
        inventory: &mut PlaneInventory<M>,
        registers: &mut R,
        modes: &Q,
    ) -> Result<Vec<PlaneId>, Error>
    where
        M: BufferMapper,
        R: PlaneRegisters,
        Q: ModeQuery,
    {
        let pipe_topology = self.topology.pipe(pipe).ok_or(Error::InvalidPipe(pipe))?;
        if !self.is_feasible(pipe, config) {
            return Err(Error::InvalidConfig("layer stack exceeds the device limits"));
        }
        check_cursor(config)?;

        let overlay_mask = config.overlay_mask();
        trace!(?pipe, overlay_mask, "looking up stacking patterns");
        for pattern in pipe_topology.patterns_for(overlay_mask) {
            match self.try_assign(pipe, config, pattern, inventory, registers, modes) {
                Ok(planes) => {
                    debug!(?pipe, pattern, ?planes, "z-order assigned");
                    return Ok(planes);
                }
                Err(Error::NoMatch) => continue,
                Err(err) => return Err(err),
            }
        }

        debug!(?pipe, overlay_mask, "no matching stacking pattern available");
        Err(Error::NoMatch)
    }

    /// Assign the planes named by `pattern` to the layers of `config`
    ///
    /// Every plane is checked before anything is allocated. If any plane is unavailable or can
    /// not handle its layer, [`Error::NoMatch`] is returned and the inventory is untouched.
    pub fn try_assign<M, R, Q>(
        &self,
        pipe: Pipe,
        config: &mut ZOrderConfig,
        pattern: &str,
        inventory: &mut PlaneInventory<M>,
        registers: &mut R,
        modes: &Q,
    ) -> Result<Vec<PlaneId>, Error>
    where
        M: BufferMapper,
        R: PlaneRegisters,
        Q: ModeQuery,
    {
        let pipe_topology = self.topology.pipe(pipe).ok_or(Error::InvalidPipe(pipe))?;
        if config.is_empty() {
            return Err(Error::InvalidConfig("empty layer stack"));
        }
        check_cursor(config)?;

        let planes = self.resolve(pipe_topology, config, pattern, inventory)?;

        let mut allocated = Assignment::new();
        let mut unavailable = None;
        let mut primary_active = false;
        for (layer, id) in config.iter_mut().zip(&planes) {
            if inventory.allocate_index(id.type_, id.index).is_none() {
                unavailable = Some(*id);
                break;
            }
            allocated.push(*id);
            layer.plane_type = id.type_;
            layer.plane = Some(*id);
            primary_active |= id.type_ == PlaneType::Primary;
        }
        if let Some(id) = unavailable {
            error!(plane = ?id, "verified plane could not be allocated");
            rollback(inventory, &allocated);
            config.clear_assignment();
            return Err(Error::PlaneUnavailable(id));
        }

        let mut slots = SmallVec::<[u32; 5]>::new();
        for (position, layer) in config.iter_mut().enumerate() {
            let mut slot = position as u32;
            if pipe_topology.shift_overlays_without_primary
                && !primary_active
                && layer.plane_type == PlaneType::Overlay
            {
                slot += 1;
            }
            layer.zorder = Some(slot);
            slots.push(slot);
        }

        for (id, slot) in planes.iter().zip(slots) {
            let Some(plane) = inventory.plane_mut(*id) else {
                continue;
            };
            if plane.pipe() != Some(pipe) {
                plane.bind_to_pipe(pipe, modes, pipe_topology.forced_scaling);
            }
            let result = plane
                .set_zorder(registers, slot)
                .and_then(|_| plane.enable(registers));
            if let Err(err) = result {
                warn!(?pipe, plane = ?id, "failed to program plane, rolling back assignment");
                rollback(inventory, &allocated);
                config.clear_assignment();
                return Err(err);
            }
        }

        Ok(planes.into_vec())
    }

    fn resolve<M: BufferMapper>(
        &self,
        pipe_topology: &PipeTopology,
        config: &ZOrderConfig,
        pattern: &str,
        inventory: &PlaneInventory<M>,
    ) -> Result<Assignment, Error> {
        let nicknames: SmallVec<[char; 8]> = pattern.chars().collect();
        let mut planes = Assignment::new();

        for (position, layer) in config.iter().enumerate() {
            let id = if layer.requested_type() == PlaneType::Cursor {
                self.topology
                    .nicknames
                    .resolve(pipe_topology.cursor)
                    .ok_or(Error::NoMatch)?
            } else {
                let Some(nickname) = nicknames.get(position) else {
                    trace!(pattern, position, "pattern too short for layer stack");
                    return Err(Error::NoMatch);
                };
                self.topology
                    .nicknames
                    .resolve(*nickname)
                    .ok_or(Error::NoMatch)?
            };

            if !inventory.is_available(id) {
                trace!(pattern, plane = ?id, "plane not available");
                return Err(Error::NoMatch);
            }
            if !layer.transform().is_identity()
                && !self.topology.capabilities(id).contains(PlaneCapabilities::ROTATION)
            {
                trace!(pattern, plane = ?id, transform = ?layer.transform(), "plane can not rotate");
                return Err(Error::NoMatch);
            }
            planes.push(id);
        }

        Ok(planes)
    }
}

fn check_cursor(config: &ZOrderConfig) -> Result<(), Error> {
    let last = config.len().saturating_sub(1);
    let misplaced = config
        .iter()
        .enumerate()
        .any(|(position, layer)| layer.requested_type() == PlaneType::Cursor && position != last);
    if misplaced {
        return Err(Error::InvalidConfig("cursor layer has to be the topmost layer"));
    }
    Ok(())
}

fn rollback<M: BufferMapper>(inventory: &mut PlaneInventory<M>, allocated: &[PlaneId]) {
    for id in allocated {
        inventory.release(id.type_, id.index);
    }
}
