//! Hardware plane allocation and z-order assignment
//!
//! Display controllers can scan out several buffers at once by blending a small, fixed set of
//! hardware planes. This module maps the layer stack of a frame onto those planes.
//!
//! The [`PlaneManager`] owns one [`Plane`] per hardware plane and tracks their availability
//! in a [`PlaneInventory`]. Which planes may be stacked in which order is not computed, but
//! looked up in a [`DeviceTopology`]: per pipe it lists every legal stacking pattern as a string
//! of plane nicknames. The [`ZOrderSolver`] picks the first pattern whose planes are all available.
//!
//! ## Releasing planes
//!
//! Register writes latch at the next vblank, so a plane that is no longer needed cannot be handed
//! to a different layer right away. Released planes are *reclaimed* first and only become *free*
//! once [`PlaneManager::settle_reclaimed`] observed that the hardware actually disabled them.
//! A reclaimed plane can still be reused for the same layer in the next frame without
//! being disabled in between.
//!
//! ## How to use it
//!
//! A frame on one pipe roughly looks like this:
//!
//! ```rust,ignore
//! // planes disabled during the last frames may be free now
//! manager.settle_reclaimed();
//! // the planes used during the last frame are released
//! manager.reclaim_pipe(Pipe::PRIMARY);
//!
//! let mut config = ZOrderConfig::new();
//! config.push(LogicalLayer::new(PlaneType::Sprite));
//! config.push(LogicalLayer::new(PlaneType::Overlay).with_transform(Transform::_90));
//!
//! match manager.assign(Pipe::PRIMARY, &mut config) {
//!     Ok(planes) => {
//!         for (layer, plane) in layers.iter().zip(planes) {
//!             manager.set_geometry(plane, layer.dst, layer.src, layer.transform, 0xff, BlendMode::None)?;
//!             manager.set_buffer(plane, layer.buffer)?;
//!         }
//!         manager.program(Pipe::PRIMARY)?;
//!     }
//!     // no combination fits, compose with the gpu instead
//!     Err(_) => render_fallback(),
//! }
//!
//! // planes not reused by this frame get disabled
//! manager.disable_reclaimed();
//! ```
//!
//! The manager is not internally synchronized. If frames are prepared from different threads,
//! wrap the whole manager in a single `Mutex`.

use std::fmt;

use crate::{
    backend::allocator::BufferMapper,
    utils::{Physical, Size},
};

mod cache;
#[cfg(any(test, feature = "test_utils"))]
pub mod dummy;
mod error;
mod inventory;
mod manager;
mod mask;
mod plane;
mod solver;
mod topology;
mod zorder;

pub use self::cache::{ActiveRing, BufferCache, CachedMapping, ACTIVE_RING_CAP, MIN_BUFFER_COUNT};
pub use self::error::{Error, TopologyError};
pub use self::inventory::PlaneInventory;
pub use self::manager::PlaneManager;
pub use self::mask::{PlaneMask, MAX_PLANES_PER_TYPE};
pub use self::plane::{BlendMode, ForcedScaling, Plane, PlaneConfig, PlaneGeometry, PlaneUpdates};
pub use self::solver::ZOrderSolver;
pub use self::topology::{
    DeviceTopology, FeasibilityRules, NicknameTable, PatternEntry, PipeTopology, PlaneCapabilities,
};
pub use self::zorder::{LogicalLayer, ZOrderConfig};

/// Type of a hardware plane
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PlaneType {
    /// Base plane of a pipe
    Primary,
    /// RGB plane that can be stacked freely
    Sprite,
    /// Plane with scaling and YUV support
    Overlay,
    /// Small plane on top of everything else
    Cursor,
}

impl PlaneType {
    /// All plane types
    pub const ALL: [PlaneType; 4] = [
        PlaneType::Primary,
        PlaneType::Sprite,
        PlaneType::Overlay,
        PlaneType::Cursor,
    ];

    /// Dense index of this type, usable to index per-type arrays
    #[inline]
    pub const fn index(self) -> usize {
        match self {
            PlaneType::Primary => 0,
            PlaneType::Sprite => 1,
            PlaneType::Overlay => 2,
            PlaneType::Cursor => 3,
        }
    }
}

/// Identifier of a single hardware plane
///
/// The index is local to the planes of the same type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PlaneId {
    /// Type of the plane
    pub type_: PlaneType,
    /// Index inside of the planes of the same type
    pub index: usize,
}

impl PlaneId {
    /// Create a new plane identifier
    #[inline]
    pub const fn new(type_: PlaneType, index: usize) -> Self {
        PlaneId { type_, index }
    }
}

impl fmt::Display for PlaneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}#{}", self.type_, self.index)
    }
}

/// An independent display output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Pipe(pub u32);

impl Pipe {
    /// The built-in panel
    pub const PRIMARY: Pipe = Pipe(0);
    /// The external output (e.g. HDMI)
    pub const EXTERNAL: Pipe = Pipe(1);

    /// Index of this pipe in per-pipe tables
    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// Interface to the plane registers of the display controller
///
/// All writes latch asynchronously at the next vblank.
pub trait PlaneRegisters {
    /// Error type thrown if a register access fails
    type Error: std::error::Error + Send + Sync + 'static;

    /// Enable `plane` on `pipe`
    fn enable(&mut self, plane: PlaneId, pipe: Pipe) -> Result<(), Self::Error>;
    /// Disable `plane`
    fn disable(&mut self, plane: PlaneId) -> Result<(), Self::Error>;
    /// Query the latched state of `plane`
    fn is_disabled(&mut self, plane: PlaneId) -> Result<bool, Self::Error>;
    /// Program the z-slot of `plane` on `pipe`
    fn set_zorder(&mut self, plane: PlaneId, pipe: Pipe, slot: u32) -> Result<(), Self::Error>;
    /// Program geometry, blending and buffer of `plane`
    ///
    /// `config.updates` lists the register groups that changed since the last successful call.
    fn program<M: BufferMapper>(&mut self, plane: PlaneId, config: &PlaneConfig<'_, M>) -> Result<(), Self::Error>;
}

/// Interface to query the current mode of a pipe
pub trait ModeQuery {
    /// Active resolution of `pipe`
    fn mode_info(&self, pipe: Pipe) -> Option<Size<i32, Physical>>;
    /// Native resolution of the display connected to `pipe`
    fn physical_size(&self, pipe: Pipe) -> Option<Size<i32, Physical>>;
}
