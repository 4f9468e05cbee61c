use crate::backend::allocator::BufferHandle;

use super::{Pipe, PlaneId, PlaneType};

type BoxedError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors thrown by the [`PlaneManager`](super::PlaneManager), the [`ZOrderSolver`](super::ZOrderSolver)
/// and individual [`Plane`](super::Plane)s.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// No legal stacking pattern has all of its planes available right now
    ///
    /// Plane scarcity is expected at runtime, callers should fall back to composition.
    #[error("No matching plane combination is currently available")]
    NoMatch,
    /// The buffer manager failed to lock a buffer
    #[error("Failed to lock buffer {handle}")]
    LockFailed {
        /// Handle of the buffer
        handle: BufferHandle,
        /// Underlying buffer manager error
        #[source]
        source: BoxedError,
    },
    /// The buffer manager failed to map a buffer
    #[error("Failed to map buffer {handle}")]
    MapFailed {
        /// Handle of the buffer
        handle: BufferHandle,
        /// Underlying buffer manager error
        #[source]
        source: BoxedError,
    },
    /// The requested layer stack violates the device limits
    #[error("Invalid z-order configuration: {0}")]
    InvalidConfig(&'static str),
    /// The pipe is not part of the device topology
    #[error("Pipe `{0:?}` is not part of the device topology")]
    InvalidPipe(Pipe),
    /// The plane is currently not available for this operation
    #[error("Plane `{0:?}` is not available")]
    PlaneUnavailable(PlaneId),
    /// Writing or reading a plane register failed
    ///
    /// The plane state is unknown afterwards and the plane will not be used
    /// until it is confirmed to be disabled.
    #[error("Register access error: {errmsg} on plane `{plane:?}` ({source})")]
    Register {
        /// Plane whose registers were accessed
        plane: PlaneId,
        /// Error message associated to the access error
        errmsg: &'static str,
        /// Underlying register interface error
        #[source]
        source: BoxedError,
    },
    /// The device topology is inconsistent
    #[error(transparent)]
    Topology(#[from] TopologyError),
}

/// Errors found while validating a [`DeviceTopology`](super::DeviceTopology)
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum TopologyError {
    /// The topology does not contain any plane
    #[error("Plane counts are not initialized")]
    NoPlanes,
    /// More planes of a type than a plane mask can track
    #[error("{count} planes of type {type_:?} exceed the supported maximum")]
    TooManyPlanes {
        /// Plane type
        type_: PlaneType,
        /// Configured count
        count: usize,
    },
    /// A stack may hold more layers than a plane mask can track
    #[error("{0} layers exceed the supported maximum")]
    TooManyLayers(usize),
    /// A nickname refers to a plane index outside of the inventory
    #[error("Nickname `{nickname}` refers to non-existing plane `{plane:?}`")]
    NicknameOutOfRange {
        /// Offending nickname
        nickname: char,
        /// Plane it resolves to
        plane: PlaneId,
    },
    /// The same nickname is defined twice
    #[error("Nickname `{0}` is defined more than once")]
    DuplicateNickname(char),
    /// A pattern uses an unknown nickname
    #[error("Pattern `{pattern}` of pipe {pipe} uses unknown nickname `{nickname}`")]
    UnknownNickname {
        /// Pipe index
        pipe: usize,
        /// Offending pattern
        pattern: String,
        /// Unknown letter
        nickname: char,
    },
    /// A pattern places a non-overlay plane at an overlay position or vice versa
    #[error("Pattern `{pattern}` of pipe {pipe} does not match its overlay mask {overlay_mask:#x}")]
    PatternMismatch {
        /// Pipe index
        pipe: usize,
        /// Offending pattern
        pattern: String,
        /// Overlay position mask of the entry
        overlay_mask: u32,
    },
    /// The cursor nickname of a pipe does not resolve to a cursor plane
    #[error("Cursor nickname `{nickname}` of pipe {pipe} is not a cursor plane")]
    InvalidCursor {
        /// Pipe index
        pipe: usize,
        /// Offending nickname
        nickname: char,
    },
    /// A pipe affinity mask contains indices outside of the inventory
    #[error("Affinity of pipe {pipe} for {type_:?} planes references non-existing planes")]
    AffinityOutOfRange {
        /// Pipe index
        pipe: usize,
        /// Plane type
        type_: PlaneType,
    },
    /// The topology has no pipes
    #[error("The topology does not define any pipe")]
    NoPipes,
}
