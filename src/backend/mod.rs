//! Display controller backend helpers
//!
//! - [`allocator`] describes how planes get hold of the buffers they scan out
//! - [`planes`] assigns the hardware planes of a display controller to the layers of a frame

pub mod allocator;
pub mod planes;
