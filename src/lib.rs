#![cfg_attr(docsrs, feature(doc_auto_cfg))]
#![warn(missing_docs, missing_debug_implementations, rust_2018_idioms)]

//! # smithay-planes: hardware plane assignment for display controllers
//!
//! Display controllers blend a small, fixed set of hardware planes into the image of each pipe.
//! Scanning out client buffers on those planes directly saves a full composition pass, but which
//! planes can be stacked in which order is tightly restricted by the hardware.
//!
//! ## Structure of the crate
//!
//! - [`backend::planes`] contains the [`PlaneManager`](backend::planes::PlaneManager), which tracks
//!   the availability of every plane and matches layer stacks against the stacking patterns of a
//!   [`DeviceTopology`](backend::planes::DeviceTopology).
//! - [`backend::allocator`] contains the traits used to lock and map client buffers.
//! - [`utils`] contains geometry types shared by both.
//!
//! The crate does not talk to the kernel itself. The register interface, the mode query and the
//! buffer manager are provided by the driver integration through the
//! [`PlaneRegisters`](backend::planes::PlaneRegisters),
//! [`ModeQuery`](backend::planes::ModeQuery) and
//! [`BufferManager`](backend::allocator::BufferManager) traits.
//!
//! ### Logging
//!
//! smithay-planes makes extensive use of [`tracing`] for its internal logging.
//!
//! For release builds it is recommended to limit the log level during compile time.
//! This can be done by adding a dependency to [`tracing`] and enabling the corresponding features.
//! For example to enable `trace` messages for debug builds, but limit release builds to `debug` add
//! the following in your binary crate `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! tracing = { version = "0.1", features = ["max_level_trace", "release_max_level_debug"] }
//! ```

pub mod backend;
pub mod utils;
