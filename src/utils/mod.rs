//! Various utilities functions and types

mod geometry;

pub use self::geometry::{Buffer, Coordinate, Physical, Point, Rectangle, Size, Transform};
