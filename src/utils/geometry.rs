use std::fmt;
use std::ops::{Add, Sub};

/// Type-level marker for the physical coordinate space of a pipe
#[derive(Debug)]
pub struct Physical;

/// Type-level marker for the buffer coordinate space
#[derive(Debug)]
pub struct Buffer;

/// Trait for types serving as a coordinate for other geometry utils
pub trait Coordinate:
    Sized + Add<Self, Output = Self> + Sub<Self, Output = Self> + PartialOrd + Default + Copy + fmt::Debug
{
    /// A Coordinate that is 0
    const ZERO: Self;
    /// Convert the coordinate to a f64
    fn to_f64(self) -> f64;
    /// Convert to this coordinate from a f64
    fn from_f64(v: f64) -> Self;
    /// Compare and return the smaller one
    fn min(self, other: Self) -> Self {
        if self < other {
            self
        } else {
            other
        }
    }
    /// Compare and return the larger one
    fn max(self, other: Self) -> Self {
        if self > other {
            self
        } else {
            other
        }
    }
    /// Test if the coordinate is not negative
    fn non_negative(self) -> bool;
    /// Saturating integer addition. Computes self + other, saturating at the numeric bounds instead of overflowing.
    fn saturating_add(self, other: Self) -> Self;
    /// Saturating integer subtraction. Computes self - other, saturating at the numeric bounds instead of overflowing.
    fn saturating_sub(self, other: Self) -> Self;
}

macro_rules! signed_coordinate_impl {
    ($($ty:ty),*) => {
        $(
            impl Coordinate for $ty {
                const ZERO: $ty = 0;

                #[inline]
                fn to_f64(self) -> f64 {
                    self as f64
                }

                #[inline]
                fn from_f64(v: f64) -> Self {
                    v as Self
                }

                #[inline]
                fn non_negative(self) -> bool {
                    self >= 0
                }

                #[inline]
                fn saturating_add(self, other: Self) -> Self {
                    self.saturating_add(other)
                }

                #[inline]
                fn saturating_sub(self, other: Self) -> Self {
                    self.saturating_sub(other)
                }
            }
        )*
    };
}

signed_coordinate_impl!(i32, i64);

/// A point as defined by its x and y coordinates
///
/// Operations on points are saturating.
#[repr(C)]
pub struct Point<N, Kind> {
    /// horizontal coordinate
    pub x: N,
    /// vertical coordinate
    pub y: N,
    _kind: std::marker::PhantomData<Kind>,
}

impl<N: fmt::Debug, Kind> fmt::Debug for Point<N, Kind> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Point").field("x", &self.x).field("y", &self.y).finish()
    }
}

impl<N: Coordinate, Kind> From<(N, N)> for Point<N, Kind> {
    #[inline]
    fn from((x, y): (N, N)) -> Point<N, Kind> {
        Point {
            x,
            y,
            _kind: std::marker::PhantomData,
        }
    }
}

impl<N: Clone, Kind> Clone for Point<N, Kind> {
    #[inline]
    fn clone(&self) -> Self {
        Point {
            x: self.x.clone(),
            y: self.y.clone(),
            _kind: std::marker::PhantomData,
        }
    }
}

impl<N: Copy, Kind> Copy for Point<N, Kind> {}

impl<N: PartialEq, Kind> PartialEq for Point<N, Kind> {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        self.x == other.x && self.y == other.y
    }
}

impl<N: Eq, Kind> Eq for Point<N, Kind> {}

impl<N: Default, Kind> Default for Point<N, Kind> {
    fn default() -> Self {
        Point {
            x: N::default(),
            y: N::default(),
            _kind: std::marker::PhantomData,
        }
    }
}

/// A size as defined by its width and height
///
/// Constructors of this type ensure that the values are always positive via
/// `debug_assert!()`, however manually changing the values of the fields
/// can break this invariant.
#[repr(C)]
pub struct Size<N, Kind> {
    /// horizontal coordinate
    pub w: N,
    /// vertical coordinate
    pub h: N,
    _kind: std::marker::PhantomData<Kind>,
}

impl<N: Coordinate, Kind> Size<N, Kind> {
    /// Check if this [`Size`] is empty
    ///
    /// Returns true if either the width or the height is zero
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.w == N::ZERO || self.h == N::ZERO
    }
}

impl<N: fmt::Debug, Kind> fmt::Debug for Size<N, Kind> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Size").field("w", &self.w).field("h", &self.h).finish()
    }
}

impl<N: Coordinate, Kind> From<(N, N)> for Size<N, Kind> {
    #[inline]
    fn from((w, h): (N, N)) -> Size<N, Kind> {
        debug_assert!(
            w.non_negative() && h.non_negative(),
            "Attempting to create a `Size` of negative size: {:?}",
            (w, h)
        );
        Size {
            w,
            h,
            _kind: std::marker::PhantomData,
        }
    }
}

impl<N: Clone, Kind> Clone for Size<N, Kind> {
    #[inline]
    fn clone(&self) -> Self {
        Size {
            w: self.w.clone(),
            h: self.h.clone(),
            _kind: std::marker::PhantomData,
        }
    }
}

impl<N: Copy, Kind> Copy for Size<N, Kind> {}

impl<N: PartialEq, Kind> PartialEq for Size<N, Kind> {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        self.w == other.w && self.h == other.h
    }
}

impl<N: Eq, Kind> Eq for Size<N, Kind> {}

impl<N: Default, Kind> Default for Size<N, Kind> {
    fn default() -> Self {
        Size {
            w: N::default(),
            h: N::default(),
            _kind: std::marker::PhantomData,
        }
    }
}

/// A rectangle defined by its top-left corner and dimensions
///
/// Operations on rectangles are saturating.
#[repr(C)]
pub struct Rectangle<N, Kind> {
    /// Location of the top-left corner of the rectangle
    pub loc: Point<N, Kind>,
    /// Size of the rectangle, as (width, height)
    pub size: Size<N, Kind>,
}

impl<N: Coordinate, Kind> Rectangle<N, Kind> {
    /// Create a new [`Rectangle`] from the coordinates of its top-left corner and its dimensions
    #[inline]
    pub fn from_loc_and_size(loc: impl Into<Point<N, Kind>>, size: impl Into<Size<N, Kind>>) -> Self {
        Rectangle {
            loc: loc.into(),
            size: size.into(),
        }
    }

    /// Checks whether given [`Rectangle`] is empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.size.is_empty()
    }

    /// Clamp this rectangle into the area `(0, 0) -> bounds`
    ///
    /// A negative location is moved to zero and the size is cut at the right and bottom edges.
    /// The size is left untouched otherwise, so the result may still extend into a zero-sized area
    /// if the location itself lies outside of `bounds`.
    pub fn clamp_to(self, bounds: Size<N, Kind>) -> Self {
        let x = self.loc.x.max(N::ZERO);
        let y = self.loc.y.max(N::ZERO);
        let mut w = self.size.w;
        let mut h = self.size.h;
        if x.saturating_add(w) > bounds.w {
            w = bounds.w.saturating_sub(x).max(N::ZERO);
        }
        if y.saturating_add(h) > bounds.h {
            h = bounds.h.saturating_sub(y).max(N::ZERO);
        }
        Rectangle::from_loc_and_size((x, y), (w, h))
    }

    /// Rescale this rectangle from the coordinate range of `from` into the one of `to`
    ///
    /// Returns the rectangle unchanged if `from` is empty.
    pub fn rescale(self, from: Size<N, Kind>, to: Size<N, Kind>) -> Self {
        if from.is_empty() {
            return self;
        }
        let sx = to.w.to_f64() / from.w.to_f64();
        let sy = to.h.to_f64() / from.h.to_f64();
        Rectangle::from_loc_and_size(
            (
                N::from_f64(self.loc.x.to_f64() * sx),
                N::from_f64(self.loc.y.to_f64() * sy),
            ),
            (
                N::from_f64(self.size.w.to_f64() * sx),
                N::from_f64(self.size.h.to_f64() * sy),
            ),
        )
    }
}

impl<N: fmt::Debug, Kind> fmt::Debug for Rectangle<N, Kind> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rectangle")
            .field("x", &self.loc.x)
            .field("y", &self.loc.y)
            .field("width", &self.size.w)
            .field("height", &self.size.h)
            .finish()
    }
}

impl<N: Clone, Kind> Clone for Rectangle<N, Kind> {
    #[inline]
    fn clone(&self) -> Self {
        Rectangle {
            loc: self.loc.clone(),
            size: self.size.clone(),
        }
    }
}

impl<N: Copy, Kind> Copy for Rectangle<N, Kind> {}

impl<N: PartialEq, Kind> PartialEq for Rectangle<N, Kind> {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        self.loc == other.loc && self.size == other.size
    }
}

impl<N: Eq, Kind> Eq for Rectangle<N, Kind> {}

impl<N: Default, Kind> Default for Rectangle<N, Kind> {
    fn default() -> Self {
        Rectangle {
            loc: Default::default(),
            size: Default::default(),
        }
    }
}

/// Possible transformations to two-dimensional planes
#[derive(Debug, Default, PartialEq, Eq, Hash, Clone, Copy)]
pub enum Transform {
    /// Identity transformation (plane is unaltered when applied)
    #[default]
    Normal,
    /// Plane is rotated by 90 degrees
    _90,
    /// Plane is rotated by 180 degrees
    _180,
    /// Plane is rotated by 270 degrees
    _270,
    /// Plane is flipped vertically
    Flipped,
    /// Plane is flipped vertically and rotated by 90 degrees
    Flipped90,
    /// Plane is flipped vertically and rotated by 180 degrees
    Flipped180,
    /// Plane is flipped vertically and rotated by 270 degrees
    Flipped270,
}

impl Transform {
    /// Returns true if applying this transformation leaves the plane unaltered
    #[inline]
    pub fn is_identity(&self) -> bool {
        *self == Transform::Normal
    }
}

#[cfg(test)]
mod tests {
    use super::{Physical, Rectangle, Size, Transform};

    #[test]
    fn clamp_negative_location() {
        let rect = Rectangle::<i32, Physical>::from_loc_and_size((-10, -20), (100, 100));
        let clamped = rect.clamp_to(Size::from((1920, 1080)));
        assert_eq!(clamped, Rectangle::from_loc_and_size((0, 0), (100, 100)));
    }

    #[test]
    fn clamp_overhanging_size() {
        let rect = Rectangle::<i32, Physical>::from_loc_and_size((1800, 1000), (400, 400));
        let clamped = rect.clamp_to(Size::from((1920, 1080)));
        assert_eq!(clamped, Rectangle::from_loc_and_size((1800, 1000), (120, 80)));
    }

    #[test]
    fn clamp_fully_outside() {
        let rect = Rectangle::<i32, Physical>::from_loc_and_size((2000, 10), (10, 10));
        let clamped = rect.clamp_to(Size::from((1920, 1080)));
        assert!(clamped.is_empty());
    }

    #[test]
    fn rescale_framebuffer_to_display() {
        let rect = Rectangle::<i32, Physical>::from_loc_and_size((640, 360), (640, 360));
        let scaled = rect.rescale(Size::from((1280, 720)), Size::from((1920, 1080)));
        assert_eq!(scaled, Rectangle::from_loc_and_size((960, 540), (960, 540)));
    }

    #[test]
    fn identity_transform() {
        assert!(Transform::Normal.is_identity());
        assert!(!Transform::_180.is_identity());
        assert!(!Transform::Flipped.is_identity());
    }
}
