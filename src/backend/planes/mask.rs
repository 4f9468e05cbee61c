use std::fmt;
use std::ops::{BitAnd, BitOr, Not};

/// Maximum number of planes of a single type a [`PlaneMask`] can track
pub const MAX_PLANES_PER_TYPE: usize = u32::BITS as usize;

/// Set of plane indices of a single [`PlaneType`](super::PlaneType)
///
/// Bit `n` represents the plane with index `n`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct PlaneMask(u32);

impl PlaneMask {
    /// The empty set
    pub const EMPTY: PlaneMask = PlaneMask(0);

    /// Create a mask from its raw representation
    #[inline]
    pub const fn from_bits(bits: u32) -> Self {
        PlaneMask(bits)
    }

    /// Raw representation of this mask
    #[inline]
    pub const fn bits(&self) -> u32 {
        self.0
    }

    /// Mask containing the indices `0..count`
    #[inline]
    pub fn full(count: usize) -> Self {
        debug_assert!(count <= MAX_PLANES_PER_TYPE);
        if count >= MAX_PLANES_PER_TYPE {
            PlaneMask(u32::MAX)
        } else {
            PlaneMask((1u32 << count) - 1)
        }
    }

    /// Mask containing only `index`
    #[inline]
    pub fn single(index: usize) -> Self {
        debug_assert!(index < MAX_PLANES_PER_TYPE);
        PlaneMask(1 << index)
    }

    /// Returns true if no index is set
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Returns true if `index` is set
    #[inline]
    pub fn contains(&self, index: usize) -> bool {
        index < MAX_PLANES_PER_TYPE && self.0 & (1 << index) != 0
    }

    /// Add `index` to the set, returns false if it was already present
    #[inline]
    pub fn set(&mut self, index: usize) -> bool {
        debug_assert!(index < MAX_PLANES_PER_TYPE);
        let present = self.contains(index);
        self.0 |= 1 << index;
        !present
    }

    /// Remove `index` from the set, returns false if it was not present
    #[inline]
    pub fn clear(&mut self, index: usize) -> bool {
        let present = self.contains(index);
        if present {
            self.0 &= !(1 << index);
        }
        present
    }

    /// Lowest index in the set
    #[inline]
    pub fn first_set(&self) -> Option<usize> {
        if self.0 == 0 {
            None
        } else {
            Some(self.0.trailing_zeros() as usize)
        }
    }

    /// Remove and return the lowest index in the set
    #[inline]
    pub fn take_first(&mut self) -> Option<usize> {
        let index = self.first_set()?;
        self.clear(index);
        Some(index)
    }

    /// Number of indices in the set
    #[inline]
    pub fn count(&self) -> usize {
        self.0.count_ones() as usize
    }

    /// Iterate over the set indices in ascending order
    pub fn iter(&self) -> impl Iterator<Item = usize> {
        let mut remaining = *self;
        std::iter::from_fn(move || remaining.take_first())
    }
}

impl BitOr for PlaneMask {
    type Output = PlaneMask;

    #[inline]
    fn bitor(self, rhs: Self) -> Self::Output {
        PlaneMask(self.0 | rhs.0)
    }
}

impl BitAnd for PlaneMask {
    type Output = PlaneMask;

    #[inline]
    fn bitand(self, rhs: Self) -> Self::Output {
        PlaneMask(self.0 & rhs.0)
    }
}

impl Not for PlaneMask {
    type Output = PlaneMask;

    #[inline]
    fn not(self) -> Self::Output {
        PlaneMask(!self.0)
    }
}

impl fmt::Debug for PlaneMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PlaneMask({:#010x})", self.0)
    }
}

impl fmt::Display for PlaneMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::PlaneMask;

    #[test]
    fn full_mask() {
        assert_eq!(PlaneMask::full(0), PlaneMask::EMPTY);
        assert_eq!(PlaneMask::full(3).bits(), 0b111);
        assert_eq!(PlaneMask::full(32).bits(), u32::MAX);
    }

    #[test]
    fn take_lowest_first() {
        let mut mask = PlaneMask::from_bits(0b1010);
        assert_eq!(mask.take_first(), Some(1));
        assert_eq!(mask.take_first(), Some(3));
        assert_eq!(mask.take_first(), None);
    }

    #[test]
    fn set_and_clear_report_changes() {
        let mut mask = PlaneMask::EMPTY;
        assert!(mask.set(2));
        assert!(!mask.set(2));
        assert!(mask.contains(2));
        assert!(mask.clear(2));
        assert!(!mask.clear(2));
        assert!(mask.is_empty());
    }

    #[test]
    fn iterate_ascending() {
        let mask = PlaneMask::from_bits(0b1_0110);
        assert_eq!(mask.iter().collect::<Vec<_>>(), vec![1, 2, 4]);
        assert_eq!(mask.count(), 3);
    }
}
