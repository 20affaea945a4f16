use super::group::{BitMaskWord, BITMASK_MASK, BITMASK_STRIDE};

/// A bit mask which contains the result of a `Match` operation on a group's
/// `Metadata` and allows iterating through them.
///
/// The bit mask is arranged so that low-order bits represent lower slot
/// indices for group match results.
///
/// The bits in the set are sparsely packed: only the high bit (7) of each
/// byte is used, so `BITMASK_STRIDE` is 8 and a divide-by-8 is performed on
/// counts/indices to normalize this difference. `BITMASK_MASK` is similarly
/// a mask of all the actually-used bits, which excludes the overflow byte.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) struct BitMask(pub(crate) BitMaskWord);

#[allow(clippy::use_self)]
impl BitMask {
    /// Returns a new `BitMask` with all bits inverted.
    #[inline]
    #[must_use]
    pub(crate) fn invert(self) -> Self {
        BitMask(self.0 ^ BITMASK_MASK)
    }

    /// Returns a new `BitMask` with the lowest bit removed.
    #[inline]
    #[must_use]
    pub(crate) fn remove_lowest_bit(self) -> Self {
        BitMask(self.0 & (self.0 - 1))
    }

    /// Returns whether the `BitMask` has at least one set bit.
    #[inline]
    pub(crate) fn any_bit_set(self) -> bool {
        self.0 != 0
    }

    /// Returns the first set bit in the `BitMask`, if there is one.
    #[inline]
    pub(crate) fn lowest_set_bit(self) -> Option<usize> {
        if self.0 == 0 {
            None
        } else {
            Some(self.lowest_set_bit_nonzero())
        }
    }

    /// Returns the first set bit in the `BitMask`. The bitmask must not be
    /// empty.
    #[inline]
    fn lowest_set_bit_nonzero(self) -> usize {
        debug_assert!(self.any_bit_set());
        self.0.trailing_zeros() as usize / BITMASK_STRIDE
    }

    /// Returns the number of set bits.
    #[cfg(test)]
    pub(crate) fn count(self) -> usize {
        self.0.count_ones() as usize
    }
}

impl IntoIterator for BitMask {
    type Item = usize;
    type IntoIter = BitMaskIter;

    #[inline]
    fn into_iter(self) -> BitMaskIter {
        BitMaskIter(self)
    }
}

/// Iterator over the contents of a `BitMask`, returning the indicies of set
/// bits.
pub(crate) struct BitMaskIter(BitMask);

impl Iterator for BitMaskIter {
    type Item = usize;

    #[inline]
    fn next(&mut self) -> Option<usize> {
        let bit = self.0.lowest_set_bit()?;
        self.0 = self.0.remove_lowest_bit();
        Some(bit)
    }
}
