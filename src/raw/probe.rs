use super::group::GROUP_WIDTH;

/// Primary hash function, used to select the initial group to probe from.
///
/// The lowest 3 bits pick the overflow bit and the top 8 bits the reduced
/// hash, so the group position is taken from the bits in between.
#[inline]
#[allow(clippy::cast_possible_truncation)]
pub(crate) fn h1(hash: u64) -> usize {
    // On 32-bit platforms we simply ignore the higher hash bits.
    (hash >> 3) as usize
}

/// Probe sequence based on triangular numbers, which is guaranteed (since our
/// group count is a power of two) to visit every group exactly once.
///
/// A triangular probe has us jump by 1 more group every time. So first we
/// jump by 1 group (meaning we just continue our linear scan), then 2 groups
/// (skipping over 1 group), then 3 groups (skipping over 2 groups), and so on.
///
/// Proof that the probe will visit every group in the table:
/// <https://fgiesen.wordpress.com/2015/02/22/triangular-numbers-mod-2n/>
#[derive(Clone, Debug)]
pub(crate) struct ProbeSeq {
    pub(crate) pos: usize,
    stride: usize,
}

impl ProbeSeq {
    #[inline]
    pub(crate) fn new(hash: u64, group_mask: usize) -> Self {
        ProbeSeq {
            pos: h1(hash) & group_mask,
            stride: 0,
        }
    }

    /// Moves to the next group. Returns `false` once every group has been
    /// visited.
    #[inline]
    pub(crate) fn move_next(&mut self, group_mask: usize) -> bool {
        if self.stride >= group_mask {
            return false;
        }
        self.stride += 1;
        self.pos += self.stride;
        self.pos &= group_mask;
        true
    }
}

/// Returns the maximum number of elements a table with `groups` groups may
/// hold, taking the maximum load factor of 7/8 into account.
///
/// This always leaves at least one slot vacant, so an insertion probing the
/// whole table is guaranteed to find room.
#[inline]
pub(crate) fn groups_to_capacity(groups: usize) -> usize {
    let slots = groups * GROUP_WIDTH;
    slots / 8 * 7 + slots % 8 * 7 / 8
}

/// Returns the number of groups needed to hold `cap` elements, taking the
/// maximum load factor into account. Zero elements need zero groups.
///
/// Returns `None` if an overflow occurs.
#[inline]
pub(crate) fn capacity_to_groups(cap: usize) -> Option<usize> {
    if cap == 0 {
        return Some(0);
    }

    // Require 1/8 of the slots to be empty (87.5% load), rounding up.
    let slots = cap.checked_mul(8)?.checked_add(6)? / 7;
    let groups = slots.div_ceil(GROUP_WIDTH);

    groups.checked_next_power_of_two()
}

/// Returns the number of groups the table grows to once `groups` groups are
/// no longer enough for `needed` elements.
#[inline]
pub(crate) fn grown_groups(groups: usize, needed: usize) -> Option<usize> {
    let doubled = if groups == 0 { 1 } else { groups.checked_mul(2)? };
    Some(usize::max(doubled, capacity_to_groups(needed)?))
}
