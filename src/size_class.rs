//! Size classes: every block is a power of two no smaller than the heap's
//! minimum chunk size.

/// Rounds a request up to its size class: the smallest power of two that is
/// at least `requested` and at least `min_chunk_size`.
///
/// Returns `None` when no such power of two fits in a `usize`.
pub fn round_up(
  requested: usize,
  min_chunk_size: usize,
) -> Option<usize> {
  debug_assert!(min_chunk_size.is_power_of_two());

  if requested <= min_chunk_size {
    return Some(min_chunk_size);
  }

  requested.checked_next_power_of_two()
}

/// Returns `n` such that `size == 1 << n`.
///
/// `size` must already be a power of two; block sizes always are.
pub fn exponent_of(size: usize) -> u32 {
  debug_assert!(size.is_power_of_two(), "{size} is not a power of two");

  size.trailing_zeros()
}
