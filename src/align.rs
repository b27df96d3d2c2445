/// Rounds `value` up to the next multiple of `align`, which must be a power of
/// two.
///
/// # Examples
///
/// ```rust
/// use rbuddy::align_to;
///
/// assert_eq!(align_to!(13, 8), 16);
/// assert_eq!(align_to!(4096, 4096), 4096);
/// assert_eq!(align_to!(0x2345, 0x1000), 0x3000);
/// ```
#[macro_export]
macro_rules! align_to {
  ($value:expr, $align:expr) => {
    (($value) + ($align) - 1) & !(($align) - 1)
  };
}

/// [`align_to!`] that reports overflow instead of wrapping.
pub fn checked_align_to(
  value: usize,
  align: usize,
) -> Option<usize> {
  debug_assert!(align.is_power_of_two());

  Some(value.checked_add(align - 1)? & !(align - 1))
}

/// Returns the system page size.
pub fn page_size() -> usize {
  // SAFETY: sysconf has no preconditions.
  let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };

  if size <= 0 { 4096 } else { size as usize }
}
