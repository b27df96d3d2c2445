use std::ptr;

/// Metadata for one block of the heap, free or in use.
///
/// Headers never sit inside the block they describe. They live in the
/// region's header table, so nothing a caller writes through an allocation
/// can reach them.
#[derive(Debug)]
pub struct BlockHeader {
  pub size: usize,
  pub in_use: bool,
  /// Header of the next block by address, null for the last block.
  pub next: *mut BlockHeader,
  /// Header of the previous block by address, null for the first block.
  pub prev: *mut BlockHeader,
}

impl BlockHeader {
  pub fn new(
    size: usize,
    in_use: bool,
    next: *mut BlockHeader,
    prev: *mut BlockHeader,
  ) -> Self {
    Self {
      size,
      in_use,
      next,
      prev,
    }
  }

  /// A free block with no neighbours, spanning `size` bytes.
  pub fn free(size: usize) -> Self {
    Self::new(size, false, ptr::null_mut(), ptr::null_mut())
  }

  pub fn is_free(&self) -> bool {
    !self.in_use
  }
}
