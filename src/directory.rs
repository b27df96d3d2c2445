use log::{debug, trace, warn};

use crate::{block::BlockHeader, region::Region, size_class::exponent_of};

/// Address-ordered list of block headers that together tile the region.
///
/// ```text
///   offset 0                                                capacity
///   ┌───────────┬───────┬───────┬───────────────────────────────┐
///   │  128 used │ 64    │ 64    │            256 free           │ ...
///   └───────────┴───────┴───────┴───────────────────────────────┘
///        ▲  │      ▲  │    ▲  │                ▲
///        │  └─next─┘  └next┘  └──────next──────┘
///        └───prev──────┘  ...
/// ```
///
/// Buddy addressing works on offsets from the region base. Since the base is
/// a multiple of the capacity, the buddy of the block at offset `o` with size
/// `1 << n` is at `o ^ (1 << n)`.
pub struct BlockDirectory {
  region: Region,
}

impl BlockDirectory {
  /// Takes over `region` and writes the single header spanning all of it.
  pub fn new(region: Region) -> Self {
    let root = region.header_at(0);

    unsafe { root.write(BlockHeader::free(region.capacity())) };

    Self { region }
  }

  pub fn region(&self) -> &Region {
    &self.region
  }

  /// Header of the lowest-address block.
  pub fn first(&self) -> *mut BlockHeader {
    self.region.header_at(0)
  }

  /// Header of the block whose payload starts at `addr`.
  pub fn header_for(
    &self,
    addr: usize,
  ) -> Option<*mut BlockHeader> {
    let offset = self.region.offset_of(addr)?;

    if offset % self.region.min_chunk_size() != 0 {
      return None;
    }

    Some(self.region.header_at(offset))
  }

  /// Offset of the block described by `header`.
  ///
  /// # Safety
  ///
  /// `header` must be a live header of this directory.
  pub unsafe fn offset_of(
    &self,
    header: *const BlockHeader,
  ) -> usize {
    match self.region.offset_of_header(header) {
      Some(offset) => offset,
      None => unreachable!("header {header:p} is not in the header table"),
    }
  }

  /// Offset of the buddy of the block at `offset`, for a block of size
  /// `1 << exponent`. `None` when the flipped offset leaves the region, which
  /// happens only for the unsplit whole region.
  pub fn buddy_offset(
    &self,
    offset: usize,
    exponent: u32,
  ) -> Option<usize> {
    let bit = 1usize.checked_shl(exponent)?;
    let buddy = offset ^ bit;

    (buddy < self.region.capacity()).then_some(buddy)
  }

  /// First free block, in address order, of at least `size` bytes.
  ///
  /// A walk that leaves the header table or takes more steps than the region
  /// has granules is treated as corruption and reports no match.
  ///
  /// # Safety
  ///
  /// Every header reachable from the first one must be initialized.
  pub unsafe fn first_fit(
    &self,
    size: usize,
  ) -> Option<*mut BlockHeader> {
    match unsafe { self.search(size) } {
      Search::Found(header) => Some(header),
      Search::Exhausted | Search::Corrupt => None,
    }
  }

  /// The walk behind [`BlockDirectory::first_fit`], telling a full region
  /// apart from a broken chain.
  ///
  /// # Safety
  ///
  /// Same contract as [`BlockDirectory::first_fit`].
  pub unsafe fn search(
    &self,
    size: usize,
  ) -> Search {
    let max_steps = self.region.capacity() / self.region.min_chunk_size();
    let mut current = self.first();

    for _ in 0..max_steps {
      if current.is_null() {
        return Search::Exhausted;
      }

      if self.region.offset_of_header(current).is_none() {
        warn!("directory walk left the region at header {current:p}");
        return Search::Corrupt;
      }

      let block = unsafe { &*current };

      trace!(
        "checking block {:?}: size = {}, in use = {}",
        current, block.size, block.in_use
      );

      if block.is_free() && block.size >= size {
        return Search::Found(current);
      }

      current = block.next;
    }

    // a fully tiled region of min-size blocks ends exactly here
    if current.is_null() {
      return Search::Exhausted;
    }

    warn!("directory walk exceeded {max_steps} blocks");
    Search::Corrupt
  }

  /// Splits the free block `header` in two. The lower half stays at
  /// `header`, the upper half gets a new header linked right after it.
  /// Returns the new (upper) header.
  ///
  /// # Safety
  ///
  /// `header` must be a live, free header of this directory whose size is
  /// above the minimum chunk size.
  pub unsafe fn split(
    &mut self,
    header: *mut BlockHeader,
  ) -> *mut BlockHeader {
    unsafe {
      let offset = self.offset_of(header);
      let size = (*header).size;

      debug_assert!(!(*header).in_use);
      debug_assert!(size > self.region.min_chunk_size());

      let half = size / 2;
      let buddy_offset = match self.buddy_offset(offset, exponent_of(half)) {
        Some(buddy) => buddy,
        None => unreachable!("upper half of a block lies inside the region"),
      };
      let buddy = self.region.header_at(buddy_offset);

      debug!("split block at {offset:#x}: {size} -> {half} + {half} (buddy at {buddy_offset:#x})");

      buddy.write(BlockHeader::new(half, false, (*header).next, header));

      if !(*header).next.is_null() {
        (*(*header).next).prev = buddy;
      }

      (*header).next = buddy;
      (*header).size = half;

      buddy
    }
  }

  /// Returns the buddy header of `header` when the two can merge: the buddy
  /// exists, is free and has the same size.
  ///
  /// # Safety
  ///
  /// `header` must be a live header of this directory.
  pub unsafe fn mergeable_buddy(
    &self,
    header: *mut BlockHeader,
  ) -> Option<*mut BlockHeader> {
    unsafe {
      let size = (*header).size;

      if size >= self.region.capacity() {
        return None;
      }

      let offset = self.offset_of(header);
      let buddy_offset = self.buddy_offset(offset, exponent_of(size))?;
      let buddy = self.region.header_at(buddy_offset);

      if (*buddy).in_use || (*buddy).size != size {
        trace!(
          "block at {offset:#x} ({size}) cannot merge: buddy at {buddy_offset:#x} is {} with size {}",
          if (*buddy).in_use { "in use" } else { "free" },
          (*buddy).size
        );
        return None;
      }

      Some(buddy)
    }
  }

  /// Merges two buddies into the lower one, splicing the upper header out of
  /// the list. Returns the surviving header.
  ///
  /// # Safety
  ///
  /// `a` and `b` must be free buddies of equal size in this directory.
  pub unsafe fn merge(
    &mut self,
    a: *mut BlockHeader,
    b: *mut BlockHeader,
  ) -> *mut BlockHeader {
    unsafe {
      let (lower, upper) = if self.offset_of(a) < self.offset_of(b) {
        (a, b)
      } else {
        (b, a)
      };

      debug_assert_eq!((*lower).size, (*upper).size);
      debug_assert_eq!((*lower).next, upper);

      debug!(
        "merge blocks at {:#x} and {:#x}: {} + {} -> {}",
        self.offset_of(lower),
        self.offset_of(upper),
        (*lower).size,
        (*upper).size,
        (*lower).size * 2
      );

      (*lower).size *= 2;
      (*lower).next = (*upper).next;

      if !(*upper).next.is_null() {
        (*(*upper).next).prev = lower;
      }

      lower
    }
  }

  /// Walks every block in address order.
  pub fn blocks(&self) -> Blocks<'_> {
    Blocks {
      directory: self,
      current: self.first(),
    }
  }
}

/// Outcome of a first-fit walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Search {
  Found(*mut BlockHeader),
  /// Every block was visited, none fits.
  Exhausted,
  /// The chain left the header table or never ended.
  Corrupt,
}

/// Iterator over `(offset, header)` pairs, in address order.
pub struct Blocks<'a> {
  directory: &'a BlockDirectory,
  current: *mut BlockHeader,
}

impl<'a> Iterator for Blocks<'a> {
  type Item = (usize, &'a BlockHeader);

  fn next(&mut self) -> Option<Self::Item> {
    if self.current.is_null() {
      return None;
    }

    let offset = self.directory.region.offset_of_header(self.current)?;
    let header = unsafe { &*self.current };

    self.current = header.next;

    Some((offset, header))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::HeapConfig;

  fn directory(capacity: usize) -> BlockDirectory {
    let region = Region::map(&HeapConfig::new(capacity)).unwrap();
    BlockDirectory::new(region)
  }

  fn layout(directory: &BlockDirectory) -> Vec<(usize, usize, bool)> {
    directory
      .blocks()
      .map(|(offset, header)| (offset, header.size, header.in_use))
      .collect()
  }

  #[test]
  fn test_new_directory_is_one_free_block() {
    let directory = directory(1024);

    assert_eq!(layout(&directory), vec![(0, 1024, false)]);
  }

  #[test]
  fn test_buddy_offset() {
    let directory = directory(1024);

    assert_eq!(directory.buddy_offset(0, 5), Some(32));
    assert_eq!(directory.buddy_offset(32, 5), Some(0));
    assert_eq!(directory.buddy_offset(64, 6), Some(0));
    assert_eq!(directory.buddy_offset(512, 9), Some(0));
    assert_eq!(directory.buddy_offset(0, 10), None);
    assert_eq!(directory.buddy_offset(0, 200), None);
  }

  #[test]
  fn test_split_keeps_lower_half() {
    let mut directory = directory(1024);

    unsafe {
      let root = directory.first();
      let upper = directory.split(root);

      assert_eq!(directory.offset_of(upper), 512);
      assert_eq!((*upper).prev, root);
      assert!((*upper).next.is_null());

      directory.split(root);
    }

    assert_eq!(
      layout(&directory),
      vec![(0, 256, false), (256, 256, false), (512, 512, false)]
    );
  }

  #[test]
  fn test_split_then_merge_restores_root() {
    let mut directory = directory(1024);

    unsafe {
      let root = directory.first();
      directory.split(root);
      directory.split(root);

      let buddy = directory.mergeable_buddy(root).unwrap();
      assert_eq!(directory.offset_of(buddy), 256);

      let merged = directory.merge(buddy, root);
      assert_eq!(merged, root);

      let buddy = directory.mergeable_buddy(root).unwrap();
      directory.merge(root, buddy);

      assert!(directory.mergeable_buddy(root).is_none());
    }

    assert_eq!(layout(&directory), vec![(0, 1024, false)]);
  }

  #[test]
  fn test_no_merge_with_split_buddy() {
    let mut directory = directory(1024);

    unsafe {
      let root = directory.first();
      let upper = directory.split(root);
      directory.split(upper);

      // the lower 512 block's buddy at 512 is now only 256 wide
      assert!(directory.mergeable_buddy(root).is_none());
    }
  }

  #[test]
  fn test_first_fit_prefers_lowest_address() {
    let mut directory = directory(1024);

    unsafe {
      let root = directory.first();
      let upper = directory.split(root);
      directory.split(root);

      assert_eq!(directory.first_fit(200), Some(root));

      (*root).in_use = true;
      let next = directory.first_fit(200).unwrap();
      assert_eq!(directory.offset_of(next), 256);

      assert_eq!(directory.first_fit(300), Some(upper));
      assert_eq!(directory.first_fit(600), None);
    }
  }

  #[test]
  fn test_full_region_is_exhausted_not_corrupt() {
    let mut directory = directory(128);

    unsafe {
      let root = directory.first();
      let upper = directory.split(root);
      directory.split(root);
      directory.split(upper);

      for offset in [0, 32, 64, 96] {
        (*directory.region().header_at(offset)).in_use = true;
      }

      assert_eq!(directory.search(32), Search::Exhausted);
      assert_eq!(directory.first_fit(32), None);
    }

    assert_eq!(
      layout(&directory),
      vec![(0, 32, true), (32, 32, true), (64, 32, true), (96, 32, true)]
    );
  }

  #[test]
  fn test_link_outside_table_is_corrupt() {
    let directory = directory(1024);
    let mut stray = BlockHeader::free(1024);

    unsafe {
      let root = directory.first();
      (*root).in_use = true;
      (*root).next = &mut stray;

      assert_eq!(directory.search(32), Search::Corrupt);
      assert_eq!(directory.first_fit(32), None);
    }
  }

  #[test]
  fn test_cyclic_chain_is_corrupt() {
    let mut directory = directory(1024);

    unsafe {
      let root = directory.first();
      let upper = directory.split(root);
      (*root).in_use = true;
      (*upper).in_use = true;
      (*upper).next = root;

      assert_eq!(directory.search(32), Search::Corrupt);
      assert_eq!(directory.first_fit(32), None);
    }
  }

  #[test]
  fn test_header_for() {
    let directory = directory(1024);
    let base = directory.region().base();

    assert_eq!(directory.header_for(base), Some(directory.first()));
    assert!(directory.header_for(base + 7).is_none());
    assert!(directory.header_for(base + 1024).is_none());
  }
}
