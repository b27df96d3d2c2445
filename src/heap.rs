use std::{alloc::Layout, process, ptr};

use log::{debug, error, trace};

use crate::{
  config::HeapConfig,
  directory::BlockDirectory,
  error::Result,
  region::Region,
  size_class::round_up,
};

/// A fixed-capacity buddy heap over one OS mapping.
///
/// The region is mapped lazily on the first allocation (or eagerly through
/// [`BuddyHeap::init`]) and returned to the OS by [`BuddyHeap::teardown`] or
/// when the heap is dropped.
///
/// The heap is single-threaded and not reentrant. Sharing it between threads
/// needs a lock around every call.
pub struct BuddyHeap {
  config: HeapConfig,
  directory: Option<BlockDirectory>,
}

impl BuddyHeap {
  /// Creates an uninitialized heap. Nothing is mapped until the first
  /// allocation or an explicit [`BuddyHeap::init`].
  pub const fn new(config: HeapConfig) -> Self {
    Self {
      config,
      directory: None,
    }
  }

  /// Maps the region and writes the root block. Does nothing when already
  /// initialized.
  pub fn init(&mut self) -> Result<()> {
    if self.directory.is_some() {
      return Ok(());
    }

    let region = Region::map(&self.config)?;
    self.directory = Some(BlockDirectory::new(region));

    Ok(())
  }

  pub fn is_initialized(&self) -> bool {
    self.directory.is_some()
  }

  /// Address of the region base, or null before initialization.
  pub fn base(&self) -> *mut u8 {
    match &self.directory {
      Some(directory) => directory.region().block_ptr(0),
      None => ptr::null_mut(),
    }
  }

  pub fn capacity(&self) -> usize {
    self.config.capacity
  }

  pub fn min_chunk_size(&self) -> usize {
    self.config.min_chunk_size
  }

  /// Whether `address` lies inside the managed payload area.
  pub fn owns(
    &self,
    address: *const u8,
  ) -> bool {
    self
      .directory
      .as_ref()
      .is_some_and(|directory| directory.region().offset_of(address as usize).is_some())
  }

  /// Returns the region to the OS. Every pointer handed out so far dangles
  /// afterwards; a later allocation maps a fresh region.
  pub fn teardown(&mut self) {
    if let Some(directory) = self.directory.take() {
      debug!("tearing down heap at {:#x}", directory.region().base());
    }
  }

  pub(crate) fn directory(&self) -> Option<&BlockDirectory> {
    self.directory.as_ref()
  }

  fn directory_or_init(&mut self) -> &mut BlockDirectory {
    if let Err(err) = self.init() {
      error!("cannot set up the heap region: {err}");
      process::abort();
    }

    match self.directory.as_mut() {
      Some(directory) => directory,
      None => unreachable!("heap initialized above"),
    }
  }

  /// Allocates a block of at least `size` bytes.
  ///
  /// Returns null when the request is larger than the capacity or no free
  /// block fits. The returned address is aligned to the block's size class.
  ///
  /// Maps the region on first use. Failing to map it aborts the process.
  pub fn alloc(
    &mut self,
    size: usize,
  ) -> *mut u8 {
    let capacity = self.capacity();
    let min_chunk_size = self.min_chunk_size();
    let directory = self.directory_or_init();

    let target = match round_up(size, min_chunk_size) {
      Some(target) if target <= capacity => target,
      _ => {
        debug!("request of {size} bytes exceeds capacity {capacity}");
        return ptr::null_mut();
      }
    };

    trace!("request of {size} bytes rounds up to {target}");

    unsafe {
      let Some(block) = directory.first_fit(target) else {
        debug!("no free block of {target} bytes");
        return ptr::null_mut();
      };

      while (*block).size > target {
        directory.split(block);
      }

      (*block).in_use = true;

      directory.region().block_ptr(directory.offset_of(block))
    }
  }

  /// Frees a block returned by [`BuddyHeap::alloc`] and coalesces it with its
  /// buddy as far as possible. A null pointer is ignored.
  ///
  /// # Safety
  ///
  /// `address` must have come from `alloc` on this heap, since its last
  /// teardown, and must not have been freed already.
  pub unsafe fn free(
    &mut self,
    address: *mut u8,
  ) {
    if address.is_null() {
      return;
    }

    let Some(directory) = self.directory.as_mut() else {
      debug_assert!(false, "free({address:p}) on an uninitialized heap");
      return;
    };

    let Some(mut block) = directory.header_for(address as usize) else {
      debug_assert!(false, "free({address:p}) outside the heap");
      return;
    };

    unsafe {
      debug_assert!((*block).in_use, "double free of {address:p}");

      (*block).in_use = false;

      while let Some(buddy) = directory.mergeable_buddy(block) {
        block = directory.merge(block, buddy);
      }
    }
  }

  /// Allocates memory for `layout`. Blocks are aligned to their own size, so
  /// the request is served from the class of `max(size, align)`.
  pub fn allocate(
    &mut self,
    layout: Layout,
  ) -> *mut u8 {
    self.alloc(layout.size().max(layout.align()))
  }

  /// Frees memory obtained from [`BuddyHeap::allocate`].
  ///
  /// # Safety
  ///
  /// Same contract as [`BuddyHeap::free`].
  pub unsafe fn deallocate(
    &mut self,
    address: *mut u8,
  ) {
    unsafe { self.free(address) }
  }
}

impl Default for BuddyHeap {
  fn default() -> Self {
    Self::new(HeapConfig::default())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use test_log::test;

  fn heap(
    capacity: usize,
    min_chunk_size: usize,
  ) -> BuddyHeap {
    BuddyHeap::new(HeapConfig::new(capacity).with_min_chunk_size(min_chunk_size))
  }

  fn layout(heap: &BuddyHeap) -> Vec<(usize, usize, bool)> {
    heap
      .directory()
      .unwrap()
      .blocks()
      .map(|(offset, header)| (offset, header.size, header.in_use))
      .collect()
  }

  #[test]
  fn test_lazy_init() {
    let mut heap = heap(1024, 32);

    assert!(!heap.is_initialized());
    assert!(heap.base().is_null());

    let address = heap.alloc(1);

    assert!(heap.is_initialized());
    assert_eq!(address, heap.base());
    assert_eq!(heap.base() as usize % 1024, 0);
  }

  #[test]
  fn test_init_is_idempotent() {
    let mut heap = heap(1024, 32);

    heap.init().unwrap();
    let base = heap.base();
    heap.init().unwrap();

    assert_eq!(heap.base(), base);
  }

  #[test]
  fn test_split_to_requested_class() {
    let mut heap = heap(1024, 32);
    let a = heap.alloc(40);

    assert_eq!(a, heap.base());
    assert_eq!(
      layout(&heap),
      vec![
        (0, 64, true),
        (64, 64, false),
        (128, 128, false),
        (256, 256, false),
        (512, 512, false),
      ]
    );
  }

  #[test]
  fn test_free_coalesces_completely() {
    let mut heap = heap(1024, 32);
    let a = heap.alloc(40);
    let b = heap.alloc(64);

    assert_eq!(b as usize, a as usize + 64);

    unsafe {
      heap.free(a);
      assert_eq!(layout(&heap)[0], (0, 64, false));
      assert_eq!(layout(&heap)[1], (64, 64, true));

      heap.free(b);
    }

    assert_eq!(layout(&heap), vec![(0, 1024, false)]);
  }

  #[test]
  fn test_free_in_reverse_order() {
    let mut heap = heap(1024, 32);
    let blocks: Vec<_> = [100, 32, 200, 32, 64].iter().map(|&size| heap.alloc(size)).collect();

    assert!(blocks.iter().all(|block| !block.is_null()));

    for &block in blocks.iter().rev() {
      unsafe { heap.free(block) };
    }

    assert_eq!(layout(&heap), vec![(0, 1024, false)]);
  }

  #[test]
  fn test_no_merge_across_unequal_sizes() {
    let mut heap = heap(1024, 32);
    let a = heap.alloc(32);
    let b = heap.alloc(32);
    let c = heap.alloc(64);

    unsafe {
      heap.free(b);
      heap.free(a);
    }

    // a and b merge to 64; c at 64 is still in use
    assert_eq!(&layout(&heap)[..2], &[(0, 64, false), (64, 64, true)]);

    unsafe { heap.free(c) };

    assert_eq!(layout(&heap), vec![(0, 1024, false)]);
  }

  #[test]
  fn test_whole_region_once() {
    let mut heap = heap(1024, 32);

    let whole = heap.alloc(1024);
    assert_eq!(whole, heap.base());
    assert!(heap.alloc(1024).is_null());
    assert!(heap.alloc(1).is_null());

    unsafe { heap.free(whole) };

    assert_eq!(heap.alloc(1024), heap.base());
  }

  #[test]
  fn test_oversize_request() {
    let mut heap = heap(1024, 32);

    assert!(heap.alloc(1025).is_null());
    assert!(heap.alloc(usize::MAX).is_null());
    assert_eq!(layout(&heap), vec![(0, 1024, false)]);
  }

  #[test]
  fn test_payload_writes_leave_metadata_alone() {
    let mut heap = heap(1024, 32);
    let a = heap.alloc(32);
    let b = heap.alloc(32);

    unsafe {
      ptr::write_bytes(a, 0xFF, 32);
      ptr::write_bytes(b, 0xFF, 32);

      heap.free(a);
      heap.free(b);
    }

    assert_eq!(layout(&heap), vec![(0, 1024, false)]);
  }

  #[test]
  fn test_allocate_respects_alignment() {
    let mut heap = heap(4096, 32);
    let _small = heap.alloc(32);

    let layout = Layout::from_size_align(8, 256).unwrap();
    let aligned = heap.allocate(layout);

    assert!(!aligned.is_null());
    assert_eq!(aligned as usize % 256, 0);

    unsafe { heap.deallocate(aligned) };

    assert!(heap.allocate(Layout::from_size_align(8, 8192).unwrap()).is_null());
  }

  #[test]
  fn test_teardown_and_reinit() {
    let mut heap = heap(1024, 32);
    let _leaked = heap.alloc(100);

    heap.teardown();
    assert!(!heap.is_initialized());
    assert!(heap.base().is_null());

    let fresh = heap.alloc(1024);
    assert_eq!(fresh, heap.base());
  }

  #[test]
  fn test_owns() {
    let mut heap = heap(1024, 32);
    let a = heap.alloc(32);
    let outside = Box::new(0u8);

    assert!(heap.owns(a));
    assert!(heap.owns(unsafe { a.add(1023) }));
    assert!(!heap.owns(unsafe { a.add(1024) }));
    assert!(!heap.owns(&*outside));
  }

  #[test]
  fn test_init_reports_oversized_capacity() {
    let mut heap = BuddyHeap::new(HeapConfig::new(1 << (usize::BITS - 1)));

    let err = heap.init().unwrap_err();

    assert!(matches!(err, crate::InitError::TooLarge { .. }));
    assert!(!heap.is_initialized());
  }

  #[test]
  fn test_free_null_is_noop() {
    let mut heap = heap(1024, 32);
    heap.init().unwrap();

    unsafe { heap.free(ptr::null_mut()) };

    assert_eq!(layout(&heap), vec![(0, 1024, false)]);
  }
}
