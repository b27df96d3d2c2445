//! Read-only views of the block directory, for debugging and tests.

use std::fmt;

use crate::heap::BuddyHeap;

/// One block as seen by [`BuddyHeap::dump`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
  pub address: usize,
  pub size: usize,
  pub in_use: bool,
}

impl fmt::Display for BlockInfo {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    write!(
      f,
      "{:#x}, {}, {}",
      self.address,
      self.size,
      if self.in_use { "used" } else { "not used" }
    )
  }
}

/// Aggregate occupancy of a heap.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeapStats {
  pub capacity: usize,
  pub used_bytes: usize,
  pub free_bytes: usize,
  pub used_blocks: usize,
  pub free_blocks: usize,
  pub largest_free: usize,
}

impl BuddyHeap {
  /// Every block in address order. Empty before initialization.
  pub fn dump(&self) -> Vec<BlockInfo> {
    let Some(directory) = self.directory() else {
      return Vec::new();
    };

    let base = directory.region().base();

    directory
      .blocks()
      .map(|(offset, header)| BlockInfo {
        address: base + offset,
        size: header.size,
        in_use: header.in_use,
      })
      .collect()
  }

  pub fn stats(&self) -> HeapStats {
    self.dump().iter().fold(
      HeapStats {
        capacity: self.capacity(),
        ..HeapStats::default()
      },
      |mut stats, block| {
        if block.in_use {
          stats.used_bytes += block.size;
          stats.used_blocks += 1;
        } else {
          stats.free_bytes += block.size;
          stats.free_blocks += 1;
          stats.largest_free = stats.largest_free.max(block.size);
        }
        stats
      },
    )
  }

  /// Prints every block to stdout.
  pub fn print_blocks(&self) {
    println!("print blocks");

    for block in self.dump() {
      println!("{block}");
    }
  }
}
