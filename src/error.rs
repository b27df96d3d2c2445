use std::io;

use thiserror::Error;

/// Reasons the managed region could not be set up.
///
/// Any of these turns into a process abort when it happens during the lazy
/// initialization performed by [`BuddyHeap::alloc`](crate::BuddyHeap::alloc).
#[derive(Debug, Error)]
pub enum InitError {
  #[error("capacity must be a power of two (got {capacity})")]
  InvalidCapacity { capacity: usize },

  #[error("min chunk size must be a power of two no larger than the capacity {capacity} (got {min_chunk_size})")]
  InvalidMinChunkSize {
    min_chunk_size: usize,
    capacity: usize,
  },

  #[error("capacity {capacity} with min chunk {min_chunk_size} does not fit in the address space")]
  TooLarge {
    capacity: usize,
    min_chunk_size: usize,
  },

  #[error("target base {target:#x} is not a multiple of the capacity {capacity:#x}")]
  MisalignedTarget { target: usize, capacity: usize },

  #[error("mmap of {len} bytes failed")]
  Map {
    len: usize,
    #[source]
    source: io::Error,
  },

  #[error("wanted the region at {wanted:#x}, the OS placed it at {got:#x}")]
  TargetUnavailable { wanted: usize, got: usize },
}

pub type Result<T> = core::result::Result<T, InitError>;
