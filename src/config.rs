use crate::error::{InitError, Result};

/// Default managed capacity: 2 MiB, so the base has its lower 21 bits clear.
pub const DEFAULT_CAPACITY: usize = 1 << 21;

/// Smallest block handed out by default.
pub const DEFAULT_MIN_CHUNK_SIZE: usize = 32;

/// Construction-time parameters of a [`BuddyHeap`](crate::BuddyHeap).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapConfig {
  /// Total bytes managed. Power of two.
  pub capacity: usize,
  /// Smallest size class. Power of two.
  pub min_chunk_size: usize,
  /// Fixed start address for the region. Must be a multiple of `capacity`.
  /// When `None` the OS chooses, and the region is trimmed into alignment.
  pub target_base: Option<usize>,
}

impl HeapConfig {
  pub const fn new(capacity: usize) -> Self {
    Self {
      capacity,
      min_chunk_size: DEFAULT_MIN_CHUNK_SIZE,
      target_base: None,
    }
  }

  pub const fn with_min_chunk_size(
    mut self,
    min_chunk_size: usize,
  ) -> Self {
    self.min_chunk_size = min_chunk_size;
    self
  }

  pub const fn with_target_base(
    mut self,
    target_base: usize,
  ) -> Self {
    self.target_base = Some(target_base);
    self
  }

  /// Number of `min_chunk_size` granules in the region, which is also the
  /// number of header slots the region needs.
  pub const fn granules(&self) -> usize {
    self.capacity / self.min_chunk_size
  }

  pub fn validate(&self) -> Result<()> {
    if !self.capacity.is_power_of_two() {
      return Err(InitError::InvalidCapacity {
        capacity: self.capacity,
      });
    }

    if !self.min_chunk_size.is_power_of_two() || self.min_chunk_size > self.capacity {
      return Err(InitError::InvalidMinChunkSize {
        min_chunk_size: self.min_chunk_size,
        capacity: self.capacity,
      });
    }

    if let Some(target) = self.target_base {
      if target == 0 || target % self.capacity != 0 {
        return Err(InitError::MisalignedTarget {
          target,
          capacity: self.capacity,
        });
      }
    }

    Ok(())
  }
}

impl Default for HeapConfig {
  fn default() -> Self {
    Self::new(DEFAULT_CAPACITY)
  }
}
