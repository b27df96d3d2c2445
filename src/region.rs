use std::{io, mem, ptr::NonNull};

use libc::{MAP_ANONYMOUS, MAP_FAILED, MAP_PRIVATE, PROT_READ, PROT_WRITE, c_void};
use log::{debug, info, warn};

use crate::{
  align::{checked_align_to, page_size},
  align_to,
  block::BlockHeader,
  config::HeapConfig,
  error::{InitError, Result},
};

/// The single OS mapping a heap manages.
///
/// ```text
///   base                                base + capacity
///   ▼                                   ▼
///   ┌───────────────────────────────────┬──────────────────────┐
///   │          payload area             │     header table     │
///   │   (capacity bytes, tiled by       │  one BlockHeader per │
///   │    power-of-two blocks)           │  min_chunk granule   │
///   └───────────────────────────────────┴──────────────────────┘
/// ```
///
/// `base` is a multiple of `capacity`, so the buddy of a block is found by
/// flipping one bit of its offset from `base`.
pub struct Region {
  base: NonNull<u8>,
  capacity: usize,
  min_chunk_size: usize,
  headers: *mut BlockHeader,
  map_len: usize,
}

impl Region {
  /// Maps a region for `config`, honouring its alignment and target base.
  pub fn map(config: &HeapConfig) -> Result<Self> {
    config.validate()?;

    let too_large = || InitError::TooLarge {
      capacity: config.capacity,
      min_chunk_size: config.min_chunk_size,
    };

    let header_offset =
      checked_align_to(config.capacity, mem::align_of::<BlockHeader>()).ok_or_else(too_large)?;
    let header_bytes = config
      .granules()
      .checked_mul(mem::size_of::<BlockHeader>())
      .ok_or_else(too_large)?;
    let map_len = header_offset
      .checked_add(header_bytes)
      .and_then(|len| checked_align_to(len, page_size()))
      .ok_or_else(too_large)?;

    // room for the alignment slack trimmed off by map_aligned
    if config.target_base.is_none() && map_len.checked_add(config.capacity).is_none() {
      return Err(too_large());
    }

    let base = match config.target_base {
      Some(target) => unsafe { map_at(target, map_len)? },
      None => unsafe { map_aligned(config.capacity, map_len)? },
    };

    info!(
      "mapped region at {:#x}: capacity = {}, min chunk = {}, mapping = {} bytes",
      base as usize, config.capacity, config.min_chunk_size, map_len
    );

    Ok(Self {
      // SAFETY: mmap never hands back a null mapping on success.
      base: unsafe { NonNull::new_unchecked(base) },
      capacity: config.capacity,
      min_chunk_size: config.min_chunk_size,
      headers: unsafe { base.add(header_offset) }.cast::<BlockHeader>(),
      map_len,
    })
  }

  pub fn base(&self) -> usize {
    self.base.as_ptr() as usize
  }

  pub fn capacity(&self) -> usize {
    self.capacity
  }

  pub fn min_chunk_size(&self) -> usize {
    self.min_chunk_size
  }

  /// Offset from `base` of `addr`, if it lies in the payload area.
  pub fn offset_of(
    &self,
    addr: usize,
  ) -> Option<usize> {
    addr
      .checked_sub(self.base())
      .filter(|&offset| offset < self.capacity)
  }

  /// Address of the block starting `offset` bytes into the payload area.
  pub fn block_ptr(
    &self,
    offset: usize,
  ) -> *mut u8 {
    debug_assert!(offset < self.capacity);

    unsafe { self.base.as_ptr().add(offset) }
  }

  /// Header slot for the block starting at `offset`.
  pub fn header_at(
    &self,
    offset: usize,
  ) -> *mut BlockHeader {
    debug_assert!(offset < self.capacity, "offset {offset:#x} out of region");
    debug_assert!(offset % self.min_chunk_size == 0, "offset {offset:#x} not on a granule");

    unsafe { self.headers.add(offset / self.min_chunk_size) }
  }

  /// Inverse of [`Region::header_at`]. `None` when `header` is not a slot of
  /// this region's table.
  pub fn offset_of_header(
    &self,
    header: *const BlockHeader,
  ) -> Option<usize> {
    let table = self.headers as usize;
    let slot = (header as usize).checked_sub(table)?;

    if slot % mem::size_of::<BlockHeader>() != 0 {
      return None;
    }

    let offset = slot / mem::size_of::<BlockHeader>() * self.min_chunk_size;

    (offset < self.capacity).then_some(offset)
  }
}

impl Drop for Region {
  fn drop(&mut self) {
    let rc = unsafe { libc::munmap(self.base.as_ptr() as *mut c_void, self.map_len) };

    if rc != 0 {
      warn!(
        "munmap of region at {:#x} failed: {}",
        self.base(),
        io::Error::last_os_error()
      );
    } else {
      info!("unmapped region at {:#x}", self.base());
    }
  }
}

unsafe fn mmap(
  hint: usize,
  len: usize,
) -> Result<*mut u8> {
  let addr = unsafe {
    libc::mmap(
      hint as *mut c_void,
      len,
      PROT_READ | PROT_WRITE,
      MAP_PRIVATE | MAP_ANONYMOUS,
      -1,
      0,
    )
  };

  if addr == MAP_FAILED {
    return Err(InitError::Map {
      len,
      source: io::Error::last_os_error(),
    });
  }

  Ok(addr as *mut u8)
}

unsafe fn munmap(
  addr: usize,
  len: usize,
) {
  if len == 0 {
    return;
  }

  if unsafe { libc::munmap(addr as *mut c_void, len) } != 0 {
    warn!(
      "munmap({addr:#x}, {len}) failed: {}",
      io::Error::last_os_error()
    );
  }
}

/// Maps exactly at `target`, or fails.
unsafe fn map_at(
  target: usize,
  len: usize,
) -> Result<*mut u8> {
  let addr = unsafe { mmap(target, len)? };

  if addr as usize != target {
    unsafe { munmap(addr as usize, len) };

    return Err(InitError::TargetUnavailable {
      wanted: target,
      got: addr as usize,
    });
  }

  Ok(addr)
}

/// Maps `len` bytes starting at a multiple of `align`. Over-reserves by one
/// alignment unit, then returns the slack on both sides to the OS.
unsafe fn map_aligned(
  align: usize,
  len: usize,
) -> Result<*mut u8> {
  let page = page_size();

  if align <= page {
    return unsafe { mmap(0, len) };
  }

  let reserve = len + align;
  let raw = unsafe { mmap(0, reserve)? };
  let head = align_to!(raw as usize, align) - raw as usize;
  let tail = reserve - head - len;

  debug!("trimming alignment slack: {head} bytes before, {tail} bytes after");

  let aligned = unsafe { raw.add(head) };

  unsafe {
    munmap(raw as usize, head);
    munmap(aligned as usize + len, tail);
  }

  Ok(aligned)
}
