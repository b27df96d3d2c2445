//! # rbuddy - A Fixed-Capacity Buddy Allocator
//!
//! This crate provides a **buddy allocator** that reserves one contiguous,
//! power-of-two sized region from the OS with `mmap(2)` and serves every
//! allocation from inside it, by splitting blocks in halves and merging them
//! back together.
//!
//! ## Overview
//!
//! Every block is a power of two. A request is rounded up to its size class,
//! and the first free block (by address) that is large enough is halved until
//! it matches:
//!
//! ```text
//!   alloc(40) on a 1024 byte heap, min chunk 32:
//!
//!   ┌──────────────────────────────────────────────────────────────────────┐
//!   │                                 1024                                 │
//!   └──────────────────────────────────────────────────────────────────────┘
//!   ┌───────────────────────────────────┬──────────────────────────────────┐
//!   │                512                │               512                │
//!   └───────────────────────────────────┴──────────────────────────────────┘
//!   ┌─────────────────┬─────────────────┬──────────────────────────────────┐
//!   │       256       │       256       │               512                │
//!   └─────────────────┴─────────────────┴──────────────────────────────────┘
//!   ┌────────┬────────┬─────────────────┬──────────────────────────────────┐
//!   │  128   │  128   │       256       │               512                │
//!   └────────┴────────┴─────────────────┴──────────────────────────────────┘
//!   ┌────┬───┬────────┬─────────────────┬──────────────────────────────────┐
//!   │ 64 │64 │  128   │       256       │               512                │
//!   └────┴───┴────────┴─────────────────┴──────────────────────────────────┘
//!     ▲
//!     └── returned to the caller
//! ```
//!
//! The two halves of a split are **buddies**. Because the region base is a
//! multiple of the capacity, the buddy of the block at offset `o` with size
//! `1 << n` sits at `o ^ (1 << n)`. Freeing a block merges it with its buddy
//! for as long as the buddy is free and of the same size.
//!
//! ## Crate Structure
//!
//! ```text
//!   rbuddy
//!   ├── align        - align_to! macro, page size
//!   ├── config       - HeapConfig (capacity, min chunk, target base)
//!   ├── error        - InitError
//!   ├── size_class   - round_up, exponent_of
//!   ├── block        - BlockHeader (internal)
//!   ├── region       - the OS mapping and its header table (internal)
//!   ├── directory    - address ordered block list, split / merge (internal)
//!   ├── heap         - BuddyHeap: alloc, free, init, teardown
//!   └── diagnostics  - dump, stats, print_blocks
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use rbuddy::{BuddyHeap, HeapConfig};
//!
//! let mut heap = BuddyHeap::new(HeapConfig::new(1 << 16));
//!
//! let ptr = heap.alloc(100) as *mut u64;
//! assert!(!ptr.is_null());
//!
//! unsafe {
//!     ptr.write(42);
//!     assert_eq!(ptr.read(), 42);
//!
//!     heap.free(ptr as *mut u8);
//! }
//!
//! assert_eq!(heap.dump().len(), 1);
//! ```
//!
//! ## Memory Layout
//!
//! Block headers are kept out of band, in a table mapped right after the
//! payload area. The address handed to the caller is the block itself, so a
//! block of 32 bytes really holds 32 bytes, and nothing written through it can
//! corrupt the allocator's metadata:
//!
//! ```text
//!   ┌───────────────────────────────────────┬────────────────────────────┐
//!   │             Payload Area              │        Header Table        │
//!   │  ┌──────┬──────┬──────────┬────────┐  │  ┌────┬────┬────┬────┬───┐ │
//!   │  │ A 64 │ B 64 │ free 128 │  ...   │  │  │ hA │ hB │    │ hF │...│ │
//!   │  └──────┴──────┴──────────┴────────┘  │  └────┴────┴────┴────┴───┘ │
//!   │      capacity bytes, base aligned     │  one slot per min chunk    │
//!   └───────────────────────────────────────┴────────────────────────────┘
//!   ▲
//!   └── base (a multiple of capacity)
//! ```
//!
//! ## Limitations
//!
//! - **Single-threaded only**: no synchronization; wrap the heap in a lock to
//!   share it
//! - **Fixed capacity**: the region never grows
//! - **Power-of-two waste**: a request is rounded up to its size class
//! - **Unix-only**: requires `libc` and `mmap`
//!
//! ## Safety
//!
//! Allocation is safe to call. Freeing is `unsafe`: the pointer must have come
//! from the same heap and must not have been freed already.

pub mod align;
mod block;
pub mod config;
pub mod diagnostics;
mod directory;
pub mod error;
mod heap;
mod region;
pub mod size_class;

pub use config::{DEFAULT_CAPACITY, DEFAULT_MIN_CHUNK_SIZE, HeapConfig};
pub use diagnostics::{BlockInfo, HeapStats};
pub use error::InitError;
pub use heap::BuddyHeap;
